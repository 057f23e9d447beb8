//! Merging reason lists from stage sub-checks

use serde::{Deserialize, Serialize};

/// Aggregated outcome: `safe` iff there are no reasons
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub safe: bool,
    pub reasons: Vec<String>,
}

impl Verdict {
    pub fn from_reasons(reasons: Vec<String>) -> Self {
        Self {
            safe: reasons.is_empty(),
            reasons,
        }
    }

    pub fn clean() -> Self {
        Self::from_reasons(Vec::new())
    }
}

/// Concatenate sub-check reason lists in the order given
///
/// Callers pass lists in stage execution order; within a stage, in the
/// documented sub-check order (e.g. audio before image).
pub fn merge<I>(lists: I) -> Verdict
where
    I: IntoIterator<Item = Vec<String>>,
{
    Verdict::from_reasons(lists.into_iter().flatten().collect())
}

/// Reason accumulator for one evaluation run
///
/// Keeps each source's list in insertion order; the verdict is the
/// [`merge`] of those lists.
#[derive(Debug, Clone, Default)]
pub struct ReasonAccumulator {
    lists: Vec<(&'static str, Vec<String>)>,
}

impl ReasonAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with reasons carried over from a cached record
    pub fn with_prior(reasons: Vec<String>) -> Self {
        Self {
            lists: vec![("cached", reasons)],
        }
    }

    /// Append one source's reasons
    pub fn extend(&mut self, source: &'static str, reasons: Vec<String>) {
        self.lists.push((source, reasons));
    }

    pub fn is_clean(&self) -> bool {
        self.lists.iter().all(|(_, reasons)| reasons.is_empty())
    }

    /// Count contributed by a source, if it ran
    pub fn count_for(&self, source: &str) -> Option<usize> {
        self.lists
            .iter()
            .rev()
            .find(|(name, _)| *name == source)
            .map(|(_, reasons)| reasons.len())
    }

    pub fn into_verdict(self) -> Verdict {
        merge(self.lists.into_iter().map(|(_, reasons)| reasons))
    }
}
