//! Deciding what to do with a cached record

use crate::pipeline::Stage;
use crate::verdict_cache::{ScanStage, VerdictRecord};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeDecision {
    /// Serve the record as-is
    CacheHit(VerdictRecord),
    /// Continue an earlier lineage from this stage
    ResumeAt(Stage),
    /// Discard whatever is cached and start at the title check
    FreshRun,
}

/// Pick the next step for a request
///
/// `artifacts_retained` says whether the previous run's downloads are still
/// registered in the workspace; `in_flight` whether a session for this content
/// is live right now.
pub fn decide_resume(
    cached: Option<&VerdictRecord>,
    artifacts_retained: bool,
    in_flight: bool,
) -> ResumeDecision {
    let Some(record) = cached else {
        return ResumeDecision::FreshRun;
    };

    if record.is_terminal() {
        return ResumeDecision::CacheHit(record.clone());
    }
    // The live session will finish this lineage
    if in_flight {
        return ResumeDecision::CacheHit(record.clone());
    }
    if !artifacts_retained {
        return ResumeDecision::FreshRun;
    }

    match record.scan_stage {
        ScanStage::Quick => ResumeDecision::ResumeAt(Stage::FullAudio),
        ScanStage::Phase2 => ResumeDecision::ResumeAt(Stage::Context),
        ScanStage::Full => ResumeDecision::CacheHit(record.clone()),
    }
}
