//! Verdict records and scan stage markers

use crate::aggregate::Verdict;
use crate::content_id::ContentId;
use crate::error::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Highest-confidence stage reflected in a cached verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStage {
    /// Title + quick audio/image checks
    Quick,
    /// Quick checks plus the full-length audio scan
    Phase2,
    /// Every stage, or a terminal unsafe finding
    Full,
}

impl ScanStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStage::Quick => "quick",
            ScanStage::Phase2 => "phase2",
            ScanStage::Full => "full",
        }
    }
}

impl fmt::Display for ScanStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "quick" => Ok(ScanStage::Quick),
            "phase2" => Ok(ScanStage::Phase2),
            "full" => Ok(ScanStage::Full),
            other => Err(format!("unknown scan stage {:?}", other)),
        }
    }
}

/// One cached verdict per content ID
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerdictRecord {
    pub content_id: ContentId,
    pub title: Option<String>,
    pub safe: bool,
    pub reasons: Vec<String>,
    pub scanned_at: DateTime<Utc>,
    pub scan_stage: ScanStage,
}

impl VerdictRecord {
    /// Build a record from an aggregated verdict
    ///
    /// Unsafe verdicts are terminal, so they are always stamped `Full`
    /// regardless of which stage produced them.
    pub fn from_verdict(
        content_id: ContentId,
        title: Option<String>,
        verdict: Verdict,
        stage: ScanStage,
        scanned_at: DateTime<Utc>,
    ) -> Self {
        let scan_stage = if verdict.safe { stage } else { ScanStage::Full };
        Self {
            content_id,
            title,
            safe: verdict.safe,
            reasons: verdict.reasons,
            scanned_at,
            scan_stage,
        }
    }

    /// Whether no further stage can change this verdict
    pub fn is_terminal(&self) -> bool {
        self.scan_stage == ScanStage::Full || !self.safe
    }

    /// Serialize the reason list for a TEXT column
    pub fn reasons_json(&self) -> String {
        serde_json::to_string(&self.reasons).unwrap_or_else(|_| "[]".to_string())
    }
}

/// Raw column values as read from a backend
///
/// Backends hand rows over in this shape so decoding and consistency checks
/// live in one place.
pub struct RawRecord {
    pub content_id: String,
    pub title: Option<String>,
    pub safe: bool,
    pub reasons: String,
    pub scanned_at: Result<DateTime<Utc>, String>,
    pub scan_stage: String,
}

impl RawRecord {
    pub fn decode(self) -> Result<VerdictRecord, StoreError> {
        let content_id = ContentId::parse(&self.content_id)
            .map_err(|e| StoreError::corrupt(&self.content_id, e.to_string()))?;

        let reasons: Vec<String> = serde_json::from_str(self.reasons.trim())
            .map_err(|e| StoreError::corrupt(&self.content_id, format!("reasons: {}", e)))?;

        let scan_stage = self
            .scan_stage
            .parse::<ScanStage>()
            .map_err(|e| StoreError::corrupt(&self.content_id, e))?;

        let scanned_at = self
            .scanned_at
            .map_err(|e| StoreError::corrupt(&self.content_id, format!("scanned_at: {}", e)))?;

        // An unsafe flag is authoritative whatever the stage or reason count;
        // only a safe row that carries reasons is self-contradictory.
        if self.safe && !reasons.is_empty() {
            return Err(StoreError::corrupt(
                &self.content_id,
                format!("safe row carries {} reasons", reasons.len()),
            ));
        }

        Ok(VerdictRecord {
            content_id,
            title: self.title,
            safe: self.safe,
            reasons,
            scanned_at,
            scan_stage,
        })
    }
}
