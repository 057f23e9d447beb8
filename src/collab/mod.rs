//! External collaborators: artifact acquisition and content classifiers
//!
//! The pipeline only sees these traits. `command` provides process-backed
//! implementations; tests plug in scripted ones.

pub mod command;
pub mod workspace;

pub use command::{CommandAcquirer, CommandClassifier};
pub use workspace::Workspace;

use crate::content_id::ContentId;
use anyhow::Result;
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Kind of artifact fetched from the remote source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Audio,
    Video,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Audio => "audio",
            ArtifactKind::Video => "video",
        }
    }

    /// File name used inside a content directory
    pub fn file_name(&self) -> &'static str {
        match self {
            ArtifactKind::Audio => "audio.wav",
            ArtifactKind::Video => "preview.mp4",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Prepared inputs for the classifiers of one content ID
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifacts {
    pub content_id: ContentId,
    pub dir: PathBuf,
    pub audio: PathBuf,
    pub video: PathBuf,
    pub samples: Vec<PathBuf>,
}

/// Fetches artifacts for a content ID
#[async_trait]
pub trait Acquirer: Send + Sync {
    /// Download `kind` for `id` into `dir`, returning the file path
    async fn acquire_artifact(
        &self,
        kind: ArtifactKind,
        id: &ContentId,
        dir: &Path,
    ) -> Result<PathBuf>;

    /// Extract still samples from a video into `dir`
    async fn extract_samples(&self, video: &Path, dir: &Path) -> Result<Vec<PathBuf>>;
}

/// Turns artifacts into human-readable reasons; empty means clean
///
/// Implementations are expected to fail open: internal errors and timeouts
/// should come back as `Ok(vec![])`. An `Err` aborts the whole stage.
#[async_trait]
pub trait Classifier: Send + Sync {
    fn name(&self) -> &str;

    async fn classify(&self, artifacts: &Artifacts) -> Result<Vec<String>>;
}

/// Everything the pipeline calls out to
#[derive(Clone)]
pub struct Collaborators {
    pub acquirer: Arc<dyn Acquirer>,
    /// Stage 1: transcript of the opening minutes
    pub quick_audio: Arc<dyn Classifier>,
    /// Stage 1: extracted frames / thumbnail
    pub images: Arc<dyn Classifier>,
    /// Stage 2: full-length transcript word filter
    pub full_audio: Arc<dyn Classifier>,
    /// Stage 3: transcript context analysis
    pub context: Arc<dyn Classifier>,
}
