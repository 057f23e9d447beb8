//! Temporary artifact storage
//!
//! Each content ID gets its own directory under the workspace root. Which
//! content IDs still have usable artifacts is tracked explicitly rather than
//! inferred from whatever happens to be on disk.

use crate::collab::Artifacts;
use crate::content_id::ContentId;
use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Files that survive workspace cleanup
const KEEP_FILES: &[&str] = &[".gitkeep"];

pub struct Workspace {
    root: PathBuf,
    retained: Mutex<HashMap<ContentId, Artifacts>>,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            retained: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dir_for(&self, id: &ContentId) -> PathBuf {
        self.root.join(id.as_str())
    }

    /// Create a clean directory for `id`, discarding every other entry
    pub fn prepare(&self, id: &ContentId) -> Result<PathBuf> {
        fs::create_dir_all(&self.root).with_context(|| {
            format!("Failed to create workspace: {}", self.root.display())
        })?;

        self.retained.lock().clear();
        self.cleanup_except(None);

        let dir = self.dir_for(id);
        if dir.exists() {
            fs::remove_dir_all(&dir)
                .with_context(|| format!("Failed to clear {}", dir.display()))?;
        }
        fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))?;
        debug!("workspace prepared for {} at {}", id, dir.display());
        Ok(dir)
    }

    /// Record that `artifacts` stay on disk for a later stage
    pub fn retain(&self, artifacts: Artifacts) {
        self.retained
            .lock()
            .insert(artifacts.content_id.clone(), artifacts);
    }

    /// Artifacts still available for `id`
    ///
    /// Requires both an explicit retain and the audio file still existing.
    pub fn retained(&self, id: &ContentId) -> Option<Artifacts> {
        let mut retained = self.retained.lock();
        let artifacts = retained.get(id)?;
        if artifacts.audio.is_file() {
            Some(artifacts.clone())
        } else {
            debug!("retained audio for {} is gone", id);
            retained.remove(id);
            None
        }
    }

    /// Drop artifacts for `id`
    pub fn release(&self, id: &ContentId) {
        self.retained.lock().remove(id);
        let dir = self.dir_for(id);
        if dir.exists() {
            if let Err(e) = fs::remove_dir_all(&dir) {
                warn!("failed to clean up {}: {}", dir.display(), e);
            }
        }
    }

    /// Remove everything under the root except `keep` and placeholder files
    pub fn cleanup_except(&self, keep: Option<&ContentId>) {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(_) => return,
        };

        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if KEEP_FILES.contains(&name.as_ref()) {
                continue;
            }
            if keep.map(|id| id.as_str() == name) == Some(true) {
                continue;
            }

            let path = entry.path();
            let result = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            if let Err(e) = result {
                warn!("failed to clean up temp file {}: {}", path.display(), e);
            }
        }
    }
}
