//! Scripted collaborators and a pipeline harness for integration tests

#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use kidsafe::collab::{Acquirer, ArtifactKind, Artifacts, Classifier, Collaborators, Workspace};
use kidsafe::pipeline::{Completion, ScanPipeline};
use kidsafe::title::TitleScanner;
use kidsafe::verdict_cache::{CacheStore, MemoryStore};
use kidsafe::ContentId;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{broadcast, Notify};

/// Pauses a collaborator call until the test releases it
#[derive(Default)]
pub struct Gate {
    entered: Notify,
    release: Notify,
}

impl Gate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn wait_entered(&self) {
        tokio::time::timeout(Duration::from_secs(5), self.entered.notified())
            .await
            .expect("gated call never started");
    }

    pub fn open(&self) {
        self.release.notify_one();
    }

    /// Signal arrival, then block until opened
    pub async fn pass(&self) {
        self.entered.notify_one();
        self.release.notified().await;
    }
}

/// Writes placeholder files instead of downloading
#[derive(Default)]
pub struct FakeAcquirer {
    calls: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
}

impl FakeAcquirer {
    pub fn fail_for(&self, id: &str) {
        self.failing.lock().insert(id.to_string());
    }

    pub fn recover(&self, id: &str) {
        self.failing.lock().remove(id);
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl Acquirer for FakeAcquirer {
    async fn acquire_artifact(
        &self,
        kind: ArtifactKind,
        id: &ContentId,
        dir: &Path,
    ) -> Result<PathBuf> {
        self.calls.lock().push(format!("{}:{}", kind, id));
        if self.failing.lock().contains(id.as_str()) {
            bail!("download blocked for {}", id);
        }
        let path = dir.join(kind.file_name());
        std::fs::write(&path, b"fake")?;
        Ok(path)
    }

    async fn extract_samples(&self, video: &Path, dir: &Path) -> Result<Vec<PathBuf>> {
        self.calls.lock().push(format!("frames:{}", video.display()));
        let frame = dir.join("frame_001.jpg");
        std::fs::write(&frame, b"fake")?;
        Ok(vec![frame])
    }
}

/// Returns canned reasons per content ID; clean by default
pub struct ScriptedClassifier {
    name: &'static str,
    reasons: Mutex<HashMap<String, Vec<String>>>,
    failing: Mutex<HashSet<String>>,
    gates: Mutex<HashMap<String, Arc<Gate>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedClassifier {
    pub fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            reasons: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            gates: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn flag(&self, id: &str, reasons: &[&str]) {
        self.reasons
            .lock()
            .insert(id.to_string(), reasons.iter().map(|r| r.to_string()).collect());
    }

    pub fn fail_for(&self, id: &str) {
        self.failing.lock().insert(id.to_string());
    }

    pub fn gate(&self, id: &str) -> Arc<Gate> {
        let gate = Gate::new();
        self.gates.lock().insert(id.to_string(), gate.clone());
        gate
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn calls_for(&self, id: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.as_str() == id).count()
    }
}

#[async_trait]
impl Classifier for ScriptedClassifier {
    fn name(&self) -> &str {
        self.name
    }

    async fn classify(&self, artifacts: &Artifacts) -> Result<Vec<String>> {
        let id = artifacts.content_id.as_str().to_string();
        self.calls.lock().push(id.clone());

        let gate = self.gates.lock().get(&id).cloned();
        if let Some(gate) = gate {
            gate.pass().await;
        }

        if self.failing.lock().contains(&id) {
            bail!("{} classifier crashed", self.name);
        }
        Ok(self.reasons.lock().get(&id).cloned().unwrap_or_default())
    }
}

pub struct Harness {
    pub pipeline: ScanPipeline,
    pub store: Arc<dyn CacheStore>,
    pub acquirer: Arc<FakeAcquirer>,
    pub quick_audio: Arc<ScriptedClassifier>,
    pub images: Arc<ScriptedClassifier>,
    pub full_audio: Arc<ScriptedClassifier>,
    pub context: Arc<ScriptedClassifier>,
    _workspace: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_store(Arc::new(MemoryStore::new()))
    }

    pub fn with_store(store: Arc<dyn CacheStore>) -> Self {
        Self::build(store, TitleScanner::default())
    }

    pub fn with_titles(titles: TitleScanner) -> Self {
        Self::build(Arc::new(MemoryStore::new()), titles)
    }

    fn build(store: Arc<dyn CacheStore>, titles: TitleScanner) -> Self {
        let workspace_dir = TempDir::new().unwrap();
        let acquirer = Arc::new(FakeAcquirer::default());
        let quick_audio = ScriptedClassifier::new("quick audio");
        let images = ScriptedClassifier::new("image");
        let full_audio = ScriptedClassifier::new("full audio");
        let context = ScriptedClassifier::new("context");

        let collaborators = Collaborators {
            acquirer: acquirer.clone(),
            quick_audio: quick_audio.clone(),
            images: images.clone(),
            full_audio: full_audio.clone(),
            context: context.clone(),
        };
        let pipeline = ScanPipeline::builder(
            store.clone(),
            collaborators,
            Workspace::new(workspace_dir.path().join("tmp")),
        )
        .title_scanner(titles)
        .build();

        Self {
            pipeline,
            store,
            acquirer,
            quick_audio,
            images,
            full_audio,
            context,
            _workspace: workspace_dir,
        }
    }

    /// Calls made to every collaborator so far
    pub fn total_calls(&self) -> usize {
        self.acquirer.calls()
            + self.quick_audio.calls()
            + self.images.calls()
            + self.full_audio.calls()
            + self.context.calls()
    }

    pub fn deep_calls(&self) -> usize {
        self.full_audio.calls() + self.context.calls()
    }
}

pub fn id(raw: &str) -> ContentId {
    ContentId::parse(raw).unwrap()
}

/// Next completion for `raw_id`, failing the test after a few seconds
pub async fn completion_for(rx: &mut broadcast::Receiver<Completion>, raw_id: &str) -> Completion {
    let wait = async {
        loop {
            let completion = rx.recv().await.expect("completion channel closed");
            if completion.content_id.as_str() == raw_id {
                return completion;
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .expect("background scan did not finish")
}

/// The next `n` completions, in arrival order
pub async fn collect_completions(
    rx: &mut broadcast::Receiver<Completion>,
    n: usize,
) -> Vec<Completion> {
    let wait = async {
        let mut out = Vec::with_capacity(n);
        while out.len() < n {
            out.push(rx.recv().await.expect("completion channel closed"));
        }
        out
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .expect("background scans did not finish")
}
