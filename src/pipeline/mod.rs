//! Progressive evaluation pipeline
//!
//! A request runs the title check, then a quick audio/image pass. A clean
//! quick pass is returned to the caller right away while full-length audio
//! and context analysis continue in the background. Every cache write is
//! preceded by a check of the session token.

pub mod resume;
mod stages;

pub use resume::{decide_resume, ResumeDecision};

use crate::aggregate::Verdict;
use crate::collab::{command::command_collaborators, Artifacts, Collaborators, Workspace};
use crate::config::Config;
use crate::content_id::ContentId;
use crate::coordinator::{ScanCoordinator, ScanToken};
use crate::error::ScanError;
use crate::title::TitleScanner;
use crate::verdict_cache::{CacheStore, ScanStage, VerdictRecord};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const COMPLETION_CAPACITY: usize = 64;

/// One phase of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Title,
    Quick,
    FullAudio,
    Context,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Title => "title check",
            Stage::Quick => "quick scan",
            Stage::FullAudio => "full audio scan",
            Stage::Context => "context analysis",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which path produced an evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanType {
    /// Flagged by the title denylist
    Title,
    /// Flagged by the quick audio/image pass
    Quick,
    /// Safe so far; deeper stages still running
    Preliminary,
}

/// Answer to one `evaluate` call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Evaluation {
    pub content_id: ContentId,
    pub safe: bool,
    pub reasons: Vec<String>,
    pub cached: bool,
    pub scan_stage: ScanStage,
    pub scanning: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scan_type: Option<ScanType>,
}

impl Evaluation {
    fn from_record(
        record: VerdictRecord,
        cached: bool,
        scanning: bool,
        scan_type: Option<ScanType>,
    ) -> Self {
        Self {
            content_id: record.content_id,
            safe: record.safe,
            reasons: record.reasons,
            cached,
            scan_stage: record.scan_stage,
            scanning,
            scan_type,
        }
    }
}

/// How a background continuation ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContinuationOutcome {
    Finished(Verdict),
    Failed(String),
    Superseded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub content_id: ContentId,
    pub outcome: ContinuationOutcome,
}

struct Inner {
    store: Arc<dyn CacheStore>,
    coordinator: Arc<ScanCoordinator>,
    collaborators: Collaborators,
    workspace: Workspace,
    titles: TitleScanner,
    completions: broadcast::Sender<Completion>,
}

/// Cache-aware, single-flight evaluator
#[derive(Clone)]
pub struct ScanPipeline {
    inner: Arc<Inner>,
}

pub struct PipelineBuilder {
    store: Arc<dyn CacheStore>,
    collaborators: Collaborators,
    workspace: Workspace,
    coordinator: Option<Arc<ScanCoordinator>>,
    titles: TitleScanner,
}

impl PipelineBuilder {
    pub fn coordinator(mut self, coordinator: Arc<ScanCoordinator>) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    pub fn title_scanner(mut self, titles: TitleScanner) -> Self {
        self.titles = titles;
        self
    }

    pub fn build(self) -> ScanPipeline {
        let (completions, _) = broadcast::channel(COMPLETION_CAPACITY);
        ScanPipeline {
            inner: Arc::new(Inner {
                store: self.store,
                coordinator: self.coordinator.unwrap_or_default(),
                collaborators: self.collaborators,
                workspace: self.workspace,
                titles: self.titles,
                completions,
            }),
        }
    }
}

impl ScanPipeline {
    pub fn builder(
        store: Arc<dyn CacheStore>,
        collaborators: Collaborators,
        workspace: Workspace,
    ) -> PipelineBuilder {
        PipelineBuilder {
            store,
            collaborators,
            workspace,
            coordinator: None,
            titles: TitleScanner::default(),
        }
    }

    pub fn new(
        store: Arc<dyn CacheStore>,
        collaborators: Collaborators,
        workspace: Workspace,
    ) -> Self {
        Self::builder(store, collaborators, workspace).build()
    }

    /// Pipeline wired to the configured external commands
    pub fn from_config(config: &Config, store: Arc<dyn CacheStore>) -> Self {
        Self::builder(
            store,
            command_collaborators(config),
            Workspace::new(config.workspace.dir.clone()),
        )
        .title_scanner(TitleScanner::extended(&config.title.extra_terms))
        .build()
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.inner.store
    }

    pub fn coordinator(&self) -> &Arc<ScanCoordinator> {
        &self.inner.coordinator
    }

    pub fn workspace(&self) -> &Workspace {
        &self.inner.workspace
    }

    pub fn is_active(&self, id: &ContentId) -> bool {
        self.inner.coordinator.is_active(id)
    }

    /// Receive one [`Completion`] per background continuation
    ///
    /// Subscribe before calling [`evaluate`](Self::evaluate); earlier
    /// completions are not replayed.
    pub fn subscribe_completions(&self) -> broadcast::Receiver<Completion> {
        self.inner.completions.subscribe()
    }

    /// Serve, resume or run an evaluation for `raw_id`
    ///
    /// The first read only serves cache hits. Anything else is decided again
    /// after the session is claimed, so a verdict finalized in between is
    /// served rather than discarded.
    pub async fn evaluate(
        &self,
        raw_id: &str,
        title: Option<&str>,
    ) -> Result<Evaluation, ScanError> {
        let id = ContentId::parse(raw_id)?;
        let title = title
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string);

        let (cached, _) = self.read_cached(&id).await?;
        let in_flight = self.inner.coordinator.is_active(&id);
        let retained = self.inner.workspace.retained(&id).is_some();

        if let ResumeDecision::CacheHit(record) = decide_resume(cached.as_ref(), retained, in_flight)
        {
            let scanning = in_flight && !record.is_terminal();
            debug!(
                "cache hit for {}: {} safe={} scanning={}",
                id, record.scan_stage, record.safe, scanning
            );
            return Ok(Evaluation::from_record(record, true, scanning, None));
        }
        self.run_claimed(id, title).await
    }

    /// Cached record for `id`; an unreadable row counts as absent
    async fn read_cached(&self, id: &ContentId) -> Result<(Option<VerdictRecord>, bool), ScanError> {
        match self.inner.store.get(id).await {
            Ok(record) => Ok((record, false)),
            Err(e) if e.is_corrupt() => {
                warn!("treating unreadable cache record as a miss: {}", e);
                Ok((None, true))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn run_claimed(
        &self,
        id: ContentId,
        title: Option<String>,
    ) -> Result<Evaluation, ScanError> {
        let Some(token) = self.inner.coordinator.claim(&id) else {
            return Err(ScanError::InProgress(id));
        };

        let (cached, unreadable) = match self.read_cached(&id).await {
            Ok(read) => read,
            Err(e) => {
                self.inner.coordinator.finish(&token);
                return Err(e);
            }
        };
        let retained = self.inner.workspace.retained(&id);

        match decide_resume(cached.as_ref(), retained.is_some(), false) {
            ResumeDecision::CacheHit(record) => {
                self.inner.coordinator.finish(&token);
                debug!(
                    "{} was finalized before its session started: {} safe={}",
                    id, record.scan_stage, record.safe
                );
                Ok(Evaluation::from_record(record, true, false, None))
            }
            ResumeDecision::ResumeAt(stage) => match (cached, retained) {
                (Some(record), Some(artifacts)) => {
                    Ok(self.resume(token, record, artifacts, stage, title))
                }
                _ => self.run_fresh(token, title, true).await,
            },
            ResumeDecision::FreshRun => {
                let stale = unreadable || cached.is_some();
                self.run_fresh(token, title, stale).await
            }
        }
    }

    async fn run_fresh(
        &self,
        token: ScanToken,
        title: Option<String>,
        stale: bool,
    ) -> Result<Evaluation, ScanError> {
        match self.inner.fresh_stages(&token, title, stale).await {
            Ok(evaluation) => Ok(evaluation),
            Err(e) => {
                self.inner.abandon(&token, &e).await;
                Err(e)
            }
        }
    }

    fn resume(
        &self,
        token: ScanToken,
        record: VerdictRecord,
        artifacts: Artifacts,
        stage: Stage,
        title: Option<String>,
    ) -> Evaluation {
        info!(
            "resuming {} at {} from cached {} verdict",
            record.content_id, stage, record.scan_stage
        );

        let title = title.or_else(|| record.title.clone());
        self.inner
            .spawn_continuation(token.child(), stage, title, artifacts, record.reasons.clone());
        Evaluation::from_record(record, true, true, Some(ScanType::Preliminary))
    }
}
