//! Stage runners and the background continuation

use super::{Completion, ContinuationOutcome, Evaluation, Inner, ScanType, Stage};
use crate::aggregate::{ReasonAccumulator, Verdict};
use crate::collab::{ArtifactKind, Artifacts, Classifier};
use crate::coordinator::ScanToken;
use crate::error::ScanError;
use crate::verdict_cache::{ScanStage, VerdictRecord};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

impl Inner {
    /// Title check and quick scan for a freshly claimed session
    pub(super) async fn fresh_stages(
        self: &Arc<Self>,
        token: &ScanToken,
        title: Option<String>,
        stale: bool,
    ) -> Result<Evaluation, ScanError> {
        let id = token.content_id().clone();

        if stale {
            token.checkpoint()?;
            self.store.delete(&id).await?;
            debug!("discarded stale cache record for {}", id);
        }

        let title_reasons = self.titles.scan(title.as_deref());
        if !title_reasons.is_empty() {
            info!("title check flagged {} ({} reasons)", id, title_reasons.len());
            let record = self
                .write(token, title, Verdict::from_reasons(title_reasons), ScanStage::Full)
                .await?;
            self.coordinator.finish(token);
            return Ok(Evaluation::from_record(record, false, false, Some(ScanType::Title)));
        }

        let (audio_reasons, image_reasons, artifacts) = self.quick_scan(token).await?;
        let mut reasons = ReasonAccumulator::new();
        reasons.extend("quick audio", audio_reasons);
        reasons.extend("image", image_reasons.clone());

        if !reasons.is_clean() {
            info!(
                "quick scan flagged {} (audio {}, image {})",
                id,
                reasons.count_for("quick audio").unwrap_or(0),
                reasons.count_for("image").unwrap_or(0)
            );
            let record = self
                .write(token, title, reasons.into_verdict(), ScanStage::Full)
                .await?;
            self.workspace.release(&id);
            self.coordinator.finish(token);
            return Ok(Evaluation::from_record(record, false, false, Some(ScanType::Quick)));
        }

        let record = self
            .write(token, title.clone(), reasons.into_verdict(), ScanStage::Quick)
            .await?;
        self.workspace.retain(artifacts.clone());
        self.spawn_continuation(token.child(), Stage::FullAudio, title, artifacts, image_reasons);
        Ok(Evaluation::from_record(
            record,
            false,
            true,
            Some(ScanType::Preliminary),
        ))
    }

    /// Fetch artifacts and run the quick audio and image checks together
    async fn quick_scan(
        &self,
        token: &ScanToken,
    ) -> Result<(Vec<String>, Vec<String>, Artifacts), ScanError> {
        let id = token.content_id();
        let tool_failure = |e| ScanError::external(Stage::Quick, id, e);

        let dir = self.workspace.prepare(id).map_err(tool_failure)?;
        token.checkpoint()?;

        let acquirer = &self.collaborators.acquirer;
        let audio = acquirer
            .acquire_artifact(ArtifactKind::Audio, id, &dir)
            .await
            .map_err(tool_failure)?;
        token.checkpoint()?;

        let video = acquirer
            .acquire_artifact(ArtifactKind::Video, id, &dir)
            .await
            .map_err(tool_failure)?;
        token.checkpoint()?;

        let samples = acquirer
            .extract_samples(&video, &dir)
            .await
            .map_err(tool_failure)?;
        token.checkpoint()?;

        let artifacts = Artifacts {
            content_id: id.clone(),
            dir,
            audio,
            video,
            samples,
        };
        info!(
            "quick scan started for {} ({} samples)",
            id,
            artifacts.samples.len()
        );

        let (audio_reasons, image_reasons) = tokio::join!(
            self.classify(Stage::Quick, &self.collaborators.quick_audio, &artifacts),
            self.classify(Stage::Quick, &self.collaborators.images, &artifacts),
        );
        Ok((audio_reasons?, image_reasons?, artifacts))
    }

    /// Full audio and context analysis side by side
    ///
    /// A clean full-audio result is checkpointed as `phase2` before the
    /// context analysis is awaited.
    async fn deep_scan(
        &self,
        token: &ScanToken,
        title: Option<String>,
        artifacts: &Artifacts,
        carried: Vec<String>,
    ) -> Result<Verdict, ScanError> {
        token.checkpoint()?;
        info!("full audio scan and context analysis started for {}", token.content_id());

        let full_audio = async {
            let reasons = self
                .classify(Stage::FullAudio, &self.collaborators.full_audio, artifacts)
                .await?;
            if reasons.is_empty() {
                self.write(token, title.clone(), Verdict::clean(), ScanStage::Phase2)
                    .await?;
            }
            Ok::<_, ScanError>(reasons)
        };
        let context = self.classify(Stage::Context, &self.collaborators.context, artifacts);
        let (full_audio, context) = tokio::join!(full_audio, context);

        let mut reasons = ReasonAccumulator::new();
        reasons.extend("full audio", full_audio?);
        reasons.extend("context", context?);
        reasons.extend("image", carried);
        self.finalize(token, title, reasons).await
    }

    /// Context analysis only, on top of a `phase2` verdict
    async fn context_scan(
        &self,
        token: &ScanToken,
        title: Option<String>,
        artifacts: &Artifacts,
        prior: Vec<String>,
    ) -> Result<Verdict, ScanError> {
        token.checkpoint()?;
        info!("context analysis started for {}", token.content_id());

        let context = self
            .classify(Stage::Context, &self.collaborators.context, artifacts)
            .await?;
        let mut reasons = ReasonAccumulator::with_prior(prior);
        reasons.extend("context", context);
        self.finalize(token, title, reasons).await
    }

    async fn finalize(
        &self,
        token: &ScanToken,
        title: Option<String>,
        reasons: ReasonAccumulator,
    ) -> Result<Verdict, ScanError> {
        let verdict = reasons.into_verdict();
        self.write(token, title, verdict.clone(), ScanStage::Full).await?;
        self.workspace.release(token.content_id());
        self.coordinator.finish(token);
        info!(
            "scan complete for {}: safe={} ({} reasons)",
            token.content_id(),
            verdict.safe,
            verdict.reasons.len()
        );
        Ok(verdict)
    }

    /// Run the remaining stages in a detached task
    pub(super) fn spawn_continuation(
        self: &Arc<Self>,
        token: ScanToken,
        from: Stage,
        title: Option<String>,
        artifacts: Artifacts,
        carried: Vec<String>,
    ) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let result = match from {
                Stage::Context => inner.context_scan(&token, title, &artifacts, carried).await,
                _ => inner.deep_scan(&token, title, &artifacts, carried).await,
            };

            let outcome = match result {
                Ok(verdict) => ContinuationOutcome::Finished(verdict),
                Err(e) if token.is_cancelled() => {
                    info!("background scan for {} superseded: {}", token.content_id(), e);
                    ContinuationOutcome::Superseded
                }
                Err(e) => {
                    inner.abandon(&token, &e).await;
                    ContinuationOutcome::Failed(e.to_string())
                }
            };

            // No subscribers is fine
            let _ = inner.completions.send(Completion {
                content_id: token.content_id().clone(),
                outcome,
            });
        });
    }

    async fn classify(
        &self,
        stage: Stage,
        classifier: &Arc<dyn Classifier>,
        artifacts: &Artifacts,
    ) -> Result<Vec<String>, ScanError> {
        match classifier.classify(artifacts).await {
            Ok(reasons) => {
                debug!(
                    "{} check for {} returned {} reasons",
                    classifier.name(),
                    artifacts.content_id,
                    reasons.len()
                );
                Ok(reasons)
            }
            Err(e) => Err(ScanError::external(
                stage,
                &artifacts.content_id,
                e.context(format!("{} check failed", classifier.name())),
            )),
        }
    }

    /// Upsert a whole record, unless the session has been cancelled
    async fn write(
        &self,
        token: &ScanToken,
        title: Option<String>,
        verdict: Verdict,
        stage: ScanStage,
    ) -> Result<VerdictRecord, ScanError> {
        token.checkpoint()?;
        let record = VerdictRecord::from_verdict(
            token.content_id().clone(),
            title,
            verdict,
            stage,
            self.store.now(),
        );
        self.store.upsert(&record).await?;
        info!(
            "cached {} verdict for {}: safe={} reasons={}",
            record.scan_stage,
            record.content_id,
            record.safe,
            record.reasons.len()
        );
        Ok(record)
    }

    /// Undo a failed run: drop its record and artifacts, end the session
    ///
    /// Does nothing once the session is cancelled; the superseding session
    /// owns the workspace by then.
    pub(super) async fn abandon(&self, token: &ScanToken, err: &ScanError) {
        let id = token.content_id();
        if token.is_cancelled() {
            info!("scan for {} stopped: {}", id, err);
            return;
        }

        warn!("scan for {} failed: {}", id, err);
        if let Err(e) = self.store.delete(id).await {
            error!("failed to delete cache record for {}: {}", id, e);
        }
        self.workspace.release(id);
        self.coordinator.finish(token);
    }
}
