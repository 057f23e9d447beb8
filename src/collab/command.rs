//! Process-backed collaborators
//!
//! Each external tool is an argv template from the config. Downloads walk a
//! list of fallback commands; classifiers print their reasons as a JSON array
//! on the last line of stdout.

use crate::collab::{Acquirer, ArtifactKind, Artifacts, Classifier, Collaborators};
use crate::config::{CommandsConfig, Config, Timeouts};
use crate::content_id::ContentId;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Output pattern handed to the frame extractor
const FRAME_PATTERN: &str = "frame_%03d.jpg";

/// Substitute `{name}` placeholders in every argument
fn render(template: &[String], vars: &[(&str, String)]) -> Vec<String> {
    template
        .iter()
        .map(|arg| {
            vars.iter().fold(arg.clone(), |acc, (name, value)| {
                acc.replace(&format!("{{{}}}", name), value)
            })
        })
        .collect()
}

async fn run(argv: &[String], limit: Duration) -> Result<Output> {
    let (program, args) = argv.split_first().context("empty command template")?;

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("Failed to start {}", program))?;

    match tokio::time::timeout(limit, child.wait_with_output()).await {
        Ok(output) => output.with_context(|| format!("Failed to wait for {}", program)),
        Err(_) => bail!("{} timed out after {}s", program, limit.as_secs()),
    }
}

fn stderr_tail(output: &Output) -> String {
    let text = String::from_utf8_lossy(&output.stderr);
    let text = text.trim();
    let start = text
        .char_indices()
        .rev()
        .nth(199)
        .map(|(i, _)| i)
        .unwrap_or(0);
    text[start..].to_string()
}

/// Downloads with fallback commands and extracts frames with one command
pub struct CommandAcquirer {
    commands: CommandsConfig,
    timeouts: Timeouts,
}

impl CommandAcquirer {
    pub fn new(commands: CommandsConfig, timeouts: Timeouts) -> Self {
        Self { commands, timeouts }
    }

    fn attempts(&self, kind: ArtifactKind) -> (&[Vec<String>], Duration) {
        match kind {
            ArtifactKind::Audio => (&self.commands.audio_download, self.timeouts.audio_download()),
            ArtifactKind::Video => (&self.commands.video_download, self.timeouts.video_download()),
        }
    }
}

#[async_trait]
impl Acquirer for CommandAcquirer {
    async fn acquire_artifact(
        &self,
        kind: ArtifactKind,
        id: &ContentId,
        dir: &Path,
    ) -> Result<PathBuf> {
        let output = dir.join(kind.file_name());
        let (attempts, limit) = self.attempts(kind);
        let vars = [
            ("id", id.to_string()),
            ("output", output.display().to_string()),
            ("dir", dir.display().to_string()),
        ];

        info!("downloading {} for {}", kind, id);
        for (attempt, template) in attempts.iter().enumerate() {
            let argv = render(template, &vars);
            match run(&argv, limit).await {
                Ok(result) if output.is_file() => {
                    debug!("{} download for {} succeeded on attempt {}", kind, id, attempt + 1);
                    if !result.status.success() {
                        debug!("downloader exited with {} but produced output", result.status);
                    }
                    return Ok(output);
                }
                Ok(result) => {
                    warn!(
                        "{} download attempt {} for {} failed ({}): {}",
                        kind,
                        attempt + 1,
                        id,
                        result.status,
                        stderr_tail(&result)
                    );
                }
                Err(e) => {
                    warn!("{} download attempt {} for {} failed: {:#}", kind, attempt + 1, id, e);
                }
            }
        }

        Err(anyhow!(
            "{} download failed for {} after {} attempts",
            kind,
            id,
            attempts.len()
        ))
    }

    async fn extract_samples(&self, video: &Path, dir: &Path) -> Result<Vec<PathBuf>> {
        let vars = [
            ("input", video.display().to_string()),
            ("frames", dir.join(FRAME_PATTERN).display().to_string()),
            ("dir", dir.display().to_string()),
        ];
        let argv = render(&self.commands.extract_frames, &vars);
        let output = run(&argv, self.timeouts.frame_extraction())
            .await
            .context("Frame extraction failed")?;
        if !output.status.success() {
            bail!(
                "Frame extraction failed ({}): {}",
                output.status,
                stderr_tail(&output)
            );
        }

        let frames = collect_frames(dir)?;
        debug!("extracted {} frames into {}", frames.len(), dir.display());
        Ok(frames)
    }
}

/// `frame_*.jpg` files in `dir`, sorted by name
fn collect_frames(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut frames: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read {}", dir.display()))?
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .map(|name| name.starts_with("frame_") && name.ends_with(".jpg"))
                .unwrap_or(false)
        })
        .collect();
    frames.sort();
    Ok(frames)
}

/// Last stdout line that parses as a JSON array, as reason strings
///
/// Tools may print progress before the result, so earlier lines are ignored.
pub fn parse_reasons(stdout: &str) -> Option<Vec<String>> {
    stdout.lines().rev().map(str::trim).find_map(|line| {
        if !(line.starts_with('[') && line.ends_with(']')) {
            return None;
        }
        let values: Vec<serde_json::Value> = serde_json::from_str(line).ok()?;
        Some(
            values
                .into_iter()
                .map(|value| match value {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                })
                .collect(),
        )
    })
}

/// Runs one classifier command; never fails, degrades to no finding
pub struct CommandClassifier {
    name: String,
    template: Vec<String>,
    timeout: Duration,
}

impl CommandClassifier {
    pub fn new(name: impl Into<String>, template: Vec<String>, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            template,
            timeout,
        }
    }
}

#[async_trait]
impl Classifier for CommandClassifier {
    fn name(&self) -> &str {
        &self.name
    }

    async fn classify(&self, artifacts: &Artifacts) -> Result<Vec<String>> {
        let vars = [
            ("id", artifacts.content_id.to_string()),
            ("audio", artifacts.audio.display().to_string()),
            ("video", artifacts.video.display().to_string()),
            ("dir", artifacts.dir.display().to_string()),
            ("frames", artifacts.dir.join(FRAME_PATTERN).display().to_string()),
        ];
        let argv = render(&self.template, &vars);

        let output = match run(&argv, self.timeout).await {
            Ok(output) => output,
            Err(e) => {
                warn!(
                    "{} check degraded to no finding for {}: {:#}",
                    self.name, artifacts.content_id, e
                );
                return Ok(Vec::new());
            }
        };

        if !output.status.success() {
            warn!(
                "{} check degraded to no finding for {}: exited with {}: {}",
                self.name,
                artifacts.content_id,
                output.status,
                stderr_tail(&output)
            );
            return Ok(Vec::new());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        match parse_reasons(&stdout) {
            Some(reasons) => {
                debug!(
                    "{} check for {} returned {} reasons",
                    self.name,
                    artifacts.content_id,
                    reasons.len()
                );
                Ok(reasons)
            }
            None => {
                warn!(
                    "{} check degraded to no finding for {}: no JSON array in output",
                    self.name, artifacts.content_id
                );
                Ok(Vec::new())
            }
        }
    }
}

/// Collaborators driven by the configured external commands
pub fn command_collaborators(config: &Config) -> Collaborators {
    let commands = &config.commands;
    let timeouts = config.timeouts;
    Collaborators {
        acquirer: Arc::new(CommandAcquirer::new(commands.clone(), timeouts)),
        quick_audio: Arc::new(CommandClassifier::new(
            "quick audio",
            commands.quick_audio.clone(),
            timeouts.quick_audio(),
        )),
        images: Arc::new(CommandClassifier::new(
            "image",
            commands.images.clone(),
            timeouts.image(),
        )),
        full_audio: Arc::new(CommandClassifier::new(
            "full audio",
            commands.full_audio.clone(),
            timeouts.full_audio(),
        )),
        context: Arc::new(CommandClassifier::new(
            "context",
            commands.context.clone(),
            timeouts.context(),
        )),
    }
}
