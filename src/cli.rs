use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use colored::*;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::content_id::ContentId;
use crate::output::{self, OutputMode};
use crate::pipeline::{Completion, ContinuationOutcome, ScanPipeline};
use crate::progress;
use crate::verdict_cache::{open_store, CacheStore, StoreUrl};

#[derive(Parser)]
#[command(name = "kidsafe")]
#[command(version)]
#[command(about = "Cached, progressive safety verdicts for video content")]
#[command(long_about = "kidsafe checks whether a video is suitable for children. \
    A title check and a quick audio/image pass answer immediately; full-length \
    audio and transcript analysis follow and are cached per video ID.\n\n\
    Examples:\n  \
    kidsafe evaluate dQw4w9WgXcQ                 # Evaluate and wait for the full verdict\n  \
    kidsafe evaluate dQw4w9WgXcQ --quick --json  # Preliminary verdict only, as JSON\n  \
    kidsafe list                                 # Show every cached verdict\n  \
    kidsafe purge-safe                           # Forget all safe verdicts")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase output verbosity (-v, -vv for more)
    #[arg(short = 'v', long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short = 'q', long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Evaluate a video ID, using the cache when possible
    #[command(visible_alias = "e")]
    Evaluate {
        /// 11-character video ID
        id: String,

        /// Video title for the denylist check
        #[arg(long, short = 't')]
        title: Option<String>,

        /// Output results as JSON for scripting
        #[arg(long)]
        json: bool,

        /// Print only the preliminary verdict
        ///
        /// The command still waits for the deep checks so the final verdict
        /// is cached; background work cannot outlive the process.
        #[arg(long)]
        quick: bool,
    },

    /// Show the cached verdict for a video ID
    Show {
        id: String,

        #[arg(long)]
        json: bool,
    },

    /// List every cached verdict, newest first
    #[command(visible_alias = "ls")]
    List {
        #[arg(long)]
        json: bool,
    },

    /// Remove the cached verdict for a video ID
    Forget { id: String },

    /// Remove every cached verdict marked safe
    PurgeSafe,

    /// View or reset configuration
    Config {
        /// Reset configuration to defaults
        #[arg(long)]
        reset: bool,
    },
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    /// Install the tracing subscriber; `RUST_LOG` wins over -v/-q
    pub fn init_logging(&self) {
        let default_level = if self.quiet {
            "error"
        } else {
            match self.verbose {
                0 => "info",
                1 => "debug",
                _ => "trace",
            }
        };
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("kidsafe={},sqlx=warn", default_level)));

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .try_init();
    }

    pub async fn run(self) -> Result<()> {
        let mode = OutputMode::from_flags(self.quiet, self.verbose);

        match self.command {
            Commands::Evaluate {
                id,
                title,
                json,
                quick,
            } => {
                let config = Config::load();
                let store = open_configured_store(&config).await?;
                let pipeline = ScanPipeline::from_config(&config, store);
                let mut completions = pipeline.subscribe_completions();
                let show_progress = !json && mode != OutputMode::Quiet;

                let spinner = progress::create_spinner(&format!("Evaluating {}", id), show_progress);
                let evaluation = pipeline.evaluate(&id, title.as_deref()).await;
                progress::finish_and_clear(&spinner);
                let evaluation =
                    evaluation.with_context(|| format!("Evaluation of {} failed", id))?;

                let plan = WaitPlan::for_evaluation(evaluation.scanning, quick);
                // JSON callers waiting for the final verdict get a single document
                if !json {
                    output::print_evaluation(&evaluation, mode);
                } else if plan != WaitPlan::ReportFinal {
                    output::print_json(&evaluation)?;
                }
                if plan == WaitPlan::Done {
                    return Ok(());
                }

                let spinner = progress::create_spinner(
                    "Running full audio scan and context analysis",
                    show_progress && plan == WaitPlan::ReportFinal,
                );
                let completion = wait_for_completion(&mut completions, &evaluation.content_id).await;
                progress::finish_and_clear(&spinner);

                let Some(completion) = completion else {
                    bail!("Background scan for {} ended without reporting", id);
                };
                match &completion.outcome {
                    ContinuationOutcome::Finished(verdict) => {
                        if plan == WaitPlan::CacheOnly {
                            debug!("final verdict for {} cached: safe={}", id, verdict.safe);
                        } else if json {
                            let final_evaluation = pipeline
                                .evaluate(&id, title.as_deref())
                                .await
                                .with_context(|| format!("Failed to read final verdict for {}", id))?;
                            output::print_json(&final_evaluation)?;
                        } else {
                            output::print_completion(&completion, mode);
                        }
                        Ok(())
                    }
                    ContinuationOutcome::Failed(message) => {
                        bail!("Deep scan for {} failed: {}", id, message)
                    }
                    ContinuationOutcome::Superseded => {
                        output::print_completion(&completion, mode);
                        Ok(())
                    }
                }
            }
            Commands::Show { id, json } => {
                let id = ContentId::parse(&id)?;
                let store = open_configured_store(&Config::load()).await?;
                match store.get(&id).await? {
                    Some(record) if json => output::print_json(&record)?,
                    Some(record) => output::print_record(&record, detail_mode(mode)),
                    None if json => output::print_json(&serde_json::Value::Null)?,
                    None => {
                        if mode != OutputMode::Quiet {
                            println!("No cached verdict for {}", id);
                        }
                    }
                }
                Ok(())
            }
            Commands::List { json } => {
                let store = open_configured_store(&Config::load()).await?;
                let records = store.list().await?;
                if json {
                    output::print_records_json(&records)?;
                } else {
                    output::print_records(&records, mode);
                }
                Ok(())
            }
            Commands::Forget { id } => {
                let id = ContentId::parse(&id)?;
                let store = open_configured_store(&Config::load()).await?;
                store.delete(&id).await?;
                if mode != OutputMode::Quiet {
                    println!("{} Forgot cached verdict for {}", "OK".green(), id);
                }
                Ok(())
            }
            Commands::PurgeSafe => {
                let store = open_configured_store(&Config::load()).await?;
                let removed = store.purge_safe().await?;
                if mode != OutputMode::Quiet {
                    println!("{} Removed {} safe verdicts", "OK".green(), removed);
                }
                Ok(())
            }
            Commands::Config { reset } => {
                if reset {
                    let path = Config::default().save()?;
                    println!(
                        "{} Configuration reset to defaults ({})",
                        "OK".green(),
                        path.display()
                    );
                    return Ok(());
                }

                let config = Config::load_or_create();
                println!("{}", "Current Configuration".bold());
                println!("{}", "=".repeat(60).dimmed());
                println!("Store: {}", config.store.url);
                println!("Workspace: {}", config.workspace.dir.display());
                println!();
                println!("Timeouts (seconds):");
                println!("  Audio download: {}", config.timeouts.audio_download);
                println!("  Video download: {}", config.timeouts.video_download);
                println!("  Frame extraction: {}", config.timeouts.frame_extraction);
                println!("  Quick audio: {}", config.timeouts.quick_audio);
                println!("  Image: {}", config.timeouts.image);
                println!("  Full audio: {}", config.timeouts.full_audio);
                println!("  Context analysis: {}", config.timeouts.context);
                println!();
                println!("Extra title terms:");
                if config.title.extra_terms.is_empty() {
                    println!("  (none)");
                } else {
                    for term in &config.title.extra_terms {
                        println!("  {}", term);
                    }
                }
                println!();
                if let Ok(path) = Config::config_path() {
                    println!("Config file: {}", path.display());
                }
                Ok(())
            }
        }
    }
}

/// What `evaluate` does after the first answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WaitPlan {
    /// Nothing left to run
    Done,
    /// Preliminary verdict printed; wait so the final one is cached
    CacheOnly,
    /// Print the preliminary verdict now and the final one when it lands
    ReportFinal,
}

impl WaitPlan {
    fn for_evaluation(scanning: bool, quick: bool) -> Self {
        match (scanning, quick) {
            (false, _) => WaitPlan::Done,
            (true, true) => WaitPlan::CacheOnly,
            (true, false) => WaitPlan::ReportFinal,
        }
    }
}

/// `show` always prints reasons
fn detail_mode(mode: OutputMode) -> OutputMode {
    match mode {
        OutputMode::Normal => OutputMode::Verbose,
        other => other,
    }
}

async fn open_configured_store(config: &Config) -> Result<Arc<dyn CacheStore>> {
    let url = StoreUrl::parse(&config.store.url)
        .with_context(|| format!("Invalid store url in config: {}", config.store.url))?;
    open_store(&url).await
}

/// Next completion for `id`, skipping other content and lag gaps
async fn wait_for_completion(
    completions: &mut broadcast::Receiver<Completion>,
    id: &ContentId,
) -> Option<Completion> {
    loop {
        match completions.recv().await {
            Ok(completion) if &completion.content_id == id => return Some(completion),
            Ok(_) => continue,
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_evaluate() {
        let cli = <Cli as Parser>::try_parse_from([
            "kidsafe",
            "evaluate",
            "abc12345678",
            "--title",
            "Counting songs",
            "--json",
        ])
        .unwrap();
        match cli.command {
            Commands::Evaluate {
                id,
                title,
                json,
                quick,
            } => {
                assert_eq!(id, "abc12345678");
                assert_eq!(title.as_deref(), Some("Counting songs"));
                assert!(json);
                assert!(!quick);
            }
            _ => panic!("expected evaluate"),
        }
    }

    #[test]
    fn test_parse_global_flags() {
        let cli = <Cli as Parser>::try_parse_from(["kidsafe", "-vv", "list"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Commands::List { json: false }));

        let cli = <Cli as Parser>::try_parse_from(["kidsafe", "purge-safe", "-q"]).unwrap();
        assert!(cli.quiet);
        assert!(matches!(cli.command, Commands::PurgeSafe));
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        assert!(<Cli as Parser>::try_parse_from(["kidsafe", "-q", "-v", "list"]).is_err());
    }

    #[test]
    fn test_quick_still_waits_for_running_scan() {
        assert_eq!(WaitPlan::for_evaluation(true, true), WaitPlan::CacheOnly);
        assert_eq!(WaitPlan::for_evaluation(true, false), WaitPlan::ReportFinal);
        assert_eq!(WaitPlan::for_evaluation(false, true), WaitPlan::Done);
        assert_eq!(WaitPlan::for_evaluation(false, false), WaitPlan::Done);
    }

    #[tokio::test]
    async fn test_wait_for_completion_skips_other_ids() {
        let (tx, mut rx) = broadcast::channel(8);
        let a = ContentId::parse("aaaaaaaaaaa").unwrap();
        let b = ContentId::parse("bbbbbbbbbbb").unwrap();
        tx.send(Completion {
            content_id: a.clone(),
            outcome: ContinuationOutcome::Superseded,
        })
        .unwrap();
        tx.send(Completion {
            content_id: b.clone(),
            outcome: ContinuationOutcome::Failed("boom".to_string()),
        })
        .unwrap();

        let completion = wait_for_completion(&mut rx, &b).await.unwrap();
        assert_eq!(completion.content_id, b);
        drop(tx);
        assert!(wait_for_completion(&mut rx, &a).await.is_none());
    }
}
