use crate::pipeline::{Completion, ContinuationOutcome, Evaluation, ScanType};
use crate::verdict_cache::{ScanStage, VerdictRecord};
use colored::*;
use serde::Serialize;

/// Output verbosity mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Quiet,       // Only errors
    Normal,      // Standard output
    Verbose,     // More details
    VeryVerbose, // Timestamps and titles
}

impl OutputMode {
    pub fn from_flags(quiet: bool, verbose: u8) -> Self {
        if quiet {
            OutputMode::Quiet
        } else if verbose >= 2 {
            OutputMode::VeryVerbose
        } else if verbose == 1 {
            OutputMode::Verbose
        } else {
            OutputMode::Normal
        }
    }
}

#[derive(Serialize)]
struct JsonRecords<'a> {
    version: String,
    timestamp: String,
    count: usize,
    records: &'a [VerdictRecord],
}

fn verdict_label(safe: bool) -> ColoredString {
    if safe {
        "SAFE".green().bold()
    } else {
        "UNSAFE".red().bold()
    }
}

/// Short description of how far a verdict got
pub fn stage_summary(stage: ScanStage, scanning: bool) -> String {
    let base = match stage {
        ScanStage::Quick => "quick scan",
        ScanStage::Phase2 => "full audio scan",
        ScanStage::Full => "complete",
    };
    if scanning {
        format!("{}, deeper checks running", base)
    } else {
        base.to_string()
    }
}

fn scan_type_label(scan_type: Option<ScanType>, cached: bool) -> &'static str {
    match (scan_type, cached) {
        (Some(ScanType::Title), _) => "title check",
        (Some(ScanType::Quick), _) => "quick scan",
        (Some(ScanType::Preliminary), true) => "resumed",
        (Some(ScanType::Preliminary), false) => "preliminary",
        (None, _) => "cached",
    }
}

fn print_reasons(reasons: &[String]) {
    for reason in reasons {
        println!("  {} {}", "-".dimmed(), reason);
    }
}

pub fn print_evaluation(evaluation: &Evaluation, mode: OutputMode) {
    if mode == OutputMode::Quiet {
        return;
    }

    println!();
    println!(
        "{} {}  {}",
        evaluation.content_id.to_string().bold(),
        verdict_label(evaluation.safe),
        format!(
            "({}; {})",
            scan_type_label(evaluation.scan_type, evaluation.cached),
            stage_summary(evaluation.scan_stage, evaluation.scanning)
        )
        .dimmed()
    );
    print_reasons(&evaluation.reasons);

    if mode != OutputMode::Normal && evaluation.cached {
        println!("  {}", "served from cache".dimmed());
    }
}

pub fn print_completion(completion: &Completion, mode: OutputMode) {
    if mode == OutputMode::Quiet {
        return;
    }

    match &completion.outcome {
        ContinuationOutcome::Finished(verdict) => {
            println!(
                "{} {}  {}",
                completion.content_id.to_string().bold(),
                verdict_label(verdict.safe),
                "(complete)".dimmed()
            );
            print_reasons(&verdict.reasons);
        }
        ContinuationOutcome::Failed(message) => {
            eprintln!(
                "{} Deep scan for {} failed: {}",
                "Error:".red(),
                completion.content_id,
                message
            );
        }
        ContinuationOutcome::Superseded => {
            eprintln!(
                "{} Deep scan for {} was interrupted",
                "Warning:".yellow(),
                completion.content_id
            );
        }
    }
}

pub fn print_record(record: &VerdictRecord, mode: OutputMode) {
    if mode == OutputMode::Quiet {
        return;
    }

    println!(
        "{:<12} {:<8} {:<16} {}",
        record.content_id.to_string().bold(),
        verdict_label(record.safe),
        record.scan_stage.to_string().cyan(),
        record
            .scanned_at
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
            .dimmed()
    );

    if mode == OutputMode::VeryVerbose {
        if let Some(title) = &record.title {
            println!("  {} {}", "title:".dimmed(), title);
        }
    }
    if mode != OutputMode::Normal || !record.safe {
        print_reasons(&record.reasons);
    }
}

pub fn print_records(records: &[VerdictRecord], mode: OutputMode) {
    if mode == OutputMode::Quiet {
        return;
    }

    if records.is_empty() {
        println!("{}", "No cached verdicts.".dimmed());
        return;
    }

    println!();
    println!(
        "{:<12} {:<8} {:<16} {}",
        "Content".bold(),
        "Verdict".bold(),
        "Stage".bold(),
        "Scanned".bold()
    );
    println!("{}", "-".repeat(60).dimmed());
    for record in records {
        print_record(record, mode);
    }

    let unsafe_count = records.iter().filter(|r| !r.safe).count();
    println!("{}", "-".repeat(60).dimmed());
    println!(
        "{} records, {} unsafe, {} safe",
        records.len(),
        unsafe_count.to_string().red(),
        (records.len() - unsafe_count).to_string().green()
    );
    println!();
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_records_json(records: &[VerdictRecord]) -> anyhow::Result<()> {
    print_json(&JsonRecords {
        version: "1.0".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        count: records.len(),
        records,
    })
}
