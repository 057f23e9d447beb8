//! Kidsafe library crate
//!
//! Progressive safety verdicts for video content: a verdict cache, a
//! single-flight scan coordinator and the staged evaluation pipeline, plus the
//! `kidsafe` operator CLI.

pub mod aggregate;
pub mod cli;
pub mod collab;
pub mod config;
pub mod content_id;
pub mod coordinator;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod title;
pub mod verdict_cache;

pub use content_id::ContentId;
pub use error::{ScanError, StoreError};
pub use pipeline::{Evaluation, ScanPipeline};
