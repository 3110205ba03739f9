//! # runner-proto
//!
//! Shared types, error definitions, and traits for the Unity runner.
//!
//! This crate provides the foundational abstractions used across all runner crates,
//! including:
//! - The `Episode` report and its status derivation inputs
//! - Run modes and the supervised process outcome
//! - Trait seams for process supervision, screen capture, and ingestion transport

mod capture;
mod episode;
mod ingestion;
mod mode;
mod process;

pub use capture::{CaptureError, CapturedImage, ScreenCapture, SamplerUnavailable};
pub use episode::{
    EPISODE_SOURCE, Episode, EpisodeArtifacts, EpisodeMetrics, EpisodeStatus, ObservedOutcome,
    ScenarioContract,
};
pub use ingestion::{EpisodeReceipt, IngestionTarget, IngestionTransport, ReportError};
pub use mode::{ParsedMode, RunMode, UnknownModeError};
pub use process::{
    LaunchError, LaunchRequest, LineCallback, ProcessOutcome, ProcessRunner, TERMINATED_EXIT_CODE,
};
