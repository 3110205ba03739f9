//! # runner-adapters
//!
//! Host-facing implementations of the runner's seams.
//!
//! - [`ProcessSupervisor`] launches the player, streams its output line by
//!   line and enforces the wall-clock deadline by killing the process group.
//! - [`CommandScreenCapture`] shells out to the platform screenshot tool.
//! - [`HttpIngestionClient`] posts episode payloads to the ingestion API.

mod ingestion_client;
mod screen_capture;
mod supervisor;

pub use ingestion_client::{API_KEY_HEADER, HttpIngestionClient, parse_episode_id};
pub use screen_capture::{
    CommandScreenCapture, HostEnvironment, HostOs, OUTPUT_PLACEHOLDER, default_command,
    detect_host,
};
pub use supervisor::{DRAIN_GRACE, ProcessSupervisor};
