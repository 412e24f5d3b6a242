//! Per-account mailbox monitoring.
//!
//! The [`MonitorRegistry`] owns one background task per account. Each
//! task polls the mailbox on its configured cadence, classifies new
//! messages, persists violations, and pushes events to the
//! notification hub. [`Checkpoint`]s make polling resumable without
//! touching server-side read state.

pub mod config;
mod registry;
mod state;
mod task;

pub use config::{Category, ChannelKind, MonitoringConfig, POLL_FLOOR, PollFrequency, Sensitivity};
pub use registry::MonitorRegistry;
pub use state::{Checkpoint, MonitorState, MonitorStatus};
pub use task::MonitorDeps;
