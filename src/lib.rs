// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod clock;
pub mod config;
pub mod coordinator;
pub mod history;
pub mod interpolate;
pub mod metrics;
pub mod monitor;
pub mod policy;
pub mod sample;
pub mod store;
pub mod telegram;
pub mod window;

// ---- Re-exports for stable public API ----
pub use crate::config::EngineConfig;
pub use crate::coordinator::{Coordinator, FlushOutcome, IngestReport};
pub use crate::monitor::{spawn_timeout_monitor, MonitorHandle};
pub use crate::policy::{AggregateResult, AggregateStatus, Policy};
pub use crate::sample::{Reading, Sample, Source};
