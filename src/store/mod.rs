// src/store/mod.rs
pub mod jsonl;
pub mod memory;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::policy::{AggregateResult, AggregateStatus};
use crate::sample::Source;

pub use jsonl::JsonlStore;
pub use memory::MemoryStore;

pub const DOCUMENT_TYPE: &str = "hourly_average";

/// One persisted hourly record, as written to the document store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyDocument {
    pub source: Source,
    #[serde(rename = "type")]
    pub kind: String,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub pressure: Option<f64>,
    pub samples_count: usize,
    pub interpolated: bool,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub timestamp: DateTime<Utc>,
    pub status: AggregateStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl HourlyDocument {
    pub fn from_aggregate(source: Source, agg: &AggregateResult, now: DateTime<Utc>) -> Self {
        let failed = agg.status == AggregateStatus::Failure;
        Self {
            source,
            kind: DOCUMENT_TYPE.to_string(),
            temperature: if failed { None } else { agg.temperature },
            humidity: if failed { None } else { agg.humidity },
            pressure: if failed { None } else { agg.pressure },
            samples_count: agg.samples_count,
            interpolated: !failed && agg.interpolated,
            start_time: agg.window_start,
            end_time: agg.window_end,
            timestamp: now,
            status: agg.status,
            reason: if failed {
                Some(
                    agg.reason
                        .clone()
                        .unwrap_or_else(|| "insufficient data".to_string()),
                )
            } else {
                None
            },
        }
    }
}

/// Durable store for hourly documents.
#[async_trait::async_trait]
pub trait HourlyStore: Send + Sync {
    /// Is there already a document for `source` with `start_time` in
    /// `[hour_floor, hour_floor + 1h)`?
    async fn exists_for_hour(&self, source: Source, hour_floor: DateTime<Utc>) -> Result<bool>;
    async fn insert(&self, doc: &HourlyDocument) -> Result<()>;
    fn name(&self) -> &'static str;
}
