use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use anyhow::{bail, Result};
use chrono::{DateTime, Duration, Utc};

use super::{HourlyDocument, HourlyStore};
use crate::sample::Source;

/// In-process document store. Can be flipped to "unavailable" to simulate
/// an unreachable database.
#[derive(Debug, Default)]
pub struct MemoryStore {
    docs: Mutex<Vec<HourlyDocument>>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, down: bool) {
        self.unavailable.store(down, Ordering::SeqCst);
    }

    pub fn documents(&self) -> Vec<HourlyDocument> {
        self.docs.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn count_for(&self, source: Source) -> usize {
        self.documents().iter().filter(|d| d.source == source).count()
    }
}

#[async_trait::async_trait]
impl HourlyStore for MemoryStore {
    async fn exists_for_hour(&self, source: Source, hour_floor: DateTime<Utc>) -> Result<bool> {
        if self.unavailable.load(Ordering::SeqCst) {
            bail!("memory store unavailable");
        }
        let end = hour_floor + Duration::hours(1);
        let docs = self.docs.lock().unwrap_or_else(|e| e.into_inner());
        Ok(docs
            .iter()
            .any(|d| d.source == source && d.start_time >= hour_floor && d.start_time < end))
    }

    async fn insert(&self, doc: &HourlyDocument) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            bail!("memory store unavailable");
        }
        self.docs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(doc.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
