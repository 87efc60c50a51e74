//! File-backed document store: one JSON document per line.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::{HourlyDocument, HourlyStore};
use crate::sample::Source;

#[derive(Debug)]
pub struct JsonlStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// All readable documents; unparseable lines are skipped.
    pub async fn load_all(&self) -> Result<Vec<HourlyDocument>> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("reading {}", self.path.display()));
            }
        };
        Ok(content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| match serde_json::from_str::<HourlyDocument>(l) {
                Ok(d) => Some(d),
                Err(e) => {
                    tracing::warn!(path = %self.path.display(), "skipping bad document: {e}");
                    None
                }
            })
            .collect())
    }
}

#[async_trait::async_trait]
impl HourlyStore for JsonlStore {
    async fn exists_for_hour(&self, source: Source, hour_floor: DateTime<Utc>) -> Result<bool> {
        let end = hour_floor + Duration::hours(1);
        Ok(self
            .load_all()
            .await?
            .iter()
            .any(|d| d.source == source && d.start_time >= hour_floor && d.start_time < end))
    }

    async fn insert(&self, doc: &HourlyDocument) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .await
                .with_context(|| format!("creating {}", dir.display()))?;
        }
        let mut line = serde_json::to_vec(doc).context("encoding hourly document")?;
        line.push(b'\n');

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("opening {}", self.path.display()))?;
        file.write_all(&line)
            .await
            .with_context(|| format!("writing {}", self.path.display()))?;
        file.flush().await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "jsonl"
    }
}
