//! # Sample log & History Reader
//! Append-only CSV log of every accepted raw sample, read back as regression
//! input for gap filling. Row format: `timestamp,source,temperature,humidity,pressure`.
//!
//! Files written by the serial/radio capture scripts (`timestamp,tipo,temperatura,
//! humedad,presion`, naive `%Y-%m-%d %H:%M:%S` timestamps, pressure in kPa) are
//! read as well, and appends to such a file keep its layout. Naive timestamps
//! are taken as UTC.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

use crate::sample::{Reading, Sample, Source};

pub const CSV_HEADER: &str = "timestamp,source,temperature,humidity,pressure";
pub const LEGACY_CSV_HEADER: &str = "timestamp,tipo,temperatura,humedad,presion";

const LEGACY_TIMESTAMP: &str = "%Y-%m-%d %H:%M:%S";
const KPA_TO_HPA: f64 = 10.0;

/// Loads previously persisted samples for one source.
#[async_trait::async_trait]
pub trait HistoryReader: Send + Sync {
    /// Samples of `source` in `[before - lookback, before)`, oldest first.
    async fn load(&self, source: Source, before: DateTime<Utc>, lookback: Duration) -> Result<Vec<Sample>>;
}

/// Receives every raw sample the engine accepts.
#[async_trait::async_trait]
pub trait SampleLog: Send + Sync {
    async fn append(&self, source: Source, sample: &Sample) -> Result<()>;
}

/// History backend for deployments without a local log.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHistory;

#[async_trait::async_trait]
impl HistoryReader for NoHistory {
    async fn load(&self, _source: Source, _before: DateTime<Utc>, _lookback: Duration) -> Result<Vec<Sample>> {
        Ok(Vec::new())
    }
}

#[async_trait::async_trait]
impl SampleLog for NoHistory {
    async fn append(&self, _source: Source, _sample: &Sample) -> Result<()> {
        Ok(())
    }
}

/// Fixed in-memory history, mostly for tests.
#[derive(Debug, Default, Clone)]
pub struct StaticHistory {
    rows: Vec<(Source, Sample)>,
}

impl StaticHistory {
    pub fn new(rows: Vec<(Source, Sample)>) -> Self {
        Self { rows }
    }
}

#[async_trait::async_trait]
impl HistoryReader for StaticHistory {
    async fn load(&self, source: Source, before: DateTime<Utc>, lookback: Duration) -> Result<Vec<Sample>> {
        let from = lookback_start(before, lookback);
        let mut out: Vec<Sample> = self
            .rows
            .iter()
            .filter(|(src, s)| *src == source && s.timestamp >= from && s.timestamp < before)
            .map(|(_, s)| *s)
            .collect();
        out.sort_by_key(|s| s.timestamp);
        Ok(out)
    }
}

/// Column layout of a sample log, decided by its header line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowLayout {
    /// RFC 3339 timestamps, pressure in hPa.
    Native,
    /// Capture-script rows: naive timestamps, pressure in kPa.
    Legacy,
}

impl RowLayout {
    fn from_header(line: &str) -> Self {
        let line = line.trim().trim_start_matches('\u{feff}');
        if line.eq_ignore_ascii_case(LEGACY_CSV_HEADER) || line.contains("presion") {
            RowLayout::Legacy
        } else {
            RowLayout::Native
        }
    }

    fn header(self) -> &'static str {
        match self {
            RowLayout::Native => CSV_HEADER,
            RowLayout::Legacy => LEGACY_CSV_HEADER,
        }
    }

    fn format_row(self, source: Source, sample: &Sample) -> String {
        match self {
            RowLayout::Native => format!(
                "{},{},{},{},{}",
                sample.timestamp.to_rfc3339(),
                source,
                sample.temperature,
                sample.humidity,
                sample.pressure
            ),
            RowLayout::Legacy => format!(
                "{},{},{},{},{}",
                sample.timestamp.format(LEGACY_TIMESTAMP),
                source,
                sample.temperature,
                sample.humidity,
                sample.pressure / KPA_TO_HPA
            ),
        }
    }

    fn parse_row(self, line: &str) -> Option<(Source, Sample)> {
        let mut cols = line.split(',').map(str::trim);
        let ts = parse_timestamp(cols.next()?)?;
        let source: Source = cols.next()?.parse().ok()?;
        let t: f64 = cols.next()?.parse().ok()?;
        let h: f64 = cols.next()?.parse().ok()?;
        let mut p: f64 = cols.next()?.parse().ok()?;
        if self == RowLayout::Legacy {
            p *= KPA_TO_HPA;
        }
        Some((source, Sample::measured(Reading::new(t, h, p), ts)))
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, LEGACY_TIMESTAMP)
        .ok()
        .map(|naive| naive.and_utc())
}

fn lookback_start(before: DateTime<Utc>, lookback: Duration) -> DateTime<Utc> {
    before.checked_sub_signed(lookback).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// CSV file acting as both the sample log and the history source.
#[derive(Debug)]
pub struct CsvSampleLog {
    path: PathBuf,
    /// Serializes appends; caches the layout once the file has been seen.
    layout: Mutex<Option<RowLayout>>,
}

impl CsvSampleLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            layout: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_header(&self) -> Result<Option<String>> {
        let file = match fs::File::open(&self.path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("opening sample log {}", self.path.display())),
        };
        let mut first = String::new();
        BufReader::new(file)
            .read_line(&mut first)
            .await
            .with_context(|| format!("reading header of {}", self.path.display()))?;
        Ok((!first.trim().is_empty()).then_some(first))
    }
}

#[async_trait::async_trait]
impl SampleLog for CsvSampleLog {
    async fn append(&self, source: Source, sample: &Sample) -> Result<()> {
        let mut layout = self.layout.lock().await;

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .await
                .with_context(|| format!("creating {}", dir.display()))?;
        }

        let mut out = String::new();
        let current = match *layout {
            Some(l) => l,
            None => match self.read_header().await? {
                Some(header) => RowLayout::from_header(&header),
                None => {
                    out.push_str(CSV_HEADER);
                    out.push('\n');
                    RowLayout::Native
                }
            },
        };
        *layout = Some(current);
        out.push_str(&current.format_row(source, sample));
        out.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("opening sample log {}", self.path.display()))?;
        file.write_all(out.as_bytes())
            .await
            .with_context(|| format!("appending to {}", self.path.display()))?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl HistoryReader for CsvSampleLog {
    async fn load(&self, source: Source, before: DateTime<Utc>, lookback: Duration) -> Result<Vec<Sample>> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("reading sample log {}", self.path.display())),
        };

        let mut lines = content.lines();
        let layout = lines.next().map(RowLayout::from_header).unwrap_or(RowLayout::Native);
        let from = lookback_start(before, lookback);
        let mut out = Vec::new();
        let mut skipped = 0usize;
        for line in lines {
            match layout.parse_row(line) {
                Some((src, s)) if src == source && s.timestamp >= from && s.timestamp < before => {
                    out.push(s)
                }
                Some(_) => {}
                None if line.trim().is_empty() => {}
                None => skipped += 1,
            }
        }
        if skipped > 0 {
            tracing::warn!(path = %self.path.display(), skipped, "skipped malformed history rows");
        }
        out.sort_by_key(|s| s.timestamp);
        Ok(out)
    }
}
