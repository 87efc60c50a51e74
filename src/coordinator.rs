//! # Aggregation Coordinator
//! Façade the transport readers call into. Owns one window per source, each
//! behind its own async mutex, and drives the per-source state machine:
//!
//! `EMPTY → COLLECTING → {READY | STALE} → FLUSHING → EMPTY`
//!
//! The source's lock is held for the whole flush (finalize, duplicate check,
//! insert, reset), so a capacity-triggered flush and a forced flush of the
//! same hour can never interleave. The two sources never share a lock.
//!
//! Nothing here returns an error to the caller: storage problems are logged,
//! counted, and the window is reset so the next hour can proceed.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::Result;
use metrics::{counter, gauge};
use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::clock::{hour_floor, Clock, SystemClock};
use crate::config::EngineConfig;
use crate::history::{CsvSampleLog, HistoryReader, NoHistory, SampleLog};
use crate::metrics::ensure_metrics_described;
use crate::policy::{AggregateStatus, Policy};
use crate::sample::{Reading, Sample, Source};
use crate::store::{HourlyDocument, HourlyStore, JsonlStore};
use crate::window::{IngestOutcome, Window};

/// How a single flush attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing to report yet; the window was left intact.
    Waiting,
    /// A document for the hour was written.
    Persisted(AggregateStatus),
    /// The hour was already stored; the window was reset without writing.
    DuplicateSkipped,
    /// No store configured; the aggregate was only logged.
    LocalOnly(AggregateStatus),
    /// The insert failed or timed out; the hour is lost from durable storage.
    StoreFailed(AggregateStatus),
}

/// Result of `ingest_sample`, including any flushes it triggered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub accepted: bool,
    pub sample_count: usize,
    pub flushes: Vec<FlushOutcome>,
}

pub struct Coordinator {
    wired: Mutex<Window>,
    wireless: Mutex<Window>,
    policy: Policy,
    store: Option<Arc<dyn HourlyStore>>,
    history: Arc<dyn HistoryReader>,
    sample_log: Arc<dyn SampleLog>,
    clock: Arc<dyn Clock>,
    store_timeout: StdDuration,
}

impl Coordinator {
    /// Bare coordinator: no store, no history, system clock.
    pub fn new(window_capacity: usize, policy: Policy) -> Self {
        ensure_metrics_described();
        Self {
            wired: Mutex::new(Window::new(Source::Wired, window_capacity)),
            wireless: Mutex::new(Window::new(Source::Wireless, window_capacity)),
            policy,
            store: None,
            history: Arc::new(NoHistory),
            sample_log: Arc::new(NoHistory),
            clock: Arc::new(SystemClock),
            store_timeout: StdDuration::from_secs(5),
        }
    }

    /// Production wiring: CSV sample log doubling as history, JSONL document store.
    pub fn from_config(cfg: &EngineConfig) -> Self {
        let log = Arc::new(CsvSampleLog::new(cfg.history_path.clone()));
        Self::new(cfg.window_capacity, cfg.policy())
            .with_history(log.clone())
            .with_sample_log(log)
            .with_store(Arc::new(JsonlStore::new(PathBuf::from(&cfg.store_path))))
            .with_store_timeout(cfg.store_timeout())
    }

    pub fn with_store(mut self, store: Arc<dyn HourlyStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_history(mut self, history: Arc<dyn HistoryReader>) -> Self {
        self.history = history;
        self
    }

    pub fn with_sample_log(mut self, log: Arc<dyn SampleLog>) -> Self {
        self.sample_log = log;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_store_timeout(mut self, t: StdDuration) -> Self {
        self.store_timeout = t;
        self
    }

    fn window(&self, source: Source) -> &Mutex<Window> {
        match source {
            Source::Wired => &self.wired,
            Source::Wireless => &self.wireless,
        }
    }

    /// Copy of the current window state, for diagnostics and tests.
    pub async fn window_snapshot(&self, source: Source) -> Window {
        self.window(source).lock().await.clone()
    }

    /// Entry point for transport readers using source names.
    pub async fn ingest_named(
        &self,
        source: &str,
        temperature: f64,
        humidity: f64,
        pressure: f64,
    ) -> Result<IngestReport> {
        let source: Source = source.parse()?;
        Ok(self
            .ingest_sample(source, temperature, humidity, pressure)
            .await)
    }

    pub async fn ingest_sample(
        &self,
        source: Source,
        temperature: f64,
        humidity: f64,
        pressure: f64,
    ) -> IngestReport {
        let reading = Reading::new(temperature, humidity, pressure);
        let mut window = self.window(source).lock().await;
        let now = self.clock.now();
        let mut flushes = Vec::new();

        let mut outcome = window.ingest(reading, now);
        if outcome.forced_prior_hour {
            tracing::info!(source = %source, "settling previous hour before buffering new sample");
            flushes.push(self.flush_locked(&mut window, true).await);
            if !window.is_empty() {
                tracing::warn!(source = %source, "forced flush left samples behind; clearing window");
                window.reset(now);
            }
            outcome = window.ingest(reading, now);
        } else if !outcome.accepted && outcome.needs_processing {
            // Full window that was never settled.
            flushes.push(self.flush_locked(&mut window, false).await);
            if window.is_full() {
                window.reset(now);
            }
            outcome = window.ingest(reading, now);
        }

        if outcome.accepted {
            counter!("aggregator_samples_total", "source" => source.as_str()).increment(1);
            if let Err(e) = self.sample_log.append(source, &Sample::measured(reading, now)).await {
                tracing::warn!(source = %source, error = ?e, "sample log append failed");
            }
        }

        let IngestOutcome {
            sample_count,
            needs_processing,
            accepted,
            ..
        } = outcome;
        if accepted && needs_processing {
            flushes.push(self.flush_locked(&mut window, false).await);
        }

        gauge!("aggregator_window_samples", "source" => source.as_str()).set(window.len() as f64);
        IngestReport {
            accepted,
            sample_count,
            flushes,
        }
    }

    /// Finalize and persist the window of `source`.
    pub async fn flush(&self, source: Source, force: bool) -> FlushOutcome {
        let mut window = self.window(source).lock().await;
        let outcome = self.flush_locked(&mut window, force).await;
        gauge!("aggregator_window_samples", "source" => source.as_str()).set(window.len() as f64);
        outcome
    }

    /// Force-flush every window whose hour has passed. Used by the timeout monitor.
    pub async fn flush_stale(&self) -> Vec<(Source, FlushOutcome)> {
        let mut out = Vec::new();
        for source in Source::ALL {
            let mut window = self.window(source).lock().await;
            if !window.is_stale(self.clock.now()) {
                continue;
            }
            tracing::warn!(
                source = %source,
                samples = window.len(),
                hour = ?window.bucket_hour(),
                "window outlived its hour; forcing flush"
            );
            let outcome = self.flush_locked(&mut window, true).await;
            if !window.is_empty() {
                window.reset(self.clock.now());
            }
            out.push((source, outcome));
        }
        out
    }

    /// History preceding the window's hour, loaded only when the policy will
    /// run a regression fill. A read failure degrades to an empty history.
    async fn history_for(&self, window: &Window) -> Vec<Sample> {
        if !self.policy.needs_history(window) {
            return Vec::new();
        }
        let Some(hour) = window.bucket_hour() else {
            return Vec::new();
        };
        match self
            .history
            .load(window.source(), hour, self.policy.history_lookback)
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(source = %window.source(), error = ?e, "history unavailable; fitting on current window only");
                Vec::new()
            }
        }
    }

    async fn flush_locked(&self, window: &mut Window, force: bool) -> FlushOutcome {
        let source = window.source();
        let now = self.clock.now();

        let history = self.history_for(window).await;
        let Some(agg) = self.policy.finalize(window, force, &history, now) else {
            return FlushOutcome::Waiting;
        };
        let status = agg.status;
        counter!("aggregator_flush_total", "source" => source.as_str(), "status" => status_label(status))
            .increment(1);

        let Some(store) = &self.store else {
            tracing::warn!(source = %source, ?status, "no document store; aggregate kept in local log only");
            window.reset(now);
            return FlushOutcome::LocalOnly(status);
        };

        let hour = hour_floor(agg.window_start);
        match timeout(self.store_timeout, store.exists_for_hour(source, hour)).await {
            Ok(Ok(true)) => {
                tracing::info!(source = %source, %hour, "hour already stored; skipping insert");
                counter!("aggregator_duplicate_skips_total", "source" => source.as_str()).increment(1);
                window.reset(now);
                return FlushOutcome::DuplicateSkipped;
            }
            Ok(Ok(false)) => {}
            Ok(Err(e)) => {
                counter!("aggregator_store_errors_total", "source" => source.as_str()).increment(1);
                tracing::warn!(source = %source, store = store.name(), error = ?e, "duplicate check failed; inserting anyway");
            }
            Err(_) => {
                counter!("aggregator_store_errors_total", "source" => source.as_str()).increment(1);
                tracing::warn!(source = %source, store = store.name(), "duplicate check timed out; inserting anyway");
            }
        }

        let doc = HourlyDocument::from_aggregate(source, &agg, now);
        let outcome = match timeout(self.store_timeout, store.insert(&doc)).await {
            Ok(Ok(())) => {
                tracing::info!(
                    source = %source,
                    %hour,
                    ?status,
                    samples = doc.samples_count,
                    interpolated = doc.interpolated,
                    "hourly document stored"
                );
                FlushOutcome::Persisted(status)
            }
            Ok(Err(e)) => {
                counter!("aggregator_store_errors_total", "source" => source.as_str()).increment(1);
                tracing::error!(source = %source, store = store.name(), error = ?e, "insert failed; hour dropped from store");
                FlushOutcome::StoreFailed(status)
            }
            Err(_) => {
                counter!("aggregator_store_errors_total", "source" => source.as_str()).increment(1);
                tracing::error!(source = %source, store = store.name(), "insert timed out; hour dropped from store");
                FlushOutcome::StoreFailed(status)
            }
        };

        window.reset(now);
        outcome
    }
}

fn status_label(status: AggregateStatus) -> &'static str {
    match status {
        AggregateStatus::Ok => "ok",
        AggregateStatus::Failure => "failure",
    }
}
