// src/monitor.rs
//! Background loop that force-flushes windows which outlived their hour, so a
//! stalled source still gets its hourly record.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::coordinator::Coordinator;

/// Handle to the running monitor. Stopping is cooperative: the flag is
/// checked after each sleep, and an in-flight flush is never cancelled.
#[derive(Debug)]
pub struct MonitorHandle {
    running: Arc<AtomicBool>,
    wake: Arc<Notify>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Clear the flag and cut the current sleep short.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.wake.notify_one();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) && !self.task.is_finished()
    }

    /// Stop and wait for the loop to exit.
    pub async fn shutdown(self) {
        self.stop();
        if let Err(e) = self.task.await {
            tracing::warn!("timeout monitor task ended abnormally: {e}");
        }
    }
}

/// Spawn the timeout monitor on the current Tokio runtime.
pub fn spawn_timeout_monitor(coordinator: Arc<Coordinator>, interval: Duration) -> MonitorHandle {
    let running = Arc::new(AtomicBool::new(true));
    let flag = running.clone();
    let wake = Arc::new(Notify::new());
    let woken = wake.clone();

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = woken.notified() => {}
            }
            if !flag.load(Ordering::SeqCst) {
                break;
            }
            counter!("aggregator_monitor_ticks_total").increment(1);

            for (source, outcome) in coordinator.flush_stale().await {
                tracing::info!(target: "monitor", source = %source, ?outcome, "forced flush on timeout");
            }
        }
        tracing::debug!(target: "monitor", "timeout monitor stopped");
    });

    MonitorHandle {
        running,
        wake,
        task,
    }
}
