//! Hourly aggregator — Binary Entrypoint
//! Boots tracing and config, wires the coordinator to the CSV sample log and
//! the JSONL document store, runs the timeout monitor, and feeds telegrams
//! read from stdin.
//!
//! Input lines: `wired <serial line>` or `wireless <hex payload>`.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use hourly_aggregator::{
    config::EngineConfig,
    coordinator::Coordinator,
    metrics::install_prometheus,
    monitor::spawn_timeout_monitor,
    sample::{Reading, Source},
    telegram::{decode_wireless_hex, parse_wired_line, CadenceGate, WiredLine},
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("hourly_aggregator=info,warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

/// Decode one stdin line into the readings it carries.
fn decode_line(line: &str) -> Result<Option<(Source, Vec<Reading>)>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (src, payload) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let source: Source = src.parse()?;
    let readings = match source {
        Source::Wired => match parse_wired_line(payload) {
            WiredLine::Record { reading, .. } => vec![reading],
            WiredLine::BufferStart | WiredLine::BufferEnd | WiredLine::Other => Vec::new(),
        },
        Source::Wireless => decode_wireless_hex(payload).context("decoding wireless payload")?,
    };
    Ok(Some((source, readings)))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = EngineConfig::load_default().context("loading engine config")?;
    tracing::info!(
        capacity = cfg.window_capacity,
        cadence_secs = cfg.cadence_secs,
        store = %cfg.store_path.display(),
        history = %cfg.history_path.display(),
        align_to_cadence = cfg.align_to_cadence,
        "starting hourly aggregator"
    );

    if let Some(listen) = cfg.metrics_listen {
        if let Err(e) = install_prometheus(listen) {
            tracing::warn!(error = ?e, "metrics exporter disabled");
        }
    }

    let coordinator = Arc::new(Coordinator::from_config(&cfg));
    let monitor = spawn_timeout_monitor(coordinator.clone(), cfg.monitor_interval());
    let gate = CadenceGate::new(cfg.align_to_cadence, cfg.cadence());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupt received; shutting down");
                break;
            }
            next = lines.next_line() => {
                let line = match next {
                    Ok(Some(l)) => l,
                    Ok(None) => {
                        tracing::info!("input closed; shutting down");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("stdin read failed: {e:#}");
                        break;
                    }
                };
                match decode_line(&line) {
                    Ok(Some((source, _))) if !gate.admits(Utc::now()) => {
                        tracing::debug!(source = %source, "off-cadence telegram dropped");
                    }
                    Ok(Some((source, readings))) => {
                        for r in readings {
                            let report = coordinator
                                .ingest_sample(source, r.temperature, r.humidity, r.pressure)
                                .await;
                            tracing::debug!(source = %source, ?report, "ingested");
                        }
                    }
                    Ok(None) => {}
                    Err(e) => tracing::warn!(line = %line, "skipping telegram: {e:#}"),
                }
            }
        }
    }

    monitor.shutdown().await;
    Ok(())
}
