//! # Telegram decoding
//! Turns raw transport payloads into readings for the coordinator.
//!
//! - Wired (serial) lines: `Registro N - Temp: X °C, Hum: Y %, Pres: Z kPa`,
//!   framed by `Buffer lleno` / `---FIN_BUFFER---` marker lines.
//! - Wireless (radio notifications): consecutive 12-byte records of three
//!   little-endian `f32` (temperature, humidity, pressure).
//!
//! Both transports report pressure in kPa; readings leave here in hPa.

use chrono::{DateTime, Timelike, Utc};
use once_cell::sync::OnceCell;
use regex::Regex;

use crate::sample::Reading;

const KPA_TO_HPA: f64 = 10.0;
const WIRELESS_RECORD_LEN: usize = 12;

#[derive(Debug, thiserror::Error)]
pub enum TelegramError {
    #[error("payload holds no complete record ({0} bytes)")]
    Short(usize),
    #[error("non-finite value in record {0}")]
    NonFinite(usize),
    #[error("invalid hex payload: {0}")]
    Hex(#[from] hex::FromHexError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum WiredLine {
    Record { index: u32, reading: Reading },
    BufferStart,
    BufferEnd,
    Other,
}

pub fn parse_wired_line(line: &str) -> WiredLine {
    static RE: OnceCell<Regex> = OnceCell::new();
    let re = RE.get_or_init(|| {
        Regex::new(
            r"Registro\s+(\d+)\s+-\s+Temp:\s+(-?[\d.]+)\s*°C,\s+Hum:\s+(-?[\d.]+)\s*%,\s+Pres:\s+(-?[\d.]+)\s*kPa",
        )
        .expect("static wired telegram regex")
    });

    let line = line.trim();
    if line.contains("Buffer lleno") {
        return WiredLine::BufferStart;
    }
    if line.contains("---FIN_BUFFER---") {
        return WiredLine::BufferEnd;
    }

    let Some(caps) = re.captures(line) else {
        return WiredLine::Other;
    };
    let parsed = (|| {
        let index = caps.get(1)?.as_str().parse().ok()?;
        let t: f64 = caps.get(2)?.as_str().parse().ok()?;
        let h: f64 = caps.get(3)?.as_str().parse().ok()?;
        let p: f64 = caps.get(4)?.as_str().parse().ok()?;
        Some(WiredLine::Record {
            index,
            reading: Reading::new(t, h, p * KPA_TO_HPA),
        })
    })();
    parsed.unwrap_or(WiredLine::Other)
}

/// Decode a wireless notification payload. Trailing bytes that do not form a
/// whole record are ignored.
pub fn decode_wireless(payload: &[u8]) -> Result<Vec<Reading>, TelegramError> {
    if payload.len() < WIRELESS_RECORD_LEN {
        return Err(TelegramError::Short(payload.len()));
    }
    let chunks = payload.chunks_exact(WIRELESS_RECORD_LEN);
    if !chunks.remainder().is_empty() {
        tracing::debug!(trailing = chunks.remainder().len(), "ignoring partial wireless record");
    }

    chunks
        .enumerate()
        .map(|(i, rec)| {
            let field = |at: usize| f32::from_le_bytes([rec[at], rec[at + 1], rec[at + 2], rec[at + 3]]);
            let (t, h, p) = (field(0), field(4), field(8));
            if !(t.is_finite() && h.is_finite() && p.is_finite()) {
                return Err(TelegramError::NonFinite(i));
            }
            Ok(Reading::new(
                round2(t as f64),
                round2(h as f64),
                round2(p as f64 * KPA_TO_HPA),
            ))
        })
        .collect()
}

pub fn decode_wireless_hex(payload: &str) -> Result<Vec<Reading>, TelegramError> {
    let bytes = hex::decode(payload.trim())?;
    decode_wireless(&bytes)
}

/// True when `now` sits on a wall-clock minute that is a multiple of the cadence.
pub fn is_cadence_aligned(now: DateTime<Utc>, cadence: chrono::Duration) -> bool {
    let step = cadence.num_minutes();
    if step <= 0 {
        return true;
    }
    i64::from(now.minute()) % step == 0
}

/// Admission check applied by transport readers before handing readings to
/// the coordinator. Disabled gates admit everything.
#[derive(Debug, Clone, Copy)]
pub struct CadenceGate {
    enabled: bool,
    cadence: chrono::Duration,
}

impl CadenceGate {
    pub fn new(enabled: bool, cadence: chrono::Duration) -> Self {
        Self { enabled, cadence }
    }

    pub fn admits(&self, now: DateTime<Utc>) -> bool {
        !self.enabled || is_cadence_aligned(now, self.cadence)
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
