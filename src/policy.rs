//! # Completeness & Averaging Policy
//! Decides whether a window can be reported, tops it up through the gap
//! interpolator when it is salvageable, and computes the hourly aggregate.
//!
//! Policy: below `ceil(capacity * ratio)` samples the window keeps waiting,
//! or yields a FAILURE aggregate when forced. At or above the threshold the
//! missing slots are interpolated and the mean of all samples is reported.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::interpolate::{fill_gaps, Bounds};
use crate::sample::Sample;
use crate::window::Window;

pub const DEFAULT_COMPLETENESS_RATIO: f64 = 0.70;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregateStatus {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "FAILURE")]
    Failure,
}

/// Hourly summary of one window. Metrics are `None` on FAILURE.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateResult {
    pub status: AggregateStatus,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub pressure: Option<f64>,
    pub samples_count: usize,
    pub interpolated: bool,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub reason: Option<String>,
}

impl AggregateResult {
    pub fn is_ok(&self) -> bool {
        self.status == AggregateStatus::Ok
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Policy {
    pub completeness_ratio: f64,
    pub cadence: Duration,
    pub bounds: Bounds,
    /// How far back history is read for regression.
    pub history_lookback: Duration,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            completeness_ratio: DEFAULT_COMPLETENESS_RATIO,
            cadence: Duration::minutes(5),
            bounds: Bounds::default(),
            history_lookback: Duration::hours(24),
        }
    }
}

impl Policy {
    /// `ceil(capacity * ratio)`, tolerant of float noise (10 * 0.7 is 7, not 8).
    pub fn min_required(&self, capacity: usize) -> usize {
        let raw = capacity as f64 * self.completeness_ratio;
        (raw - 1e-9).ceil().max(0.0) as usize
    }

    /// True when `finalize` will run the regression fill on `window`, so the
    /// caller should load history for it first.
    pub fn needs_history(&self, window: &Window) -> bool {
        let len = window.len();
        len >= self.min_required(window.capacity()) && window.capacity().saturating_sub(len) > 1
    }

    /// Produce the aggregate for `window`, or `None` when there is nothing to
    /// report yet. The window is topped up in place but never cleared here.
    ///
    /// `history` holds the source's samples from before the window's hour; it
    /// is only consulted when two or more slots are missing.
    pub fn finalize(
        &self,
        window: &mut Window,
        force: bool,
        history: &[Sample],
        now: DateTime<Utc>,
    ) -> Option<AggregateResult> {
        if window.is_empty() {
            return None;
        }

        let source = window.source();
        let capacity = window.capacity();
        let min_required = self.min_required(capacity);
        let window_start = window
            .bucket_start()
            .or_else(|| window.samples().first().map(|s| s.timestamp))
            .unwrap_or(now);

        if window.len() < min_required {
            if !force {
                tracing::debug!(
                    source = %source,
                    samples = window.len(),
                    min_required,
                    "window below completeness threshold; waiting"
                );
                return None;
            }
            tracing::warn!(
                source = %source,
                samples = window.len(),
                min_required,
                capacity,
                "insufficient data for the hour"
            );
            return Some(AggregateResult {
                status: AggregateStatus::Failure,
                temperature: None,
                humidity: None,
                pressure: None,
                samples_count: window.len(),
                interpolated: false,
                window_start,
                window_end: now,
                reason: Some(format!(
                    "insufficient data: {} of {} samples, {} required",
                    window.len(),
                    capacity,
                    min_required
                )),
            });
        }

        if window.len() < capacity {
            let added = fill_gaps(window, history, self.cadence, &self.bounds);
            if added > 0 {
                metrics::counter!("aggregator_interpolated_samples_total", "source" => source.as_str())
                    .increment(added as u64);
            }
            if window.len() < capacity {
                tracing::warn!(
                    source = %source,
                    samples = window.len(),
                    capacity,
                    "gap fill left the window short; averaging what is there"
                );
            }
        }

        let n = window.len() as f64;
        let (mut t, mut h, mut p) = (0.0, 0.0, 0.0);
        for s in window.samples() {
            t += s.temperature;
            h += s.humidity;
            p += s.pressure;
        }
        let interpolated = window.samples().iter().any(|s| s.interpolated);

        let result = AggregateResult {
            status: AggregateStatus::Ok,
            temperature: Some(round2(t / n)),
            humidity: Some(round2(h / n)),
            pressure: Some(round2(p / n)),
            samples_count: window.len(),
            interpolated,
            window_start,
            window_end: now,
            reason: None,
        };
        tracing::info!(
            source = %source,
            temperature = ?result.temperature,
            humidity = ?result.humidity,
            pressure = ?result.pressure,
            samples = result.samples_count,
            interpolated,
            "hourly average computed"
        );
        Some(result)
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::{Reading, Source};
    use chrono::TimeZone;

    fn at(m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 2, 15, m, 0).unwrap()
    }

    fn filled(minutes: &[u32]) -> Window {
        let mut w = Window::new(Source::Wireless, 12);
        for m in minutes {
            w.ingest(Reading::new(20.0 + *m as f64 / 5.0, 50.0, 1013.0), at(*m));
        }
        w
    }

    #[test]
    fn min_required_is_ceiling_of_seventy_percent() {
        let p = Policy::default();
        assert_eq!(p.min_required(12), 9);
        assert_eq!(p.min_required(10), 7);
        assert_eq!(p.min_required(6), 5);
    }

    #[test]
    fn empty_window_reports_nothing() {
        let mut w = Window::new(Source::Wired, 12);
        assert!(Policy::default().finalize(&mut w, true, &[], at(59)).is_none());
    }

    #[test]
    fn thin_window_waits_unless_forced() {
        let p = Policy::default();
        let mut w = filled(&[0, 5, 10, 15, 20]);
        assert!(p.finalize(&mut w, false, &[], at(30)).is_none());

        let res = p.finalize(&mut w, true, &[], at(59)).unwrap();
        assert_eq!(res.status, AggregateStatus::Failure);
        assert_eq!(res.samples_count, 5);
        assert!(res.temperature.is_none() && res.humidity.is_none() && res.pressure.is_none());
        assert!(!res.interpolated);
        assert!(res.reason.unwrap().contains("insufficient data"));
    }

    #[test]
    fn full_window_averages_and_rounds() {
        let mut w = Window::new(Source::Wired, 3);
        w.ingest(Reading::new(20.001, 40.0, 1000.0), at(0));
        w.ingest(Reading::new(20.002, 41.0, 1000.5), at(5));
        w.ingest(Reading::new(20.003, 42.0, 1001.0), at(10));
        let res = Policy::default().finalize(&mut w, false, &[], at(11)).unwrap();
        assert!(res.is_ok());
        assert_eq!(res.temperature, Some(20.0));
        assert_eq!(res.humidity, Some(41.0));
        assert_eq!(res.pressure, Some(1000.5));
        assert!(!res.interpolated);
        assert_eq!(res.window_start, at(0));
        assert_eq!(res.window_end, at(11));
    }

    #[test]
    fn one_missing_slot_is_interpolated() {
        let p = Policy::default();
        let mut w = filled(&[0, 5, 10, 15, 25, 30, 35, 40, 45, 50, 55]);
        let res = p.finalize(&mut w, false, &[], at(56)).unwrap();
        assert!(res.is_ok());
        assert_eq!(res.samples_count, 12);
        assert!(res.interpolated);
        let fill = w.samples().iter().find(|s| s.interpolated).unwrap();
        assert_eq!(fill.timestamp, at(20));
        assert!((fill.temperature - 24.0).abs() < 1e-9);
    }

    #[test]
    fn history_is_wanted_only_for_multi_slot_fills() {
        let p = Policy::default();
        assert!(!p.needs_history(&filled(&[0, 5, 10, 15, 20])));
        assert!(!p.needs_history(&filled(&[0, 5, 10, 15, 25, 30, 35, 40, 45, 50, 55])));
        assert!(p.needs_history(&filled(&[0, 5, 15, 20, 30, 40, 45, 50, 55])));
    }

    #[test]
    fn salvageable_window_with_several_gaps_is_completed() {
        let p = Policy::default();
        let mut w = filled(&[0, 5, 15, 20, 30, 40, 45, 50, 55]);
        let res = p.finalize(&mut w, true, &[], at(59)).unwrap();
        assert!(res.is_ok());
        assert_eq!(res.samples_count, 12);
        assert!(res.interpolated);
        // Linear data: mean of the full hour is the value at minute 27.5.
        assert_eq!(res.temperature, Some(25.5));
    }
}
