//! # Gap Interpolator
//! Fills missing cadence slots of a window with synthetic samples.
//!
//! Every fill is a first-order least-squares line evaluated at the missing
//! instant. With a single missing slot the fit runs over just the two samples
//! bounding the widest gap and is evaluated at their time midpoint, which is
//! the pairwise average. With more slots missing the fit runs over history plus
//! the current window, per metric, and the values are clamped to plausible
//! physical bounds. No fit state is kept between calls.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::sample::{Reading, Sample};
use crate::window::Window;

/// Inclusive `[min, max]` range for one metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Range {
    pub min: f64,
    pub max: f64,
}

impl Range {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn clamp(&self, v: f64) -> f64 {
        v.max(self.min).min(self.max)
    }

    /// Swap reversed limits back into order.
    pub fn sanitized(self) -> Self {
        if self.min > self.max {
            Self::new(self.max, self.min)
        } else {
            self
        }
    }
}

/// Physically plausible bounds for regression output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    #[serde(default = "default_temperature")]
    pub temperature: Range,
    #[serde(default = "default_humidity")]
    pub humidity: Range,
    #[serde(default = "default_pressure")]
    pub pressure: Range,
}

fn default_temperature() -> Range {
    Range::new(0.0, 50.0)
}
fn default_humidity() -> Range {
    Range::new(0.0, 100.0)
}
fn default_pressure() -> Range {
    Range::new(900.0, 1100.0)
}

impl Default for Bounds {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            humidity: default_humidity(),
            pressure: default_pressure(),
        }
    }
}

impl Bounds {
    pub fn clamp(&self, r: Reading) -> Reading {
        Reading::new(
            self.temperature.clamp(r.temperature),
            self.humidity.clamp(r.humidity),
            self.pressure.clamp(r.pressure),
        )
    }
}

/// Ordinary least squares line `y = slope * x + intercept`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
}

impl LinearFit {
    /// Needs at least two points. Identical x values give a flat line at the mean.
    pub fn fit(points: &[(f64, f64)]) -> Option<Self> {
        if points.len() < 2 {
            return None;
        }
        let n = points.len() as f64;
        let x_mean = points.iter().map(|(x, _)| x).sum::<f64>() / n;
        let y_mean = points.iter().map(|(_, y)| y).sum::<f64>() / n;

        let (mut sxy, mut sxx) = (0.0, 0.0);
        for (x, y) in points {
            let dx = x - x_mean;
            sxy += dx * (y - y_mean);
            sxx += dx * dx;
        }

        let slope = if sxx > f64::EPSILON { sxy / sxx } else { 0.0 };
        Some(Self {
            slope,
            intercept: y_mean - slope * x_mean,
        })
    }

    pub fn at(&self, x: f64) -> f64 {
        self.slope * x + self.intercept
    }
}

/// Independent fits for the three metrics over a shared time axis.
#[derive(Debug, Clone, Copy)]
struct ReadingFit {
    origin: DateTime<Utc>,
    temperature: LinearFit,
    humidity: LinearFit,
    pressure: LinearFit,
}

impl ReadingFit {
    fn over<'a>(samples: impl IntoIterator<Item = &'a Sample> + Clone) -> Option<Self> {
        let origin = samples.clone().into_iter().map(|s| s.timestamp).min()?;
        let axis = |pick: fn(&Sample) -> f64| -> Vec<(f64, f64)> {
            samples
                .clone()
                .into_iter()
                .map(|s| (elapsed_secs(origin, s.timestamp), pick(s)))
                .collect()
        };
        Some(Self {
            origin,
            temperature: LinearFit::fit(&axis(|s| s.temperature))?,
            humidity: LinearFit::fit(&axis(|s| s.humidity))?,
            pressure: LinearFit::fit(&axis(|s| s.pressure))?,
        })
    }

    fn at(&self, ts: DateTime<Utc>) -> Reading {
        let x = elapsed_secs(self.origin, ts);
        Reading::new(
            self.temperature.at(x),
            self.humidity.at(x),
            self.pressure.at(x),
        )
    }
}

fn elapsed_secs(origin: DateTime<Utc>, ts: DateTime<Utc>) -> f64 {
    (ts - origin).num_milliseconds() as f64 / 1000.0
}

/// Top up `window` towards its capacity. Returns the number of samples added.
///
/// `history` should hold samples from before the window's hour; fewer than
/// two usable points in total leaves the window untouched.
pub fn fill_gaps(window: &mut Window, history: &[Sample], cadence: Duration, bounds: &Bounds) -> usize {
    let missing = window.capacity().saturating_sub(window.len());
    match missing {
        0 => 0,
        1 => fill_single_gap(window),
        _ => fill_by_regression(window, history, cadence, bounds),
    }
}

/// Two-point fit across the widest gap, evaluated at the gap's midpoint.
fn fill_single_gap(window: &mut Window) -> usize {
    let widest = window
        .samples()
        .windows(2)
        .rev()
        .map(|pair| (pair[0], pair[1]))
        .max_by_key(|(a, b)| b.timestamp - a.timestamp);

    let Some((before, after)) = widest else {
        tracing::warn!(source = %window.source(), "single-gap fill needs two samples");
        return 0;
    };

    let Some(fit) = ReadingFit::over([&before, &after]) else {
        return 0;
    };
    let mid = before.timestamp + (after.timestamp - before.timestamp) / 2;
    let sample = Sample::synthetic(fit.at(mid), mid);

    tracing::info!(
        source = %window.source(),
        at = %mid,
        temperature = sample.temperature,
        humidity = sample.humidity,
        pressure = sample.pressure,
        "filled single gap"
    );
    usize::from(window.insert_synthetic(sample))
}

fn fill_by_regression(window: &mut Window, history: &[Sample], cadence: Duration, bounds: &Bounds) -> usize {
    let Some(hour) = window.bucket_hour() else {
        return 0;
    };
    let cadence_secs = cadence.num_seconds();
    if cadence_secs <= 0 {
        return 0;
    }

    let current: Vec<Sample> = window.samples().to_vec();
    let combined = history.iter().chain(current.iter());
    if combined.clone().count() < 2 {
        tracing::warn!(
            source = %window.source(),
            history = history.len(),
            samples = current.len(),
            "not enough points for regression; window left as is"
        );
        return 0;
    }
    let Some(fit) = ReadingFit::over(combined) else {
        return 0;
    };

    let occupied: HashSet<i64> = current
        .iter()
        .map(|s| (s.timestamp - hour).num_seconds().div_euclid(cadence_secs))
        .collect();
    let hour_end = hour + Duration::hours(1);

    let mut added = 0;
    for slot in 0..window.capacity() as i64 {
        if window.is_full() {
            break;
        }
        if occupied.contains(&slot) {
            continue;
        }
        let ts = hour + Duration::seconds(slot * cadence_secs);
        if ts >= hour_end {
            break;
        }
        let reading = bounds.clamp(fit.at(ts));
        if window.insert_synthetic(Sample::synthetic(reading, ts)) {
            added += 1;
        }
    }

    tracing::info!(
        source = %window.source(),
        added,
        history = history.len(),
        samples = window.len(),
        "filled gaps by regression"
    );
    added
}
