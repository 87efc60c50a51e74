//! # Samples
//! Value types shared by every stage of the engine: the two data sources and
//! a single environmental reading.

use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The two independent producers feeding the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Wired,
    Wireless,
}

impl Source {
    pub const ALL: [Source; 2] = [Source::Wired, Source::Wireless];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Wired => "wired",
            Source::Wireless => "wireless",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wired" => Ok(Source::Wired),
            "wireless" => Ok(Source::Wireless),
            other => Err(anyhow!("unknown source: {other}")),
        }
    }
}

/// Metric triple as decoded from a telegram (°C, %, hPa).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub temperature: f64,
    pub humidity: f64,
    pub pressure: f64,
}

impl Reading {
    pub fn new(temperature: f64, humidity: f64, pressure: f64) -> Self {
        Self {
            temperature,
            humidity,
            pressure,
        }
    }
}

/// One timestamped reading. `interpolated` marks synthetic gap fills.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub temperature: f64,
    pub humidity: f64,
    pub pressure: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub interpolated: bool,
}

impl Sample {
    pub fn measured(reading: Reading, timestamp: DateTime<Utc>) -> Self {
        Self {
            temperature: reading.temperature,
            humidity: reading.humidity,
            pressure: reading.pressure,
            timestamp,
            interpolated: false,
        }
    }

    pub fn synthetic(reading: Reading, timestamp: DateTime<Utc>) -> Self {
        Self {
            interpolated: true,
            ..Self::measured(reading, timestamp)
        }
    }

    pub fn reading(&self) -> Reading {
        Reading::new(self.temperature, self.humidity, self.pressure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_parses_case_insensitively() {
        assert_eq!("WIRED".parse::<Source>().unwrap(), Source::Wired);
        assert_eq!(" wireless ".parse::<Source>().unwrap(), Source::Wireless);
        assert!("bluetooth".parse::<Source>().is_err());
    }

    #[test]
    fn synthetic_sample_is_flagged() {
        let ts = Utc::now();
        let s = Sample::synthetic(Reading::new(20.0, 50.0, 1000.0), ts);
        assert!(s.interpolated);
        assert!(!Sample::measured(s.reading(), ts).interpolated);
    }
}
