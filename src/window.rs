//! # Window Buffer
//! Per-source collection of samples for the current calendar hour.
//!
//! The wall-clock hour, not the sample count alone, is the authoritative
//! flush trigger: a sample arriving after the bucket's hour has passed is
//! refused with `forced_prior_hour` so the caller can settle the old hour
//! first and then retry against the freshly reset window.
//!
//! The buffer itself is not synchronized; the coordinator owns one per source
//! behind its own lock.

use chrono::{DateTime, Utc};

use crate::clock::hour_floor;
use crate::sample::{Reading, Sample, Source};

/// What happened to a single `ingest` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestOutcome {
    pub sample_count: usize,
    /// Capacity reached; the window is ready to be finalized.
    pub needs_processing: bool,
    /// The wall-clock hour moved on; the sample was NOT inserted.
    pub forced_prior_hour: bool,
    pub accepted: bool,
}

#[derive(Debug, Clone)]
pub struct Window {
    source: Source,
    capacity: usize,
    /// Sorted by timestamp.
    samples: Vec<Sample>,
    bucket_start: Option<DateTime<Utc>>,
    /// Floor of the hour this window collects for.
    bucket_hour: Option<DateTime<Utc>>,
}

impl Window {
    pub fn new(source: Source, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            source,
            capacity,
            samples: Vec::with_capacity(capacity),
            bucket_start: None,
            bucket_hour: None,
        }
    }

    pub fn source(&self) -> Source {
        self.source
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() >= self.capacity
    }

    pub fn bucket_start(&self) -> Option<DateTime<Utc>> {
        self.bucket_start
    }

    pub fn bucket_hour(&self) -> Option<DateTime<Utc>> {
        self.bucket_hour
    }

    /// Add a measured reading taken at `now`.
    pub fn ingest(&mut self, reading: Reading, now: DateTime<Utc>) -> IngestOutcome {
        let now_hour = hour_floor(now);

        match self.bucket_hour {
            None => self.start_bucket(now),
            Some(hour) if hour != now_hour => {
                if !self.samples.is_empty() {
                    tracing::info!(
                        source = %self.source,
                        from = %hour,
                        to = %now_hour,
                        samples = self.samples.len(),
                        "hour rolled over with pending samples"
                    );
                    return IngestOutcome {
                        sample_count: self.samples.len(),
                        needs_processing: true,
                        forced_prior_hour: true,
                        accepted: false,
                    };
                }
                // Nothing pending for the old hour; move the bucket along.
                self.start_bucket(now);
            }
            Some(_) => {}
        }

        if self.is_full() {
            return IngestOutcome {
                sample_count: self.samples.len(),
                needs_processing: true,
                forced_prior_hour: false,
                accepted: false,
            };
        }

        self.insert_sorted(Sample::measured(reading, now));
        tracing::debug!(
            source = %self.source,
            samples = self.samples.len(),
            capacity = self.capacity,
            "sample buffered"
        );

        IngestOutcome {
            sample_count: self.samples.len(),
            needs_processing: self.is_full(),
            forced_prior_hour: false,
            accepted: true,
        }
    }

    /// True once the wall clock has left the bucket's hour.
    pub fn has_elapsed_past_its_hour(&self, now: DateTime<Utc>) -> bool {
        self.bucket_hour
            .is_some_and(|hour| hour != hour_floor(now))
    }

    /// Non-empty and past its hour: the timeout monitor's flush condition.
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        !self.samples.is_empty() && self.has_elapsed_past_its_hour(now)
    }

    /// Insert a gap fill. Refused once the window is at capacity.
    pub fn insert_synthetic(&mut self, sample: Sample) -> bool {
        if self.is_full() {
            return false;
        }
        self.insert_sorted(sample);
        true
    }

    /// Clear all samples and re-initialize to the hour containing `now`.
    pub fn reset(&mut self, now: DateTime<Utc>) {
        self.samples.clear();
        self.start_bucket(now);
        tracing::debug!(source = %self.source, hour = ?self.bucket_hour, "window reset");
    }

    fn start_bucket(&mut self, now: DateTime<Utc>) {
        self.bucket_start = Some(now);
        self.bucket_hour = Some(hour_floor(now));
    }

    fn insert_sorted(&mut self, sample: Sample) {
        let idx = self
            .samples
            .partition_point(|s| s.timestamp <= sample.timestamp);
        self.samples.insert(idx, sample);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, h, m, 0).unwrap()
    }

    fn r(t: f64) -> Reading {
        Reading::new(t, 50.0, 1000.0)
    }

    #[test]
    fn first_sample_opens_bucket() {
        let mut w = Window::new(Source::Wired, 12);
        let out = w.ingest(r(20.0), at(10, 7));
        assert!(out.accepted);
        assert_eq!(out.sample_count, 1);
        assert_eq!(w.bucket_hour(), Some(at(10, 0)));
        assert_eq!(w.bucket_start(), Some(at(10, 7)));
    }

    #[test]
    fn capacity_sets_needs_processing() {
        let mut w = Window::new(Source::Wired, 3);
        assert!(!w.ingest(r(1.0), at(10, 0)).needs_processing);
        assert!(!w.ingest(r(2.0), at(10, 5)).needs_processing);
        let out = w.ingest(r(3.0), at(10, 10));
        assert!(out.needs_processing);
        assert_eq!(out.sample_count, 3);

        // Overflow is refused, never stored.
        let over = w.ingest(r(4.0), at(10, 15));
        assert!(!over.accepted);
        assert_eq!(w.len(), 3);
    }

    #[test]
    fn hour_change_refuses_sample_and_reports_forced() {
        let mut w = Window::new(Source::Wireless, 12);
        w.ingest(r(1.0), at(10, 50));
        let out = w.ingest(r(2.0), at(11, 0));
        assert!(out.forced_prior_hour);
        assert!(!out.accepted);
        assert_eq!(w.len(), 1);
        assert_eq!(w.bucket_hour(), Some(at(10, 0)));
    }

    #[test]
    fn empty_window_follows_the_clock_without_forcing() {
        let mut w = Window::new(Source::Wired, 12);
        w.reset(at(9, 30));
        let out = w.ingest(r(1.0), at(11, 5));
        assert!(out.accepted);
        assert!(!out.forced_prior_hour);
        assert_eq!(w.bucket_hour(), Some(at(11, 0)));
    }

    #[test]
    fn same_hour_next_day_is_still_stale() {
        let mut w = Window::new(Source::Wired, 12);
        w.ingest(r(1.0), at(10, 0));
        assert!(!w.is_stale(at(10, 59)));
        assert!(w.is_stale(at(10, 0) + Duration::hours(24)));
    }

    #[test]
    fn synthetic_inserts_keep_order_and_capacity() {
        let mut w = Window::new(Source::Wired, 3);
        w.ingest(r(1.0), at(10, 0));
        w.ingest(r(3.0), at(10, 10));
        assert!(w.insert_synthetic(Sample::synthetic(r(2.0), at(10, 5))));
        let ts: Vec<_> = w.samples().iter().map(|s| s.timestamp).collect();
        assert_eq!(ts, vec![at(10, 0), at(10, 5), at(10, 10)]);
        assert!(!w.insert_synthetic(Sample::synthetic(r(9.0), at(10, 15))));
    }

    #[test]
    fn reset_clears_and_rebuckets() {
        let mut w = Window::new(Source::Wired, 12);
        w.ingest(r(1.0), at(10, 0));
        w.reset(at(11, 2));
        assert!(w.is_empty());
        assert_eq!(w.bucket_hour(), Some(at(11, 0)));
        assert!(!w.has_elapsed_past_its_hour(at(11, 30)));
    }
}
