// tests/hourly_flow.rs
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use hourly_aggregator::clock::{hour_floor, ManualClock};
use hourly_aggregator::store::MemoryStore;
use hourly_aggregator::{AggregateStatus, Coordinator, FlushOutcome, Policy, Source};

fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 11, 5, h, m, 0).unwrap()
}

struct Rig {
    coord: Coordinator,
    store: Arc<MemoryStore>,
    clock: Arc<ManualClock>,
}

fn rig(capacity: usize, policy: Policy, store: Arc<MemoryStore>) -> Rig {
    let clock = Arc::new(ManualClock::new(at(10, 0)));
    let coord = Coordinator::new(capacity, policy)
        .with_store(store.clone())
        .with_clock(clock.clone());
    Rig { coord, store, clock }
}

impl Rig {
    /// Feed one sample per listed minute of `hour`; temperature rises 0.2 °C per minute.
    async fn feed(&self, source: Source, hour: u32, minutes: &[u32]) -> Vec<FlushOutcome> {
        let mut flushes = Vec::new();
        for m in minutes {
            self.clock.set(at(hour, *m));
            let rep = self
                .coord
                .ingest_sample(source, 20.0 + 0.2 * *m as f64, 45.0, 1012.0)
                .await;
            assert!(rep.accepted);
            flushes.extend(rep.flushes);
        }
        flushes
    }
}

const FULL_HOUR: [u32; 12] = [0, 5, 10, 15, 20, 25, 30, 35, 40, 45, 50, 55];

#[tokio::test]
async fn full_window_persists_ok_without_monitor() {
    let r = rig(12, Policy::default(), Arc::new(MemoryStore::new()));
    let flushes = r.feed(Source::Wired, 10, &FULL_HOUR).await;
    assert_eq!(flushes, vec![FlushOutcome::Persisted(AggregateStatus::Ok)]);

    let docs = r.store.documents();
    assert_eq!(docs.len(), 1);
    let d = &docs[0];
    assert_eq!(d.status, AggregateStatus::Ok);
    assert_eq!(d.samples_count, 12);
    assert!(!d.interpolated);
    assert_eq!(d.temperature, Some(25.5));
    assert_eq!(d.humidity, Some(45.0));
    assert_eq!(d.pressure, Some(1012.0));
    assert_eq!(d.kind, "hourly_average");
    assert_eq!(hour_floor(d.start_time), at(10, 0));
    assert!(r.coord.window_snapshot(Source::Wired).await.is_empty());
}

#[tokio::test]
async fn second_flush_of_same_hour_is_a_noop() {
    let store = Arc::new(MemoryStore::new());
    let a = rig(12, Policy::default(), store.clone());
    let b = rig(12, Policy::default(), store.clone());

    let minutes = [0, 5, 10, 15, 20, 25, 30, 35, 40, 45];
    a.feed(Source::Wireless, 10, &minutes).await;
    b.feed(Source::Wireless, 10, &minutes).await;

    a.clock.set(at(10, 58));
    b.clock.set(at(10, 58));
    assert_eq!(
        a.coord.flush(Source::Wireless, false).await,
        FlushOutcome::Persisted(AggregateStatus::Ok)
    );
    assert_eq!(
        b.coord.flush(Source::Wireless, false).await,
        FlushOutcome::DuplicateSkipped
    );
    assert_eq!(store.count_for(Source::Wireless), 1);
    assert!(b.coord.window_snapshot(Source::Wireless).await.is_empty());
}

#[tokio::test]
async fn samples_after_an_early_flush_do_not_duplicate_the_hour() {
    let r = rig(12, Policy::default(), Arc::new(MemoryStore::new()));
    r.feed(Source::Wired, 10, &FULL_HOUR).await;
    // A straggler for the same hour lands in a fresh window.
    r.clock.set(at(10, 59));
    r.coord.ingest_sample(Source::Wired, 30.0, 45.0, 1012.0).await;
    assert_eq!(r.coord.window_snapshot(Source::Wired).await.len(), 1);

    // Rollover forces it out; 10:xx is already stored, so nothing is written.
    let flushes = r.feed(Source::Wired, 11, &[1]).await;
    assert_eq!(flushes, vec![FlushOutcome::DuplicateSkipped]);
    let stale = r.coord.flush_stale().await;
    assert!(stale.is_empty());
    assert_eq!(r.store.count_for(Source::Wired), 1);
}

#[tokio::test]
async fn one_missing_slot_is_filled_at_the_gap_midpoint() {
    let r = rig(12, Policy::default(), Arc::new(MemoryStore::new()));
    r.feed(Source::Wired, 10, &[0, 5, 10, 15, 25, 30, 35, 40, 45, 50, 55]).await;

    let mut window = r.coord.window_snapshot(Source::Wired).await;
    assert_eq!(window.len(), 11);
    let res = Policy::default()
        .finalize(&mut window, false, &[], at(10, 58))
        .unwrap();
    assert_eq!(res.samples_count, 12);
    assert!(res.interpolated);
    let filled = window.samples().iter().find(|s| s.interpolated).unwrap();
    assert_eq!(filled.timestamp, at(10, 20));
    // Midpoint of the samples at :15 (23.0) and :25 (25.0).
    assert!((filled.temperature - 24.0).abs() < 1e-6);

    // Same window flushed through the coordinator.
    r.clock.set(at(10, 58));
    assert_eq!(
        r.coord.flush(Source::Wired, false).await,
        FlushOutcome::Persisted(AggregateStatus::Ok)
    );
    let d = &r.store.documents()[0];
    assert_eq!(d.samples_count, 12);
    assert!(d.interpolated);
    assert_eq!(d.temperature, Some(25.5));
}

#[tokio::test]
async fn thin_window_waits_then_fails_when_forced() {
    let r = rig(12, Policy::default(), Arc::new(MemoryStore::new()));
    r.feed(Source::Wireless, 10, &[0, 5, 10, 15, 20]).await;

    r.clock.set(at(10, 40));
    assert_eq!(r.coord.flush(Source::Wireless, false).await, FlushOutcome::Waiting);
    assert_eq!(r.coord.window_snapshot(Source::Wireless).await.len(), 5);
    assert!(r.store.documents().is_empty());

    r.clock.set(at(11, 0));
    assert_eq!(
        r.coord.flush(Source::Wireless, true).await,
        FlushOutcome::Persisted(AggregateStatus::Failure)
    );
    let d = &r.store.documents()[0];
    assert_eq!(d.status, AggregateStatus::Failure);
    assert_eq!(d.samples_count, 5);
    assert_eq!(d.temperature, None);
    assert_eq!(d.humidity, None);
    assert_eq!(d.pressure, None);
    assert!(!d.interpolated);
    assert!(d.reason.as_deref().unwrap_or_default().contains("insufficient data"));
}

#[tokio::test]
async fn hour_rollover_flushes_prior_window_before_buffering() {
    let r = rig(12, Policy::default(), Arc::new(MemoryStore::new()));
    r.feed(Source::Wired, 10, &[0, 5, 10, 15, 20, 25, 30, 35, 40, 45]).await;
    assert!(r.store.documents().is_empty());

    r.clock.set(at(11, 2));
    let rep = r.coord.ingest_sample(Source::Wired, 19.0, 44.0, 1011.0).await;
    assert!(rep.accepted);
    assert_eq!(rep.sample_count, 1);
    assert_eq!(rep.flushes, vec![FlushOutcome::Persisted(AggregateStatus::Ok)]);

    let docs = r.store.documents();
    assert_eq!(docs.len(), 1);
    assert_eq!(hour_floor(docs[0].start_time), at(10, 0));
    assert_eq!(docs[0].samples_count, 12);
    assert!(docs[0].interpolated);

    let w = r.coord.window_snapshot(Source::Wired).await;
    assert_eq!(w.len(), 1);
    assert_eq!(w.bucket_hour(), Some(at(11, 0)));
    assert_eq!(w.samples()[0].temperature, 19.0);
}

#[tokio::test]
async fn rollover_with_five_of_twelve_records_failure() {
    let r = rig(12, Policy::default(), Arc::new(MemoryStore::new()));
    r.feed(Source::Wireless, 10, &[0, 5, 10, 15, 20]).await;

    r.clock.set(at(11, 0));
    let rep = r.coord.ingest_sample(Source::Wireless, 20.0, 45.0, 1012.0).await;
    assert_eq!(rep.flushes, vec![FlushOutcome::Persisted(AggregateStatus::Failure)]);

    let d = &r.store.documents()[0];
    assert_eq!(d.samples_count, 5);
    assert!(d.temperature.is_none() && d.humidity.is_none() && d.pressure.is_none());
    assert_eq!(r.coord.window_snapshot(Source::Wireless).await.len(), 1);
}

#[tokio::test]
async fn storage_outage_during_rollover_does_not_stall_the_source() {
    let r = rig(12, Policy::default(), Arc::new(MemoryStore::new()));
    r.feed(Source::Wired, 10, &FULL_HOUR[..10]).await;
    r.store.set_unavailable(true);

    r.clock.set(at(11, 0));
    let rep = r.coord.ingest_sample(Source::Wired, 20.0, 45.0, 1012.0).await;
    assert_eq!(rep.flushes, vec![FlushOutcome::StoreFailed(AggregateStatus::Ok)]);
    assert!(rep.accepted);

    r.store.set_unavailable(false);
    let flushes = r.feed(Source::Wired, 11, &FULL_HOUR[1..]).await;
    assert_eq!(flushes, vec![FlushOutcome::Persisted(AggregateStatus::Ok)]);
    assert_eq!(r.store.count_for(Source::Wired), 1);
}
