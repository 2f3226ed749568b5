//! Preload Planning Integration Tests
//!
//! Turns coverage gaps into preload requests and drains them in schedule order.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::{BinaryHeap, HashSet};
use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};

use data_service::{
    CoverageKey, CoverageRegistry, DataKind, PreloadPriority, PreloadRequest, QueuedPreload,
    TimeRange, Timeframe,
};

fn range(start_ms: i64, end_ms: i64) -> TimeRange {
    TimeRange::from_millis(start_ms, end_ms).unwrap()
}

/// Queue one request per missing sub-range, skipping duplicates.
fn plan(
    coverage: &CoverageRegistry,
    key: &CoverageKey,
    wanted: &TimeRange,
    priority: PreloadPriority,
    queue: &mut BinaryHeap<QueuedPreload>,
    seen: &mut HashSet<String>,
) -> usize {
    let mut queued = 0;
    for gap in coverage.find_gaps(key, wanted) {
        let request = PreloadRequest::new(key.kind, &key.symbol, key.timeframe, gap, priority);
        if seen.insert(request.dedupe_key()) {
            queue.push(QueuedPreload::new(request, seen.len() as u64));
            queued += 1;
        }
    }
    queued
}

#[test]
fn gaps_become_requests_in_priority_order() {
    let coverage = CoverageRegistry::new();
    let candles = CoverageKey::new("btcusdt", DataKind::Candles, Some(Timeframe::M1));
    let trades = CoverageKey::new("ETHUSDT", DataKind::AggTrades, None);

    coverage.add(&candles, range(200, 400));
    coverage.add(&candles, range(600, 800));

    let mut queue = BinaryHeap::new();
    let mut seen = HashSet::new();

    let background = plan(
        &coverage,
        &candles,
        &range(0, 1000),
        PreloadPriority::Low,
        &mut queue,
        &mut seen,
    );
    assert_eq!(background, 3);

    let foreground = plan(
        &coverage,
        &trades,
        &range(0, 500),
        PreloadPriority::Urgent,
        &mut queue,
        &mut seen,
    );
    assert_eq!(foreground, 1);

    let first = queue.pop().unwrap().into_request();
    assert_eq!(first.kind(), DataKind::AggTrades);
    assert!(first.is_foreground());
    assert_eq!(first.range(), range(0, 500));

    let rest: Vec<TimeRange> = std::iter::from_fn(|| queue.pop())
        .map(|q| q.into_request().range())
        .collect();
    assert_eq!(rest, vec![range(0, 200), range(400, 600), range(800, 1000)]);
}

#[test]
fn replanning_the_same_window_is_deduplicated() {
    let coverage = CoverageRegistry::new();
    let key = CoverageKey::new("SOLUSDT", DataKind::Candles, Some(Timeframe::H1));
    let mut queue = BinaryHeap::new();
    let mut seen = HashSet::new();

    let wanted = range(0, 3_600_000);
    assert_eq!(
        plan(&coverage, &key, &wanted, PreloadPriority::Normal, &mut queue, &mut seen),
        1
    );
    assert_eq!(
        plan(&coverage, &key, &wanted, PreloadPriority::High, &mut queue, &mut seen),
        0
    );
    assert_eq!(queue.len(), 1);
}

#[test]
fn completed_preloads_close_the_gap() {
    let coverage = CoverageRegistry::new();
    let key = CoverageKey::new("BTCUSDT", DataKind::OpenInterest, None);
    let mut queue = BinaryHeap::new();
    let mut seen = HashSet::new();

    let wanted = range(0, 10_000);
    coverage.add(&key, range(2_000, 3_000));
    plan(&coverage, &key, &wanted, PreloadPriority::Normal, &mut queue, &mut seen);

    while let Some(job) = queue.pop() {
        coverage.add(&key, job.request().range());
    }

    assert!(coverage.contains(&key, &wanted));
    assert!(coverage.find_gaps(&key, &wanted).is_empty());
    assert_eq!(coverage.ranges(&key), vec![wanted]);
}

#[test]
fn same_tier_drains_oldest_first() {
    let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let mut queue = BinaryHeap::new();

    for (i, minutes) in [(0_u64, 5), (1, 1), (2, 3)] {
        let request = PreloadRequest::with_queued_at(
            DataKind::MarkPrice,
            "BTCUSDT",
            None,
            range(0, 1_000),
            PreloadPriority::High,
            base + Duration::minutes(minutes),
        );
        queue.push(QueuedPreload::new(request, i));
    }

    let order: Vec<i64> = std::iter::from_fn(|| queue.pop())
        .map(|q| (q.request().queued_at() - base).num_minutes())
        .collect();
    assert_eq!(order, vec![1, 3, 5]);
}

#[test]
fn registry_is_shared_across_threads() {
    let coverage = Arc::new(CoverageRegistry::new());
    let key = CoverageKey::new("BTCUSDT", DataKind::Candles, Some(Timeframe::M5));

    let handles: Vec<_> = (0..8_i64)
        .map(|i| {
            let coverage = Arc::clone(&coverage);
            let key = key.clone();
            std::thread::spawn(move || coverage.add(&key, range(i * 100, (i + 1) * 100)))
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(coverage.ranges(&key), vec![range(0, 800)]);
}
