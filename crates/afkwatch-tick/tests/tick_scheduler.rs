//! Integration tests for the sweep scheduler.
//!
//! Uses a paused tokio clock so `sleep_until` resolves as soon as the
//! runtime is idle, and `advance` stands in for slow work.

use std::time::Duration;

use afkwatch_tick::{TickConfig, TickPolicy, TickScheduler};

// =========================================================================
// Helpers
// =========================================================================

fn every_50ms() -> TickConfig {
    TickConfig {
        initial_jitter: Duration::ZERO,
        ..TickConfig::every(Duration::from_millis(50))
    }
}

/// The paused clock fires timers on millisecond boundaries.
fn assert_about(actual: Duration, expected: Duration) {
    assert!(
        actual >= expected && actual < expected + Duration::from_millis(2),
        "expected about {expected:?}, got {actual:?}"
    );
}

// =========================================================================
// TickConfig
// =========================================================================

#[test]
fn test_default_config_matches_sweep_defaults() {
    let cfg = TickConfig::default();
    assert_eq!(cfg.interval, Duration::from_millis(500));
    assert_eq!(cfg.policy, TickPolicy::Skip);
    assert!((cfg.budget_warn_threshold - 0.8).abs() < f64::EPSILON);
}

#[test]
fn test_validated_clamps_zero_interval_and_threshold() {
    let cfg = TickConfig {
        interval: Duration::ZERO,
        budget_warn_threshold: 3.0,
        ..TickConfig::default()
    }
    .validated();
    assert_eq!(cfg.interval, TickConfig::MIN_INTERVAL);
    assert_eq!(cfg.budget_warn_threshold, 1.0);
}

// =========================================================================
// Tick firing
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_wait_for_tick_fires_after_one_interval() {
    let mut s = TickScheduler::new(every_50ms());
    let start = tokio::time::Instant::now();

    let info = s.wait_for_tick().await;

    assert_eq!(info.tick, 1);
    assert!(!info.overrun);
    assert_about(start.elapsed(), Duration::from_millis(50));
}

#[tokio::test(start_paused = true)]
async fn test_multiple_ticks_increment_monotonically() {
    let mut s = TickScheduler::new(every_50ms());
    for expected in 1..=5 {
        assert_eq!(s.wait_for_tick().await.tick, expected);
    }
    assert_eq!(s.tick_count(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_initial_jitter_delays_first_tick_within_bound() {
    let mut s = TickScheduler::new(TickConfig {
        initial_jitter: Duration::from_millis(20),
        ..TickConfig::every(Duration::from_millis(50))
    });
    let start = tokio::time::Instant::now();
    s.wait_for_tick().await;
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(50));
    assert!(elapsed < Duration::from_millis(70));
}

// =========================================================================
// Overrun policies
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_skip_policy_skips_missed_ticks() {
    let mut s = TickScheduler::new(every_50ms());
    s.wait_for_tick().await;

    // A slow sweep eats three and a half intervals.
    tokio::time::advance(Duration::from_millis(175)).await;
    let info = s.wait_for_tick().await;

    assert!(info.overrun);
    assert_eq!(info.ticks_skipped, 2);
    assert_eq!(s.metrics().total_skipped, 2);
    assert_eq!(s.metrics().total_overruns, 1);

    // Next tick is a full interval after the late one.
    let before = tokio::time::Instant::now();
    let info = s.wait_for_tick().await;
    assert!(!info.overrun);
    assert_about(before.elapsed(), Duration::from_millis(50));
}

#[tokio::test(start_paused = true)]
async fn test_drop_policy_keeps_original_cadence() {
    let mut s = TickScheduler::new(TickConfig {
        policy: TickPolicy::Drop,
        ..every_50ms()
    });
    s.wait_for_tick().await; // t = 50

    tokio::time::advance(Duration::from_millis(80)).await; // t = 130
    let info = s.wait_for_tick().await; // planned 100, fires now
    assert!(info.overrun);
    assert_eq!(info.ticks_skipped, 0);

    // Planned 150: only 20 ms away.
    let before = tokio::time::Instant::now();
    s.wait_for_tick().await;
    assert_about(before.elapsed(), Duration::from_millis(20));
}

// =========================================================================
// Budget and metrics
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_record_tick_end_without_wait_is_noop() {
    let mut s = TickScheduler::new(every_50ms());
    s.record_tick_end();
    assert_eq!(s.metrics().total_ticks, 0);
    assert_eq!(s.metrics().max_tick_time, Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_record_tick_end_under_budget_no_warning() {
    let mut s = TickScheduler::new(every_50ms());
    s.wait_for_tick().await;
    tokio::time::advance(Duration::from_millis(10)).await;
    s.record_tick_end();

    let m = s.metrics();
    assert!((m.budget_utilization - 0.2).abs() < 1e-9);
    assert_eq!(m.budget_warnings, 0);
    assert_eq!(m.max_tick_time, Duration::from_millis(10));
}

#[tokio::test(start_paused = true)]
async fn test_record_tick_end_over_threshold_counts_warning() {
    let mut s = TickScheduler::new(every_50ms());
    s.wait_for_tick().await;
    tokio::time::advance(Duration::from_millis(45)).await;
    s.record_tick_end();

    assert_eq!(s.metrics().budget_warnings, 1);
    assert!(s.metrics().budget_utilization >= 0.8);
}

// =========================================================================
// Integration: select! loop pattern (mirrors the proxy loop)
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_select_loop_pattern() {
    let mut s = TickScheduler::new(every_50ms());
    let (tx, mut rx) = tokio::sync::mpsc::channel::<&str>(10);

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(160)).await;
        tx.send("stop").await.ok();
    });

    let mut ticks_fired = 0u64;
    loop {
        tokio::select! {
            Some(cmd) = rx.recv() => {
                assert_eq!(cmd, "stop");
                break;
            }
            info = s.wait_for_tick() => {
                ticks_fired += 1;
                s.record_tick_end();
                assert_eq!(info.tick, ticks_fired);
            }
        }
    }

    assert_eq!(ticks_fired, 3);
}
