//! Integration tests for the coordinator

use ble_activity::{
    Advertisement, ChannelSource, Config, Coordinator, CoordinatorError, IngestOutcome,
    ManualClock, SourceError,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap()
}

fn test_config() -> Config {
    Config {
        data_path: std::env::temp_dir().join("ble-activity-test"),
        ..Config::default()
    }
}

fn manual_coordinator(config: Config, start: DateTime<Utc>) -> (Coordinator, ManualClock) {
    let clock = ManualClock::new(start);
    let coordinator = Coordinator::with_clock(config, ChannelSource::new(), Arc::new(clock.clone()))
        .expect("valid config");
    (coordinator, clock)
}

fn adv(id: &str, dbm: i32) -> Advertisement {
    Advertisement::new(id).with_signal(dbm)
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + std::time::Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(std::time::Duration::from_millis(5));
    }
    condition()
}

#[test]
fn test_single_device_within_short_window() {
    let (coordinator, clock) = manual_coordinator(test_config(), t0());

    for i in 0..7 {
        coordinator.ingest(adv("AA:01", -50 - i));
        clock.advance(Duration::seconds(8));
    }

    let stats = coordinator.tick();
    assert_eq!(stats.unique_last_60s, 1);
    assert_eq!(stats.packets_last_60s, 7);
    assert_eq!(coordinator.device("AA:01").unwrap().sample_count, 7);
}

#[test]
fn test_stats_published_only_on_recompute() {
    let (coordinator, _clock) = manual_coordinator(test_config(), t0());

    coordinator.ingest(adv("AA:01", -60));
    assert_eq!(coordinator.stats().packets_last_60s, 0);

    coordinator.tick();
    assert_eq!(coordinator.stats().packets_last_60s, 1);
}

#[test]
fn test_recompute_is_idempotent() {
    let (coordinator, clock) = manual_coordinator(test_config(), t0());

    coordinator.ingest(adv("AA:01", -60));
    clock.advance(Duration::seconds(1));
    coordinator.ingest(adv("BB:02", -70));
    clock.advance(Duration::seconds(1));

    let first = coordinator.tick();
    let second = coordinator.tick();
    assert_eq!(first, second);
    assert_eq!(first.unique_last_5m, 2);
}

#[test]
fn test_windows_expire_old_events() {
    let (coordinator, clock) = manual_coordinator(test_config(), t0());

    coordinator.ingest(adv("AA:01", -60));
    clock.advance(Duration::seconds(61));
    coordinator.ingest(adv("BB:02", -60));

    let stats = coordinator.tick();
    assert_eq!(stats.packets_last_60s, 1);
    assert_eq!(stats.unique_last_60s, 1);
    assert_eq!(stats.packets_last_5m, 2);
    assert_eq!(stats.unique_last_5m, 2);

    // The 5 minute window still holds an event exactly at its edge
    clock.advance(Duration::seconds(300));
    assert_eq!(coordinator.tick().packets_last_5m, 1);

    clock.advance(Duration::seconds(1));
    let stats = coordinator.tick();
    assert_eq!(stats.packets_last_5m, 0);
    assert_eq!(stats.packets_today, 2);
    assert_eq!(stats.unique_today, 2);
}

#[test]
fn test_day_rollover_splits_counts() {
    let before_midnight = Utc.with_ymd_and_hms(2024, 5, 10, 23, 59, 59).unwrap();
    let (coordinator, clock) = manual_coordinator(test_config(), before_midnight);

    coordinator.ingest(adv("AA:01", -60));
    clock.advance(Duration::seconds(2));
    coordinator.ingest(adv("AA:01", -61));

    let stats = coordinator.tick();
    assert_eq!(stats.day, Some((before_midnight + Duration::seconds(2)).date_naive()));
    assert_eq!(stats.packets_today, 1);
    assert_eq!(stats.unique_today, 1);
    // Sliding windows do not care about the date
    assert_eq!(stats.packets_last_60s, 2);
}

#[test]
fn test_day_rolls_at_recompute_without_traffic() {
    let (coordinator, clock) = manual_coordinator(test_config(), t0());

    coordinator.ingest(adv("AA:01", -60));
    assert_eq!(coordinator.tick().packets_today, 1);

    clock.advance(Duration::hours(24));
    let stats = coordinator.tick();
    assert_eq!(stats.packets_today, 0);
    assert_eq!(stats.unique_today, 0);
    assert_eq!(stats.day, Some((t0() + Duration::hours(24)).date_naive()));
}

#[test]
fn test_scenario_three_samples_one_device() {
    let (coordinator, clock) = manual_coordinator(test_config(), t0());

    for dbm in [-60, -40, -80] {
        coordinator.ingest(adv("AA:01", dbm));
        clock.advance(Duration::seconds(1));
    }
    coordinator.tick();

    let device = coordinator.device("AA:01").unwrap();
    assert_eq!(device.sample_count, 3);
    assert_eq!(device.min_signal, Some(-80));
    assert_eq!(device.max_signal, Some(-40));
    assert_eq!(device.last_signal, Some(-80));

    let top = coordinator.ranked_candidates(1);
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].device_id, "AA:01");

    let last_seen = t0() + Duration::seconds(2);
    let expected = 0.7 * 3.0 + 1.2 * 40.0 + 1e-6 * last_seen.timestamp() as f64;
    assert!((top[0].score - expected).abs() < 1e-6);
    assert_eq!(top[0].last_seen, last_seen);
}

#[test]
fn test_ranking_ties_are_deterministic() {
    let (coordinator, clock) = manual_coordinator(test_config(), t0());

    // Identical score: smaller identifier first
    coordinator.ingest(Advertisement::new("BB:02"));
    coordinator.ingest(Advertisement::new("AA:01"));
    let ranked = coordinator.ranked_candidates(10);
    assert_eq!(ranked[0].device_id, "AA:01");
    assert_eq!(ranked[1].device_id, "BB:02");

    // Only recency differs: later wins
    clock.advance(Duration::seconds(30));
    coordinator.ingest(Advertisement::new("CC:03"));
    clock.advance(Duration::seconds(30));
    coordinator.ingest(Advertisement::new("00:00"));
    let ranked = coordinator.ranked_candidates(10);
    let order: Vec<&str> = ranked.iter().map(|c| c.device_id.as_str()).collect();
    assert_eq!(order, vec!["00:00", "CC:03", "AA:01", "BB:02"]);

    assert!(coordinator.ranked_candidates(0).is_empty());
}

#[test]
fn test_session_expires_on_late_event() {
    let mut config = test_config();
    config.session_duration = std::time::Duration::from_secs(10);
    let (coordinator, clock) = manual_coordinator(config, t0());

    let session = coordinator.start_session();
    assert!(session.active);
    assert_eq!(session.expires_at, Some(t0() + Duration::seconds(10)));

    clock.advance(Duration::seconds(11));
    coordinator.ingest(adv("AA:01", -60));

    let session = coordinator.session_state();
    assert!(!session.active);
    assert_eq!(session.stopped_at, Some(t0() + Duration::seconds(11)));
    assert_eq!(coordinator.counters().stats().sessions_expired, 1);

    // The late event is not counted towards the expired session
    assert_eq!(coordinator.device("AA:01").unwrap().session_sample_count, 0);
}

#[test]
fn test_session_expires_on_tick() {
    let mut config = test_config();
    config.session_duration = std::time::Duration::from_secs(10);
    let (coordinator, clock) = manual_coordinator(config, t0());

    coordinator.start_session();
    clock.advance(Duration::seconds(10));
    coordinator.tick();
    assert!(coordinator.session_state().active);

    clock.advance(Duration::seconds(1));
    coordinator.tick();
    assert!(!coordinator.session_state().active);
}

#[test]
fn test_session_scoped_ranking() {
    let (coordinator, clock) = manual_coordinator(test_config(), t0());

    coordinator.ingest(adv("AA:01", -60));
    coordinator.ingest(adv("AA:01", -30));
    coordinator.start_session();
    clock.advance(Duration::seconds(1));
    coordinator.ingest(adv("BB:02", -70));

    let all = coordinator.ranked_candidates(10);
    assert_eq!(all[0].device_id, "AA:01");

    let session = coordinator.ranked_session_candidates(10);
    assert_eq!(session.len(), 1);
    assert_eq!(session[0].device_id, "BB:02");
    assert_eq!(session[0].session_sample_count, 1);

    // Restarting the session starts counting afresh
    coordinator.start_session();
    assert!(coordinator.ranked_session_candidates(10).is_empty());
}

#[test]
fn test_stop_session_is_idempotent() {
    let (coordinator, clock) = manual_coordinator(test_config(), t0());

    assert!(!coordinator.stop_session().active);
    coordinator.start_session();
    clock.advance(Duration::seconds(5));
    let stopped = coordinator.stop_session();
    assert_eq!(stopped.stopped_at, Some(t0() + Duration::seconds(5)));

    clock.advance(Duration::seconds(5));
    assert_eq!(
        coordinator.stop_session().stopped_at,
        Some(t0() + Duration::seconds(5))
    );
}

#[test]
fn test_filter_rejects_without_side_effects() {
    let mut config = test_config();
    config.filter_tag = Some(0x004C);
    let (coordinator, _clock) = manual_coordinator(config, t0());

    let notified = Arc::new(AtomicUsize::new(0));
    let hits = notified.clone();
    let _subscription = coordinator.add_listener(move || -> anyhow::Result<()> {
        hits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    let before = coordinator.tick();
    let session_before = coordinator.session_state();
    let notified_before = notified.load(Ordering::SeqCst);

    assert_eq!(
        coordinator.ingest(adv("AA:01", -60).with_tag(0x0006)),
        IngestOutcome::Filtered
    );
    assert_eq!(coordinator.ingest(adv("BB:02", -60)), IngestOutcome::Filtered);

    assert_eq!(coordinator.device_count(), 0);
    assert_eq!(coordinator.session_state(), session_before);
    assert_eq!(notified.load(Ordering::SeqCst), notified_before);
    assert_eq!(coordinator.tick(), before);
    assert_eq!(coordinator.counters().stats().filtered, 2);

    assert_eq!(
        coordinator.ingest(adv("CC:03", -60).with_tag(0x0006).with_tag(0x004C)),
        IngestOutcome::Accepted
    );
    assert_eq!(coordinator.device_count(), 1);
}

#[test]
fn test_malformed_advertisement_is_counted() {
    let (coordinator, _clock) = manual_coordinator(test_config(), t0());

    assert_eq!(coordinator.ingest(Advertisement::new("  ")), IngestOutcome::Malformed);
    assert_eq!(coordinator.ingest(Advertisement::new("")), IngestOutcome::Malformed);

    assert_eq!(coordinator.device_count(), 0);
    assert_eq!(coordinator.tick().packets_today, 0);
    assert_eq!(coordinator.counters().stats().dropped_malformed, 2);
}

#[test]
fn test_observation_time_never_goes_backwards() {
    let (coordinator, clock) = manual_coordinator(test_config(), t0());

    coordinator.ingest(adv("AA:01", -60));
    clock.advance(Duration::seconds(-30));
    coordinator.ingest(adv("AA:01", -61));

    assert_eq!(coordinator.device("AA:01").unwrap().last_seen, t0());
}

#[test]
fn test_device_table_is_bounded() {
    let mut config = test_config();
    config.max_devices = 2;
    let (coordinator, clock) = manual_coordinator(config, t0());

    coordinator.ingest(adv("AA:01", -60));
    clock.advance(Duration::seconds(1));
    coordinator.ingest(adv("BB:02", -60));
    clock.advance(Duration::seconds(1));
    coordinator.ingest(adv("CC:03", -60));

    assert_eq!(coordinator.device_count(), 2);
    assert!(coordinator.device("AA:01").is_none());
    assert_eq!(coordinator.counters().stats().devices_evicted, 1);
}

#[test]
fn test_listener_failures_are_isolated() {
    let (coordinator, _clock) = manual_coordinator(test_config(), t0());
    let hits = Arc::new(AtomicUsize::new(0));

    coordinator.add_listener(|| -> anyhow::Result<()> { anyhow::bail!("renderer gone") });
    coordinator.add_listener(|| -> anyhow::Result<()> { panic!("listener bug") });
    let counter = hits.clone();
    let subscription = coordinator.add_listener(move || -> anyhow::Result<()> {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    assert_eq!(coordinator.listener_count(), 3);

    assert_eq!(coordinator.ingest(adv("AA:01", -60)), IngestOutcome::Accepted);
    coordinator.tick();
    assert_eq!(hits.load(Ordering::SeqCst), 2);
    assert_eq!(coordinator.counters().stats().listener_failures, 4);
    assert_eq!(coordinator.device_count(), 1);

    assert!(subscription.unsubscribe());
    coordinator.tick();
    assert_eq!(hits.load(Ordering::SeqCst), 2);
    assert_eq!(coordinator.listener_count(), 2);
}

#[test]
fn test_listener_can_query_coordinator() {
    let (coordinator, _clock) = manual_coordinator(test_config(), t0());
    let coordinator = Arc::new(coordinator);
    let seen = Arc::new(AtomicUsize::new(0));

    let weak = Arc::downgrade(&coordinator);
    let out = seen.clone();
    coordinator.add_listener(move || -> anyhow::Result<()> {
        if let Some(coordinator) = weak.upgrade() {
            out.store(coordinator.ranked_candidates(10).len(), Ordering::SeqCst);
        }
        Ok(())
    });

    coordinator.ingest(adv("AA:01", -60));
    coordinator.ingest(adv("BB:02", -60));
    assert_eq!(seen.load(Ordering::SeqCst), 2);
}

#[test]
fn test_clear_resets_everything() {
    let (coordinator, _clock) = manual_coordinator(test_config(), t0());

    coordinator.ingest(adv("AA:01", -60));
    coordinator.start_session();
    coordinator.tick();

    coordinator.clear();
    assert_eq!(coordinator.device_count(), 0);
    assert!(!coordinator.session_state().active);
    assert!(coordinator.session_state().started_at.is_none());

    let stats = coordinator.tick();
    assert_eq!(stats.packets_today, 0);
    assert!(stats.last_seen.is_none());
}

#[test]
fn test_invalid_config_is_rejected() {
    let mut config = test_config();
    config.session_duration = std::time::Duration::from_secs(5);

    let result = Coordinator::new(config, ChannelSource::new());
    assert!(matches!(result, Err(CoordinatorError::Config(_))));
}

#[test]
fn test_start_stop_lifecycle() {
    let source = ChannelSource::new();
    let feeder = source.feeder();
    let coordinator = Coordinator::new(test_config(), source).unwrap();

    // Nothing is delivered before start
    assert_eq!(feeder.push(adv("AA:01", -60)), Err(SourceError::NotRunning));

    assert!(!coordinator.is_scanning());
    coordinator.start().unwrap();
    assert!(coordinator.is_running());
    assert!(coordinator.is_scanning());
    assert!(matches!(
        coordinator.start(),
        Err(CoordinatorError::AlreadyRunning)
    ));

    feeder.push(adv("AA:01", -60)).unwrap();
    feeder.push(adv("AA:01", -40)).unwrap();
    feeder.push(adv("BB:02", -70)).unwrap();
    assert!(wait_until(|| coordinator.counters().stats().accepted == 3));
    assert_eq!(coordinator.device("AA:01").unwrap().sample_count, 2);

    feeder.report_fault("adapter reset").unwrap();
    assert!(wait_until(|| coordinator.counters().stats().source_faults == 1));
    assert_eq!(coordinator.device_count(), 2);

    coordinator.stop();
    assert!(!coordinator.is_running());
    assert!(!coordinator.is_scanning());
    assert!(!feeder.is_running());
    assert_eq!(feeder.push(adv("CC:03", -60)), Err(SourceError::NotRunning));

    // Stopping twice is harmless and queries keep working
    coordinator.stop();
    assert_eq!(coordinator.tick().unique_last_60s, 2);
}

#[test]
fn test_snapshot_restore_carries_devices_and_session() {
    let (coordinator, clock) = manual_coordinator(test_config(), t0());

    coordinator.start_session();
    for dbm in [-60, -40] {
        coordinator.ingest(adv("AA:01", dbm).with_tag(0x004C));
        clock.advance(Duration::seconds(1));
    }
    coordinator.ingest(Advertisement::new("BB:02").with_name("Tag"));
    coordinator.tick();
    let blob = coordinator.snapshot().unwrap();

    let (restored, _clock) = manual_coordinator(test_config(), t0() + Duration::seconds(3));
    restored.restore(&blob).unwrap();

    assert_eq!(restored.device_count(), 2);
    assert_eq!(restored.device("AA:01"), coordinator.device("AA:01"));
    assert_eq!(
        restored.device("BB:02").unwrap().display_name.as_deref(),
        Some("Tag")
    );
    assert_eq!(restored.session_state(), coordinator.session_state());
    assert_eq!(
        restored.ranked_candidates(10),
        coordinator.ranked_candidates(10)
    );

    // Windows rebuild from live traffic
    assert_eq!(restored.tick().packets_last_60s, 0);
}

#[test]
fn test_restore_rejects_garbage() {
    let (coordinator, _clock) = manual_coordinator(test_config(), t0());
    coordinator.ingest(adv("AA:01", -60));

    assert!(matches!(
        coordinator.restore(b"{\"version\": 1}"),
        Err(CoordinatorError::Snapshot(_))
    ));
    assert_eq!(coordinator.device_count(), 1);
}

#[test]
fn test_snapshot_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state").join("snapshot.json");

    let (coordinator, _clock) = manual_coordinator(test_config(), t0());
    assert!(!coordinator.load_snapshot(&path).unwrap());

    coordinator.ingest(adv("AA:01", -60));
    coordinator.save_snapshot(&path).unwrap();

    let (restored, _clock) = manual_coordinator(test_config(), t0());
    assert!(restored.load_snapshot(&path).unwrap());
    assert_eq!(restored.device("AA:01").unwrap().sample_count, 1);
}

#[test]
fn test_stop_from_listener_freezes_worker() {
    let mut config = test_config();
    config.tick_interval = std::time::Duration::from_millis(1);
    let source = ChannelSource::new();
    let feeder = source.feeder();
    let coordinator = Arc::new(Coordinator::new(config, source).unwrap());

    let stopped = Arc::new(AtomicBool::new(false));
    let ticks_at_stop = Arc::new(AtomicU64::new(0));
    let accepted_at_stop = Arc::new(AtomicU64::new(0));

    let weak = Arc::downgrade(&coordinator);
    let (done, ticks, accepted) = (stopped.clone(), ticks_at_stop.clone(), accepted_at_stop.clone());
    coordinator.add_listener(move || -> anyhow::Result<()> {
        let on_worker = std::thread::current().name() == Some("ble-activity-tick");
        if !on_worker || done.load(Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(coordinator) = weak.upgrade() {
            coordinator.stop();
            let stats = coordinator.counters().stats();
            ticks.store(stats.ticks, Ordering::SeqCst);
            accepted.store(stats.accepted, Ordering::SeqCst);
            done.store(true, Ordering::SeqCst);
        }
        Ok(())
    });

    coordinator.start().unwrap();
    for i in 0..50 {
        if feeder.push(adv("AA:01", -60 - i)).is_err() {
            break;
        }
    }
    assert!(wait_until(|| stopped.load(Ordering::SeqCst)));
    assert!(!coordinator.is_running());

    std::thread::sleep(std::time::Duration::from_millis(50));
    let stats = coordinator.counters().stats();
    assert_eq!(stats.ticks, ticks_at_stop.load(Ordering::SeqCst));
    assert_eq!(stats.accepted, accepted_at_stop.load(Ordering::SeqCst));
}

#[test]
fn test_listeners_fire_once_per_accepted_ingest() {
    let mut config = test_config();
    config.filter_tag = Some(0x004C);
    let (coordinator, _clock) = manual_coordinator(config, t0());

    let calls = Arc::new(AtomicUsize::new(0));
    let seen = calls.clone();
    coordinator.add_listener(move || -> anyhow::Result<()> {
        seen.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    for i in 0..5 {
        coordinator.ingest(adv("AA:01", -60 - i).with_tag(0x004C));
    }
    coordinator.ingest(adv("BB:02", -60));
    coordinator.ingest(Advertisement::new(" ").with_tag(0x004C));
    assert_eq!(calls.load(Ordering::SeqCst), 5);
}
