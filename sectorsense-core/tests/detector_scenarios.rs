//! Scenario tests for the sector state machine
//!
//! These drive the detector the way the firmware's main loop does: a
//! sample stream at a fixed period, with the tick advanced by hand.

use sectorsense_core::detector::{Detector, DetectorConfig, SMOOTHING_WINDOW};
use sectorsense_core::events::{Event, EventKind};
use sectorsense_core::pipeline::Pipeline;
use sectorsense_core::MagSample;

/// Sample inside the keepout radius: classifies as "no target".
fn no_target() -> MagSample {
    MagSample::new(0, 0, 300)
}

/// Sample at ~2000 mG radius toward `azimuth` degrees, mid elevation.
fn at_azimuth(azimuth: f32) -> MagSample {
    let rad = azimuth.to_radians();
    MagSample::new(
        (2000.0 * rad.cos()) as i16,
        (2000.0 * rad.sin()) as i16,
        300,
    )
}

fn warm_up(detector: &mut Detector, now: &mut u32) {
    for _ in 0..SMOOTHING_WINDOW {
        *now += 10;
        assert!(detector.process_sample(no_target(), *now).is_empty());
    }
}

#[test]
fn full_revolution_walks_every_sector_in_order() {
    let mut now = 0;
    let mut detector = Detector::new(now);
    warm_up(&mut detector, &mut now);

    // Mid-arc azimuths for all six sectors, then back to sector 1.
    // 50 ms between samples keeps the changes settled, not "passing".
    let sweep = [30.0, 90.0, 150.0, 210.0, 270.0, 330.0, 30.0];

    let mut boundary_events: Vec<Event> = Vec::new();
    for azimuth in sweep {
        now += 50;
        for event in detector.process_sample(at_azimuth(azimuth), now) {
            match event.kind {
                EventKind::SectorActivated
                | EventKind::SectorChanged
                | EventKind::PassingSectorChange => boundary_events.push(event),
                EventKind::SessionStarted => {}
                other => panic!("unexpected event {other:?}"),
            }
        }
    }

    assert_eq!(boundary_events.len(), 7);

    // First entry activates sector 1; the rest are settled changes
    // walking 2..=6 and wrapping back to 1.
    assert_eq!(boundary_events[0].kind, EventKind::SectorActivated);
    assert_eq!(boundary_events[0].p0, 1);

    let mut expected_from = 1;
    for (event, expected_to) in boundary_events[1..].iter().zip([2, 3, 4, 5, 6, 1]) {
        assert_eq!(event.kind, EventKind::SectorChanged);
        assert_eq!(event.p0, expected_from);
        assert_eq!(event.p1, expected_to);
        expected_from = expected_to;
    }
}

#[test]
fn session_starts_once_per_activation_chain() {
    let mut now = 0;
    let mut detector = Detector::new(now);
    warm_up(&mut detector, &mut now);

    now += 50;
    let events = detector.process_sample(at_azimuth(30.0), now);
    let kinds: Vec<EventKind> = events.iter().map(|e| e.kind).collect();
    assert_eq!(kinds, [EventKind::SectorActivated, EventKind::SessionStarted]);

    // Leaving and re-entering within the session window re-activates
    // the sector but does not restart the session.
    now += 50;
    detector.process_sample(no_target(), now);
    now += 50;
    let events = detector.process_sample(at_azimuth(30.0), now);
    let kinds: Vec<EventKind> = events.iter().map(|e| e.kind).collect();
    assert_eq!(kinds, [EventKind::SectorActivated]);
}

#[test]
fn deactivated_sector_never_fires_twice_without_reactivation() {
    let mut config = DetectorConfig::default();
    config.deactivation_timeout_ms = 500;

    let mut now = 0;
    let mut detector = Detector::with_config(config, now);
    warm_up(&mut detector, &mut now);

    now += 50;
    detector.process_sample(at_azimuth(30.0), now);

    let mut deactivations = 0;
    for _ in 0..400 {
        now += 10;
        for event in detector.process_sample(at_azimuth(30.0), now) {
            if event.kind == EventKind::SectionDeactivated {
                deactivations += 1;
            }
        }
    }
    assert_eq!(deactivations, 1);

    // A dormant gap and re-entry re-arms the sector.
    for _ in 0..3 {
        now += 10;
        detector.process_sample(no_target(), now);
    }
    now += 10;
    let events = detector.process_sample(at_azimuth(30.0), now);
    assert_eq!(events[0].kind, EventKind::SectorActivated);

    for _ in 0..400 {
        now += 10;
        for event in detector.process_sample(at_azimuth(30.0), now) {
            if event.kind == EventKind::SectionDeactivated {
                deactivations += 1;
            }
        }
    }
    assert_eq!(deactivations, 2);
}

#[test]
fn queue_overflow_drops_newest_events() {
    let mut now = 0;
    let mut pipeline = Pipeline::new(now);

    for _ in 0..SMOOTHING_WINDOW {
        now += 10;
        pipeline.process_mag_sample(no_target(), now);
    }

    // Bounce between two non-adjacent sectors without draining; every
    // sample emits at least one event and the queue holds 15.
    for i in 0..40 {
        now += 50;
        let azimuth = if i % 2 == 0 { 30.0 } else { 210.0 };
        pipeline.process_mag_sample(at_azimuth(azimuth), now);
    }

    assert!(pipeline.dropped_events() > 0);

    let drained = std::iter::from_fn(|| pipeline.pop_event()).count();
    assert_eq!(drained, 15);
}

#[test]
fn no_data_watchdog_paces_with_the_clock() {
    use sectorsense_core::time::{FixedTime, TimeSource};

    let mut clock = FixedTime::new(0);
    let mut pipeline = Pipeline::new(clock.now());

    // Sensor silence, polled every 500 ms for half a minute: the
    // notice fires once per session-timeout window, not per poll.
    let mut notices = 0;
    for _ in 0..60 {
        clock.advance(500);
        pipeline.post_no_data(clock.now());
        while let Some(event) = pipeline.pop_event() {
            assert_eq!(event.kind, EventKind::ErrorNoData);
            notices += 1;
        }
    }
    assert_eq!(notices, 3);
}

#[test]
fn event_frames_serialize_queued_events() {
    let mut now = 0;
    let mut pipeline = Pipeline::new(now);

    for _ in 0..SMOOTHING_WINDOW {
        now += 10;
        pipeline.process_mag_sample(no_target(), now);
    }
    now += 50;
    pipeline.process_mag_sample(at_azimuth(30.0), now);

    let event = pipeline.pop_event().unwrap();
    let frame = event.to_frame();
    assert_eq!(frame[0], 0);
    assert_eq!(frame[1], 0x20);
    assert_eq!(frame[2], EventKind::SectorActivated.code());
    assert_eq!(Event::from_frame(&frame).unwrap(), event);
}
