//! Detector-plus-queue facade for the main loop
//!
//! The firmware's sample path and transmit path run at different rates:
//! the sensor callback feeds samples in at the sample period, the
//! scheduler drains events out at the configured event interval. This
//! facade owns both halves — one [`Detector`] and one bounded
//! [`EventQueue`] — and is the only surface the main loop touches.

use crate::calibration::CalibrationRecord;
use crate::detector::{Detector, DetectorConfig};
use crate::events::Event;
use crate::geometry::MagSample;
use crate::queue::{EventQueue, EVENT_QUEUE_SLOTS};
use crate::time::Timestamp;

/// Owned detector + event queue pair.
#[derive(Debug, Clone)]
pub struct Pipeline {
    detector: Detector,
    queue: EventQueue<EVENT_QUEUE_SLOTS>,
}

impl Pipeline {
    /// Pipeline with default detector config, primed at `now_ms`.
    pub fn new(now_ms: Timestamp) -> Self {
        Self {
            detector: Detector::new(now_ms),
            queue: EventQueue::new(),
        }
    }

    /// Pipeline with an explicit detector config.
    pub fn with_config(config: DetectorConfig, now_ms: Timestamp) -> Self {
        Self {
            detector: Detector::with_config(config, now_ms),
            queue: EventQueue::new(),
        }
    }

    /// Feed one magnetometer sample; resulting events are queued.
    pub fn process_mag_sample(&mut self, sample: MagSample, now_ms: Timestamp) {
        for event in self.detector.process_sample(sample, now_ms) {
            self.queue.push(event);
        }
    }

    /// Report sensor silence; a (debounced) notice event is queued.
    pub fn post_no_data(&mut self, now_ms: Timestamp) {
        if let Some(event) = self.detector.post_no_data(now_ms) {
            self.queue.push(event);
        }
    }

    /// Take the oldest pending event for transmission.
    pub fn pop_event(&mut self) -> Option<Event> {
        self.queue.pop()
    }

    /// Last settled (sector, elevation), for the status poll command.
    pub fn sector_state(&self) -> (u8, u8) {
        self.detector.sector_state()
    }

    /// Replace the detector configuration from a calibration record.
    pub fn apply_calibration(&mut self, cal: &CalibrationRecord) {
        self.detector.apply_calibration(cal);
    }

    /// Read access to the detector, for diagnostics.
    pub fn detector(&self) -> &Detector {
        &self.detector
    }

    /// Events dropped on queue overflow since boot.
    pub fn dropped_events(&self) -> u32 {
        self.queue.dropped()
    }
}
