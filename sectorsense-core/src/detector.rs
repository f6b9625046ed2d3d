//! Sector state machine: smoothed classifications to semantic events
//!
//! ## Overview
//!
//! The detector is called once per magnetometer sample with the current
//! tick and returns a bounded burst of events. Conceptually it is a two
//! state machine — dormant (sector 0) or active in a sector — with four
//! independent checks run in a fixed order on every call:
//!
//! 1. sector change (activation / settled change / passing sweep)
//! 2. intensity change within the current sector
//! 3. per-sector deactivation timeout (closes the session)
//! 4. watchdogs (stuck-sector alarm, dormant session expiry)
//!
//! Events for one sample are produced in exactly that order, so a
//! consumer always sees `SectorActivated` before the `SessionStarted`
//! it caused, and `SectionDeactivated` before the matching
//! `SessionEnded`.
//!
//! ## Warm-up
//!
//! The first [`SMOOTHING_WINDOW`] samples after construction only prime
//! the smoothing window and the bookkeeping; no events fire. This keeps
//! transient startup readings from opening a phantom session.
//!
//! The detector owns all of its state — there are no statics — so a
//! host-side harness can run one instance per simulated device.

use heapless::Vec;

use crate::buffer::{SampleWindow, SectorSample};
use crate::calibration::CalibrationRecord;
use crate::events::Event;
use crate::geometry::{self, clamp_u8, MagSample};
use crate::time::{delta, Timestamp};

/// Samples in the smoothing window (and the warm-up length).
pub const SMOOTHING_WINDOW: usize = 5;

/// Upper bound on events emitted by one `process_sample` call.
pub const MAX_EVENTS_PER_SAMPLE: usize = 4;

/// Lowest accepted sector count.
pub const MIN_SECTORS: u8 = 1;

/// Highest accepted sector count.
pub const MAX_SECTORS: u8 = 16;

/// Sector count used when a stored value fails sanitization.
pub const DEFAULT_SECTORS: u8 = 6;

/// Window in which an adjacent-sector change counts as a passing sweep.
const PASSING_WINDOW_MS: u32 = 20;

/// Bounded burst of events from one sample.
pub type EventBurst = Vec<Event, MAX_EVENTS_PER_SAMPLE>;

/// Calibration-derived geometry and timing parameters.
///
/// Replaced wholesale when a calibration applies — there is no partial
/// update path, so the config can never mix two calibrations.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DetectorConfig {
    /// Center offset, x (applied after rotation), milligauss.
    pub center_x: f32,
    /// Center offset, y (applied after rotation), milligauss.
    pub center_y: f32,
    /// Center offset, z (applied before rotation), milligauss.
    pub center_z: f32,
    /// Rotation in the XY plane, degrees. Applied first.
    pub rotate_xy_deg: f32,
    /// Rotation in the XZ plane, degrees. Applied second.
    pub rotate_xz_deg: f32,
    /// Rotation in the YZ plane, degrees. Applied last.
    pub rotate_yz_deg: f32,
    /// Planar dead-zone radius around the center, milligauss.
    pub keepout_rad: f32,
    /// Minimum rotated z for a target to count, milligauss.
    pub z_limit: f32,
    /// Rotated z mapping to full elevation, milligauss.
    pub z_max: f32,
    /// Elevation curve exponent (1.0 = linear).
    pub elev_curve: f32,
    /// Nominal data radius of the sensed volume, milligauss.
    pub data_radius: f32,
    /// Number of angular sectors, 1..=16.
    pub num_sectors: u8,
    /// Smoothed-elevation delta that fires an intensity event.
    pub change_threshold: f32,
    /// Idle time after which an active sector deactivates, ms.
    pub deactivation_timeout_ms: u32,
    /// Session / watchdog timeout, ms.
    pub session_timeout_ms: u32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            center_x: 0.0,
            center_y: 0.0,
            center_z: 0.0,
            rotate_xy_deg: 0.0,
            rotate_xz_deg: 0.0,
            rotate_yz_deg: 0.0,
            keepout_rad: 1000.0,
            z_limit: 150.0,
            z_max: 405.0,
            elev_curve: 1.0,
            data_radius: 3000.0,
            num_sectors: DEFAULT_SECTORS,
            change_threshold: 3.0,
            deactivation_timeout_ms: 5000,
            session_timeout_ms: 10_000,
        }
    }
}

/// Clamp a stored sector count into the accepted range.
pub fn sanitize_sector_count(n: u8) -> u8 {
    if !(MIN_SECTORS..=MAX_SECTORS).contains(&n) {
        DEFAULT_SECTORS
    } else {
        n
    }
}

impl DetectorConfig {
    /// Build a config from a calibration record.
    ///
    /// Centidegree and centi-exponent fields scale by 1/100; the sector
    /// count is sanitized. Timing fields keep their defaults — the
    /// calibration record does not carry them.
    pub fn from_calibration(cal: &CalibrationRecord) -> Self {
        Self {
            center_x: cal.center_x_mg as f32,
            center_y: cal.center_y_mg as f32,
            center_z: cal.center_z_mg as f32,
            rotate_xy_deg: cal.rotate_xy_cdeg as f32 / 100.0,
            rotate_xz_deg: cal.rotate_xz_cdeg as f32 / 100.0,
            rotate_yz_deg: cal.rotate_yz_cdeg as f32 / 100.0,
            keepout_rad: cal.keepout_rad_mg as f32,
            z_limit: cal.z_limit_mg as f32,
            z_max: cal.z_max_mg as f32,
            elev_curve: cal.elev_curve_centi as f32 / 100.0,
            data_radius: cal.data_radius_mg as f32,
            num_sectors: sanitize_sector_count(cal.num_sectors),
            ..Self::default()
        }
    }
}

/// The sector event detector.
///
/// Single owner of its mutable state; mutated only by
/// [`Detector::process_sample`] and [`Detector::post_no_data`].
#[derive(Debug, Clone)]
pub struct Detector {
    config: DetectorConfig,

    window: SampleWindow<SMOOTHING_WINDOW>,

    /// 0 = no target, 1..=num_sectors = active sector.
    last_sector: u8,
    /// Smoothed elevation at the previous sample.
    last_elevation: f32,
    /// Tick of the previous processed sample.
    last_event_ms: Timestamp,
    /// Tick when a sector was last non-zero.
    last_nonzero_ms: Timestamp,
    session_active: bool,

    /// Last-event tick per sector; index 0 unused.
    sector_event_ms: [Timestamp; MAX_SECTORS as usize + 1],
    /// Deactivated-sector bitmask; bit 0 unused.
    deactivated: u32,

    /// Elevation snapshot for the status poll.
    last_state_elevation: u8,
    /// Tick of the last no-data notice (debounce anchor).
    last_no_data_ms: Timestamp,
}

impl Detector {
    /// Detector with default config, primed at `now_ms`.
    pub fn new(now_ms: Timestamp) -> Self {
        Self::with_config(DetectorConfig::default(), now_ms)
    }

    /// Detector with an explicit config.
    pub fn with_config(config: DetectorConfig, now_ms: Timestamp) -> Self {
        Self {
            config,
            window: SampleWindow::new(),
            last_sector: 0,
            last_elevation: 0.0,
            last_event_ms: now_ms,
            last_nonzero_ms: now_ms,
            session_active: false,
            sector_event_ms: [0; MAX_SECTORS as usize + 1],
            deactivated: 0,
            last_state_elevation: 0,
            last_no_data_ms: 0,
        }
    }

    /// Current configuration.
    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Replace the configuration wholesale from a calibration record.
    pub fn apply_calibration(&mut self, cal: &CalibrationRecord) {
        self.config = DetectorConfig::from_calibration(cal);
    }

    /// Replace the configuration wholesale.
    pub fn apply_config(&mut self, config: DetectorConfig) {
        self.config = config;
    }

    /// Last settled (sector, elevation) pair, for the status poll.
    pub fn sector_state(&self) -> (u8, u8) {
        (self.last_sector, self.last_state_elevation)
    }

    /// True while a session is open.
    pub fn session_active(&self) -> bool {
        self.session_active
    }

    /// Process one magnetometer sample at tick `now_ms`.
    ///
    /// Returns the events for this sample in their guaranteed order
    /// (change → intensity → deactivation/session → watchdog).
    pub fn process_sample(&mut self, sample: MagSample, now_ms: Timestamp) -> EventBurst {
        let mut out = EventBurst::new();

        let (sector, elevation) = geometry::project(sample, &self.config);
        self.window.push(SectorSample { sector, elevation });

        // Warm-up: bookkeeping only until the window fills.
        if !self.window.is_full() {
            self.last_event_ms = now_ms;
            self.last_sector = sector;
            self.last_elevation = elevation as f32;
            self.last_state_elevation = elevation;
            return out;
        }

        let avg_elevation = self.window.mean_elevation();

        let dt_sec = (delta(self.last_event_ms, now_ms) as f32 / 1000.0).max(0.001);
        let speed = clamp_u8((libm::fabsf(avg_elevation - self.last_elevation) / dt_sec) as i32);

        if sector != self.last_sector {
            if self.last_sector == 0 {
                emit(&mut out, Event::sector_activated(sector, avg_elevation as u8, speed, now_ms));
                if !self.session_active {
                    emit(&mut out, Event::session_started(now_ms));
                    self.session_active = true;
                }
            } else if sector != 0 {
                let diff = (self.last_sector as i32 - sector as i32).abs();
                let wrap = self.config.num_sectors as i32 - diff;
                if (diff == 1 || wrap == 1) && delta(self.last_event_ms, now_ms) < PASSING_WINDOW_MS {
                    emit(&mut out, Event::passing_sector_change(sector, now_ms));
                } else {
                    emit(&mut out, Event::sector_changed(self.last_sector, sector, now_ms));
                }
            }

            if sector >= MIN_SECTORS && sector <= self.config.num_sectors {
                self.deactivated &= !(1u32 << sector);
                self.sector_event_ms[sector as usize] = now_ms;
            }
        } else if sector != 0
            && libm::fabsf(avg_elevation - self.last_elevation) > self.config.change_threshold
        {
            if self.deactivated & (1u32 << sector) == 0 {
                emit(&mut out, Event::intensity_change(sector, avg_elevation as u8, speed, now_ms));
                if sector <= self.config.num_sectors {
                    self.sector_event_ms[sector as usize] = now_ms;
                }
            }
        }

        if self.last_sector != 0 {
            self.last_nonzero_ms = now_ms;
        }

        // Deactivation timeout runs against the previously settled sector.
        if self.last_sector != 0 && self.last_sector <= self.config.num_sectors {
            let sector_last_ms = self.sector_event_ms[self.last_sector as usize];
            if sector_last_ms != 0
                && delta(sector_last_ms, now_ms) > self.config.deactivation_timeout_ms
            {
                emit(&mut out, Event::section_deactivated(self.last_sector, now_ms));
                if self.session_active {
                    emit(&mut out, Event::session_ended(now_ms));
                    self.session_active = false;
                }
                self.deactivated |= 1 << self.last_sector;
                self.sector_event_ms[self.last_sector as usize] = 0;
            }
        }

        if self.last_sector != 0
            && delta(self.last_event_ms, now_ms) > self.config.session_timeout_ms
        {
            // Persistent alarm: refires every call while the condition holds.
            emit(&mut out, Event::possible_mechanical_failure(self.last_sector, now_ms));
        } else if self.last_sector == 0
            && delta(self.last_nonzero_ms, now_ms) > self.config.session_timeout_ms
            && self.session_active
        {
            emit(&mut out, Event::session_ended(now_ms));
            self.session_active = false;
        }

        self.last_sector = sector;
        self.last_elevation = avg_elevation;
        self.last_state_elevation = avg_elevation as u8;
        self.last_event_ms = now_ms;
        out
    }

    /// Report sensor silence; rate-limited to one notice per session
    /// timeout window.
    pub fn post_no_data(&mut self, now_ms: Timestamp) -> Option<Event> {
        if delta(self.last_no_data_ms, now_ms) < self.config.session_timeout_ms {
            return None;
        }
        self.last_no_data_ms = now_ms;
        Some(Event::error_no_data(now_ms))
    }
}

#[inline]
fn emit(out: &mut EventBurst, event: Event) {
    // Burst capacity matches the worst case; overflow means a logic bug
    // upstream and the extra event is dropped like the queue would.
    out.push(event).ok();
}
