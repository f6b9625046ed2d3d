//! Sector event types and their wire framing
//!
//! Events are fixed-width five-field records: one type byte, three
//! byte-sized parameters and one 16-bit parameter. They are built once
//! by the detector, queued, serialized into a single 8-byte transport
//! frame, and discarded. Parameter meaning depends on the kind:
//!
//! | kind                       | p0         | p1        | p2    |
//! |----------------------------|------------|-----------|-------|
//! | `SectorActivated`          | sector     | elevation | speed |
//! | `SectorChanged`            | old sector | new sector| —     |
//! | `IntensityChange`          | sector     | elevation | speed |
//! | `SectionDeactivated`       | sector     | —         | —     |
//! | `PassingSectorChange`      | sector     | —         | —     |
//! | `PossibleMechanicalFailure`| sector     | —         | —     |
//! | session / no-data events   | —          | —         | —     |
//!
//! `p3` always carries the low 16 bits of the emitting tick — a rolling
//! correlation tag, not wall-clock time.

use crate::errors::WireError;
use crate::time::Timestamp;

/// Frame subtype byte marking an event frame on the wire.
pub const EVENT_FRAME_SUBTYPE: u8 = 0x20;

/// Event type codes, fixed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EventKind {
    /// A target entered a sector from the dormant state
    SectorActivated = 1,
    /// The target settled in a different sector
    SectorChanged = 2,
    /// Elevation moved past the change threshold within one sector
    IntensityChange = 3,
    /// A sector timed out and went inactive
    SectionDeactivated = 4,
    /// First activation opened a session
    SessionStarted = 5,
    /// Session closed by deactivation or dormancy timeout
    SessionEnded = 6,
    /// Fast sweep through an adjacent sector, not a settled dwell
    PassingSectorChange = 7,
    /// Sector stuck active past the session timeout; persistent alarm
    PossibleMechanicalFailure = 8,
    /// Sensor pipeline produced no valid sample for too long
    ErrorNoData = 9,
}

impl EventKind {
    /// Wire code for this kind.
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Decode a wire code, failing explicitly on unknown values.
    pub fn from_wire(code: u8) -> Result<Self, WireError> {
        match code {
            1 => Ok(Self::SectorActivated),
            2 => Ok(Self::SectorChanged),
            3 => Ok(Self::IntensityChange),
            4 => Ok(Self::SectionDeactivated),
            5 => Ok(Self::SessionStarted),
            6 => Ok(Self::SessionEnded),
            7 => Ok(Self::PassingSectorChange),
            8 => Ok(Self::PossibleMechanicalFailure),
            9 => Ok(Self::ErrorNoData),
            _ => Err(WireError::UnknownEventKind { code }),
        }
    }

    /// Human-readable name, for logs and host tooling.
    pub const fn name(self) -> &'static str {
        match self {
            Self::SectorActivated => "sector_activated",
            Self::SectorChanged => "sector_changed",
            Self::IntensityChange => "intensity_change",
            Self::SectionDeactivated => "section_deactivated",
            Self::SessionStarted => "session_started",
            Self::SessionEnded => "session_ended",
            Self::PassingSectorChange => "passing_sector_change",
            Self::PossibleMechanicalFailure => "possible_mechanical_failure",
            Self::ErrorNoData => "error_no_data",
        }
    }
}

/// One detector event, immutable once constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    /// Event type.
    pub kind: EventKind,
    /// First parameter (see module table).
    pub p0: u8,
    /// Second parameter.
    pub p1: u8,
    /// Third parameter.
    pub p2: u8,
    /// Rolling tick tag (low 16 bits of the emitting timestamp).
    pub p3: u16,
}

#[inline]
fn tick_tag(now_ms: Timestamp) -> u16 {
    (now_ms & 0xFFFF) as u16
}

impl Event {
    /// Target entered `sector` from dormant.
    pub fn sector_activated(sector: u8, elevation: u8, speed: u8, now_ms: Timestamp) -> Self {
        Self { kind: EventKind::SectorActivated, p0: sector, p1: elevation, p2: speed, p3: tick_tag(now_ms) }
    }

    /// Target settled from `from` into `to`.
    pub fn sector_changed(from: u8, to: u8, now_ms: Timestamp) -> Self {
        Self { kind: EventKind::SectorChanged, p0: from, p1: to, p2: 0, p3: tick_tag(now_ms) }
    }

    /// Elevation step inside `sector`.
    pub fn intensity_change(sector: u8, elevation: u8, speed: u8, now_ms: Timestamp) -> Self {
        Self { kind: EventKind::IntensityChange, p0: sector, p1: elevation, p2: speed, p3: tick_tag(now_ms) }
    }

    /// `sector` timed out and deactivated.
    pub fn section_deactivated(sector: u8, now_ms: Timestamp) -> Self {
        Self { kind: EventKind::SectionDeactivated, p0: sector, p1: 0, p2: 0, p3: tick_tag(now_ms) }
    }

    /// A session opened.
    pub fn session_started(now_ms: Timestamp) -> Self {
        Self { kind: EventKind::SessionStarted, p0: 0, p1: 0, p2: 0, p3: tick_tag(now_ms) }
    }

    /// The session closed.
    pub fn session_ended(now_ms: Timestamp) -> Self {
        Self { kind: EventKind::SessionEnded, p0: 0, p1: 0, p2: 0, p3: tick_tag(now_ms) }
    }

    /// Fast sweep into adjacent `sector`.
    pub fn passing_sector_change(sector: u8, now_ms: Timestamp) -> Self {
        Self { kind: EventKind::PassingSectorChange, p0: sector, p1: 0, p2: 0, p3: tick_tag(now_ms) }
    }

    /// Persistent stuck-sector alarm for `sector`.
    pub fn possible_mechanical_failure(sector: u8, now_ms: Timestamp) -> Self {
        Self { kind: EventKind::PossibleMechanicalFailure, p0: sector, p1: 0, p2: 0, p3: tick_tag(now_ms) }
    }

    /// Sensor silence notice.
    pub fn error_no_data(now_ms: Timestamp) -> Self {
        Self { kind: EventKind::ErrorNoData, p0: 0, p1: 0, p2: 0, p3: tick_tag(now_ms) }
    }

    /// Serialize into the 8-byte transport frame:
    /// `[0, 0x20, kind, p0, p1, p2, p3 lo, p3 hi]`.
    pub fn to_frame(&self) -> [u8; 8] {
        [
            0,
            EVENT_FRAME_SUBTYPE,
            self.kind.code(),
            self.p0,
            self.p1,
            self.p2,
            (self.p3 & 0xFF) as u8,
            (self.p3 >> 8) as u8,
        ]
    }

    /// Decode a transport frame produced by [`Event::to_frame`].
    pub fn from_frame(frame: &[u8; 8]) -> Result<Self, WireError> {
        if frame[1] != EVENT_FRAME_SUBTYPE {
            return Err(WireError::NotAnEventFrame { subtype: frame[1] });
        }
        Ok(Self {
            kind: EventKind::from_wire(frame[2])?,
            p0: frame[3],
            p1: frame[4],
            p2: frame[5],
            p3: u16::from_le_bytes([frame[6], frame[7]]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_codes_are_fixed() {
        assert_eq!(EventKind::SectorActivated.code(), 1);
        assert_eq!(EventKind::ErrorNoData.code(), 9);
        for code in 1..=9 {
            assert_eq!(EventKind::from_wire(code).unwrap().code(), code);
        }
    }

    #[test]
    fn unknown_code_fails_decode() {
        assert!(matches!(
            EventKind::from_wire(0),
            Err(WireError::UnknownEventKind { code: 0 })
        ));
        assert!(EventKind::from_wire(10).is_err());
    }

    #[test]
    fn frame_layout() {
        let event = Event::sector_activated(3, 128, 42, 0x1_2345);
        assert_eq!(event.to_frame(), [0, 0x20, 1, 3, 128, 42, 0x45, 0x23]);
    }

    #[test]
    fn frame_round_trip() {
        let event = Event::sector_changed(2, 5, 777);
        let decoded = Event::from_frame(&event.to_frame()).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn tick_tag_is_low_16_bits() {
        let event = Event::session_started(0xDEAD_BEEF);
        assert_eq!(event.p3, 0xBEEF);
    }
}
