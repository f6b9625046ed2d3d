//! Error and status types shared across the firmware core
//!
//! Kept small on purpose: errors travel through the main loop on every
//! command, so each variant is a handful of bytes, holds no heap data,
//! and implements `Copy`. The command dispatcher is the only layer that
//! turns one of these into a wire status frame; the core never touches
//! the transport.

use thiserror_no_std::Error;

/// Application status codes as they appear on the wire.
///
/// The bootloader has its own status enum in `sectorsense-boot`. The two
/// share a numeric space but not semantics (code 4 means "sensor fault"
/// here and "CRC mismatch" there) — they belong to separate binaries and
/// must never be unified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    /// Command completed
    Ok = 0,
    /// Unspecified failure (flash, driver, malformed frame)
    Generic = 1,
    /// A field or size was outside the accepted range
    Range = 2,
    /// Command not valid in the current state
    State = 3,
    /// Sensor read or configuration failure
    Sensor = 4,
}

impl Status {
    /// Wire representation of the status code.
    pub const fn code(self) -> u8 {
        self as u8
    }
}

/// Flash operation failures, as surfaced by a [`crate::flash::Flash`] impl.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashError {
    /// Page erase failed
    #[error("erase failed at {addr:#010x}")]
    Erase {
        /// First address of the failed erase range
        addr: u32,
    },

    /// Double-word program failed
    #[error("program failed at {addr:#010x}")]
    Program {
        /// Address of the failed double word
        addr: u32,
    },

    /// Access outside the device's flash region
    #[error("address {addr:#010x} outside the flash region")]
    OutOfBounds {
        /// Offending address
        addr: u32,
    },
}

/// Calibration blob load/save failures.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibError {
    /// The stored magic does not match — page is blank or foreign
    #[error("calibration magic mismatch")]
    BadMagic,

    /// Version is newer than this firmware or otherwise unknown
    #[error("unknown calibration version {version}")]
    UnknownVersion {
        /// Version found in the blob header
        version: u16,
    },

    /// The size field disagrees with the layout for that version
    #[error("calibration size {found} does not match expected {expected}")]
    SizeMismatch {
        /// Size the layout requires
        expected: u16,
        /// Size found in the blob header
        found: u16,
    },

    /// Stored CRC32 does not match the recomputed one
    #[error("calibration crc mismatch")]
    CrcMismatch,

    /// Underlying flash operation failed
    #[error("flash: {0}")]
    Flash(#[from] FlashError),
}

/// Calibration field accessor failures.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldError {
    /// Wire code does not name a known field
    #[error("unknown calibration field {code}")]
    UnknownField {
        /// Offending wire code
        code: u8,
    },

    /// Value rejected by the field's range check
    #[error("value outside the field's accepted range")]
    ValueOutOfRange,
}

/// Event frame decode failures.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireError {
    /// Event type byte does not name a known event
    #[error("unknown event kind {code:#04x}")]
    UnknownEventKind {
        /// Offending wire code
        code: u8,
    },

    /// Frame subtype byte is not an event frame
    #[error("frame subtype {subtype:#04x} is not an event frame")]
    NotAnEventFrame {
        /// Offending subtype byte
        subtype: u8,
    },
}

#[cfg(feature = "defmt")]
impl defmt::Format for FlashError {
    fn format(&self, fmt: defmt::Formatter) {
        match self {
            Self::Erase { addr } => defmt::write!(fmt, "erase failed at {=u32:#x}", addr),
            Self::Program { addr } => defmt::write!(fmt, "program failed at {=u32:#x}", addr),
            Self::OutOfBounds { addr } => defmt::write!(fmt, "address {=u32:#x} out of bounds", addr),
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for CalibError {
    fn format(&self, fmt: defmt::Formatter) {
        match self {
            Self::BadMagic => defmt::write!(fmt, "calibration magic mismatch"),
            Self::UnknownVersion { version } => {
                defmt::write!(fmt, "unknown calibration version {=u16}", version)
            }
            Self::SizeMismatch { expected, found } => {
                defmt::write!(fmt, "calibration size {=u16}, expected {=u16}", found, expected)
            }
            Self::CrcMismatch => defmt::write!(fmt, "calibration crc mismatch"),
            Self::Flash(e) => defmt::write!(fmt, "{}", e),
        }
    }
}
