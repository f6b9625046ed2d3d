//! Application firmware core for SectorSense
//!
//! Converts raw magnetometer samples into semantic "sector" events: a
//! rotating object passing through angular zones around a calibrated
//! center. The crate holds the geometry transform, the sector state
//! machine, the bounded event queue, and the versioned calibration
//! record codec the firmware persists to flash.
//!
//! Key constraints:
//! - Runs from a single-threaded main loop (no ISR-shared state)
//! - No heap allocation in the sample path
//! - All flash access goes through the [`flash::Flash`] seam
//!
//! ```
//! use sectorsense_core::{Detector, MagSample};
//!
//! let mut detector = Detector::new(0);
//!
//! // One call per magnetometer sample; events come back in a bounded burst.
//! for event in detector.process_sample(MagSample::new(120, 40, 300), 10) {
//!     let _frame = event.to_frame();
//! }
//! ```

#![cfg_attr(not(feature = "std"), no_std)]
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod buffer;
pub mod calibration;
pub mod crc;
pub mod detector;
pub mod errors;
pub mod events;
pub mod flash;
pub mod geometry;
pub mod pipeline;
pub mod queue;
pub mod time;

// Public API
pub use calibration::CalibrationRecord;
pub use detector::{Detector, DetectorConfig};
pub use errors::{CalibError, FieldError, FlashError, Status};
pub use events::{Event, EventKind};
pub use flash::Flash;
pub use geometry::MagSample;
pub use pipeline::Pipeline;
pub use queue::EventQueue;
pub use time::Timestamp;

/// Crate version string, for host tooling and status reports.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_exists() {
        assert!(!VERSION.is_empty());
    }
}
