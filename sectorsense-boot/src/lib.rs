//! Bootloader update core for SectorSense
//!
//! The bootloader is its own binary, sharing the flash seam and CRC
//! utilities with the application core but nothing else. This crate
//! holds the hard parts: the chunked firmware transfer state machine
//! (START → DATA* → END), the double-word flash staging buffer, the
//! image metadata commit, and the boot-time validity checks that gate
//! the jump to the application.
//!
//! The update protocol has no resume: any error aborts the whole
//! transfer, and the next START re-erases the application region and
//! begins fresh. Metadata is written exactly once, after the full image
//! has been received and its CRC verified — it is the sole commit point
//! that makes a new image trusted.
//!
//! ```
//! use sectorsense_boot::{layout, Handler};
//! use sectorsense_core::flash::MemFlash;
//!
//! let mut flash = MemFlash::<{ layout::FLASH_TOTAL_SIZE as usize }>::new();
//! let mut handler = Handler::new(0x05);
//!
//! // One CAN command frame in, one or two response frames out.
//! let responses = handler.handle(&mut flash, &[0x01]); // PING
//! assert_eq!(responses.len(), 2);
//! ```

#![cfg_attr(not(feature = "std"), no_std)]
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod commands;
pub mod layout;
pub mod meta;
pub mod staging;
pub mod transfer;

// Public API
pub use commands::{BootError, Command, CommandError, Handler, Responses, Status};
pub use meta::ImageMeta;
pub use staging::Staging;
pub use transfer::{Transfer, TransferError};

/// Crate version string, for host tooling.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
