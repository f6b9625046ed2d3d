//! Firmware transfer state machine
//!
//! ## Protocol
//!
//! ```text
//!          START(size)            DATA(bytes)*
//!   Idle ──────────────► Receiving ──────────┐
//!    ▲                       │ ◄─────────────┘
//!    │      END(crc) ok      │
//!    ├───────────────────────┤
//!    │   any error (abort)   │
//!    └───────────────────────┘
//! ```
//!
//! There is no resume and no cancel command: every error path drops
//! back to idle, and the only way forward is a fresh START, which
//! re-erases the application region. The session state lives entirely
//! in this struct — each command is one main-loop call, with nothing
//! held on the stack between them.
//!
//! ## Commit discipline
//!
//! Bytes stream into erased flash as they arrive, but the image only
//! becomes *trusted* when END verifies both the byte count and the
//! running CRC against the host's, flushes the staging tail, and writes
//! the metadata record. A flash failure before that point aborts the
//! session and leaves the metadata untouched, so a half-written image
//! is never bootable.

use thiserror_no_std::Error;

use sectorsense_core::crc::Crc32;
use sectorsense_core::errors::FlashError;
use sectorsense_core::flash::Flash;

use crate::layout::{encode_device_id, APP_END, APP_MAX_SIZE, APP_START, META_MAGIC};
use crate::meta::{write_meta, ImageMeta};
use crate::staging::Staging;

#[cfg(feature = "log")]
macro_rules! transfer_debug {
    ($($arg:tt)*) => { log::debug!($($arg)*) };
}
#[cfg(not(feature = "log"))]
macro_rules! transfer_debug {
    ($($arg:tt)*) => {{}};
}

/// Which flash operation a [`TransferError::Flash`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashOp {
    /// Erasing the application region during START
    Erase,
    /// Programming image bytes during DATA or the END tail flush
    Program,
    /// Writing the metadata record at the end of END
    Commit,
}

/// Transfer protocol failures.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferError {
    /// Image size of zero or past the application region
    #[error("image size outside the accepted range")]
    Range,

    /// Command arrived outside the Receiving state
    #[error("command not valid in the current transfer state")]
    State,

    /// Host CRC or byte count disagrees with what was received
    #[error("crc or length mismatch at end of transfer")]
    Crc,

    /// Underlying flash operation failed; the transfer is aborted
    #[error("flash {op:?} failed: {source}")]
    Flash {
        /// Failed operation, for status-frame detail codes
        op: FlashOp,
        /// The flash layer's error
        source: FlashError,
    },
}

#[cfg(feature = "defmt")]
impl defmt::Format for TransferError {
    fn format(&self, fmt: defmt::Formatter) {
        match self {
            Self::Range => defmt::write!(fmt, "size out of range"),
            Self::State => defmt::write!(fmt, "bad transfer state"),
            Self::Crc => defmt::write!(fmt, "crc/length mismatch"),
            Self::Flash { source, .. } => defmt::write!(fmt, "flash: {}", source),
        }
    }
}

/// The update session. `Idle` and `Receiving` are the only states;
/// `updating == true` means Receiving.
#[derive(Debug, Clone)]
pub struct Transfer {
    updating: bool,
    expected_size: u32,
    received: u32,
    crc: Crc32,
    staging: Staging,
}

impl Transfer {
    /// Idle transfer.
    pub fn new() -> Self {
        Self {
            updating: false,
            expected_size: 0,
            received: 0,
            crc: Crc32::new(),
            staging: Staging::new(APP_START),
        }
    }

    /// True while a transfer session is open.
    pub fn is_updating(&self) -> bool {
        self.updating
    }

    /// Image size announced by START, 0 when idle.
    pub fn expected_size(&self) -> u32 {
        self.expected_size
    }

    /// Bytes accepted so far this session.
    pub fn received_bytes(&self) -> u32 {
        self.received
    }

    /// START: validate the announced size, erase the application
    /// region, and open a fresh session.
    ///
    /// Validation comes first — a bad size performs no erase and leaves
    /// any existing image untouched.
    pub fn start<F: Flash>(&mut self, flash: &mut F, size: u32) -> Result<(), TransferError> {
        if size == 0 || size > APP_MAX_SIZE {
            return Err(TransferError::Range);
        }

        flash
            .erase(APP_START, APP_END - APP_START)
            .map_err(|source| TransferError::Flash { op: FlashOp::Erase, source })?;

        self.updating = true;
        self.expected_size = size;
        self.received = 0;
        self.staging.reset(APP_START);
        self.crc.reset();

        transfer_debug!("transfer started, expecting {} bytes", size);
        Ok(())
    }

    /// DATA: accept the next chunk.
    ///
    /// A chunk overshooting the announced size is truncated to the
    /// remaining capacity — the tail of an oversized final chunk is
    /// silently discarded. Only a chunk arriving with *zero* capacity
    /// left is a range error. The CRC runs over the accepted input
    /// bytes, not the padded words that reach flash.
    ///
    /// Returns the number of bytes accepted.
    pub fn data<F: Flash>(&mut self, flash: &mut F, chunk: &[u8]) -> Result<u32, TransferError> {
        if !self.updating {
            return Err(TransferError::State);
        }
        if self.received >= self.expected_size {
            return Err(TransferError::Range);
        }

        let remaining = (self.expected_size - self.received) as usize;
        let accepted = chunk.len().min(remaining);

        if let Err(source) = self.staging.push_bytes(flash, &chunk[..accepted]) {
            // Flash failure is fatal for this session; a fresh START
            // re-erases and retries.
            self.updating = false;
            transfer_debug!("transfer aborted by flash failure: {:?}", source);
            return Err(TransferError::Flash { op: FlashOp::Program, source });
        }

        self.crc.update(&chunk[..accepted]);
        self.received += accepted as u32;
        Ok(accepted as u32)
    }

    /// END: verify and commit.
    ///
    /// The Receiving state clears before any check runs — a failed END
    /// never leaves a stale session behind. Both the byte count and the
    /// CRC must match; on success the staging tail is flushed and the
    /// metadata record is written as the single commit point.
    pub fn end<F: Flash>(
        &mut self,
        flash: &mut F,
        host_crc: u32,
        device_id: u8,
    ) -> Result<ImageMeta, TransferError> {
        if !self.updating {
            return Err(TransferError::State);
        }
        self.updating = false;

        let device_crc = self.crc.value();
        if host_crc != device_crc || self.received != self.expected_size {
            transfer_debug!(
                "transfer rejected: host crc {:#010x}, device crc {:#010x}, {}/{} bytes",
                host_crc,
                device_crc,
                self.received,
                self.expected_size
            );
            return Err(TransferError::Crc);
        }

        self.staging
            .flush_tail(flash)
            .map_err(|source| TransferError::Flash { op: FlashOp::Program, source })?;

        let meta = ImageMeta {
            magic: META_MAGIC,
            size: self.received,
            crc32: device_crc,
            reserved: encode_device_id(device_id),
        };
        write_meta(flash, &meta)
            .map_err(|source| TransferError::Flash { op: FlashOp::Commit, source })?;

        transfer_debug!("image committed: {} bytes, crc {:#010x}", meta.size, meta.crc32);
        Ok(meta)
    }
}

impl Default for Transfer {
    fn default() -> Self {
        Self::new()
    }
}
