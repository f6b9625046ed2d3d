//! Bootloader command surface
//!
//! One CAN frame in, one or two frames out. The decode step is
//! explicit and total: every byte pattern either parses into a
//! [`Command`] or fails with a typed [`CommandError`] — there is no
//! silent defaulting. The single deliberate exception, carried over
//! from the shipped protocol, is that *unknown* opcodes answer a
//! generic error frame with detail byte 0xFF instead of being dropped.
//!
//! The handler owns the transfer state machine and the boot-control
//! flags, and never touches the transport: responses come back as
//! frame data for the outer loop to send.
//!
//! ## Frame formats
//!
//! Status: `[status, extra, 0, 0, 0, 0, 0, 0]`
//!
//! CHECK answers with two info frames instead of a bare status:
//! summary `[OK, 0x20, valid, updating, size:u32 LE]` and
//! crc `[OK, 0x21, crc:u32 LE, device_id, proto]`.
//!
//! PING answers a status frame plus
//! `['P','O','N','G', device_id, proto, stay, 0xA5]`.

use heapless::Vec;
use thiserror_no_std::Error;

use sectorsense_core::flash::Flash;

use crate::layout::{is_valid_ram_address, APP_END, APP_START, PROTO_VERSION};
use crate::meta::is_app_valid;
use crate::transfer::{FlashOp, Transfer, TransferError};

/// Info-frame subtype: CHECK summary.
pub const FRAME_CHECK_SUMMARY: u8 = 0x20;
/// Info-frame subtype: CHECK image CRC.
pub const FRAME_CHECK_CRC: u8 = 0x21;

/// PING payload byte requesting the bootloader not auto-jump.
const STAY_REQUEST_BYTE: u8 = 0x42;

/// Bootloader status codes as they appear on the wire.
///
/// Not the application's status enum: code 4 means CRC mismatch here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    /// Command completed
    Ok = 0,
    /// Unspecified failure; the extra byte narrows it down
    Generic = 1,
    /// Size or parameter out of range
    Range = 2,
    /// Command not valid in the current state
    State = 3,
    /// CRC or length mismatch at END
    Crc = 4,
}

impl Status {
    /// Wire representation.
    pub const fn code(self) -> u8 {
        self as u8
    }
}

/// Reasons the jump to the application was refused or failed.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BootError {
    /// Metadata or image CRC check failed
    #[error("no valid application image")]
    AppInvalid = 0xE1,
    /// Vector table reads as erased flash
    #[error("vector table is erased")]
    VectorEmpty = 0xE2,
    /// Initial stack pointer is not 4-byte aligned
    #[error("initial stack pointer unaligned")]
    StackAlign = 0xE3,
    /// Initial stack pointer outside every RAM window
    #[error("initial stack pointer outside ram")]
    StackRange = 0xE4,
    /// Reset vector missing the thumb bit or outside the app region
    #[error("entry address out of range")]
    EntryRange = 0xE5,
    /// The application returned control to the bootloader
    #[error("application returned")]
    Returned = 0xE6,
}

impl BootError {
    /// Wire code reported by BOOT_STATUS.
    pub const fn code(self) -> u8 {
        self as u8
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for BootError {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "boot error {=u8}", self.code());
    }
}

/// Decoded command frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    /// Liveness probe; optionally requests staying in the bootloader.
    Ping {
        /// True when the payload carries the stay-request byte.
        stay_request: bool,
    },
    /// Report image validity, size and CRC.
    Check,
    /// Open a transfer for an image of the given size.
    Start {
        /// Announced image size in bytes.
        size: u32,
    },
    /// One chunk of image bytes.
    Data {
        /// Chunk payload (the bytes after the opcode).
        chunk: &'a [u8],
    },
    /// Close the transfer, verifying against the host's CRC.
    End {
        /// CRC32 the host computed over the full image.
        crc32: u32,
    },
    /// Request the jump to the application.
    BootApp,
    /// Report the most recent boot error.
    BootStatus,
}

/// Command frame decode failures.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandError {
    /// Zero-length frame; produces no response at all
    #[error("empty command frame")]
    Empty,
    /// Opcode byte not in the protocol
    #[error("unknown opcode {opcode:#04x}")]
    UnknownOpcode {
        /// Offending opcode byte
        opcode: u8,
    },
    /// Frame shorter than the opcode requires
    #[error("command frame truncated")]
    Truncated,
}

impl<'a> Command<'a> {
    /// Decode one command frame.
    pub fn decode(frame: &'a [u8]) -> Result<Self, CommandError> {
        let (&opcode, payload) = frame.split_first().ok_or(CommandError::Empty)?;
        match opcode {
            0x01 => Ok(Command::Ping {
                stay_request: payload.first() == Some(&STAY_REQUEST_BYTE),
            }),
            0x02 => Ok(Command::Check),
            0x10 => {
                if payload.len() < 4 {
                    return Err(CommandError::Truncated);
                }
                Ok(Command::Start {
                    size: u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]),
                })
            }
            0x20 => Ok(Command::Data { chunk: payload }),
            0x30 => {
                if payload.len() < 4 {
                    return Err(CommandError::Truncated);
                }
                Ok(Command::End {
                    crc32: u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]),
                })
            }
            0x40 => Ok(Command::BootApp),
            0x41 => Ok(Command::BootStatus),
            _ => Err(CommandError::UnknownOpcode { opcode }),
        }
    }
}

/// Response frames for one handled command (CHECK and PING send two).
pub type Responses = Vec<[u8; 8], 2>;

/// Initial stack pointer and entry address read from the vector table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootVector {
    /// Initial stack pointer (word 0 of the image).
    pub stack_ptr: u32,
    /// Reset handler address (word 1 of the image).
    pub entry: u32,
}

/// Validate the application image and its vector table before a jump.
///
/// The register handoff itself is hardware glue; everything checkable
/// without touching a register is checked here, in the order the wire
/// codes document.
pub fn preflight<F: Flash>(flash: &F) -> Result<BootVector, BootError> {
    if is_app_valid(flash).is_none() {
        return Err(BootError::AppInvalid);
    }

    let mut raw = [0u8; 8];
    if flash.read(APP_START, &mut raw).is_err() {
        return Err(BootError::AppInvalid);
    }
    let stack_ptr = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
    let entry = u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]);

    if stack_ptr == 0xFFFF_FFFF || entry == 0xFFFF_FFFF {
        return Err(BootError::VectorEmpty);
    }
    if stack_ptr & 0x3 != 0 {
        return Err(BootError::StackAlign);
    }
    if !is_valid_ram_address(stack_ptr) {
        return Err(BootError::StackRange);
    }
    if entry & 0x1 == 0 || entry < APP_START || entry >= APP_END {
        return Err(BootError::EntryRange);
    }

    Ok(BootVector { stack_ptr, entry })
}

/// Command handler: owns the transfer session and boot-control flags.
#[derive(Debug)]
pub struct Handler {
    device_id: u8,
    transfer: Transfer,
    stay_in_bootloader: bool,
    boot_requested: bool,
    last_boot_error: Option<BootError>,
}

impl Handler {
    /// Handler for a device with the given CAN device id.
    pub fn new(device_id: u8) -> Self {
        Self {
            device_id,
            transfer: Transfer::new(),
            stay_in_bootloader: false,
            boot_requested: false,
            last_boot_error: None,
        }
    }

    /// True once a PING requested staying in the bootloader.
    pub fn stay_in_bootloader(&self) -> bool {
        self.stay_in_bootloader
    }

    /// Force the stay flag (used when the application hands over with
    /// the stay magic set).
    pub fn force_stay_in_bootloader(&mut self) {
        self.stay_in_bootloader = true;
    }

    /// Consume a pending BOOT_APP request.
    pub fn take_boot_request(&mut self) -> bool {
        core::mem::take(&mut self.boot_requested)
    }

    /// Record the outcome of a jump attempt.
    pub fn set_last_boot_error(&mut self, error: Option<BootError>) {
        self.last_boot_error = error;
    }

    /// Most recent jump failure, if any.
    pub fn last_boot_error(&self) -> Option<BootError> {
        self.last_boot_error
    }

    /// Read access to the transfer session.
    pub fn transfer(&self) -> &Transfer {
        &self.transfer
    }

    /// Handle one received command frame.
    pub fn handle<F: Flash>(&mut self, flash: &mut F, frame: &[u8]) -> Responses {
        let mut responses = Responses::new();

        let command = match Command::decode(frame) {
            Ok(command) => command,
            Err(CommandError::Empty) => return responses,
            Err(CommandError::UnknownOpcode { .. }) => {
                push(&mut responses, status_frame(Status::Generic, 0xFF));
                return responses;
            }
            Err(CommandError::Truncated) => {
                push(&mut responses, status_frame(Status::Generic, 0));
                return responses;
            }
        };

        match command {
            Command::Ping { stay_request } => {
                if stay_request {
                    self.stay_in_bootloader = true;
                }
                push(&mut responses, status_frame(Status::Ok, 0x01));
                push(&mut responses, self.pong_frame());
            }
            Command::Check => {
                let (summary, crc) = self.check_frames(flash);
                push(&mut responses, summary);
                push(&mut responses, crc);
            }
            Command::Start { size } => {
                let frame = match self.transfer.start(flash, size) {
                    Ok(()) => status_frame(Status::Ok, 0),
                    Err(e) => error_frame(e),
                };
                push(&mut responses, frame);
            }
            Command::Data { chunk } => {
                let frame = match self.transfer.data(flash, chunk) {
                    Ok(_) => status_frame(Status::Ok, 0),
                    Err(e) => error_frame(e),
                };
                push(&mut responses, frame);
            }
            Command::End { crc32 } => {
                let frame = match self.transfer.end(flash, crc32, self.device_id) {
                    Ok(_) => status_frame(Status::Ok, 0),
                    Err(e) => error_frame(e),
                };
                push(&mut responses, frame);
            }
            Command::BootApp => {
                self.last_boot_error = None;
                self.boot_requested = true;
                push(&mut responses, status_frame(Status::Ok, 0x40));
            }
            Command::BootStatus => {
                let code = self.last_boot_error.map(BootError::code).unwrap_or(0);
                push(&mut responses, status_frame(Status::Ok, code));
            }
        }

        responses
    }

    /// Announcement frame sent once after reset:
    /// `['B','L','S','T', device_id, proto, flags, reset_cause]`.
    pub fn startup_frame<F: Flash>(&self, flash: &F, reset_cause: u8) -> [u8; 8] {
        let mut flags = 0u8;
        if is_app_valid(flash).is_some() {
            flags |= 1 << 0;
        }
        if self.stay_in_bootloader {
            flags |= 1 << 2;
        }
        [
            b'B',
            b'L',
            b'S',
            b'T',
            self.device_id,
            PROTO_VERSION,
            flags,
            reset_cause,
        ]
    }

    fn pong_frame(&self) -> [u8; 8] {
        [
            b'P',
            b'O',
            b'N',
            b'G',
            self.device_id,
            PROTO_VERSION,
            self.stay_in_bootloader as u8,
            0xA5,
        ]
    }

    fn check_frames<F: Flash>(&self, flash: &F) -> ([u8; 8], [u8; 8]) {
        let meta = is_app_valid(flash);
        let valid = meta.is_some() as u8;
        let size = meta.map(|m| m.size).unwrap_or(0);
        let crc = meta.map(|m| m.crc32).unwrap_or(0);

        let size_bytes = size.to_le_bytes();
        let summary = [
            Status::Ok.code(),
            FRAME_CHECK_SUMMARY,
            valid,
            self.transfer.is_updating() as u8,
            size_bytes[0],
            size_bytes[1],
            size_bytes[2],
            size_bytes[3],
        ];

        let crc_bytes = crc.to_le_bytes();
        let crc_frame = [
            Status::Ok.code(),
            FRAME_CHECK_CRC,
            crc_bytes[0],
            crc_bytes[1],
            crc_bytes[2],
            crc_bytes[3],
            self.device_id,
            PROTO_VERSION,
        ];

        (summary, crc_frame)
    }
}

fn status_frame(status: Status, extra: u8) -> [u8; 8] {
    [status.code(), extra, 0, 0, 0, 0, 0, 0]
}

/// Map a transfer error to its wire status frame. The extra byte on
/// generic errors narrows down which flash operation failed.
fn error_frame(error: TransferError) -> [u8; 8] {
    match error {
        TransferError::Range => status_frame(Status::Range, 0),
        TransferError::State => status_frame(Status::State, 0),
        TransferError::Crc => status_frame(Status::Crc, 0),
        TransferError::Flash { op: FlashOp::Erase, .. } => status_frame(Status::Generic, 1),
        TransferError::Flash { op: FlashOp::Program, .. } => status_frame(Status::Generic, 2),
        TransferError::Flash { op: FlashOp::Commit, .. } => status_frame(Status::Generic, 3),
    }
}

fn push(responses: &mut Responses, frame: [u8; 8]) {
    // Capacity is sized to the largest responder (two frames).
    responses.push(frame).ok();
}
