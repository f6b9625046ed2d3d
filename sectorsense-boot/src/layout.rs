//! Flash map and protocol constants
//!
//! The layout is bit-exact with what ships in the field:
//!
//! ```text
//! 0x0800_0000 ┌──────────────────┐
//!             │ bootloader 16 K  │
//! 0x0800_4000 ├──────────────────┤
//!             │                  │
//!             │ application      │
//!             │                  │
//! 0x0801_F000 ├──────────────────┤
//!             │ calibration page │  (owned by the application)
//! 0x0801_F800 ├──────────────────┤
//!             │ metadata page    │  (owned by the bootloader)
//! 0x0802_0000 └──────────────────┘
//! ```

pub use sectorsense_core::flash::{FLASH_BASE, FLASH_TOTAL_SIZE, PAGE_SIZE};

/// Size of the bootloader region at the start of flash.
pub const BOOTLOADER_SIZE: u32 = 16 * 1024;

/// First address of the application image.
pub const APP_START: u32 = FLASH_BASE + BOOTLOADER_SIZE;

/// Address of the image metadata page (last flash page).
pub const META_ADDR: u32 = FLASH_BASE + FLASH_TOTAL_SIZE - PAGE_SIZE;

/// First address past the application region.
pub const APP_END: u32 = META_ADDR;

/// Largest acceptable application image.
pub const APP_MAX_SIZE: u32 = APP_END - APP_START;

/// Magic marking a committed image metadata record.
pub const META_MAGIC: u32 = 0xB007_10AD;

/// Update protocol version reported in PONG/startup frames.
pub const PROTO_VERSION: u8 = 2;

// The metadata's reserved word doubles as a device-id carrier: a fixed
// tag in the upper bytes, the id in the low byte.
const DEVICE_ID_TAG: u32 = 0xA5D1_0000;
const DEVICE_ID_TAG_MASK: u32 = 0xFFFF_FF00;
const DEVICE_ID_MASK: u32 = 0x0000_00FF;

/// Pack a device id into a metadata reserved word.
pub const fn encode_device_id(id: u8) -> u32 {
    DEVICE_ID_TAG | (id as u32 & DEVICE_ID_MASK)
}

/// True when a reserved word carries a device id.
pub const fn has_device_id(reserved: u32) -> bool {
    reserved & DEVICE_ID_TAG_MASK == DEVICE_ID_TAG
}

/// Extract the device id from a reserved word.
pub const fn device_id(reserved: u32) -> u8 {
    (reserved & DEVICE_ID_MASK) as u8
}

/// RAM windows an application stack pointer may legally point into.
///
/// SRAM1 and SRAM2 of the target part; the end addresses are inclusive
/// because an initial SP of "one past the top" is the common case.
pub const RAM_RANGES: [(u32, u32); 2] = [
    (0x2000_0000, 0x2000_C000), // SRAM1, 48 K
    (0x1000_0000, 0x1000_4000), // SRAM2, 16 K
];

/// True when `addr` is a plausible initial stack pointer.
pub fn is_valid_ram_address(addr: u32) -> bool {
    RAM_RANGES
        .iter()
        .any(|&(start, end)| addr >= start && addr <= end)
}
