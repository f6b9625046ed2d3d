//! Flash abstraction shared by the application and the bootloader
//!
//! ## Hardware contract
//!
//! The device's flash technology imposes two granularities the whole
//! persistence design bends around:
//!
//! - **Erase** works on whole 2 KiB pages and sets every byte to 0xFF.
//! - **Program** works on aligned 8-byte double words, once per erase.
//!
//! Everything above this seam — the calibration codec, the bootloader's
//! staging buffer, the metadata commit — expresses its writes as padded
//! double words. The [`Flash`] trait captures exactly that contract and
//! nothing more; register-level unlock/lock sequencing lives in the
//! hardware layer outside this crate.
//!
//! [`MemFlash`] is an array-backed implementation for host-side tests
//! and simulation, with a program-failure injection knob so the error
//! paths can be exercised without hardware.

use crate::errors::FlashError;

/// Flash page size in bytes (erase granularity).
pub const PAGE_SIZE: u32 = 0x800;

/// First address of the device flash region.
pub const FLASH_BASE: u32 = 0x0800_0000;

/// Total flash size in bytes.
pub const FLASH_TOTAL_SIZE: u32 = 0x0002_0000;

/// Address of the calibration record page (second-to-last page).
pub const CALIB_ADDR: u32 = 0x0801_F000;

/// Page-erase / double-word-program flash device.
pub trait Flash {
    /// Erase `len` bytes starting at `addr`. Both must be page-aligned.
    fn erase(&mut self, addr: u32, len: u32) -> Result<(), FlashError>;

    /// Program one aligned double word.
    fn program_dword(&mut self, addr: u32, bytes: [u8; 8]) -> Result<(), FlashError>;

    /// Read `out.len()` bytes starting at `addr`.
    fn read(&self, addr: u32, out: &mut [u8]) -> Result<(), FlashError>;
}

/// Program an arbitrary byte run as consecutive double words, padding
/// the final partial word with 0xFF (the erased value).
pub fn program_bytes<F: Flash>(flash: &mut F, mut addr: u32, data: &[u8]) -> Result<(), FlashError> {
    for chunk in data.chunks(8) {
        let mut dword = [0xFFu8; 8];
        dword[..chunk.len()].copy_from_slice(chunk);
        flash.program_dword(addr, dword)?;
        addr += 8;
    }
    Ok(())
}

/// Array-backed flash simulator.
///
/// Starts fully erased. Writes overwrite unconditionally — wear and
/// program-without-erase faults are not modelled, only the failure
/// *paths* via [`MemFlash::fail_program_at`].
pub struct MemFlash<const SIZE: usize> {
    mem: [u8; SIZE],
    base: u32,
    fail_program_at: Option<u32>,
}

impl<const SIZE: usize> MemFlash<SIZE> {
    /// Fully erased device mapped at [`FLASH_BASE`].
    pub fn new() -> Self {
        Self {
            mem: [0xFF; SIZE],
            base: FLASH_BASE,
            fail_program_at: None,
        }
    }

    /// Make the next program of the double word at `addr` fail.
    pub fn fail_program_at(&mut self, addr: u32) {
        self.fail_program_at = Some(addr);
    }

    /// Raw view of the simulated contents, for assertions.
    pub fn contents(&self) -> &[u8] {
        &self.mem
    }

    fn offset(&self, addr: u32, len: usize) -> Result<usize, FlashError> {
        let off = addr.wrapping_sub(self.base) as usize;
        if addr < self.base || off.saturating_add(len) > SIZE {
            return Err(FlashError::OutOfBounds { addr });
        }
        Ok(off)
    }
}

impl<const SIZE: usize> Default for MemFlash<SIZE> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const SIZE: usize> Flash for MemFlash<SIZE> {
    fn erase(&mut self, addr: u32, len: u32) -> Result<(), FlashError> {
        let off = self.offset(addr, len as usize)?;
        self.mem[off..off + len as usize].fill(0xFF);
        Ok(())
    }

    fn program_dword(&mut self, addr: u32, bytes: [u8; 8]) -> Result<(), FlashError> {
        if self.fail_program_at == Some(addr) {
            self.fail_program_at = None;
            return Err(FlashError::Program { addr });
        }
        let off = self.offset(addr, 8)?;
        self.mem[off..off + 8].copy_from_slice(&bytes);
        Ok(())
    }

    fn read(&self, addr: u32, out: &mut [u8]) -> Result<(), FlashError> {
        let off = self.offset(addr, out.len())?;
        out.copy_from_slice(&self.mem[off..off + out.len()]);
        Ok(())
    }
}
