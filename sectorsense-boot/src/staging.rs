//! Double-word staging buffer for chunked flash writes
//!
//! The wire delivers arbitrary chunk sizes (typically 7 bytes per CAN
//! frame after the opcode), while the flash programs only aligned
//! 8-byte double words. This accumulator sits between the two: bytes
//! pile up in a pending buffer, and every time it reaches 8 the word is
//! programmed and the cursor advances.
//!
//! Invariant: the pending buffer never holds 8 bytes between calls —
//! it is flushed the instant it fills. [`Staging::flush_tail`] closes
//! out a transfer by padding the remainder with 0xFF, the erased value,
//! so unwritten trailing bytes read back as erased flash.

use heapless::Vec;

use sectorsense_core::errors::FlashError;
use sectorsense_core::flash::Flash;

/// Write cursor plus pending sub-word bytes.
#[derive(Debug, Clone)]
pub struct Staging {
    addr: u32,
    pending: Vec<u8, 8>,
}

impl Staging {
    /// Staging buffer with its cursor at `addr`.
    pub fn new(addr: u32) -> Self {
        Self {
            addr,
            pending: Vec::new(),
        }
    }

    /// Drop pending bytes and move the cursor to `addr`.
    pub fn reset(&mut self, addr: u32) {
        self.addr = addr;
        self.pending.clear();
    }

    /// Next address a full double word would be programmed to.
    pub fn addr(&self) -> u32 {
        self.addr
    }

    /// Bytes waiting for the word to fill (always < 8).
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Append bytes, programming a double word each time 8 accumulate.
    pub fn push_bytes<F: Flash>(&mut self, flash: &mut F, data: &[u8]) -> Result<(), FlashError> {
        for &byte in data {
            // Cannot overflow: the buffer is flushed the moment it fills.
            self.pending.push(byte).ok();
            if self.pending.is_full() {
                let mut dword = [0xFFu8; 8];
                dword.copy_from_slice(&self.pending);
                flash.program_dword(self.addr, dword)?;
                self.addr += 8;
                self.pending.clear();
            }
        }
        Ok(())
    }

    /// Program any pending tail, padded to a full word with 0xFF.
    pub fn flush_tail<F: Flash>(&mut self, flash: &mut F) -> Result<(), FlashError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let mut dword = [0xFFu8; 8];
        dword[..self.pending.len()].copy_from_slice(&self.pending);
        flash.program_dword(self.addr, dword)?;
        self.addr += 8;
        self.pending.clear();
        Ok(())
    }
}
