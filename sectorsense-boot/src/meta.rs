//! Image metadata record and validity check
//!
//! One 16-byte record in the last flash page is the single source of
//! truth for "is there a valid application image". It is written only
//! by [`write_meta`], and only after a transfer has fully verified —
//! see the transfer state machine.
//!
//! Trust requires all three checks to pass: the magic, the size bounds,
//! and a *full* CRC32 recomputation over the image bytes. The CRC is
//! never cached — the check runs once per boot, not per frame, and a
//! partially written image must not slip through on a stale record.

use sectorsense_core::crc::Crc32;
use sectorsense_core::errors::FlashError;
use sectorsense_core::flash::{program_bytes, Flash};

use crate::layout::{APP_MAX_SIZE, APP_START, META_ADDR, META_MAGIC, PAGE_SIZE};

/// Committed image metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageMeta {
    /// [`META_MAGIC`] when the record is real.
    pub magic: u32,
    /// Image length in bytes.
    pub size: u32,
    /// CRC32 (MSB-first variant) over the image bytes.
    pub crc32: u32,
    /// Tagged device id, see [`crate::layout::encode_device_id`].
    pub reserved: u32,
}

impl ImageMeta {
    /// Record length on flash.
    pub const LEN: usize = 16;

    /// Serialize as four little-endian words.
    pub fn encode(&self) -> [u8; Self::LEN] {
        let mut out = [0u8; Self::LEN];
        out[0..4].copy_from_slice(&self.magic.to_le_bytes());
        out[4..8].copy_from_slice(&self.size.to_le_bytes());
        out[8..12].copy_from_slice(&self.crc32.to_le_bytes());
        out[12..16].copy_from_slice(&self.reserved.to_le_bytes());
        out
    }

    /// Deserialize from the on-flash byte layout.
    pub fn decode(raw: &[u8; Self::LEN]) -> Self {
        let word = |i: usize| u32::from_le_bytes([raw[i], raw[i + 1], raw[i + 2], raw[i + 3]]);
        Self {
            magic: word(0),
            size: word(4),
            crc32: word(8),
            reserved: word(12),
        }
    }
}

/// Read the metadata record from its page.
pub fn read_meta<F: Flash>(flash: &F) -> Result<ImageMeta, FlashError> {
    let mut raw = [0u8; ImageMeta::LEN];
    flash.read(META_ADDR, &mut raw)?;
    Ok(ImageMeta::decode(&raw))
}

/// Commit a metadata record: erase the metadata page, program the
/// record. This is the transfer's single commit point.
pub fn write_meta<F: Flash>(flash: &mut F, meta: &ImageMeta) -> Result<(), FlashError> {
    flash.erase(META_ADDR, PAGE_SIZE)?;
    program_bytes(flash, META_ADDR, &meta.encode())
}

/// Recompute the CRC32 over `[APP_START, APP_START + size)`.
pub fn compute_app_crc<F: Flash>(flash: &F, size: u32) -> Result<u32, FlashError> {
    let mut crc = Crc32::new();
    let mut buf = [0u8; 64];
    let mut addr = APP_START;
    let mut remaining = size;
    while remaining > 0 {
        let chunk = remaining.min(buf.len() as u32) as usize;
        flash.read(addr, &mut buf[..chunk])?;
        crc.update(&buf[..chunk]);
        addr += chunk as u32;
        remaining -= chunk as u32;
    }
    Ok(crc.value())
}

/// Full validity check: magic, size bounds, recomputed CRC.
///
/// Returns the metadata when the image is trustworthy, `None`
/// otherwise. An unreadable record counts as "no valid image".
pub fn is_app_valid<F: Flash>(flash: &F) -> Option<ImageMeta> {
    let meta = read_meta(flash).ok()?;
    if meta.magic != META_MAGIC {
        return None;
    }
    if meta.size == 0 || meta.size > APP_MAX_SIZE {
        return None;
    }
    match compute_app_crc(flash, meta.size) {
        Ok(crc) if crc == meta.crc32 => Some(meta),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{encode_device_id, FLASH_TOTAL_SIZE};
    use sectorsense_core::flash::MemFlash;

    type DeviceFlash = MemFlash<{ FLASH_TOTAL_SIZE as usize }>;

    fn meta_for(image: &[u8]) -> ImageMeta {
        ImageMeta {
            magic: META_MAGIC,
            size: image.len() as u32,
            crc32: Crc32::compute(image),
            reserved: encode_device_id(0x05),
        }
    }

    #[test]
    fn encode_decode_round_trip() {
        let meta = ImageMeta {
            magic: META_MAGIC,
            size: 0x1234,
            crc32: 0xDEAD_BEEF,
            reserved: encode_device_id(0x7F),
        };
        assert_eq!(ImageMeta::decode(&meta.encode()), meta);
    }

    #[test]
    fn blank_flash_has_no_valid_app() {
        let flash = DeviceFlash::new();
        assert!(is_app_valid(&flash).is_none());
    }

    #[test]
    fn committed_image_validates() {
        let mut flash = DeviceFlash::new();
        let image = [0x42u8; 100];
        program_bytes(&mut flash, APP_START, &image).unwrap();
        write_meta(&mut flash, &meta_for(&image)).unwrap();

        let meta = is_app_valid(&flash).expect("image should validate");
        assert_eq!(meta.size, 100);
    }

    #[test]
    fn corrupted_image_fails_the_crc_recomputation() {
        let mut flash = DeviceFlash::new();
        let image = [0x42u8; 100];
        program_bytes(&mut flash, APP_START, &image).unwrap();
        write_meta(&mut flash, &meta_for(&image)).unwrap();

        // Flip one image word after the commit; the stored CRC is now a
        // lie and the full recomputation must catch it.
        flash.erase(APP_START, PAGE_SIZE).unwrap();
        assert!(is_app_valid(&flash).is_none());
    }

    #[test]
    fn oversized_or_zero_size_is_untrusted() {
        let mut flash = DeviceFlash::new();
        let mut meta = meta_for(&[1, 2, 3]);
        meta.size = 0;
        write_meta(&mut flash, &meta).unwrap();
        assert!(is_app_valid(&flash).is_none());

        meta.size = APP_MAX_SIZE + 1;
        write_meta(&mut flash, &meta).unwrap();
        assert!(is_app_valid(&flash).is_none());
    }
}
