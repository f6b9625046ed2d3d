//! Versioned calibration record codec
//!
//! ## On-flash format
//!
//! One flash page holds a single blob:
//!
//! ```text
//! ┌────────┬─────────┬──────┬───────────────┬───────┐
//! │ magic  │ version │ size │    payload    │ crc32 │
//! │ u32 LE │ u16 LE  │ u16  │  42/46/51 B   │ u32   │
//! └────────┴─────────┴──────┴───────────────┴───────┘
//!           └────────── crc32 span ─────────┘
//! ```
//!
//! The CRC (reflected IEEE variant) covers version, size and payload —
//! not the magic, not itself. The payload layout grew as a strict
//! superset across versions: v2 added the magnetometer config bytes,
//! v3 added the sector count and the elevation shaping fields.
//!
//! ## Migration policy
//!
//! `load` accepts any known version. Old payloads are decoded
//! field-by-field into the current structure; fields a version lacks
//! get their compiled-in defaults. Nothing is rewritten on flash at
//! load time — the persisted copy upgrades only when the next explicit
//! `save` writes the current layout. The sector count is sanitized
//! after every load, whatever the source version.
//!
//! Decoding is explicit little-endian with the length verified up
//! front; the stored bytes are never reinterpreted as a struct overlay.

use crate::crc::crc32_ieee;
use crate::detector::sanitize_sector_count;
use crate::errors::{CalibError, FieldError};
use crate::flash::{program_bytes, Flash, CALIB_ADDR, PAGE_SIZE};

#[cfg(feature = "log")]
macro_rules! codec_warn {
    ($($arg:tt)*) => { log::warn!($($arg)*) };
}
#[cfg(not(feature = "log"))]
macro_rules! codec_warn {
    ($($arg:tt)*) => {{}};
}

/// Blob magic value.
pub const CALIB_MAGIC: u32 = 0x4341_4C42;

/// Current (newest) payload version.
pub const CALIB_VERSION: u16 = 3;

/// Longest interval the stream configuration accepts, ms.
pub const MAX_STREAM_INTERVAL_MS: u16 = 60_000;

const HEADER_LEN: usize = 8;
const V1_PAYLOAD_LEN: usize = 42;
const V2_PAYLOAD_LEN: usize = 46;
const V3_PAYLOAD_LEN: usize = 51;

/// Size of the current-version blob on flash.
pub const BLOB_LEN: usize = HEADER_LEN + V3_PAYLOAD_LEN + 4;

/// Default transmit interval for magnetometer stream frames, ms.
pub const DEFAULT_INTERVAL_MAG_MS: u16 = 200;
/// Default transmit interval for accelerometer stream frames, ms.
pub const DEFAULT_INTERVAL_ACC_MS: u16 = 200;
/// Default transmit interval for environmental stream frames, ms.
pub const DEFAULT_INTERVAL_ENV_MS: u16 = 1000;
/// Default transmit interval for event frames, ms.
pub const DEFAULT_INTERVAL_EVT_MS: u16 = 250;

/// The calibration record, current layout.
///
/// Geometry fields are fixed-point on purpose — the record travels over
/// a CAN command surface that deals in i16 values. The detector scales
/// them into floats when a calibration applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CalibrationRecord {
    /// Center offset x, milligauss.
    pub center_x_mg: i16,
    /// Center offset y, milligauss.
    pub center_y_mg: i16,
    /// Center offset z, milligauss.
    pub center_z_mg: i16,
    /// XY-plane rotation, centidegrees.
    pub rotate_xy_cdeg: i16,
    /// XZ-plane rotation, centidegrees.
    pub rotate_xz_cdeg: i16,
    /// YZ-plane rotation, centidegrees.
    pub rotate_yz_cdeg: i16,
    /// Keepout radius, milligauss.
    pub keepout_rad_mg: u16,
    /// Z limit, milligauss.
    pub z_limit_mg: i16,
    /// Data radius, milligauss.
    pub data_radius_mg: u16,
    /// Hard-iron offset x, milligauss.
    pub mag_offset_x: i16,
    /// Hard-iron offset y, milligauss.
    pub mag_offset_y: i16,
    /// Hard-iron offset z, milligauss.
    pub mag_offset_z: i16,
    /// Captured Earth field x, milligauss.
    pub earth_x_mg: i16,
    /// Captured Earth field y, milligauss.
    pub earth_y_mg: i16,
    /// Captured Earth field z, milligauss.
    pub earth_z_mg: i16,
    /// True once an Earth field capture has been stored.
    pub earth_valid: bool,
    /// Stream enable bits (mag/acc/env/event), low nibble.
    pub stream_enable_mask: u8,
    /// Magnetometer stream interval, ms.
    pub interval_mag_ms: u16,
    /// Accelerometer stream interval, ms.
    pub interval_acc_ms: u16,
    /// Environmental stream interval, ms.
    pub interval_env_ms: u16,
    /// Event stream interval, ms.
    pub interval_event_ms: u16,
    /// Number of angular sectors, 1..=16. Added in v3.
    pub num_sectors: u8,
    /// Magnetometer range register value.
    pub mag_range: u8,
    /// Magnetometer data-rate register value.
    pub mag_data_rate: u8,
    /// Magnetometer sample-averaging register value.
    pub mag_samples: u8,
    /// Magnetometer mode register value.
    pub mag_mode: u8,
    /// Rotated z mapping to full elevation, milligauss. Added in v3.
    pub z_max_mg: i16,
    /// Elevation curve exponent, hundredths. Added in v3.
    pub elev_curve_centi: u16,
    /// Reserved, kept for layout stability.
    pub reserved0: u16,
}

impl Default for CalibrationRecord {
    fn default() -> Self {
        Self {
            center_x_mg: 0,
            center_y_mg: 0,
            center_z_mg: 0,
            rotate_xy_cdeg: 0,
            rotate_xz_cdeg: 0,
            rotate_yz_cdeg: 0,
            keepout_rad_mg: 1000,
            z_limit_mg: 150,
            data_radius_mg: 3000,
            mag_offset_x: 0,
            mag_offset_y: 0,
            mag_offset_z: 0,
            earth_x_mg: 0,
            earth_y_mg: 0,
            earth_z_mg: 0,
            earth_valid: false,
            stream_enable_mask: 0x0F,
            interval_mag_ms: DEFAULT_INTERVAL_MAG_MS,
            interval_acc_ms: DEFAULT_INTERVAL_ACC_MS,
            interval_env_ms: DEFAULT_INTERVAL_ENV_MS,
            interval_event_ms: DEFAULT_INTERVAL_EVT_MS,
            num_sectors: crate::detector::DEFAULT_SECTORS,
            mag_range: 7,     // 8.1 gauss full scale
            mag_data_rate: 6, // 75 Hz
            mag_samples: 0,   // single sample
            mag_mode: 0,      // continuous
            z_max_mg: 405,
            elev_curve_centi: 100,
            reserved0: 0,
        }
    }
}

/// Calibration field codes as used by the CAN command surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FieldId {
    /// Center offset x
    CenterX = 1,
    /// Center offset y
    CenterY = 2,
    /// Center offset z
    CenterZ = 3,
    /// XY-plane rotation
    RotateXy = 4,
    /// XZ-plane rotation
    RotateXz = 5,
    /// YZ-plane rotation
    RotateYz = 6,
    /// Keepout radius
    KeepoutRad = 7,
    /// Z limit
    ZLimit = 8,
    /// Data radius
    DataRadius = 9,
    /// Hard-iron offset x
    MagOffsetX = 10,
    /// Hard-iron offset y
    MagOffsetY = 11,
    /// Hard-iron offset z
    MagOffsetZ = 12,
    /// Earth field x
    EarthX = 13,
    /// Earth field y
    EarthY = 14,
    /// Earth field z
    EarthZ = 15,
    /// Earth capture valid flag
    EarthValid = 16,
    /// Sector count
    NumSectors = 17,
}

impl FieldId {
    /// Wire code for this field.
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Decode a wire code, failing explicitly on unknown values.
    pub fn from_wire(code: u8) -> Result<Self, FieldError> {
        Ok(match code {
            1 => Self::CenterX,
            2 => Self::CenterY,
            3 => Self::CenterZ,
            4 => Self::RotateXy,
            5 => Self::RotateXz,
            6 => Self::RotateYz,
            7 => Self::KeepoutRad,
            8 => Self::ZLimit,
            9 => Self::DataRadius,
            10 => Self::MagOffsetX,
            11 => Self::MagOffsetY,
            12 => Self::MagOffsetZ,
            13 => Self::EarthX,
            14 => Self::EarthY,
            15 => Self::EarthZ,
            16 => Self::EarthValid,
            17 => Self::NumSectors,
            _ => return Err(FieldError::UnknownField { code }),
        })
    }
}

/// Stream transmit configuration slice of the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfig {
    /// Magnetometer stream interval, ms.
    pub interval_mag_ms: u16,
    /// Accelerometer stream interval, ms.
    pub interval_acc_ms: u16,
    /// Environmental stream interval, ms.
    pub interval_env_ms: u16,
    /// Event stream interval, ms.
    pub interval_event_ms: u16,
    /// Stream enable bits, low nibble.
    pub enable_mask: u8,
}

/// Magnetometer register configuration slice of the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MagConfig {
    /// Range register value.
    pub range: u8,
    /// Data-rate register value.
    pub data_rate: u8,
    /// Sample-averaging register value.
    pub samples: u8,
    /// Mode register value.
    pub mode: u8,
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn u8(&mut self) -> u8 {
        let v = self.buf[self.pos];
        self.pos += 1;
        v
    }

    fn u16(&mut self) -> u16 {
        let v = u16::from_le_bytes([self.buf[self.pos], self.buf[self.pos + 1]]);
        self.pos += 2;
        v
    }

    fn i16(&mut self) -> i16 {
        self.u16() as i16
    }
}

struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> Writer<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn u8(&mut self, v: u8) {
        self.buf[self.pos] = v;
        self.pos += 1;
    }

    fn u16(&mut self, v: u16) {
        self.buf[self.pos..self.pos + 2].copy_from_slice(&v.to_le_bytes());
        self.pos += 2;
    }

    fn i16(&mut self, v: i16) {
        self.u16(v as u16);
    }
}

impl CalibrationRecord {
    /// Reset every field to the compiled-in defaults.
    pub fn reset_to_defaults(&mut self) {
        *self = Self::default();
    }

    // Fields shared by every version, in layout order.
    fn decode_common(&mut self, r: &mut Reader<'_>) {
        self.center_x_mg = r.i16();
        self.center_y_mg = r.i16();
        self.center_z_mg = r.i16();
        self.rotate_xy_cdeg = r.i16();
        self.rotate_xz_cdeg = r.i16();
        self.rotate_yz_cdeg = r.i16();
        self.keepout_rad_mg = r.u16();
        self.z_limit_mg = r.i16();
        self.data_radius_mg = r.u16();
        self.mag_offset_x = r.i16();
        self.mag_offset_y = r.i16();
        self.mag_offset_z = r.i16();
        self.earth_x_mg = r.i16();
        self.earth_y_mg = r.i16();
        self.earth_z_mg = r.i16();
        self.earth_valid = r.u8() != 0;
        self.stream_enable_mask = r.u8();
        self.interval_mag_ms = r.u16();
        self.interval_acc_ms = r.u16();
        self.interval_env_ms = r.u16();
        self.interval_event_ms = r.u16();
    }

    fn decode_v1(payload: &[u8]) -> Self {
        let mut cal = Self::default();
        let mut r = Reader::new(payload);
        cal.decode_common(&mut r);
        cal.reserved0 = r.u16();
        // Magnetometer config, sector count and elevation shaping did
        // not exist yet; the defaults stand.
        cal
    }

    fn decode_v2(payload: &[u8]) -> Self {
        let mut cal = Self::default();
        let mut r = Reader::new(payload);
        cal.decode_common(&mut r);
        cal.mag_range = r.u8();
        cal.mag_data_rate = r.u8();
        cal.mag_samples = r.u8();
        cal.mag_mode = r.u8();
        cal.reserved0 = r.u16();
        cal
    }

    fn decode_v3(payload: &[u8]) -> Self {
        let mut cal = Self::default();
        let mut r = Reader::new(payload);
        cal.decode_common(&mut r);
        cal.num_sectors = r.u8();
        cal.mag_range = r.u8();
        cal.mag_data_rate = r.u8();
        cal.mag_samples = r.u8();
        cal.mag_mode = r.u8();
        cal.z_max_mg = r.i16();
        cal.elev_curve_centi = r.u16();
        cal.reserved0 = r.u16();
        cal
    }

    fn encode_payload(&self, payload: &mut [u8]) {
        let mut w = Writer::new(payload);
        w.i16(self.center_x_mg);
        w.i16(self.center_y_mg);
        w.i16(self.center_z_mg);
        w.i16(self.rotate_xy_cdeg);
        w.i16(self.rotate_xz_cdeg);
        w.i16(self.rotate_yz_cdeg);
        w.u16(self.keepout_rad_mg);
        w.i16(self.z_limit_mg);
        w.u16(self.data_radius_mg);
        w.i16(self.mag_offset_x);
        w.i16(self.mag_offset_y);
        w.i16(self.mag_offset_z);
        w.i16(self.earth_x_mg);
        w.i16(self.earth_y_mg);
        w.i16(self.earth_z_mg);
        w.u8(self.earth_valid as u8);
        w.u8(self.stream_enable_mask);
        w.u16(self.interval_mag_ms);
        w.u16(self.interval_acc_ms);
        w.u16(self.interval_env_ms);
        w.u16(self.interval_event_ms);
        w.u8(self.num_sectors);
        w.u8(self.mag_range);
        w.u8(self.mag_data_rate);
        w.u8(self.mag_samples);
        w.u8(self.mag_mode);
        w.i16(self.z_max_mg);
        w.u16(self.elev_curve_centi);
        w.u16(self.reserved0);
    }

    /// Load the record from its flash page, migrating old versions.
    pub fn load<F: Flash>(flash: &F) -> Result<Self, CalibError> {
        let mut raw = [0u8; BLOB_LEN];
        flash.read(CALIB_ADDR, &mut raw)?;

        let magic = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
        if magic != CALIB_MAGIC {
            return Err(CalibError::BadMagic);
        }
        let version = u16::from_le_bytes([raw[4], raw[5]]);
        let size = u16::from_le_bytes([raw[6], raw[7]]);

        let payload_len = match version {
            3 => V3_PAYLOAD_LEN,
            2 => V2_PAYLOAD_LEN,
            1 => V1_PAYLOAD_LEN,
            _ => return Err(CalibError::UnknownVersion { version }),
        };
        if size as usize != payload_len {
            return Err(CalibError::SizeMismatch { expected: payload_len as u16, found: size });
        }

        let crc_off = HEADER_LEN + payload_len;
        let stored_crc = u32::from_le_bytes([
            raw[crc_off],
            raw[crc_off + 1],
            raw[crc_off + 2],
            raw[crc_off + 3],
        ]);
        if crc32_ieee(&raw[4..crc_off]) != stored_crc {
            return Err(CalibError::CrcMismatch);
        }

        let payload = &raw[HEADER_LEN..crc_off];
        let mut cal = match version {
            3 => Self::decode_v3(payload),
            2 => Self::decode_v2(payload),
            _ => Self::decode_v1(payload),
        };
        cal.num_sectors = sanitize_sector_count(cal.num_sectors);
        Ok(cal)
    }

    /// Boot path: load from flash, or fall back to defaults on any
    /// error (blank page, foreign data, corruption).
    pub fn load_or_default<F: Flash>(flash: &F) -> Self {
        match Self::load(flash) {
            Ok(cal) => cal,
            Err(_e) => {
                codec_warn!("calibration load failed ({:?}), using defaults", _e);
                Self::default()
            }
        }
    }

    /// Persist the record: erase the calibration page and program the
    /// current-version blob. Old-version records upgrade here.
    pub fn save<F: Flash>(&self, flash: &mut F) -> Result<(), CalibError> {
        let mut blob = [0u8; BLOB_LEN];
        blob[0..4].copy_from_slice(&CALIB_MAGIC.to_le_bytes());
        blob[4..6].copy_from_slice(&CALIB_VERSION.to_le_bytes());
        blob[6..8].copy_from_slice(&(V3_PAYLOAD_LEN as u16).to_le_bytes());
        self.encode_payload(&mut blob[HEADER_LEN..HEADER_LEN + V3_PAYLOAD_LEN]);
        let crc = crc32_ieee(&blob[4..HEADER_LEN + V3_PAYLOAD_LEN]);
        blob[HEADER_LEN + V3_PAYLOAD_LEN..].copy_from_slice(&crc.to_le_bytes());

        flash.erase(CALIB_ADDR, PAGE_SIZE)?;
        program_bytes(flash, CALIB_ADDR, &blob)?;
        Ok(())
    }

    /// Read one field through its wire code.
    pub fn get_field(&self, field: FieldId) -> i16 {
        match field {
            FieldId::CenterX => self.center_x_mg,
            FieldId::CenterY => self.center_y_mg,
            FieldId::CenterZ => self.center_z_mg,
            FieldId::RotateXy => self.rotate_xy_cdeg,
            FieldId::RotateXz => self.rotate_xz_cdeg,
            FieldId::RotateYz => self.rotate_yz_cdeg,
            FieldId::KeepoutRad => self.keepout_rad_mg as i16,
            FieldId::ZLimit => self.z_limit_mg,
            FieldId::DataRadius => self.data_radius_mg as i16,
            FieldId::MagOffsetX => self.mag_offset_x,
            FieldId::MagOffsetY => self.mag_offset_y,
            FieldId::MagOffsetZ => self.mag_offset_z,
            FieldId::EarthX => self.earth_x_mg,
            FieldId::EarthY => self.earth_y_mg,
            FieldId::EarthZ => self.earth_z_mg,
            FieldId::EarthValid => self.earth_valid as i16,
            FieldId::NumSectors => self.num_sectors as i16,
        }
    }

    /// Write one field through its wire code, with range checks.
    pub fn set_field(&mut self, field: FieldId, value: i16) -> Result<(), FieldError> {
        match field {
            FieldId::CenterX => self.center_x_mg = value,
            FieldId::CenterY => self.center_y_mg = value,
            FieldId::CenterZ => self.center_z_mg = value,
            FieldId::RotateXy => self.rotate_xy_cdeg = value,
            FieldId::RotateXz => self.rotate_xz_cdeg = value,
            FieldId::RotateYz => self.rotate_yz_cdeg = value,
            FieldId::KeepoutRad => {
                if value < 0 {
                    return Err(FieldError::ValueOutOfRange);
                }
                self.keepout_rad_mg = value as u16;
            }
            FieldId::ZLimit => self.z_limit_mg = value,
            FieldId::DataRadius => {
                if value < 0 {
                    return Err(FieldError::ValueOutOfRange);
                }
                self.data_radius_mg = value as u16;
            }
            FieldId::MagOffsetX => self.mag_offset_x = value,
            FieldId::MagOffsetY => self.mag_offset_y = value,
            FieldId::MagOffsetZ => self.mag_offset_z = value,
            FieldId::EarthX => self.earth_x_mg = value,
            FieldId::EarthY => self.earth_y_mg = value,
            FieldId::EarthZ => self.earth_z_mg = value,
            FieldId::EarthValid => self.earth_valid = value != 0,
            FieldId::NumSectors => {
                if !(crate::detector::MIN_SECTORS as i16..=crate::detector::MAX_SECTORS as i16)
                    .contains(&value)
                {
                    return Err(FieldError::ValueOutOfRange);
                }
                self.num_sectors = value as u8;
            }
        }
        Ok(())
    }

    /// Store a captured Earth field reference.
    pub fn set_earth(&mut self, x_mg: i16, y_mg: i16, z_mg: i16, valid: bool) {
        self.earth_x_mg = x_mg;
        self.earth_y_mg = y_mg;
        self.earth_z_mg = z_mg;
        self.earth_valid = valid;
    }

    /// Replace the stream configuration; intervals clamp to
    /// [`MAX_STREAM_INTERVAL_MS`], the mask keeps its low nibble.
    pub fn set_stream_config(&mut self, cfg: StreamConfig) {
        self.interval_mag_ms = cfg.interval_mag_ms.min(MAX_STREAM_INTERVAL_MS);
        self.interval_acc_ms = cfg.interval_acc_ms.min(MAX_STREAM_INTERVAL_MS);
        self.interval_env_ms = cfg.interval_env_ms.min(MAX_STREAM_INTERVAL_MS);
        self.interval_event_ms = cfg.interval_event_ms.min(MAX_STREAM_INTERVAL_MS);
        self.stream_enable_mask = cfg.enable_mask & 0x0F;
    }

    /// Current stream configuration.
    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            interval_mag_ms: self.interval_mag_ms,
            interval_acc_ms: self.interval_acc_ms,
            interval_env_ms: self.interval_env_ms,
            interval_event_ms: self.interval_event_ms,
            enable_mask: self.stream_enable_mask,
        }
    }

    /// Replace the magnetometer register configuration.
    pub fn set_mag_config(&mut self, cfg: MagConfig) {
        self.mag_range = cfg.range;
        self.mag_data_rate = cfg.data_rate;
        self.mag_samples = cfg.samples;
        self.mag_mode = cfg.mode;
    }

    /// Current magnetometer register configuration.
    pub fn mag_config(&self) -> MagConfig {
        MagConfig {
            range: self.mag_range,
            data_rate: self.mag_data_rate,
            samples: self.mag_samples,
            mode: self.mag_mode,
        }
    }
}
