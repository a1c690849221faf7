use serde::{Deserialize, Serialize};
use static_assertions::const_assert_eq;
use thiserror::Error;

pub const SYNC_MARKER: u16 = 0x1ACF;
pub const FRAME_LEN: usize = 20;
pub const FRAME_TYPE_HOUSEKEEPING: u8 = 0x10;

// CRC-16, poly 0x8005, init 0x0000, unreflected, no final xor
const CRC16_POLY: u16 = 0x8005;
const CRC16_INIT: u16 = 0x0000;

// Byte offsets within the housekeeping frame
const OFFSET_SYNC: usize = 0;
const OFFSET_LENGTH: usize = 2;
const OFFSET_TYPE: usize = 3;
const OFFSET_SATELLITE_ID: usize = 4;
const OFFSET_TIMESTAMP: usize = 6;
const OFFSET_BATTERY_VOLTAGE: usize = 10;
const OFFSET_BATTERY_TEMP: usize = 12;
const OFFSET_MSI_TEMP: usize = 13;
const OFFSET_SSR_USED: usize = 14;
const OFFSET_CHECKSUM: usize = 18;

const_assert_eq!(OFFSET_CHECKSUM + 2, FRAME_LEN);
const_assert_eq!(FRAME_LEN as u8 as usize, FRAME_LEN);

/// A decoded housekeeping report. Only ever built from a frame whose
/// checksum validated, or directly by callers that own the values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub satellite_id: u16,
    pub timestamp: u32,          // seconds since epoch, as carried by the packet
    pub battery_voltage_mv: u16,
    pub battery_temp_c: i8,
    pub msi_temperature_c: u8,
    pub ssr_used_mb: u32,
    pub checksum_valid: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HexError {
    #[error("empty payload")]
    Empty,
    #[error("odd number of hex digits ({len})")]
    OddLength { len: usize },
    #[error("invalid hex character {ch:?} at index {index}")]
    InvalidChar { ch: char, index: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("frame truncated: {len} bytes, need {}", FRAME_LEN)]
    Truncated { len: usize },
    #[error("bad sync marker 0x{found:04X}, expected 0x{:04X}", SYNC_MARKER)]
    BadSync { found: u16 },
    #[error("declared length {declared} over {len} bytes, expected {}", FRAME_LEN)]
    BadLength { declared: u8, len: usize },
    #[error("unsupported frame type 0x{found:02X}")]
    UnsupportedType { found: u8 },
    #[error("checksum mismatch: frame carries 0x{found:04X}, computed 0x{expected:04X}")]
    ChecksumMismatch { expected: u16, found: u16 },
    #[error("hex decode failed: {0}")]
    HexDecode(#[from] HexError),
}

impl DecodeError {
    /// Stable short name, used for drop counters and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            DecodeError::Truncated { .. } => "truncated",
            DecodeError::BadSync { .. } => "bad_sync",
            DecodeError::BadLength { .. } => "bad_length",
            DecodeError::UnsupportedType { .. } => "unsupported_type",
            DecodeError::ChecksumMismatch { .. } => "checksum_mismatch",
            DecodeError::HexDecode(_) => "hex_decode",
        }
    }
}

pub fn crc16(data: &[u8]) -> u16 {
    let mut crc = CRC16_INIT;
    for &byte in data {
        crc ^= u16::from(byte) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ CRC16_POLY
            } else {
                crc << 1
            };
        }
    }
    crc
}

fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([bytes[offset], bytes[offset + 1]])
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

/// Validate and decode a housekeeping frame.
///
/// Checks run in wire order: length of the buffer, sync marker, declared
/// length, frame type, then the CRC over bytes 0..18. The declared length
/// must match both the fixed frame size and the buffer, so trailing bytes
/// are rejected as `BadLength`.
pub fn decode(bytes: &[u8]) -> Result<TelemetryRecord, DecodeError> {
    let len = bytes.len();
    if len < FRAME_LEN {
        return Err(DecodeError::Truncated { len });
    }

    let sync = read_u16(bytes, OFFSET_SYNC);
    if sync != SYNC_MARKER {
        return Err(DecodeError::BadSync { found: sync });
    }

    let declared = bytes[OFFSET_LENGTH];
    if usize::from(declared) != FRAME_LEN || len != FRAME_LEN {
        return Err(DecodeError::BadLength { declared, len });
    }

    let frame_type = bytes[OFFSET_TYPE];
    if frame_type != FRAME_TYPE_HOUSEKEEPING {
        return Err(DecodeError::UnsupportedType { found: frame_type });
    }

    let expected = crc16(&bytes[..OFFSET_CHECKSUM]);
    let found = read_u16(bytes, OFFSET_CHECKSUM);
    if expected != found {
        return Err(DecodeError::ChecksumMismatch { expected, found });
    }

    Ok(TelemetryRecord {
        satellite_id: read_u16(bytes, OFFSET_SATELLITE_ID),
        timestamp: read_u32(bytes, OFFSET_TIMESTAMP),
        battery_voltage_mv: read_u16(bytes, OFFSET_BATTERY_VOLTAGE),
        battery_temp_c: i8::from_be_bytes([bytes[OFFSET_BATTERY_TEMP]]),
        msi_temperature_c: bytes[OFFSET_MSI_TEMP],
        ssr_used_mb: read_u32(bytes, OFFSET_SSR_USED),
        checksum_valid: true,
    })
}

/// Build the wire form of a record, computing a fresh checksum.
pub fn encode(record: &TelemetryRecord) -> [u8; FRAME_LEN] {
    let mut frame = [0u8; FRAME_LEN];
    frame[OFFSET_SYNC..OFFSET_SYNC + 2].copy_from_slice(&SYNC_MARKER.to_be_bytes());
    frame[OFFSET_LENGTH] = FRAME_LEN as u8;
    frame[OFFSET_TYPE] = FRAME_TYPE_HOUSEKEEPING;
    frame[OFFSET_SATELLITE_ID..OFFSET_SATELLITE_ID + 2]
        .copy_from_slice(&record.satellite_id.to_be_bytes());
    frame[OFFSET_TIMESTAMP..OFFSET_TIMESTAMP + 4].copy_from_slice(&record.timestamp.to_be_bytes());
    frame[OFFSET_BATTERY_VOLTAGE..OFFSET_BATTERY_VOLTAGE + 2]
        .copy_from_slice(&record.battery_voltage_mv.to_be_bytes());
    frame[OFFSET_BATTERY_TEMP] = record.battery_temp_c.to_be_bytes()[0];
    frame[OFFSET_MSI_TEMP] = record.msi_temperature_c;
    frame[OFFSET_SSR_USED..OFFSET_SSR_USED + 4].copy_from_slice(&record.ssr_used_mb.to_be_bytes());

    let crc = crc16(&frame[..OFFSET_CHECKSUM]);
    frame[OFFSET_CHECKSUM..].copy_from_slice(&crc.to_be_bytes());
    frame
}

/// Convert the transport's hex text into raw bytes.
///
/// Surrounding whitespace, embedded spaces and newlines, and `0x` prefixes
/// are stripped before decoding.
pub fn decode_hex(text: &str) -> Result<Vec<u8>, DecodeError> {
    let cleaned: String = text
        .trim()
        .replace("0x", "")
        .replace("0X", "")
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();

    if cleaned.is_empty() {
        return Err(HexError::Empty.into());
    }

    hex::decode(&cleaned).map_err(|e| {
        let err = match e {
            hex::FromHexError::InvalidHexCharacter { c, index } => {
                HexError::InvalidChar { ch: c, index }
            }
            hex::FromHexError::OddLength | hex::FromHexError::InvalidStringLength => {
                HexError::OddLength { len: cleaned.len() }
            }
        };
        DecodeError::HexDecode(err)
    })
}

/// Full datagram path: payload text to validated record.
pub fn decode_datagram(payload: &[u8]) -> Result<TelemetryRecord, DecodeError> {
    let text = String::from_utf8_lossy(payload);
    let bytes = decode_hex(&text)?;
    decode(&bytes)
}
