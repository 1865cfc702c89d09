//! Shared types, error enum, and decoded message types for beast-core.

use serde::Serialize;
use thiserror::Error;

/// All errors produced by beast-core.
#[derive(Debug, Error)]
pub enum BeastError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, BeastError>;

// ---------------------------------------------------------------------------
// ICAO address helpers
// ---------------------------------------------------------------------------

/// 3-byte ICAO address. Stored as raw bytes to avoid per-frame String allocation.
pub type Icao = [u8; 3];

/// Format ICAO address as 6-char uppercase hex string.
pub fn icao_to_string(icao: &Icao) -> String {
    format!("{:02X}{:02X}{:02X}", icao[0], icao[1], icao[2])
}

/// Parse a 6-char hex string into an ICAO address.
pub fn icao_from_hex(hex: &str) -> Option<Icao> {
    if hex.len() != 6 {
        return None;
    }
    let val = u32::from_str_radix(hex, 16).ok()?;
    Some([
        ((val >> 16) & 0xFF) as u8,
        ((val >> 8) & 0xFF) as u8,
        (val & 0xFF) as u8,
    ])
}

// ---------------------------------------------------------------------------
// Hex utilities
// ---------------------------------------------------------------------------

/// Decode a hex string into bytes. Case-insensitive, must be even length.
pub fn hex_decode(hex: &str) -> Option<Vec<u8>> {
    let hex = hex.trim();
    if hex.len() % 2 != 0 {
        return None;
    }
    let mut bytes = Vec::with_capacity(hex.len() / 2);
    for chunk in hex.as_bytes().chunks(2) {
        let high = hex_digit(chunk[0])?;
        let low = hex_digit(chunk[1])?;
        bytes.push((high << 4) | low);
    }
    Some(bytes)
}

/// Encode bytes as uppercase hex string.
pub fn hex_encode(data: &[u8]) -> String {
    let mut s = String::with_capacity(data.len() * 2);
    for &b in data {
        s.push(HEX_CHARS[(b >> 4) as usize] as char);
        s.push(HEX_CHARS[(b & 0x0F) as usize] as char);
    }
    s
}

const HEX_CHARS: &[u8; 16] = b"0123456789ABCDEF";

fn hex_digit(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Identity character set
// ---------------------------------------------------------------------------

/// 6-bit identity character table. Unassigned codes map to a blank.
pub const IDENTITY_CHARSET: &[u8; 64] =
    b" ABCDEFGHIJKLMNOPQRSTUVWXYZ                     0123456789      ";

// ---------------------------------------------------------------------------
// Frames
// ---------------------------------------------------------------------------

/// Mode S reply length carried by a Beast frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FrameKind {
    /// 56-bit reply, 7-byte payload.
    #[serde(rename = "MODE_S_SHORT")]
    Short,
    /// 112-bit reply, 14-byte payload.
    #[serde(rename = "MODE_S_LONG")]
    Long,
}

impl FrameKind {
    pub fn payload_len(&self) -> usize {
        match self {
            FrameKind::Short => 7,
            FrameKind::Long => 14,
        }
    }
}

impl std::fmt::Display for FrameKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameKind::Short => write!(f, "MODE_S_SHORT"),
            FrameKind::Long => write!(f, "MODE_S_LONG"),
        }
    }
}

/// One Mode S reply cut out of the Beast stream.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolFrame {
    pub kind: FrameKind,
    /// Raw 48-bit receiver tick counter (12 MHz).
    pub timestamp_ticks: u64,
    /// Absolute time in seconds: process-start epoch plus the tick offset.
    pub timestamp: f64,
    pub signal_level: u8,
    pub payload: Vec<u8>,
}

// ---------------------------------------------------------------------------
// Decoded messages
// ---------------------------------------------------------------------------

/// CPR format flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    Even,
    Odd,
}

/// One raw CPR-encoded position, not yet a geographic coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CprFrame {
    pub parity: Parity,
    /// 17-bit encoded latitude (0..131071).
    pub lat: u32,
    /// 17-bit encoded longitude (0..131071).
    pub lon: u32,
    pub observed_at: f64,
}

/// Fields extracted from one CRC-valid Mode S payload.
///
/// Every optional field is present only when the type code carries it.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct DecodedMessage {
    pub icao: Icao,
    pub df: u8,
    pub type_code: u8,
    pub crc_valid: bool,
    pub altitude_ft: Option<i32>,
    pub nic: Option<u8>,
    pub identity: Option<String>,
    pub category: Option<u8>,
    pub surveillance_status: Option<u8>,
    pub single_antenna: Option<bool>,
    pub ground_speed_kts: Option<i32>,
    pub track_deg: Option<f64>,
    pub vertical_rate_fpm: Option<i32>,
    pub cpr: Option<CprFrame>,
}

impl DecodedMessage {
    /// True if this message carries a CPR-encoded position.
    pub fn is_position(&self) -> bool {
        self.cpr.is_some()
    }
}

// ---------------------------------------------------------------------------
// Resolved positions
// ---------------------------------------------------------------------------

/// How a position was reconstructed from CPR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionMethod {
    Local,
    Global,
}

impl std::fmt::Display for PositionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PositionMethod::Local => write!(f, "local"),
            PositionMethod::Global => write!(f, "global"),
        }
    }
}

/// A valid absolute position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResolvedPosition {
    pub lat: f64,
    pub lon: f64,
    pub resolved_at: f64,
    pub method: PositionMethod,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_icao_roundtrip() {
        let icao = icao_from_hex("4840D6").unwrap();
        assert_eq!(icao, [0x48, 0x40, 0xD6]);
        assert_eq!(icao_to_string(&icao), "4840D6");
    }

    #[test]
    fn test_icao_from_hex_rejects_bad_input() {
        assert!(icao_from_hex("4840D").is_none());
        assert!(icao_from_hex("ZZZZZZ").is_none());
    }

    #[test]
    fn test_hex_decode() {
        assert_eq!(hex_decode("4840D6"), Some(vec![0x48, 0x40, 0xD6]));
        assert_eq!(hex_decode("odd"), None); // odd length
        assert_eq!(hex_decode("ZZZZ"), None); // invalid chars
    }

    #[test]
    fn test_hex_encode() {
        assert_eq!(hex_encode(&[0x48, 0x40, 0xD6]), "4840D6");
    }

    #[test]
    fn test_identity_charset_layout() {
        assert_eq!(IDENTITY_CHARSET[1], b'A');
        assert_eq!(IDENTITY_CHARSET[26], b'Z');
        assert_eq!(IDENTITY_CHARSET[32], b' ');
        assert_eq!(IDENTITY_CHARSET[48], b'0');
        assert_eq!(IDENTITY_CHARSET[57], b'9');
    }

    #[test]
    fn test_frame_kind_payload_len() {
        assert_eq!(FrameKind::Short.payload_len(), 7);
        assert_eq!(FrameKind::Long.payload_len(), 14);
        assert_eq!(FrameKind::Long.to_string(), "MODE_S_LONG");
    }
}
