//! Decode one Mode S payload into typed message fields.
//!
//! Only extended squitters (DF17/18, 112 bits) carry type-code fields:
//! - TC 1-4:  identification (callsign + emitter category)
//! - TC 9-18: airborne position (barometric altitude, NIC, CPR lat/lon)
//! - TC 19:   airborne velocity (ground speed subtypes only)
//!
//! Anything that fails the CRC is dropped whole. A field that cannot be
//! decoded is simply absent from the result.

use crate::crc;
use crate::types::*;

/// Shortest payload that still carries DF, address and type code.
const MIN_PAYLOAD_LEN: usize = 5;

/// Extended squitter length in bytes.
const LONG_PAYLOAD_LEN: usize = 14;

// ---------------------------------------------------------------------------
// Altitude decoding
// ---------------------------------------------------------------------------

/// Decode the 12-bit altitude code of an airborne position message.
///
/// The Q-bit (bit 4) selects the encoding mode:
/// - Q=1: 25-ft resolution
/// - Q=0: 100-ft Gillham code
pub fn decode_altitude(alt_code: u32) -> Option<i32> {
    if alt_code == 0 {
        return None;
    }

    if (alt_code >> 4) & 1 == 1 {
        Some(remove_q_bit(alt_code) as i32 * 25 - 1000)
    } else {
        Some(gillham_steps(alt_code) as i32 * 100 - 1000)
    }
}

/// Drop bit 4 and close the gap, leaving 11 bits.
fn remove_q_bit(alt_code: u32) -> u32 {
    ((alt_code >> 5) << 4) | (alt_code & 0x0F)
}

/// Number of 100-ft steps encoded by a Gillham altitude code.
///
/// The whole code is Gray-decoded and masked to its low 11 bits; six of
/// those bits carry a fixed step weight.
fn gillham_steps(gray: u32) -> u32 {
    const WEIGHTS: [(u32, u32); 6] = [
        (0x400, 5),
        (0x200, 10),
        (0x100, 1),
        (0x080, 20),
        (0x040, 2),
        (0x020, 40),
    ];

    let binary = gray_to_binary(gray) & 0x7FF;
    WEIGHTS
        .iter()
        .filter(|(bit, _)| binary & bit != 0)
        .map(|(_, weight)| weight)
        .sum()
}

/// Reflected binary (Gray) to plain binary.
pub fn gray_to_binary(gray: u32) -> u32 {
    let mut binary = gray;
    let mut shift = gray >> 1;
    while shift != 0 {
        binary ^= shift;
        shift >>= 1;
    }
    binary
}

/// Plain binary to reflected binary (Gray).
pub fn binary_to_gray(binary: u32) -> u32 {
    binary ^ (binary >> 1)
}

// ---------------------------------------------------------------------------
// Field extractors (payload is a CRC-valid 14-byte extended squitter)
// ---------------------------------------------------------------------------

/// TC 9-18 → navigation integrity category.
pub fn nic_for_type_code(tc: u8) -> Option<u8> {
    match tc {
        9 => Some(11),
        10 => Some(10),
        11 => Some(8),
        12 => Some(7),
        13 => Some(6),
        14 => Some(5),
        15 => Some(4),
        16 => Some(3),
        17 => Some(2),
        18 => Some(1),
        _ => None,
    }
}

/// Eight 6-bit characters packed into bytes 5-10.
fn decode_identity(msg: &[u8]) -> Option<String> {
    let bits = msg[5..11]
        .iter()
        .fold(0u64, |acc, &b| (acc << 8) | b as u64);

    let callsign: String = (0..8)
        .map(|i| {
            let idx = ((bits >> (42 - i * 6)) & 0x3F) as usize;
            IDENTITY_CHARSET[idx] as char
        })
        .collect();

    let trimmed = callsign.trim_end();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Ground speed, track and vertical rate from a TC 19 ground-speed subtype.
struct Velocity {
    speed_kts: Option<i32>,
    track_deg: Option<f64>,
    vertical_rate_fpm: Option<i32>,
}

fn decode_velocity(msg: &[u8]) -> Option<Velocity> {
    let subtype = msg[4] & 0x07;
    if !matches!(subtype, 1 | 2) {
        return None;
    }

    let ew_west = msg[5] & 0x04 != 0;
    let ew_raw = ((msg[5] as i32 & 0x03) << 8) | msg[6] as i32;
    let ns_south = msg[7] & 0x80 != 0;
    let ns_raw = ((msg[7] as i32 & 0x7F) << 3) | (msg[8] as i32 >> 5);

    let (speed_kts, track_deg) = if ew_raw == 0 || ns_raw == 0 {
        (None, None)
    } else {
        let ew = if ew_west { -(ew_raw - 1) } else { ew_raw - 1 } as f64;
        let ns = if ns_south { -(ns_raw - 1) } else { ns_raw - 1 } as f64;
        let speed = (ew * ew + ns * ns).sqrt().round() as i32;
        let track = ew.atan2(ns).to_degrees().rem_euclid(360.0);
        (Some(speed), Some(round2(track)))
    };

    let vr_down = msg[8] & 0x08 != 0;
    let vr_raw = ((msg[8] as i32 & 0x07) << 6) | (msg[9] as i32 >> 2);
    let vertical_rate_fpm = if vr_raw == 0 {
        None
    } else {
        let rate = (vr_raw - 1) * 64;
        Some(if vr_down { -rate } else { rate })
    };

    Some(Velocity {
        speed_kts,
        track_deg,
        vertical_rate_fpm,
    })
}

/// Raw CPR lat/lon and format flag from an airborne position message.
pub fn extract_cpr(msg: &[u8], observed_at: f64) -> CprFrame {
    let parity = if msg[6] & 0x04 != 0 {
        Parity::Odd
    } else {
        Parity::Even
    };
    let lat = ((msg[6] as u32 & 0x03) << 15) | ((msg[7] as u32) << 7) | (msg[8] as u32 >> 1);
    let lon = ((msg[8] as u32 & 0x01) << 16) | ((msg[9] as u32) << 8) | msg[10] as u32;

    CprFrame {
        parity,
        lat,
        lon,
        observed_at,
    }
}

// ---------------------------------------------------------------------------
// Main decode function
// ---------------------------------------------------------------------------

/// Decode a raw Mode S payload.
///
/// Returns `None` when the payload is too short or fails the CRC.
pub fn decode(payload: &[u8], timestamp: f64) -> Option<DecodedMessage> {
    if payload.len() < MIN_PAYLOAD_LEN || !crc::is_valid(payload) {
        return None;
    }

    let df = payload[0] >> 3;
    let type_code = (payload[4] >> 3) & 0x1F;

    let mut msg = DecodedMessage {
        icao: [payload[1], payload[2], payload[3]],
        df,
        type_code,
        crc_valid: true,
        ..Default::default()
    };

    if !matches!(df, 17 | 18) || payload.len() != LONG_PAYLOAD_LEN {
        return Some(msg);
    }

    match type_code {
        1..=4 => {
            msg.category = Some(payload[4] & 0x07);
            msg.identity = decode_identity(payload);
        }
        9..=18 => {
            let alt_code = ((payload[5] as u32) << 4) | (payload[6] as u32 >> 4);
            msg.altitude_ft = decode_altitude(alt_code);
            msg.nic = nic_for_type_code(type_code);
            msg.surveillance_status = Some((payload[4] >> 1) & 0x03);
            msg.single_antenna = Some(payload[4] & 0x01 != 0);
            msg.cpr = Some(extract_cpr(payload, timestamp));
        }
        19 => {
            if let Some(v) = decode_velocity(payload) {
                msg.ground_speed_kts = v.speed_kts;
                msg.track_deg = v.track_deg;
                msg.vertical_rate_fpm = v.vertical_rate_fpm;
            }
        }
        _ => {}
    }

    Some(msg)
}

/// Round to 2 decimal places.
fn round2(val: f64) -> f64 {
    (val * 100.0).round() / 100.0
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
