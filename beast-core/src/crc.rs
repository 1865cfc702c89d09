//! CRC-24 validation for Mode S messages.
//!
//! Generator: 0x1FFF409 (x^24 + x^23 + ... + x^10 + x^3 + 1).
//!
//! The transmitted parity field is the remainder of the preceding bits, so
//! running the division over the whole payload leaves 0 for an intact
//! extended squitter. Anything else is treated as corrupted.

const GENERATOR: u32 = 0x1FFF409;

// ---------------------------------------------------------------------------
// CRC lookup table (compile-time)
// ---------------------------------------------------------------------------

const fn build_crc_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u32) << 16;
        let mut bit = 0;
        while bit < 8 {
            if crc & 0x800000 != 0 {
                crc = (crc << 1) ^ GENERATOR;
            } else {
                crc <<= 1;
            }
            crc &= 0xFFFFFF;
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

static CRC_TABLE: [u32; 256] = build_crc_table();

// ---------------------------------------------------------------------------
// Core CRC functions
// ---------------------------------------------------------------------------

/// Run the 24-bit register over every byte of `data`.
///
/// Each byte is XORed into the top 8 bits of the register, which is then
/// shifted 8 times with the generator applied whenever the top bit falls out.
/// The table folds those 8 steps into one lookup.
pub fn crc24(data: &[u8]) -> u32 {
    let mut crc = 0u32;
    for &byte in data {
        crc = ((crc << 8) ^ CRC_TABLE[((crc >> 16) ^ byte as u32) as usize & 0xFF]) & 0xFFFFFF;
    }
    crc
}

/// Parity field an encoder would append: the remainder of everything except
/// the trailing 3 bytes.
pub fn crc24_payload(data: &[u8]) -> u32 {
    if data.len() <= 3 {
        return 0;
    }
    crc24(&data[..data.len() - 3])
}

/// True if the payload's embedded remainder checks out.
pub fn is_valid(data: &[u8]) -> bool {
    !data.is_empty() && crc24(data) == 0
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
