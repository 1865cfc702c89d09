//! Compact Position Reporting: turn 17-bit encoded positions into lat/lon.
//!
//! Two decode modes:
//! - Local: single frame + the aircraft's last known position.
//! - Global: even+odd frame pair, both seen within the pairing window.
//!
//! Key constants:
//! - NZ = 15 (latitude zones per hemisphere for even frames)
//! - Nb = 17 (bits per coordinate)
//! - Dlat_even = 360 / (4 * NZ) = 6.0 degrees
//! - Dlat_odd = 360 / (4 * NZ - 1) ≈ 6.1017 degrees
//!
//! [`CprResolver`] owns the per-aircraft pairing state and applies the
//! local → global → placeholder fallback chain.

use std::collections::HashMap;

use tracing::debug;

use crate::types::{icao_to_string, CprFrame, Icao, Parity, PositionMethod, ResolvedPosition};

/// Number of latitude zones per hemisphere.
const NZ: f64 = 15.0;

/// Bits per CPR coordinate.
const NB: u32 = 17;

/// 2^17 = 131072.
const CPR_MAX: f64 = (1u32 << NB) as f64;

/// Default time an even or odd frame stays usable for pairing (seconds).
pub const DEFAULT_PAIRING_WINDOW: f64 = 10.0;

/// Positions with a NIC below this are kept as placeholders when they
/// cannot be resolved.
pub const LOW_INTEGRITY_NIC: u8 = 7;

/// Anything this close to (0, 0) is a decoder artifact, not an aircraft.
const NULL_ISLAND_EPSILON: f64 = 0.001;

// ---------------------------------------------------------------------------
// CPR math
// ---------------------------------------------------------------------------

/// Number of longitude zones at a given latitude (NL function).
///
/// Ranges from 1 near the poles to 59 at the equator.
pub fn nl(lat: f64) -> i32 {
    let lat = lat.abs();
    if lat == 0.0 {
        return 59;
    }
    if lat == 87.0 {
        return 2;
    }
    if lat > 87.0 {
        return 1;
    }

    let a = 1.0 - (std::f64::consts::PI / (2.0 * NZ)).cos();
    let b = (std::f64::consts::PI / 180.0 * lat).cos().powi(2);
    let arg = 1.0 - a / b;
    if !(-1.0..=1.0).contains(&arg) {
        return 1;
    }
    (2.0 * std::f64::consts::PI / arg.acos()).floor() as i32
}

/// Modulo that always returns a non-negative result.
fn modulo(x: f64, y: f64) -> f64 {
    x - y * (x / y).floor()
}

/// Round half up, as the zone index formulas expect.
fn round_half_up(x: f64) -> f64 {
    (x + 0.5).floor()
}

fn lat_zone_width(parity: Parity) -> f64 {
    match parity {
        Parity::Even => 360.0 / (4.0 * NZ),
        Parity::Odd => 360.0 / (4.0 * NZ - 1.0),
    }
}

/// Longitude zone count for a frame of `parity` at latitude zone count `nl`.
fn lon_zones(nl: i32, parity: Parity) -> i32 {
    match parity {
        Parity::Even => nl.max(1),
        Parity::Odd => (nl - 1).max(1),
    }
}

/// Map longitude into (-180, 180].
fn normalize_lon(lon: f64) -> f64 {
    let lon = modulo(lon, 360.0);
    if lon > 180.0 {
        lon - 360.0
    } else {
        lon
    }
}

/// Global CPR decode from an even/odd frame pair.
///
/// `latest` names the frame received most recently; its latitude zone and
/// longitude are the ones reported. Returns `None` when the two frames
/// straddle a longitude-zone boundary.
pub fn global_decode(
    lat_even: u32,
    lon_even: u32,
    lat_odd: u32,
    lon_odd: u32,
    latest: Parity,
) -> Option<(f64, f64)> {
    let lat_even_cpr = lat_even as f64 / CPR_MAX;
    let lon_even_cpr = lon_even as f64 / CPR_MAX;
    let lat_odd_cpr = lat_odd as f64 / CPR_MAX;
    let lon_odd_cpr = lon_odd as f64 / CPR_MAX;

    // Latitude zone index
    let j = round_half_up(59.0 * lat_even_cpr - 60.0 * lat_odd_cpr);

    let mut lat_e = lat_zone_width(Parity::Even) * (modulo(j, 60.0) + lat_even_cpr);
    let mut lat_o = lat_zone_width(Parity::Odd) * (modulo(j, 59.0) + lat_odd_cpr);

    // Southern hemisphere comes out in [270, 360)
    if lat_e >= 270.0 {
        lat_e -= 360.0;
    }
    if lat_o >= 270.0 {
        lat_o -= 360.0;
    }
    if lat_e.abs() >= 270.0 || lat_o.abs() >= 270.0 {
        return None;
    }

    let nl_val = nl(lat_e);
    if nl_val != nl(lat_o) {
        return None;
    }

    let (lat, lon_cpr) = match latest {
        Parity::Even => (lat_e, lon_even_cpr),
        Parity::Odd => (lat_o, lon_odd_cpr),
    };

    let n_lon = lon_zones(nl_val, latest);
    let dlon = 360.0 / n_lon as f64;
    let m = round_half_up(lon_even_cpr * (nl_val - 1) as f64 - lon_odd_cpr * nl_val as f64);
    let lon = dlon * (modulo(m, n_lon as f64) + lon_cpr);

    Some((lat, normalize_lon(lon)))
}

/// Local CPR decode against a reference position.
///
/// Unambiguous while the aircraft is within half a zone (~180 NM) of the
/// reference.
pub fn local_decode(
    cpr_lat: u32,
    cpr_lon: u32,
    parity: Parity,
    ref_lat: f64,
    ref_lon: f64,
) -> Option<(f64, f64)> {
    let dlat = lat_zone_width(parity);
    let cpr_lat_norm = cpr_lat as f64 / CPR_MAX;
    let cpr_lon_norm = cpr_lon as f64 / CPR_MAX;

    let j = (ref_lat / dlat).floor() + round_half_up(modulo(ref_lat, dlat) / dlat - cpr_lat_norm);
    let lat = dlat * (j + cpr_lat_norm);
    if lat.abs() >= 270.0 {
        return None;
    }

    let nl_val = nl(lat);
    if nl_val == 0 {
        return None;
    }
    let dlon = 360.0 / lon_zones(nl_val, parity) as f64;

    let m = (ref_lon / dlon).floor() + round_half_up(modulo(ref_lon, dlon) / dlon - cpr_lon_norm);
    let lon = dlon * (m + cpr_lon_norm);

    Some((lat, normalize_lon(lon)))
}

/// Encode a position as one CPR frame. Inverse of the decoders, used to
/// build replay and test traffic.
pub fn encode(lat: f64, lon: f64, parity: Parity) -> (u32, u32) {
    let dlat = lat_zone_width(parity);
    let yz = round_half_up(CPR_MAX * modulo(lat, dlat) / dlat);
    let rlat = dlat * (yz / CPR_MAX + (lat / dlat).floor());

    let dlon = 360.0 / lon_zones(nl(rlat), parity) as f64;
    let xz = round_half_up(CPR_MAX * modulo(lon, dlon) / dlon);

    let mask = (1u32 << NB) - 1;
    (yz as u32 & mask, xz as u32 & mask)
}

/// True if the coordinate is a plausible aircraft position.
pub fn is_valid_position(lat: f64, lon: f64) -> bool {
    lat.is_finite()
        && lon.is_finite()
        && (-90.0..=90.0).contains(&lat)
        && (-180.0..=180.0).contains(&lon)
        && !(lat.abs() < NULL_ISLAND_EPSILON && lon.abs() < NULL_ISLAND_EPSILON)
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Pairing state for one aircraft.
#[derive(Debug, Clone, Default)]
pub struct CprTrack {
    pub even: Option<CprFrame>,
    pub odd: Option<CprFrame>,
    pub last_position: Option<ResolvedPosition>,
    pub last_seen: f64,
}

/// Outcome of feeding one position message to the resolver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Resolution {
    /// A valid absolute position.
    Resolved(ResolvedPosition),
    /// Low-integrity report that could not be resolved. The aircraft is kept
    /// visible with empty position fields.
    Placeholder,
    /// Nothing usable; the message contributes no position.
    Unresolved,
}

/// Per-aircraft CPR state and the resolution policy.
#[derive(Debug)]
pub struct CprResolver {
    tracks: HashMap<Icao, CprTrack>,
    pairing_window: f64,
}

impl CprResolver {
    pub fn new(pairing_window: f64) -> Self {
        CprResolver {
            tracks: HashMap::new(),
            pairing_window,
        }
    }

    /// Store `frame` and try to turn it into a position.
    ///
    /// Tries a local decode against the last known position first, then a
    /// global decode of the even/odd pair. The last known position is only
    /// ever replaced by a newer valid one.
    pub fn resolve(
        &mut self,
        icao: Icao,
        frame: CprFrame,
        nic: Option<u8>,
        now: f64,
    ) -> Resolution {
        let window = self.pairing_window;
        let track = self.tracks.entry(icao).or_default();
        track.last_seen = now;

        let frame = CprFrame {
            observed_at: now,
            ..frame
        };
        match frame.parity {
            Parity::Even => track.even = Some(frame),
            Parity::Odd => track.odd = Some(frame),
        }
        for slot in [&mut track.even, &mut track.odd] {
            if slot.is_some_and(|f| now - f.observed_at > window) {
                *slot = None;
            }
        }

        let local = track
            .last_position
            .and_then(|r| local_decode(frame.lat, frame.lon, frame.parity, r.lat, r.lon))
            .filter(|&(lat, lon)| is_valid_position(lat, lon))
            .map(|(lat, lon)| (lat, lon, PositionMethod::Local));

        let position = local.or_else(|| match (track.even, track.odd) {
            (Some(even), Some(odd)) => {
                global_decode(even.lat, even.lon, odd.lat, odd.lon, frame.parity)
                    .filter(|&(lat, lon)| is_valid_position(lat, lon))
                    .map(|(lat, lon)| (lat, lon, PositionMethod::Global))
            }
            _ => None,
        });

        match position {
            Some((lat, lon, method)) => {
                let resolved = ResolvedPosition {
                    lat,
                    lon,
                    resolved_at: now,
                    method,
                };
                track.last_position = Some(resolved);
                Resolution::Resolved(resolved)
            }
            None if nic.is_some_and(|n| n < LOW_INTEGRITY_NIC) => Resolution::Placeholder,
            None => {
                debug!(icao = %icao_to_string(&icao), ?nic, "CPR position unresolved");
                Resolution::Unresolved
            }
        }
    }

    pub fn track(&self, icao: &Icao) -> Option<&CprTrack> {
        self.tracks.get(icao)
    }

    /// Drop tracks not updated within `horizon` seconds. Returns how many.
    pub fn evict(&mut self, now: f64, horizon: f64) -> usize {
        let before = self.tracks.len();
        self.tracks.retain(|_, t| now - t.last_seen <= horizon);
        before - self.tracks.len()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

impl Default for CprResolver {
    fn default() -> Self {
        CprResolver::new(DEFAULT_PAIRING_WINDOW)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const ICAO: Icao = [0x40, 0x62, 0x1D];

    fn cpr(parity: Parity, lat: u32, lon: u32) -> CprFrame {
        CprFrame {
            parity,
            lat,
            lon,
            observed_at: 0.0,
        }
    }

    fn even() -> CprFrame {
        cpr(Parity::Even, 93000, 51372)
    }

    fn odd() -> CprFrame {
        cpr(Parity::Odd, 74158, 50194)
    }

    // -- NL --

    #[test]
    fn test_nl_equator() {
        assert_eq!(nl(0.0), 59);
    }

    #[test]
    fn test_nl_poles() {
        assert_eq!(nl(87.0), 2);
        assert_eq!(nl(-87.0), 2);
        assert_eq!(nl(87.01), 1);
        assert_eq!(nl(90.0), 1);
    }

    #[test]
    fn test_nl_mid_latitude() {
        assert_eq!(nl(52.0), 36);
        assert_eq!(nl(-52.0), 36);
    }

    #[test]
    fn test_nl_non_increasing_toward_pole() {
        let mut prev = nl(0.0);
        for tenth in 1..=900 {
            let n = nl(tenth as f64 / 10.0);
            assert!(n <= prev, "NL rose at {}", tenth as f64 / 10.0);
            prev = n;
        }
    }

    // -- Global --

    #[test]
    fn test_global_decode_known_pair() {
        // "The 1090MHz Riddle" vectors, even frame newest
        let (lat, lon) = global_decode(93000, 51372, 74158, 50194, Parity::Even).unwrap();
        assert!((lat - 52.2572).abs() < 0.001, "Latitude should be ~52.2572, got {lat}");
        assert!((lon - 3.9194).abs() < 0.001, "Longitude should be ~3.9194, got {lon}");
    }

    #[test]
    fn test_global_decode_odd_latest() {
        let (lat, lon) = global_decode(93000, 51372, 74158, 50194, Parity::Odd).unwrap();
        assert!((lat - 52.2658).abs() < 0.001, "got {lat}");
        assert!((lon - 3.9389).abs() < 0.001, "got {lon}");
    }

    #[test]
    fn test_global_decode_southern_and_western() {
        for &(lat, lon) in &[(-33.9461, 151.1772), (40.6413, -73.7781), (-22.9, -43.2)] {
            let (el, eo) = encode(lat, lon, Parity::Even);
            let (ol, oo) = encode(lat, lon, Parity::Odd);
            let (dlat, dlon) = global_decode(el, eo, ol, oo, Parity::Even).unwrap();
            assert!((dlat - lat).abs() < 0.001, "lat {lat} decoded as {dlat}");
            assert!((dlon - lon).abs() < 0.001, "lon {lon} decoded as {dlon}");
        }
    }

    #[test]
    fn test_global_decode_zone_mismatch_rejected() {
        // NL drops from 59 to 58 near 10.47°; the frames straddle it
        let (el, eo) = encode(10.43, 5.0, Parity::Even);
        let (ol, oo) = encode(10.48, 5.0, Parity::Odd);
        assert!(global_decode(el, eo, ol, oo, Parity::Even).is_none());
    }

    // -- Local --

    #[test]
    fn test_local_decode() {
        let (lat, lon) = local_decode(93000, 51372, Parity::Even, 52.25, 3.92).unwrap();
        assert!((lat - 52.2572).abs() < 0.001, "Local lat should be ~52.2572, got {lat}");
        assert!((lon - 3.9194).abs() < 0.001, "Local lon should be ~3.9194, got {lon}");
    }

    #[test]
    fn test_local_decode_odd() {
        let (lat, lon) = local_decode(74158, 50194, Parity::Odd, 52.25, 3.92).unwrap();
        assert!((lat - 52.2658).abs() < 0.001, "got {lat}");
        assert!((lon - 3.9389).abs() < 0.001, "got {lon}");
    }

    #[test]
    fn test_local_decode_across_antimeridian() {
        let (el, eo) = encode(10.0, 179.99, Parity::Even);
        let (lat, lon) = local_decode(el, eo, Parity::Even, 10.0, -179.9).unwrap();
        assert!((lat - 10.0).abs() < 0.001);
        assert!((lon - 179.99).abs() < 0.001, "got {lon}");
    }

    // -- Validity --

    #[test]
    fn test_validity_predicate() {
        assert!(is_valid_position(52.2572, 3.9194));
        assert!(is_valid_position(-90.0, 180.0));
        assert!(!is_valid_position(0.0, 0.0));
        assert!(!is_valid_position(0.0005, -0.0005));
        assert!(is_valid_position(0.0, 0.01));
        assert!(!is_valid_position(90.1, 0.0));
        assert!(!is_valid_position(10.0, 180.5));
        assert!(!is_valid_position(f64::NAN, 10.0));
        assert!(!is_valid_position(10.0, f64::INFINITY));
    }

    #[test]
    fn test_normalize_lon_half_open() {
        assert_eq!(normalize_lon(180.0), 180.0);
        assert_eq!(normalize_lon(-180.0), 180.0);
        assert!((normalize_lon(190.0) + 170.0).abs() < 1e-9);
        assert!((normalize_lon(-190.0) - 170.0).abs() < 1e-9);
    }

    #[test]
    fn test_modulo_negative() {
        assert!((modulo(-1.0, 60.0) - 59.0).abs() < 1e-10);
    }

    // -- Resolver --

    #[test]
    fn test_resolver_single_frame_unresolved() {
        let mut resolver = CprResolver::default();
        assert_eq!(resolver.resolve(ICAO, even(), Some(8), 100.0), Resolution::Unresolved);
        assert!(resolver.track(&ICAO).unwrap().even.is_some());
    }

    #[test]
    fn test_resolver_global_then_local() {
        let mut resolver = CprResolver::default();
        resolver.resolve(ICAO, odd(), Some(8), 100.0);
        let Resolution::Resolved(pos) = resolver.resolve(ICAO, even(), Some(8), 101.0) else {
            panic!("pair should resolve");
        };
        assert_eq!(pos.method, PositionMethod::Global);
        assert!((pos.lat - 52.2572).abs() < 0.001);
        assert!((pos.lon - 3.9194).abs() < 0.001);
        assert_eq!(pos.resolved_at, 101.0);

        // Reference now exists: next frame decodes locally
        let Resolution::Resolved(next) = resolver.resolve(ICAO, odd(), Some(8), 102.0) else {
            panic!("local decode should resolve");
        };
        assert_eq!(next.method, PositionMethod::Local);
        assert!((next.lat - 52.2658).abs() < 0.001);
    }

    #[test]
    fn test_resolver_pair_outside_window() {
        let mut resolver = CprResolver::new(10.0);
        resolver.resolve(ICAO, even(), Some(8), 100.0);
        assert_eq!(resolver.resolve(ICAO, odd(), Some(8), 111.0), Resolution::Unresolved);
        // The stale even frame was dropped
        assert!(resolver.track(&ICAO).unwrap().even.is_none());
    }

    #[test]
    fn test_resolver_pair_at_window_edge() {
        let mut resolver = CprResolver::new(10.0);
        resolver.resolve(ICAO, even(), Some(8), 100.0);
        assert!(matches!(
            resolver.resolve(ICAO, odd(), Some(8), 110.0),
            Resolution::Resolved(_)
        ));
    }

    #[test]
    fn test_resolver_null_island_low_nic_placeholder() {
        let mut resolver = CprResolver::default();
        resolver.resolve(ICAO, cpr(Parity::Even, 0, 0), Some(3), 100.0);
        assert_eq!(
            resolver.resolve(ICAO, cpr(Parity::Odd, 0, 0), Some(3), 101.0),
            Resolution::Placeholder
        );
    }

    #[test]
    fn test_resolver_null_island_high_nic_dropped() {
        let mut resolver = CprResolver::default();
        resolver.resolve(ICAO, cpr(Parity::Even, 0, 0), Some(9), 100.0);
        assert_eq!(
            resolver.resolve(ICAO, cpr(Parity::Odd, 0, 0), Some(9), 101.0),
            Resolution::Unresolved
        );
        assert_eq!(
            resolver.resolve(ICAO, cpr(Parity::Odd, 0, 0), None, 102.0),
            Resolution::Unresolved
        );
    }

    #[test]
    fn test_failed_attempt_keeps_last_position() {
        let mut resolver = CprResolver::default();
        let (el, eo) = encode(0.01, 0.01, Parity::Even);
        let (ol, oo) = encode(0.01, 0.01, Parity::Odd);
        resolver.resolve(ICAO, cpr(Parity::Odd, ol, oo), Some(3), 100.0);
        let Resolution::Resolved(before) =
            resolver.resolve(ICAO, cpr(Parity::Even, el, eo), Some(3), 101.0)
        else {
            panic!("pair near the origin should still resolve");
        };

        // Frames now decode onto (0, 0) both locally and globally
        resolver.resolve(ICAO, cpr(Parity::Even, 0, 0), Some(3), 200.0);
        let outcome = resolver.resolve(ICAO, cpr(Parity::Odd, 0, 0), Some(3), 201.0);
        assert_eq!(outcome, Resolution::Placeholder);
        assert_eq!(resolver.track(&ICAO).unwrap().last_position, Some(before));
    }

    #[test]
    fn test_resolver_evict() {
        let mut resolver = CprResolver::default();
        resolver.resolve(ICAO, even(), Some(8), 100.0);
        resolver.resolve([1, 2, 3], even(), Some(8), 350.0);
        assert_eq!(resolver.evict(401.0, 300.0), 1);
        assert!(resolver.track(&ICAO).is_none());
        assert_eq!(resolver.len(), 1);
    }
}
