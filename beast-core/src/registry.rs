//! Live aircraft registry: one merged state per ICAO address.
//!
//! Pure logic, no I/O. The registry only grows through `merge` and only
//! shrinks through `evict`; a failed decode never removes an aircraft.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::types::*;

/// Default staleness after which an aircraft leaves snapshots (seconds).
pub const DEFAULT_VISIBILITY_HORIZON: f64 = 60.0;

// ---------------------------------------------------------------------------
// Merge input
// ---------------------------------------------------------------------------

/// Position outcome attached to a position-bearing message.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PositionUpdate {
    Resolved(ResolvedPosition),
    /// Keep the aircraft visible but blank its position fields.
    Placeholder,
}

/// Receiver-side details of the frame a message arrived in.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameInfo {
    pub kind: FrameKind,
    pub signal_level: u8,
    pub beast_timestamp: f64,
    pub raw_hex: String,
}

impl FrameInfo {
    pub fn from_frame(frame: &ProtocolFrame) -> Self {
        FrameInfo {
            kind: frame.kind,
            signal_level: frame.signal_level,
            beast_timestamp: frame.timestamp,
            raw_hex: hex_encode(&frame.payload),
        }
    }
}

/// Fields carried into one merge. `None` means "not in this message".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldUpdate {
    pub identity: Option<String>,
    pub category: Option<u8>,
    pub nic: Option<u8>,
    pub altitude_ft: Option<i32>,
    pub ground_speed_kts: Option<i32>,
    pub track_deg: Option<f64>,
    pub vertical_rate_fpm: Option<i32>,
    pub surveillance_status: Option<u8>,
    pub single_antenna: Option<bool>,
    pub position: Option<PositionUpdate>,
    pub frame: Option<FrameInfo>,
}

impl FieldUpdate {
    /// Copy the non-position fields of a decoded message.
    pub fn from_message(msg: &DecodedMessage) -> Self {
        FieldUpdate {
            identity: msg.identity.clone(),
            category: msg.category,
            nic: msg.nic,
            altitude_ft: msg.altitude_ft,
            ground_speed_kts: msg.ground_speed_kts,
            track_deg: msg.track_deg,
            vertical_rate_fpm: msg.vertical_rate_fpm,
            surveillance_status: msg.surveillance_status,
            single_antenna: msg.single_antenna,
            position: None,
            frame: None,
        }
    }

    pub fn with_position(mut self, position: PositionUpdate) -> Self {
        self.position = Some(position);
        self
    }

    pub fn with_frame(mut self, frame: FrameInfo) -> Self {
        self.frame = Some(frame);
        self
    }
}

// ---------------------------------------------------------------------------
// Aircraft state
// ---------------------------------------------------------------------------

/// Latest known value of every field, merged across messages.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AircraftFields {
    pub identity: Option<String>,
    pub category: Option<u8>,
    pub nic: Option<u8>,
    pub altitude_ft: Option<i32>,
    pub ground_speed_kts: Option<i32>,
    pub track_deg: Option<f64>,
    pub vertical_rate_fpm: Option<i32>,
    pub surveillance_status: Option<u8>,
    pub single_antenna: Option<bool>,

    // Position, recomputed on every position-bearing message
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub position_method: Option<PositionMethod>,
    pub degraded_position: bool,
}

/// Mutable state for a single tracked aircraft.
#[derive(Debug, Clone)]
pub struct AircraftState {
    pub icao: Icao,
    pub first_seen: f64,
    pub last_seen: f64,
    pub last_resolved: Option<ResolvedPosition>,
    pub fields: AircraftFields,
    pub messages: u64,
    pub decode_failures: u64,
    pub frame: Option<FrameInfo>,
}

impl AircraftState {
    pub fn new(icao: Icao, timestamp: f64) -> Self {
        AircraftState {
            icao,
            first_seen: timestamp,
            last_seen: timestamp,
            last_resolved: None,
            fields: AircraftFields::default(),
            messages: 0,
            decode_failures: 0,
            frame: None,
        }
    }

    pub fn age(&self, now: f64) -> f64 {
        now - self.last_seen
    }

    /// Signal level relative to full scale.
    pub fn rssi(&self) -> Option<i32> {
        self.frame.as_ref().map(|f| f.signal_level as i32 - 256)
    }

    fn apply(&mut self, update: &FieldUpdate) {
        let f = &mut self.fields;
        if let Some(identity) = &update.identity {
            f.identity = Some(identity.clone());
        }
        merge_opt(&mut f.category, update.category);
        merge_opt(&mut f.nic, update.nic);
        merge_opt(&mut f.altitude_ft, update.altitude_ft);
        merge_opt(&mut f.ground_speed_kts, update.ground_speed_kts);
        merge_opt(&mut f.track_deg, update.track_deg);
        merge_opt(&mut f.vertical_rate_fpm, update.vertical_rate_fpm);
        merge_opt(&mut f.surveillance_status, update.surveillance_status);
        merge_opt(&mut f.single_antenna, update.single_antenna);

        match update.position {
            Some(PositionUpdate::Resolved(pos)) => {
                f.lat = Some(pos.lat);
                f.lon = Some(pos.lon);
                f.position_method = Some(pos.method);
                f.degraded_position = false;
                if self.last_resolved.map_or(true, |prev| prev.resolved_at <= pos.resolved_at) {
                    self.last_resolved = Some(pos);
                }
            }
            Some(PositionUpdate::Placeholder) => {
                f.lat = None;
                f.lon = None;
                f.position_method = None;
                f.degraded_position = true;
            }
            None => {}
        }

        if let Some(frame) = &update.frame {
            self.frame = Some(frame.clone());
        }
    }
}

fn merge_opt<T>(slot: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *slot = value;
    }
}

// ---------------------------------------------------------------------------
// Snapshot rows
// ---------------------------------------------------------------------------

/// One aircraft as written to snapshot files. Unknown values serialize as
/// `null`, never omitted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotRow {
    pub hex: String,
    pub flight: Option<String>,
    /// Emitter category subfield (low 3 bits of the ME type byte), not the type code.
    pub category: Option<u8>,
    pub nic: Option<u8>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub altitude: Option<i32>,
    pub gs: Option<i32>,
    pub track: Option<f64>,
    pub vertical_rate: Option<i32>,
    pub position_method: Option<PositionMethod>,
    pub degraded_position: bool,
    pub surveillance_status: Option<u8>,
    pub single_antenna: Option<bool>,
    pub messages: u64,
    pub decode_failures: u64,
    pub first_seen: f64,
    pub seen: f64,
    pub rssi: Option<i32>,
    pub signal_level: Option<u8>,
    pub message_type: Option<FrameKind>,
    pub beast_timestamp: Option<f64>,
    pub raw_message: Option<String>,
}

impl SnapshotRow {
    fn from_state(ac: &AircraftState, now: f64) -> Self {
        let f = &ac.fields;
        SnapshotRow {
            hex: icao_to_string(&ac.icao),
            flight: f.identity.clone(),
            category: f.category,
            nic: f.nic,
            lat: f.lat,
            lon: f.lon,
            altitude: f.altitude_ft,
            gs: f.ground_speed_kts,
            track: f.track_deg,
            vertical_rate: f.vertical_rate_fpm,
            position_method: f.position_method,
            degraded_position: f.degraded_position,
            surveillance_status: f.surveillance_status,
            single_antenna: f.single_antenna,
            messages: ac.messages,
            decode_failures: ac.decode_failures,
            first_seen: ac.first_seen,
            seen: round1(ac.age(now)),
            rssi: ac.rssi(),
            signal_level: ac.frame.as_ref().map(|fr| fr.signal_level),
            message_type: ac.frame.as_ref().map(|fr| fr.kind),
            beast_timestamp: ac.frame.as_ref().map(|fr| fr.beast_timestamp),
            raw_message: ac.frame.as_ref().map(|fr| fr.raw_hex.clone()),
        }
    }
}

fn round1(val: f64) -> f64 {
    (val * 10.0).round() / 10.0
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Address → merged aircraft state, ordered by address.
#[derive(Debug)]
pub struct Registry {
    aircraft: BTreeMap<Icao, AircraftState>,
    visibility_horizon: f64,
}

impl Registry {
    pub fn new(visibility_horizon: f64) -> Self {
        Registry {
            aircraft: BTreeMap::new(),
            visibility_horizon,
        }
    }

    /// Create-or-update with a sparse field merge.
    pub fn merge(&mut self, icao: Icao, update: &FieldUpdate, now: f64) -> &AircraftState {
        let ac = self
            .aircraft
            .entry(icao)
            .or_insert_with(|| AircraftState::new(icao, now));
        ac.last_seen = ac.last_seen.max(now);
        ac.messages += 1;
        ac.apply(update);
        ac
    }

    /// Count a failed decode against an existing aircraft.
    ///
    /// Unknown addresses are ignored and `last_seen` is left alone.
    pub fn record_failure(&mut self, icao: &Icao) -> bool {
        match self.aircraft.get_mut(icao) {
            Some(ac) => {
                ac.decode_failures += 1;
                true
            }
            None => false,
        }
    }

    /// Remove aircraft silent for longer than `horizon`. Returns count removed.
    pub fn evict(&mut self, now: f64, horizon: f64) -> usize {
        let before = self.aircraft.len();
        self.aircraft.retain(|_, ac| ac.age(now) <= horizon);
        before - self.aircraft.len()
    }

    /// Aircraft heard within the visibility horizon, ordered by address.
    pub fn snapshot(&self, now: f64) -> Vec<SnapshotRow> {
        self.aircraft
            .values()
            .filter(|ac| ac.age(now) <= self.visibility_horizon)
            .map(|ac| SnapshotRow::from_state(ac, now))
            .collect()
    }

    pub fn get(&self, icao: &Icao) -> Option<&AircraftState> {
        self.aircraft.get(icao)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AircraftState> {
        self.aircraft.values()
    }

    pub fn visibility_horizon(&self) -> f64 {
        self.visibility_horizon
    }

    pub fn len(&self) -> usize {
        self.aircraft.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aircraft.is_empty()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Registry::new(DEFAULT_VISIBILITY_HORIZON)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const ICAO: Icao = [0x4C, 0xA1, 0xD3];

    fn resolved(lat: f64, lon: f64, at: f64) -> PositionUpdate {
        PositionUpdate::Resolved(ResolvedPosition {
            lat,
            lon,
            resolved_at: at,
            method: PositionMethod::Global,
        })
    }

    #[test]
    fn test_merge_creates_entry() {
        let mut reg = Registry::default();
        let ac = reg.merge(ICAO, &FieldUpdate::default(), 10.0);
        assert_eq!(ac.first_seen, 10.0);
        assert_eq!(ac.last_seen, 10.0);
        assert_eq!(ac.messages, 1);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_sparse_merge_keeps_identity() {
        let mut reg = Registry::default();
        let ident = FieldUpdate {
            identity: Some("TST123".into()),
            ..Default::default()
        };
        reg.merge(ICAO, &ident, 1.0);

        let position = FieldUpdate {
            altitude_ft: Some(35000),
            ..Default::default()
        }
        .with_position(resolved(51.5, -0.12, 2.0));
        reg.merge(ICAO, &position, 2.0);

        let ac = reg.get(&ICAO).unwrap();
        assert_eq!(ac.fields.identity.as_deref(), Some("TST123"));
        assert_eq!(ac.fields.altitude_ft, Some(35000));
        assert_eq!(ac.fields.lat, Some(51.5));
        assert_eq!(ac.messages, 2);
        assert_eq!(ac.first_seen, 1.0);
        assert_eq!(ac.last_seen, 2.0);
    }

    #[test]
    fn test_sparse_merge_overwrites_present_value() {
        let mut reg = Registry::default();
        let first = FieldUpdate {
            identity: Some("TST123".into()),
            altitude_ft: Some(2500),
            ..Default::default()
        };
        reg.merge(ICAO, &first, 1.0);

        let climb = FieldUpdate {
            altitude_ft: Some(3000),
            ..Default::default()
        };
        reg.merge(ICAO, &climb, 2.0);

        let rows = reg.snapshot(2.0);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].flight.as_deref(), Some("TST123"));
        assert_eq!(rows[0].altitude, Some(3000));
    }

    #[test]
    fn test_placeholder_blanks_position_only() {
        let mut reg = Registry::default();
        let first = FieldUpdate {
            altitude_ft: Some(12000),
            ..Default::default()
        }
        .with_position(resolved(40.0, -74.0, 1.0));
        reg.merge(ICAO, &first, 1.0);
        reg.merge(ICAO, &FieldUpdate::default().with_position(PositionUpdate::Placeholder), 2.0);

        let ac = reg.get(&ICAO).unwrap();
        assert_eq!(ac.fields.lat, None);
        assert_eq!(ac.fields.lon, None);
        assert!(ac.fields.degraded_position);
        assert_eq!(ac.fields.altitude_ft, Some(12000));
        // The last good fix survives
        assert_eq!(ac.last_resolved.map(|p| p.lat), Some(40.0));
    }

    #[test]
    fn test_record_failure_existing_only() {
        let mut reg = Registry::default();
        assert!(!reg.record_failure(&ICAO));
        assert!(reg.is_empty());

        reg.merge(ICAO, &FieldUpdate::default(), 5.0);
        assert!(reg.record_failure(&ICAO));
        let ac = reg.get(&ICAO).unwrap();
        assert_eq!(ac.decode_failures, 1);
        assert_eq!(ac.last_seen, 5.0);
    }

    #[test]
    fn test_visibility_61s_vs_59s() {
        let mut reg = Registry::new(60.0);
        reg.merge([0x00, 0x00, 0x01], &FieldUpdate::default(), 1000.0 - 61.0);
        reg.merge([0x00, 0x00, 0x02], &FieldUpdate::default(), 1000.0 - 59.0);

        let rows = reg.snapshot(1000.0);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].hex, "000002");
    }

    #[test]
    fn test_evict_horizon() {
        let mut reg = Registry::default();
        reg.merge([0x00, 0x00, 0x01], &FieldUpdate::default(), 100.0);
        reg.merge([0x00, 0x00, 0x02], &FieldUpdate::default(), 390.0);
        assert_eq!(reg.evict(401.0, 300.0), 1);
        assert!(reg.get(&[0x00, 0x00, 0x01]).is_none());
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_snapshot_ordered_by_address() {
        let mut reg = Registry::default();
        for icao in [[0xAB, 0, 0], [0x01, 0, 0], [0x40, 0x62, 0x1D]] {
            reg.merge(icao, &FieldUpdate::default(), 10.0);
        }
        let hexes: Vec<_> = reg.snapshot(10.0).into_iter().map(|r| r.hex).collect();
        assert_eq!(hexes, vec!["010000", "40621D", "AB0000"]);
    }

    #[test]
    fn test_snapshot_unknown_fields_are_null() {
        let mut reg = Registry::default();
        reg.merge(ICAO, &FieldUpdate::default(), 10.0);
        let json = serde_json::to_value(&reg.snapshot(10.0)[0]).unwrap();
        for key in ["flight", "nic", "lat", "lon", "altitude", "gs", "track", "vertical_rate"] {
            assert!(json.get(key).is_some_and(|v| v.is_null()), "{key} should be null");
        }
        assert_eq!(json["hex"], "4CA1D3");
    }

    #[test]
    fn test_frame_info_and_rssi() {
        let mut reg = Registry::default();
        let frame = ProtocolFrame {
            kind: FrameKind::Long,
            timestamp_ticks: 12_000,
            timestamp: 1.001,
            signal_level: 200,
            payload: vec![0x8D, 0x4C, 0xA1, 0xD3],
        };
        reg.merge(ICAO, &FieldUpdate::default().with_frame(FrameInfo::from_frame(&frame)), 1.0);
        let row = &reg.snapshot(1.0)[0];
        assert_eq!(row.rssi, Some(-56));
        assert_eq!(row.message_type, Some(FrameKind::Long));
        assert_eq!(row.raw_message.as_deref(), Some("8D4CA1D3"));
    }
}
