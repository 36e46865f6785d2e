//! Snapshot payloads published on the topic buses.
//!
//! Each snapshot replaces the previous one on its topic. The structs double as
//! the decoding targets for the upstream JSON bodies: upstream fields use the
//! upstream camelCase names, derived fields are never read from the wire.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::Resource;

/// Sentinel stored in a sector field when the time is not known.
pub const SECTOR_UNKNOWN: f64 = -1.0;

/// World-space position reported by the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CarVelocity {
    /// Metres per second.
    pub velocity: f64,
}

/// One row of the standings table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DriverStanding {
    pub driver_name: String,
    #[serde(rename = "slotID")]
    pub slot_id: i64,
    #[serde(deserialize_with = "string_or_number")]
    pub car_number: String,
    pub vehicle_name: String,
    pub car_class: String,
    pub position: u32,
    pub laps_completed: u32,
    pub sector: String,
    pub last_sector_time1: f64,
    pub last_sector_time2: f64,
    pub current_sector_time1: f64,
    pub current_sector_time2: f64,
    pub best_sector_time1: f64,
    pub best_sector_time2: f64,
    pub last_lap_time: f64,
    pub best_lap_time: f64,
    pub best_lap_sector_time1: f64,
    pub best_lap_sector_time2: f64,
    pub in_garage_stall: bool,
    pub pitting: bool,
    pub fuel_fraction: f64,
    pub car_position: Vec3,
    pub car_velocity: Option<CarVelocity>,

    #[serde(skip_deserializing)]
    pub best_sector_1: f64,
    #[serde(skip_deserializing)]
    pub best_sector_2: f64,
    #[serde(skip_deserializing)]
    pub best_sector_3: f64,
    #[serde(skip_deserializing)]
    pub best_lap_index: Option<u32>,
    /// 1-based lap number → best observed speed in km/h.
    #[serde(skip_deserializing)]
    pub top_speed_per_lap: BTreeMap<u32, f64>,
}

impl Default for DriverStanding {
    fn default() -> Self {
        Self {
            driver_name: String::new(),
            slot_id: 0,
            car_number: String::new(),
            vehicle_name: String::new(),
            car_class: String::new(),
            position: 0,
            laps_completed: 0,
            sector: String::new(),
            last_sector_time1: 0.0,
            last_sector_time2: 0.0,
            current_sector_time1: 0.0,
            current_sector_time2: 0.0,
            best_sector_time1: 0.0,
            best_sector_time2: 0.0,
            last_lap_time: 0.0,
            best_lap_time: 0.0,
            best_lap_sector_time1: 0.0,
            best_lap_sector_time2: 0.0,
            in_garage_stall: false,
            pitting: false,
            fuel_fraction: 0.0,
            car_position: Vec3::default(),
            car_velocity: None,
            best_sector_1: SECTOR_UNKNOWN,
            best_sector_2: SECTOR_UNKNOWN,
            best_sector_3: SECTOR_UNKNOWN,
            best_lap_index: None,
            top_speed_per_lap: BTreeMap::new(),
        }
    }
}

/// Standings for one server, ordered by position ascending.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Standings {
    pub server_id: String,
    pub server_name: String,
    pub drivers: Vec<DriverStanding>,
}

/// A completed lap in the standings history.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LapRecord {
    pub driver_name: String,
    #[serde(rename = "slotID")]
    pub slot_id: i64,
    pub position: u32,
    pub lap_time: f64,
    pub sector_time1: f64,
    /// Cumulative time at the end of sector 2.
    pub sector_time2: f64,
    pub total_laps: u32,
    pub pitting: bool,
    pub finish_status: String,
    pub vehicle_name: String,
    pub car_class: String,

    /// Best speed in km/h observed while this lap was driven, `0.0` if unseen.
    #[serde(skip_deserializing)]
    pub top_speed: f64,
    /// Slot key the lap was reported under.
    #[serde(skip_deserializing)]
    pub car_id: String,
}

/// Per-driver lap history for one server.
///
/// `driver_names` holds exactly the keys of `drivers_data`, ordered by the
/// last known position.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StandingsHistory {
    pub server_id: String,
    pub driver_names: Vec<String>,
    pub drivers_data: BTreeMap<String, Vec<LapRecord>>,
}

/// Session-wide state for one server.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionInfo {
    #[serde(skip_deserializing)]
    pub server_id: String,
    #[serde(skip_deserializing)]
    pub websocket_running: bool,
    #[serde(skip_deserializing)]
    pub receiving_data: bool,

    pub server_name: String,
    pub track_name: String,
    pub session: String,
    pub current_event_time: f64,
    pub end_event_time: f64,
    pub start_event_time: f64,
    pub maximum_laps: i64,
    pub lap_distance: f64,
    pub number_of_vehicles: i64,
    pub raining: f64,
    pub min_path_wetness: f64,
    pub average_path_wetness: f64,
    pub max_path_wetness: f64,
    pub ambient_temp: f64,
    pub track_temp: f64,
}

impl SessionInfo {
    /// The zero snapshot carrying only identity and liveness.
    pub fn zero(
        server_id: impl Into<String>,
        server_name: impl Into<String>,
        websocket_running: bool,
        receiving_data: bool,
    ) -> Self {
        Self {
            server_id: server_id.into(),
            server_name: server_name.into(),
            websocket_running,
            receiving_data,
            ..Self::default()
        }
    }
}

/// A car on the live map.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CarPosition {
    pub driver: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Car positions for one server; the race leader is the last element.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CarPositions {
    pub server_id: String,
    pub cars: Vec<CarPosition>,
}

/// Rising edge of the vehicle count within a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FirstDriverEntered {
    pub server_id: String,
    pub server_name: String,
    pub session_type: String,
    pub track_name: String,
    pub event_time: f64,
    pub observed_at: DateTime<Utc>,
}

/// An `{id, name}` pair in the upstream race selection.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetRef {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub name: String,
}

/// Upstream `GET /rest/race/selection` body.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectedSession {
    pub series: AssetRef,
    pub track: AssetRef,
    pub car: AssetRef,
}

/// The selected session together with its rendered track map.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TrackThumbnail {
    pub server_id: String,
    pub selection: SelectedSession,
    pub svg: Resource,
}

/// Accept either a JSON string or a JSON number for identifier-like fields.
pub fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Int(i64),
        Float(f64),
        Null,
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Str(s) => s,
        Raw::Int(i) => i.to_string(),
        Raw::Float(f) => f.to_string(),
        Raw::Null => String::new(),
    })
}
