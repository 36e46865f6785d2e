//! Canonical topic names.
//!
//! Topics are opaque strings. Per-server topics carry the server id as a
//! suffix so one bus instance can serve every connector.

pub const SESSION_INFO_PREFIX: &str = "sessionInfo-";
pub const STANDINGS_PREFIX: &str = "driversSession-";
pub const STANDINGS_HISTORY_PREFIX: &str = "stintData-";
pub const CAR_POSITIONS_PREFIX: &str = "carsPosition-";
pub const TRACK_THUMBNAIL_PREFIX: &str = "trackThumbnail-";

/// Topic of the derived session-start event. Not tied to a server.
pub const FIRST_DRIVER_ENTERED: &str = "firstDriverEntered";

pub fn session_info(server_id: &str) -> String {
    format!("{SESSION_INFO_PREFIX}{server_id}")
}

pub fn standings(server_id: &str) -> String {
    format!("{STANDINGS_PREFIX}{server_id}")
}

pub fn standings_history(server_id: &str) -> String {
    format!("{STANDINGS_HISTORY_PREFIX}{server_id}")
}

pub fn car_positions(server_id: &str) -> String {
    format!("{CAR_POSITIONS_PREFIX}{server_id}")
}

pub fn track_thumbnail(server_id: &str) -> String {
    format!("{TRACK_THUMBNAIL_PREFIX}{server_id}")
}
