//! Decoding of the upstream `{type, body}` telemetry envelopes.
//!
//! Decoding happens in two steps: the envelope first, then the body according
//! to its `type`. A malformed body fails locally and never touches connector
//! state.

use std::collections::BTreeMap;

use livetiming_types::{DriverStanding, LapRecord, LiveError, SessionInfo};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    body: Value,
}

/// A decoded telemetry frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Standings(Vec<DriverStanding>),
    /// Slot key → laps completed under that slot.
    StandingsHistory(BTreeMap<String, Vec<LapRecord>>),
    SessionInfo(SessionInfo),
}

impl Frame {
    /// The envelope `type` this frame was decoded from.
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Standings(_) => "standings",
            Frame::StandingsHistory(_) => "standingsHistory",
            Frame::SessionInfo(_) => "sessionInfo",
        }
    }
}

/// Decode one text message.
///
/// Returns `Ok(None)` for envelopes of an unrecognised type and
/// [`LiveError::Parsing`] when the envelope or its body is malformed.
pub fn decode(text: &str) -> Result<Option<Frame>, LiveError> {
    let envelope: Envelope = serde_json::from_str(text)
        .map_err(|e| LiveError::Parsing(format!("envelope: {e}")))?;

    let frame = match envelope.kind.as_str() {
        "standings" => Frame::Standings(body(&envelope.kind, envelope.body)?),
        "standingsHistory" => Frame::StandingsHistory(body(&envelope.kind, envelope.body)?),
        "sessionInfo" => Frame::SessionInfo(body(&envelope.kind, envelope.body)?),
        _ => return Ok(None),
    };
    Ok(Some(frame))
}

fn body<T: DeserializeOwned>(kind: &str, body: Value) -> Result<T, LiveError> {
    let parsed = match body {
        // Some upstream builds send the body as an encoded JSON string.
        Value::String(raw) => serde_json::from_str(&raw),
        other => serde_json::from_value(other),
    };
    parsed.map_err(|e| LiveError::Parsing(format!("{kind} body: {e}")))
}
