//! Shared domain types for the live-timing fan-out core.
//!
//! Every crate in the workspace speaks in these types: the snapshots that flow
//! over the topic buses, the server records kept by the registry, the session
//! categories used for notifications and the cached [`Resource`] handles.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod short_code;
pub mod snapshot;
pub mod topic;

pub use short_code::short_code;
pub use snapshot::{
    CarPosition, CarPositions, DriverStanding, FirstDriverEntered, LapRecord, SECTOR_UNKNOWN,
    SelectedSession, SessionInfo, Standings, StandingsHistory, TrackThumbnail, Vec3,
};

/// Liveness of a single telemetry server as seen by its connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No streaming connection is open.
    #[default]
    Down,
    /// The connection is open but no frame arrived within the stall window.
    UpNoData,
    /// Frames are flowing.
    UpStreaming,
}

impl ConnectionState {
    /// Derive the state from the two liveness flags carried by a
    /// [`SessionInfo`] snapshot.
    pub fn from_flags(websocket_running: bool, receiving_data: bool) -> Self {
        match (websocket_running, receiving_data) {
            (false, _) => ConnectionState::Down,
            (true, false) => ConnectionState::UpNoData,
            (true, true) => ConnectionState::UpStreaming,
        }
    }
}

/// One configured telemetry endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Server {
    /// Stable identifier, used in topic names and HTTP prefixes.
    pub id: String,
    /// Base URL of the upstream (e.g. `http://10.0.0.5:5397`).
    pub url: String,
    /// Last server name observed in a session-info frame.
    pub name: String,
    pub state: ConnectionState,
}

impl Server {
    /// A server that is down, named after its id until the upstream reports
    /// a name.
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            url: url.into(),
            state: ConnectionState::Down,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session categories
// ─────────────────────────────────────────────────────────────────────────────

/// The category axis users subscribe to for session-start notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionCategory {
    TestDay,
    Practice,
    Qual,
    Warmup,
    Race,
}

impl SessionCategory {
    /// Every category in display order.
    pub const ALL: [SessionCategory; 5] = [
        SessionCategory::TestDay,
        SessionCategory::Practice,
        SessionCategory::Qual,
        SessionCategory::Warmup,
        SessionCategory::Race,
    ];

    /// Map an upstream session label (`"PRACTICE1"`, `"Qual1"`, …) to its
    /// category. Only the first session of each kind is recognised.
    pub fn from_session_type(session_type: &str) -> Option<Self> {
        match session_type.to_lowercase().as_str() {
            "testday" => Some(SessionCategory::TestDay),
            "practice1" => Some(SessionCategory::Practice),
            "qual1" => Some(SessionCategory::Qual),
            "warmup" => Some(SessionCategory::Warmup),
            "race1" => Some(SessionCategory::Race),
            _ => None,
        }
    }

    /// Name of the persisted column holding this flag.
    pub fn column(self) -> &'static str {
        match self {
            SessionCategory::TestDay => "testday",
            SessionCategory::Practice => "practice",
            SessionCategory::Qual => "qual",
            SessionCategory::Warmup => "warmup",
            SessionCategory::Race => "race",
        }
    }

    /// Human-readable label used in chat messages.
    pub fn label(self) -> &'static str {
        match self {
            SessionCategory::TestDay => "TestDay",
            SessionCategory::Practice => "Practice",
            SessionCategory::Qual => "Qual",
            SessionCategory::Warmup => "Warmup",
            SessionCategory::Race => "Race",
        }
    }
}

impl fmt::Display for SessionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for SessionCategory {
    type Err = LiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_lowercase();
        SessionCategory::ALL
            .into_iter()
            .find(|c| c.column() == lower)
            .ok_or_else(|| LiveError::Parsing(format!("unknown session category: {s}")))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Cached resources
// ─────────────────────────────────────────────────────────────────────────────

/// The kinds of rendered or downloaded assets kept on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ResourceKind {
    #[default]
    TrackSvg,
    CarImage,
    CarImageSmall,
}

impl ResourceKind {
    /// File name prefix.
    pub fn prefix(self) -> &'static str {
        match self {
            ResourceKind::TrackSvg => "track_",
            ResourceKind::CarImage | ResourceKind::CarImageSmall => "car_",
        }
    }

    /// File name suffix, extension included.
    pub fn suffix(self) -> &'static str {
        match self {
            ResourceKind::TrackSvg => ".svg",
            ResourceKind::CarImage => ".png",
            ResourceKind::CarImageSmall => "_small.png",
        }
    }

    /// Deterministic file name for asset `id`: `<prefix><id><suffix>`.
    pub fn file_name(self, id: &str) -> String {
        format!("{}{}{}", self.prefix(), id, self.suffix())
    }
}

/// Handle to a file in the resource directory. The default value is the
/// "zero" resource that points nowhere.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Resource {
    pub kind: ResourceKind,
    path: PathBuf,
}

impl Resource {
    /// A resource of `kind` stored at `path`.
    pub fn new(kind: ResourceKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }

    /// `true` for the default resource that points nowhere.
    pub fn is_zero(&self) -> bool {
        self.path.as_os_str().is_empty()
    }

    /// Full path of the file.
    pub fn file_path(&self) -> &Path {
        &self.path
    }

    /// Last path component; empty for the zero resource.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Error type shared by the connector, the resource cache, the chat adapter
/// and the HTTP surface.
#[derive(Error, Debug)]
pub enum LiveError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Parsing error: {0}")]
    Parsing(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid resource: {0}")]
    InvalidResource(String),

    #[error("Chat delivery failed: {0}")]
    Chat(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Operation cancelled")]
    Cancelled,
}
