//! `livetiming-middleware` – the live telemetry fan-out core.
//!
//! # Modules
//!
//! - [`bus`] – typed topic bus with synchronous, back-pressured fan-out.
//! - [`frames`] – two-step decoding of upstream `{type, body}` envelopes.
//! - [`enrich`] – best sectors, best laps, top speeds and session edges.
//! - [`connector`] – one streaming connection per telemetry server.
//! - [`registry`] – the configured servers and their last known liveness.
//! - [`assets`] – the seam through which the connector obtains track maps.

use std::sync::Arc;

use livetiming_types::{
    CarPositions, FirstDriverEntered, SessionInfo, Standings, StandingsHistory, TrackThumbnail,
};

pub mod assets;
pub mod bus;
pub mod connector;
pub mod enrich;
pub mod frames;
pub mod registry;

pub use assets::TrackAssets;
pub use bus::{Subscription, TopicBus};
pub use connector::{ConnectorConfig, ServerConnector};
pub use registry::ServerRegistry;

/// One bus per payload type, constructed once at startup and handed to every
/// component. Cloning shares the underlying buses.
#[derive(Clone, Debug, Default)]
pub struct Buses {
    pub session_info: TopicBus<Arc<SessionInfo>>,
    pub standings: TopicBus<Arc<Standings>>,
    pub standings_history: TopicBus<Arc<StandingsHistory>>,
    pub car_positions: TopicBus<Arc<CarPositions>>,
    pub track_thumbnail: TopicBus<Arc<TrackThumbnail>>,
    pub first_driver_entered: TopicBus<Arc<FirstDriverEntered>>,
}

impl Buses {
    /// Fresh buses with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }
}
