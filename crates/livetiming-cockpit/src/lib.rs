//! `livetiming-cockpit` – the bot's web surface.
//!
//! Serves the Resource Cache directory under `/resources/` and, per configured
//! server, a live-map page at `/<id>/live` whose WebSocket `/<id>/livemap`
//! streams car positions projected onto the session's track SVG.

pub mod relay;
pub mod server;

pub use relay::{LiveMapRelay, TICK};
pub use server::{CockpitServer, DEFAULT_ADDRESS, listen_address};
