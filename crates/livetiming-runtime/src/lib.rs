//! `livetiming-runtime` – the side-effecting services around the fan-out core.
//!
//! # Modules
//!
//! - [`resources`] – [`ResourceCache`][resources::ResourceCache]: on-disk cache
//!   of rendered track maps and car images, fetched from the upstream REST API
//!   at most once per asset. Implements the connector's
//!   [`TrackAssets`][livetiming_middleware::TrackAssets] seam.
//! - [`chat`] – [`ChatSender`][chat::ChatSender] and its Telegram
//!   implementation.
//! - [`dispatcher`] – [`NotificationDispatcher`][dispatcher::NotificationDispatcher]:
//!   turns first-driver-entered events into one chat message per subscribed
//!   user.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: the global
//!   `tracing` subscriber with an optional OTLP span exporter.

pub mod chat;
pub mod dispatcher;
pub mod resources;
pub mod telemetry;

#[cfg(test)]
pub(crate) mod fake_http;

pub use chat::{ChatSender, TelegramSender};
pub use dispatcher::NotificationDispatcher;
pub use resources::ResourceCache;
