//! Persistent state of the live-timing bot.
//!
//! - [`subscriptions`] – which chat users want to hear about which session
//!   starts, kept in a single SQLite table.

pub mod subscriptions;

pub use subscriptions::{Notifications, Recipient, SubscriptionError, SubscriptionStore};
