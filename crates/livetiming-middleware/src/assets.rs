//! Seam between the connector and whatever renders track assets.
//!
//! The connector never fetches or renders anything itself. On each successful
//! connect it asks its [`TrackAssets`] implementation for the selected session
//! and its track map, then publishes the result on `trackThumbnail-<id>`.

use async_trait::async_trait;
use livetiming_types::{LiveError, Resource, SelectedSession};
use tokio_util::sync::CancellationToken;

#[async_trait]
pub trait TrackAssets: Send + Sync {
    /// Fetch the selected session from `base_url` and return it together with
    /// the rendered track SVG.
    async fn track_thumbnail(
        &self,
        base_url: &str,
        cancel: &CancellationToken,
    ) -> Result<(SelectedSession, Resource), LiveError>;
}
