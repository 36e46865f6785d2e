//! Resource Cache – rendered track maps and car images on disk.
//!
//! Files live under one directory with deterministic names
//! (`track_<id>.svg`, `car_<id>.png`, `car_<id>_small.png`). A file that
//! exists is never fetched again. Builds write to a `.part` file first and
//! rename it into place, so a failed or cancelled build leaves nothing behind
//! and the next request retries. Builds for the same file are serialised by a
//! per-file lock.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use livetiming_middleware::TrackAssets;
use livetiming_trackmap::Waypoint;
use livetiming_types::{LiveError, Resource, ResourceKind, SelectedSession};
use serde::de::DeserializeOwned;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Per-request timeout of upstream REST calls.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(5);

/// On-disk cache of rendered track maps and car images.
pub struct ResourceCache {
    dir: PathBuf,
    client: reqwest::Client,
    building: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl std::fmt::Debug for ResourceCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceCache").field("dir", &self.dir).finish()
    }
}

impl ResourceCache {
    /// Create the cache rooted at `dir`, creating the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, LiveError> {
        Self::with_timeout(dir, HTTP_TIMEOUT)
    }

    /// Like [`new`](Self::new) with a custom per-request timeout.
    ///
    /// # Errors
    ///
    /// [`LiveError::Io`] if `dir` cannot be created, [`LiveError::Network`]
    /// if the HTTP client cannot be built.
    pub fn with_timeout(dir: impl Into<PathBuf>, timeout: Duration) -> Result<Self, LiveError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LiveError::Network(e.to_string()))?;
        Ok(Self {
            dir,
            client,
            building: Mutex::new(HashMap::new()),
        })
    }

    /// Directory holding the cached files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Return the cached resource for `(kind, id)`, running `builder` only
    /// when the file does not exist yet.
    ///
    /// `builder` receives a scratch path and must write the complete payload
    /// there.
    pub async fn build<F, Fut>(
        &self,
        kind: ResourceKind,
        id: &str,
        builder: F,
    ) -> Result<Resource, LiveError>
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = Result<(), LiveError>>,
    {
        validate_id(id)?;
        let file_name = kind.file_name(id);
        let path = self.dir.join(&file_name);

        let lock = self.lock_for(&file_name);
        let _building = lock.lock().await;

        if tokio::fs::try_exists(&path).await? {
            debug!(file = %file_name, "resource cache hit");
            return Ok(Resource::new(kind, path));
        }

        let scratch = self.dir.join(format!(".{file_name}.part"));
        match builder(scratch.clone()).await {
            Ok(()) => {
                tokio::fs::rename(&scratch, &path).await?;
                info!(file = %file_name, "resource built");
                Ok(Resource::new(kind, path))
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&scratch).await;
                Err(e)
            }
        }
    }

    fn lock_for(&self, file_name: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut building = self.building.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(building.entry(file_name.to_string()).or_default())
    }

    // ── Upstream assets ──────────────────────────────────────────────────────

    /// `GET /rest/race/selection`.
    pub async fn selected_session(
        &self,
        cancel: &CancellationToken,
        base_url: &str,
    ) -> Result<SelectedSession, LiveError> {
        let url = format!("{}/rest/race/selection", rest_base(base_url));
        self.get_json(cancel, &url).await
    }

    /// The rendered SVG of track `track_id`.
    pub async fn track_svg(
        &self,
        cancel: &CancellationToken,
        base_url: &str,
        track_id: &str,
    ) -> Result<Resource, LiveError> {
        let url = format!("{}/rest/race/track/{track_id}/trackmap", rest_base(base_url));
        self.build(ResourceKind::TrackSvg, track_id, |scratch| async move {
            let waypoints: Vec<Waypoint> = self.get_json(cancel, &url).await?;
            let svg = livetiming_trackmap::render(&waypoints)?;
            tokio::fs::write(&scratch, svg).await?;
            Ok(())
        })
        .await
    }

    /// The PNG image of car `car_id`, optionally the small variant.
    pub async fn car_image(
        &self,
        cancel: &CancellationToken,
        base_url: &str,
        car_id: &str,
        small: bool,
    ) -> Result<Resource, LiveError> {
        let mut url = format!("{}/rest/race/car/{car_id}/image", rest_base(base_url));
        let kind = if small {
            url.push_str("?type=IMAGE_SMALL");
            ResourceKind::CarImageSmall
        } else {
            ResourceKind::CarImage
        };

        self.build(kind, car_id, |scratch| async move {
            let mut response = self.get(cancel, &url).await?;
            let mut file = tokio::fs::File::create(&scratch).await?;
            loop {
                let chunk = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(LiveError::Cancelled),
                    chunk = response.chunk() => chunk.map_err(network)?,
                };
                match chunk {
                    Some(bytes) => file.write_all(&bytes).await?,
                    None => break,
                }
            }
            file.flush().await?;
            Ok(())
        })
        .await
    }

    // ── HTTP helpers ─────────────────────────────────────────────────────────

    async fn get(&self, cancel: &CancellationToken, url: &str) -> Result<reqwest::Response, LiveError> {
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LiveError::Cancelled),
            response = self.client.get(url).send() => response.map_err(network)?,
        };
        let status = response.status();
        if !status.is_success() {
            return Err(LiveError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        cancel: &CancellationToken,
        url: &str,
    ) -> Result<T, LiveError> {
        let response = self.get(cancel, url).await?;
        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LiveError::Cancelled),
            body = response.bytes() => body.map_err(network)?,
        };
        serde_json::from_slice(&body).map_err(|e| LiveError::Parsing(format!("{url}: {e}")))
    }
}

#[async_trait]
impl TrackAssets for ResourceCache {
    async fn track_thumbnail(
        &self,
        base_url: &str,
        cancel: &CancellationToken,
    ) -> Result<(SelectedSession, Resource), LiveError> {
        let selection = self.selected_session(cancel, base_url).await?;
        if selection.track.id.is_empty() {
            return Err(LiveError::InvalidResource("no track selected".into()));
        }
        let svg = self.track_svg(cancel, base_url, &selection.track.id).await?;
        Ok((selection, svg))
    }
}

fn network(e: reqwest::Error) -> LiveError {
    LiveError::Network(e.without_url().to_string())
}

/// Asset ids become file names; reject anything that could escape the directory.
fn validate_id(id: &str) -> Result<(), LiveError> {
    let valid = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !id.starts_with('.');
    if valid {
        Ok(())
    } else {
        Err(LiveError::InvalidResource(format!("invalid asset id: {id:?}")))
    }
}

fn rest_base(base_url: &str) -> String {
    let trimmed = base_url.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    }
}
