//! [`LiveMapRelay`] – projected car positions for one server's live map.
//!
//! A relay is Running between [`start_session`](LiveMapRelay::start_session)
//! and [`stop_session`](LiveMapRelay::stop_session). While Running, every
//! car-positions snapshot is projected onto the session's track SVG and kept
//! as the current list. Browsers connected to `/<id>/livemap` receive that
//! list every [`TICK`].

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use livetiming_middleware::Buses;
use livetiming_trackmap::{ProjectedCar, SvgMeta};
use livetiming_types::{CarPositions, LiveError, Resource, SelectedSession, topic};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Push interval of the live-map WebSocket.
pub const TICK: Duration = Duration::from_millis(100);

#[derive(Debug)]
struct Session {
    selection: SelectedSession,
    meta: SvgMeta,
    track_file: String,
}

#[derive(Debug, Default)]
struct RelayState {
    session: Option<Session>,
    cars: Vec<ProjectedCar>,
}

#[derive(Clone, Debug)]
pub struct LiveMapRelay {
    server_id: String,
    state: Arc<Mutex<RelayState>>,
}

impl LiveMapRelay {
    /// A stopped relay for server `server_id`.
    pub fn new(server_id: impl Into<String>) -> Self {
        Self {
            server_id: server_id.into(),
            state: Arc::new(Mutex::new(RelayState::default())),
        }
    }

    /// Id of the server this relay belongs to; also its URL prefix.
    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    fn state(&self) -> MutexGuard<'_, RelayState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Read the projection from the SVG's metadata line and start projecting.
    ///
    /// # Errors
    ///
    /// [`LiveError::Io`] if the SVG cannot be read, [`LiveError::InvalidResource`]
    /// or [`LiveError::Parsing`] if its metadata line is missing or malformed.
    /// The relay keeps its previous state on error.
    pub async fn start_session(&self, selection: SelectedSession, svg: &Resource) -> Result<(), LiveError> {
        let text = tokio::fs::read_to_string(svg.file_path()).await?;
        let meta = livetiming_trackmap::parse_meta(&text)?;
        info!(server = %self.server_id, track = %selection.track.name, "live map session started");
        let mut state = self.state();
        state.session = Some(Session {
            selection,
            meta,
            track_file: svg.file_name(),
        });
        state.cars.clear();
        Ok(())
    }

    /// Stop projecting and forget the current positions.
    pub fn stop_session(&self) {
        let mut state = self.state();
        if state.session.take().is_some() {
            info!(server = %self.server_id, "live map session stopped");
        }
        state.cars.clear();
    }

    /// Whether a session is running.
    pub fn is_running(&self) -> bool {
        self.state().session.is_some()
    }

    /// File name of the current track SVG inside the resource directory.
    pub fn track_file(&self) -> Option<String> {
        self.state().session.as_ref().map(|s| s.track_file.clone())
    }

    /// Name of the running session's track.
    pub fn track_name(&self) -> Option<String> {
        self.state()
            .session
            .as_ref()
            .map(|s| s.selection.track.name.clone())
    }

    /// The latest projected list, leader last.
    pub fn positions(&self) -> Vec<ProjectedCar> {
        self.state().cars.clone()
    }

    /// Project and store a car-positions snapshot. Ignored unless Running.
    pub fn apply_positions(&self, positions: &CarPositions) {
        let mut state = self.state();
        let Some(session) = &state.session else {
            return;
        };
        let projected = session.meta.project_cars(&positions.cars);
        state.cars = projected;
    }

    /// Wire the relay to its server's topics:
    ///
    /// * `carsPosition-<id>` → [`apply_positions`](Self::apply_positions)
    /// * `trackThumbnail-<id>` → [`start_session`](Self::start_session), or
    ///   [`stop_session`](Self::stop_session) for the zero thumbnail
    /// * `sessionInfo-<id>` with `websocket_running=false` → [`stop_session`](Self::stop_session)
    ///
    /// All subscriptions are registered before this returns.
    pub fn spawn(&self, buses: &Buses, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        let id = self.server_id.as_str();
        let mut positions = buses.car_positions.subscribe(topic::car_positions(id));
        let mut thumbnails = buses.track_thumbnail.subscribe(topic::track_thumbnail(id));
        let mut infos = buses.session_info.subscribe(topic::session_info(id));

        let relay = self.clone();
        let token = cancel.clone();
        let positions_task = tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    _ = token.cancelled() => break,
                    next = positions.recv() => next,
                };
                let Some(snapshot) = next else { break };
                relay.apply_positions(&snapshot);
            }
        });

        let relay = self.clone();
        let token = cancel.clone();
        let thumbnail_task = tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    _ = token.cancelled() => break,
                    next = thumbnails.recv() => next,
                };
                let Some(thumbnail) = next else { break };
                if thumbnail.svg.is_zero() {
                    relay.stop_session();
                } else if let Err(e) = relay.start_session(thumbnail.selection.clone(), &thumbnail.svg).await {
                    warn!(server = %relay.server_id, error = %e, "could not start live map session");
                }
            }
        });

        let relay = self.clone();
        let token = cancel;
        let session_task = tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    _ = token.cancelled() => break,
                    next = infos.recv() => next,
                };
                let Some(info) = next else { break };
                if !info.websocket_running {
                    relay.stop_session();
                }
            }
        });

        vec![positions_task, thumbnail_task, session_task]
    }

    /// Serve one browser: wait for its first message, then push the current
    /// list every [`TICK`] until it disconnects or `cancel` fires.
    pub async fn serve_ws<S>(&self, socket: WebSocketStream<S>, cancel: CancellationToken) -> Result<(), LiveError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (mut tx, mut rx) = socket.split();

        let hello = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            hello = rx.next() => hello,
        };
        match hello {
            Some(Ok(Message::Close(_))) | None => return Ok(()),
            Some(Err(e)) => return Err(LiveError::Network(e.to_string())),
            Some(Ok(_)) => {}
        }
        debug!(server = %self.server_id, "live map client ready");

        let mut ticker = tokio::time::interval(TICK);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = tx.send(Message::Close(None)).await;
                    break;
                }
                _ = ticker.tick() => {
                    let json = serde_json::to_string(&self.positions())
                        .map_err(|e| LiveError::Parsing(e.to_string()))?;
                    if tx.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                msg = rx.next() => match msg {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => {}
                },
            }
        }
        debug!(server = %self.server_id, "live map client gone");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livetiming_trackmap::Waypoint;
    use livetiming_types::snapshot::AssetRef;
    use livetiming_types::{CarPosition, ResourceKind, SessionInfo, TrackThumbnail};
    use std::path::Path;
    use tokio::time::timeout;

    fn write_track(dir: &Path) -> Resource {
        let waypoints: Vec<Waypoint> = serde_json::from_str(
            r#"[{"type":0,"x":0,"z":0},{"type":0,"x":200,"z":0},{"type":0,"x":200,"z":80}]"#,
        )
        .unwrap();
        let path = dir.join("track_17.svg");
        std::fs::write(&path, livetiming_trackmap::render(&waypoints).unwrap()).unwrap();
        Resource::new(ResourceKind::TrackSvg, path)
    }

    fn selection() -> SelectedSession {
        SelectedSession {
            track: AssetRef {
                id: "17".into(),
                name: "Spa".into(),
            },
            ..SelectedSession::default()
        }
    }

    fn cars() -> CarPositions {
        CarPositions {
            server_id: "srv".into(),
            cars: vec![
                CarPosition { driver: "TAI".into(), x: 10.0, y: 0.0, z: 5.0 },
                CarPosition { driver: "LEA".into(), x: 150.0, y: 0.0, z: 60.0 },
            ],
        }
    }

    #[tokio::test]
    async fn positions_are_projected_only_while_running() {
        let dir = tempfile::tempdir().unwrap();
        let svg = write_track(dir.path());
        let relay = LiveMapRelay::new("srv");

        relay.apply_positions(&cars());
        assert!(relay.positions().is_empty());

        relay.start_session(selection(), &svg).await.unwrap();
        assert!(relay.is_running());
        assert_eq!(relay.track_file().as_deref(), Some("track_17.svg"));
        assert_eq!(relay.track_name().as_deref(), Some("Spa"));

        relay.apply_positions(&cars());
        let meta = livetiming_trackmap::read_meta(svg.file_path()).unwrap();
        let projected = relay.positions();
        assert_eq!(projected.len(), 2);
        assert_eq!(projected[1].driver, "LEA");
        assert_eq!((projected[1].x, projected[1].y), meta.project(150.0, 60.0));

        relay.stop_session();
        assert!(!relay.is_running());
        assert!(relay.positions().is_empty());
        relay.apply_positions(&cars());
        assert!(relay.positions().is_empty());
    }

    #[tokio::test]
    async fn start_session_requires_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("track_1.svg");
        std::fs::write(&path, "<svg></svg>").unwrap();
        let relay = LiveMapRelay::new("srv");
        let result = relay.start_session(selection(), &Resource::new(ResourceKind::TrackSvg, path)).await;
        assert!(matches!(result, Err(LiveError::InvalidResource(_))));
        assert!(!relay.is_running());

        let missing = Resource::new(ResourceKind::TrackSvg, dir.path().join("track_2.svg"));
        assert!(matches!(relay.start_session(selection(), &missing).await, Err(LiveError::Io(_))));
    }

    #[tokio::test]
    async fn follows_thumbnail_positions_and_liveness_topics() {
        let dir = tempfile::tempdir().unwrap();
        let svg = write_track(dir.path());
        let buses = Buses::new();
        let relay = LiveMapRelay::new("srv");
        let cancel = CancellationToken::new();
        let handles = relay.spawn(&buses, cancel.clone());

        let thumbnail = Arc::new(TrackThumbnail {
            server_id: "srv".into(),
            selection: selection(),
            svg,
        });
        buses
            .track_thumbnail
            .publish(&topic::track_thumbnail("srv"), Arc::clone(&thumbnail))
            .await;
        wait_for(|| relay.is_running()).await;

        buses
            .car_positions
            .publish(&topic::car_positions("srv"), Arc::new(cars()))
            .await;
        wait_for(|| relay.positions().len() == 2).await;

        // Up-NoData keeps the session.
        buses
            .session_info
            .publish(&topic::session_info("srv"), Arc::new(SessionInfo::zero("srv", "srv", true, false)))
            .await;
        buses
            .session_info
            .publish(&topic::session_info("srv"), Arc::new(SessionInfo::zero("srv", "srv", false, false)))
            .await;
        wait_for(|| !relay.is_running()).await;

        // The zero thumbnail published when the upstream goes away also stops it.
        buses
            .track_thumbnail
            .publish(&topic::track_thumbnail("srv"), thumbnail)
            .await;
        wait_for(|| relay.is_running()).await;
        let zero = TrackThumbnail {
            server_id: "srv".into(),
            ..TrackThumbnail::default()
        };
        buses
            .track_thumbnail
            .publish(&topic::track_thumbnail("srv"), Arc::new(zero))
            .await;
        wait_for(|| !relay.is_running()).await;

        cancel.cancel();
        for handle in handles {
            handle.await.unwrap();
        }
    }

    async fn wait_for(condition: impl Fn() -> bool) {
        timeout(Duration::from_secs(2), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached");
    }
}
