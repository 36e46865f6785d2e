//! [`ServerConnector`] – one streaming connection per telemetry server.
//!
//! The connector owns the WebSocket to `ws://<host>/websocket/controlpanel`,
//! decodes frames, enriches them and publishes snapshots on the well-known
//! topics of its server. It never fails: every problem ends in a zero
//! snapshot and, for connection loss, a reconnect after a fixed backoff.
//!
//! ```text
//! Down → Connecting → Up-NoData → Up-Streaming → (stall) → Up-NoData
//!                                              → (read error) → Down
//! Down ⇒ wait `reconnect_backoff`, retry.
//! ```
//!
//! Three parties share a connection:
//!
//! * the reader task owns the socket and hands each decoded frame over a
//!   single-slot channel,
//! * the dispatch task takes frames off that channel and publishes them,
//! * the connector itself runs the stall timer, which is reset only when the
//!   dispatch task takes a frame.
//!
//! Bus publishes wait for every subscriber, so a stalled subscriber blocks
//! the dispatch task and, one frame later, the reader. The stall timer keeps
//! running meanwhile and fires, which reaches everyone else as a
//! `receiving_data=false` session-info snapshot.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures_util::StreamExt;
use livetiming_types::{
    CarPositions, LiveError, SessionInfo, Standings, StandingsHistory, TrackThumbnail, topic,
};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::Buses;
use crate::assets::TrackAssets;
use crate::bus::TopicBus;
use crate::enrich::Enricher;
use crate::frames::{self, Frame};

/// Gap between frames after which the connection counts as stalled.
pub const STALL_TIMEOUT: Duration = Duration::from_secs(5);
/// Constant wait before every reconnect attempt.
pub const RECONNECT_BACKOFF: Duration = Duration::from_secs(15);
/// Upper bound on the WebSocket opening handshake.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

const CONTROL_PANEL_PATH: &str = "/websocket/controlpanel";

type UpstreamSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Enrichment state shared by the connector and its dispatch task.
type SharedEnricher = Arc<Mutex<Enricher>>;

/// Timing knobs of a connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectorConfig {
    /// Silence after which `receiving_data=false` is published.
    pub stall_timeout: Duration,
    /// Wait between a lost connection and the next attempt.
    pub reconnect_backoff: Duration,
    /// Upper bound on the opening handshake.
    pub handshake_timeout: Duration,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            stall_timeout: STALL_TIMEOUT,
            reconnect_backoff: RECONNECT_BACKOFF,
            handshake_timeout: HANDSHAKE_TIMEOUT,
        }
    }
}

/// Build the control-panel WebSocket URL for an upstream base URL.
///
/// `http://` becomes `ws://`, `https://` becomes `wss://` and a bare
/// `host:port` is treated as plain `ws://`.
pub fn websocket_url(base_url: &str) -> String {
    let trimmed = base_url.trim().trim_end_matches('/');
    let host = if let Some(rest) = trimmed.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = trimmed.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if trimmed.starts_with("ws://") || trimmed.starts_with("wss://") {
        trimmed.to_string()
    } else {
        format!("ws://{trimmed}")
    };
    format!("{host}{CONTROL_PANEL_PATH}")
}

/// Ingestion loop for one configured server.
pub struct ServerConnector {
    server_id: String,
    base_url: String,
    buses: Buses,
    assets: Option<Arc<dyn TrackAssets>>,
    config: ConnectorConfig,
}

impl ServerConnector {
    /// Create a connector for the server `server_id` reachable at `base_url`
    /// (`http://host:port`). Snapshots go to `buses`; nothing happens until
    /// [`run`](Self::run) is awaited.
    pub fn new(server_id: impl Into<String>, base_url: impl Into<String>, buses: Buses) -> Self {
        Self {
            server_id: server_id.into(),
            base_url: base_url.into(),
            buses,
            assets: None,
            config: ConnectorConfig::default(),
        }
    }

    /// Publish a track thumbnail from `assets` after every successful connect.
    pub fn with_assets(mut self, assets: Arc<dyn TrackAssets>) -> Self {
        self.assets = Some(assets);
        self
    }

    /// Replace the default timings (5 s stall, 15 s backoff, 10 s handshake).
    pub fn with_config(mut self, config: ConnectorConfig) -> Self {
        self.config = config;
        self
    }

    /// Id used in this connector's topic names.
    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// Run until `cancel` fires, reconnecting forever.
    pub async fn run(self, cancel: CancellationToken) {
        let url = websocket_url(&self.base_url);
        let enricher: SharedEnricher = Arc::new(Mutex::new(Enricher::new(self.server_id.clone())));
        info!(server = %self.server_id, url = %url, "connector started");

        while !cancel.is_cancelled() {
            debug!(server = %self.server_id, "connecting");
            let handshake = tokio::time::timeout(self.config.handshake_timeout, connect_async(url.as_str()));
            let outcome = tokio::select! {
                _ = cancel.cancelled() => break,
                outcome = handshake => outcome,
            };

            match outcome {
                Ok(Ok((socket, _response))) => {
                    info!(server = %self.server_id, "upstream connected");
                    lock(&enricher).reset();
                    self.stream(socket, &enricher, &cancel).await;
                }
                Ok(Err(e)) => {
                    warn!(server = %self.server_id, error = %e, "upstream connect failed");
                }
                Err(_) => {
                    warn!(server = %self.server_id, timeout = ?self.config.handshake_timeout, "upstream handshake timed out");
                }
            }

            if cancel.is_cancelled() {
                break;
            }
            let name = server_name(&enricher);
            self.publish_zero(&name, false, false, true, &cancel).await;

            info!(server = %self.server_id, backoff = ?self.config.reconnect_backoff, "waiting before reconnect");
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.reconnect_backoff) => {}
            }
        }

        info!(server = %self.server_id, "connector stopped");
    }

    /// Drive one open connection until it fails or `cancel` fires.
    async fn stream(&self, socket: UpstreamSocket, enricher: &SharedEnricher, cancel: &CancellationToken) {
        let name = server_name(enricher);
        self.publish_zero(&name, true, false, true, cancel).await;

        let connection = cancel.child_token();
        self.spawn_thumbnail(&connection);

        let (frame_tx, frame_rx) = mpsc::channel(1);
        let (taken_tx, mut taken_rx) = mpsc::unbounded_channel();
        let reader = tokio::spawn(read_frames(
            socket,
            frame_tx,
            connection.clone(),
            self.server_id.clone(),
        ));
        let dispatch = FrameDispatch {
            server_id: self.server_id.clone(),
            buses: self.buses.clone(),
            enricher: Arc::clone(enricher),
        };
        let dispatcher = tokio::spawn(dispatch.run(frame_rx, taken_tx, connection.clone()));

        let stall = tokio::time::sleep(self.config.stall_timeout);
        tokio::pin!(stall);
        let mut stalled = false;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                taken = taken_rx.recv() => match taken {
                    Some(()) => {
                        stall.as_mut().reset(Instant::now() + self.config.stall_timeout);
                        if stalled {
                            info!(server = %self.server_id, "frames resumed");
                            stalled = false;
                        }
                    }
                    None => {
                        warn!(server = %self.server_id, "upstream connection lost");
                        break;
                    }
                },
                _ = &mut stall, if !stalled => {
                    warn!(server = %self.server_id, window = ?self.config.stall_timeout, "no frames dispatched within stall window");
                    stalled = true;
                    // The track map stays valid while the socket is open.
                    let name = server_name(enricher);
                    self.publish_zero(&name, true, false, false, cancel).await;
                }
            }
        }

        connection.cancel();
        let _ = reader.await;
        let _ = dispatcher.await;
    }

    /// Publish a zero snapshot on the per-server topics.
    ///
    /// Session info goes out first and on its own, so liveness reaches its
    /// subscribers even when a subscriber of another topic is stuck. The
    /// remaining topics are published concurrently.
    async fn publish_zero(
        &self,
        name: &str,
        websocket_running: bool,
        receiving_data: bool,
        with_thumbnail: bool,
        cancel: &CancellationToken,
    ) {
        let id = self.server_id.as_str();

        let info = SessionInfo::zero(id, name, websocket_running, receiving_data);
        publish(&self.buses.session_info, &topic::session_info(id), Arc::new(info), cancel).await;

        let standings = Standings {
            server_id: id.to_string(),
            server_name: name.to_string(),
            drivers: Vec::new(),
        };
        let history = StandingsHistory {
            server_id: id.to_string(),
            ..StandingsHistory::default()
        };
        let positions = CarPositions {
            server_id: id.to_string(),
            cars: Vec::new(),
        };
        let thumbnail = TrackThumbnail {
            server_id: id.to_string(),
            ..TrackThumbnail::default()
        };

        let standings_topic = topic::standings(id);
        let history_topic = topic::standings_history(id);
        let positions_topic = topic::car_positions(id);
        let thumbnail_topic = topic::track_thumbnail(id);
        tokio::join!(
            publish(&self.buses.standings, &standings_topic, Arc::new(standings), cancel),
            publish(&self.buses.standings_history, &history_topic, Arc::new(history), cancel),
            publish(&self.buses.car_positions, &positions_topic, Arc::new(positions), cancel),
            async {
                if with_thumbnail {
                    publish(&self.buses.track_thumbnail, &thumbnail_topic, Arc::new(thumbnail), cancel).await;
                }
            }
        );
    }

    fn spawn_thumbnail(&self, connection: &CancellationToken) {
        let Some(assets) = self.assets.clone() else {
            return;
        };
        let bus = self.buses.track_thumbnail.clone();
        let server_id = self.server_id.clone();
        let base_url = self.base_url.clone();
        let cancel = connection.clone();

        tokio::spawn(async move {
            match assets.track_thumbnail(&base_url, &cancel).await {
                Ok((selection, svg)) => {
                    info!(server = %server_id, track = %selection.track.name, file = %svg.file_name(), "track thumbnail ready");
                    let thumbnail = TrackThumbnail {
                        server_id: server_id.clone(),
                        selection,
                        svg,
                    };
                    publish(&bus, &topic::track_thumbnail(&server_id), Arc::new(thumbnail), &cancel).await;
                }
                Err(LiveError::Cancelled) => {}
                Err(e) => warn!(server = %server_id, error = %e, "track thumbnail unavailable"),
            }
        });
    }
}

/// Publishing half of a connection.
struct FrameDispatch {
    server_id: String,
    buses: Buses,
    enricher: SharedEnricher,
}

impl FrameDispatch {
    /// Take frames until the reader goes away or `cancel` fires. Every taken
    /// frame is reported on `taken` before it is published.
    async fn run(self, mut frames: mpsc::Receiver<Frame>, taken: mpsc::UnboundedSender<()>, cancel: CancellationToken) {
        loop {
            let frame = tokio::select! {
                _ = cancel.cancelled() => break,
                frame = frames.recv() => frame,
            };
            let Some(frame) = frame else { break };
            if taken.send(()).is_err() {
                break;
            }
            self.dispatch(frame, &cancel).await;
        }
    }

    async fn dispatch(&self, frame: Frame, cancel: &CancellationToken) {
        let id = self.server_id.as_str();
        debug!(server = %id, kind = frame.kind(), "dispatching frame");
        match frame {
            Frame::Standings(drivers) => {
                let (standings, positions) = lock(&self.enricher).apply_standings(drivers);
                publish(&self.buses.standings, &topic::standings(id), Arc::new(standings), cancel).await;
                publish(&self.buses.car_positions, &topic::car_positions(id), Arc::new(positions), cancel).await;
            }
            Frame::StandingsHistory(groups) => {
                let history = lock(&self.enricher).apply_history(groups);
                publish(&self.buses.standings_history, &topic::standings_history(id), Arc::new(history), cancel).await;
            }
            Frame::SessionInfo(info) => {
                let (info, entered) = lock(&self.enricher).apply_session_info(info, true, true);
                publish(&self.buses.session_info, &topic::session_info(id), Arc::new(info), cancel).await;
                if let Some(event) = entered {
                    info!(server = %id, session = %event.session_type, "first driver entered");
                    publish(&self.buses.first_driver_entered, topic::FIRST_DRIVER_ENTERED, Arc::new(event), cancel).await;
                }
            }
        }
    }
}

fn lock(enricher: &Mutex<Enricher>) -> MutexGuard<'_, Enricher> {
    enricher.lock().unwrap_or_else(|e| e.into_inner())
}

fn server_name(enricher: &Mutex<Enricher>) -> String {
    lock(enricher).server_name().to_string()
}

/// Publish unless `cancel` fires first.
async fn publish<T: Clone + Send + 'static>(
    bus: &TopicBus<T>,
    topic: &str,
    value: T,
    cancel: &CancellationToken,
) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = bus.publish(topic, value) => {}
    }
}

/// Reader task: owns the socket and forwards decoded frames.
///
/// Malformed frames are logged and skipped. Returns, dropping `frames`, when
/// the socket fails or closes or when `cancel` fires.
async fn read_frames(
    mut socket: UpstreamSocket,
    frames: mpsc::Sender<Frame>,
    cancel: CancellationToken,
    server_id: String,
) {
    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => break,
            message = socket.next() => message,
        };

        let decoded = match message {
            Some(Ok(Message::Text(text))) => frames::decode(text.as_str()),
            Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                Ok(text) => frames::decode(text),
                Err(e) => Err(LiveError::Parsing(format!("binary frame is not UTF-8: {e}"))),
            },
            Some(Ok(Message::Close(reason))) => {
                info!(server = %server_id, reason = ?reason, "upstream closed the connection");
                break;
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                warn!(server = %server_id, error = %e, "upstream read failed");
                break;
            }
            None => break,
        };

        match decoded {
            Ok(Some(frame)) => {
                let handed_over = tokio::select! {
                    _ = cancel.cancelled() => false,
                    sent = frames.send(frame) => sent.is_ok(),
                };
                if !handed_over {
                    break;
                }
            }
            Ok(None) => debug!(server = %server_id, "ignoring frame of unknown type"),
            Err(e) => warn!(server = %server_id, error = %e, "skipping malformed frame"),
        }
    }

    let _ = socket.close(None).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::SinkExt;
    use livetiming_types::SECTOR_UNKNOWN;
    use tokio::net::TcpListener;
    use tokio::time::timeout;
    use tokio_tungstenite::accept_async;

    type FakeSocket = WebSocketStream<TcpStream>;

    /// Accepts WebSocket connections and hands each one to the test.
    async fn fake_upstream() -> (String, mpsc::UnboundedReceiver<FakeSocket>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                if let Ok(ws) = accept_async(stream).await {
                    if tx.send(ws).is_err() {
                        break;
                    }
                }
            }
        });
        (format!("http://{addr}"), rx)
    }

    fn fast_config() -> ConnectorConfig {
        ConnectorConfig {
            stall_timeout: Duration::from_millis(300),
            reconnect_backoff: Duration::from_millis(200),
            handshake_timeout: Duration::from_secs(2),
        }
    }

    async fn next<T>(sub: &mut crate::Subscription<T>) -> T {
        timeout(Duration::from_secs(3), sub.recv())
            .await
            .expect("timed out waiting for a publish")
            .expect("bus closed")
    }

    async fn send(socket: &mut FakeSocket, text: &str) {
        socket.send(Message::Text(text.to_string().into())).await.unwrap();
    }

    #[test]
    fn websocket_url_variants() {
        assert_eq!(websocket_url("http://10.0.0.5:5397"), "ws://10.0.0.5:5397/websocket/controlpanel");
        assert_eq!(websocket_url("https://race.example/"), "wss://race.example/websocket/controlpanel");
        assert_eq!(websocket_url("host:5397"), "ws://host:5397/websocket/controlpanel");
        assert_eq!(websocket_url("ws://host"), "ws://host/websocket/controlpanel");
    }

    #[test]
    fn default_timings() {
        let config = ConnectorConfig::default();
        assert_eq!(config.stall_timeout, Duration::from_secs(5));
        assert_eq!(config.reconnect_backoff, Duration::from_secs(15));
        assert_eq!(config.handshake_timeout, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn stall_publishes_receiving_false_once() {
        let (base, mut sockets) = fake_upstream().await;
        let buses = Buses::new();
        let mut info = buses.session_info.subscribe(topic::session_info("srv"));
        let mut thumbnails = buses.track_thumbnail.subscribe(topic::track_thumbnail("srv"));

        let cancel = CancellationToken::new();
        let connector = ServerConnector::new("srv", base, buses.clone()).with_config(fast_config());
        let handle = tokio::spawn(connector.run(cancel.clone()));

        let mut upstream = timeout(Duration::from_secs(3), sockets.recv()).await.unwrap().unwrap();
        let connected = next(&mut info).await;
        assert!(connected.websocket_running);
        assert!(!connected.receiving_data);
        assert!(next(&mut thumbnails).await.svg.is_zero());

        // A malformed frame is skipped without dropping the connection.
        send(&mut upstream, "garbage").await;
        send(&mut upstream, r#"{"type":"sessionInfo","body":{"session":"RACE1","serverName":"Club"}}"#).await;
        let streaming = next(&mut info).await;
        assert!(streaming.receiving_data);
        assert_eq!(streaming.server_name, "Club");
        let last_frame = Instant::now();

        let stalled = next(&mut info).await;
        assert!(stalled.websocket_running);
        assert!(!stalled.receiving_data);
        assert_eq!(stalled.server_name, "Club");
        assert!(last_frame.elapsed() >= Duration::from_millis(250));

        // Exactly once per stall, and the track map survives it.
        assert!(timeout(Duration::from_millis(700), info.recv()).await.is_err());
        assert!(timeout(Duration::from_millis(50), thumbnails.recv()).await.is_err());

        cancel.cancel();
        timeout(Duration::from_secs(3), handle).await.unwrap().unwrap();
        drop(upstream);
    }

    #[tokio::test]
    async fn blocked_subscriber_trips_the_stall_detector() {
        let (base, mut sockets) = fake_upstream().await;
        let buses = Buses::new();
        let mut info = buses.session_info.subscribe(topic::session_info("srv"));
        let mut standings = buses.standings.subscribe(topic::standings("srv"));

        let cancel = CancellationToken::new();
        let connector = ServerConnector::new("srv", base, buses.clone()).with_config(fast_config());
        let handle = tokio::spawn(connector.run(cancel.clone()));

        let mut upstream = timeout(Duration::from_secs(3), sockets.recv()).await.unwrap().unwrap();
        assert!(!next(&mut info).await.receiving_data);
        assert!(next(&mut standings).await.drivers.is_empty());

        // The standings subscriber stops reading while the upstream keeps
        // sending frames.
        send(&mut upstream, r#"{"type":"standings","body":[{"driverName":"A","position":1}]}"#).await;
        let sent = Instant::now();
        let feeder = tokio::spawn(async move {
            for _ in 0..10 {
                tokio::time::sleep(Duration::from_millis(100)).await;
                let frame = r#"{"type":"sessionInfo","body":{"session":"RACE1"}}"#.to_string();
                if upstream.send(Message::Text(frame.into())).await.is_err() {
                    break;
                }
            }
            upstream
        });

        let stalled = next(&mut info).await;
        assert!(stalled.websocket_running);
        assert!(!stalled.receiving_data);
        assert!(sent.elapsed() >= Duration::from_millis(250));

        // Once the subscriber catches up, the queued frames flow again.
        assert_eq!(next(&mut standings).await.drivers.len(), 1);
        tokio::spawn(async move { while standings.recv().await.is_some() {} });
        assert!(next(&mut info).await.receiving_data);

        cancel.cancel();
        timeout(Duration::from_secs(3), handle).await.unwrap().unwrap();
        let _ = feeder.await;
    }

    #[tokio::test]
    async fn reconnect_after_loss_resets_best_sectors() {
        let (base, mut sockets) = fake_upstream().await;
        let buses = Buses::new();
        let mut info = buses.session_info.subscribe(topic::session_info("srv"));
        let mut standings = buses.standings.subscribe(topic::standings("srv"));

        let cancel = CancellationToken::new();
        let connector = ServerConnector::new("srv", base, buses.clone()).with_config(ServerConnectorTestConfig::long_stall());
        let handle = tokio::spawn(connector.run(cancel.clone()));

        let mut first = timeout(Duration::from_secs(3), sockets.recv()).await.unwrap().unwrap();
        assert!(next(&mut info).await.websocket_running);
        assert!(next(&mut standings).await.drivers.is_empty());

        send(&mut first, r#"{"type":"standingsHistory","body":{"0":[
            {"driverName":"A","sectorTime1":30.1,"sectorTime2":60.2,"lapTime":90.5,"totalLaps":1,"position":1},
            {"driverName":"A","sectorTime1":29.9,"sectorTime2":60.3,"lapTime":90.8,"totalLaps":2,"position":1}
        ]}}"#).await;
        send(&mut first, r#"{"type":"standings","body":[{"driverName":"A","position":1}]}"#).await;
        let enriched = next(&mut standings).await;
        assert!((enriched.drivers[0].best_sector_1 - 29.9).abs() < 1e-9);
        assert!((enriched.drivers[0].best_sector_2 - 30.1).abs() < 1e-9);

        drop(first);
        let lost = Instant::now();
        let down = next(&mut info).await;
        assert!(!down.websocket_running);
        assert!(!down.receiving_data);
        assert!(next(&mut standings).await.drivers.is_empty());

        let mut second = timeout(Duration::from_secs(3), sockets.recv()).await.unwrap().unwrap();
        assert!(lost.elapsed() >= Duration::from_millis(150));
        // Liveness is restored before any enriched frame is forwarded.
        assert!(next(&mut info).await.websocket_running);
        assert!(next(&mut standings).await.drivers.is_empty());

        send(&mut second, r#"{"type":"standings","body":[{"driverName":"A","position":1}]}"#).await;
        let fresh = next(&mut standings).await;
        assert_eq!(fresh.drivers[0].best_sector_1, SECTOR_UNKNOWN);

        cancel.cancel();
        timeout(Duration::from_secs(3), handle).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn first_driver_entered_is_published_once() {
        let (base, mut sockets) = fake_upstream().await;
        let buses = Buses::new();
        let mut entered = buses.first_driver_entered.subscribe(topic::FIRST_DRIVER_ENTERED);

        let cancel = CancellationToken::new();
        let connector = ServerConnector::new("srv", base, buses.clone()).with_config(ServerConnectorTestConfig::long_stall());
        let handle = tokio::spawn(connector.run(cancel.clone()));

        let mut upstream = timeout(Duration::from_secs(3), sockets.recv()).await.unwrap().unwrap();
        for vehicles in [0, 3, 4] {
            let frame = format!(
                r#"{{"type":"sessionInfo","body":{{"session":"Qual1","numberOfVehicles":{vehicles},"trackName":"Monza","serverName":"Club"}}}}"#
            );
            send(&mut upstream, &frame).await;
        }

        let event = next(&mut entered).await;
        assert_eq!(event.server_id, "srv");
        assert_eq!(event.session_type, "Qual1");
        assert_eq!(event.track_name, "Monza");
        assert!(timeout(Duration::from_millis(300), entered.recv()).await.is_err());

        cancel.cancel();
        timeout(Duration::from_secs(3), handle).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn unreachable_upstream_reports_down_and_retries() {
        // Bind then drop so the port refuses connections.
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        let buses = Buses::new();
        let mut info = buses.session_info.subscribe(topic::session_info("srv"));
        let mut thumbnails = buses.track_thumbnail.subscribe(topic::track_thumbnail("srv"));

        let cancel = CancellationToken::new();
        let connector = ServerConnector::new("srv", format!("http://{addr}"), buses.clone()).with_config(fast_config());
        let handle = tokio::spawn(connector.run(cancel.clone()));

        for _ in 0..2 {
            let down = next(&mut info).await;
            assert!(!down.websocket_running);
            assert_eq!(down.server_name, "srv");
            let thumbnail = next(&mut thumbnails).await;
            assert_eq!(thumbnail.server_id, "srv");
            assert!(thumbnail.svg.is_zero());
        }

        cancel.cancel();
        timeout(Duration::from_secs(3), handle).await.unwrap().unwrap();
    }

    struct ServerConnectorTestConfig;

    impl ServerConnectorTestConfig {
        /// Fast reconnects with a stall window long enough to stay out of the way.
        fn long_stall() -> ConnectorConfig {
            ConnectorConfig {
                stall_timeout: Duration::from_secs(30),
                ..fast_config()
            }
        }
    }
}
