//! [`CockpitServer`] – HTTP + WebSocket surface of the bot.
//!
//! | Request | Response |
//! |---|---|
//! | `GET /resources/<file>` | file from the resource directory |
//! | `GET /<id>/live` | live-map HTML page of server `<id>` |
//! | WebSocket `/<id>/livemap` | projected car positions every 100 ms |
//!
//! Requests are routed on the first bytes of the connection: WebSocket
//! upgrades are handed to tungstenite with the request still unread, all
//! other requests get a single `Connection: close` response.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use livetiming_types::LiveError;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_async;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::relay::LiveMapRelay;

/// Default listen address (`WEBSERVER_ADDRESS` unset).
pub const DEFAULT_ADDRESS: &str = ":8080";

const LIVEMAP_HTML: &str = include_str!("livemap.html");

/// Expand `:port` to `0.0.0.0:port`.
pub fn listen_address(address: &str) -> String {
    let address = address.trim();
    if address.starts_with(':') {
        format!("0.0.0.0{address}")
    } else {
        address.to_string()
    }
}

/// The web surface: resource files, live-map pages and live-map sockets.
pub struct CockpitServer {
    address: String,
    resources_dir: PathBuf,
    relays: HashMap<String, LiveMapRelay>,
}

impl CockpitServer {
    /// A server for `address` (`host:port` or `:port`) serving files from
    /// `resources_dir`. No relays are mounted yet.
    pub fn new(address: impl Into<String>, resources_dir: impl Into<PathBuf>) -> Self {
        Self {
            address: address.into(),
            resources_dir: resources_dir.into(),
            relays: HashMap::new(),
        }
    }

    /// Mount `relay` under `/<relay.server_id()>`.
    pub fn with_relay(mut self, relay: LiveMapRelay) -> Self {
        self.relays.insert(relay.server_id().to_string(), relay);
        self
    }

    /// The configured listen address, before `:port` expansion.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Bind the configured address and serve until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), LiveError> {
        let address = listen_address(&self.address);
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|e| LiveError::Config(format!("cannot listen on {address}: {e}")))?;
        self.serve(listener, cancel).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(self, listener: TcpListener, cancel: CancellationToken) -> Result<(), LiveError> {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, servers = self.relays.len(), "web server listening");
        }
        let routes = std::sync::Arc::new(Routes {
            resources_dir: self.resources_dir,
            relays: self.relays,
        });

        loop {
            let accepted = tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => accepted,
            };
            match accepted {
                Ok((stream, peer)) => {
                    let routes = std::sync::Arc::clone(&routes);
                    let cancel = cancel.clone();
                    tokio::spawn(async move {
                        if let Err(e) = routes.handle(stream, peer, cancel).await {
                            debug!(%peer, error = %e, "client error");
                        }
                    });
                }
                Err(e) => warn!(error = %e, "accept failed"),
            }
        }
        info!("web server stopped");
        Ok(())
    }
}

struct Routes {
    resources_dir: PathBuf,
    relays: HashMap<String, LiveMapRelay>,
}

struct Response {
    status: &'static str,
    content_type: &'static str,
    body: Vec<u8>,
}

impl Response {
    fn ok(content_type: &'static str, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: "200 OK",
            content_type,
            body: body.into(),
        }
    }

    fn error(status: &'static str) -> Self {
        Self {
            status,
            content_type: "text/plain; charset=utf-8",
            body: status.as_bytes().to_vec(),
        }
    }
}

impl Routes {
    async fn handle(&self, mut stream: TcpStream, peer: SocketAddr, cancel: CancellationToken) -> Result<(), LiveError> {
        let mut buf = [0u8; 2048];
        let n = stream.peek(&mut buf).await?;
        let head = String::from_utf8_lossy(&buf[..n]);

        let mut request_line = head.lines().next().unwrap_or_default().split_whitespace();
        let method = request_line.next().unwrap_or_default().to_string();
        let path = request_line.next().unwrap_or_default().to_string();
        let is_upgrade = head.lines().any(|line| {
            let line = line.to_ascii_lowercase();
            line.starts_with("upgrade:") && line.contains("websocket")
        });

        if is_upgrade {
            let relay = path
                .strip_prefix('/')
                .and_then(|p| p.strip_suffix("/livemap"))
                .and_then(|id| self.relays.get(id));
            if let Some(relay) = relay {
                let socket = accept_async(stream)
                    .await
                    .map_err(|e| LiveError::Network(format!("handshake from {peer}: {e}")))?;
                return relay.serve_ws(socket, cancel).await;
            }
        }

        // Drain what was peeked so closing the socket does not reset it.
        let _ = stream.read(&mut buf).await?;
        let response = if method == "GET" {
            self.route(&path).await
        } else {
            Response::error("405 Method Not Allowed")
        };
        debug!(%peer, %method, %path, status = response.status, "http request");
        write_response(&mut stream, response).await
    }

    async fn route(&self, target: &str) -> Response {
        let path = target.split(['?', '#']).next().unwrap_or_default();
        if let Some(file) = path.strip_prefix("/resources/") {
            return self.resource(file).await;
        }
        let relay = path
            .strip_prefix('/')
            .and_then(|p| p.strip_suffix("/live"))
            .and_then(|id| self.relays.get(id));
        match relay {
            Some(relay) => Response::ok("text/html; charset=utf-8", render_page(relay)),
            None => Response::error("404 Not Found"),
        }
    }

    async fn resource(&self, file: &str) -> Response {
        if !is_plain_file_name(file) {
            return Response::error("404 Not Found");
        }
        match tokio::fs::read(self.resources_dir.join(file)).await {
            Ok(bytes) => Response::ok(content_type(Path::new(file)), bytes),
            Err(_) => Response::error("404 Not Found"),
        }
    }
}

async fn write_response(stream: &mut TcpStream, response: Response) -> Result<(), LiveError> {
    let head = format!(
        "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        response.status,
        response.content_type,
        response.body.len()
    );
    stream.write_all(head.as_bytes()).await?;
    stream.write_all(&response.body).await?;
    stream.shutdown().await?;
    Ok(())
}

fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("html") => "text/html; charset=utf-8",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    }
}

fn render_page(relay: &LiveMapRelay) -> String {
    let track_url = relay
        .track_file()
        .map(|file| format!("/resources/{file}"))
        .unwrap_or_default();
    let title = relay.track_name().unwrap_or_else(|| relay.server_id().to_string());
    LIVEMAP_HTML
        .replace("__SERVER_ID__", &escape_html(relay.server_id()))
        .replace("__TRACK_URL__", &escape_html(&track_url))
        .replace("__TITLE__", &escape_html(&title))
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use livetiming_types::{CarPosition, CarPositions, ResourceKind, SelectedSession};
    use livetiming_types::Resource;
    use std::time::Duration;
    use tokio::time::timeout;
    use tokio_tungstenite::connect_async;
    use tokio_tungstenite::tungstenite::Message;

    async fn start(dir: &Path, relay: LiveMapRelay) -> (SocketAddr, CancellationToken) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let server = CockpitServer::new("unused", dir).with_relay(relay);
        tokio::spawn(server.serve(listener, cancel.clone()));
        (addr, cancel)
    }

    async fn get(addr: SocketAddr, path: &str) -> (String, Vec<u8>) {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!("GET {path} HTTP/1.1\r\nHost: test\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut raw = Vec::new();
        timeout(Duration::from_secs(2), stream.read_to_end(&mut raw))
            .await
            .unwrap()
            .unwrap();
        let split = raw.windows(4).position(|w| w == b"\r\n\r\n").unwrap();
        let status = String::from_utf8_lossy(&raw[..split])
            .lines()
            .next()
            .unwrap()
            .to_string();
        (status, raw[split + 4..].to_vec())
    }

    #[test]
    fn listen_address_expands_bare_port() {
        assert_eq!(listen_address(":8080"), "0.0.0.0:8080");
        assert_eq!(listen_address("127.0.0.1:9000"), "127.0.0.1:9000");
    }

    #[test]
    fn file_names_are_sanitised() {
        assert!(is_plain_file_name("track_17.svg"));
        assert!(!is_plain_file_name("../secret"));
        assert!(!is_plain_file_name("a/b.png"));
        assert!(!is_plain_file_name(".track_1.svg.part"));
        assert!(!is_plain_file_name(""));
    }

    #[test]
    fn page_template_is_filled_in() {
        let relay = LiveMapRelay::new("10.0.0.5_5397");
        let page = render_page(&relay);
        assert!(page.contains("WebSocket"));
        assert!(page.contains("10.0.0.5_5397"));
        assert!(!page.contains("__SERVER_ID__"));
        assert!(!page.contains("__TRACK_URL__"));
    }

    #[tokio::test]
    async fn serves_resources_and_pages() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("car_3.png"), [1u8, 2, 3]).unwrap();
        let (addr, cancel) = start(dir.path(), LiveMapRelay::new("srv")).await;

        let (status, body) = get(addr, "/resources/car_3.png").await;
        assert!(status.contains("200"), "{status}");
        assert_eq!(body, vec![1, 2, 3]);

        let (status, _) = get(addr, "/resources/../Cargo.toml").await;
        assert!(status.contains("404"), "{status}");

        let (status, _) = get(addr, "/resources/missing.png").await;
        assert!(status.contains("404"), "{status}");

        let (status, body) = get(addr, "/srv/live").await;
        assert!(status.contains("200"), "{status}");
        let page = String::from_utf8(body).unwrap();
        assert!(page.contains(r#"const serverId = "srv";"#));
        assert!(page.contains("/livemap"));

        let (status, _) = get(addr, "/other/live").await;
        assert!(status.contains("404"), "{status}");

        cancel.cancel();
    }

    #[tokio::test]
    async fn livemap_socket_pushes_projected_positions() {
        let dir = tempfile::tempdir().unwrap();
        let waypoints: Vec<livetiming_trackmap::Waypoint> =
            serde_json::from_str(r#"[{"type":0,"x":0,"z":0},{"type":0,"x":100,"z":50}]"#).unwrap();
        let svg_path = dir.path().join("track_1.svg");
        std::fs::write(&svg_path, livetiming_trackmap::render(&waypoints).unwrap()).unwrap();

        let relay = LiveMapRelay::new("srv");
        relay
            .start_session(SelectedSession::default(), &Resource::new(ResourceKind::TrackSvg, svg_path))
            .await
            .unwrap();
        relay.apply_positions(&CarPositions {
            server_id: "srv".into(),
            cars: vec![CarPosition { driver: "LEA".into(), x: 50.0, y: 0.0, z: 25.0 }],
        });
        let (addr, cancel) = start(dir.path(), relay).await;

        let (mut ws, _) = connect_async(format!("ws://{addr}/srv/livemap")).await.unwrap();
        ws.send(Message::Text("hello".into())).await.unwrap();

        let msg = timeout(Duration::from_secs(2), ws.next()).await.unwrap().unwrap().unwrap();
        let cars: Vec<livetiming_trackmap::ProjectedCar> =
            serde_json::from_str(msg.to_text().unwrap()).unwrap();
        assert_eq!(cars.len(), 1);
        assert_eq!(cars[0].driver, "LEA");

        // Further ticks keep coming.
        let again = timeout(Duration::from_secs(2), ws.next()).await.unwrap().unwrap().unwrap();
        assert!(again.is_text());

        cancel.cancel();
    }
}
