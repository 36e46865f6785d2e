//! Bot configuration – `./livetiming.toml` plus environment overrides.
//!
//! ```toml
//! webserver_address = ":8080"
//! telegram_token    = "123:abc"
//! database_path     = "./livetiming-bot.db"
//! resources_dir     = "./resources"
//!
//! [[servers]]
//! url = "http://10.0.0.5:5397"
//!
//! [[servers]]
//! id  = "endurance"
//! url = "http://10.0.0.6:5397"
//! ```

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use livetiming_runtime::chat::TELEGRAM_API_URL;
use livetiming_types::{LiveError, Server};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// Used when neither `--config` nor `LIVETIMING_CONFIG` is given.
pub const DEFAULT_CONFIG_PATH: &str = "./livetiming.toml";

/// One `[[servers]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerEntry {
    /// Explicit id; derived from the URL when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub url: String,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// `host:port` of the web surface; a bare `:port` listens on all interfaces.
    #[serde(default = "default_webserver_address")]
    pub webserver_address: String,

    /// Base URL of the historical hotlaps API.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_domain: String,

    #[serde(default, skip_serializing)]
    pub telegram_token: Zeroizing<String>,

    #[serde(default = "default_telegram_api_url")]
    pub telegram_api_url: String,

    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    #[serde(default = "default_resources_dir")]
    pub resources_dir: PathBuf,

    #[serde(default)]
    pub servers: Vec<ServerEntry>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("webserver_address", &self.webserver_address)
            .field("api_domain", &self.api_domain)
            .field(
                "telegram_token",
                if self.telegram_token.is_empty() { &"<not set>" } else { &"<redacted>" },
            )
            .field("telegram_api_url", &self.telegram_api_url)
            .field("database_path", &self.database_path)
            .field("resources_dir", &self.resources_dir)
            .field("servers", &self.servers)
            .finish()
    }
}

fn default_webserver_address() -> String {
    livetiming_cockpit::DEFAULT_ADDRESS.to_string()
}
fn default_telegram_api_url() -> String {
    TELEGRAM_API_URL.to_string()
}
fn default_database_path() -> PathBuf {
    PathBuf::from("./livetiming-bot.db")
}
fn default_resources_dir() -> PathBuf {
    PathBuf::from("./resources")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            webserver_address: default_webserver_address(),
            api_domain: String::new(),
            telegram_token: Zeroizing::new(String::new()),
            telegram_api_url: default_telegram_api_url(),
            database_path: default_database_path(),
            resources_dir: default_resources_dir(),
            servers: Vec::new(),
        }
    }
}

impl Config {
    /// Append servers given on the command line.
    pub fn add_urls(&mut self, urls: impl IntoIterator<Item = String>) {
        self.servers
            .extend(urls.into_iter().map(|url| ServerEntry { id: None, url }));
    }

    /// Resolve the configured servers, deriving missing ids.
    ///
    /// Fails on an empty URL or on two servers sharing an id.
    pub fn servers(&self) -> Result<Vec<Server>, LiveError> {
        let mut seen = HashSet::new();
        let mut servers = Vec::with_capacity(self.servers.len());
        for entry in &self.servers {
            let url = entry.url.trim();
            if url.is_empty() {
                return Err(LiveError::Config("server entry without url".into()));
            }
            let id = match &entry.id {
                Some(id) if !id.trim().is_empty() => id.trim().to_string(),
                _ => server_id(url)?,
            };
            if !seen.insert(id.clone()) {
                return Err(LiveError::Config(format!("duplicate server id {id:?}")));
            }
            servers.push(Server::new(id, url));
        }
        Ok(servers)
    }
}

/// Derive a server id from its URL: `http://10.0.0.5:5397/` → `10.0.0.5_5397`.
pub fn server_id(url: &str) -> Result<String, LiveError> {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    if authority.is_empty() {
        return Err(LiveError::Config(format!("cannot derive a server id from {url:?}")));
    }
    Ok(authority
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect())
}

/// Load the config from `path`. Returns `None` if the file does not exist.
pub fn load_from(path: &Path) -> Result<Option<Config>, LiveError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| LiveError::Config(format!("failed to read {}: {e}", path.display())))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| LiveError::Config(format!("failed to parse {}: {e}", path.display())))?;
    Ok(Some(cfg))
}

/// Apply environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `TELEGRAM_TOKEN` | `telegram_token` |
/// | `API_DOMAIN` | `api_domain` |
/// | `WEBSERVER_ADDRESS` | `webserver_address` |
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides(cfg, |key| std::env::var(key).ok());
}

fn apply_overrides(cfg: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(token) = lookup("TELEGRAM_TOKEN").filter(|v| !v.is_empty()) {
        cfg.telegram_token = Zeroizing::new(token);
    }
    if let Some(domain) = lookup("API_DOMAIN").filter(|v| !v.is_empty()) {
        cfg.api_domain = domain;
    }
    if let Some(address) = lookup("WEBSERVER_ADDRESS").filter(|v| !v.is_empty()) {
        cfg.webserver_address = address;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.webserver_address, ":8080");
        assert_eq!(cfg.database_path, PathBuf::from("./livetiming-bot.db"));
        assert_eq!(cfg.resources_dir, PathBuf::from("./resources"));
        assert!(cfg.telegram_token.is_empty());
        assert!(cfg.servers.is_empty());
    }

    #[test]
    fn parses_file_with_servers() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("livetiming.toml");
        fs::write(
            &path,
            r#"
                telegram_token = "123:secret"
                resources_dir = "/var/cache/livetiming"

                [[servers]]
                url = "http://10.0.0.5:5397"

                [[servers]]
                id = "endurance"
                url = "http://10.0.0.6:5397/"
            "#,
        )?;

        let cfg = load_from(&path)?.ok_or("config missing")?;
        assert_eq!(cfg.telegram_token.as_str(), "123:secret");
        assert_eq!(cfg.resources_dir, PathBuf::from("/var/cache/livetiming"));
        assert_eq!(cfg.webserver_address, ":8080");

        let servers = cfg.servers()?;
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[0].id, "10.0.0.5_5397");
        assert_eq!(servers[0].name, "10.0.0.5_5397");
        assert_eq!(servers[1].id, "endurance");
        assert_eq!(servers[1].url, "http://10.0.0.6:5397/");
        Ok(())
    }

    #[test]
    fn missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_from(&dir.path().join("absent.toml")).unwrap().is_none());
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("livetiming.toml");
        fs::write(&path, "servers = 3").unwrap();
        assert!(matches!(load_from(&path), Err(LiveError::Config(_))));
    }

    #[test]
    fn server_ids_from_urls() {
        assert_eq!(server_id("http://10.0.0.5:5397").unwrap(), "10.0.0.5_5397");
        assert_eq!(server_id("https://race.example/rest").unwrap(), "race.example");
        assert_eq!(server_id("localhost:5397").unwrap(), "localhost_5397");
        assert!(server_id("http://").is_err());
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut cfg = Config::default();
        cfg.add_urls(["http://a:1".to_string(), "http://a:1/".to_string()]);
        assert!(matches!(cfg.servers(), Err(LiveError::Config(_))));
    }

    #[test]
    fn command_line_urls_are_appended() {
        let mut cfg = Config::default();
        cfg.servers.push(ServerEntry {
            id: Some("club".into()),
            url: "http://club:5397".into(),
        });
        cfg.add_urls(["http://10.1.1.1:5397".to_string()]);
        let ids: Vec<_> = cfg.servers().unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["club", "10.1.1.1_5397"]);
    }

    #[test]
    fn env_overrides_replace_file_values() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("TELEGRAM_TOKEN", "999:env"),
            ("API_DOMAIN", "https://hotlaps.example"),
            ("WEBSERVER_ADDRESS", "127.0.0.1:9000"),
        ]);
        let mut cfg = Config::default();
        apply_overrides(&mut cfg, |k| env.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.telegram_token.as_str(), "999:env");
        assert_eq!(cfg.api_domain, "https://hotlaps.example");
        assert_eq!(cfg.webserver_address, "127.0.0.1:9000");
    }

    #[test]
    fn empty_env_values_are_ignored() {
        let mut cfg = Config::default();
        apply_overrides(&mut cfg, |_| Some(String::new()));
        assert_eq!(cfg.webserver_address, ":8080");
        assert!(cfg.telegram_token.is_empty());
    }

    #[test]
    fn debug_redacts_token() {
        let mut cfg = Config::default();
        let printed = format!("{cfg:?}");
        assert!(printed.contains("<not set>"));

        cfg.telegram_token = Zeroizing::new("123:super-secret".to_string());
        let printed = format!("{cfg:?}");
        assert!(!printed.contains("super-secret"));
        assert!(printed.contains("<redacted>"));
    }

    #[test]
    fn token_is_never_serialised() {
        let mut cfg = Config::default();
        cfg.telegram_token = Zeroizing::new("123:super-secret".to_string());
        let raw = toml::to_string(&cfg).unwrap();
        assert!(!raw.contains("super-secret"));
    }
}
