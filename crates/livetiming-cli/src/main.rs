//! `livetiming` – the live-timing bot process.
//!
//! 1. Loads `./livetiming.toml` (or `--config`), applies environment
//!    overrides and appends server URLs given as arguments.
//! 2. Builds one topic bus per payload type and hands it to every component.
//! 3. Starts the registry updaters, one live-map relay per server, the
//!    notification dispatcher and finally one connector per server.
//! 4. Serves the web surface until **Ctrl-C** cancels the root token.

mod config;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use colored::Colorize;
use livetiming_cockpit::{CockpitServer, LiveMapRelay};
use livetiming_memory::SubscriptionStore;
use livetiming_middleware::{Buses, ServerConnector, ServerRegistry};
use livetiming_runtime::resources::HTTP_TIMEOUT;
use livetiming_runtime::{NotificationDispatcher, ResourceCache, TelegramSender, telemetry};
use livetiming_types::{LiveError, Server};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[clap(name = "livetiming", version, about = "Live timing fan-out for sim-racing servers")]
struct Args {
    /// Configuration file.
    #[clap(long, short, env = "LIVETIMING_CONFIG", default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Additional telemetry server base URLs (e.g. `http://10.0.0.5:5397`).
    servers: Vec<String>,
}

fn main() -> ExitCode {
    // Tracing comes up before the runtime; the OTLP exporter is synchronous.
    let _guard = telemetry::init_tracing("livetiming");
    let args = Args::parse();

    print_banner();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("{}: {e}", "Failed to start runtime".red());
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(args)) {
        Ok(()) => {
            println!("{}", "  ✓ Stopped.".green());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "livetiming stopped");
            eprintln!("{}: {e}", "Error".red().bold());
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), LiveError> {
    let mut cfg = match config::load_from(&args.config)? {
        Some(cfg) => {
            info!(path = %args.config.display(), "configuration loaded");
            cfg
        }
        None => {
            info!(path = %args.config.display(), "no configuration file, using defaults");
            config::Config::default()
        }
    };
    config::apply_env_overrides(&mut cfg);
    cfg.add_urls(args.servers);

    let servers = cfg.servers()?;
    if servers.is_empty() {
        return Err(LiveError::Config(
            "no servers configured; add [[servers]] to the config or pass URLs".into(),
        ));
    }
    print_servers(&servers, &cfg);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        if let Err(e) = ctrlc::set_handler(move || {
            println!();
            println!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
            cancel.cancel();
        }) {
            warn!(error = %e, "failed to install Ctrl-C handler");
        }
    }

    let buses = Buses::new();
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    // Every consumer subscribes before the first connector publishes.
    let registry = ServerRegistry::new(servers.clone());
    tasks.extend(registry.spawn_updaters(&buses.session_info, cancel.clone()));

    let mut web = CockpitServer::new(cfg.webserver_address.clone(), cfg.resources_dir.clone());
    for server in &servers {
        let relay = LiveMapRelay::new(server.id.clone());
        tasks.extend(relay.spawn(&buses, cancel.clone()));
        web = web.with_relay(relay);
    }

    if cfg.telegram_token.is_empty() {
        warn!("TELEGRAM_TOKEN not set; session-start notifications are disabled");
    } else {
        let store = SubscriptionStore::open(&cfg.database_path.to_string_lossy()).map_err(|e| {
            LiveError::Config(format!("cannot open {}: {e}", cfg.database_path.display()))
        })?;
        let sender = TelegramSender::new(
            cfg.telegram_api_url.clone(),
            cfg.telegram_token.clone(),
            HTTP_TIMEOUT,
        )?;
        let dispatcher = NotificationDispatcher::new(Arc::new(store), Arc::new(sender));
        tasks.push(dispatcher.spawn(&buses.first_driver_entered, cancel.clone()));
    }

    let cache = Arc::new(ResourceCache::new(cfg.resources_dir.clone())?);
    for server in &servers {
        let connector = ServerConnector::new(server.id.clone(), server.url.clone(), buses.clone())
            .with_assets(cache.clone());
        tasks.push(tokio::spawn(connector.run(cancel.clone())));
    }

    let mut web = tokio::spawn(web.run(cancel.clone()));
    let outcome = tokio::select! {
        _ = cancel.cancelled() => Ok(()),
        served = &mut web => match served {
            Ok(result) => result,
            Err(e) => Err(LiveError::Io(std::io::Error::other(e))),
        },
    };
    cancel.cancel();

    for task in tasks {
        let _ = task.await;
    }
    if !web.is_finished() {
        let _ = web.await;
    }
    info!(
        servers = registry.len(),
        "all tasks stopped"
    );
    outcome
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   __   _          _____ _       _          "#.bold().cyan());
    println!("{}", r#"  / /  (_)_  _____/_  _/(_)_ _  (_)__  ___ _"#.bold().cyan());
    println!("{}", r#" / /__/ /| |/ / -_)/ / / /  ' \/ / _ \/ _ `/"#.bold().cyan());
    println!("{}", r#"/____/_/ |___/\__//_/ /_/_/_/_/_/_//_/\_, / "#.bold().cyan());
    println!("{}", r#"                                     /___/  "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "livetiming".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Live telemetry fan-out for sim-racing servers");
    println!();
}

fn print_servers(servers: &[Server], cfg: &config::Config) {
    println!("  Servers:");
    for server in servers {
        println!("    • {} {}", server.id.bold(), server.url.dimmed());
        println!(
            "      live map: {}",
            format!("http://{}/{}/live", display_address(&cfg.webserver_address), server.id).underline()
        );
    }
    if !cfg.api_domain.is_empty() {
        println!("  Hotlaps API: {}", cfg.api_domain.dimmed());
    }
    println!();
}

fn display_address(address: &str) -> String {
    if address.starts_with(':') {
        format!("localhost{address}")
    } else {
        address.to_string()
    }
}
