//! CLI for chatsub
//!
//! Subcommands:
//! - `server`: run the WebSocket server, the event feed and the presence loop
//! - `token`: print a bearer token for a user (useful for smoke tests)

use std::sync::Arc;
use std::time::Duration;

use chatsub::auth::JwtAuthenticator;
use chatsub::broker::Broker;
use chatsub::config::{HeartbeatBackend, Settings, load_config};
use chatsub::directory::InMemoryDirectory;
use chatsub::persistence::SledLastSeenStore;
#[cfg(feature = "redis-backend")]
use chatsub::presence::RedisHeartbeatStore;
use chatsub::presence::{HeartbeatStore, MemoryHeartbeatStore, PresenceTracker};
use chatsub::transport::events::start_event_feed;
use chatsub::transport::{ServerState, start_websocket_server};
use chatsub::utils::logging;
use clap::Parser;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "chatsub")]
enum Command {
    /// Start the WebSocket server
    Server,
    /// Print a signed bearer token for a user id
    Token {
        #[arg(long)]
        user: i64,
        /// Validity in hours
        #[arg(long, default_value_t = 24)]
        hours: i64,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cmd = Command::parse();

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            logging::init("info");
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    logging::init(&config.log.level);

    match cmd {
        Command::Server => {
            if let Err(e) = run_server(config).await {
                error!("Server failed: {}", e);
                std::process::exit(1);
            }
        }
        Command::Token { user, hours } => {
            let auth = JwtAuthenticator::new(&config.server.jwt_secret);
            match auth.issue(user, chrono::Duration::hours(hours)) {
                Ok(token) => println!("{token}"),
                Err(e) => error!("Could not issue token: {}", e),
            }
        }
    }
}

async fn run_server(config: Settings) -> Result<(), Box<dyn std::error::Error>> {
    let durable = Arc::new(SledLastSeenStore::open(&config.presence.db_path)?);
    let heartbeats = open_heartbeat_store(&config).await?;
    let notifications = heartbeats.notifications();
    let presence = Arc::new(PresenceTracker::from_settings(
        heartbeats,
        durable,
        &config.presence,
    ));

    let directory = Arc::new(InMemoryDirectory::from_settings(&config.directory));
    if config.directory.open_chats {
        warn!("directory.open_chats is set: every user may join every chat");
    }
    info!(
        chats = config.directory.chats.len(),
        contact_lists = config.directory.contacts.len(),
        "Loaded directory"
    );

    let broker = Arc::new(Broker::new(directory.clone()));
    let state = Arc::new(ServerState {
        broker: broker.clone(),
        presence: presence.clone(),
        auth: Arc::new(JwtAuthenticator::new(&config.server.jwt_secret)),
        contacts: directory,
        channel_capacity: config.server.channel_capacity,
    });

    tokio::spawn(presence.run(notifications));

    let ws_addr = format!("{}:{}", config.server.host, config.server.port);
    let events_addr = format!("{}:{}", config.server.host, config.server.events_port);

    tokio::select! {
        res = start_websocket_server(ws_addr, state) => {
            error!("WebSocket server exited unexpectedly.");
            res?;
        }
        res = start_event_feed(events_addr, broker) => {
            error!("Event feed exited unexpectedly.");
            res?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
        }
    }

    Ok(())
}

/// Opens the configured heartbeat store and starts whatever keeps its
/// notifications flowing.
async fn open_heartbeat_store(
    config: &Settings,
) -> Result<Arc<dyn HeartbeatStore>, Box<dyn std::error::Error>> {
    match config.presence.backend {
        HeartbeatBackend::Memory => {
            let store = Arc::new(MemoryHeartbeatStore::new());
            tokio::spawn(
                store
                    .clone()
                    .run_sweeper(Duration::from_millis(config.presence.sweep_interval_ms)),
            );
            info!("Using in-memory heartbeat store");
            Ok(store)
        }
        #[cfg(feature = "redis-backend")]
        HeartbeatBackend::Redis => {
            let store = Arc::new(RedisHeartbeatStore::connect(&config.presence.redis_url).await?);
            tokio::spawn(store.clone().run_listener(Duration::from_secs(1)));
            Ok(store)
        }
        #[cfg(not(feature = "redis-backend"))]
        HeartbeatBackend::Redis => Err("redis heartbeat store needs the redis-backend feature".into()),
    }
}
