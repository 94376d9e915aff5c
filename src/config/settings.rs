use serde::Deserialize;

/// Top-level configuration settings for the service.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub presence: PresenceSettings,
    pub directory: DirectorySettings,
    pub log: LogSettings,
}

/// Network and connection settings.
///
/// `channel_capacity` bounds each connection's outbound queue; a channel whose
/// queue is full when a broadcast arrives is treated as dead.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub events_port: u16,
    pub jwt_secret: String,
    pub channel_capacity: usize,
}

/// Where heartbeat records live.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HeartbeatBackend {
    /// In-process store, expired by a periodic sweep.
    Memory,
    /// Shared Redis instance; needs the `redis-backend` feature.
    Redis,
}

/// Heartbeat and last-seen settings.
#[derive(Debug, Deserialize, Clone)]
pub struct PresenceSettings {
    pub backend: HeartbeatBackend,
    pub redis_url: String,
    pub heartbeat_ttl_secs: u64,
    pub renew_interval_secs: u64,
    pub sweep_interval_ms: u64,
    pub db_path: String,
}

/// Chat membership and contact lists served by the built-in directory.
///
/// ```toml
/// [directory]
/// open_chats = false
/// chats = [{ id = 7, members = [1, 2] }]
/// contacts = [{ user = 1, contacts = [2] }]
/// ```
#[derive(Debug, Deserialize, Clone, Default)]
pub struct DirectorySettings {
    /// Let every user join every chat.
    pub open_chats: bool,
    pub chats: Vec<ChatMembers>,
    pub contacts: Vec<ContactList>,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ChatMembers {
    pub id: i64,
    pub members: Vec<i64>,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ContactList {
    pub user: i64,
    pub contacts: Vec<i64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogSettings {
    pub level: String,
}

/// Partial configuration loaded from files or environment.
///
/// Missing values are filled from `Settings::default()`.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub presence: Option<PartialPresenceSettings>,
    pub directory: Option<PartialDirectorySettings>,
    pub log: Option<PartialLogSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub events_port: Option<u16>,
    pub jwt_secret: Option<String>,
    pub channel_capacity: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct PartialPresenceSettings {
    pub backend: Option<HeartbeatBackend>,
    pub redis_url: Option<String>,
    pub heartbeat_ttl_secs: Option<u64>,
    pub renew_interval_secs: Option<u64>,
    pub sweep_interval_ms: Option<u64>,
    pub db_path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PartialDirectorySettings {
    pub open_chats: Option<bool>,
    pub chats: Option<Vec<ChatMembers>>,
    pub contacts: Option<Vec<ContactList>>,
}

#[derive(Debug, Deserialize)]
pub struct PartialLogSettings {
    pub level: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 8080,
                events_port: 8081,
                jwt_secret: "change-me".to_string(),
                channel_capacity: 256,
            },
            presence: PresenceSettings {
                backend: HeartbeatBackend::Memory,
                redis_url: "redis://127.0.0.1:6379/".to_string(),
                heartbeat_ttl_secs: 300,
                renew_interval_secs: 60,
                sweep_interval_ms: 1000,
                db_path: "chatsub_db".to_string(),
            },
            directory: DirectorySettings::default(),
            log: LogSettings {
                level: "info".to_string(),
            },
        }
    }
}
