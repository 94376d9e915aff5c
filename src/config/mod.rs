mod settings;


use config::{Config, ConfigError, Environment, File};

use settings::PartialSettings;

pub use settings::{
    ChatMembers, ContactList, DirectorySettings, HeartbeatBackend, LogSettings, PresenceSettings,
    ServerSettings, Settings,
};

/// Loads settings from `config/default` (optional) and `CHATSUB_*` environment
/// variables, then merges them over the defaults.
///
/// Nested keys use a double underscore, e.g. `CHATSUB_PRESENCE__HEARTBEAT_TTL_SECS`.
pub fn load_config() -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix("CHATSUB")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;
    let partial: PartialSettings = config.try_deserialize()?;
    let settings = merge(partial, Settings::default());
    validate(&settings)?;
    Ok(settings)
}

fn merge(partial: PartialSettings, default: Settings) -> Settings {
    let server = partial.server;
    let presence = partial.presence;

    Settings {
        server: ServerSettings {
            host: server
                .as_ref()
                .and_then(|s| s.host.clone())
                .unwrap_or(default.server.host),
            port: server
                .as_ref()
                .and_then(|s| s.port)
                .unwrap_or(default.server.port),
            events_port: server
                .as_ref()
                .and_then(|s| s.events_port)
                .unwrap_or(default.server.events_port),
            jwt_secret: server
                .as_ref()
                .and_then(|s| s.jwt_secret.clone())
                .unwrap_or(default.server.jwt_secret),
            channel_capacity: server
                .as_ref()
                .and_then(|s| s.channel_capacity)
                .unwrap_or(default.server.channel_capacity),
        },
        presence: PresenceSettings {
            backend: presence
                .as_ref()
                .and_then(|p| p.backend)
                .unwrap_or(default.presence.backend),
            redis_url: presence
                .as_ref()
                .and_then(|p| p.redis_url.clone())
                .unwrap_or(default.presence.redis_url),
            heartbeat_ttl_secs: presence
                .as_ref()
                .and_then(|p| p.heartbeat_ttl_secs)
                .unwrap_or(default.presence.heartbeat_ttl_secs),
            renew_interval_secs: presence
                .as_ref()
                .and_then(|p| p.renew_interval_secs)
                .unwrap_or(default.presence.renew_interval_secs),
            sweep_interval_ms: presence
                .as_ref()
                .and_then(|p| p.sweep_interval_ms)
                .unwrap_or(default.presence.sweep_interval_ms),
            db_path: presence
                .as_ref()
                .and_then(|p| p.db_path.clone())
                .unwrap_or(default.presence.db_path),
        },
        directory: match partial.directory {
            Some(d) => DirectorySettings {
                open_chats: d.open_chats.unwrap_or(default.directory.open_chats),
                chats: d.chats.unwrap_or(default.directory.chats),
                contacts: d.contacts.unwrap_or(default.directory.contacts),
            },
            None => default.directory,
        },
        log: LogSettings {
            level: partial
                .log
                .and_then(|l| l.level)
                .unwrap_or(default.log.level),
        },
    }
}

/// Heartbeats must be renewed strictly before they expire, and the sweep
/// needs a non-zero period.
fn validate(settings: &Settings) -> Result<(), ConfigError> {
    let presence = &settings.presence;
    if presence.renew_interval_secs >= presence.heartbeat_ttl_secs {
        return Err(ConfigError::Message(format!(
            "presence.renew_interval_secs ({}) must be shorter than presence.heartbeat_ttl_secs ({})",
            presence.renew_interval_secs, presence.heartbeat_ttl_secs
        )));
    }
    if presence.sweep_interval_ms == 0 {
        return Err(ConfigError::Message(
            "presence.sweep_interval_ms must be at least 1".to_string(),
        ));
    }
    if presence.backend == HeartbeatBackend::Redis && cfg!(not(feature = "redis-backend")) {
        return Err(ConfigError::Message(
            "presence.backend = \"redis\" needs a build with the redis-backend feature"
                .to_string(),
        ));
    }
    if settings.server.channel_capacity == 0 {
        return Err(ConfigError::Message(
            "server.channel_capacity must be at least 1".to_string(),
        ));
    }
    Ok(())
}
