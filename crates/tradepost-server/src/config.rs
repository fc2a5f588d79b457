use anyhow::Result;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs;

fn harden_secret_file_permissions(path: &str) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct AuthConfig {
    /// Shared with the identity service that mints user tokens. Leave empty
    /// to trust bare user ids (local development only).
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: default_jwt_secret(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RetentionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_retention_interval_seconds")]
    pub interval_seconds: u64,
    /// Notifications older than this many days are purged; unset disables
    /// the sweep.
    #[serde(default = "default_notification_days")]
    pub notification_days: Option<i64>,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: default_retention_interval_seconds(),
            notification_days: default_notification_days(),
        }
    }
}

fn default_bind_address() -> String {
    "0.0.0.0:4000".into()
}
fn default_database_url() -> String {
    "sqlite://./data/tradepost.db".into()
}
fn default_max_connections() -> u32 {
    5
}
fn default_jwt_secret() -> String {
    generate_random_hex(64)
}
fn default_true() -> bool {
    true
}
fn default_retention_interval_seconds() -> u64 {
    3600
}
fn default_notification_days() -> Option<i64> {
    Some(30)
}

fn generate_random_hex(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| format!("{:x}", rng.gen_range(0..16u8)))
        .collect()
}

// ── Config Loading ───────────────────────────────────────────────────────────

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let mut config = if std::path::Path::new(path).exists() {
            let content = fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            tracing::info!("Config file not found at '{}', generating defaults...", path);
            let config = Config::default();

            if let Some(parent) = std::path::Path::new(path).parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, toml::to_string_pretty(&config)?)?;
            tracing::info!("Generated default config at '{}'", path);
            config
        };
        // The file carries the JWT secret.
        let _ = harden_secret_file_permissions(path);

        // Environment variable overrides
        if let Ok(value) = std::env::var("TRADEPOST_BIND_ADDRESS") {
            config.server.bind_address = value;
        }
        if let Ok(value) = std::env::var("TRADEPOST_DATABASE_URL") {
            config.database.url = value;
        }
        if let Ok(value) = std::env::var("TRADEPOST_JWT_SECRET") {
            config.auth.jwt_secret = value;
        }

        Ok(config)
    }

    /// The secret handed to the app state; an empty value disables token
    /// verification.
    pub fn jwt_secret(&self) -> Option<String> {
        let secret = self.auth.jwt_secret.trim();
        if secret.is_empty() {
            None
        } else {
            Some(secret.to_string())
        }
    }
}
