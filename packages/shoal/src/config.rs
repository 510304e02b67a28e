use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// =============================================================================
// Unified config (figment-deserialized from defaults / shoal.toml / env vars)
// =============================================================================
//
// Two equivalent ways to configure:
//
//   shoal.toml:      [session]
//                    heartbeat_secs = 30
//
//   env var:         SHOAL_SESSION__HEARTBEAT_SECS=30   (double underscore = nesting)

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub session: SessionFileConfig,
    #[serde(default)]
    pub database: DatabaseFileConfig,
    #[serde(default)]
    pub auth: AuthFileConfig,
    #[serde(default)]
    pub push: PushFileConfig,
}

/// Bind address knobs (lives under `[server]` in shoal.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Session tunables (lives under `[session]` in shoal.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionFileConfig {
    /// Inactivity window before a connection is considered dead.
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    /// Outbound queue depth per connection; overflow counts as a dead peer.
    #[serde(default = "default_send_buffer")]
    pub send_buffer: usize,
}

impl Default for SessionFileConfig {
    fn default() -> Self {
        Self {
            heartbeat_secs: default_heartbeat_secs(),
            send_buffer: default_send_buffer(),
        }
    }
}

/// Database location (lives under `[database]` in shoal.toml).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DatabaseFileConfig {
    /// SQLite file path; defaults to `shoal.db` in the working directory.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl DatabaseFileConfig {
    pub fn db_url(&self) -> String {
        let path = self
            .path
            .clone()
            .unwrap_or_else(|| PathBuf::from("shoal.db"));
        format!("sqlite://{}?mode=rwc", path.display())
    }
}

/// Identity verification (lives under `[auth]` in shoal.toml).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AuthFileConfig {
    /// URL-safe base64 Ed25519 public key of the credential issuer.
    #[serde(default)]
    pub verifying_key: Option<String>,
}

/// Web-push delivery (lives under `[push]` in shoal.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PushFileConfig {
    #[serde(default)]
    pub enabled: bool,
    /// P-256 private key (PEM) used for VAPID request signing.
    #[serde(default)]
    pub vapid_key_path: Option<PathBuf>,
    /// URL-safe base64 uncompressed P-256 public key; the same value
    /// browsers receive as the application server key.
    #[serde(default)]
    pub vapid_public_key: Option<String>,
    /// Contact for the push service operator (mailto: or https:).
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default = "default_push_ttl_secs")]
    pub ttl_secs: u32,
}

impl Default for PushFileConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            vapid_key_path: None,
            vapid_public_key: None,
            subject: None,
            ttl_secs: default_push_ttl_secs(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    4400
}

fn default_heartbeat_secs() -> u64 {
    30
}

fn default_send_buffer() -> usize {
    100
}

fn default_push_ttl_secs() -> u32 {
    86_400
}

/// Build a figment that layers: defaults → shoal.toml → SHOAL_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `SHOAL_SESSION__HEARTBEAT_SECS=45`  →  `session.heartbeat_secs = 45`
///   `SHOAL_PUSH__ENABLED=true`          →  `push.enabled = true`
pub fn load_config(config_path: Option<&Path>) -> Result<FileConfig> {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    let toml_path = config_path.unwrap_or_else(|| Path::new("shoal.toml"));
    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(toml_path))
        .merge(Env::prefixed("SHOAL_").split("__"))
        .extract()
        .context("Failed to load configuration")
}

// =============================================================================
// Resolved runtime views
// =============================================================================

/// Session timing as the session manager consumes it.
#[derive(Clone, Copy, Debug)]
pub struct SessionConfig {
    pub heartbeat: Duration,
    pub send_buffer: usize,
}

impl SessionConfig {
    pub fn from_file(fc: &SessionFileConfig) -> Self {
        Self {
            heartbeat: Duration::from_secs(fc.heartbeat_secs),
            send_buffer: fc.send_buffer,
        }
    }
}

/// Web-push settings once `push.enabled` has been validated.
#[derive(Clone, Debug)]
pub struct PushConfig {
    pub vapid_key_path: PathBuf,
    pub vapid_public_key: String,
    pub subject: String,
    pub ttl_secs: u32,
}

impl PushConfig {
    /// Resolve the file config. Returns `None` when push is disabled; an
    /// enabled-but-incomplete section is an error.
    pub fn from_file(fc: &PushFileConfig) -> Result<Option<Self>> {
        if !fc.enabled {
            return Ok(None);
        }
        let Some(vapid_key_path) = fc.vapid_key_path.clone() else {
            bail!("push.enabled requires push.vapid_key_path");
        };
        let Some(vapid_public_key) = fc.vapid_public_key.clone() else {
            bail!("push.enabled requires push.vapid_public_key");
        };
        let Some(subject) = fc.subject.clone() else {
            bail!("push.enabled requires push.subject");
        };
        Ok(Some(Self {
            vapid_key_path,
            vapid_public_key,
            subject,
            ttl_secs: fc.ttl_secs,
        }))
    }
}
