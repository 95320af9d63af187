//! Config schema types.
use std::{collections::HashMap, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WabridgeConfig {
    /// Base directory for the database and sidecar credentials. Falls back to
    /// the platform data directory.
    pub data_dir: Option<PathBuf>,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub sessions: SessionsConfig,
    pub webhook: WebhookConfig,
    pub sidecar: SidecarConfig,
    pub metrics: MetricsConfig,
}

impl WabridgeConfig {
    pub fn resolved_data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(crate::loader::default_data_dir)
    }

    pub fn database_path(&self) -> PathBuf {
        self.database
            .path
            .clone()
            .unwrap_or_else(|| self.resolved_data_dir().join("wabridge.db"))
    }

    pub fn sidecar_auth_dir(&self) -> PathBuf {
        self.sidecar
            .auth_dir
            .clone()
            .unwrap_or_else(|| self.resolved_data_dir().join("whatsapp-auth"))
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to. Defaults to "127.0.0.1".
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file. Defaults to `<data_dir>/wabridge.db`.
    pub path: Option<PathBuf>,
}

/// Session lifecycle timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    /// How long `/connect` with `immediate=false` waits for the session to
    /// come up.
    pub connect_wait_secs: u64,
    /// How long `/disconnect` and `/logout` wait for teardown to finish.
    pub stop_timeout_secs: u64,
    pub reconnect: ReconnectConfig,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            connect_wait_secs: 10,
            stop_timeout_secs: 5,
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl SessionsConfig {
    pub fn connect_wait(&self) -> Duration {
        Duration::from_secs(self.connect_wait_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

/// Bounded exponential backoff for transient disconnects.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Consecutive failed attempts before the session is declared failed.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
        }
    }
}

impl ReconnectConfig {
    /// Delay before reconnect attempt `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(20);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

/// Outbound webhook delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub timeout_secs: u64,
    /// Total attempts per event. 1 means fire once and drop on failure.
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            max_attempts: 1,
            retry_backoff_ms: 500,
        }
    }
}

/// WhatsApp bridge sidecar.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SidecarConfig {
    pub url: String,
    pub request_timeout_secs: u64,
    /// Base directory for per-tenant credentials. Defaults to
    /// `<data_dir>/whatsapp-auth`.
    pub auth_dir: Option<PathBuf>,
    /// When set, the gateway launches and supervises the sidecar itself.
    pub spawn: Option<SidecarSpawnConfig>,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:7892".into(),
            request_timeout_secs: 30,
            auth_dir: None,
            spawn: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SidecarSpawnConfig {
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub working_dir: Option<PathBuf>,
    pub stop_timeout_secs: u64,
}

impl Default for SidecarSpawnConfig {
    fn default() -> Self {
        Self {
            command: "node".into(),
            args: vec!["dist/index.js".into()],
            env: HashMap::new(),
            working_dir: None,
            stop_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}
