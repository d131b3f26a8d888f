use crate::humanize::ByteSize;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub status: StatusConfig,
    #[serde(default)]
    pub progress: ProgressConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// HTTP surface and on-disk layout
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    /// Root for the queue and status keyspaces
    #[serde(default = "default_data_path")]
    pub data_path: PathBuf,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: ByteSize,
    /// Encoded payloads up to this size travel inside the job
    #[serde(default = "default_inline_payload_bytes")]
    pub inline_payload_bytes: ByteSize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            data_path: default_data_path(),
            max_upload_bytes: default_max_upload_bytes(),
            inline_payload_bytes: default_inline_payload_bytes(),
        }
    }
}

impl ServerConfig {
    pub fn queue_path(&self) -> PathBuf {
        self.data_path.join("queue")
    }

    pub fn status_path(&self) -> PathBuf {
        self.data_path.join("status")
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8080))
}

fn default_data_path() -> PathBuf {
    PathBuf::from("data/importd")
}

fn default_max_upload_bytes() -> ByteSize {
    ByteSize(5 * 1024 * 1024) // 5 MB
}

fn default_inline_payload_bytes() -> ByteSize {
    ByteSize(256 * 1024) // 256 KB
}

/// Worker pool and retry policy
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_channel_size")]
    pub channel_size: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_delay_ms")]
    pub backoff_delay_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            channel_size: default_channel_size(),
            max_attempts: default_max_attempts(),
            backoff_delay_ms: default_backoff_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl QueueConfig {
    pub fn backoff_delay(&self) -> Duration {
        Duration::from_millis(self.backoff_delay_ms)
    }
}

fn default_workers() -> usize {
    4
}

fn default_channel_size() -> usize {
    100
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_delay_ms() -> u64 {
    1000
}

fn default_backoff_multiplier() -> u32 {
    2
}

/// Job status store
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StatusConfig {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    /// Records between throttled progress updates
    #[serde(default = "default_progress_every")]
    pub progress_every: u64,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            progress_every: default_progress_every(),
        }
    }
}

impl StatusConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

fn default_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_progress_every() -> u64 {
    100
}

/// Pub/sub channel carrying progress events
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProgressConfig {
    #[serde(default = "default_channel")]
    pub channel: String,
    /// Per-subscriber buffer before slow readers start skipping
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            channel: default_channel(),
            capacity: default_capacity(),
        }
    }
}

fn default_channel() -> String {
    crate::messaging::IMPORT_PROGRESS_CHANNEL.to_string()
}

fn default_capacity() -> usize {
    1024
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_path")]
    pub path: String,
    /// Upper bound on one identity-provider round trip
    #[serde(default = "default_auth_timeout_ms")]
    pub auth_timeout_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            path: default_gateway_path(),
            auth_timeout_ms: default_auth_timeout_ms(),
        }
    }
}

impl GatewayConfig {
    pub fn auth_timeout(&self) -> Duration {
        Duration::from_millis(self.auth_timeout_ms)
    }
}

fn default_gateway_path() -> String {
    "/ws".to_string()
}

fn default_auth_timeout_ms() -> u64 {
    5000
}

/// Identity provider kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthProvider {
    #[default]
    Jwt,
    Remote,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub provider: AuthProvider,
    /// Expected `iss` claim for JWTs
    pub issuer: Option<String>,
    /// Verification endpoint for the remote provider
    pub verify_url: Option<String>,
    /// External id -> internal user id
    #[serde(default)]
    pub users: HashMap<String, String>,
    /// Resolve unlisted identities to themselves
    #[serde(default)]
    pub passthrough: bool,
    /// HS256 secret (loaded from environment, not from config file)
    #[serde(skip)]
    pub jwt_secret: Option<String>,
}

/// Object store backend for uploaded payloads
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageProvider {
    #[default]
    Memory,
    Local,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub provider: StorageProvider,
    /// Directory for the local provider
    pub root: Option<PathBuf>,
}
