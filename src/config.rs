//! TOML configuration for the `reye` binary and server.
//!
//! Every section except `[auth]` has workable defaults, so a minimal file is:
//!
//! ```toml
//! [db]
//! path = "./data/refinery-eye.sqlite"
//!
//! [auth]
//! username = "inspector"
//! password_hash = "..."   # from `reye hash-password`
//! salt = "..."
//! ```
//!
//! Secrets never live in the file. The model API key, the session secret,
//! and AWS keys are read from environment variables named here.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub db: DbConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub uploads: UploadsConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub username: String,
    /// Hex HMAC-SHA256 of the password keyed by `salt`.
    pub password_hash: String,
    pub salt: String,
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
    #[serde(default = "default_session_secret_env")]
    pub session_secret_env: String,
}

fn default_session_ttl_secs() -> u64 {
    24 * 60 * 60
}
fn default_session_secret_env() -> String {
    "SESSION_SECRET".to_string()
}

impl AuthConfig {
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// `local` or `s3`.
    #[serde(default = "default_storage_backend")]
    pub backend: String,
    #[serde(default = "default_local_dir")]
    pub local_dir: PathBuf,
    #[serde(default)]
    pub s3: Option<S3StorageConfig>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            local_dir: default_local_dir(),
            s3: None,
        }
    }
}

fn default_storage_backend() -> String {
    "local".to_string()
}
fn default_local_dir() -> PathBuf {
    PathBuf::from("./uploads")
}

#[derive(Debug, Deserialize, Clone)]
pub struct S3StorageConfig {
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Key prefix prepended to `videos/...` and `references/...`.
    #[serde(default)]
    pub prefix: String,
    /// Custom endpoint for S3-compatible services (MinIO, LocalStack).
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default = "default_url_expiry_secs")]
    pub url_expiry_secs: u64,
}

fn default_region() -> String {
    "us-east-1".to_string()
}
fn default_url_expiry_secs() -> u64 {
    7 * 24 * 60 * 60
}

#[derive(Debug, Deserialize, Clone)]
pub struct UploadsConfig {
    #[serde(default = "default_max_video_bytes")]
    pub max_video_bytes: u64,
    #[serde(default = "default_max_reference_files")]
    pub max_reference_files: usize,
}

impl Default for UploadsConfig {
    fn default() -> Self {
        Self {
            max_video_bytes: default_max_video_bytes(),
            max_reference_files: default_max_reference_files(),
        }
    }
}

fn default_max_video_bytes() -> u64 {
    100 * 1024 * 1024
}
fn default_max_reference_files() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct GatewayConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            api_base: default_api_base(),
            api_key_env: default_api_key_env(),
            poll_interval_ms: default_poll_interval_ms(),
            max_poll_attempts: default_max_poll_attempts(),
            timeout_secs: default_timeout_secs(),
            temperature: default_temperature(),
        }
    }
}

fn default_model() -> String {
    "gemini-2.0-flash".to_string()
}
fn default_api_base() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}
fn default_api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}
fn default_poll_interval_ms() -> u64 {
    2000
}
fn default_max_poll_attempts() -> u32 {
    60
}
fn default_timeout_secs() -> u64 {
    300
}
fn default_temperature() -> f32 {
    0.2
}

impl GatewayConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// The model credential, if the configured variable is set and non-empty.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Checks shared by [`load_config`] and configs built in code.
pub fn validate(config: &Config) -> Result<()> {
    if config.auth.username.trim().is_empty() {
        bail!("auth.username must not be empty");
    }
    if hex::decode(&config.auth.password_hash).is_err() || config.auth.password_hash.is_empty() {
        bail!("auth.password_hash must be a hex digest (see `reye hash-password`)");
    }
    if config.auth.session_ttl_secs == 0 {
        bail!("auth.session_ttl_secs must be > 0");
    }

    match config.storage.backend.as_str() {
        "local" => {}
        "s3" => {
            let s3 = config
                .storage
                .s3
                .as_ref()
                .context("storage.backend is 's3' but [storage.s3] is missing")?;
            if s3.bucket.trim().is_empty() {
                bail!("storage.s3.bucket must not be empty");
            }
            if s3.url_expiry_secs == 0 || s3.url_expiry_secs > 7 * 24 * 60 * 60 {
                bail!("storage.s3.url_expiry_secs must be in 1..=604800");
            }
        }
        other => bail!(
            "Unknown storage backend: '{}'. Must be local or s3.",
            other
        ),
    }

    if config.uploads.max_video_bytes == 0 {
        bail!("uploads.max_video_bytes must be > 0");
    }
    if config.uploads.max_reference_files == 0 {
        bail!("uploads.max_reference_files must be > 0");
    }

    if config.gateway.max_poll_attempts == 0 {
        bail!("gateway.max_poll_attempts must be >= 1");
    }
    if !(0.0..=2.0).contains(&config.gateway.temperature) {
        bail!("gateway.temperature must be in [0.0, 2.0]");
    }

    Ok(())
}
