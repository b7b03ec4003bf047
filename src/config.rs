//! Configuration for bastion-tunnel
//!
//! Settings are loaded from, in increasing priority:
//! - Default values
//! - A TOML file (`--config`, `$BASTION_TUNNEL_CONFIG`, `~/.config/bastion-tunnel/config.toml`
//!   or `./bastion-tunnel.toml`)
//! - `BASTION_TUNNEL_*` environment variables
//! - Command-line flags (applied by the binary)
//!
//! ```toml
//! [jump]
//! host = "bastion.example.com"
//! user = "deploy"
//! identity_file = "~/.ssh/id_ed25519"
//!
//! [target]
//! host = "db.internal"
//! port = 5432
//!
//! [local]
//! port = 15432
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use crate::error::{Error, Result};
use crate::tunnel::{HostKeyPolicy, TunnelEndpoint, TunnelOptions, DEFAULT_LOCAL_HOST};

/// Prefix of every environment override.
pub const ENV_PREFIX: &str = "BASTION_TUNNEL_";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SSH jump host settings
    pub jump: JumpConfig,

    /// Destination reachable from the jump host
    pub target: TargetConfig,

    /// Local listener settings
    pub local: LocalConfig,
}

/// `[jump]` table
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JumpConfig {
    /// Jump host name or address
    pub host: Option<String>,

    /// SSH port
    pub port: u16,

    /// Login user
    pub user: Option<String>,

    /// Password (prefer `identity_file`)
    pub password: Option<String>,

    /// Private key file in OpenSSH or PEM encoding
    pub identity_file: Option<PathBuf>,

    /// Passphrase for `identity_file`
    pub key_passphrase: Option<String>,

    /// TCP connect plus handshake timeout in seconds
    pub connect_timeout: u64,

    /// Host key verification policy
    pub host_key_policy: HostKeyPolicy,

    /// known_hosts file (default: ~/.ssh/known_hosts)
    pub known_hosts_file: Option<PathBuf>,

    /// Keepalive interval in seconds (0 disables)
    pub keepalive_interval: u64,
}

impl Default for JumpConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: 22,
            user: None,
            password: None,
            identity_file: None,
            key_passphrase: None,
            connect_timeout: 30,
            host_key_policy: HostKeyPolicy::default(),
            known_hosts_file: None,
            keepalive_interval: 15,
        }
    }
}

/// `[target]` table
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// Target host as seen from the jump host
    pub host: Option<String>,

    /// Target port
    pub port: Option<u16>,
}

/// `[local]` table
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    /// Address to listen on
    pub host: String,

    /// Port to listen on (0 = ephemeral)
    pub port: u16,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_LOCAL_HOST.to_string(),
            port: 0,
        }
    }
}

impl Config {
    /// Load configuration from all sources
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut config = match config_path {
            Some(path) => Self::from_file(path)?,
            None => match Self::get_config_paths().into_iter().find(|p| p.exists()) {
                Some(path) => Self::from_file(&path)?,
                None => Config::default(),
            },
        };

        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Get the list of configuration file paths to check
    fn get_config_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        if let Ok(env_config) = std::env::var(format!("{}CONFIG", ENV_PREFIX)) {
            paths.push(PathBuf::from(env_config));
        }

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("bastion-tunnel").join("config.toml"));
        }

        paths.push(PathBuf::from("bastion-tunnel.toml"));
        paths
    }

    /// Load from a specific file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read config file {}: {}", path.display(), e))
        })?;
        debug!(path = %path.display(), "Loaded config file");
        Self::from_toml_str(&content)
    }

    /// Parse TOML configuration
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(host) = env_var("JUMP_HOST") {
            self.jump.host = Some(host);
        }
        if let Some(port) = env_parse("JUMP_PORT")? {
            self.jump.port = port;
        }
        if let Some(user) = env_var("JUMP_USER") {
            self.jump.user = Some(user);
        }
        if let Some(password) = env_var("JUMP_PASSWORD") {
            self.jump.password = Some(password);
        }
        if let Some(file) = env_var("IDENTITY_FILE") {
            self.jump.identity_file = Some(PathBuf::from(file));
        }
        if let Some(passphrase) = env_var("KEY_PASSPHRASE") {
            self.jump.key_passphrase = Some(passphrase);
        }
        if let Some(timeout) = env_parse("CONNECT_TIMEOUT")? {
            self.jump.connect_timeout = timeout;
        }
        if let Some(policy) = env_parse("HOST_KEY_POLICY")? {
            self.jump.host_key_policy = policy;
        }
        if let Some(file) = env_var("KNOWN_HOSTS_FILE") {
            self.jump.known_hosts_file = Some(PathBuf::from(file));
        }
        if let Some(host) = env_var("TARGET_HOST") {
            self.target.host = Some(host);
        }
        if let Some(port) = env_parse("TARGET_PORT")? {
            self.target.port = Some(port);
        }
        if let Some(host) = env_var("LOCAL_HOST") {
            self.local.host = host;
        }
        if let Some(port) = env_parse("LOCAL_PORT")? {
            self.local.port = port;
        }
        Ok(())
    }

    /// Build tunnel options, reading the identity file if one is set.
    pub fn tunnel_options(&self) -> Result<TunnelOptions> {
        let jump_host = required(self.jump.host.as_deref(), "jump.host")?;
        let jump_user = required(self.jump.user.as_deref(), "jump.user")?;
        let target_host = required(self.target.host.as_deref(), "target.host")?;
        let target_port = self
            .target
            .port
            .ok_or_else(|| Error::Config("missing required setting 'target.port'".to_string()))?;

        let mut options = TunnelOptions::new(
            TunnelEndpoint::new(jump_host, self.jump.port),
            jump_user,
            TunnelEndpoint::new(target_host, target_port),
        )
        .local_host(self.local.host.clone())
        .local_port(self.local.port)
        .connect_timeout(Duration::from_secs(self.jump.connect_timeout))
        .host_key_policy(self.jump.host_key_policy);

        if self.jump.keepalive_interval > 0 {
            options = options.keepalive_interval(Duration::from_secs(self.jump.keepalive_interval));
        }
        if let Some(file) = &self.jump.known_hosts_file {
            options = options.known_hosts_file(expand_path(file));
        }
        if let Some(password) = &self.jump.password {
            options = options.password(password.clone());
        }
        if let Some(passphrase) = &self.jump.key_passphrase {
            options = options.key_passphrase(passphrase.clone());
        }
        if let Some(file) = &self.jump.identity_file {
            let path = expand_path(file);
            let key = std::fs::read(&path).map_err(|source| Error::KeyFile { path, source })?;
            options = options.private_key(key);
        }

        Ok(options)
    }
}

/// Expand `~` and environment variables in a path
pub fn expand_path(path: &Path) -> PathBuf {
    let text = path.to_string_lossy();
    match shellexpand::full(&text) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => PathBuf::from(shellexpand::tilde(&text).as_ref()),
    }
}

fn required<'a>(value: Option<&'a str>, name: &str) -> Result<&'a str> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| Error::Config(format!("missing required setting '{}'", name)))
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(format!("{}{}", ENV_PREFIX, name)).ok()
}

fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_var(name) {
        Some(value) => value.trim().parse().map(Some).map_err(|e| {
            Error::Config(format!("invalid {}{}='{}': {}", ENV_PREFIX, name, value, e))
        }),
        None => Ok(None),
    }
}
