//! Config-file loading and defaults.
//!
//! One TOML file serves both roles, defaulting to
//! `~/.config/burrow/config.toml`. Key material lives in a `certificates`
//! directory next to the config file unless overridden.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use burrow_client::ServiceConfig;
use burrow_server::HeartbeatConfig;
use serde::{Deserialize, Serialize};

fn default_bufsize() -> usize {
    65536
}

fn default_server_addr() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    7011
}

/// Tunnel dial target (client side).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_server_addr")]
    pub addr: String,
    #[serde(default = "default_server_port")]
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            addr: default_server_addr(),
            port: default_server_port(),
        }
    }
}

/// The on-disk configuration shared by `burrow server` and `burrow client`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    /// Tunnel listener port (server role). Required there, unused by the
    /// client.
    pub port: Option<u16>,
    #[serde(default = "default_bufsize")]
    pub bufsize: usize,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub server: ServerSection,
    /// Services to expose (client role).
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
    /// Certificates directory; defaults to `certificates` next to the
    /// config file.
    pub certificates_dir: Option<PathBuf>,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            port: None,
            bufsize: default_bufsize(),
            heartbeat: HeartbeatConfig::default(),
            server: ServerSection::default(),
            services: Vec::new(),
            certificates_dir: None,
        }
    }
}

/// Default location: `~/.config/burrow/config.toml`.
pub fn default_config_path() -> Result<PathBuf> {
    let base = dirs::config_dir().context("cannot determine the user config directory")?;
    Ok(base.join("burrow").join("config.toml"))
}

impl FileConfig {
    /// Load from `path`. A missing file yields pure defaults so a fresh
    /// install can run the client against localhost without any setup.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&text)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    /// The certificates directory for a config loaded from `path`.
    pub fn certificates_dir(&self, config_path: &Path) -> PathBuf {
        match &self.certificates_dir {
            Some(dir) => dir.clone(),
            None => config_path
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join("certificates"),
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to render configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_config_parses() {
        let config: FileConfig = toml::from_str(
            r#"
            port = 7011
            bufsize = 32768

            [heartbeat]
            interval = 5
            liveness = 3

            [server]
            addr = "relay.example.com"
            port = 7011

            [[services]]
            addr = "127.0.0.1"
            port = 80
            bind_port = 9090

            [[services]]
            addr = "127.0.0.1"
            port = 22
            bind_port = 2222
            "#,
        )
        .unwrap();

        assert_eq!(config.port, Some(7011));
        assert_eq!(config.bufsize, 32768);
        assert_eq!(config.heartbeat.interval, 5);
        assert_eq!(config.server.addr, "relay.example.com");
        assert_eq!(config.services.len(), 2);
        assert_eq!(config.services[1].bind_port, 2222);
    }

    #[test]
    fn empty_config_gets_defaults() {
        let config: FileConfig = toml::from_str("").unwrap();
        assert_eq!(config.port, None);
        assert_eq!(config.bufsize, 65536);
        assert_eq!(config.heartbeat.interval, 10);
        assert_eq!(config.heartbeat.liveness, 5);
        assert_eq!(config.server.addr, "127.0.0.1");
        assert_eq!(config.server.port, 7011);
        assert!(config.services.is_empty());
    }

    #[test]
    fn certificates_dir_defaults_next_to_config() {
        let config: FileConfig = toml::from_str("").unwrap();
        let dir = config.certificates_dir(Path::new("/etc/burrow/config.toml"));
        assert_eq!(dir, PathBuf::from("/etc/burrow/certificates"));
    }

    #[test]
    fn missing_file_loads_defaults() {
        let config = FileConfig::load(Path::new("/nonexistent/burrow.toml")).unwrap();
        assert!(config.services.is_empty());
    }

    #[test]
    fn load_reads_a_real_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "port = 7011\ncertificates_dir = \"/srv/burrow/keys\"\n").unwrap();

        let config = FileConfig::load(&path).unwrap();
        assert_eq!(config.port, Some(7011));
        assert_eq!(config.certificates_dir(&path), PathBuf::from("/srv/burrow/keys"));
    }

    #[test]
    fn garbage_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "port = [not valid").unwrap();
        assert!(FileConfig::load(&path).is_err());
    }
}
