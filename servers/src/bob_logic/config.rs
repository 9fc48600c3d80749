use anyhow::{Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "server_bob.conf";

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "Beacon-of-Beacons query aggregation server", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "BOB_HOST", help = "Address to listen on.")]
    pub host: Option<String>,

    #[clap(long, env = "BOB_PORT", help = "Port to listen on for client connections.")]
    pub port: Option<u16>,

    #[clap(long, env = "BOB_CONFIG_PATH", help = "Path to the JSON server configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "BOB_CONFIG_DIR", help = "Configuration directory; beacon records are read from its `beacon` subdirectory.")]
    pub config_dir: Option<PathBuf>,

    #[clap(long, env = "BOB_TIMEOUT_SECS", help = "Seconds to wait for beacons before answering with what arrived.")]
    pub timeout_secs: Option<u64>,

    #[clap(long, env = "BOB_REQUEST_TIMEOUT_SECS", help = "Per-request cap in seconds for a single beacon call.")]
    pub request_timeout_secs: Option<u64>,

    #[clap(long, env = "BOB_MAX_IN_FLIGHT", help = "Maximum number of beacon requests in flight at once.")]
    pub max_in_flight: Option<usize>,

    #[clap(long, env = "BOB_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "BOB_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "TLS_CERT_PATH", help = "Path to the TLS certificate file.")]
    pub tls_cert_path: Option<PathBuf>,

    #[clap(long, env = "TLS_KEY_PATH", help = "Path to the TLS private key file.")]
    pub tls_key_path: Option<PathBuf>,
}

/// Fully resolved server settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub config_dir: PathBuf,
    pub timeout: Duration,
    pub request_timeout: Option<Duration>,
    pub max_in_flight: Option<usize>,
    pub log_dir: PathBuf,
    pub log_level: String,
    pub tls_cert_path: Option<PathBuf>,
    pub tls_key_path: Option<PathBuf>,
}

impl Config {
    fn defaults() -> Config {
        Config {
            host: Some("127.0.0.1".to_string()),
            port: Some(8080),
            config_dir: Some(PathBuf::from("./config")),
            timeout_secs: Some(20),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            ..Default::default()
        }
    }

    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            host: other.host.or(self.host),
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            config_dir: other.config_dir.or(self.config_dir),
            timeout_secs: other.timeout_secs.or(self.timeout_secs),
            request_timeout_secs: other.request_timeout_secs.or(self.request_timeout_secs),
            max_in_flight: other.max_in_flight.or(self.max_in_flight),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            tls_cert_path: other.tls_cert_path.or(self.tls_cert_path),
            tls_key_path: other.tls_key_path.or(self.tls_key_path),
        }
    }

    fn into_settings(self) -> Settings {
        let fallback = Config::defaults();
        Settings {
            host: self.host.or(fallback.host).unwrap_or_default(),
            port: self.port.or(fallback.port).unwrap_or_default(),
            config_dir: self.config_dir.or(fallback.config_dir).unwrap_or_default(),
            timeout: Duration::from_secs(self.timeout_secs.or(fallback.timeout_secs).unwrap_or_default()),
            request_timeout: self.request_timeout_secs.map(Duration::from_secs),
            max_in_flight: self.max_in_flight,
            log_dir: self.log_dir.or(fallback.log_dir).unwrap_or_default(),
            log_level: self.log_level.or(fallback.log_level).unwrap_or_default(),
            tls_cert_path: self.tls_cert_path,
            tls_key_path: self.tls_key_path,
        }
    }
}

impl Settings {
    /// Directory holding one JSON record per beacon.
    pub fn beacon_dir(&self) -> PathBuf {
        self.config_dir.join("beacon")
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .host
            .parse()
            .with_context(|| format!("invalid listen address {:?}", self.host))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    /// Both TLS paths, when both are configured.
    pub fn tls_paths(&self) -> Option<(&Path, &Path)> {
        match (&self.tls_cert_path, &self.tls_key_path) {
            (Some(cert), Some(key)) => Some((cert.as_path(), key.as_path())),
            _ => None,
        }
    }
}

/// Defaults, then the JSON config file, then environment and CLI.
pub fn load_config() -> Result<Settings> {
    resolve(Config::parse())
}

/// Resolves settings for already-parsed CLI/environment values.
pub fn resolve(cli: Config) -> Result<Settings> {
    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let mut current_config = Config::defaults();

    // A missing file is normal; an unreadable or malformed one is not.
    if config_file_path.exists() {
        let config_str = fs::read_to_string(&config_file_path)
            .with_context(|| format!("failed to read config file {}", config_file_path.display()))?;
        let file_config: Config = serde_json::from_str(&config_str)
            .with_context(|| format!("failed to parse config file {}", config_file_path.display()))?;
        current_config = current_config.merge(file_config);
    }

    Ok(current_config.merge(cli).into_settings())
}
