use clap::Parser;
use rand::Rng;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

pub const DEFAULT_LISTEN_ADDR: &str = ":8080";
pub const DEFAULT_HTTPS_LISTEN_ADDR: &str = ":443";
pub const DEFAULT_GRPC_ADDR: &str = ":3200";
pub const SECRET_KEY_ENV: &str = "COOKIE_SECRET_KEY";

/// Command-line surface. Every option falls back to an environment
/// variable, then to the JSON configuration file, then to a built-in
/// default.
#[derive(Debug, Default, Parser)]
#[command(name = "lariat-server", version)]
pub struct Cli {
    /// Address and port the HTTP server listens on.
    #[arg(short = 'a', long, env = "SERVER_ADDRESS")]
    pub listen_addr: Option<String>,

    /// Address and port the gRPC server listens on.
    #[arg(long, env = "GRPC_ADDRESS")]
    pub grpc_addr: Option<String>,

    /// Base URL used to render issued short URLs.
    #[arg(short = 'b', long, env = "BASE_URL")]
    pub base_url: Option<String>,

    /// Store short URLs in an append-only file at this path.
    #[arg(short = 'f', long, env = "FILE_STORAGE_PATH")]
    pub file_storage_path: Option<String>,

    /// Store short URLs in PostgreSQL at this DSN.
    #[arg(short = 'd', long, env = "DATABASE_DSN")]
    pub database_dsn: Option<String>,

    /// CIDR of clients allowed to read the internal stats endpoint.
    #[arg(short = 't', long, env = "TRUSTED_SUBNET")]
    pub trusted_subnet: Option<String>,

    /// Serve over TLS (the supervisor loads and validates the material).
    #[arg(short = 's', long, env = "ENABLE_HTTPS")]
    pub enable_https: bool,

    /// Path to the TLS certificate file.
    #[arg(long = "cert", env = "TLS_CERT_FILE")]
    pub cert_file: Option<String>,

    /// Path to the TLS key file.
    #[arg(long = "key", env = "TLS_KEY_FILE")]
    pub key_file: Option<String>,

    /// Path to a JSON configuration file.
    #[arg(short = 'c', long = "config", env = "CONFIG")]
    pub config_file: Option<PathBuf>,
}

/// JSON configuration file shape. Every key is optional; set keys sit
/// below flags and environment variables in precedence.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    enable_https: Option<bool>,
    tls_cert_file: Option<String>,
    tls_key_file: Option<String>,
    server_address: Option<String>,
    grpc_address: Option<String>,
    base_url: Option<String>,
    file_storage_path: Option<String>,
    database_dsn: Option<String>,
    cookie_secret_key: Option<String>,
    trusted_subnet: Option<String>,
}

/// The finalised configuration record the supervisor runs from.
#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: String,
    pub grpc_addr: String,
    pub base_url: String,
    pub file_storage_path: Option<String>,
    pub database_dsn: Option<String>,
    pub trusted_subnet: Option<String>,
    pub enable_https: bool,
    pub cert_file: String,
    pub key_file: String,
    pub secret_key: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl Config {
    /// Loads configuration from flags, environment and the optional JSON
    /// file, at the precedence flag > env > file > default.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_cli(Cli::parse())
    }

    /// Resolves a parsed command line (flags and environment already merged
    /// by clap) against the JSON file and the built-in defaults.
    pub fn from_cli(cli: Cli) -> Result<Self, ConfigError> {
        let file = match &cli.config_file {
            Some(path) => {
                let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.clone(),
                    source,
                })?;
                serde_json::from_str::<FileConfig>(&contents).map_err(|source| ConfigError::Parse {
                    path: path.clone(),
                    source,
                })?
            }
            None => FileConfig::default(),
        };

        let enable_https = cli.enable_https || file.enable_https.unwrap_or(false);

        let mut listen_addr = cli
            .listen_addr
            .or(file.server_address)
            .map(normalize_addr)
            .unwrap_or_else(|| {
                if enable_https {
                    DEFAULT_HTTPS_LISTEN_ADDR.to_string()
                } else {
                    DEFAULT_LISTEN_ADDR.to_string()
                }
            });
        // An explicitly configured default port still moves to 443 under
        // HTTPS, matching the documented listen-address contract.
        if enable_https && listen_addr == DEFAULT_LISTEN_ADDR {
            listen_addr = DEFAULT_HTTPS_LISTEN_ADDR.to_string();
        }

        let grpc_addr = cli
            .grpc_addr
            .or(file.grpc_address)
            .map(normalize_addr)
            .unwrap_or_else(|| DEFAULT_GRPC_ADDR.to_string());

        let base_url = cli
            .base_url
            .or(file.base_url)
            .unwrap_or_else(|| default_base_url(&listen_addr));

        let secret_key = match std::env::var(SECRET_KEY_ENV) {
            Ok(key) if !key.is_empty() => key.into_bytes(),
            _ => match file.cookie_secret_key {
                Some(key) if !key.is_empty() => key.into_bytes(),
                _ => generate_secret_key(),
            },
        };

        Ok(Self {
            listen_addr,
            grpc_addr,
            base_url,
            file_storage_path: cli.file_storage_path.or(file.file_storage_path),
            database_dsn: cli.database_dsn.or(file.database_dsn),
            trusted_subnet: cli.trusted_subnet.or(file.trusted_subnet),
            enable_https,
            cert_file: cli
                .cert_file
                .or(file.tls_cert_file)
                .unwrap_or_else(|| "cert.pem".to_string()),
            key_file: cli
                .key_file
                .or(file.tls_key_file)
                .unwrap_or_else(|| "key.pem".to_string()),
            secret_key,
        })
    }
}

/// Generates a random 32-byte key for signing identity cookies.
pub fn generate_secret_key() -> Vec<u8> {
    let mut key = vec![0u8; 32];
    rand::rng().fill(&mut key[..]);
    key
}

/// Accepts a bare port (`8080`) as shorthand for `:8080`.
fn normalize_addr(addr: String) -> String {
    if addr.contains(':') {
        addr
    } else {
        format!(":{addr}")
    }
}

/// Derives the base URL for issued short links from the listen address.
fn default_base_url(listen_addr: &str) -> String {
    let mut host_port = listen_addr.to_string();
    if host_port == ":" {
        host_port = DEFAULT_LISTEN_ADDR.to_string();
    }
    if host_port.starts_with(':') {
        host_port = format!("localhost{host_port}");
    }
    format!("http://{host_port}")
}

/// Resolves a `:8080`-style listen address to a socket address, binding all
/// interfaces when no host part is given.
pub fn bind_addr(addr: &str) -> Result<SocketAddr, std::net::AddrParseError> {
    if addr.starts_with(':') {
        format!("0.0.0.0{addr}").parse()
    } else {
        addr.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = Config::from_cli(Cli::default()).unwrap();
        assert_eq!(config.listen_addr, ":8080");
        assert_eq!(config.grpc_addr, ":3200");
        assert_eq!(config.base_url, "http://localhost:8080");
        assert!(config.file_storage_path.is_none());
        assert!(config.database_dsn.is_none());
        assert!(!config.enable_https);
        assert_eq!(config.secret_key.len(), 32);
    }

    #[test]
    fn https_moves_the_default_port_to_443() {
        let cli = Cli {
            enable_https: true,
            ..Cli::default()
        };
        let config = Config::from_cli(cli).unwrap();
        assert_eq!(config.listen_addr, ":443");
        assert_eq!(config.cert_file, "cert.pem");
        assert_eq!(config.key_file, "key.pem");
    }

    #[test]
    fn bare_port_is_normalized() {
        let cli = Cli {
            listen_addr: Some("9090".to_string()),
            ..Cli::default()
        };
        let config = Config::from_cli(cli).unwrap();
        assert_eq!(config.listen_addr, ":9090");
        assert_eq!(config.base_url, "http://localhost:9090");
    }

    #[test]
    fn flags_override_the_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"server_address": ":7777", "base_url": "https://short.example", "trusted_subnet": "192.168.0.0/16"}"#,
        )
        .unwrap();

        let cli = Cli {
            listen_addr: Some(":6666".to_string()),
            config_file: Some(path),
            ..Cli::default()
        };
        let config = Config::from_cli(cli).unwrap();
        // Flag wins over the file, file wins over the default.
        assert_eq!(config.listen_addr, ":6666");
        assert_eq!(config.base_url, "https://short.example");
        assert_eq!(config.trusted_subnet.as_deref(), Some("192.168.0.0/16"));
    }

    #[test]
    fn unreadable_config_file_is_an_error() {
        let cli = Cli {
            config_file: Some(PathBuf::from("/no/such/config.json")),
            ..Cli::default()
        };
        assert!(matches!(
            Config::from_cli(cli),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn bind_addr_fills_the_wildcard_host() {
        assert_eq!(bind_addr(":8080").unwrap().to_string(), "0.0.0.0:8080");
        assert_eq!(
            bind_addr("127.0.0.1:8080").unwrap().to_string(),
            "127.0.0.1:8080"
        );
        assert!(bind_addr("not an address").is_err());
    }
}
