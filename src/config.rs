//! Configuration module for wirelab.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Service spoken on the listening port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProtocolType {
    /// Greet, echo one chunk of raw bytes, close
    Echo,
    /// Newline-framed echo, connection stays open
    Line,
    /// Line echo inside TLS, one reply per connection
    TlsLine,
    /// Static file HTTP server
    File,
}

impl ProtocolType {
    /// Port used when neither the CLI nor the config file names one.
    pub fn default_port(self) -> u16 {
        match self {
            ProtocolType::File => 8080,
            _ => 5555,
        }
    }
}

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "wirelab")]
#[command(author = "wirelab authors")]
#[command(version = "0.1.0")]
#[command(about = "Echo, line echo, TLS echo and static file servers", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Service to run
    #[arg(short, long, value_enum)]
    pub protocol: Option<ProtocolType>,

    /// Host to bind to (or connect to with --client)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (defaults: 5555 for echo protocols, 8080 for file)
    #[arg(short = 'P', long)]
    pub port: Option<u16>,

    /// URL path prefix served by the file server
    #[arg(long)]
    pub prefix: Option<String>,

    /// Directory the file server maps request paths onto
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Greeting written to each echo client on connect; empty disables it
    #[arg(long)]
    pub greeting: Option<String>,

    /// Maximum line length for line-framed protocols
    #[arg(long)]
    pub max_line_length: Option<usize>,

    /// PEM certificate chain for tls-line
    #[arg(long)]
    pub cert: Option<PathBuf>,

    /// PEM private key for tls-line
    #[arg(long)]
    pub key: Option<PathBuf>,

    /// Number of worker threads (defaults to number of CPU cores)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Seconds to wait for connections to drain on shutdown
    #[arg(long)]
    pub shutdown_timeout: Option<u64>,

    /// Run the echo client for the selected protocol instead of a server
    #[arg(long)]
    pub client: bool,

    /// Message sent by the client
    #[arg(short, long)]
    pub message: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub echo: EchoConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub tls: TlsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_protocol")]
    pub protocol: ProtocolType,
    #[serde(default = "default_host")]
    pub host: String,
    /// Falls back to the protocol's default port
    pub port: Option<u16>,
    #[serde(default = "default_backlog")]
    pub backlog: u32,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    pub workers: Option<usize>,
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            protocol: default_protocol(),
            host: default_host(),
            port: None,
            backlog: default_backlog(),
            max_connections: default_max_connections(),
            workers: None,
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

/// Greeting the byte echo server sends when none is configured.
pub const DEFAULT_ECHO_GREETING: &str = "wirelab echo ready\r\n";

/// Echo session configuration
#[derive(Debug, Deserialize)]
pub struct EchoConfig {
    pub greeting: Option<String>,
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
}

impl Default for EchoConfig {
    fn default() -> Self {
        Self {
            greeting: None,
            max_line_length: default_max_line_length(),
            read_buffer_size: default_read_buffer_size(),
        }
    }
}

/// File server configuration
#[derive(Debug, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// Defaults to the working directory
    pub root: Option<PathBuf>,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            root: None,
            chunk_size: default_chunk_size(),
        }
    }
}

/// TLS material locations
#[derive(Debug, Deserialize)]
pub struct TlsConfig {
    #[serde(default = "default_cert")]
    pub cert: PathBuf,
    #[serde(default = "default_key")]
    pub key: PathBuf,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            cert: default_cert(),
            key: default_key(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_protocol() -> ProtocolType {
    ProtocolType::Echo
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_backlog() -> u32 {
    1024
}

fn default_max_connections() -> usize {
    10_000
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_max_line_length() -> usize {
    2048
}

fn default_read_buffer_size() -> usize {
    8 * 1024
}

fn default_prefix() -> String {
    "/".to_string()
}

fn default_chunk_size() -> usize {
    8 * 1024
}

fn default_cert() -> PathBuf {
    PathBuf::from("security/cert.crt")
}

fn default_key() -> PathBuf {
    PathBuf::from("security/private.pem")
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub protocol: ProtocolType,
    pub host: String,
    pub port: u16,
    pub backlog: u32,
    pub max_connections: usize,
    pub workers: usize,
    pub shutdown_timeout: Duration,
    pub greeting: Option<String>,
    pub max_line_length: usize,
    pub read_buffer_size: usize,
    pub prefix: String,
    pub root: PathBuf,
    pub chunk_size: usize,
    pub cert: PathBuf,
    pub key: PathBuf,
    pub client: bool,
    pub message: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        let toml_config = match cli.config {
            Some(ref config_path) => {
                let contents = std::fs::read_to_string(config_path).map_err(|source| {
                    ConfigError::FileRead {
                        path: config_path.clone(),
                        source,
                    }
                })?;
                toml::from_str(&contents).map_err(|source| ConfigError::TomlParse {
                    path: config_path.clone(),
                    source,
                })?
            }
            None => TomlConfig::default(),
        };

        Ok(Self::merge(cli, toml_config))
    }

    /// Merge CLI args over TOML values.
    pub fn merge(cli: CliArgs, toml_config: TomlConfig) -> Self {
        let protocol = cli.protocol.unwrap_or(toml_config.server.protocol);
        let root = cli
            .root
            .or(toml_config.http.root)
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

        Config {
            protocol,
            host: cli.host.unwrap_or(toml_config.server.host),
            port: cli
                .port
                .or(toml_config.server.port)
                .unwrap_or_else(|| protocol.default_port()),
            backlog: toml_config.server.backlog,
            max_connections: toml_config.server.max_connections,
            workers: cli
                .workers
                .or(toml_config.server.workers)
                .unwrap_or_else(num_cpus),
            shutdown_timeout: Duration::from_secs(
                cli.shutdown_timeout
                    .unwrap_or(toml_config.server.shutdown_timeout),
            ),
            greeting: cli
                .greeting
                .or(toml_config.echo.greeting)
                .or_else(|| {
                    (protocol == ProtocolType::Echo).then(|| DEFAULT_ECHO_GREETING.to_string())
                })
                .filter(|greeting| !greeting.is_empty()),
            max_line_length: cli
                .max_line_length
                .unwrap_or(toml_config.echo.max_line_length),
            read_buffer_size: toml_config.echo.read_buffer_size,
            prefix: cli.prefix.unwrap_or(toml_config.http.prefix),
            root,
            chunk_size: toml_config.http.chunk_size,
            cert: cli.cert.unwrap_or(toml_config.tls.cert),
            key: cli.key.unwrap_or(toml_config.tls.key),
            client: cli.client,
            message: cli.message,
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        }
    }

    /// `host:port` string for binding or connecting.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
