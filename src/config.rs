//! Configuration handling for datapoint.
//!
//! Everything is read from CLI arguments, each of which can also be supplied
//! through a `DATAPOINT_*` environment variable.

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

pub const DEFAULT_METADATA_URL: &str = "sqlite://datapoint.db?mode=rwc";
pub const DEFAULT_HTTP_HOST: &str = "127.0.0.1";
pub const DEFAULT_HTTP_PORT: u16 = 8080;
pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 10;

// Pool configuration defaults
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_MAX_CONNECTIONS_SQLITE: u32 = 1;
pub const DEFAULT_MIN_CONNECTIONS: u32 = 1;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;

/// Pool tuning applied to every handle a registered connection opens.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PoolOptions {
    /// Maximum connections in pool (default: 10 for MySQL/PostgreSQL, 1 for SQLite)
    pub max_connections: Option<u32>,
    /// Minimum connections in pool (default: 1)
    pub min_connections: Option<u32>,
    /// Idle timeout in seconds (default: 600)
    pub idle_timeout_secs: Option<u64>,
    /// Connection acquire timeout in seconds (default: 30)
    pub acquire_timeout_secs: Option<u64>,
    /// Whether to test connections before use (default: true)
    pub test_before_acquire: Option<bool>,
}

impl PoolOptions {
    /// Get max_connections with default value based on database type.
    pub fn max_connections_or_default(&self, is_sqlite: bool) -> u32 {
        self.max_connections.unwrap_or(if is_sqlite {
            DEFAULT_MAX_CONNECTIONS_SQLITE
        } else {
            DEFAULT_MAX_CONNECTIONS
        })
    }

    pub fn min_connections_or_default(&self) -> u32 {
        self.min_connections.unwrap_or(DEFAULT_MIN_CONNECTIONS)
    }

    pub fn idle_timeout_or_default(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs.unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS))
    }

    pub fn acquire_timeout_or_default(&self) -> Duration {
        Duration::from_secs(
            self.acquire_timeout_secs
                .unwrap_or(DEFAULT_ACQUIRE_TIMEOUT_SECS),
        )
    }

    pub fn test_before_acquire_or_default(&self) -> bool {
        self.test_before_acquire.unwrap_or(true)
    }

    /// Validate pool options and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(max) = self.max_connections {
            if max == 0 {
                return Err("max_connections must be greater than 0".to_string());
            }
        }
        if let Some(min) = self.min_connections {
            if let Some(max) = self.max_connections {
                if min > max {
                    return Err(format!(
                        "min_connections ({}) cannot exceed max_connections ({})",
                        min, max
                    ));
                }
            }
        }
        if self.acquire_timeout_secs == Some(0) {
            return Err("acquire_timeout must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Configuration for the datapoint server.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "datapoint",
    about = "Register SQL connections at runtime, inspect their schema and run structured queries",
    version,
    author
)]
pub struct Config {
    /// URL of the metadata store holding registered connections
    #[arg(long, default_value = DEFAULT_METADATA_URL, env = "DATAPOINT_METADATA_URL")]
    pub metadata_url: String,

    /// Bootstrap script run against the metadata store at startup.
    /// The embedded script is used when omitted.
    #[arg(long, value_name = "FILE", env = "DATAPOINT_MIGRATION")]
    pub migration: Option<PathBuf>,

    /// HTTP host to bind to
    #[arg(long, default_value = DEFAULT_HTTP_HOST, env = "DATAPOINT_HTTP_HOST")]
    pub http_host: String,

    /// HTTP port to bind to
    #[arg(long, default_value_t = DEFAULT_HTTP_PORT, env = "DATAPOINT_HTTP_PORT")]
    pub http_port: u16,

    /// Deadline in seconds applied to every query, exec and introspection call
    #[arg(
        long,
        default_value_t = DEFAULT_QUERY_TIMEOUT_SECS,
        env = "DATAPOINT_QUERY_TIMEOUT"
    )]
    pub query_timeout: u64,

    /// Seconds to wait for in-flight requests on shutdown
    #[arg(
        long,
        default_value_t = DEFAULT_SHUTDOWN_TIMEOUT_SECS,
        env = "DATAPOINT_SHUTDOWN_TIMEOUT"
    )]
    pub shutdown_timeout: u64,

    /// Maximum pooled handles per registered connection
    #[arg(long, env = "DATAPOINT_MAX_CONNECTIONS")]
    pub max_connections: Option<u32>,

    /// Minimum pooled handles per registered connection
    #[arg(long, env = "DATAPOINT_MIN_CONNECTIONS")]
    pub min_connections: Option<u32>,

    /// Idle timeout in seconds for pooled handles
    #[arg(long, env = "DATAPOINT_IDLE_TIMEOUT")]
    pub idle_timeout: Option<u64>,

    /// Seconds to wait when acquiring (or opening) a handle
    #[arg(long, env = "DATAPOINT_ACQUIRE_TIMEOUT")]
    pub acquire_timeout: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "DATAPOINT_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "DATAPOINT_JSON_LOGS")]
    pub json_logs: bool,
}

impl Config {
    /// Parse configuration from command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Create a default configuration (useful for testing).
    pub fn default_config() -> Self {
        Self {
            metadata_url: DEFAULT_METADATA_URL.to_string(),
            migration: None,
            http_host: DEFAULT_HTTP_HOST.to_string(),
            http_port: DEFAULT_HTTP_PORT,
            query_timeout: DEFAULT_QUERY_TIMEOUT_SECS,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            max_connections: None,
            min_connections: None,
            idle_timeout: None,
            acquire_timeout: None,
            log_level: "info".to_string(),
            json_logs: false,
        }
    }

    /// Collect the pool flags and check them for consistency.
    pub fn pool_options(&self) -> Result<PoolOptions, String> {
        let options = PoolOptions {
            max_connections: self.max_connections,
            min_connections: self.min_connections,
            idle_timeout_secs: self.idle_timeout,
            acquire_timeout_secs: self.acquire_timeout,
            test_before_acquire: None,
        };
        options.validate()?;
        Ok(options)
    }

    /// Get the HTTP bind address.
    pub fn http_bind_addr(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }

    pub fn query_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.query_timeout)
    }

    pub fn shutdown_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout)
    }

    /// The metadata URL with any password replaced, safe to log.
    pub fn masked_metadata_url(&self) -> String {
        match Url::parse(&self.metadata_url) {
            Ok(mut url) => {
                if url.password().is_some() {
                    let _ = url.set_password(Some("****"));
                }
                url.to_string()
            }
            Err(_) => "<unparseable url>".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}
