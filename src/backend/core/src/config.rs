//! Configuration management.
//!
//! Values come from an optional file and then `PDFGEN__*` environment
//! variables, e.g. `PDFGEN__SERVER__PORT=9000` or
//! `PDFGEN__PROJECTION__POLL_INTERVAL=500ms`.

use std::time::Duration;

use serde::Deserialize;

use crate::telemetry::{LoggingConfig, MetricsConfig};

const ENV_PREFIX: &str = "PDFGEN";

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration; without it the server keeps events in memory
    #[serde(default)]
    pub database: Option<DatabaseConfig>,

    /// Template list projection
    #[serde(default)]
    pub projection: ProjectionConfig,

    /// PDF rendering
    #[serde(default)]
    pub render: RenderConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// HTTP server host
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Origins allowed by CORS; empty allows any
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            allowed_origins: Vec::new(),
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// How long to wait for a pooled connection
    #[serde(default = "default_acquire_timeout", with = "humantime_serde")]
    pub acquire_timeout: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProjectionConfig {
    /// Checkpoint name
    #[serde(default = "default_projection_name")]
    pub name: String,

    /// Delay between polls of the event log
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Events fetched per query
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// How long shutdown waits for an in-flight tick
    #[serde(default = "default_shutdown_grace", with = "humantime_serde")]
    pub shutdown_grace: Duration,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            name: default_projection_name(),
            poll_interval: default_poll_interval(),
            batch_size: default_batch_size(),
            shutdown_grace: default_shutdown_grace(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RenderConfig {
    /// Path or name of the typst executable
    #[serde(default = "default_typst_binary")]
    pub typst_binary: String,

    /// Upper bound on a single compile
    #[serde(default = "default_render_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            typst_binary: default_typst_binary(),
            timeout: default_render_timeout(),
        }
    }
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 2 }
fn default_acquire_timeout() -> Duration { Duration::from_secs(5) }
fn default_projection_name() -> String { "template_list".to_string() }
fn default_poll_interval() -> Duration { Duration::from_millis(250) }
fn default_batch_size() -> usize { 500 }
fn default_shutdown_grace() -> Duration { Duration::from_secs(5) }
fn default_typst_binary() -> String { "typst".to_string() }
fn default_render_timeout() -> Duration { Duration::from_secs(30) }

impl Config {
    /// Load configuration from the environment (after `.env`, if present).
    pub fn load() -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();

        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }

    /// Load from a specific file path, with environment overrides on top.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();

        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.bind_address(), "0.0.0.0:8080");
        assert!(config.database.is_none());
        assert_eq!(config.projection.poll_interval, Duration::from_millis(250));
        assert_eq!(config.render.typst_binary, "typst");
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[server]
port = 9100
allowed_origins = ["http://localhost:5173"]

[database]
url = "postgres://localhost/pdfgen"

[projection]
poll_interval = "1s"
batch_size = 50
"#
        )
        .unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let config = Config::from_file(&path).unwrap();

        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.allowed_origins, vec!["http://localhost:5173"]);
        let database = config.database.unwrap();
        assert_eq!(database.url, "postgres://localhost/pdfgen");
        assert_eq!(database.max_connections, 20);
        assert_eq!(config.projection.poll_interval, Duration::from_secs(1));
        assert_eq!(config.projection.batch_size, 50);
        assert_eq!(config.projection.shutdown_grace, Duration::from_secs(5));
    }
}
