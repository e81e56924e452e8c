//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the cafe can start with zero
//! configuration for local development.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use cafe_shared::constants::{DEFAULT_HTTP_PORT, MAX_BODY_SIZE};

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:40601`
    pub http_addr: SocketAddr,

    /// SQLite file holding clients, thread snapshots and inbox entries.
    /// Env: `DATABASE_PATH`
    /// Default: `./cafe/cafe.db`
    pub database_path: PathBuf,

    /// Directory of the content-addressed block store.
    /// Env: `CONTENT_STORE_PATH`
    /// Default: `./cafe/content`
    pub content_store_path: PathBuf,

    /// Maximum request body size in bytes.
    /// Env: `MAX_BODY_SIZE`
    /// Default: 50 MiB
    pub max_body_size: usize,

    /// Maximum size of a single pinned object in bytes.
    /// Env: `MAX_OBJECT_SIZE`
    /// Default: 50 MiB
    pub max_object_size: usize,

    /// Pending notifications kept before new ones are dropped.
    /// Env: `NOTIFY_QUEUE_CAPACITY`
    /// Default: `1024`
    pub notify_queue_capacity: usize,

    /// Upper bound on a single notification attempt.
    /// Env: `NOTIFY_TIMEOUT_MS`
    /// Default: `5000`
    pub notify_timeout: Duration,

    /// Results a query handler may produce ahead of the response writer.
    /// Env: `QUERY_BUFFER`
    /// Default: `1`
    pub query_buffer: usize,

    /// Human-readable name for this cafe.
    /// Env: `INSTANCE_NAME`
    pub instance_name: String,

    /// Admin API bearer token. Required to access /admin/* endpoints.
    /// Env: `ADMIN_TOKEN`
    /// Default: empty (admin API disabled).
    pub admin_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: PathBuf::from("./cafe/cafe.db"),
            content_store_path: PathBuf::from("./cafe/content"),
            max_body_size: MAX_BODY_SIZE,
            max_object_size: MAX_BODY_SIZE,
            notify_queue_capacity: 1024,
            notify_timeout: Duration::from_millis(5000),
            query_buffer: 1,
            instance_name: "Cafe".to_string(),
            admin_token: None,
        }
    }
}

// Written by hand so the admin token never ends up in logs.
impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("http_addr", &self.http_addr)
            .field("database_path", &self.database_path)
            .field("content_store_path", &self.content_store_path)
            .field("max_body_size", &self.max_body_size)
            .field("max_object_size", &self.max_object_size)
            .field("notify_queue_capacity", &self.notify_queue_capacity)
            .field("notify_timeout", &self.notify_timeout)
            .field("query_buffer", &self.query_buffer)
            .field("instance_name", &self.instance_name)
            .field("admin_token", &self.admin_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary variable lookup.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        parse_into(&lookup, "HTTP_ADDR", &mut config.http_addr);

        if let Some(path) = lookup("DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }

        if let Some(path) = lookup("CONTENT_STORE_PATH") {
            config.content_store_path = PathBuf::from(path);
        }

        parse_into(&lookup, "MAX_BODY_SIZE", &mut config.max_body_size);
        parse_into(&lookup, "MAX_OBJECT_SIZE", &mut config.max_object_size);
        parse_into(&lookup, "NOTIFY_QUEUE_CAPACITY", &mut config.notify_queue_capacity);

        let mut timeout_ms = config.notify_timeout.as_millis() as u64;
        parse_into(&lookup, "NOTIFY_TIMEOUT_MS", &mut timeout_ms);
        config.notify_timeout = Duration::from_millis(timeout_ms);

        parse_into(&lookup, "QUERY_BUFFER", &mut config.query_buffer);

        // mpsc channels panic on a zero capacity
        config.notify_queue_capacity = config.notify_queue_capacity.max(1);
        config.query_buffer = config.query_buffer.max(1);

        if let Some(name) = lookup("INSTANCE_NAME") {
            config.instance_name = name;
        }

        if let Some(token) = lookup("ADMIN_TOKEN") {
            if !token.is_empty() {
                config.admin_token = Some(token);
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

fn parse_into<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, target: &mut T)
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(value) => *target = value,
        Err(e) => {
            tracing::warn!(
                key = key,
                value = %raw,
                error = %e,
                "Invalid configuration value, using default"
            );
        }
    }
}
