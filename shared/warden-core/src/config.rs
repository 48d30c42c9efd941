//! Configuration management for microservices
//!
//! Values are read from the environment once at startup, validated, and handed
//! to the connection layer as plain structs. Nothing below this module parses
//! raw configuration.

use crate::error::{Result, WardenError};
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub service_name: String,
    pub http_bind: String,
    pub log_level: String,
    pub json_logs: bool,
    pub shutdown_timeout: Duration,
    pub health_probe_timeout: Duration,
    pub readiness_timeout: Duration,
    pub store: StoreConfig,
    pub broker: BrokerConfig,
}

/// Relational store connection settings.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: String,
    pub ssl_mode: String,
    pub max_open_conns: usize,
    pub max_idle_conns: usize,
    pub max_lifetime: Duration,
    pub connect_timeout: Duration,
}

/// Message broker connection settings.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub vhost: String,
    pub connection_name: String,
    pub heartbeat: Duration,
    pub max_retries: u32,
    pub prefetch: u16,
    pub publisher_confirms: bool,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup. `from_env` is this with
    /// the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let config = Self {
            service_name: get("SERVICE_NAME", "user-service"),
            http_bind: get("HTTP_BIND", "0.0.0.0:8080"),
            log_level: lookup("LOG_LEVEL")
                .or_else(|| lookup("RUST_LOG"))
                .unwrap_or_else(|| "info".to_string()),
            json_logs: flag(&lookup, "JSON_LOGS", true)?,
            shutdown_timeout: secs(&lookup, "SHUTDOWN_TIMEOUT_SECS", 30)?,
            health_probe_timeout: secs(&lookup, "HEALTH_PROBE_TIMEOUT_SECS", 3)?,
            readiness_timeout: secs(&lookup, "READINESS_TIMEOUT_SECS", 5)?,
            store: StoreConfig {
                url: lookup("DATABASE_URL"),
                host: get("DATABASE_HOST", "localhost"),
                port: parse(&lookup, "DATABASE_PORT", 5432)?,
                username: get("DATABASE_USER", "user-service"),
                password: get("DATABASE_PASSWORD", "admin"),
                database: get("DATABASE_NAME", "user-service"),
                ssl_mode: get("DATABASE_SSL_MODE", "disable"),
                max_open_conns: parse(&lookup, "DATABASE_MAX_OPEN_CONNS", 25)?,
                max_idle_conns: parse(&lookup, "DATABASE_MAX_IDLE_CONNS", 25)?,
                max_lifetime: secs(&lookup, "DATABASE_MAX_LIFETIME_SECS", 300)?,
                connect_timeout: secs(&lookup, "DATABASE_CONNECT_TIMEOUT_SECS", 5)?,
            },
            broker: BrokerConfig {
                url: lookup("RABBITMQ_URL"),
                host: get("RABBITMQ_HOST", "localhost"),
                port: parse(&lookup, "RABBITMQ_PORT", 5672)?,
                username: get("RABBITMQ_USER", "guest"),
                password: get("RABBITMQ_PASSWORD", "guest"),
                vhost: get("RABBITMQ_VHOST", "/"),
                connection_name: get("RABBITMQ_CONNECTION_NAME", "user-service"),
                heartbeat: secs(&lookup, "RABBITMQ_HEARTBEAT_SECS", 60)?,
                max_retries: parse(&lookup, "RABBITMQ_MAX_RETRIES", 3)?,
                prefetch: parse(&lookup, "RABBITMQ_PREFETCH", 1)?,
                publisher_confirms: flag(&lookup, "RABBITMQ_PUBLISHER_CONFIRMS", false)?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.store.validate()?;
        self.broker.validate()?;
        if self.health_probe_timeout.is_zero() {
            return Err(WardenError::Config("HEALTH_PROBE_TIMEOUT_SECS must be > 0".into()));
        }
        if self.shutdown_timeout.is_zero() {
            return Err(WardenError::Config("SHUTDOWN_TIMEOUT_SECS must be > 0".into()));
        }
        Ok(())
    }
}

impl StoreConfig {
    /// Connection string handed to the driver. An explicit URL wins over the
    /// discrete fields.
    pub fn dsn(&self) -> String {
        match &self.url {
            Some(url) => url.clone(),
            None => format!(
                "host={} port={} user={} password={} dbname={} sslmode={}",
                self.host, self.port, self.username, self.password, self.database, self.ssl_mode
            ),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_open_conns == 0 {
            return Err(WardenError::Config("DATABASE_MAX_OPEN_CONNS must be > 0".into()));
        }
        if self.max_idle_conns > self.max_open_conns {
            return Err(WardenError::Config(format!(
                "DATABASE_MAX_IDLE_CONNS ({}) exceeds DATABASE_MAX_OPEN_CONNS ({})",
                self.max_idle_conns, self.max_open_conns
            )));
        }
        if self.connect_timeout.is_zero() {
            return Err(WardenError::Config("DATABASE_CONNECT_TIMEOUT_SECS must be > 0".into()));
        }
        Ok(())
    }
}

impl BrokerConfig {
    /// AMQP URI with credentials and vhost percent-encoded and the heartbeat
    /// as a query parameter. An explicit URL is used verbatim.
    pub fn uri(&self) -> String {
        if let Some(url) = &self.url {
            return url.clone();
        }
        format!(
            "amqp://{}:{}@{}:{}/{}?heartbeat={}",
            urlencoding::encode(&self.username),
            urlencoding::encode(&self.password),
            self.host,
            self.port,
            urlencoding::encode(&self.vhost),
            self.heartbeat.as_secs()
        )
    }

    pub fn validate(&self) -> Result<()> {
        if self.prefetch == 0 {
            return Err(WardenError::Config("RABBITMQ_PREFETCH must be > 0".into()));
        }
        if self.max_retries == 0 {
            return Err(WardenError::Config("RABBITMQ_MAX_RETRIES must be > 0".into()));
        }
        Ok(())
    }
}

fn parse<T, F>(lookup: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| WardenError::Config(format!("Invalid {}: {}", key, e))),
        None => Ok(default),
    }
}

fn secs<F>(lookup: &F, key: &str, default: u64) -> Result<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    parse(lookup, key, default).map(Duration::from_secs)
}

fn flag<F>(lookup: &F, key: &str, default: bool) -> Result<bool>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(WardenError::Config(format!(
            "Invalid {}: expected true or false, got {:?}",
            key, other
        ))),
    }
}
