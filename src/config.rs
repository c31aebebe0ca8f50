//! Connection and routing settings for the queue layer.
//!
//! A `QueueConfig` is built once and passed by value into whatever needs
//! it; nothing here is re-read from process-wide state on the hot path.

use serde::{Deserialize, Serialize};

use crate::keys::KeySpace;

/// Immutable queue configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Redis host.
    pub host: String,
    /// Redis port.
    pub port: u16,
    /// Redis logical database.
    pub db: i64,
    /// Optional Redis password.
    pub password: Option<String>,
    /// Key namespace prefix shared by every queue (the "table").
    pub table: String,
    /// Pool every project into one shared physical queue.
    pub unified: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            db: 0,
            password: None,
            table: "default".to_string(),
            unified: false,
        }
    }
}

impl QueueConfig {
    /// Sets the Redis host.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Sets the Redis port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the Redis logical database.
    pub fn with_db(mut self, db: i64) -> Self {
        self.db = db;
        self
    }

    /// Sets the Redis password.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Sets the key namespace prefix.
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    /// Enables or disables the unified shared queue.
    pub fn with_unified(mut self, unified: bool) -> Self {
        self.unified = unified;
        self
    }

    /// Assembles the Redis connection URL.
    pub fn redis_url(&self) -> String {
        match &self.password {
            Some(password) => {
                format!("redis://:{password}@{}:{}/{}", self.host, self.port, self.db)
            }
            None => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }

    /// Key space derived from the table and unified flag.
    pub fn key_space(&self) -> KeySpace {
        KeySpace::new(&self.table, self.unified)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = QueueConfig::default();

        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 6379);
        assert_eq!(config.db, 0);
        assert!(config.password.is_none());
        assert_eq!(config.table, "default");
        assert!(!config.unified);
    }

    #[test]
    fn test_redis_url_without_password() {
        let config = QueueConfig::default();
        assert_eq!(config.redis_url(), "redis://127.0.0.1:6379/0");
    }

    #[test]
    fn test_redis_url_with_password() {
        let config = QueueConfig::default()
            .with_host("cache.internal")
            .with_port(6380)
            .with_db(2)
            .with_password("hunter2");

        assert_eq!(config.redis_url(), "redis://:hunter2@cache.internal:6380/2");
    }

    #[test]
    fn test_key_space_derivation() {
        let config = QueueConfig::default().with_table("crawl").with_unified(true);
        let keys = config.key_space();

        assert_eq!(keys.table(), "crawl");
        assert!(keys.unified());
    }
}
