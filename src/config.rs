//! Configuration module for the scorecard server.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::time::Duration;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the web server (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "scorecard.db")
    pub db_path: String,
    /// JSON file of catalog entities; an empty catalog when unset
    pub catalog_path: Option<String>,
    /// Metric values older than this are deleted (default: 365)
    pub retention_days: i64,
    /// How often the retention pass runs (default: 3600s)
    pub retention_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "scorecard.db".to_string(),
            catalog_path: None,
            retention_days: 365,
            retention_interval: Duration::from_secs(3600),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `SCORECARD_HTTP_PORT`: HTTP port (default: 8080)
    /// - `SCORECARD_DB_PATH`: Database file path (default: "scorecard.db")
    /// - `SCORECARD_CATALOG_PATH`: Catalog entities file (optional)
    /// - `SCORECARD_RETENTION_DAYS`: Retention window in days (default: 365)
    /// - `SCORECARD_RETENTION_INTERVAL_SECS`: Cleanup period (default: 3600)
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();

        if let Some(port) = lookup("SCORECARD_HTTP_PORT").and_then(|v| v.parse().ok()) {
            cfg.http_port = port;
        }

        if let Some(db_path) = lookup("SCORECARD_DB_PATH") {
            cfg.db_path = db_path;
        }

        cfg.catalog_path = lookup("SCORECARD_CATALOG_PATH").filter(|p| !p.is_empty());

        if let Some(days) = lookup("SCORECARD_RETENTION_DAYS").and_then(|v| v.parse().ok()) {
            cfg.retention_days = days;
        }

        if let Some(secs) = lookup("SCORECARD_RETENTION_INTERVAL_SECS").and_then(|v| v.parse().ok()) {
            cfg.retention_interval = Duration::from_secs(secs);
        }

        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.http_port, 8080);
        assert_eq!(cfg.db_path, "scorecard.db");
        assert!(cfg.catalog_path.is_none());
        assert_eq!(cfg.retention_days, 365);
    }

    #[test]
    fn test_overrides_and_bad_values() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("SCORECARD_HTTP_PORT", "9090"),
            ("SCORECARD_DB_PATH", "/tmp/metrics.db"),
            ("SCORECARD_CATALOG_PATH", "catalog.json"),
            ("SCORECARD_RETENTION_DAYS", "thirty"),
            ("SCORECARD_RETENTION_INTERVAL_SECS", "60"),
        ]);
        let cfg = ServerConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(cfg.http_port, 9090);
        assert_eq!(cfg.db_path, "/tmp/metrics.db");
        assert_eq!(cfg.catalog_path.as_deref(), Some("catalog.json"));
        assert_eq!(cfg.retention_days, 365);
        assert_eq!(cfg.retention_interval, Duration::from_secs(60));
    }
}
