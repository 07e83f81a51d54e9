//! Runtime configuration for the crawl/sample/rank pipeline.
//!
//! Every knob has a default that matches the reference deployment; the CLI
//! overrides individual fields. Nothing here is read from disk.

use std::time::Duration;

/// Items requested per catalog page. The remote caps pages at this size.
pub const PAGE_SIZE: usize = 320;

/// Ranked slots in one similarity cache row.
pub const SIMILAR_SLOTS: usize = 10;

/// Sentinel id written into unfilled similarity slots.
pub const SIMILAR_SENTINEL: i64 = 0;

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the remote catalog, without a trailing slash.
    pub base_url: String,
    /// User agent sent with every remote request.
    pub user_agent: String,
    /// Minimum wall-clock interval between page fetches.
    pub page_interval: Duration,
    /// Minimum wall-clock interval between per-item favoriter fetches.
    pub favorites_interval: Duration,
    /// Transport timeout for a single remote request.
    pub http_timeout: Duration,
    /// Cached similarity rows older than this are recomputed.
    pub similar_max_age: Duration,
    /// Path of the SQLite database file.
    pub db_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: "https://catalog.example.net".to_string(),
            user_agent: concat!("favgraph/", env!("CARGO_PKG_VERSION")).to_string(),
            // Page listing is rate limited to 1 Hz; favoriter lookups are
            // cheaper for the remote but get the same floor.
            page_interval: Duration::from_secs(1),
            favorites_interval: Duration::from_secs(1),
            http_timeout: Duration::from_secs(30),
            similar_max_age: Duration::from_secs(24 * 60 * 60),
            db_path: "favgraph.db".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let config = Config::default();
        assert!(config.page_interval >= Duration::from_millis(500));
        assert!(config.user_agent.starts_with("favgraph/"));
        assert_eq!(PAGE_SIZE, 320);
        assert_eq!(SIMILAR_SLOTS, 10);
    }
}
