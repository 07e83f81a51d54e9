//! Remote catalog access.
//!
//! The catalog serves two endpoints: a descending-id page listing and a
//! per-item favoriter list. Both are listed here behind [`CatalogSource`] so
//! the crawler and sampler run against a scripted source in tests.
//!
//! Transport-level trouble (designated 5xx-class statuses, connect and
//! timeout errors) is retried here with exponential backoff; that retry is
//! the transport's own and is unrelated to the storage retry executor.

use std::thread::sleep;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::config::{Config, PAGE_SIZE};
use crate::error::Error;

/// Statuses the remote emits when it is momentarily unhealthy. Anything
/// else (403, 404, ...) is a data or client error and fails immediately.
const TRANSIENT_STATUSES: &[u16] = &[421, 500, 502, 520, 522, 524, 525];

/// Total request attempts per fetch before giving up.
const MAX_HTTP_ATTEMPTS: u32 = 10;

/// Backoff cap between attempts.
const MAX_HTTP_BACKOFF: Duration = Duration::from_secs(60);

/// One item as served by the catalog listing.
///
/// Only `id` is required; the remote omits fields freely and every optional
/// one degrades to zero/empty instead of failing the page.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteItem {
    pub id: i64,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub fav_count: i64,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub rating: String,
    #[serde(default)]
    pub created_at: CreatedAt,
    #[serde(default)]
    pub md5: String,
    #[serde(default)]
    pub file_url: String,
    #[serde(default)]
    pub sample_url: Option<String>,
    #[serde(default)]
    pub preview_url: Option<String>,
    /// Space-separated tag names.
    #[serde(default)]
    pub tags: String,
}

/// Creation time as the feed encodes it: epoch seconds under `s`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreatedAt {
    #[serde(default)]
    pub s: i64,
}

impl RemoteItem {
    /// A downscaled sample rendition exists only when the remote reports a
    /// sample URL distinct from the primary content URL.
    pub fn has_sample(&self) -> bool {
        self.sample_url
            .as_deref()
            .map_or(false, |url| url != self.file_url)
    }

    pub fn has_preview(&self) -> bool {
        self.preview_url
            .as_deref()
            .map_or(false, |url| url != self.file_url)
    }
}

/// Favoriter listing payload: one comma-joined string of user names.
#[derive(Debug, Deserialize)]
struct FavoritersResponse {
    #[serde(default)]
    favorited_users: String,
}

/// Split the comma-joined favoriter list, dropping empty entries (an item
/// with no favoriters comes back as an empty string).
pub fn parse_favoriters(joined: &str) -> Vec<String> {
    joined
        .split(',')
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

/// Read access to the remote catalog.
pub trait CatalogSource {
    /// One page of items with id < `before_id`, descending, at most
    /// [`PAGE_SIZE`] entries. `None` starts from the newest item.
    fn fetch_page(&self, before_id: Option<i64>) -> Result<Vec<RemoteItem>>;

    /// Every user who favorited the item.
    fn fetch_favoriters(&self, item_id: i64) -> Result<Vec<String>>;
}

/// Blocking HTTP implementation of [`CatalogSource`].
pub struct HttpCatalog {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl HttpCatalog {
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.http_timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// GET with bounded retry on transient statuses and transport errors.
    /// Backoff doubles per attempt with multiplicative jitter so stacked
    /// crawlers do not re-collide on the same beat.
    fn get_with_retry(&self, url: &str, query: &[(&str, String)]) -> Result<String> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let outcome = self.client.get(url).query(query).send();

            match outcome {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response
                            .text()
                            .with_context(|| format!("Failed to read body from {}", url));
                    }
                    if !TRANSIENT_STATUSES.contains(&status.as_u16())
                        || attempt >= MAX_HTTP_ATTEMPTS
                    {
                        return Err(Error::Remote {
                            status: status.as_u16(),
                            url: url.to_string(),
                        }
                        .into());
                    }
                }
                Err(err) => {
                    if attempt >= MAX_HTTP_ATTEMPTS {
                        return Err(Error::Transport {
                            url: url.to_string(),
                            source: err,
                        }
                        .into());
                    }
                }
            }

            sleep(backoff_delay(attempt));
        }
    }
}

/// Sleep before the attempt after `attempt` failures: `2^(attempt-1)` seconds
/// with jitter in [0.75, 1.25), capped.
fn backoff_delay(attempt: u32) -> Duration {
    let base = Duration::from_secs(1 << (attempt - 1).min(6));
    let jitter = fastrand::f64() * 0.5 + 0.75;
    base.mul_f64(jitter).min(MAX_HTTP_BACKOFF)
}

impl CatalogSource for HttpCatalog {
    fn fetch_page(&self, before_id: Option<i64>) -> Result<Vec<RemoteItem>> {
        let url = format!("{}/post/index.json", self.base_url);
        let mut query = vec![("limit", PAGE_SIZE.to_string())];
        if let Some(before) = before_id {
            query.push(("before_id", before.to_string()));
        }

        let body = self.get_with_retry(&url, &query)?;
        let items: Vec<RemoteItem> = serde_json::from_str(&body)
            .map_err(|err| Error::Malformed(format!("page listing: {}", err)))?;
        Ok(items)
    }

    fn fetch_favoriters(&self, item_id: i64) -> Result<Vec<String>> {
        let url = format!("{}/favorite/list_users.json", self.base_url);
        let query = [("id", item_id.to_string())];

        let body = self.get_with_retry(&url, &query)?;
        let payload: FavoritersResponse = serde_json::from_str(&body)
            .map_err(|err| Error::Malformed(format!("favoriter listing: {}", err)))?;
        Ok(parse_favoriters(&payload.favorited_users))
    }
}
