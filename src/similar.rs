//! Shared-favoriter similarity with a freshness-gated cache.
//!
//! Two items are related when the same users favorited both. Ranking every
//! candidate is a full scan of the favorites graph, so each result row is
//! cached in the `similar` relation and reused until it ages out.

use std::time::Duration;

use anyhow::Result;

use crate::config::{SIMILAR_SENTINEL, SIMILAR_SLOTS};
use crate::store::{epoch_now, Store};

/// Rank every item sharing a favoriter with `source_id`, keep the top
/// [`SIMILAR_SLOTS`] ids, pad the remainder with the sentinel, and cache
/// the row. A source with no recorded favoriters caches an all-sentinel
/// row, so the negative result is remembered too.
pub fn compute_similar(store: &mut Store, source_id: i64) -> Result<Vec<i64>> {
    let mut ids: Vec<i64> = store
        .shared_favoriter_ranking(source_id)?
        .into_iter()
        .take(SIMILAR_SLOTS)
        .map(|(candidate, _)| candidate)
        .collect();
    ids.resize(SIMILAR_SLOTS, SIMILAR_SENTINEL);
    store.write_similarity(source_id, epoch_now(), &ids)?;
    Ok(ids)
}

/// Cached ranked list for `source_id`, recomputed when the cache row is
/// missing or older than `max_age`.
pub fn get_similar(store: &mut Store, source_id: i64, max_age: Duration) -> Result<Vec<i64>> {
    if let Some((written, ids)) = store.read_similarity(source_id)? {
        if epoch_now() - written <= max_age.as_secs_f64() {
            return Ok(ids);
        }
    }
    compute_similar(store, source_id)
}
