//! Backward walk over the remote catalog.
//!
//! The remote serves pages newest-first below a moving `before_id` cursor,
//! so a crawl is a descent: fetch a page, persist it whole, advance the
//! cursor to the smallest id seen, repeat. Every derived mode (backfill,
//! update, bounded fetch) is the same walk with different bounds, which
//! keeps an interrupted run resumable from whatever the store already holds.

use std::time::Instant;

use anyhow::Result;

use crate::ratelimit::RateGate;
use crate::remote::CatalogSource;
use crate::store::{epoch_now, Store};

/// Bounds for one walk down the catalog.
#[derive(Debug, Clone, Default)]
pub struct CrawlPlan {
    /// Exclusive upper cursor. None starts from the newest remote item.
    pub before_id: Option<i64>,
    /// The walk stops once a page dips below this id. The crossing page is
    /// still persisted in full before stopping.
    pub after_id: i64,
    /// Stop once at least this many items have been fetched.
    pub max_items: Option<usize>,
}

/// Counters reported after a walk.
#[derive(Debug, Default)]
pub struct CrawlStats {
    pub pages: usize,
    pub items: usize,
    pub newest_seen: Option<i64>,
    pub oldest_seen: Option<i64>,
}

/// Walk the catalog downward per `plan`, persisting each page in a single
/// transaction. Pages arrive at most once per gate interval, measured from
/// the start of each fetch.
pub fn crawl<S: CatalogSource>(
    store: &mut Store,
    source: &S,
    gate: &RateGate,
    plan: &CrawlPlan,
) -> Result<CrawlStats> {
    let mut stats = CrawlStats::default();
    let mut before_id = plan.before_id;

    loop {
        let started = Instant::now();
        let page = source.fetch_page(before_id)?;
        let request_secs = started.elapsed().as_secs_f64();

        let Some(low) = page.iter().map(|item| item.id).min() else {
            println!("Reached the start of the catalog.");
            break;
        };
        let high = page.iter().map(|item| item.id).max().unwrap_or(low);

        let persist_started = Instant::now();
        stats.items += store.save_page(&page, epoch_now())?;
        let persist_secs = persist_started.elapsed().as_secs_f64();
        stats.pages += 1;
        stats.oldest_seen = Some(low);

        match stats.newest_seen {
            None => {
                stats.newest_seen = Some(high);
                println!("Starting from {}", high);
            }
            Some(newest) => {
                let span = (newest - plan.after_id).max(1);
                let walked = (newest - low).min(span);
                println!(
                    "  {:>9}  {:5.1}%  request {:.3}s, persist {:.3}s",
                    low,
                    walked as f64 * 100.0 / span as f64,
                    request_secs,
                    persist_secs
                );
            }
        }

        before_id = Some(low);

        if low < plan.after_id {
            println!("Reached known items at {}.", low);
            break;
        }

        if let Some(budget) = plan.max_items {
            if stats.items >= budget {
                println!("Stopping; fetched {} items ({} target)", stats.items, budget);
                break;
            }
        }

        gate.wait_remaining(started);
    }

    Ok(stats)
}

/// Extend the catalog downward from the oldest item already stored. On an
/// empty store this degrades to a full walk from the newest remote item.
pub fn backfill<S: CatalogSource>(
    store: &mut Store,
    source: &S,
    gate: &RateGate,
) -> Result<CrawlStats> {
    let before_id = store.oldest_known_id()?;
    if let Some(id) = before_id {
        println!("Oldest known item: {}", id);
    }
    crawl(
        store,
        source,
        gate,
        &CrawlPlan {
            before_id,
            ..CrawlPlan::default()
        },
    )
}

/// Fetch everything newer than the newest item already stored.
pub fn update<S: CatalogSource>(
    store: &mut Store,
    source: &S,
    gate: &RateGate,
) -> Result<CrawlStats> {
    update_rewalking(store, source, gate, 0)
}

/// Like [`update`], but also re-walk the newest `overlap` ids so favorite
/// and score counts that drifted since the last pass get refreshed.
pub fn update_rewalking<S: CatalogSource>(
    store: &mut Store,
    source: &S,
    gate: &RateGate,
    overlap: i64,
) -> Result<CrawlStats> {
    let newest = store.newest_known_id()?.unwrap_or(0);
    if newest > 0 {
        println!("Newest known item: {}", newest);
    }
    crawl(
        store,
        source,
        gate,
        &CrawlPlan {
            after_id: (newest - overlap).max(0),
            ..CrawlPlan::default()
        },
    )
}

/// Fetch at least `target` items from the top of the catalog.
pub fn recent<S: CatalogSource>(
    store: &mut Store,
    source: &S,
    gate: &RateGate,
    target: usize,
) -> Result<CrawlStats> {
    println!("Getting newest {} items.", target);
    crawl(
        store,
        source,
        gate,
        &CrawlPlan {
            max_items: Some(target),
            ..CrawlPlan::default()
        },
    )
}
