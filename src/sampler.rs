//! Favoriter sampling over the crawled catalog.
//!
//! Each item's favoriter set costs one remote request, so the full set is
//! sampled one item at a time. The work queue is shuffled before the pass:
//! an interrupted run then leaves a uniform sample behind rather than a
//! prefix of the id space, and a second sampler pointed at the same store
//! spreads over the queue instead of colliding at its head.

use std::time::Instant;

use anyhow::Result;

use crate::ratelimit::RateGate;
use crate::remote::CatalogSource;
use crate::store::Store;

/// Counters reported after a sampling pass.
#[derive(Debug, Default)]
pub struct SampleStats {
    pub sampled: usize,
    pub edges: usize,
}

/// Fetch and record the favoriter set for every item that has favorites but
/// no sampling marker yet. Each item commits on its own (edges plus marker
/// in one transaction), so an interrupted pass resumes with exactly the
/// unmarked remainder. Requests are paced by `gate`, measured from the
/// start of each fetch.
pub fn sample_favorites<S: CatalogSource>(
    store: &mut Store,
    source: &S,
    gate: &RateGate,
) -> Result<SampleStats> {
    println!("Reading known items...");
    let mut queue = store.items_missing_favoriters()?;

    println!("Shuffling {} items...", queue.len());
    fastrand::shuffle(&mut queue);

    let mut stats = SampleStats::default();
    for item_id in queue {
        let started = Instant::now();
        let users = source.fetch_favoriters(item_id)?;
        store.add_favoriters(item_id, &users)?;
        stats.sampled += 1;
        stats.edges += users.len();
        println!(
            "Got favorites for {} in {:.2} seconds",
            item_id,
            started.elapsed().as_secs_f64()
        );
        gate.wait_remaining(started);
    }

    println!("All favorites sampled.");
    Ok(stats)
}
