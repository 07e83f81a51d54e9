//! Durable persistence for the catalog, the favoriter graph, and the
//! similarity cache.
//!
//! The store owns all persisted state; the crawler, sampler, and similarity
//! engine never touch SQLite outside this module. Every mutation runs inside
//! an explicit transaction (commit on success, rollback on any early exit)
//! and through the retry-backoff executor, because a second process may hold
//! the write lock at any moment.

use std::path::Path;

use anyhow::{ensure, Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Transaction};

use crate::backoff::RetryPolicy;
use crate::config::SIMILAR_SLOTS;
use crate::error::Error;
use crate::remote::RemoteItem;

/// REAL epoch seconds with sub-second precision - the schema's time format.
pub fn epoch_now() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS items (
    id INTEGER PRIMARY KEY,
    status TEXT,
    fav_count INTEGER,
    score INTEGER,
    rating TEXT,
    created_at INTEGER,
    updated REAL,
    md5 TEXT,
    file_url TEXT,
    sample_available INTEGER,
    preview_available INTEGER,
    UNIQUE(id)
);

CREATE TABLE IF NOT EXISTS item_tags (
    item_id INTEGER,
    tag_name TEXT,
    UNIQUE(item_id, tag_name)
);

CREATE TABLE IF NOT EXISTS item_favorites (
    item_id INTEGER,
    favorited_user TEXT,
    UNIQUE(item_id, favorited_user)
);

CREATE TABLE IF NOT EXISTS favorites_meta (
    item_id INTEGER,
    updated REAL,
    UNIQUE(item_id)
);

-- Reserved for a tag-metadata sync; nothing in this crate populates it.
CREATE TABLE IF NOT EXISTS tags (
    id INTEGER PRIMARY KEY,
    name TEXT,
    count INTEGER,
    type INTEGER
);

CREATE TABLE IF NOT EXISTS similar (
    source_id INTEGER PRIMARY KEY,
    updated REAL,
    top_1 INTEGER, top_2 INTEGER, top_3 INTEGER, top_4 INTEGER, top_5 INTEGER,
    top_6 INTEGER, top_7 INTEGER, top_8 INTEGER, top_9 INTEGER, top_10 INTEGER
);
"#;

/// SQLite-backed store for items, tags, favoriter edges, sampling markers,
/// and cached similarity rows.
pub struct Store {
    conn: Connection,
    retry: RetryPolicy,
}

impl Store {
    /// Open or create the database file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open catalog database")?;
        Ok(Self {
            conn,
            retry: RetryPolicy::default(),
        })
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to create in-memory database")?;
        Ok(Self {
            conn,
            retry: RetryPolicy::default(),
        })
    }

    /// Replace the retry policy (tests shrink the backoff scale to zero).
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Create all relations if absent. Returns true when the schema was
    /// newly created, false when it already existed.
    pub fn initialize_schema(&mut self) -> Result<bool> {
        let existed = self.table_exists("items")?;
        let retry = self.retry;
        retry.run(|| self.conn.execute_batch(SCHEMA))?;
        Ok(!existed)
    }

    fn table_exists(&self, name: &str) -> Result<bool> {
        let found: Option<String> = self
            .conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Insert or replace one item row plus its tag pairings, in one
    /// transaction. Re-ingesting an id overwrites every non-identity field
    /// and advances `updated`.
    pub fn upsert_item(&mut self, item: &RemoteItem, updated_at: f64) -> Result<()> {
        let retry = self.retry;
        retry.run(|| {
            let tx = self.conn.transaction()?;
            put_item(&tx, item, updated_at)?;
            tx.commit()
        })
    }

    /// Persist a whole crawled page in one transaction - the crawler's
    /// throughput path. Either every item of the page lands or none does.
    pub fn save_page(&mut self, items: &[RemoteItem], updated_at: f64) -> Result<usize> {
        let retry = self.retry;
        retry.run(|| {
            let tx = self.conn.transaction()?;
            for item in items {
                put_item(&tx, item, updated_at)?;
            }
            tx.commit()?;
            Ok(items.len())
        })
    }

    /// Insert tag pairings for an item, ignoring duplicates. Tags are
    /// append-only by policy: a re-save never removes pairs that have
    /// disappeared from the remote tag string.
    pub fn add_tags(&mut self, item_id: i64, tag_string: &str) -> Result<()> {
        let retry = self.retry;
        retry.run(|| {
            let tx = self.conn.transaction()?;
            put_tags(&tx, item_id, tag_string)?;
            tx.commit()
        })
    }

    /// Record the favoriter set for an item and mark it sampled, in one
    /// transaction. Edge inserts ignore duplicates; the marker keeps its
    /// original timestamp if it already exists.
    pub fn add_favoriters(&mut self, item_id: i64, users: &[String]) -> Result<()> {
        let now = epoch_now();
        let retry = self.retry;
        retry.run(|| {
            let tx = self.conn.transaction()?;
            {
                let mut edge = tx.prepare(
                    "INSERT OR IGNORE INTO item_favorites (item_id, favorited_user)
                     VALUES (?1, ?2)",
                )?;
                for user in users {
                    edge.execute(params![item_id, user])?;
                }
            }
            tx.execute(
                "INSERT OR IGNORE INTO favorites_meta (item_id, updated) VALUES (?1, ?2)",
                params![item_id, now],
            )?;
            tx.commit()
        })
    }

    /// Smallest known item id, None when the catalog is empty.
    pub fn oldest_known_id(&self) -> Result<Option<i64>> {
        let id = self
            .conn
            .query_row("SELECT MIN(id) FROM items", [], |row| row.get(0))?;
        Ok(id)
    }

    /// Largest known item id, None when the catalog is empty.
    pub fn newest_known_id(&self) -> Result<Option<i64>> {
        let id = self
            .conn
            .query_row("SELECT MAX(id) FROM items", [], |row| row.get(0))?;
        Ok(id)
    }

    /// The favorite sampler's work queue: ids with a nonzero favorite count
    /// and no sampling marker. An existing marker excludes the item even if
    /// its favorite count has changed since sampling.
    pub fn items_missing_favoriters(&self) -> Result<Vec<i64>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT id FROM items
             WHERE fav_count > 0
               AND id NOT IN (SELECT DISTINCT item_id FROM favorites_meta)",
        )?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(ids)
    }

    /// Whether the item's favoriter set has been fully sampled.
    pub fn has_favorites_recorded(&self, item_id: i64) -> Result<bool> {
        let retry = self.retry;
        let found: Option<i64> = retry.run(|| {
            self.conn
                .query_row(
                    "SELECT item_id FROM favorites_meta WHERE item_id = ?1",
                    [item_id],
                    |row| row.get(0),
                )
                .optional()
        })?;
        Ok(found.is_some())
    }

    /// For every other item sharing at least one favoriter with the source:
    /// `(candidate_id, shared_count)`, highest count first, ties broken by
    /// ascending id so identical data always ranks identically.
    pub fn shared_favoriter_ranking(&self, source_id: i64) -> Result<Vec<(i64, i64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT item_id, COUNT(item_id) AS shared
             FROM item_favorites
             WHERE favorited_user IN
                   (SELECT favorited_user FROM item_favorites WHERE item_id = ?1)
               AND item_id != ?1
             GROUP BY item_id
             ORDER BY shared DESC, item_id ASC",
        )?;
        let pairs = stmt
            .query_map([source_id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<(i64, i64)>>>()?;
        Ok(pairs)
    }

    /// Replace the cache row for `source_id` with a full ranked list.
    /// `ranked` must hold exactly [`SIMILAR_SLOTS`] ids (sentinel-padded).
    pub fn write_similarity(&mut self, source_id: i64, timestamp: f64, ranked: &[i64]) -> Result<()> {
        ensure!(
            ranked.len() == SIMILAR_SLOTS,
            "similarity row needs exactly {} ids, got {}",
            SIMILAR_SLOTS,
            ranked.len()
        );
        let retry = self.retry;
        retry.run(|| {
            self.conn.execute(
                "INSERT OR REPLACE INTO similar VALUES
                 (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    source_id, timestamp, ranked[0], ranked[1], ranked[2], ranked[3], ranked[4],
                    ranked[5], ranked[6], ranked[7], ranked[8], ranked[9]
                ],
            )?;
            Ok(())
        })
    }

    /// Cached ranked list and its write timestamp, if one exists.
    pub fn read_similarity(&self, source_id: i64) -> Result<Option<(f64, Vec<i64>)>> {
        let row = self
            .conn
            .query_row(
                "SELECT updated, top_1, top_2, top_3, top_4, top_5,
                        top_6, top_7, top_8, top_9, top_10
                 FROM similar WHERE source_id = ?1",
                [source_id],
                |row| {
                    let updated: f64 = row.get(0)?;
                    let mut ids = Vec::with_capacity(SIMILAR_SLOTS);
                    for slot in 0..SIMILAR_SLOTS {
                        ids.push(row.get(slot + 1)?);
                    }
                    Ok((updated, ids))
                },
            )
            .optional()?;
        Ok(row)
    }

    /// Primary content URL for each id, in input order. An id with no item
    /// row fails with [`Error::NotFound`] - data absence, never retried.
    pub fn get_content_urls(&self, ids: &[i64]) -> Result<Vec<String>> {
        let retry = self.retry;
        let mut urls = Vec::with_capacity(ids.len());
        for &id in ids {
            let url: Option<String> = retry.run(|| {
                self.conn
                    .query_row("SELECT file_url FROM items WHERE id = ?1", [id], |row| {
                        row.get(0)
                    })
                    .optional()
            })?;
            urls.push(url.ok_or(Error::NotFound(id))?);
        }
        Ok(urls)
    }
}

/// Item row + tag pairings inside an open transaction.
fn put_item(tx: &Transaction, item: &RemoteItem, updated_at: f64) -> rusqlite::Result<()> {
    tx.execute(
        "INSERT OR REPLACE INTO items VALUES
         (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            item.id,
            item.status,
            item.fav_count,
            item.score,
            item.rating,
            item.created_at.s,
            updated_at,
            item.md5,
            item.file_url,
            item.has_sample() as i64,
            item.has_preview() as i64,
        ],
    )?;
    put_tags(tx, item.id, &item.tags)
}

fn put_tags(tx: &Transaction, item_id: i64, tag_string: &str) -> rusqlite::Result<()> {
    let mut stmt = tx.prepare_cached(
        "INSERT OR IGNORE INTO item_tags (item_id, tag_name) VALUES (?1, ?2)",
    )?;
    for tag in tag_string.split_whitespace() {
        stmt.execute(params![item_id, tag])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> Store {
        let mut store = Store::open_in_memory()
            .unwrap()
            .with_retry(RetryPolicy::default().with_scale(0.0));
        store.initialize_schema().unwrap();
        store
    }

    fn item(id: i64, fav_count: i64, tags: &str, file_url: &str) -> RemoteItem {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "status": "active",
            "fav_count": fav_count,
            "score": 3,
            "rating": "s",
            "created_at": {"s": 1_400_000_000},
            "md5": "d41d8cd98f00b204e9800998ecf8427e",
            "file_url": file_url,
            "tags": tags,
        }))
        .unwrap()
    }

    #[test]
    fn test_schema_init_is_idempotent() {
        let mut store = Store::open_in_memory().unwrap();
        assert!(store.initialize_schema().unwrap());
        assert!(!store.initialize_schema().unwrap());
    }

    #[test]
    fn test_reingest_overwrites_with_last_payload() {
        let mut store = test_store();
        store
            .upsert_item(&item(100, 5, "canine", "https://cdn/a.png"), 1000.0)
            .unwrap();
        store
            .upsert_item(&item(100, 9, "canine forest", "https://cdn/b.png"), 2000.0)
            .unwrap();

        let (count, fav_count, updated): (i64, i64, f64) = store
            .conn
            .query_row(
                "SELECT COUNT(*), MAX(fav_count), MAX(updated) FROM items WHERE id = 100",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(fav_count, 9);
        assert_eq!(updated, 2000.0);

        let urls = store.get_content_urls(&[100]).unwrap();
        assert_eq!(urls, vec!["https://cdn/b.png"]);
    }

    #[test]
    fn test_tags_accumulate_append_only() {
        let mut store = test_store();
        store
            .upsert_item(&item(7, 1, "canine forest", "u"), 1.0)
            .unwrap();
        // Re-save with a shrunken tag string: old pairs must survive.
        store.upsert_item(&item(7, 1, "canine", "u"), 2.0).unwrap();

        let count: i64 = store
            .conn
            .query_row("SELECT COUNT(*) FROM item_tags WHERE item_id = 7", [], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_add_tags_ignores_duplicate_pairs() {
        let mut store = test_store();
        store.add_tags(3, "canine forest").unwrap();
        store.add_tags(3, "forest river").unwrap();

        let count: i64 = store
            .conn
            .query_row("SELECT COUNT(*) FROM item_tags WHERE item_id = 3", [], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(count, 3);
    }

    #[test]
    fn test_uncommitted_page_leaves_no_partial_rows() {
        let mut store = test_store();
        {
            let tx = store.conn.transaction().unwrap();
            put_item(&tx, &item(1, 0, "canine", "u"), 1.0).unwrap();
            put_item(&tx, &item(2, 0, "forest", "u"), 1.0).unwrap();
            // Dropped without commit: the whole page rolls back.
        }
        assert_eq!(store.oldest_known_id().unwrap(), None);

        let tags: i64 = store
            .conn
            .query_row("SELECT COUNT(*) FROM item_tags", [], |r| r.get(0))
            .unwrap();
        assert_eq!(tags, 0);
    }

    #[test]
    fn test_add_favoriters_writes_edges_and_marker_together() {
        let mut store = test_store();
        store.upsert_item(&item(10, 2, "", "u"), 1.0).unwrap();
        store
            .add_favoriters(10, &["ann".to_string(), "ben".to_string()])
            .unwrap();

        let edges: i64 = store
            .conn
            .query_row(
                "SELECT COUNT(*) FROM item_favorites WHERE item_id = 10",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(edges, 2);
        assert!(store.has_favorites_recorded(10).unwrap());
    }

    #[test]
    fn test_marker_timestamp_not_overwritten() {
        let mut store = test_store();
        store.upsert_item(&item(11, 1, "", "u"), 1.0).unwrap();
        store.add_favoriters(11, &["ann".to_string()]).unwrap();
        let first: f64 = store
            .conn
            .query_row(
                "SELECT updated FROM favorites_meta WHERE item_id = 11",
                [],
                |r| r.get(0),
            )
            .unwrap();

        store.add_favoriters(11, &["cleo".to_string()]).unwrap();
        let second: f64 = store
            .conn
            .query_row(
                "SELECT updated FROM favorites_meta WHERE item_id = 11",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_id_bounds_on_empty_catalog() {
        let store = test_store();
        assert_eq!(store.oldest_known_id().unwrap(), None);
        assert_eq!(store.newest_known_id().unwrap(), None);
    }

    #[test]
    fn test_id_bounds_track_min_and_max() {
        let mut store = test_store();
        for id in [300, 100, 200] {
            store.upsert_item(&item(id, 0, "", "u"), 1.0).unwrap();
        }
        assert_eq!(store.oldest_known_id().unwrap(), Some(100));
        assert_eq!(store.newest_known_id().unwrap(), Some(300));
    }

    #[test]
    fn test_marker_excludes_item_from_work_queue() {
        let mut store = test_store();
        store.upsert_item(&item(1, 4, "", "u"), 1.0).unwrap();
        store.upsert_item(&item(2, 4, "", "u"), 1.0).unwrap();
        store.upsert_item(&item(3, 0, "", "u"), 1.0).unwrap(); // no favorites

        store.add_favoriters(1, &["ann".to_string()]).unwrap();
        assert_eq!(store.items_missing_favoriters().unwrap(), vec![2]);

        // The count changing later does not re-queue a marked item.
        store.upsert_item(&item(1, 40, "", "u"), 2.0).unwrap();
        assert_eq!(store.items_missing_favoriters().unwrap(), vec![2]);
    }

    #[test]
    fn test_shared_favoriter_ranking_counts_overlap() {
        let mut store = test_store();
        for id in [100, 200, 300] {
            store.upsert_item(&item(id, 2, "", "u"), 1.0).unwrap();
        }
        store
            .add_favoriters(100, &["u1".to_string(), "u2".to_string()])
            .unwrap();
        store
            .add_favoriters(200, &["u1".to_string(), "u3".to_string()])
            .unwrap();
        store
            .add_favoriters(300, &["u1".to_string(), "u2".to_string()])
            .unwrap();

        let ranking = store.shared_favoriter_ranking(100).unwrap();
        // 300 shares u1+u2, 200 shares u1; the source itself is excluded.
        assert_eq!(ranking, vec![(300, 2), (200, 1)]);
    }

    #[test]
    fn test_ranking_ties_break_by_ascending_id() {
        let mut store = test_store();
        for id in [50, 40, 60] {
            store.upsert_item(&item(id, 1, "", "u"), 1.0).unwrap();
        }
        store.add_favoriters(50, &["u1".to_string()]).unwrap();
        store.add_favoriters(40, &["u1".to_string()]).unwrap();
        store.add_favoriters(60, &["u1".to_string()]).unwrap();

        let ranking = store.shared_favoriter_ranking(50).unwrap();
        assert_eq!(ranking, vec![(40, 1), (60, 1)]);
    }

    #[test]
    fn test_similarity_row_requires_exactly_ten_ids() {
        let mut store = test_store();
        let err = store.write_similarity(1, 5.0, &[1, 2, 3]).unwrap_err();
        assert!(err.to_string().contains("exactly 10"));
    }

    #[test]
    fn test_similarity_row_roundtrip_and_overwrite() {
        let mut store = test_store();
        let first = [9, 8, 7, 6, 5, 4, 3, 2, 1, 0];
        store.write_similarity(42, 100.0, &first).unwrap();

        let second = [10, 20, 0, 0, 0, 0, 0, 0, 0, 0];
        store.write_similarity(42, 200.0, &second).unwrap();

        let (updated, ids) = store.read_similarity(42).unwrap().unwrap();
        assert_eq!(updated, 200.0);
        assert_eq!(ids, second.to_vec());

        assert!(store.read_similarity(999).unwrap().is_none());
    }

    #[test]
    fn test_content_urls_preserve_input_order() {
        let mut store = test_store();
        store.upsert_item(&item(1, 0, "", "https://cdn/1"), 1.0).unwrap();
        store.upsert_item(&item(2, 0, "", "https://cdn/2"), 1.0).unwrap();

        let urls = store.get_content_urls(&[2, 1]).unwrap();
        assert_eq!(urls, vec!["https://cdn/2", "https://cdn/1"]);
    }

    #[test]
    fn test_unknown_id_fails_with_not_found() {
        let store = test_store();
        let err = store.get_content_urls(&[9_999_999]).unwrap_err();
        match err.downcast_ref::<Error>() {
            Some(Error::NotFound(id)) => assert_eq!(*id, 9_999_999),
            other => panic!("expected NotFound, got {:?}", other),
        }
    }
}
