//! Failure taxonomy for the pipeline.
//!
//! Only failures that drive control flow get a variant here: the retry
//! executor must recognize storage contention, callers must tell data
//! absence apart from transport trouble, and malformed remote payloads must
//! fail the page instead of being retried. Everything else travels as
//! `anyhow::Error` context on top of these.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Storage reported busy/locked and the retry budget is exhausted.
    /// Fatal to the current operation; the data itself is intact.
    #[error("storage still contended after {attempts} attempts")]
    Contention {
        attempts: u32,
        #[source]
        source: rusqlite::Error,
    },

    /// The remote kept answering with a transient status until the
    /// transport retry budget ran out.
    #[error("remote unavailable: HTTP {status} from {url}")]
    Remote { status: u16, url: String },

    /// Network-level failure (connect, timeout, TLS) that outlived the
    /// transport retry budget.
    #[error("transport failure for {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// No stored record for the requested id. Never retried.
    #[error("no stored item with id {0}")]
    NotFound(i64),

    /// Remote payload unusable: missing identity field or undecodable body.
    /// Optional fields degrade to defaults instead of landing here.
    #[error("malformed remote payload: {0}")]
    Malformed(String),
}

impl Error {
    /// True for the storage-contention class (the only class the
    /// retry-backoff executor is allowed to swallow).
    pub fn is_contention(&self) -> bool {
        matches!(self, Error::Contention { .. })
    }
}

/// Whether a raw SQLite error is the transient busy/locked class.
///
/// Schema violations, constraint failures, and missing rows are programming
/// or data errors and must propagate on the first occurrence.
pub fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked)
    )
}
