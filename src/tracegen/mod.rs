//! Event based memory trace capture.

pub mod access_log;
pub mod coalesce;
pub mod extent;
pub mod generator;
pub mod index;

pub use access_log::{AccessLogReader, AccessLogWriter};
pub use coalesce::{Coalescer, SegmentCause};
pub use extent::extent;
pub use generator::{MemoryTraceGenerator, Options};
pub use index::TraceIndex;

use std::path::PathBuf;
use std::sync::{atomic, Arc};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] utils::fs::Error),

    #[error("failed to write {path:?}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to read {path:?}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to encode msgpack")]
    MsgpackEncode(#[from] rmp_serde::encode::Error),

    #[error("failed to decode msgpack")]
    MsgpackDecode(#[from] rmp_serde::decode::Error),

    #[error("failed to serialize json")]
    Json(#[from] serde_json::Error),

    #[error("no trace session open")]
    NoSession,
}

/// Monotonically increasing id of trace sessions.
///
/// Clones share the same sequence.
#[derive(Debug, Clone, Default)]
pub struct SessionCounter(Arc<atomic::AtomicU64>);

impl SessionCounter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn starting_at(value: u64) -> Self {
        Self(Arc::new(atomic::AtomicU64::new(value)))
    }

    /// Returns the next id.
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, atomic::Ordering::SeqCst)
    }
}
