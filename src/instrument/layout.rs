use serde::{Deserialize, Serialize};

/// Size in bytes of one device counter slot.
pub const COUNTER_BYTES: u64 = std::mem::size_of::<u64>() as u64;

/// Shape of the per thread basic block counter array.
///
/// Instrumented device code writes into the same array using [`CounterLayout::index`],
/// so sizing and reduction must both go through this type.
#[derive(Debug, Default, Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterLayout {
    /// Counter entries per basic block.
    pub entries: usize,
    pub basic_blocks: usize,
    pub thread_blocks: usize,
    /// Threads per thread block.
    pub threads: usize,
}

impl CounterLayout {
    /// Total number of counter slots, `None` if it overflows.
    #[must_use]
    pub fn checked_len(&self) -> Option<usize> {
        self.entries
            .checked_mul(self.basic_blocks)?
            .checked_mul(self.thread_blocks)?
            .checked_mul(self.threads)
    }

    /// Total number of counter slots, saturating at `usize::MAX`.
    #[must_use]
    pub fn len(&self) -> usize {
        self.checked_len().unwrap_or(usize::MAX)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size of the counter array in bytes, `None` if it overflows.
    #[must_use]
    pub fn num_bytes(&self) -> Option<u64> {
        u64::try_from(self.checked_len()?)
            .ok()?
            .checked_mul(COUNTER_BYTES)
    }

    /// Flat slot of `entry` of basic block `block` for `thread` of `thread_block`.
    #[must_use]
    #[inline]
    pub fn index(&self, block: usize, entry: usize, thread: usize, thread_block: usize) -> usize {
        debug_assert!(block < self.basic_blocks);
        debug_assert!(entry < self.entries);
        debug_assert!(thread < self.threads);
        debug_assert!(thread_block < self.thread_blocks);
        block * self.entries * self.threads
            + thread_block * self.basic_blocks * self.threads * self.entries
            + thread * self.entries
            + entry
    }
}

impl std::fmt::Display for CounterLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} entries x {} blocks x {} thread blocks x {} threads ({})",
            self.entries,
            self.basic_blocks,
            self.thread_blocks,
            self.threads,
            self.num_bytes()
                .map_or_else(|| "overflow".to_string(), |n| human_bytes::human_bytes(n as f64)),
        )
    }
}
