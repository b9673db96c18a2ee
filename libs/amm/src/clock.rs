//! Sequence and time sources.
//!
//! Commit-reveal delays are measured in sequence (block) numbers supplied by
//! the embedder, never in wall-clock sleeps. TWAP bookkeeping uses seconds
//! from the same source so tests and simulations stay deterministic.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of the current sequence number and wall time.
pub trait ChainClock: Send + Sync {
    fn current_sequence(&self) -> u64;
    fn now_secs(&self) -> u64;
}

/// Fully manual clock for tests and simulations. Both the sequence number and
/// the timestamp only move when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    sequence: AtomicU64,
    now_secs: AtomicU64,
}

impl ManualClock {
    pub fn new(start_secs: u64) -> Self {
        Self {
            sequence: AtomicU64::new(0),
            now_secs: AtomicU64::new(start_secs),
        }
    }

    pub fn advance_sequence(&self, blocks: u64) {
        self.sequence.fetch_add(blocks, Ordering::SeqCst);
    }

    pub fn advance_time(&self, secs: u64) {
        self.now_secs.fetch_add(secs, Ordering::SeqCst);
    }
}

impl ChainClock for ManualClock {
    fn current_sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    fn now_secs(&self) -> u64 {
        self.now_secs.load(Ordering::SeqCst)
    }
}

/// Wall-clock time with a caller-advanced sequence counter, for embedders
/// without an external block source.
#[derive(Debug, Default)]
pub struct SystemClock {
    sequence: AtomicU64,
}

impl SystemClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance to the next sequence number, returning the new value.
    pub fn advance_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl ChainClock for SystemClock {
    fn current_sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    fn now_secs(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}
