//! The pluggable storage backend interface
//!
//! The engine owns no on-disk format of its own (explicit Non-goal); it
//! drives whatever backend is plugged in through [`StreamStore`]. A
//! backend implementation (file-based, memory-based, ...) lives outside
//! this crate; [`crate::testing::MemStore`] is the in-memory double used
//! by this crate's own tests.

use async_trait::async_trait;
use bytes::Bytes;
use jetstream_proto::{headers::HeaderMap, Subject};

/// A single stored message as read back from the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub seq: u64,
    pub subject: Subject,
    pub headers: HeaderMap,
    pub payload: Bytes,
    pub timestamp_nanos: i64,
}

/// Aggregate counters a store reports about itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreState {
    pub msgs: u64,
    pub bytes: u64,
    pub first_seq: u64,
    pub last_seq: u64,
}

/// Errors a [`StreamStore`] implementation can surface to the ingress
/// pipeline
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested sequence has no corresponding message (already
    /// purged, or racing with a concurrent removal)
    #[error("sequence not found")]
    NotFound,
    /// The backend has no space left; the engine must self-disable
    #[error("no space left on device")]
    NoSpaceLeft,
    /// Catch-all transient I/O failure, safe for the caller to retry
    #[error("store I/O error: {0}")]
    Io(String),
}

/// The storage backend a stream writes its committed log to
///
/// All mutating calls are made from the stream's single internal-loop
/// task; implementations do not need to synchronize writes against
/// each other, only against concurrent reads.
#[async_trait]
pub trait StreamStore: Send + Sync + 'static {
    /// Append `subject`/`headers`/`payload` at the next sequence,
    /// returning the sequence and timestamp assigned
    async fn store_msg(
        &mut self,
        subject: &Subject,
        headers: &HeaderMap,
        payload: &Bytes,
    ) -> Result<(u64, i64), StoreError>;

    /// Append a message at a pre-assigned `(seq, ts)`, used on the replay
    /// path so every replica lands the same committed sequence
    async fn store_raw_msg(
        &mut self,
        subject: &Subject,
        headers: &HeaderMap,
        payload: &Bytes,
        seq: u64,
        timestamp_nanos: i64,
    ) -> Result<(), StoreError>;

    /// Advance the sequence counter without storing a payload (interest
    /// gate skip, or mirror gap compaction)
    async fn skip_msg(&mut self, seq: u64) -> Result<(), StoreError>;

    /// Load the most recent message stored for `subject`, if any
    async fn load_last_msg(&self, subject: &Subject) -> Result<Option<StoredMessage>, StoreError>;

    /// Count of stored messages on `subject`, used to enforce
    /// `MaxMsgsPerSubject`
    async fn count_for_subject(&self, subject: &Subject) -> Result<u64, StoreError>;

    /// Remove the oldest stored message on `subject`, used to make room
    /// under a `DiscardPolicy::Old` per-subject limit
    async fn remove_oldest_for_subject(&mut self, subject: &Subject) -> Result<Option<u64>, StoreError>;

    /// The lowest stored sequence whose timestamp is `>= timestamp_nanos`,
    /// used by the dedupe lazy-load scan to find where to start
    /// replaying stored headers
    async fn first_seq_after(&self, timestamp_nanos: i64) -> Result<Option<u64>, StoreError>;

    /// Load the message at `seq`
    async fn load_msg(&self, seq: u64) -> Result<Option<StoredMessage>, StoreError>;

    /// Remove the message at `seq` (ack-driven removal for
    /// interest/work-queue retention)
    async fn remove_msg(&mut self, seq: u64) -> Result<(), StoreError>;

    /// Purge every message on `subject` except the last, keeping exactly
    /// one
    async fn purge_subject_keep_last(&mut self, subject: &Subject) -> Result<(), StoreError>;

    /// Purge every message in the stream except the last (rollup-all)
    async fn purge_all_keep_last(&mut self) -> Result<(), StoreError>;

    async fn state(&self) -> StoreState;
}
