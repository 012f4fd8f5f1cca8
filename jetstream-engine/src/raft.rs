//! The consensus engine interface
//!
//! The stream never implements Raft (or any other consensus algorithm)
//! itself (explicit Non-goal); it drives a group through [`RaftNode`],
//! which is expected to be backed by a real implementation living
//! outside this crate. [`crate::testing::StandaloneRaft`] and
//! [`crate::testing::ScriptedRaft`] are the test doubles used by this
//! crate's own tests.

use async_trait::async_trait;
use bytes::Bytes;

/// A single replicated log entry
///
/// Opaque to the consensus layer; the stream is responsible for encoding
/// and decoding its own payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposeEntry {
    pub payload: Bytes,
}

/// A commit handed back by the consensus layer, in log order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitEntry {
    pub payload: Bytes,
    pub index: u64,
}

/// A leadership change observed by the stream's replication adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeadershipEvent {
    BecameLeader,
    SteppedDown,
}

/// Errors a [`RaftNode`] can report back from a propose call
#[derive(Debug, thiserror::Error)]
pub enum RaftError {
    #[error("not the current leader")]
    NotLeader,
    #[error("proposal queue is full")]
    QueueFull,
    #[error("consensus group is shutting down")]
    ShuttingDown,
}

/// The consensus group a replicated stream proposes into and commits from
#[async_trait]
pub trait RaftNode: Send + Sync + 'static {
    fn is_leader(&self) -> bool;

    /// Propose a single entry; accepted entries eventually surface via the
    /// node's commit stream in the same order they were proposed
    async fn propose(&self, entry: ProposeEntry) -> Result<(), RaftError>;

    /// Propose a batch of "skip" entries (mirror gap compaction), bounded
    /// to 10,000 entries
    async fn propose_skip_batch(&self, entries: Vec<ProposeEntry>) -> Result<(), RaftError>;

    /// Voluntarily relinquish leadership, e.g. after a resource fault
    async fn step_down(&self);
}
