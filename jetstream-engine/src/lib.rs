//! The per-stream engine: configuration, ingress, replication, source
//! federation, leadership and lifecycle for a single durable,
//! append-only message stream.
//!
//! This crate owns none of its external collaborators (transport,
//! storage backend, consensus engine); it drives them through the
//! [`store::StreamStore`] and [`raft::RaftNode`] interfaces and hands
//! callers a [`lifecycle::StreamHandle`] to drive the rest.

pub mod advisory;
mod atomic;
pub mod config;
pub mod dedupe;
pub mod error;
pub mod ingress;
pub mod internal_loop;
pub mod leader;
pub mod lifecycle;
pub mod name;
pub mod outq;
pub mod raft;
pub mod registry;
pub mod replication;
pub mod source;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use atomic::{RawStreamFlags, StreamFlags};
pub use config::{ConfigValidator, RetentionPolicy, StreamConfig, StreamFeed};
pub use error::{ConfigError, EngineError, ErrorCode};
pub use internal_loop::{InternalLoop, OutboundSink};
pub use lifecycle::{Lifecycle, StreamHandle};
pub use name::StreamName;
