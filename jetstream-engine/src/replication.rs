//! Wraps a [`RaftNode`] with the stream-specific propose/commit shape.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use jetstream_proto::{headers::HeaderMap, Subject};
use serde::{Deserialize, Serialize};

use crate::raft::{ProposeEntry, RaftError, RaftNode};

/// The maximum number of skip entries bundled into a single propose call
///
pub const MAX_SKIP_BATCH: usize = 10_000;

/// The payload proposed into the consensus log for a single message
///
/// Encodes everything [`crate::ingress::process`] needs to replay the
/// message deterministically on every replica: the subject, headers,
/// payload and the `(preSeq, ts)` pair the leader pre-assigned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamMsgEntry {
    pub subject: Subject,
    #[serde(with = "header_map_serde")]
    pub headers: HeaderMap,
    pub payload: Bytes,
    pub pre_seq: u64,
    pub timestamp_nanos: i64,
}

/// A proposed removal of an already-stored message, used to forward an
/// ack-driven delete across replicas when the local removal races a
/// concurrent write (`EOF` on concurrent ack/remove)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteEntry {
    pub seq: u64,
}

/// Bridges [`RaftNode`] propose/step-down calls to the stream's own
/// sequencing state
pub struct ReplicationAdapter {
    raft: Arc<dyn RaftNode>,
}

impl ReplicationAdapter {
    #[must_use]
    pub fn new(raft: Arc<dyn RaftNode>) -> Self {
        Self { raft }
    }

    #[must_use]
    pub fn is_leader(&self) -> bool {
        self.raft.is_leader()
    }

    /// Propose a single message at `pre_seq = lseq + clfs`
    pub async fn propose_message(
        &self,
        subject: Subject,
        headers: HeaderMap,
        payload: Bytes,
        pre_seq: u64,
        timestamp_nanos: Option<i64>,
    ) -> Result<(), RaftError> {
        let entry = StreamMsgEntry {
            subject,
            headers,
            payload,
            pre_seq,
            timestamp_nanos: timestamp_nanos.unwrap_or_else(now_nanos),
        };
        let payload = serde_json::to_vec(&entry).unwrap_or_default();
        self.raft
            .propose(ProposeEntry {
                payload: Bytes::from(payload),
            })
            .await
    }

    /// Propose up to [`MAX_SKIP_BATCH`] skip entries at once, used by the
    /// mirror gap-compaction path
    pub async fn propose_skips(&self, seqs: &[u64]) -> Result<(), RaftError> {
        for chunk in seqs.chunks(MAX_SKIP_BATCH) {
            let entries = chunk
                .iter()
                .map(|seq| ProposeEntry {
                    payload: Bytes::from(seq.to_be_bytes().to_vec()),
                })
                .collect();
            self.raft.propose_skip_batch(entries).await?;
        }
        Ok(())
    }

    /// Propose a delete of an already-stored message
    pub async fn propose_delete(&self, seq: u64) -> Result<(), RaftError> {
        let payload = serde_json::to_vec(&DeleteEntry { seq }).unwrap_or_default();
        self.raft
            .propose(ProposeEntry {
                payload: Bytes::from(payload),
            })
            .await
    }

    /// Step down: unsubscribe from user subjects, cancel source
    /// consumers, stop the cluster sync subscription and clear `clfs` are
    /// all the caller's responsibility ([`crate::leader::LeaderController`]);
    /// this only relinquishes the consensus seat itself.
    pub async fn step_down(&self) {
        self.raft.step_down().await;
    }
}

fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as i64
}

mod header_map_serde {
    use jetstream_proto::headers::HeaderMap;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// [`HeaderMap`] doesn't derive `Serialize`/`Deserialize` directly
    /// (its wire representation is the transport's job); for the
    /// consensus log we only need a value round-trip, so we go through
    /// an owned `Vec` of pairs.
    pub fn serialize<S: Serializer>(map: &HeaderMap, serializer: S) -> Result<S::Ok, S::Error> {
        let pairs: Vec<(String, String)> = map
            .entries()
            .map(|(name, value)| (name.as_str().to_owned(), value.as_str().to_owned()))
            .collect();
        pairs.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<HeaderMap, D::Error> {
        use jetstream_proto::headers::{HeaderName, HeaderValue};

        let pairs = Vec::<(String, String)>::deserialize(deserializer)?;
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            let name = HeaderName::try_from(name).map_err(serde::de::Error::custom)?;
            let value = HeaderValue::try_from(value).map_err(serde::de::Error::custom)?;
            map.append(name, value);
        }
        Ok(map)
    }
}
