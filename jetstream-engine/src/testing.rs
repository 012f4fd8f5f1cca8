//! Test doubles for the three external collaborator seams: a
//! [`StreamStore`], a [`RaftNode`], and a config builder with sane
//! defaults. Kept in the crate (behind `#[cfg(test)]`) rather than a
//! `dev-dependencies` crate so every module's unit tests can reach for
//! the same doubles without duplicating them.

use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use jetstream_proto::{headers::HeaderMap, Subject};

use crate::config::{ConfigValidator, StreamConfig};
use crate::name::StreamName;
use crate::raft::{ProposeEntry, RaftError, RaftNode};
use crate::store::{StoreError, StoreState, StoredMessage, StreamStore};

/// A minimal in-memory [`StreamStore`]: a dense `Vec` indexed by sequence
/// number, `None` standing in for a purged/removed/skipped slot.
///
/// Sequences are 1-based, matching the rest of the engine; index 0 of the
/// backing vec is unused padding so `seq` and vec index always agree.
#[derive(Default)]
pub struct MemStore {
    msgs: Vec<Option<StoredMessage>>,
}

impl MemStore {
    #[must_use]
    pub fn new() -> Self {
        Self { msgs: vec![None] }
    }

    fn next_seq(&self) -> u64 {
        (self.msgs.len() as u64).max(1)
    }

    fn push_at(&mut self, seq: u64, msg: Option<StoredMessage>) {
        while (self.msgs.len() as u64) <= seq {
            self.msgs.push(None);
        }
        self.msgs[seq as usize] = msg;
    }

    #[must_use]
    pub fn get(&self, seq: u64) -> Option<&StoredMessage> {
        self.msgs.get(seq as usize).and_then(Option::as_ref)
    }
}

#[async_trait]
impl StreamStore for MemStore {
    async fn store_msg(
        &mut self,
        subject: &Subject,
        headers: &HeaderMap,
        payload: &Bytes,
    ) -> Result<(u64, i64), StoreError> {
        let seq = self.next_seq();
        let ts = seq as i64;
        self.push_at(
            seq,
            Some(StoredMessage {
                seq,
                subject: subject.clone(),
                headers: headers.clone(),
                payload: payload.clone(),
                timestamp_nanos: ts,
            }),
        );
        Ok((seq, ts))
    }

    async fn store_raw_msg(
        &mut self,
        subject: &Subject,
        headers: &HeaderMap,
        payload: &Bytes,
        seq: u64,
        timestamp_nanos: i64,
    ) -> Result<(), StoreError> {
        self.push_at(
            seq,
            Some(StoredMessage {
                seq,
                subject: subject.clone(),
                headers: headers.clone(),
                payload: payload.clone(),
                timestamp_nanos,
            }),
        );
        Ok(())
    }

    async fn skip_msg(&mut self, seq: u64) -> Result<(), StoreError> {
        self.push_at(seq, None);
        Ok(())
    }

    async fn load_last_msg(&self, subject: &Subject) -> Result<Option<StoredMessage>, StoreError> {
        Ok(self
            .msgs
            .iter()
            .rev()
            .find_map(|slot| slot.as_ref().filter(|msg| &msg.subject == subject))
            .cloned())
    }

    async fn count_for_subject(&self, subject: &Subject) -> Result<u64, StoreError> {
        Ok(self
            .msgs
            .iter()
            .flatten()
            .filter(|msg| &msg.subject == subject)
            .count() as u64)
    }

    async fn remove_oldest_for_subject(&mut self, subject: &Subject) -> Result<Option<u64>, StoreError> {
        let seq = self
            .msgs
            .iter()
            .flatten()
            .find(|msg| &msg.subject == subject)
            .map(|msg| msg.seq);
        if let Some(seq) = seq {
            self.msgs[seq as usize] = None;
        }
        Ok(seq)
    }

    async fn first_seq_after(&self, timestamp_nanos: i64) -> Result<Option<u64>, StoreError> {
        Ok(self
            .msgs
            .iter()
            .flatten()
            .find(|msg| msg.timestamp_nanos >= timestamp_nanos)
            .map(|msg| msg.seq))
    }

    async fn load_msg(&self, seq: u64) -> Result<Option<StoredMessage>, StoreError> {
        Ok(self.get(seq).cloned())
    }

    async fn remove_msg(&mut self, seq: u64) -> Result<(), StoreError> {
        match self.msgs.get_mut(seq as usize) {
            Some(slot @ Some(_)) => {
                *slot = None;
                Ok(())
            }
            _ => Err(StoreError::NotFound),
        }
    }

    async fn purge_subject_keep_last(&mut self, subject: &Subject) -> Result<(), StoreError> {
        let last = self
            .msgs
            .iter()
            .rev()
            .find_map(|slot| slot.as_ref().filter(|msg| &msg.subject == subject))
            .map(|msg| msg.seq);
        for slot in &mut self.msgs {
            if let Some(msg) = slot {
                if &msg.subject == subject && Some(msg.seq) != last {
                    *slot = None;
                }
            }
        }
        Ok(())
    }

    async fn purge_all_keep_last(&mut self) -> Result<(), StoreError> {
        let last = self.msgs.iter().rev().find_map(Option::as_ref).map(|msg| msg.seq);
        for slot in &mut self.msgs {
            if let Some(msg) = slot {
                if Some(msg.seq) != last {
                    *slot = None;
                }
            }
        }
        Ok(())
    }

    async fn state(&self) -> StoreState {
        let mut state = StoreState::default();
        for msg in self.msgs.iter().flatten() {
            state.msgs += 1;
            state.bytes += msg.payload.len() as u64;
            if state.first_seq == 0 {
                state.first_seq = msg.seq;
            }
            state.last_seq = msg.seq;
        }
        state
    }
}

/// A single-node [`RaftNode`] that is always leader and commits every
/// proposal the instant it's made (there's no commit stream to feed in
/// this crate's scope, so it's simply a no-op accept)
#[derive(Default)]
pub struct StandaloneRaft;

impl StandaloneRaft {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RaftNode for StandaloneRaft {
    fn is_leader(&self) -> bool {
        true
    }

    async fn propose(&self, _entry: ProposeEntry) -> Result<(), RaftError> {
        Ok(())
    }

    async fn propose_skip_batch(&self, _entries: Vec<ProposeEntry>) -> Result<(), RaftError> {
        Ok(())
    }

    async fn step_down(&self) {}
}

/// A [`RaftNode`] double whose leadership and propose outcomes are
/// scripted by the test, for exercising step-down and rejection paths
pub struct ScriptedRaft {
    inner: Mutex<ScriptedRaftState>,
}

struct ScriptedRaftState {
    is_leader: bool,
    next_propose_result: Result<(), RaftError>,
    proposed: Vec<Bytes>,
}

impl ScriptedRaft {
    #[must_use]
    pub fn new(is_leader: bool) -> Self {
        Self {
            inner: Mutex::new(ScriptedRaftState {
                is_leader,
                next_propose_result: Ok(()),
                proposed: Vec::new(),
            }),
        }
    }

    pub fn set_leader(&self, is_leader: bool) {
        self.inner.lock().unwrap().is_leader = is_leader;
    }

    /// Make the next (and only the next) `propose` call fail with `err`
    pub fn fail_next_propose(&self, err: RaftError) {
        self.inner.lock().unwrap().next_propose_result = Err(err);
    }

    #[must_use]
    pub fn proposed(&self) -> Vec<Bytes> {
        self.inner.lock().unwrap().proposed.clone()
    }
}

#[async_trait]
impl RaftNode for ScriptedRaft {
    fn is_leader(&self) -> bool {
        self.inner.lock().unwrap().is_leader
    }

    async fn propose(&self, entry: ProposeEntry) -> Result<(), RaftError> {
        let mut inner = self.inner.lock().unwrap();
        let result = std::mem::replace(&mut inner.next_propose_result, Ok(()));
        if result.is_ok() {
            inner.proposed.push(entry.payload);
        }
        result
    }

    async fn propose_skip_batch(&self, entries: Vec<ProposeEntry>) -> Result<(), RaftError> {
        let mut inner = self.inner.lock().unwrap();
        let result = std::mem::replace(&mut inner.next_propose_result, Ok(()));
        if result.is_ok() {
            inner.proposed.extend(entries.into_iter().map(|entry| entry.payload));
        }
        result
    }

    async fn step_down(&self) {
        self.inner.lock().unwrap().is_leader = false;
    }
}

/// Builds a normalized [`StreamConfig`] for `name` with every default
/// filled in, for tests that don't care about a specific configuration
#[must_use]
pub fn test_stream_config(name: &str) -> StreamConfig {
    ConfigValidator::normalize(StreamConfig::new(StreamName::from_static(name)), &[])
        .expect("default config always normalizes")
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use claims::assert_matches;
    use jetstream_proto::{headers::HeaderMap, Subject};

    use super::{test_stream_config, MemStore, ScriptedRaft, StandaloneRaft};
    use crate::raft::{ProposeEntry, RaftError, RaftNode};
    use crate::store::StreamStore;

    #[tokio::test]
    async fn mem_store_round_trips_a_message() {
        let mut store = MemStore::new();
        let (seq, _ts) = store
            .store_msg(&Subject::from_static("a"), &HeaderMap::new(), &Bytes::from_static(b"x"))
            .await
            .unwrap();
        assert_eq!(seq, 1);
        let loaded = store.load_msg(seq).await.unwrap().unwrap();
        assert_eq!(loaded.payload, Bytes::from_static(b"x"));
    }

    #[tokio::test]
    async fn mem_store_remove_then_remove_again_is_not_found() {
        let mut store = MemStore::new();
        let (seq, _ts) = store
            .store_msg(&Subject::from_static("a"), &HeaderMap::new(), &Bytes::from_static(b"x"))
            .await
            .unwrap();
        store.remove_msg(seq).await.unwrap();
        assert_matches!(store.remove_msg(seq).await, Err(crate::store::StoreError::NotFound));
    }

    #[tokio::test]
    async fn standalone_raft_is_always_leader_and_accepts() {
        let raft = StandaloneRaft::new();
        assert!(raft.is_leader());
        assert!(raft.propose(ProposeEntry { payload: Bytes::new() }).await.is_ok());
    }

    #[tokio::test]
    async fn scripted_raft_honors_scripted_rejection_then_recovers() {
        let raft = ScriptedRaft::new(true);
        raft.fail_next_propose(RaftError::NotLeader);
        assert_matches!(
            raft.propose(ProposeEntry { payload: Bytes::new() }).await,
            Err(RaftError::NotLeader)
        );
        assert!(raft.propose(ProposeEntry { payload: Bytes::from_static(b"ok") }).await.is_ok());
        assert_eq!(raft.proposed(), vec![Bytes::from_static(b"ok")]);
    }

    #[test]
    fn stream_config_builder_normalizes() {
        let config = test_stream_config("A");
        assert_eq!(config.replicas, 1);
    }
}
