//! Create/update/stop/delete/restore and [`StreamHandle`], the
//! cheap `Clone`able front door a transport layer holds onto.
//!
//! Mirrors the shape of the corpus's own connection handle: an `Arc`'d
//! inner carrying `mpsc::Sender`s into the owning task plus an
//! [`ArcSwap`] snapshot callers can read without blocking that task.

use std::path::{Component, Path};
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::Utc;
use tokio::sync::mpsc;

use crate::advisory::{AdvisoryAction, AdvisoryEmitter};
use crate::config::{ConfigValidator, StreamConfig, StreamFeed, StreamSource};
use crate::dedupe::Dedupe;
use crate::error::{ConfigError, EngineError, ErrorCode};
use crate::ingress::{IngressRequest, RuntimeState};
use crate::internal_loop::{AckRequest, InternalLoop, OutboundSink};
use crate::leader::{self, LeadershipTransition};
use crate::name::StreamName;
use crate::outq::{self, OutQSender};
use crate::raft::RaftNode;
use crate::registry::ConsumerRegistry;
use crate::replication::ReplicationAdapter;
use crate::store::StreamStore;

const CHANNEL_CAPACITY: usize = 256;

/// The `[FileStoreMinBlkSize, FileStoreMaxBlkSize]` clamp a real file-store
/// backend enforces on the block size this crate only ever *suggests*
///
const MIN_BLOCK_SIZE: u64 = 4 * 1024;
const MAX_BLOCK_SIZE: u64 = 16 * 1024 * 1024;

/// A cheap, `Clone`able handle to a running stream's internal loop
///
/// The transport layer (out of scope) is the expected owner: it publishes
/// through [`StreamHandle::publish`], acks through
/// [`StreamHandle::ack`], and reads [`StreamHandle::config`] without ever
/// touching the single-writer state directly.
#[derive(Clone)]
pub struct StreamHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    name: StreamName,
    config: ArcSwap<StreamConfig>,
    msgs: mpsc::Sender<IngressRequest>,
    ack: mpsc::Sender<AckRequest>,
    quit: mpsc::Sender<()>,
}

/// The handle's owning internal loop has already shut down
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
#[error("stream closed")]
pub struct HandleClosedError;

impl StreamHandle {
    #[must_use]
    pub fn name(&self) -> &StreamName {
        &self.inner.name
    }

    /// A non-blocking snapshot of the current configuration
    #[must_use]
    pub fn config(&self) -> Arc<StreamConfig> {
        self.inner.config.load_full()
    }

    /// Enqueue a publish onto `msgs` for the internal loop to dispatch
    ///
    /// # Errors
    ///
    /// Returns [`HandleClosedError`] if the stream has already stopped.
    pub async fn publish(&self, request: IngressRequest) -> Result<(), HandleClosedError> {
        self.inner
            .msgs
            .send(request)
            .await
            .map_err(|_| HandleClosedError)
    }

    /// Enqueue a consumer ack onto the ack-driven retention hook
    ///
    /// # Errors
    ///
    /// Returns [`HandleClosedError`] if the stream has already stopped.
    pub async fn ack(&self, request: AckRequest) -> Result<(), HandleClosedError> {
        self.inner.ack.send(request).await.map_err(|_| HandleClosedError)
    }

    /// Stop the stream: closes the internal loop's `quit` channel, which
    /// is the sole termination signal [`InternalLoop::run`] recognizes
    pub fn stop(&self) {
        // Dropping every clone of `quit` is what actually closes the
        // channel; a stream-wide stop only has one handle's worth of
        // sender to drop from here, so send a courtesy tick for loops
        // that are mid-select and not yet parked on a closed-channel poll.
        let _ = self.inner.quit.try_send(());
    }

    /// Delete the stream: equivalent to [`StreamHandle::stop`] from this
    /// crate's perspective (closing the backing store's files is the
    /// caller's responsibility, Non-goals)
    pub fn delete(self) {
        self.stop();
    }
}

/// Everything [`Lifecycle::create`] hands back: the caller-facing handle,
/// plus the not-yet-spawned internal loop the caller must run
pub struct CreateOutcome<Sink: OutboundSink> {
    pub handle: StreamHandle,
    pub internal_loop: InternalLoop<Sink>,
    pub transition: LeadershipTransition,
}

/// What changed as a result of [`Lifecycle::update`], for the caller to
/// act on (subscribe/unsubscribe subjects, start/stop source tasks)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub subjects_added: Vec<jetstream_proto::Subject>,
    pub subjects_removed: Vec<jetstream_proto::Subject>,
    pub sources_added: Vec<String>,
    pub sources_removed: Vec<String>,
    pub dedupe_reset: bool,
}

pub struct Lifecycle;

impl Lifecycle {
    /// Create a new stream
    ///
    /// `store` is assumed already open; its [`StreamStore::state`] supplies
    /// the initial `lseq` to restore across a restart. Subject-overlap
    /// validation against sibling streams happens inside
    /// [`ConfigValidator::normalize`] via `other_stream_subjects`.
    pub async fn create<Sink: OutboundSink>(
        config: StreamConfig,
        other_stream_subjects: &[jetstream_proto::Subject],
        mut store: Box<dyn StreamStore>,
        raft: Option<Arc<dyn RaftNode>>,
        sink: Sink,
        is_leader: bool,
    ) -> Result<CreateOutcome<Sink>, EngineError> {
        let config =
            ConfigValidator::normalize(config, other_stream_subjects).map_err(config_error)?;

        let initial_state = store.state().await;

        let (msgs_tx, msgs_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (ack_tx, ack_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (quit_tx, quit_rx) = mpsc::channel(1);
        let (outq_tx, outq_rx) = outq::channel(CHANNEL_CAPACITY);

        let replication = raft.map(ReplicationAdapter::new);
        let transition = leader::transition(&config, false, is_leader, true);

        let runtime = RuntimeState {
            dedupe: Dedupe::new(config.duplicates),
            registry: ConsumerRegistry::new(),
            retention: config.retention,
            stream_name: config.name.to_string(),
            allow_rollup: config.allow_rollup,
            deny_purge: config.deny_purge,
            max_msg_size: config.max_msg_size,
            max_msgs: config.max_msgs,
            max_bytes: config.max_bytes,
            max_msgs_per_subject: config.max_msgs_per_subject,
            discard: config.discard,
            is_mirror: matches!(config.feed, StreamFeed::Mirror(_)),
            sealed: config.sealed,
            lseq: initial_state.last_seq,
            lmsgid: None,
            clfs: 0,
            clseq: 0,
            store,
        };

        emit_advisory(&outq_tx, &config, AdvisoryAction::Created).await;

        let handle = StreamHandle {
            inner: Arc::new(HandleInner {
                name: config.name.clone(),
                config: ArcSwap::from_pointee(config),
                msgs: msgs_tx,
                ack: ack_tx,
                quit: quit_tx,
            }),
        };

        let internal_loop = InternalLoop {
            state: runtime,
            replication,
            sink,
            outq_rx,
            msgs_rx,
            ack_rx,
            quit_rx,
        };

        Ok(CreateOutcome {
            handle,
            internal_loop,
            transition,
        })
    }

    /// Apply a validated config update: diff subjects and sources
    /// against the handle's current snapshot, then install the new one.
    ///
    /// The returned [`UpdateOutcome`] tells the caller which subjects to
    /// (un)subscribe and which source tasks to start/cancel; this crate
    /// does not own subscriptions or source tasks itself.
    pub async fn update(
        handle: &StreamHandle,
        proposed: StreamConfig,
        other_stream_subjects: &[jetstream_proto::Subject],
    ) -> Result<UpdateOutcome, EngineError> {
        let current = handle.config();
        let proposed = ConfigValidator::check_update(&current, proposed, other_stream_subjects)
            .map_err(config_error)?;

        let mut outcome = UpdateOutcome {
            subjects_added: diff(proposed.subjects(), current.subjects()),
            subjects_removed: diff(current.subjects(), proposed.subjects()),
            dedupe_reset: proposed.duplicates != current.duplicates,
            ..UpdateOutcome::default()
        };

        if let (StreamFeed::Sources(next), StreamFeed::Sources(prev)) =
            (&proposed.feed, &current.feed)
        {
            let next_names: Vec<String> = next.iter().map(StreamSource::indexed_name).collect();
            let prev_names: Vec<String> = prev.iter().map(StreamSource::indexed_name).collect();
            outcome.sources_added = next_names
                .iter()
                .filter(|name| !prev_names.contains(name))
                .cloned()
                .collect();
            outcome.sources_removed = prev_names
                .into_iter()
                .filter(|name| !next_names.contains(name))
                .collect();
        }

        handle.inner.config.store(Arc::new(proposed));
        Ok(outcome)
    }

    /// Stop a stream: signal the internal loop to quit
    pub fn stop(handle: &StreamHandle) {
        handle.stop();
    }

    /// Delete a stream: same signal as stop; freeing the backing
    /// store's files is the caller's responsibility
    pub fn delete(handle: StreamHandle) {
        handle.delete();
    }

    /// Validate a staged restore directory against path-traversal and
    /// non-regular-file entries, then confirm the persisted metadata names
    /// the same stream being restored into
    ///
    /// The framed-compression unwrap and tar walk that produce `staging_dir`
    /// are the caller's responsibility; this only validates
    /// the already-extracted tree.
    pub fn restore(staging_dir: &Path, target_name: &StreamName) -> Result<(), EngineError> {
        validate_staged_entries(staging_dir)?;

        let meta_path = staging_dir.join("meta.inf");
        let contents = std::fs::read_to_string(&meta_path)
            .map_err(|_| EngineError::new(ErrorCode::RestoreMissingMetadata))?;
        let restored_name = contents.trim();
        if restored_name != target_name.as_str() {
            return Err(EngineError::new(ErrorCode::RestoreNameMismatch));
        }

        Ok(())
    }

    /// Suggest a store block size for a stream with the given limits
    ///: target ~25% bookkeeping
    /// overhead per message, rounded up to 100 bytes, clamped to the
    /// backend's `[FileStoreMinBlkSize, FileStoreMaxBlkSize]`.
    #[must_use]
    pub fn block_size_hint(max_bytes: i64, max_msgs: i64) -> u64 {
        if max_bytes <= 0 || max_msgs <= 0 {
            return MIN_BLOCK_SIZE;
        }
        let avg_msg_size = (max_bytes as u64) / (max_msgs as u64).max(1);
        let with_overhead = avg_msg_size + avg_msg_size / 4;
        let rounded = with_overhead.div_ceil(100) * 100;
        rounded.clamp(MIN_BLOCK_SIZE, MAX_BLOCK_SIZE)
    }
}

async fn emit_advisory(outq_tx: &OutQSender, config: &StreamConfig, action: AdvisoryAction) {
    let emitter = AdvisoryEmitter::new(config.name.to_string(), None, outq_tx.clone());
    emitter.emit(action, config.template.as_deref(), Utc::now()).await;
}

fn diff(
    from: &[jetstream_proto::Subject],
    without: &[jetstream_proto::Subject],
) -> Vec<jetstream_proto::Subject> {
    from.iter().filter(|s| !without.contains(s)).cloned().collect()
}

fn config_error(err: ConfigError) -> EngineError {
    let code = match &err {
        ConfigError::InvalidName(_) => ErrorCode::InvalidStreamName,
        ConfigError::InvalidReplicas => ErrorCode::InvalidReplicas,
        ConfigError::ReservedSubjectOverlap(_) | ConfigError::SubjectClaimedByOtherStream(_) => {
            ErrorCode::SubjectOverlap
        }
        ConfigError::MirrorWithExtras | ConfigError::AmbiguousSource => {
            ErrorCode::MirrorWithSubjectsOrSources
        }
        _ => ErrorCode::InvalidConfigUpdate,
    };
    EngineError::with_source(code, err)
}

fn validate_staged_entries(root: &Path) -> Result<(), EngineError> {
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries =
            std::fs::read_dir(&dir).map_err(|_| EngineError::new(ErrorCode::RestorePathTraversal))?;
        for entry in entries {
            let entry = entry.map_err(|_| EngineError::new(ErrorCode::RestorePathTraversal))?;
            let path = entry.path();
            let relative = path
                .strip_prefix(root)
                .map_err(|_| EngineError::new(ErrorCode::RestorePathTraversal))?;
            if relative.components().any(|c| matches!(c, Component::ParentDir)) {
                return Err(EngineError::new(ErrorCode::RestorePathTraversal));
            }

            let file_type = entry
                .file_type()
                .map_err(|_| EngineError::new(ErrorCode::RestorePathTraversal))?;
            if file_type.is_symlink() {
                return Err(EngineError::new(ErrorCode::RestorePathTraversal));
            } else if file_type.is_dir() {
                stack.push(path);
            } else if !file_type.is_file() {
                return Err(EngineError::new(ErrorCode::RestorePathTraversal));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{HandleClosedError, Lifecycle};
    use crate::internal_loop::OutboundSink;
    use crate::name::StreamName;
    use crate::outq::OutMessage;
    use crate::testing::{test_stream_config, MemStore};

    struct NullSink;

    #[async_trait::async_trait]
    impl OutboundSink for NullSink {
        async fn send(&self, _message: OutMessage) {}
    }

    #[tokio::test]
    async fn create_restores_lseq_from_store_and_emits_advisory() {
        let outcome = Lifecycle::create(
            test_stream_config("A"),
            &[],
            Box::new(MemStore::new()),
            None,
            NullSink,
            true,
        )
        .await
        .unwrap();

        assert_eq!(outcome.internal_loop.state.lseq, 0);
        assert!(outcome.transition.became_leader);
        assert_eq!(outcome.handle.name(), &StreamName::from_static("A"));
    }

    #[tokio::test]
    async fn stop_closes_publish_channel() {
        let outcome = Lifecycle::create(
            test_stream_config("A"),
            &[],
            Box::new(MemStore::new()),
            None,
            NullSink,
            true,
        )
        .await
        .unwrap();
        let handle = outcome.handle;
        drop(outcome.internal_loop);

        Lifecycle::stop(&handle);
        // the internal loop was dropped above, so msgs has no receiver left
        let err = handle
            .publish(crate::ingress::IngressRequest {
                subject: jetstream_proto::Subject::from_static("a"),
                reply: None,
                headers: jetstream_proto::headers::HeaderMap::new(),
                payload: bytes::Bytes::new(),
                proposed_lseq: None,
                timestamp_nanos: None,
            })
            .await;
        assert!(matches!(err, Err(HandleClosedError)));
    }

    #[test]
    fn block_size_hint_clamps_to_minimum() {
        assert_eq!(Lifecycle::block_size_hint(0, 0), super::MIN_BLOCK_SIZE);
        assert_eq!(Lifecycle::block_size_hint(-1, -1), super::MIN_BLOCK_SIZE);
    }

    #[test]
    fn block_size_hint_scales_with_average_message_size() {
        let hint = Lifecycle::block_size_hint(1_000_000, 1_000);
        assert!(hint >= super::MIN_BLOCK_SIZE);
        assert_eq!(hint % 100, 0);
    }
}
