//! The publish ingress pipeline: precondition checks, dedupe,
//! rollup, the interest gate, and the store append itself.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use jetstream_proto::headers::{HeaderMap, HeaderName, HeaderValue};
use jetstream_proto::Subject;

use crate::config::{DiscardPolicy, RetentionPolicy};
use crate::dedupe::Dedupe;
use crate::error::{EngineError, ErrorCode};
use crate::registry::ConsumerRegistry;
use crate::store::{StoreError, StoredMessage, StreamStore};

/// Everything the internal loop task owns and mutates as the sole writer:
/// the committed sequence counters,
/// the dedupe map, the consumer registry and the store handle itself.
pub struct RuntimeState {
    pub store: Box<dyn StreamStore>,
    pub dedupe: Dedupe,
    pub registry: ConsumerRegistry,
    pub retention: RetentionPolicy,
    pub stream_name: String,
    pub allow_rollup: bool,
    pub deny_purge: bool,
    pub max_msg_size: i64,
    /// `-1` means unlimited; checked against the store's reported counts
    pub max_msgs: i64,
    pub max_bytes: i64,
    pub max_msgs_per_subject: i64,
    pub discard: DiscardPolicy,
    pub is_mirror: bool,
    pub sealed: bool,
    /// Last assigned stream sequence
    pub lseq: u64,
    /// Last published msg-id, for the expected-last-msg-id precondition
    pub lmsgid: Option<String>,
    /// Count of proposals skipped due to pre-store rejection
    pub clfs: u64,
    /// Last proposed sequence on this leader
    pub clseq: u64,
}

/// A publish entering the pipeline
pub struct IngressRequest {
    pub subject: Subject,
    pub reply: Option<Subject>,
    pub headers: HeaderMap,
    pub payload: bytes::Bytes,
    /// Nonzero only for entries arriving via the consensus log
    pub proposed_lseq: Option<u64>,
    pub timestamp_nanos: Option<i64>,
}

/// The successful result of a publish, rendered into the ack JSON by the
/// caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishAck {
    pub stream: String,
    pub seq: u64,
    pub duplicate: bool,
}

pub const MAX_HEADER_BYTES: usize = 65535;

/// Run a single message through the ingress pipeline
///
/// On any precondition failure, `clfs` is incremented and `lseq` is left
/// untouched; on success both are updated and every attached
/// consumer is notified.
pub async fn process(
    state: &mut RuntimeState,
    mut request: IngressRequest,
) -> Result<PublishAck, EngineError> {
    ensure_dedupe_loaded(state).await?;

    if let Some(proposed) = request.proposed_lseq {
        if proposed > 0 {
            let expected = state.lseq + state.clfs;
            if proposed != expected {
                let fresh_or_mirror = state.lseq == 0 || state.is_mirror;
                if fresh_or_mirror {
                    state.lseq = proposed;
                } else {
                    state.clfs += 1;
                    return Err(EngineError::new(ErrorCode::StreamWrongLastSequence));
                }
            }
        }
    }

    request.headers.remove(&HeaderName::CLIENT_INFO);

    let now = Instant::now();
    let msg_id = request
        .headers
        .get(&HeaderName::MESSAGE_ID)
        .map(|value| value.as_str().to_owned());

    if let Some(id) = &msg_id {
        if let Some(seq) = state.dedupe.check(id, now) {
            return Ok(PublishAck {
                stream: state.stream_name.clone(),
                seq,
                duplicate: true,
            });
        }
    }

    if let Some(expected_stream) = request.headers.get(&HeaderName::EXPECTED_STREAM) {
        if expected_stream.as_str() != state.stream_name {
            state.clfs += 1;
            return Err(EngineError::new(ErrorCode::StreamNameMismatch));
        }
    }

    if let Some(expected_seq) = request.headers.get(&HeaderName::EXPECTED_LAST_SEQUENCE) {
        let expected: u64 = parse_u64(expected_seq).unwrap_or(u64::MAX);
        if expected != state.lseq {
            state.clfs += 1;
            return Err(EngineError::new(ErrorCode::StreamWrongLastSequence));
        }
    }

    if let Some(expected_id) = request.headers.get(&HeaderName::EXPECTED_LAST_MESSAGE_ID) {
        if Some(expected_id.as_str()) != state.lmsgid.as_deref() {
            state.clfs += 1;
            return Err(EngineError::new(ErrorCode::StreamWrongLastMsgId));
        }
    }

    if let Some(expected_subj_seq) = request
        .headers
        .get(&HeaderName::EXPECTED_LAST_SUBJECT_SEQUENCE)
    {
        let expected: u64 = parse_u64(expected_subj_seq).unwrap_or(u64::MAX);
        let last = state
            .store
            .load_last_msg(&request.subject)
            .await
            .map_err(|err| {
                state.clfs += 1;
                EngineError::with_source(ErrorCode::StorageError, err)
            })?;
        let actual = last.map_or(0, |msg| msg.seq);
        if expected != actual {
            state.clfs += 1;
            return Err(EngineError::new(ErrorCode::StreamWrongLastSubjectSequence));
        }
    }

    let rollup = match request.headers.get(&HeaderName::ROLLUP) {
        None => None,
        Some(value) => {
            if !state.allow_rollup || state.deny_purge {
                state.clfs += 1;
                return Err(EngineError::new(ErrorCode::StreamRollupDenied));
            }
            match value.as_str() {
                "sub" => Some(Rollup::Subject),
                "all" => Some(Rollup::All),
                _ => {
                    state.clfs += 1;
                    return Err(EngineError::new(ErrorCode::StreamRollupDenied));
                }
            }
        }
    };

    if state.sealed {
        state.clfs += 1;
        return Err(EngineError::new(ErrorCode::StreamSealed));
    }

    if state.max_msg_size >= 0
        && (request.headers_len() + request.payload.len()) as i64 > state.max_msg_size
    {
        state.clfs += 1;
        return Err(EngineError::new(ErrorCode::MessageTooLarge));
    }
    if request.headers_len() > MAX_HEADER_BYTES {
        state.clfs += 1;
        return Err(EngineError::new(ErrorCode::HeaderTooLarge));
    }

    enforce_resource_limits(state, &request).await?;

    if state.retention == RetentionPolicy::Interest
        && !state.registry.has_interest_in_subject(&request.subject)
    {
        let seq = request
            .proposed_lseq
            .map_or(state.lseq + 1, |proposed| proposed + 1 - state.clfs);
        state
            .store
            .skip_msg(seq)
            .await
            .map_err(|err| EngineError::with_source(ErrorCode::StorageError, err))?;
        state.lseq = seq;
        if let Some(id) = msg_id {
            state.dedupe.record(id.clone(), seq, now);
            state.lmsgid = Some(id);
        }
        return Ok(PublishAck {
            stream: state.stream_name.clone(),
            seq,
            duplicate: false,
        });
    }

    let seq = match request.proposed_lseq {
        None => {
            let (seq, _ts) = state
                .store
                .store_msg(&request.subject, &request.headers, &request.payload)
                .await
                .map_err(|err| rollback_on_store_error(state, err))?;
            seq
        }
        Some(proposed) => {
            let seq = proposed + 1 - state.clfs;
            let ts = request.timestamp_nanos.unwrap_or_else(now_nanos);
            state
                .store
                .store_raw_msg(&request.subject, &request.headers, &request.payload, seq, ts)
                .await
                .map_err(|err| rollback_on_store_error(state, err))?;
            seq
        }
    };
    state.lseq = seq;

    match rollup {
        Some(Rollup::Subject) => {
            state
                .store
                .purge_subject_keep_last(&request.subject)
                .await
                .map_err(|err| EngineError::with_source(ErrorCode::StorageError, err))?;
        }
        Some(Rollup::All) => {
            state
                .store
                .purge_all_keep_last()
                .await
                .map_err(|err| EngineError::with_source(ErrorCode::StorageError, err))?;
        }
        None => {}
    }

    if let Some(id) = msg_id {
        state.dedupe.record(id.clone(), seq, now);
        state.lmsgid = Some(id);
    }

    state.registry.notify_all(seq);

    Ok(PublishAck {
        stream: state.stream_name.clone(),
        seq,
        duplicate: false,
    })
}

/// On first use after process startup, repopulate the dedupe map from
/// stored message headers and restore `lmsgid` from the last stored
/// message, so a restart of a non-empty stream doesn't forget in-window
/// `Nats-Msg-Id`s or the expected-last-msg-id precondition.
///
/// A no-op once loaded, and on a genuinely empty stream.
async fn ensure_dedupe_loaded(state: &mut RuntimeState) -> Result<(), EngineError> {
    if state.dedupe.is_loaded() {
        return Ok(());
    }

    let store_state = state.store.state().await;
    if store_state.msgs == 0 {
        state.dedupe.mark_loaded();
        return Ok(());
    }

    if let Some(last) = load_stored_msg(state, store_state.last_seq).await? {
        state.lmsgid = msg_id_of(&last);
    }

    let window_nanos = i64::try_from(state.dedupe.window().as_nanos()).unwrap_or(i64::MAX);
    let cutoff = now_nanos().saturating_sub(window_nanos);
    let start = state
        .store
        .first_seq_after(cutoff)
        .await
        .map_err(|err| EngineError::with_source(ErrorCode::StorageError, err))?;

    if let Some(start) = start {
        let now = Instant::now();
        for seq in start..=store_state.last_seq {
            let Some(msg) = load_stored_msg(state, seq).await? else {
                continue;
            };
            if let Some(id) = msg_id_of(&msg) {
                let age_nanos = now_nanos().saturating_sub(msg.timestamp_nanos).max(0) as u64;
                let ts = now.checked_sub(Duration::from_nanos(age_nanos)).unwrap_or(now);
                state.dedupe.restore(id, seq, ts);
            }
        }
    }

    state.dedupe.mark_loaded();
    Ok(())
}

async fn load_stored_msg(
    state: &RuntimeState,
    seq: u64,
) -> Result<Option<StoredMessage>, EngineError> {
    state
        .store
        .load_msg(seq)
        .await
        .map_err(|err| EngineError::with_source(ErrorCode::StorageError, err))
}

fn msg_id_of(msg: &StoredMessage) -> Option<String> {
    msg.headers
        .get(&HeaderName::MESSAGE_ID)
        .map(|value| value.as_str().to_owned())
}

/// `MaxMsgs`/`MaxBytes`/`MaxMsgsPerSubject`: once a limit is met,
/// `DiscardPolicy::New` rejects the incoming publish and
/// `DiscardPolicy::Old` evicts the oldest qualifying message to make room
async fn enforce_resource_limits(
    state: &mut RuntimeState,
    request: &IngressRequest,
) -> Result<(), EngineError> {
    if state.max_msgs >= 0 {
        let store_state = state.store.state().await;
        if store_state.msgs >= state.max_msgs as u64 {
            if state.discard == DiscardPolicy::New {
                state.clfs += 1;
                return Err(EngineError::new(ErrorCode::MaximumMessagesExceeded));
            }
            evict_oldest(state).await?;
        }
    }

    if state.max_bytes >= 0 {
        let store_state = state.store.state().await;
        let incoming = (request.headers_len() + request.payload.len()) as u64;
        if store_state.bytes + incoming > state.max_bytes as u64 {
            if state.discard == DiscardPolicy::New {
                state.clfs += 1;
                return Err(EngineError::new(ErrorCode::MaximumBytesExceeded));
            }
            evict_oldest(state).await?;
        }
    }

    if state.max_msgs_per_subject >= 0 {
        let count = state
            .store
            .count_for_subject(&request.subject)
            .await
            .map_err(|err| EngineError::with_source(ErrorCode::StorageError, err))?;
        if count >= state.max_msgs_per_subject as u64 {
            if state.discard == DiscardPolicy::New {
                state.clfs += 1;
                return Err(EngineError::new(ErrorCode::MaximumMessagesPerSubjectExceeded));
            }
            state
                .store
                .remove_oldest_for_subject(&request.subject)
                .await
                .map_err(|err| EngineError::with_source(ErrorCode::StorageError, err))?;
        }
    }

    Ok(())
}

async fn evict_oldest(state: &mut RuntimeState) -> Result<(), EngineError> {
    let store_state = state.store.state().await;
    if store_state.msgs == 0 {
        return Ok(());
    }
    state
        .store
        .remove_msg(store_state.first_seq)
        .await
        .map_err(|err| EngineError::with_source(ErrorCode::StorageError, err))
}

enum Rollup {
    Subject,
    All,
}

fn rollback_on_store_error(state: &mut RuntimeState, err: StoreError) -> EngineError {
    state.clfs += 1;
    if matches!(err, StoreError::NoSpaceLeft) {
        return EngineError::with_source(ErrorCode::InsufficientResources, err);
    }
    EngineError::with_source(ErrorCode::StorageError, err)
}

fn parse_u64(value: &HeaderValue) -> Option<u64> {
    value.as_str().parse().ok()
}

fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_nanos() as i64
}

impl IngressRequest {
    fn headers_len(&self) -> usize {
        self.headers.encoded_len()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use claims::{assert_err, assert_ok, assert_ok_eq};
    use jetstream_proto::headers::{HeaderMap, HeaderName, HeaderValue};
    use jetstream_proto::Subject;

    use super::{process, IngressRequest, PublishAck, RuntimeState};
    use crate::config::{DiscardPolicy, RetentionPolicy};
    use crate::dedupe::Dedupe;
    use crate::error::ErrorCode;
    use crate::registry::{ConsumerHandle, ConsumerRegistry};
    use crate::testing::MemStore;

    fn state(retention: RetentionPolicy) -> RuntimeState {
        RuntimeState {
            store: Box::new(MemStore::new()),
            dedupe: Dedupe::new(std::time::Duration::from_secs(120)),
            registry: ConsumerRegistry::new(),
            retention,
            stream_name: "A".into(),
            allow_rollup: true,
            deny_purge: false,
            max_msg_size: -1,
            max_msgs: -1,
            max_bytes: -1,
            max_msgs_per_subject: -1,
            discard: DiscardPolicy::Old,
            is_mirror: false,
            sealed: false,
            lseq: 0,
            lmsgid: None,
            clfs: 0,
            clseq: 0,
        }
    }

    fn request(subject: &str, payload: &'static [u8]) -> IngressRequest {
        IngressRequest {
            subject: Subject::from_static(subject),
            reply: None,
            headers: HeaderMap::new(),
            payload: Bytes::from_static(payload),
            proposed_lseq: None,
            timestamp_nanos: None,
        }
    }

    // basic publish
    #[tokio::test]
    async fn basic_publish_assigns_seq_one() {
        let mut state = state(RetentionPolicy::Limits);
        let ack = assert_ok!(process(&mut state, request("a", b"1")).await);
        assert_eq!(
            ack,
            PublishAck {
                stream: "A".into(),
                seq: 1,
                duplicate: false,
            }
        );
        assert_eq!(state.lseq, 1);
    }

    // dedupe window
    #[tokio::test]
    async fn duplicate_msg_id_returns_original_seq() {
        let mut state = state(RetentionPolicy::Limits);
        let mut first = request("a", b"1");
        first.headers.insert(HeaderName::MESSAGE_ID, HeaderValue::from_static("X"));
        assert_ok_eq!(
            process(&mut state, first).await,
            PublishAck {
                stream: "A".into(),
                seq: 1,
                duplicate: false,
            }
        );

        let mut second = request("a", b"2");
        second.headers.insert(HeaderName::MESSAGE_ID, HeaderValue::from_static("X"));
        assert_ok_eq!(
            process(&mut state, second).await,
            PublishAck {
                stream: "A".into(),
                seq: 1,
                duplicate: true,
            }
        );
        assert_eq!(state.store.state().await.msgs, 1);
    }

    // expected-last-seq precondition failure leaves lseq and store untouched
    #[tokio::test]
    async fn wrong_expected_last_sequence_is_rejected() {
        let mut state = state(RetentionPolicy::Limits);
        assert_ok!(process(&mut state, request("a", b"1")).await);

        let mut bad = request("a", b"2");
        bad.headers
            .insert(HeaderName::EXPECTED_LAST_SEQUENCE, HeaderValue::from_static("5"));
        let err = assert_err!(process(&mut state, bad).await);
        assert_eq!(err.code, ErrorCode::StreamWrongLastSequence);
        assert_eq!(state.lseq, 1);
        assert_eq!(state.store.state().await.msgs, 1);
    }

    // rollup-subject purges everything but the rollup publish itself
    #[tokio::test]
    async fn rollup_subject_keeps_only_latest() {
        let mut state = state(RetentionPolicy::Limits);
        for _ in 0..3 {
            assert_ok!(process(&mut state, request("a", b"x")).await);
        }

        let mut rollup = request("a", b"last");
        rollup.headers.insert(HeaderName::ROLLUP, HeaderValue::from_static("sub"));
        assert_ok!(process(&mut state, rollup).await);

        assert_eq!(state.store.state().await.msgs, 1);
    }

    // interest filter skips uninteresting subjects without storing them
    #[tokio::test]
    async fn interest_retention_skips_uninteresting_subject() {
        struct FilteredConsumer(Subject);
        impl ConsumerHandle for FilteredConsumer {
            fn filter_subject(&self) -> Option<&Subject> {
                Some(&self.0)
            }
            fn is_direct(&self) -> bool {
                false
            }
            fn needs_ack(&self, _seq: u64) -> bool {
                true
            }
            fn notify(&self, _seq: u64) {}
        }

        let mut state = state(RetentionPolicy::Interest);
        state
            .registry
            .set_consumer(Box::new(FilteredConsumer(Subject::from_static("a.*"))));

        let ack = assert_ok!(process(&mut state, request("b", b"skip me")).await);
        assert!(!ack.duplicate);
        assert_eq!(state.lseq, 1);
        assert_eq!(state.store.state().await.msgs, 0);

        let ack = assert_ok!(process(&mut state, request("a.x", b"keep me")).await);
        assert_eq!(ack.seq, 2);
        assert_eq!(state.store.state().await.msgs, 1);
    }

    // sealed stream rejects subsequent publishes
    #[tokio::test]
    async fn sealed_stream_rejects_publish() {
        let mut state = state(RetentionPolicy::Limits);
        state.sealed = true;
        let err = assert_err!(process(&mut state, request("a", b"1")).await);
        assert_eq!(err.code, ErrorCode::StreamSealed);
    }

    // a restart leaves the store populated but the dedupe map empty; the
    // first publish afterwards must lazy-load it before checking
    #[tokio::test]
    async fn dedupe_lazy_loads_from_existing_messages_on_first_use() {
        let mut state = state(RetentionPolicy::Limits);
        let mut headers = HeaderMap::new();
        headers.insert(HeaderName::MESSAGE_ID, HeaderValue::from_static("X"));
        state
            .store
            .store_raw_msg(
                &Subject::from_static("a"),
                &headers,
                &Bytes::from_static(b"1"),
                1,
                super::now_nanos(),
            )
            .await
            .unwrap();
        state.lseq = 1;

        let mut dup = request("a", b"2");
        dup.headers.insert(HeaderName::MESSAGE_ID, HeaderValue::from_static("X"));
        let ack = assert_ok!(process(&mut state, dup).await);
        assert!(ack.duplicate);
        assert_eq!(ack.seq, 1);
        assert_eq!(state.store.state().await.msgs, 1);
    }

    // same restart scenario, but the msg-id fell out of the dedupe window;
    // lmsgid must still be restored from the last stored message regardless
    #[tokio::test]
    async fn lmsgid_is_restored_from_last_stored_message_on_first_use() {
        let mut state = state(RetentionPolicy::Limits);
        let mut headers = HeaderMap::new();
        headers.insert(HeaderName::MESSAGE_ID, HeaderValue::from_static("last-id"));
        state
            .store
            .store_raw_msg(
                &Subject::from_static("a"),
                &headers,
                &Bytes::from_static(b"1"),
                1,
                super::now_nanos(),
            )
            .await
            .unwrap();
        state.lseq = 1;

        let mut next = request("a", b"2");
        next.headers
            .insert(HeaderName::EXPECTED_LAST_MESSAGE_ID, HeaderValue::from_static("last-id"));
        assert_ok!(process(&mut state, next).await);
        assert_eq!(state.lmsgid.as_deref(), Some("last-id"));
    }

    // DiscardPolicy::New rejects once MaxMsgs is reached
    #[tokio::test]
    async fn max_msgs_discard_new_rejects_once_full() {
        let mut state = state(RetentionPolicy::Limits);
        state.max_msgs = 2;
        state.discard = DiscardPolicy::New;
        assert_ok!(process(&mut state, request("a", b"1")).await);
        assert_ok!(process(&mut state, request("a", b"2")).await);

        let err = assert_err!(process(&mut state, request("a", b"3")).await);
        assert_eq!(err.code, ErrorCode::MaximumMessagesExceeded);
        assert_eq!(state.store.state().await.msgs, 2);
    }

    // DiscardPolicy::Old evicts the oldest message instead of rejecting
    #[tokio::test]
    async fn max_msgs_discard_old_evicts_oldest() {
        let mut state = state(RetentionPolicy::Limits);
        state.max_msgs = 2;
        state.discard = DiscardPolicy::Old;
        assert_ok!(process(&mut state, request("a", b"1")).await);
        assert_ok!(process(&mut state, request("a", b"2")).await);

        let ack = assert_ok!(process(&mut state, request("a", b"3")).await);
        assert!(!ack.duplicate);
        assert_eq!(state.store.state().await.msgs, 2);
        assert!(state.store.load_msg(1).await.unwrap().is_none());
    }

    // MaxMsgsPerSubject rejects on the offending subject only
    #[tokio::test]
    async fn max_msgs_per_subject_discard_new_rejects_offending_subject() {
        let mut state = state(RetentionPolicy::Limits);
        state.max_msgs_per_subject = 1;
        state.discard = DiscardPolicy::New;
        assert_ok!(process(&mut state, request("a", b"1")).await);

        let err = assert_err!(process(&mut state, request("a", b"2")).await);
        assert_eq!(err.code, ErrorCode::MaximumMessagesPerSubjectExceeded);

        assert_ok!(process(&mut state, request("b", b"1")).await);
        assert_eq!(state.store.state().await.msgs, 2);
    }
}
