//! Mirror and N-way source federation.
//!
//! A source (or the mirror) is driven from two places: the health tick,
//! which (re)requests an upstream consumer when none is active or the
//! current one has stalled, and the inbound delivery handler, which
//! tracks `(sseq, dseq)` against what was last observed and decides
//! whether to accept, skip a gap, drop a stale redelivery, or ask for a
//! retry. Both are exposed here as plain functions over [`SourceInfo`] so
//! they can be driven by whatever task-spawning glue owns the upstream
//! transport (`leader.rs`), without this module needing to know how
//! tasks are scheduled.

use std::time::Duration;

use chrono::{DateTime, Utc};
use jetstream_proto::headers::{HeaderMap, HeaderName};
use jetstream_proto::{StatusCode, Subject};
use serde::{Deserialize, Serialize};

use crate::config::{StreamMirror, StreamSource};

/// health tick cadence
pub const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(2);
/// a create request is issued at most every 2s per source
pub const CREATE_REQUEST_THROTTLE: Duration = Duration::from_secs(2);
/// create response timeout before the reply inbox is abandoned
pub const CREATE_RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);
/// health tick retries the consumer once silence exceeds 3x the interval
pub const STALL_AFTER: Duration = Duration::from_secs(2 * 3);
/// `AckWait` installed on every source/mirror consumer
pub const SOURCE_ACK_WAIT: Duration = Duration::from_secs(22 * 60 * 60);

/// Per-source (or mirror) runtime bookkeeping
#[derive(Debug, Clone, Default)]
pub struct SourceInfo {
    /// Last upstream stream sequence observed
    pub sseq: u64,
    /// Last upstream delivery sequence observed
    pub dseq: u64,
    pub lag: u64,
    /// Last request time, for the 2s create-request throttle
    pub last_request: Option<DateTime<Utc>>,
    /// Current upstream consumer name, captured from the first delivery
    pub cname: Option<String>,
    pub err: Option<String>,
}

impl SourceInfo {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a create request may be issued again, given the 2s throttle
    #[must_use]
    pub fn may_request(&self, now: DateTime<Utc>) -> bool {
        match self.last_request {
            None => true,
            Some(last) => now - last >= chrono::Duration::seconds(CREATE_REQUEST_THROTTLE.as_secs() as i64),
        }
    }
}

/// Where a newly (re)started source/mirror consumer should resume from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeFrom {
    All,
    StartSeq(u64),
    StartTime(DateTime<Utc>),
    /// Restart after a prior delivery: `state.LastSeq + 1` for a mirror,
    /// `si.sseq + 1` for a source
    AfterSeq(u64),
}

/// Compute where a (re)start should resume from
///
/// `is_restart` distinguishes the very first start (uses the configured
/// `opt_start_seq`/`opt_start_time`, or `All`) from a restart after a
/// stall/error (always resumes from the last observed sequence).
#[must_use]
pub fn mirror_resume_from(
    mirror: &StreamMirror,
    info: &SourceInfo,
    is_restart: bool,
) -> ResumeFrom {
    if is_restart {
        return ResumeFrom::AfterSeq(info.sseq + 1);
    }
    resume_from_config(mirror.opt_start_seq, mirror.opt_start_time)
}

#[must_use]
pub fn source_resume_from(
    source: &StreamSource,
    info: &SourceInfo,
    is_restart: bool,
) -> ResumeFrom {
    if is_restart {
        return ResumeFrom::AfterSeq(info.sseq + 1);
    }
    resume_from_config(source.opt_start_seq, source.opt_start_time)
}

fn resume_from_config(opt_start_seq: Option<u64>, opt_start_time: Option<DateTime<Utc>>) -> ResumeFrom {
    match (opt_start_seq, opt_start_time) {
        (Some(seq), _) => ResumeFrom::StartSeq(seq),
        (None, Some(time)) => ResumeFrom::StartTime(time),
        (None, None) => ResumeFrom::All,
    }
}

/// The consumer-create request shape sent to `$JS.API.CONSUMER.CREATE.<stream>`
/// (possibly under the source's `ApiPrefix`),
#[derive(Debug, Clone, Serialize)]
pub struct SourceConsumerCreateRequest {
    pub stream_name: String,
    pub config: SourceConsumerConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceConsumerConfig {
    pub deliver_subject: Subject,
    pub ack_policy: &'static str,
    #[serde(with = "duration_secs")]
    pub ack_wait: Duration,
    pub max_deliver: u32,
    #[serde(with = "duration_secs")]
    pub idle_heartbeat: Duration,
    pub flow_control: bool,
    #[serde(rename = "direct")]
    pub direct: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_subject: Option<Subject>,
    #[serde(flatten)]
    pub resume: ResumeFromWire,
}

/// Wire shape of [`ResumeFrom`] minus the `AfterSeq` variant, which is
/// always resolved to a concrete `StartSeq` before the request is built
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(tag = "deliver_policy")]
pub enum ResumeFromWire {
    #[serde(rename = "all")]
    All,
    #[serde(rename = "by_start_sequence")]
    StartSequence { opt_start_seq: u64 },
    #[serde(rename = "by_start_time")]
    StartTime { opt_start_time: DateTime<Utc> },
}

impl From<ResumeFrom> for ResumeFromWire {
    fn from(value: ResumeFrom) -> Self {
        match value {
            ResumeFrom::All => Self::All,
            ResumeFrom::StartSeq(seq) | ResumeFrom::AfterSeq(seq) => {
                Self::StartSequence { opt_start_seq: seq }
            }
            ResumeFrom::StartTime(time) => Self::StartTime {
                opt_start_time: time,
            },
        }
    }
}

/// Build the create request for a mirror consumer. Mirrors never carry a
/// filter subject.
#[must_use]
pub fn build_mirror_create_request(
    stream_name: &str,
    deliver_subject: Subject,
    resume: ResumeFrom,
) -> SourceConsumerCreateRequest {
    SourceConsumerCreateRequest {
        stream_name: stream_name.to_owned(),
        config: SourceConsumerConfig {
            deliver_subject,
            ack_policy: "none",
            ack_wait: SOURCE_ACK_WAIT,
            max_deliver: 1,
            idle_heartbeat: HEALTH_CHECK_INTERVAL,
            flow_control: true,
            direct: true,
            filter_subject: None,
            resume: resume.into(),
        },
    }
}

#[must_use]
pub fn build_source_create_request(
    stream_name: &str,
    source: &StreamSource,
    deliver_subject: Subject,
    resume: ResumeFrom,
) -> SourceConsumerCreateRequest {
    SourceConsumerCreateRequest {
        stream_name: stream_name.to_owned(),
        config: SourceConsumerConfig {
            deliver_subject,
            ack_policy: "none",
            ack_wait: SOURCE_ACK_WAIT,
            max_deliver: 1,
            idle_heartbeat: HEALTH_CHECK_INTERVAL,
            flow_control: true,
            direct: true,
            filter_subject: source.filter_subject.clone(),
            resume: resume.into(),
        },
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConsumerCreateResponse {
    #[serde(default)]
    pub error: Option<ApiError>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiError {
    pub code: u16,
    #[serde(default)]
    pub description: String,
}

/// A control message sent by an upstream consumer: either a heartbeat
/// (no reply subject) or a flow-control request (reply subject present).
/// `None` means the delivery carries a real payload and
/// isn't a control message at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    Heartbeat {
        last_consumer_seq: Option<u64>,
        last_stream_seq: Option<u64>,
        stalled_reply: Option<Subject>,
    },
    FlowControl {
        reply: Subject,
    },
}

/// Classify an inbound delivery as a control message: an empty payload
/// carrying status 100 (idle heartbeat)
#[must_use]
pub fn classify_control(
    status: Option<StatusCode>,
    payload_len: usize,
    reply: Option<&Subject>,
    headers: &HeaderMap,
) -> Option<ControlMessage> {
    if payload_len != 0 || status != Some(StatusCode::IDLE_HEARTBEAT) {
        return None;
    }

    if let Some(reply) = reply {
        return Some(ControlMessage::FlowControl {
            reply: reply.clone(),
        });
    }

    let last_consumer_seq = headers
        .get(&HeaderName::LAST_CONSUMER)
        .and_then(|v| v.as_str().parse().ok());
    let last_stream_seq = headers
        .get(&HeaderName::LAST_STREAM)
        .and_then(|v| v.as_str().parse().ok());
    let stalled_reply = headers
        .get(&HeaderName::CONSUMER_STALLED)
        .and_then(|v| Subject::try_from(v.as_str().to_owned()).ok());

    Some(ControlMessage::Heartbeat {
        last_consumer_seq,
        last_stream_seq,
        stalled_reply,
    })
}

/// The fields parsed out of a JetStream ACK-reply subject
/// (`$JS.ACK.<stream>.<consumer>.<num-delivered>.<sseq>.<cseq>.<ts>.<pending>`),
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckReplyInfo {
    pub consumer_name: String,
    pub delivery_count: u64,
    pub stream_seq: u64,
    pub consumer_seq: u64,
    pub timestamp_nanos: i64,
    pub pending: u64,
}

#[must_use]
pub fn parse_ack_reply(reply: &Subject) -> Option<AckReplyInfo> {
    let mut tokens = reply.as_str().split('.');
    if tokens.next() != Some("$JS") || tokens.next() != Some("ACK") {
        return None;
    }
    let _stream = tokens.next()?;
    let consumer_name = tokens.next()?.to_owned();
    let delivery_count = tokens.next()?.parse().ok()?;
    let stream_seq = tokens.next()?.parse().ok()?;
    let consumer_seq = tokens.next()?.parse().ok()?;
    let timestamp_nanos = tokens.next()?.parse().ok()?;
    let pending = tokens.next()?.parse().ok()?;

    Some(AckReplyInfo {
        consumer_name,
        delivery_count,
        stream_seq,
        consumer_seq,
        timestamp_nanos,
        pending,
    })
}

/// Whether `ack.consumer_name` still identifies the subscription this
/// source believes is active; a mismatch means the subscription pointer
/// can't be trusted (cross-account imports break equality) and the
/// delivery must be dropped
#[must_use]
pub fn subscription_identity_matches(info: &SourceInfo, ack: &AckReplyInfo) -> bool {
    info.cname
        .as_deref()
        .map_or(true, |cname| cname == ack.consumer_name)
}

/// The outcome of tracking a mirror delivery's `(sseq, dseq)` against
/// [`SourceInfo`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MirrorAdvance {
    /// Contiguous; advance both counters
    Continue { sseq: u64, dseq: u64 },
    /// `sseq` jumped ahead of `dseq + 1`: the missing range is a gap to
    /// be locally represented as skips
    Skip {
        sseq: u64,
        dseq: u64,
        skip_seqs: Vec<u64>,
    },
    /// `sseq <= info.sseq`: an old, already-applied redelivery
    Stale,
    /// Neither contiguous nor a recognizable gap: ask for a retry
    Retry,
}

#[must_use]
pub fn track_mirror(info: &SourceInfo, sseq: u64, dseq: u64) -> MirrorAdvance {
    if sseq == info.sseq + 1 {
        MirrorAdvance::Continue { sseq, dseq }
    } else if sseq <= info.sseq {
        MirrorAdvance::Stale
    } else if dseq == info.dseq + 1 {
        let skip_seqs = ((info.sseq + 1)..sseq).collect();
        MirrorAdvance::Skip {
            sseq,
            dseq,
            skip_seqs,
        }
    } else {
        MirrorAdvance::Retry
    }
}

/// The outcome of tracking a (non-mirror) source delivery's `dseq`
/// against [`SourceInfo`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceAdvance {
    Continue { dseq: u64 },
    /// The delivery sequence jumped and no subscription identity was
    /// captured yet: adopt this delivery's consumer as authoritative
    CaptureIdentity { dseq: u64 },
    /// Resume from `si.sseq + 1`
    Retry,
}

#[must_use]
pub fn track_source(info: &SourceInfo, dseq: u64) -> SourceAdvance {
    if dseq == info.dseq + 1 {
        SourceAdvance::Continue { dseq }
    } else if dseq > info.dseq + 1 && info.cname.is_none() {
        SourceAdvance::CaptureIdentity { dseq }
    } else {
        SourceAdvance::Retry
    }
}

/// Redeliveries are always dropped (`AckPolicy=None`/`MaxDeliver=1`
/// means any `delivery_count > 1` is a protocol-level redelivery, not a
/// legitimate resend)
#[must_use]
pub fn is_redelivery(ack: &AckReplyInfo) -> bool {
    ack.delivery_count > 1
}

/// `lag = max(0, pending - 1)` when `pending > 0`, else `0`
#[must_use]
pub fn compute_lag(pending: u64) -> u64 {
    pending.saturating_sub(1)
}

/// The `Nats-Stream-Source` header value written on every message
/// ingested through a (non-mirror) source, preserving origin `(iname,
/// upstream-seq)`
#[must_use]
pub fn stream_source_header_value(iname: &str, upstream_seq: u64) -> String {
    format!("{iname} {upstream_seq}")
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}
