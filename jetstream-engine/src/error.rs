use std::fmt;

/// Stable, wire-serializable error identity
///
/// Mirrors the error kinds enumerated for the ack JSON and advisory
/// payloads. Cheap to copy and to compare; the richer context (source
/// errors, offending values) lives on [`EngineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidStreamName,
    SubjectOverlap,
    MirrorWithSubjectsOrSources,
    InvalidReplicas,
    InvalidConfigUpdate,
    StreamNameMismatch,
    StreamWrongLastSequence,
    StreamWrongLastMsgId,
    StreamWrongLastSubjectSequence,
    StreamRollupDenied,
    StreamSealed,
    MaximumMessagesExceeded,
    MaximumBytesExceeded,
    MaximumMessagesPerSubjectExceeded,
    MessageTooLarge,
    HeaderTooLarge,
    InsufficientResources,
    StorageError,
    SourceSetupFailed,
    SourceTimeout,
    RestorePathTraversal,
    RestoreNameMismatch,
    RestoreMissingMetadata,
    StreamNameAlreadyInUse,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_value(self).unwrap_or_default();
        write!(f, "{}", json.as_str().unwrap_or("unknown_error"))
    }
}

/// An engine-level failure, either rejecting a publish or a lifecycle call
#[derive(Debug, thiserror::Error)]
#[error("{code}")]
pub struct EngineError {
    pub code: ErrorCode,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl EngineError {
    #[must_use]
    pub fn new(code: ErrorCode) -> Self {
        Self { code, source: None }
    }

    #[must_use]
    pub fn with_source(
        code: ErrorCode,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            code,
            source: Some(Box::new(source)),
        }
    }
}

/// Errors raised while normalizing or validating a [`crate::config::StreamConfig`]
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid stream name")]
    InvalidName(#[from] crate::name::StreamNameError),
    #[error("replicas must be in 1..=5")]
    InvalidReplicas,
    #[error("duplicates window must be >= 0 and <= max_age when max_age is set")]
    InvalidDuplicatesWindow,
    #[error("deny_purge and allow_rollup are mutually exclusive")]
    DenyPurgeWithRollup,
    #[error("exactly one of subjects, mirror or sources must be populated")]
    AmbiguousSource,
    #[error("a mirror cannot declare subjects, sources or a filter_subject")]
    MirrorWithExtras,
    #[error("mirror opt_start_seq and opt_start_time are mutually exclusive")]
    MirrorAmbiguousStart,
    #[error("duplicate subject {0:?} in config")]
    DuplicateSubject(jetstream_proto::Subject),
    #[error("invalid subject in config: {0}")]
    InvalidSubject(#[from] jetstream_proto::error::SubjectValidateError),
    #[error("subject {0:?} overlaps the reserved $JS.API.> namespace")]
    ReservedSubjectOverlap(jetstream_proto::Subject),
    #[error("subject {0:?} is already claimed by another stream in this account")]
    SubjectClaimedByOtherStream(jetstream_proto::Subject),
    #[error("field {0} is immutable after stream creation")]
    ImmutableField(&'static str),
    #[error("field {0} can only transition false -> true")]
    OneWayTransition(&'static str),
    #[error("source {0:?} has a duplicate indexed name")]
    DuplicateSourceName(String),
}
