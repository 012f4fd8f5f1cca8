//! Stream configuration: canonical shape, defaults and validation.
//!
//! [`StreamConfig`] is the wire-level shape a caller supplies (with zero
//! values meaning "use the default"); [`ConfigValidator`] turns it into a
//! normalized, invariant-checked value that the rest of the engine can
//! trust without re-checking.

use std::time::Duration;

use chrono::{DateTime, Utc};
use jetstream_proto::Subject;

use crate::error::ConfigError;
use crate::name::StreamName;

/// Server-wide ceiling applied to the per-stream `duplicates` window
///
/// Stands in for the account/server tier limit the original system reads
/// from its own configuration; the engine only needs a ceiling to clamp
/// against, not the whole account-tier model.
pub const SERVER_DUPLICATE_WINDOW_LIMIT: Duration = Duration::from_secs(2 * 60 * 60);

const DEFAULT_DUPLICATE_WINDOW: Duration = Duration::from_secs(2 * 60);
const UNLIMITED: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Storage {
    #[default]
    File,
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetentionPolicy {
    #[default]
    Limits,
    Interest,
    WorkQueue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscardPolicy {
    #[default]
    Old,
    New,
}

/// A single federation source: an upstream stream whose messages are
/// merged into this one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSource {
    pub name: StreamName,
    pub filter_subject: Option<Subject>,
    pub opt_start_seq: Option<u64>,
    pub opt_start_time: Option<DateTime<Utc>>,
    /// Present for cross-account/external sources
    pub api_prefix: Option<String>,
    pub deliver_prefix: Option<String>,
}

impl StreamSource {
    /// The stable key used to identify this source across restarts:
    /// its plain name, or `name:hash(api_prefix)` when external
    #[must_use]
    pub fn indexed_name(&self) -> String {
        match &self.api_prefix {
            None => self.name.to_string(),
            Some(prefix) => {
                use std::hash::{Hash, Hasher};
                let mut hasher = std::collections::hash_map::DefaultHasher::new();
                prefix.hash(&mut hasher);
                format!("{}:{:016x}", self.name, hasher.finish())
            }
        }
    }
}

/// A 1:1 replica of a single upstream stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamMirror {
    pub name: StreamName,
    pub opt_start_seq: Option<u64>,
    pub opt_start_time: Option<DateTime<Utc>>,
    pub api_prefix: Option<String>,
    pub deliver_prefix: Option<String>,
}

/// How a stream is fed: its own subjects, a mirror, or N-way sources
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFeed {
    Subjects(Vec<Subject>),
    Mirror(Box<StreamMirror>),
    Sources(Vec<StreamSource>),
}

/// Caller-supplied stream configuration
///
/// Fields left at their zero value are filled in by
/// [`ConfigValidator::normalize`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    pub name: StreamName,
    pub feed: StreamFeed,
    pub retention: RetentionPolicy,
    pub discard: DiscardPolicy,
    pub storage: Storage,
    pub replicas: usize,
    pub max_msgs: i64,
    pub max_bytes: i64,
    pub max_age: Duration,
    pub max_msgs_per_subject: i64,
    pub max_msg_size: i64,
    pub max_consumers: i64,
    pub duplicates: Duration,
    pub sealed: bool,
    pub deny_delete: bool,
    pub deny_purge: bool,
    pub allow_rollup: bool,
    pub template: Option<String>,
}

impl StreamConfig {
    /// Construct a minimal config for `name`, publishing on `name` itself
    ///
    /// Every other field is left at its zero value for
    /// [`ConfigValidator::normalize`] to fill in.
    #[must_use]
    pub fn new(name: StreamName) -> Self {
        Self {
            feed: StreamFeed::Subjects(Vec::new()),
            retention: RetentionPolicy::Limits,
            discard: DiscardPolicy::Old,
            storage: Storage::File,
            replicas: 0,
            max_msgs: 0,
            max_bytes: 0,
            max_age: Duration::ZERO,
            max_msgs_per_subject: 0,
            max_msg_size: 0,
            max_consumers: 0,
            duplicates: Duration::ZERO,
            sealed: false,
            deny_delete: false,
            deny_purge: false,
            allow_rollup: false,
            template: None,
            name,
        }
    }

    #[must_use]
    pub fn subjects(&self) -> &[Subject] {
        match &self.feed {
            StreamFeed::Subjects(subjects) => subjects,
            StreamFeed::Mirror(_) | StreamFeed::Sources(_) => &[],
        }
    }
}

/// Normalizes and validates [`StreamConfig`]
pub struct ConfigValidator;

impl ConfigValidator {
    /// Apply defaults and enforce create-time invariants
    ///
    /// `other_stream_subjects` is every subject claimed by every other
    /// stream already present in the account, used for the cross-stream
    /// overlap check.
    pub fn normalize(
        mut config: StreamConfig,
        other_stream_subjects: &[Subject],
    ) -> Result<StreamConfig, ConfigError> {
        if config.replicas > 5 {
            return Err(ConfigError::InvalidReplicas);
        }
        if config.replicas == 0 {
            config.replicas = 1;
        }

        if config.max_msgs == 0 {
            config.max_msgs = UNLIMITED;
        }
        if config.max_bytes == 0 {
            config.max_bytes = UNLIMITED;
        }
        if config.max_msg_size == 0 {
            config.max_msg_size = UNLIMITED;
        }
        if config.max_msgs_per_subject == 0 {
            config.max_msgs_per_subject = UNLIMITED;
        }
        if config.max_consumers == 0 {
            config.max_consumers = UNLIMITED;
        }

        if config.duplicates == Duration::ZERO {
            config.duplicates = DEFAULT_DUPLICATE_WINDOW.min(SERVER_DUPLICATE_WINDOW_LIMIT);
            if config.max_age > Duration::ZERO {
                config.duplicates = config.duplicates.min(config.max_age);
            }
        }
        if config.duplicates > SERVER_DUPLICATE_WINDOW_LIMIT {
            return Err(ConfigError::InvalidDuplicatesWindow);
        }
        if config.max_age > Duration::ZERO && config.duplicates > config.max_age {
            return Err(ConfigError::InvalidDuplicatesWindow);
        }

        if config.deny_purge && config.allow_rollup {
            return Err(ConfigError::DenyPurgeWithRollup);
        }

        if matches!(&config.feed, StreamFeed::Subjects(subjects) if subjects.is_empty()) {
            config.feed = StreamFeed::Subjects(vec![config.name_as_subject()?]);
        }

        match &config.feed {
            StreamFeed::Subjects(subjects) => {
                Self::validate_subjects(subjects, other_stream_subjects)?;
            }
            StreamFeed::Mirror(mirror) => {
                if mirror.opt_start_seq.is_some() && mirror.opt_start_time.is_some() {
                    return Err(ConfigError::MirrorAmbiguousStart);
                }
            }
            StreamFeed::Sources(sources) => {
                let mut seen = std::collections::HashSet::new();
                for source in sources {
                    if !seen.insert(source.indexed_name()) {
                        return Err(ConfigError::DuplicateSourceName(source.indexed_name()));
                    }
                }
            }
        }

        if config.sealed {
            config.max_age = Duration::ZERO;
            config.discard = DiscardPolicy::New;
            config.deny_delete = true;
            config.deny_purge = true;
            config.allow_rollup = false;
        }

        Ok(config)
    }

    /// Enforce update-time immutability and one-way transitions on top of
    /// [`ConfigValidator::normalize`]
    pub fn check_update(
        current: &StreamConfig,
        proposed: StreamConfig,
        other_stream_subjects: &[Subject],
    ) -> Result<StreamConfig, ConfigError> {
        let proposed = Self::normalize(proposed, other_stream_subjects)?;

        if proposed.name != current.name {
            return Err(ConfigError::ImmutableField("name"));
        }
        if proposed.max_consumers != current.max_consumers {
            return Err(ConfigError::ImmutableField("max_consumers"));
        }
        if proposed.storage != current.storage {
            return Err(ConfigError::ImmutableField("storage"));
        }
        if proposed.retention != current.retention {
            return Err(ConfigError::ImmutableField("retention"));
        }
        if proposed.template != current.template {
            return Err(ConfigError::ImmutableField("template"));
        }
        if current.sealed && !proposed.sealed {
            return Err(ConfigError::OneWayTransition("sealed"));
        }
        if current.deny_delete && !proposed.deny_delete {
            return Err(ConfigError::OneWayTransition("deny_delete"));
        }
        if current.deny_purge && !proposed.deny_purge {
            return Err(ConfigError::OneWayTransition("deny_purge"));
        }

        Ok(proposed)
    }

    fn validate_subjects(
        subjects: &[Subject],
        other_stream_subjects: &[Subject],
    ) -> Result<(), ConfigError> {
        let reserved = Subject::from_static("$JS.API.>");
        let mut seen = std::collections::HashSet::new();
        for subject in subjects {
            if !seen.insert(subject.as_str()) {
                return Err(ConfigError::DuplicateSubject(subject.clone()));
            }
            if subject_overlaps(subject, &reserved) {
                return Err(ConfigError::ReservedSubjectOverlap(subject.clone()));
            }
            for other in other_stream_subjects {
                if subject_overlaps(subject, other) {
                    return Err(ConfigError::SubjectClaimedByOtherStream(subject.clone()));
                }
            }
        }
        Ok(())
    }
}

impl StreamConfig {
    fn name_as_subject(&self) -> Result<Subject, ConfigError> {
        Subject::try_from(bytestring::ByteString::from(self.name.as_str()))
            .map_err(ConfigError::InvalidSubject)
    }
}

/// Whether `a` and `b` describe overlapping subject sets, accounting for
/// `*`/`>` wildcards in either direction
fn subject_overlaps(a: &Subject, b: &Subject) -> bool {
    let a_tokens: Vec<&str> = a.as_str().split('.').collect();
    let b_tokens: Vec<&str> = b.as_str().split('.').collect();

    let mut i = 0;
    loop {
        match (a_tokens.get(i), b_tokens.get(i)) {
            (Some(&">"), _) | (_, Some(&">")) => return true,
            (Some(x), Some(y)) if *x == "*" || *y == "*" || x == y => {
                i += 1;
            }
            (Some(_), Some(_)) => return false,
            (None, None) => return true,
            (None, Some(_)) | (Some(_), None) => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigValidator, StreamConfig, StreamFeed};
    use claims::assert_matches;

    use crate::error::ConfigError;
    use crate::name::StreamName;

    fn config(name: &str) -> StreamConfig {
        StreamConfig::new(StreamName::from_static(name))
    }

    #[test]
    fn defaults_subjects_to_name_when_unset() {
        let normalized = ConfigValidator::normalize(config("A"), &[]).unwrap();
        assert_eq!(normalized.subjects(), &[jetstream_proto::Subject::from_static("A")]);
        assert_eq!(normalized.replicas, 1);
        assert_eq!(normalized.max_msgs, -1);
    }

    #[test]
    fn rejects_deny_purge_with_rollup() {
        let mut cfg = config("A");
        cfg.deny_purge = true;
        cfg.allow_rollup = true;
        assert_matches!(
            ConfigValidator::normalize(cfg, &[]),
            Err(ConfigError::DenyPurgeWithRollup)
        );
    }

    #[test]
    fn rejects_subject_overlap_with_reserved_namespace() {
        let mut cfg = config("A");
        cfg.feed = StreamFeed::Subjects(vec![jetstream_proto::Subject::from_static(
            "$JS.API.STREAM.CREATE.A",
        )]);
        assert_matches!(
            ConfigValidator::normalize(cfg, &[]),
            Err(ConfigError::ReservedSubjectOverlap(_))
        );
    }

    #[test]
    fn sealed_forces_immutability_flags() {
        let mut cfg = config("A");
        cfg.sealed = true;
        let normalized = ConfigValidator::normalize(cfg, &[]).unwrap();
        assert!(normalized.deny_delete);
        assert!(normalized.deny_purge);
        assert!(!normalized.allow_rollup);
    }

    #[test]
    fn update_rejects_storage_change() {
        let current = ConfigValidator::normalize(config("A"), &[]).unwrap();
        let mut proposed = current.clone();
        proposed.storage = super::Storage::Memory;
        assert_matches!(
            ConfigValidator::check_update(&current, proposed, &[]),
            Err(ConfigError::ImmutableField("storage"))
        );
    }

    #[test]
    fn update_rejects_sealed_rollback() {
        let mut cfg = config("A");
        cfg.sealed = true;
        let current = ConfigValidator::normalize(cfg, &[]).unwrap();
        let mut proposed = current.clone();
        proposed.sealed = false;
        assert_matches!(
            ConfigValidator::check_update(&current, proposed, &[]),
            Err(ConfigError::OneWayTransition("sealed"))
        );
    }
}
