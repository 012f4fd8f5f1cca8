//! Consumer bookkeeping and the ack-driven retention hooks.
//!
//! Consumer internals (delivery, ack-policy enforcement) are out of scope
//!; [`ConsumerHandle`] is the minimal seam the registry needs to test
//! interest and notify delivery, kept intentionally thin.

use std::collections::HashMap;

use jetstream_proto::Subject;

use crate::config::RetentionPolicy;
use crate::store::StoreError;

/// An opaque, registry-assigned consumer identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConsumerId(pub u64);

/// The seam [`ConsumerRegistry`] calls back into; a real consumer
/// delivery loop (out of scope here) implements this
pub trait ConsumerHandle: Send + Sync {
    fn filter_subject(&self) -> Option<&Subject>;
    fn is_direct(&self) -> bool;
    /// Whether this consumer still needs to ack `seq`
    fn needs_ack(&self, seq: u64) -> bool;
    /// Wake the consumer's delivery loop: a new message is available
    fn notify(&self, seq: u64);
}

struct Entry {
    handle: Box<dyn ConsumerHandle>,
}

/// Tracks attached consumers, per-subject filter count and direct-consumer
/// count, and implements the ack-driven retention hooks
#[derive(Default)]
pub struct ConsumerRegistry {
    consumers: HashMap<ConsumerId, Entry>,
    next_id: u64,
    num_filter: usize,
    directs: usize,
}

impl ConsumerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_consumer(&mut self, handle: Box<dyn ConsumerHandle>) -> ConsumerId {
        let id = ConsumerId(self.next_id);
        self.next_id += 1;

        if handle.filter_subject().is_some() {
            self.num_filter += 1;
        }
        if handle.is_direct() {
            self.directs += 1;
        }

        self.consumers.insert(id, Entry { handle });
        id
    }

    pub fn remove_consumer(&mut self, id: ConsumerId) {
        if let Some(entry) = self.consumers.remove(&id) {
            if entry.handle.filter_subject().is_some() {
                self.num_filter -= 1;
            }
            if entry.handle.is_direct() {
                self.directs -= 1;
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.consumers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.consumers.is_empty()
    }

    #[must_use]
    pub fn num_filter(&self) -> usize {
        self.num_filter
    }

    #[must_use]
    pub fn directs(&self) -> usize {
        self.directs
    }

    #[must_use]
    pub fn num_public_consumers(&self) -> usize {
        self.consumers.len() - self.directs
    }

    /// Does any consumer other than `excluding` still have interest in
    /// `subject` at `seq`?
    #[must_use]
    pub fn check_interest(&self, seq: u64, excluding: ConsumerId) -> bool {
        self.consumers
            .iter()
            .any(|(id, entry)| *id != excluding && entry.handle.needs_ack(seq))
    }

    /// Whether any attached, non-direct consumer's filter matches `subject`
    /// (interest-gate test for `Retention = Interest`)
    #[must_use]
    pub fn has_interest_in_subject(&self, subject: &Subject) -> bool {
        self.consumers.values().any(|entry| {
            entry
                .handle
                .filter_subject()
                .map_or(true, |filter| subject_matches(filter, subject))
        })
    }

    /// Signal every attached consumer that `seq` has landed
    pub fn notify_all(&self, seq: u64) {
        for entry in self.consumers.values() {
            entry.handle.notify(seq);
        }
    }

    /// The ack-driven retention hook: decide whether `seq` should
    /// be removed from the store given the stream's retention policy
    pub fn ack_msg(
        &self,
        retention: RetentionPolicy,
        obs: ConsumerId,
        seq: u64,
    ) -> AckOutcome {
        match retention {
            RetentionPolicy::Limits => AckOutcome::Keep,
            RetentionPolicy::WorkQueue => {
                if self.directs == 0 || !self.check_interest(seq, obs) {
                    AckOutcome::Remove
                } else {
                    AckOutcome::Keep
                }
            }
            RetentionPolicy::Interest => {
                if !self.check_interest(seq, obs) {
                    AckOutcome::Remove
                } else {
                    AckOutcome::Keep
                }
            }
        }
    }
}

/// What an `ack_msg` decision implies the caller should do to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    Keep,
    Remove,
}

/// How a store error while honoring an [`AckOutcome::Remove`] should be
/// handled when the store races an ack against a concurrent write: an
/// `EOF`-equivalent ([`StoreError::NotFound`]) is forwarded as a delete
/// proposal when clustered,
#[must_use]
pub fn is_racing_removal(err: &StoreError) -> bool {
    matches!(err, StoreError::NotFound)
}

fn subject_matches(filter: &Subject, subject: &Subject) -> bool {
    let filter_tokens: Vec<&str> = filter.as_str().split('.').collect();
    let subject_tokens: Vec<&str> = subject.as_str().split('.').collect();

    let mut i = 0;
    loop {
        match (filter_tokens.get(i), subject_tokens.get(i)) {
            (Some(&">"), _) => return true,
            (Some(&"*"), Some(_)) => i += 1,
            (Some(f), Some(s)) if f == s => i += 1,
            (Some(_), Some(_)) => return false,
            (None, None) => return true,
            _ => return false,
        }
    }
}
