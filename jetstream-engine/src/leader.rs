//! Leader/follower transitions.
//!
//! `LeaderController` is deliberately thin: it decides *what* must start
//! or stop on a leadership edge and exposes that as data
//! ([`LeadershipTransition`]) rather than reaching into a transport or
//! task-spawning API directly, so it can be unit tested without either.
//! The caller (the stream's lifecycle glue) is responsible for actually
//! installing/removing subscriptions and starting/stopping source tasks
//! from the transition it's handed.

use jetstream_proto::Subject;

use crate::config::{StreamConfig, StreamFeed};

/// What must change on a leadership edge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeadershipTransition {
    pub became_leader: bool,
    /// Subjects to (un)subscribe: populated on becoming leader, emptied
    /// (the caller already knows what it subscribed) on stepping down
    pub subjects: Vec<Subject>,
    /// Whether the cluster sync subscription should be installed (leader)
    /// or torn down (follower)
    pub cluster_sync: bool,
    /// Whether source/mirror consumers should be (re)started (leader) or
    /// cancelled (follower)
    pub sources_active: bool,
    /// Whether `clfs` must be reset: on every leader-epoch change. The
    /// source server resets it in two different places with divergent
    /// semantics; this crate picks "any change"
    pub reset_clfs: bool,
}

/// Decide the [`LeadershipTransition`] implied by moving from
/// `was_leader` to `is_leader`. A same-epoch no-op (`was_leader ==
/// is_leader`) still resets `clfs` if `leader_epoch_changed` is set,
/// matching "on any leader-epoch change, clear".
#[must_use]
pub fn transition(
    config: &StreamConfig,
    was_leader: bool,
    is_leader: bool,
    leader_epoch_changed: bool,
) -> LeadershipTransition {
    let became_leader = is_leader && !was_leader;
    let stepped_down = was_leader && !is_leader;

    LeadershipTransition {
        became_leader,
        subjects: if is_leader {
            config.subjects().to_vec()
        } else {
            Vec::new()
        },
        cluster_sync: is_leader,
        sources_active: is_leader && has_feed(config),
        reset_clfs: became_leader || stepped_down || (is_leader && leader_epoch_changed),
    }
}

fn has_feed(config: &StreamConfig) -> bool {
    match &config.feed {
        StreamFeed::Subjects(_) => false,
        StreamFeed::Mirror(_) | StreamFeed::Sources(_) => true,
    }
}

/// The routing decision for an inbound publish landing on a subject this
/// stream is subscribed to (`processInboundJetStreamMsg`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundRoute {
    /// Not the leader: drop
    Drop,
    /// Sealed: reply with a `StreamSealed` error instead of ingesting
    RejectSealed,
    /// A direct client publish on the leader goes straight to
    /// ingress/consensus
    Direct,
    /// Enqueue onto `msgs` for `InternalLoop` to dispatch
    Enqueue,
}

#[must_use]
pub fn route_inbound(is_leader: bool, sealed: bool, is_direct_client: bool) -> InboundRoute {
    if !is_leader {
        InboundRoute::Drop
    } else if sealed {
        InboundRoute::RejectSealed
    } else if is_direct_client {
        InboundRoute::Direct
    } else {
        InboundRoute::Enqueue
    }
}

#[cfg(test)]
mod tests {
    use jetstream_proto::Subject;

    use super::{route_inbound, transition, InboundRoute};
    use crate::config::{ConfigValidator, StreamConfig};
    use crate::name::StreamName;

    fn config() -> StreamConfig {
        ConfigValidator::normalize(StreamConfig::new(StreamName::from_static("A")), &[]).unwrap()
    }

    #[test]
    fn becoming_leader_subscribes_subjects_and_resets_clfs() {
        let transition = transition(&config(), false, true, false);
        assert!(transition.became_leader);
        assert!(transition.cluster_sync);
        assert!(transition.reset_clfs);
        assert_eq!(transition.subjects, vec![Subject::from_static("A")]);
    }

    #[test]
    fn stepping_down_clears_subjects_and_resets_clfs() {
        let transition = transition(&config(), true, false, false);
        assert!(!transition.became_leader);
        assert!(!transition.cluster_sync);
        assert!(transition.subjects.is_empty());
        assert!(transition.reset_clfs);
    }

    #[test]
    fn stable_leader_without_epoch_change_keeps_clfs() {
        let transition = transition(&config(), true, true, false);
        assert!(!transition.reset_clfs);
    }

    #[test]
    fn follower_drops_inbound() {
        assert_eq!(route_inbound(false, false, false), InboundRoute::Drop);
    }

    #[test]
    fn sealed_leader_rejects() {
        assert_eq!(route_inbound(true, true, false), InboundRoute::RejectSealed);
    }

    #[test]
    fn direct_client_bypasses_queue() {
        assert_eq!(route_inbound(true, false, true), InboundRoute::Direct);
    }
}
