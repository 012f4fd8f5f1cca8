use bytes::Bytes;

use crate::{headers::HeaderMap, Subject};

/// The envelope of a message flowing through the ingress pipeline
///
/// Carries everything a publish needs other than the sequencing metadata
/// (`seq`, `ts`) that the store or the replication layer assign to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageBase {
    pub subject: Subject,
    pub reply_subject: Option<Subject>,
    pub headers: HeaderMap,
    pub payload: Bytes,
}
