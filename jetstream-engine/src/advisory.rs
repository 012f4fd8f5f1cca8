//! Create/update/delete advisory events.
//!
//! An advisory is just another outbound publish: [`AdvisoryEmitter`] renders
//! the JSON payload and the stable `$JS.EVENT.ADVISORY.STREAM.<ACTION>.<name>`
//! subject, then hands it to the [`crate::outq::OutQSender`] like any other
//! component that needs to speak on the wire.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use jetstream_proto::{headers::HeaderMap, Subject};
use serde::Serialize;

use crate::outq::{OutMessage, OutQSender};

/// The action an advisory reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvisoryAction {
    Created,
    Updated,
    Deleted,
}

impl AdvisoryAction {
    fn subject_token(self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Updated => "UPDATED",
            Self::Deleted => "DELETED",
        }
    }
}

/// The JSON body carried by every stream advisory
#[derive(Debug, Clone, Serialize)]
pub struct StreamAdvisory<'a> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub id: String,
    pub time: DateTime<Utc>,
    pub stream: &'a str,
    pub action: AdvisoryAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<&'a str>,
}

/// Emits create/update/delete advisories for a single stream
pub struct AdvisoryEmitter {
    stream_name: String,
    domain: Option<String>,
    outq: OutQSender,
}

impl AdvisoryEmitter {
    #[must_use]
    pub fn new(stream_name: String, domain: Option<String>, outq: OutQSender) -> Self {
        Self {
            stream_name,
            domain,
            outq,
        }
    }

    pub async fn emit(&self, action: AdvisoryAction, template: Option<&str>, now: DateTime<Utc>) {
        let advisory = StreamAdvisory {
            kind: "io.nats.jetstream.advisory.v1.stream_action",
            id: nuid::next(),
            time: now,
            stream: &self.stream_name,
            action,
            template,
            domain: self.domain.as_deref(),
        };

        let Ok(payload) = serde_json::to_vec(&advisory) else {
            return;
        };

        let subject = Subject::from_dangerous_value(
            format!(
                "$JS.EVENT.ADVISORY.STREAM.{}.{}",
                action.subject_token(),
                self.stream_name
            )
            .into(),
        );

        let message = OutMessage {
            subject: Some(subject),
            headers: HeaderMap::new(),
            payload: Bytes::from(payload),
        };

        let _ = self.outq.send(message).await;
    }
}
