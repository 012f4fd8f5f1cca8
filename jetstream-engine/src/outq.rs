//! The single-producer-multi-enqueuer outbound publish queue.
//!
//! Every component that needs to speak on the wire (publish acks,
//! advisories, source consumer create requests, flow-control replies)
//! enqueues an [`OutMessage`] here instead of writing to a transport
//! directly — the transport itself is out of scope, so [`OutQ`]'s
//! consumer side is a plain channel a caller drains and renders.

use bytes::Bytes;
use jetstream_proto::{headers::HeaderMap, Subject};
use tokio::sync::mpsc;

/// A single outbound publish, pooled to avoid allocating afresh for every
/// ack/advisory/flow-control reply
#[derive(Debug, Clone, Default)]
pub struct OutMessage {
    pub subject: Option<Subject>,
    pub headers: HeaderMap,
    pub payload: Bytes,
}

impl OutMessage {
    /// Reset every field so a pooled instance can't leak state between
    /// uses
    fn reset(&mut self) {
        self.subject = None;
        self.headers.clear();
        self.payload = Bytes::new();
    }
}

/// A bounded pool of reusable [`OutMessage`] buffers
#[derive(Debug, Default)]
pub struct OutMessagePool {
    free: Vec<OutMessage>,
}

impl OutMessagePool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&mut self) -> OutMessage {
        self.free.pop().unwrap_or_default()
    }

    pub fn release(&mut self, mut msg: OutMessage) {
        msg.reset();
        self.free.push(msg);
    }
}

/// The sending half of the outbound queue
#[derive(Debug, Clone)]
pub struct OutQSender(mpsc::Sender<OutMessage>);

impl OutQSender {
    pub async fn send(&self, msg: OutMessage) -> Result<(), OutMessage> {
        self.0.send(msg).await.map_err(|err| err.0)
    }

    #[must_use]
    pub fn try_send(&self, msg: OutMessage) -> Result<(), OutMessage> {
        self.0
            .try_send(msg)
            .map_err(|err| err.into_inner())
    }
}

/// Construct a bounded `OutQ` channel pair: the sender half is cloned
/// freely by every component; the receiver half is drained by the
/// internal loop (or, in tests, by the test harness).
#[must_use]
pub fn channel(capacity: usize) -> (OutQSender, mpsc::Receiver<OutMessage>) {
    let (tx, rx) = mpsc::channel(capacity);
    (OutQSender(tx), rx)
}
