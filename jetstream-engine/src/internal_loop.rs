//! The internal loop: the sole writer task that drains the
//! outbound queue, the inbound publish queue and the ack queue.
//!
//! Single-writer discipline: `RuntimeState` (sequence counters,
//! dedupe, the store) is owned by this task alone. Every other component
//! — source tasks, the leader controller, consumer delivery — reaches it
//! only by sending onto one of the three channels this loop drains.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant as TokioInstant;
use tracing::{debug, error, warn};

use crate::ingress::{self, IngressRequest, RuntimeState};
use crate::outq::OutMessage;
use crate::registry::{is_racing_removal, AckOutcome, ConsumerId};
use crate::replication::ReplicationAdapter;

/// The seam a rendered [`OutMessage`] is handed off to; actually framing
/// and writing to a connection is the transport's job
#[async_trait]
pub trait OutboundSink: Send + Sync + 'static {
    async fn send(&self, message: OutMessage);
}

/// A consumer ack arriving at the ack-driven retention hook
#[derive(Debug, Clone, Copy)]
pub struct AckRequest {
    pub consumer: ConsumerId,
    pub seq: u64,
}

/// Everything [`run`] needs to drain the three queues for one stream
pub struct InternalLoop<Sink: OutboundSink> {
    pub state: RuntimeState,
    pub replication: Option<Arc<ReplicationAdapter>>,
    pub sink: Sink,
    pub outq_rx: mpsc::Receiver<OutMessage>,
    pub msgs_rx: mpsc::Receiver<IngressRequest>,
    pub ack_rx: mpsc::Receiver<AckRequest>,
    pub quit_rx: mpsc::Receiver<()>,
}

impl<Sink: OutboundSink> InternalLoop<Sink> {
    /// Drain the three queues until `quit` fires ("terminates on
    /// stream quit or server shutdown"). A queue whose sender half has been
    /// dropped is parked rather than re-polled in a tight loop: only the
    /// `quit` channel closing is treated as a shutdown signal.
    pub async fn run(mut self) {
        let mut outq_rx = Some(self.outq_rx);
        let mut msgs_rx = Some(self.msgs_rx);
        let mut ack_rx = Some(self.ack_rx);

        let mut next_evict = self.state.dedupe.evict(Instant::now()).map(|wait| Instant::now() + wait);

        loop {
            tokio::select! {
                biased;

                _ = self.quit_rx.recv() => {
                    debug!("internal loop quit");
                    return;
                }
                () = next_eviction_tick(next_evict) => {
                    next_evict = self.state.dedupe.evict(Instant::now()).map(|wait| Instant::now() + wait);
                }
                message = recv_next(&mut outq_rx) => {
                    if let Some(message) = message {
                        self.sink.send(message).await;
                    }
                }
                request = recv_next(&mut msgs_rx) => {
                    if let Some(request) = request {
                        self.dispatch_ingress(request).await;
                        if next_evict.is_none() {
                            next_evict = self.state.dedupe.evict(Instant::now()).map(|wait| Instant::now() + wait);
                        }
                    }
                }
                ack = recv_next(&mut ack_rx) => {
                    if let Some(ack) = ack {
                        self.handle_ack(ack).await;
                    }
                }
            }
        }
    }

    async fn dispatch_ingress(&mut self, request: IngressRequest) {
        match &self.replication {
            Some(replication) if replication.is_leader() && request.proposed_lseq.is_none() => {
                let pre_seq = self.state.lseq + self.state.clfs;
                if let Err(err) = replication
                    .propose_message(
                        request.subject,
                        request.headers,
                        request.payload,
                        pre_seq,
                        request.timestamp_nanos,
                    )
                    .await
                {
                    warn!(%err, "propose failed, stepping down");
                    replication.step_down().await;
                }
            }
            _ => match ingress::process(&mut self.state, request).await {
                Ok(ack) => debug!(seq = ack.seq, duplicate = ack.duplicate, "published"),
                Err(err) => debug!(code = %err.code, "publish rejected"),
            },
        }
    }

    async fn handle_ack(&mut self, ack: AckRequest) {
        match self.state.registry.ack_msg(self.state.retention, ack.consumer, ack.seq) {
            AckOutcome::Keep => {}
            AckOutcome::Remove => {
                if let Err(err) = self.state.store.remove_msg(ack.seq).await {
                    if is_racing_removal(&err) {
                        if let Some(replication) = &self.replication {
                            if replication.is_leader() {
                                if let Err(err) = replication.propose_delete(ack.seq).await {
                                    error!(%err, seq = ack.seq, "forwarding delete proposal failed");
                                }
                            }
                        }
                    } else {
                        error!(%err, seq = ack.seq, "ack-driven removal failed");
                    }
                }
            }
        }
    }
}

/// Await the next item from `rx`, parking forever once it's been drained
/// and closed instead of returning `None` repeatedly (which would make the
/// enclosing `select!` spin)
async fn recv_next<T>(rx: &mut Option<mpsc::Receiver<T>>) -> Option<T> {
    match rx {
        Some(receiver) => {
            let item = receiver.recv().await;
            if item.is_none() {
                *rx = None;
            }
            item
        }
        None => std::future::pending().await,
    }
}

/// Await the dedupe map's next eviction deadline, parking forever once
/// the map is empty rather than spinning the eviction timer with nothing
/// to do
async fn next_eviction_tick(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(TokioInstant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}
