//! Batch queue: buffered requests sent with bounded concurrency.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::debug;

use crate::error::Result;
use crate::request::PendingRequest;
use crate::response::{translate, ApiFailure, ApiResult, Decoders, ResponseType};
use crate::transport::Transport;

/// Handle for a request buffered in queueing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ticket(u64);

impl Ticket {
    /// Submission number, unique per client.
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A buffered request and the type its body decodes to.
#[derive(Debug, Clone)]
pub struct QueuedRequest {
    pub ticket: Ticket,
    pub request: PendingRequest,
    pub response_type: ResponseType,
}

/// FIFO buffer of built requests plus the queueing-mode flag.
#[derive(Debug, Default)]
pub struct BatchQueue {
    active: bool,
    next_ticket: u64,
    entries: VecDeque<QueuedRequest>,
}

impl BatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter queueing mode.
    pub fn start(&mut self) {
        self.active = true;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append a request and hand back its ticket.
    pub fn push(&mut self, request: PendingRequest, response_type: ResponseType) -> Ticket {
        self.next_ticket += 1;
        let ticket = Ticket(self.next_ticket);
        self.entries.push_back(QueuedRequest {
            ticket,
            request,
            response_type,
        });
        ticket
    }

    /// Remove up to `limit` requests from the front (all of them for `None`
    /// or `Some(0)`) and leave queueing mode.
    pub fn drain(&mut self, limit: Option<usize>) -> Vec<QueuedRequest> {
        self.active = false;
        let count = match limit {
            Some(limit) if limit > 0 => limit.min(self.entries.len()),
            _ => self.entries.len(),
        };
        self.entries.drain(..count).collect()
    }
}

/// Send `batch` with at most `concurrency` requests in flight.
///
/// Slots come back in submission order. A connection fault or decode error
/// only affects its own slot.
pub async fn dispatch(
    transport: Arc<dyn Transport>,
    batch: Vec<QueuedRequest>,
    concurrency: usize,
    decoders: &Decoders,
) -> Vec<Result<ApiResult>> {
    if batch.is_empty() {
        return Vec::new();
    }

    debug!(requests = batch.len(), concurrency, "Dispatching batch");

    let outcomes: Vec<_> = stream::iter(batch)
        .map(|queued| {
            let transport = Arc::clone(&transport);
            async move {
                let response = transport.send(queued.request).await;
                (queued.ticket, queued.response_type, response)
            }
        })
        .buffered(concurrency.max(1))
        .collect()
        .await;

    outcomes
        .into_iter()
        .map(|(ticket, response_type, response)| {
            let response = response?;
            if response.is_failure() {
                debug!(%ticket, status = response.status, "Batched request failed");
                return Ok(Err(ApiFailure::from(response)));
            }
            translate(&response.body, &response_type, decoders).map(Ok)
        })
        .collect()
}
