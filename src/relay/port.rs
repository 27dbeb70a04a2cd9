//! Named duplex channel between one page and the relay worker
//!
//! A channel has two ends: the [`PagePort`] held by the page agent and the
//! [`WorkerPort`] held by the worker. Messages are delivered in order.
//! Either side may disconnect; the other side observes it as the end of
//! its receive stream.

use crate::error::{Result, RelaywizError};
use crate::relay::protocol::{PageRequest, Reply};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Identifier of the browser tab that owns a channel
pub type TabId = u64;

/// Create a connected pair of channel ends
pub fn channel(name: impl Into<String>, tab_id: TabId) -> (PagePort, WorkerPort) {
    let name: Arc<str> = Arc::from(name.into());
    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let (reply_tx, reply_rx) = mpsc::unbounded_channel();
    let closed = CancellationToken::new();

    let page = PagePort {
        name: Arc::clone(&name),
        tab_id,
        requests: request_tx,
        replies: reply_rx,
        closed: closed.clone(),
    };
    let worker = WorkerPort {
        tab_id,
        requests: request_rx,
        sender: ReplySender {
            port_name: name,
            tx: reply_tx,
            closed,
        },
    };
    (page, worker)
}

/// Cloneable handle for posting replies to a page
#[derive(Debug, Clone)]
pub struct ReplySender {
    port_name: Arc<str>,
    tx: mpsc::UnboundedSender<Reply>,
    closed: CancellationToken,
}

impl ReplySender {
    /// Name of the channel
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Post a reply; returns `false` once the channel is closed
    pub fn send(&self, reply: Reply) -> bool {
        if self.closed.is_cancelled() {
            return false;
        }
        self.tx.send(reply).is_ok()
    }

    /// Close the channel from the worker side
    pub fn disconnect(&self) {
        tracing::debug!(port = %self.port_name, "Worker disconnecting channel");
        self.closed.cancel();
    }

    /// Whether either side has closed the channel
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.tx.is_closed()
    }

    /// Token fired when either side disconnects
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }
}

/// Worker end of a channel
#[derive(Debug)]
pub struct WorkerPort {
    tab_id: TabId,
    requests: mpsc::UnboundedReceiver<PageRequest>,
    sender: ReplySender,
}

impl WorkerPort {
    /// Channel name
    pub fn name(&self) -> &str {
        self.sender.port_name()
    }

    /// Owning tab
    pub fn tab_id(&self) -> TabId {
        self.tab_id
    }

    /// Reply handle for this channel
    pub fn sender(&self) -> ReplySender {
        self.sender.clone()
    }

    /// Next request; `None` once either side disconnected
    ///
    /// Requests posted before the page disconnected are still delivered.
    pub async fn recv(&mut self) -> Option<PageRequest> {
        if let Ok(request) = self.requests.try_recv() {
            return Some(request);
        }
        tokio::select! {
            biased;
            _ = self.sender.closed.cancelled() => None,
            request = self.requests.recv() => request,
        }
    }
}

/// Page end of a channel
///
/// Dropping it disconnects the channel.
#[derive(Debug)]
pub struct PagePort {
    name: Arc<str>,
    tab_id: TabId,
    requests: mpsc::UnboundedSender<PageRequest>,
    replies: mpsc::UnboundedReceiver<Reply>,
    closed: CancellationToken,
}

impl PagePort {
    /// Channel name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Owning tab
    pub fn tab_id(&self) -> TabId {
        self.tab_id
    }

    /// Post a request to the worker
    ///
    /// # Errors
    ///
    /// Returns `RelaywizError::Channel` when the channel is closed
    pub fn post(&self, request: PageRequest) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(RelaywizError::Channel(format!("{} is disconnected", self.name)).into());
        }
        self.requests
            .send(request)
            .map_err(|_| RelaywizError::Channel(format!("{} is disconnected", self.name)).into())
    }

    /// Next reply; queued replies are drained before a disconnect is reported
    pub async fn recv(&mut self) -> Option<Reply> {
        tokio::select! {
            biased;
            reply = self.replies.recv() => reply,
            _ = self.closed.cancelled() => self.replies.try_recv().ok(),
        }
    }

    /// Next reply if one is already queued
    pub fn try_recv(&mut self) -> Option<Reply> {
        self.replies.try_recv().ok()
    }

    /// Whether the channel has been closed
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

impl Drop for PagePort {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}
