//! Cancellation handles keyed by tab
//!
//! At most one handle exists per tab. A handle is registered when a page
//! opens a channel and removed either by an explicit cancel (which also
//! fires it) or by release on disconnect, whichever comes first.

use crate::relay::port::TabId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

/// The ability to abort one tab's in-flight request
#[derive(Debug, Clone)]
pub struct CancellationHandle {
    token: CancellationToken,
    generation: u64,
    channel: Option<CancellationToken>,
}

impl CancellationHandle {
    /// Token observed by the session
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Whether the handle has fired
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Whether the channel this handle was registered for has closed
    pub fn channel_closed(&self) -> bool {
        self.channel.as_ref().is_some_and(CancellationToken::is_cancelled)
    }
}

/// Registry owned by the relay worker
#[derive(Debug, Default)]
pub struct CancellationRegistry {
    handles: Mutex<HashMap<TabId, CancellationHandle>>,
    generations: AtomicU64,
}

impl CancellationRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    fn handles(&self) -> MutexGuard<'_, HashMap<TabId, CancellationHandle>> {
        // the map holds no invariants a panicking holder could break
        self.handles.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create and store a fresh handle for `tab`
    ///
    /// A handle already stored for the tab is replaced without being
    /// cancelled.
    ///
    /// # Examples
    ///
    /// ```
    /// use relaywiz::relay::CancellationRegistry;
    ///
    /// let registry = CancellationRegistry::new();
    /// let handle = registry.register(3);
    /// registry.cancel(3);
    /// assert!(handle.is_cancelled());
    /// registry.cancel(3); // no-op
    /// ```
    pub fn register(&self, tab: TabId) -> CancellationHandle {
        self.insert(tab, None)
    }

    /// Like [`register`](Self::register), tied to the channel closed by `channel`
    ///
    /// Replacing a handle whose channel already closed is the ordinary
    /// reconnect of a page and is not reported as a warning.
    pub fn register_channel(&self, tab: TabId, channel: CancellationToken) -> CancellationHandle {
        self.insert(tab, Some(channel))
    }

    fn insert(&self, tab: TabId, channel: Option<CancellationToken>) -> CancellationHandle {
        let handle = CancellationHandle {
            token: CancellationToken::new(),
            generation: self.generations.fetch_add(1, Ordering::Relaxed),
            channel,
        };
        match self.handles().insert(tab, handle.clone()) {
            Some(previous) if previous.channel_closed() => {
                tracing::debug!(tab, "Replacing handle of a closed channel");
            }
            Some(_) => {
                tracing::warn!(tab, "Replacing live cancellation handle without cancelling it");
            }
            None => {}
        }
        handle
    }

    /// Fire and remove the handle for `tab`, if any
    pub fn cancel(&self, tab: TabId) {
        match self.handles().remove(&tab) {
            Some(handle) => {
                tracing::debug!(tab, "Cancelling in-flight request");
                handle.token.cancel();
            }
            None => tracing::trace!(tab, "No handle to cancel"),
        }
    }

    /// Fire `handle` and remove it if it is still the one stored for `tab`
    pub fn cancel_handle(&self, tab: TabId, handle: &CancellationHandle) {
        handle.token.cancel();
        self.release_handle(tab, handle);
        tracing::debug!(tab, "Cancelled in-flight request");
    }

    /// Remove the handle for `tab` without firing it
    pub fn release(&self, tab: TabId) {
        if self.handles().remove(&tab).is_some() {
            tracing::debug!(tab, "Released cancellation handle");
        }
    }

    /// Remove the handle for `tab` only if it is still `handle`
    ///
    /// A channel closing after a newer one registered for the same tab
    /// leaves the newer handle in place.
    pub fn release_handle(&self, tab: TabId, handle: &CancellationHandle) {
        let mut handles = self.handles();
        if handles
            .get(&tab)
            .is_some_and(|current| current.generation == handle.generation)
        {
            handles.remove(&tab);
            tracing::debug!(tab, "Released cancellation handle");
        }
    }

    /// Whether `tab` has a handle
    pub fn contains(&self, tab: TabId) -> bool {
        self.handles().contains_key(&tab)
    }

    /// Number of tabs with a handle
    pub fn len(&self) -> usize {
        self.handles().len()
    }

    /// Whether no tab has a handle
    pub fn is_empty(&self) -> bool {
        self.handles().is_empty()
    }
}
