//! Viewer Registry - Per-Session Output Fan-Out
//!
//! Every session owns one `ViewerRegistry` holding the output channels of the
//! viewers currently attached to it. Completed sentences are broadcast to all
//! of them; a viewer whose channel is gone is detached on the spot without
//! disturbing the others.
//!
//! # Architecture
//!
//! ```text
//!                       ViewerRegistry (session "abc")
//!                     ┌───────────────────────────────────┐
//!                     │ HashMap<ViewerId, ViewerHandle>   │
//!                     │   - wrapped in Arc<RwLock<>>      │
//!                     └────────────────┬──────────────────┘
//!                                      │ broadcast(["I'm fine."])
//!              ┌───────────────────────┼───────────────────────┐
//!              │                       │                       │
//!       ┌──────▼──────┐        ┌───────▼──────┐        ┌───────▼──────┐
//!       │  viewer-1   │        │   viewer-2   │        │   viewer-3   │
//!       │  SSE conn   │        │   SSE conn   │        │   (closed)   │
//!       └─────────────┘        └──────────────┘        └──────────────┘
//!                                                        auto-detached
//! ```
//!
//! # Thread Safety
//!
//! Broadcast clones the senders under a read lock and writes outside it, so
//! attach and detach never wait on a slow viewer. Failed viewers are removed
//! afterwards under a short write lock.

use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::RelayError;
use crate::messages::SessionId;

/// Unique identifier for an attached viewer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ViewerId(String);

impl ViewerId {
    /// Create a new unique viewer ID
    #[must_use]
    pub fn new() -> Self {
        Self(format!("viewer-{}", uuid::Uuid::new_v4()))
    }

    /// Borrow the raw identifier
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ViewerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ViewerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Handle to an attached viewer
#[derive(Debug, Clone)]
pub struct ViewerHandle {
    /// Unique viewer identifier
    pub id: ViewerId,
    /// Session the viewer watches
    pub session_id: SessionId,
    /// Channel carrying text frames to the viewer
    pub tx: mpsc::Sender<String>,
    /// When the viewer attached
    pub attached_at: std::time::Instant,
}

impl ViewerHandle {
    /// Create a handle with a fresh ID
    #[must_use]
    pub fn new(session_id: SessionId, tx: mpsc::Sender<String>) -> Self {
        Self {
            id: ViewerId::new(),
            session_id,
            tx,
            attached_at: std::time::Instant::now(),
        }
    }

    /// How long the viewer has been attached
    #[must_use]
    pub fn attached_for(&self) -> std::time::Duration {
        self.attached_at.elapsed()
    }

    /// Check if the viewer channel is still open
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Result of a broadcast operation
#[derive(Debug, Clone, Default)]
pub struct BroadcastResult {
    /// Number of viewers that received the frame
    pub successful: usize,
    /// Number of viewers that failed and were detached
    pub failed: usize,
    /// IDs of viewers that failed
    pub failed_ids: Vec<ViewerId>,
}

impl BroadcastResult {
    /// Check if all recipients received the frame
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }
}

/// Registry of viewers attached to one session
///
/// Cloning yields another handle to the same set.
#[derive(Clone)]
pub struct ViewerRegistry {
    session_id: SessionId,
    inner: Arc<RwLock<HashMap<ViewerId, ViewerHandle>>>,
}

impl ViewerRegistry {
    /// Create an empty registry for a session
    #[must_use]
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Session this registry belongs to
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Attach a viewer
    ///
    /// Returns the viewer's ID.
    pub fn attach(&self, handle: ViewerHandle) -> ViewerId {
        let id = handle.id.clone();
        if handle.session_id != self.session_id {
            tracing::warn!(
                viewer_id = %id,
                session_id = %self.session_id,
                handle_session = %handle.session_id,
                "Viewer handle names a different session"
            );
        }
        self.inner.write().insert(id.clone(), handle);
        tracing::info!(
            viewer_id = %id,
            session_id = %self.session_id,
            "Viewer attached"
        );
        id
    }

    /// Detach a viewer
    ///
    /// Detaching an unknown or already detached viewer is a no-op.
    pub fn detach(&self, id: &ViewerId) -> Option<ViewerHandle> {
        let handle = self.inner.write().remove(id);
        if let Some(ref handle) = handle {
            tracing::info!(
                viewer_id = %id,
                session_id = %self.session_id,
                attached_ms = handle.attached_for().as_millis(),
                "Viewer detached"
            );
        }
        handle
    }

    /// Create a channel, attach its sending side and return the receiving side
    ///
    /// The subscription detaches itself when dropped.
    #[must_use]
    pub fn subscribe(&self, capacity: usize) -> ViewerSubscription {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let id = self.attach(ViewerHandle::new(self.session_id.clone(), tx));
        ViewerSubscription {
            id,
            rx,
            registry: self.clone(),
        }
    }

    /// Send sentences to every attached viewer as one newline-joined frame
    ///
    /// Uses `try_send` so a slow viewer never stalls the stream. Viewers whose
    /// channel is closed or full are logged and detached; the remaining
    /// viewers still receive the frame. An empty list sends nothing.
    pub fn broadcast(&self, sentences: &[String]) -> BroadcastResult {
        if sentences.is_empty() {
            return BroadcastResult::default();
        }
        let frame = sentences.join("\n");

        // Collect senders to avoid holding the lock while writing
        let targets: Vec<(ViewerId, mpsc::Sender<String>)> = {
            let inner = self.inner.read();
            inner
                .iter()
                .map(|(id, h)| (id.clone(), h.tx.clone()))
                .collect()
        };

        let mut result = BroadcastResult::default();
        for (id, tx) in targets {
            match tx.try_send(frame.clone()) {
                Ok(()) => result.successful += 1,
                Err(e) => {
                    let reason = match e {
                        TrySendError::Full(_) => "channel full",
                        TrySendError::Closed(_) => "channel closed",
                    };
                    let error = RelayError::ViewerWriteFailure {
                        viewer: id.clone(),
                        reason: reason.to_string(),
                    };
                    tracing::warn!(
                        viewer_id = %id,
                        session_id = %self.session_id,
                        error = %error,
                        "Detaching viewer after failed write"
                    );
                    result.failed += 1;
                    result.failed_ids.push(id);
                }
            }
        }

        if !result.failed_ids.is_empty() {
            let mut inner = self.inner.write();
            for id in &result.failed_ids {
                if let Some(handle) = inner.remove(id) {
                    tracing::debug!(
                        viewer_id = %id,
                        attached_ms = handle.attached_for().as_millis(),
                        "Failed viewer removed"
                    );
                }
            }
        }

        tracing::debug!(
            session_id = %self.session_id,
            sentences = sentences.len(),
            delivered = result.successful,
            failed = result.failed,
            "Broadcast sentences"
        );
        result
    }

    /// Get the number of attached viewers
    #[must_use]
    pub fn count(&self) -> usize {
        self.inner.read().len()
    }

    /// Check if a viewer is attached
    #[must_use]
    pub fn contains(&self, id: &ViewerId) -> bool {
        self.inner.read().contains_key(id)
    }

    /// Get the IDs of all attached viewers
    #[must_use]
    pub fn viewer_ids(&self) -> Vec<ViewerId> {
        self.inner.read().keys().cloned().collect()
    }

    /// Remove viewers whose channel has closed
    ///
    /// Returns the number of viewers removed.
    pub fn cleanup_disconnected(&self) -> usize {
        let mut inner = self.inner.write();
        let before = inner.len();

        inner.retain(|id, handle| {
            let connected = handle.is_connected();
            if !connected {
                tracing::info!(
                    viewer_id = %id,
                    attached_ms = handle.attached_for().as_millis(),
                    "Removing disconnected viewer"
                );
            }
            connected
        });

        let removed = before - inner.len();
        if removed > 0 {
            tracing::info!(
                session_id = %self.session_id,
                removed = removed,
                remaining = inner.len(),
                "Cleaned up disconnected viewers"
            );
        }
        removed
    }
}

impl fmt::Debug for ViewerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("ViewerRegistry")
            .field("session_id", &self.session_id)
            .field("viewer_count", &inner.len())
            .finish()
    }
}

/// Receiving side of an attached viewer
///
/// Yields broadcast frames in order. Dropping it detaches the viewer, which
/// is how a transport reports a disconnect.
#[derive(Debug)]
pub struct ViewerSubscription {
    id: ViewerId,
    rx: mpsc::Receiver<String>,
    registry: ViewerRegistry,
}

impl ViewerSubscription {
    /// ID of the attached viewer
    #[must_use]
    pub fn id(&self) -> &ViewerId {
        &self.id
    }

    /// Receive the next frame
    ///
    /// Returns `None` once the viewer has been detached and drained.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Receive a frame if one is ready
    pub fn try_recv(&mut self) -> Option<String> {
        self.rx.try_recv().ok()
    }
}

impl Stream for ViewerSubscription {
    type Item = String;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for ViewerSubscription {
    fn drop(&mut self) {
        self.registry.detach(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use pretty_assertions::assert_eq;

    fn registry() -> ViewerRegistry {
        ViewerRegistry::new(SessionId::parse("abc").unwrap())
    }

    fn create_test_handle(
        registry: &ViewerRegistry,
        capacity: usize,
    ) -> (ViewerHandle, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity);
        (ViewerHandle::new(registry.session_id().clone(), tx), rx)
    }

    fn sentences(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_viewer_id_format() {
        let id = ViewerId::new();
        assert!(id.to_string().starts_with("viewer-"));
        assert_ne!(id, ViewerId::new());
    }

    #[test]
    fn test_attach_detach() {
        let registry = registry();
        let (handle, _rx) = create_test_handle(&registry, 8);

        let id = registry.attach(handle);
        assert_eq!(registry.count(), 1);
        assert!(registry.contains(&id));

        assert!(registry.detach(&id).is_some());
        assert_eq!(registry.count(), 0);
        assert!(!registry.contains(&id));

        // Idempotent
        assert!(registry.detach(&id).is_none());
    }

    #[test]
    fn test_broadcast_joins_sentences() {
        let registry = registry();
        let (h1, mut rx1) = create_test_handle(&registry, 8);
        let (h2, mut rx2) = create_test_handle(&registry, 8);
        registry.attach(h1);
        registry.attach(h2);

        let result = registry.broadcast(&sentences(&["One.", "Two!"]));

        assert!(result.all_succeeded());
        assert_eq!(result.successful, 2);
        assert_eq!(rx1.try_recv().unwrap(), "One.\nTwo!");
        assert_eq!(rx2.try_recv().unwrap(), "One.\nTwo!");
    }

    #[test]
    fn test_broadcast_empty_is_noop() {
        let registry = registry();
        let (handle, mut rx) = create_test_handle(&registry, 8);
        registry.attach(handle);

        let result = registry.broadcast(&[]);

        assert_eq!(result.successful, 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_closed_viewer_is_detached_and_others_unaffected() {
        let registry = registry();
        let (h1, rx1) = create_test_handle(&registry, 8);
        let (h2, mut rx2) = create_test_handle(&registry, 8);
        let closed = registry.attach(h1);
        let open = registry.attach(h2);
        drop(rx1);

        let result = registry.broadcast(&sentences(&["Hi."]));

        assert_eq!(result.successful, 1);
        assert_eq!(result.failed_ids, vec![closed.clone()]);
        assert!(!registry.contains(&closed));
        assert!(registry.contains(&open));
        assert_eq!(rx2.try_recv().unwrap(), "Hi.");

        // Later broadcasts keep flowing to the survivor
        registry.broadcast(&sentences(&["Again."]));
        assert_eq!(rx2.try_recv().unwrap(), "Again.");
    }

    #[test]
    fn test_full_viewer_is_detached() {
        let registry = registry();
        let (handle, mut rx) = create_test_handle(&registry, 1);
        let id = registry.attach(handle);

        assert!(registry.broadcast(&sentences(&["First."])).all_succeeded());
        let result = registry.broadcast(&sentences(&["Second."]));

        assert_eq!(result.failed, 1);
        assert!(!registry.contains(&id));
        assert_eq!(rx.try_recv().unwrap(), "First.");
    }

    #[test]
    fn test_detach_reports_attached_duration() {
        let registry = registry();
        let (handle, _rx) = create_test_handle(&registry, 8);
        let id = registry.attach(handle);
        std::thread::sleep(std::time::Duration::from_millis(20));

        let handle = registry.detach(&id).unwrap();

        assert!(handle.attached_for() >= std::time::Duration::from_millis(20));
    }

    #[test]
    fn test_cleanup_disconnected() {
        let registry = registry();
        let (handle, rx) = create_test_handle(&registry, 8);
        registry.attach(handle);
        drop(rx);

        assert_eq!(registry.cleanup_disconnected(), 1);
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_clone_is_shared() {
        let registry = registry();
        let clone = registry.clone();
        let (handle, _rx) = create_test_handle(&registry, 8);

        let id = clone.attach(handle);

        assert!(registry.contains(&id));
        assert_eq!(registry.viewer_ids(), vec![id]);
    }

    #[tokio::test]
    async fn test_subscription_receives_frames() {
        let registry = registry();
        let mut subscription = registry.subscribe(8);

        registry.broadcast(&sentences(&["Hello world."]));
        registry.broadcast(&sentences(&["How are you?"]));

        assert_eq!(subscription.next().await.as_deref(), Some("Hello world."));
        assert_eq!(subscription.recv().await.as_deref(), Some("How are you?"));
    }

    #[test]
    fn test_subscription_drop_detaches() {
        let registry = registry();
        let subscription = registry.subscribe(8);
        let id = subscription.id().clone();
        assert!(registry.contains(&id));

        drop(subscription);

        assert!(!registry.contains(&id));
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_attach_detach_attach_only_active_viewers_receive() {
        let registry = registry();
        let first = registry.subscribe(8);
        drop(first);
        let mut second = registry.subscribe(8);

        let result = registry.broadcast(&sentences(&["Only you."]));

        assert_eq!(result.successful, 1);
        assert_eq!(second.try_recv().as_deref(), Some("Only you."));
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let registry = registry();
        let mut subscription = registry.subscribe(0);
        registry.broadcast(&sentences(&["Fits."]));
        assert_eq!(subscription.try_recv().as_deref(), Some("Fits."));
    }

    #[tokio::test]
    async fn test_concurrent_broadcast_and_attach() {
        use tokio::task::JoinSet;

        let registry = registry();
        let mut subscriptions: Vec<_> = (0..5).map(|_| registry.subscribe(64)).collect();

        let mut join_set = JoinSet::new();
        for i in 0..10 {
            let registry = registry.clone();
            join_set.spawn(async move {
                registry.broadcast(&[format!("Sentence {i}.")]).successful
            });
        }
        for _ in 0..5 {
            let registry = registry.clone();
            join_set.spawn(async move {
                let subscription = registry.subscribe(64);
                drop(subscription);
                0
            });
        }

        while let Some(result) = join_set.join_next().await {
            let delivered = result.unwrap();
            assert!(delivered >= 5 || delivered == 0);
        }

        // Only the long-lived subscriptions remain, each with every frame
        assert_eq!(registry.count(), 5);
        for subscription in &mut subscriptions {
            let mut count = 0;
            while subscription.try_recv().is_some() {
                count += 1;
            }
            assert_eq!(count, 10);
        }
    }
}
