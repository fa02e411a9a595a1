//! Single-slot binding for the server-sent-events transport.
//!
//! At most one push stream is bound at a time. Binding a new stream replaces
//! the previous one; the replaced sender is dropped, which ends the old
//! stream and closes that HTTP response.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, MutexGuard,
};

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::errors::TransportError;

/// Path clients POST messages to once their stream is open.
pub const MESSAGES_ENDPOINT: &str = "/mcp/messages";

/// Frames written onto a bound stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// First frame; tells the client where to post messages.
    Endpoint(String),
    Message(Value),
}

#[derive(Debug)]
struct Binding {
    id: u64,
    sender: mpsc::UnboundedSender<StreamEvent>,
}

/// The receiving half of a bound stream. Dropping it unbinds the slot unless
/// a newer stream already took over.
#[derive(Debug)]
pub struct StreamSession {
    pub id: u64,
    receiver: mpsc::UnboundedReceiver<StreamEvent>,
    slot: Arc<StreamSlot>,
}

#[derive(Debug, Default)]
pub struct StreamSlot {
    current: Mutex<Option<Binding>>,
    next_id: AtomicU64,
}

impl StreamSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Binding>> {
        // The guarded value is a plain Option swap, so a poisoned lock is still consistent.
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Binds a fresh stream, superseding any existing one, and queues the
    /// `endpoint` event on it.
    pub fn bind(&self) -> (u64, mpsc::UnboundedReceiver<StreamEvent>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (sender, receiver) = mpsc::unbounded_channel();
        let _ = sender.send(StreamEvent::Endpoint(MESSAGES_ENDPOINT.to_string()));

        let previous = self.lock().replace(Binding { id, sender });
        match previous {
            Some(old) => info!(session = id, superseded = old.id, "stream session bound"),
            None => info!(session = id, "stream session bound"),
        }

        (id, receiver)
    }

    /// Like [`StreamSlot::bind`] but returns a guard that unbinds on drop.
    pub fn connect(self: &Arc<Self>) -> StreamSession {
        let (id, receiver) = self.bind();
        StreamSession {
            id,
            receiver,
            slot: Arc::clone(self),
        }
    }

    /// Clears the slot if it still holds stream `id`.
    pub fn release(&self, id: u64) -> bool {
        let mut current = self.lock();
        if current.as_ref().is_some_and(|binding| binding.id == id) {
            *current = None;
            info!(session = id, "stream session closed");
            true
        } else {
            debug!(session = id, "stale stream session released");
            false
        }
    }

    /// Drops the current binding, ending its stream.
    pub fn unbind(&self) -> Option<u64> {
        let id = self.lock().take().map(|binding| binding.id);
        if let Some(id) = id {
            info!(session = id, "stream session unbound");
        }
        id
    }

    pub fn bound_session(&self) -> Option<u64> {
        self.lock().as_ref().map(|binding| binding.id)
    }

    pub fn is_bound(&self) -> bool {
        self.bound_session().is_some()
    }

    /// Pushes a message to whichever stream is bound right now.
    pub fn push(&self, message: Value) -> Result<u64, TransportError> {
        let mut current = self.lock();
        let binding = current.as_ref().ok_or(TransportError::NoBoundEndpoint)?;
        let id = binding.id;

        if binding.sender.send(StreamEvent::Message(message)).is_err() {
            // Receiver is gone; the client disconnected without us noticing yet.
            *current = None;
            return Err(TransportError::Closed);
        }
        Ok(id)
    }
}

impl StreamSession {
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.receiver.recv().await
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.slot.release(self.id);
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn push_without_binding_is_rejected() {
        let slot = StreamSlot::new();
        let error = slot.push(json!({ "id": 1 })).expect_err("nothing bound");
        assert!(matches!(error, TransportError::NoBoundEndpoint));
    }

    #[tokio::test]
    async fn bound_stream_receives_endpoint_then_messages() {
        let slot = StreamSlot::new();
        let (id, mut receiver) = slot.bind();

        assert_eq!(
            receiver.recv().await,
            Some(StreamEvent::Endpoint(MESSAGES_ENDPOINT.to_string()))
        );
        assert_eq!(slot.push(json!({ "id": 1 })).expect("bound"), id);
        assert_eq!(receiver.recv().await, Some(StreamEvent::Message(json!({ "id": 1 }))));
    }

    #[tokio::test]
    async fn second_bind_supersedes_and_closes_first() {
        let slot = StreamSlot::new();
        let (first, mut first_rx) = slot.bind();
        let (second, mut second_rx) = slot.bind();
        assert_ne!(first, second);
        assert_eq!(slot.bound_session(), Some(second));

        slot.push(json!("after-second")).expect("bound");

        assert!(matches!(first_rx.recv().await, Some(StreamEvent::Endpoint(_))));
        assert_eq!(first_rx.recv().await, None, "superseded stream is closed");

        assert!(matches!(second_rx.recv().await, Some(StreamEvent::Endpoint(_))));
        assert_eq!(second_rx.recv().await, Some(StreamEvent::Message(json!("after-second"))));
    }

    #[test]
    fn releasing_a_superseded_session_keeps_the_new_binding() {
        let slot = Arc::new(StreamSlot::new());
        let old = slot.connect();
        let new = slot.connect();

        drop(old);
        assert_eq!(slot.bound_session(), Some(new.id));

        drop(new);
        assert!(!slot.is_bound());
    }

    #[tokio::test]
    async fn unbind_ends_the_stream() {
        let slot = StreamSlot::new();
        let (id, mut receiver) = slot.bind();

        assert_eq!(slot.unbind(), Some(id));
        assert!(matches!(receiver.recv().await, Some(StreamEvent::Endpoint(_))));
        assert_eq!(receiver.recv().await, None);
        assert_eq!(slot.unbind(), None);
    }

    #[test]
    fn push_to_dropped_receiver_clears_slot() {
        let slot = StreamSlot::new();
        let (_, receiver) = slot.bind();
        drop(receiver);

        let error = slot.push(json!(1)).expect_err("receiver gone");
        assert!(matches!(error, TransportError::Closed));
        assert!(!slot.is_bound());
    }
}
