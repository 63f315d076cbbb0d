//! Notification Fan-Out: delivers server-originated notifications to every
//! live upstream session, attributing each event to its originating mount
//! and queueing events that arrive before any session exists.

mod queue;
mod session;

use std::sync::Arc;

use parking_lot::Mutex;
pub use queue::PendingNotificationQueue;
pub use session::{SessionId, SessionSender, UpstreamSession};
use tokio::sync::mpsc;

use crate::backend::{Backend, BackendHandle};
use crate::naming::{self, MountPrefix};
use crate::types::{NotificationEvent, RawNotification};

/// Default capacity of the pending notification queue. Not fixed upstream;
/// chosen as a generous bound with a dropped-events counter rather than an
/// unbounded buffer.
pub const DEFAULT_PENDING_QUEUE_CAPACITY: usize = 4096;

struct Inner {
	sessions: Vec<UpstreamSession>,
	pending: PendingNotificationQueue,
	/// Whether the pending queue has been flushed to newly joined sessions
	/// yet. Flushing happens on the first `list_resources` call from any
	/// session (see `FanOut::on_list_resources`), not automatically on join.
	flushed: bool,
}

/// Owns the live session set and the pending-notification queue, and runs
/// one consumer task per mount that reads the backend's raw notification
/// stream and rebroadcasts it.
pub struct FanOut {
	inner: Mutex<Inner>,
}

impl FanOut {
	pub fn new(pending_capacity: usize) -> Arc<Self> {
		Arc::new(Self {
			inner: Mutex::new(Inner {
				sessions: Vec::new(),
				pending: PendingNotificationQueue::new(pending_capacity),
				flushed: false,
			}),
		})
	}

	/// Register a new client session and return the receiving half of its
	/// message channel.
	pub fn add_session(&self) -> (SessionId, mpsc::Receiver<NotificationEvent>) {
		let (session, rx) = UpstreamSession::new();
		let id = session.id();
		self.inner.lock().sessions.push(session);
		(id, rx)
	}

	pub fn remove_session(&self, id: SessionId) {
		self.inner.lock().sessions.retain(|s| s.id() != id);
	}

	pub fn live_session_count(&self) -> usize {
		self.inner.lock().sessions.len()
	}

	pub fn dropped_notification_count(&self) -> u64 {
		self.inner.lock().pending.dropped_count()
	}

	/// The trigger this implementation has chosen for flushing the pending
	/// queue to already-joined sessions: the first `list_resources` call
	/// from any session, since that's the first action implying real
	/// interest in resource state. Idempotent past the first flush.
	pub fn on_list_resources(&self) {
		let mut inner = self.inner.lock();
		if inner.flushed {
			return;
		}
		inner.flushed = true;
		let events = inner.pending.drain();
		for event in events {
			Self::broadcast_locked(&mut inner.sessions, event);
		}
	}

	fn broadcast(&self, event: NotificationEvent) {
		let mut inner = self.inner.lock();
		if inner.sessions.is_empty() {
			inner.pending.push(event);
			return;
		}
		Self::broadcast_locked(&mut inner.sessions, event);
	}

	/// Best-effort send to every live session; a session whose send fails is
	/// dropped from the set so one failing session never blocks delivery to
	/// the rest.
	fn broadcast_locked(sessions: &mut Vec<UpstreamSession>, event: NotificationEvent) {
		sessions.retain(|session| session.send(event.clone()).is_ok());
	}

	/// Spawn the single consumer task for one mount's notification stream.
	/// The backend's raw events are rewritten with the mount's prefix before
	/// being handed to the fan-out core, preserving per-mount emission order.
	pub fn spawn_mount_consumer(self: &Arc<Self>, prefix: MountPrefix, backend: Arc<BackendHandle>) {
		let Some(mut rx) = backend.take_notifications() else {
			return;
		};
		let fanout = self.clone();
		tokio::spawn(async move {
			while let Some(raw) = rx.recv().await {
				let event = match raw {
					RawNotification::ResourceListChanged => NotificationEvent::ResourceListChanged {
						origin_prefix: prefix.as_str().to_string(),
					},
					RawNotification::ResourceUpdated { uri } => NotificationEvent::ResourceUpdated {
						origin_prefix: prefix.as_str().to_string(),
						uri: naming::prefix_resource_uri(&prefix, &uri),
					},
				};
				fanout.broadcast(event);
			}
		});
	}
}
