//! A single live upstream client session: an opaque id plus a single-writer
//! channel to that client.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;

use crate::types::NotificationEvent;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

/// The writable half of a session's channel, cloned out so callers that
/// don't own the `FanOut` (e.g. a session's own read loop) can still detect
/// the channel closing.
pub type SessionSender = mpsc::Sender<NotificationEvent>;

pub struct UpstreamSession {
	id: SessionId,
	sender: SessionSender,
}

impl UpstreamSession {
	pub fn new() -> (Self, mpsc::Receiver<NotificationEvent>) {
		let (tx, rx) = mpsc::channel(256);
		let id = SessionId(NEXT_SESSION_ID.fetch_add(1, Ordering::SeqCst));
		(Self { id, sender: tx }, rx)
	}

	pub fn id(&self) -> SessionId {
		self.id
	}

	/// Attempt to deliver one event. A full channel is treated as the
	/// session being unresponsive and is reported as a failure just like a
	/// closed channel, since backpressure at the transport layer is the
	/// session's own responsibility per the concurrency model.
	pub fn send(&self, event: NotificationEvent) -> Result<(), ()> {
		self.sender.try_send(event).map_err(|_| ())
	}
}
