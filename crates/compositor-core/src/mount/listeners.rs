//! Mount listener registry. Listeners are identified by an opaque token
//! issued at registration and explicitly revoked through it, rather than a
//! weak reference the table would have to upgrade and prune on its own.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::naming::MountPrefix;

/// A transition the mount table reports to registered listeners.
#[derive(Debug, Clone)]
pub enum MountEvent {
	Mounted { prefix: MountPrefix },
	Unmounted { prefix: MountPrefix },
	StateChanged { prefix: MountPrefix },
}

impl MountEvent {
	pub fn prefix(&self) -> &MountPrefix {
		match self {
			MountEvent::Mounted { prefix } => prefix,
			MountEvent::Unmounted { prefix } => prefix,
			MountEvent::StateChanged { prefix } => prefix,
		}
	}
}

/// An opaque handle to a registered listener. Revoking it with
/// `MountTable::remove_listener` is the only way to stop the listener from
/// firing; dropping the token itself does nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerToken(u64);

type Listener = Box<dyn Fn(MountEvent) + Send + Sync>;

#[derive(Default)]
pub(super) struct Registry {
	next: AtomicU64,
	listeners: BTreeMap<u64, Listener>,
}

impl Registry {
	pub(super) fn add(&mut self, listener: impl Fn(MountEvent) + Send + Sync + 'static) -> ListenerToken {
		let id = self.next.fetch_add(1, Ordering::SeqCst);
		self.listeners.insert(id, Box::new(listener));
		ListenerToken(id)
	}

	pub(super) fn remove(&mut self, token: ListenerToken) {
		self.listeners.remove(&token.0);
	}

	/// Invoke every listener. A listener that panics is caught and logged so
	/// one misbehaving listener never prevents the others from observing the
	/// event.
	pub(super) fn fire(&self, event: MountEvent) {
		for listener in self.listeners.values() {
			let event = event.clone();
			if let Err(panic) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| listener(event))) {
				tracing::error!(target: "compositor", ?panic, "mount listener panicked");
			}
		}
	}
}
