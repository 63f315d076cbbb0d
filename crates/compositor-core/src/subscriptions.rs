//! Subscriptions Index: the authoritative in-memory record of which
//! resources and which per-server list-change feeds this compositor has
//! subscribed to upstream on behalf of its clients.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::{Backend, BackendHandle};
use crate::mount::{MountEvent, MountTable};
use crate::naming::MountPrefix;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SubscriptionKind {
	Resource { prefix: String, uri: String },
	ListChange { prefix: String },
}

impl SubscriptionKind {
	fn prefix(&self) -> &str {
		match self {
			SubscriptionKind::Resource { prefix, .. } => prefix,
			SubscriptionKind::ListChange { prefix } => prefix,
		}
	}
}

#[derive(Debug, Clone)]
pub struct SubscriptionRecord {
	pub kind: SubscriptionKind,
	pub pinned: bool,
	pub present: bool,
	pub active: bool,
	pub last_error: Option<String>,
}

#[derive(Default)]
pub struct SubscriptionsIndex {
	records: Mutex<HashMap<SubscriptionKind, SubscriptionRecord>>,
}

impl SubscriptionsIndex {
	pub fn new() -> Self {
		Self::default()
	}

	/// Construct and register as a mount listener, so a prefix's subscription
	/// records are retired on every unmount path uniformly, regardless of
	/// which caller triggered it (mirrors `MetaServer::new`'s self-registration).
	pub fn attached(mount_table: &MountTable) -> Arc<Self> {
		let index = Arc::new(Self::default());
		let observer = index.clone();
		mount_table.add_listener(move |event| {
			if let MountEvent::Unmounted { prefix } = event {
				observer.on_unmounted(&prefix);
			}
		});
		index
	}

	pub fn snapshot(&self) -> Vec<SubscriptionRecord> {
		self.records.lock().values().cloned().collect()
	}

	pub fn get(&self, kind: &SubscriptionKind) -> Option<SubscriptionRecord> {
		self.records.lock().get(kind).cloned()
	}

	/// Subscribe to a single resource. Idempotent: re-subscribing an
	/// existing record only ever widens `pinned` (never narrows it) and
	/// refreshes `active`/`last_error` from the new attempt.
	pub async fn subscribe(&self, prefix: &MountPrefix, uri: &str, backend: &Arc<BackendHandle>, pinned: bool) {
		let kind = SubscriptionKind::Resource {
			prefix: prefix.as_str().to_string(),
			uri: uri.to_string(),
		};
		self.upsert_then_call(kind, pinned, {
			let uri = uri.to_string();
			let backend = backend.clone();
			move || async move { backend.subscribe(&uri).await }
		})
		.await;
	}

	pub async fn unsubscribe(&self, prefix: &MountPrefix, uri: &str, backend: &Arc<BackendHandle>) {
		let kind = SubscriptionKind::Resource {
			prefix: prefix.as_str().to_string(),
			uri: uri.to_string(),
		};
		let result = backend.unsubscribe(uri).await;
		self.finish_unsubscribe(kind, result.is_ok());
	}

	pub async fn subscribe_list_changes(&self, prefix: &MountPrefix, pinned: bool) {
		let kind = SubscriptionKind::ListChange {
			prefix: prefix.as_str().to_string(),
		};
		// List-change subscription has no dedicated backend call in this
		// contract; it tracks that the compositor is itself forwarding
		// `resource-list-changed` notifications for this mount, which happens
		// unconditionally once a mount is running. Presence here only records
		// client-visible intent.
		self.upsert_then_call(kind, pinned, || async { Ok(()) }).await;
	}

	pub fn unsubscribe_list_changes(&self, prefix: &MountPrefix) {
		let kind = SubscriptionKind::ListChange {
			prefix: prefix.as_str().to_string(),
		};
		self.finish_unsubscribe(kind, true);
	}

	async fn upsert_then_call<F, Fut>(&self, kind: SubscriptionKind, pinned: bool, call: F)
	where
		F: FnOnce() -> Fut,
		Fut: std::future::Future<Output = Result<(), crate::backend::BackendError>>,
	{
		{
			let mut records = self.records.lock();
			let existing_pinned = records.get(&kind).map(|r| r.pinned).unwrap_or(false);
			records.insert(
				kind.clone(),
				SubscriptionRecord {
					kind: kind.clone(),
					pinned: existing_pinned || pinned,
					present: true,
					active: false,
					last_error: None,
				},
			);
		}
		let result = call().await;
		let mut records = self.records.lock();
		if let Some(record) = records.get_mut(&kind) {
			match result {
				Ok(()) => {
					record.active = true;
					record.last_error = None;
				},
				Err(e) => {
					record.active = false;
					record.last_error = Some(e.to_string());
				},
			}
		}
	}

	fn finish_unsubscribe(&self, kind: SubscriptionKind, success: bool) {
		let mut records = self.records.lock();
		if !success {
			if let Some(record) = records.get_mut(&kind) {
				record.last_error = Some("unsubscribe failed upstream".into());
			}
			return;
		}
		match records.get(&kind).map(|r| r.pinned) {
			Some(true) => {
				if let Some(record) = records.get_mut(&kind) {
					record.active = false;
				}
			},
			Some(false) => {
				records.remove(&kind);
			},
			None => {},
		}
	}

	/// Called when a mount is removed: clears presence/activity for every
	/// record scoped to `prefix`, drops non-pinned records, and never issues
	/// an upstream unsubscribe since the backend is already gone.
	pub fn on_unmounted(&self, prefix: &MountPrefix) {
		let mut records = self.records.lock();
		let keys: Vec<SubscriptionKind> = records
			.keys()
			.filter(|k| k.prefix() == prefix.as_str())
			.cloned()
			.collect();
		for key in keys {
			let pinned = records.get(&key).map(|r| r.pinned).unwrap_or(false);
			if pinned {
				if let Some(record) = records.get_mut(&key) {
					record.present = false;
					record.active = false;
				}
			} else {
				records.remove(&key);
			}
		}
	}
}
