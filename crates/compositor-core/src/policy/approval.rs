//! The pending-approvals table: one `ApprovalRecord` per in-flight `Ask`
//! decision, resolved exactly once via its one-shot channel.

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::oneshot;
use uuid::Uuid;

use super::evaluator::PolicyRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalOutcome {
	Approve,
	DenyContinue,
	DenyAbort,
	Cancelled,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApprovalError {
	#[error("no pending approval with call_id {0}")]
	NotFound(Uuid),
	#[error("approval {0} was already resolved")]
	AlreadyResolved(Uuid),
}

/// A snapshot of one outstanding approval, as the Admin surface sees it.
#[derive(Debug, Clone)]
pub struct PendingApproval {
	pub call_id: Uuid,
	pub request: PolicyRequest,
	pub created_at: Instant,
}

#[derive(Default)]
pub(super) struct ApprovalTable {
	inner: Mutex<HashMap<Uuid, Entry>>,
}

struct Entry {
	request: PolicyRequest,
	created_at: Instant,
	resolver: Option<oneshot::Sender<ApprovalOutcome>>,
}

impl ApprovalTable {
	pub(super) fn register(&self, request: PolicyRequest) -> (Uuid, oneshot::Receiver<ApprovalOutcome>) {
		let call_id = Uuid::new_v4();
		let (tx, rx) = oneshot::channel();
		self.inner.lock().insert(
			call_id,
			Entry {
				request,
				created_at: Instant::now(),
				resolver: Some(tx),
			},
		);
		(call_id, rx)
	}

	pub(super) fn list_pending(&self) -> Vec<PendingApproval> {
		self
			.inner
			.lock()
			.iter()
			.filter(|(_, e)| e.resolver.is_some())
			.map(|(id, e)| PendingApproval {
				call_id: *id,
				request: e.request.clone(),
				created_at: e.created_at,
			})
			.collect()
	}

	/// Resolve exactly once. A second resolution (e.g. a racing Admin click)
	/// is rejected rather than silently ignored, so the caller can surface
	/// the double-resolve as a usage error. The entry is kept (with its
	/// resolver cleared) after resolution so a genuine double-resolve is
	/// still distinguishable from an unknown `call_id`.
	pub(super) fn resolve(&self, call_id: Uuid, outcome: ApprovalOutcome) -> Result<(), ApprovalError> {
		let mut inner = self.inner.lock();
		let entry = inner.get_mut(&call_id).ok_or(ApprovalError::NotFound(call_id))?;
		let resolver = entry.resolver.take().ok_or(ApprovalError::AlreadyResolved(call_id))?;
		let _ = resolver.send(outcome);
		Ok(())
	}

	/// Drop a single entry outright, unlike `resolve` which keeps a
	/// resolved-but-cleared record around. Used when the *caller* of the tool
	/// call abandons it while still waiting on approval: there is no longer
	/// anyone to observe a resolution, so the record is removed rather than
	/// retained.
	pub(super) fn cancel_one(&self, call_id: Uuid) {
		self.inner.lock().remove(&call_id);
	}

	pub(super) fn cancel_all(&self) {
		let mut inner = self.inner.lock();
		for (_, mut entry) in inner.drain() {
			if let Some(resolver) = entry.resolver.take() {
				let _ = resolver.send(ApprovalOutcome::Cancelled);
			}
		}
	}
}
