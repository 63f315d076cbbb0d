//! Policy Gateway Middleware: interposes on every tool call crossing the
//! compositor boundary, consulting an injected [`PolicyEvaluator`] and
//! applying its decision before a call ever reaches a backend.

mod approval;
mod evaluator;

use std::sync::Arc;
use std::time::Duration;

pub use approval::{ApprovalError, ApprovalOutcome, PendingApproval};
pub use evaluator::{PolicyDecision, PolicyEvaluator, PolicyRequest, PolicyResponse};
use uuid::Uuid;

use crate::types::ToolResult;

/// The numeric code reserved for the gateway's own denials. Fixed and widely
/// known within the system so a backend cannot spoof a gateway-originated
/// error by returning this code itself.
pub const RESERVED_GATEWAY_ERROR_CODE: i64 = -32099;

/// Canonical message surfaced when the evaluator times out or panics, so
/// callers can recognise this failure class without the gateway leaking
/// sandbox internals.
pub const POLICY_EVALUATOR_ERROR_MSG: &str = "policy evaluator failed or timed out";

pub const DEFAULT_DECIDE_TIMEOUT: Duration = Duration::from_secs(5);

/// What the gateway tells the compositor to do with a tool call, once a
/// policy decision (and, if needed, a user approval) has been resolved.
#[derive(Debug, Clone)]
pub enum Admission {
	Proceed,
	DenyContinue { rationale: String },
	DenyAbort { rationale: String },
}

/// Removes a pending approval's table entry if dropped while still armed.
/// Disarming after a normal resolution (`Ok` or `Err` from the one-shot
/// receiver) makes this a no-op on every path except the caller abandoning
/// the call mid-wait.
struct CancelOnDrop<'a> {
	table: &'a approval::ApprovalTable,
	call_id: Uuid,
	armed: bool,
}

impl Drop for CancelOnDrop<'_> {
	fn drop(&mut self) {
		if self.armed {
			self.table.cancel_one(self.call_id);
		}
	}
}

pub struct PolicyGateway {
	evaluator: Arc<dyn PolicyEvaluator>,
	approvals: approval::ApprovalTable,
	decide_timeout: Duration,
}

impl PolicyGateway {
	pub fn new(evaluator: Arc<dyn PolicyEvaluator>, decide_timeout: Duration) -> Self {
		Self {
			evaluator,
			approvals: approval::ApprovalTable::default(),
			decide_timeout,
		}
	}

	/// Run the full admission flow for one call: evaluate, then resolve
	/// `Ask` by waiting on an approval. Always returns — the evaluator's
	/// contract is total even when it isn't: a timeout or panic degrades to
	/// `DenyAbort` with the canonical message rather than propagating.
	pub async fn admit(&self, request: PolicyRequest) -> Admission {
		let response = self.decide_guarded(&request).await;
		match response.decision {
			PolicyDecision::Allow => Admission::Proceed,
			PolicyDecision::DenyContinue => Admission::DenyContinue { rationale: response.rationale },
			PolicyDecision::DenyAbort => Admission::DenyAbort { rationale: response.rationale },
			PolicyDecision::Ask => self.await_approval(request).await,
		}
	}

	async fn decide_guarded(&self, request: &PolicyRequest) -> PolicyResponse {
		let evaluator = self.evaluator.clone();
		let request = request.clone();
		let decide = async move { evaluator.decide(&request).await };

		use futures_util::FutureExt;
		let guarded = std::panic::AssertUnwindSafe(decide).catch_unwind();

		match tokio::time::timeout(self.decide_timeout, guarded).await {
			Ok(Ok(response)) => response,
			Ok(Err(_panic)) => {
				tracing::error!(target: "compositor", "policy evaluator panicked");
				PolicyResponse::deny_abort(POLICY_EVALUATOR_ERROR_MSG)
			},
			Err(_elapsed) => {
				tracing::warn!(target: "compositor", "policy evaluator timed out");
				PolicyResponse::deny_abort(POLICY_EVALUATOR_ERROR_MSG)
			},
		}
	}

	/// Wait for an `Ask` decision to be resolved. If the caller abandons the
	/// tool call while this is still pending (the enclosing future is
	/// dropped, e.g. the caller's task is aborted or races a `select!`), the
	/// table entry must not linger forever: `CancelOnDrop` removes it unless
	/// `disarm`ed, which only happens once `rx` has actually resolved.
	async fn await_approval(&self, request: PolicyRequest) -> Admission {
		let (call_id, rx) = self.approvals.register(request);
		tracing::info!(target: "compositor", %call_id, "approval requested");
		let mut guard = CancelOnDrop {
			table: &self.approvals,
			call_id,
			armed: true,
		};
		let outcome = rx.await;
		guard.armed = false;
		match outcome {
			Ok(ApprovalOutcome::Approve) => Admission::Proceed,
			Ok(ApprovalOutcome::DenyContinue) => Admission::DenyContinue {
				rationale: "denied by approver".into(),
			},
			Ok(ApprovalOutcome::DenyAbort) => Admission::DenyAbort {
				rationale: "denied by approver".into(),
			},
			Ok(ApprovalOutcome::Cancelled) | Err(_) => Admission::DenyAbort {
				rationale: "approval cancelled".into(),
			},
		}
	}

	/// Observable by the Admin surface: every `Ask` currently awaiting
	/// resolution.
	pub fn pending_approvals(&self) -> Vec<PendingApproval> {
		self.approvals.list_pending()
	}

	pub fn resolve_approval(&self, call_id: Uuid, outcome: ApprovalOutcome) -> Result<(), ApprovalError> {
		self.approvals.resolve(call_id, outcome)
	}

	/// Cancel every outstanding approval (used on compositor shutdown).
	pub fn cancel_all(&self) {
		self.approvals.cancel_all();
	}

	/// If an `Allow`-path backend result carries the reserved error code,
	/// remap it to a `BackendReservedMisuse` error so a backend cannot
	/// impersonate a gateway denial.
	pub fn remap_reserved(&self, result: ToolResult) -> ToolResult {
		if result.is_error && result.error_code == Some(RESERVED_GATEWAY_ERROR_CODE) {
			ToolResult::error("backend attempted to use a reserved gateway error code (BackendReservedMisuse)")
		} else {
			result
		}
	}
}

#[cfg(test)]
mod tests {
	use async_trait::async_trait;

	use super::*;

	struct AlwaysAllow;
	#[async_trait]
	impl PolicyEvaluator for AlwaysAllow {
		async fn decide(&self, _request: &PolicyRequest) -> PolicyResponse {
			PolicyResponse::allow()
		}
	}

	struct AlwaysAsk;
	#[async_trait]
	impl PolicyEvaluator for AlwaysAsk {
		async fn decide(&self, _request: &PolicyRequest) -> PolicyResponse {
			PolicyResponse::ask()
		}
	}

	struct SleepsForever;
	#[async_trait]
	impl PolicyEvaluator for SleepsForever {
		async fn decide(&self, _request: &PolicyRequest) -> PolicyResponse {
			tokio::time::sleep(Duration::from_secs(3600)).await;
			unreachable!()
		}
	}

	fn req() -> PolicyRequest {
		PolicyRequest {
			name: "alpha_ping".into(),
			arguments_json: None,
		}
	}

	#[tokio::test]
	async fn allow_proceeds_immediately() {
		let gateway = PolicyGateway::new(Arc::new(AlwaysAllow), DEFAULT_DECIDE_TIMEOUT);
		assert!(matches!(gateway.admit(req()).await, Admission::Proceed));
	}

	#[tokio::test]
	async fn evaluator_timeout_denies_abort_with_canonical_message() {
		let gateway = PolicyGateway::new(Arc::new(SleepsForever), Duration::from_millis(20));
		match gateway.admit(req()).await {
			Admission::DenyAbort { rationale } => assert_eq!(rationale, POLICY_EVALUATOR_ERROR_MSG),
			other => panic!("expected DenyAbort, got {other:?}"),
		}
	}

	#[tokio::test]
	async fn ask_then_approve_proceeds() {
		let gateway = Arc::new(PolicyGateway::new(Arc::new(AlwaysAsk), DEFAULT_DECIDE_TIMEOUT));
		let gw = gateway.clone();
		let handle = tokio::spawn(async move { gw.admit(req()).await });

		// Wait for the approval record to appear, then resolve it.
		let call_id = loop {
			if let Some(pending) = gateway.pending_approvals().into_iter().next() {
				break pending.call_id;
			}
			tokio::time::sleep(Duration::from_millis(5)).await;
		};
		gateway.resolve_approval(call_id, ApprovalOutcome::Approve).unwrap();

		assert!(matches!(handle.await.unwrap(), Admission::Proceed));
	}

	#[tokio::test]
	async fn ask_then_deny_abort() {
		let gateway = Arc::new(PolicyGateway::new(Arc::new(AlwaysAsk), DEFAULT_DECIDE_TIMEOUT));
		let gw = gateway.clone();
		let handle = tokio::spawn(async move { gw.admit(req()).await });

		let call_id = loop {
			if let Some(pending) = gateway.pending_approvals().into_iter().next() {
				break pending.call_id;
			}
			tokio::time::sleep(Duration::from_millis(5)).await;
		};
		gateway.resolve_approval(call_id, ApprovalOutcome::DenyAbort).unwrap();

		assert!(matches!(handle.await.unwrap(), Admission::DenyAbort { .. }));
	}

	#[test]
	fn remap_reserved_code_hides_backend_impersonation() {
		let gateway = PolicyGateway::new(Arc::new(AlwaysAllow), DEFAULT_DECIDE_TIMEOUT);
		let spoofed = ToolResult::error_with_code("nice try", RESERVED_GATEWAY_ERROR_CODE);
		let remapped = gateway.remap_reserved(spoofed);
		assert!(remapped.content.iter().any(|c| matches!(c, crate::types::ContentPart::Text { text } if text.contains("BackendReservedMisuse"))));
	}

	#[tokio::test]
	async fn dropping_the_caller_while_awaiting_approval_removes_the_record() {
		let gateway = Arc::new(PolicyGateway::new(Arc::new(AlwaysAsk), DEFAULT_DECIDE_TIMEOUT));
		let gw = gateway.clone();
		let handle = tokio::spawn(async move { gw.admit(req()).await });

		loop {
			if !gateway.pending_approvals().is_empty() {
				break;
			}
			tokio::time::sleep(Duration::from_millis(5)).await;
		}

		// Simulate the caller abandoning the tool call mid-wait.
		handle.abort();
		let _ = handle.await;

		for _ in 0..20 {
			if gateway.pending_approvals().is_empty() {
				return;
			}
			tokio::time::sleep(Duration::from_millis(5)).await;
		}
		panic!("approval record was not cleared after the caller was cancelled");
	}

	#[test]
	fn remap_reserved_leaves_other_errors_untouched() {
		let gateway = PolicyGateway::new(Arc::new(AlwaysAllow), DEFAULT_DECIDE_TIMEOUT);
		let ordinary = ToolResult::error_with_code("plain failure", 7);
		let remapped = gateway.remap_reserved(ordinary.clone());
		assert_eq!(remapped, ordinary);
	}
}
