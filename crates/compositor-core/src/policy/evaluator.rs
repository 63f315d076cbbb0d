//! The injected collaborator that decides what happens to a tool call.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A tool call as seen at the compositor boundary, before it reaches a
/// backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicyRequest {
	pub name: String,
	pub arguments_json: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PolicyDecision {
	Allow,
	Ask,
	DenyContinue,
	DenyAbort,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicyResponse {
	pub decision: PolicyDecision,
	pub rationale: String,
}

impl PolicyResponse {
	pub fn allow() -> Self {
		Self {
			decision: PolicyDecision::Allow,
			rationale: String::new(),
		}
	}

	pub fn ask() -> Self {
		Self {
			decision: PolicyDecision::Ask,
			rationale: String::new(),
		}
	}

	pub fn deny_continue(rationale: impl Into<String>) -> Self {
		Self {
			decision: PolicyDecision::DenyContinue,
			rationale: rationale.into(),
		}
	}

	pub fn deny_abort(rationale: impl Into<String>) -> Self {
		Self {
			decision: PolicyDecision::DenyAbort,
			rationale: rationale.into(),
		}
	}
}

/// Must be total: any panic or unbounded wait on the implementation's part
/// is caught by [`super::PolicyGateway`], not by this trait's contract, but
/// implementations should still prefer returning `DenyAbort` over panicking
/// where they can detect their own failure.
#[async_trait]
pub trait PolicyEvaluator: Send + Sync {
	async fn decide(&self, request: &PolicyRequest) -> PolicyResponse;
}
