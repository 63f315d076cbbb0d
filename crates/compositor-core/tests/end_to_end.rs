//! End-to-end scenarios exercising the full tool-call and notification paths
//! through the public `Compositor` surface.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use compositor_core::backend::inproc::InProcServer;
use compositor_core::backend::BackendError;
use compositor_core::compositor::CallOutcome;
use compositor_core::mount::MountState;
use compositor_core::policy::{ApprovalOutcome, PolicyEvaluator, PolicyRequest, PolicyResponse};
use compositor_core::types::{InitializeResult, RawNotification, Tool, ToolResult};
use compositor_core::{Compositor, CompositorConfig, MountPrefix};

struct PingServer;

#[async_trait]
impl InProcServer for PingServer {
	async fn initialize(&self) -> Result<InitializeResult, BackendError> {
		Ok(InitializeResult {
			server_name: "ping".into(),
			server_version: "0.1.0".into(),
			protocol_version: "2025-06-18".into(),
			instructions: None,
			capabilities: Default::default(),
		})
	}
	async fn list_tools(&self) -> Result<Vec<Tool>, BackendError> {
		Ok(vec![Tool {
			name: "ping".into(),
			description: None,
			input_schema: serde_json::json!({"type": "object"}),
		}])
	}
	async fn call_tool(&self, name: &str, _arguments_json: Option<String>) -> Result<ToolResult, BackendError> {
		if name == "ping" {
			Ok(ToolResult::ok_text("pong"))
		} else {
			Err(BackendError::CallFailed(format!("unknown tool {name}")))
		}
	}
}

struct EchoServer;

#[async_trait]
impl InProcServer for EchoServer {
	async fn initialize(&self) -> Result<InitializeResult, BackendError> {
		Ok(InitializeResult {
			server_name: "echo".into(),
			server_version: "0.1.0".into(),
			protocol_version: "2025-06-18".into(),
			instructions: None,
			capabilities: Default::default(),
		})
	}
	async fn list_tools(&self) -> Result<Vec<Tool>, BackendError> {
		Ok(vec![])
	}
	async fn call_tool(&self, _name: &str, arguments_json: Option<String>) -> Result<ToolResult, BackendError> {
		let args: serde_json::Value = arguments_json.as_deref().map(|s| serde_json::from_str(s).unwrap()).unwrap_or_default();
		let text = args.get("text").and_then(|v| v.as_str()).unwrap_or("").to_string();
		Ok(ToolResult::ok_json(serde_json::json!({ "echo": text })))
	}
}

/// Emits one `resource_list_changed` and one `resource_updated` event as soon
/// as it is constructed, to exercise the pending-queue/late-join path (§8.5).
struct OriginServer;

#[async_trait]
impl InProcServer for OriginServer {
	async fn initialize(&self) -> Result<InitializeResult, BackendError> {
		Ok(InitializeResult {
			server_name: "origin".into(),
			server_version: "0.1.0".into(),
			protocol_version: "2025-06-18".into(),
			instructions: None,
			capabilities: Default::default(),
		})
	}
	async fn list_tools(&self) -> Result<Vec<Tool>, BackendError> {
		Ok(vec![])
	}
	async fn call_tool(&self, _name: &str, _arguments_json: Option<String>) -> Result<ToolResult, BackendError> {
		Ok(ToolResult::ok_text(""))
	}
	async fn list_resources(&self) -> Result<Vec<compositor_core::types::ResourceDescriptor>, BackendError> {
		Ok(vec![])
	}
}

/// Supports `subscribe` so the admin-detach/subscriptions-index interaction
/// can be exercised without a real upstream resource.
struct SubscribableServer;

#[async_trait]
impl InProcServer for SubscribableServer {
	async fn initialize(&self) -> Result<InitializeResult, BackendError> {
		Ok(InitializeResult {
			server_name: "subscribable".into(),
			server_version: "0.1.0".into(),
			protocol_version: "2025-06-18".into(),
			instructions: None,
			capabilities: Default::default(),
		})
	}
	async fn list_tools(&self) -> Result<Vec<Tool>, BackendError> {
		Ok(vec![])
	}
	async fn call_tool(&self, _name: &str, _arguments_json: Option<String>) -> Result<ToolResult, BackendError> {
		Ok(ToolResult::ok_text(""))
	}
	async fn subscribe(&self, _uri: &str) -> Result<(), BackendError> {
		Ok(())
	}
}

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

struct SleepsPastBudget;
#[async_trait]
impl PolicyEvaluator for SleepsPastBudget {
	async fn decide(&self, _request: &PolicyRequest) -> PolicyResponse {
		tokio::time::sleep(Duration::from_secs(3600)).await;
		unreachable!()
	}
}

async fn wait_running(compositor: &Compositor, prefix: &MountPrefix) {
	for _ in 0..200 {
		if let Some((MountState::Running { .. }, _)) = compositor.mount_table().state_of(prefix) {
			return;
		}
		tokio::time::sleep(Duration::from_millis(5)).await;
	}
	panic!("mount never reached Running");
}

/// Scenario 1: mount two servers, call each once.
#[tokio::test]
async fn mounts_two_servers_and_calls_each_once() {
	let compositor = Compositor::new(Arc::new(AlwaysAllow), CompositorConfig::default());
	let alpha = MountPrefix::new("alpha").unwrap();
	let beta = MountPrefix::new("beta").unwrap();
	compositor.mount_inproc(alpha.clone(), false, |_n| Arc::new(PingServer)).unwrap();
	compositor.mount_inproc(beta.clone(), false, |_n| Arc::new(EchoServer)).unwrap();
	wait_running(&compositor, &alpha).await;
	wait_running(&compositor, &beta).await;

	match compositor.call_tool("alpha_ping", Some("{}".to_string())).await.unwrap() {
		CallOutcome::Result(r) => assert_eq!(r, ToolResult::ok_text("pong")),
		other => panic!("unexpected: {other:?}"),
	}
	match compositor.call_tool("beta_echo", Some(r#"{"text":"hi"}"#.to_string())).await.unwrap() {
		CallOutcome::Result(r) => assert_eq!(r, ToolResult::ok_json(serde_json::json!({"echo":"hi"}))),
		other => panic!("unexpected: {other:?}"),
	}
}

/// Scenario 2: approval approve path.
#[tokio::test]
async fn approval_approve_path_yields_backend_result() {
	let compositor = Compositor::new(Arc::new(AlwaysAsk), CompositorConfig::default());
	let beta = MountPrefix::new("beta").unwrap();
	compositor.mount_inproc(beta.clone(), false, |_n| Arc::new(EchoServer)).unwrap();
	wait_running(&compositor, &beta).await;

	let gateway = compositor.gateway().clone();
	let comp = compositor.clone();
	let call = tokio::spawn(async move { comp.call_tool("beta_echo", Some(r#"{"text":"hello"}"#.to_string())).await });

	let call_id = loop {
		if let Some(pending) = gateway.pending_approvals().into_iter().next() {
			break pending.call_id;
		}
		tokio::time::sleep(Duration::from_millis(5)).await;
	};
	gateway.resolve_approval(call_id, ApprovalOutcome::Approve).unwrap();

	match call.await.unwrap().unwrap() {
		CallOutcome::Result(r) => assert_eq!(r, ToolResult::ok_json(serde_json::json!({"echo":"hello"}))),
		other => panic!("unexpected: {other:?}"),
	}
}

/// Scenario 3: approval deny-abort.
#[tokio::test]
async fn approval_deny_abort_signals_abort() {
	let compositor = Compositor::new(Arc::new(AlwaysAsk), CompositorConfig::default());
	let beta = MountPrefix::new("beta").unwrap();
	compositor.mount_inproc(beta.clone(), false, |_n| Arc::new(EchoServer)).unwrap();
	wait_running(&compositor, &beta).await;

	let gateway = compositor.gateway().clone();
	let comp = compositor.clone();
	let call = tokio::spawn(async move { comp.call_tool("beta_echo", Some(r#"{"text":"hello"}"#.to_string())).await });

	let call_id = loop {
		if let Some(pending) = gateway.pending_approvals().into_iter().next() {
			break pending.call_id;
		}
		tokio::time::sleep(Duration::from_millis(5)).await;
	};
	gateway.resolve_approval(call_id, ApprovalOutcome::DenyAbort).unwrap();

	match call.await.unwrap().unwrap() {
		CallOutcome::DenyAbort { .. } => {},
		other => panic!("unexpected: {other:?}"),
	}
}

/// Scenario 4: policy-evaluator timeout degrades to DenyAbort with the
/// canonical message.
#[tokio::test]
async fn evaluator_timeout_yields_canonical_deny_abort() {
	let config = CompositorConfig {
		policy_decide_timeout: Duration::from_millis(100),
		..CompositorConfig::default()
	};
	let compositor = Compositor::new(Arc::new(SleepsPastBudget), config);
	let alpha = MountPrefix::new("alpha").unwrap();
	compositor.mount_inproc(alpha.clone(), false, |_n| Arc::new(PingServer)).unwrap();
	wait_running(&compositor, &alpha).await;

	match compositor.call_tool("alpha_ping", None).await.unwrap() {
		CallOutcome::DenyAbort { rationale } => {
			assert_eq!(rationale, compositor_core::policy::POLICY_EVALUATOR_ERROR_MSG);
		},
		other => panic!("unexpected: {other:?}"),
	}
}

/// Scenario 5: notifications emitted before any session exists are queued,
/// then flushed to a newly joined session on its first `list_resources` call,
/// attributed to the originating mount with prefixed URIs.
#[tokio::test]
async fn late_session_receives_queued_notifications_on_first_list_resources() {
	let compositor = Compositor::new(Arc::new(AlwaysAllow), CompositorConfig::default());
	let origin = MountPrefix::new("origin").unwrap();

	let notifier_holder: Arc<parking_lot::Mutex<Option<compositor_core::backend::inproc::InProcNotifier>>> =
		Arc::new(parking_lot::Mutex::new(None));
	{
		let notifier_holder = notifier_holder.clone();
		compositor
			.mount_inproc(origin.clone(), false, move |notifier| {
				*notifier_holder.lock() = Some(notifier);
				Arc::new(OriginServer)
			})
			.unwrap();
	}
	wait_running(&compositor, &origin).await;

	let notifier = notifier_holder.lock().clone().unwrap();
	notifier.notify(RawNotification::ResourceListChanged);
	notifier.notify(RawNotification::ResourceUpdated {
		uri: "resource://dummy".to_string(),
	});

	// Give the per-mount consumer task a moment to drain both events into the
	// pending queue before any session exists.
	tokio::time::sleep(Duration::from_millis(50)).await;

	let (_session_id, mut rx) = compositor.add_session();
	assert!(rx.try_recv().is_err(), "join alone must not flush the pending queue");

	let _ = compositor.list_resources(&origin).await.unwrap();

	let first = rx.recv().await.unwrap();
	let second = rx.recv().await.unwrap();
	assert_eq!(first.origin_prefix(), "origin");
	assert_eq!(second.origin_prefix(), "origin");
	match second {
		compositor_core::types::NotificationEvent::ResourceUpdated { uri, .. } => {
			assert_eq!(uri, "resource://origin/dummy");
		},
		other => panic!("expected ResourceUpdated, got {other:?}"),
	}
}

/// Detaching a prefix through the client-facing admin tool (not
/// `Compositor::unmount` directly) must retire its subscription records too —
/// the subscriptions index is wired as a mount listener precisely so every
/// unmount path converges on the same cleanup.
#[tokio::test]
async fn admin_detach_drops_subscription_record_for_detached_prefix() {
	let compositor = Compositor::new(Arc::new(AlwaysAllow), CompositorConfig::default());
	let origin = MountPrefix::new("origin").unwrap();
	compositor.mount_inproc(origin.clone(), false, |_n| Arc::new(SubscribableServer)).unwrap();
	wait_running(&compositor, &origin).await;

	let backend = compositor.mount_table().backend_of(&origin).unwrap();
	compositor.subscriptions().subscribe(&origin, "resource://dummy", &backend, false).await;

	let kind = compositor_core::subscriptions::SubscriptionKind::Resource {
		prefix: "origin".to_string(),
		uri: "resource://dummy".to_string(),
	};
	assert!(compositor.subscriptions().get(&kind).is_some());

	let outcome = compositor
		.call_tool("compositor_admin_detach_server", Some(r#"{"prefix":"origin"}"#.to_string()))
		.await
		.unwrap();
	match outcome {
		CallOutcome::Result(r) => assert!(!r.is_error, "detach should succeed: {r:?}"),
		other => panic!("unexpected: {other:?}"),
	}

	assert!(compositor.subscriptions().get(&kind).is_none());
}

/// Scenario 6: detaching a pinned server is rejected and leaves it mounted.
#[tokio::test]
async fn pinned_server_detach_is_rejected() {
	let compositor = Compositor::new(Arc::new(AlwaysAllow), CompositorConfig::default());
	let meta_prefix = MountPrefix::new(compositor_core::compositor::META_PREFIX).unwrap();

	let err = compositor.unmount(&meta_prefix).await.unwrap_err();
	assert_eq!(err.kind(), "pinned");
	assert!(compositor.mount_table().is_mounted(&meta_prefix));
}
