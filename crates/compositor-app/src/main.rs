//! Demo binary: wires a `Compositor` with two in-process tool servers
//! (`ping`, `echo`) and a configurable policy evaluator, then drives a
//! handful of calls against it so the wiring can be exercised end to end
//! without a real MCP client.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use clap::{Parser, ValueEnum};
use compositor_core::backend::inproc::InProcServer;
use compositor_core::backend::BackendError;
use compositor_core::policy::{PolicyEvaluator, PolicyRequest, PolicyResponse};
use compositor_core::types::{InitializeResult, Tool, ToolResult};
use compositor_core::{Compositor, CompositorConfig, MountPrefix};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PolicyMode {
	/// Every call proceeds.
	Allow,
	/// Every call requires approval before it proceeds (auto-approved here
	/// after a short delay, to keep the demo non-interactive).
	Ask,
}

#[derive(Parser, Debug)]
#[command(name = "compositor", about = "Demo runtime for the tool compositor")]
struct Args {
	#[arg(long, value_enum, default_value_t = PolicyMode::Allow)]
	policy: PolicyMode,
}

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
			description: Some("Replies pong".into()),
			input_schema: serde_json::json!({"type": "object"}),
		}])
	}

	async fn call_tool(&self, name: &str, _arguments_json: Option<String>) -> Result<ToolResult, BackendError> {
		if name == "ping" {
			Ok(ToolResult::ok_text("pong"))
		} else {
			Err(BackendError::CallFailed(format!("ping server has no tool named {name}")))
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
		Ok(vec![Tool {
			name: "echo".into(),
			description: Some("Echoes back the 'text' argument".into()),
			input_schema: serde_json::json!({
				"type": "object",
				"properties": { "text": { "type": "string" } },
			}),
		}])
	}

	async fn call_tool(&self, name: &str, arguments_json: Option<String>) -> Result<ToolResult, BackendError> {
		if name != "echo" {
			return Err(BackendError::CallFailed(format!("echo server has no tool named {name}")));
		}
		let args: serde_json::Value = arguments_json
			.as_deref()
			.map(serde_json::from_str)
			.transpose()
			.map_err(|e| BackendError::CallFailed(format!("bad arguments: {e}")))?
			.unwrap_or_default();
		let text = args.get("text").and_then(|v| v.as_str()).unwrap_or("").to_string();
		Ok(ToolResult::ok_json(serde_json::json!({ "echo": text })))
	}
}

/// Allows everything immediately.
struct AllowEvaluator;

#[async_trait]
impl PolicyEvaluator for AllowEvaluator {
	async fn decide(&self, _request: &PolicyRequest) -> PolicyResponse {
		PolicyResponse::allow()
	}
}

/// Asks for every call. The demo auto-approves from a background task so the
/// run completes without a human in the loop.
struct AskEvaluator;

#[async_trait]
impl PolicyEvaluator for AskEvaluator {
	async fn decide(&self, _request: &PolicyRequest) -> PolicyResponse {
		PolicyResponse::ask()
	}
}

#[tokio::main]
async fn main() -> Result<()> {
	tracing_subscriber::fmt()
		.with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("compositor_core=info".parse()?))
		.init();

	let args = Args::parse();
	let evaluator: Arc<dyn PolicyEvaluator> = match args.policy {
		PolicyMode::Allow => Arc::new(AllowEvaluator),
		PolicyMode::Ask => Arc::new(AskEvaluator),
	};

	let compositor = Compositor::new(evaluator, CompositorConfig::default());

	compositor.mount_inproc(MountPrefix::new("ping")?, false, |_notifier| Arc::new(PingServer))?;
	compositor.mount_inproc(MountPrefix::new("echo")?, false, |_notifier| Arc::new(EchoServer))?;

	if matches!(args.policy, PolicyMode::Ask) {
		let gateway = compositor.gateway().clone();
		tokio::spawn(async move {
			loop {
				for pending in gateway.pending_approvals() {
					tracing::info!(call_id = %pending.call_id, tool = %pending.request.name, "auto-approving demo call");
					let _ = gateway.resolve_approval(pending.call_id, compositor_core::policy::ApprovalOutcome::Approve);
				}
				tokio::time::sleep(std::time::Duration::from_millis(20)).await;
			}
		});
	}

	wait_until_running(&compositor, &MountPrefix::new("ping")?).await;
	wait_until_running(&compositor, &MountPrefix::new("echo")?).await;

	let ping = compositor.call_tool("ping_ping", None).await?;
	println!("ping_ping -> {ping:?}");

	let echo = compositor
		.call_tool("echo_echo", Some(r#"{"text":"hello from the compositor"}"#.to_string()))
		.await?;
	println!("echo_echo -> {echo:?}");

	compositor.shutdown().await;
	Ok(())
}

async fn wait_until_running(compositor: &Compositor, prefix: &MountPrefix) {
	for _ in 0..200 {
		if let Some((compositor_core::mount::MountState::Running { .. }, _)) = compositor.mount_table().state_of(prefix) {
			return;
		}
		tokio::time::sleep(std::time::Duration::from_millis(5)).await;
	}
}
