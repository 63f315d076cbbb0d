//! The Admin surface: a pinned in-process mount exposing the one tool
//! clients use to manage the mount table directly — detaching a server.

use std::sync::Arc;

use async_trait::async_trait;

use crate::backend::inproc::InProcServer;
use crate::backend::BackendError;
use crate::error::CompositorError;
use crate::mount::MountTable;
use crate::naming::MountPrefix;
use crate::types::{InitializeResult, Tool, ToolResult};

pub struct AdminServer {
	mount_table: Arc<MountTable>,
}

impl AdminServer {
	pub fn new(mount_table: Arc<MountTable>) -> Arc<Self> {
		Arc::new(Self { mount_table })
	}

	pub async fn detach_server(&self, prefix: &str) -> Result<(), CompositorError> {
		let prefix = MountPrefix::new(prefix).map_err(CompositorError::InvalidName)?;
		self.mount_table.unmount(&prefix).await
	}
}

#[async_trait]
impl InProcServer for AdminServer {
	async fn initialize(&self) -> Result<InitializeResult, BackendError> {
		Ok(InitializeResult {
			server_name: "compositor-admin".into(),
			server_version: env!("CARGO_PKG_VERSION").into(),
			protocol_version: "2025-06-18".into(),
			instructions: None,
			capabilities: Default::default(),
		})
	}

	async fn list_tools(&self) -> Result<Vec<Tool>, BackendError> {
		Ok(vec![Tool {
			name: "detach_server".into(),
			description: Some("Unmount a non-pinned server by prefix".into()),
			input_schema: serde_json::json!({
				"type": "object",
				"properties": { "prefix": { "type": "string" } },
				"required": ["prefix"],
			}),
		}])
	}

	async fn call_tool(&self, name: &str, arguments_json: Option<String>) -> Result<ToolResult, BackendError> {
		if name != "detach_server" {
			return Err(BackendError::CallFailed(format!("admin surface exposes no tool named {name}")));
		}
		let prefix = arguments_json
			.as_deref()
			.and_then(|raw| serde_json::from_str::<serde_json::Value>(raw).ok())
			.and_then(|v| v.get("prefix").and_then(|p| p.as_str()).map(str::to_string))
			.ok_or_else(|| BackendError::CallFailed("missing required argument 'prefix'".into()))?;

		match self.detach_server(&prefix).await {
			Ok(()) => Ok(ToolResult::ok_text(format!("detached {prefix}"))),
			Err(e) => Ok(ToolResult::error(e.to_string())),
		}
	}
}
