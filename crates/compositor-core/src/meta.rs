//! The Meta surface: a pinned in-process mount that publishes the mount
//! table's own state as resources, so the compositor is self-describing and
//! testable through the same Backend contract every other mount uses.
//!
//! There is deliberately no separate "instructions" or "capabilities"
//! resource here beyond what `InitializeResult` already carries per mount —
//! adding one would just duplicate state the `{prefix}/state` resource
//! already exposes.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::backend::inproc::{InProcNotifier, InProcServer};
use crate::backend::BackendError;
use crate::mount::{MountState, MountTable};
use crate::types::{InitializeResult, RawNotification, ResourceContent, ResourceDescriptor, Tool, ToolResult};

pub const SERVERS_URI: &str = "meta://servers";

pub fn state_uri(prefix: &str) -> String {
	format!("meta://{prefix}/state")
}

#[derive(Serialize)]
struct ServerEntry {
	prefix: String,
	pinned: bool,
	state: &'static str,
	#[serde(skip_serializing_if = "Option::is_none")]
	initialize_result: Option<InitializeResult>,
	#[serde(skip_serializing_if = "Option::is_none")]
	tools: Option<Vec<Tool>>,
	#[serde(skip_serializing_if = "Option::is_none")]
	failure_reason: Option<String>,
}

pub struct MetaServer {
	mount_table: Arc<MountTable>,
	notifier: InProcNotifier,
}

impl MetaServer {
	/// Registers a mount listener that turns every mount-table transition
	/// into a `resource-list-changed`/`resource-updated` notification, so
	/// clients watching the meta surface stay in sync without polling.
	pub fn new(mount_table: Arc<MountTable>, notifier: InProcNotifier) -> Arc<Self> {
		let server = Arc::new(Self {
			mount_table: mount_table.clone(),
			notifier: notifier.clone(),
		});
		let observer = server.clone();
		mount_table.add_listener(move |event| observer.on_mount_event(event));
		server
	}

	fn on_mount_event(&self, event: crate::mount::MountEvent) {
		use crate::mount::MountEvent;
		match event {
			MountEvent::Mounted { .. } | MountEvent::Unmounted { .. } => {
				self.notifier.notify(RawNotification::ResourceListChanged);
			},
			MountEvent::StateChanged { prefix } => {
				self.notifier.notify(RawNotification::ResourceUpdated {
					uri: state_uri(prefix.as_str()),
				});
			},
		}
	}

	fn entry_for(&self, prefix: &str) -> Option<ServerEntry> {
		let prefix_obj = crate::naming::MountPrefix::new(prefix).ok()?;
		let (state, pinned) = self.mount_table.state_of(&prefix_obj)?;
		Some(match state {
			MountState::Initializing => ServerEntry {
				prefix: prefix.to_string(),
				pinned,
				state: "initializing",
				initialize_result: None,
				tools: None,
				failure_reason: None,
			},
			MountState::Running { initialize_result, tools } => ServerEntry {
				prefix: prefix.to_string(),
				pinned,
				state: "running",
				initialize_result: Some(initialize_result),
				tools: Some(tools),
				failure_reason: None,
			},
			MountState::Failed { reason } => ServerEntry {
				prefix: prefix.to_string(),
				pinned,
				state: "failed",
				initialize_result: None,
				tools: None,
				failure_reason: Some(reason),
			},
		})
	}
}

#[async_trait]
impl InProcServer for MetaServer {
	async fn initialize(&self) -> Result<InitializeResult, BackendError> {
		Ok(InitializeResult {
			server_name: "compositor-meta".into(),
			server_version: env!("CARGO_PKG_VERSION").into(),
			protocol_version: "2025-06-18".into(),
			instructions: None,
			capabilities: Default::default(),
		})
	}

	async fn list_tools(&self) -> Result<Vec<Tool>, BackendError> {
		Ok(vec![])
	}

	async fn call_tool(&self, name: &str, _arguments_json: Option<String>) -> Result<ToolResult, BackendError> {
		Err(BackendError::CallFailed(format!("meta surface exposes no tools, got {name}")))
	}

	async fn list_resources(&self) -> Result<Vec<ResourceDescriptor>, BackendError> {
		let mut resources = vec![ResourceDescriptor {
			uri: SERVERS_URI.to_string(),
			name: Some("mounted servers".into()),
			mime_type: Some("application/json".into()),
		}];
		for prefix in self.mount_table.snapshot_prefixes() {
			resources.push(ResourceDescriptor {
				uri: state_uri(prefix.as_str()),
				name: Some(format!("{prefix} state")),
				mime_type: Some("application/json".into()),
			});
		}
		Ok(resources)
	}

	async fn read_resource(&self, uri: &str) -> Result<ResourceContent, BackendError> {
		if uri == SERVERS_URI {
			let prefixes: Vec<String> = self
				.mount_table
				.snapshot_prefixes()
				.into_iter()
				.map(|p| p.as_str().to_string())
				.collect();
			return Ok(ResourceContent {
				uri: uri.to_string(),
				parts: vec![crate::types::ContentPart::Json {
					value: serde_json::json!({ "servers": prefixes }),
				}],
			});
		}

		let prefix = uri
			.strip_prefix("meta://")
			.and_then(|rest| rest.strip_suffix("/state"))
			.ok_or_else(|| BackendError::UnknownResource(uri.to_string()))?;

		let entry = self.entry_for(prefix).ok_or_else(|| BackendError::UnknownResource(uri.to_string()))?;
		let value = serde_json::to_value(&entry).map_err(|e| BackendError::CallFailed(format!("failed to encode server entry: {e}")))?;
		Ok(ResourceContent {
			uri: uri.to_string(),
			parts: vec![crate::types::ContentPart::Json { value }],
		})
	}
}

#[cfg(test)]
mod tests {
	use async_trait::async_trait;

	use super::*;
	use crate::naming::MountPrefix;

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
			Ok(vec![])
		}
		async fn call_tool(&self, _name: &str, _arguments_json: Option<String>) -> Result<ToolResult, BackendError> {
			Ok(ToolResult::ok_text("pong"))
		}
	}

	#[tokio::test]
	async fn servers_resource_lists_mounted_prefixes() {
		let table = MountTable::new();
		let (notifier, _rx) = InProcNotifier::channel();
		let meta = MetaServer::new(table.clone(), notifier);

		table.mount_inproc(MountPrefix::new("alpha").unwrap(), false, |_n| Arc::new(PingServer)).unwrap();

		let content = meta.read_resource(SERVERS_URI).await.unwrap();
		let crate::types::ContentPart::Json { value } = &content.parts[0] else {
			panic!("expected json content");
		};
		assert_eq!(value["servers"], serde_json::json!(["alpha"]));
	}

	#[tokio::test]
	async fn unknown_state_uri_is_rejected() {
		let table = MountTable::new();
		let (notifier, _rx) = InProcNotifier::channel();
		let meta = MetaServer::new(table, notifier);
		let err = meta.read_resource("meta://nope/state").await.unwrap_err();
		assert!(matches!(err, BackendError::UnknownResource(_)));
	}
}
