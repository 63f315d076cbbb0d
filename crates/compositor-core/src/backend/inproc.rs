//! In-process backend adapter: direct function dispatch to a server object
//! living in the same process, with notifications delivered through a shared
//! queue the server pushes into.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{Backend, BackendError};
use crate::types::{InitializeResult, RawNotification, ResourceContent, ResourceDescriptor, Tool, ToolResult};

/// The capability set an in-process tool server implements. This is
/// deliberately identical in shape to [`Backend`] minus the notification
/// plumbing and shutdown, which `InProcBackend` handles on the server's
/// behalf.
#[async_trait]
pub trait InProcServer: Send + Sync {
	async fn initialize(&self) -> Result<InitializeResult, BackendError>;
	async fn list_tools(&self) -> Result<Vec<Tool>, BackendError>;
	async fn call_tool(&self, name: &str, arguments_json: Option<String>) -> Result<ToolResult, BackendError>;

	async fn list_resources(&self) -> Result<Vec<ResourceDescriptor>, BackendError> {
		Err(BackendError::ResourcesUnsupported)
	}

	async fn read_resource(&self, uri: &str) -> Result<ResourceContent, BackendError> {
		let _ = uri;
		Err(BackendError::ResourcesUnsupported)
	}

	async fn subscribe(&self, uri: &str) -> Result<(), BackendError> {
		let _ = uri;
		Err(BackendError::ResourcesUnsupported)
	}

	async fn unsubscribe(&self, uri: &str) -> Result<(), BackendError> {
		let _ = uri;
		Err(BackendError::ResourcesUnsupported)
	}
}

/// A handle an `InProcServer` implementation clones and uses to push
/// notifications upstream. Sends are best-effort: a full queue drops the
/// newest pending event rather than blocking the server.
#[derive(Clone)]
pub struct InProcNotifier(mpsc::Sender<RawNotification>);

impl InProcNotifier {
	/// Build a notifier/receiver pair. Call this before constructing the
	/// server so the notifier can be handed to it (or a collaborator it
	/// owns) before the backend ever dispatches a call — otherwise an event
	/// emitted during construction would have nowhere to go.
	pub fn channel() -> (Self, mpsc::Receiver<RawNotification>) {
		let (tx, rx) = mpsc::channel(256);
		(Self(tx), rx)
	}

	pub fn notify(&self, event: RawNotification) {
		if let Err(mpsc::error::TrySendError::Full(event)) = self.0.try_send(event) {
			tracing::warn!(target: "compositor", ?event, "inproc notifier queue full, dropping event");
		}
	}
}

pub struct InProcBackend {
	server: Arc<dyn InProcServer>,
	notif_rx: Mutex<Option<mpsc::Receiver<RawNotification>>>,
}

impl InProcBackend {
	/// Wrap `server`, consuming the receiver half of a notifier already
	/// handed to it via [`InProcNotifier::channel`].
	pub fn new(server: Arc<dyn InProcServer>, notif_rx: mpsc::Receiver<RawNotification>) -> Self {
		Self {
			server,
			notif_rx: Mutex::new(Some(notif_rx)),
		}
	}

	/// Wrap a server that never emits notifications.
	pub fn without_notifications(server: Arc<dyn InProcServer>) -> Self {
		let (_tx, rx) = mpsc::channel(1);
		Self::new(server, rx)
	}
}

#[async_trait]
impl Backend for InProcBackend {
	async fn initialize(&self) -> Result<InitializeResult, BackendError> {
		self.server.initialize().await
	}

	async fn list_tools(&self) -> Result<Vec<Tool>, BackendError> {
		self.server.list_tools().await
	}

	async fn call_tool(&self, name: &str, arguments_json: Option<String>) -> Result<ToolResult, BackendError> {
		self.server.call_tool(name, arguments_json).await
	}

	async fn list_resources(&self) -> Result<Vec<ResourceDescriptor>, BackendError> {
		self.server.list_resources().await
	}

	async fn read_resource(&self, uri: &str) -> Result<ResourceContent, BackendError> {
		self.server.read_resource(uri).await
	}

	async fn subscribe(&self, uri: &str) -> Result<(), BackendError> {
		self.server.subscribe(uri).await
	}

	async fn unsubscribe(&self, uri: &str) -> Result<(), BackendError> {
		self.server.unsubscribe(uri).await
	}

	fn take_notifications(&self) -> Option<mpsc::Receiver<RawNotification>> {
		self.notif_rx.lock().take()
	}

	async fn shutdown(&self) {
		// In-proc servers have no external resource to release; dropping the
		// Arc when the MountEntry is dropped is sufficient.
	}
}

#[cfg(test)]
mod tests {
	use super::*;

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

	#[tokio::test]
	async fn dispatches_to_server() {
		let backend = InProcBackend::without_notifications(Arc::new(PingServer));
		let result = backend.call_tool("ping", None).await.unwrap();
		assert_eq!(result, ToolResult::ok_text("pong"));
	}

	#[tokio::test]
	async fn notifications_taken_once() {
		let (notifier, notif_rx) = InProcNotifier::channel();
		let backend = InProcBackend::new(Arc::new(PingServer), notif_rx);
		notifier.notify(RawNotification::ResourceListChanged);
		let mut rx = backend.take_notifications().expect("first take succeeds");
		assert!(backend.take_notifications().is_none(), "second take returns None");
		let event = rx.recv().await.expect("event delivered");
		assert_eq!(event, RawNotification::ResourceListChanged);
	}
}
