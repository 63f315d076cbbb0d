//! Backend adapters.
//!
//! A `Backend` is the uniform capability set the compositor speaks to
//! regardless of how the underlying tool server is actually reached: in the
//! same process, over a line-delimited JSON pipe to a subprocess, or over
//! HTTP. `BackendHandle` is a tagged union over the three adapter kinds; each
//! variant's inner type implements the shared [`Backend`] trait so the mount
//! table and notification fan-out never need to match on the variant.

pub mod http;
pub mod inproc;
pub mod stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::types::{InitializeResult, RawNotification, ResourceContent, ResourceDescriptor, Tool, ToolResult};

pub use http::HttpBackend;
pub use inproc::InProcBackend;
pub use stdio::StdioBackend;

/// Errors a backend adapter can raise. `Died` and `InitFailed` are fatal to
/// the owning mount; `CallFailed` surfaces as a `ToolResult { is_error: true
/// }` instead of propagating as an error, so it is only produced by
/// `call_tool`'s `Result` in the narrow sense of "the transport itself
/// broke", not "the tool reported failure".
#[derive(Debug, Error, Clone)]
pub enum BackendError {
	#[error("backend failed to initialize: {0}")]
	InitFailed(String),
	#[error("backend died: {0}")]
	Died(String),
	#[error("backend call failed: {0}")]
	CallFailed(String),
	#[error("backend does not support resources")]
	ResourcesUnsupported,
	#[error("unknown resource uri: {0}")]
	UnknownResource(String),
}

/// The shared capability set every mounted backend exposes.
///
/// `initialize` is one-shot per backend lifetime: implementations should
/// return a cached result on subsequent calls rather than re-handshaking.
#[async_trait]
pub trait Backend: Send + Sync {
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

	/// Take ownership of the backend's notification stream. Returns `None` if
	/// already taken (a backend is consumed by exactly one fan-out task) or
	/// if this backend never emits notifications.
	fn take_notifications(&self) -> Option<mpsc::Receiver<RawNotification>> {
		None
	}

	/// Idempotent: releases whatever resources the adapter holds (subprocess,
	/// HTTP client, in-proc registration).
	async fn shutdown(&self);
}

/// The tagged union of adapter kinds a [`crate::mount::MountEntry`] owns.
pub enum BackendHandle {
	InProc(Box<InProcBackend>),
	Stdio(Box<StdioBackend>),
	Http(Box<HttpBackend>),
}

impl BackendHandle {
	fn inner(&self) -> &dyn Backend {
		match self {
			BackendHandle::InProc(b) => b.as_ref(),
			BackendHandle::Stdio(b) => b.as_ref(),
			BackendHandle::Http(b) => b.as_ref(),
		}
	}

	pub fn kind(&self) -> &'static str {
		match self {
			BackendHandle::InProc(_) => "inproc",
			BackendHandle::Stdio(_) => "stdio",
			BackendHandle::Http(_) => "http",
		}
	}
}

#[async_trait]
impl Backend for BackendHandle {
	async fn initialize(&self) -> Result<InitializeResult, BackendError> {
		self.inner().initialize().await
	}

	async fn list_tools(&self) -> Result<Vec<Tool>, BackendError> {
		self.inner().list_tools().await
	}

	async fn call_tool(&self, name: &str, arguments_json: Option<String>) -> Result<ToolResult, BackendError> {
		self.inner().call_tool(name, arguments_json).await
	}

	async fn list_resources(&self) -> Result<Vec<ResourceDescriptor>, BackendError> {
		self.inner().list_resources().await
	}

	async fn read_resource(&self, uri: &str) -> Result<ResourceContent, BackendError> {
		self.inner().read_resource(uri).await
	}

	async fn subscribe(&self, uri: &str) -> Result<(), BackendError> {
		self.inner().subscribe(uri).await
	}

	async fn unsubscribe(&self, uri: &str) -> Result<(), BackendError> {
		self.inner().unsubscribe(uri).await
	}

	fn take_notifications(&self) -> Option<mpsc::Receiver<RawNotification>> {
		self.inner().take_notifications()
	}

	async fn shutdown(&self) {
		self.inner().shutdown().await
	}
}
