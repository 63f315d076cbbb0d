//! Shared MCP-shaped data types exchanged across the Backend contract.
//!
//! `Tool`, `InitializeResult`, and resource content shapes are treated as
//! already-fixed externally: the compositor's job is to aggregate them, not
//! to define the wire format of an individual tool server. These are small,
//! local mirrors of the shapes a Model Context Protocol server would expose;
//! they carry exactly the fields this crate's invariants and merge logic
//! touch.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A tool advertised by a backend, as seen before the compositor's naming
/// prefix is applied.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tool {
	pub name: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	/// JSON Schema for the tool's input, as a raw value so this crate never
	/// has to validate or interpret it.
	pub input_schema: serde_json::Value,
}

/// One block of content inside a [`ToolResult`] or [`ResourceContent`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentPart {
	Text { text: String },
	Json { value: serde_json::Value },
}

/// The result of invoking a tool on a backend.
///
/// `error_code` is only ever set on an error result, and only carries a
/// value when the backend itself attached a numeric code to the failure.
/// The policy gateway inspects this field for a reserved code it uses to
/// signal its own denials, so that a misbehaving backend cannot forge one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResult {
	pub content: Vec<ContentPart>,
	pub is_error: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error_code: Option<i64>,
}

impl ToolResult {
	pub fn ok_text(text: impl Into<String>) -> Self {
		Self {
			content: vec![ContentPart::Text { text: text.into() }],
			is_error: false,
			error_code: None,
		}
	}

	pub fn ok_json(value: serde_json::Value) -> Self {
		Self {
			content: vec![ContentPart::Json { value }],
			is_error: false,
			error_code: None,
		}
	}

	pub fn error(message: impl Into<String>) -> Self {
		Self {
			content: vec![ContentPart::Text { text: message.into() }],
			is_error: true,
			error_code: None,
		}
	}

	pub fn error_with_code(message: impl Into<String>, code: i64) -> Self {
		Self {
			content: vec![ContentPart::Text { text: message.into() }],
			is_error: true,
			error_code: Some(code),
		}
	}
}

/// A resource advertised by `list_resources`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceDescriptor {
	pub uri: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub mime_type: Option<String>,
}

/// The content returned by `read_resource`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceContent {
	pub uri: String,
	pub parts: Vec<ContentPart>,
}

/// A server's identity and capabilities, returned once from `initialize()`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InitializeResult {
	pub server_name: String,
	pub server_version: String,
	pub protocol_version: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub instructions: Option<String>,
	#[serde(default)]
	pub capabilities: BTreeMap<String, bool>,
}

/// A server-initiated event, tagged with the mount it came from once the
/// compositor attributes it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum NotificationEvent {
	ResourceListChanged {
		origin_prefix: String,
	},
	ResourceUpdated {
		origin_prefix: String,
		uri: String,
	},
}

impl NotificationEvent {
	pub fn origin_prefix(&self) -> &str {
		match self {
			NotificationEvent::ResourceListChanged { origin_prefix } => origin_prefix,
			NotificationEvent::ResourceUpdated { origin_prefix, .. } => origin_prefix,
		}
	}
}

/// A notification as emitted by a backend, before the compositor has
/// attributed it to a mount (no `origin_prefix` yet, and resource URIs are
/// still in the backend's own namespace).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum RawNotification {
	ResourceListChanged,
	ResourceUpdated { uri: String },
}
