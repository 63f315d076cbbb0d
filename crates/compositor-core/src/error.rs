//! Error taxonomy shared across the compositor's public surface.
//!
//! Each subsystem (naming, backend, mount table, subscriptions, policy
//! gateway) owns its own error enum; this module aggregates the variants a
//! caller of [`crate::compositor::Compositor`] can observe directly.

use thiserror::Error;

use crate::backend::BackendError;
use crate::naming::NamingError;

/// Errors returned synchronously from the compositor's public mount/admin
/// operations. These are never converted into a backend tool result; they
/// are always returned directly to the caller.
#[derive(Debug, Error, Clone)]
pub enum CompositorError {
	#[error("invalid name: {0}")]
	InvalidName(#[from] NamingError),

	#[error("prefix '{0}' is already mounted")]
	DuplicatePrefix(String),

	#[error("prefix '{0}' is not mounted")]
	UnknownPrefix(String),

	#[error("prefix '{0}' is pinned and cannot be detached")]
	Pinned(String),

	#[error("backend error: {0}")]
	Backend(#[from] BackendError),
}

impl CompositorError {
	/// A stable, machine-readable kind string, so callers can match on error
	/// kind instead of parsing `Display` output.
	pub fn kind(&self) -> &'static str {
		match self {
			CompositorError::InvalidName(_) => "invalid_name",
			CompositorError::DuplicatePrefix(_) => "duplicate_prefix",
			CompositorError::UnknownPrefix(_) => "unknown_prefix",
			CompositorError::Pinned(_) => "pinned",
			CompositorError::Backend(_) => "backend_error",
		}
	}
}
