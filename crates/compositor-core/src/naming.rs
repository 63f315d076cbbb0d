//! Canonical naming for mounted tools and resource URIs.
//!
//! Single source of truth for how the compositor qualifies a backend's tools
//! and resources under its mount prefix. Format: `{prefix}_{tool}`. Only the
//! first underscore is significant when splitting a fully-qualified name back
//! apart, because the tool portion may itself contain underscores; callers
//! must confirm the prefix against the registry rather than parse
//! structurally (see `split_known_prefix`).

use std::collections::HashSet;

use thiserror::Error;

const SEPARATOR: char = '_';

/// Errors raised while validating or building names.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NamingError {
	#[error("mount prefix must match [a-z][a-z0-9_]{{0,49}}, got '{0}'")]
	InvalidPrefix(String),
	#[error("tool name must be non-empty")]
	EmptyTool,
	#[error("mount prefix must be non-empty")]
	EmptyPrefix,
}

/// A validated, immutable mount prefix: `[a-z][a-z0-9_]{0,49}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MountPrefix(String);

impl MountPrefix {
	pub fn new(raw: impl Into<String>) -> Result<Self, NamingError> {
		let raw = raw.into();
		if raw.is_empty() {
			return Err(NamingError::EmptyPrefix);
		}
		if raw.len() > 50 {
			return Err(NamingError::InvalidPrefix(raw));
		}
		let mut chars = raw.chars();
		let first = chars.next().expect("checked non-empty above");
		if !first.is_ascii_lowercase() {
			return Err(NamingError::InvalidPrefix(raw));
		}
		if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == SEPARATOR) {
			return Err(NamingError::InvalidPrefix(raw));
		}
		Ok(Self(raw))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl std::fmt::Display for MountPrefix {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(&self.0)
	}
}

impl AsRef<str> for MountPrefix {
	fn as_ref(&self) -> &str {
		&self.0
	}
}

/// Build the fully-qualified tool name the client sees: `{prefix}_{tool}`.
pub fn build_tool_name(prefix: &MountPrefix, tool: &str) -> Result<String, NamingError> {
	if tool.is_empty() {
		return Err(NamingError::EmptyTool);
	}
	Ok(format!("{prefix}{SEPARATOR}{tool}"))
}

/// Split a fully-qualified tool name into `(prefix, tool)` by checking `name`
/// against a set of currently-known prefixes, rather than structurally
/// parsing on the first underscore. This is required because the tool
/// portion may itself contain underscores, so the split point is only
/// disambiguated by which mounted prefix actually matches.
///
/// Tries the longest matching known prefix first so that a prefix like
/// `git` does not shadow a more specific mount `git_lfs` sharing a common
/// leading segment.
pub fn split_known_prefix<'a>(
	name: &'a str,
	known_prefixes: impl IntoIterator<Item = &'a MountPrefix>,
) -> Option<(&'a str, &'a str)> {
	let mut best: Option<(&str, &str)> = None;
	for prefix in known_prefixes {
		let p = prefix.as_str();
		let want_len = p.len() + 1;
		if name.len() <= want_len {
			continue;
		}
		if &name[..p.len()] == p && name.as_bytes()[p.len()] == SEPARATOR as u8 {
			let candidate = (p, &name[want_len..]);
			if best.map(|(b, _)| b.len() < p.len()).unwrap_or(true) {
				best = Some(candidate);
			}
		}
	}
	best
}

/// Prefix a resource URI with the owning mount, e.g. `resource://foo/bar`
/// becomes `resource://{prefix}/foo/bar`.
///
/// The scheme (everything up to and including `://`) is preserved verbatim;
/// this module treats the remainder as opaque.
pub fn prefix_resource_uri(prefix: &MountPrefix, uri: &str) -> String {
	match uri.split_once("://") {
		Some((scheme, rest)) => format!("{scheme}://{prefix}/{rest}"),
		None => format!("{prefix}/{uri}"),
	}
}

/// Reverse `prefix_resource_uri` for a known prefix. Returns `None` if `uri`
/// is not actually prefixed with `prefix`.
pub fn unprefix_resource_uri(prefix: &MountPrefix, uri: &str) -> Option<String> {
	match uri.split_once("://") {
		Some((scheme, rest)) => {
			let rest = rest.strip_prefix(prefix.as_str())?.strip_prefix('/')?;
			Some(format!("{scheme}://{rest}"))
		},
		None => uri
			.strip_prefix(prefix.as_str())
			.and_then(|r| r.strip_prefix('/'))
			.map(str::to_string),
	}
}

/// Convenience wrapper used by the mount table to validate a set of prefixes
/// for uniqueness in one pass (used by tests and invariant checks; the live
/// mount table itself enforces uniqueness incrementally as mounts happen).
pub fn assert_unique<'a>(prefixes: impl IntoIterator<Item = &'a MountPrefix>) -> bool {
	let mut seen = HashSet::new();
	prefixes.into_iter().all(|p| seen.insert(p.as_str()))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn valid_prefixes() {
		assert!(MountPrefix::new("alpha").is_ok());
		assert!(MountPrefix::new("a").is_ok());
		assert!(MountPrefix::new("git_lfs").is_ok());
		assert!(MountPrefix::new("a1b2").is_ok());
	}

	#[test]
	fn rejects_empty_uppercase_and_leading_digit() {
		assert_eq!(MountPrefix::new(""), Err(NamingError::EmptyPrefix));
		assert!(MountPrefix::new("Alpha").is_err());
		assert!(MountPrefix::new("1alpha").is_err());
		assert!(MountPrefix::new("alpha-beta").is_err());
	}

	#[test]
	fn build_tool_name_requires_non_empty_tool() {
		let p = MountPrefix::new("alpha").unwrap();
		assert_eq!(build_tool_name(&p, "ping").unwrap(), "alpha_ping");
		assert_eq!(build_tool_name(&p, ""), Err(NamingError::EmptyTool));
	}

	#[test]
	fn split_known_prefix_disambiguates_by_registry() {
		let git = MountPrefix::new("git").unwrap();
		let git_lfs = MountPrefix::new("git_lfs").unwrap();
		let known = vec![&git, &git_lfs];

		// "git_lfs_track" could split as git/lfs_track or git_lfs/track; the
		// longer known prefix wins.
		assert_eq!(
			split_known_prefix("git_lfs_track", known.clone()),
			Some(("git_lfs", "track"))
		);
		assert_eq!(split_known_prefix("git_status", known), Some(("git", "status")));
	}

	#[test]
	fn split_known_prefix_rejects_unknown() {
		let git = MountPrefix::new("git").unwrap();
		assert_eq!(split_known_prefix("editor_save", vec![&git]), None);
	}

	#[test]
	fn resource_uri_roundtrip() {
		let p = MountPrefix::new("origin").unwrap();
		let prefixed = prefix_resource_uri(&p, "resource://dummy");
		assert_eq!(prefixed, "resource://origin/dummy");
		assert_eq!(
			unprefix_resource_uri(&p, &prefixed).as_deref(),
			Some("resource://dummy")
		);
	}

	#[test]
	fn unprefix_rejects_mismatched_prefix() {
		let p = MountPrefix::new("origin").unwrap();
		assert_eq!(unprefix_resource_uri(&p, "resource://other/dummy"), None);
	}
}
