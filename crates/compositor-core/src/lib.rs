//! In-process runtime that aggregates tool servers behind a policy-mediated,
//! MCP-shaped surface.
//!
//! A [`compositor::Compositor`] mounts backends (in-process, subprocess, or
//! HTTP) under disjoint name prefixes, forwards tool calls through a
//! [`policy::PolicyGateway`], fans server-initiated notifications out to
//! every connected session, and keeps its own state observable and
//! manageable through two pinned mounts: `compositor_meta` and
//! `compositor_admin`.

pub mod admin;
pub mod backend;
pub mod compositor;
pub mod error;
pub mod fanout;
pub mod meta;
pub mod mount;
pub mod naming;
pub mod policy;
pub mod subscriptions;
pub mod types;

pub use compositor::{CallOutcome, Compositor, CompositorConfig};
pub use error::CompositorError;
pub use naming::MountPrefix;
