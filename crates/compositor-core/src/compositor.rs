//! The `Compositor`: wires the Naming, Mount Table, Notification Fan-Out,
//! Subscriptions Index, and Policy Gateway components behind a single public
//! surface, and owns the two pinned mounts (`compositor_meta`,
//! `compositor_admin`) that make it self-describing.

use std::sync::Arc;
use std::time::Duration;

use crate::admin::AdminServer;
use crate::backend::inproc::{InProcNotifier, InProcServer};
use crate::backend::http::HttpSpec;
use crate::backend::stdio::StdioSpec;
use crate::backend::Backend;
use crate::error::CompositorError;
use crate::fanout::{FanOut, DEFAULT_PENDING_QUEUE_CAPACITY};
use crate::meta::MetaServer;
use crate::mount::{MountTable, UNMOUNT_GRACE_PERIOD};
use crate::naming::{self, MountPrefix};
use crate::policy::{Admission, PolicyEvaluator, PolicyGateway, PolicyRequest, DEFAULT_DECIDE_TIMEOUT};
use crate::subscriptions::SubscriptionsIndex;
use crate::types::ToolResult;

pub const META_PREFIX: &str = "compositor_meta";
pub const ADMIN_PREFIX: &str = "compositor_admin";

/// Construction-time configuration. Every value that would otherwise be
/// ambient (a global constant, an env-scoped default) is passed in here
/// instead, per the "configuration is a value" design choice.
#[derive(Debug, Clone)]
pub struct CompositorConfig {
	pub pending_queue_capacity: usize,
	pub policy_decide_timeout: Duration,
	pub unmount_grace_period: Duration,
}

impl Default for CompositorConfig {
	fn default() -> Self {
		Self {
			pending_queue_capacity: DEFAULT_PENDING_QUEUE_CAPACITY,
			policy_decide_timeout: DEFAULT_DECIDE_TIMEOUT,
			unmount_grace_period: UNMOUNT_GRACE_PERIOD,
		}
	}
}

/// Outcome of `Compositor::call_tool`, folding the policy gateway's
/// admission decision and the backend's result into one caller-facing shape.
#[derive(Debug, Clone)]
pub enum CallOutcome {
	Result(ToolResult),
	DenyContinue { rationale: String },
	DenyAbort { rationale: String },
}

pub struct Compositor {
	mount_table: Arc<MountTable>,
	fanout: Arc<FanOut>,
	subscriptions: Arc<SubscriptionsIndex>,
	gateway: Arc<PolicyGateway>,
}

impl Compositor {
	/// Construct a compositor with its two pinned surfaces already mounted.
	/// `policy_evaluator` and any initial mounts are injected, per the
	/// explicit-dependency-injection design: no global registry, no ambient
	/// state.
	pub fn new(policy_evaluator: Arc<dyn PolicyEvaluator>, config: CompositorConfig) -> Arc<Self> {
		let mount_table = MountTable::with_grace_period(config.unmount_grace_period);
		let fanout = FanOut::new(config.pending_queue_capacity);
		let subscriptions = SubscriptionsIndex::attached(&mount_table);
		let gateway = Arc::new(PolicyGateway::new(policy_evaluator, config.policy_decide_timeout));

		let compositor = Arc::new(Self {
			mount_table: mount_table.clone(),
			fanout,
			subscriptions,
			gateway,
		});

		mount_table
			.mount_inproc(MountPrefix::new(META_PREFIX).expect("valid literal prefix"), true, {
				let mount_table = mount_table.clone();
				move |notifier| MetaServer::new(mount_table, notifier) as Arc<dyn InProcServer>
			})
			.expect("meta mount is the first registration for its prefix");

		let admin_server = AdminServer::new(mount_table.clone());
		mount_table
			.mount_inproc(MountPrefix::new(ADMIN_PREFIX).expect("valid literal prefix"), true, move |_notifier| {
				admin_server as Arc<dyn InProcServer>
			})
			.expect("admin mount is the first registration for its prefix");

		if let Some(backend) = mount_table.backend_of(&MountPrefix::new(META_PREFIX).unwrap()) {
			compositor.fanout.spawn_mount_consumer(MountPrefix::new(META_PREFIX).unwrap(), backend);
		}

		compositor
	}

	pub fn mount_table(&self) -> &Arc<MountTable> {
		&self.mount_table
	}

	pub fn subscriptions(&self) -> &Arc<SubscriptionsIndex> {
		&self.subscriptions
	}

	pub fn gateway(&self) -> &Arc<PolicyGateway> {
		&self.gateway
	}

	/// Mount an in-process server under `prefix` and start fanning out its
	/// notifications.
	pub fn mount_inproc(
		self: &Arc<Self>,
		prefix: MountPrefix,
		pinned: bool,
		make_server: impl FnOnce(InProcNotifier) -> Arc<dyn InProcServer>,
	) -> Result<(), CompositorError> {
		self.mount_table.mount_inproc(prefix.clone(), pinned, make_server)?;
		if let Some(backend) = self.mount_table.backend_of(&prefix) {
			self.fanout.spawn_mount_consumer(prefix, backend);
		}
		Ok(())
	}

	pub fn mount_subprocess(self: &Arc<Self>, prefix: MountPrefix, spec: StdioSpec, pinned: bool) -> Result<(), CompositorError> {
		self.mount_table.mount_subprocess(prefix.clone(), spec, pinned)?;
		if let Some(backend) = self.mount_table.backend_of(&prefix) {
			self.fanout.spawn_mount_consumer(prefix, backend);
		}
		Ok(())
	}

	pub fn mount_http(self: &Arc<Self>, prefix: MountPrefix, spec: HttpSpec, pinned: bool) -> Result<(), CompositorError> {
		self.mount_table.mount_http(prefix.clone(), spec, pinned)?;
		if let Some(backend) = self.mount_table.backend_of(&prefix) {
			self.fanout.spawn_mount_consumer(prefix, backend);
		}
		Ok(())
	}

	/// Detach `prefix`. The mount table fires `Unmounted` to its listeners —
	/// including the subscriptions index, registered in `new` — so every
	/// unmount path (this method, the admin detach tool, `shutdown`) retires
	/// subscription records uniformly.
	pub async fn unmount(&self, prefix: &MountPrefix) -> Result<(), CompositorError> {
		self.mount_table.unmount(prefix).await
	}

	/// Resolve `fully_qualified_name` against the currently mounted
	/// prefixes, run it through the policy gateway, and (on admission)
	/// invoke the backend.
	pub async fn call_tool(&self, fully_qualified_name: &str, arguments_json: Option<String>) -> Result<CallOutcome, CompositorError> {
		let prefixes = self.mount_table.snapshot_prefixes();
		let (prefix_str, tool_name) = naming::split_known_prefix(fully_qualified_name, &prefixes)
			.ok_or_else(|| CompositorError::UnknownPrefix(fully_qualified_name.to_string()))?;
		let prefix = MountPrefix::new(prefix_str).map_err(CompositorError::InvalidName)?;
		let backend = self
			.mount_table
			.backend_of(&prefix)
			.ok_or_else(|| CompositorError::UnknownPrefix(prefix_str.to_string()))?;

		let request = PolicyRequest {
			name: fully_qualified_name.to_string(),
			arguments_json: arguments_json.clone(),
		};

		match self.gateway.admit(request).await {
			Admission::Proceed => {
				let result = backend
					.call_tool(tool_name, arguments_json)
					.await
					.map(|r| self.gateway.remap_reserved(r))
					.unwrap_or_else(|e| ToolResult::error(e.to_string()));
				Ok(CallOutcome::Result(result))
			},
			Admission::DenyContinue { rationale } => Ok(CallOutcome::DenyContinue { rationale }),
			Admission::DenyAbort { rationale } => Ok(CallOutcome::DenyAbort { rationale }),
		}
	}

	/// Subscribe a client's interest in one resource, and mark the pending
	/// notification queue eligible for its first flush (see `FanOut`'s
	/// late-join trigger).
	pub async fn list_resources(&self, prefix: &MountPrefix) -> Result<Vec<crate::types::ResourceDescriptor>, CompositorError> {
		self.fanout.on_list_resources();
        	let backend = self
			.mount_table
			.backend_of(prefix)
			.ok_or_else(|| CompositorError::UnknownPrefix(prefix.as_str().to_string()))?;
		let descriptors = backend.list_resources().await.map_err(CompositorError::Backend)?;
		Ok(descriptors
			.into_iter()
			.map(|d| crate::types::ResourceDescriptor {
				uri: naming::prefix_resource_uri(prefix, &d.uri),
				..d
			})
			.collect())
	}

	pub fn add_session(&self) -> (crate::fanout::SessionId, tokio::sync::mpsc::Receiver<crate::types::NotificationEvent>) {
		self.fanout.add_session()
	}

	pub fn remove_session(&self, id: crate::fanout::SessionId) {
		self.fanout.remove_session(id);
	}

	/// Shut every mount down in reverse mount order, cancel all outstanding
	/// approvals, and drop all sessions.
	pub async fn shutdown(&self) {
		self.gateway.cancel_all();
		let prefixes = self.mount_table.snapshot_prefixes();
		for prefix in prefixes.into_iter().rev() {
			let _ = self.mount_table.unmount(&prefix).await;
		}
	}
}
