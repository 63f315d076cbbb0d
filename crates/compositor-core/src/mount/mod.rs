//! Mount Table: the authoritative map from prefix to mounted backend, its
//! lifecycle state, and the listeners that observe transitions.

mod listeners;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

pub use listeners::{ListenerToken, MountEvent};

use crate::backend::inproc::InProcServer;
use crate::backend::{Backend, BackendError, BackendHandle, HttpBackend, InProcBackend, StdioBackend};
use crate::backend::http::HttpSpec;
use crate::backend::stdio::StdioSpec;
use crate::error::CompositorError;
use crate::naming::MountPrefix;
use crate::types::{InitializeResult, Tool};

/// How long `unmount` waits for in-flight backend calls to settle before
/// shutting the backend down unconditionally.
pub const UNMOUNT_GRACE_PERIOD: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub enum MountState {
	Initializing,
	Running {
		initialize_result: InitializeResult,
		tools: Vec<Tool>,
	},
	Failed {
		reason: String,
	},
}

impl MountState {
	pub fn label(&self) -> &'static str {
		match self {
			MountState::Initializing => "initializing",
			MountState::Running { .. } => "running",
			MountState::Failed { .. } => "failed",
		}
	}
}

pub struct MountEntry {
	pub prefix: MountPrefix,
	pub backend: Arc<BackendHandle>,
	pub pinned: bool,
	pub state: MountState,
	pub created_at: Instant,
}

struct Inner {
	order: Vec<MountPrefix>,
	entries: HashMap<MountPrefix, MountEntry>,
}

/// Maps mount prefixes to their `MountEntry`. Owned exclusively by the
/// Compositor; entries transition `Initializing -> Running | Failed`
/// monotonically and are never reset in place — a failed mount must be
/// unmounted and re-mounted under a (possibly new) prefix to retry.
///
/// The listener registry lives behind its own lock, separate from `inner`,
/// so a mutating call can always drop the entries lock before firing —
/// a listener that re-enters the table (`is_mounted`, `state_of`, ...) from
/// inside its callback can never deadlock against the call that triggered it.
pub struct MountTable {
	inner: Mutex<Inner>,
	listeners: Mutex<listeners::Registry>,
	grace_period: Duration,
}

impl MountTable {
	pub fn new() -> Arc<Self> {
		Self::with_grace_period(UNMOUNT_GRACE_PERIOD)
	}

	/// Construct with an explicit unmount drain grace period, per the
	/// "configuration is a value" design choice — `CompositorConfig` threads
	/// its own value through here rather than relying on the module default.
	pub fn with_grace_period(grace_period: Duration) -> Arc<Self> {
		Arc::new(Self {
			inner: Mutex::new(Inner {
				order: Vec::new(),
				entries: HashMap::new(),
			}),
			listeners: Mutex::new(listeners::Registry::default()),
			grace_period,
		})
	}

	/// Register a listener invoked synchronously on every `MountEvent`, after
	/// the table's own invariants have been restored and the mutating lock
	/// released. Returns a token that revokes the listener via
	/// [`MountTable::remove_listener`].
	pub fn add_listener(&self, listener: impl Fn(MountEvent) + Send + Sync + 'static) -> ListenerToken {
		self.listeners.lock().add(listener)
	}

	pub fn remove_listener(&self, token: ListenerToken) {
		self.listeners.lock().remove(token);
	}

	pub fn snapshot_prefixes(&self) -> Vec<MountPrefix> {
		self.inner.lock().order.clone()
	}

	/// A copy of a mount's current state, for callers (meta surface, tests)
	/// that only need a point-in-time read.
	pub fn state_of(&self, prefix: &MountPrefix) -> Option<(MountState, bool)> {
		self.inner.lock().entries.get(prefix).map(|e| (e.state.clone(), e.pinned))
	}

	pub fn backend_of(&self, prefix: &MountPrefix) -> Option<Arc<BackendHandle>> {
		self.inner.lock().entries.get(prefix).map(|e| e.backend.clone())
	}

	pub fn is_mounted(&self, prefix: &MountPrefix) -> bool {
		self.inner.lock().entries.contains_key(prefix)
	}

	fn insert_initializing(&self, prefix: MountPrefix, backend: Arc<BackendHandle>, pinned: bool) -> Result<(), CompositorError> {
		let mut inner = self.inner.lock();
		if inner.entries.contains_key(&prefix) {
			return Err(CompositorError::DuplicatePrefix(prefix.as_str().to_string()));
		}
		inner.order.push(prefix.clone());
		inner.entries.insert(
			prefix.clone(),
			MountEntry {
				prefix: prefix.clone(),
				backend,
				pinned,
				state: MountState::Initializing,
				created_at: Instant::now(),
			},
		);
		drop(inner);
		self.listeners.lock().fire(MountEvent::Mounted { prefix });
		Ok(())
	}

	fn finish_init(&self, prefix: &MountPrefix, outcome: Result<(InitializeResult, Vec<Tool>), BackendError>) {
		let mut inner = self.inner.lock();
		let Some(entry) = inner.entries.get_mut(prefix) else { return };
		entry.state = match outcome {
			Ok((initialize_result, tools)) => MountState::Running { initialize_result, tools },
			Err(e) => MountState::Failed { reason: e.to_string() },
		};
		drop(inner);
		let prefix = prefix.clone();
		self.listeners.lock().fire(MountEvent::StateChanged { prefix });
	}

	fn spawn_init_task(self: &Arc<Self>, prefix: MountPrefix, backend: Arc<BackendHandle>) {
		let table = self.clone();
		tokio::spawn(async move {
			let outcome = async {
				let initialize_result = backend.initialize().await?;
				let tools = backend.list_tools().await?;
				Ok::<_, BackendError>((initialize_result, tools))
			}
			.await;
			if let Err(e) = &outcome {
				tracing::warn!(target: "compositor", prefix = %prefix, error = %e, "mount failed to initialize");
			}
			table.finish_init(&prefix, outcome);
		});
	}

	/// Mount an in-process server. Returns once the entry is registered as
	/// `Initializing`; the handshake and initial tool listing happen in the
	/// background and the entry becomes `Running` or `Failed` asynchronously.
	///
	/// `make_server` receives the notifier the server should use to push
	/// notifications upstream, so it can be wired in before the server is
	/// ever called.
	pub fn mount_inproc(
		self: &Arc<Self>,
		prefix: MountPrefix,
		pinned: bool,
		make_server: impl FnOnce(crate::backend::inproc::InProcNotifier) -> Arc<dyn InProcServer>,
	) -> Result<(), CompositorError> {
		let (notifier, notif_rx) = crate::backend::inproc::InProcNotifier::channel();
		let server = make_server(notifier);
		let backend = Arc::new(BackendHandle::InProc(Box::new(InProcBackend::new(server, notif_rx))));
		self.insert_initializing(prefix.clone(), backend.clone(), pinned)?;
		self.spawn_init_task(prefix, backend);
		Ok(())
	}

	/// Mount a subprocess backend. The process is spawned synchronously;
	/// only the handshake is deferred to the background init task.
	pub fn mount_subprocess(self: &Arc<Self>, prefix: MountPrefix, spec: StdioSpec, pinned: bool) -> Result<(), CompositorError> {
		let backend = StdioBackend::spawn(spec).map_err(CompositorError::Backend)?;
		let backend = Arc::new(BackendHandle::Stdio(Box::new(backend)));
		self.insert_initializing(prefix.clone(), backend.clone(), pinned)?;
		self.spawn_init_task(prefix, backend);
		Ok(())
	}

	/// Mount an HTTP backend.
	pub fn mount_http(self: &Arc<Self>, prefix: MountPrefix, spec: HttpSpec, pinned: bool) -> Result<(), CompositorError> {
		let backend = HttpBackend::new(spec).map_err(CompositorError::Backend)?;
		let backend = Arc::new(BackendHandle::Http(Box::new(backend)));
		self.insert_initializing(prefix.clone(), backend.clone(), pinned)?;
		self.spawn_init_task(prefix, backend);
		Ok(())
	}

	/// Remove a mount. Fails with `Pinned` for pinned mounts. Drains
	/// outstanding calls for a bounded grace period, shuts the backend down,
	/// and fires `Unmounted` to every listener before returning.
	pub async fn unmount(&self, prefix: &MountPrefix) -> Result<(), CompositorError> {
		let entry = {
			let inner = self.inner.lock();
			match inner.entries.get(prefix) {
				None => return Err(CompositorError::UnknownPrefix(prefix.as_str().to_string())),
				Some(e) if e.pinned => return Err(CompositorError::Pinned(prefix.as_str().to_string())),
				Some(_) => {},
			}
			inner.entries.get(prefix).map(|e| e.backend.clone())
		};
		let Some(backend) = entry else {
			return Err(CompositorError::UnknownPrefix(prefix.as_str().to_string()));
		};

		// Give outstanding calls a bounded grace period before forcing
		// shutdown; the backend itself has no "drain" primitive, so this is
		// simply a bounded wait before we release its resources.
		let _ = tokio::time::timeout(self.grace_period, backend.shutdown()).await;

		let mut inner = self.inner.lock();
		inner.entries.remove(prefix);
		inner.order.retain(|p| p != prefix);
		drop(inner);
		let prefix = prefix.clone();
		self.listeners.lock().fire(MountEvent::Unmounted { prefix });
		Ok(())
	}
}
