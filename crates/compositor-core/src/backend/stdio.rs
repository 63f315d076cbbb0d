//! Stdio backend adapter: a subprocess speaking line-delimited JSON over its
//! stdin/stdout. Each line is one JSON object; requests carry a correlation
//! id, responses echo it back with `result` or `error`, and notifications
//! carry neither an id nor a result, only a `method` and optional `params`.
//!
//! Process exit before an explicit `shutdown()` is fatal: outstanding
//! requests fail with [`BackendError::Died`] and the backend latches into a
//! permanently-dead state so future calls fail fast without re-spawning —
//! a failed mount is never auto-retried.

use std::collections::{HashMap, VecDeque};
use std::process::Stdio as ProcStdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, oneshot};

use super::{Backend, BackendError};
use crate::types::{InitializeResult, RawNotification, ResourceContent, ResourceDescriptor, Tool, ToolResult};

/// How to spawn the subprocess backing a stdio mount.
#[derive(Debug, Clone)]
pub struct StdioSpec {
	pub command: String,
	pub args: Vec<String>,
	pub env: Vec<(String, String)>,
	/// Capacity of the stderr diagnostics ring buffer, in bytes. Oldest bytes
	/// are dropped once full.
	pub stderr_ring_capacity: usize,
	/// How long to wait for a response before treating a call as failed. A
	/// bound is required so a wedged subprocess cannot hang a caller forever.
	pub call_timeout: std::time::Duration,
}

impl StdioSpec {
	pub fn new(command: impl Into<String>) -> Self {
		Self {
			command: command.into(),
			args: Vec::new(),
			env: Vec::new(),
			stderr_ring_capacity: 64 * 1024,
			call_timeout: std::time::Duration::from_secs(30),
		}
	}

	pub fn arg(mut self, arg: impl Into<String>) -> Self {
		self.args.push(arg.into());
		self
	}
}

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
	id: u64,
	method: &'a str,
	#[serde(skip_serializing_if = "Option::is_none")]
	params: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct WireError {
	#[allow(dead_code)]
	code: i64,
	message: String,
}

#[derive(Debug, Deserialize)]
struct WireIncoming {
	#[serde(default)]
	id: Option<u64>,
	#[serde(default)]
	method: Option<String>,
	#[serde(default)]
	params: Option<serde_json::Value>,
	#[serde(default)]
	result: Option<serde_json::Value>,
	#[serde(default)]
	error: Option<WireError>,
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<serde_json::Value, BackendError>>>>>;

struct StderrRing {
	buf: Mutex<VecDeque<u8>>,
	cap: usize,
}

impl StderrRing {
	fn new(cap: usize) -> Self {
		Self {
			buf: Mutex::new(VecDeque::with_capacity(cap.min(4096))),
			cap,
		}
	}

	fn push(&self, bytes: &[u8]) {
		let mut buf = self.buf.lock();
		for &b in bytes {
			if buf.len() >= self.cap {
				buf.pop_front();
			}
			buf.push_back(b);
		}
	}

	#[cfg(test)]
	fn snapshot(&self) -> Vec<u8> {
		self.buf.lock().iter().copied().collect()
	}
}

pub struct StdioBackend {
	stdin: Mutex<Option<ChildStdin>>,
	child: Mutex<Option<Child>>,
	pending: PendingMap,
	next_id: AtomicU64,
	died: Arc<AtomicBool>,
	stderr_ring: Arc<StderrRing>,
	notif_rx: Mutex<Option<mpsc::Receiver<RawNotification>>>,
	call_timeout: std::time::Duration,
	reader_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
	stderr_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl StdioBackend {
	/// Spawn the subprocess. The process is spawned before this returns;
	/// failure to spawn is a synchronous error, not deferred to the first call.
	pub fn spawn(spec: StdioSpec) -> Result<Self, BackendError> {
		let mut cmd = Command::new(&spec.command);
		cmd
			.args(&spec.args)
			.envs(spec.env.iter().cloned())
			.stdin(ProcStdio::piped())
			.stdout(ProcStdio::piped())
			.stderr(ProcStdio::piped())
			.kill_on_drop(true);

		let mut child = cmd
			.spawn()
			.map_err(|e| BackendError::InitFailed(format!("failed to spawn {}: {e}", spec.command)))?;

		let stdin = child.stdin.take().expect("piped stdin");
		let stdout = child.stdout.take().expect("piped stdout");
		let stderr = child.stderr.take().expect("piped stderr");

		let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
		let died = Arc::new(AtomicBool::new(false));
		let stderr_ring = Arc::new(StderrRing::new(spec.stderr_ring_capacity));
		let (notif_tx, notif_rx) = mpsc::channel(256);

		let reader_task = tokio::spawn(Self::read_loop(stdout, pending.clone(), died.clone(), notif_tx));
		let stderr_task = tokio::spawn(Self::drain_stderr(stderr, stderr_ring.clone()));

		Ok(Self {
			stdin: Mutex::new(Some(stdin)),
			child: Mutex::new(Some(child)),
			pending,
			next_id: AtomicU64::new(1),
			died,
			stderr_ring,
			notif_rx: Mutex::new(Some(notif_rx)),
			call_timeout: spec.call_timeout,
			reader_task: Mutex::new(Some(reader_task)),
			stderr_task: Mutex::new(Some(stderr_task)),
		})
	}

	async fn read_loop(
		stdout: tokio::process::ChildStdout,
		pending: PendingMap,
		died: Arc<AtomicBool>,
		notif_tx: mpsc::Sender<RawNotification>,
	) {
		let mut lines = BufReader::new(stdout).lines();
		loop {
			match lines.next_line().await {
				Ok(Some(line)) => {
					if line.trim().is_empty() {
						continue;
					}
					let Ok(incoming) = serde_json::from_str::<WireIncoming>(&line) else {
						tracing::warn!(target: "compositor", %line, "stdio backend emitted unparseable line");
						continue;
					};
					Self::dispatch_incoming(incoming, &pending, &notif_tx).await;
				},
				Ok(None) => break, // EOF is fatal.
				Err(e) => {
					tracing::warn!(target: "compositor", error = %e, "stdio backend read error");
					break;
				},
			}
		}
		died.store(true, Ordering::SeqCst);
		let mut pending = pending.lock();
		for (_, tx) in pending.drain() {
			let _ = tx.send(Err(BackendError::Died("subprocess stdout closed".into())));
		}
	}

	async fn dispatch_incoming(incoming: WireIncoming, pending: &PendingMap, notif_tx: &mpsc::Sender<RawNotification>) {
		if let Some(id) = incoming.id {
			let sender = pending.lock().remove(&id);
			if let Some(sender) = sender {
				let outcome = match incoming.error {
					Some(e) => Err(BackendError::CallFailed(e.message)),
					None => Ok(incoming.result.unwrap_or(serde_json::Value::Null)),
				};
				let _ = sender.send(outcome);
			}
			return;
		}
		let Some(method) = incoming.method else { return };
		let event = match method.as_str() {
			"notification/resource_list_changed" => Some(RawNotification::ResourceListChanged),
			"notification/resource_updated" => incoming
				.params
				.as_ref()
				.and_then(|p| p.get("uri"))
				.and_then(|u| u.as_str())
				.map(|uri| RawNotification::ResourceUpdated { uri: uri.to_string() }),
			_ => None,
		};
		if let Some(event) = event {
			if notif_tx.try_send(event.clone()).is_err() {
				tracing::warn!(target: "compositor", ?event, "stdio backend notification queue full, dropping");
			}
		}
	}

	async fn drain_stderr(stderr: tokio::process::ChildStderr, ring: Arc<StderrRing>) {
		let mut reader = stderr;
		let mut buf = [0u8; 4096];
		loop {
			match reader.read(&mut buf).await {
				Ok(0) | Err(_) => break,
				Ok(n) => ring.push(&buf[..n]),
			}
		}
	}

	async fn send_request(&self, method: &str, params: Option<serde_json::Value>) -> Result<serde_json::Value, BackendError> {
		if self.died.load(Ordering::SeqCst) {
			return Err(BackendError::Died("subprocess already exited".into()));
		}

		let id = self.next_id.fetch_add(1, Ordering::SeqCst);
		let (tx, rx) = oneshot::channel();
		self.pending.lock().insert(id, tx);

		let line = serde_json::to_string(&WireRequest { id, method, params })
			.map_err(|e| BackendError::CallFailed(format!("failed to encode request: {e}")))?;

		{
			let mut guard = self.stdin.lock();
			let Some(stdin) = guard.as_mut() else {
				return Err(BackendError::Died("stdin already closed".into()));
			};
			if let Err(e) = stdin.write_all(line.as_bytes()).await {
				self.pending.lock().remove(&id);
				return Err(BackendError::Died(format!("failed to write to subprocess: {e}")));
			}
			if let Err(e) = stdin.write_all(b"\n").await {
				self.pending.lock().remove(&id);
				return Err(BackendError::Died(format!("failed to write to subprocess: {e}")));
			}
		}

		match tokio::time::timeout(self.call_timeout, rx).await {
			Ok(Ok(result)) => result,
			Ok(Err(_)) => Err(BackendError::Died("subprocess dropped the request".into())),
			Err(_) => {
				self.pending.lock().remove(&id);
				Err(BackendError::CallFailed(format!("timed out waiting for {method}")))
			},
		}
	}

	/// Diagnostic snapshot of the subprocess's recent stderr output.
	pub fn stderr_tail(&self) -> Vec<u8> {
		self.stderr_ring.buf.lock().iter().copied().collect()
	}
}

#[async_trait]
impl Backend for StdioBackend {
	async fn initialize(&self) -> Result<InitializeResult, BackendError> {
		let value = self.send_request("initialize", None).await?;
		serde_json::from_value(value).map_err(|e| BackendError::InitFailed(format!("malformed initialize result: {e}")))
	}

	async fn list_tools(&self) -> Result<Vec<Tool>, BackendError> {
		let value = self.send_request("list_tools", None).await?;
		serde_json::from_value(value).map_err(|e| BackendError::CallFailed(format!("malformed list_tools result: {e}")))
	}

	async fn call_tool(&self, name: &str, arguments_json: Option<String>) -> Result<ToolResult, BackendError> {
		let arguments = match arguments_json {
			Some(raw) => Some(
				serde_json::from_str::<serde_json::Value>(&raw)
					.map_err(|e| BackendError::CallFailed(format!("invalid arguments json: {e}")))?,
			),
			None => None,
		};
		let params = serde_json::json!({ "name": name, "arguments": arguments });
		let value = self.send_request("call_tool", Some(params)).await?;
		serde_json::from_value(value).map_err(|e| BackendError::CallFailed(format!("malformed call_tool result: {e}")))
	}

	async fn list_resources(&self) -> Result<Vec<ResourceDescriptor>, BackendError> {
		let value = self.send_request("list_resources", None).await?;
		serde_json::from_value(value)
			.map_err(|e| BackendError::CallFailed(format!("malformed list_resources result: {e}")))
	}

	async fn read_resource(&self, uri: &str) -> Result<ResourceContent, BackendError> {
		let value = self
			.send_request("read_resource", Some(serde_json::json!({ "uri": uri })))
			.await?;
		serde_json::from_value(value).map_err(|e| BackendError::CallFailed(format!("malformed read_resource result: {e}")))
	}

	async fn subscribe(&self, uri: &str) -> Result<(), BackendError> {
		self
			.send_request("subscribe", Some(serde_json::json!({ "uri": uri })))
			.await?;
		Ok(())
	}

	async fn unsubscribe(&self, uri: &str) -> Result<(), BackendError> {
		self
			.send_request("unsubscribe", Some(serde_json::json!({ "uri": uri })))
			.await?;
		Ok(())
	}

	fn take_notifications(&self) -> Option<mpsc::Receiver<RawNotification>> {
		self.notif_rx.lock().take()
	}

	async fn shutdown(&self) {
		if let Some(mut child) = self.child.lock().take() {
			let _ = child.start_kill();
		}
		if let Some(handle) = self.reader_task.lock().take() {
			handle.abort();
		}
		if let Some(handle) = self.stderr_task.lock().take() {
			handle.abort();
		}
		self.stdin.lock().take();
	}
}
