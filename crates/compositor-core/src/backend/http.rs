//! HTTP backend adapter. Each call maps to one request against the mounted
//! server's endpoint; notifications arrive over a separate long-lived
//! streaming connection. A transient connection failure is retried with a
//! short, bounded exponential backoff; failure that persists past that is
//! reported on the call that observed it rather than proactively flipping
//! the owning mount to `Failed`, so a blip in the network doesn't fail a
//! mount nothing is currently calling.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;

use super::{Backend, BackendError};
use crate::types::{InitializeResult, RawNotification, ResourceContent, ResourceDescriptor, Tool, ToolResult};

/// Bounded exponential backoff: initial delay, doubling, capped, for a fixed
/// number of attempts.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
	pub initial: Duration,
	pub cap: Duration,
	pub attempts: u32,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			initial: Duration::from_millis(100),
			cap: Duration::from_secs(3),
			attempts: 3,
		}
	}
}

impl RetryPolicy {
	fn delay_for(&self, attempt: u32) -> Duration {
		let scaled = self.initial.saturating_mul(1 << attempt.min(16));
		scaled.min(self.cap)
	}
}

#[derive(Debug, Clone)]
pub struct HttpSpec {
	pub endpoint: String,
	pub auth_header: Option<String>,
	pub retry: RetryPolicy,
}

impl HttpSpec {
	pub fn new(endpoint: impl Into<String>) -> Self {
		Self {
			endpoint: endpoint.into(),
			auth_header: None,
			retry: RetryPolicy::default(),
		}
	}

	pub fn with_auth(mut self, credential: impl Into<String>) -> Self {
		self.auth_header = Some(credential.into());
		self
	}
}

#[derive(Debug, Serialize)]
struct Envelope<'a> {
	method: &'a str,
	#[serde(skip_serializing_if = "Option::is_none")]
	params: Option<serde_json::Value>,
}

pub struct HttpBackend {
	client: reqwest::Client,
	spec: HttpSpec,
	notif_rx: Mutex<Option<mpsc::Receiver<RawNotification>>>,
	stream_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl HttpBackend {
	pub fn new(spec: HttpSpec) -> Result<Self, BackendError> {
		let client = reqwest::Client::builder()
			.build()
			.map_err(|e| BackendError::InitFailed(format!("failed to build http client: {e}")))?;

		let (notif_tx, notif_rx) = mpsc::channel(256);
		let stream_task = Self::spawn_notification_stream(client.clone(), spec.clone(), notif_tx);

		Ok(Self {
			client,
			spec,
			notif_rx: Mutex::new(Some(notif_rx)),
			stream_task: Mutex::new(Some(stream_task)),
		})
	}

	/// Long-lived GET against `{endpoint}/events`, one JSON object per line,
	/// reconnected with the same backoff used for calls. Runs until the
	/// backend is dropped or `shutdown()` aborts it.
	fn spawn_notification_stream(
		client: reqwest::Client,
		spec: HttpSpec,
		tx: mpsc::Sender<RawNotification>,
	) -> tokio::task::JoinHandle<()> {
		tokio::spawn(async move {
			let url = format!("{}/events", spec.endpoint.trim_end_matches('/'));
			loop {
				let mut request = client.get(&url);
				if let Some(auth) = &spec.auth_header {
					request = request.header(reqwest::header::AUTHORIZATION, auth);
				}
				let response = match request.send().await {
					Ok(r) => r,
					Err(e) => {
						tracing::debug!(target: "compositor", error = %e, "http notification stream connect failed, retrying");
						tokio::time::sleep(spec.retry.initial).await;
						continue;
					},
				};

				let mut stream = response.bytes_stream();
				use futures_util::StreamExt;
				let mut buf = Vec::new();
				loop {
					match stream.next().await {
						Some(Ok(chunk)) => {
							buf.extend_from_slice(&chunk);
							while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
								let line: Vec<u8> = buf.drain(..=pos).collect();
								let line = &line[..line.len().saturating_sub(1)];
								if line.is_empty() {
									continue;
								}
								if let Ok(event) = serde_json::from_slice::<RawNotification>(line) {
									if tx.try_send(event.clone()).is_err() {
										tracing::warn!(target: "compositor", ?event, "http notification queue full, dropping");
									}
								}
							}
						},
						Some(Err(e)) => {
							tracing::debug!(target: "compositor", error = %e, "http notification stream broke, reconnecting");
							break;
						},
						None => break, // server closed the stream; reconnect.
					}
				}
				tokio::time::sleep(spec.retry.initial).await;
			}
		})
	}

	async fn call<T: serde::de::DeserializeOwned>(&self, method: &str, params: Option<serde_json::Value>) -> Result<T, BackendError> {
		let url = format!("{}/rpc", self.spec.endpoint.trim_end_matches('/'));
		let body = Envelope { method, params };

		let mut last_err = None;
		for attempt in 0..self.spec.retry.attempts {
			if attempt > 0 {
				tokio::time::sleep(self.spec.retry.delay_for(attempt - 1)).await;
			}

			let mut request = self.client.post(&url).json(&body);
			if let Some(auth) = &self.spec.auth_header {
				request = request.header(reqwest::header::AUTHORIZATION, auth);
			}

			match request.send().await {
				Ok(response) => {
					if !response.status().is_success() {
						last_err = Some(BackendError::CallFailed(format!("{method} returned status {}", response.status())));
						continue;
					}
					return response
						.json::<T>()
						.await
						.map_err(|e| BackendError::CallFailed(format!("malformed {method} response: {e}")));
				},
				Err(e) => {
					last_err = Some(BackendError::Died(format!("{method} request failed: {e}")));
				},
			}
		}
		Err(last_err.unwrap_or_else(|| BackendError::Died(format!("{method} exhausted retries"))))
	}
}

#[async_trait]
impl Backend for HttpBackend {
	async fn initialize(&self) -> Result<InitializeResult, BackendError> {
		self.call("initialize", None).await
	}

	async fn list_tools(&self) -> Result<Vec<Tool>, BackendError> {
		self.call("list_tools", None).await
	}

	async fn call_tool(&self, name: &str, arguments_json: Option<String>) -> Result<ToolResult, BackendError> {
		let arguments = match arguments_json {
			Some(raw) => Some(
				serde_json::from_str::<serde_json::Value>(&raw)
					.map_err(|e| BackendError::CallFailed(format!("invalid arguments json: {e}")))?,
			),
			None => None,
		};
		self
			.call("call_tool", Some(serde_json::json!({ "name": name, "arguments": arguments })))
			.await
	}

	async fn list_resources(&self) -> Result<Vec<ResourceDescriptor>, BackendError> {
		self.call("list_resources", None).await
	}

	async fn read_resource(&self, uri: &str) -> Result<ResourceContent, BackendError> {
		self.call("read_resource", Some(serde_json::json!({ "uri": uri }))).await
	}

	async fn subscribe(&self, uri: &str) -> Result<(), BackendError> {
		let _: serde_json::Value = self.call("subscribe", Some(serde_json::json!({ "uri": uri }))).await?;
		Ok(())
	}

	async fn unsubscribe(&self, uri: &str) -> Result<(), BackendError> {
		let _: serde_json::Value = self.call("unsubscribe", Some(serde_json::json!({ "uri": uri }))).await?;
		Ok(())
	}

	fn take_notifications(&self) -> Option<mpsc::Receiver<RawNotification>> {
		self.notif_rx.lock().take()
	}

	async fn shutdown(&self) {
		if let Some(handle) = self.stream_task.lock().take() {
			handle.abort();
		}
	}
}

#[allow(dead_code)]
fn _assert_send_sync(b: Arc<HttpBackend>) -> Arc<dyn Backend> {
	b
}

#[cfg(test)]
mod tests {
	use serde_json::json;
	use wiremock::matchers::{method, path};
	use wiremock::{Mock, MockServer, ResponseTemplate};

	use super::*;

	#[tokio::test]
	async fn calls_rpc_endpoint_and_decodes_result() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/rpc"))
			.respond_with(ResponseTemplate::new(200).set_body_json(json!({
				"server_name": "http-tool",
				"server_version": "0.1.0",
				"protocol_version": "2025-06-18",
				"instructions": null,
				"capabilities": {}
			})))
			.mount(&server)
			.await;

		let backend = HttpBackend::new(HttpSpec::new(server.uri())).unwrap();
		let result = backend.initialize().await.unwrap();
		assert_eq!(result.server_name, "http-tool");
	}

	#[tokio::test]
	async fn retries_on_failure_then_succeeds() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/rpc"))
			.respond_with(ResponseTemplate::new(503))
			.up_to_n_times(1)
			.mount(&server)
			.await;
		Mock::given(method("POST"))
			.and(path("/rpc"))
			.respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
			.mount(&server)
			.await;

		let mut spec = HttpSpec::new(server.uri());
		spec.retry = RetryPolicy {
			initial: Duration::from_millis(1),
			cap: Duration::from_millis(10),
			attempts: 3,
		};
		let backend = HttpBackend::new(spec).unwrap();
		let tools: Vec<Tool> = backend.list_tools().await.unwrap();
		assert!(tools.is_empty());
	}

	#[test]
	fn backoff_caps_growth() {
		let policy = RetryPolicy::default();
		assert_eq!(policy.delay_for(0), Duration::from_millis(100));
		assert_eq!(policy.delay_for(1), Duration::from_millis(200));
		assert_eq!(policy.delay_for(10), Duration::from_secs(3));
	}
}
