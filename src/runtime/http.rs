use std::time::Duration;

use bytes::Bytes;
use futures_util::{future, Stream, StreamExt, TryStreamExt};
use serde::Serialize;
use tracing::debug;

use super::{AgentRuntime, WorkflowEventStream};
use crate::config::RuntimeConfig;
use crate::error::HandoffError;
use crate::protocol::chatkit::ApprovalDecision;
use crate::protocol::workflow::{decode_workflow_event, WorkflowEvent};
use crate::stream::sse::{is_done_event, sse_frame_stream};

const MAX_ERROR_BODY_CHARS: usize = 500;

fn build_reqwest_client(config: &RuntimeConfig) -> Result<reqwest::Client, HandoffError> {
    let mut builder = reqwest::Client::builder()
        .pool_max_idle_per_host(config.pool_max_idle_per_host)
        .tcp_nodelay(true)
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .redirect(reqwest::redirect::Policy::none())
        .timeout(Duration::from_secs(config.timeout_secs));

    if let Some(proxy_url) = config.proxy.as_deref() {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|err| HandoffError::Config(format!("Invalid proxy URL: {err}")))?;
        builder = builder.no_proxy().proxy(proxy);
    } else if !config.use_env_proxy {
        builder = builder.no_proxy();
    }

    builder
        .build()
        .map_err(|err| HandoffError::Transport(format!("Failed to build HTTP client: {err}")))
}

/// Resolve `path` below `base`, keeping any path prefix `base` already has.
fn endpoint(base: &url::Url, path: &str) -> Result<url::Url, HandoffError> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let with_slash = format!("{}/", base.path());
        base.set_path(&with_slash);
    }
    base.join(path)
        .map_err(|err| HandoffError::Config(format!("Invalid runtime endpoint '{path}': {err}")))
}

/// Pull `error.message` (or a plain-text body) out of an error response.
fn summarize_error_body(body: &[u8]) -> String {
    if let Ok(json) = serde_json::from_slice::<serde_json::Value>(body) {
        if let Some(msg) = json
            .get("error")
            .and_then(|e| e.get("message").or(Some(e)))
            .and_then(|m| m.as_str())
        {
            return crate::util::truncate_chars(msg, MAX_ERROR_BODY_CHARS).to_string();
        }
    }
    let text = String::from_utf8_lossy(body);
    crate::util::truncate_chars(text.trim(), MAX_ERROR_BODY_CHARS).to_string()
}

#[derive(Serialize)]
struct TurnRequest<'a> {
    thread_id: &'a str,
    message: &'a str,
}

#[derive(Serialize)]
struct ApprovalRequest<'a> {
    thread_id: &'a str,
    #[serde(flatten)]
    decision: &'a ApprovalDecision,
}

/// Decode an SSE body of workflow events, stopping at `[DONE]`.
pub fn workflow_event_stream<S, E>(
    byte_stream: S,
) -> impl Stream<Item = Result<WorkflowEvent, HandoffError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    sse_frame_stream(byte_stream)
        .take_while(|frame| future::ready(!matches!(frame, Ok(f) if is_done_event(f))))
        .filter(|frame| future::ready(!matches!(frame, Ok(f) if f.data.trim().is_empty())))
        .map(|frame| frame.and_then(|f| decode_workflow_event(f.data.as_bytes())))
}

/// Agent runtime reached over HTTP.
///
/// `POST {base_url}/turns` starts a turn and `POST {base_url}/approvals`
/// resumes one; both answer with an SSE body of workflow events.
pub struct HttpAgentRuntime {
    client: reqwest::Client,
    turns_url: url::Url,
    approvals_url: url::Url,
}

impl HttpAgentRuntime {
    /// Build a runtime client from config.
    ///
    /// # Errors
    ///
    /// Returns [`HandoffError::Config`] when `base_url` is missing or invalid,
    /// or the proxy URL is rejected.
    pub fn new(config: &RuntimeConfig) -> Result<Self, HandoffError> {
        let base_url = config
            .base_url
            .as_deref()
            .ok_or_else(|| HandoffError::Config("runtime.base_url is not set".into()))?;
        let base = url::Url::parse(base_url.trim())
            .map_err(|err| HandoffError::Config(format!("Invalid runtime.base_url: {err}")))?;
        Ok(Self {
            client: build_reqwest_client(config)?,
            turns_url: endpoint(&base, "turns")?,
            approvals_url: endpoint(&base, "approvals")?,
        })
    }

    #[must_use]
    pub fn turns_url(&self) -> &url::Url {
        &self.turns_url
    }

    fn open_stream(&self, url: url::Url, body: Result<Vec<u8>, serde_json::Error>) -> WorkflowEventStream {
        let client = self.client.clone();
        let request = async move {
            let body = body.map_err(|err| {
                HandoffError::Internal(format!("Failed to encode runtime request: {err}"))
            })?;
            debug!(url = %url, "opening runtime stream");
            let response = client
                .post(url)
                .header(http::header::CONTENT_TYPE, "application/json")
                .header(http::header::ACCEPT, "text/event-stream")
                .body(body)
                .send()
                .await
                .map_err(|err| HandoffError::Transport(format!("Runtime request failed: {err}")))?;

            let status = response.status();
            if !status.is_success() {
                let body_bytes = response.bytes().await.map_err(|err| {
                    HandoffError::Transport(format!("Failed to read error body: {err}"))
                })?;
                return Err(HandoffError::Upstream {
                    status: status.as_u16(),
                    message: summarize_error_body(&body_bytes),
                });
            }
            Ok(workflow_event_stream(response.bytes_stream()))
        };
        futures_util::stream::once(request).try_flatten().boxed()
    }
}

impl AgentRuntime for HttpAgentRuntime {
    fn run_turn(&self, thread_id: &str, message: &str) -> WorkflowEventStream {
        let body = serde_json::to_vec(&TurnRequest { thread_id, message });
        self.open_stream(self.turns_url.clone(), body)
    }

    fn resume_after_approval(
        &self,
        thread_id: &str,
        decision: &ApprovalDecision,
    ) -> WorkflowEventStream {
        let body = serde_json::to_vec(&ApprovalRequest {
            thread_id,
            decision,
        });
        self.open_stream(self.approvals_url.clone(), body)
    }
}
