//! Stand-in agent runtime for local runs: answers `POST .../turns` and
//! `POST .../approvals` with canned workflow-event SSE bodies.

use std::convert::Infallible;
use std::env;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use http::{header, HeaderValue, Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use tokio::net::TcpListener;

const DEFAULT_UPSTREAM_PORT: u16 = 8081;

#[derive(Copy, Clone)]
enum MockScenario {
    Text,
    Payment,
    Failure,
    Error,
}

impl MockScenario {
    fn name(self) -> &'static str {
        match self {
            MockScenario::Text => "text",
            MockScenario::Payment => "payment",
            MockScenario::Failure => "failure",
            MockScenario::Error => "error",
        }
    }
}

struct MockState {
    scenario: MockScenario,
    turns: AtomicU64,
    approvals: AtomicU64,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let port = env_u16("UPSTREAM_PORT", DEFAULT_UPSTREAM_PORT);
    let state = Arc::new(MockState {
        scenario: parse_scenario(),
        turns: AtomicU64::new(0),
        approvals: AtomicU64::new(0),
    });

    let listener = TcpListener::bind(("127.0.0.1", port))
        .await
        .unwrap_or_else(|err| panic!("failed to bind mock runtime on 127.0.0.1:{port}: {err}"));
    eprintln!(
        "mock copilot runtime on 127.0.0.1:{port} (scenario={})",
        state.scenario.name()
    );

    let conn_builder = AutoBuilder::new(TokioExecutor::new());
    loop {
        let (stream, remote_addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                eprintln!("accept error: {err}");
                continue;
            }
        };
        let io = TokioIo::new(stream);
        let conn_builder = conn_builder.clone();
        let service_state = Arc::clone(&state);
        let service = service_fn(move |request: Request<Incoming>| {
            let state_ref = Arc::clone(&service_state);
            async move { Ok::<_, Infallible>(handle_request(request, &state_ref).await) }
        });

        tokio::spawn(async move {
            if let Err(err) = conn_builder.serve_connection(io, service).await {
                eprintln!("mock runtime connection error from {remote_addr}: {err}");
            }
        });
    }
}

fn env_u16(name: &str, default: u16) -> u16 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(default)
}

fn parse_scenario() -> MockScenario {
    match env::var("MOCK_SCENARIO").as_deref() {
        Ok("payment") => MockScenario::Payment,
        Ok("failure") => MockScenario::Failure,
        Ok("error") => MockScenario::Error,
        Ok("text") | Err(_) => MockScenario::Text,
        Ok(other) => {
            eprintln!("unknown MOCK_SCENARIO '{other}', fallback to text");
            MockScenario::Text
        }
    }
}

async fn handle_request(request: Request<Incoming>, state: &MockState) -> Response<Full<Bytes>> {
    let (parts, body) = request.into_parts();
    let approved = read_request_body(body)
        .await
        .windows(15)
        .any(|window| window == br#""approved":true"#);

    let path = parts.uri.path();
    if parts.method == Method::GET && path == "/_mock/stats" {
        let body = format!(
            "{{\"scenario\":\"{}\",\"turns\":{},\"approvals\":{}}}",
            state.scenario.name(),
            state.turns.load(Ordering::Relaxed),
            state.approvals.load(Ordering::Relaxed),
        );
        return simple_response(StatusCode::OK, "application/json", Bytes::from(body));
    }
    if parts.method != Method::POST {
        return simple_response_static(
            StatusCode::METHOD_NOT_ALLOWED,
            "application/json",
            br#"{"error":"method_not_allowed"}"#,
        );
    }

    let body: &'static [u8] = if path.ends_with("/turns") {
        state.turns.fetch_add(1, Ordering::Relaxed);
        match state.scenario {
            MockScenario::Text => TURN_TEXT,
            MockScenario::Payment => TURN_PAYMENT,
            MockScenario::Failure => TURN_FAILURE,
            MockScenario::Error => return injected_error(),
        }
    } else if path.ends_with("/approvals") {
        state.approvals.fetch_add(1, Ordering::Relaxed);
        if matches!(state.scenario, MockScenario::Error) {
            return injected_error();
        }
        if approved {
            APPROVAL_ACCEPTED
        } else {
            APPROVAL_REJECTED
        }
    } else {
        return simple_response_static(
            StatusCode::NOT_FOUND,
            "application/json",
            br#"{"error":"not_found"}"#,
        );
    };

    let mut response = simple_response_static(StatusCode::OK, "text/event-stream", body);
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}

async fn read_request_body(body: Incoming) -> Bytes {
    body.collect()
        .await
        .map(http_body_util::Collected::to_bytes)
        .unwrap_or_default()
}

fn injected_error() -> Response<Full<Bytes>> {
    simple_response_static(
        StatusCode::SERVICE_UNAVAILABLE,
        "application/json",
        br#"{"error":{"message":"mock_injected_error"}}"#,
    )
}

fn simple_response(
    status: StatusCode,
    content_type: &'static str,
    body: Bytes,
) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

fn simple_response_static(
    status: StatusCode,
    content_type: &'static str,
    body: &'static [u8],
) -> Response<Full<Bytes>> {
    simple_response(status, content_type, Bytes::from_static(body))
}

const TURN_TEXT: &[u8] = b"data: {\"type\":\"workflow_started\"}\n\ndata: {\"type\":\"agent_run_update\",\"executor_id\":\"triage_agent\",\"data\":{\"contents\":[{\"type\":\"text\",\"text\":\"routing\"}]}}\n\ndata: {\"type\":\"agent_run_update\",\"executor_id\":\"account_agent\",\"data\":{\"contents\":[{\"type\":\"function_call\",\"call_id\":\"call_1\",\"name\":\"getAccountsByUserName\",\"arguments\":\"{\\\"userName\\\":\\\"bob.user@contoso.com\\\"}\"}]}}\n\ndata: {\"type\":\"agent_run_update\",\"executor_id\":\"account_agent\",\"data\":{\"contents\":[{\"type\":\"function_result\",\"call_id\":\"call_1\",\"result\":[{\"id\":\"1010\"}]}]}}\n\ndata: {\"type\":\"agent_run_update\",\"executor_id\":\"account_agent\",\"data\":{\"contents\":[{\"type\":\"text\",\"text\":\"Your checking account \"}]}}\n\ndata: {\"type\":\"agent_run_update\",\"executor_id\":\"account_agent\",\"data\":{\"contents\":[{\"type\":\"text\",\"text\":\"balance is $1,250.\"}]}}\n\ndata: [DONE]\n\n";
const TURN_PAYMENT: &[u8] = b"data: {\"type\":\"workflow_started\"}\n\ndata: {\"type\":\"executor_invoked\",\"executor_id\":\"payment_agent\"}\n\ndata: {\"type\":\"agent_run_update\",\"executor_id\":\"payment_agent\",\"data\":{\"contents\":[{\"type\":\"text\",\"text\":\"Please confirm the payment below.\"}]}}\n\ndata: {\"type\":\"agent_run_update\",\"executor_id\":\"payment_agent\",\"data\":{\"contents\":[{\"type\":\"function_approval_request\",\"id\":\"approval_payment\",\"function_call\":{\"call_id\":\"call_payment\",\"name\":\"processPayment\",\"arguments\":{\"account\":\"1010\",\"amount\":120.5}}}]}}\n\ndata: {\"type\":\"request_info\",\"request_id\":\"approval_payment\"}\n\ndata: [DONE]\n\n";
const TURN_FAILURE: &[u8] = b"data: {\"type\":\"workflow_started\"}\n\ndata: {\"type\":\"agent_run_update\",\"executor_id\":\"account_agent\",\"data\":{\"contents\":[{\"type\":\"text\",\"text\":\"Let me check\"}]}}\n\ndata: {\"type\":\"workflow_failed\",\"message\":\"account service unavailable\"}\n\n";
const APPROVAL_ACCEPTED: &[u8] = b"data: {\"type\":\"agent_run_update\",\"executor_id\":\"payment_agent\",\"data\":{\"contents\":[{\"type\":\"function_call\",\"call_id\":\"call_payment\",\"name\":\"processPayment\"}]}}\n\ndata: {\"type\":\"agent_run_update\",\"executor_id\":\"payment_agent\",\"data\":{\"contents\":[{\"type\":\"function_result\",\"call_id\":\"call_payment\"}]}}\n\ndata: {\"type\":\"agent_run_update\",\"executor_id\":\"payment_agent\",\"data\":{\"contents\":[{\"type\":\"text\",\"text\":\"Your payment was sent.\"}]}}\n\ndata: [DONE]\n\n";
const APPROVAL_REJECTED: &[u8] = b"data: {\"type\":\"agent_run_update\",\"executor_id\":\"payment_agent\",\"data\":{\"contents\":[{\"type\":\"text\",\"text\":\"Okay, I cancelled that payment.\"}]}}\n\ndata: [DONE]\n\n";
