//! The `/chatkit` endpoint: request dispatch, thread persistence and the
//! streamed turn response.

use std::sync::Arc;

use axum::body::Body;
use axum::response::{IntoResponse, Json, Response};
use bytes::Bytes;
use chrono::Utc;
use futures_util::stream::{self, BoxStream};
use futures_util::{future, StreamExt};
use tracing::{debug, info, warn};

use crate::error::HandoffError;
use crate::protocol::chatkit::{
    ApprovalDecision, Attachment, ChatKitRequest, CustomActionParams, ErrorCode, ErrorEvent,
    Thread, ThreadItem, ThreadMetadata, ThreadStatus, ThreadStreamEvent, UserMessageInput,
    UserMessageItem, APPROVAL_ACTION_TYPE,
};
use crate::runtime::WorkflowEventStream;
use crate::state::AppState;
use crate::stream::{encode_chatkit_event, translate_turn, GuardedTurn};

/// Title given to threads before their first turn completes.
pub const NEW_THREAD_TITLE: &str = "New thread";
const UNTITLED_THREAD_TITLE: &str = "Untitled thread";
const THREAD_PAGE_LIMIT: usize = 100;

type TurnEvents = BoxStream<'static, Result<ThreadStreamEvent, HandoffError>>;

/// What one streaming request turns into before anything is sent.
struct TurnPlan {
    thread_id: String,
    prelude: Vec<ThreadStreamEvent>,
    upstream: Option<WorkflowEventStream>,
    /// Text used to title the thread once the turn completes.
    title_source: Option<String>,
}

impl TurnPlan {
    fn new(thread_id: String) -> Self {
        Self {
            thread_id,
            prelude: Vec::new(),
            upstream: None,
            title_source: None,
        }
    }
}

/// Handle one `POST /chatkit` body.
pub async fn handle_chatkit(state: Arc<AppState>, body: Bytes) -> Response {
    let request: ChatKitRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => {
            return HandoffError::InvalidRequest(format!("Invalid ChatKit request: {err}"))
                .into_response();
        }
    };

    if let ChatKitRequest::GetById { params } = request {
        debug!(thread_id = %params.thread_id, "loading thread");
        return match state
            .store
            .load_full_thread(&params.thread_id, THREAD_PAGE_LIMIT)
        {
            Ok(thread) => Json(thread).into_response(),
            Err(err) => err.into_response(),
        };
    }

    let events = stream_events(state, request);
    sse_ok_response(Body::from_stream(
        events.map(|event| encode_chatkit_event(&event)),
    ))
}

/// Every event of one streaming request, errors already folded into a
/// terminal `error` event.
pub fn stream_events(
    state: Arc<AppState>,
    request: ChatKitRequest,
) -> GuardedTurn<TurnEvents> {
    let events = match plan_turn(&state, request) {
        Ok(plan) => run_plan(state, plan),
        Err(err) => stream::once(future::ready(Err(err))).boxed(),
    };
    GuardedTurn::new(events)
}

fn plan_turn(state: &AppState, request: ChatKitRequest) -> Result<TurnPlan, HandoffError> {
    match request {
        ChatKitRequest::ThreadsCreate { params } => {
            let metadata = ThreadMetadata {
                id: state.ids().thread_id(),
                title: Some(NEW_THREAD_TITLE.to_string()),
                created_at: Utc::now(),
                status: ThreadStatus::Active,
            };
            state.store.save_thread(metadata.clone());
            info!(thread_id = %metadata.id, "thread created");
            let mut plan = TurnPlan::new(metadata.id.clone());
            plan.prelude.push(ThreadStreamEvent::ThreadCreated {
                thread: Thread::without_items(metadata),
            });
            Ok(respond_to_user(state, plan, params.input))
        }
        ChatKitRequest::AddUserMessage { params } => {
            state.store.load_thread(&params.thread_id)?;
            Ok(respond_to_user(
                state,
                TurnPlan::new(params.thread_id),
                params.input,
            ))
        }
        ChatKitRequest::CustomAction { params } => plan_custom_action(state, params),
        ChatKitRequest::GetById { .. } => Err(HandoffError::InvalidRequest(
            "threads.get_by_id is not a streaming request".into(),
        )),
    }
}

fn respond_to_user(
    state: &AppState,
    mut plan: TurnPlan,
    input: UserMessageInput,
) -> TurnPlan {
    let item = build_user_message(state, &plan.thread_id, input);
    let text = item.text();
    let message = agent_message(&text, &item.attachments);
    plan.prelude.push(ThreadStreamEvent::ItemDone {
        item: ThreadItem::UserMessage(item),
    });
    plan.upstream = Some(state.runtime.run_turn(&plan.thread_id, &message));
    plan.title_source = Some(text);
    plan
}

fn build_user_message(state: &AppState, thread_id: &str, input: UserMessageInput) -> UserMessageItem {
    UserMessageItem {
        id: state.ids().user_message_id(),
        thread_id: thread_id.to_string(),
        created_at: Utc::now(),
        content: input.content,
        attachments: input
            .attachments
            .into_iter()
            .map(|id| Attachment {
                id,
                name: String::new(),
                mime_type: String::new(),
            })
            .collect(),
        quoted_text: input.quoted_text,
        inference_options: input.inference_options,
    }
}

/// Text handed to the agent runtime: the user's words plus a reference to
/// the first attachment, if any.
fn agent_message(text: &str, attachments: &[Attachment]) -> String {
    match attachments.first() {
        Some(attachment) => format!("{text} [attachment_id: {}]", attachment.id),
        None => text.to_string(),
    }
}

fn plan_custom_action(
    state: &AppState,
    params: CustomActionParams,
) -> Result<TurnPlan, HandoffError> {
    let CustomActionParams {
        thread_id,
        item_id,
        action,
    } = params;
    state.store.load_thread(&thread_id)?;
    let mut plan = TurnPlan::new(thread_id);

    if let Some(item_id) = item_id {
        let item = state.store.load_item(&plan.thread_id, &item_id)?;
        if !matches!(item, ThreadItem::Widget(_)) {
            warn!(thread_id = %plan.thread_id, item_id = %item_id, "action target is not a widget");
            plan.prelude.push(ThreadStreamEvent::Error(ErrorEvent {
                code: ErrorCode::StreamError,
                message: Some(format!("Item {item_id} is not a widget item")),
                allow_retry: false,
            }));
            return Ok(plan);
        }
    }

    if action.action_type != APPROVAL_ACTION_TYPE {
        warn!(
            thread_id = %plan.thread_id,
            action_type = %action.action_type,
            "ignoring unsupported widget action"
        );
        return Ok(plan);
    }

    let decision: ApprovalDecision = serde_json::from_value(action.payload).map_err(|err| {
        HandoffError::InvalidRequest(format!("Invalid approval payload: {err}"))
    })?;
    info!(
        thread_id = %plan.thread_id,
        tool = %decision.tool_name,
        approved = decision.approved,
        "resuming after approval"
    );
    plan.upstream = Some(
        state
            .runtime
            .resume_after_approval(&plan.thread_id, &decision),
    );
    Ok(plan)
}

fn run_plan(state: Arc<AppState>, plan: TurnPlan) -> TurnEvents {
    let TurnPlan {
        thread_id,
        prelude,
        upstream,
        title_source,
    } = plan;

    let turn = match upstream {
        Some(upstream) => translate_turn(state.translator(&thread_id), upstream).left_stream(),
        None => stream::empty::<Result<ThreadStreamEvent, HandoffError>>().right_stream(),
    };

    let persist_state = Arc::clone(&state);
    let persisted = stream::iter(prelude.into_iter().map(Ok))
        .chain(turn)
        .map(move |item| {
            item.and_then(|event| {
                persist_event(&persist_state, &event)?;
                Ok(event)
            })
        });

    // Polled only after the turn finished cleanly; an error ends the stream first.
    let epilogue = stream::once(async move {
        let text = title_source?;
        update_title(&state, &thread_id, &text).transpose()
    })
    .filter_map(future::ready);

    persisted.chain(epilogue).boxed()
}

/// Completed items are stored before they reach the client.
fn persist_event(state: &AppState, event: &ThreadStreamEvent) -> Result<(), HandoffError> {
    if let ThreadStreamEvent::ItemDone { item } = event {
        state.store.add_item(item.clone())?;
    }
    Ok(())
}

fn needs_title(metadata: &ThreadMetadata) -> bool {
    matches!(metadata.title.as_deref(), None | Some(NEW_THREAD_TITLE))
}

/// Title from the first `max_chars` characters of the user's text.
fn derive_title(text: &str, max_chars: usize) -> String {
    let title = crate::util::truncate_chars(text.trim_start(), max_chars).trim();
    if title.is_empty() {
        UNTITLED_THREAD_TITLE.to_string()
    } else {
        title.to_string()
    }
}

fn update_title(
    state: &AppState,
    thread_id: &str,
    text: &str,
) -> Result<Option<ThreadStreamEvent>, HandoffError> {
    let mut metadata = state.store.load_thread(thread_id)?;
    if !needs_title(&metadata) {
        return Ok(None);
    }
    let title = derive_title(text, state.config.features.title_max_chars);
    debug!(thread_id, title = %title, "titling thread");
    metadata.title = Some(title);
    state.store.save_thread(metadata.clone());
    Ok(Some(ThreadStreamEvent::ThreadUpdated {
        thread: Thread::without_items(metadata),
    }))
}

#[inline]
fn sse_ok_response(body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = http::StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(
        http::header::CACHE_CONTROL,
        http::HeaderValue::from_static("no-cache"),
    );
    headers.insert(
        http::header::CONNECTION,
        http::HeaderValue::from_static("keep-alive"),
    );
    response
}
