//! Per-turn translation of workflow events into ChatKit thread-stream events.
//!
//! A [`TurnTranslator`] owns all state for one agent turn: the open assistant
//! message, its accumulated text and delta counter, and the call-id to tool
//! name table. [`translate_turn`] drives it over an upstream event stream,
//! pulling one event at a time and yielding whatever that event produced.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures_util::{Stream, StreamExt};
use rustc_hash::FxHashMap;
use tracing::{debug, trace, warn};

use crate::config::DEFAULT_TRIAGE_EXECUTOR_ID;
use crate::error::HandoffError;
use crate::observability::{log_turn_complete, TurnStats};
use crate::protocol::chatkit::{
    AssistantMessageContent, AssistantMessageItem, CustomTask, Task, TaskItem, ThreadItem,
    ThreadItemUpdate, ThreadStreamEvent, WidgetItem,
};
use crate::protocol::descriptions::Descriptions;
use crate::protocol::widgets::build_approval_request;
use crate::protocol::workflow::{Content, FunctionCall, WorkflowEvent};
use crate::state::ids::IdGenerator;

pub const TOOL_START_ICON: &str = "search";
pub const TOOL_END_ICON: &str = "check-circle-filled";
pub const PROGRESS_ICON: &str = "atom";

/// Shared, read-only inputs every translator needs.
#[derive(Clone)]
pub struct TranslatorContext {
    pub ids: Arc<IdGenerator>,
    pub descriptions: Arc<Descriptions>,
    pub triage_executor_id: Arc<str>,
}

impl TranslatorContext {
    #[must_use]
    pub fn new(
        ids: Arc<IdGenerator>,
        descriptions: Arc<Descriptions>,
        triage_executor_id: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            ids,
            descriptions,
            triage_executor_id: triage_executor_id.into(),
        }
    }
}

impl Default for TranslatorContext {
    fn default() -> Self {
        Self::new(
            Arc::new(IdGenerator::new()),
            Arc::new(Descriptions::builtin()),
            DEFAULT_TRIAGE_EXECUTOR_ID,
        )
    }
}

/// Shape of a run update's content list. Only homogeneous lists are translated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UpdateShape {
    Empty,
    Text,
    FunctionCall,
    FunctionResult,
    ApprovalRequest,
    Unclassified,
}

fn classify(contents: &[Content]) -> UpdateShape {
    let Some(first) = contents.first() else {
        return UpdateShape::Empty;
    };
    let shape = match first {
        Content::Text { .. } => UpdateShape::Text,
        Content::FunctionCall(_) => UpdateShape::FunctionCall,
        Content::FunctionResult { .. } => UpdateShape::FunctionResult,
        Content::FunctionApprovalRequest { .. } => UpdateShape::ApprovalRequest,
        Content::Other => return UpdateShape::Unclassified,
    };
    let first_kind = std::mem::discriminant(first);
    if contents
        .iter()
        .all(|content| std::mem::discriminant(content) == first_kind)
    {
        shape
    } else {
        UpdateShape::Unclassified
    }
}

/// State machine for one agent turn.
pub struct TurnTranslator {
    thread_id: String,
    message_id: String,
    message_started: bool,
    accumulated_text: String,
    content_index: u32,
    tool_name_by_call_id: FxHashMap<String, String>,
    ctx: TranslatorContext,
    turn_id: uuid::Uuid,
    stats: TurnStats,
    started_at: Instant,
}

impl TurnTranslator {
    #[must_use]
    pub fn new(thread_id: impl Into<String>, ctx: TranslatorContext) -> Self {
        let message_id = ctx.ids.message_id();
        let turn_id = ctx.ids.turn_uuid();
        Self {
            thread_id: thread_id.into(),
            message_id,
            message_started: false,
            accumulated_text: String::new(),
            content_index: 0,
            tool_name_by_call_id: FxHashMap::default(),
            ctx,
            turn_id,
            stats: TurnStats::default(),
            started_at: Instant::now(),
        }
    }

    #[must_use]
    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    /// Id of the assistant message this turn opens (or would open).
    #[must_use]
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    #[must_use]
    pub fn stats(&self) -> &TurnStats {
        &self.stats
    }

    /// Translate one upstream event, appending zero or more events to `out`.
    ///
    /// # Errors
    ///
    /// Returns an error when the workflow reports failure or an approval
    /// request cannot be rendered. Events already appended to `out` remain
    /// valid and should be delivered before the error.
    pub fn step(
        &mut self,
        event: WorkflowEvent,
        out: &mut Vec<ThreadStreamEvent>,
    ) -> Result<(), HandoffError> {
        self.stats.upstream_events += 1;
        let before = out.len();
        let result = self.dispatch(event, out);
        self.stats.downstream_events += (out.len() - before) as u64;
        result
    }

    /// Close the turn, returning the final `thread.item.done` for the
    /// assistant message if one was opened.
    #[must_use]
    pub fn finish(mut self) -> Option<ThreadStreamEvent> {
        let done = self.close_message();
        if done.is_some() {
            self.stats.downstream_events += 1;
        }
        log_turn_complete(&self.thread_id, &self.turn_id, &self.stats, self.started_at);
        done
    }

    fn abort(self, err: &HandoffError) {
        warn!(
            thread_id = %self.thread_id,
            turn_id = %self.turn_id,
            error = %err,
            "turn aborted"
        );
        log_turn_complete(&self.thread_id, &self.turn_id, &self.stats, self.started_at);
    }

    fn dispatch(
        &mut self,
        event: WorkflowEvent,
        out: &mut Vec<ThreadStreamEvent>,
    ) -> Result<(), HandoffError> {
        match event {
            WorkflowEvent::WorkflowStatus { .. }
            | WorkflowEvent::ExecutorInvoked { .. }
            | WorkflowEvent::ExecutorCompleted { .. }
            | WorkflowEvent::SuperStepStarted { .. }
            | WorkflowEvent::SuperStepCompleted { .. }
            | WorkflowEvent::RequestInfo { .. } => Ok(()),
            WorkflowEvent::AgentRunUpdate { executor_id, data } => {
                if executor_id == *self.ctx.triage_executor_id {
                    trace!(executor_id = %executor_id, "skipping triage run update");
                    return Ok(());
                }
                self.handle_run_update(&executor_id, data.contents, out)
            }
            WorkflowEvent::WorkflowFailed { ref message } => {
                out.push(self.progress_update(&event));
                out.extend(self.close_message());
                Err(HandoffError::Upstream {
                    status: 502,
                    message: format!("workflow failed: {message}"),
                })
            }
            other => {
                out.push(self.progress_update(&other));
                Ok(())
            }
        }
    }

    fn progress_update(&self, event: &WorkflowEvent) -> ThreadStreamEvent {
        let text = self.ctx.descriptions.events.describe(event.kind_name());
        ThreadStreamEvent::ProgressUpdate {
            icon: Some(PROGRESS_ICON.to_string()),
            text: text.to_string(),
        }
    }

    fn handle_run_update(
        &mut self,
        executor_id: &str,
        contents: Vec<Content>,
        out: &mut Vec<ThreadStreamEvent>,
    ) -> Result<(), HandoffError> {
        match classify(&contents) {
            UpdateShape::Empty => {}
            UpdateShape::Unclassified => {
                self.stats.dropped_updates += 1;
                let kinds: Vec<&str> = contents.iter().map(Content::kind_name).collect();
                debug!(
                    executor_id = executor_id,
                    content_kinds = ?kinds,
                    "dropping run update with unsupported content mix"
                );
            }
            UpdateShape::Text => {
                for content in contents {
                    if let Content::Text { text } = content {
                        out.push(self.handle_text(text));
                    }
                }
            }
            UpdateShape::FunctionCall => {
                for content in contents {
                    if let Content::FunctionCall(call) = content {
                        out.extend(self.handle_function_call(call));
                    }
                }
            }
            UpdateShape::FunctionResult => {
                for content in contents {
                    if let Content::FunctionResult {
                        call_id: Some(call_id),
                        ..
                    } = content
                    {
                        out.push(self.handle_function_result(call_id));
                    }
                }
            }
            UpdateShape::ApprovalRequest => {
                for content in contents {
                    if let Content::FunctionApprovalRequest { id, function_call } = content {
                        out.push(self.handle_approval_request(&id, &function_call)?);
                    }
                }
            }
        }
        Ok(())
    }

    fn handle_text(&mut self, text: String) -> ThreadStreamEvent {
        self.stats.text_fragments += 1;
        if !self.message_started {
            self.message_started = true;
            let item = self.assistant_message(vec![AssistantMessageContent::output_text(
                text.as_str(),
            )]);
            self.accumulated_text = text;
            return ThreadStreamEvent::ItemAdded { item };
        }

        self.accumulated_text.push_str(&text);
        self.content_index += 1;
        ThreadStreamEvent::ItemUpdated {
            item_id: self.ctx.ids.delta_item_id(),
            update: ThreadItemUpdate::TextDelta {
                content_index: self.content_index,
                delta: text,
            },
        }
    }

    fn handle_function_call(&mut self, call: FunctionCall) -> Option<ThreadStreamEvent> {
        let Some(name) = call.name.filter(|name| !name.is_empty()) else {
            debug!(call_id = %call.call_id, "function call without a name");
            return None;
        };
        self.stats.tool_calls += 1;
        let title = self.ctx.descriptions.tools.start(&name).to_string();
        let item = self.task_item(call.call_id.clone(), title, TOOL_START_ICON);
        self.tool_name_by_call_id.insert(call.call_id, name);
        Some(ThreadStreamEvent::ItemAdded { item })
    }

    fn handle_function_result(&mut self, call_id: String) -> ThreadStreamEvent {
        let tool_name = self
            .tool_name_by_call_id
            .get(&call_id)
            .map_or(call_id.as_str(), String::as_str);
        let title = self.ctx.descriptions.tools.end(tool_name).to_string();
        let item = self.task_item(call_id, title, TOOL_END_ICON);
        ThreadStreamEvent::ItemAdded { item }
    }

    fn handle_approval_request(
        &mut self,
        request_id: &str,
        call: &FunctionCall,
    ) -> Result<ThreadStreamEvent, HandoffError> {
        self.stats.approval_requests += 1;
        let tool_name = call.name.as_deref().unwrap_or(call.call_id.as_str());
        let tool_args = call.parse_arguments()?;
        let widget = build_approval_request(tool_name, tool_args.as_ref(), &call.call_id, request_id)?;
        Ok(ThreadStreamEvent::ItemDone {
            item: ThreadItem::Widget(WidgetItem {
                id: self.ctx.ids.widget_id(),
                thread_id: self.thread_id.clone(),
                created_at: Utc::now(),
                widget,
                copy_text: None,
            }),
        })
    }

    fn close_message(&mut self) -> Option<ThreadStreamEvent> {
        if !self.message_started {
            return None;
        }
        self.message_started = false;
        let text = std::mem::take(&mut self.accumulated_text);
        let content = if text.is_empty() {
            Vec::new()
        } else {
            vec![AssistantMessageContent::output_text(text)]
        };
        Some(ThreadStreamEvent::ItemDone {
            item: self.assistant_message(content),
        })
    }

    fn assistant_message(&self, content: Vec<AssistantMessageContent>) -> ThreadItem {
        ThreadItem::AssistantMessage(AssistantMessageItem {
            id: self.message_id.clone(),
            thread_id: self.thread_id.clone(),
            created_at: Utc::now(),
            content,
        })
    }

    fn task_item(&self, call_id: String, title: String, icon: &str) -> ThreadItem {
        ThreadItem::Task(TaskItem {
            id: call_id,
            thread_id: self.thread_id.clone(),
            created_at: Utc::now(),
            task: Task::Custom(CustomTask {
                title: Some(title),
                icon: Some(icon.to_string()),
                ..CustomTask::default()
            }),
        })
    }
}

/// Lazily translate one turn.
///
/// Each upstream event is pulled only after everything produced by the
/// previous one has been consumed. An upstream error, or a failed step, is
/// yielded once after any events that preceded it and ends the stream; the
/// open message is only flushed on clean completion or reported workflow
/// failure.
pub fn translate_turn<S>(
    translator: TurnTranslator,
    upstream: S,
) -> impl Stream<Item = Result<ThreadStreamEvent, HandoffError>> + Send
where
    S: Stream<Item = Result<WorkflowEvent, HandoffError>> + Send + 'static,
{
    futures_util::stream::unfold(
        (
            Box::pin(upstream),
            Some(translator),
            Vec::<ThreadStreamEvent>::with_capacity(4),
            VecDeque::<ThreadStreamEvent>::new(),
            None::<HandoffError>,
        ),
        |(mut upstream, mut translator, mut produced, mut pending, mut failure)| async move {
            loop {
                if let Some(event) = pending.pop_front() {
                    return Some((Ok(event), (upstream, translator, produced, pending, failure)));
                }
                if let Some(err) = failure.take() {
                    return Some((Err(err), (upstream, translator, produced, pending, None)));
                }

                let active = translator.as_mut()?;
                match upstream.as_mut().next().await {
                    Some(Ok(event)) => {
                        if let Err(err) = active.step(event, &mut produced) {
                            if let Some(aborted) = translator.take() {
                                aborted.abort(&err);
                            }
                            failure = Some(err);
                        }
                    }
                    Some(Err(err)) => {
                        if let Some(aborted) = translator.take() {
                            aborted.abort(&err);
                        }
                        failure = Some(err);
                    }
                    None => {
                        if let Some(done) = translator.take().and_then(TurnTranslator::finish) {
                            produced.push(done);
                        }
                    }
                }
                pending.extend(produced.drain(..));
            }
        },
    )
}

/// Convenience wrapper: a fresh translator for `thread_id` over `upstream`.
pub fn translate<S>(
    thread_id: impl Into<String>,
    ctx: TranslatorContext,
    upstream: S,
) -> impl Stream<Item = Result<ThreadStreamEvent, HandoffError>> + Send
where
    S: Stream<Item = Result<WorkflowEvent, HandoffError>> + Send + 'static,
{
    translate_turn(TurnTranslator::new(thread_id, ctx), upstream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::workflow::AgentRunResponseUpdate;
    use serde_json::json;

    fn ctx() -> TranslatorContext {
        TranslatorContext::new(
            Arc::new(IdGenerator::with_seed(11)),
            Arc::new(Descriptions::builtin()),
            "triage_agent",
        )
    }

    fn run(events: Vec<WorkflowEvent>) -> (Vec<ThreadStreamEvent>, Option<ThreadStreamEvent>) {
        let mut translator = TurnTranslator::new("thr_1", ctx());
        let mut out = Vec::new();
        for event in events {
            translator.step(event, &mut out).expect("step");
        }
        let done = translator.finish();
        (out, done)
    }

    fn text(executor: &str, fragment: &str) -> WorkflowEvent {
        WorkflowEvent::run_update(executor, Content::text(fragment))
    }

    fn task_title(event: &ThreadStreamEvent) -> (&str, &str, &str) {
        let ThreadStreamEvent::ItemAdded {
            item: ThreadItem::Task(task),
        } = event
        else {
            panic!("expected task item, got {event:?}");
        };
        let Task::Custom(custom) = &task.task;
        (
            task.id.as_str(),
            custom.title.as_deref().unwrap_or_default(),
            custom.icon.as_deref().unwrap_or_default(),
        )
    }

    #[test]
    fn test_classify_shapes() {
        assert_eq!(classify(&[]), UpdateShape::Empty);
        assert_eq!(
            classify(&[Content::text("a"), Content::text("b")]),
            UpdateShape::Text
        );
        assert_eq!(
            classify(&[Content::text("a"), Content::function_result("c1")]),
            UpdateShape::Unclassified
        );
        assert_eq!(classify(&[Content::Other]), UpdateShape::Unclassified);
    }

    #[test]
    fn test_first_fragment_opens_message_and_rest_are_deltas() {
        let (out, done) = run(vec![
            text("account_agent", "Hel"),
            text("account_agent", "lo"),
            text("account_agent", "!"),
        ]);
        assert_eq!(out.len(), 3);
        assert!(matches!(
            &out[0],
            ThreadStreamEvent::ItemAdded { item: ThreadItem::AssistantMessage(m) }
                if m.content[0].text == "Hel"
        ));
        let ThreadStreamEvent::ItemUpdated { item_id, update } = &out[2] else {
            panic!("expected delta");
        };
        assert!(item_id.starts_with("itm_"));
        assert_eq!(
            update,
            &ThreadItemUpdate::TextDelta {
                content_index: 2,
                delta: "!".into()
            }
        );
        let Some(ThreadStreamEvent::ItemDone {
            item: ThreadItem::AssistantMessage(message),
        }) = done
        else {
            panic!("expected final message");
        };
        assert_eq!(message.content[0].text, "Hello!");
    }

    #[test]
    fn test_triage_updates_and_structural_events_are_silent() {
        let (out, done) = run(vec![
            WorkflowEvent::ExecutorInvoked {
                executor_id: "triage_agent".into(),
            },
            text("triage_agent", "routing to payments"),
            WorkflowEvent::SuperStepCompleted { iteration: 1 },
            WorkflowEvent::WorkflowStatus {
                state: "IDLE".into(),
            },
        ]);
        assert!(out.is_empty());
        assert!(done.is_none());
    }

    #[test]
    fn test_configured_triage_executor_is_skipped() {
        let ctx = TranslatorContext::new(
            Arc::new(IdGenerator::with_seed(1)),
            Arc::new(Descriptions::builtin()),
            "router",
        );
        let mut translator = TurnTranslator::new("thr_1", ctx);
        let mut out = Vec::new();
        translator.step(text("router", "x"), &mut out).expect("step");
        translator.step(text("triage_agent", "y"), &mut out).expect("step");
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_function_call_then_result_uses_registered_name() {
        let (out, _) = run(vec![
            WorkflowEvent::run_update(
                "payment_agent",
                Content::FunctionCall(FunctionCall::new("c1", "processPayment")),
            ),
            WorkflowEvent::run_update("payment_agent", Content::function_result("c1")),
            WorkflowEvent::run_update("payment_agent", Content::function_result("c404")),
        ]);
        assert_eq!(task_title(&out[0]), ("c1", "Processing your payment...", "search"));
        assert_eq!(
            task_title(&out[1]),
            ("c1", "Payment processed", "check-circle-filled")
        );
        assert_eq!(task_title(&out[2]), ("c404", "c404", "check-circle-filled"));
    }

    #[test]
    fn test_nameless_call_and_idless_result_are_skipped() {
        let call = FunctionCall {
            call_id: "c1".into(),
            name: None,
            arguments: None,
        };
        let (out, _) = run(vec![
            WorkflowEvent::run_update("payment_agent", Content::FunctionCall(call)),
            WorkflowEvent::run_update(
                "payment_agent",
                Content::FunctionResult {
                    call_id: None,
                    result: json!("ok"),
                },
            ),
        ]);
        assert!(out.is_empty());
    }

    #[test]
    fn test_mixed_update_is_dropped_and_counted() {
        let mut translator = TurnTranslator::new("thr_1", ctx());
        let mut out = Vec::new();
        let event = WorkflowEvent::AgentRunUpdate {
            executor_id: "account_agent".into(),
            data: AgentRunResponseUpdate {
                contents: vec![
                    Content::text("Looking"),
                    Content::FunctionCall(FunctionCall::new("c1", "getAccountDetails")),
                ],
            },
        };
        translator.step(event, &mut out).expect("step");
        assert!(out.is_empty());
        assert_eq!(translator.stats().dropped_updates, 1);
        assert!(translator.finish().is_none());
    }

    #[test]
    fn test_unknown_events_become_progress_updates() {
        let (out, _) = run(vec![
            WorkflowEvent::WorkflowStarted,
            WorkflowEvent::Unknown {
                type_name: "agent_heartbeat".into(),
            },
        ]);
        assert_eq!(
            out,
            vec![
                ThreadStreamEvent::ProgressUpdate {
                    icon: Some("atom".into()),
                    text: "Processing your request ...".into(),
                },
                ThreadStreamEvent::ProgressUpdate {
                    icon: Some("atom".into()),
                    text: "agent_heartbeat".into(),
                },
            ]
        );
    }

    #[test]
    fn test_empty_first_fragment_finishes_with_empty_content() {
        let (out, done) = run(vec![text("account_agent", "")]);
        assert_eq!(out.len(), 1);
        let Some(ThreadStreamEvent::ItemDone {
            item: ThreadItem::AssistantMessage(message),
        }) = done
        else {
            panic!("expected final message");
        };
        assert!(message.content.is_empty());
    }

    #[test]
    fn test_approval_request_emits_done_widget() {
        let call = FunctionCall::new("c2", "processPayment")
            .with_arguments(json!(r#"{"amount": 50}"#));
        let (out, _) = run(vec![WorkflowEvent::run_update(
            "payment_agent",
            Content::FunctionApprovalRequest {
                id: "r1".into(),
                function_call: call,
            },
        )]);
        let [ThreadStreamEvent::ItemDone {
            item: ThreadItem::Widget(widget),
        }] = out.as_slice()
        else {
            panic!("expected one widget item, got {out:?}");
        };
        assert!(widget.id.starts_with("wdg_"));
        assert_eq!(widget.thread_id, "thr_1");
    }

    #[test]
    fn test_approval_with_bad_arguments_fails_step() {
        let mut translator = TurnTranslator::new("thr_1", ctx());
        let mut out = Vec::new();
        let call = FunctionCall::new("c2", "processPayment").with_arguments(json!(42));
        let err = translator
            .step(
                WorkflowEvent::run_update(
                    "payment_agent",
                    Content::FunctionApprovalRequest {
                        id: "r1".into(),
                        function_call: call,
                    },
                ),
                &mut out,
            )
            .expect_err("non-object arguments");
        assert!(matches!(err, HandoffError::Translation(_)));
    }

    #[test]
    fn test_workflow_failure_flushes_open_message() {
        let mut translator = TurnTranslator::new("thr_1", ctx());
        let mut out = Vec::new();
        translator
            .step(text("account_agent", "Partial"), &mut out)
            .expect("step");
        let err = translator
            .step(
                WorkflowEvent::WorkflowFailed {
                    message: "boom".into(),
                },
                &mut out,
            )
            .expect_err("failure");
        assert!(matches!(err, HandoffError::Upstream { status: 502, .. }));
        assert_eq!(out.len(), 3);
        let ThreadStreamEvent::ProgressUpdate { icon, text } = &out[1] else {
            panic!("expected progress update before the flush");
        };
        assert_eq!(icon.as_deref(), Some("atom"));
        assert_eq!(text, "WorkflowFailedEvent");
        assert!(matches!(out[2], ThreadStreamEvent::ItemDone { .. }));
        assert!(translator.finish().is_none());
    }

    #[test]
    fn test_workflow_failure_without_message_reports_progress_first() {
        let mut translator = TurnTranslator::new("thr_1", ctx());
        let mut out = Vec::new();
        translator
            .step(
                WorkflowEvent::WorkflowFailed {
                    message: "boom".into(),
                },
                &mut out,
            )
            .expect_err("failure");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].type_name(), "progress_update");
    }

    #[tokio::test]
    async fn test_translate_turn_ends_after_upstream_error() {
        let upstream = futures_util::stream::iter(vec![
            Ok(text("account_agent", "Hi")),
            Err(HandoffError::Transport("reset".into())),
            Ok(text("account_agent", " there")),
        ]);
        let items: Vec<_> = translate("thr_1", ctx(), upstream).collect().await;
        assert_eq!(items.len(), 2);
        assert!(matches!(items[0], Ok(ThreadStreamEvent::ItemAdded { .. })));
        assert!(matches!(items[1], Err(HandoffError::Transport(_))));
    }
}
