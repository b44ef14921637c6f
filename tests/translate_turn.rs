use std::sync::Arc;

use bytes::Bytes;
use chatkit_handoff::error::HandoffError;
use chatkit_handoff::protocol::chatkit::{
    AssistantMessageContent, Task, ThreadItem, ThreadItemUpdate, ThreadStreamEvent,
};
use chatkit_handoff::protocol::descriptions::Descriptions;
use chatkit_handoff::protocol::widgets::WidgetComponent;
use chatkit_handoff::protocol::workflow::{
    AgentRunResponseUpdate, Content, FunctionCall, WorkflowEvent,
};
use chatkit_handoff::runtime::http::workflow_event_stream;
use chatkit_handoff::state::IdGenerator;
use chatkit_handoff::stream::{translate, GuardedTurn, TranslatorContext};
use futures_util::StreamExt;
use serde_json::{json, Value};

const AGENT: &str = "payment_agent";

fn ctx() -> TranslatorContext {
    TranslatorContext::new(
        Arc::new(IdGenerator::with_seed(7)),
        Arc::new(Descriptions::builtin()),
        "triage_agent",
    )
}

async fn run(events: Vec<WorkflowEvent>) -> Vec<ThreadStreamEvent> {
    let upstream = futures_util::stream::iter(events.into_iter().map(Ok));
    translate("thr_test", ctx(), upstream)
        .map(|item| item.expect("clean turn"))
        .collect()
        .await
}

fn text(fragment: &str) -> WorkflowEvent {
    WorkflowEvent::run_update(AGENT, Content::text(fragment))
}

fn call(call_id: &str, name: &str) -> WorkflowEvent {
    WorkflowEvent::run_update(AGENT, Content::FunctionCall(FunctionCall::new(call_id, name)))
}

fn result(call_id: &str) -> WorkflowEvent {
    WorkflowEvent::run_update(AGENT, Content::function_result(call_id))
}

fn task_title(event: &ThreadStreamEvent) -> Option<&str> {
    match event {
        ThreadStreamEvent::ItemAdded {
            item: ThreadItem::Task(task),
        } => {
            let Task::Custom(custom) = &task.task;
            custom.title.as_deref()
        }
        _ => None,
    }
}

fn final_message_content(events: &[ThreadStreamEvent]) -> Vec<AssistantMessageContent> {
    events
        .iter()
        .rev()
        .find_map(|event| match event {
            ThreadStreamEvent::ItemDone {
                item: ThreadItem::AssistantMessage(message),
            } => Some(message.content.clone()),
            _ => None,
        })
        .expect("assistant message item.done")
}

#[tokio::test]
async fn test_message_opens_once_and_accumulates_fragments() {
    let fragments = ["Your ", "balance ", "is ", "$1,250."];
    let events = run(fragments.iter().map(|f| text(f)).collect()).await;

    assert_eq!(events.len(), fragments.len() + 1);
    let ThreadStreamEvent::ItemAdded {
        item: ThreadItem::AssistantMessage(opened),
    } = &events[0]
    else {
        panic!("first event should open the assistant message");
    };
    assert_eq!(opened.content[0].text, "Your ");

    let deltas: Vec<(u32, &str)> = events[1..fragments.len()]
        .iter()
        .map(|event| match event {
            ThreadStreamEvent::ItemUpdated {
                update: ThreadItemUpdate::TextDelta {
                    content_index,
                    delta,
                },
                ..
            } => (*content_index, delta.as_str()),
            other => panic!("expected text delta, got {}", other.type_name()),
        })
        .collect();
    assert_eq!(deltas, vec![(1, "balance "), (2, "is "), (3, "$1,250.")]);

    let ThreadStreamEvent::ItemDone {
        item: ThreadItem::AssistantMessage(done),
    } = &events[fragments.len()]
    else {
        panic!("last event should close the assistant message");
    };
    assert_eq!(done.id, opened.id);
    assert_eq!(done.content[0].text, fragments.concat());
}

#[tokio::test]
async fn test_result_task_uses_end_description_of_called_tool() {
    let events = run(vec![
        call("c1", "getAccountsByUserName"),
        result("c1"),
    ])
    .await;
    assert_eq!(
        task_title(&events[0]),
        Some("Looking up your account for your user name...")
    );
    assert_eq!(task_title(&events[1]), Some("Retrieved your accounts"));
}

#[tokio::test]
async fn test_unknown_tool_title_is_raw_name() {
    let events = run(vec![call("c9", "transferToSavings"), result("c9")]).await;
    assert_eq!(task_title(&events[0]), Some("transferToSavings"));
    assert_eq!(task_title(&events[1]), Some("transferToSavings"));
}

#[tokio::test]
async fn test_structural_events_never_open_a_message() {
    let events = run(vec![
        WorkflowEvent::ExecutorInvoked {
            executor_id: AGENT.into(),
        },
        WorkflowEvent::SuperStepStarted { iteration: 1 },
        WorkflowEvent::ExecutorCompleted {
            executor_id: AGENT.into(),
        },
    ])
    .await;
    assert!(events.is_empty());
}

#[tokio::test]
async fn test_zero_length_fragment_finalizes_with_empty_content() {
    let events = run(vec![text("")]).await;
    assert_eq!(events.len(), 2);
    assert!(final_message_content(&events).is_empty());
}

#[tokio::test]
async fn test_approval_buttons_differ_only_in_decision() {
    let events = run(vec![WorkflowEvent::run_update(
        AGENT,
        Content::FunctionApprovalRequest {
            id: "r1".into(),
            function_call: FunctionCall::new("c2", "processPayment")
                .with_arguments(json!({ "amount": 42 })),
        },
    )])
    .await;

    let [ThreadStreamEvent::ItemDone {
        item: ThreadItem::Widget(widget),
    }] = events.as_slice()
    else {
        panic!("expected a single widget item.done");
    };
    let mut payloads: Vec<Value> = Vec::new();
    widget.widget.visit(&mut |node| {
        if let WidgetComponent::Button {
            on_click_action: Some(action),
            ..
        } = node
        {
            payloads.push(action.payload.clone());
        }
    });
    assert_eq!(payloads.len(), 2);
    for payload in &payloads {
        assert_eq!(payload["call_id"], "c2");
        assert_eq!(payload["request_id"], "r1");
        assert_eq!(payload["tool_name"], "processPayment");
    }
    let mut approve = payloads[0].clone();
    let mut reject = payloads[1].clone();
    assert_ne!(approve["approved"], reject["approved"]);
    approve.as_object_mut().expect("object").remove("approved");
    reject.as_object_mut().expect("object").remove("approved");
    assert_eq!(approve, reject);
}

#[tokio::test]
async fn test_banking_scenario_end_to_end() {
    let events = run(vec![
        WorkflowEvent::WorkflowStarted,
        WorkflowEvent::run_update("triage_agent", Content::text("handing off")),
        call("call_1", "getAccountsByUserName"),
        result("call_1"),
        text("You have "),
        text("two accounts."),
    ])
    .await;

    let kinds: Vec<&str> = events.iter().map(ThreadStreamEvent::type_name).collect();
    assert_eq!(
        kinds,
        vec![
            "progress_update",
            "thread.item.added",
            "thread.item.added",
            "thread.item.added",
            "thread.item.updated",
            "thread.item.done",
        ]
    );
    let ThreadStreamEvent::ProgressUpdate { text, .. } = &events[0] else {
        panic!("expected progress update");
    };
    assert_eq!(text, "Processing your request ...");
    assert_eq!(
        final_message_content(&events)[0].text,
        "You have two accounts."
    );
}

#[tokio::test]
async fn test_upstream_error_ends_guarded_stream() {
    let upstream = futures_util::stream::iter(vec![
        Ok(text("Checking")),
        Err(HandoffError::Transport("connection reset".into())),
        Ok(text(" never sent")),
    ]);
    let events: Vec<_> = GuardedTurn::new(translate("thr_test", ctx(), upstream))
        .collect()
        .await;

    assert_eq!(events.len(), 2);
    assert!(matches!(events[0], ThreadStreamEvent::ItemAdded { .. }));
    let ThreadStreamEvent::Error(err) = &events[1] else {
        panic!("expected terminal error event");
    };
    assert!(err.allow_retry);
}

#[tokio::test]
async fn test_workflow_failure_flushes_message_before_error() {
    let upstream = futures_util::stream::iter(vec![
        Ok(text("Partial answer")),
        Ok(WorkflowEvent::WorkflowFailed {
            message: "agent crashed".into(),
        }),
    ]);
    let events: Vec<_> = GuardedTurn::new(translate("thr_test", ctx(), upstream))
        .collect()
        .await;

    let kinds: Vec<&str> = events.iter().map(ThreadStreamEvent::type_name).collect();
    assert_eq!(
        kinds,
        vec![
            "thread.item.added",
            "progress_update",
            "thread.item.done",
            "error"
        ]
    );
    assert_eq!(final_message_content(&events)[0].text, "Partial answer");
}

#[tokio::test]
async fn test_workflow_failure_reports_progress_before_error() {
    let upstream = futures_util::stream::iter(vec![
        Ok(WorkflowEvent::WorkflowFailed {
            message: "agent crashed".into(),
        }),
        Ok(text("after")),
    ]);
    let events: Vec<_> = GuardedTurn::new(translate("thr_test", ctx(), upstream))
        .collect()
        .await;

    let kinds: Vec<&str> = events.iter().map(ThreadStreamEvent::type_name).collect();
    assert_eq!(kinds, vec!["progress_update", "error"]);
    let ThreadStreamEvent::ProgressUpdate { icon, text } = &events[0] else {
        panic!("expected progress update");
    };
    assert_eq!(icon.as_deref(), Some("atom"));
    assert_eq!(text, "WorkflowFailedEvent");
}

#[tokio::test]
async fn test_text_list_in_one_update_is_handled_in_order() {
    let events = run(vec![WorkflowEvent::AgentRunUpdate {
        executor_id: AGENT.into(),
        data: AgentRunResponseUpdate {
            contents: vec![Content::text("First "), Content::text("second")],
        },
    }])
    .await;

    let kinds: Vec<&str> = events.iter().map(ThreadStreamEvent::type_name).collect();
    assert_eq!(
        kinds,
        vec!["thread.item.added", "thread.item.updated", "thread.item.done"]
    );
    let ThreadStreamEvent::ItemUpdated {
        update: ThreadItemUpdate::TextDelta {
            content_index,
            delta,
        },
        ..
    } = &events[1]
    else {
        panic!("expected text delta");
    };
    assert_eq!(*content_index, 1);
    assert_eq!(delta, "second");
    assert_eq!(final_message_content(&events)[0].text, "First second");
}

fn text_frame(fragment: &[u8]) -> Vec<u8> {
    let mut frame = br#"data: {"type":"agent_run_update","executor_id":"payment_agent","data":{"contents":[{"type":"text","text":""#.to_vec();
    frame.extend_from_slice(fragment);
    frame.extend_from_slice(b"\"}]}}\n\n");
    frame
}

#[tokio::test]
async fn test_invalid_utf8_body_ends_turn_with_error() {
    let chunks = vec![
        Ok::<_, std::io::Error>(Bytes::from(text_frame(b"Hello "))),
        Ok(Bytes::from(text_frame(b"bad \xff"))),
        Ok(Bytes::from(text_frame(b"world"))),
    ];
    let upstream = workflow_event_stream(futures_util::stream::iter(chunks));
    let events: Vec<_> = GuardedTurn::new(translate("thr_test", ctx(), upstream))
        .collect()
        .await;

    let kinds: Vec<&str> = events.iter().map(ThreadStreamEvent::type_name).collect();
    assert_eq!(kinds, vec!["thread.item.added", "error"]);
    let ThreadStreamEvent::Error(err) = &events[1] else {
        panic!("expected terminal error event");
    };
    assert!(err.allow_retry);
}
