//! ChatKit thread-stream protocol: thread items, item updates, stream events
//! and the requests a ChatKit client posts to the endpoint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::widgets::WidgetComponent;
use super::workflow::ToolArguments;

pub type Timestamp = DateTime<Utc>;

// ---------------------------------------------------------------------------
// Threads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ThreadStatus {
    #[default]
    Active,
    Locked,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadMetadata {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    pub created_at: Timestamp,
    #[serde(default)]
    pub status: ThreadStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub after: Option<String>,
}

/// A thread together with (a page of) its items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    #[serde(flatten)]
    pub metadata: ThreadMetadata,
    pub items: Page<ThreadItem>,
}

impl Thread {
    #[must_use]
    pub fn without_items(metadata: ThreadMetadata) -> Self {
        Self {
            metadata,
            items: Page {
                data: Vec::new(),
                has_more: false,
                after: None,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Thread items
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ThreadItem {
    UserMessage(UserMessageItem),
    AssistantMessage(AssistantMessageItem),
    Task(TaskItem),
    Widget(WidgetItem),
    EndOfTurn(EndOfTurnItem),
}

impl ThreadItem {
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            ThreadItem::UserMessage(item) => &item.id,
            ThreadItem::AssistantMessage(item) => &item.id,
            ThreadItem::Task(item) => &item.id,
            ThreadItem::Widget(item) => &item.id,
            ThreadItem::EndOfTurn(item) => &item.id,
        }
    }

    #[must_use]
    pub fn thread_id(&self) -> &str {
        match self {
            ThreadItem::UserMessage(item) => &item.thread_id,
            ThreadItem::AssistantMessage(item) => &item.thread_id,
            ThreadItem::Task(item) => &item.thread_id,
            ThreadItem::Widget(item) => &item.thread_id,
            ThreadItem::EndOfTurn(item) => &item.thread_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMessageItem {
    pub id: String,
    pub thread_id: String,
    pub created_at: Timestamp,
    pub content: Vec<UserMessageContent>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub quoted_text: Option<String>,
    #[serde(default)]
    pub inference_options: Value,
}

impl UserMessageItem {
    /// Plain text of the message: every text and tag part, in order.
    #[must_use]
    pub fn text(&self) -> String {
        let mut out = String::new();
        for part in &self.content {
            match part {
                UserMessageContent::InputText { text } | UserMessageContent::InputTag { text, .. } => {
                    out.push_str(text);
                }
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UserMessageContent {
    InputText {
        text: String,
    },
    InputTag {
        id: String,
        text: String,
        #[serde(default)]
        data: Value,
        #[serde(default)]
        group: Option<String>,
        #[serde(default)]
        interactive: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessageItem {
    pub id: String,
    pub thread_id: String,
    pub created_at: Timestamp,
    pub content: Vec<AssistantMessageContent>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssistantContentKind {
    #[default]
    #[serde(rename = "output_text")]
    OutputText,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessageContent {
    #[serde(rename = "type", default)]
    pub kind: AssistantContentKind,
    pub text: String,
    #[serde(default)]
    pub annotations: Vec<Value>,
}

impl AssistantMessageContent {
    #[must_use]
    pub fn output_text(text: impl Into<String>) -> Self {
        Self {
            kind: AssistantContentKind::OutputText,
            text: text.into(),
            annotations: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskItem {
    pub id: String,
    pub thread_id: String,
    pub created_at: Timestamp,
    pub task: Task,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Task {
    Custom(CustomTask),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusIndicator {
    #[default]
    None,
    Loading,
    Complete,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomTask {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub status_indicator: StatusIndicator,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WidgetItem {
    pub id: String,
    pub thread_id: String,
    pub created_at: Timestamp,
    pub widget: WidgetComponent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copy_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndOfTurnItem {
    pub id: String,
    pub thread_id: String,
    pub created_at: Timestamp,
}

// ---------------------------------------------------------------------------
// Item updates
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ThreadItemUpdate {
    #[serde(rename = "assistant_message.content_part.text_delta")]
    TextDelta { content_index: u32, delta: String },
}

// ---------------------------------------------------------------------------
// Stream events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ThreadStreamEvent {
    #[serde(rename = "thread.created")]
    ThreadCreated { thread: Thread },
    #[serde(rename = "thread.updated")]
    ThreadUpdated { thread: Thread },
    #[serde(rename = "thread.item.added")]
    ItemAdded { item: ThreadItem },
    #[serde(rename = "thread.item.updated")]
    ItemUpdated {
        item_id: String,
        update: ThreadItemUpdate,
    },
    #[serde(rename = "thread.item.done")]
    ItemDone { item: ThreadItem },
    #[serde(rename = "progress_update")]
    ProgressUpdate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        icon: Option<String>,
        text: String,
    },
    #[serde(rename = "error")]
    Error(ErrorEvent),
}

impl ThreadStreamEvent {
    /// Wire `type` tag of this event, handy for logs.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            ThreadStreamEvent::ThreadCreated { .. } => "thread.created",
            ThreadStreamEvent::ThreadUpdated { .. } => "thread.updated",
            ThreadStreamEvent::ItemAdded { .. } => "thread.item.added",
            ThreadStreamEvent::ItemUpdated { .. } => "thread.item.updated",
            ThreadStreamEvent::ItemDone { .. } => "thread.item.done",
            ThreadStreamEvent::ProgressUpdate { .. } => "progress_update",
            ThreadStreamEvent::Error(_) => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    #[serde(rename = "stream.error")]
    StreamError,
    #[serde(rename = "custom")]
    Custom,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub code: ErrorCode,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub allow_retry: bool,
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ChatKitRequest {
    #[serde(rename = "threads.create")]
    ThreadsCreate { params: ThreadCreateParams },
    #[serde(rename = "threads.add_user_message")]
    AddUserMessage { params: AddUserMessageParams },
    #[serde(rename = "threads.custom_action")]
    CustomAction { params: CustomActionParams },
    #[serde(rename = "threads.get_by_id")]
    GetById { params: ThreadGetByIdParams },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UserMessageInput {
    pub content: Vec<UserMessageContent>,
    #[serde(default)]
    pub attachments: Vec<String>,
    #[serde(default)]
    pub quoted_text: Option<String>,
    #[serde(default)]
    pub inference_options: Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ThreadCreateParams {
    pub input: UserMessageInput,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AddUserMessageParams {
    pub thread_id: String,
    pub input: UserMessageInput,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CustomActionParams {
    pub thread_id: String,
    #[serde(default)]
    pub item_id: Option<String>,
    pub action: Action,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ThreadGetByIdParams {
    pub thread_id: String,
}

/// A widget action posted back by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub action_type: String,
    #[serde(default)]
    pub payload: Value,
}

pub const APPROVAL_ACTION_TYPE: &str = "approval";

/// Payload carried by both buttons of an approval widget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub tool_name: String,
    #[serde(default)]
    pub tool_args: Option<ToolArguments>,
    #[serde(default)]
    pub approved: bool,
    pub call_id: String,
    pub request_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fixed_time() -> Timestamp {
        DateTime::from_timestamp(1_700_000_000, 0).expect("valid timestamp")
    }

    #[test]
    fn test_text_delta_wire_shape() {
        let event = ThreadStreamEvent::ItemUpdated {
            item_id: "itm_1".into(),
            update: ThreadItemUpdate::TextDelta {
                content_index: 2,
                delta: "lo".into(),
            },
        };
        assert_eq!(
            serde_json::to_value(&event).expect("serialize"),
            json!({
                "type": "thread.item.updated",
                "item_id": "itm_1",
                "update": {
                    "type": "assistant_message.content_part.text_delta",
                    "content_index": 2,
                    "delta": "lo"
                }
            })
        );
    }

    #[test]
    fn test_assistant_message_item_wire_shape() {
        let event = ThreadStreamEvent::ItemAdded {
            item: ThreadItem::AssistantMessage(AssistantMessageItem {
                id: "msg_1".into(),
                thread_id: "thr_1".into(),
                created_at: fixed_time(),
                content: vec![AssistantMessageContent::output_text("Hi")],
            }),
        };
        let value = serde_json::to_value(&event).expect("serialize");
        assert_eq!(value["type"], "thread.item.added");
        assert_eq!(value["item"]["type"], "assistant_message");
        assert_eq!(value["item"]["content"][0]["type"], "output_text");
        assert_eq!(value["item"]["content"][0]["text"], "Hi");
        assert_eq!(value["item"]["created_at"], "2023-11-14T22:13:20Z");
    }

    #[test]
    fn test_task_item_wire_shape() {
        let item = ThreadItem::Task(TaskItem {
            id: "call_1".into(),
            thread_id: "thr_1".into(),
            created_at: fixed_time(),
            task: Task::Custom(CustomTask {
                title: Some("Processing your payment...".into()),
                icon: Some("search".into()),
                ..CustomTask::default()
            }),
        });
        let value = serde_json::to_value(&item).expect("serialize");
        assert_eq!(value["type"], "task");
        assert_eq!(value["task"]["type"], "custom");
        assert_eq!(value["task"]["status_indicator"], "none");
        let back: ThreadItem = serde_json::from_value(value).expect("deserialize");
        assert_eq!(back, item);
    }

    #[test]
    fn test_error_event_wire_shape() {
        let event = ThreadStreamEvent::Error(ErrorEvent {
            code: ErrorCode::StreamError,
            message: None,
            allow_retry: true,
        });
        assert_eq!(
            serde_json::to_value(&event).expect("serialize"),
            json!({ "type": "error", "code": "stream.error", "message": null, "allow_retry": true })
        );
    }

    #[test]
    fn test_thread_flattens_metadata() {
        let thread = Thread::without_items(ThreadMetadata {
            id: "thr_1".into(),
            title: None,
            created_at: fixed_time(),
            status: ThreadStatus::Active,
        });
        let value = serde_json::to_value(&thread).expect("serialize");
        assert_eq!(value["id"], "thr_1");
        assert_eq!(value["status"], json!({ "type": "active" }));
        assert_eq!(value["items"]["data"], json!([]));
    }

    #[test]
    fn test_parse_add_user_message_request() {
        let request: ChatKitRequest = serde_json::from_value(json!({
            "type": "threads.add_user_message",
            "metadata": {},
            "params": {
                "thread_id": "thr_1",
                "input": {
                    "content": [{ "type": "input_text", "text": "Pay my bill" }],
                    "attachments": ["atc_1"],
                    "inference_options": {}
                }
            }
        }))
        .expect("parse");
        let ChatKitRequest::AddUserMessage { params } = request else {
            panic!("unexpected request variant");
        };
        assert_eq!(params.thread_id, "thr_1");
        assert_eq!(params.input.attachments, vec!["atc_1".to_string()]);
    }

    #[test]
    fn test_parse_custom_action_request() {
        let request: ChatKitRequest = serde_json::from_value(json!({
            "type": "threads.custom_action",
            "params": {
                "thread_id": "thr_1",
                "item_id": "wdg_1",
                "action": {
                    "type": "approval",
                    "payload": {
                        "tool_name": "processPayment",
                        "tool_args": { "amount": 10 },
                        "approved": true,
                        "call_id": "c2",
                        "request_id": "r1"
                    }
                }
            }
        }))
        .expect("parse");
        let ChatKitRequest::CustomAction { params } = request else {
            panic!("unexpected request variant");
        };
        let decision: ApprovalDecision =
            serde_json::from_value(params.action.payload).expect("decision");
        assert!(decision.approved);
        assert_eq!(decision.call_id, "c2");
    }

    #[test]
    fn test_user_message_text_joins_parts() {
        let item = UserMessageItem {
            id: "usr_1".into(),
            thread_id: "thr_1".into(),
            created_at: fixed_time(),
            content: vec![
                UserMessageContent::InputText { text: "Show ".into() },
                UserMessageContent::InputTag {
                    id: "t1".into(),
                    text: "@cards".into(),
                    data: Value::Null,
                    group: None,
                    interactive: false,
                },
            ],
            attachments: Vec::new(),
            quoted_text: None,
            inference_options: Value::Null,
        };
        assert_eq!(item.text(), "Show @cards");
    }
}
