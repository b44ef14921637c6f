//! Workflow events produced by the agent runtime for one turn.
//!
//! The wire form is a JSON object tagged by `"type"`. Event types this crate
//! does not know about are kept as [`WorkflowEvent::Unknown`] so the
//! translator can still surface them as progress notifications.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::HandoffError;

pub type ToolArguments = Map<String, Value>;

/// One upstream event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    WorkflowStarted,
    WorkflowStatus {
        state: String,
    },
    WorkflowFailed {
        message: String,
    },
    WorkflowOutput {
        #[serde(default)]
        data: Value,
    },
    ExecutorInvoked {
        executor_id: String,
    },
    ExecutorCompleted {
        executor_id: String,
    },
    #[serde(rename = "superstep_started")]
    SuperStepStarted {
        #[serde(default)]
        iteration: u64,
    },
    #[serde(rename = "superstep_completed")]
    SuperStepCompleted {
        #[serde(default)]
        iteration: u64,
    },
    RequestInfo {
        request_id: String,
    },
    AgentRunUpdate {
        executor_id: String,
        #[serde(default)]
        data: AgentRunResponseUpdate,
    },
    /// Any event type not listed above; only produced by [`decode_workflow_event`].
    #[serde(skip)]
    Unknown { type_name: String },
}

const KNOWN_EVENT_TYPES: &[&str] = &[
    "workflow_started",
    "workflow_status",
    "workflow_failed",
    "workflow_output",
    "executor_invoked",
    "executor_completed",
    "superstep_started",
    "superstep_completed",
    "request_info",
    "agent_run_update",
];

impl WorkflowEvent {
    /// Stable kind name, used as the key of the event description table.
    #[must_use]
    pub fn kind_name(&self) -> &str {
        match self {
            WorkflowEvent::WorkflowStarted => "WorkflowStartedEvent",
            WorkflowEvent::WorkflowStatus { .. } => "WorkflowStatusEvent",
            WorkflowEvent::WorkflowFailed { .. } => "WorkflowFailedEvent",
            WorkflowEvent::WorkflowOutput { .. } => "WorkflowOutputEvent",
            WorkflowEvent::ExecutorInvoked { .. } => "ExecutorInvokedEvent",
            WorkflowEvent::ExecutorCompleted { .. } => "ExecutorCompletedEvent",
            WorkflowEvent::SuperStepStarted { .. } => "SuperStepStartedEvent",
            WorkflowEvent::SuperStepCompleted { .. } => "SuperStepCompletedEvent",
            WorkflowEvent::RequestInfo { .. } => "RequestInfoEvent",
            WorkflowEvent::AgentRunUpdate { .. } => "AgentRunUpdateEvent",
            WorkflowEvent::Unknown { type_name } => type_name,
        }
    }

    /// Shorthand for a run update carrying a single content item.
    #[must_use]
    pub fn run_update(executor_id: impl Into<String>, content: Content) -> Self {
        WorkflowEvent::AgentRunUpdate {
            executor_id: executor_id.into(),
            data: AgentRunResponseUpdate {
                contents: vec![content],
            },
        }
    }
}

/// Payload of an `agent_run_update` event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentRunResponseUpdate {
    #[serde(default)]
    pub contents: Vec<Content>,
}

/// A single content item of a run update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Content {
    Text {
        text: String,
    },
    FunctionCall(FunctionCall),
    FunctionResult {
        #[serde(default)]
        call_id: Option<String>,
        #[serde(default)]
        result: Value,
    },
    FunctionApprovalRequest {
        id: String,
        function_call: FunctionCall,
    },
    #[serde(other)]
    Other,
}

impl Content {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Content::Text { text: text.into() }
    }

    #[must_use]
    pub fn function_result(call_id: impl Into<String>) -> Self {
        Content::FunctionResult {
            call_id: Some(call_id.into()),
            result: Value::Null,
        }
    }

    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Content::Text { .. } => "text",
            Content::FunctionCall(_) => "function_call",
            Content::FunctionResult { .. } => "function_result",
            Content::FunctionApprovalRequest { .. } => "function_approval_request",
            Content::Other => "other",
        }
    }
}

/// A tool invocation requested by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub call_id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Either a JSON object or a JSON-encoded string of one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

impl FunctionCall {
    #[must_use]
    pub fn new(call_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            name: Some(name.into()),
            arguments: None,
        }
    }

    #[must_use]
    pub fn with_arguments(mut self, arguments: Value) -> Self {
        self.arguments = Some(arguments);
        self
    }

    /// Parse the call arguments into a string-keyed map.
    ///
    /// Missing, null or blank arguments yield `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns [`HandoffError::Translation`] when the arguments are neither a
    /// JSON object nor a string holding one.
    pub fn parse_arguments(&self) -> Result<Option<ToolArguments>, HandoffError> {
        match &self.arguments {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Object(map)) => Ok(Some(map.clone())),
            Some(Value::String(raw)) if raw.trim().is_empty() => Ok(None),
            Some(Value::String(raw)) => match serde_json::from_str::<Value>(raw) {
                Ok(Value::Object(map)) => Ok(Some(map)),
                Ok(other) => Err(HandoffError::Translation(format!(
                    "arguments of call '{}' are not an object: {other}",
                    self.call_id
                ))),
                Err(err) => Err(HandoffError::Translation(format!(
                    "arguments of call '{}' are not valid JSON: {err}",
                    self.call_id
                ))),
            },
            Some(other) => Err(HandoffError::Translation(format!(
                "arguments of call '{}' are not an object: {other}",
                self.call_id
            ))),
        }
    }
}

/// Decode one upstream event from its JSON text.
///
/// # Errors
///
/// Returns [`HandoffError::Translation`] when the payload is not JSON, has no
/// string `type` tag, or is a known event type with a malformed body.
pub fn decode_workflow_event(data: &[u8]) -> Result<WorkflowEvent, HandoffError> {
    let value: Value = serde_json::from_slice(data)
        .map_err(|err| HandoffError::Translation(format!("workflow event is not JSON: {err}")))?;
    let type_name = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| HandoffError::Translation("workflow event has no 'type' tag".into()))?;

    if !KNOWN_EVENT_TYPES.contains(&type_name) {
        return Ok(WorkflowEvent::Unknown {
            type_name: type_name.to_string(),
        });
    }

    serde_json::from_value(value).map_err(|err| {
        HandoffError::Translation(format!("malformed workflow event: {err}"))
    })
}
