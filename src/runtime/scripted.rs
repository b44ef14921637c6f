use futures_util::StreamExt;
use parking_lot::Mutex;
use serde_json::json;

use super::{AgentRuntime, WorkflowEventStream};
use crate::error::HandoffError;
use crate::protocol::chatkit::ApprovalDecision;
use crate::protocol::workflow::{Content, FunctionCall, WorkflowEvent};

/// One step of a canned turn.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Event(WorkflowEvent),
    /// Yield a transport error at this point; the turn stream ends there.
    Fail(String),
}

impl From<WorkflowEvent> for ScriptStep {
    fn from(event: WorkflowEvent) -> Self {
        ScriptStep::Event(event)
    }
}

/// A call the runtime received, recorded for inspection.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeCall {
    Turn {
        thread_id: String,
        message: String,
    },
    Approval {
        thread_id: String,
        decision: ApprovalDecision,
    },
}

/// Replays fixed event scripts instead of running agents.
#[derive(Default)]
pub struct ScriptedAgentRuntime {
    turn: Vec<ScriptStep>,
    approved: Vec<ScriptStep>,
    rejected: Vec<ScriptStep>,
    calls: Mutex<Vec<RuntimeCall>>,
}

impl ScriptedAgentRuntime {
    #[must_use]
    pub fn new(turn: Vec<ScriptStep>) -> Self {
        Self {
            turn,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_approval_scripts(mut self, approved: Vec<ScriptStep>, rejected: Vec<ScriptStep>) -> Self {
        self.approved = approved;
        self.rejected = rejected;
        self
    }

    /// Calls received so far, oldest first.
    #[must_use]
    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.calls.lock().clone()
    }

    fn replay(steps: &[ScriptStep]) -> WorkflowEventStream {
        let items: Vec<Result<WorkflowEvent, HandoffError>> = steps
            .iter()
            .map(|step| match step {
                ScriptStep::Event(event) => Ok(event.clone()),
                ScriptStep::Fail(message) => Err(HandoffError::Transport(message.clone())),
            })
            .collect();
        // stop right after the first failure, like a dropped connection
        futures_util::stream::iter(items)
            .scan(false, |failed, item| {
                if *failed {
                    return futures_util::future::ready(None);
                }
                *failed = item.is_err();
                futures_util::future::ready(Some(item))
            })
            .boxed()
    }

    /// Canned conversation with a payment agent: account lookup, a payment
    /// that needs approval, and the two possible outcomes.
    #[must_use]
    pub fn banking_demo() -> Self {
        let agent = "payment_agent";
        let turn = vec![
            WorkflowEvent::WorkflowStarted.into(),
            WorkflowEvent::ExecutorInvoked {
                executor_id: "triage_agent".into(),
            }
            .into(),
            WorkflowEvent::run_update("triage_agent", Content::text("Routing to payments")).into(),
            WorkflowEvent::ExecutorInvoked {
                executor_id: agent.into(),
            }
            .into(),
            WorkflowEvent::run_update(
                agent,
                Content::FunctionCall(
                    FunctionCall::new("call_accounts", "getAccountsByUserName")
                        .with_arguments(json!({ "userName": "bob.user@contoso.com" })),
                ),
            )
            .into(),
            WorkflowEvent::run_update(agent, Content::function_result("call_accounts")).into(),
            WorkflowEvent::run_update(agent, Content::text("I found your checking account. ")).into(),
            WorkflowEvent::run_update(agent, Content::text("Please confirm the payment below.")).into(),
            WorkflowEvent::run_update(
                agent,
                Content::FunctionApprovalRequest {
                    id: "approval_payment".into(),
                    function_call: FunctionCall::new("call_payment", "processPayment")
                        .with_arguments(json!({
                            "account": "1010",
                            "amount": 120.5,
                            "description": "Electricity bill"
                        })),
                },
            )
            .into(),
            WorkflowEvent::RequestInfo {
                request_id: "approval_payment".into(),
            }
            .into(),
        ];
        let approved = vec![
            WorkflowEvent::run_update(
                agent,
                Content::FunctionCall(FunctionCall::new("call_payment", "processPayment")),
            )
            .into(),
            WorkflowEvent::run_update(agent, Content::function_result("call_payment")).into(),
            WorkflowEvent::run_update(agent, Content::text("Your payment of 120.50 was sent.")).into(),
        ];
        let rejected = vec![
            WorkflowEvent::run_update(agent, Content::text("Okay, I cancelled that payment.")).into(),
        ];
        Self::new(turn).with_approval_scripts(approved, rejected)
    }
}

impl AgentRuntime for ScriptedAgentRuntime {
    fn run_turn(&self, thread_id: &str, message: &str) -> WorkflowEventStream {
        self.calls.lock().push(RuntimeCall::Turn {
            thread_id: thread_id.to_string(),
            message: message.to_string(),
        });
        Self::replay(&self.turn)
    }

    fn resume_after_approval(
        &self,
        thread_id: &str,
        decision: &ApprovalDecision,
    ) -> WorkflowEventStream {
        self.calls.lock().push(RuntimeCall::Approval {
            thread_id: thread_id.to_string(),
            decision: decision.clone(),
        });
        if decision.approved {
            Self::replay(&self.approved)
        } else {
            Self::replay(&self.rejected)
        }
    }
}
