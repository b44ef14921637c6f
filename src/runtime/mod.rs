//! Where agent turns run.
//!
//! The endpoint only needs a stream of workflow events per turn; the
//! [`AgentRuntime`] trait hides whether they come from a remote agent
//! service or from a fixed script.

pub mod http;
pub mod scripted;

use futures_util::stream::BoxStream;

use crate::error::HandoffError;
use crate::protocol::chatkit::ApprovalDecision;
use crate::protocol::workflow::WorkflowEvent;

pub use self::http::HttpAgentRuntime;
pub use self::scripted::{RuntimeCall, ScriptStep, ScriptedAgentRuntime};

/// Events of one turn, in arrival order. Nothing is sent upstream until the
/// stream is first polled.
pub type WorkflowEventStream = BoxStream<'static, Result<WorkflowEvent, HandoffError>>;

pub trait AgentRuntime: Send + Sync {
    /// Start a turn for a new user message.
    fn run_turn(&self, thread_id: &str, message: &str) -> WorkflowEventStream;

    /// Continue a turn that paused on an approval request.
    fn resume_after_approval(
        &self,
        thread_id: &str,
        decision: &ApprovalDecision,
    ) -> WorkflowEventStream;
}
