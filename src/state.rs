pub mod ids;
mod thread_store;

use std::sync::Arc;

use crate::config::{AppConfig, RuntimeMode};
use crate::error::HandoffError;
use crate::protocol::descriptions::Descriptions;
use crate::runtime::{AgentRuntime, HttpAgentRuntime, ScriptedAgentRuntime};
use crate::stream::translator::{TranslatorContext, TurnTranslator};

pub use ids::IdGenerator;
pub use thread_store::ThreadStore;

/// Shared application state accessible to all handlers.
pub struct AppState {
    pub config: AppConfig,
    pub runtime: Arc<dyn AgentRuntime>,
    pub store: ThreadStore,
    translator_ctx: TranslatorContext,
}

impl AppState {
    #[must_use]
    pub fn new(config: AppConfig, runtime: Arc<dyn AgentRuntime>) -> Self {
        let translator_ctx = TranslatorContext::new(
            Arc::new(IdGenerator::new()),
            Arc::new(Descriptions::from_config(&config.descriptions)),
            config.features.triage_executor_id.as_str(),
        );
        Self {
            config,
            runtime,
            store: ThreadStore::new(),
            translator_ctx,
        }
    }

    /// Build state with the runtime selected by `runtime.mode`.
    ///
    /// # Errors
    ///
    /// Returns [`HandoffError::Config`] when the HTTP runtime cannot be built.
    pub fn from_config(config: AppConfig) -> Result<Self, HandoffError> {
        let runtime: Arc<dyn AgentRuntime> = match config.runtime.mode {
            RuntimeMode::Http => Arc::new(HttpAgentRuntime::new(&config.runtime)?),
            RuntimeMode::Scripted => Arc::new(ScriptedAgentRuntime::banking_demo()),
        };
        Ok(Self::new(config, runtime))
    }

    #[must_use]
    pub fn ids(&self) -> &IdGenerator {
        &self.translator_ctx.ids
    }

    #[must_use]
    pub fn descriptions(&self) -> &Descriptions {
        &self.translator_ctx.descriptions
    }

    /// Fresh translator for one turn on `thread_id`.
    #[must_use]
    pub fn translator(&self, thread_id: &str) -> TurnTranslator {
        TurnTranslator::new(thread_id, self.translator_ctx.clone())
    }
}
