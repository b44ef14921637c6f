use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;
use serde_json::{json, Value};

use crate::state::AppState;

/// Health check handler.
/// Returns JSON with status and config summary.
pub fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let config = &state.config;
    Json(json!({
        "status": "chatkit-handoff is running",
        "config": {
            "runtime_mode": config.runtime.mode.to_string(),
            "threads_count": state.store.thread_count(),
            "features": {
                "log_level": config.features.log_level,
                "triage_executor_id": config.features.triage_executor_id,
                "title_max_chars": config.features.title_max_chars,
            },
            "descriptions": {
                "tools_count": state.descriptions().tools.len(),
            }
        }
    }))
}
