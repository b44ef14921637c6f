use std::time::{Duration, Instant};

use tracing::info;
use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber with the configured log level.
///
/// Maps config log levels to tracing levels:
/// - "DISABLED" -> no subscriber installed
/// - "WARNING" -> WARN
/// - "CRITICAL" -> ERROR
/// - Others map directly (DEBUG, INFO, ERROR)
pub fn init_tracing(log_level: &str) {
    let Some(directive) = tracing_directive(log_level) else {
        return;
    };

    let filter = EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new("INFO"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

fn tracing_directive(log_level: &str) -> Option<String> {
    let level = log_level.to_uppercase();
    match level.as_str() {
        "DISABLED" => None,
        "WARNING" => Some("WARN".to_string()),
        "CRITICAL" => Some("ERROR".to_string()),
        _ => Some(level),
    }
}

/// Counters collected while one turn is translated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnStats {
    pub upstream_events: u64,
    pub downstream_events: u64,
    pub text_fragments: u64,
    pub tool_calls: u64,
    pub approval_requests: u64,
    pub dropped_updates: u64,
}

/// Log the summary of a finished turn, computing duration from start time.
pub fn log_turn_complete(thread_id: &str, turn_id: &uuid::Uuid, stats: &TurnStats, start: Instant) {
    log_turn_summary(thread_id, turn_id, stats, start.elapsed());
}

fn log_turn_summary(thread_id: &str, turn_id: &uuid::Uuid, stats: &TurnStats, duration: Duration) {
    info!(
        thread_id = thread_id,
        turn_id = %turn_id,
        upstream_events = stats.upstream_events,
        downstream_events = stats.downstream_events,
        text_fragments = stats.text_fragments,
        tool_calls = stats.tool_calls,
        approval_requests = stats.approval_requests,
        dropped_updates = stats.dropped_updates,
        duration_seconds = duration.as_secs_f64(),
        "turn completed"
    );
}
