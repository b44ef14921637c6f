use crate::protocol::chatkit::{ErrorCode, ErrorEvent};

/// Error type shared by every module of the service.
#[derive(Debug, thiserror::Error)]
pub enum HandoffError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Upstream error: status={status}, message={message}")]
    Upstream { status: u16, message: String },
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Event translation error: {0}")]
    Translation(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Broad error category for status code selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    InvalidRequest,
    NotFound,
    RateLimit,
    ServerError,
    Unknown,
}

/// Map an upstream HTTP status code to an error category.
#[must_use]
pub fn category_from_upstream_status(status: u16) -> ErrorCategory {
    match status {
        400 | 422 => ErrorCategory::InvalidRequest,
        404 => ErrorCategory::NotFound,
        429 => ErrorCategory::RateLimit,
        500..=599 => ErrorCategory::ServerError,
        _ => ErrorCategory::Unknown,
    }
}

impl HandoffError {
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            HandoffError::InvalidRequest(_) => ErrorCategory::InvalidRequest,
            HandoffError::NotFound(_) => ErrorCategory::NotFound,
            HandoffError::Config(_)
            | HandoffError::Transport(_)
            | HandoffError::Translation(_)
            | HandoffError::Internal(_) => ErrorCategory::ServerError,
            HandoffError::Upstream { status, .. } => category_from_upstream_status(*status),
        }
    }

    /// Whether re-sending the same request could succeed.
    #[must_use]
    pub fn allow_retry(&self) -> bool {
        !matches!(
            self.category(),
            ErrorCategory::InvalidRequest | ErrorCategory::NotFound
        )
    }

    /// Render this error as the terminal ChatKit `error` stream event.
    #[must_use]
    pub fn to_chatkit_error(&self) -> ErrorEvent {
        ErrorEvent {
            code: ErrorCode::StreamError,
            message: Some(self.to_string()),
            allow_retry: self.allow_retry(),
        }
    }
}

fn http_status_for_category(cat: ErrorCategory) -> http::StatusCode {
    match cat {
        ErrorCategory::InvalidRequest => http::StatusCode::BAD_REQUEST,
        ErrorCategory::NotFound => http::StatusCode::NOT_FOUND,
        ErrorCategory::RateLimit => http::StatusCode::TOO_MANY_REQUESTS,
        ErrorCategory::ServerError | ErrorCategory::Unknown => {
            http::StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Format an error for a non-streaming response, returning (`status_code`, JSON body).
#[must_use]
pub fn format_error(err: &HandoffError) -> (http::StatusCode, serde_json::Value) {
    let status = http_status_for_category(err.category());
    let body = serde_json::json!({
        "error": {
            "message": err.to_string(),
            "status": status.as_u16(),
        }
    });
    (status, body)
}

impl axum::response::IntoResponse for HandoffError {
    fn into_response(self) -> axum::response::Response {
        let (status, body) = format_error(&self);
        (status, axum::Json(body)).into_response()
    }
}
