use super::{AppConfig, ConfigError, RuntimeMode};

/// Validate the full application config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    validate_server_config(config)?;
    validate_runtime_config(config)?;
    validate_log_level(config)?;
    validate_features(config)?;
    validate_descriptions(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_server_config(config: &AppConfig) -> Result<(), ConfigError> {
    let server = &config.server;
    if server.max_request_body_bytes == 0 {
        return Err(validation_err(
            "server.max_request_body_bytes must be greater than 0",
        ));
    }
    if !server.base_path.is_empty() && !server.base_path.starts_with('/') {
        return Err(validation_err("server.base_path must start with '/'"));
    }
    let positive_when_set = [
        ("runtime_worker_threads", server.runtime_worker_threads),
        ("runtime_max_blocking_threads", server.runtime_max_blocking_threads),
        ("runtime_thread_stack_size_kb", server.runtime_thread_stack_size_kb),
        ("tcp_reuse_port_listener_count", server.tcp_reuse_port_listener_count),
    ];
    for (field, value) in positive_when_set {
        if value == Some(0) {
            return Err(validation_err(format!(
                "server.{field} must be greater than 0 when set"
            )));
        }
    }
    Ok(())
}

fn validate_runtime_config(config: &AppConfig) -> Result<(), ConfigError> {
    let runtime = &config.runtime;
    if runtime.timeout_secs == 0 {
        return Err(validation_err("runtime.timeout_secs must be greater than 0"));
    }
    if runtime.pool_max_idle_per_host == 0 {
        return Err(validation_err(
            "runtime.pool_max_idle_per_host must be greater than 0",
        ));
    }
    match (runtime.mode, runtime.base_url.as_deref()) {
        (RuntimeMode::Http, None) => {
            return Err(validation_err(
                "runtime.base_url is required when runtime.mode is http",
            ));
        }
        (_, Some(base_url)) => validate_http_url("runtime.base_url", base_url)?,
        (RuntimeMode::Scripted, None) => {}
    }
    if let Some(proxy) = runtime.proxy.as_deref() {
        validate_http_url("runtime.proxy", proxy)?;
    }
    Ok(())
}

fn validate_http_url(field_name: &str, value: &str) -> Result<(), ConfigError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(validation_err(format!(
            "{field_name} cannot be empty when set"
        )));
    }
    let parsed = url::Url::parse(value)
        .map_err(|err| validation_err(format!("{field_name} is not a valid URL: {err}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(validation_err(format!(
            "{field_name} must use http:// or https://"
        )));
    }
    Ok(())
}

fn validate_log_level(config: &AppConfig) -> Result<(), ConfigError> {
    let valid_levels = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL", "DISABLED"];
    if !valid_levels.contains(&config.features.log_level.to_uppercase().as_str()) {
        return Err(validation_err(format!(
            "log_level must be one of {valid_levels:?}"
        )));
    }
    Ok(())
}

fn validate_features(config: &AppConfig) -> Result<(), ConfigError> {
    if config.features.triage_executor_id.trim().is_empty() {
        return Err(validation_err("features.triage_executor_id cannot be empty"));
    }
    if config.features.title_max_chars == 0 {
        return Err(validation_err(
            "features.title_max_chars must be greater than 0",
        ));
    }
    Ok(())
}

fn validate_descriptions(config: &AppConfig) -> Result<(), ConfigError> {
    for (tool, description) in &config.descriptions.tools {
        if tool.trim().is_empty() {
            return Err(validation_err("descriptions.tools contains an empty tool name"));
        }
        if description.start.trim().is_empty() || description.end.trim().is_empty() {
            return Err(validation_err(format!(
                "descriptions.tools.{tool}: start and end cannot be empty"
            )));
        }
    }
    for (kind, text) in &config.descriptions.events {
        if text.trim().is_empty() {
            return Err(validation_err(format!(
                "descriptions.events.{kind} cannot be empty"
            )));
        }
    }
    Ok(())
}
