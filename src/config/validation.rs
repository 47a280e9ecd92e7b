use crate::config::types::{
    BackoffStrategy, Config, OutputConfig, PlannerConfig, PortalConfig, RetryConfig,
    SessionConfig,
};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_portal_config(&config.portal)?;
    validate_session_config(&config.session)?;
    validate_retry_config(&config.retry)?;
    validate_planner_config(&config.planner)?;
    validate_output_config(&config.output)?;
    Ok(())
}

/// Validates portal configuration
fn validate_portal_config(config: &PortalConfig) -> Result<(), ConfigError> {
    let url = Url::parse(&config.base_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid base_url: {}", e)))?;

    if url.scheme() != "https" && url.scheme() != "http" {
        return Err(ConfigError::InvalidUrl(format!(
            "base_url must use http or https, got '{}'",
            url.scheme()
        )));
    }

    validate_identifier("state_code", &config.state_code)?;

    if config.court_name.trim().is_empty() {
        return Err(ConfigError::Validation(
            "court_name cannot be empty".to_string(),
        ));
    }

    if config.page_size < 1 || config.page_size > 1000 {
        return Err(ConfigError::Validation(format!(
            "page_size must be between 1 and 1000, got {}",
            config.page_size
        )));
    }

    if config.batch_size < 1 {
        return Err(ConfigError::Validation(format!(
            "batch_size must be >= 1, got {}",
            config.batch_size
        )));
    }

    if config.request_timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "request_timeout_secs must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates session configuration; a missing solver is a missing credential
fn validate_session_config(config: &SessionConfig) -> Result<(), ConfigError> {
    if config.captcha_command.trim().is_empty() {
        return Err(ConfigError::Validation(
            "captcha_command must name the CAPTCHA solver program".to_string(),
        ));
    }

    if config.max_verification_attempts < 1 {
        return Err(ConfigError::Validation(format!(
            "max_verification_attempts must be >= 1, got {}",
            config.max_verification_attempts
        )));
    }

    Ok(())
}

/// Validates retry configuration
fn validate_retry_config(config: &RetryConfig) -> Result<(), ConfigError> {
    if config.max_attempts < 1 || config.max_attempts > 20 {
        return Err(ConfigError::Validation(format!(
            "max_attempts must be between 1 and 20, got {}",
            config.max_attempts
        )));
    }

    if config.strategy == BackoffStrategy::Jittered && config.jitter_min_ms > config.jitter_max_ms
    {
        return Err(ConfigError::Validation(format!(
            "jitter_min_ms ({}) cannot exceed jitter_max_ms ({})",
            config.jitter_min_ms, config.jitter_max_ms
        )));
    }

    Ok(())
}

/// Validates window planner configuration
fn validate_planner_config(config: &PlannerConfig) -> Result<(), ConfigError> {
    if config.non_sitting_days >= 365 {
        return Err(ConfigError::Validation(format!(
            "non_sitting_days must be below 365, got {}",
            config.non_sitting_days
        )));
    }

    if config.window_budget < 1 {
        return Err(ConfigError::Validation(
            "window_budget must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    if config.artifact_dir.is_empty() {
        return Err(ConfigError::Validation(
            "artifact_dir cannot be empty".to_string(),
        ));
    }

    if config.download_dir.is_empty() {
        return Err(ConfigError::Validation(
            "download_dir cannot be empty".to_string(),
        ));
    }

    if let Some(base) = &config.artifact_base_url {
        Url::parse(base)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid artifact_base_url: {}", e)))?;
    }

    Ok(())
}

/// Validates an identifier used in checkpoint keys
fn validate_identifier(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.is_empty() {
        return Err(ConfigError::Validation(format!("{} cannot be empty", field)));
    }

    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ConfigError::Validation(format!(
            "{} must contain only alphanumeric characters, '-' and '_', got '{}'",
            field, value
        )));
    }

    Ok(())
}
