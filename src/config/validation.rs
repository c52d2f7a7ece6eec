use crate::config::types::{
    ApiConfig, Config, CredentialConfig, CrawlerConfig, OutputConfig, SchedulerConfig,
};
use crate::ConfigError;
use url::Url;

/// Upper bound on pages in flight; the remote service rate-limits aggressively
const MAX_WORKERS: u32 = 16;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_api_config(&config.api)?;
    validate_scheduler_config(&config.scheduler)?;
    validate_credential_config(&config.credential)?;
    validate_output_config(&config.output)?;
    Ok(())
}

/// Validates crawler configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.workers < 1 || config.workers > MAX_WORKERS {
        return Err(ConfigError::Validation(format!(
            "workers must be between 1 and {}, got {}",
            MAX_WORKERS, config.workers
        )));
    }

    if config.max_attempts < 1 {
        return Err(ConfigError::Validation(format!(
            "max_attempts must be >= 1, got {}",
            config.max_attempts
        )));
    }

    if config.max_failed_pages < 1 {
        return Err(ConfigError::Validation(format!(
            "max_failed_pages must be >= 1, got {}",
            config.max_failed_pages
        )));
    }

    Ok(())
}

/// Validates endpoint URLs and request settings
fn validate_api_config(config: &ApiConfig) -> Result<(), ConfigError> {
    validate_http_url("favorites_url", &config.favorites_url)?;
    validate_http_url("profile_url", &config.profile_url)?;
    validate_http_url("post_url_base", &config.post_url_base)?;

    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user_agent cannot be empty".to_string(),
        ));
    }

    if config.timeout_secs < 1 {
        return Err(ConfigError::Validation(format!(
            "timeout_secs must be >= 1, got {}",
            config.timeout_secs
        )));
    }

    Ok(())
}

fn validate_scheduler_config(config: &SchedulerConfig) -> Result<(), ConfigError> {
    if config.interval_seconds < 1 {
        return Err(ConfigError::Validation(format!(
            "interval_seconds must be >= 1, got {}",
            config.interval_seconds
        )));
    }
    Ok(())
}

fn validate_credential_config(config: &CredentialConfig) -> Result<(), ConfigError> {
    if config.cookie_path.trim().is_empty() {
        return Err(ConfigError::Validation(
            "cookie_path cannot be empty".to_string(),
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

    if config.logs_dir.is_empty() {
        return Err(ConfigError::Validation(
            "logs_dir cannot be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_http_url(field: &str, value: &str) -> Result<(), ConfigError> {
    let url = Url::parse(value)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid {} '{}': {}", field, value, e)))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::Validation(format!(
            "{} '{}' must use http or https",
            field, value
        )));
    }

    Ok(())
}
