use crate::config::types::{
    Config, ConnectivityConfig, RuntimeConfig, SiteConfig, StorageConfig, TransportConfig,
};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_runtime_config(&config.runtime)?;
    validate_connectivity_config(&config.connectivity)?;
    validate_transport_config(&config.transport)?;
    validate_storage_config(&config.storage)?;
    for (name, site) in &config.sites {
        validate_site_config(name, site)?;
    }
    Ok(())
}

/// Validates search runtime configuration
fn validate_runtime_config(config: &RuntimeConfig) -> Result<(), ConfigError> {
    if config.workers < 1 || config.workers > 100 {
        return Err(ConfigError::Validation(format!(
            "workers must be between 1 and 100, got {}",
            config.workers
        )));
    }

    if config.job_queue_size < 1 {
        return Err(ConfigError::Validation(
            "job-queue-size must be >= 1".to_string(),
        ));
    }

    if config.result_queue_size < 1 {
        return Err(ConfigError::Validation(
            "result-queue-size must be >= 1".to_string(),
        ));
    }

    if config.sessions_per_site < 1 || config.sessions_per_site > 32 {
        return Err(ConfigError::Validation(format!(
            "sessions-per-site must be between 1 and 32, got {}",
            config.sessions_per_site
        )));
    }

    if config.max_parallel_searches < 1 {
        return Err(ConfigError::Validation(
            "max-parallel-searches must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates connectivity cache sizing
fn validate_connectivity_config(config: &ConnectivityConfig) -> Result<(), ConfigError> {
    if config.capacity < 1 {
        return Err(ConfigError::Validation(
            "connectivity capacity must be >= 1".to_string(),
        ));
    }

    if config.ttl_minutes < 1 {
        return Err(ConfigError::Validation(
            "connectivity ttl-minutes must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates transport configuration
fn validate_transport_config(config: &TransportConfig) -> Result<(), ConfigError> {
    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user-agent cannot be empty".to_string(),
        ));
    }

    if config.timeout_secs < 1 || config.connect_timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "timeouts must be at least one second".to_string(),
        ));
    }

    if let Some(proxy) = &config.proxy {
        let url = Url::parse(proxy)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid proxy '{}': {}", proxy, e)))?;
        if !url.scheme().starts_with("socks") {
            return Err(ConfigError::Validation(format!(
                "proxy '{}' must use a socks scheme",
                proxy
            )));
        }
    }

    Ok(())
}

/// Validates storage configuration
fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database-path cannot be empty".to_string(),
        ));
    }

    if let Some(key) = &config.key {
        if key.is_empty() || key.iter().any(|field| field.trim().is_empty()) {
            return Err(ConfigError::Validation(
                "storage key must list at least one non-empty field".to_string(),
            ));
        }
    }

    Ok(())
}

/// Validates one `[sites.<name>]` block
fn validate_site_config(name: &str, config: &SiteConfig) -> Result<(), ConfigError> {
    if let Some(url) = &config.url {
        let parsed = Url::parse(url).map_err(|e| {
            ConfigError::InvalidUrl(format!("Invalid url for site '{}': {}", name, e))
        })?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(ConfigError::Validation(format!(
                "url for site '{}' must use http or https",
                name
            )));
        }
    }
    Ok(())
}
