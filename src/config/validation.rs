use crate::config::types::{
    Config, ExtractorConfig, HarvestConfig, OutputBackend, OutputConfig, SessionConfig,
};
use crate::ConfigError;
use scraper::Selector;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_harvest_config(&config.harvest)?;
    validate_session_config(&config.session)?;
    validate_extractor_config(&config.extractor)?;
    validate_output_config(&config.output)?;
    Ok(())
}

/// Validates harvest configuration
fn validate_harvest_config(config: &HarvestConfig) -> Result<(), ConfigError> {
    let url = Url::parse(&config.catalog_url).map_err(|e| {
        ConfigError::InvalidUrl(format!("Invalid catalog-url '{}': {}", config.catalog_url, e))
    })?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::Validation(format!(
            "catalog-url '{}' must use the http or https scheme",
            config.catalog_url
        )));
    }

    if config.concurrency < 1 || config.concurrency > 100 {
        return Err(ConfigError::Validation(format!(
            "concurrency must be between 1 and 100, got {}",
            config.concurrency
        )));
    }

    if config.progress_window_secs < 1 {
        return Err(ConfigError::Validation(
            "progress-window-secs must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates session configuration
fn validate_session_config(config: &SessionConfig) -> Result<(), ConfigError> {
    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user-agent cannot be empty".to_string(),
        ));
    }

    if config.navigation_timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "navigation-timeout-secs must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates that every selector parses
fn validate_extractor_config(config: &ExtractorConfig) -> Result<(), ConfigError> {
    validate_selector(&config.pager_last_link)?;
    validate_selector(&config.listing_links)?;
    validate_selector(&config.detail_root)?;
    validate_selector(&config.detail_title)?;

    for (field, selector) in &config.detail_fields {
        if field.trim().is_empty() {
            return Err(ConfigError::Validation(
                "detail-fields keys cannot be empty".to_string(),
            ));
        }
        validate_selector(selector)?;
    }

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    match config.backend {
        OutputBackend::Json if config.directory.as_os_str().is_empty() => {
            return Err(ConfigError::Validation(
                "directory cannot be empty".to_string(),
            ));
        }
        OutputBackend::Sqlite if config.database_path.as_os_str().is_empty() => {
            return Err(ConfigError::Validation(
                "database-path cannot be empty".to_string(),
            ));
        }
        _ => {}
    }

    config.update_policy()?;

    Ok(())
}

/// Parses a CSS selector, mapping failures to a configuration error
pub(crate) fn validate_selector(selector: &str) -> Result<Selector, ConfigError> {
    if selector.trim().is_empty() {
        return Err(ConfigError::InvalidSelector {
            selector: selector.to_string(),
            message: "empty selector".to_string(),
        });
    }

    Selector::parse(selector).map_err(|e| ConfigError::InvalidSelector {
        selector: selector.to_string(),
        message: format!("{:?}", e),
    })
}
