//! Settings validation with aggregated errors.
//! - Aggregates all issues into Vec<String>
//! - url fields must parse and use http(s)
//! - retry / logging invariants

use tracing::{error, info};
use url::Url;

use crate::config::settings::{ClientSettings, RetryConfig};

/// Public entrypoint: returns Ok(()) or Err(Vec<String>) containing all issues.
pub fn validate_settings(settings: &ClientSettings) -> Result<(), Vec<String>> {
    let mut errors: Vec<String> = Vec::new();

    validate_url("api.base_url", Some(&settings.api.base_url), &mut errors);
    validate_url("api.token_url", settings.api.token_url.as_deref(), &mut errors);
    validate_url("api.batch_url", settings.api.batch_url.as_deref(), &mut errors);

    if let Some(agent) = &settings.api.user_agent {
        if agent.trim().is_empty() {
            errors.push("api.user_agent must not be blank".to_string());
        }
    }

    if settings.credentials.client_id.trim().is_empty() {
        errors.push("credentials.client_id must not be empty".to_string());
    }

    validate_retry("retry", &settings.retry, &mut errors);

    // margin sane bounds
    if settings.refresh_margin_seconds > 60 * 60 * 24 {
        errors.push(format!(
            "refresh_margin_seconds ({}) is unreasonably large",
            settings.refresh_margin_seconds
        ));
    }

    // logging level
    if let Some(logging) = &settings.logging {
        let valid = ["trace", "debug", "info", "warn", "error"];
        if !valid.contains(&logging.level.to_lowercase().as_str()) {
            errors.push(format!(
                "logging.level '{}' invalid; allowed: {:?}",
                logging.level, valid
            ));
        }
    }

    if errors.is_empty() {
        info!("settings valid");
        Ok(())
    } else {
        error!("settings validation errors ({}):", errors.len());
        for e in &errors {
            error!(" - {}", e);
        }
        Err(errors)
    }
}

fn validate_url(path: &str, raw: Option<&str>, errors: &mut Vec<String>) {
    let Some(raw) = raw else { return };
    if raw.trim().is_empty() {
        errors.push(format!("{} must not be empty", path));
        return;
    }
    match Url::parse(raw) {
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
        Ok(url) => errors.push(format!(
            "{} '{}' must use http or https, got '{}'",
            path,
            raw,
            url.scheme()
        )),
        Err(e) => errors.push(format!("{} '{}' is not a valid url: {}", path, raw, e)),
    }
}

fn validate_retry(path: &str, retry: &RetryConfig, errors: &mut Vec<String>) {
    if let Some(attempts) = retry.attempts {
        if attempts == 0 {
            errors.push(format!("{}.attempts must be > 0", path));
        }
    }
    if let Some(base) = retry.base_delay_ms {
        if base > 60_000 {
            errors.push(format!("{}.base_delay_ms ({}) must be <= 60000", path, base));
        }
    }
}
