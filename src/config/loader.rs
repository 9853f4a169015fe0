use anyhow::{anyhow, Result};
use regex::Regex;
use tracing::{debug, error};

use crate::config::settings::{ClientSettings, LogFormat, LoggingConfig};
use crate::config::validator;

/// Parse client settings from YAML text.
///
/// `${VAR}` and `${VAR:default}` placeholders are expanded from the process environment
/// before parsing. Every validation problem is reported at once.
pub fn parse_settings(content: &str) -> Result<ClientSettings> {
    let expanded = expand_env_vars(content)?;
    let mut settings: ClientSettings = serde_yaml::from_str(&expanded)
        .inspect_err(|e| error!("parse settings error: {}", e))?;

    // Apply defaults
    if settings.logging.is_none() {
        settings.logging = Some(LoggingConfig::new("info".to_owned(), LogFormat::Compact));
    }

    debug!("validating settings ...");
    validator::validate_settings(&settings).map_err(|errors| {
        anyhow!(
            "settings are not valid, total errors:{}, \n{}",
            errors.len(),
            errors.join("\n")
        )
    })?;

    Ok(settings)
}

fn expand_env_vars(input: &str) -> Result<String> {
    let re = Regex::new(r"\$\{(\w+)(?::([^\}]+))?\}")?;
    Ok(re
        .replace_all(input, |caps: &regex::Captures| {
            let var = &caps[1];
            let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            std::env::var(var).unwrap_or_else(|_| default.to_string())
        })
        .to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_defaults_when_variable_is_missing() {
        let out = expand_env_vars("url: ${CLOUDSTORE_SURELY_UNSET_VAR:https://x.test}").unwrap();
        assert_eq!(out, "url: https://x.test");
    }
}
