use std::path::Path;

use tracing::{debug, info};

use super::AppConfig;
use crate::error::{AppError, Result};

/// Environment variable overriding `bridge.base_url`
pub const BRIDGE_URL_ENV: &str = "CAMSTREAM_BRIDGE_URL";

/// Load configuration
///
/// Starts from defaults, merges the JSON file at `path` when given, then
/// applies environment overrides. CLI flags are applied by the caller.
pub async fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let mut config = match path {
        Some(path) => {
            let json = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = serde_json::from_str(&json).map_err(|e| {
                AppError::Config(format!("Invalid config file {}: {}", path.display(), e))
            })?;
            info!("Loaded configuration from {}", path.display());
            config
        }
        None => AppConfig::default(),
    };

    if let Ok(url) = std::env::var(BRIDGE_URL_ENV) {
        if !url.trim().is_empty() {
            debug!("Bridge URL overridden by {}", BRIDGE_URL_ENV);
            config.bridge.base_url = url.trim().to_string();
        }
    }

    validate(&config)?;
    Ok(config)
}

/// Check values the session cannot run with
pub fn validate(config: &AppConfig) -> Result<()> {
    let url = config.bridge.base_url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(AppError::Config(format!(
            "Bridge URL must be http(s): {}",
            config.bridge.base_url
        )));
    }
    if config.session.negotiation_timeout_ms == 0 {
        return Err(AppError::Config(
            "Negotiation timeout must be non-zero".to_string(),
        ));
    }
    Ok(())
}
