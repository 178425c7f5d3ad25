use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::{DEFAULT_PORTAL_URL, DEFAULT_WEB_MAP_ITEM_ID, MAX_JOB_LOG_MESSAGES, WORLD_GEOCODER_URL};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid {field} url: {reason}")]
    InvalidUrl { field: &'static str, reason: String },

    #[error("{field} url must use https")]
    InsecureUrl { field: &'static str },

    #[error("web map item id must be 32 hex characters, got {0:?}")]
    InvalidItemId(String),

    #[error("validation error: {0}")]
    Validation(String),
}

/// Settings the shell hands to the core at launch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub portal_url: String,
    pub web_map_item_id: String,
    pub geocoder_url: String,
    pub max_job_log_messages: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            portal_url: DEFAULT_PORTAL_URL.to_string(),
            web_map_item_id: DEFAULT_WEB_MAP_ITEM_ID.to_string(),
            geocoder_url: WORLD_GEOCODER_URL.to_string(),
            max_job_log_messages: MAX_JOB_LOG_MESSAGES,
        }
    }
}

impl CoreConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.portal_url()?;
        self.geocoder_url()?;
        if self.web_map_item_id.len() != 32
            || !self.web_map_item_id.chars().all(|c| c.is_ascii_hexdigit())
        {
            return Err(ConfigError::InvalidItemId(self.web_map_item_id.clone()));
        }
        if self.max_job_log_messages == 0 {
            return Err(ConfigError::Validation(
                "max_job_log_messages must be > 0".into(),
            ));
        }
        Ok(())
    }

    pub fn portal_url(&self) -> Result<Url, ConfigError> {
        parse_https("portal", &self.portal_url)
    }

    pub fn geocoder_url(&self) -> Result<Url, ConfigError> {
        parse_https("geocoder", &self.geocoder_url)
    }
}

fn parse_https(field: &'static str, raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|e| ConfigError::InvalidUrl {
        field,
        reason: e.to_string(),
    })?;
    if url.scheme() != "https" {
        return Err(ConfigError::InsecureUrl { field });
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(CoreConfig::default().validate(), Ok(()));
    }

    #[test]
    fn test_rejects_http_portal() {
        let config = CoreConfig {
            portal_url: "http://www.arcgis.com".into(),
            ..CoreConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::InsecureUrl { field: "portal" })
        );
    }

    #[test]
    fn test_rejects_malformed_item_id() {
        let config = CoreConfig {
            web_map_item_id: "not-an-item".into(),
            ..CoreConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidItemId(_))
        ));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: CoreConfig =
            serde_json::from_str(r#"{"portal_url":"https://example.maps.arcgis.com"}"#).unwrap();
        assert_eq!(config.portal_url, "https://example.maps.arcgis.com");
        assert_eq!(config.web_map_item_id, DEFAULT_WEB_MAP_ITEM_ID);
        assert!(config.validate().is_ok());
    }
}
