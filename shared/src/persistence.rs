//! Keys and encodings for the settings the core keeps in the shell's
//! key-value store.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::work_mode::WorkModeKind;
use crate::UnixTimeMs;

pub const SETTINGS_NAMESPACE: &str = "settings";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PersistedKey {
    WorkMode,
    PortalSessionUrl,
    LastOfflineSync,
}

impl PersistedKey {
    pub fn name(self) -> &'static str {
        match self {
            Self::WorkMode => "work_mode",
            Self::PortalSessionUrl => "portal_session_url",
            Self::LastOfflineSync => "last_offline_sync",
        }
    }

    pub fn raw(self) -> String {
        format!("{SETTINGS_NAMESPACE}:{}", self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PersistenceError {
    #[error("value for {key} is not valid utf-8")]
    NotUtf8 { key: &'static str },

    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },
}

/// A settings write. `None` payloads delete the key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistedValue {
    WorkMode(WorkModeKind),
    PortalSessionUrl(Option<Url>),
    LastOfflineSync(Option<UnixTimeMs>),
}

impl PersistedValue {
    pub fn key(&self) -> PersistedKey {
        match self {
            Self::WorkMode(_) => PersistedKey::WorkMode,
            Self::PortalSessionUrl(_) => PersistedKey::PortalSessionUrl,
            Self::LastOfflineSync(_) => PersistedKey::LastOfflineSync,
        }
    }

    /// Bytes to store, or `None` when the key should be removed.
    pub fn encode(&self) -> Result<Option<Vec<u8>>, PersistenceError> {
        match self {
            Self::WorkMode(kind) => Ok(Some(kind.as_str().as_bytes().to_vec())),
            Self::PortalSessionUrl(url) => Ok(url.as_ref().map(|u| u.as_str().as_bytes().to_vec())),
            Self::LastOfflineSync(None) => Ok(None),
            Self::LastOfflineSync(Some(ts)) => serde_json::to_vec(ts).map(Some).map_err(|e| {
                PersistenceError::InvalidValue {
                    key: PersistedKey::LastOfflineSync.name(),
                    reason: e.to_string(),
                }
            }),
        }
    }
}

fn utf8(key: PersistedKey, bytes: &[u8]) -> Result<&str, PersistenceError> {
    std::str::from_utf8(bytes).map_err(|_| PersistenceError::NotUtf8 { key: key.name() })
}

pub fn decode_work_mode(bytes: &[u8]) -> Result<WorkModeKind, PersistenceError> {
    let key = PersistedKey::WorkMode;
    let raw = utf8(key, bytes)?;
    WorkModeKind::parse(raw).ok_or_else(|| PersistenceError::InvalidValue {
        key: key.name(),
        reason: format!("unknown work mode {raw:?}"),
    })
}

pub fn decode_portal_url(bytes: &[u8]) -> Result<Url, PersistenceError> {
    let key = PersistedKey::PortalSessionUrl;
    Url::parse(utf8(key, bytes)?).map_err(|e| PersistenceError::InvalidValue {
        key: key.name(),
        reason: e.to_string(),
    })
}

pub fn decode_last_sync(bytes: &[u8]) -> Result<UnixTimeMs, PersistenceError> {
    serde_json::from_slice(bytes).map_err(|e| PersistenceError::InvalidValue {
        key: PersistedKey::LastOfflineSync.name(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_live_in_settings_namespace() {
        assert_eq!(PersistedKey::WorkMode.raw(), "settings:work_mode");
        assert_eq!(
            PersistedKey::PortalSessionUrl.raw(),
            "settings:portal_session_url"
        );
        assert_eq!(
            PersistedKey::LastOfflineSync.raw(),
            "settings:last_offline_sync"
        );
    }

    #[test]
    fn test_work_mode_is_stored_as_plain_text() {
        let bytes = PersistedValue::WorkMode(WorkModeKind::Offline)
            .encode()
            .unwrap()
            .unwrap();
        assert_eq!(bytes, b"offline");
        assert_eq!(decode_work_mode(&bytes), Ok(WorkModeKind::Offline));
    }

    #[test]
    fn test_unknown_work_mode_is_rejected() {
        assert!(matches!(
            decode_work_mode(b"airplane"),
            Err(PersistenceError::InvalidValue { key: "work_mode", .. })
        ));
        assert_eq!(
            decode_work_mode(&[0xff, 0xfe]),
            Err(PersistenceError::NotUtf8 { key: "work_mode" })
        );
    }

    #[test]
    fn test_absent_values_delete_the_key() {
        assert_eq!(PersistedValue::PortalSessionUrl(None).encode(), Ok(None));
        assert_eq!(PersistedValue::LastOfflineSync(None).encode(), Ok(None));
    }

    #[test]
    fn test_last_sync_is_json() {
        let bytes = PersistedValue::LastOfflineSync(Some(UnixTimeMs(1_700_000_000_000)))
            .encode()
            .unwrap()
            .unwrap();
        assert_eq!(bytes, b"1700000000000");
        assert_eq!(decode_last_sync(&bytes), Ok(UnixTimeMs(1_700_000_000_000)));
    }

    #[test]
    fn test_portal_url_round_trip() {
        let url = Url::parse("https://example.maps.arcgis.com/").unwrap();
        let bytes = PersistedValue::PortalSessionUrl(Some(url.clone()))
            .encode()
            .unwrap()
            .unwrap();
        assert_eq!(decode_portal_url(&bytes), Ok(url));
    }
}
