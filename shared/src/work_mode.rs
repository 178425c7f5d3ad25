use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::model::{MapHandle, Portal};

/// The app's current mode. The map is absent while it is still loading.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
pub enum WorkMode {
    #[default]
    None,
    Online(Option<MapHandle>),
    Offline(Option<MapHandle>),
}

impl WorkMode {
    pub fn kind(&self) -> WorkModeKind {
        match self {
            Self::None => WorkModeKind::None,
            Self::Online(_) => WorkModeKind::Online,
            Self::Offline(_) => WorkModeKind::Offline,
        }
    }

    pub fn map(&self) -> Option<&MapHandle> {
        match self {
            Self::None => None,
            Self::Online(map) | Self::Offline(map) => map.as_ref(),
        }
    }

    pub fn is_online(&self) -> bool {
        matches!(self, Self::Online(_))
    }

    pub fn is_offline(&self) -> bool {
        matches!(self, Self::Offline(_))
    }
}

/// The persisted form of a [`WorkMode`]; maps are never persisted.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum WorkModeKind {
    #[default]
    None,
    Online,
    Offline,
}

impl WorkModeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Online => "online",
            Self::Offline => "offline",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(Self::None),
            "online" => Some(Self::Online),
            "offline" => Some(Self::Offline),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkModeError {
    #[error("cannot work offline without an offline map")]
    MissingOfflineMap,
}

/// Geocoding source for the current work mode.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
pub enum LocatorConfig {
    #[default]
    None,
    /// The locator bundled in the offline package.
    OfflinePackage,
    WorldGeocoder {
        url: Url,
        /// Portal whose credential signs geocode requests.
        credential_portal: Option<Url>,
    },
}

impl LocatorConfig {
    pub fn derive(mode: &WorkMode, portal: Option<&Portal>, geocoder_url: &Url) -> Self {
        match mode {
            WorkMode::None => Self::None,
            WorkMode::Offline(_) => Self::OfflinePackage,
            WorkMode::Online(_) => Self::WorldGeocoder {
                url: geocoder_url.clone(),
                credential_portal: portal
                    .filter(|p| p.is_authenticated())
                    .map(|p| p.url.clone()),
            },
        }
    }
}
