use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use url::Url;

use crate::app_context::AppContext;
use crate::CANCELLED_ERROR_CODE;

// --- Typed handles for objects owned by the shell's SDK ---

macro_rules! typed_id {
    ($name:ident) => {
        #[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

typed_id!(MapHandle);
typed_id!(PackageHandle);

/// What the shell found after opening a mobile map package.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PackageContents {
    pub package: PackageHandle,
    pub maps: Vec<MapHandle>,
}

// --- Offline directories ---

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DirectoryKind {
    Permanent,
    Temporary,
}

/// A directory the shell resolves from the web-map item id. The core never
/// sees file-system paths.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct OfflineDirectory {
    pub item_id: String,
    pub kind: DirectoryKind,
}

impl OfflineDirectory {
    pub fn permanent(item_id: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            kind: DirectoryKind::Permanent,
        }
    }

    pub fn temporary(item_id: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            kind: DirectoryKind::Temporary,
        }
    }
}

// --- Portal ---

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChallengeHandling {
    Interactive,
    Suppressed,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum PortalAccess {
    Anonymous,
    CredentialRequired { challenge: ChallengeHandling },
}

impl PortalAccess {
    pub fn requires_login(self) -> bool {
        matches!(self, Self::CredentialRequired { .. })
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PortalUser {
    pub username: String,
    pub full_name: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Portal {
    pub url: Url,
    pub access: PortalAccess,
    pub user: Option<PortalUser>,
}

impl Portal {
    pub fn new(url: Url, access: PortalAccess) -> Self {
        Self {
            url,
            access,
            user: None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.access.requires_login() && self.user.is_some()
    }
}

// --- Area of interest ---

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AreaError {
    #[error("extent has non-finite coordinates")]
    NonFinite,
    #[error("extent is empty: {width} x {height}")]
    Empty { width: f64, height: f64 },
    #[error("invalid scale: {0}")]
    InvalidScale(f64),
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct Envelope {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
    pub wkid: u32,
}

impl Envelope {
    pub fn width(&self) -> f64 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> f64 {
        self.ymax - self.ymin
    }
}

/// Extent plus scale range bound to an on-demand download job. A `max_scale`
/// of zero means "no limit", matching the SDK's convention.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct AreaOfInterest {
    extent: Envelope,
    min_scale: f64,
    max_scale: f64,
}

impl AreaOfInterest {
    pub fn new(extent: Envelope, min_scale: f64) -> Result<Self, AreaError> {
        let coords = [extent.xmin, extent.ymin, extent.xmax, extent.ymax];
        if coords.iter().any(|c| !c.is_finite()) {
            return Err(AreaError::NonFinite);
        }
        if extent.width() <= 0.0 || extent.height() <= 0.0 {
            return Err(AreaError::Empty {
                width: extent.width(),
                height: extent.height(),
            });
        }
        if !min_scale.is_finite() || min_scale <= 0.0 {
            return Err(AreaError::InvalidScale(min_scale));
        }
        Ok(Self {
            extent,
            min_scale,
            max_scale: 0.0,
        })
    }

    pub fn extent(&self) -> &Envelope {
        &self.extent
    }

    pub fn min_scale(&self) -> f64 {
        self.min_scale
    }

    pub fn max_scale(&self) -> f64 {
        self.max_scale
    }
}

// --- Job messages ---

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Warning,
    Error,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct JobMessage {
    pub severity: MessageSeverity,
    pub text: String,
}

impl JobMessage {
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            severity: MessageSeverity::Info,
            text: text.into(),
        }
    }
}

// --- Errors reported by the shell ---

/// An error reported by the shell's SDK, file system or identity layer.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Error)]
#[error("{domain} error {code}: {message}")]
pub struct SdkError {
    pub domain: String,
    pub code: i64,
    pub message: String,
}

impl SdkError {
    pub fn new(domain: impl Into<String>, code: i64, message: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            code,
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::new("NSCocoaErrorDomain", CANCELLED_ERROR_CODE, "User canceled")
    }

    /// Shell answered with an output the request cannot produce.
    pub fn unexpected_response(operation: &str) -> Self {
        Self::new("shared", -1, format!("unexpected response to {operation}"))
    }

    pub fn is_cancellation(&self) -> bool {
        self.code == CANCELLED_ERROR_CODE
    }
}

// --- Model ---

/// Root Crux model. Everything stateful lives in the [`AppContext`].
#[derive(Debug, Default)]
pub struct Model {
    pub context: AppContext,
    pub launched: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extent() -> Envelope {
        Envelope {
            xmin: -117.2,
            ymin: 34.0,
            xmax: -117.1,
            ymax: 34.1,
            wkid: 4326,
        }
    }

    #[test]
    fn test_valid_area_of_interest() {
        let area = AreaOfInterest::new(extent(), 5_000.0).unwrap();
        assert_eq!(area.min_scale(), 5_000.0);
        assert_eq!(area.max_scale(), 0.0);
    }

    #[test]
    fn test_area_rejects_empty_extent() {
        let mut e = extent();
        e.xmax = e.xmin;
        assert!(matches!(
            AreaOfInterest::new(e, 5_000.0),
            Err(AreaError::Empty { .. })
        ));
    }

    #[test]
    fn test_area_rejects_non_finite() {
        let mut e = extent();
        e.ymin = f64::NAN;
        assert_eq!(AreaOfInterest::new(e, 5_000.0), Err(AreaError::NonFinite));
    }

    #[test]
    fn test_area_rejects_bad_scale() {
        assert_eq!(
            AreaOfInterest::new(extent(), 0.0),
            Err(AreaError::InvalidScale(0.0))
        );
        assert!(AreaOfInterest::new(extent(), f64::INFINITY).is_err());
    }

    #[test]
    fn test_cancellation_is_detected_by_code() {
        assert!(SdkError::cancelled().is_cancellation());
        assert!(!SdkError::new("ArcGIS", 7, "failed").is_cancellation());
    }

    #[test]
    fn test_portal_authentication() {
        let url = Url::parse("https://www.arcgis.com").unwrap();
        let mut portal = Portal::new(
            url,
            PortalAccess::CredentialRequired {
                challenge: ChallengeHandling::Interactive,
            },
        );
        assert!(!portal.is_authenticated());
        portal.user = Some(PortalUser {
            username: "surveyor".into(),
            full_name: None,
        });
        assert!(portal.is_authenticated());
    }
}
