// lib.rs - Offline map lifecycle and work-mode core

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]

pub mod app;
pub mod app_context;
pub mod capabilities;
pub mod config;
pub mod event;
pub mod job_manager;
pub mod model;
pub mod offline_map;
pub mod persistence;
pub mod portal_session;
pub mod view;
pub mod work_mode;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub use app::App;
pub use capabilities::{Capabilities, Effect};
pub use config::{ConfigError, CoreConfig};
pub use event::Event;
pub use model::{Model, SdkError};
pub use view::ViewModel;
pub use work_mode::WorkMode;

use job_manager::JobManagerError;
use model::AreaError;
use offline_map::OfflineMapError;
use work_mode::WorkModeError;

pub const DEFAULT_PORTAL_URL: &str = "https://www.arcgis.com";
pub const DEFAULT_WEB_MAP_ITEM_ID: &str = "16f1b8ba37b44dc3884afc8d5f454dd2";
pub const WORLD_GEOCODER_URL: &str =
    "https://geocode-api.arcgis.com/arcgis/rest/services/World/GeocodeServer";

/// `NSUserCancelledError`, reported by the SDK when a job is cancelled through
/// its progress handle.
pub const CANCELLED_ERROR_CODE: i64 = 3072;
pub const URL_TIMED_OUT_CODE: i64 = -1001;
pub const URL_ERROR_DOMAIN: &str = "NSURLErrorDomain";
pub const AUTH_REQUIRED_CODES: &[i64] = &[401, 403, 498, 499];

pub const MAX_JOB_LOG_MESSAGES: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorSeverity {
    Transient,
    Permanent,
    Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Network,
    Timeout,
    Authentication,
    Cancelled,
    MissingOfflineMap,
    OfflineMapExists,
    JobInProgress,
    JobRejected,
    InvalidArea,
    Storage,
    Configuration,
    Sdk,
    InvalidState,
    Internal,
}

impl ErrorKind {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Network => "NETWORK_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::Authentication => "AUTH_ERROR",
            Self::Cancelled => "CANCELLED",
            Self::MissingOfflineMap => "MISSING_OFFLINE_MAP",
            Self::OfflineMapExists => "OFFLINE_MAP_EXISTS",
            Self::JobInProgress => "JOB_IN_PROGRESS",
            Self::JobRejected => "JOB_REJECTED",
            Self::InvalidArea => "INVALID_AREA",
            Self::Storage => "STORAGE_ERROR",
            Self::Configuration => "CONFIGURATION_ERROR",
            Self::Sdk => "SDK_ERROR",
            Self::InvalidState => "INVALID_STATE",
            Self::Internal => "INTERNAL_ERROR",
        }
    }

    #[must_use]
    pub const fn default_severity(self) -> ErrorSeverity {
        match self {
            Self::Network | Self::Timeout | Self::Storage | Self::JobInProgress => {
                ErrorSeverity::Transient
            }

            Self::Configuration | Self::Internal | Self::InvalidState => ErrorSeverity::Fatal,

            Self::Authentication
            | Self::Cancelled
            | Self::MissingOfflineMap
            | Self::OfflineMapExists
            | Self::JobRejected
            | Self::InvalidArea
            | Self::Sdk => ErrorSeverity::Permanent,
        }
    }

    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Network | Self::Timeout | Self::Storage | Self::JobInProgress
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppError {
    pub kind: ErrorKind,
    pub severity: ErrorSeverity,
    pub message: String,
    pub internal_message: Option<String>,
    pub context: HashMap<String, String>,
}

impl AppError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: kind.default_severity(),
            message: message.into(),
            internal_message: None,
            context: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_internal(mut self, internal: impl Into<String>) -> Self {
        self.internal_message = Some(internal.into());
        self
    }

    #[must_use]
    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = severity;
        self
    }

    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.kind.code()
    }

    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.kind.is_retryable() && !matches!(self.severity, ErrorSeverity::Fatal)
    }

    #[must_use]
    pub fn user_facing_message(&self) -> String {
        match self.kind {
            ErrorKind::Network => {
                "Unable to reach the portal. Check your connection and try again.".into()
            }
            ErrorKind::Timeout => "The request timed out. Please try again.".into(),
            ErrorKind::Authentication => "Sign-in failed. Continuing without signing in.".into(),
            ErrorKind::Cancelled => "The operation was canceled.".into(),
            ErrorKind::MissingOfflineMap => {
                "There is no offline map. Download a map area to work offline.".into()
            }
            ErrorKind::OfflineMapExists => {
                "An offline map already exists. Delete it before downloading a new one.".into()
            }
            ErrorKind::JobInProgress => {
                "Another offline map job is in progress. Wait for it to finish.".into()
            }
            ErrorKind::Configuration => "The app is misconfigured.".into(),
            ErrorKind::JobRejected
            | ErrorKind::InvalidArea
            | ErrorKind::Storage
            | ErrorKind::Sdk
            | ErrorKind::InvalidState
            | ErrorKind::Internal => self.message.clone(),
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code(), self.message)?;
        if let Some(internal) = &self.internal_message {
            write!(f, " ({internal})")?;
        }
        Ok(())
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

impl From<SdkError> for AppError {
    fn from(e: SdkError) -> Self {
        let kind = if e.is_cancellation() {
            ErrorKind::Cancelled
        } else if e.domain == URL_ERROR_DOMAIN && e.code == URL_TIMED_OUT_CODE {
            ErrorKind::Timeout
        } else if e.domain == URL_ERROR_DOMAIN {
            ErrorKind::Network
        } else if AUTH_REQUIRED_CODES.contains(&e.code) {
            ErrorKind::Authentication
        } else {
            ErrorKind::Sdk
        };
        AppError::new(kind, e.message.clone())
            .with_internal(format!("{}:{}", e.domain, e.code))
            .with_context("domain", e.domain)
            .with_context("code", e.code.to_string())
    }
}

impl From<ConfigError> for AppError {
    fn from(e: ConfigError) -> Self {
        AppError::new(ErrorKind::Configuration, e.to_string())
    }
}

impl From<JobManagerError> for AppError {
    fn from(e: JobManagerError) -> Self {
        let kind = match e {
            JobManagerError::JobInProgress => ErrorKind::JobInProgress,
            _ => ErrorKind::JobRejected,
        };
        AppError::new(kind, e.to_string())
    }
}

impl From<OfflineMapError> for AppError {
    fn from(e: OfflineMapError) -> Self {
        match e {
            OfflineMapError::OfflineMapExists => {
                AppError::new(ErrorKind::OfflineMapExists, e.to_string())
            }
            OfflineMapError::MissingOfflineMap => {
                AppError::new(ErrorKind::MissingOfflineMap, e.to_string())
            }
            OfflineMapError::Job(inner) => inner.into(),
        }
    }
}

impl From<WorkModeError> for AppError {
    fn from(e: WorkModeError) -> Self {
        match e {
            WorkModeError::MissingOfflineMap => {
                AppError::new(ErrorKind::MissingOfflineMap, e.to_string())
            }
        }
    }
}

impl From<AreaError> for AppError {
    fn from(e: AreaError) -> Self {
        AppError::new(ErrorKind::InvalidArea, e.to_string())
    }
}

/// Milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UnixTimeMs(pub u64);

impl UnixTimeMs {
    #[must_use]
    pub fn now() -> Self {
        let ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0);
        Self(ms)
    }

    #[must_use]
    pub const fn elapsed_since(self, earlier: Self) -> u64 {
        self.0.saturating_sub(earlier.0)
    }

    #[must_use]
    pub const fn is_before(self, other: Self) -> bool {
        self.0 < other.0
    }
}

impl std::fmt::Display for UnixTimeMs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.0)
    }
}
