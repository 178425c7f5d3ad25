use serde::{Deserialize, Serialize};
use url::Url;

use crate::app_context::AppContext;
use crate::job_manager::{JobId, JobStatus, JobType};
use crate::model::{JobMessage, MapHandle};
use crate::offline_map::OfflineMapStatus;
use crate::portal_session::PortalSessionStatus;
use crate::work_mode::{LocatorConfig, WorkModeKind};
use crate::{AppError, UnixTimeMs};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct PortalView {
    pub status: String,
    pub url: Option<Url>,
    pub username: Option<String>,
    pub signed_in: bool,
    /// Why the session is a fallback or failed.
    pub error: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct OfflineMapView {
    pub status: String,
    pub has_offline_map: bool,
    pub error: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct JobView {
    pub job_id: JobId,
    pub job_type: JobType,
    pub phase: String,
    pub fraction_completed: f64,
    pub cancellable: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct AlertView {
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

impl From<&AppError> for AlertView {
    fn from(error: &AppError) -> Self {
        Self {
            code: error.code().to_string(),
            message: error.user_facing_message(),
            retryable: error.is_retryable(),
        }
    }
}

/// Flattened snapshot handed to the shell on every render.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct ViewModel {
    pub work_mode: WorkModeKind,
    pub map: Option<MapHandle>,
    pub portal: PortalView,
    pub offline_map: OfflineMapView,
    pub job: Option<JobView>,
    pub job_log: Vec<JobMessage>,
    pub last_job_summary: Option<String>,
    pub last_sync: Option<UnixTimeMs>,
    pub has_local_edits: Option<bool>,
    pub locator: LocatorConfig,
    pub alert: Option<AlertView>,
    pub can_go_offline: bool,
    pub can_download: bool,
    pub can_sync: bool,
}

fn portal_view(status: &PortalSessionStatus) -> PortalView {
    let (url, error) = match status {
        PortalSessionStatus::None => (None, None),
        PortalSessionStatus::Loading(portal) | PortalSessionStatus::Loaded(portal) => {
            (Some(portal.url.clone()), None)
        }
        PortalSessionStatus::Fallback(portal, e) => (Some(portal.url.clone()), Some(e.message.clone())),
        PortalSessionStatus::Failed(e) => (None, Some(e.message.clone())),
    };
    let portal = status.portal();
    PortalView {
        status: status.name().to_string(),
        url,
        username: portal.and_then(|p| p.user.as_ref()).map(|u| u.username.clone()),
        signed_in: portal.is_some_and(|p| p.is_authenticated()),
        error,
    }
}

fn offline_map_view(status: &OfflineMapStatus) -> OfflineMapView {
    OfflineMapView {
        status: status.name().to_string(),
        has_offline_map: matches!(status, OfflineMapStatus::Loaded(..)),
        error: match status {
            OfflineMapStatus::Failed(e) => Some(e.message.clone()),
            _ => None,
        },
    }
}

fn job_view(status: &JobStatus, fraction_completed: f64) -> Option<JobView> {
    status.job().map(|job| JobView {
        job_id: job.id().clone(),
        job_type: job.job_type(),
        phase: status.name().to_string(),
        fraction_completed,
        cancellable: status.is_running(),
    })
}

impl From<&AppContext> for ViewModel {
    fn from(ctx: &AppContext) -> Self {
        let work_mode = ctx.work_mode();
        let offline_status = ctx.offline_map().status();
        let job_status = ctx.offline_map().job_status();
        let jobs = ctx.offline_map().job_manager();
        let loaded = matches!(offline_status, OfflineMapStatus::Loaded(..));
        let idle = !jobs.is_job_in_progress();

        Self {
            work_mode: work_mode.kind(),
            map: work_mode.map().cloned(),
            portal: portal_view(&ctx.portal_session().status()),
            offline_map: offline_map_view(&offline_status),
            job: job_view(&job_status, jobs.fraction_completed()),
            job_log: ctx.job_log().cloned().collect(),
            last_job_summary: ctx.last_job_summary().map(str::to_string),
            last_sync: ctx.offline_map().last_sync(),
            has_local_edits: ctx.has_local_edits(),
            locator: ctx.locator().clone(),
            alert: ctx.alert().map(AlertView::from),
            can_go_offline: offline_status.has_offline_map(),
            can_download: idle && !offline_status.has_offline_map() && work_mode.is_online(),
            can_sync: idle && loaded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChallengeHandling, Portal, PortalAccess, PortalUser, SdkError};
    use crate::{ErrorKind, DEFAULT_PORTAL_URL};

    #[test]
    fn test_default_context_view() {
        let view = ViewModel::from(&AppContext::default());
        assert_eq!(view.work_mode, WorkModeKind::None);
        assert_eq!(view.portal.status, "none");
        assert_eq!(view.offline_map.status, "none");
        assert!(view.job.is_none());
        assert!(!view.can_go_offline);
        assert!(!view.can_sync);
    }

    #[test]
    fn test_portal_view_reports_signed_in_user() {
        let portal = Portal {
            url: Url::parse(DEFAULT_PORTAL_URL).unwrap(),
            access: PortalAccess::CredentialRequired {
                challenge: ChallengeHandling::Interactive,
            },
            user: Some(PortalUser {
                username: "surveyor".into(),
                full_name: None,
            }),
        };
        let view = portal_view(&PortalSessionStatus::Loaded(portal));
        assert!(view.signed_in);
        assert_eq!(view.username.as_deref(), Some("surveyor"));
        assert_eq!(view.error, None);
    }

    #[test]
    fn test_fallback_view_keeps_sign_in_error() {
        let portal = Portal::new(Url::parse(DEFAULT_PORTAL_URL).unwrap(), PortalAccess::Anonymous);
        let view = portal_view(&PortalSessionStatus::Fallback(
            portal,
            SdkError::new("ArcGIS", 401, "invalid credentials"),
        ));
        assert_eq!(view.status, "fallback");
        assert!(!view.signed_in);
        assert_eq!(view.error.as_deref(), Some("invalid credentials"));
    }

    #[test]
    fn test_alert_view_uses_user_facing_message() {
        let alert = AlertView::from(&AppError::new(ErrorKind::MissingOfflineMap, "no map"));
        assert_eq!(alert.code, "MISSING_OFFLINE_MAP");
        assert!(alert.message.starts_with("There is no offline map"));
        assert!(!alert.retryable);
    }
}
