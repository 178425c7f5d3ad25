//! Portal session state machine: silent restore, interactive sign-in,
//! anonymous default session and the fallback from a failed sign-in.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::model::{ChallengeHandling, Portal, PortalAccess, SdkError};

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum PortalSessionStatus {
    #[default]
    None,
    Loading(Portal),
    Loaded(Portal),
    /// Anonymous portal loaded after a credential-required load failed.
    Fallback(Portal, SdkError),
    Failed(SdkError),
}

impl PortalSessionStatus {
    /// The usable portal, if the session settled on one.
    pub fn portal(&self) -> Option<&Portal> {
        match self {
            Self::Loaded(portal) | Self::Fallback(portal, _) => Some(portal),
            _ => None,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Loading(_) => "loading",
            Self::Loaded(_) => "loaded",
            Self::Fallback(..) => "fallback",
            Self::Failed(_) => "failed",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectPurpose {
    Silent,
    SignIn,
    Default,
    Fallback { previous: SdkError },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectRequest {
    pub id: u64,
    pub url: Url,
    pub access: PortalAccess,
    pub purpose: ConnectPurpose,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PortalSessionOutput {
    RevokeCredentials(ConnectRequest),
    Connect(ConnectRequest),
    StatusChanged(PortalSessionStatus),
    /// `None` clears the stored URL so the next launch uses the default session.
    PersistPortalUrl(Option<Url>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Stage {
    Revoking,
    Connecting,
}

#[derive(Debug)]
struct InFlight {
    request: ConnectRequest,
    stage: Stage,
}

#[derive(Debug)]
pub struct PortalSessionManager {
    status: watch::Sender<PortalSessionStatus>,
    in_flight: Option<InFlight>,
    next_request: u64,
    outputs: Vec<PortalSessionOutput>,
}

impl Default for PortalSessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PortalSessionManager {
    pub fn new() -> Self {
        let (status, _) = watch::channel(PortalSessionStatus::None);
        Self {
            status,
            in_flight: None,
            next_request: 0,
            outputs: Vec::new(),
        }
    }

    pub fn status(&self) -> PortalSessionStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PortalSessionStatus> {
        self.status.subscribe()
    }

    /// Id of the revoke or connect request the manager is waiting on.
    pub fn pending_request(&self) -> Option<u64> {
        self.in_flight.as_ref().map(|f| f.request.id)
    }

    pub fn drain_outputs(&mut self) -> Vec<PortalSessionOutput> {
        std::mem::take(&mut self.outputs)
    }

    fn set_status(&mut self, status: PortalSessionStatus) {
        debug!(from = self.status.borrow().name(), to = status.name(), "portal session status");
        // The stored URL drives the silent restore at launch. Anonymous and
        // fallback sessions resolve to the default portal, so they clear it.
        let persist = match &status {
            PortalSessionStatus::Loading(_) => None,
            PortalSessionStatus::Loaded(portal) if portal.access.requires_login() => {
                Some(Some(portal.url.clone()))
            }
            _ => Some(None),
        };
        self.status.send_replace(status.clone());
        self.outputs.push(PortalSessionOutput::StatusChanged(status));
        if let Some(url) = persist {
            self.outputs.push(PortalSessionOutput::PersistPortalUrl(url));
        }
    }

    fn request(&mut self, url: &Url, access: PortalAccess, purpose: ConnectPurpose) -> ConnectRequest {
        self.next_request += 1;
        ConnectRequest {
            id: self.next_request,
            url: url.clone(),
            access,
            purpose,
        }
    }

    fn begin_connect(&mut self, url: &Url, challenge: ChallengeHandling, purpose: ConnectPurpose) {
        let access = PortalAccess::CredentialRequired { challenge };
        let request = self.request(url, access, purpose);
        self.set_status(PortalSessionStatus::Loading(Portal::new(url.clone(), access)));
        self.outputs.push(PortalSessionOutput::Connect(request.clone()));
        self.in_flight = Some(InFlight {
            request,
            stage: Stage::Connecting,
        });
    }

    /// Anonymous loads always drop cached credentials first.
    fn begin_anonymous(&mut self, url: &Url, purpose: ConnectPurpose) {
        let request = self.request(url, PortalAccess::Anonymous, purpose);
        self.set_status(PortalSessionStatus::Loading(Portal::new(
            url.clone(),
            PortalAccess::Anonymous,
        )));
        self.outputs
            .push(PortalSessionOutput::RevokeCredentials(request.clone()));
        self.in_flight = Some(InFlight {
            request,
            stage: Stage::Revoking,
        });
    }

    fn is_loading(&self) -> bool {
        self.status.borrow().is_loading()
    }

    #[instrument(skip(self), fields(url = %url))]
    pub fn load_silent_credential_required_portal_session(&mut self, url: &Url) {
        if self.is_loading() {
            debug!("portal session already loading");
            return;
        }
        self.begin_connect(url, ChallengeHandling::Suppressed, ConnectPurpose::Silent);
    }

    #[instrument(skip(self), fields(url = %url))]
    pub fn load_credential_required_portal_session(&mut self, url: &Url) {
        if self.is_loading() {
            debug!("portal session already loading");
            return;
        }
        self.begin_connect(url, ChallengeHandling::Interactive, ConnectPurpose::SignIn);
    }

    #[instrument(skip(self), fields(url = %url))]
    pub fn load_default_portal_session(&mut self, url: &Url) {
        if self.is_loading() {
            debug!("portal session already loading");
            return;
        }
        self.begin_anonymous(url, ConnectPurpose::Default);
    }

    /// Only acts while a load is still in progress.
    pub fn fallback_to_default_portal_session(&mut self, previous: SdkError) {
        let url = match &*self.status.borrow() {
            PortalSessionStatus::Loading(portal) => portal.url.clone(),
            _ => {
                debug!("no portal load in progress, skipping fallback");
                return;
            }
        };
        info!(error = %previous, "falling back to the default portal session");
        self.begin_anonymous(&url, ConnectPurpose::Fallback { previous });
    }

    fn take_in_flight(&mut self, id: u64, stage: Stage) -> Option<ConnectRequest> {
        match &self.in_flight {
            Some(f) if f.request.id == id && f.stage == stage => {
                self.in_flight.take().map(|f| f.request)
            }
            _ => {
                debug!(request = id, "ignoring stale portal callback");
                None
            }
        }
    }

    pub fn on_credentials_revoked(&mut self, request_id: u64) {
        let Some(request) = self.take_in_flight(request_id, Stage::Revoking) else {
            return;
        };
        self.outputs.push(PortalSessionOutput::Connect(request.clone()));
        self.in_flight = Some(InFlight {
            request,
            stage: Stage::Connecting,
        });
    }

    #[instrument(skip(self, result))]
    pub fn on_portal_connected(&mut self, request_id: u64, result: Result<Portal, SdkError>) {
        let Some(request) = self.take_in_flight(request_id, Stage::Connecting) else {
            return;
        };
        match (request.purpose, result) {
            (ConnectPurpose::Fallback { previous }, Ok(portal)) => {
                info!(url = %portal.url, "default portal session loaded after failed sign-in");
                self.set_status(PortalSessionStatus::Fallback(portal, previous));
            }
            (_, Ok(portal)) => {
                info!(url = %portal.url, authenticated = portal.is_authenticated(), "portal session loaded");
                self.set_status(PortalSessionStatus::Loaded(portal));
            }
            (ConnectPurpose::Silent, Err(e)) => {
                info!(error = %e, "silent sign-in unavailable, loading default session");
                self.begin_anonymous(&request.url, ConnectPurpose::Default);
            }
            (ConnectPurpose::SignIn, Err(e)) => {
                warn!(error = %e, "sign-in failed");
                self.fallback_to_default_portal_session(e);
            }
            (ConnectPurpose::Default | ConnectPurpose::Fallback { .. }, Err(e)) => {
                warn!(error = %e, "portal session failed");
                self.set_status(PortalSessionStatus::Failed(e));
            }
        }
    }
}
