//! Work-mode coordinator.
//!
//! `AppContext` owns the portal session and offline map managers, reacts to
//! their status changes, and turns everything that needs the outside world
//! into [`Command`]s. The Crux layer drains those after each event.

use std::collections::VecDeque;

use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::capabilities::ChangeNotice;
use crate::config::CoreConfig;
use crate::job_manager::{Job, JobCompletion, JobId, JobManagerError, JobReport, JobStatus, JobType};
use crate::model::{
    AreaOfInterest, JobMessage, MapHandle, OfflineDirectory, PackageContents, Portal, SdkError,
};
use crate::offline_map::{OfflineMapError, OfflineMapManager, OfflineMapOutput, OfflineMapStatus};
use crate::persistence::{PersistedKey, PersistedValue};
use crate::portal_session::{
    ConnectRequest, PortalSessionManager, PortalSessionOutput, PortalSessionStatus,
};
use crate::work_mode::{LocatorConfig, WorkMode, WorkModeError, WorkModeKind};
use crate::{AppError, AppResult, ErrorKind, UnixTimeMs};

/// Side effects requested by the context.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Connect(ConnectRequest),
    RevokeCredentials(ConnectRequest),
    LoadOnlineMap {
        portal_url: Url,
        item_id: String,
        request: u64,
    },
    InspectDirectory(OfflineDirectory),
    OpenPackage(OfflineDirectory),
    ResetDirectory(OfflineDirectory),
    DeleteDirectory(OfflineDirectory),
    PromoteDirectory {
        from: OfflineDirectory,
        to: OfflineDirectory,
    },
    RunJob(Job),
    CancelJob(JobId),
    CheckLocalEdits {
        map: MapHandle,
        since: Option<UnixTimeMs>,
    },
    ReadSetting(PersistedKey),
    Persist(PersistedValue),
    Broadcast(ChangeNotice),
}

#[derive(Debug)]
pub struct AppContext {
    config: CoreConfig,
    work_mode: watch::Sender<WorkMode>,
    portal_session: PortalSessionManager,
    offline_map: OfflineMapManager,
    locator: LocatorConfig,
    alert: Option<AppError>,
    job_log: VecDeque<JobMessage>,
    last_job_summary: Option<String>,
    has_local_edits: Option<bool>,
    online_map_request: u64,
    commands: Vec<Command>,
}

impl Default for AppContext {
    fn default() -> Self {
        Self::new(CoreConfig::default())
    }
}

impl AppContext {
    /// An invalid config is replaced by the defaults and reported as an alert.
    pub fn new(config: CoreConfig) -> Self {
        let (config, alert) = match config.validate() {
            Ok(()) => (config, None),
            Err(e) => {
                warn!(error = %e, "invalid configuration, using defaults");
                (CoreConfig::default(), Some(AppError::from(e)))
            }
        };
        let (work_mode, _) = watch::channel(WorkMode::None);
        Self {
            offline_map: OfflineMapManager::new(config.web_map_item_id.clone()),
            config,
            work_mode,
            portal_session: PortalSessionManager::new(),
            locator: LocatorConfig::None,
            alert,
            job_log: VecDeque::new(),
            last_job_summary: None,
            has_local_edits: None,
            online_map_request: 0,
            commands: Vec::new(),
        }
    }

    // --- Accessors ---

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn work_mode(&self) -> WorkMode {
        self.work_mode.borrow().clone()
    }

    pub fn subscribe_work_mode(&self) -> watch::Receiver<WorkMode> {
        self.work_mode.subscribe()
    }

    pub fn portal_session(&self) -> &PortalSessionManager {
        &self.portal_session
    }

    pub fn offline_map(&self) -> &OfflineMapManager {
        &self.offline_map
    }

    pub fn locator(&self) -> &LocatorConfig {
        &self.locator
    }

    pub fn alert(&self) -> Option<&AppError> {
        self.alert.as_ref()
    }

    pub fn job_log(&self) -> impl Iterator<Item = &JobMessage> {
        self.job_log.iter()
    }

    pub fn last_job_summary(&self) -> Option<&str> {
        self.last_job_summary.as_deref()
    }

    pub fn has_local_edits(&self) -> Option<bool> {
        self.has_local_edits
    }

    /// Id of the most recent web map load; older answers are dropped.
    pub fn online_map_request(&self) -> u64 {
        self.online_map_request
    }

    pub fn drain_commands(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.commands)
    }

    // --- Alerts ---

    pub fn raise_alert(&mut self, alert: AppError) {
        warn!(code = alert.code(), message = %alert.message, "alert");
        self.alert = Some(alert);
    }

    pub fn dismiss_alert(&mut self) {
        self.alert = None;
    }

    // --- Launch ---

    /// Starts restoring persisted state. The work mode is read once the
    /// portal session load has started.
    #[instrument(skip(self))]
    pub fn launch(&mut self) {
        self.commands
            .push(Command::ReadSetting(PersistedKey::PortalSessionUrl));
        self.commands
            .push(Command::ReadSetting(PersistedKey::LastOfflineSync));
        self.offline_map.load_offline_mobile_map_package();
        self.pump();
    }

    pub fn on_portal_url_restored(&mut self, url: Option<Url>) {
        match url {
            Some(url) => {
                info!(%url, "restoring portal session");
                self.portal_session
                    .load_silent_credential_required_portal_session(&url);
            }
            None => {
                if let Some(url) = self.default_portal_url() {
                    self.portal_session.load_default_portal_session(&url);
                }
            }
        }
        self.pump();
        self.commands.push(Command::ReadSetting(PersistedKey::WorkMode));
    }

    pub fn on_last_sync_restored(&mut self, last_sync: Option<UnixTimeMs>) {
        self.offline_map.restore_last_sync(last_sync);
    }

    /// Restores the mode without a map; the map arrives when its manager
    /// settles.
    pub fn on_work_mode_restored(&mut self, kind: WorkModeKind) {
        info!(mode = kind.as_str(), "restoring work mode");
        match kind {
            WorkModeKind::None => {}
            WorkModeKind::Online => self.set_work_mode_online(),
            WorkModeKind::Offline => {
                self.set_work_mode(WorkMode::Offline(None));
                match self.offline_map.status() {
                    OfflineMapStatus::Loaded(_, map) => {
                        self.set_work_mode(WorkMode::Offline(Some(map)));
                    }
                    OfflineMapStatus::None | OfflineMapStatus::Failed(_) => {
                        self.set_work_mode_online();
                    }
                    OfflineMapStatus::Loading(_) => {}
                }
            }
        }
        self.pump();
    }

    // --- Work mode ---

    fn set_work_mode(&mut self, mode: WorkMode) {
        debug!(?mode, "work mode");
        let kind = mode.kind();
        self.work_mode.send_replace(mode);
        self.commands
            .push(Command::Persist(PersistedValue::WorkMode(kind)));
        self.update_locator();
        self.commands
            .push(Command::Broadcast(ChangeNotice::WorkModeChanged(kind)));
    }

    fn update_locator(&mut self) {
        let portal_status = self.portal_session.status();
        let Ok(geocoder_url) = self.config.geocoder_url() else {
            self.locator = LocatorConfig::None;
            return;
        };
        self.locator =
            LocatorConfig::derive(&self.work_mode.borrow(), portal_status.portal(), &geocoder_url);
    }

    fn default_portal_url(&mut self) -> Option<Url> {
        match self.config.portal_url() {
            Ok(url) => Some(url),
            Err(e) => {
                self.raise_alert(AppError::from(e));
                None
            }
        }
    }

    #[instrument(skip(self))]
    pub fn set_work_mode_online(&mut self) {
        match self.portal_session.status() {
            PortalSessionStatus::None | PortalSessionStatus::Failed(_) => {
                self.set_work_mode(WorkMode::None);
            }
            PortalSessionStatus::Loading(_) => self.set_work_mode(WorkMode::Online(None)),
            PortalSessionStatus::Loaded(portal) | PortalSessionStatus::Fallback(portal, _) => {
                self.set_work_mode(WorkMode::Online(None));
                self.load_online_map(&portal);
            }
        }
        self.pump();
    }

    #[instrument(skip(self))]
    pub fn set_work_mode_offline(&mut self) -> Result<(), WorkModeError> {
        match self.offline_map.status() {
            OfflineMapStatus::None | OfflineMapStatus::Failed(_) => {
                return Err(WorkModeError::MissingOfflineMap);
            }
            OfflineMapStatus::Loading(_) => self.set_work_mode(WorkMode::Offline(None)),
            OfflineMapStatus::Loaded(_, map) => self.set_work_mode(WorkMode::Offline(Some(map))),
        }
        self.pump();
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn delete_offline_map_and_attempt_to_go_online(&mut self) {
        self.offline_map.delete_offline_map();
        self.has_local_edits = None;
        if self.portal_session.status().portal().is_some() {
            self.set_work_mode_online();
        } else {
            if let Some(url) = self.default_portal_url() {
                self.portal_session
                    .load_silent_credential_required_portal_session(&url);
            }
            self.set_work_mode(WorkMode::Online(None));
        }
        self.pump();
    }

    fn load_online_map(&mut self, portal: &Portal) {
        self.online_map_request += 1;
        self.commands.push(Command::LoadOnlineMap {
            portal_url: portal.url.clone(),
            item_id: self.config.web_map_item_id.clone(),
            request: self.online_map_request,
        });
    }

    pub fn on_online_map_loaded(&mut self, request: u64, result: Result<MapHandle, SdkError>) {
        if request != self.online_map_request || !self.work_mode.borrow().is_online() {
            debug!(request, "ignoring superseded web map load");
            return;
        }
        match result {
            Ok(map) => {
                info!(%map, "online map loaded");
                self.set_work_mode(WorkMode::Online(Some(map)));
            }
            Err(e) => {
                warn!(error = %e, "failed to load online map");
                self.raise_alert(AppError::from(e));
            }
        }
    }

    // --- Portal session ---

    pub fn sign_in(&mut self, url: Option<Url>) {
        let Some(url) = url.or_else(|| self.default_portal_url()) else {
            return;
        };
        self.portal_session
            .load_credential_required_portal_session(&url);
        self.pump();
    }

    pub fn sign_out(&mut self) {
        if let Some(url) = self.default_portal_url() {
            self.portal_session.load_default_portal_session(&url);
        }
        self.pump();
    }

    pub fn on_credentials_revoked(&mut self, request_id: u64) {
        self.portal_session.on_credentials_revoked(request_id);
        self.pump();
    }

    pub fn on_portal_connected(&mut self, request_id: u64, result: Result<Portal, SdkError>) {
        self.portal_session.on_portal_connected(request_id, result);
        self.pump();
    }

    // --- Offline map and jobs ---

    pub fn on_directory_inspected(&mut self, result: Result<bool, SdkError>) {
        self.offline_map.on_directory_inspected(result);
        self.pump();
    }

    pub fn on_package_opened(&mut self, result: Result<PackageContents, SdkError>) {
        self.offline_map.on_package_opened(result);
        self.pump();
    }

    pub fn on_directory_reset(&mut self, result: Result<(), SdkError>) {
        if let Err(e) = result {
            warn!(error = %e, "failed to reset temporary directory");
        }
    }

    pub fn on_directory_deleted(&mut self, directory: &OfflineDirectory, result: Result<(), SdkError>) {
        self.offline_map.on_directory_deleted(directory, result);
        self.pump();
    }

    pub fn on_directory_promoted(&mut self, result: Result<(), SdkError>, now: UnixTimeMs) {
        self.offline_map.on_directory_promoted(result, now);
        self.pump();
    }

    /// Stages a download of `map`, or of the current online map.
    pub fn stage_download(&mut self, map: Option<MapHandle>, area: AreaOfInterest) -> AppResult<Job> {
        let current = match &*self.work_mode.borrow() {
            WorkMode::Online(map) => map.clone(),
            _ => None,
        };
        let map = map
            .or(current)
            .ok_or_else(|| AppError::new(ErrorKind::InvalidState, "No online map to download."))?;
        let job = self.offline_map.stage_on_demand_download_map_job(map, area)?;
        self.pump();
        Ok(job)
    }

    pub fn stage_sync(&mut self) -> AppResult<Job> {
        let job = self.offline_map.stage_sync_map_job()?;
        self.pump();
        Ok(job)
    }

    pub fn start_job(&mut self, job_id: &JobId, now: UnixTimeMs) -> AppResult<()> {
        let job = match self.offline_map.job_status() {
            JobStatus::Staged(job) if job.id() == job_id => job,
            JobStatus::Staged(job) => {
                return Err(JobManagerError::JobMismatch {
                    staged: job.id().clone(),
                    supplied: job_id.clone(),
                }
                .into());
            }
            _ => return Err(JobManagerError::NoJobStaged.into()),
        };
        self.offline_map.start_job(job, now)?;
        self.job_log.clear();
        self.last_job_summary = None;
        self.pump();
        Ok(())
    }

    pub fn release_staged_job(&mut self, job_id: &JobId) -> bool {
        self.offline_map.release_staged_job(job_id)
    }

    pub fn cancel_job(&mut self) -> AppResult<()> {
        self.offline_map.cancel_job()?;
        self.pump();
        Ok(())
    }

    pub fn on_job_progress(&mut self, job_id: &JobId, fraction_completed: f64, log: &[JobMessage]) {
        self.offline_map
            .on_job_progress(job_id, fraction_completed, log);
        self.pump();
    }

    pub fn on_job_completed(&mut self, job_id: &JobId, completion: JobCompletion, now: UnixTimeMs) {
        self.offline_map.on_job_completed(job_id, completion, now);
        self.pump();
    }

    pub fn check_local_edits(&mut self) -> AppResult<()> {
        let map = self
            .offline_map
            .status()
            .map()
            .cloned()
            .ok_or(OfflineMapError::MissingOfflineMap)?;
        self.commands.push(Command::CheckLocalEdits {
            map,
            since: self.offline_map.last_sync(),
        });
        Ok(())
    }

    pub fn on_local_edits_checked(&mut self, result: Result<bool, SdkError>) {
        match result {
            Ok(has_edits) => self.has_local_edits = Some(has_edits),
            Err(e) => {
                warn!(error = %e, "local edits check failed");
                self.has_local_edits = None;
            }
        }
    }

    // --- Output routing ---

    fn pump(&mut self) {
        loop {
            let portal = self.portal_session.drain_outputs();
            let offline = self.offline_map.drain_outputs();
            if portal.is_empty() && offline.is_empty() {
                break;
            }
            for output in portal {
                self.handle_portal_output(output);
            }
            // Failures reported with a job result surface through the job log.
            let job_finished = offline
                .iter()
                .any(|o| matches!(o, OfflineMapOutput::JobFinished(_)));
            for output in offline {
                self.handle_offline_output(output, !job_finished);
            }
        }
    }

    fn handle_portal_output(&mut self, output: PortalSessionOutput) {
        match output {
            PortalSessionOutput::RevokeCredentials(request) => {
                self.commands.push(Command::RevokeCredentials(request));
            }
            PortalSessionOutput::Connect(request) => self.commands.push(Command::Connect(request)),
            PortalSessionOutput::PersistPortalUrl(url) => self
                .commands
                .push(Command::Persist(PersistedValue::PortalSessionUrl(url))),
            PortalSessionOutput::StatusChanged(status) => self.on_portal_status_changed(status),
        }
    }

    fn on_portal_status_changed(&mut self, status: PortalSessionStatus) {
        self.update_locator();
        self.commands
            .push(Command::Broadcast(ChangeNotice::PortalChanged {
                status: status.name().to_string(),
            }));

        if let PortalSessionStatus::Fallback(_, previous) = &status {
            if !previous.is_cancellation() {
                self.raise_alert(
                    AppError::new(ErrorKind::Authentication, previous.message.clone())
                        .with_internal(format!("{}:{}", previous.domain, previous.code)),
                );
            }
        }

        if !self.work_mode.borrow().is_online() {
            return;
        }
        match status {
            PortalSessionStatus::Loaded(portal) | PortalSessionStatus::Fallback(portal, _) => {
                self.set_work_mode(WorkMode::Online(None));
                self.load_online_map(&portal);
            }
            PortalSessionStatus::Failed(e) => {
                self.set_work_mode(WorkMode::Online(None));
                self.raise_alert(AppError::from(e));
            }
            PortalSessionStatus::None | PortalSessionStatus::Loading(_) => {}
        }
    }

    fn handle_offline_output(&mut self, output: OfflineMapOutput, alert_failures: bool) {
        match output {
            OfflineMapOutput::InspectDirectory(dir) => {
                self.commands.push(Command::InspectDirectory(dir));
            }
            OfflineMapOutput::OpenPackage(dir) => self.commands.push(Command::OpenPackage(dir)),
            OfflineMapOutput::ResetDirectory(dir) => {
                self.commands.push(Command::ResetDirectory(dir));
            }
            OfflineMapOutput::DeleteDirectory(dir) => {
                self.commands.push(Command::DeleteDirectory(dir));
            }
            OfflineMapOutput::PromoteDirectory { from, to } => {
                self.commands.push(Command::PromoteDirectory { from, to });
            }
            OfflineMapOutput::RunJob(job) => self.commands.push(Command::RunJob(job)),
            OfflineMapOutput::CancelJob(id) => self.commands.push(Command::CancelJob(id)),
            OfflineMapOutput::LastSyncChanged(last_sync) => self
                .commands
                .push(Command::Persist(PersistedValue::LastOfflineSync(last_sync))),
            OfflineMapOutput::StatusChanged(status) => {
                self.on_offline_status_changed(status, alert_failures);
            }
            OfflineMapOutput::JobMessages { messages, .. } => self.append_job_messages(messages),
            OfflineMapOutput::JobFinished(report) => self.on_job_finished(&report),
        }
    }

    fn on_offline_status_changed(&mut self, status: OfflineMapStatus, alert_failures: bool) {
        self.commands
            .push(Command::Broadcast(ChangeNotice::OfflineMapChanged {
                status: status.name().to_string(),
            }));

        if let OfflineMapStatus::Failed(e) = &status {
            if alert_failures {
                self.raise_alert(AppError::from(e.clone()));
            }
        }

        if !self.work_mode.borrow().is_offline() {
            return;
        }
        match status {
            OfflineMapStatus::Loaded(_, map) => {
                if self.work_mode.borrow().map() != Some(&map) {
                    self.set_work_mode(WorkMode::Offline(Some(map)));
                }
            }
            OfflineMapStatus::Failed(_) => {
                if self.work_mode.borrow().map().is_some() {
                    self.set_work_mode(WorkMode::Offline(None));
                }
            }
            OfflineMapStatus::None => {
                info!("offline map gone, going online");
                self.set_work_mode_online();
            }
            OfflineMapStatus::Loading(_) => {}
        }
    }

    fn append_job_messages(&mut self, messages: Vec<JobMessage>) {
        self.job_log.extend(messages);
        let overflow = self
            .job_log
            .len()
            .saturating_sub(self.config.max_job_log_messages);
        self.job_log.drain(..overflow);
    }

    fn on_job_finished(&mut self, report: &JobReport) {
        let job_type = report.job.job_type();
        info!(
            job_id = %report.job.id(),
            job_type = job_type.as_str(),
            success = report.is_success(),
            "job finished"
        );
        self.last_job_summary = Some(report.summary());
        self.commands
            .push(Command::Broadcast(ChangeNotice::JobFinished {
                job_id: report.job.id().clone(),
                job_type,
                succeeded: report.is_success(),
                cancelled: report.is_cancelled(),
            }));

        if !report.is_success() {
            return;
        }
        match job_type {
            JobType::Download => {
                self.set_work_mode(WorkMode::Offline(None));
                self.offline_map.load_offline_mobile_map_package();
            }
            JobType::Sync => self.has_local_edits = Some(false),
        }
    }
}
