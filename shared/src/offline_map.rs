//! Owner of the on-disk offline map package and its state machine.
//!
//! All I/O is requested through [`OfflineMapOutput`]s which the owner drains
//! after every call and routes to the shell; the shell's answers come back
//! through the `on_*` methods.

use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::job_manager::{
    Job, JobCompletion, JobId, JobManagerError, JobOutcome, JobReport, JobStatus, JobType,
    OfflineJobManager,
};
use crate::model::{
    AreaOfInterest, DirectoryKind, JobMessage, MapHandle, OfflineDirectory, PackageContents,
    PackageHandle, SdkError,
};
use crate::UnixTimeMs;

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum OfflineMapStatus {
    #[default]
    None,
    Loading(OfflineDirectory),
    Loaded(PackageHandle, MapHandle),
    Failed(SdkError),
}

impl OfflineMapStatus {
    pub fn map(&self) -> Option<&MapHandle> {
        match self {
            Self::Loaded(_, map) => Some(map),
            _ => None,
        }
    }

    pub fn has_offline_map(&self) -> bool {
        !matches!(self, Self::None | Self::Failed(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Loading(_) => "loading",
            Self::Loaded(..) => "loaded",
            Self::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OfflineMapError {
    #[error("an offline map already exists")]
    OfflineMapExists,

    #[error("there is no loaded offline map")]
    MissingOfflineMap,

    #[error(transparent)]
    Job(#[from] JobManagerError),
}

/// Requests and notifications produced by the manager.
#[derive(Clone, Debug, PartialEq)]
pub enum OfflineMapOutput {
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
    LastSyncChanged(Option<UnixTimeMs>),
    StatusChanged(OfflineMapStatus),
    JobMessages {
        job_id: JobId,
        messages: Vec<JobMessage>,
    },
    JobFinished(JobReport),
}

#[derive(Debug)]
pub struct OfflineMapManager {
    item_id: String,
    status: watch::Sender<OfflineMapStatus>,
    last_sync: Option<UnixTimeMs>,
    jobs: OfflineJobManager,
    awaiting_promotion: Option<JobReport>,
    outputs: Vec<OfflineMapOutput>,
}

impl OfflineMapManager {
    pub fn new(item_id: impl Into<String>) -> Self {
        let (status, _) = watch::channel(OfflineMapStatus::None);
        Self {
            item_id: item_id.into(),
            status,
            last_sync: None,
            jobs: OfflineJobManager::new(),
            awaiting_promotion: None,
            outputs: Vec::new(),
        }
    }

    pub fn status(&self) -> OfflineMapStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<OfflineMapStatus> {
        self.status.subscribe()
    }

    pub fn last_sync(&self) -> Option<UnixTimeMs> {
        self.last_sync
    }

    pub fn job_manager(&self) -> &OfflineJobManager {
        &self.jobs
    }

    pub fn job_status(&self) -> JobStatus {
        self.jobs.status()
    }

    pub fn drain_outputs(&mut self) -> Vec<OfflineMapOutput> {
        std::mem::take(&mut self.outputs)
    }

    fn permanent(&self) -> OfflineDirectory {
        OfflineDirectory::permanent(self.item_id.clone())
    }

    fn temporary(&self) -> OfflineDirectory {
        OfflineDirectory::temporary(self.item_id.clone())
    }

    fn set_status(&mut self, status: OfflineMapStatus) {
        debug!(from = self.status.borrow().name(), to = status.name(), "offline map status");
        self.status.send_replace(status.clone());
        self.outputs.push(OfflineMapOutput::StatusChanged(status));
    }

    fn set_last_sync(&mut self, last_sync: Option<UnixTimeMs>) {
        self.last_sync = last_sync;
        self.outputs.push(OfflineMapOutput::LastSyncChanged(last_sync));
    }

    fn fail(&mut self, error: SdkError) {
        self.set_status(OfflineMapStatus::Failed(error));
        self.set_last_sync(None);
    }

    /// Value read back from storage at launch; not re-persisted.
    pub fn restore_last_sync(&mut self, last_sync: Option<UnixTimeMs>) {
        self.last_sync = last_sync;
    }

    #[instrument(skip(self))]
    pub fn load_offline_mobile_map_package(&mut self) {
        if matches!(*self.status.borrow(), OfflineMapStatus::Loading(_)) {
            debug!("offline package already loading");
            return;
        }
        let directory = self.permanent();
        self.set_status(OfflineMapStatus::Loading(directory.clone()));
        self.outputs.push(OfflineMapOutput::InspectDirectory(directory));
    }

    pub fn on_directory_inspected(&mut self, result: Result<bool, SdkError>) {
        if !matches!(*self.status.borrow(), OfflineMapStatus::Loading(_)) {
            debug!("ignoring directory inspection outside of loading");
            return;
        }
        match result {
            Ok(true) => {
                let directory = self.permanent();
                self.outputs.push(OfflineMapOutput::OpenPackage(directory));
            }
            Ok(false) => {
                info!("no offline map on disk");
                self.set_status(OfflineMapStatus::None);
            }
            Err(e) => {
                warn!(error = %e, "offline directory inspection failed");
                self.set_status(OfflineMapStatus::Failed(e));
            }
        }
    }

    pub fn on_package_opened(&mut self, result: Result<PackageContents, SdkError>) {
        if !matches!(*self.status.borrow(), OfflineMapStatus::Loading(_)) {
            debug!("ignoring package open outside of loading");
            return;
        }
        match result {
            Ok(PackageContents { package, maps }) => match maps.into_iter().next() {
                Some(map) => {
                    info!(%package, %map, "offline map loaded");
                    self.set_status(OfflineMapStatus::Loaded(package, map));
                }
                None => {
                    warn!(%package, "offline package contains no maps");
                    self.set_status(OfflineMapStatus::None);
                }
            },
            Err(e) => {
                warn!(error = %e, "failed to open offline package");
                self.set_status(OfflineMapStatus::Failed(e));
            }
        }
    }

    #[instrument(skip(self))]
    pub fn delete_offline_map(&mut self) {
        self.set_last_sync(None);
        let directory = self.permanent();
        self.outputs.push(OfflineMapOutput::DeleteDirectory(directory));
    }

    pub fn on_directory_deleted(&mut self, directory: &OfflineDirectory, result: Result<(), SdkError>) {
        match (directory.kind, result) {
            (DirectoryKind::Temporary, Ok(())) => debug!("temporary directory discarded"),
            (DirectoryKind::Temporary, Err(e)) => {
                warn!(error = %e, "failed to discard temporary directory");
            }
            (DirectoryKind::Permanent, Ok(())) => {
                info!("offline map deleted");
                self.set_status(OfflineMapStatus::None);
            }
            (DirectoryKind::Permanent, Err(e)) => {
                warn!(error = %e, "failed to delete offline map");
                self.set_status(OfflineMapStatus::Failed(e));
            }
        }
    }

    /// A finished download still waiting on promotion owns the temporary
    /// directory, so it blocks the next download like a running job.
    fn ensure_can_download(&self) -> Result<(), OfflineMapError> {
        if self.awaiting_promotion.is_some() {
            return Err(JobManagerError::JobInProgress.into());
        }
        if self.status.borrow().has_offline_map() {
            return Err(OfflineMapError::OfflineMapExists);
        }
        Ok(())
    }

    fn loaded_map(&self) -> Result<MapHandle, OfflineMapError> {
        self.status
            .borrow()
            .map()
            .cloned()
            .ok_or(OfflineMapError::MissingOfflineMap)
    }

    #[instrument(skip(self, area))]
    pub fn stage_on_demand_download_map_job(
        &mut self,
        map: MapHandle,
        area: AreaOfInterest,
    ) -> Result<Job, OfflineMapError> {
        self.ensure_can_download()?;
        let destination = self.temporary();
        let job = self
            .jobs
            .stage_on_demand_download_job(map, area, destination.clone())?;
        self.outputs.push(OfflineMapOutput::ResetDirectory(destination));
        Ok(job)
    }

    #[instrument(skip(self))]
    pub fn stage_sync_map_job(&mut self) -> Result<Job, OfflineMapError> {
        let map = self.loaded_map()?;
        Ok(self.jobs.stage_sync_job(map)?)
    }

    /// Eligibility is checked again here since the map may have changed
    /// since the job was staged.
    #[instrument(skip(self, job), fields(job_id = %job.id()))]
    pub fn start_job(&mut self, job: Job, now: UnixTimeMs) -> Result<(), OfflineMapError> {
        match job.job_type() {
            JobType::Download => self.ensure_can_download()?,
            JobType::Sync => {
                self.loaded_map()?;
            }
        }
        let job = self.jobs.start_job(job, now)?;
        self.outputs.push(OfflineMapOutput::RunJob(job));
        Ok(())
    }

    pub fn release_staged_job(&mut self, job_id: &JobId) -> bool {
        self.jobs.release_staged_job(job_id)
    }

    pub fn cancel_job(&mut self) -> Result<(), OfflineMapError> {
        let status = self.jobs.status();
        match status.job() {
            Some(job) if status.is_running() => {
                info!(job_id = %job.id(), "cancelling job");
                self.outputs.push(OfflineMapOutput::CancelJob(job.id().clone()));
                Ok(())
            }
            _ => Err(OfflineMapError::Job(JobManagerError::NoJobRunning)),
        }
    }

    pub fn on_job_progress(&mut self, job_id: &JobId, fraction_completed: f64, log: &[JobMessage]) {
        let messages = self.jobs.record_progress(job_id, fraction_completed, log);
        if !messages.is_empty() {
            self.outputs.push(OfflineMapOutput::JobMessages {
                job_id: job_id.clone(),
                messages,
            });
        }
    }

    #[instrument(skip(self, completion))]
    pub fn on_job_completed(&mut self, job_id: &JobId, completion: JobCompletion, now: UnixTimeMs) {
        let report = match self.jobs.finish(job_id, completion) {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "ignoring job completion");
                return;
            }
        };
        if !report.final_messages.is_empty() {
            self.outputs.push(OfflineMapOutput::JobMessages {
                job_id: job_id.clone(),
                messages: report.final_messages.clone(),
            });
        }

        match report.outcome.clone() {
            JobOutcome::Downloaded { .. } => {
                self.outputs.push(OfflineMapOutput::PromoteDirectory {
                    from: self.temporary(),
                    to: self.permanent(),
                });
                self.awaiting_promotion = Some(report);
            }
            JobOutcome::Synchronized { requires_reopen } => {
                self.set_last_sync(Some(now));
                self.outputs.push(OfflineMapOutput::JobFinished(report));
                if requires_reopen {
                    info!("sync requires the package to be reopened");
                    self.load_offline_mobile_map_package();
                }
            }
            JobOutcome::Failed(e) => {
                if report.job.job_type() == JobType::Download {
                    let temporary = self.temporary();
                    self.outputs.push(OfflineMapOutput::DeleteDirectory(temporary));
                }
                self.fail(e);
                self.outputs.push(OfflineMapOutput::JobFinished(report));
            }
        }
    }

    pub fn on_directory_promoted(&mut self, result: Result<(), SdkError>, now: UnixTimeMs) {
        let Some(mut report) = self.awaiting_promotion.take() else {
            warn!("directory promotion without a finished download");
            return;
        };
        match (result, report.outcome.clone()) {
            (Ok(()), JobOutcome::Downloaded { package, map }) => {
                info!("downloaded offline map promoted");
                self.set_status(OfflineMapStatus::Loaded(package, map));
                self.set_last_sync(Some(now));
            }
            (Ok(()), _) => warn!("promotion completed for a job that did not download"),
            (Err(e), _) => {
                warn!(error = %e, "failed to promote downloaded offline map");
                let temporary = self.temporary();
                self.outputs.push(OfflineMapOutput::DeleteDirectory(temporary));
                self.fail(e.clone());
                report.outcome = JobOutcome::Failed(e);
            }
        }
        self.outputs.push(OfflineMapOutput::JobFinished(report));
    }
}
