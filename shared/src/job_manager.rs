//! Single-slot coordinator for long-running offline map jobs.
//!
//! The manager stages a job, hands it to the shell once started, relays the
//! job's message log and turns the shell's completion into exactly one
//! [`JobOutcome`]. At most one job exists at any time; a staged job counts.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::model::{
    AreaOfInterest, JobMessage, MapHandle, OfflineDirectory, PackageHandle, SdkError,
};
use crate::UnixTimeMs;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(Uuid);

impl JobId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Download,
    Sync,
}

impl JobType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Download => "download",
            Self::Sync => "sync",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum JobParameters {
    OnDemandDownload {
        map: MapHandle,
        area: AreaOfInterest,
        destination: OfflineDirectory,
    },
    /// Bidirectional: upload local edits, then pull server changes.
    Sync { map: MapHandle },
}

/// Single-use job token. Produced by staging, consumed by starting.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Job {
    id: JobId,
    parameters: JobParameters,
}

impl Job {
    fn new(parameters: JobParameters) -> Self {
        Self {
            id: JobId::generate(),
            parameters,
        }
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn parameters(&self) -> &JobParameters {
        &self.parameters
    }

    pub fn job_type(&self) -> JobType {
        match self.parameters {
            JobParameters::OnDemandDownload { .. } => JobType::Download,
            JobParameters::Sync { .. } => JobType::Sync,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Default)]
pub enum JobStatus {
    #[default]
    None,
    Staged(Job),
    Downloading(Job),
    Synchronizing(Job),
}

impl JobStatus {
    pub fn job(&self) -> Option<&Job> {
        match self {
            Self::None => None,
            Self::Staged(job) | Self::Downloading(job) | Self::Synchronizing(job) => Some(job),
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Downloading(_) | Self::Synchronizing(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Staged(_) => "staged",
            Self::Downloading(_) => "downloading",
            Self::Synchronizing(_) => "synchronizing",
        }
    }
}

/// What the shell reports when a job stops.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobOutput {
    Downloaded {
        package: PackageHandle,
        map: MapHandle,
    },
    Synchronized {
        requires_reopen: bool,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCompletion {
    pub result: Result<JobOutput, SdkError>,
    /// The job's full message log at completion.
    pub messages: Vec<JobMessage>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobOutcome {
    Downloaded {
        package: PackageHandle,
        map: MapHandle,
    },
    Synchronized {
        requires_reopen: bool,
    },
    Failed(SdkError),
}

#[derive(Clone, Debug, PartialEq)]
pub struct JobReport {
    pub job: Job,
    pub started_at: UnixTimeMs,
    pub outcome: JobOutcome,
    /// Messages not yet relayed before completion.
    pub final_messages: Vec<JobMessage>,
}

impl JobReport {
    pub fn is_success(&self) -> bool {
        !matches!(self.outcome, JobOutcome::Failed(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(&self.outcome, JobOutcome::Failed(e) if e.is_cancellation())
    }

    pub fn summary(&self) -> String {
        let noun = match self.job.job_type() {
            JobType::Download => "Download",
            JobType::Sync => "Sync",
        };
        match &self.outcome {
            JobOutcome::Failed(e) if e.is_cancellation() => format!("{noun} canceled"),
            JobOutcome::Failed(e) => format!("{noun} failed: {}", e.message),
            _ => format!("{noun} complete"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobManagerError {
    #[error("an offline map job is already in progress")]
    JobInProgress,

    #[error("no job is staged")]
    NoJobStaged,

    #[error("job {supplied} does not match staged job {staged}")]
    JobMismatch { staged: JobId, supplied: JobId },

    #[error("no job is running")]
    NoJobRunning,

    #[error("completion for {supplied} does not match running job {running}")]
    StaleCompletion { running: JobId, supplied: JobId },
}

#[derive(Debug)]
pub struct OfflineJobManager {
    status: watch::Sender<JobStatus>,
    started_at: Option<UnixTimeMs>,
    fraction_completed: f64,
    read_cursor: usize,
}

impl Default for OfflineJobManager {
    fn default() -> Self {
        Self::new()
    }
}

impl OfflineJobManager {
    pub fn new() -> Self {
        let (status, _) = watch::channel(JobStatus::None);
        Self {
            status,
            started_at: None,
            fraction_completed: 0.0,
            read_cursor: 0,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<JobStatus> {
        self.status.subscribe()
    }

    pub fn is_job_in_progress(&self) -> bool {
        !matches!(*self.status.borrow(), JobStatus::None)
    }

    pub fn fraction_completed(&self) -> f64 {
        self.fraction_completed
    }

    pub fn started_at(&self) -> Option<UnixTimeMs> {
        self.started_at
    }

    fn set_status(&mut self, status: JobStatus) {
        debug!(from = self.status.borrow().name(), to = status.name(), "job status");
        self.status.send_replace(status);
    }

    #[instrument(skip(self, area))]
    pub fn stage_on_demand_download_job(
        &mut self,
        map: MapHandle,
        area: AreaOfInterest,
        destination: OfflineDirectory,
    ) -> Result<Job, JobManagerError> {
        self.stage(JobParameters::OnDemandDownload {
            map,
            area,
            destination,
        })
    }

    #[instrument(skip(self))]
    pub fn stage_sync_job(&mut self, map: MapHandle) -> Result<Job, JobManagerError> {
        self.stage(JobParameters::Sync { map })
    }

    fn stage(&mut self, parameters: JobParameters) -> Result<Job, JobManagerError> {
        if self.is_job_in_progress() {
            warn!("rejecting stage request, job in progress");
            return Err(JobManagerError::JobInProgress);
        }
        let job = Job::new(parameters);
        info!(job_id = %job.id(), job_type = job.job_type().as_str(), "job staged");
        self.set_status(JobStatus::Staged(job.clone()));
        Ok(job)
    }

    /// Starts the staged job. The returned job is what the shell must run.
    #[instrument(skip(self, job), fields(job_id = %job.id()))]
    pub fn start_job(&mut self, job: Job, now: UnixTimeMs) -> Result<Job, JobManagerError> {
        let staged = match &*self.status.borrow() {
            JobStatus::Staged(staged) => staged.clone(),
            JobStatus::None => return Err(JobManagerError::NoJobStaged),
            JobStatus::Downloading(_) | JobStatus::Synchronizing(_) => {
                return Err(JobManagerError::JobInProgress)
            }
        };
        if staged.id != job.id {
            return Err(JobManagerError::JobMismatch {
                staged: staged.id,
                supplied: job.id,
            });
        }

        self.started_at = Some(now);
        self.fraction_completed = 0.0;
        self.read_cursor = 0;
        let status = match staged.job_type() {
            JobType::Download => JobStatus::Downloading(staged.clone()),
            JobType::Sync => JobStatus::Synchronizing(staged.clone()),
        };
        self.set_status(status);
        info!("job started");
        Ok(staged)
    }

    /// Drops a staged job that was never started.
    pub fn release_staged_job(&mut self, job_id: &JobId) -> bool {
        let matches = matches!(&*self.status.borrow(), JobStatus::Staged(job) if &job.id == job_id);
        if matches {
            info!(%job_id, "staged job released");
            self.set_status(JobStatus::None);
        }
        matches
    }

    /// Relays messages from the job's append-only log that have not been
    /// seen yet.
    pub fn record_progress(
        &mut self,
        job_id: &JobId,
        fraction_completed: f64,
        log: &[JobMessage],
    ) -> Vec<JobMessage> {
        if !self.is_running(job_id) {
            debug!(%job_id, "ignoring progress for inactive job");
            return Vec::new();
        }
        if fraction_completed.is_finite() {
            self.fraction_completed = fraction_completed.clamp(0.0, 1.0);
        }
        self.drain_log(log)
    }

    fn drain_log(&mut self, log: &[JobMessage]) -> Vec<JobMessage> {
        let unseen = log.get(self.read_cursor..).unwrap_or_default().to_vec();
        self.read_cursor = self.read_cursor.max(log.len());
        unseen
    }

    fn is_running(&self, job_id: &JobId) -> bool {
        let status = self.status.borrow();
        status.is_running() && status.job().is_some_and(|job| &job.id == job_id)
    }

    /// Settles the running job. Status returns to `None` whatever the
    /// outcome.
    #[instrument(skip(self, completion))]
    pub fn finish(
        &mut self,
        job_id: &JobId,
        completion: JobCompletion,
    ) -> Result<JobReport, JobManagerError> {
        let job = {
            let status = self.status.borrow();
            match (&*status, status.job()) {
                (s, Some(job)) if s.is_running() => job.clone(),
                _ => return Err(JobManagerError::NoJobRunning),
            }
        };
        if &job.id != job_id {
            return Err(JobManagerError::StaleCompletion {
                running: job.id,
                supplied: job_id.clone(),
            });
        }

        let final_messages = self.drain_log(&completion.messages);
        let outcome = match (job.job_type(), completion.result) {
            (JobType::Download, Ok(JobOutput::Downloaded { package, map })) => {
                JobOutcome::Downloaded { package, map }
            }
            (JobType::Sync, Ok(JobOutput::Synchronized { requires_reopen })) => {
                JobOutcome::Synchronized { requires_reopen }
            }
            (job_type, Ok(_)) => {
                JobOutcome::Failed(SdkError::unexpected_response(job_type.as_str()))
            }
            (_, Err(e)) => JobOutcome::Failed(e),
        };

        let started_at = self.started_at.take().unwrap_or(UnixTimeMs(0));
        self.fraction_completed = 0.0;
        self.read_cursor = 0;
        self.set_status(JobStatus::None);

        match &outcome {
            JobOutcome::Failed(e) => warn!(error = %e, "job failed"),
            _ => info!("job succeeded"),
        }

        Ok(JobReport {
            job,
            started_at,
            outcome,
            final_messages,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Envelope;
    use proptest::prelude::*;

    fn area() -> AreaOfInterest {
        AreaOfInterest::new(
            Envelope {
                xmin: 0.0,
                ymin: 0.0,
                xmax: 10.0,
                ymax: 10.0,
                wkid: 3857,
            },
            10_000.0,
        )
        .unwrap()
    }

    fn map() -> MapHandle {
        MapHandle::new("map-1")
    }

    fn stage_download(manager: &mut OfflineJobManager) -> Result<Job, JobManagerError> {
        manager.stage_on_demand_download_job(map(), area(), OfflineDirectory::temporary("item"))
    }

    fn downloaded() -> JobCompletion {
        JobCompletion {
            result: Ok(JobOutput::Downloaded {
                package: PackageHandle::new("pkg"),
                map: MapHandle::new("offline-map"),
            }),
            messages: vec![],
        }
    }

    #[test]
    fn test_stage_sets_staged_status() {
        let mut manager = OfflineJobManager::new();
        let job = stage_download(&mut manager).unwrap();
        assert_eq!(job.job_type(), JobType::Download);
        assert_eq!(manager.status(), JobStatus::Staged(job));
        assert!(manager.is_job_in_progress());
    }

    #[test]
    fn test_second_stage_is_rejected() {
        let mut manager = OfflineJobManager::new();
        stage_download(&mut manager).unwrap();
        assert_eq!(
            manager.stage_sync_job(map()),
            Err(JobManagerError::JobInProgress)
        );
    }

    #[test]
    fn test_start_requires_staged_job() {
        let mut manager = OfflineJobManager::new();
        let mut other = OfflineJobManager::new();
        let job = stage_download(&mut other).unwrap();
        assert_eq!(
            manager.start_job(job, UnixTimeMs(1)),
            Err(JobManagerError::NoJobStaged)
        );
    }

    #[test]
    fn test_start_rejects_mismatched_id() {
        let mut manager = OfflineJobManager::new();
        let mut other = OfflineJobManager::new();
        stage_download(&mut manager).unwrap();
        let foreign = stage_download(&mut other).unwrap();
        assert!(matches!(
            manager.start_job(foreign, UnixTimeMs(1)),
            Err(JobManagerError::JobMismatch { .. })
        ));
    }

    #[test]
    fn test_start_moves_to_downloading() {
        let mut manager = OfflineJobManager::new();
        let job = stage_download(&mut manager).unwrap();
        let running = manager.start_job(job.clone(), UnixTimeMs(42)).unwrap();
        assert_eq!(running, job);
        assert_eq!(manager.status(), JobStatus::Downloading(job));
        assert_eq!(manager.started_at(), Some(UnixTimeMs(42)));
    }

    #[test]
    fn test_stale_handle_rejected_after_completion() {
        let mut manager = OfflineJobManager::new();
        let job = stage_download(&mut manager).unwrap();
        let stale = job.clone();
        manager.start_job(job.clone(), UnixTimeMs(1)).unwrap();
        manager.finish(job.id(), downloaded()).unwrap();

        assert_eq!(manager.status(), JobStatus::None);
        assert_eq!(
            manager.start_job(stale, UnixTimeMs(2)),
            Err(JobManagerError::NoJobStaged)
        );
    }

    #[test]
    fn test_finish_resets_status_on_failure() {
        let mut manager = OfflineJobManager::new();
        let job = manager.stage_sync_job(map()).unwrap();
        manager.start_job(job.clone(), UnixTimeMs(1)).unwrap();
        assert!(matches!(manager.status(), JobStatus::Synchronizing(_)));

        let report = manager
            .finish(
                job.id(),
                JobCompletion {
                    result: Err(SdkError::cancelled()),
                    messages: vec![JobMessage::info("Canceled")],
                },
            )
            .unwrap();

        assert!(report.is_cancelled());
        assert_eq!(report.summary(), "Sync canceled");
        assert_eq!(report.final_messages, vec![JobMessage::info("Canceled")]);
        assert_eq!(manager.status(), JobStatus::None);
        assert!(!manager.is_job_in_progress());
    }

    #[test]
    fn test_mismatched_output_is_a_failure() {
        let mut manager = OfflineJobManager::new();
        let job = manager.stage_sync_job(map()).unwrap();
        manager.start_job(job.clone(), UnixTimeMs(1)).unwrap();
        let report = manager.finish(job.id(), downloaded()).unwrap();
        assert!(matches!(report.outcome, JobOutcome::Failed(_)));
    }

    #[test]
    fn test_finish_rejects_stale_completion() {
        let mut manager = OfflineJobManager::new();
        let job = stage_download(&mut manager).unwrap();
        assert_eq!(
            manager.finish(job.id(), downloaded()),
            Err(JobManagerError::NoJobRunning)
        );

        manager.start_job(job, UnixTimeMs(1)).unwrap();
        let stranger = JobId::generate();
        assert!(matches!(
            manager.finish(&stranger, downloaded()),
            Err(JobManagerError::StaleCompletion { .. })
        ));
        assert!(manager.is_job_in_progress());
    }

    #[test]
    fn test_progress_never_rereads_messages() {
        let mut manager = OfflineJobManager::new();
        let job = stage_download(&mut manager).unwrap();
        manager.start_job(job.clone(), UnixTimeMs(1)).unwrap();

        let mut log = vec![JobMessage::info("Preparing"), JobMessage::info("Packaging")];
        let first = manager.record_progress(job.id(), 0.25, &log);
        assert_eq!(first.len(), 2);

        log.push(JobMessage::info("Downloading"));
        let second = manager.record_progress(job.id(), 0.5, &log);
        assert_eq!(second, vec![JobMessage::info("Downloading")]);

        let repeat = manager.record_progress(job.id(), 0.5, &log);
        assert!(repeat.is_empty());
        assert_eq!(manager.fraction_completed(), 0.5);

        log.push(JobMessage::info("Done"));
        let report = manager
            .finish(
                job.id(),
                JobCompletion {
                    result: downloaded().result,
                    messages: log,
                },
            )
            .unwrap();
        assert_eq!(report.final_messages, vec![JobMessage::info("Done")]);
    }

    #[test]
    fn test_progress_for_staged_job_is_ignored() {
        let mut manager = OfflineJobManager::new();
        let job = stage_download(&mut manager).unwrap();
        let relayed = manager.record_progress(job.id(), 0.1, &[JobMessage::info("x")]);
        assert!(relayed.is_empty());
    }

    #[test]
    fn test_release_staged_job() {
        let mut manager = OfflineJobManager::new();
        let job = stage_download(&mut manager).unwrap();
        assert!(!manager.release_staged_job(&JobId::generate()));
        assert!(manager.release_staged_job(job.id()));
        assert!(!manager.is_job_in_progress());
        assert!(manager.stage_sync_job(map()).is_ok());
    }

    #[test]
    fn test_release_does_not_touch_running_job() {
        let mut manager = OfflineJobManager::new();
        let job = stage_download(&mut manager).unwrap();
        manager.start_job(job.clone(), UnixTimeMs(1)).unwrap();
        assert!(!manager.release_staged_job(job.id()));
        assert!(manager.is_job_in_progress());
    }

    #[test]
    fn test_subscribers_see_each_transition() {
        let mut manager = OfflineJobManager::new();
        let mut rx = manager.subscribe();
        let job = stage_download(&mut manager).unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), JobStatus::Staged(job.clone()));

        manager.start_job(job, UnixTimeMs(1)).unwrap();
        assert!(rx.has_changed().unwrap());
        assert!(matches!(*rx.borrow_and_update(), JobStatus::Downloading(_)));
    }

    #[derive(Debug, Clone)]
    enum Op {
        StageDownload,
        StageSync,
        StartStaged,
        Finish,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            Just(Op::StageDownload),
            Just(Op::StageSync),
            Just(Op::StartStaged),
            Just(Op::Finish),
        ]
    }

    proptest! {
        #[test]
        fn prop_at_most_one_stage_between_terminal_callbacks(ops in prop::collection::vec(op(), 1..60)) {
            let mut manager = OfflineJobManager::new();
            let mut successful_stages = 0usize;

            for op in ops {
                match op {
                    Op::StageDownload | Op::StageSync => {
                        let was_idle = !manager.is_job_in_progress();
                        let result = match op {
                            Op::StageDownload => stage_download(&mut manager),
                            _ => manager.stage_sync_job(map()),
                        };
                        if was_idle {
                            prop_assert!(result.is_ok());
                            successful_stages += 1;
                        } else {
                            prop_assert_eq!(result, Err(JobManagerError::JobInProgress));
                        }
                        prop_assert!(successful_stages <= 1);
                    }
                    Op::StartStaged => {
                        if let JobStatus::Staged(job) = manager.status() {
                            prop_assert!(manager.start_job(job, UnixTimeMs(1)).is_ok());
                        }
                    }
                    Op::Finish => {
                        let running = manager.status().job().cloned().filter(|_| manager.status().is_running());
                        if let Some(job) = running {
                            let report = manager.finish(job.id(), JobCompletion {
                                result: Err(SdkError::cancelled()),
                                messages: vec![],
                            });
                            prop_assert!(report.is_ok());
                            prop_assert!(!manager.is_job_in_progress());
                            successful_stages = 0;
                        }
                    }
                }
            }
        }
    }
}
