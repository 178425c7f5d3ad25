use crux_core::capability::{Capability, CapabilityContext, Operation};
use serde::{Deserialize, Serialize};

use crate::job_manager::{Job, JobCompletion, JobId};
use crate::model::SdkError;

/// Runs a started job to completion. Progress is reported separately by the
/// shell as `Event::JobProgressed`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum OfflineJobOperation {
    Run(Job),
    Cancel(JobId),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum OfflineJobOutput {
    Completed(JobCompletion),
    CancelRequested,
}

impl Operation for OfflineJobOperation {
    type Output = OfflineJobOutput;
}

pub struct OfflineJobs<E> {
    context: CapabilityContext<OfflineJobOperation, E>,
}

impl<Ev> Capability<Ev> for OfflineJobs<Ev> {
    type Operation = OfflineJobOperation;
    type MappedSelf<MappedEv> = OfflineJobs<MappedEv>;

    fn map_event<F, NewEv>(&self, f: F) -> Self::MappedSelf<NewEv>
    where
        F: Fn(NewEv) -> Ev + Send + Sync + 'static,
        Ev: 'static,
        NewEv: 'static + Send,
    {
        OfflineJobs::new(self.context.map_event(f))
    }
}

impl<E> OfflineJobs<E>
where
    E: 'static,
{
    pub fn new(context: CapabilityContext<OfflineJobOperation, E>) -> Self {
        Self { context }
    }

    pub fn run<F>(&self, job: Job, make_event: F)
    where
        F: FnOnce(JobCompletion) -> E + Send + 'static,
    {
        let ctx = self.context.clone();
        self.context.spawn(async move {
            let completion = match ctx.request_from_shell(OfflineJobOperation::Run(job)).await {
                OfflineJobOutput::Completed(completion) => completion,
                OfflineJobOutput::CancelRequested => JobCompletion {
                    result: Err(SdkError::unexpected_response("run")),
                    messages: Vec::new(),
                },
            };
            ctx.update_app(make_event(completion));
        });
    }

    /// The running job still completes through `run`, with a cancellation error.
    pub fn cancel(&self, job_id: JobId) {
        let ctx = self.context.clone();
        self.context.spawn(async move {
            ctx.request_from_shell(OfflineJobOperation::Cancel(job_id))
                .await;
        });
    }
}
