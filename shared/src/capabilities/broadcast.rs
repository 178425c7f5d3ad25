use crux_core::capability::{Capability, CapabilityContext, Operation};
use serde::{Deserialize, Serialize};

use crate::job_manager::{JobId, JobType};
use crate::work_mode::WorkModeKind;

/// Fire-and-forget notices for shell observers outside the view tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChangeNotice {
    WorkModeChanged(WorkModeKind),
    PortalChanged { status: String },
    OfflineMapChanged { status: String },
    JobFinished {
        job_id: JobId,
        job_type: JobType,
        succeeded: bool,
        cancelled: bool,
    },
}

impl Operation for ChangeNotice {
    type Output = ();
}

pub struct Broadcast<E> {
    context: CapabilityContext<ChangeNotice, E>,
}

impl<Ev> Capability<Ev> for Broadcast<Ev> {
    type Operation = ChangeNotice;
    type MappedSelf<MappedEv> = Broadcast<MappedEv>;

    fn map_event<F, NewEv>(&self, f: F) -> Self::MappedSelf<NewEv>
    where
        F: Fn(NewEv) -> Ev + Send + Sync + 'static,
        Ev: 'static,
        NewEv: 'static + Send,
    {
        Broadcast::new(self.context.map_event(f))
    }
}

impl<E> Broadcast<E>
where
    E: 'static,
{
    pub fn new(context: CapabilityContext<ChangeNotice, E>) -> Self {
        Self { context }
    }

    pub fn notify(&self, notice: ChangeNotice) {
        let ctx = self.context.clone();
        self.context.spawn(async move {
            ctx.notify_shell(notice).await;
        });
    }
}
