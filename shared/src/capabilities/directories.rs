use crux_core::capability::{Capability, CapabilityContext, Operation};
use serde::{Deserialize, Serialize};

use crate::model::{OfflineDirectory, SdkError};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum DirectoryOperation {
    /// Does the directory exist and hold any entries.
    Inspect(OfflineDirectory),
    /// Remove and recreate empty.
    Reset(OfflineDirectory),
    Delete(OfflineDirectory),
    /// Replace `to` with the contents of `from`.
    Promote {
        from: OfflineDirectory,
        to: OfflineDirectory,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum DirectoryOutput {
    Inspected(Result<bool, SdkError>),
    Done(Result<(), SdkError>),
}

impl DirectoryOutput {
    fn into_done(self, operation: &str) -> Result<(), SdkError> {
        match self {
            Self::Done(result) => result,
            Self::Inspected(_) => Err(SdkError::unexpected_response(operation)),
        }
    }
}

impl Operation for DirectoryOperation {
    type Output = DirectoryOutput;
}

pub struct Directories<E> {
    context: CapabilityContext<DirectoryOperation, E>,
}

impl<Ev> Capability<Ev> for Directories<Ev> {
    type Operation = DirectoryOperation;
    type MappedSelf<MappedEv> = Directories<MappedEv>;

    fn map_event<F, NewEv>(&self, f: F) -> Self::MappedSelf<NewEv>
    where
        F: Fn(NewEv) -> Ev + Send + Sync + 'static,
        Ev: 'static,
        NewEv: 'static + Send,
    {
        Directories::new(self.context.map_event(f))
    }
}

impl<E> Directories<E>
where
    E: 'static,
{
    pub fn new(context: CapabilityContext<DirectoryOperation, E>) -> Self {
        Self { context }
    }

    pub fn inspect<F>(&self, directory: OfflineDirectory, make_event: F)
    where
        F: FnOnce(Result<bool, SdkError>) -> E + Send + 'static,
    {
        let ctx = self.context.clone();
        self.context.spawn(async move {
            let result = match ctx
                .request_from_shell(DirectoryOperation::Inspect(directory))
                .await
            {
                DirectoryOutput::Inspected(result) => result,
                DirectoryOutput::Done(_) => Err(SdkError::unexpected_response("inspect")),
            };
            ctx.update_app(make_event(result));
        });
    }

    pub fn reset<F>(&self, directory: OfflineDirectory, make_event: F)
    where
        F: FnOnce(Result<(), SdkError>) -> E + Send + 'static,
    {
        self.run(DirectoryOperation::Reset(directory), "reset", make_event);
    }

    pub fn delete<F>(&self, directory: OfflineDirectory, make_event: F)
    where
        F: FnOnce(Result<(), SdkError>) -> E + Send + 'static,
    {
        self.run(DirectoryOperation::Delete(directory), "delete", make_event);
    }

    pub fn promote<F>(&self, from: OfflineDirectory, to: OfflineDirectory, make_event: F)
    where
        F: FnOnce(Result<(), SdkError>) -> E + Send + 'static,
    {
        self.run(DirectoryOperation::Promote { from, to }, "promote", make_event);
    }

    fn run<F>(&self, op: DirectoryOperation, name: &'static str, make_event: F)
    where
        F: FnOnce(Result<(), SdkError>) -> E + Send + 'static,
    {
        let ctx = self.context.clone();
        self.context.spawn(async move {
            let result = ctx.request_from_shell(op).await.into_done(name);
            ctx.update_app(make_event(result));
        });
    }
}
