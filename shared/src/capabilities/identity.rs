use crux_core::capability::{Capability, CapabilityContext, Operation};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::model::{Portal, SdkError};
use crate::portal_session::ConnectRequest;

/// Portal connection and credential storage, owned by the shell's identity
/// layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum IdentityOperation {
    Connect(ConnectRequest),
    RevokeCredentials { url: Url },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum IdentityOutput {
    Connected(Result<Portal, SdkError>),
    Revoked,
}

impl Operation for IdentityOperation {
    type Output = IdentityOutput;
}

pub struct Identity<E> {
    context: CapabilityContext<IdentityOperation, E>,
}

impl<Ev> Capability<Ev> for Identity<Ev> {
    type Operation = IdentityOperation;
    type MappedSelf<MappedEv> = Identity<MappedEv>;

    fn map_event<F, NewEv>(&self, f: F) -> Self::MappedSelf<NewEv>
    where
        F: Fn(NewEv) -> Ev + Send + Sync + 'static,
        Ev: 'static,
        NewEv: 'static + Send,
    {
        Identity::new(self.context.map_event(f))
    }
}

impl<E> Identity<E>
where
    E: 'static,
{
    pub fn new(context: CapabilityContext<IdentityOperation, E>) -> Self {
        Self { context }
    }

    pub fn connect<F>(&self, request: ConnectRequest, make_event: F)
    where
        F: FnOnce(Result<Portal, SdkError>) -> E + Send + 'static,
    {
        let ctx = self.context.clone();
        self.context.spawn(async move {
            let result = match ctx.request_from_shell(IdentityOperation::Connect(request)).await {
                IdentityOutput::Connected(result) => result,
                IdentityOutput::Revoked => Err(SdkError::unexpected_response("connect")),
            };
            ctx.update_app(make_event(result));
        });
    }

    pub fn revoke_credentials<F>(&self, url: Url, make_event: F)
    where
        F: FnOnce() -> E + Send + 'static,
    {
        let ctx = self.context.clone();
        self.context.spawn(async move {
            ctx.request_from_shell(IdentityOperation::RevokeCredentials { url })
                .await;
            ctx.update_app(make_event());
        });
    }
}
