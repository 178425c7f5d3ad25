use crux_core::capability::{Capability, CapabilityContext, Operation};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::model::{MapHandle, OfflineDirectory, PackageContents, SdkError};
use crate::UnixTimeMs;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum MapEngineOperation {
    LoadWebMap { portal_url: Url, item_id: String },
    OpenPackage(OfflineDirectory),
    HasLocalEdits {
        map: MapHandle,
        since: Option<UnixTimeMs>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum MapEngineOutput {
    WebMap(Result<MapHandle, SdkError>),
    Package(Result<PackageContents, SdkError>),
    LocalEdits(Result<bool, SdkError>),
}

impl Operation for MapEngineOperation {
    type Output = MapEngineOutput;
}

pub struct MapEngine<E> {
    context: CapabilityContext<MapEngineOperation, E>,
}

impl<Ev> Capability<Ev> for MapEngine<Ev> {
    type Operation = MapEngineOperation;
    type MappedSelf<MappedEv> = MapEngine<MappedEv>;

    fn map_event<F, NewEv>(&self, f: F) -> Self::MappedSelf<NewEv>
    where
        F: Fn(NewEv) -> Ev + Send + Sync + 'static,
        Ev: 'static,
        NewEv: 'static + Send,
    {
        MapEngine::new(self.context.map_event(f))
    }
}

impl<E> MapEngine<E>
where
    E: 'static,
{
    pub fn new(context: CapabilityContext<MapEngineOperation, E>) -> Self {
        Self { context }
    }

    pub fn load_web_map<F>(&self, portal_url: Url, item_id: String, make_event: F)
    where
        F: FnOnce(Result<MapHandle, SdkError>) -> E + Send + 'static,
    {
        let ctx = self.context.clone();
        self.context.spawn(async move {
            let op = MapEngineOperation::LoadWebMap {
                portal_url,
                item_id,
            };
            let result = match ctx.request_from_shell(op).await {
                MapEngineOutput::WebMap(result) => result,
                _ => Err(SdkError::unexpected_response("load_web_map")),
            };
            ctx.update_app(make_event(result));
        });
    }

    pub fn open_package<F>(&self, directory: OfflineDirectory, make_event: F)
    where
        F: FnOnce(Result<PackageContents, SdkError>) -> E + Send + 'static,
    {
        let ctx = self.context.clone();
        self.context.spawn(async move {
            let result = match ctx
                .request_from_shell(MapEngineOperation::OpenPackage(directory))
                .await
            {
                MapEngineOutput::Package(result) => result,
                _ => Err(SdkError::unexpected_response("open_package")),
            };
            ctx.update_app(make_event(result));
        });
    }

    /// Whether `map` holds edits made after `since` that have not been synced.
    pub fn has_local_edits<F>(&self, map: MapHandle, since: Option<UnixTimeMs>, make_event: F)
    where
        F: FnOnce(Result<bool, SdkError>) -> E + Send + 'static,
    {
        let ctx = self.context.clone();
        self.context.spawn(async move {
            let result = match ctx
                .request_from_shell(MapEngineOperation::HasLocalEdits { map, since })
                .await
            {
                MapEngineOutput::LocalEdits(result) => result,
                _ => Err(SdkError::unexpected_response("has_local_edits")),
            };
            ctx.update_app(make_event(result));
        });
    }
}
