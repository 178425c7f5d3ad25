mod broadcast;
mod directories;
mod identity;
mod jobs;
mod map_engine;

pub use self::broadcast::{Broadcast, ChangeNotice};
pub use self::directories::{DirectoryOperation, DirectoryOutput, Directories};
pub use self::identity::{Identity, IdentityOperation, IdentityOutput};
pub use self::jobs::{OfflineJobOperation, OfflineJobOutput, OfflineJobs};
pub use self::map_engine::{MapEngine, MapEngineOperation, MapEngineOutput};

// Render and key-value come straight from Crux; the rest are shell
// services specific to the map app.
pub use crux_core::render::Render;
pub use crux_kv::KeyValue;

use crate::event::Event;

#[derive(crux_core::macros::Effect)]
pub struct Capabilities {
    pub render: Render<Event>,
    pub key_value: KeyValue<Event>,
    pub identity: Identity<Event>,
    pub map_engine: MapEngine<Event>,
    pub offline_jobs: OfflineJobs<Event>,
    pub directories: Directories<Event>,
    pub broadcast: Broadcast<Event>,
}
