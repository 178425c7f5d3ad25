use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::CoreConfig;
use crate::job_manager::{JobCompletion, JobId};
use crate::model::{
    Envelope, JobMessage, MapHandle, OfflineDirectory, PackageContents, Portal, SdkError,
};
use crate::persistence::PersistedKey;

/// Answer from the key-value store: the stored bytes, if any.
pub type KvResult = Result<Option<Vec<u8>>, crux_kv::error::KeyValueError>;

// --- Event enum: user intents first, capability responses last ---

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub enum Event {
    // Lifecycle
    AppLaunched {
        config: CoreConfig,
    },
    DismissAlert,

    // Work mode
    GoOnlineRequested,
    GoOfflineRequested,
    DeleteOfflineMapRequested,

    // Portal
    SignInRequested {
        portal_url: Option<Url>,
    },
    SignOutRequested,

    // Offline jobs
    StageDownloadRequested {
        map: Option<MapHandle>,
        extent: Envelope,
        min_scale: f64,
    },
    StageSyncRequested,
    StartJobRequested {
        job_id: JobId,
    },
    ReleaseStagedJob {
        job_id: JobId,
    },
    CancelJobRequested,
    CheckLocalEditsRequested,
    /// Pushed by the shell while a job runs; `messages` is the full log so far.
    JobProgressed {
        job_id: JobId,
        fraction_completed: f64,
        messages: Vec<JobMessage>,
    },

    // Capability Responses (boxed to keep enum size small)
    PortalUrlRestored(KvResult),
    LastSyncRestored(KvResult),
    WorkModeRestored(KvResult),
    SettingPersisted {
        key: PersistedKey,
        result: KvResult,
    },
    CredentialsRevoked {
        request_id: u64,
    },
    PortalConnected {
        request_id: u64,
        result: Box<Result<Portal, SdkError>>,
    },
    OnlineMapLoaded {
        request: u64,
        result: Result<MapHandle, SdkError>,
    },
    DirectoryInspected(Result<bool, SdkError>),
    PackageOpened(Box<Result<PackageContents, SdkError>>),
    DirectoryReset(Result<(), SdkError>),
    DirectoryDeleted {
        directory: OfflineDirectory,
        result: Result<(), SdkError>,
    },
    DirectoryPromoted(Result<(), SdkError>),
    JobCompleted {
        job_id: JobId,
        completion: Box<JobCompletion>,
    },
    LocalEditsChecked(Result<bool, SdkError>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_size_is_reasonable() {
        let size = std::mem::size_of::<Event>();
        assert!(
            size <= 128,
            "Event enum is {} bytes, box more variants",
            size
        );
    }

    #[test]
    fn job_progress_round_trips_through_json() {
        let event = Event::JobProgressed {
            job_id: JobId::generate(),
            fraction_completed: 0.25,
            messages: vec![JobMessage::info("Preparing")],
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
