use tracing::{debug, info, warn};

use crate::app_context::{AppContext, Command};
use crate::capabilities::Capabilities;
use crate::event::{Event, KvResult};
use crate::model::{AreaOfInterest, Model};
use crate::persistence::{self, PersistedKey, PersistedValue, PersistenceError};
use crate::view::ViewModel;
use crate::{AppError, UnixTimeMs};

#[derive(Default)]
pub struct App;

impl crux_core::App for App {
    type Event = Event;
    type Model = Model;
    type ViewModel = ViewModel;
    type Capabilities = Capabilities;

    fn update(&self, event: Event, model: &mut Model, caps: &Capabilities) {
        let ctx = &mut model.context;
        match event {
            // Lifecycle
            Event::AppLaunched { config } => {
                if model.launched {
                    debug!("ignoring repeated launch");
                } else {
                    info!("app launched");
                    model.launched = true;
                    *ctx = AppContext::new(config);
                    ctx.launch();
                }
            }
            Event::DismissAlert => ctx.dismiss_alert(),

            // Work mode
            Event::GoOnlineRequested => ctx.set_work_mode_online(),
            Event::GoOfflineRequested => {
                if let Err(e) = ctx.set_work_mode_offline() {
                    ctx.raise_alert(e.into());
                }
            }
            Event::DeleteOfflineMapRequested => ctx.delete_offline_map_and_attempt_to_go_online(),

            // Portal
            Event::SignInRequested { portal_url } => ctx.sign_in(portal_url),
            Event::SignOutRequested => ctx.sign_out(),

            // Offline jobs
            Event::StageDownloadRequested {
                map,
                extent,
                min_scale,
            } => {
                let staged = AreaOfInterest::new(extent, min_scale)
                    .map_err(AppError::from)
                    .and_then(|area| ctx.stage_download(map, area));
                match staged {
                    Ok(job) => info!(job_id = %job.id(), "download staged"),
                    Err(e) => ctx.raise_alert(e),
                }
            }
            Event::StageSyncRequested => match ctx.stage_sync() {
                Ok(job) => info!(job_id = %job.id(), "sync staged"),
                Err(e) => ctx.raise_alert(e),
            },
            Event::StartJobRequested { job_id } => {
                if let Err(e) = ctx.start_job(&job_id, UnixTimeMs::now()) {
                    ctx.raise_alert(e);
                }
            }
            Event::ReleaseStagedJob { job_id } => {
                if !ctx.release_staged_job(&job_id) {
                    debug!(%job_id, "no such staged job");
                }
            }
            Event::CancelJobRequested => {
                if let Err(e) = ctx.cancel_job() {
                    ctx.raise_alert(e);
                }
            }
            Event::CheckLocalEditsRequested => {
                if let Err(e) = ctx.check_local_edits() {
                    ctx.raise_alert(e);
                }
            }
            Event::JobProgressed {
                job_id,
                fraction_completed,
                messages,
            } => ctx.on_job_progress(&job_id, fraction_completed, &messages),

            // Capability responses
            Event::PortalUrlRestored(result) => {
                let url = read_setting(
                    PersistedKey::PortalSessionUrl,
                    result,
                    persistence::decode_portal_url,
                );
                ctx.on_portal_url_restored(url);
            }
            Event::LastSyncRestored(result) => {
                let last_sync = read_setting(
                    PersistedKey::LastOfflineSync,
                    result,
                    persistence::decode_last_sync,
                );
                ctx.on_last_sync_restored(last_sync);
            }
            Event::WorkModeRestored(result) => {
                let kind = read_setting(PersistedKey::WorkMode, result, persistence::decode_work_mode)
                    .unwrap_or_default();
                ctx.on_work_mode_restored(kind);
            }
            Event::SettingPersisted { key, result } => {
                if let Err(e) = result {
                    warn!(key = key.name(), error = %e, "failed to persist setting");
                }
            }
            Event::CredentialsRevoked { request_id } => ctx.on_credentials_revoked(request_id),
            Event::PortalConnected { request_id, result } => {
                ctx.on_portal_connected(request_id, *result);
            }
            Event::OnlineMapLoaded { request, result } => ctx.on_online_map_loaded(request, result),
            Event::DirectoryInspected(result) => ctx.on_directory_inspected(result),
            Event::PackageOpened(result) => ctx.on_package_opened(*result),
            Event::DirectoryReset(result) => ctx.on_directory_reset(result),
            Event::DirectoryDeleted { directory, result } => {
                ctx.on_directory_deleted(&directory, result);
            }
            Event::DirectoryPromoted(result) => {
                ctx.on_directory_promoted(result, UnixTimeMs::now());
            }
            Event::JobCompleted { job_id, completion } => {
                ctx.on_job_completed(&job_id, *completion, UnixTimeMs::now());
            }
            Event::LocalEditsChecked(result) => ctx.on_local_edits_checked(result),
        }

        for command in model.context.drain_commands() {
            execute(command, caps);
        }
        caps.render.render();
    }

    fn view(&self, model: &Model) -> ViewModel {
        ViewModel::from(&model.context)
    }
}

/// Absent, unreadable and malformed settings all read as `None`.
fn read_setting<T>(
    key: PersistedKey,
    result: KvResult,
    decode: fn(&[u8]) -> Result<T, PersistenceError>,
) -> Option<T> {
    match result {
        Ok(Some(bytes)) => match decode(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key = key.name(), error = %e, "discarding malformed setting");
                None
            }
        },
        Ok(None) => None,
        Err(e) => {
            warn!(key = key.name(), error = %e, "failed to read setting");
            None
        }
    }
}

fn persist(value: &PersistedValue, caps: &Capabilities) {
    let key = value.key();
    match value.encode() {
        Ok(Some(bytes)) => caps.key_value.set(key.raw(), bytes, move |result| {
            Event::SettingPersisted { key, result }
        }),
        Ok(None) => caps.key_value.delete(key.raw(), move |result| {
            Event::SettingPersisted { key, result }
        }),
        Err(e) => warn!(key = key.name(), error = %e, "failed to encode setting"),
    }
}

fn execute(command: Command, caps: &Capabilities) {
    match command {
        Command::Connect(request) => {
            let request_id = request.id;
            caps.identity.connect(request, move |result| Event::PortalConnected {
                request_id,
                result: Box::new(result),
            });
        }
        Command::RevokeCredentials(request) => {
            let request_id = request.id;
            caps.identity
                .revoke_credentials(request.url, move || Event::CredentialsRevoked { request_id });
        }
        Command::LoadOnlineMap {
            portal_url,
            item_id,
            request,
        } => caps
            .map_engine
            .load_web_map(portal_url, item_id, move |result| Event::OnlineMapLoaded {
                request,
                result,
            }),
        Command::InspectDirectory(directory) => {
            caps.directories.inspect(directory, Event::DirectoryInspected);
        }
        Command::OpenPackage(directory) => caps
            .map_engine
            .open_package(directory, |result| Event::PackageOpened(Box::new(result))),
        Command::ResetDirectory(directory) => {
            caps.directories.reset(directory, Event::DirectoryReset);
        }
        Command::DeleteDirectory(directory) => {
            let deleted = directory.clone();
            caps.directories.delete(directory, move |result| Event::DirectoryDeleted {
                directory: deleted,
                result,
            });
        }
        Command::PromoteDirectory { from, to } => {
            caps.directories.promote(from, to, Event::DirectoryPromoted);
        }
        Command::RunJob(job) => {
            let job_id = job.id().clone();
            caps.offline_jobs.run(job, move |completion| Event::JobCompleted {
                job_id,
                completion: Box::new(completion),
            });
        }
        Command::CancelJob(job_id) => caps.offline_jobs.cancel(job_id),
        Command::CheckLocalEdits { map, since } => {
            caps.map_engine
                .has_local_edits(map, since, Event::LocalEditsChecked);
        }
        Command::ReadSetting(key) => {
            let make_event: fn(KvResult) -> Event = match key {
                PersistedKey::PortalSessionUrl => Event::PortalUrlRestored,
                PersistedKey::LastOfflineSync => Event::LastSyncRestored,
                PersistedKey::WorkMode => Event::WorkModeRestored,
            };
            caps.key_value.get(key.raw(), make_event);
        }
        Command::Persist(value) => persist(&value, caps),
        Command::Broadcast(notice) => caps.broadcast.notify(notice),
    }
}
