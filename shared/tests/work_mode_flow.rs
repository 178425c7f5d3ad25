use crux_core::testing::AppTester;
use crux_kv::KeyValueOperation;
use offline_core::capabilities::{
    ChangeNotice, DirectoryOperation, IdentityOperation, MapEngineOperation,
};
use offline_core::model::{
    MapHandle, OfflineDirectory, PackageContents, PackageHandle, Portal, PortalAccess, SdkError,
    PortalUser,
};
use offline_core::work_mode::{LocatorConfig, WorkModeKind};
use offline_core::{App, CoreConfig, Effect, Event, Model, WorkMode, DEFAULT_WEB_MAP_ITEM_ID};
use url::Url;

fn kv_ops(effects: &[Effect]) -> Vec<KeyValueOperation> {
    effects
        .iter()
        .filter_map(|e| match e {
            Effect::KeyValue(req) => Some(req.operation.clone()),
            _ => None,
        })
        .collect()
}

fn is_get(op: &KeyValueOperation, wanted: &str) -> bool {
    matches!(op, KeyValueOperation::Get { key } if key == wanted)
}

fn is_set(op: &KeyValueOperation, wanted: &str) -> bool {
    matches!(op, KeyValueOperation::Set { key, .. } if key == wanted)
}

fn identity_ops(effects: &[Effect]) -> Vec<IdentityOperation> {
    effects
        .iter()
        .filter_map(|e| match e {
            Effect::Identity(req) => Some(req.operation.clone()),
            _ => None,
        })
        .collect()
}

fn launch(app: &AppTester<App, Effect>, model: &mut Model) -> Vec<Effect> {
    app.update(
        Event::AppLaunched {
            config: CoreConfig::default(),
        },
        model,
    )
    .effects
}

/// Drives the default (anonymous) portal session to `Loaded`.
fn load_anonymous_portal(app: &AppTester<App, Effect>, model: &mut Model) {
    app.update(Event::PortalUrlRestored(Ok(None)), model);
    let revoke = model.context.portal_session().pending_request().unwrap();
    let update = app.update(Event::CredentialsRevoked { request_id: revoke }, model);
    let connect = identity_ops(&update.effects)
        .into_iter()
        .find_map(|op| match op {
            IdentityOperation::Connect(request) => Some(request),
            IdentityOperation::RevokeCredentials { .. } => None,
        })
        .unwrap();
    app.update(
        Event::PortalConnected {
            request_id: connect.id,
            result: Box::new(Ok(Portal::new(connect.url, PortalAccess::Anonymous))),
        },
        model,
    );
}

fn offline_package() -> PackageContents {
    PackageContents {
        package: PackageHandle::new("pkg"),
        maps: vec![MapHandle::new("offline-map")],
    }
}

#[test]
fn test_launch_reads_settings_and_inspects_package() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();

    let effects = launch(&app, &mut model);

    let ops = kv_ops(&effects);
    assert!(ops.iter().any(|op| is_get(op, "settings:portal_session_url")));
    assert!(ops.iter().any(|op| is_get(op, "settings:last_offline_sync")));
    assert!(!ops.iter().any(|op| is_get(op, "settings:work_mode")));
    assert!(effects.iter().any(|e| matches!(
        e,
        Effect::Directories(req)
            if req.operation == DirectoryOperation::Inspect(OfflineDirectory::permanent(DEFAULT_WEB_MAP_ITEM_ID))
    )));
    assert!(effects.iter().any(|e| matches!(e, Effect::Render(_))));
}

#[test]
fn test_repeated_launch_is_ignored() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    launch(&app, &mut model);

    let effects = launch(&app, &mut model);
    assert!(effects.iter().all(|e| matches!(e, Effect::Render(_))));
}

#[test]
fn test_work_mode_is_read_after_session_load_starts() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    launch(&app, &mut model);

    let stored = Url::parse("https://example.maps.arcgis.com/").unwrap();
    let update = app.update(
        Event::PortalUrlRestored(Ok(Some(stored.as_str().as_bytes().to_vec()))),
        &mut model,
    );

    let connect = identity_ops(&update.effects);
    assert!(matches!(
        connect.as_slice(),
        [IdentityOperation::Connect(request)] if request.url == stored
    ));
    assert!(kv_ops(&update.effects)
        .iter()
        .any(|op| is_get(op, "settings:work_mode")));
}

#[test]
fn test_offline_mode_restores_without_map_then_gets_it() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    launch(&app, &mut model);
    app.update(Event::PortalUrlRestored(Ok(None)), &mut model);

    app.update(
        Event::WorkModeRestored(Ok(Some(b"offline".to_vec()))),
        &mut model,
    );
    assert_eq!(model.context.work_mode(), WorkMode::Offline(None));

    let update = app.update(Event::DirectoryInspected(Ok(true)), &mut model);
    assert!(update.effects.iter().any(|e| matches!(
        e,
        Effect::MapEngine(req) if matches!(req.operation, MapEngineOperation::OpenPackage(_))
    )));

    let update = app.update(Event::PackageOpened(Box::new(Ok(offline_package()))), &mut model);
    assert_eq!(
        model.context.work_mode(),
        WorkMode::Offline(Some(MapHandle::new("offline-map")))
    );
    assert!(kv_ops(&update.effects)
        .iter()
        .any(|op| is_set(op, "settings:work_mode")));

    let view = app.view(&model);
    assert_eq!(view.work_mode, WorkModeKind::Offline);
    assert_eq!(view.locator, LocatorConfig::OfflinePackage);
}

#[test]
fn test_going_offline_without_map_is_rejected() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    launch(&app, &mut model);
    app.update(Event::DirectoryInspected(Ok(false)), &mut model);

    let update = app.update(Event::GoOfflineRequested, &mut model);

    assert_eq!(model.context.work_mode(), WorkMode::None);
    assert!(kv_ops(&update.effects).is_empty());
    let view = app.view(&model);
    assert_eq!(
        view.alert.map(|a| a.code),
        Some("MISSING_OFFLINE_MAP".to_string())
    );

    app.update(Event::DismissAlert, &mut model);
    assert!(app.view(&model).alert.is_none());
}

#[test]
fn test_going_online_loads_web_map() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    launch(&app, &mut model);
    load_anonymous_portal(&app, &mut model);

    let update = app.update(Event::GoOnlineRequested, &mut model);
    assert!(update.effects.iter().any(|e| matches!(
        e,
        Effect::MapEngine(req) if matches!(
            &req.operation,
            MapEngineOperation::LoadWebMap { item_id, .. } if item_id == DEFAULT_WEB_MAP_ITEM_ID
        )
    )));
    assert!(update.effects.iter().any(|e| matches!(
        e,
        Effect::Broadcast(req) if req.operation == ChangeNotice::WorkModeChanged(WorkModeKind::Online)
    )));

    let request = model.context.online_map_request();
    app.update(
        Event::OnlineMapLoaded {
            request,
            result: Ok(MapHandle::new("web-map")),
        },
        &mut model,
    );
    let view = app.view(&model);
    assert_eq!(view.work_mode, WorkModeKind::Online);
    assert_eq!(view.map, Some(MapHandle::new("web-map")));
}

#[test]
fn test_failed_sign_in_falls_back_and_alerts() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    launch(&app, &mut model);
    load_anonymous_portal(&app, &mut model);

    let update = app.update(Event::SignInRequested { portal_url: None }, &mut model);
    let sign_in = match identity_ops(&update.effects).as_slice() {
        [IdentityOperation::Connect(request)] => request.clone(),
        other => panic!("unexpected identity effects: {other:?}"),
    };
    assert!(sign_in.access.requires_login());

    let update = app.update(
        Event::PortalConnected {
            request_id: sign_in.id,
            result: Box::new(Err(SdkError::new("ArcGIS", 401, "invalid credentials"))),
        },
        &mut model,
    );
    assert!(matches!(
        identity_ops(&update.effects).as_slice(),
        [IdentityOperation::RevokeCredentials { .. }]
    ));

    let revoke = model.context.portal_session().pending_request().unwrap();
    let update = app.update(Event::CredentialsRevoked { request_id: revoke }, &mut model);
    let fallback = match identity_ops(&update.effects).as_slice() {
        [IdentityOperation::Connect(request)] => request.clone(),
        other => panic!("unexpected identity effects: {other:?}"),
    };
    app.update(
        Event::PortalConnected {
            request_id: fallback.id,
            result: Box::new(Ok(Portal::new(fallback.url, PortalAccess::Anonymous))),
        },
        &mut model,
    );

    let view = app.view(&model);
    assert_eq!(view.portal.status, "fallback");
    assert_eq!(view.alert.map(|a| a.code), Some("AUTH_ERROR".to_string()));
}

#[test]
fn test_signed_in_portal_url_is_persisted() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    launch(&app, &mut model);
    load_anonymous_portal(&app, &mut model);

    let update = app.update(Event::SignInRequested { portal_url: None }, &mut model);
    let request = match identity_ops(&update.effects).as_slice() {
        [IdentityOperation::Connect(request)] => request.clone(),
        other => panic!("unexpected identity effects: {other:?}"),
    };
    let portal = Portal {
        url: request.url.clone(),
        access: request.access,
        user: Some(PortalUser {
            username: "surveyor".into(),
            full_name: None,
        }),
    };
    let update = app.update(
        Event::PortalConnected {
            request_id: request.id,
            result: Box::new(Ok(portal)),
        },
        &mut model,
    );

    assert!(kv_ops(&update.effects)
        .iter()
        .any(|op| is_set(op, "settings:portal_session_url")));
    assert!(app.view(&model).portal.signed_in);
}
