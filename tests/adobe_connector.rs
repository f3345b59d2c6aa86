//! Adobe Connect connector against a scripted XML API

mod common;

use std::sync::Arc;

use common::exchange::*;
use common::RecordingController;
use conference_broker::connector::adobe::AdobeConnectConnector;
use conference_broker::connector::{
    AccessMode, Alias, AliasKind, CommandError, ConnectionState, Connector, ConnectorRegistry, ControllerAction,
    Credentials,
    DeviceAddress, HttpResponse,
    ParticipantRole, RecordingTarget, Room, RoomConfiguredParticipant,
};
use conference_broker::constants::options as keys;
use conference_broker::execution::{
    DeviceId, Executable, ExecutableId, ExecutableKind, ExecutableState, ExecutableStore, Executor,
    ExecutorConfig, MemoryExecutableStore, RecordingService, RoomEndpoint, RoomSpec, Slot,
};
use conference_broker::ConnectorOptions;

const SHORTCUTS: &str = r#"<shortcuts><sco sco-id="10" type="meetings"/><sco sco-id="20" type="content"/></shortcuts>"#;
const FOLDERS: &str = concat!(
    r#"<scos><sco sco-id="11" folder-id="10" type="folder"><name>meetings</name></sco>"#,
    r#"<sco sco-id="21" folder-id="20" type="folder"><name>recordings</name></sco></scos>"#
);
const MEETINGS: &str = r#"<scos><sco sco-id="400" folder-id="11" type="meeting"><name>Weekly</name></sco></scos>"#;

fn idle_recorder() -> HttpResponse {
    adobe_ok("<meeting-recorder-activity-info><recording-sco-id/></meeting-recorder-activity-info>")
}

fn busy_recorder(recording_id: &str) -> HttpResponse {
    adobe_ok(&format!(
        "<meeting-recorder-activity-info><recording-sco-id>{recording_id}</recording-sco-id></meeting-recorder-activity-info>"
    ))
}

/// Device with both managed folders present and the recordings folder already private
fn adobe_device() -> Arc<ScriptedExchange> {
    let exchange = Arc::new(ScriptedExchange::new(adobe_no_data()));
    exchange
        .route("login", adobe_login("token-1"))
        .route("sco-shortcuts", adobe_ok(SHORTCUTS))
        .route_fn("sco-contents", |request| match query_param(request, "filter-type").as_deref() {
            Some("meeting") => adobe_ok(MEETINGS),
            _ => adobe_ok(FOLDERS),
        })
        .route(
            "permissions-info",
            adobe_ok(r#"<permissions><principal principal-id="public-access" permission-id="denied"/></permissions>"#),
        )
        .route("permissions-update", adobe_ok(""))
        .route("sco-move", adobe_ok(""))
        .route("meeting-recorder-activity-update", adobe_ok(""))
        .route_fn("sco-info", |request| {
            match query_param(request, "sco-id").as_deref() {
                Some("13001") => adobe_ok(r#"<sco sco-id="13001" folder-id="400" type="content" icon="archive"><name>broker_400</name></sco>"#),
                Some("13002") => adobe_ok(r#"<sco sco-id="13002" folder-id="21" type="content" icon="archive"><name>broker_old</name></sco>"#),
                Some("13003") => adobe_ok(r#"<sco sco-id="13003" folder-id="f-77" type="content" icon="archive"><name>broker_nested</name></sco>"#),
                Some("f-77") => adobe_ok(r#"<sco sco-id="f-77" folder-id="21" type="folder"><name>Team</name></sco>"#),
                Some("400") => adobe_ok(r#"<sco sco-id="400" folder-id="11" type="meeting"><name>Weekly</name></sco>"#),
                _ => adobe_no_data(),
            }
        });
    exchange
}

fn quiet_options() -> ConnectorOptions {
    ConnectorOptions::new()
        .with(keys::CAPACITY_CHECK_PERIOD, "1h")
        .with(keys::RECORDINGS_CHECK_PERIOD, "1h")
        .with(keys::RECORDING_POLL_INTERVAL, "1ms")
        .with(keys::RECORDING_POLL_ATTEMPTS, "3")
}

async fn connected(
    exchange: &Arc<ScriptedExchange>,
    controller: Arc<RecordingController>,
) -> AdobeConnectConnector<Arc<ScriptedExchange>> {
    let connector =
        AdobeConnectConnector::with_exchange("acr-1", quiet_options(), controller, Arc::clone(exchange)).unwrap();
    connector
        .connect(
            &DeviceAddress::parse("https://connect.example.org/").unwrap(),
            &Credentials::new("broker", "secret"),
        )
        .await
        .unwrap();
    connector
}

#[tokio::test]
async fn test_connect_logs_in_and_resolves_both_folders() {
    let exchange = adobe_device();
    let connector = connected(&exchange, Arc::new(RecordingController::new())).await;

    assert_eq!(connector.info().state, ConnectionState::LooselyConnected);
    assert!(connector.is_connected());
    assert_eq!(exchange.keys()[0], "login");
    let login = &exchange.requests_for("login")[0];
    assert_eq!(query_param(login, "login").as_deref(), Some("broker"));
    assert_eq!(login.url.path(), "/api/xml");

    for request in exchange.requests().iter().skip(1) {
        assert_eq!(query_param(request, "session").as_deref(), Some("token-1"));
    }
    // Already private
    assert_eq!(exchange.count("permissions-update"), 0);

    let before = exchange.requests().len();
    assert_eq!(connector.meetings_folder_id().await.unwrap(), "11");
    assert_eq!(connector.recordings_folder_id().await.unwrap(), "21");
    assert_eq!(exchange.requests().len(), before);
}

#[tokio::test]
async fn test_public_recordings_folder_is_closed_on_connect() {
    let exchange = adobe_device();
    exchange.once(
        "permissions-info",
        adobe_ok(r#"<permissions><principal principal-id="public-access" permission-id="view"/></permissions>"#),
    );
    let _connector = connected(&exchange, Arc::new(RecordingController::new())).await;

    let updates = exchange.requests_for("permissions-update");
    assert_eq!(updates.len(), 1);
    assert_eq!(query_param(&updates[0], "acl-id").as_deref(), Some("21"));
    assert_eq!(query_param(&updates[0], "principal-id").as_deref(), Some("public-access"));
    assert_eq!(query_param(&updates[0], "permission-id").as_deref(), Some("denied"));
}

#[tokio::test]
async fn test_missing_folder_is_created_once() {
    let exchange = adobe_device();
    exchange
        .route_fn("sco-contents", |request| match query_param(request, "filter-name").as_deref() {
            Some("meetings") => adobe_no_data(),
            _ => adobe_ok(FOLDERS),
        })
        .route("sco-update", adobe_ok(r#"<sco sco-id="12" folder-id="10" type="folder"/>"#));
    let connector = connected(&exchange, Arc::new(RecordingController::new())).await;

    assert_eq!(connector.meetings_folder_id().await.unwrap(), "12");
    let created = exchange.requests_for("sco-update");
    assert_eq!(created.len(), 1);
    assert_eq!(query_param(&created[0], "type").as_deref(), Some("folder"));
    assert_eq!(query_param(&created[0], "folder-id").as_deref(), Some("10"));
}

#[tokio::test]
async fn test_failed_login_leaves_connector_disconnected() {
    let exchange = adobe_device();
    exchange.once("login", adobe_status("no-access", Some("denied")));
    let connector = AdobeConnectConnector::with_exchange(
        "acr-1",
        quiet_options(),
        Arc::new(RecordingController::new()),
        Arc::clone(&exchange),
    )
    .unwrap();

    let error = connector
        .connect(
            &DeviceAddress::parse("https://connect.example.org/").unwrap(),
            &Credentials::new("broker", "wrong"),
        )
        .await
        .unwrap_err();
    assert!(error.has_code("no-access", Some("denied")));
    assert_eq!(connector.info().state, ConnectionState::Disconnected);
    assert!(matches!(
        connector.delete_room("400").await,
        Err(CommandError::NotConnected { .. })
    ));
}

#[tokio::test]
async fn test_expired_session_logs_in_again_once() {
    let exchange = adobe_device();
    let connector = connected(&exchange, Arc::new(RecordingController::new())).await;

    exchange
        .once("sco-info", adobe_status("no-access", Some("no-login")))
        .once("login", adobe_login("token-2"));
    assert!(connector.is_recording_stored("13002").await.unwrap());

    assert_eq!(exchange.count("login"), 2);
    let lookups = exchange.requests_for("sco-info");
    assert_eq!(lookups.len(), 2);
    assert_eq!(query_param(&lookups[0], "session").as_deref(), Some("token-1"));
    assert_eq!(query_param(&lookups[1], "session").as_deref(), Some("token-2"));
}

#[tokio::test]
async fn test_second_expiry_fails_the_command() {
    let exchange = adobe_device();
    let connector = connected(&exchange, Arc::new(RecordingController::new())).await;

    exchange
        .once("sco-info", adobe_status("no-access", Some("no-login")))
        .once("sco-info", adobe_status("no-access", Some("no-login")));
    let error = connector.is_recording_stored("13002").await.unwrap_err();

    assert!(error.has_code("no-access", Some("no-login")));
    assert_eq!(exchange.count("login"), 2);
    assert_eq!(exchange.count("sco-info"), 2);
}

#[tokio::test]
async fn test_stored_recordings_are_cached() {
    let exchange = adobe_device();
    let connector = connected(&exchange, Arc::new(RecordingController::new())).await;

    // In a sub-folder of the recordings folder
    assert!(connector.is_recording_stored("13003").await.unwrap());
    assert_eq!(exchange.count("sco-info"), 2);
    assert!(connector.is_recording_stored("13003").await.unwrap());
    assert_eq!(exchange.count("sco-info"), 2);

    // Still in its room
    assert!(!connector.is_recording_stored("13001").await.unwrap());
}

#[tokio::test]
async fn test_create_room_sets_url_path_and_permissions() {
    let exchange = adobe_device();
    exchange
        .route("sco-update", adobe_ok(r#"<sco sco-id="400" folder-id="11" type="meeting"/>"#))
        .route(
            "principal-list",
            adobe_ok(r#"<principal-list><principal principal-id="p42"><login>jana@example.org</login></principal></principal-list>"#),
        );
    let controller = Arc::new(RecordingController::new().with_user("42", "jana@example.org"));
    let connector = connected(&exchange, controller).await;

    let room = Room {
        id: None,
        name: "Weekly".into(),
        description: Some("Team sync".into()),
        license_count: 5,
        aliases: vec![Alias::new(AliasKind::Url, "https://connect.example.org/weekly-sync/")],
        participants: vec![RoomConfiguredParticipant {
            user_id: "42".into(),
            role: ParticipantRole::Admin,
        }],
        access_mode: AccessMode::Public,
    };
    assert_eq!(connector.create_room(&room).await.unwrap(), "400");

    let created = &exchange.requests_for("sco-update")[0];
    assert_eq!(query_param(created, "type").as_deref(), Some("meeting"));
    assert_eq!(query_param(created, "folder-id").as_deref(), Some("11"));
    assert_eq!(query_param(created, "url-path").as_deref(), Some("weekly-sync"));

    let grants: Vec<(String, String)> = exchange
        .requests_for("permissions-update")
        .iter()
        .map(|request| {
            (
                query_param(request, "principal-id").unwrap_or_default(),
                query_param(request, "permission-id").unwrap_or_default(),
            )
        })
        .collect();
    assert_eq!(
        grants,
        vec![
            ("public-access".to_string(), "view".to_string()),
            ("p42".to_string(), "host".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_dialing_participants_is_unsupported() {
    let exchange = adobe_device();
    let connector = connected(&exchange, Arc::new(RecordingController::new())).await;

    let error = connector
        .add_room_participants("400", &[Alias::uri("sip:alice@example.org")])
        .await
        .unwrap_err();
    assert!(error.is_unsupported());
}

#[tokio::test]
async fn test_room_not_running_has_no_participants() {
    let exchange = adobe_device();
    let connector = connected(&exchange, Arc::new(RecordingController::new())).await;

    assert!(connector.list_room_participants("400").await.unwrap().is_empty());

    exchange.once(
        "meeting-usermanager-user-list",
        adobe_ok(concat!(
            "<meeting-usermanager-user-list><userdetail><user-id>7</user-id>",
            "<username>Jana</username><role>host</role></userdetail></meeting-usermanager-user-list>"
        )),
    );
    let participants = connector.list_room_participants("400").await.unwrap();
    assert_eq!(participants.len(), 1);
    assert_eq!(participants[0].id, "7");
    assert_eq!(participants[0].display_name, "Jana");
    assert_eq!(participants[0].role, Some(ParticipantRole::Admin));
}

#[tokio::test]
async fn test_start_recording_polls_until_the_device_reports_it() {
    let exchange = adobe_device();
    exchange
        .once("meeting-recorder-activity-info", idle_recorder())
        .route("meeting-recorder-activity-info", busy_recorder("13001"));
    let connector = connected(&exchange, Arc::new(RecordingController::new())).await;

    let recording_id = connector
        .start_recording("f-77", &RecordingTarget::Room("400".into()))
        .await
        .unwrap();
    assert_eq!(recording_id, "13001");
    assert_eq!(exchange.count("meeting-recorder-activity-info"), 2);

    let started = &exchange.requests_for("meeting-recorder-activity-update")[0];
    assert_eq!(query_param(started, "active").as_deref(), Some("true"));
    assert!(query_param(started, "name").unwrap().starts_with("broker_400_"));
    assert!(connector.is_recording_active("13001").await.unwrap());
}

#[tokio::test]
async fn test_start_recording_gives_up_after_poll_attempts() {
    let exchange = adobe_device();
    exchange.route("meeting-recorder-activity-info", idle_recorder());
    let connector = connected(&exchange, Arc::new(RecordingController::new())).await;

    let error = connector
        .start_recording("f-77", &RecordingTarget::Room("400".into()))
        .await
        .unwrap_err();
    assert!(error.has_code("recording-unavailable", None));
    assert_eq!(exchange.count("meeting-recorder-activity-info"), 3);
}

#[tokio::test]
async fn test_recording_an_alias_is_rejected() {
    let exchange = adobe_device();
    let connector = connected(&exchange, Arc::new(RecordingController::new())).await;

    let error = connector
        .start_recording("f-77", &RecordingTarget::Alias(Alias::uri("sip:room@mcu.example.org")))
        .await
        .unwrap_err();
    assert!(matches!(error, CommandError::InvalidArgument { .. }));
    assert_eq!(exchange.count("meeting-recorder-activity-update"), 0);
}

#[tokio::test]
async fn test_stop_recording_moves_it_into_its_folder() {
    let exchange = adobe_device();
    exchange.route("meeting-recorder-activity-info", busy_recorder("13001"));
    let connector = connected(&exchange, Arc::new(RecordingController::new())).await;

    let recording_id = connector
        .start_recording("f-77", &RecordingTarget::Room("400".into()))
        .await
        .unwrap();
    connector.stop_recording(&recording_id).await.unwrap();

    let updates = exchange.requests_for("meeting-recorder-activity-update");
    assert_eq!(query_param(&updates[1], "active").as_deref(), Some("false"));
    assert_eq!(query_param(&updates[1], "sco-id").as_deref(), Some("400"));

    let moved = &exchange.requests_for("sco-move")[0];
    assert_eq!(query_param(moved, "sco-id").as_deref(), Some("13001"));
    assert_eq!(query_param(moved, "folder-id").as_deref(), Some("f-77"));

    let lookups = exchange.count("sco-info");
    assert!(connector.is_recording_stored("13001").await.unwrap());
    assert_eq!(exchange.count("sco-info"), lookups);
}

#[tokio::test]
async fn test_recording_leaves_the_room_before_the_room_is_deleted() {
    let exchange = adobe_device();
    exchange
        .route("meeting-recorder-activity-info", busy_recorder("13001"))
        .route("sco-delete", adobe_ok(""));
    let connector = connected(&exchange, Arc::new(RecordingController::new())).await;

    let recording_id = connector
        .start_recording("f-77", &RecordingTarget::Room("400".into()))
        .await
        .unwrap();
    connector.stop_recording(&recording_id).await.unwrap();
    connector.delete_room("400").await.unwrap();

    let order: Vec<String> = exchange
        .keys()
        .into_iter()
        .filter(|key| key == "sco-move" || key == "sco-delete")
        .collect();
    assert_eq!(order, vec!["sco-move", "sco-delete"]);
}

#[tokio::test]
async fn test_executor_stop_pass_moves_the_recording_before_deleting_its_room() {
    let exchange = adobe_device();
    exchange
        .route("meeting-recorder-activity-info", busy_recorder("13001"))
        .route("sco-delete", adobe_ok(""));
    let connector = Arc::new(connected(&exchange, Arc::new(RecordingController::new())).await);
    let recording_id = connector
        .start_recording("f-77", &RecordingTarget::Room("400".into()))
        .await
        .unwrap();

    let start = chrono::Utc::now() - chrono::Duration::minutes(60);
    let slot = Slot::new(start, start + chrono::Duration::minutes(30));
    let store = Arc::new(MemoryExecutableStore::new());
    let mut room = Executable::new(
        ExecutableId(1),
        slot,
        ExecutableKind::Room(RoomEndpoint {
            device: DeviceId::from("acr-1"),
            room: RoomSpec::new("weekly", 5),
        }),
    );
    room.state = ExecutableState::Started;
    room.mark_applied();
    room.resource_id = Some("400".to_string());
    let mut recording = Executable::new(
        ExecutableId(2),
        slot,
        ExecutableKind::Recording(RecordingService {
            room: ExecutableId(1),
            device: DeviceId::from("acr-1"),
            folder_name: "weekly-recordings".to_string(),
        }),
    )
    .with_children([ExecutableId(1)]);
    recording.state = ExecutableState::Started;
    recording.mark_applied();
    recording.resource_id = Some(recording_id);
    recording.recording_folder_id = Some("f-77".to_string());
    store.put(room);
    store.put(recording);

    let registry = Arc::new(ConnectorRegistry::new(std::time::Duration::from_secs(5)));
    registry.register(DeviceId::from("acr-1"), connector as Arc<dyn Connector>);
    let executor = Executor::new(store.clone(), registry, ExecutorConfig::default());

    let result = executor.execute(chrono::Utc::now()).await.unwrap();
    assert_eq!(result.stopped, vec![ExecutableId(2), ExecutableId(1)]);
    assert_eq!(store.get(ExecutableId(1)).unwrap().state, ExecutableState::Stopped);

    let order: Vec<String> = exchange
        .keys()
        .into_iter()
        .filter(|key| matches!(key.as_str(), "meeting-recorder-activity-update" | "sco-move" | "sco-delete"))
        .collect();
    assert_eq!(
        order,
        vec![
            "meeting-recorder-activity-update",
            "meeting-recorder-activity-update",
            "sco-move",
            "sco-delete"
        ]
    );
    let moved = &exchange.requests_for("sco-move")[0];
    assert_eq!(query_param(moved, "sco-id").as_deref(), Some("13001"));
    assert_eq!(query_param(moved, "folder-id").as_deref(), Some("f-77"));
}

#[tokio::test]
async fn test_failed_move_notifies_administrators() {
    let exchange = adobe_device();
    exchange
        .route("meeting-recorder-activity-info", busy_recorder("13001"))
        .route("sco-move", adobe_status("no-access", Some("denied")));
    let controller = Arc::new(RecordingController::new());
    let connector = connected(&exchange, Arc::clone(&controller)).await;

    let recording_id = connector
        .start_recording("f-77", &RecordingTarget::Room("400".into()))
        .await
        .unwrap();
    connector.stop_recording(&recording_id).await.unwrap();

    let notifications = controller.administrator_notifications();
    assert_eq!(notifications.len(), 1);
    assert!(notifications[0].title.en.contains("13001"));
    assert!(!connector.is_recording_stored("13001").await.unwrap());
}

#[tokio::test]
async fn test_capacity_overflow_is_reported_once_per_count() {
    let exchange = adobe_device();
    exchange.route(
        "report-active-meetings",
        adobe_ok(concat!(
            r#"<report-active-meetings><sco sco-id="400" active-participants="7"><name>Weekly</name></sco>"#,
            r#"<sco sco-id="999" active-participants="50"><name>Foreign</name></sco></report-active-meetings>"#
        )),
    );
    let controller = Arc::new(RecordingController::new().with_capacity("400", 5));
    let connector = connected(&exchange, Arc::clone(&controller)).await;

    connector.check_capacity().await;
    connector.check_capacity().await;
    let notified = controller.room_owner_notifications();
    assert_eq!(notified.len(), 1);
    assert_eq!(notified[0].0, "400");
    assert!(notified[0].1.body.en.contains("7 participants"));

    exchange.route(
        "report-active-meetings",
        adobe_ok(r#"<report-active-meetings><sco sco-id="400" active-participants="9"><name>Weekly</name></sco></report-active-meetings>"#),
    );
    connector.check_capacity().await;
    assert_eq!(controller.room_owner_notifications().len(), 2);
}

#[tokio::test]
async fn test_capacity_of_a_vanished_room_is_forgotten() {
    let exchange = adobe_device();
    let report = r#"<report-active-meetings><sco sco-id="400" active-participants="7"><name>Weekly</name></sco></report-active-meetings>"#;
    exchange.route("report-active-meetings", adobe_ok(report));
    let controller = Arc::new(RecordingController::new().with_capacity("400", 5));
    let connector = connected(&exchange, Arc::clone(&controller)).await;
    let lookups = || {
        controller
            .actions()
            .iter()
            .filter(|action| matches!(action, ControllerAction::GetRoomCapacity { .. }))
            .count()
    };

    connector.check_capacity().await;
    connector.check_capacity().await;
    assert_eq!(lookups(), 1);
    assert_eq!(controller.room_owner_notifications().len(), 1);

    // Deleted on the device, not through the connector
    exchange
        .route("sco-contents", adobe_no_data())
        .route("report-active-meetings", adobe_no_data());
    connector.check_capacity().await;

    exchange
        .route_fn("sco-contents", |request| match query_param(request, "filter-type").as_deref() {
            Some("meeting") => adobe_ok(MEETINGS),
            _ => adobe_ok(FOLDERS),
        })
        .route("report-active-meetings", adobe_ok(report));
    connector.check_capacity().await;
    assert_eq!(lookups(), 2);
    assert_eq!(controller.room_owner_notifications().len(), 2);
}

#[tokio::test]
async fn test_room_within_capacity_is_not_reported() {
    let exchange = adobe_device();
    exchange.route(
        "report-active-meetings",
        adobe_ok(r#"<report-active-meetings><sco sco-id="400" active-participants="5"><name>Weekly</name></sco></report-active-meetings>"#),
    );
    let controller = Arc::new(RecordingController::new().with_capacity("400", 5));
    let connector = connected(&exchange, Arc::clone(&controller)).await;

    connector.check_capacity().await;
    assert!(controller.room_owner_notifications().is_empty());
}

#[tokio::test]
async fn test_reconciliation_moves_recordings_left_in_rooms() {
    let exchange = adobe_device();
    exchange.route(
        "report-bulk-objects",
        adobe_ok(concat!(
            r#"<report-bulk-objects><row sco-id="13001" type="archive"><name>broker_400_20240301</name></row>"#,
            r#"<row sco-id="13002" type="archive"><name>broker_old</name></row>"#,
            r#"<row sco-id="13009" type="archive"><name>manual upload</name></row></report-bulk-objects>"#
        )),
    );
    let controller = Arc::new(RecordingController::new().with_recording_folder("400", "f-77"));
    let connector = connected(&exchange, controller).await;

    connector.check_recordings().await;
    let moves = exchange.requests_for("sco-move");
    assert_eq!(moves.len(), 1);
    assert_eq!(query_param(&moves[0], "sco-id").as_deref(), Some("13001"));
    assert_eq!(query_param(&moves[0], "folder-id").as_deref(), Some("f-77"));
    assert!(exchange
        .requests_for("sco-info")
        .iter()
        .all(|request| query_param(request, "sco-id").as_deref() != Some("13009")));

    // Both are known to be stored now
    connector.check_recordings().await;
    assert_eq!(exchange.count("sco-move"), 1);
}

#[tokio::test]
async fn test_disconnect_clears_the_session() {
    let exchange = adobe_device();
    let connector = connected(&exchange, Arc::new(RecordingController::new())).await;

    connector.disconnect().await.unwrap();
    assert_eq!(connector.info().state, ConnectionState::Disconnected);
    assert_eq!(exchange.count("logout"), 1);
    assert!(matches!(
        connector.list_rooms().await,
        Err(CommandError::NotConnected { .. })
    ));
}
