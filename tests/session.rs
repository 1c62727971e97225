//! End-to-end behaviour against a scripted device on loopback

mod common;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use common::{controller_for, free_udp_port, test_config, FakeTello};
use std::time::Duration;
use tello_link::{spawn_controller, Request, SessionStatus};
use tello_link::shared::{Command, CommandKind, DroneError, FlightStatus, MoveDirection, RotateDirection};
use tokio::net::UdpSocket;

#[tokio::test]
async fn test_connect_is_idempotent() {
    let fake = FakeTello::start().await;
    let drone = controller_for(&fake);

    let first = drone.connect("agent").await.unwrap();
    assert_eq!(first.message, "Connected to drone");
    assert_eq!(first.data.battery, Some(45));
    assert!(first.data.connected);

    let second = drone.connect("agent").await.unwrap();
    assert_eq!(second.message, "Already connected");
    assert!(second.data.connected);

    assert_eq!(fake.count("command"), 1);
    let snap = drone.snapshot();
    assert_eq!(snap.session, SessionStatus::Connected);
    assert_eq!(snap.flight_status, FlightStatus::Grounded);
    assert_eq!(snap.retry_count, 0);
    assert!(snap.last_contact_ms.is_some());
}

#[tokio::test]
async fn test_connect_fails_when_device_is_silent() {
    let fake = FakeTello::start().await;
    fake.silence("command");
    let drone = controller_for(&fake);

    let err = drone.connect("agent").await.unwrap_err();
    assert_eq!(err.kind(), "connection_error");
    assert_eq!(fake.count("command"), 2);
    let snap = drone.snapshot();
    assert_eq!(snap.session, SessionStatus::Error);
    assert_eq!(snap.retry_count, 1);
    assert!(snap.last_contact_ms.is_none());

    // Later commands make one fresh connection attempt of their own
    let err = drone.takeoff("agent").await.unwrap_err();
    assert_eq!(err.kind(), "connection_error");
    assert_eq!(fake.count("command"), 4);
    assert_eq!(fake.count("takeoff"), 0);
}

#[tokio::test]
async fn test_flight_sequence() {
    let fake = FakeTello::start().await;
    let drone = controller_for(&fake);

    let connected = drone.connect("agent").await.unwrap();
    assert_eq!(connected.data.battery, Some(45));

    drone.takeoff("agent").await.unwrap();
    assert_eq!(drone.snapshot().flight_status, FlightStatus::Flying);

    let moved = drone
        .move_by(MoveDirection::Forward, 100, "agent")
        .await
        .unwrap();
    assert_eq!(moved.message, "Moved forward 100cm");
    assert_eq!(drone.snapshot().flight_status, FlightStatus::Flying);

    let turned = drone
        .rotate(RotateDirection::Clockwise, 90, "agent")
        .await
        .unwrap();
    assert_eq!(turned.message, "Rotated cw 90 degrees");

    let landed = drone.land("agent").await.unwrap();
    assert_eq!(landed.message, "Landed");
    assert_eq!(drone.snapshot().flight_status, FlightStatus::Grounded);

    assert_eq!(
        fake.commands(),
        ["command", "battery?", "takeoff", "forward 100", "cw 90", "land"]
    );

    let last = drone.snapshot().last_completed.unwrap();
    assert_eq!(last.caller_id, "agent");
    assert_eq!(last.request, "land");
}

#[tokio::test]
async fn test_low_battery_blocks_takeoff() {
    let fake = FakeTello::start().await;
    fake.set_battery(15);
    let drone = controller_for(&fake);

    drone.connect("agent").await.unwrap();
    let err = drone.takeoff("agent").await.unwrap_err();
    assert!(matches!(err, DroneError::LowBattery { percent: 15, .. }));
    assert_eq!(err.kind(), "low_battery");

    assert_eq!(fake.count("takeoff"), 0);
    assert_eq!(drone.snapshot().flight_status, FlightStatus::Grounded);
}

#[tokio::test]
async fn test_stale_battery_is_refreshed_before_takeoff() {
    let fake = FakeTello::start().await;
    let mut config = test_config(fake.addr());
    config.safety.battery_freshness_ms = 100;
    let drone = spawn_controller(&config);

    drone.connect("agent").await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    // Battery dropped while the old reading aged out
    fake.set_battery(10);
    let err = drone.takeoff("agent").await.unwrap_err();
    assert_eq!(err.kind(), "low_battery");
    assert_eq!(fake.commands(), ["command", "battery?", "battery?"]);
}

#[tokio::test]
async fn test_out_of_range_values_send_nothing() {
    let fake = FakeTello::start().await;
    let drone = controller_for(&fake);

    let err = drone
        .move_by(MoveDirection::Left, 700, "agent")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "invalid_parameter");
    assert!(fake.commands().is_empty());

    drone.connect("agent").await.unwrap();
    drone.takeoff("agent").await.unwrap();
    let before = fake.commands().len();

    for degrees in [0, 361] {
        let err = drone
            .rotate(RotateDirection::CounterClockwise, degrees, "agent")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_parameter");
    }
    let err = drone
        .move_by(MoveDirection::Up, 19, "agent")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "invalid_parameter");

    assert_eq!(fake.commands().len(), before);
    assert_eq!(drone.snapshot().flight_status, FlightStatus::Flying);
}

#[tokio::test]
async fn test_move_while_grounded_is_illegal() {
    let fake = FakeTello::start().await;
    let drone = controller_for(&fake);

    drone.connect("agent").await.unwrap();
    let err = drone
        .move_by(MoveDirection::Forward, 100, "agent")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "illegal_state");
    assert_eq!(fake.count("forward 100"), 0);

    let err = drone.land("agent").await.unwrap_err();
    assert_eq!(err.kind(), "illegal_state");
    assert_eq!(fake.count("land"), 0);
}

#[tokio::test]
async fn test_timeout_then_query_resyncs() {
    let fake = FakeTello::start().await;
    fake.silence("forward");
    let drone = controller_for(&fake);

    drone.connect("agent").await.unwrap();
    drone.takeoff("agent").await.unwrap();

    let err = drone
        .move_by(MoveDirection::Forward, 100, "agent")
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "timeout");
    assert_eq!(err.kind(), "timeout");
    assert_eq!(drone.snapshot().session, SessionStatus::Error);
    assert_eq!(drone.snapshot().flight_status, FlightStatus::Flying);

    let query = drone.query("agent").await.unwrap();
    assert_eq!(query.message, "Battery: 45%");
    let snap = drone.snapshot();
    assert_eq!(snap.session, SessionStatus::Connected);
    // The drone may still be airborne; reconnecting keeps the known state
    assert_eq!(snap.flight_status, FlightStatus::Flying);
    assert_eq!(fake.count("command"), 2);
}

#[tokio::test]
async fn test_concurrent_moves_are_serialized() {
    let fake = FakeTello::start().await;
    fake.delay("forward", Duration::from_millis(150));
    fake.delay("back", Duration::from_millis(150));
    let drone = controller_for(&fake);

    drone.connect("agent").await.unwrap();
    drone.takeoff("agent").await.unwrap();

    let a = drone.clone();
    let b = drone.clone();
    let results = futures::future::join_all([
        tokio::spawn(async move { a.move_by(MoveDirection::Forward, 50, "a").await }),
        tokio::spawn(async move { b.move_by(MoveDirection::Back, 50, "b").await }),
    ])
    .await;
    for result in results {
        result.unwrap().unwrap();
    }

    let moves: Vec<_> = fake
        .exchanges()
        .into_iter()
        .filter(|e| e.command.starts_with("forward") || e.command.starts_with("back"))
        .collect();
    assert_eq!(moves.len(), 2);
    let first_answered = moves[0].answered_at.unwrap();
    assert!(
        moves[1].received_at >= first_answered,
        "second move was sent before the first was answered"
    );
}

#[tokio::test]
async fn test_emergency_overtakes_queued_commands() {
    let fake = FakeTello::start().await;
    fake.delay("forward", Duration::from_millis(300));
    let drone = controller_for(&fake);

    drone.connect("agent").await.unwrap();
    drone.takeoff("agent").await.unwrap();

    let a = drone.clone();
    let moving = tokio::spawn(async move { a.move_by(MoveDirection::Forward, 100, "a").await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let b = drone.clone();
    let queued = tokio::spawn(async move { b.move_by(MoveDirection::Back, 100, "b").await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(drone.pending(), 2);

    let stop = drone.emergency("safety").await.unwrap();
    assert!(stop.message.contains("Emergency stop"));

    moving.await.unwrap().unwrap();
    let err = queued.await.unwrap().unwrap_err();
    assert_eq!(err.kind(), "illegal_state");

    assert_eq!(
        fake.commands(),
        ["command", "battery?", "takeoff", "forward 100", "emergency"]
    );
    assert_eq!(drone.snapshot().flight_status, FlightStatus::Emergency);

    // Only a fresh connect leaves Emergency
    let err = drone.takeoff("agent").await.unwrap_err();
    assert_eq!(err.kind(), "illegal_state");
    let reconnect = drone.connect("agent").await.unwrap();
    assert_eq!(reconnect.message, "Connected to drone");
    assert_eq!(drone.snapshot().flight_status, FlightStatus::Grounded);
}

#[tokio::test]
async fn test_emergency_without_link_still_applies_locally() {
    let fake = FakeTello::start().await;
    fake.silence("command");
    let drone = controller_for(&fake);

    let err = drone.emergency("safety").await.unwrap_err();
    assert_eq!(err.kind(), "connection_error");
    assert_eq!(drone.snapshot().flight_status, FlightStatus::Emergency);
    assert_eq!(fake.count("emergency"), 0);
}

#[tokio::test]
async fn test_emergency_without_ack_still_applies() {
    let fake = FakeTello::start().await;
    fake.silence("emergency");
    let drone = controller_for(&fake);

    drone.connect("agent").await.unwrap();
    drone.takeoff("agent").await.unwrap();
    let stop = drone.emergency("safety").await.unwrap();
    assert!(stop.message.contains("no device ack"));
    assert_eq!(drone.snapshot().flight_status, FlightStatus::Emergency);
    assert_eq!(fake.count("emergency"), 1);
}

#[tokio::test]
async fn test_try_execute_reports_busy() {
    let fake = FakeTello::start().await;
    fake.delay("takeoff", Duration::from_millis(300));
    let drone = controller_for(&fake);

    drone.connect("agent").await.unwrap();

    let a = drone.clone();
    let flying = tokio::spawn(async move { a.takeoff("a").await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let query = Request::Drone(Command::new(CommandKind::Query, "b"));
    let err = drone.try_execute(query.clone(), "b").await.unwrap_err();
    assert!(matches!(err, DroneError::Busy));

    flying.await.unwrap().unwrap();
    let answer = drone.try_execute(query, "b").await.unwrap();
    assert_eq!(answer.data.battery, Some(45));
}

#[tokio::test]
async fn test_abandoned_request_is_not_sent() {
    let fake = FakeTello::start().await;
    fake.delay("forward", Duration::from_millis(300));
    let drone = controller_for(&fake);

    drone.connect("agent").await.unwrap();
    drone.takeoff("agent").await.unwrap();

    let a = drone.clone();
    let moving = tokio::spawn(async move { a.move_by(MoveDirection::Forward, 100, "a").await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let gave_up = tokio::time::timeout(
        Duration::from_millis(50),
        drone.move_by(MoveDirection::Back, 100, "impatient"),
    )
    .await;
    assert!(gave_up.is_err());

    moving.await.unwrap().unwrap();
    drone.query("agent").await.unwrap();
    assert_eq!(fake.count("back 100"), 0);
    assert_eq!(drone.pending(), 0);
}

#[tokio::test]
async fn test_failed_land_keeps_flying() {
    let fake = FakeTello::start().await;
    fake.fail("land", "error");
    let drone = controller_for(&fake);

    drone.connect("agent").await.unwrap();
    drone.takeoff("agent").await.unwrap();

    let err = drone.land("agent").await.unwrap_err();
    assert_eq!(err.kind(), "device_error");
    assert_eq!(drone.snapshot().flight_status, FlightStatus::Flying);
}

#[tokio::test]
async fn test_auto_land_report_grounds_the_drone() {
    let fake = FakeTello::start().await;
    fake.fail("forward", "error Auto land");
    let drone = controller_for(&fake);

    drone.connect("agent").await.unwrap();
    drone.takeoff("agent").await.unwrap();

    let err = drone
        .move_by(MoveDirection::Forward, 100, "agent")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "device_error");
    assert_eq!(drone.snapshot().flight_status, FlightStatus::Grounded);
}

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    let fake = FakeTello::start().await;
    let drone = controller_for(&fake);

    drone.disconnect("agent").await.unwrap();
    drone.connect("agent").await.unwrap();
    drone.disconnect("agent").await.unwrap();
    drone.disconnect("agent").await.unwrap();

    let snap = drone.snapshot();
    assert_eq!(snap.session, SessionStatus::Disconnected);
    assert_eq!(snap.flight_status, FlightStatus::Unknown);

    let status = drone.status().await;
    assert_eq!(status.queued, 0);
    assert!(!status.video_streaming);
}

#[tokio::test]
async fn test_video_frames_bypass_the_serializer() {
    let fake = FakeTello::start().await;
    let port = free_udp_port().await;
    let mut config = test_config(fake.addr());
    config.drone.video_bind = format!("127.0.0.1:{}", port).parse().unwrap();
    let drone = spawn_controller(&config);

    let err = drone.video_frame().await.unwrap_err();
    assert_eq!(err.kind(), "video_unavailable");

    drone.video_start("viewer").await.unwrap();
    assert_eq!(fake.count("streamon"), 1);

    let err = drone.video_frame().await.unwrap_err();
    assert_eq!(err.kind(), "video_unavailable");

    let camera = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    camera
        .send_to(b"\x00\x00\x00\x01frame", ("127.0.0.1", port))
        .await
        .unwrap();

    let mut frame = None;
    for _ in 0..50 {
        if let Ok(f) = drone.video_frame().await {
            frame = Some(f);
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let frame = frame.expect("no frame assembled");
    assert_eq!(STANDARD.decode(frame.image).unwrap(), b"\x00\x00\x00\x01frame");
    assert!(drone.status().await.video_streaming);

    drone.video_stop("viewer").await.unwrap();
    assert_eq!(fake.count("streamoff"), 1);
    let err = drone.video_frame().await.unwrap_err();
    assert_eq!(err.kind(), "video_unavailable");
}

#[tokio::test]
async fn test_late_answer_is_not_taken_as_handshake_ack() {
    let fake = FakeTello::start().await;
    fake.delay("forward", Duration::from_millis(700));
    let port = free_udp_port().await;
    let mut config = test_config(fake.addr());
    config.drone.local_bind = format!("127.0.0.1:{}", port).parse().unwrap();
    config.timeouts.late_grace_ms = 500;
    let drone = spawn_controller(&config);

    drone.connect("agent").await.unwrap();
    drone.takeoff("agent").await.unwrap();

    // 420ms budget; the device answers at 700ms
    let err = drone
        .move_by(MoveDirection::Forward, 20, "agent")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "timeout");

    let landed = drone.land("agent").await.unwrap();
    assert_eq!(landed.message, "Landed");
    let snap = drone.snapshot();
    assert_eq!(snap.flight_status, FlightStatus::Grounded);
    assert_eq!(snap.battery.map(|b| b.percent), Some(45));
    assert_eq!(
        fake.commands(),
        ["command", "battery?", "takeoff", "forward 20", "command", "battery?", "land"]
    );
}

#[tokio::test]
async fn test_abandoned_emergency_is_still_sent() {
    let fake = FakeTello::start().await;
    fake.delay("forward", Duration::from_millis(300));
    let drone = controller_for(&fake);

    drone.connect("agent").await.unwrap();
    drone.takeoff("agent").await.unwrap();

    let a = drone.clone();
    let moving = tokio::spawn(async move { a.move_by(MoveDirection::Forward, 100, "a").await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let gave_up = tokio::time::timeout(Duration::from_millis(50), drone.emergency("safety")).await;
    assert!(gave_up.is_err());

    moving.await.unwrap().unwrap();
    let mut state = drone.subscribe();
    while drone.snapshot().flight_status != FlightStatus::Emergency {
        tokio::time::timeout(Duration::from_secs(1), state.changed())
            .await
            .unwrap()
            .unwrap();
    }
    assert_eq!(fake.count("emergency"), 1);
}

#[tokio::test]
async fn test_illegal_command_on_degraded_session_sends_nothing() {
    let fake = FakeTello::start().await;
    let drone = controller_for(&fake);

    drone.connect("agent").await.unwrap();
    fake.silence("battery?");
    let err = drone.query("agent").await.unwrap_err();
    assert_eq!(err.kind(), "timeout");
    assert_eq!(drone.snapshot().session, SessionStatus::Error);
    assert_eq!(drone.snapshot().flight_status, FlightStatus::Grounded);
    fake.unsilence("battery?");

    let before = fake.commands().len();
    let err = drone
        .move_by(MoveDirection::Forward, 100, "agent")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "illegal_state");
    let err = drone.land("agent").await.unwrap_err();
    assert_eq!(err.kind(), "illegal_state");
    assert_eq!(fake.commands().len(), before);

    // A legal command still reconnects first
    drone.takeoff("agent").await.unwrap();
    assert_eq!(
        &fake.commands()[before..],
        ["command", "battery?", "takeoff"]
    );
}
