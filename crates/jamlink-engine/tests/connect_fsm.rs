use std::sync::Arc;
use std::time::{Duration, Instant};

use jamlink_engine::testing::{LoopServer, ServerScript};
use jamlink_engine::{
    AudioPath, ClientError, CodecKind, ConnectParams, Engine, LicenseDecision, PeerChannelParam,
    SessionConfig, Tick, PEER_CHANNEL_SLOTS,
};
use jamlink_rt::{ConnectionStatus, EventQueue, UiEvent, UiSnapshot};

fn new_engine() -> (Engine, AudioPath, Arc<EventQueue>, Arc<UiSnapshot>) {
    let events = Arc::new(EventQueue::with_capacity(256));
    let snapshot = Arc::new(UiSnapshot::default());
    let (engine, audio) = jamlink_engine::create(
        SessionConfig {
            sample_rate: 48_000,
            max_block_frames: 512,
        },
        CodecKind::RawPcm,
        Arc::clone(&events),
        Arc::clone(&snapshot),
    );
    (engine, audio, events, snapshot)
}

fn params(server: &LoopServer) -> ConnectParams {
    ConnectParams {
        host: server.host(),
        username: "tester".into(),
        password: "pw".into(),
    }
}

/// Ticks the engine until `pred` holds or the deadline passes.
fn tick_until(engine: &mut Engine, ms: u64, mut pred: impl FnMut(&Engine) -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_millis(ms);
    while Instant::now() < deadline {
        let _ = engine.run();
        if pred(engine) {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    false
}

fn status_trail(events: &EventQueue) -> Vec<ConnectionStatus> {
    let mut trail = Vec::new();
    events.drain(|ev| {
        if let UiEvent::StatusChanged { status, .. } = ev {
            trail.push(status);
        }
    });
    trail
}

#[test]
fn cold_connect_walks_the_state_machine() {
    let server = LoopServer::start(ServerScript::default());
    let (mut engine, _audio, events, snapshot) = new_engine();

    engine.connect(params(&server));
    assert!(
        tick_until(&mut engine, 2000, |e| e.status() == ConnectionStatus::Joined),
        "never joined"
    );

    let trail = status_trail(&events);
    assert_eq!(
        trail,
        vec![
            ConnectionStatus::Resolving,
            ConnectionStatus::Handshaking,
            ConnectionStatus::Authenticating,
            ConnectionStatus::Joined,
        ],
        "unexpected transition order"
    );

    // Tempo lands within a tick or two of joining.
    assert!(tick_until(&mut engine, 500, |_| {
        let (bpm, bpi) = snapshot.tempo();
        bpm > 0.0 && bpi > 0
    }));
    assert_eq!(snapshot.tempo(), (120.0, 16));
}

#[test]
fn license_text_reaches_the_prompt_and_accept_joins() {
    let server = LoopServer::start(ServerScript {
        license: Some("TERMS".into()),
        ..ServerScript::default()
    });
    let (mut engine, _audio, _events, _snapshot) = new_engine();

    engine.connect(params(&server));
    let mut saw_license = false;
    let ok = tick_until(&mut engine, 2000, |e| {
        saw_license |= e.status() == ConnectionStatus::AwaitingLicense;
        e.status() == ConnectionStatus::AwaitingLicense
    });
    assert!(ok && saw_license, "license prompt never surfaced");
    assert_eq!(engine.license_text().as_deref(), Some("TERMS"));

    engine.set_license_reply(LicenseDecision::Accept).unwrap();
    assert!(tick_until(&mut engine, 2000, |e| {
        e.status() == ConnectionStatus::Joined
    }));
}

#[test]
fn license_reject_fails_the_session() {
    let server = LoopServer::start(ServerScript {
        license: Some("TERMS".into()),
        ..ServerScript::default()
    });
    let (mut engine, _audio, events, _snapshot) = new_engine();

    engine.connect(params(&server));
    assert!(tick_until(&mut engine, 2000, |e| {
        e.status() == ConnectionStatus::AwaitingLicense
    }));

    let err = engine
        .set_license_reply(LicenseDecision::Reject)
        .unwrap_err();
    assert!(matches!(err, ClientError::LicenseRejected));
    assert_eq!(engine.status(), ConnectionStatus::Failed);

    let mut detail = None;
    events.drain(|ev| {
        if let UiEvent::StatusChanged {
            status: ConnectionStatus::Failed,
            detail: d,
        } = ev
        {
            detail = d;
        }
    });
    assert_eq!(detail.as_deref(), Some("license rejected"));
}

#[test]
fn rejected_credentials_surface_the_server_message() {
    let server = LoopServer::start(ServerScript {
        accept_auth: false,
        ..ServerScript::default()
    });
    let (mut engine, _audio, events, _snapshot) = new_engine();

    engine.connect(params(&server));
    assert!(tick_until(&mut engine, 2000, |e| {
        e.status() == ConnectionStatus::Failed
    }));

    let mut detail = None;
    events.drain(|ev| {
        if let UiEvent::StatusChanged {
            status: ConnectionStatus::Failed,
            detail: d,
        } = ev
        {
            detail = d;
        }
    });
    let detail = detail.expect("failure carries a reason");
    assert!(detail.contains("invalid login"), "got: {detail}");
}

#[test]
fn local_channel_info_is_diffed_before_sending() {
    let server = LoopServer::start(ServerScript::default());
    let (mut engine, _audio, _events, _snapshot) = new_engine();

    engine.connect(params(&server));
    assert!(tick_until(&mut engine, 2000, |e| e.status() == ConnectionStatus::Joined));

    // The join handshake already announced the default description.
    let same = engine.local_channel().clone();
    assert!(!engine.set_local_channel_info(same).unwrap());

    let mut renamed = engine.local_channel().clone();
    renamed.name = "gtr".into();
    assert!(engine.set_local_channel_info(renamed.clone()).unwrap());
    assert!(!engine.set_local_channel_info(renamed).unwrap());

    // Exactly two descriptions on the wire: the initial one and the rename.
    let _ = engine.run();
    std::thread::sleep(Duration::from_millis(50));
    let log = server.log();
    assert_eq!(log.lock().count(0x82), 2);
}

#[test]
fn peer_channel_edits_round_trip_and_capacity_is_bounded() {
    let extra: Vec<(String, String)> = (0..=PEER_CHANNEL_SLOTS)
        .map(|i| (format!("peer{i}"), "ch".to_string()))
        .collect();
    let server = LoopServer::start(ServerScript {
        extra_channels: extra,
        ..ServerScript::default()
    });
    let (mut engine, _audio, events, _snapshot) = new_engine();

    engine.connect(params(&server));
    assert!(tick_until(&mut engine, 2000, |e| e.status() == ConnectionStatus::Joined));
    let roster_handle = engine.roster_handle();
    assert!(
        tick_until(&mut engine, 2000, |_| {
            roster_handle.load().users.len() == PEER_CHANNEL_SLOTS + 1
        }),
        "roster never filled"
    );

    // All seats taken; the one channel over capacity was refused.
    let roster = roster_handle.load();
    let subscribed = roster
        .users
        .iter()
        .flat_map(|u| &u.channels)
        .filter(|c| c.subscribed)
        .count();
    assert_eq!(subscribed, PEER_CHANNEL_SLOTS);

    let mut notices = 0;
    events.drain(|ev| {
        if matches!(ev, UiEvent::Notice(ref n) if n.contains("seat")) {
            notices += 1;
        }
    });
    assert_eq!(notices, 1, "capacity refusal should be a single notice");

    // Subscribing the refused channel explicitly reports the same error.
    let refused = roster
        .users
        .iter()
        .find(|u| u.channels.iter().any(|c| !c.subscribed))
        .expect("one refused channel")
        .name
        .clone();
    let err = engine
        .set_peer_channel(&refused, 0, PeerChannelParam::Subscribed(true))
        .unwrap_err();
    assert!(matches!(err, ClientError::CapacityExceeded));

    // set(x) then get returns x.
    engine
        .set_peer_channel("peer0", 0, PeerChannelParam::Volume(1.5))
        .unwrap();
    engine
        .set_peer_channel("peer0", 0, PeerChannelParam::Pan(-0.5))
        .unwrap();
    engine
        .set_peer_channel("peer0", 0, PeerChannelParam::Mute(true))
        .unwrap();
    assert!(matches!(engine.run(), Ok(Tick::Progressed) | Ok(Tick::Idle)));
    let roster = roster_handle.load();
    let ch = roster
        .users
        .iter()
        .find(|u| u.name == "peer0")
        .and_then(|u| u.channels.first())
        .expect("peer0 channel");
    assert_eq!((ch.volume, ch.pan, ch.mute), (1.5, -0.5, true));

    // Unsubscribe frees the seat for the refused channel.
    engine
        .set_peer_channel("peer0", 0, PeerChannelParam::Subscribed(false))
        .unwrap();
    engine
        .set_peer_channel(&refused, 0, PeerChannelParam::Subscribed(true))
        .unwrap();
}

#[test]
fn disconnect_returns_to_idle() {
    let server = LoopServer::start(ServerScript::default());
    let (mut engine, _audio, _events, _snapshot) = new_engine();

    engine.connect(params(&server));
    assert!(tick_until(&mut engine, 2000, |e| e.status() == ConnectionStatus::Joined));

    engine.disconnect();
    assert_eq!(engine.status(), ConnectionStatus::Disconnecting);
    assert!(tick_until(&mut engine, 500, |e| e.status() == ConnectionStatus::Idle));
}
