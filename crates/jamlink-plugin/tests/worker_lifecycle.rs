//! The worker thread's lifetime equals the activation span: deactivation
//! must stop and join it promptly, even while connected or parked on the
//! license prompt.

use std::time::{Duration, Instant};

use jamlink_engine::testing::{LoopServer, ServerScript};
use jamlink_plugin::JamLinkPlugin;
use jamlink_rt::ConnectionStatus;

#[test]
fn deactivate_joins_the_worker_promptly() {
    let mut plugin = JamLinkPlugin::new();
    plugin.activate(48_000, 256);
    assert!(plugin.is_active());

    let started = Instant::now();
    plugin.deactivate();
    assert!(!plugin.is_active());
    assert!(
        started.elapsed() < Duration::from_millis(500),
        "join took {:?}",
        started.elapsed()
    );
}

#[test]
fn deactivate_while_connected_is_still_prompt() {
    let server = LoopServer::start(ServerScript::default());
    let mut plugin = JamLinkPlugin::new();
    plugin.activate(48_000, 256);
    plugin.connect(&server.host(), "leaver", "pw").unwrap();

    let deadline = Instant::now() + Duration::from_secs(2);
    while plugin.status() != ConnectionStatus::Joined {
        assert!(Instant::now() < deadline, "never joined");
        std::thread::sleep(Duration::from_millis(2));
    }

    let started = Instant::now();
    plugin.deactivate();
    assert!(started.elapsed() < Duration::from_millis(500));
}

#[test]
fn deactivate_wakes_a_worker_parked_on_the_license_prompt() {
    let server = LoopServer::start(ServerScript {
        license: Some("TERMS".into()),
        ..ServerScript::default()
    });
    let mut plugin = JamLinkPlugin::new();
    plugin.activate(48_000, 256);
    plugin.connect(&server.host(), "parked", "pw").unwrap();

    let deadline = Instant::now() + Duration::from_secs(2);
    while plugin.license_pending().is_none() {
        assert!(Instant::now() < deadline, "prompt never surfaced");
        std::thread::sleep(Duration::from_millis(2));
    }

    // The production license deadline is a minute; teardown must not wait
    // for it.
    let started = Instant::now();
    plugin.deactivate();
    assert!(
        started.elapsed() < Duration::from_secs(1),
        "teardown waited {:?}",
        started.elapsed()
    );
}

#[test]
fn reactivation_builds_a_fresh_session() {
    let mut plugin = JamLinkPlugin::new();
    plugin.activate(48_000, 256);
    plugin.activate(44_100, 512);
    assert!(plugin.is_active());
    assert_eq!(plugin.status(), ConnectionStatus::Idle);
    plugin.deactivate();
}
