//! The plugin-owned network worker.
//!
//! One long-lived thread per activation: ticks the engine, runs the license
//! rendezvous with the engine mutex released, and sleeps adaptively between
//! ticks. Joined on deactivation through the stop flag; the sleep cap
//! bounds how long that takes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use log::warn;
use parking_lot::Mutex;

use jamlink_engine::{Engine, LicenseDecision, SharedState, Tick};
use jamlink_rt::ConnectionStatus;

use crate::license::{LicenseResponse, LicenseSlot};

/// Hard deadline for the license prompt; an unanswered prompt counts as
/// a rejection.
pub const LICENSE_TIMEOUT: Duration = Duration::from_secs(60);

const SLEEP_BUSY: Duration = Duration::from_millis(1);
const SLEEP_IDLE: Duration = Duration::from_millis(10);

pub struct Worker {
    stop: Arc<AtomicBool>,
    license: Arc<LicenseSlot>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    pub fn spawn(
        engine: Arc<Mutex<Engine>>,
        shared: Arc<SharedState>,
        license: Arc<LicenseSlot>,
        license_timeout: Duration,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let thread_license = Arc::clone(&license);
        let handle = std::thread::Builder::new()
            .name("jamlink-net".into())
            .spawn(move || {
                run_loop(&engine, &shared, &thread_license, &thread_stop, license_timeout);
            })
            .expect("spawn network worker");
        Self {
            stop,
            license,
            handle: Some(handle),
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        self.license.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run_loop(
    engine: &Mutex<Engine>,
    shared: &SharedState,
    license: &LicenseSlot,
    stop: &AtomicBool,
    license_timeout: Duration,
) {
    while !stop.load(Ordering::Relaxed) {
        let outcome = engine.lock().run();
        match outcome {
            Ok(Tick::LicenseRequired) => {
                let text = engine.lock().license_text().unwrap_or_default();
                // The engine mutex is released for the whole wait.
                let decision = match license.request(text, license_timeout) {
                    Ok(LicenseResponse::Accept) => LicenseDecision::Accept,
                    Ok(LicenseResponse::Reject) => LicenseDecision::Reject,
                    Ok(LicenseResponse::TimedOut) => LicenseDecision::TimedOut,
                    Err(_) => {
                        warn!("second license prompt while one was pending");
                        engine.lock().disconnect();
                        continue;
                    }
                };
                if let Err(err) = engine.lock().set_license_reply(decision) {
                    warn!("license resolution ended the session: {err}");
                }
            }
            Ok(Tick::Progressed) => std::thread::sleep(SLEEP_BUSY),
            Ok(Tick::Idle) => std::thread::sleep(adaptive_sleep(shared.status.load())),
            Err(err) => {
                // The engine has already transitioned to Failed and told
                // the UI; nothing to do here but pace down.
                warn!("engine tick failed: {err}");
                std::thread::sleep(SLEEP_IDLE);
            }
        }
    }
}

fn adaptive_sleep(status: ConnectionStatus) -> Duration {
    match status {
        ConnectionStatus::Joined
        | ConnectionStatus::Handshaking
        | ConnectionStatus::Authenticating
        | ConnectionStatus::Resolving
        | ConnectionStatus::AwaitingLicense
        | ConnectionStatus::Disconnecting => SLEEP_BUSY,
        ConnectionStatus::Idle | ConnectionStatus::Failed => SLEEP_IDLE,
    }
}
