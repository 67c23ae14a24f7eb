//! JamLink Plugin
//! ==============
//! The plugin instance that embeds the jam engine in a host: it owns the
//! engine, the network worker, the UI event queue, the atomic snapshot and
//! the license rendezvous slot, and implements the host contract (stereo
//! process call, four parameters, persisted settings). The UI and the host
//! talk only to this type.

mod license;
pub mod params;
pub mod state;
mod worker;

pub use license::{LicenseResponse, LicenseSlot};
pub use params::{ParamEvent, ParamStore};
pub use state::Settings;
pub use worker::{Worker, LICENSE_TIMEOUT};

use std::path::Path;
use std::sync::Arc;

use arc_swap::ArcSwap;
use log::warn;
use parking_lot::Mutex;

use jamlink_engine::{
    AudioPath, ClientError, CodecKind, ConnectParams, Engine, HostTransport, LocalChannelInfo,
    PeerChannelParam, Roster, SessionConfig, SharedState,
};
use jamlink_rt::{ConnectionStatus, EventQueue, UiEvent, UiSnapshot};

use params::{
    PARAM_MASTER_MUTE, PARAM_MASTER_VOLUME, PARAM_METRONOME_MUTE, PARAM_METRONOME_VOLUME,
};

const EVENT_QUEUE_CAPACITY: usize = 256;

/// One block handed over by the host.
pub struct ProcessBlock<'a> {
    pub inputs: [Option<&'a [f32]>; 2],
    pub outputs: [Option<&'a mut [f32]>; 2],
    pub frames: usize,
    pub transport: HostTransport,
    pub events: &'a [ParamEvent],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Continue,
    Error,
}

struct ActiveSession {
    cfg: SessionConfig,
    engine: Arc<Mutex<Engine>>,
    shared: Arc<SharedState>,
    roster: Arc<ArcSwap<Roster>>,
    audio: AudioPath,
    _worker: Worker,
}

/// The plugin instance. Owns everything; nothing is shared between
/// instances.
pub struct JamLinkPlugin {
    params: ParamStore,
    settings: Mutex<Settings>,
    events: Arc<EventQueue>,
    snapshot: Arc<UiSnapshot>,
    license: Arc<LicenseSlot>,
    codec: CodecKind,
    active: Option<ActiveSession>,
}

impl Default for JamLinkPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl JamLinkPlugin {
    pub fn new() -> Self {
        Self::with_codec(CodecKind::RawPcm)
    }

    pub fn with_codec(codec: CodecKind) -> Self {
        Self {
            params: ParamStore::default(),
            settings: Mutex::new(Settings::default()),
            events: Arc::new(EventQueue::with_capacity(EVENT_QUEUE_CAPACITY)),
            snapshot: Arc::new(UiSnapshot::default()),
            license: Arc::new(LicenseSlot::default()),
            codec,
            active: None,
        }
    }

    // ---- lifecycle -------------------------------------------------------

    /// Host activation: fixes the session parameters, builds the engine and
    /// spawns the worker. Everything the audio thread will touch is
    /// allocated here.
    pub fn activate(&mut self, sample_rate: u32, max_block_frames: usize) {
        self.deactivate();
        let cfg = SessionConfig {
            sample_rate,
            max_block_frames,
        };
        let (mut engine, audio) = jamlink_engine::create(
            cfg,
            self.codec,
            Arc::clone(&self.events),
            Arc::clone(&self.snapshot),
        );

        let settings = self.settings.lock().clone();
        if let Err(err) = engine.set_local_channel_info(LocalChannelInfo {
            name: settings.local_channel.name,
            transmit: settings.local_channel.transmit,
            bitrate_kbps: settings.local_channel.bitrate,
        }) {
            warn!("could not apply persisted channel settings: {err}");
        }

        let shared = engine.shared();
        let roster = engine.roster_handle();
        self.sync_gains(&shared);

        let engine = Arc::new(Mutex::new(engine));
        let worker = Worker::spawn(
            Arc::clone(&engine),
            Arc::clone(&shared),
            Arc::clone(&self.license),
            LICENSE_TIMEOUT,
        );
        self.active = Some(ActiveSession {
            cfg,
            engine,
            shared,
            roster,
            audio,
            _worker: worker,
        });
    }

    /// Host deactivation: stops and joins the worker, drops the session.
    pub fn deactivate(&mut self) {
        self.active = None;
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    // ---- audio (host real-time thread) -----------------------------------

    /// The per-block audio callback. Applies parameter events at their
    /// frames, bypasses to pass-through when not joined, otherwise runs the
    /// engine's real-time entry. Never allocates or locks.
    pub fn process(&mut self, block: ProcessBlock<'_>) -> ProcessStatus {
        let Some(active) = self.active.as_mut() else {
            return ProcessStatus::Error;
        };
        let ProcessBlock {
            inputs,
            outputs,
            frames,
            transport,
            events,
        } = block;
        let [Some(in_l), Some(in_r)] = inputs else {
            return ProcessStatus::Error;
        };
        let [Some(out_l), Some(out_r)] = outputs else {
            return ProcessStatus::Error;
        };
        if frames == 0 {
            return ProcessStatus::Continue;
        }
        // More frames than activated: truncate and keep going.
        let frames = frames
            .min(active.cfg.max_block_frames)
            .min(in_l.len())
            .min(in_r.len())
            .min(out_l.len())
            .min(out_r.len());

        let status = active.shared.status.load();
        if status != ConnectionStatus::Joined {
            for ev in events {
                apply_event(&self.params, &active.shared, ev);
            }
            out_l[..frames].copy_from_slice(&in_l[..frames]);
            out_r[..frames].copy_from_slice(&in_r[..frames]);
            return ProcessStatus::Continue;
        }

        let mut start = 0usize;
        let mut next_event = 0usize;
        while start < frames {
            while next_event < events.len() && events[next_event].frame as usize <= start {
                apply_event(&self.params, &active.shared, &events[next_event]);
                next_event += 1;
            }
            let end = events
                .get(next_event)
                .map(|ev| (ev.frame as usize).clamp(start + 1, frames))
                .unwrap_or(frames);
            active.audio.process(
                [&in_l[start..end], &in_r[start..end]],
                [&mut out_l[start..end], &mut out_r[start..end]],
                end - start,
                &transport,
            );
            start = end;
        }
        // Events stamped past the block boundary land now.
        for ev in &events[next_event..] {
            apply_event(&self.params, &active.shared, ev);
        }
        ProcessStatus::Continue
    }

    // ---- UI contract -----------------------------------------------------

    pub fn connect(
        &mut self,
        host: &str,
        username: &str,
        password: &str,
    ) -> Result<(), ClientError> {
        let active = self
            .active
            .as_ref()
            .ok_or(ClientError::Protocol("plugin not active"))?;
        {
            let mut settings = self.settings.lock();
            settings.server = host.to_string();
            settings.username = username.to_string();
        }
        active.engine.lock().connect(ConnectParams {
            host: host.to_string(),
            username: username.to_string(),
            password: password.to_string(),
        });
        Ok(())
    }

    pub fn disconnect(&mut self) {
        if let Some(active) = self.active.as_ref() {
            active.engine.lock().disconnect();
        }
    }

    pub fn set_local_channel(
        &mut self,
        name: &str,
        transmit: bool,
        bitrate_kbps: u32,
    ) -> Result<(), ClientError> {
        {
            let mut settings = self.settings.lock();
            settings.local_channel.name = name.to_string();
            settings.local_channel.transmit = transmit;
            settings.local_channel.bitrate = bitrate_kbps;
        }
        if let Some(active) = self.active.as_ref() {
            active.engine.lock().set_local_channel_info(LocalChannelInfo {
                name: name.to_string(),
                transmit,
                bitrate_kbps,
            })?;
        }
        Ok(())
    }

    pub fn set_peer_channel(
        &mut self,
        user: &str,
        channel_index: u8,
        param: PeerChannelParam,
    ) -> Result<(), ClientError> {
        let active = self
            .active
            .as_ref()
            .ok_or(ClientError::Protocol("plugin not active"))?;
        active
            .engine
            .lock()
            .set_peer_channel(user, channel_index, param)
    }

    /// Sets one of the four host parameters. Written twice: once for the
    /// UI-visible store, once for the engine's audio-read atomics.
    pub fn set_param(&self, id: u32, value: f32) {
        self.params.set(id, value);
        if let Some(active) = self.active.as_ref() {
            write_gain(&active.shared, id, value);
        }
    }

    pub fn param(&self, id: u32) -> Option<f32> {
        self.params.get(id)
    }

    /// Connection state from the lock-free mirror.
    pub fn status(&self) -> ConnectionStatus {
        self.active
            .as_ref()
            .map_or(ConnectionStatus::Idle, |a| a.shared.status.load())
    }

    pub fn drain_events(&self, visitor: impl FnMut(UiEvent)) {
        self.events.drain(visitor);
    }

    pub fn snapshot(&self) -> &UiSnapshot {
        &self.snapshot
    }

    /// Current roster copy, if a session is active.
    pub fn roster(&self) -> Option<Arc<Roster>> {
        self.active.as_ref().map(|a| a.roster.load_full())
    }

    pub fn license_pending(&self) -> Option<String> {
        self.license.pending()
    }

    pub fn license_respond(&self, accept: bool) {
        self.license.respond(accept);
    }

    // ---- persisted state -------------------------------------------------

    /// Serializes the settings document. Fields are snapshotted under the
    /// locks, then encoded afterwards; the password is never part of it.
    pub fn state_json(&self) -> anyhow::Result<Vec<u8>> {
        let mut settings = self.settings.lock().clone();
        settings.master.volume = self.params.get(PARAM_MASTER_VOLUME).unwrap_or(1.0);
        settings.master.mute = self.params.get(PARAM_MASTER_MUTE).unwrap_or(0.0) >= 0.5;
        settings.metronome.volume = self.params.get(PARAM_METRONOME_VOLUME).unwrap_or(0.5);
        settings.metronome.mute = self.params.get(PARAM_METRONOME_MUTE).unwrap_or(0.0) >= 0.5;
        settings.to_json()
    }

    pub fn restore_state(&mut self, bytes: &[u8]) -> anyhow::Result<()> {
        let settings = Settings::from_json(bytes)?;
        self.apply_settings(settings);
        Ok(())
    }

    pub fn save_state_to(&self, path: &Path) -> anyhow::Result<()> {
        let json = self.state_json()?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load_state_from(&mut self, path: &Path) -> anyhow::Result<()> {
        let settings = Settings::load_from_path(path)?;
        self.apply_settings(settings);
        Ok(())
    }

    fn apply_settings(&mut self, settings: Settings) {
        self.params
            .set(PARAM_MASTER_VOLUME, settings.master.volume);
        self.params
            .set(PARAM_MASTER_MUTE, f32::from(settings.master.mute));
        self.params
            .set(PARAM_METRONOME_VOLUME, settings.metronome.volume);
        self.params
            .set(PARAM_METRONOME_MUTE, f32::from(settings.metronome.mute));
        if let Some(active) = self.active.as_ref() {
            self.sync_gains(&active.shared);
            if let Err(err) = active.engine.lock().set_local_channel_info(LocalChannelInfo {
                name: settings.local_channel.name.clone(),
                transmit: settings.local_channel.transmit,
                bitrate_kbps: settings.local_channel.bitrate,
            }) {
                warn!("could not apply restored channel settings: {err}");
            }
        }
        *self.settings.lock() = settings;
    }

    /// Pushes the current parameter values into the engine's mix atomics.
    fn sync_gains(&self, shared: &SharedState) {
        for id in [
            PARAM_MASTER_VOLUME,
            PARAM_MASTER_MUTE,
            PARAM_METRONOME_VOLUME,
            PARAM_METRONOME_MUTE,
        ] {
            if let Some(value) = self.params.get(id) {
                write_gain(shared, id, value);
            }
        }
    }
}

fn apply_event(params: &ParamStore, shared: &SharedState, ev: &ParamEvent) {
    params.set(ev.id, ev.value);
    write_gain(shared, ev.id, ev.value);
}

fn write_gain(shared: &SharedState, id: u32, value: f32) {
    match id {
        PARAM_MASTER_VOLUME => shared.gains.master.set_volume(value),
        PARAM_MASTER_MUTE => shared.gains.master.set_mute(value >= 0.5),
        PARAM_METRONOME_VOLUME => shared.gains.metronome.set_volume(value),
        PARAM_METRONOME_MUTE => shared.gains.metronome.set_mute(value >= 0.5),
        _ => {}
    }
}
