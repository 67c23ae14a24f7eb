//! Connection state machine and cooperative tick.
//!
//! All methods here run under the plugin's engine mutex, either on the
//! network worker (`run`) or briefly on the UI thread (imperative actions).
//! The audio thread never enters this module; it shares only
//! [`SharedState`], the input ring and the playback slots.

use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use log::{debug, warn};

use jamlink_protocol::{
    write_client_message, AuthChallenge, ChannelInfo, ClientMessage, FrameReader, IntervalBegin,
    IntervalWrite, ServerMessage, UserInfoEntry, AUTH_CAP_LICENSE_AGREED, FOURCC_OGG_VORBIS,
    INTERVAL_WRITE_LAST, PROTOCOL_VERSION,
};
use jamlink_rt::{ConnectionStatus, EventQueue, UiEvent};

use crate::channels::{LocalChannelInfo, PeerChannel, PeerUser, Roster};
use crate::clock::IntervalClock;
use crate::codec::CodecKind;
use crate::error::ClientError;
use crate::intervals::{Assembly, DecodeSlot, EncodeSeat, PlaybackSlots};
use crate::shared::SharedState;
use crate::SessionConfig;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const SOCKET_READ_TIMEOUT: Duration = Duration::from_millis(10);
const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(8);
const DEFAULT_PORT: u16 = 2049;
const UPLOAD_CHUNK_BYTES: usize = 8192;
/// Cap on input samples consumed per tick so one tick stays prompt.
const INPUT_DRAIN_CAP: usize = 1 << 16;

/// Outcome of one cooperative engine tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Nothing to do; the worker may sleep longer.
    Idle,
    /// A message, stream advance or state change happened.
    Progressed,
    /// The server requires license agreement; the worker must run the
    /// rendezvous (with the engine mutex released) and resume with
    /// [`Engine::set_license_reply`].
    LicenseRequired,
}

/// How the license rendezvous ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LicenseDecision {
    Accept,
    Reject,
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct ConnectParams {
    pub host: String,
    pub username: String,
    pub password: String,
}

struct Connection {
    stream: TcpStream,
    reader: FrameReader,
}

enum Pump {
    Idle,
    Progressed,
    License,
}

pub struct Engine {
    cfg: SessionConfig,
    codec: CodecKind,
    shared: Arc<SharedState>,
    playback: PlaybackSlots,
    input_rx: rtrb::Consumer<f32>,
    events: Arc<EventQueue>,

    roster: Arc<ArcSwap<Roster>>,
    roster_dirty: bool,

    conn: Option<Connection>,
    outbox: Vec<ClientMessage>,
    status: ConnectionStatus,
    pending_connect: Option<ConnectParams>,
    username: String,
    password: String,
    challenge: Option<AuthChallenge>,
    license_text: Option<String>,
    keepalive: Duration,
    last_send: Instant,
    last_recv: Instant,

    bpm: f32,
    bpi: u32,

    local: LocalChannelInfo,
    last_sent_info: Option<ChannelInfo>,
    peers: Vec<PeerUser>,
    slots: Vec<Option<DecodeSlot>>,
    encode: EncodeSeat,
    input_scratch: Vec<f32>,
    observed_serial: u64,
}

impl Engine {
    pub(crate) fn new(
        cfg: SessionConfig,
        codec: CodecKind,
        shared: Arc<SharedState>,
        playback: PlaybackSlots,
        input_rx: rtrb::Consumer<f32>,
        events: Arc<EventQueue>,
    ) -> Self {
        let local = LocalChannelInfo::default();
        let encoder = codec
            .create(cfg.sample_rate, local.bitrate_kbps)
            .expect("default codec construction cannot fail");
        let slot_count = playback.len();
        Self {
            cfg,
            codec,
            shared,
            playback,
            input_rx,
            events,
            roster: Arc::new(ArcSwap::from_pointee(Roster::default())),
            roster_dirty: false,
            conn: None,
            outbox: Vec::new(),
            status: ConnectionStatus::Idle,
            pending_connect: None,
            username: String::new(),
            password: String::new(),
            challenge: None,
            license_text: None,
            keepalive: DEFAULT_KEEPALIVE,
            last_send: Instant::now(),
            last_recv: Instant::now(),
            bpm: 0.0,
            bpi: 0,
            local,
            last_sent_info: None,
            peers: Vec::new(),
            slots: (0..slot_count).map(|_| None).collect(),
            encode: EncodeSeat::new(encoder),
            input_scratch: Vec::new(),
            observed_serial: 0,
        }
    }

    // ---- accessors -------------------------------------------------------

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn shared(&self) -> Arc<SharedState> {
        Arc::clone(&self.shared)
    }

    /// Lock-free handle the UI loads the roster copy from.
    pub fn roster_handle(&self) -> Arc<ArcSwap<Roster>> {
        Arc::clone(&self.roster)
    }

    /// License text pending agreement, if the tick returned
    /// [`Tick::LicenseRequired`].
    pub fn license_text(&self) -> Option<String> {
        self.license_text.clone()
    }

    pub fn local_channel(&self) -> &LocalChannelInfo {
        &self.local
    }

    // ---- imperative API (UI thread, brief lock) --------------------------

    /// Requests a connection; the worker performs the transition at its
    /// next tick.
    pub fn connect(&mut self, params: ConnectParams) {
        if self.conn.is_some() {
            self.teardown_session();
        }
        self.pending_connect = Some(params);
    }

    pub fn disconnect(&mut self) {
        if self.status != ConnectionStatus::Idle {
            self.set_status(ConnectionStatus::Disconnecting, None);
        }
    }

    /// Updates the local channel description. Idempotent: only a change
    /// relative to the last transmitted description produces a wire
    /// message. Returns whether one was queued.
    pub fn set_local_channel_info(&mut self, info: LocalChannelInfo) -> Result<bool, ClientError> {
        if info.bitrate_kbps != self.local.bitrate_kbps {
            self.encode.encoder = self.codec.create(self.cfg.sample_rate, info.bitrate_kbps)?;
            self.encode.announced = false;
        }
        self.shared.gains.set_transmit(info.transmit);
        self.local = info;
        let wire = self.local.to_wire();
        if self.status == ConnectionStatus::Joined && self.last_sent_info.as_ref() != Some(&wire) {
            self.queue(ClientMessage::SetChannelInfo {
                channels: vec![wire.clone()],
            });
            self.last_sent_info = Some(wire);
            return Ok(true);
        }
        Ok(false)
    }

    /// Local monitoring knobs (post-send path only).
    pub fn set_local_monitor(&mut self, volume: f32, pan: f32, mute: bool, solo: bool) {
        let gains = &self.shared.gains;
        gains.local.set_volume(volume);
        gains.local.set_pan(pan);
        gains.local.set_mute(mute);
        gains.set_solo_bit(crate::shared::SOLO_LOCAL_BIT, solo);
    }

    /// Mutates one peer channel. Subscription edits bind or release a
    /// decode slot and queue a usermask update for that user.
    pub fn set_peer_channel(
        &mut self,
        user: &str,
        channel_index: u8,
        param: PeerChannelParam,
    ) -> Result<(), ClientError> {
        let upos = self
            .peers
            .iter()
            .position(|u| u.name == user)
            .ok_or(ClientError::Protocol("unknown peer"))?;
        let cpos = self.peers[upos]
            .channels
            .iter()
            .position(|c| c.index == channel_index)
            .ok_or(ClientError::Protocol("unknown peer channel"))?;

        match param {
            PeerChannelParam::Subscribed(true) => {
                if self.peers[upos].channels[cpos].slot.is_none() {
                    let slot = self.bind_slot(user.to_string(), channel_index)?;
                    let ch = &mut self.peers[upos].channels[cpos];
                    ch.subscribed = true;
                    ch.slot = Some(slot);
                    self.sync_slot_gains(upos, cpos);
                    self.queue_usermask(upos);
                }
            }
            PeerChannelParam::Subscribed(false) => {
                if let Some(slot) = self.peers[upos].channels[cpos].slot.take() {
                    self.release_slot(slot);
                    self.peers[upos].channels[cpos].subscribed = false;
                    self.queue_usermask(upos);
                }
            }
            PeerChannelParam::Volume(v) => {
                self.peers[upos].channels[cpos].volume = v.clamp(0.0, 2.0);
                self.sync_slot_gains(upos, cpos);
            }
            PeerChannelParam::Pan(p) => {
                self.peers[upos].channels[cpos].pan = p.clamp(-1.0, 1.0);
                self.sync_slot_gains(upos, cpos);
            }
            PeerChannelParam::Mute(m) => {
                self.peers[upos].channels[cpos].mute = m;
                self.sync_slot_gains(upos, cpos);
            }
            PeerChannelParam::Solo(s) => {
                self.peers[upos].channels[cpos].solo = s;
                if let Some(slot) = self.peers[upos].channels[cpos].slot {
                    self.shared.gains.set_solo_bit(1u32 << slot, s);
                }
            }
        }
        self.roster_dirty = true;
        Ok(())
    }

    /// Resumes the state machine after the worker's license rendezvous.
    pub fn set_license_reply(&mut self, decision: LicenseDecision) -> Result<(), ClientError> {
        if self.status != ConnectionStatus::AwaitingLicense {
            return Err(self.fail(ClientError::Protocol("license reply without prompt")));
        }
        self.license_text = None;
        match decision {
            LicenseDecision::Accept => {
                self.send_auth(true)?;
                self.set_status(ConnectionStatus::Authenticating, None);
                Ok(())
            }
            LicenseDecision::Reject => Err(self.fail(ClientError::LicenseRejected)),
            LicenseDecision::TimedOut => Err(self.fail(ClientError::LicenseTimeout)),
        }
    }

    // ---- cooperative tick (worker thread) --------------------------------

    /// One engine step: handles at most one message, advances the streams
    /// and returns promptly.
    pub fn run(&mut self) -> Result<Tick, ClientError> {
        let mut progressed = false;

        if self.status == ConnectionStatus::Disconnecting {
            self.teardown_session();
            self.set_status(ConnectionStatus::Idle, None);
            return Ok(Tick::Progressed);
        }

        if let Some(req) = self.pending_connect.take() {
            self.set_status(ConnectionStatus::Resolving, None);
            self.username = req.username.clone();
            self.password = req.password.clone();
            match self.open_stream(&req.host) {
                Ok(conn) => {
                    self.conn = Some(conn);
                    self.last_send = Instant::now();
                    self.last_recv = Instant::now();
                    self.set_status(ConnectionStatus::Handshaking, None);
                    progressed = true;
                }
                Err(err) => return Err(self.fail(err)),
            }
        }

        if self.conn.is_some() {
            match self.pump_socket() {
                Ok(Pump::License) => return Ok(Tick::LicenseRequired),
                Ok(Pump::Progressed) => progressed = true,
                Ok(Pump::Idle) => {}
                Err(err) => return Err(self.fail(err)),
            }

            if self.status == ConnectionStatus::Joined {
                if let Err(err) = self.advance_streams() {
                    return Err(self.fail(err));
                }
            }

            if let Err(err) = self.flush_outbox() {
                return Err(self.fail(err));
            }
        }

        if self.roster_dirty {
            self.publish_roster();
        }
        self.publish_snapshot();

        Ok(if progressed { Tick::Progressed } else { Tick::Idle })
    }

    // ---- connection / framing --------------------------------------------

    fn open_stream(&self, host: &str) -> Result<Connection, ClientError> {
        let target = if host.contains(':') {
            host.to_string()
        } else {
            format!("{host}:{DEFAULT_PORT}")
        };
        let addrs = target
            .to_socket_addrs()
            .map_err(|_| ClientError::ResolveFailed(target.clone()))?;
        let mut last_err = ClientError::ResolveFailed(target.clone());
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    stream.set_read_timeout(Some(SOCKET_READ_TIMEOUT))?;
                    return Ok(Connection {
                        stream,
                        reader: FrameReader::new(),
                    });
                }
                Err(err) => last_err = ClientError::Io(err),
            }
        }
        Err(last_err)
    }

    fn pump_socket(&mut self) -> Result<Pump, ClientError> {
        let frame = {
            let conn = self.conn.as_mut().expect("pump without connection");
            match conn.reader.poll(&mut conn.stream) {
                Ok(frame) => frame,
                Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return if self.status == ConnectionStatus::Joined {
                        Err(ClientError::NetworkDropped)
                    } else {
                        Err(ClientError::Io(err))
                    };
                }
                Err(err) => return Err(ClientError::Io(err)),
            }
        };
        let Some(frame) = frame else {
            return Ok(Pump::Idle);
        };
        self.last_recv = Instant::now();
        let msg = ServerMessage::parse(&frame)?;
        self.dispatch(msg)
    }

    fn dispatch(&mut self, msg: ServerMessage) -> Result<Pump, ClientError> {
        match msg {
            ServerMessage::AuthChallenge(challenge) => {
                if self.status != ConnectionStatus::Handshaking {
                    return Err(ClientError::Protocol("unexpected auth challenge"));
                }
                if challenge.keepalive_secs() > 0 {
                    self.keepalive = Duration::from_secs(u64::from(challenge.keepalive_secs()));
                }
                let license = challenge.license.clone();
                self.challenge = Some(challenge);
                match license {
                    Some(text) if !text.is_empty() => {
                        self.license_text = Some(text);
                        self.set_status(ConnectionStatus::AwaitingLicense, None);
                        Ok(Pump::License)
                    }
                    _ => {
                        self.send_auth(true)?;
                        self.set_status(ConnectionStatus::Authenticating, None);
                        Ok(Pump::Progressed)
                    }
                }
            }
            ServerMessage::AuthReply(reply) => {
                if self.status != ConnectionStatus::Authenticating {
                    return Err(ClientError::Protocol("unexpected auth reply"));
                }
                if !reply.success {
                    return Err(ClientError::AuthFailed(reply.message));
                }
                debug!(
                    "joined as {} (max {} channels)",
                    self.username, reply.max_channels
                );
                self.set_status(ConnectionStatus::Joined, None);
                self.last_sent_info = None;
                let info = self.local.clone();
                self.set_local_channel_info(info)?;
                Ok(Pump::Progressed)
            }
            ServerMessage::ConfigChange(cfg) => {
                if self.status != ConnectionStatus::Joined {
                    return Ok(Pump::Idle);
                }
                self.apply_config(f32::from(cfg.bpm), u32::from(cfg.bpi));
                Ok(Pump::Progressed)
            }
            ServerMessage::UserInfoChange(entries) => {
                if self.status == ConnectionStatus::Joined {
                    self.handle_userinfo(entries);
                }
                Ok(Pump::Progressed)
            }
            ServerMessage::IntervalBegin(begin) => {
                self.handle_interval_begin(begin);
                Ok(Pump::Progressed)
            }
            ServerMessage::IntervalWrite(write) => {
                self.handle_interval_write(write);
                Ok(Pump::Progressed)
            }
            ServerMessage::Chat(fields) => {
                if fields.first().map(String::as_str) == Some("TOPIC") {
                    if let Some(topic) = fields.get(2).or_else(|| fields.get(1)) {
                        self.emit(UiEvent::TopicChanged(topic.clone()));
                    }
                }
                Ok(Pump::Progressed)
            }
            ServerMessage::Keepalive => Ok(Pump::Progressed),
            ServerMessage::Unknown(kind) => {
                debug!("ignoring unknown message type {kind:#04x}");
                Ok(Pump::Idle)
            }
        }
    }

    fn send_auth(&mut self, agreed: bool) -> Result<(), ClientError> {
        let challenge = self
            .challenge
            .as_ref()
            .ok_or(ClientError::Protocol("auth without challenge"))?;
        let hash =
            jamlink_protocol::password_hash(&self.username, &self.password, &challenge.challenge);
        self.queue(ClientMessage::AuthUser {
            password_hash: hash,
            username: self.username.clone(),
            caps: if agreed { AUTH_CAP_LICENSE_AGREED } else { 0 },
            protocol_version: PROTOCOL_VERSION,
        });
        Ok(())
    }

    fn apply_config(&mut self, bpm: f32, bpi: u32) {
        if bpm <= 0.0 || bpi == 0 {
            warn!("ignoring degenerate tempo {bpm}/{bpi}");
            return;
        }
        let length = IntervalClock::interval_frames(self.cfg.sample_rate, bpm, bpi);
        if self.shared.clock.is_running() {
            // Current interval finishes with its old length.
            self.shared.clock.schedule(length, bpi);
        } else {
            self.shared.clock.reset(length, bpi);
        }
        self.bpm = bpm;
        self.bpi = bpi;
        self.shared.snapshot.set_tempo(bpm, bpi);
    }

    // ---- peer registry ---------------------------------------------------

    fn handle_userinfo(&mut self, entries: Vec<UserInfoEntry>) {
        let mut mask_users: Vec<String> = Vec::new();
        for entry in entries {
            if entry.username == self.username {
                continue;
            }
            if entry.active {
                let upos = match self.peers.iter().position(|u| u.name == entry.username) {
                    Some(p) => p,
                    None => {
                        self.peers.push(PeerUser {
                            name: entry.username.clone(),
                            channels: Vec::new(),
                        });
                        self.peers.len() - 1
                    }
                };
                let cpos = match self.peers[upos]
                    .channels
                    .iter()
                    .position(|c| c.index == entry.channel_index)
                {
                    Some(p) => p,
                    None => {
                        self.peers[upos].channels.push(PeerChannel {
                            index: entry.channel_index,
                            name: String::new(),
                            active: false,
                            subscribed: false,
                            volume: 1.0,
                            pan: 0.0,
                            mute: false,
                            solo: false,
                            slot: None,
                        });
                        self.peers[upos].channels.len() - 1
                    }
                };
                {
                    let ch = &mut self.peers[upos].channels[cpos];
                    ch.name = entry.channel_name.clone();
                    ch.active = true;
                }
                // Subscribe by default while seats remain.
                if self.peers[upos].channels[cpos].slot.is_none() {
                    match self.bind_slot(entry.username.clone(), entry.channel_index) {
                        Ok(slot) => {
                            let ch = &mut self.peers[upos].channels[cpos];
                            ch.subscribed = true;
                            ch.slot = Some(slot);
                            self.sync_slot_gains(upos, cpos);
                            if !mask_users.contains(&entry.username) {
                                mask_users.push(entry.username.clone());
                            }
                        }
                        Err(ClientError::CapacityExceeded) => {
                            self.emit(UiEvent::Notice(format!(
                                "no free channel seat for {}:{}",
                                entry.username, entry.channel_name
                            )));
                        }
                        Err(err) => warn!("subscribe failed: {err}"),
                    }
                }
            } else if let Some(upos) =
                self.peers.iter().position(|u| u.name == entry.username)
            {
                if let Some(cpos) = self.peers[upos]
                    .channels
                    .iter()
                    .position(|c| c.index == entry.channel_index)
                {
                    if let Some(slot) = self.peers[upos].channels[cpos].slot.take() {
                        self.release_slot(slot);
                    }
                    self.peers[upos].channels.remove(cpos);
                    if !mask_users.contains(&entry.username) {
                        mask_users.push(entry.username.clone());
                    }
                }
                if self.peers[upos].channels.is_empty() {
                    self.peers.remove(upos);
                    mask_users.retain(|name| name != &entry.username);
                }
            }
        }
        for name in mask_users {
            if let Some(upos) = self.peers.iter().position(|u| u.name == name) {
                self.queue_usermask(upos);
            }
        }
        self.roster_dirty = true;
    }

    fn bind_slot(&mut self, user: String, channel_index: u8) -> Result<usize, ClientError> {
        let free = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(ClientError::CapacityExceeded)?;
        let decoder = self
            .codec
            .create(self.cfg.sample_rate, self.local.bitrate_kbps)?;
        self.slots[free] = Some(DecodeSlot::new(user, channel_index, decoder));
        self.shared.gains.slots[free].set_active(true);
        Ok(free)
    }

    fn release_slot(&mut self, slot: usize) {
        if let Some(seat) = self.slots[slot].as_mut() {
            seat.clear(&self.playback[slot]);
        }
        self.slots[slot] = None;
        self.shared.gains.slots[slot].set_active(false);
        self.shared.gains.set_solo_bit(1u32 << slot, false);
    }

    /// Copies a channel's monitoring knobs into its slot atomics.
    fn sync_slot_gains(&self, upos: usize, cpos: usize) {
        let ch = &self.peers[upos].channels[cpos];
        if let Some(slot) = ch.slot {
            let gain = &self.shared.gains.slots[slot].gain;
            gain.set_volume(ch.volume);
            gain.set_pan(ch.pan);
            gain.set_mute(ch.mute);
        }
    }

    fn queue_usermask(&mut self, upos: usize) {
        let user = &self.peers[upos];
        self.outbox.push(ClientMessage::SetUsermask {
            entries: vec![(user.name.clone(), user.subscribe_mask())],
        });
    }

    fn slot_for(&self, user: &str, channel_index: u8) -> Option<usize> {
        self.peers
            .iter()
            .find(|u| u.name == user)?
            .channels
            .iter()
            .find(|c| c.index == channel_index)?
            .slot
    }

    // ---- interval streaming ----------------------------------------------

    fn handle_interval_begin(&mut self, begin: IntervalBegin) {
        let Some(slot_idx) = self.slot_for(&begin.username, begin.channel_index) else {
            return;
        };
        let wrong_fourcc = {
            let slot = self.slots[slot_idx].as_ref().expect("bound slot");
            !begin.is_silence() && begin.fourcc != slot.decoder.fourcc()
        };
        if wrong_fourcc {
            // Public servers tag compressed audio as Ogg Vorbis; name it so
            // the mismatch is actionable instead of a mystery.
            let format = if begin.fourcc == FOURCC_OGG_VORBIS {
                "Ogg Vorbis"
            } else {
                "an unknown format"
            };
            self.emit(UiEvent::Notice(format!(
                "{} sends {format}, which this codec cannot decode",
                begin.username
            )));
        }
        let slot = self.slots[slot_idx].as_mut().expect("bound slot");
        slot.abandon();
        if !begin.is_silence() && !wrong_fourcc {
            slot.assembling = Some(Assembly {
                guid: begin.guid,
                pcm: Vec::new(),
            });
        }
    }

    fn handle_interval_write(&mut self, write: IntervalWrite) {
        let Some(idx) = self.slots.iter().position(|s| {
            s.as_ref()
                .and_then(|s| s.assembling.as_ref())
                .is_some_and(|a| a.guid == write.guid)
        }) else {
            return;
        };
        let slot = self.slots[idx].as_mut().expect("matched slot");
        let assembly = slot.assembling.as_mut().expect("matched assembly");
        match slot.decoder.decode_block(&write.data, &mut assembly.pcm) {
            Ok(()) => {
                if write.flags & INTERVAL_WRITE_LAST != 0 {
                    let done = slot.assembling.take().expect("matched assembly");
                    slot.ready = Some(done.pcm);
                    slot.decoder.reset();
                }
            }
            Err(err) => {
                // One bad interval never tears the session down.
                warn!(
                    "dropping interval from {}:{}: {err}",
                    slot.user, slot.channel_index
                );
                slot.abandon();
                self.emit(UiEvent::Notice("decoder refused an interval".into()));
            }
        }
    }

    fn advance_streams(&mut self) -> Result<(), ClientError> {
        self.drain_input();
        if self.encode.announced && !self.input_scratch.is_empty() {
            let bytes = self.encode.encoder.encode_block(&self.input_scratch)?;
            let guid = self.encode.guid;
            self.queue_upload(guid, bytes, false);
        }

        let serial = self.shared.clock.serial();
        if serial != self.observed_serial {
            self.observed_serial = serial;
            self.on_boundary(serial)?;
        }

        if self.last_recv.elapsed() > self.keepalive * 3 {
            return Err(ClientError::NetworkDropped);
        }
        if self.last_send.elapsed() > self.keepalive {
            self.queue(ClientMessage::Keepalive);
        }
        Ok(())
    }

    /// Interval boundary on the shared clock: finish the outgoing interval,
    /// rotate the guid, and flip completed peer intervals into playback.
    fn on_boundary(&mut self, serial: u64) -> Result<(), ClientError> {
        let was_announced = self.encode.announced;
        if was_announced {
            let tail = self.encode.encoder.finalize()?;
            let guid = self.encode.guid;
            self.queue_upload(guid, tail, true);
            self.encode.announced = false;
        }
        if self.local.transmit {
            self.encode.rotate_guid();
            self.queue(ClientMessage::UploadBegin {
                guid: self.encode.guid,
                estimated_size: 0,
                fourcc: self.encode.encoder.fourcc(),
                channel_index: 0,
            });
            self.encode.announced = true;
        } else if was_announced {
            // A zero guid tells the server the channel went silent.
            self.queue(ClientMessage::UploadBegin {
                guid: [0u8; 16],
                estimated_size: 0,
                fourcc: 0,
                channel_index: 0,
            });
        }
        for (idx, slot) in self.slots.iter_mut().enumerate() {
            if let Some(seat) = slot {
                seat.publish(&self.playback[idx], serial);
            }
        }
        Ok(())
    }

    fn drain_input(&mut self) {
        self.input_scratch.clear();
        while self.input_scratch.len() < INPUT_DRAIN_CAP {
            match self.input_rx.pop() {
                Ok(sample) => self.input_scratch.push(sample),
                Err(_) => break,
            }
        }
    }

    /// Splits encoded bytes into bounded chunks; `last` appends the
    /// terminating empty chunk after any remaining data.
    fn queue_upload(&mut self, guid: jamlink_protocol::IntervalGuid, bytes: Vec<u8>, last: bool) {
        for chunk in bytes.chunks(UPLOAD_CHUNK_BYTES) {
            self.outbox.push(ClientMessage::UploadWrite {
                guid,
                flags: 0,
                data: chunk.to_vec(),
            });
        }
        if last {
            self.outbox.push(ClientMessage::UploadWrite {
                guid,
                flags: INTERVAL_WRITE_LAST,
                data: Vec::new(),
            });
        }
    }

    fn queue(&mut self, msg: ClientMessage) {
        self.outbox.push(msg);
    }

    fn flush_outbox(&mut self) -> Result<(), ClientError> {
        if self.outbox.is_empty() {
            return Ok(());
        }
        let conn = self.conn.as_mut().ok_or(ClientError::NetworkDropped)?;
        for msg in self.outbox.drain(..) {
            write_client_message(&mut conn.stream, &msg)?;
        }
        self.last_send = Instant::now();
        Ok(())
    }

    // ---- bookkeeping -----------------------------------------------------

    fn set_status(&mut self, status: ConnectionStatus, detail: Option<String>) {
        self.status = status;
        self.shared.status.store(status);
        self.emit(UiEvent::StatusChanged { status, detail });
    }

    fn fail(&mut self, err: ClientError) -> ClientError {
        warn!("session failed: {err}");
        let detail = err.to_string();
        self.teardown_session();
        self.set_status(ConnectionStatus::Failed, Some(detail));
        err
    }

    fn teardown_session(&mut self) {
        self.conn = None;
        self.outbox.clear();
        self.challenge = None;
        self.license_text = None;
        self.last_sent_info = None;
        self.encode.announced = false;
        self.encode.encoder.reset();
        for idx in 0..self.slots.len() {
            if self.slots[idx].is_some() {
                self.release_slot(idx);
            }
        }
        self.peers.clear();
        self.roster_dirty = true;
        self.bpm = 0.0;
        self.bpi = 0;
        self.keepalive = DEFAULT_KEEPALIVE;
        self.shared.clock.stop();
        self.shared.snapshot.set_tempo(0.0, 0);
        self.observed_serial = self.shared.clock.serial();
    }

    fn publish_roster(&mut self) {
        self.roster_dirty = false;
        self.roster.store(Arc::new(Roster {
            users: self.peers.clone(),
        }));
        self.emit(UiEvent::UserInfoChanged);
    }

    fn publish_snapshot(&self) {
        let position = self.shared.clock.position();
        self.shared
            .snapshot
            .set_interval(position, self.shared.clock.length());
        self.shared
            .snapshot
            .set_beat(self.shared.clock.beat_of(position));
    }

    fn emit(&self, event: UiEvent) {
        self.events.try_push(event);
    }
}

/// One peer channel knob, as the UI edits them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PeerChannelParam {
    Subscribed(bool),
    Volume(f32),
    Pan(f32),
    Mute(bool),
    Solo(bool),
}

#[cfg(any(test, feature = "testing"))]
impl Engine {
    /// Test hook: places a decoded interval straight into a playback slot.
    pub fn inject_slot_interval(&mut self, slot: usize, serial: u64, pcm: Vec<f32>) {
        self.shared.gains.slots[slot].set_active(true);
        self.playback[slot].store(Some(Arc::new(crate::intervals::SlotInterval {
            serial,
            pcm,
        })));
    }
}
