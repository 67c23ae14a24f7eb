//! Scripted loopback jam server for integration tests.
//!
//! Speaks just enough of the wire protocol to drive the client state
//! machine: challenge/auth, tempo config, userinfo broadcast, and interval
//! relay between connected clients.

use std::io::Write;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use jamlink_protocol::{
    write_frame, FrameReader, RawFrame, MSG_AUTH_CHALLENGE, MSG_AUTH_REPLY, MSG_CONFIG_CHANGE,
    MSG_DOWNLOAD_BEGIN, MSG_DOWNLOAD_WRITE, MSG_USERINFO_CHANGE, SERVER_CAP_LICENSE,
};

const MSG_CLIENT_AUTH_USER: u8 = 0x80;
const MSG_CLIENT_SET_CHANNEL_INFO: u8 = 0x82;
const MSG_CLIENT_UPLOAD_BEGIN: u8 = 0x83;
const MSG_CLIENT_UPLOAD_WRITE: u8 = 0x84;

/// What the scripted server should do with clients.
#[derive(Debug, Clone)]
pub struct ServerScript {
    pub license: Option<String>,
    pub accept_auth: bool,
    pub bpm: u16,
    pub bpi: u16,
    pub keepalive_secs: u8,
    /// Channels announced to every client right after auth, as
    /// `(username, channel name)` pairs on channel index 0.
    pub extra_channels: Vec<(String, String)>,
}

impl Default for ServerScript {
    fn default() -> Self {
        Self {
            license: None,
            accept_auth: true,
            bpm: 120,
            bpi: 16,
            keepalive_secs: 30,
            extra_channels: Vec::new(),
        }
    }
}

/// Everything the server received, for assertions.
#[derive(Debug, Default)]
pub struct ServerLog {
    /// (client index, message kind) in arrival order.
    pub received: Vec<(usize, u8)>,
}

impl ServerLog {
    pub fn count(&self, kind: u8) -> usize {
        self.received.iter().filter(|(_, k)| *k == kind).count()
    }
}

pub struct LoopServer {
    addr: SocketAddr,
    stop: Arc<AtomicBool>,
    log: Arc<Mutex<ServerLog>>,
    handle: Option<std::thread::JoinHandle<()>>,
}

struct Seat {
    stream: TcpStream,
    reader: FrameReader,
    username: Option<String>,
    channel_name: Option<String>,
    dead: bool,
}

impl LoopServer {
    pub fn start(script: ServerScript) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
        let addr = listener.local_addr().expect("local addr");
        listener.set_nonblocking(true).expect("nonblocking listener");
        let stop = Arc::new(AtomicBool::new(false));
        let log = Arc::new(Mutex::new(ServerLog::default()));

        let thread_stop = Arc::clone(&stop);
        let thread_log = Arc::clone(&log);
        let handle = std::thread::spawn(move || {
            serve(&listener, &script, &thread_stop, &thread_log);
        });

        Self {
            addr,
            stop,
            log,
            handle: Some(handle),
        }
    }

    pub fn host(&self) -> String {
        format!("127.0.0.1:{}", self.addr.port())
    }

    pub fn log(&self) -> Arc<Mutex<ServerLog>> {
        Arc::clone(&self.log)
    }
}

impl Drop for LoopServer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn serve(
    listener: &TcpListener,
    script: &ServerScript,
    stop: &AtomicBool,
    log: &Mutex<ServerLog>,
) {
    let mut seats: Vec<Seat> = Vec::new();
    while !stop.load(Ordering::Relaxed) {
        if let Ok((stream, _)) = listener.accept() {
            stream
                .set_read_timeout(Some(Duration::from_millis(2)))
                .expect("read timeout");
            stream.set_nodelay(true).expect("nodelay");
            let mut seat = Seat {
                stream,
                reader: FrameReader::new(),
                username: None,
                channel_name: None,
                dead: false,
            };
            let _ = write_frame(
                &mut seat.stream,
                MSG_AUTH_CHALLENGE,
                &challenge_payload(script),
            );
            seats.push(seat);
        }

        for idx in 0..seats.len() {
            let frame = {
                let seat = &mut seats[idx];
                if seat.dead {
                    continue;
                }
                match seat.reader.poll(&mut seat.stream) {
                    Ok(frame) => frame,
                    Err(_) => {
                        seat.dead = true;
                        continue;
                    }
                }
            };
            if let Some(frame) = frame {
                log.lock().received.push((idx, frame.kind));
                handle_frame(&mut seats, idx, &frame, script);
            }
        }

        std::thread::sleep(Duration::from_millis(1));
    }
}

fn handle_frame(seats: &mut Vec<Seat>, idx: usize, frame: &RawFrame, script: &ServerScript) {
    match frame.kind {
        MSG_CLIENT_AUTH_USER => {
            let username = cstr_at(&frame.payload, 20).unwrap_or_default();
            seats[idx].username = Some(username);
            let reply = auth_reply_payload(script.accept_auth);
            let _ = write_frame(&mut seats[idx].stream, MSG_AUTH_REPLY, &reply);
            if script.accept_auth {
                let mut config = Vec::new();
                config.extend_from_slice(&script.bpm.to_le_bytes());
                config.extend_from_slice(&script.bpi.to_le_bytes());
                let _ = write_frame(&mut seats[idx].stream, MSG_CONFIG_CHANGE, &config);
                // Catch the newcomer up on everyone else's channels.
                let entries: Vec<(String, String)> = seats
                    .iter()
                    .enumerate()
                    .filter(|(other, s)| {
                        *other != idx && s.username.is_some() && s.channel_name.is_some()
                    })
                    .map(|(_, s)| {
                        (
                            s.username.clone().unwrap(),
                            s.channel_name.clone().unwrap(),
                        )
                    })
                    .collect();
                for (user, chan) in entries {
                    let payload = userinfo_payload(true, 0, &user, &chan);
                    let _ = write_frame(&mut seats[idx].stream, MSG_USERINFO_CHANGE, &payload);
                }
                for (user, chan) in &script.extra_channels {
                    let payload = userinfo_payload(true, 0, user, chan);
                    let _ = write_frame(&mut seats[idx].stream, MSG_USERINFO_CHANGE, &payload);
                }
            }
        }
        MSG_CLIENT_SET_CHANNEL_INFO => {
            // paramsize u16, then: name cstr, vol i16, pan i8, flags u8.
            let name = cstr_at(&frame.payload, 2).unwrap_or_default();
            seats[idx].channel_name = Some(name.clone());
            let Some(user) = seats[idx].username.clone() else {
                return;
            };
            let payload = userinfo_payload(true, 0, &user, &name);
            broadcast_except(seats, idx, MSG_USERINFO_CHANGE, &payload);
        }
        MSG_CLIENT_UPLOAD_BEGIN => {
            let Some(user) = seats[idx].username.clone() else {
                return;
            };
            let mut payload = frame.payload.clone();
            payload.extend_from_slice(user.as_bytes());
            payload.push(0);
            broadcast_except(seats, idx, MSG_DOWNLOAD_BEGIN, &payload);
        }
        MSG_CLIENT_UPLOAD_WRITE => {
            broadcast_except(seats, idx, MSG_DOWNLOAD_WRITE, &frame.payload);
        }
        _ => {}
    }
}

fn broadcast_except(seats: &mut [Seat], from: usize, kind: u8, payload: &[u8]) {
    for (other, seat) in seats.iter_mut().enumerate() {
        if other == from || seat.dead || seat.username.is_none() {
            continue;
        }
        if write_frame(&mut seat.stream, kind, payload).is_err() {
            seat.dead = true;
        }
        let _ = seat.stream.flush();
    }
}

fn challenge_payload(script: &ServerScript) -> Vec<u8> {
    let mut caps = u32::from(script.keepalive_secs) << 8;
    if script.license.is_some() {
        caps |= SERVER_CAP_LICENSE;
    }
    let mut payload = vec![0x4a, 0x41, 0x4d, 0x4c, 0x49, 0x4e, 0x4b, 0x21];
    payload.extend_from_slice(&caps.to_le_bytes());
    payload.extend_from_slice(&jamlink_protocol::PROTOCOL_VERSION.to_le_bytes());
    if let Some(license) = &script.license {
        payload.extend_from_slice(license.as_bytes());
        payload.push(0);
    }
    payload
}

fn auth_reply_payload(success: bool) -> Vec<u8> {
    let mut payload = vec![u8::from(success)];
    if success {
        payload.push(0); // empty message
        payload.push(32); // max channels
    } else {
        payload.extend_from_slice(b"invalid login\0");
    }
    payload
}

fn userinfo_payload(active: bool, channel_index: u8, user: &str, channel: &str) -> Vec<u8> {
    let mut payload = vec![u8::from(active), channel_index];
    payload.extend_from_slice(&0i16.to_le_bytes());
    payload.push(0); // pan
    payload.push(0); // flags
    payload.extend_from_slice(user.as_bytes());
    payload.push(0);
    payload.extend_from_slice(channel.as_bytes());
    payload.push(0);
    payload
}

fn cstr_at(payload: &[u8], offset: usize) -> Option<String> {
    let rest = payload.get(offset..)?;
    let nul = rest.iter().position(|&b| b == 0)?;
    Some(String::from_utf8_lossy(&rest[..nul]).into_owned())
}
