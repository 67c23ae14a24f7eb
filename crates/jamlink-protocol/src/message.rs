use std::io::{self, Write};

use byteorder::{LittleEndian, WriteBytesExt};

use crate::frame::{write_frame, RawFrame};
use crate::{IntervalGuid, ProtocolError};

pub const MSG_AUTH_CHALLENGE: u8 = 0x00;
pub const MSG_AUTH_REPLY: u8 = 0x01;
pub const MSG_CONFIG_CHANGE: u8 = 0x02;
pub const MSG_USERINFO_CHANGE: u8 = 0x03;
pub const MSG_DOWNLOAD_BEGIN: u8 = 0x04;
pub const MSG_DOWNLOAD_WRITE: u8 = 0x05;
pub const MSG_AUTH_USER: u8 = 0x80;
pub const MSG_SET_USERMASK: u8 = 0x81;
pub const MSG_SET_CHANNEL_INFO: u8 = 0x82;
pub const MSG_UPLOAD_BEGIN: u8 = 0x83;
pub const MSG_UPLOAD_WRITE: u8 = 0x84;
pub const MSG_CHAT: u8 = 0xc0;
pub const MSG_KEEPALIVE: u8 = 0xfd;

/// Server capability bit: the payload carries a license agreement the user
/// must accept before auth may proceed.
pub const SERVER_CAP_LICENSE: u32 = 1;

/// Server-hello carrying the auth challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChallenge {
    pub challenge: [u8; 8],
    pub server_caps: u32,
    pub protocol_version: u32,
    /// License agreement text, present when `server_caps` has
    /// [`SERVER_CAP_LICENSE`] set.
    pub license: Option<String>,
}

impl AuthChallenge {
    /// Keepalive interval in seconds, encoded in caps bits 8..16.
    /// Zero means the server default applies.
    pub fn keepalive_secs(&self) -> u32 {
        (self.server_caps >> 8) & 0xff
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthReply {
    pub success: bool,
    pub message: String,
    pub max_channels: u8,
}

/// Tempo broadcast; sent on join and on every change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigChange {
    pub bpm: u16,
    pub bpi: u16,
}

/// One record of a userinfo-change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfoEntry {
    pub active: bool,
    pub channel_index: u8,
    pub volume: i16,
    pub pan: i8,
    pub flags: u8,
    pub username: String,
    pub channel_name: String,
}

/// Announces an incoming interval for a peer channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntervalBegin {
    pub guid: IntervalGuid,
    pub estimated_size: u32,
    pub fourcc: u32,
    pub channel_index: u8,
    pub username: String,
}

impl IntervalBegin {
    /// An all-zero guid announces silence: the channel has nothing for this
    /// interval and any partial reassembly should be discarded.
    pub fn is_silence(&self) -> bool {
        self.guid == [0u8; 16]
    }
}

/// One chunk of compressed interval audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntervalWrite {
    pub guid: IntervalGuid,
    pub flags: u8,
    pub data: Vec<u8>,
}

/// Messages a server sends that this client understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    AuthChallenge(AuthChallenge),
    AuthReply(AuthReply),
    ConfigChange(ConfigChange),
    UserInfoChange(Vec<UserInfoEntry>),
    IntervalBegin(IntervalBegin),
    IntervalWrite(IntervalWrite),
    /// NUL-separated chat fields; only `TOPIC` is consumed, the rest is
    /// parsed and dropped.
    Chat(Vec<String>),
    Keepalive,
    /// Message type this client does not interpret; ignored.
    Unknown(u8),
}

impl ServerMessage {
    pub fn parse(frame: &RawFrame) -> Result<ServerMessage, ProtocolError> {
        let mut r = Reader::new(&frame.payload);
        match frame.kind {
            MSG_AUTH_CHALLENGE => {
                let mut challenge = [0u8; 8];
                r.bytes_into("auth challenge", &mut challenge)?;
                let server_caps = r.u32("auth challenge")?;
                let protocol_version = r.u32("auth challenge")?;
                let license = if server_caps & SERVER_CAP_LICENSE != 0 {
                    Some(r.cstr("auth challenge")?)
                } else {
                    None
                };
                Ok(ServerMessage::AuthChallenge(AuthChallenge {
                    challenge,
                    server_caps,
                    protocol_version,
                    license,
                }))
            }
            MSG_AUTH_REPLY => {
                let flags = r.u8("auth reply")?;
                let message = r.cstr("auth reply").unwrap_or_default();
                let max_channels = r.u8("auth reply").unwrap_or(0);
                Ok(ServerMessage::AuthReply(AuthReply {
                    success: flags & 1 != 0,
                    message,
                    max_channels,
                }))
            }
            MSG_CONFIG_CHANGE => {
                let bpm = r.u16("config change")?;
                let bpi = r.u16("config change")?;
                Ok(ServerMessage::ConfigChange(ConfigChange { bpm, bpi }))
            }
            MSG_USERINFO_CHANGE => {
                let mut entries = Vec::new();
                while !r.is_empty() {
                    let active = r.u8("userinfo")? != 0;
                    let channel_index = r.u8("userinfo")?;
                    let volume = r.u16("userinfo")? as i16;
                    let pan = r.u8("userinfo")? as i8;
                    let flags = r.u8("userinfo")?;
                    let username = r.cstr("userinfo")?;
                    let channel_name = r.cstr("userinfo")?;
                    entries.push(UserInfoEntry {
                        active,
                        channel_index,
                        volume,
                        pan,
                        flags,
                        username,
                        channel_name,
                    });
                }
                Ok(ServerMessage::UserInfoChange(entries))
            }
            MSG_DOWNLOAD_BEGIN => {
                let mut guid = [0u8; 16];
                r.bytes_into("interval begin", &mut guid)?;
                let estimated_size = r.u32("interval begin")?;
                let fourcc = r.u32("interval begin")?;
                let channel_index = r.u8("interval begin")?;
                let username = r.cstr("interval begin")?;
                Ok(ServerMessage::IntervalBegin(IntervalBegin {
                    guid,
                    estimated_size,
                    fourcc,
                    channel_index,
                    username,
                }))
            }
            MSG_DOWNLOAD_WRITE => {
                let mut guid = [0u8; 16];
                r.bytes_into("interval write", &mut guid)?;
                let flags = r.u8("interval write")?;
                Ok(ServerMessage::IntervalWrite(IntervalWrite {
                    guid,
                    flags,
                    data: r.rest().to_vec(),
                }))
            }
            MSG_CHAT => {
                let mut fields = Vec::new();
                while !r.is_empty() {
                    fields.push(r.cstr("chat")?);
                }
                Ok(ServerMessage::Chat(fields))
            }
            MSG_KEEPALIVE => Ok(ServerMessage::Keepalive),
            other => Ok(ServerMessage::Unknown(other)),
        }
    }
}

/// Per-channel record of a set-channel-info message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub name: String,
    pub volume: i16,
    pub pan: i8,
    pub flags: u8,
}

/// Messages this client sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    AuthUser {
        password_hash: [u8; 20],
        username: String,
        caps: u32,
        protocol_version: u32,
    },
    SetUsermask {
        entries: Vec<(String, u32)>,
    },
    SetChannelInfo {
        channels: Vec<ChannelInfo>,
    },
    UploadBegin {
        guid: IntervalGuid,
        estimated_size: u32,
        fourcc: u32,
        channel_index: u8,
    },
    UploadWrite {
        guid: IntervalGuid,
        flags: u8,
        data: Vec<u8>,
    },
    Keepalive,
}

impl ClientMessage {
    pub fn kind(&self) -> u8 {
        match self {
            ClientMessage::AuthUser { .. } => MSG_AUTH_USER,
            ClientMessage::SetUsermask { .. } => MSG_SET_USERMASK,
            ClientMessage::SetChannelInfo { .. } => MSG_SET_CHANNEL_INFO,
            ClientMessage::UploadBegin { .. } => MSG_UPLOAD_BEGIN,
            ClientMessage::UploadWrite { .. } => MSG_UPLOAD_WRITE,
            ClientMessage::Keepalive => MSG_KEEPALIVE,
        }
    }

    pub fn encode_payload(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            ClientMessage::AuthUser {
                password_hash,
                username,
                caps,
                protocol_version,
            } => {
                out.extend_from_slice(password_hash);
                push_cstr(&mut out, username);
                let _ = out.write_u32::<LittleEndian>(*caps);
                let _ = out.write_u32::<LittleEndian>(*protocol_version);
            }
            ClientMessage::SetUsermask { entries } => {
                for (username, mask) in entries {
                    push_cstr(&mut out, username);
                    let _ = out.write_u32::<LittleEndian>(*mask);
                }
            }
            ClientMessage::SetChannelInfo { channels } => {
                // Parameter size precedes the records so older servers can
                // skip fields they do not know.
                let _ = out.write_u16::<LittleEndian>(4);
                for ch in channels {
                    push_cstr(&mut out, &ch.name);
                    let _ = out.write_i16::<LittleEndian>(ch.volume);
                    let _ = out.write_i8(ch.pan);
                    let _ = out.write_u8(ch.flags);
                }
            }
            ClientMessage::UploadBegin {
                guid,
                estimated_size,
                fourcc,
                channel_index,
            } => {
                out.extend_from_slice(guid);
                let _ = out.write_u32::<LittleEndian>(*estimated_size);
                let _ = out.write_u32::<LittleEndian>(*fourcc);
                let _ = out.write_u8(*channel_index);
            }
            ClientMessage::UploadWrite { guid, flags, data } => {
                out.extend_from_slice(guid);
                let _ = out.write_u8(*flags);
                out.extend_from_slice(data);
            }
            ClientMessage::Keepalive => {}
        }
        out
    }
}

/// Frames and writes one client message.
pub fn write_client_message(stream: &mut impl Write, msg: &ClientMessage) -> io::Result<()> {
    write_frame(stream, msg.kind(), &msg.encode_payload())
}

fn push_cstr(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(s.as_bytes());
    out.push(0);
}

struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn rest(&self) -> &'a [u8] {
        self.buf
    }

    fn u8(&mut self, what: &'static str) -> Result<u8, ProtocolError> {
        let (&b, rest) = self.buf.split_first().ok_or(ProtocolError::Truncated(what))?;
        self.buf = rest;
        Ok(b)
    }

    fn u16(&mut self, what: &'static str) -> Result<u16, ProtocolError> {
        if self.buf.len() < 2 {
            return Err(ProtocolError::Truncated(what));
        }
        let v = u16::from_le_bytes([self.buf[0], self.buf[1]]);
        self.buf = &self.buf[2..];
        Ok(v)
    }

    fn u32(&mut self, what: &'static str) -> Result<u32, ProtocolError> {
        if self.buf.len() < 4 {
            return Err(ProtocolError::Truncated(what));
        }
        let v = u32::from_le_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]);
        self.buf = &self.buf[4..];
        Ok(v)
    }

    fn bytes_into(&mut self, what: &'static str, dst: &mut [u8]) -> Result<(), ProtocolError> {
        if self.buf.len() < dst.len() {
            return Err(ProtocolError::Truncated(what));
        }
        dst.copy_from_slice(&self.buf[..dst.len()]);
        self.buf = &self.buf[dst.len()..];
        Ok(())
    }

    fn cstr(&mut self, what: &'static str) -> Result<String, ProtocolError> {
        let nul = self
            .buf
            .iter()
            .position(|&b| b == 0)
            .ok_or(ProtocolError::BadString(what))?;
        let s = String::from_utf8_lossy(&self.buf[..nul]).into_owned();
        self.buf = &self.buf[nul + 1..];
        Ok(s)
    }
}
