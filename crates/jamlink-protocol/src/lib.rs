//! JamLink wire protocol
//! =====================
//! Message framing, typed payload parsing/encoding and the auth handshake
//! hash for the NINJAM server protocol. The bit layout is inherited
//! unchanged from the public protocol so this client interoperates with
//! existing servers.

mod auth;
mod frame;
mod message;

pub use auth::password_hash;
pub use frame::{write_frame, FrameReader, RawFrame, MAX_PAYLOAD_LEN};
pub use message::{
    write_client_message, AuthChallenge, AuthReply, ChannelInfo, ClientMessage, ConfigChange,
    IntervalBegin, IntervalWrite, ServerMessage, UserInfoEntry, MSG_AUTH_CHALLENGE,
    MSG_AUTH_REPLY, MSG_CONFIG_CHANGE, MSG_DOWNLOAD_BEGIN, MSG_DOWNLOAD_WRITE, MSG_KEEPALIVE,
    MSG_SET_CHANNEL_INFO, MSG_SET_USERMASK, MSG_UPLOAD_BEGIN, MSG_UPLOAD_WRITE,
    MSG_USERINFO_CHANGE, SERVER_CAP_LICENSE,
};

use thiserror::Error;

/// 16-byte identifier a client assigns to each of its transmitted intervals.
pub type IntervalGuid = [u8; 16];

/// Four-character payload tag carried in interval-begin messages.
#[must_use]
pub const fn fourcc(tag: [u8; 4]) -> u32 {
    u32::from_le_bytes(tag)
}

/// Ogg Vorbis payloads, the tag public servers expect.
pub const FOURCC_OGG_VORBIS: u32 = fourcc(*b"OGGv");

/// Version identifier this client reports during auth.
pub const PROTOCOL_VERSION: u32 = 0x0002_0000;

/// Client capability bit: the user agreed to the server license.
pub const AUTH_CAP_LICENSE_AGREED: u32 = 1;

/// Last-chunk flag on interval-write messages.
pub const INTERVAL_WRITE_LAST: u8 = 1;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("truncated {0} payload")]
    Truncated(&'static str),
    #[error("frame payload of {0} bytes exceeds protocol limit")]
    Oversized(u32),
    #[error("unterminated string in {0} payload")]
    BadString(&'static str),
}
