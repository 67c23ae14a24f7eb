//! JamLink Engine
//! ==============
//! The NINJAM client core: connection state machine, interval-delay
//! streaming, peer/channel registry and the allocation-free real-time mix
//! path. The engine is driven cooperatively by a network worker tick and
//! exposes a separate preallocated audio-side entry for the host callback;
//! the two sides share only atomics, SPSC rings and swap-published interval
//! buffers.

pub mod channels;
pub mod clock;
pub mod codec;
mod engine;
mod error;
mod intervals;
pub mod rt;
mod shared;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use channels::{LocalChannelInfo, PeerChannel, PeerUser, Roster};
pub use codec::CodecKind;
pub use engine::{ConnectParams, Engine, LicenseDecision, PeerChannelParam, Tick};
pub use error::ClientError;
pub use rt::{AudioPath, HostTransport};
pub use shared::{MixGains, SharedState, PEER_CHANNEL_SLOTS, SOLO_LOCAL_BIT};

use std::sync::Arc;

use jamlink_rt::{EventQueue, UiSnapshot};

/// Parameters fixed at the moment the host activates processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub sample_rate: u32,
    pub max_block_frames: usize,
}

/// Builds a connected engine/audio-path pair for one activation.
///
/// The [`Engine`] belongs behind the plugin's mutex on the worker and UI
/// threads; the [`AudioPath`] is owned exclusively by the host audio
/// callback. All rings and interval buffers they share are allocated here.
pub fn create(
    cfg: SessionConfig,
    codec: codec::CodecKind,
    events: Arc<EventQueue>,
    snapshot: Arc<UiSnapshot>,
) -> (Engine, AudioPath) {
    let shared = Arc::new(SharedState::new(snapshot));
    let (input_tx, input_rx) = rtrb::RingBuffer::new(cfg.max_block_frames * 2 * rt::INPUT_RING_BLOCKS);
    let playback = intervals::playback_slots();
    let audio = AudioPath::new(cfg, Arc::clone(&shared), playback.clone(), input_tx);
    let engine = Engine::new(cfg, codec, shared, playback, input_rx, events);
    (engine, audio)
}
