//! Interval-delay streaming state: the encode seat for the local channel
//! and one decode seat per subscribed peer channel.
//!
//! Decoded intervals cross to the audio thread as immutable swap-published
//! buffers tagged with the clock serial they belong to; the audio thread
//! indexes them directly by interval position, so playback alignment is
//! exact by construction. The worker retires the previous buffer one
//! interval late so the audio thread never drops the last reference.

use std::sync::Arc;

use arc_swap::ArcSwapOption;

use jamlink_protocol::IntervalGuid;

use crate::codec::BlockCodec;
use crate::shared::PEER_CHANNEL_SLOTS;

/// One decoded peer interval, interleaved stereo, published for exactly one
/// clock serial.
#[derive(Debug)]
pub struct SlotInterval {
    pub serial: u64,
    pub pcm: Vec<f32>,
}

pub type PlaybackSlots = Vec<Arc<ArcSwapOption<SlotInterval>>>;

pub fn playback_slots() -> PlaybackSlots {
    (0..PEER_CHANNEL_SLOTS)
        .map(|_| Arc::new(ArcSwapOption::empty()))
        .collect()
}

/// Reassembly of one incoming interval, keyed by guid.
pub struct Assembly {
    pub guid: IntervalGuid,
    pub pcm: Vec<f32>,
}

/// Decode seat bound to one subscribed peer channel.
pub struct DecodeSlot {
    pub user: String,
    pub channel_index: u8,
    pub decoder: Box<dyn BlockCodec>,
    pub assembling: Option<Assembly>,
    /// Decoded interval waiting for the next boundary.
    pub ready: Option<Vec<f32>>,
    retired: Option<Arc<SlotInterval>>,
}

impl DecodeSlot {
    pub fn new(user: String, channel_index: u8, decoder: Box<dyn BlockCodec>) -> Self {
        Self {
            user,
            channel_index,
            decoder,
            assembling: None,
            ready: None,
            retired: None,
        }
    }

    /// Drops any in-flight reassembly (guid expiry, silence announcement).
    pub fn abandon(&mut self) {
        self.assembling = None;
        self.decoder.reset();
    }

    /// Publishes the ready interval for `serial`, if any, keeping the
    /// previously playing buffer alive one more interval.
    pub fn publish(&mut self, playback: &ArcSwapOption<SlotInterval>, serial: u64) {
        if let Some(pcm) = self.ready.take() {
            let fresh = Arc::new(SlotInterval { serial, pcm });
            self.retired = playback.swap(Some(fresh));
        } else {
            self.retired = playback.swap(None);
        }
    }

    /// Clears playback on unsubscribe.
    pub fn clear(&mut self, playback: &ArcSwapOption<SlotInterval>) {
        self.abandon();
        self.ready = None;
        self.retired = playback.swap(None);
    }
}

/// Encode seat for the local channel's outgoing intervals.
pub struct EncodeSeat {
    pub encoder: Box<dyn BlockCodec>,
    pub guid: IntervalGuid,
    /// An interval-begin has been sent for `guid` and chunks may follow.
    pub announced: bool,
}

impl EncodeSeat {
    pub fn new(encoder: Box<dyn BlockCodec>) -> Self {
        Self {
            encoder,
            guid: [0u8; 16],
            announced: false,
        }
    }

    pub fn rotate_guid(&mut self) {
        rand::Rng::fill(&mut rand::thread_rng(), &mut self.guid[..]);
    }
}
