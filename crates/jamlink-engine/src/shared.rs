//! State shared lock-free between the audio callback, worker and UI.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use jamlink_rt::{StatusCell, UiSnapshot};

use crate::clock::IntervalClock;

/// Fixed number of peer channel seats preallocated on activation.
/// Subscriptions beyond this are refused, never allocated.
pub const PEER_CHANNEL_SLOTS: usize = 16;

/// Solo mask bit for the local channel; bits `0..PEER_CHANNEL_SLOTS` are the
/// peer slots.
pub const SOLO_LOCAL_BIT: u32 = 1 << 31;

/// Volume/pan/mute triple readable from the audio thread.
#[derive(Debug)]
pub struct ChannelGain {
    volume: AtomicU32,
    pan: AtomicU32,
    mute: AtomicBool,
}

impl ChannelGain {
    fn new(volume: f32) -> Self {
        Self {
            volume: AtomicU32::new(volume.to_bits()),
            pan: AtomicU32::new(0f32.to_bits()),
            mute: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn set_volume(&self, v: f32) {
        self.volume.store(v.clamp(0.0, 2.0).to_bits(), Ordering::Relaxed);
    }

    #[inline]
    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn set_pan(&self, p: f32) {
        self.pan.store(p.clamp(-1.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    #[inline]
    pub fn pan(&self) -> f32 {
        f32::from_bits(self.pan.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn set_mute(&self, m: bool) {
        self.mute.store(m, Ordering::Relaxed);
    }

    #[inline]
    pub fn muted(&self) -> bool {
        self.mute.load(Ordering::Relaxed)
    }
}

/// One peer channel seat as the audio thread sees it.
#[derive(Debug)]
pub struct SlotGain {
    pub gain: ChannelGain,
    active: AtomicBool,
}

impl SlotGain {
    #[inline]
    pub fn set_active(&self, on: bool) {
        self.active.store(on, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }
}

/// Every mixing knob the audio thread reads, as relaxed atomics. The UI and
/// worker write; no field orders against any other.
#[derive(Debug)]
pub struct MixGains {
    pub master: ChannelGain,
    pub metronome: ChannelGain,
    pub local: ChannelGain,
    local_transmit: AtomicBool,
    solo_mask: AtomicU32,
    pub slots: [SlotGain; PEER_CHANNEL_SLOTS],
}

impl Default for MixGains {
    fn default() -> Self {
        Self {
            master: ChannelGain::new(1.0),
            metronome: ChannelGain::new(0.5),
            local: ChannelGain::new(1.0),
            local_transmit: AtomicBool::new(true),
            solo_mask: AtomicU32::new(0),
            slots: std::array::from_fn(|_| SlotGain {
                gain: ChannelGain::new(1.0),
                active: AtomicBool::new(false),
            }),
        }
    }
}

impl MixGains {
    #[inline]
    pub fn set_transmit(&self, on: bool) {
        self.local_transmit.store(on, Ordering::Relaxed);
    }

    #[inline]
    pub fn transmit(&self) -> bool {
        self.local_transmit.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn solo_mask(&self) -> u32 {
        self.solo_mask.load(Ordering::Relaxed)
    }

    pub fn set_solo_bit(&self, bit: u32, on: bool) {
        if on {
            self.solo_mask.fetch_or(bit, Ordering::Relaxed);
        } else {
            self.solo_mask.fetch_and(!bit, Ordering::Relaxed);
        }
    }

    /// Solo law: with a non-empty mask only soloed channels sound.
    #[inline]
    pub fn audible(&self, bit: u32) -> bool {
        let mask = self.solo_mask();
        mask == 0 || mask & bit != 0
    }
}

/// The one structure both sides of the engine hold an `Arc` to.
#[derive(Debug)]
pub struct SharedState {
    pub status: StatusCell,
    pub clock: IntervalClock,
    pub gains: MixGains,
    pub snapshot: Arc<UiSnapshot>,
}

impl SharedState {
    pub fn new(snapshot: Arc<UiSnapshot>) -> Self {
        Self {
            status: StatusCell::default(),
            clock: IntervalClock::default(),
            gains: MixGains::default(),
            snapshot,
        }
    }
}

/// Equal-power pan gains for `pan` in [-1, 1], -3 dB at center.
#[inline]
pub fn pan_gains(pan: f32) -> (f32, f32) {
    let theta = (pan.clamp(-1.0, 1.0) + 1.0) * 0.5 * core::f32::consts::FRAC_PI_2;
    (theta.cos(), theta.sin())
}
