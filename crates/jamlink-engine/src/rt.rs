//! Real-time audio entry.
//!
//! Everything here runs on the host's audio thread: no locks, no heap
//! allocation, no I/O. The path reads relaxed atomics for configuration,
//! consumes swap-published peer interval buffers, feeds local PCM into the
//! encode ring and writes VU peaks back into the snapshot.

use std::sync::Arc;

use crate::intervals::PlaybackSlots;
use crate::shared::{pan_gains, SharedState, SOLO_LOCAL_BIT};
use crate::SessionConfig;

/// Host transport flags delivered with each process call.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostTransport {
    pub playing: bool,
    pub seeking: bool,
    pub song_pos_frames: u64,
}

/// Blocks of input ring capacity relative to the activated block size.
pub const INPUT_RING_BLOCKS: usize = 32;

/// Metronome click length as a fraction of the sample rate (40 ms).
const CLICK_LEN_DIV: u32 = 25;

const CLICK_ACCENT_HZ: f32 = 1320.0;
const CLICK_BEAT_HZ: f32 = 880.0;
const CLICK_ACCENT_AMP: f32 = 1.0;
const CLICK_BEAT_AMP: f32 = 0.4;

/// The audio-side half of the engine, owned exclusively by the host
/// callback. Constructed by [`crate::create`]; everything it will ever
/// touch is allocated there.
pub struct AudioPath {
    shared: Arc<SharedState>,
    playback: PlaybackSlots,
    input_tx: rtrb::Producer<f32>,
    input_dropped: u64,
    sample_rate: f32,
    click_len: u32,
    click_age: u32,
    click_accent: bool,
}

impl AudioPath {
    pub(crate) fn new(
        cfg: SessionConfig,
        shared: Arc<SharedState>,
        playback: PlaybackSlots,
        input_tx: rtrb::Producer<f32>,
    ) -> Self {
        Self {
            shared,
            playback,
            input_tx,
            input_dropped: 0,
            sample_rate: cfg.sample_rate as f32,
            click_len: cfg.sample_rate / CLICK_LEN_DIV,
            click_age: u32::MAX,
            click_accent: false,
        }
    }

    /// Input frames lost to a full encode ring since activation.
    pub fn input_dropped(&self) -> u64 {
        self.input_dropped
    }

    /// Mixes one block. Buffers must all hold `frames` samples; the caller
    /// has already applied the not-joined bypass and block-size clamp.
    pub fn process(
        &mut self,
        inputs: [&[f32]; 2],
        outputs: [&mut [f32]; 2],
        frames: usize,
        _transport: &HostTransport,
    ) {
        let [in_l, in_r] = inputs;
        let [out_l, out_r] = outputs;
        let shared = Arc::clone(&self.shared);
        let gains = &shared.gains;

        // Local VU from the raw input, before any gain.
        let mut peak_in = (0f32, 0f32);
        for f in 0..frames {
            peak_in.0 = peak_in.0.max(in_l[f].abs());
            peak_in.1 = peak_in.1.max(in_r[f].abs());
        }
        shared.snapshot.set_local_vu(peak_in.0, peak_in.1);

        if gains.transmit() {
            for f in 0..frames {
                if self.input_tx.push(in_l[f]).is_err() || self.input_tx.push(in_r[f]).is_err() {
                    self.input_dropped += 1;
                    break;
                }
            }
        }

        out_l[..frames].fill(0.0);
        out_r[..frames].fill(0.0);

        // Peer playback and metronome follow the interval clock, segmented
        // at boundaries so a block straddling a wrap stays aligned.
        if shared.clock.is_running() {
            let mut offset = 0usize;
            while offset < frames {
                let pos = shared.clock.position();
                let len = shared.clock.length();
                let run = (frames - offset).min((len - pos) as usize);
                self.mix_peers(out_l, out_r, offset, run, pos);
                self.mix_metronome(out_l, out_r, offset, run, pos, len);
                shared.clock.advance(run as u32);
                offset += run;
            }
        }

        // Local monitoring, post-send.
        if !gains.local.muted() && gains.audible(SOLO_LOCAL_BIT) {
            let vol = gains.local.volume();
            let (gl, gr) = pan_gains(gains.local.pan());
            for f in 0..frames {
                out_l[f] += in_l[f] * vol * gl;
                out_r[f] += in_r[f] * vol * gr;
            }
        }

        // Master stage; mute short-circuits after mixing.
        let mut peak_out = (0f32, 0f32);
        if gains.master.muted() {
            out_l[..frames].fill(0.0);
            out_r[..frames].fill(0.0);
        } else {
            let vol = gains.master.volume();
            for f in 0..frames {
                out_l[f] *= vol;
                out_r[f] *= vol;
                peak_out.0 = peak_out.0.max(out_l[f].abs());
                peak_out.1 = peak_out.1.max(out_r[f].abs());
            }
        }
        shared.snapshot.set_master_vu(peak_out.0, peak_out.1);
    }

    fn mix_peers(&self, out_l: &mut [f32], out_r: &mut [f32], offset: usize, run: usize, pos: u32) {
        let serial = self.shared.clock.serial();
        for (i, (slot, playback)) in self.shared.gains.slots.iter().zip(&self.playback).enumerate() {
            if !slot.is_active() || slot.gain.muted() {
                continue;
            }
            if !self.shared.gains.audible(1u32 << i) {
                continue;
            }
            let guard = playback.load();
            let Some(interval) = guard.as_ref() else {
                continue;
            };
            if interval.serial != serial {
                continue;
            }
            let vol = slot.gain.volume();
            let (gl, gr) = pan_gains(slot.gain.pan());
            let base = pos as usize * 2;
            let avail = interval.pcm.len().saturating_sub(base) / 2;
            for f in 0..run.min(avail) {
                out_l[offset + f] += interval.pcm[base + f * 2] * vol * gl;
                out_r[offset + f] += interval.pcm[base + f * 2 + 1] * vol * gr;
            }
        }
    }

    fn mix_metronome(
        &mut self,
        out_l: &mut [f32],
        out_r: &mut [f32],
        offset: usize,
        run: usize,
        pos: u32,
        len: u32,
    ) {
        let bpi = self.shared.clock.bpi();
        if bpi == 0 {
            return;
        }
        let metro_vol = self.shared.gains.metronome.volume();
        let muted = self.shared.gains.metronome.muted();

        let mut beat = self.shared.clock.beat_of(pos);
        let mut next_start = crate::clock::IntervalClock::beat_start(beat, len, bpi);
        if next_start < pos {
            beat += 1;
            next_start = crate::clock::IntervalClock::beat_start(beat, len, bpi);
        }

        for f in 0..run {
            let p = pos + f as u32;
            if beat < bpi && p == next_start {
                self.click_age = 0;
                self.click_accent = beat == 0;
                beat += 1;
                next_start = crate::clock::IntervalClock::beat_start(beat, len, bpi);
            }
            if self.click_age < self.click_len {
                if !muted && metro_vol > 0.0 {
                    let t = self.click_age as f32 / self.sample_rate;
                    let env = 1.0 - self.click_age as f32 / self.click_len as f32;
                    let (freq, amp) = if self.click_accent {
                        (CLICK_ACCENT_HZ, CLICK_ACCENT_AMP)
                    } else {
                        (CLICK_BEAT_HZ, CLICK_BEAT_AMP)
                    };
                    let sample =
                        (t * freq * core::f32::consts::TAU).sin() * env * env * amp * metro_vol;
                    out_l[offset + f] += sample;
                    out_r[offset + f] += sample;
                }
                self.click_age += 1;
            }
        }
    }
}
