//! Interval clock shared between the audio callback and the worker.
//!
//! The audio thread is the only writer of `position`; the worker schedules
//! tempo changes into the `next_*` fields, which take effect exactly at the
//! wrap so the current interval always completes with its old length. Every
//! wrap advances `serial`, which is how the worker observes boundaries and
//! how playback buffers are matched to the interval they belong to.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

#[derive(Debug)]
pub struct IntervalClock {
    position: AtomicU32,
    length: AtomicU32,
    bpi: AtomicU32,
    next_length: AtomicU32,
    next_bpi: AtomicU32,
    serial: AtomicU64,
}

impl Default for IntervalClock {
    fn default() -> Self {
        Self {
            position: AtomicU32::new(0),
            length: AtomicU32::new(0),
            bpi: AtomicU32::new(0),
            next_length: AtomicU32::new(0),
            next_bpi: AtomicU32::new(0),
            serial: AtomicU64::new(0),
        }
    }
}

impl IntervalClock {
    /// Frames in one interval of `bpi` beats at `bpm`.
    pub fn interval_frames(sample_rate: u32, bpm: f32, bpi: u32) -> u32 {
        (f64::from(sample_rate) * 60.0 * f64::from(bpi) / f64::from(bpm)).round() as u32
    }

    /// Worker: starts the clock at position zero. Used on join.
    pub fn reset(&self, length: u32, bpi: u32) {
        self.position.store(0, Ordering::Relaxed);
        self.length.store(length, Ordering::Relaxed);
        self.bpi.store(bpi, Ordering::Relaxed);
        self.next_length.store(length, Ordering::Relaxed);
        self.next_bpi.store(bpi, Ordering::Relaxed);
        self.serial.fetch_add(1, Ordering::Release);
    }

    /// Worker: adopts a new tempo at the next boundary.
    pub fn schedule(&self, length: u32, bpi: u32) {
        self.next_length.store(length, Ordering::Relaxed);
        self.next_bpi.store(bpi, Ordering::Relaxed);
    }

    /// Worker on teardown.
    pub fn stop(&self) {
        self.position.store(0, Ordering::Relaxed);
        self.length.store(0, Ordering::Relaxed);
        self.bpi.store(0, Ordering::Relaxed);
    }

    pub fn is_running(&self) -> bool {
        self.length.load(Ordering::Relaxed) > 0
    }

    pub fn position(&self) -> u32 {
        self.position.load(Ordering::Relaxed)
    }

    pub fn length(&self) -> u32 {
        self.length.load(Ordering::Relaxed)
    }

    pub fn bpi(&self) -> u32 {
        self.bpi.load(Ordering::Relaxed)
    }

    pub fn serial(&self) -> u64 {
        self.serial.load(Ordering::Acquire)
    }

    /// Beat index of `position`, in `0..bpi`.
    pub fn beat_of(&self, position: u32) -> u32 {
        let len = self.length();
        let bpi = self.bpi();
        if len == 0 || bpi == 0 {
            return 0;
        }
        (u64::from(position) * u64::from(bpi) / u64::from(len)) as u32
    }

    /// First frame of beat `beat` within an interval. Integer math keeps
    /// click placement drift-free over arbitrarily long sessions.
    pub fn beat_start(beat: u32, length: u32, bpi: u32) -> u32 {
        if bpi == 0 {
            return 0;
        }
        (u64::from(beat) * u64::from(length) / u64::from(bpi)) as u32
    }

    /// Audio thread: advances by `frames`, which the caller has clamped so
    /// the position never passes the boundary. Returns `true` on wrap, at
    /// which point the scheduled tempo is adopted.
    pub fn advance(&self, frames: u32) -> bool {
        let pos = self.position.load(Ordering::Relaxed) + frames;
        let len = self.length.load(Ordering::Relaxed);
        if pos < len {
            self.position.store(pos, Ordering::Relaxed);
            return false;
        }
        self.position.store(0, Ordering::Relaxed);
        self.length
            .store(self.next_length.load(Ordering::Relaxed), Ordering::Relaxed);
        self.bpi
            .store(self.next_bpi.load(Ordering::Relaxed), Ordering::Relaxed);
        self.serial.fetch_add(1, Ordering::Release);
        true
    }
}
