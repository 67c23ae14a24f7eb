use std::sync::atomic::{AtomicU32, Ordering};

/// Flat record of word-sized atomics the UI samples every frame.
///
/// Writers (worker for transport values, audio callback for VU peaks) use
/// relaxed stores; no ordering between fields is claimed and the UI accepts
/// mild skew between them. Floats travel as raw bits in `AtomicU32`.
#[derive(Debug)]
pub struct UiSnapshot {
    bpm: AtomicU32,
    bpi: AtomicU32,
    interval_position: AtomicU32,
    interval_length: AtomicU32,
    beat: AtomicU32,
    master_vu_l: AtomicU32,
    master_vu_r: AtomicU32,
    local_vu_l: AtomicU32,
    local_vu_r: AtomicU32,
}

impl Default for UiSnapshot {
    fn default() -> Self {
        Self {
            bpm: AtomicU32::new(0f32.to_bits()),
            bpi: AtomicU32::new(0),
            interval_position: AtomicU32::new(0),
            interval_length: AtomicU32::new(0),
            beat: AtomicU32::new(0),
            master_vu_l: AtomicU32::new(0f32.to_bits()),
            master_vu_r: AtomicU32::new(0f32.to_bits()),
            local_vu_l: AtomicU32::new(0f32.to_bits()),
            local_vu_r: AtomicU32::new(0f32.to_bits()),
        }
    }
}

impl UiSnapshot {
    pub fn set_tempo(&self, bpm: f32, bpi: u32) {
        self.bpm.store(bpm.to_bits(), Ordering::Relaxed);
        self.bpi.store(bpi, Ordering::Relaxed);
    }

    pub fn tempo(&self) -> (f32, u32) {
        (
            f32::from_bits(self.bpm.load(Ordering::Relaxed)),
            self.bpi.load(Ordering::Relaxed),
        )
    }

    pub fn set_interval(&self, position: u32, length: u32) {
        self.interval_position.store(position, Ordering::Relaxed);
        self.interval_length.store(length, Ordering::Relaxed);
    }

    pub fn interval(&self) -> (u32, u32) {
        (
            self.interval_position.load(Ordering::Relaxed),
            self.interval_length.load(Ordering::Relaxed),
        )
    }

    pub fn set_beat(&self, beat: u32) {
        self.beat.store(beat, Ordering::Relaxed);
    }

    pub fn beat(&self) -> u32 {
        self.beat.load(Ordering::Relaxed)
    }

    pub fn set_master_vu(&self, left: f32, right: f32) {
        self.master_vu_l.store(left.to_bits(), Ordering::Relaxed);
        self.master_vu_r.store(right.to_bits(), Ordering::Relaxed);
    }

    pub fn master_vu(&self) -> (f32, f32) {
        (
            f32::from_bits(self.master_vu_l.load(Ordering::Relaxed)),
            f32::from_bits(self.master_vu_r.load(Ordering::Relaxed)),
        )
    }

    pub fn set_local_vu(&self, left: f32, right: f32) {
        self.local_vu_l.store(left.to_bits(), Ordering::Relaxed);
        self.local_vu_r.store(right.to_bits(), Ordering::Relaxed);
    }

    pub fn local_vu(&self) -> (f32, f32) {
        (
            f32::from_bits(self.local_vu_l.load(Ordering::Relaxed)),
            f32::from_bits(self.local_vu_r.load(Ordering::Relaxed)),
        )
    }
}
