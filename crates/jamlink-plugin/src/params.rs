//! Host parameter surface: four fixed parameters with stable ids.
//!
//! The host delivers changes as timestamped events; the audio path applies
//! each at its frame by storing into the corresponding atomic. Values live
//! twice with relaxed ordering: here for the UI, and in the engine's mix
//! atomics for the audio thread.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

pub const PARAM_MASTER_VOLUME: u32 = 0;
pub const PARAM_MASTER_MUTE: u32 = 1;
pub const PARAM_METRONOME_VOLUME: u32 = 2;
pub const PARAM_METRONOME_MUTE: u32 = 3;

#[derive(Debug, Clone, Copy)]
pub enum ParamKind {
    Continuous { min: f32, max: f32, default: f32 },
    Stepped { default: bool },
}

#[derive(Debug, Clone, Copy)]
pub struct ParamDef {
    pub id: u32,
    pub name: &'static str,
    pub kind: ParamKind,
}

pub fn definitions() -> &'static [ParamDef] {
    &[
        ParamDef {
            id: PARAM_MASTER_VOLUME,
            name: "Master Volume",
            kind: ParamKind::Continuous {
                min: 0.0,
                max: 2.0,
                default: 1.0,
            },
        },
        ParamDef {
            id: PARAM_MASTER_MUTE,
            name: "Master Mute",
            kind: ParamKind::Stepped { default: false },
        },
        ParamDef {
            id: PARAM_METRONOME_VOLUME,
            name: "Metronome Volume",
            kind: ParamKind::Continuous {
                min: 0.0,
                max: 2.0,
                default: 0.5,
            },
        },
        ParamDef {
            id: PARAM_METRONOME_MUTE,
            name: "Metronome Mute",
            kind: ParamKind::Stepped { default: false },
        },
    ]
}

/// Display mapping for the volume parameters.
pub fn volume_db(value: f32) -> f32 {
    if value <= 0.0 {
        f32::NEG_INFINITY
    } else {
        20.0 * value.log10()
    }
}

/// One timestamped parameter change from the host event stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamEvent {
    pub frame: u32,
    pub id: u32,
    pub value: f32,
}

/// UI-visible parameter values, word-sized and lock-free.
#[derive(Debug)]
pub struct ParamStore {
    master_volume: AtomicU32,
    master_mute: AtomicBool,
    metronome_volume: AtomicU32,
    metronome_mute: AtomicBool,
}

impl Default for ParamStore {
    fn default() -> Self {
        Self {
            master_volume: AtomicU32::new(1.0f32.to_bits()),
            master_mute: AtomicBool::new(false),
            metronome_volume: AtomicU32::new(0.5f32.to_bits()),
            metronome_mute: AtomicBool::new(false),
        }
    }
}

impl ParamStore {
    pub fn set(&self, id: u32, value: f32) {
        match id {
            PARAM_MASTER_VOLUME => self
                .master_volume
                .store(value.clamp(0.0, 2.0).to_bits(), Ordering::Relaxed),
            PARAM_MASTER_MUTE => self.master_mute.store(value >= 0.5, Ordering::Relaxed),
            PARAM_METRONOME_VOLUME => self
                .metronome_volume
                .store(value.clamp(0.0, 2.0).to_bits(), Ordering::Relaxed),
            PARAM_METRONOME_MUTE => self.metronome_mute.store(value >= 0.5, Ordering::Relaxed),
            _ => {}
        }
    }

    pub fn get(&self, id: u32) -> Option<f32> {
        match id {
            PARAM_MASTER_VOLUME => Some(f32::from_bits(self.master_volume.load(Ordering::Relaxed))),
            PARAM_MASTER_MUTE => Some(f32::from(self.master_mute.load(Ordering::Relaxed))),
            PARAM_METRONOME_VOLUME => Some(f32::from_bits(
                self.metronome_volume.load(Ordering::Relaxed),
            )),
            PARAM_METRONOME_MUTE => Some(f32::from(self.metronome_mute.load(Ordering::Relaxed))),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_mapping_has_the_usual_anchors() {
        assert_eq!(volume_db(0.0), f32::NEG_INFINITY);
        assert!((volume_db(1.0) - 0.0).abs() < 1e-6);
        assert!((volume_db(2.0) - 6.0206).abs() < 1e-3);
        assert!((volume_db(0.5) + 6.0206).abs() < 1e-3);
    }

    #[test]
    fn store_round_trips_and_clamps() {
        let store = ParamStore::default();
        store.set(PARAM_MASTER_VOLUME, 3.0);
        assert_eq!(store.get(PARAM_MASTER_VOLUME), Some(2.0));
        store.set(PARAM_MASTER_MUTE, 1.0);
        assert_eq!(store.get(PARAM_MASTER_MUTE), Some(1.0));
        store.set(PARAM_MASTER_MUTE, 0.0);
        assert_eq!(store.get(PARAM_MASTER_MUTE), Some(0.0));
        assert_eq!(store.get(99), None);
    }
}
