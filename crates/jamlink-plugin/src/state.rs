//! Persisted plugin settings.
//!
//! A small versioned JSON document. Loading tolerates unknown fields and
//! older versions; the password is deliberately not part of this model and
//! never reaches disk.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

pub const SETTINGS_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub version: u32,
    pub server: String,
    pub username: String,
    pub master: GainSettings,
    pub metronome: GainSettings,
    #[serde(rename = "localChannel")]
    pub local_channel: ChannelSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION,
            server: String::new(),
            username: String::new(),
            master: GainSettings {
                volume: 1.0,
                mute: false,
            },
            metronome: GainSettings {
                volume: 0.5,
                mute: false,
            },
            local_channel: ChannelSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GainSettings {
    pub volume: f32,
    pub mute: bool,
}

impl Default for GainSettings {
    fn default() -> Self {
        Self {
            volume: 1.0,
            mute: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelSettings {
    pub name: String,
    pub transmit: bool,
    pub bitrate: u32,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            name: "channel0".into(),
            transmit: true,
            bitrate: 64,
        }
    }
}

impl Settings {
    pub fn to_json(&self) -> anyhow::Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn from_json(bytes: &[u8]) -> anyhow::Result<Self> {
        let mut settings: Settings = serde_json::from_slice(bytes)?;
        settings.upgrade();
        Ok(settings)
    }

    pub fn save_to_path(&self, path: &Path) -> anyhow::Result<()> {
        let json = self.to_json()?;
        let mut file = File::create(path)
            .with_context(|| format!("unable to create settings at {path:?}"))?;
        file.write_all(&json)?;
        Ok(())
    }

    pub fn load_from_path(path: &Path) -> anyhow::Result<Self> {
        let mut file =
            File::open(path).with_context(|| format!("unable to open settings at {path:?}"))?;
        let mut json = Vec::new();
        file.read_to_end(&mut json)?;
        Self::from_json(&json)
    }

    /// Migrates older documents in place.
    pub fn upgrade(&mut self) {
        if self.version < SETTINGS_VERSION {
            self.version = SETTINGS_VERSION;
        }
    }
}
