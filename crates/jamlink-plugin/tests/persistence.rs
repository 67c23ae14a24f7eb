//! Persisted settings: save ∘ load is the identity for every serializable
//! field, the document shape matches what older builds wrote, and the
//! password never exists to be persisted.

use jamlink_plugin::params::{PARAM_MASTER_VOLUME, PARAM_METRONOME_MUTE};
use jamlink_plugin::{JamLinkPlugin, Settings};

#[test]
fn save_then_load_is_identity() {
    let mut plugin = JamLinkPlugin::new();
    plugin.set_param(PARAM_MASTER_VOLUME, 1.5);
    plugin.set_param(PARAM_METRONOME_MUTE, 1.0);
    plugin.set_local_channel("gtr", true, 96).unwrap();

    let json = plugin.state_json().unwrap();

    let mut restored = JamLinkPlugin::new();
    restored.restore_state(&json).unwrap();
    assert_eq!(restored.param(PARAM_MASTER_VOLUME), Some(1.5));
    assert_eq!(restored.param(PARAM_METRONOME_MUTE), Some(1.0));
    assert_eq!(restored.state_json().unwrap(), json);
}

#[test]
fn document_shape_matches_the_published_format() {
    let mut plugin = JamLinkPlugin::new();
    plugin.set_local_channel("gtr", true, 64).unwrap();
    let json = String::from_utf8(plugin.state_json().unwrap()).unwrap();

    for key in [
        "\"version\"",
        "\"server\"",
        "\"username\"",
        "\"master\"",
        "\"metronome\"",
        "\"localChannel\"",
        "\"volume\"",
        "\"mute\"",
        "\"transmit\"",
        "\"bitrate\"",
    ] {
        assert!(json.contains(key), "missing {key} in {json}");
    }
    assert!(!json.to_lowercase().contains("password"));
}

#[test]
fn settings_survive_a_disk_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("jamlink.json");

    let mut plugin = JamLinkPlugin::new();
    plugin.set_param(PARAM_MASTER_VOLUME, 0.75);
    plugin.set_local_channel("keys", false, 128).unwrap();
    plugin.save_state_to(&path).unwrap();

    let mut restored = JamLinkPlugin::new();
    restored.load_state_from(&path).unwrap();
    assert_eq!(restored.param(PARAM_MASTER_VOLUME), Some(0.75));
    assert_eq!(restored.state_json().unwrap(), plugin.state_json().unwrap());
}

#[test]
fn foreign_and_future_fields_do_not_break_loading() {
    let json = br#"{
        "version": 7,
        "server": "jam.example.org",
        "username": "alice",
        "theme": "dark",
        "master": { "volume": 0.9, "mute": true, "fadeMs": 20 }
    }"#;
    let settings = Settings::from_json(json).unwrap();
    assert_eq!(settings.server, "jam.example.org");
    assert_eq!(settings.master.volume, 0.9);
    assert!(settings.master.mute);
    // Sections the document omits come back as defaults.
    assert_eq!(settings.metronome.volume, 0.5);
}
