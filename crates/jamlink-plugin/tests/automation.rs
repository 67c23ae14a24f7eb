//! Parameter automation lands mid-block: a master-volume event at frame 128
//! must scale the mixed output from that frame on, and be visible to the UI
//! afterwards.

use std::time::{Duration, Instant};

use jamlink_engine::testing::{LoopServer, ServerScript};
use jamlink_engine::HostTransport;
use jamlink_plugin::params::{PARAM_MASTER_VOLUME, PARAM_METRONOME_MUTE};
use jamlink_plugin::{JamLinkPlugin, ParamEvent, ProcessBlock, ProcessStatus};
use jamlink_rt::ConnectionStatus;

const BLOCK: usize = 480;

#[test]
fn master_volume_event_splits_the_block() {
    let server = LoopServer::start(ServerScript {
        bpm: 600,
        bpi: 2,
        ..ServerScript::default()
    });

    let mut plugin = JamLinkPlugin::new();
    plugin.activate(48_000, BLOCK);
    plugin.set_param(PARAM_METRONOME_MUTE, 1.0);
    plugin
        .connect(&server.host(), "autom", "pw")
        .expect("connect while active");

    let deadline = Instant::now() + Duration::from_secs(3);
    while plugin.status() != ConnectionStatus::Joined || plugin.snapshot().tempo().1 == 0 {
        assert!(Instant::now() < deadline, "never joined");
        std::thread::sleep(Duration::from_millis(2));
    }

    let in_l = vec![0.5f32; BLOCK];
    let in_r = vec![0.5f32; BLOCK];
    let mut out_l = vec![0.0f32; BLOCK];
    let mut out_r = vec![0.0f32; BLOCK];
    let events = [ParamEvent {
        frame: 128,
        id: PARAM_MASTER_VOLUME,
        value: 0.5,
    }];

    let status = plugin.process(ProcessBlock {
        inputs: [Some(&in_l), Some(&in_r)],
        outputs: [Some(&mut out_l), Some(&mut out_r)],
        frames: BLOCK,
        transport: HostTransport::default(),
        events: &events,
    });
    assert_eq!(status, ProcessStatus::Continue);

    // Local monitor at unity, centered: equal-power center gain.
    let center = core::f32::consts::FRAC_1_SQRT_2;
    let before = 0.5 * center;
    let after = before * 0.5;
    for (i, &sample) in out_l.iter().enumerate() {
        let expected = if i < 128 { before } else { after };
        assert!(
            (sample - expected).abs() < 1e-4,
            "frame {i}: {sample} vs {expected}"
        );
    }

    // The UI sees the new value immediately after the block.
    assert_eq!(plugin.param(PARAM_MASTER_VOLUME), Some(0.5));

    // The scaling persists into the next block.
    let status = plugin.process(ProcessBlock {
        inputs: [Some(&in_l), Some(&in_r)],
        outputs: [Some(&mut out_l), Some(&mut out_r)],
        frames: BLOCK,
        transport: HostTransport::default(),
        events: &[],
    });
    assert_eq!(status, ProcessStatus::Continue);
    assert!(out_l.iter().all(|s| (s - after).abs() < 1e-4));
}
