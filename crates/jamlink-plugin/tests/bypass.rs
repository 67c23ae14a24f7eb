//! Host-contract behavior of the process call while no session is joined:
//! bitwise pass-through, zero-frame no-op, null buffers, oversize blocks.

use jamlink_engine::HostTransport;
use jamlink_plugin::{JamLinkPlugin, ParamEvent, ProcessBlock, ProcessStatus};

const SENTINEL: f32 = 7.5;

fn block<'a>(
    in_l: &'a [f32],
    in_r: &'a [f32],
    out_l: &'a mut [f32],
    out_r: &'a mut [f32],
    frames: usize,
    events: &'a [ParamEvent],
) -> ProcessBlock<'a> {
    ProcessBlock {
        inputs: [Some(in_l), Some(in_r)],
        outputs: [Some(out_l), Some(out_r)],
        frames,
        transport: HostTransport::default(),
        events,
    }
}

#[test]
fn disconnected_process_is_bitwise_passthrough() {
    let mut plugin = JamLinkPlugin::new();
    plugin.activate(48_000, 512);

    let in_l: Vec<f32> = (0..512)
        .map(|i| match i % 3 {
            0 => 1.0,
            1 => -1.0,
            _ => 0.5,
        })
        .collect();
    let in_r: Vec<f32> = in_l.iter().map(|s| -s).collect();
    let mut out_l = vec![SENTINEL; 512];
    let mut out_r = vec![SENTINEL; 512];

    let status = plugin.process(block(&in_l, &in_r, &mut out_l, &mut out_r, 512, &[]));
    assert_eq!(status, ProcessStatus::Continue);
    for i in 0..512 {
        assert_eq!(out_l[i].to_bits(), in_l[i].to_bits());
        assert_eq!(out_r[i].to_bits(), in_r[i].to_bits());
    }
}

#[test]
fn zero_frames_returns_continue_and_mutates_nothing() {
    let mut plugin = JamLinkPlugin::new();
    plugin.activate(48_000, 512);

    let in_l = vec![1.0f32; 512];
    let in_r = vec![1.0f32; 512];
    let mut out_l = vec![SENTINEL; 512];
    let mut out_r = vec![SENTINEL; 512];

    let status = plugin.process(block(&in_l, &in_r, &mut out_l, &mut out_r, 0, &[]));
    assert_eq!(status, ProcessStatus::Continue);
    assert!(out_l.iter().chain(&out_r).all(|&s| s == SENTINEL));
}

#[test]
fn missing_buffer_is_an_error_and_touches_nothing() {
    let mut plugin = JamLinkPlugin::new();
    plugin.activate(48_000, 512);

    let in_l = vec![1.0f32; 512];
    let mut out_l = vec![SENTINEL; 512];
    let mut out_r = vec![SENTINEL; 512];

    let status = plugin.process(ProcessBlock {
        inputs: [Some(in_l.as_slice()), None],
        outputs: [Some(out_l.as_mut_slice()), Some(out_r.as_mut_slice())],
        frames: 512,
        transport: HostTransport::default(),
        events: &[],
    });
    assert_eq!(status, ProcessStatus::Error);
    assert!(out_l.iter().chain(&out_r).all(|&s| s == SENTINEL));
}

#[test]
fn oversize_block_truncates_to_the_activated_maximum() {
    let mut plugin = JamLinkPlugin::new();
    plugin.activate(48_000, 256);

    let in_l = vec![0.25f32; 1024];
    let in_r = vec![0.25f32; 1024];
    let mut out_l = vec![SENTINEL; 1024];
    let mut out_r = vec![SENTINEL; 1024];

    let status = plugin.process(block(&in_l, &in_r, &mut out_l, &mut out_r, 1024, &[]));
    assert_eq!(status, ProcessStatus::Continue);
    assert!(out_l[..256].iter().all(|&s| s == 0.25));
    assert!(out_l[256..].iter().all(|&s| s == SENTINEL));
}

#[test]
fn inactive_plugin_reports_the_error_status() {
    let mut plugin = JamLinkPlugin::new();
    let in_l = vec![0.0f32; 64];
    let in_r = vec![0.0f32; 64];
    let mut out_l = vec![0.0f32; 64];
    let mut out_r = vec![0.0f32; 64];
    let status = plugin.process(block(&in_l, &in_r, &mut out_l, &mut out_r, 64, &[]));
    assert_eq!(status, ProcessStatus::Error);
}

#[test]
fn param_events_apply_even_while_bypassed() {
    let mut plugin = JamLinkPlugin::new();
    plugin.activate(48_000, 512);

    let in_l = vec![0.0f32; 512];
    let in_r = vec![0.0f32; 512];
    let mut out_l = vec![0.0f32; 512];
    let mut out_r = vec![0.0f32; 512];
    let events = [ParamEvent {
        frame: 100,
        id: jamlink_plugin::params::PARAM_MASTER_VOLUME,
        value: 0.25,
    }];

    plugin.process(block(&in_l, &in_r, &mut out_l, &mut out_r, 512, &events));
    assert_eq!(
        plugin.param(jamlink_plugin::params::PARAM_MASTER_VOLUME),
        Some(0.25)
    );
}
