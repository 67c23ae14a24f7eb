//! The audio entry must never touch the allocator. A guarded global
//! allocator panics on any alloc while the flag is raised; the mix path
//! runs a joined-session workload underneath it.

use std::alloc::{GlobalAlloc, Layout, System};
use std::cell::Cell;
use std::sync::Arc;

use jamlink_engine::{CodecKind, HostTransport, SessionConfig};
use jamlink_rt::{EventQueue, UiSnapshot};

thread_local! {
    static RT_ACTIVE: Cell<bool> = const { Cell::new(false) };
}

struct GuardedAllocator;

unsafe impl GlobalAlloc for GuardedAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if RT_ACTIVE.with(Cell::get) {
            panic!("heap allocation during audio processing");
        }
        System.alloc(layout)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        System.dealloc(ptr, layout)
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if RT_ACTIVE.with(Cell::get) {
            panic!("heap reallocation during audio processing");
        }
        System.realloc(ptr, layout, new_size)
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        if RT_ACTIVE.with(Cell::get) {
            panic!("heap allocation during audio processing");
        }
        System.alloc_zeroed(layout)
    }
}

#[global_allocator]
static GLOBAL: GuardedAllocator = GuardedAllocator;

struct RtGuard;

impl RtGuard {
    fn enter() -> Self {
        RT_ACTIVE.with(|f| f.set(true));
        RtGuard
    }
}

impl Drop for RtGuard {
    fn drop(&mut self) {
        RT_ACTIVE.with(|f| f.set(false));
    }
}

#[test]
fn mix_path_does_not_allocate() {
    let frames = 128usize;
    let (mut engine, mut audio) = jamlink_engine::create(
        SessionConfig {
            sample_rate: 48_000,
            max_block_frames: frames,
        },
        CodecKind::RawPcm,
        Arc::new(EventQueue::with_capacity(64)),
        Arc::new(UiSnapshot::default()),
    );

    // A running session in miniature: interval clock live, one peer slot
    // playing a decoded interval, local monitoring and transmit on.
    let shared = engine.shared();
    shared.clock.reset(48_000, 4);
    let interval: Vec<f32> = (0..48_000 * 2).map(|n| (n as f32 * 0.001).sin()).collect();
    engine.inject_slot_interval(0, shared.clock.serial(), interval);

    let in_l: Vec<f32> = (0..frames).map(|f| (f as f32 * 0.02).sin()).collect();
    let in_r = in_l.clone();
    let mut out_l = vec![0.0f32; frames];
    let mut out_r = vec![0.0f32; frames];
    let transport = HostTransport::default();

    // Warm-up block outside the guard settles lazy thread-local state.
    audio.process([&in_l, &in_r], [&mut out_l, &mut out_r], frames, &transport);

    {
        let _guard = RtGuard::enter();
        for _ in 0..256 {
            audio.process([&in_l, &in_r], [&mut out_l, &mut out_r], frames, &transport);
        }
    }

    // The workload actually mixed something.
    assert!(out_l.iter().any(|s| *s != 0.0));
}
