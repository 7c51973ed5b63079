use std::sync::{Arc, Barrier};

use crate::core::display::{CallbackId, DisplayConnection, ShellKind};
use crate::core::frame::{FrameSlot, FrameState};
use crate::core::hardware::{VideoPool, VideoSurface};
use crate::tests::mock::{Call, MockDisplay};
use crate::util::geometry::Size;

fn leased_frame(slot: &Arc<FrameSlot>, pool: &Arc<VideoPool>) -> Arc<FrameState> {
    let frame = FrameState::new(slot);
    frame.install();
    let lease = pool
        .acquire(|size| Some(VideoSurface::new(7, size.width, size.height)))
        .unwrap();
    frame.attach_source(lease);
    frame.set_completion(CallbackId(99));
    frame
}

fn destroyed(display: &MockDisplay, call: Call) -> usize {
    display.count(|c| *c == call)
}

#[test]
fn test_done_then_release_frees_once() {
    let display = MockDisplay::new(ShellKind::Modern);
    let slot = Arc::new(FrameSlot::new());
    let pool = VideoPool::new(Size::new(64, 64));
    let frame = leased_frame(&slot, &pool);
    let buffer = display.create_buffer();

    frame.handle_done();
    assert_eq!(slot.pending(), 0);
    assert!(!frame.is_released());
    assert_eq!(pool.outstanding(), 1);

    frame.handle_release(&*display, buffer);
    assert_eq!(slot.pending(), 0);
    assert!(frame.is_released());
    assert_eq!(pool.outstanding(), 0);
    assert_eq!(pool.available(), 1);
    assert_eq!(destroyed(&display, Call::DestroyBuffer(buffer)), 1);
    assert_eq!(destroyed(&display, Call::DestroyCallback(CallbackId(99))), 1);
}

#[test]
fn test_release_then_done_frees_once() {
    let display = MockDisplay::new(ShellKind::Modern);
    let slot = Arc::new(FrameSlot::new());
    let pool = VideoPool::new(Size::new(64, 64));
    let frame = leased_frame(&slot, &pool);
    let buffer = display.create_buffer();

    frame.handle_release(&*display, buffer);
    assert_eq!(slot.pending(), 0);
    assert!(frame.is_released());
    assert_eq!(pool.available(), 1);

    // A late frame callback finds nothing to retire.
    frame.handle_done();
    assert_eq!(slot.pending(), 0);
    assert_eq!(pool.available(), 1);
    assert_eq!(destroyed(&display, Call::DestroyCallback(CallbackId(99))), 1);
}

#[test]
fn test_release_without_done_retires() {
    let display = MockDisplay::new(ShellKind::Modern);
    let slot = Arc::new(FrameSlot::new());
    let frame = FrameState::new(&slot);
    frame.install();
    let buffer = display.create_buffer();

    frame.handle_release(&*display, buffer);
    assert_eq!(slot.pending(), 0);
    assert_eq!(slot.last_frame(), None);
    assert_eq!(display.live_buffers(), 0);
}

#[test]
fn test_release_is_idempotent() {
    let display = MockDisplay::new(ShellKind::Modern);
    let slot = Arc::new(FrameSlot::new());
    let pool = VideoPool::new(Size::new(64, 64));
    let frame = leased_frame(&slot, &pool);

    frame.release(&*display);
    frame.release(&*display);
    assert_eq!(pool.available(), 1);
    assert_eq!(pool.outstanding(), 0);
    assert_eq!(destroyed(&display, Call::DestroyCallback(CallbackId(99))), 1);
}

#[test]
fn test_simultaneous_done_and_release() {
    let display = MockDisplay::new(ShellKind::Modern);
    let connection: Arc<dyn DisplayConnection> = display.clone();
    let pool = VideoPool::new(Size::new(64, 64));

    for _ in 0..200 {
        let slot = Arc::new(FrameSlot::new());
        let frame = leased_frame(&slot, &pool);
        let buffer = display.create_buffer();
        let barrier = Arc::new(Barrier::new(2));

        std::thread::scope(|scope| {
            scope.spawn(|| {
                barrier.wait();
                frame.handle_done();
            });
            scope.spawn(|| {
                barrier.wait();
                frame.handle_release(&*connection, buffer);
            });
        });

        assert_eq!(slot.pending(), 0);
        assert!(frame.is_released());
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(destroyed(&display, Call::DestroyBuffer(buffer)), 1);
    }
    assert_eq!(destroyed(&display, Call::DestroyCallback(CallbackId(99))), 200);
    assert_eq!(pool.available(), 1);
}
