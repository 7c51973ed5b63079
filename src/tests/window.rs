use std::sync::{Arc, Barrier, Mutex};
use std::time::{Duration, Instant};

use crate::config::WindowConfig;
use crate::core::display::{DisplayConnection, ShellKind, ToplevelEvent, ToplevelState};
use crate::core::errors::{DisplayError, ExportError, PresentError, SyncError};
use crate::core::hardware::{HardwareBackend, RenderFlags, VideoSurface};
use crate::core::window::{EventSink, FrameOutcome, PresentationWindow, WindowEvent};
use crate::tests::mock::{Call, Completion, MockDisplay, MockHardware};
use crate::util::geometry::{Rect, Size};

const FULL: Rect = Rect::new(0, 0, 640, 480);
const SURFACE: VideoSurface = VideoSurface::new(1, 640, 480);

struct Harness {
    display: Arc<MockDisplay>,
    hardware: Arc<MockHardware>,
    events: Arc<Mutex<Vec<WindowEvent>>>,
    window: PresentationWindow,
}

fn create(shell: ShellKind, config: WindowConfig) -> Harness {
    let display = MockDisplay::new(shell);
    let hardware = MockHardware::new(&display);
    let events = Arc::new(Mutex::new(Vec::<WindowEvent>::new()));
    let sink: EventSink = {
        let events = events.clone();
        Arc::new(move |event: WindowEvent| events.lock().unwrap().push(event))
    };
    let backend: Arc<dyn HardwareBackend> = hardware.clone();
    let window =
        PresentationWindow::create(display.handle(), backend, config, Some(sink)).unwrap();
    Harness {
        display,
        hardware,
        events,
        window,
    }
}

fn harness() -> Harness {
    create(ShellKind::Modern, WindowConfig::default())
}

fn position(calls: &[Call], pred: impl Fn(&Call) -> bool) -> usize {
    calls.iter().position(pred).unwrap()
}

impl Harness {
    fn render(&self, src: Rect, dst: Rect) -> Result<FrameOutcome, PresentError> {
        self.window.render(&SURFACE, &src, &dst, RenderFlags::FRAME)
    }

    fn dispatch(&self) {
        self.display.roundtrip(self.window.channel()).unwrap();
    }
}

// ============================================================================
// Rendering
// ============================================================================

#[test]
fn test_direct_export_at_window_size() {
    let h = harness();
    h.display.set_completion(Some(Completion::DoneThenRelease));

    assert_eq!(h.render(FULL, FULL), Ok(FrameOutcome::Presented));
    assert!(!h.window.needs_conversion());
    assert_eq!(h.hardware.exports(), vec![(1, RenderFlags::FRAME)]);
    assert!(h.hardware.converts().is_empty());

    let surface = h.window.surface_id();
    let calls = h.display.calls();
    assert_eq!(calls.iter().filter(|c| matches!(c, Call::Attach(_, Some(_)))).count(), 1);
    assert!(calls.contains(&Call::Damage(surface, FULL)));
    assert_eq!(h.window.pending_frames(), 1);
}

#[test]
fn test_next_render_waits_for_previous_frame() {
    let h = harness();
    h.display.set_completion(Some(Completion::DoneThenRelease));

    h.render(FULL, FULL).unwrap();
    let first = h.display.last_attached().unwrap();
    h.render(FULL, FULL).unwrap();
    let second = h.display.last_attached().unwrap();

    assert_ne!(first, second);
    let calls = h.display.calls();
    let released = position(&calls, |c| *c == Call::DestroyBuffer(first));
    let attached = position(&calls, |c| *c == Call::Attach(h.window.surface_id(), Some(second)));
    assert!(released < attached);
    assert_eq!(h.window.pending_frames(), 1);
}

#[test]
fn test_pending_frames_stays_at_most_one() {
    let h = harness();
    for (index, completion) in [Completion::DoneThenRelease, Completion::ReleaseThenDone]
        .into_iter()
        .cycle()
        .take(12)
        .enumerate()
    {
        h.display.set_completion(Some(completion));
        assert!(h.window.pending_frames() <= 1, "before render {}", index);
        assert_eq!(h.render(FULL, FULL), Ok(FrameOutcome::Presented));
        assert!(h.window.pending_frames() <= 1, "after render {}", index);
    }
    // Only the last frame's buffer is still held.
    assert_eq!(h.display.live_buffers(), 1);
}

#[test]
fn test_buffer_release_stays_on_its_window_channel() {
    let display = MockDisplay::new(ShellKind::Modern);
    let hardware = MockHardware::new(&display);
    let handle = display.handle();
    let open = || {
        let backend: Arc<dyn HardwareBackend> = hardware.clone();
        PresentationWindow::create(handle.clone(), backend, WindowConfig::default(), None).unwrap()
    };
    let first = open();
    let second = open();

    assert_eq!(first.render(&SURFACE, &FULL, &FULL, RenderFlags::FRAME), Ok(FrameOutcome::Presented));
    let buffer = *hardware.exported().last().unwrap();
    assert_eq!(display.buffer_channel(buffer), Some(first.channel()));

    // The compositor skips the frame callback and only releases the buffer.
    display.send_release(buffer);
    display.roundtrip(second.channel()).unwrap();
    assert_eq!(first.pending_frames(), 1);
    assert_eq!(display.live_buffers(), 1);

    display.roundtrip(first.channel()).unwrap();
    assert_eq!(first.pending_frames(), 0);
    assert_eq!(display.live_buffers(), 0);

    assert_eq!(second.render(&SURFACE, &FULL, &FULL, RenderFlags::FRAME), Ok(FrameOutcome::Presented));
    let buffer = *hardware.exported().last().unwrap();
    assert_eq!(display.buffer_channel(buffer), Some(second.channel()));
    assert!(display
        .set_buffer_listener(buffer, first.channel(), Box::new(|_| {}))
        .is_err());
}

#[test]
fn test_smaller_destination_latches_conversion() {
    let h = harness();
    h.display.set_completion(Some(Completion::DoneThenRelease));
    h.window.resize(320, 240).unwrap();

    let small = Rect::new(0, 0, 320, 240);
    assert_eq!(h.render(FULL, small), Ok(FrameOutcome::Presented));
    assert!(h.window.needs_conversion());
    assert_eq!(h.hardware.converts().len(), 1);

    // Matching rectangles again: the latch holds.
    assert_eq!(h.render(FULL, FULL), Ok(FrameOutcome::Presented));
    assert!(h.window.needs_conversion());
    assert_eq!(h.hardware.converts().len(), 2);
    assert!(h.hardware.exports().iter().all(|(id, _)| *id != SURFACE.id));
}

#[test]
fn test_converted_surface_returns_to_pool_once() {
    let h = harness();
    h.display.set_completion(Some(Completion::ReleaseThenDone));
    let cropped = Rect::new(0, 16, 640, 448);

    h.render(cropped, FULL).unwrap();
    h.render(cropped, FULL).unwrap();
    let pool = h.hardware.pool().unwrap();
    assert_eq!(pool.size(), Size::new(640, 480));
    // The first frame was retired by the second render's wait.
    assert_eq!(pool.outstanding(), 1);

    drop(h.window);
    assert_eq!(pool.outstanding(), 0);
    assert_eq!(pool.available(), 2);
}

#[test]
fn test_soft_export_failure_falls_back_to_conversion() {
    for status in [
        ExportError::FlagNotSupported,
        ExportError::Unimplemented,
        ExportError::InvalidImageFormat,
    ] {
        let h = harness();
        h.hardware.fail_next_export(status);

        assert_eq!(h.render(FULL, FULL), Ok(FrameOutcome::Presented));
        assert!(h.window.needs_conversion());
        let exports = h.hardware.exports();
        assert_eq!(exports.len(), 2);
        assert_eq!(exports[0].0, SURFACE.id);
        assert_ne!(exports[1].0, SURFACE.id);
    }
}

#[test]
fn test_hard_export_failure_is_surfaced() {
    let h = harness();
    h.hardware.fail_next_export(ExportError::failed("device lost"));

    let err = h.render(FULL, FULL).unwrap_err();
    assert!(matches!(err, PresentError::Export(ExportError::Failed(_))));
    assert!(!h.window.needs_conversion());
    assert_eq!(h.display.last_attached(), None);
    assert_eq!(h.window.pending_frames(), 0);
}

#[test]
fn test_failed_conversion_shows_native_size() {
    let h = harness();
    h.hardware.set_convert_fails(true);
    h.window.resize(320, 240).unwrap();

    let small = Rect::new(0, 0, 320, 240);
    assert_eq!(h.render(FULL, small), Ok(FrameOutcome::Presented));
    assert_eq!(h.hardware.exports(), vec![(SURFACE.id, RenderFlags::FRAME)]);
    assert!(h.display.calls().contains(&Call::Damage(h.window.surface_id(), FULL)));
    assert!(h.window.needs_conversion());
}

#[test]
fn test_missing_converter_exports_native() {
    let h = harness();
    h.hardware.set_converter(false);

    let offset = Rect::new(8, 8, 632, 472);
    assert_eq!(h.render(offset, FULL), Ok(FrameOutcome::Presented));
    assert!(h.hardware.converts().is_empty());
    assert_eq!(h.hardware.exports(), vec![(SURFACE.id, RenderFlags::FRAME)]);
    assert!(h.window.needs_conversion());
}

#[test]
fn test_field_flags_reach_export() {
    let h = harness();
    let flags = RenderFlags::TOP_FIELD | RenderFlags::COLOR_BT709;
    h.window.render(&SURFACE, &FULL, &FULL, flags).unwrap();
    assert_eq!(h.hardware.exports(), vec![(SURFACE.id, RenderFlags::TOP_FIELD)]);
}

// ============================================================================
// Opaque Region
// ============================================================================

#[test]
fn test_resize_twice_replaces_region() {
    let h = harness();
    h.display.clear_calls();

    h.window.resize(800, 600).unwrap();
    h.window.resize(800, 600).unwrap();

    let calls = h.display.calls();
    let regions: Vec<_> = calls
        .iter()
        .filter_map(|c| match c {
            Call::CreateRegion(region) => Some(*region),
            _ => None,
        })
        .collect();
    assert_eq!(regions.len(), 2);
    let destroyed_first = position(&calls, |c| *c == Call::DestroyRegion(regions[0]));
    let created_second = position(&calls, |c| *c == Call::CreateRegion(regions[1]));
    assert!(destroyed_first < created_second);
    assert!(calls.contains(&Call::RegionAdd(regions[1], Rect::new(0, 0, 800, 600))));
    assert_eq!(h.display.live_regions(), 1);
}

#[test]
fn test_render_applies_and_clears_region() {
    let h = harness();
    h.window.resize(640, 480).unwrap();
    h.display.clear_calls();

    h.render(FULL, FULL).unwrap();
    let calls = h.display.calls();
    let surface = h.window.surface_id();
    let applied = position(&calls, |c| matches!(c, Call::SetOpaqueRegion(s, Some(_)) if *s == surface));
    let commit = position(&calls, |c| *c == Call::Commit(surface));
    assert!(applied < commit);
    assert_eq!(h.display.live_regions(), 0);

    // Nothing pending: the next frame leaves the hint alone.
    h.display.fire_frame_done(h.display.last_callback().unwrap());
    h.display.clear_calls();
    h.render(FULL, FULL).unwrap();
    assert_eq!(h.display.count(|c| matches!(c, Call::SetOpaqueRegion(..))), 0);
}

// ============================================================================
// Synchronization
// ============================================================================

#[test]
fn test_unblock_releases_blocked_render() {
    let h = harness();
    h.render(FULL, FULL).unwrap();
    assert_eq!(h.window.pending_frames(), 1);
    let live = h.display.live_buffers();

    let start = Instant::now();
    std::thread::scope(|scope| {
        let blocked = scope.spawn(|| h.render(FULL, FULL));
        std::thread::sleep(Duration::from_millis(50));
        h.window.unblock();
        assert_eq!(blocked.join().unwrap(), Ok(FrameOutcome::Dropped));
    });
    assert!(start.elapsed() < Duration::from_secs(2));
    assert!(!h.window.sync_failed());
    // The dropped frame's buffer was destroyed.
    assert_eq!(h.display.live_buffers(), live);

    h.window.unblock_cancel();
    h.display.send_frame_done(h.display.last_callback().unwrap());
    assert_eq!(h.render(FULL, FULL), Ok(FrameOutcome::Presented));
}

#[test]
fn test_backpressure_drops_frame() {
    let h = harness();
    h.render(FULL, FULL).unwrap();

    h.window.resize(320, 240).unwrap();
    h.display.fail_next_flush(DisplayError::WouldBlock);
    let small = Rect::new(0, 0, 320, 240);
    assert_eq!(h.render(FULL, small), Ok(FrameOutcome::Dropped));
    assert!(!h.window.sync_failed());

    // The converted surface of the dropped frame went back to its pool.
    let pool = h.hardware.pool().unwrap();
    assert_eq!(pool.outstanding(), 0);
    assert_eq!(pool.available(), 1);
}

#[test]
fn test_sync_failure_is_sticky() {
    let h = harness();
    h.render(FULL, FULL).unwrap();

    h.display.fail_next_flush(DisplayError::protocol("invalid object"));
    let err = h.render(FULL, FULL).unwrap_err();
    assert_eq!(err, PresentError::Sync(SyncError::Failed));
    assert!(h.window.sync_failed());

    h.display.clear_calls();
    let exports = h.hardware.exports().len();
    h.display.send_frame_done(h.display.last_callback().unwrap());
    for _ in 0..3 {
        assert_eq!(h.render(FULL, FULL), Err(PresentError::Sync(SyncError::Failed)));
    }
    assert!(h.display.calls().is_empty());
    assert_eq!(h.hardware.exports().len(), exports);
}

#[test]
fn test_simultaneous_completion_race() {
    let h = harness();
    for _ in 0..50 {
        assert_eq!(h.render(FULL, FULL), Ok(FrameOutcome::Presented));
        let callback = h.display.last_callback().unwrap();
        let buffer = h.display.last_attached().unwrap();
        let barrier = Barrier::new(2);

        std::thread::scope(|scope| {
            scope.spawn(|| {
                barrier.wait();
                h.display.fire_frame_done(callback);
            });
            scope.spawn(|| {
                barrier.wait();
                h.display.fire_release(buffer);
            });
        });

        assert_eq!(h.window.pending_frames(), 0);
        assert_eq!(h.display.count(|c| *c == Call::DestroyBuffer(buffer)), 1);
        assert_eq!(h.display.count(|c| *c == Call::DestroyCallback(callback)), 1);
    }
    assert_eq!(h.display.live_buffers(), 0);
}

// ============================================================================
// Shell
// ============================================================================

#[test]
fn test_modern_show_hide() {
    let h = create(
        ShellKind::Modern,
        WindowConfig::default().with_title("preview").with_app_id("org.example.player"),
    );
    assert!(!h.window.is_shown());
    assert_eq!(h.display.count(|c| matches!(c, Call::GetShellSurface(_))), 1);

    h.window.show().unwrap();
    assert!(h.window.is_shown());
    let calls = h.display.calls();
    let promote = position(&calls, |c| matches!(c, Call::Promote(_)));
    let title = position(&calls, |c| *c == Call::SetTitle("preview".into()));
    let commit = position(&calls, |c| *c == Call::Commit(h.window.surface_id()));
    assert!(promote < title && title < commit);
    assert!(calls.contains(&Call::SetAppId("org.example.player".into())));

    h.window.show().unwrap();
    assert_eq!(h.display.count(|c| matches!(c, Call::Promote(_))), 1);

    h.window.hide().unwrap();
    assert!(!h.window.is_shown());
    assert_eq!(h.display.count(|c| matches!(c, Call::DestroyToplevel(_))), 1);

    h.window.show().unwrap();
    assert_eq!(h.display.count(|c| matches!(c, Call::Promote(_))), 2);
}

#[test]
fn test_modern_fullscreen_deferred_until_show() {
    let h = harness();
    h.window.set_fullscreen(true).unwrap();
    assert_eq!(h.display.count(|c| matches!(c, Call::SetFullscreen(..))), 0);

    h.window.show().unwrap();
    let toplevel = h.display.toplevel().unwrap();
    assert!(h.display.calls().contains(&Call::SetFullscreen(toplevel, true)));

    h.window.set_fullscreen(false).unwrap();
    assert!(h.display.calls().contains(&Call::SetFullscreen(toplevel, false)));
}

#[test]
fn test_config_fullscreen_applied_at_show() {
    let h = create(ShellKind::Modern, WindowConfig::default().with_fullscreen(true));
    h.window.show().unwrap();
    let toplevel = h.display.toplevel().unwrap();
    assert!(h.display.calls().contains(&Call::SetFullscreen(toplevel, true)));
}

#[test]
fn test_legacy_shell() {
    let h = create(ShellKind::Legacy, WindowConfig::default().with_fullscreen(true));
    assert!(h.window.is_shown());
    let calls = h.display.calls();
    assert!(calls.contains(&Call::LegacySetToplevel));
    assert!(calls.contains(&Call::LegacySetFullscreen));

    h.window.show().unwrap();
    h.window.hide().unwrap();
    assert!(h.window.is_shown());
    assert_eq!(h.display.count(|c| matches!(c, Call::Promote(_) | Call::DestroyToplevel(_))), 0);

    h.display.clear_calls();
    h.window.set_fullscreen(false).unwrap();
    assert_eq!(h.display.calls(), vec![Call::LegacySetToplevel]);
}

#[test]
fn test_legacy_ping_is_answered() {
    let h = create(ShellKind::Legacy, WindowConfig::default());
    h.display.send_shell_configure(h.display.shell_surface().unwrap(), 42);
    h.dispatch();
    assert!(h.display.calls().contains(&Call::Pong(42)));
}

#[test]
fn test_configure_acks_and_resizes() {
    let h = harness();
    h.window.show().unwrap();
    let toplevel = h.display.toplevel().unwrap();

    h.display.send_shell_configure(h.display.shell_surface().unwrap(), 7);
    h.display.send_toplevel(
        toplevel,
        ToplevelEvent::Configure {
            width: 800,
            height: 600,
            states: vec![ToplevelState::Fullscreen, ToplevelState::Activated],
        },
    );
    h.dispatch();

    assert!(h.display.calls().contains(&Call::AckConfigure(7)));
    assert_eq!(h.window.size(), Size::new(800, 600));
    assert!(h.window.is_fullscreen());
    assert_eq!(h.display.live_regions(), 1);
    assert_eq!(
        *h.events.lock().unwrap(),
        vec![WindowEvent::SizeChanged { width: 800, height: 600 }]
    );

    // Zero size leaves the choice to the client.
    h.display.send_toplevel(
        toplevel,
        ToplevelEvent::Configure { width: 0, height: 0, states: vec![] },
    );
    h.display.send_toplevel(toplevel, ToplevelEvent::Close);
    h.dispatch();
    assert_eq!(h.window.size(), Size::new(800, 600));
    assert!(!h.window.is_fullscreen());
    assert_eq!(h.events.lock().unwrap().last(), Some(&WindowEvent::CloseRequested));
    assert_eq!(h.events.lock().unwrap().len(), 2);
}

#[test]
fn test_configured_size_drives_direct_export() {
    let h = harness();
    h.window.show().unwrap();
    let toplevel = h.display.toplevel().unwrap();
    h.display.send_toplevel(
        toplevel,
        ToplevelEvent::Configure { width: 320, height: 240, states: vec![] },
    );
    h.dispatch();

    let small = VideoSurface::new(2, 320, 240);
    let rect = Rect::new(0, 0, 320, 240);
    h.window.render(&small, &rect, &rect, RenderFlags::FRAME).unwrap();
    assert!(!h.window.needs_conversion());
}

// ============================================================================
// Setup and Teardown
// ============================================================================

fn try_create(display: &Arc<MockDisplay>) -> Result<PresentationWindow, PresentError> {
    let hardware: Arc<dyn HardwareBackend> = MockHardware::new(display);
    PresentationWindow::create(display.handle(), hardware, WindowConfig::default(), None)
}

#[test]
fn test_missing_globals_fail_setup() {
    let display = MockDisplay::build(false, Some(ShellKind::Modern));
    assert_eq!(
        try_create(&display).unwrap_err(),
        PresentError::MissingGlobal("wl_compositor")
    );

    let display = MockDisplay::build(true, None);
    assert!(matches!(try_create(&display), Err(PresentError::MissingGlobal(_))));
    assert_eq!(display.live_channels(), 0);
}

#[test]
fn test_failed_object_creation_leaves_nothing() {
    let display = MockDisplay::new(ShellKind::Modern);
    display.fail_surface_creation();
    assert!(matches!(try_create(&display), Err(PresentError::Display(_))));
    assert_eq!(display.live_channels(), 0);

    let display = MockDisplay::new(ShellKind::Legacy);
    display.fail_shell_surface_creation();
    assert!(matches!(try_create(&display), Err(PresentError::Display(_))));
    assert_eq!(display.live_surfaces(), 0);
    assert_eq!(display.live_channels(), 0);
}

#[test]
fn test_successful_create_keeps_its_objects() {
    for shell in [ShellKind::Modern, ShellKind::Legacy] {
        let display = MockDisplay::new(shell);
        let window = try_create(&display).unwrap();
        assert_eq!(display.live_surfaces(), 1);
        assert_eq!(display.live_channels(), 1);
        assert_eq!(display.count(|c| matches!(c, Call::DestroyShellSurface(_))), 0);
        assert_eq!(display.count(|c| matches!(c, Call::DestroySurface(_))), 0);
        assert_eq!(display.count(|c| matches!(c, Call::DestroyChannel(_))), 0);

        drop(window);
        assert_eq!(display.live_surfaces(), 0);
        assert_eq!(display.live_channels(), 0);
    }
}

#[test]
fn test_teardown_order() {
    let h = harness();
    h.window.show().unwrap();
    h.render(FULL, FULL).unwrap();
    let buffer = h.display.last_attached().unwrap();
    h.display.send_release(buffer);
    h.display.clear_calls();

    let surface = h.window.surface_id();
    let channel = h.window.channel();
    let display = h.display.clone();
    let unlocked = display.unlocked_roundtrips();
    drop(h);

    // The final roundtrip runs under the display lock.
    assert_eq!(display.unlocked_roundtrips(), unlocked);

    let calls = display.calls();
    let detach = position(&calls, |c| *c == Call::Attach(surface, None));
    let commit = position(&calls, |c| *c == Call::Commit(surface));
    let roundtrip = position(&calls, |c| *c == Call::Roundtrip(channel));
    let toplevel = position(&calls, |c| matches!(c, Call::DestroyToplevel(_)));
    let shell = position(&calls, |c| matches!(c, Call::DestroyShellSurface(_)));
    let destroy_surface = position(&calls, |c| *c == Call::DestroySurface(surface));
    let destroy_channel = position(&calls, |c| *c == Call::DestroyChannel(channel));
    assert!(detach < commit && commit < roundtrip);
    assert!(roundtrip < toplevel && toplevel < shell);
    assert!(shell < destroy_surface && destroy_surface < destroy_channel);

    // The held buffer was released during the final roundtrip.
    assert_eq!(display.live_buffers(), 0);
    assert_eq!(display.live_surfaces(), 0);
    assert_eq!(display.live_channels(), 0);
}
