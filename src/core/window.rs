//! On-screen presentation window.
//!
//! A `PresentationWindow` owns one compositor surface and its shell role
//! objects, all bound to a private event channel. `render` is
//! single-buffered: it waits for the previous frame to be retired before
//! attaching the next buffer.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::WindowConfig;
use crate::core::binder::{BoundBuffer, SurfaceBinder};
use crate::core::display::{
    ChannelId, DisplayHandle, RegionId, ShellKind, ShellSurfaceEvent, ShellSurfaceId, SurfaceId,
    ToplevelEvent, ToplevelId, ToplevelState, WeakDisplayHandle,
};
use crate::core::errors::{DisplayError, PresentError, Result, SyncError};
use crate::core::frame::{FrameSlot, FrameState};
use crate::core::hardware::{HardwareBackend, RenderFlags, VideoSurface};
use crate::core::sync::SyncGate;
use crate::util::geometry::{Rect, Size};
use crate::util::logging;

// ============================================================================
// Window Events
// ============================================================================

/// Notifications delivered to the window's owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowEvent {
    /// The compositor picked a new toplevel size.
    SizeChanged { width: u32, height: u32 },
    /// The user asked to close the toplevel.
    CloseRequested,
}

/// Receiver for [`WindowEvent`]s, called on the dispatching thread.
pub type EventSink = Arc<dyn Fn(WindowEvent) + Send + Sync>;

/// What happened to a frame passed to `render`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The buffer was attached and committed.
    Presented,
    /// The previous frame could not be waited for (flushing or
    /// backpressure); this frame was discarded. Not an error.
    Dropped,
}

/// Operations every video window backend provides.
pub trait VideoWindow: Send + Sync {
    fn show(&self) -> Result<()>;
    fn hide(&self) -> Result<()>;
    fn resize(&self, width: u32, height: u32) -> Result<()>;
    fn set_fullscreen(&self, fullscreen: bool) -> Result<()>;
    fn render(
        &self,
        surface: &VideoSurface,
        src: &Rect,
        dst: &Rect,
        flags: RenderFlags,
    ) -> Result<FrameOutcome>;
    /// Release a blocked `render` and make later waits fail fast.
    fn unblock(&self);
    /// Re-arm waiting after [`VideoWindow::unblock`].
    fn unblock_cancel(&self);
    fn size(&self) -> Size;
}

// ============================================================================
// Shared State
// ============================================================================

/// Window state reachable from compositor listeners.
struct WindowShared {
    frames: Arc<FrameSlot>,
    size: Mutex<Size>,
    opaque_region: Mutex<Option<RegionId>>,
    /// Last fullscreen state reported by the compositor.
    fullscreen: AtomicBool,
    events: Option<EventSink>,
}

impl WindowShared {
    fn size(&self) -> Size {
        *self.size.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: WindowEvent) {
        if let Some(sink) = &self.events {
            sink(event);
        }
    }

    /// Replace the opaque region with one covering `size`.
    fn replace_opaque_region(&self, display: &DisplayHandle, size: Size) -> Result<()> {
        let _lock = display.lock();
        let mut slot = self.opaque_region.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(old) = slot.take() {
            display.destroy_region(old);
        }
        let region = display.create_region()?;
        display.region_add(region, Rect::from_size(size));
        *slot = Some(region);
        Ok(())
    }

    fn set_size(&self, display: &DisplayHandle, size: Size) -> Result<()> {
        *self.size.lock().unwrap_or_else(|e| e.into_inner()) = size;
        self.replace_opaque_region(display, size)
    }

    fn handle_toplevel_event(&self, display: &WeakDisplayHandle, event: ToplevelEvent) {
        match event {
            ToplevelEvent::Configure { width, height, states } => {
                crate::wlog!(
                    logging::WINDOW,
                    "Got toplevel configure, [width x height] = [{} x {}], states={:?}",
                    width, height, states
                );
                self.fullscreen
                    .store(states.contains(&ToplevelState::Fullscreen), Ordering::Release);

                if width > 0 && height > 0 {
                    let size = Size::new(width as u32, height as u32);
                    if let Some(display) = display.upgrade() {
                        if let Err(err) = self.set_size(&display, size) {
                            tracing::warn!(target: logging::WINDOW, "Failed to apply configured size {}: {}", size, err);
                        }
                    }
                    self.emit(WindowEvent::SizeChanged {
                        width: size.width,
                        height: size.height,
                    });
                }
            }
            ToplevelEvent::Close => {
                tracing::info!(target: logging::WINDOW, "Toplevel close requested");
                self.emit(WindowEvent::CloseRequested);
            }
        }
    }
}

#[derive(Debug)]
enum ShellBinding {
    Modern {
        shell_surface: ShellSurfaceId,
        toplevel: Option<ToplevelId>,
    },
    Legacy {
        shell_surface: ShellSurfaceId,
    },
}

#[derive(Debug)]
struct ShowState {
    shell: ShellBinding,
    is_shown: bool,
    fullscreen_on_show: bool,
}

// ============================================================================
// Setup
// ============================================================================

/// Objects created so far by `create`, destroyed again if setup fails.
struct PartialWindow<'a> {
    display: &'a DisplayHandle,
    channel: Option<ChannelId>,
    surface: Option<SurfaceId>,
    shell_surface: Option<ShellSurfaceId>,
}

impl<'a> PartialWindow<'a> {
    fn new(display: &'a DisplayHandle) -> Self {
        Self {
            display,
            channel: None,
            surface: None,
            shell_surface: None,
        }
    }

    /// Setup succeeded; the window owns the objects now.
    fn disarm(mut self) {
        self.channel = None;
        self.surface = None;
        self.shell_surface = None;
    }
}

impl Drop for PartialWindow<'_> {
    fn drop(&mut self) {
        let _lock = self.display.lock();
        if let Some(shell_surface) = self.shell_surface.take() {
            self.display.destroy_shell_surface(shell_surface);
        }
        if let Some(surface) = self.surface.take() {
            self.display.destroy_surface(surface);
        }
        if let Some(channel) = self.channel.take() {
            self.display.destroy_event_channel(channel);
        }
    }
}

// ============================================================================
// Presentation Window
// ============================================================================

pub struct PresentationWindow {
    display: DisplayHandle,
    hardware: Arc<dyn HardwareBackend>,
    config: WindowConfig,
    channel: ChannelId,
    surface: SurfaceId,
    state: Mutex<ShowState>,
    shared: Arc<WindowShared>,
    binder: SurfaceBinder,
    gate: SyncGate,
}

impl PresentationWindow {
    /// Create the window's compositor objects. The window stays invisible
    /// until [`PresentationWindow::show`] on the modern shell; the legacy
    /// shell maps it immediately.
    pub fn create(
        display: DisplayHandle,
        hardware: Arc<dyn HardwareBackend>,
        config: WindowConfig,
        events: Option<EventSink>,
    ) -> Result<Self> {
        tracing::debug!(target: logging::WINDOW, "Create window, size {}x{}", config.width, config.height);

        if !display.has_compositor() {
            return Err(PresentError::MissingGlobal("wl_compositor"));
        }
        let shell_kind = display
            .shell_kind()
            .ok_or(PresentError::MissingGlobal("xdg_wm_base or wl_shell"))?;
        let gate = SyncGate::new()
            .map_err(|err| PresentError::setup(format!("cannot create poll set: {}", err)))?;

        let mut partial = PartialWindow::new(&display);
        let (channel, surface, shell) = {
            let _lock = display.lock();
            let channel = display.create_event_channel()?;
            partial.channel = Some(channel);
            let surface = display.create_surface(channel)?;
            partial.surface = Some(surface);

            let weak = display.downgrade();
            let shell = match shell_kind {
                ShellKind::Modern => {
                    let shell_surface = display.get_shell_surface(
                        surface,
                        channel,
                        Box::new(move |shell_surface, event| {
                            if let ShellSurfaceEvent::Configure { serial } = event {
                                if let Some(display) = weak.upgrade() {
                                    display.ack_configure(shell_surface, serial);
                                }
                            }
                        }),
                    )?;
                    partial.shell_surface = Some(shell_surface);
                    ShellBinding::Modern {
                        shell_surface,
                        toplevel: None,
                    }
                }
                ShellKind::Legacy => {
                    let shell_surface = display.get_legacy_shell_surface(
                        surface,
                        channel,
                        Box::new(move |shell_surface, event| {
                            if let ShellSurfaceEvent::Ping { serial } = event {
                                if let Some(display) = weak.upgrade() {
                                    display.legacy_pong(shell_surface, serial);
                                }
                            }
                        }),
                    )?;
                    partial.shell_surface = Some(shell_surface);
                    display.legacy_set_toplevel(shell_surface);
                    ShellBinding::Legacy { shell_surface }
                }
            };
            (channel, surface, shell)
        };
        partial.disarm();

        let shared = Arc::new(WindowShared {
            frames: Arc::new(FrameSlot::new()),
            size: Mutex::new(config.size()),
            opaque_region: Mutex::new(None),
            fullscreen: AtomicBool::new(false),
            events,
        });

        let is_legacy = matches!(shell, ShellBinding::Legacy { .. });
        let window = Self {
            state: Mutex::new(ShowState {
                shell,
                is_shown: false,
                fullscreen_on_show: config.fullscreen,
            }),
            display,
            hardware,
            config,
            channel,
            surface,
            shared,
            binder: SurfaceBinder::new(),
            gate,
        };

        // The legacy surface is a toplevel from the start.
        if is_legacy {
            let mut state = window.lock_state();
            state.is_shown = true;
            if state.fullscreen_on_show {
                window.apply_fullscreen(&state, true);
            }
        }

        tracing::info!(
            target: logging::WINDOW,
            "Created {:?}-shell window {} on {}",
            shell_kind, window.surface, window.channel
        );
        Ok(window)
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ShowState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn size(&self) -> Size {
        self.shared.size()
    }

    pub fn is_shown(&self) -> bool {
        self.lock_state().is_shown
    }

    /// Whether the compositor last reported the toplevel as fullscreen.
    pub fn is_fullscreen(&self) -> bool {
        self.shared.fullscreen.load(Ordering::Acquire)
    }

    pub fn pending_frames(&self) -> u32 {
        self.shared.frames.pending()
    }

    pub fn needs_conversion(&self) -> bool {
        self.binder.needs_conversion()
    }

    pub fn sync_failed(&self) -> bool {
        self.gate.has_failed()
    }

    pub fn surface_id(&self) -> SurfaceId {
        self.surface
    }

    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    pub fn config(&self) -> &WindowConfig {
        &self.config
    }

    // =========================================================================
    // Shell
    // =========================================================================

    /// Map the window as a toplevel.
    pub fn show(&self) -> Result<()> {
        let mut guard = self.lock_state();
        let state = &mut *guard;

        let shell_surface = match &state.shell {
            ShellBinding::Legacy { .. } => {
                tracing::debug!(target: logging::WINDOW, "show() is not implemented for wl_shell");
                return Ok(());
            }
            ShellBinding::Modern { toplevel: Some(_), .. } => {
                tracing::debug!(target: logging::WINDOW, "Toplevel already mapped");
                return Ok(());
            }
            ShellBinding::Modern { shell_surface, toplevel: None } => *shell_surface,
        };

        let shared = Arc::downgrade(&self.shared);
        let weak = self.display.downgrade();
        let _lock = self.display.lock();
        let toplevel = self.display.promote_to_toplevel(
            shell_surface,
            self.channel,
            Box::new(move |_toplevel, event| {
                if let Some(shared) = shared.upgrade() {
                    shared.handle_toplevel_event(&weak, event);
                }
            }),
        )?;
        self.display.set_title(toplevel, &self.config.title);
        if let Some(app_id) = &self.config.app_id {
            self.display.set_app_id(toplevel, app_id);
        }

        state.shell = ShellBinding::Modern {
            shell_surface,
            toplevel: Some(toplevel),
        };
        state.is_shown = true;
        if state.fullscreen_on_show {
            self.display.set_fullscreen(toplevel, true);
        }

        // Commit the shell surface state as a toplevel window.
        self.display.commit(self.surface);
        tracing::debug!(target: logging::WINDOW, "Window mapped as {}", toplevel);
        Ok(())
    }

    /// Unmap the toplevel, keeping the surface for a later `show`.
    pub fn hide(&self) -> Result<()> {
        let mut guard = self.lock_state();
        let state = &mut *guard;

        match &mut state.shell {
            ShellBinding::Legacy { .. } => {
                tracing::debug!(target: logging::WINDOW, "hide() is not implemented for wl_shell");
            }
            ShellBinding::Modern { toplevel, .. } => {
                if let Some(toplevel) = toplevel.take() {
                    let _lock = self.display.lock();
                    self.display.destroy_toplevel(toplevel);
                    self.display.commit(self.surface);
                    state.is_shown = false;
                    tracing::debug!(target: logging::WINDOW, "Window unmapped");
                }
            }
        }
        Ok(())
    }

    pub fn set_fullscreen(&self, fullscreen: bool) -> Result<()> {
        let mut state = self.lock_state();
        state.fullscreen_on_show = fullscreen;
        if !state.is_shown {
            crate::wlog!(logging::WINDOW, "Deferring fullscreen={} until shown", fullscreen);
            return Ok(());
        }
        self.apply_fullscreen(&state, fullscreen);
        Ok(())
    }

    fn apply_fullscreen(&self, state: &ShowState, fullscreen: bool) {
        let _lock = self.display.lock();
        match state.shell {
            ShellBinding::Modern { toplevel: Some(toplevel), .. } => {
                self.display.set_fullscreen(toplevel, fullscreen);
            }
            ShellBinding::Modern { toplevel: None, .. } => {}
            ShellBinding::Legacy { shell_surface } => {
                if fullscreen {
                    self.display.legacy_set_fullscreen(shell_surface);
                } else {
                    self.display.legacy_set_toplevel(shell_surface);
                }
            }
        }
    }

    // =========================================================================
    // Geometry
    // =========================================================================

    /// Replace the opaque-region hint; applied with the next rendered frame.
    pub fn resize(&self, width: u32, height: u32) -> Result<()> {
        tracing::debug!(target: logging::WINDOW, "Resize window, new size {}x{}", width, height);
        self.shared.replace_opaque_region(&self.display, Size::new(width, height))
    }

    /// Change the tracked window size and resize to it.
    pub fn set_size(&self, width: u32, height: u32) -> Result<()> {
        self.shared.set_size(&self.display, Size::new(width, height))
    }

    // =========================================================================
    // Rendering
    // =========================================================================

    /// Present `src` of `surface` in `dst` of the window.
    pub fn render(
        &self,
        surface: &VideoSurface,
        src: &Rect,
        dst: &Rect,
        flags: RenderFlags,
    ) -> Result<FrameOutcome> {
        if self.gate.has_failed() {
            return Err(SyncError::Failed.into());
        }

        let bound = self.binder.bind(
            &self.display,
            self.channel,
            &*self.hardware,
            surface,
            src,
            dst,
            self.size(),
            flags,
        )?;

        // Wait for the previous frame to complete redraw.
        if let Err(err) = self.gate.wait(&self.display, self.channel, &self.shared.frames) {
            self.discard(bound);
            if err.is_sticky() {
                return Err(err.into());
            }
            tracing::debug!(target: logging::WINDOW, "Dropping frame: {}", err);
            return Ok(FrameOutcome::Dropped);
        }

        self.submit(bound)?;
        Ok(FrameOutcome::Presented)
    }

    /// Return a bound buffer's resources without displaying it.
    fn discard(&self, bound: BoundBuffer) {
        let BoundBuffer { buffer, source, .. } = bound;
        drop(source);
        let _lock = self.display.lock();
        self.display.destroy_buffer(buffer);
    }

    fn submit(&self, bound: BoundBuffer) -> Result<()> {
        let damage = bound.damage_rect();
        let BoundBuffer { buffer, source, .. } = bound;

        let frame = FrameState::new(&self.shared.frames);
        frame.install();
        if let Some(lease) = source {
            frame.attach_source(lease);
        }

        let _lock = self.display.lock();

        let released = frame.clone();
        let weak = self.display.downgrade();
        let registered = self.display.set_buffer_listener(
            buffer,
            self.channel,
            Box::new(move |buffer| {
                if let Some(display) = weak.upgrade() {
                    released.handle_release(&*display, buffer);
                }
            }),
        );
        if let Err(err) = registered {
            tracing::error!(target: logging::WINDOW, "Cannot track release of {}: {}", buffer, err);
            frame.handle_done();
            self.display.destroy_buffer(buffer);
            frame.release(&*self.display);
            return Err(err.into());
        }

        // XXX: attach to the specified target rectangle
        self.display.attach(self.surface, Some(buffer), 0, 0);
        self.display.damage(self.surface, damage);

        if let Some(region) = self
            .shared
            .opaque_region
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            self.display.set_opaque_region(self.surface, Some(region));
            self.display.destroy_region(region);
        }

        let completed = frame.clone();
        match self.display.frame(
            self.surface,
            self.channel,
            Box::new(move |time| {
                tracing::trace!(target: logging::FRAME, "Frame {} done at {}ms", completed.serial(), time);
                completed.handle_done();
            }),
        ) {
            Ok(callback) => frame.set_completion(callback),
            Err(err) => {
                // The buffer release still retires the frame.
                tracing::warn!(target: logging::WINDOW, "No frame callback for frame {}: {}", frame.serial(), err);
            }
        }

        self.display.commit(self.surface);
        match self.display.flush() {
            Ok(()) | Err(DisplayError::WouldBlock) => {}
            Err(err) => tracing::warn!(target: logging::WINDOW, "Flush after commit failed: {}", err),
        }

        crate::wlog!(logging::WINDOW, "Presented frame {} with {} ({})", frame.serial(), buffer, damage.size());
        Ok(())
    }

    // =========================================================================
    // Cancellation
    // =========================================================================

    pub fn unblock(&self) {
        self.gate.set_flushing(true);
    }

    pub fn unblock_cancel(&self) {
        self.gate.set_flushing(false);
    }
}

impl VideoWindow for PresentationWindow {
    fn show(&self) -> Result<()> {
        PresentationWindow::show(self)
    }

    fn hide(&self) -> Result<()> {
        PresentationWindow::hide(self)
    }

    fn resize(&self, width: u32, height: u32) -> Result<()> {
        PresentationWindow::resize(self, width, height)
    }

    fn set_fullscreen(&self, fullscreen: bool) -> Result<()> {
        PresentationWindow::set_fullscreen(self, fullscreen)
    }

    fn render(
        &self,
        surface: &VideoSurface,
        src: &Rect,
        dst: &Rect,
        flags: RenderFlags,
    ) -> Result<FrameOutcome> {
        PresentationWindow::render(self, surface, src, dst, flags)
    }

    fn unblock(&self) {
        PresentationWindow::unblock(self)
    }

    fn unblock_cancel(&self) {
        PresentationWindow::unblock_cancel(self)
    }

    fn size(&self) -> Size {
        PresentationWindow::size(self)
    }
}

impl Drop for PresentationWindow {
    fn drop(&mut self) {
        // Make sure the last buffer's release can still be delivered.
        {
            let _lock = self.display.lock();
            self.display.attach(self.surface, None, 0, 0);
            self.display.commit(self.surface);
            let _ = self.display.flush();
        }

        self.gate.set_flushing(true);

        let _lock = self.display.lock();
        if let Err(err) = self.display.roundtrip(self.channel) {
            tracing::warn!(target: logging::WINDOW, "Final roundtrip failed: {}", err);
        }

        let state = self.state.get_mut().unwrap_or_else(|e| e.into_inner());
        match &mut state.shell {
            ShellBinding::Modern { shell_surface, toplevel } => {
                if let Some(toplevel) = toplevel.take() {
                    self.display.destroy_toplevel(toplevel);
                }
                self.display.destroy_shell_surface(*shell_surface);
            }
            ShellBinding::Legacy { shell_surface } => {
                self.display.destroy_shell_surface(*shell_surface);
            }
        }
        if let Some(region) = self
            .shared
            .opaque_region
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            self.display.destroy_region(region);
        }
        self.display.destroy_surface(self.surface);
        self.display.destroy_event_channel(self.channel);
        tracing::debug!(target: logging::WINDOW, "Window {} destroyed", self.surface);
    }
}

impl fmt::Debug for PresentationWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PresentationWindow")
            .field("surface", &self.surface)
            .field("channel", &self.channel)
            .field("size", &self.size())
            .field("pending_frames", &self.pending_frames())
            .field("needs_conversion", &self.needs_conversion())
            .field("sync_failed", &self.sync_failed())
            .finish()
    }
}
