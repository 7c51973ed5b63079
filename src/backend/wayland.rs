//! `DisplayConnection` over a live compositor socket.
//!
//! Every event channel is its own `EventQueue`. Objects created for a
//! channel are bound to that queue's handle, so dispatching one window never
//! runs another window's listeners. Buffers are created directly on the
//! queue of the channel that will present them. Globals, pools and regions
//! live on the connection's main queue, which is dispatched alongside every
//! channel.
//!
//! Listener closures are stored as proxy user data and taken out when their
//! event fires.

use std::collections::HashMap;
use std::io;
use std::os::unix::io::{AsRawFd, BorrowedFd, RawFd};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use wayland_client::backend::{ReadEventsGuard, WaylandError};
use wayland_client::globals::{registry_queue_init, GlobalList, GlobalListContents};
use wayland_client::protocol::{
    wl_buffer, wl_callback, wl_compositor, wl_region, wl_registry, wl_shell, wl_shell_surface,
    wl_shm, wl_shm_pool, wl_surface,
};
use wayland_client::{
    delegate_noop, Connection, Dispatch, DispatchError, EventQueue, QueueHandle, Proxy,
};
use wayland_protocols::xdg::shell::client::{xdg_surface, xdg_toplevel, xdg_wm_base};

use crate::core::display::{
    BufferId, CallbackId, ChannelId, DisplayConnection, FrameListener, PreparedRead, RegionId,
    ReleaseListener, ShellKind, ShellListener, ShellSurfaceEvent, ShellSurfaceId, SurfaceId,
    ToplevelEvent, ToplevelId, ToplevelListener, ToplevelState,
};
use crate::core::errors::{DisplayError, PresentError};
use crate::util::geometry::Rect;
use crate::util::logging;

// ============================================================================
// Queue State and User Data
// ============================================================================

/// Dispatch state shared by every queue. All per-object state lives in
/// proxy user data.
#[derive(Debug, Default)]
pub struct QueueState {
    /// Listener invocations since the queue was created.
    delivered: usize,
}

pub struct FrameData {
    listener: Mutex<Option<FrameListener>>,
}

pub struct BufferData {
    id: BufferId,
    channel: ChannelId,
    listener: Mutex<Option<ReleaseListener>>,
}

pub struct ShellData {
    id: ShellSurfaceId,
    listener: Mutex<ShellListener>,
}

pub struct ToplevelData {
    id: ToplevelId,
    listener: Mutex<ToplevelListener>,
}

struct ChannelQueue {
    queue: EventQueue<QueueState>,
    state: QueueState,
}

struct Channel {
    handle: QueueHandle<QueueState>,
    queue: Mutex<ChannelQueue>,
}

enum ShellRole {
    Xdg(xdg_surface::XdgSurface),
    Legacy(wl_shell_surface::WlShellSurface),
}

#[derive(Default)]
struct Objects {
    surfaces: HashMap<SurfaceId, wl_surface::WlSurface>,
    regions: HashMap<RegionId, wl_region::WlRegion>,
    shell_surfaces: HashMap<ShellSurfaceId, ShellRole>,
    toplevels: HashMap<ToplevelId, xdg_toplevel::XdgToplevel>,
    callbacks: HashMap<CallbackId, wl_callback::WlCallback>,
    buffers: HashMap<BufferId, wl_buffer::WlBuffer>,
}

enum Shell {
    Xdg(xdg_wm_base::XdgWmBase),
    Legacy(wl_shell::WlShell),
}

// ============================================================================
// Error Mapping
// ============================================================================

fn map_wayland_error(err: WaylandError) -> DisplayError {
    match err {
        WaylandError::Io(err) => match err.kind() {
            io::ErrorKind::WouldBlock => DisplayError::WouldBlock,
            io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset => {
                DisplayError::Disconnected
            }
            _ => DisplayError::io(err),
        },
        WaylandError::Protocol(err) => DisplayError::protocol(err.to_string()),
    }
}

fn map_dispatch_error(err: DispatchError) -> DisplayError {
    match err {
        DispatchError::Backend(err) => map_wayland_error(err),
        other => DisplayError::protocol(other.to_string()),
    }
}

// ============================================================================
// Wayland Display
// ============================================================================

pub struct WaylandDisplay {
    connection: Connection,
    compositor: Option<wl_compositor::WlCompositor>,
    shell: Option<Shell>,
    shm: Option<wl_shm::WlShm>,
    main_handle: QueueHandle<QueueState>,
    main: Mutex<ChannelQueue>,
    channels: Mutex<HashMap<ChannelId, Arc<Channel>>>,
    objects: Mutex<Objects>,
    next_id: AtomicU32,
}

impl WaylandDisplay {
    /// Connect to `$WAYLAND_DISPLAY` and bind the globals windows need.
    pub fn connect() -> Result<Arc<Self>, PresentError> {
        let connection = Connection::connect_to_env()
            .map_err(|err| PresentError::setup(format!("failed to connect wayland display: {}", err)))?;
        Self::from_connection(connection)
    }

    pub fn from_connection(connection: Connection) -> Result<Arc<Self>, PresentError> {
        let (globals, mut queue) = registry_queue_init::<QueueState>(&connection)
            .map_err(|err| PresentError::setup(format!("registry init failed: {}", err)))?;
        let handle = queue.handle();

        let compositor = globals
            .bind::<wl_compositor::WlCompositor, _, _>(&handle, 1..=4, ())
            .ok();
        let shell = Self::bind_shell(&globals, &handle);
        let shm = globals.bind::<wl_shm::WlShm, _, _>(&handle, 1..=1, ()).ok();

        let mut state = QueueState::default();
        queue
            .roundtrip(&mut state)
            .map_err(|err| PresentError::setup(format!("wayland roundtrip failed: {}", err)))?;

        tracing::info!(
            target: logging::DISPLAY,
            "Connected: compositor={} shell={} shm={}",
            compositor.is_some(),
            match shell {
                Some(Shell::Xdg(_)) => "xdg_wm_base",
                Some(Shell::Legacy(_)) => "wl_shell",
                None => "none",
            },
            shm.is_some()
        );

        Ok(Arc::new(Self {
            connection,
            compositor,
            shell,
            shm,
            main_handle: handle,
            main: Mutex::new(ChannelQueue { queue, state }),
            channels: Mutex::new(HashMap::new()),
            objects: Mutex::new(Objects::default()),
            next_id: AtomicU32::new(1),
        }))
    }

    fn bind_shell(globals: &GlobalList, handle: &QueueHandle<QueueState>) -> Option<Shell> {
        if let Ok(wm_base) = globals.bind::<xdg_wm_base::XdgWmBase, _, _>(handle, 1..=5, ()) {
            return Some(Shell::Xdg(wm_base));
        }
        globals
            .bind::<wl_shell::WlShell, _, _>(handle, 1..=1, ())
            .ok()
            .map(Shell::Legacy)
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn has_shm(&self) -> bool {
        self.shm.is_some()
    }

    fn allocate_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn channel(&self, channel: ChannelId) -> Result<Arc<Channel>, DisplayError> {
        self.channels
            .lock()
            .get(&channel)
            .cloned()
            .ok_or(DisplayError::UnknownObject(channel.raw()))
    }

    fn compositor(&self) -> Result<&wl_compositor::WlCompositor, DisplayError> {
        self.compositor
            .as_ref()
            .ok_or(DisplayError::MissingGlobal("wl_compositor"))
    }

    /// Dispatch the main queue. Only globals live there, so its listeners
    /// never touch window state.
    fn dispatch_main(&self) -> Result<usize, DisplayError> {
        let mut main = self.main.lock();
        let ChannelQueue { queue, state } = &mut *main;
        queue.dispatch_pending(state).map_err(map_dispatch_error)
    }

    // =========================================================================
    // Shared-memory buffers
    // =========================================================================

    /// Create a pool over `fd`. The caller may destroy the pool as soon as
    /// its buffers exist.
    pub fn create_shm_pool(
        &self,
        fd: BorrowedFd<'_>,
        size: i32,
    ) -> Result<wl_shm_pool::WlShmPool, DisplayError> {
        let shm = self.shm.as_ref().ok_or(DisplayError::MissingGlobal("wl_shm"))?;
        Ok(shm.create_pool(fd, size, &self.main_handle, ()))
    }

    /// Create an XRGB8888 buffer in `pool` whose release is delivered on
    /// `channel`, and track it by id.
    pub fn create_shm_buffer(
        &self,
        pool: &wl_shm_pool::WlShmPool,
        channel: ChannelId,
        offset: i32,
        width: i32,
        height: i32,
        stride: i32,
    ) -> Result<BufferId, DisplayError> {
        let queue = self.channel(channel)?;
        let id = BufferId(self.allocate_id());
        let buffer = pool.create_buffer(
            offset,
            width,
            height,
            stride,
            wl_shm::Format::Xrgb8888,
            &queue.handle,
            BufferData {
                id,
                channel,
                listener: Mutex::new(None),
            },
        );
        self.objects.lock().buffers.insert(id, buffer);
        Ok(id)
    }
}

impl DisplayConnection for WaylandDisplay {
    fn has_compositor(&self) -> bool {
        self.compositor.is_some()
    }

    fn shell_kind(&self) -> Option<ShellKind> {
        match self.shell {
            Some(Shell::Xdg(_)) => Some(ShellKind::Modern),
            Some(Shell::Legacy(_)) => Some(ShellKind::Legacy),
            None => None,
        }
    }

    // ===== Object lifecycle =====

    fn create_event_channel(&self) -> Result<ChannelId, DisplayError> {
        let id = ChannelId(self.allocate_id());
        let queue = self.connection.new_event_queue::<QueueState>();
        let channel = Channel {
            handle: queue.handle(),
            queue: Mutex::new(ChannelQueue {
                queue,
                state: QueueState::default(),
            }),
        };
        self.channels.lock().insert(id, Arc::new(channel));
        crate::wlog!(logging::DISPLAY, "Created event queue {}", id);
        Ok(id)
    }

    fn destroy_event_channel(&self, channel: ChannelId) {
        if let Some(channel_queue) = self.channels.lock().remove(&channel) {
            crate::wlog!(
                logging::DISPLAY,
                "Destroyed event queue {} after {} events",
                channel,
                channel_queue.queue.lock().state.delivered
            );
        }
    }

    fn create_surface(&self, channel: ChannelId) -> Result<SurfaceId, DisplayError> {
        let channel = self.channel(channel)?;
        let surface = self.compositor()?.create_surface(&channel.handle, ());
        let id = SurfaceId(self.allocate_id());
        self.objects.lock().surfaces.insert(id, surface);
        Ok(id)
    }

    fn destroy_surface(&self, surface: SurfaceId) {
        if let Some(surface) = self.objects.lock().surfaces.remove(&surface) {
            surface.destroy();
        }
    }

    fn create_region(&self) -> Result<RegionId, DisplayError> {
        let region = self.compositor()?.create_region(&self.main_handle, ());
        let id = RegionId(self.allocate_id());
        self.objects.lock().regions.insert(id, region);
        Ok(id)
    }

    fn region_add(&self, region: RegionId, rect: Rect) {
        if let Some(region) = self.objects.lock().regions.get(&region) {
            region.add(rect.x, rect.y, rect.width as i32, rect.height as i32);
        }
    }

    fn destroy_region(&self, region: RegionId) {
        if let Some(region) = self.objects.lock().regions.remove(&region) {
            region.destroy();
        }
    }

    // ===== Modern shell =====

    fn get_shell_surface(
        &self,
        surface: SurfaceId,
        channel: ChannelId,
        listener: ShellListener,
    ) -> Result<ShellSurfaceId, DisplayError> {
        let Some(Shell::Xdg(wm_base)) = &self.shell else {
            return Err(DisplayError::MissingGlobal("xdg_wm_base"));
        };
        let channel = self.channel(channel)?;
        let id = ShellSurfaceId(self.allocate_id());

        let mut objects = self.objects.lock();
        let wl_surface = objects
            .surfaces
            .get(&surface)
            .ok_or(DisplayError::UnknownObject(surface.raw()))?;
        let xdg_surface = wm_base.get_xdg_surface(
            wl_surface,
            &channel.handle,
            ShellData {
                id,
                listener: Mutex::new(listener),
            },
        );
        objects.shell_surfaces.insert(id, ShellRole::Xdg(xdg_surface));
        Ok(id)
    }

    fn ack_configure(&self, shell_surface: ShellSurfaceId, serial: u32) {
        if let Some(ShellRole::Xdg(xdg_surface)) = self.objects.lock().shell_surfaces.get(&shell_surface) {
            xdg_surface.ack_configure(serial);
        }
    }

    fn destroy_shell_surface(&self, shell_surface: ShellSurfaceId) {
        match self.objects.lock().shell_surfaces.remove(&shell_surface) {
            Some(ShellRole::Xdg(xdg_surface)) => xdg_surface.destroy(),
            // wl_shell_surface has no destructor request.
            Some(ShellRole::Legacy(_)) | None => {}
        }
    }

    fn promote_to_toplevel(
        &self,
        shell_surface: ShellSurfaceId,
        channel: ChannelId,
        listener: ToplevelListener,
    ) -> Result<ToplevelId, DisplayError> {
        let channel = self.channel(channel)?;
        let id = ToplevelId(self.allocate_id());

        let mut objects = self.objects.lock();
        let Some(ShellRole::Xdg(xdg_surface)) = objects.shell_surfaces.get(&shell_surface) else {
            return Err(DisplayError::UnknownObject(shell_surface.raw()));
        };
        let toplevel = xdg_surface.get_toplevel(
            &channel.handle,
            ToplevelData {
                id,
                listener: Mutex::new(listener),
            },
        );
        objects.toplevels.insert(id, toplevel);
        Ok(id)
    }

    fn set_title(&self, toplevel: ToplevelId, title: &str) {
        if let Some(toplevel) = self.objects.lock().toplevels.get(&toplevel) {
            toplevel.set_title(title.to_string());
        }
    }

    fn set_app_id(&self, toplevel: ToplevelId, app_id: &str) {
        if let Some(toplevel) = self.objects.lock().toplevels.get(&toplevel) {
            toplevel.set_app_id(app_id.to_string());
        }
    }

    fn set_fullscreen(&self, toplevel: ToplevelId, fullscreen: bool) {
        if let Some(toplevel) = self.objects.lock().toplevels.get(&toplevel) {
            if fullscreen {
                toplevel.set_fullscreen(None);
            } else {
                toplevel.unset_fullscreen();
            }
        }
    }

    fn destroy_toplevel(&self, toplevel: ToplevelId) {
        if let Some(toplevel) = self.objects.lock().toplevels.remove(&toplevel) {
            toplevel.destroy();
        }
    }

    // ===== Legacy shell =====

    fn get_legacy_shell_surface(
        &self,
        surface: SurfaceId,
        channel: ChannelId,
        listener: ShellListener,
    ) -> Result<ShellSurfaceId, DisplayError> {
        let Some(Shell::Legacy(shell)) = &self.shell else {
            return Err(DisplayError::MissingGlobal("wl_shell"));
        };
        let channel = self.channel(channel)?;
        let id = ShellSurfaceId(self.allocate_id());

        let mut objects = self.objects.lock();
        let wl_surface = objects
            .surfaces
            .get(&surface)
            .ok_or(DisplayError::UnknownObject(surface.raw()))?;
        let shell_surface = shell.get_shell_surface(
            wl_surface,
            &channel.handle,
            ShellData {
                id,
                listener: Mutex::new(listener),
            },
        );
        objects.shell_surfaces.insert(id, ShellRole::Legacy(shell_surface));
        Ok(id)
    }

    fn legacy_pong(&self, shell_surface: ShellSurfaceId, serial: u32) {
        if let Some(ShellRole::Legacy(shell_surface)) = self.objects.lock().shell_surfaces.get(&shell_surface) {
            shell_surface.pong(serial);
        }
    }

    fn legacy_set_toplevel(&self, shell_surface: ShellSurfaceId) {
        if let Some(ShellRole::Legacy(shell_surface)) = self.objects.lock().shell_surfaces.get(&shell_surface) {
            shell_surface.set_toplevel();
        }
    }

    fn legacy_set_fullscreen(&self, shell_surface: ShellSurfaceId) {
        if let Some(ShellRole::Legacy(shell_surface)) = self.objects.lock().shell_surfaces.get(&shell_surface) {
            shell_surface.set_fullscreen(wl_shell_surface::FullscreenMethod::Scale, 0, None);
        }
    }

    // ===== Surface requests =====

    fn attach(&self, surface: SurfaceId, buffer: Option<BufferId>, x: i32, y: i32) {
        let objects = self.objects.lock();
        let Some(wl_surface) = objects.surfaces.get(&surface) else {
            return;
        };
        let wl_buffer = buffer.and_then(|buffer| objects.buffers.get(&buffer));
        wl_surface.attach(wl_buffer, x, y);
    }

    fn damage(&self, surface: SurfaceId, rect: Rect) {
        if let Some(surface) = self.objects.lock().surfaces.get(&surface) {
            surface.damage(rect.x, rect.y, rect.width as i32, rect.height as i32);
        }
    }

    fn set_opaque_region(&self, surface: SurfaceId, region: Option<RegionId>) {
        let objects = self.objects.lock();
        let Some(wl_surface) = objects.surfaces.get(&surface) else {
            return;
        };
        let wl_region = region.and_then(|region| objects.regions.get(&region));
        wl_surface.set_opaque_region(wl_region);
    }

    fn frame(
        &self,
        surface: SurfaceId,
        channel: ChannelId,
        listener: FrameListener,
    ) -> Result<CallbackId, DisplayError> {
        let channel = self.channel(channel)?;
        let id = CallbackId(self.allocate_id());

        let mut objects = self.objects.lock();
        let wl_surface = objects
            .surfaces
            .get(&surface)
            .ok_or(DisplayError::UnknownObject(surface.raw()))?;
        let callback = wl_surface.frame(
            &channel.handle,
            FrameData {
                listener: Mutex::new(Some(listener)),
            },
        );
        objects.callbacks.insert(id, callback);
        Ok(id)
    }

    fn destroy_callback(&self, callback: CallbackId) {
        // wl_callback has no destructor request; dropping the proxy is enough.
        self.objects.lock().callbacks.remove(&callback);
    }

    fn commit(&self, surface: SurfaceId) {
        if let Some(surface) = self.objects.lock().surfaces.get(&surface) {
            surface.commit();
        }
    }

    // ===== Buffers =====

    fn set_buffer_listener(
        &self,
        buffer: BufferId,
        channel: ChannelId,
        listener: ReleaseListener,
    ) -> Result<(), DisplayError> {
        let objects = self.objects.lock();
        let data = objects
            .buffers
            .get(&buffer)
            .and_then(|buffer| buffer.data::<BufferData>())
            .ok_or(DisplayError::UnknownObject(buffer.raw()))?;
        if data.channel != channel {
            return Err(DisplayError::protocol(format!(
                "{} is delivered on {}, not {}",
                buffer, data.channel, channel
            )));
        }
        *data.listener.lock() = Some(listener);
        Ok(())
    }

    fn destroy_buffer(&self, buffer: BufferId) {
        if let Some(buffer) = self.objects.lock().buffers.remove(&buffer) {
            buffer.destroy();
        }
    }

    // ===== Connection =====

    fn flush(&self) -> Result<(), DisplayError> {
        self.connection.flush().map_err(map_wayland_error)
    }

    fn prepare_read(
        &self,
        channel: ChannelId,
    ) -> Result<Option<Box<dyn PreparedRead + '_>>, DisplayError> {
        if self.dispatch_main()? > 0 {
            return Ok(None);
        }
        let channel = self.channel(channel)?;
        let guard = channel.queue.lock().queue.prepare_read();
        Ok(guard.map(|guard| Box::new(WaylandRead { guard }) as Box<dyn PreparedRead>))
    }

    fn dispatch_pending(&self, channel: ChannelId) -> Result<usize, DisplayError> {
        let channel = self.channel(channel)?;
        let dispatched = {
            let mut channel_queue = channel.queue.lock();
            let ChannelQueue { queue, state } = &mut *channel_queue;
            queue.dispatch_pending(state).map_err(map_dispatch_error)?
        };
        Ok(dispatched + self.dispatch_main()?)
    }

    fn roundtrip(&self, channel: ChannelId) -> Result<usize, DisplayError> {
        let channel = self.channel(channel)?;
        let dispatched = {
            let mut channel_queue = channel.queue.lock();
            let ChannelQueue { queue, state } = &mut *channel_queue;
            queue.roundtrip(state).map_err(map_dispatch_error)?
        };
        Ok(dispatched + self.dispatch_main()?)
    }

    fn poll_fd(&self) -> RawFd {
        self.connection.backend().poll_fd().as_raw_fd()
    }
}

/// Pending read on the connection socket.
struct WaylandRead {
    guard: ReadEventsGuard,
}

impl PreparedRead for WaylandRead {
    fn read(self: Box<Self>) -> Result<usize, DisplayError> {
        self.guard.read().map_err(map_wayland_error)
    }
}

// ============================================================================
// Dispatch
// ============================================================================

impl Dispatch<wl_registry::WlRegistry, GlobalListContents> for QueueState {
    fn event(
        _: &mut Self,
        _: &wl_registry::WlRegistry,
        event: wl_registry::Event,
        _: &GlobalListContents,
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        if let wl_registry::Event::GlobalRemove { name } = event {
            tracing::debug!(target: logging::DISPLAY, "Global {} removed", name);
        }
    }
}

impl Dispatch<xdg_wm_base::XdgWmBase, ()> for QueueState {
    fn event(
        _: &mut Self,
        wm_base: &xdg_wm_base::XdgWmBase,
        event: xdg_wm_base::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        if let xdg_wm_base::Event::Ping { serial } = event {
            wm_base.pong(serial);
        }
    }
}

impl Dispatch<xdg_surface::XdgSurface, ShellData> for QueueState {
    fn event(
        state: &mut Self,
        _: &xdg_surface::XdgSurface,
        event: xdg_surface::Event,
        data: &ShellData,
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        if let xdg_surface::Event::Configure { serial } = event {
            state.delivered += 1;
            let mut listener = data.listener.lock();
            (*listener)(data.id, ShellSurfaceEvent::Configure { serial });
        }
    }
}

impl Dispatch<wl_shell_surface::WlShellSurface, ShellData> for QueueState {
    fn event(
        state: &mut Self,
        _: &wl_shell_surface::WlShellSurface,
        event: wl_shell_surface::Event,
        data: &ShellData,
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        if let wl_shell_surface::Event::Ping { serial } = event {
            state.delivered += 1;
            let mut listener = data.listener.lock();
            (*listener)(data.id, ShellSurfaceEvent::Ping { serial });
        }
    }
}

fn toplevel_states(raw: &[u8]) -> Vec<ToplevelState> {
    raw.chunks_exact(4)
        .map(|chunk| u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .map(|state| match state {
            1 => ToplevelState::Maximized,
            2 => ToplevelState::Fullscreen,
            3 => ToplevelState::Resizing,
            4 => ToplevelState::Activated,
            other => ToplevelState::Other(other),
        })
        .collect()
}

impl Dispatch<xdg_toplevel::XdgToplevel, ToplevelData> for QueueState {
    fn event(
        state: &mut Self,
        _: &xdg_toplevel::XdgToplevel,
        event: xdg_toplevel::Event,
        data: &ToplevelData,
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        let event = match event {
            xdg_toplevel::Event::Configure { width, height, states } => ToplevelEvent::Configure {
                width,
                height,
                states: toplevel_states(&states),
            },
            xdg_toplevel::Event::Close => ToplevelEvent::Close,
            _ => return,
        };
        state.delivered += 1;
        let mut listener = data.listener.lock();
        (*listener)(data.id, event);
    }
}

impl Dispatch<wl_callback::WlCallback, FrameData> for QueueState {
    fn event(
        state: &mut Self,
        _: &wl_callback::WlCallback,
        event: wl_callback::Event,
        data: &FrameData,
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        if let wl_callback::Event::Done { callback_data } = event {
            if let Some(listener) = data.listener.lock().take() {
                state.delivered += 1;
                listener(callback_data);
            }
        }
    }
}

impl Dispatch<wl_buffer::WlBuffer, BufferData> for QueueState {
    fn event(
        state: &mut Self,
        _: &wl_buffer::WlBuffer,
        event: wl_buffer::Event,
        data: &BufferData,
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        if let wl_buffer::Event::Release = event {
            // Take the listener before calling it; it destroys the buffer.
            let listener = data.listener.lock().take();
            match listener {
                Some(listener) => {
                    state.delivered += 1;
                    listener(data.id);
                }
                None => crate::wlog!(logging::DISPLAY, "Release of untracked {}", data.id),
            }
        }
    }
}

delegate_noop!(QueueState: wl_compositor::WlCompositor);
delegate_noop!(QueueState: ignore wl_surface::WlSurface);
delegate_noop!(QueueState: wl_region::WlRegion);
delegate_noop!(QueueState: wl_shell::WlShell);
delegate_noop!(QueueState: ignore wl_shm::WlShm);
delegate_noop!(QueueState: wl_shm_pool::WlShmPool);
