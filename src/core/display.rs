//! Display connection interface.
//!
//! The presentation core never talks to the compositor socket directly. It
//! drives a [`DisplayConnection`], which owns the protocol objects and hands
//! out typed ids for them. Events are delivered through listener closures
//! registered at object creation; they run on whichever thread dispatches
//! the object's event channel.

use std::fmt;
use std::ops::Deref;
use std::os::unix::io::RawFd;
use std::sync::{Arc, Weak};

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

use crate::core::errors::DisplayError;
use crate::util::geometry::Rect;

macro_rules! object_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl $name {
            pub fn raw(self) -> u32 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", stringify!($name), self.0)
            }
        }
    };
}

object_id!(
    /// Private event queue bound to a subset of the connection's objects.
    ChannelId
);
object_id!(
    /// Compositor-side drawable (`wl_surface`).
    SurfaceId
);
object_id!(
    /// Region hint object (`wl_region`).
    RegionId
);
object_id!(
    /// Displayable buffer (`wl_buffer`).
    BufferId
);
object_id!(
    /// Frame completion token (`wl_callback`).
    CallbackId
);
object_id!(
    /// Shell role object: `xdg_surface` on the modern path,
    /// `wl_shell_surface` on the legacy one.
    ShellSurfaceId
);
object_id!(
    /// Top-level window object (`xdg_toplevel`).
    ToplevelId
);

/// Shell protocol family offered by the compositor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellKind {
    /// `xdg_wm_base`: explicit toplevel promotion and configure/ack handshake.
    Modern,
    /// `wl_shell`: immediately toplevel, ping/pong keep-alive.
    Legacy,
}

/// Events for a shell role object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellSurfaceEvent {
    /// Must be acknowledged for the compositor to consider the surface live.
    Configure { serial: u32 },
    /// Legacy keep-alive, answered with a pong.
    Ping { serial: u32 },
}

/// Window states reported alongside a toplevel configure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToplevelState {
    Maximized,
    Fullscreen,
    Resizing,
    Activated,
    Other(u32),
}

/// Events for a top-level window object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToplevelEvent {
    /// Suggested size; zero means "client decides".
    Configure {
        width: i32,
        height: i32,
        states: Vec<ToplevelState>,
    },
    Close,
}

/// Invoked once with the presentation timestamp in milliseconds.
pub type FrameListener = Box<dyn FnOnce(u32) + Send>;
/// Invoked once when the compositor no longer reads the buffer.
pub type ReleaseListener = Box<dyn FnOnce(BufferId) + Send>;
pub type ShellListener = Box<dyn FnMut(ShellSurfaceId, ShellSurfaceEvent) + Send>;
pub type ToplevelListener = Box<dyn FnMut(ToplevelId, ToplevelEvent) + Send>;

/// A read intent registered on an event channel.
///
/// Dropping the guard without calling [`PreparedRead::read`] cancels the
/// read so that other readers of the connection are not starved.
pub trait PreparedRead {
    /// Read whatever the socket holds and queue it on the owning channels.
    fn read(self: Box<Self>) -> Result<usize, DisplayError>;
}

/// Compositor connection consumed by presentation windows.
///
/// Requests that cannot fail at the call site (the protocol reports errors
/// asynchronously) return nothing; requests that allocate objects return
/// their id. Destroying an unknown id is a no-op.
pub trait DisplayConnection: Send + Sync {
    // ===== Capabilities =====

    /// Whether a `wl_compositor` global is bound.
    fn has_compositor(&self) -> bool;

    /// Preferred shell protocol, or `None` if the compositor offers neither.
    fn shell_kind(&self) -> Option<ShellKind>;

    // ===== Object lifecycle =====

    fn create_event_channel(&self) -> Result<ChannelId, DisplayError>;
    fn destroy_event_channel(&self, channel: ChannelId);

    fn create_surface(&self, channel: ChannelId) -> Result<SurfaceId, DisplayError>;
    fn destroy_surface(&self, surface: SurfaceId);

    fn create_region(&self) -> Result<RegionId, DisplayError>;
    fn region_add(&self, region: RegionId, rect: Rect);
    fn destroy_region(&self, region: RegionId);

    // ===== Modern shell =====

    fn get_shell_surface(
        &self,
        surface: SurfaceId,
        channel: ChannelId,
        listener: ShellListener,
    ) -> Result<ShellSurfaceId, DisplayError>;
    fn ack_configure(&self, shell_surface: ShellSurfaceId, serial: u32);
    fn destroy_shell_surface(&self, shell_surface: ShellSurfaceId);

    fn promote_to_toplevel(
        &self,
        shell_surface: ShellSurfaceId,
        channel: ChannelId,
        listener: ToplevelListener,
    ) -> Result<ToplevelId, DisplayError>;
    fn set_title(&self, toplevel: ToplevelId, title: &str);
    fn set_app_id(&self, toplevel: ToplevelId, app_id: &str);
    fn set_fullscreen(&self, toplevel: ToplevelId, fullscreen: bool);
    fn destroy_toplevel(&self, toplevel: ToplevelId);

    // ===== Legacy shell =====

    fn get_legacy_shell_surface(
        &self,
        surface: SurfaceId,
        channel: ChannelId,
        listener: ShellListener,
    ) -> Result<ShellSurfaceId, DisplayError>;
    fn legacy_pong(&self, shell_surface: ShellSurfaceId, serial: u32);
    fn legacy_set_toplevel(&self, shell_surface: ShellSurfaceId);
    /// Fullscreen with the "scale" method on the default output.
    fn legacy_set_fullscreen(&self, shell_surface: ShellSurfaceId);

    // ===== Surface requests =====

    fn attach(&self, surface: SurfaceId, buffer: Option<BufferId>, x: i32, y: i32);
    fn damage(&self, surface: SurfaceId, rect: Rect);
    fn set_opaque_region(&self, surface: SurfaceId, region: Option<RegionId>);
    fn frame(
        &self,
        surface: SurfaceId,
        channel: ChannelId,
        listener: FrameListener,
    ) -> Result<CallbackId, DisplayError>;
    fn destroy_callback(&self, callback: CallbackId);
    fn commit(&self, surface: SurfaceId);

    // ===== Buffers =====

    fn set_buffer_listener(
        &self,
        buffer: BufferId,
        channel: ChannelId,
        listener: ReleaseListener,
    ) -> Result<(), DisplayError>;
    fn destroy_buffer(&self, buffer: BufferId);

    // ===== Connection =====

    fn flush(&self) -> Result<(), DisplayError>;

    /// Announce an intent to read for `channel`.
    ///
    /// Returns `Ok(None)` when events are already queued for the channel;
    /// dispatch them and try again.
    fn prepare_read(&self, channel: ChannelId)
        -> Result<Option<Box<dyn PreparedRead + '_>>, DisplayError>;

    fn dispatch_pending(&self, channel: ChannelId) -> Result<usize, DisplayError>;

    /// Flush, then block until the compositor has processed every request
    /// sent so far, dispatching `channel` along the way.
    fn roundtrip(&self, channel: ChannelId) -> Result<usize, DisplayError>;

    /// Descriptor that becomes readable when the compositor sends events.
    fn poll_fd(&self) -> RawFd;
}

/// Lock serializing every use of a display connection.
pub type DisplayLock = Arc<ReentrantMutex<()>>;

/// A display connection paired with the lock its users agree on.
///
/// Windows sharing one connection should share one lock; use
/// [`DisplayHandle::with_lock`] when the lock is owned elsewhere. The lock is
/// re-entrant because configure listeners may issue requests while the
/// dispatching thread already holds it.
#[derive(Clone)]
pub struct DisplayHandle {
    connection: Arc<dyn DisplayConnection>,
    lock: DisplayLock,
}

impl DisplayHandle {
    pub fn new(connection: Arc<dyn DisplayConnection>) -> Self {
        Self::with_lock(connection, Arc::new(ReentrantMutex::new(())))
    }

    pub fn with_lock(connection: Arc<dyn DisplayConnection>, lock: DisplayLock) -> Self {
        Self { connection, lock }
    }

    pub fn lock(&self) -> ReentrantMutexGuard<'_, ()> {
        self.lock.lock()
    }

    pub fn connection(&self) -> &Arc<dyn DisplayConnection> {
        &self.connection
    }

    /// Handle for listeners stored inside the connection itself, so they
    /// do not keep it alive.
    pub fn downgrade(&self) -> WeakDisplayHandle {
        WeakDisplayHandle {
            connection: Arc::downgrade(&self.connection),
            lock: self.lock.clone(),
        }
    }
}

/// Non-owning counterpart of [`DisplayHandle`].
#[derive(Clone)]
pub struct WeakDisplayHandle {
    connection: Weak<dyn DisplayConnection>,
    lock: DisplayLock,
}

impl WeakDisplayHandle {
    pub fn upgrade(&self) -> Option<DisplayHandle> {
        self.connection
            .upgrade()
            .map(|connection| DisplayHandle::with_lock(connection, self.lock.clone()))
    }
}

impl Deref for DisplayHandle {
    type Target = dyn DisplayConnection;

    fn deref(&self) -> &Self::Target {
        &*self.connection
    }
}

impl fmt::Debug for DisplayHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisplayHandle")
            .field("compositor", &self.connection.has_compositor())
            .field("shell", &self.connection.shell_kind())
            .finish()
    }
}
