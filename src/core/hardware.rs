//! Hardware video surface interface.
//!
//! A [`HardwareBackend`] turns decoded video surfaces into buffers the
//! compositor can import, and optionally converts (crops and scales) a
//! surface into one sized for the window. Converted surfaces come from a
//! [`SurfacePool`] and are handed out as a [`PoolLease`] that returns the
//! surface to its pool when dropped.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bitflags::bitflags;

use crate::core::display::{BufferId, ChannelId};
use crate::core::errors::ExportError;
use crate::util::geometry::{Rect, Size};

bitflags! {
    /// Per-frame rendering hints forwarded to the hardware backend.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RenderFlags: u32 {
        const TOP_FIELD = 1 << 0;
        const BOTTOM_FIELD = 1 << 1;
        const COLOR_BT601 = 1 << 4;
        const COLOR_BT709 = 1 << 5;
        const COLOR_SMPTE240M = 1 << 6;
    }
}

impl RenderFlags {
    /// Progressive frame (no field selection).
    pub const FRAME: Self = Self::empty();

    /// Only the field-selection bits.
    pub fn fields(self) -> Self {
        self & (Self::TOP_FIELD | Self::BOTTOM_FIELD)
    }
}

/// A decoded picture living in GPU memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VideoSurface {
    pub id: u32,
    pub width: u32,
    pub height: u32,
}

impl VideoSurface {
    pub const fn new(id: u32, width: u32, height: u32) -> Self {
        Self { id, width, height }
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

/// Owner of recyclable video surfaces.
pub trait SurfacePool: Send + Sync {
    /// Give a surface back for reuse.
    fn put(&self, surface: VideoSurface);
}

/// A surface borrowed from a pool.
///
/// The surface goes back to the pool exactly once, when the lease drops. A
/// lease can be moved into a frame record to defer that until the
/// compositor is done with the frame.
pub struct PoolLease {
    surface: VideoSurface,
    pool: Arc<dyn SurfacePool>,
}

impl PoolLease {
    pub fn new(surface: VideoSurface, pool: Arc<dyn SurfacePool>) -> Self {
        Self { surface, pool }
    }

    pub fn surface(&self) -> VideoSurface {
        self.surface
    }
}

impl Drop for PoolLease {
    fn drop(&mut self) {
        tracing::trace!(target: crate::util::logging::FRAME, "Returning surface {} to pool", self.surface.id);
        self.pool.put(self.surface);
    }
}

impl fmt::Debug for PoolLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolLease").field("surface", &self.surface).finish()
    }
}

/// Decode-side capabilities consumed by the surface binder.
pub trait HardwareBackend: Send + Sync {
    /// Native size of the surface's picture.
    fn surface_size(&self, surface: &VideoSurface) -> Size {
        surface.size()
    }

    /// Wrap the surface memory as a compositor buffer. The buffer's events
    /// must be delivered on `channel`.
    fn export_buffer(
        &self,
        surface: &VideoSurface,
        channel: ChannelId,
        flags: RenderFlags,
    ) -> Result<BufferId, ExportError>;

    /// Whether [`HardwareBackend::convert`] is available at all.
    fn has_converter(&self) -> bool;

    /// Crop `src` out of `surface` and scale it into `dst` of a new surface
    /// sized `target`. `None` is a soft failure.
    fn convert(
        &self,
        surface: &VideoSurface,
        src: &Rect,
        dst: &Rect,
        target: Size,
        flags: RenderFlags,
    ) -> Option<PoolLease>;
}

// ============================================================================
// Video Pool
// ============================================================================

/// Fixed-format pool of same-sized surfaces.
///
/// Surfaces are created lazily by the allocator passed to
/// [`VideoPool::acquire`] and recycled through [`SurfacePool::put`].
pub struct VideoPool {
    size: Size,
    free: Mutex<Vec<VideoSurface>>,
    outstanding: AtomicUsize,
}

impl VideoPool {
    pub fn new(size: Size) -> Arc<Self> {
        Arc::new(Self {
            size,
            free: Mutex::new(Vec::new()),
            outstanding: AtomicUsize::new(0),
        })
    }

    pub fn size(&self) -> Size {
        self.size
    }

    /// Lease a free surface, allocating one if none is idle.
    pub fn acquire<F>(self: &Arc<Self>, allocate: F) -> Option<PoolLease>
    where
        F: FnOnce(Size) -> Option<VideoSurface>,
    {
        let recycled = self.free.lock().unwrap_or_else(|e| e.into_inner()).pop();
        let surface = match recycled {
            Some(surface) => surface,
            None => allocate(self.size)?,
        };
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        let pool: Arc<dyn SurfacePool> = self.clone();
        Some(PoolLease::new(surface, pool))
    }

    /// Surfaces currently leased out.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Idle surfaces ready for reuse.
    pub fn available(&self) -> usize {
        self.free.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Take every idle surface out of the pool, e.g. to free them.
    pub fn drain(&self) -> Vec<VideoSurface> {
        std::mem::take(&mut *self.free.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

impl SurfacePool for VideoPool {
    fn put(&self, surface: VideoSurface) {
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
        self.free.lock().unwrap_or_else(|e| e.into_inner()).push(surface);
    }
}
