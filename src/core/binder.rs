//! Turning video surfaces into displayable buffers.
//!
//! A surface is exported as is when it exactly fills the window. Otherwise,
//! or when the driver cannot export it directly, it goes through the
//! converter first. Once a window needed conversion it keeps converting.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::core::display::{BufferId, ChannelId, DisplayHandle};
use crate::core::errors::Result;
use crate::core::hardware::{HardwareBackend, PoolLease, RenderFlags, VideoSurface};
use crate::util::geometry::{Rect, Size};
use crate::util::logging;

/// A buffer ready to attach, plus what must outlive its display.
#[derive(Debug)]
pub struct BoundBuffer {
    pub buffer: BufferId,
    /// Extent to damage.
    pub width: u32,
    pub height: u32,
    /// Converted surface backing `buffer`, if conversion ran.
    pub source: Option<PoolLease>,
}

impl BoundBuffer {
    pub fn damage_rect(&self) -> Rect {
        Rect::new(0, 0, self.width, self.height)
    }
}

/// Decides between direct export and conversion for one window.
#[derive(Debug, Default)]
pub struct SurfaceBinder {
    needs_conversion: AtomicBool,
}

impl SurfaceBinder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn needs_conversion(&self) -> bool {
        self.needs_conversion.load(Ordering::Acquire)
    }

    fn latch(&self) {
        if !self.needs_conversion.swap(true, Ordering::AcqRel) {
            crate::wlog!(logging::BINDER, "Conversion required from now on");
        }
    }

    /// Whether the geometry alone rules out direct export.
    pub fn geometry_requires_conversion(
        native: Size,
        src: &Rect,
        dst: &Rect,
        window: Size,
    ) -> bool {
        !src.has_origin() || src.size() != native || !dst.has_origin() || dst.size() != window
    }

    /// Produce a buffer for `surface` cropped to `src` and placed at `dst`
    /// of a window currently sized `window`. The buffer is bound to the
    /// window's event `channel`. Exports run under the display lock;
    /// conversion does not.
    #[allow(clippy::too_many_arguments)]
    pub fn bind(
        &self,
        display: &DisplayHandle,
        channel: ChannelId,
        hardware: &dyn HardwareBackend,
        surface: &VideoSurface,
        src: &Rect,
        dst: &Rect,
        window: Size,
        flags: RenderFlags,
    ) -> Result<BoundBuffer> {
        let native = hardware.surface_size(surface);
        if Self::geometry_requires_conversion(native, src, dst, window) {
            self.latch();
        }

        if !self.needs_conversion() {
            let exported = {
                let _lock = display.lock();
                hardware.export_buffer(surface, channel, flags.fields())
            };
            match exported {
                Ok(buffer) => {
                    return Ok(BoundBuffer {
                        buffer,
                        width: native.width,
                        height: native.height,
                        source: None,
                    });
                }
                Err(err) if err.is_soft() => {
                    tracing::debug!(
                        target: logging::BINDER,
                        "Direct export of surface {} refused ({}), converting",
                        surface.id, err
                    );
                    self.latch();
                }
                Err(err) => {
                    tracing::error!(target: logging::BINDER, "Export of surface {} failed: {}", surface.id, err);
                    return Err(err.into());
                }
            }
        }

        // The latch stays set even when this call falls back to the
        // native surface.
        let mut target = *surface;
        let mut extent = native;
        let mut source = None;
        if hardware.has_converter() {
            match hardware.convert(surface, src, dst, window, flags) {
                Some(lease) => {
                    target = lease.surface();
                    extent = window;
                    source = Some(lease);
                }
                None => {
                    tracing::warn!(
                        target: logging::BINDER,
                        "Conversion of surface {} failed, showing it at native size",
                        surface.id
                    );
                }
            }
        }

        let exported = {
            let _lock = display.lock();
            hardware.export_buffer(&target, channel, RenderFlags::FRAME)
        };
        let buffer = exported.map_err(|err| {
            tracing::error!(target: logging::BINDER, "Export of surface {} failed: {}", target.id, err);
            err
        })?;

        Ok(BoundBuffer {
            buffer,
            width: extent.width,
            height: extent.height,
            source,
        })
    }
}
