//! Software stand-in for a hardware decoder's surfaces.
//!
//! Surfaces are XRGB8888 images kept in process memory. Exporting one
//! copies it into a memfd and wraps that in a `wl_shm` buffer.
//! Conversion crops and scales with nearest-neighbour sampling into a
//! pooled surface of the window's size.
//!
//! Single-field flags are not exportable directly, which routes
//! interlaced content through the converter like a real driver would.

use std::collections::HashMap;
use std::ffi::CStr;
use std::fs::File;
use std::io::Write;
use std::os::unix::io::{AsFd, FromRawFd};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::wayland::WaylandDisplay;
use crate::core::display::{BufferId, ChannelId};
use crate::core::errors::{DisplayError, ExportError};
use crate::core::hardware::{HardwareBackend, PoolLease, RenderFlags, VideoPool, VideoSurface};
use crate::util::geometry::{Rect, Size};
use crate::util::logging;

const BYTES_PER_PIXEL: usize = 4;
const MEMFD_NAME: &CStr = c"vapresent-shm";

/// One XRGB8888 image.
#[derive(Debug, Clone)]
struct Image {
    size: Size,
    pixels: Vec<u32>,
}

impl Image {
    fn new(size: Size) -> Self {
        Self {
            size,
            pixels: vec![0; size.width as usize * size.height as usize],
        }
    }

    fn stride(&self) -> usize {
        self.size.width as usize * BYTES_PER_PIXEL
    }

    fn bytes(&self) -> Vec<u8> {
        self.pixels.iter().flat_map(|p| p.to_ne_bytes()).collect()
    }
}

fn memfd(len: usize) -> std::io::Result<File> {
    let fd = unsafe { libc::memfd_create(MEMFD_NAME.as_ptr(), libc::MFD_CLOEXEC) };
    if fd < 0 {
        return Err(std::io::Error::last_os_error());
    }
    let file = unsafe { File::from_raw_fd(fd) };
    file.set_len(len as u64)?;
    Ok(file)
}

/// Rows of `src` sampled for `flags`: every row for a frame, every other
/// row starting at the chosen parity for a single field.
fn field_rows(flags: RenderFlags) -> (u32, u32) {
    let fields = flags.fields();
    if fields == RenderFlags::TOP_FIELD {
        (0, 2)
    } else if fields == RenderFlags::BOTTOM_FIELD {
        (1, 2)
    } else {
        (0, 1)
    }
}

/// Nearest-neighbour blit of `src` of `from` into `dst` of `to`.
fn scale_into(from: &Image, src: &Rect, to: &mut Image, dst: &Rect, flags: RenderFlags) {
    to.pixels.fill(0);
    if src.is_empty() || dst.is_empty() {
        return;
    }

    let (first_row, row_step) = field_rows(flags);
    let rows = (src.height.saturating_sub(first_row) + row_step - 1) / row_step;
    if rows == 0 {
        return;
    }

    for dy in 0..dst.height {
        let ty = dst.y + dy as i32;
        if ty < 0 || ty as u32 >= to.size.height {
            continue;
        }
        let row = (dy as u64 * rows as u64 / dst.height as u64) as u32;
        let sy = src.y + (first_row + row * row_step) as i32;
        if sy < 0 || sy as u32 >= from.size.height {
            continue;
        }
        for dx in 0..dst.width {
            let tx = dst.x + dx as i32;
            if tx < 0 || tx as u32 >= to.size.width {
                continue;
            }
            let sx = src.x + (dx as u64 * src.width as u64 / dst.width as u64) as i32;
            if sx < 0 || sx as u32 >= from.size.width {
                continue;
            }
            let from_index = sy as usize * from.size.width as usize + sx as usize;
            let to_index = ty as usize * to.size.width as usize + tx as usize;
            to.pixels[to_index] = from.pixels[from_index];
        }
    }
}

// ============================================================================
// Shm Surfaces
// ============================================================================

pub struct ShmSurfaces {
    display: Arc<WaylandDisplay>,
    images: Mutex<HashMap<u32, Image>>,
    next_id: AtomicU32,
    converter: Mutex<Option<Arc<VideoPool>>>,
    converter_enabled: bool,
}

impl ShmSurfaces {
    pub fn new(display: Arc<WaylandDisplay>) -> Self {
        Self {
            display,
            images: Mutex::new(HashMap::new()),
            next_id: AtomicU32::new(1),
            converter: Mutex::new(None),
            converter_enabled: true,
        }
    }

    /// Disable the converter, so only directly exportable frames display.
    pub fn without_converter(mut self) -> Self {
        self.converter_enabled = false;
        self
    }

    /// Allocate a black surface.
    pub fn create_surface(&self, size: Size) -> VideoSurface {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.images.lock().insert(id, Image::new(size));
        crate::wlog!(logging::SHM, "Allocated surface {} ({})", id, size);
        VideoSurface::new(id, size.width, size.height)
    }

    pub fn destroy_surface(&self, surface: &VideoSurface) {
        self.images.lock().remove(&surface.id);
    }

    /// Paint moving colour bars, offset by `frame`.
    pub fn fill_test_pattern(&self, surface: &VideoSurface, frame: u32) {
        const BARS: [u32; 8] = [
            0x00ff_ffff, 0x00ff_ff00, 0x0000_ffff, 0x0000_ff00,
            0x00ff_00ff, 0x00ff_0000, 0x0000_00ff, 0x0000_0000,
        ];
        let mut images = self.images.lock();
        let Some(image) = images.get_mut(&surface.id) else {
            return;
        };
        let width = image.size.width.max(1) as usize;
        let bar_width = (width / BARS.len()).max(1);
        let shift = frame as usize * 4;
        for (index, pixel) in image.pixels.iter_mut().enumerate() {
            let x = (index % width + shift) % width;
            *pixel = BARS[(x / bar_width).min(BARS.len() - 1)];
        }
    }

    /// Surfaces currently allocated, pooled ones included.
    pub fn surface_count(&self) -> usize {
        self.images.lock().len()
    }

    fn pool_for(&self, size: Size) -> Arc<VideoPool> {
        let mut converter = self.converter.lock();
        if let Some(pool) = converter.as_ref().filter(|pool| pool.size() == size) {
            return pool.clone();
        }

        if let Some(old) = converter.take() {
            let mut images = self.images.lock();
            for surface in old.drain() {
                images.remove(&surface.id);
            }
            crate::wlog!(logging::SHM, "Dropped {} conversion pool", old.size());
        }
        let pool = VideoPool::new(size);
        *converter = Some(pool.clone());
        pool
    }

    fn upload(&self, image: &Image, channel: ChannelId) -> Result<BufferId, ExportError> {
        let bytes = image.bytes();
        let mut file = memfd(bytes.len()).map_err(|err| ExportError::failed(err.to_string()))?;
        file.write_all(&bytes)
            .map_err(|err| ExportError::failed(err.to_string()))?;

        let pool = self
            .display
            .create_shm_pool(file.as_fd(), bytes.len() as i32)
            .map_err(|err| match err {
                DisplayError::MissingGlobal(_) => ExportError::Unimplemented,
                other => ExportError::failed(other.to_string()),
            })?;
        let buffer = self.display.create_shm_buffer(
            &pool,
            channel,
            0,
            image.size.width as i32,
            image.size.height as i32,
            image.stride() as i32,
        );
        pool.destroy();
        buffer.map_err(|err| ExportError::failed(err.to_string()))
    }
}

impl HardwareBackend for ShmSurfaces {
    fn export_buffer(
        &self,
        surface: &VideoSurface,
        channel: ChannelId,
        flags: RenderFlags,
    ) -> Result<BufferId, ExportError> {
        if field_rows(flags).1 > 1 {
            return Err(ExportError::FlagNotSupported);
        }
        let image = self
            .images
            .lock()
            .get(&surface.id)
            .cloned()
            .ok_or_else(|| ExportError::failed(format!("unknown surface {}", surface.id)))?;
        self.upload(&image, channel)
    }

    fn has_converter(&self) -> bool {
        self.converter_enabled
    }

    fn convert(
        &self,
        surface: &VideoSurface,
        src: &Rect,
        dst: &Rect,
        target: Size,
        flags: RenderFlags,
    ) -> Option<PoolLease> {
        if target.is_empty() {
            return None;
        }
        let pool = self.pool_for(target);
        let lease = pool.acquire(|size| Some(self.create_surface(size)))?;

        let mut images = self.images.lock();
        let from = images.get(&surface.id)?.clone();
        let to = images.get_mut(&lease.surface().id)?;
        scale_into(&from, src, to, dst, flags);
        Some(lease)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(width: u32, height: u32) -> Image {
        let mut image = Image::new(Size::new(width, height));
        for (index, pixel) in image.pixels.iter_mut().enumerate() {
            *pixel = index as u32;
        }
        image
    }

    #[test]
    fn test_scale_identity() {
        let from = image(4, 4);
        let mut to = Image::new(Size::new(4, 4));
        let rect = Rect::new(0, 0, 4, 4);
        scale_into(&from, &rect, &mut to, &rect, RenderFlags::FRAME);
        assert_eq!(from.pixels, to.pixels);
    }

    #[test]
    fn test_scale_down_and_offset() {
        let from = image(4, 4);
        let mut to = Image::new(Size::new(4, 4));
        scale_into(
            &from,
            &Rect::new(0, 0, 4, 4),
            &mut to,
            &Rect::new(2, 2, 2, 2),
            RenderFlags::FRAME,
        );
        // Outside dst stays black.
        assert_eq!(to.pixels[0], 0);
        assert_eq!(to.pixels[2 * 4 + 2], from.pixels[0]);
        assert_eq!(to.pixels[3 * 4 + 3], from.pixels[2 * 4 + 2]);
    }

    #[test]
    fn test_bottom_field_samples_odd_rows() {
        let from = image(2, 4);
        let mut to = Image::new(Size::new(2, 2));
        scale_into(
            &from,
            &Rect::new(0, 0, 2, 4),
            &mut to,
            &Rect::new(0, 0, 2, 2),
            RenderFlags::BOTTOM_FIELD,
        );
        assert_eq!(to.pixels, vec![2, 3, 6, 7]);
    }
}
