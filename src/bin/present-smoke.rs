//! Presentation smoke test - renders a moving test pattern into a window.
//! Run with: cargo run --bin present-smoke -- [--frames N] [--fullscreen] [--scale WxH]
//!
//! `--scale` sets the size of the decoded surfaces; when it differs from
//! the window size every frame goes through the converter.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};

use vapresent::backend::{ShmSurfaces, WaylandDisplay};
use vapresent::core::display::{DisplayConnection, DisplayHandle};
use vapresent::core::hardware::{HardwareBackend, RenderFlags};
use vapresent::util::geometry::{Rect, Size};
use vapresent::util::logging;
use vapresent::{FrameOutcome, PresentationWindow, WindowConfig, WindowEvent};

const DEFAULT_FRAMES: u32 = 300;

struct Args {
    frames: u32,
    fullscreen: bool,
    scale: Option<Size>,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        frames: DEFAULT_FRAMES,
        fullscreen: false,
        scale: None,
    };

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--frames" => {
                let value = iter.next().context("--frames needs a value")?;
                args.frames = value
                    .parse()
                    .with_context(|| format!("invalid frame count {:?}", value))?;
            }
            "--fullscreen" => args.fullscreen = true,
            "--scale" => {
                let value = iter.next().context("--scale needs a value")?;
                match Size::parse(&value) {
                    Some(size) if !size.is_empty() => args.scale = Some(size),
                    _ => bail!("invalid surface size {:?}, expected WxH", value),
                }
            }
            other => bail!("unknown argument {:?}", other),
        }
    }
    Ok(args)
}

fn main() -> Result<()> {
    logging::init();
    let args = parse_args()?;

    let mut config = WindowConfig::from_env().with_app_id("org.vapresent.smoke");
    if args.fullscreen {
        config = config.with_fullscreen(true);
    }

    let wayland = WaylandDisplay::connect()?;
    let surfaces = Arc::new(ShmSurfaces::new(wayland.clone()));
    let connection: Arc<dyn DisplayConnection> = wayland;
    let display = DisplayHandle::new(connection);

    let closed = Arc::new(AtomicBool::new(false));
    let sink = {
        let closed = closed.clone();
        Arc::new(move |event: WindowEvent| match event {
            WindowEvent::SizeChanged { width, height } => {
                tracing::info!("Window resized to {}x{}", width, height);
            }
            WindowEvent::CloseRequested => closed.store(true, Ordering::Release),
        })
    };

    let hardware: Arc<dyn HardwareBackend> = surfaces.clone();
    let window = PresentationWindow::create(display, hardware, config, Some(sink))?;
    window.show()?;

    let surface_size = args.scale.unwrap_or_else(|| window.size());
    let surface = surfaces.create_surface(surface_size);
    tracing::info!(
        "Rendering {} frames of {} into a {} window",
        args.frames,
        surface_size,
        window.size()
    );

    let start = Instant::now();
    let (mut presented, mut dropped) = (0u32, 0u32);
    for frame in 0..args.frames {
        if closed.load(Ordering::Acquire) {
            tracing::info!("Window closed after {} frames", frame);
            break;
        }
        surfaces.fill_test_pattern(&surface, frame);
        let src = Rect::from_size(surface.size());
        let dst = Rect::from_size(window.size());
        match window.render(&surface, &src, &dst, RenderFlags::FRAME)? {
            FrameOutcome::Presented => presented += 1,
            FrameOutcome::Dropped => dropped += 1,
        }
    }

    let elapsed = start.elapsed().as_secs_f64();
    tracing::info!(
        "Presented {} frames, dropped {}, {:.1} fps, conversion={}",
        presented,
        dropped,
        if elapsed > 0.0 { presented as f64 / elapsed } else { 0.0 },
        window.needs_conversion()
    );

    drop(window);
    surfaces.destroy_surface(&surface);
    Ok(())
}
