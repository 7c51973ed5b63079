// vapresent
//
// Presents hardware-decoded video surfaces in a Wayland window.
// The presentation core in core/ is written against the DisplayConnection
// and HardwareBackend traits; backend/ implements them with wayland-client
// and shared-memory buffers.

pub mod core;
pub mod backend;
pub mod config;
pub mod util;
pub mod prelude;

pub use crate::config::WindowConfig;
pub use crate::core::{FrameOutcome, PresentationWindow, VideoWindow, WindowEvent};

#[cfg(test)]
mod tests;
