pub mod errors;
pub mod display;
pub mod hardware;
pub mod frame;
pub mod sync;
pub mod binder;
pub mod window;

// Re-export key types
pub use display::{DisplayConnection, DisplayHandle, ShellKind};
pub use errors::{PresentError, Result};
pub use hardware::{HardwareBackend, RenderFlags, VideoSurface};
pub use window::{FrameOutcome, PresentationWindow, VideoWindow, WindowEvent};
