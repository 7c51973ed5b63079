//! Common imports and types used throughout vapresent.

pub use std::sync::Arc;

pub use crate::config::WindowConfig;
pub use crate::core::display::{DisplayConnection, DisplayHandle};
pub use crate::core::hardware::{HardwareBackend, RenderFlags, VideoSurface};
pub use crate::core::window::{FrameOutcome, PresentationWindow, VideoWindow, WindowEvent};
pub use crate::util::geometry::{Rect, Size};

pub type Result<T> = std::result::Result<T, crate::core::errors::PresentError>;
