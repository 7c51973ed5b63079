//! Window configuration

use crate::util::geometry::Size;

/// Configuration for a presentation window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowConfig {
    /// Initial width in pixels
    pub width: u32,
    /// Initial height in pixels
    pub height: u32,
    /// Toplevel title
    pub title: String,
    /// Application id for the toplevel, if any
    pub app_id: Option<String>,
    /// Request fullscreen once the window is shown
    pub fullscreen: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            title: "VA-API Wayland window".to_string(),
            app_id: None,
            fullscreen: false,
        }
    }
}

impl WindowConfig {
    /// Defaults overlaid with `VAPRESENT_SIZE=WxH` and `VAPRESENT_FULLSCREEN=1`.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(value) = std::env::var("VAPRESENT_SIZE") {
            match Size::parse(&value) {
                Some(size) => config = config.with_size(size.width, size.height),
                None => tracing::warn!("Ignoring invalid VAPRESENT_SIZE={:?}", value),
            }
        }

        if let Ok(value) = std::env::var("VAPRESENT_FULLSCREEN") {
            match value.trim() {
                "1" | "true" | "yes" => config.fullscreen = true,
                "0" | "false" | "no" | "" => config.fullscreen = false,
                other => tracing::warn!("Ignoring invalid VAPRESENT_FULLSCREEN={:?}", other),
            }
        }

        config
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = Some(app_id.into());
        self
    }

    pub fn with_fullscreen(mut self, fullscreen: bool) -> Self {
        self.fullscreen = fullscreen;
        self
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}
