//! Rectangles and sizes shared by the window and the surface binder.

/// A rectangle in surface-local pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Rectangle anchored at the origin covering `size`.
    pub const fn from_size(size: Size) -> Self {
        Self::new(0, 0, size.width, size.height)
    }

    pub fn has_origin(&self) -> bool {
        self.x == 0 && self.y == 0
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Width and height in pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Parse `WxH` (e.g. `1280x720`).
    pub fn parse(text: &str) -> Option<Self> {
        let (w, h) = text.trim().split_once(['x', 'X'])?;
        let size = Self::new(w.trim().parse().ok()?, h.trim().parse().ok()?);
        (!size.is_empty()).then_some(size)
    }
}

impl std::fmt::Display for Size {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_origin_and_size() {
        let rect = Rect::new(0, 0, 640, 480);
        assert!(rect.has_origin());
        assert_eq!(rect.size(), Size::new(640, 480));

        let offset = Rect::new(4, 0, 640, 480);
        assert!(!offset.has_origin());
    }

    #[test]
    fn test_size_parse() {
        assert_eq!(Size::parse("1280x720"), Some(Size::new(1280, 720)));
        assert_eq!(Size::parse(" 320 X 240 "), Some(Size::new(320, 240)));
        assert_eq!(Size::parse("0x240"), None);
        assert_eq!(Size::parse("wide"), None);
    }
}
