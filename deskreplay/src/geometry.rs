//! Screen / window-relative coordinate mapping.

use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::platforms::WindowBinding;

/// Screen-space bounding box of a window's client area
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClientRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl ClientRect {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    /// Zero or negative extent on either axis
    pub fn is_degenerate(&self) -> bool {
        self.width() <= 0 || self.height() <= 0
    }
}

/// Integer pixel position on the screen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenPoint {
    pub x: i32,
    pub y: i32,
}

/// Translates between screen pixels and fractions of the bound window's
/// client rectangle.
///
/// `to_screen` queries the binding on every call because the window may
/// move or resize between steps. `to_relative` works from the last rectangle
/// seen, which is what capture tooling has at hand while recording.
pub struct CoordinateMapper {
    binding: Arc<dyn WindowBinding>,
    last_rect: Mutex<Option<ClientRect>>,
}

impl CoordinateMapper {
    pub fn new(binding: Arc<dyn WindowBinding>) -> Self {
        Self {
            binding,
            last_rect: Mutex::new(None),
        }
    }

    pub fn binding(&self) -> &Arc<dyn WindowBinding> {
        &self.binding
    }

    /// Query the binding and remember the rectangle for `to_relative`
    pub fn refresh(&self) -> Option<ClientRect> {
        let rect = self.binding.client_rect();
        if let Ok(mut last) = self.last_rect.lock() {
            if rect.is_some() {
                *last = rect;
            }
        }
        rect
    }

    pub fn last_rect(&self) -> Option<ClientRect> {
        self.last_rect.lock().ok().and_then(|last| *last)
    }

    /// Resolve a relative position against the live client rectangle.
    ///
    /// Coordinates truncate toward zero. When the binding reports no
    /// geometry the fractions are truncated as absolute pixels.
    pub fn to_screen(&self, rel_x: f64, rel_y: f64) -> ScreenPoint {
        match self.refresh() {
            Some(rect) => {
                let point = project(&rect, rel_x, rel_y);
                debug!(rel_x, rel_y, x = point.x, y = point.y, "Resolved screen position");
                point
            }
            None => {
                warn!(rel_x, rel_y, "No client rectangle available, using raw coordinates");
                ScreenPoint {
                    x: rel_x as i32,
                    y: rel_y as i32,
                }
            }
        }
    }

    /// Inverse of `to_screen` against the last known rectangle
    pub fn to_relative(&self, screen_x: i32, screen_y: i32) -> (f64, f64) {
        match self.last_rect() {
            Some(rect) => unproject(&rect, screen_x, screen_y),
            None => (screen_x as f64, screen_y as f64),
        }
    }
}

pub(crate) fn project(rect: &ClientRect, rel_x: f64, rel_y: f64) -> ScreenPoint {
    let x = rect.left as f64 + rel_x * rect.width() as f64;
    let y = rect.top as f64 + rel_y * rect.height() as f64;
    ScreenPoint {
        x: x as i32,
        y: y as i32,
    }
}

/// Degenerate rectangles yield the unscaled offset from the client origin
pub(crate) fn unproject(rect: &ClientRect, screen_x: i32, screen_y: i32) -> (f64, f64) {
    let dx = (screen_x - rect.left) as f64;
    let dy = (screen_y - rect.top) as f64;
    if rect.is_degenerate() {
        return (dx, dy);
    }
    (dx / rect.width() as f64, dy / rect.height() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::FixedWindow;

    fn mapper(rect: ClientRect) -> (CoordinateMapper, FixedWindow) {
        let window = FixedWindow::new(rect);
        (CoordinateMapper::new(Arc::new(window.clone())), window)
    }

    #[test]
    fn test_center_of_client_area() {
        let (mapper, _) = mapper(ClientRect::new(100, 100, 500, 300));
        assert_eq!(mapper.to_screen(0.5, 0.5), ScreenPoint { x: 300, y: 200 });
        assert_eq!(mapper.to_screen(0.0, 0.0), ScreenPoint { x: 100, y: 100 });
        assert_eq!(mapper.to_screen(1.0, 1.0), ScreenPoint { x: 500, y: 300 });
    }

    #[test]
    fn test_truncates_instead_of_rounding() {
        let (mapper, _) = mapper(ClientRect::new(0, 0, 10, 10));
        // 0.99 * 10 = 9.9 -> 9
        assert_eq!(mapper.to_screen(0.99, 0.99), ScreenPoint { x: 9, y: 9 });
    }

    #[test]
    fn test_screen_then_relative_recovers_fraction() {
        let (mapper, _) = mapper(ClientRect::new(100, 100, 500, 300));
        let point = mapper.to_screen(0.25, 0.75);
        let (rx, ry) = mapper.to_relative(point.x, point.y);
        assert!((rx - 0.25).abs() < 1e-9);
        assert!((ry - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_geometry_is_requeried_every_call() {
        let (mapper, window) = mapper(ClientRect::new(0, 0, 100, 100));
        assert_eq!(mapper.to_screen(0.5, 0.5), ScreenPoint { x: 50, y: 50 });

        window.set_rect(ClientRect::new(200, 200, 400, 600));
        assert_eq!(mapper.to_screen(0.5, 0.5), ScreenPoint { x: 300, y: 400 });
        assert_eq!(mapper.last_rect(), Some(ClientRect::new(200, 200, 400, 600)));
    }

    #[test]
    fn test_relative_without_known_rect_passes_through() {
        let (mapper, _) = mapper(ClientRect::new(100, 100, 500, 300));
        assert_eq!(mapper.to_relative(640, 480), (640.0, 480.0));
    }

    #[test]
    fn test_zero_size_rect_does_not_divide() {
        let (mapper, _) = mapper(ClientRect::new(50, 60, 50, 60));
        assert_eq!(mapper.to_screen(0.5, 0.5), ScreenPoint { x: 50, y: 60 });
        let (rx, ry) = mapper.to_relative(70, 65);
        assert_eq!((rx, ry), (20.0, 5.0));
        assert!(rx.is_finite() && ry.is_finite());
    }
}
