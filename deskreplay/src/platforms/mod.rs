use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::info;

use crate::errors::{InputError, PlaybackError};
use crate::geometry::ClientRect;

#[cfg(feature = "native-input")]
pub mod native;

/// The target window playback is bound to.
///
/// Window enumeration and binding live outside this crate; the engine only
/// reads geometry and liveness through this trait and activates the window
/// once per session.
pub trait WindowBinding: Send + Sync {
    /// Whether the bound window still exists
    fn is_valid(&self) -> bool;

    /// Current client-area rectangle in screen coordinates
    fn client_rect(&self) -> Option<ClientRect>;

    /// Bring the window to the foreground
    fn activate(&self);
}

/// Mouse buttons the engine can press
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MouseButton {
    Left,
    Right,
}

/// The OS input-injection primitive.
///
/// Implementations are called from the session worker thread only, one
/// operation at a time.
pub trait InputDevice: Send + Sync {
    fn move_cursor(&self, x: i32, y: i32) -> Result<(), InputError>;

    fn press(&self, button: MouseButton) -> Result<(), InputError>;

    fn release(&self, button: MouseButton) -> Result<(), InputError>;

    /// Press and release
    fn click(&self, button: MouseButton) -> Result<(), InputError> {
        self.press(button)?;
        self.release(button)
    }

    /// Put `text` on the clipboard and send the paste chord to the focused window
    fn paste_text(&self, text: &str) -> Result<(), InputError>;

    /// Synthesize one character. `Ok(false)` means the character has no
    /// key mapping on this device and nothing was sent.
    fn type_char(&self, ch: char) -> Result<bool, InputError>;
}

/// A binding over a constant rectangle, e.g. a whole monitor.
///
/// Clones share state, so a test or a host application can move the
/// rectangle or invalidate the window while a session is running.
#[derive(Debug, Clone)]
pub struct FixedWindow {
    rect: Arc<Mutex<Option<ClientRect>>>,
    valid: Arc<AtomicBool>,
    activations: Arc<AtomicUsize>,
}

impl FixedWindow {
    pub fn new(rect: ClientRect) -> Self {
        Self {
            rect: Arc::new(Mutex::new(Some(rect))),
            valid: Arc::new(AtomicBool::new(true)),
            activations: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A binding that never reports geometry (absolute-pixel mode)
    pub fn without_geometry() -> Self {
        let window = Self::new(ClientRect::default());
        if let Ok(mut rect) = window.rect.lock() {
            *rect = None;
        }
        window
    }

    pub fn set_rect(&self, rect: ClientRect) {
        if let Ok(mut current) = self.rect.lock() {
            *current = Some(rect);
        }
    }

    pub fn invalidate(&self) {
        self.valid.store(false, Ordering::SeqCst);
    }

    /// Number of times `activate` has been called
    pub fn activations(&self) -> usize {
        self.activations.load(Ordering::SeqCst)
    }
}

impl WindowBinding for FixedWindow {
    fn is_valid(&self) -> bool {
        self.valid.load(Ordering::SeqCst)
    }

    fn client_rect(&self) -> Option<ClientRect> {
        self.rect.lock().ok().and_then(|rect| *rect)
    }

    fn activate(&self) {
        self.activations.fetch_add(1, Ordering::SeqCst);
    }
}

/// Device that only logs what it would do
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunDevice;

impl InputDevice for DryRunDevice {
    fn move_cursor(&self, x: i32, y: i32) -> Result<(), InputError> {
        info!(x, y, "[dry-run] move cursor");
        Ok(())
    }

    fn press(&self, button: MouseButton) -> Result<(), InputError> {
        info!(?button, "[dry-run] press");
        Ok(())
    }

    fn release(&self, button: MouseButton) -> Result<(), InputError> {
        info!(?button, "[dry-run] release");
        Ok(())
    }

    fn paste_text(&self, text: &str) -> Result<(), InputError> {
        info!(chars = text.chars().count(), "[dry-run] paste text");
        Ok(())
    }

    fn type_char(&self, ch: char) -> Result<bool, InputError> {
        info!(?ch, "[dry-run] type char");
        Ok(true)
    }
}

/// Create the input device for the current build.
///
/// With the `native-input` feature this is the rdev/arboard backend unless
/// `dry_run` is set; otherwise it is always the logging device.
pub fn create_device(dry_run: bool) -> Result<Arc<dyn InputDevice>, PlaybackError> {
    if dry_run {
        return Ok(Arc::new(DryRunDevice));
    }
    #[cfg(feature = "native-input")]
    {
        Ok(Arc::new(native::NativeDevice::new()?))
    }
    #[cfg(not(feature = "native-input"))]
    {
        tracing::warn!("Built without the `native-input` feature, falling back to the dry-run device");
        Ok(Arc::new(DryRunDevice))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_window_clones_share_state() {
        let window = FixedWindow::new(ClientRect::new(0, 0, 10, 10));
        let other = window.clone();

        other.set_rect(ClientRect::new(5, 5, 15, 15));
        other.activate();
        other.invalidate();

        assert_eq!(window.client_rect(), Some(ClientRect::new(5, 5, 15, 15)));
        assert_eq!(window.activations(), 1);
        assert!(!window.is_valid());
    }

    #[test]
    fn test_window_without_geometry_reports_none() {
        let window = FixedWindow::without_geometry();
        assert!(window.is_valid());
        assert_eq!(window.client_rect(), None);
    }

    #[test]
    fn test_dry_run_device_accepts_everything() {
        let device = DryRunDevice;
        assert!(device.move_cursor(1, 2).is_ok());
        assert!(device.click(MouseButton::Right).is_ok());
        assert!(device.paste_text("abc").is_ok());
        assert!(device.type_char('é').unwrap());
    }
}
