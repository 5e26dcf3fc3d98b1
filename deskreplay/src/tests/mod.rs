
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::errors::InputError;
use crate::geometry::ClientRect;
use crate::platforms::{FixedWindow, InputDevice, MouseButton, WindowBinding};
use crate::{PlaybackConfig, PlaybackEngine, PlaybackEvent, SessionHandle};

// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    // Several tests share the process; only the first install wins
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::DEBUG.into()))
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_test_writer()
        .try_init();
}

// Test constants
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// One call the engine made on the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceOp {
    Move(i32, i32),
    Press(MouseButton),
    Release(MouseButton),
    Paste(String),
    Key(char),
}

/// Device that logs every operation with a timestamp and can be told to fail
#[derive(Debug, Default)]
pub struct RecordingDevice {
    log: Mutex<Vec<(Instant, DeviceOp)>>,
    presses: AtomicUsize,
    fail_from_press: Mutex<Option<usize>>,
    panic_on_press: AtomicBool,
    fail_paste: AtomicBool,
    unmapped: Mutex<Vec<char>>,
}

impl RecordingDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every press numbered `n` (0-based, across the device lifetime) or later fails
    pub fn fail_clicks_from(&self, n: usize) {
        *self.fail_from_press.lock().unwrap() = Some(n);
    }

    pub fn panic_on_press(&self) {
        self.panic_on_press.store(true, Ordering::SeqCst);
    }

    pub fn fail_paste(&self) {
        self.fail_paste.store(true, Ordering::SeqCst);
    }

    pub fn unmapped(&self, ch: char) {
        self.unmapped.lock().unwrap().push(ch);
    }

    fn record(&self, op: DeviceOp) {
        self.log.lock().unwrap().push((Instant::now(), op));
    }

    pub fn ops(&self) -> Vec<DeviceOp> {
        self.log.lock().unwrap().iter().map(|(_, op)| op.clone()).collect()
    }

    pub fn moves(&self) -> Vec<(i32, i32)> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                DeviceOp::Move(x, y) => Some((x, y)),
                _ => None,
            })
            .collect()
    }

    pub fn clicks(&self, button: MouseButton) -> usize {
        self.ops()
            .iter()
            .filter(|op| **op == DeviceOp::Press(button))
            .count()
    }

    /// Timestamps of every button press, in order
    pub fn press_times(&self) -> Vec<Instant> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, op)| matches!(op, DeviceOp::Press(_)))
            .map(|(at, _)| *at)
            .collect()
    }

    pub fn typed(&self) -> String {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                DeviceOp::Key(ch) => Some(ch),
                _ => None,
            })
            .collect()
    }
}

impl InputDevice for RecordingDevice {
    fn move_cursor(&self, x: i32, y: i32) -> Result<(), InputError> {
        self.record(DeviceOp::Move(x, y));
        Ok(())
    }

    fn press(&self, button: MouseButton) -> Result<(), InputError> {
        if self.panic_on_press.load(Ordering::SeqCst) {
            panic!("simulated driver crash");
        }
        let n = self.presses.fetch_add(1, Ordering::SeqCst);
        if self.fail_from_press.lock().unwrap().is_some_and(|from| n >= from) {
            return Err(InputError::Simulate(format!("press #{} rejected", n)));
        }
        self.record(DeviceOp::Press(button));
        Ok(())
    }

    fn release(&self, button: MouseButton) -> Result<(), InputError> {
        self.record(DeviceOp::Release(button));
        Ok(())
    }

    fn paste_text(&self, text: &str) -> Result<(), InputError> {
        if self.fail_paste.load(Ordering::SeqCst) {
            return Err(InputError::Clipboard("clipboard locked".to_string()));
        }
        self.record(DeviceOp::Paste(text.to_string()));
        Ok(())
    }

    fn type_char(&self, ch: char) -> Result<bool, InputError> {
        if self.unmapped.lock().unwrap().contains(&ch) {
            return Ok(false);
        }
        self.record(DeviceOp::Key(ch));
        Ok(true)
    }
}

/// Window that disappears after a number of liveness checks
#[derive(Debug)]
pub struct MockWindow {
    inner: FixedWindow,
    checks: AtomicUsize,
    lose_after: Option<usize>,
}

impl MockWindow {
    pub fn new(rect: ClientRect) -> Self {
        Self {
            inner: FixedWindow::new(rect),
            checks: AtomicUsize::new(0),
            lose_after: None,
        }
    }

    /// `is_valid` answers `true` for the first `checks` calls only
    pub fn lost_after(rect: ClientRect, checks: usize) -> Self {
        Self {
            lose_after: Some(checks),
            ..Self::new(rect)
        }
    }

    pub fn activations(&self) -> usize {
        self.inner.activations()
    }
}

impl WindowBinding for MockWindow {
    fn is_valid(&self) -> bool {
        let n = self.checks.fetch_add(1, Ordering::SeqCst);
        self.lose_after.map_or(true, |limit| n < limit) && self.inner.is_valid()
    }

    fn client_rect(&self) -> Option<ClientRect> {
        self.inner.client_rect()
    }

    fn activate(&self) {
        self.inner.activate();
    }
}

pub fn test_rect() -> ClientRect {
    ClientRect::new(100, 100, 500, 300)
}

/// Engine with every settle pause disabled and a short poll interval
pub fn quick_engine(window: Arc<dyn WindowBinding>, device: Arc<RecordingDevice>) -> PlaybackEngine {
    let config = PlaybackConfig {
        pause_poll_ms: 10,
        ..PlaybackConfig::immediate()
    };
    PlaybackEngine::new(window, device, config)
}

/// Read events until `Finished`, failing the test after `TEST_TIMEOUT`
pub async fn collect_events(handle: &mut SessionHandle) -> Vec<PlaybackEvent> {
    let mut events = Vec::new();
    loop {
        let event = tokio::time::timeout(TEST_TIMEOUT, handle.next_event())
            .await
            .expect("timed out waiting for playback events")
            .expect("event channel closed before Finished");
        let finished = event.is_finished();
        events.push(event);
        if finished {
            return events;
        }
    }
}

pub fn step_indices(events: &[PlaybackEvent]) -> Vec<(usize, bool)> {
    events
        .iter()
        .filter_map(|event| match event {
            PlaybackEvent::StepCompleted { index, success, .. } => Some((*index, *success)),
            _ => None,
        })
        .collect()
}
