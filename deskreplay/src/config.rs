use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

/// Timing configuration for playback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Settle time after activating the window, before the first step
    pub activation_delay_ms: u64,

    /// Pause between moving the cursor and pressing a button
    pub cursor_settle_ms: u64,

    /// Gap between the two clicks of a double click
    pub double_click_gap_ms: u64,

    /// Pause after re-focusing the window and after pasting text
    pub text_settle_ms: u64,

    /// Activate the window again before each text step. When off, the
    /// window is activated only once, before the first step.
    pub refocus_before_text: bool,

    /// Spacing between characters when text is typed key by key
    pub char_interval_ms: u64,

    /// Longest single wait while paused before state is re-checked (max 100)
    pub pause_poll_ms: u64,

    /// Default bound for `stop_and_wait`
    pub stop_timeout_ms: u64,

    /// Capacity of the broadcast channel behind `event_stream`
    pub event_buffer: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            activation_delay_ms: 1000,
            cursor_settle_ms: 100,
            double_click_gap_ms: 50,
            text_settle_ms: 100,
            refocus_before_text: true,
            char_interval_ms: 10,
            pause_poll_ms: 100,
            stop_timeout_ms: 3000,
            event_buffer: 256,
        }
    }
}

impl PlaybackConfig {
    /// Configuration with every settle pause disabled, for headless use and tests
    pub fn immediate() -> Self {
        Self {
            activation_delay_ms: 0,
            cursor_settle_ms: 0,
            double_click_gap_ms: 0,
            text_settle_ms: 0,
            char_interval_ms: 0,
            ..Default::default()
        }
    }

    /// Load from a JSON file. Missing keys keep their defaults; an
    /// unreadable or malformed file yields the default configuration.
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                debug!(?path, error = %e, "No playback config, using defaults");
                return Self::default();
            }
        };
        match serde_json::from_str::<Self>(&text) {
            Ok(config) => config.sanitized(),
            Err(e) => {
                warn!(?path, error = %e, "Malformed playback config, using defaults");
                Self::default()
            }
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> crate::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    fn sanitized(mut self) -> Self {
        self.pause_poll_ms = self.pause_poll_ms.clamp(1, 100);
        self.event_buffer = self.event_buffer.max(1);
        self
    }

    pub fn pause_poll(&self) -> Duration {
        Duration::from_millis(self.pause_poll_ms.clamp(1, 100))
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

/// `None` for zero so callers skip the sleep entirely
pub(crate) fn millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}
