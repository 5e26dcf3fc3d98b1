use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::{broadcast, mpsc};
use tracing::trace;

/// How a playback session ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackOutcome {
    /// Every step ran successfully
    Completed,

    /// `stop()` was requested
    UserStopped,

    /// The bound window disappeared before a step could run
    WindowLost,

    /// A step's input dispatch failed; `index` is 1-based
    StepFailed { index: usize, reason: String },
}

impl PlaybackOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, PlaybackOutcome::Completed)
    }
}

impl fmt::Display for PlaybackOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaybackOutcome::Completed => write!(f, "playback completed"),
            PlaybackOutcome::UserStopped => write!(f, "playback stopped by user"),
            PlaybackOutcome::WindowLost => write!(f, "target window is no longer valid"),
            PlaybackOutcome::StepFailed { index, reason } => {
                write!(f, "step {} failed: {}", index, reason)
            }
        }
    }
}

/// Notifications emitted by a session, in order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PlaybackEvent {
    /// A step finished; `index` is 1-based
    StepCompleted {
        index: usize,
        success: bool,
        message: String,
    },

    /// Share of steps done, 0..=100
    Progress { percent: u8 },

    /// Terminal event, always the last one of a session
    Finished {
        success: bool,
        message: String,
        outcome: PlaybackOutcome,
    },
}

impl PlaybackEvent {
    pub fn is_finished(&self) -> bool {
        matches!(self, PlaybackEvent::Finished { .. })
    }
}

/// An event tagged with the session that produced it, as seen by observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    pub session: u64,
    pub event: PlaybackEvent,
}

/// Delivers a session's events to its handle and to engine observers
pub(crate) struct EventSink {
    session: u64,
    handle_tx: mpsc::UnboundedSender<PlaybackEvent>,
    observers: broadcast::Sender<SessionEvent>,
}

impl EventSink {
    pub(crate) fn new(
        session: u64,
        handle_tx: mpsc::UnboundedSender<PlaybackEvent>,
        observers: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            session,
            handle_tx,
            observers,
        }
    }

    pub(crate) fn emit(&self, event: PlaybackEvent) {
        // No subscribers is not an error
        let _ = self.observers.send(SessionEvent {
            session: self.session,
            event: event.clone(),
        });
        if self.handle_tx.send(event).is_err() {
            trace!(session = self.session, "Session handle dropped, event discarded");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_completed_is_success() {
        assert!(PlaybackOutcome::Completed.is_success());
        assert!(!PlaybackOutcome::UserStopped.is_success());
        assert!(!PlaybackOutcome::WindowLost.is_success());
        assert!(!PlaybackOutcome::StepFailed {
            index: 2,
            reason: "boom".into()
        }
        .is_success());
    }

    #[test]
    fn test_failure_message_names_the_step() {
        let outcome = PlaybackOutcome::StepFailed {
            index: 3,
            reason: "device unplugged".into(),
        };
        assert_eq!(outcome.to_string(), "step 3 failed: device unplugged");
        assert!(PlaybackOutcome::UserStopped.to_string().contains("stopped by user"));
    }

    #[test]
    fn test_sink_feeds_handle_and_observers() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (btx, mut brx) = broadcast::channel(8);
        let sink = EventSink::new(7, tx, btx);

        sink.emit(PlaybackEvent::Progress { percent: 50 });

        assert_eq!(rx.try_recv().unwrap(), PlaybackEvent::Progress { percent: 50 });
        let observed = brx.try_recv().unwrap();
        assert_eq!(observed.session, 7);
        assert_eq!(observed.event, PlaybackEvent::Progress { percent: 50 });
    }

    #[test]
    fn test_sink_survives_dropped_receivers() {
        let (tx, rx) = mpsc::unbounded_channel();
        let (btx, _) = broadcast::channel(8);
        drop(rx);
        let sink = EventSink::new(1, tx, btx);
        sink.emit(PlaybackEvent::Progress { percent: 100 });
    }
}
