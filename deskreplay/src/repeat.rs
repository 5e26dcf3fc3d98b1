//! Runs a whole step list several times with a pause between runs.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::engine::{PlaybackEngine, SessionControl};
use crate::errors::PlaybackError;
use crate::events::PlaybackOutcome;
use crate::step::{seconds, validate_steps, Step};

/// Final report of a repeat sequence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepeatSummary {
    /// Runs that finished with `Completed`
    pub completed: u32,
    pub target: u32,
    pub success: bool,
    pub message: String,
    /// Outcome of the last run attempted, if any
    pub last_outcome: Option<PlaybackOutcome>,
}

impl RepeatSummary {
    fn finished(completed: u32, target: u32) -> Self {
        Self {
            completed,
            target,
            success: true,
            message: format!("all runs completed ({} of {})", completed, target),
            last_outcome: Some(PlaybackOutcome::Completed),
        }
    }

    fn interrupted(completed: u32, target: u32, reason: &str, last: Option<PlaybackOutcome>) -> Self {
        Self {
            completed,
            target,
            success: false,
            message: format!("interrupted: {} (completed {} of {})", reason, completed, target),
            last_outcome: last,
        }
    }
}

struct RepeatShared {
    stopped: AtomicBool,
    finished: AtomicBool,
    completed: AtomicU32,
    cancel: watch::Sender<bool>,
    session: Mutex<Option<Arc<SessionControl>>>,
}

impl RepeatShared {
    fn new() -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            stopped: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            completed: AtomicU32::new(0),
            cancel,
            session: Mutex::new(None),
        }
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Stop the active run, cancel a pending interval and refuse further runs
    fn stop(&self) -> bool {
        let first = !self.stopped.swap(true, Ordering::SeqCst);
        self.cancel.send_replace(true);
        if let Some(session) = self.session.lock().unwrap_or_else(PoisonError::into_inner).as_ref() {
            session.stop();
        }
        first
    }

    fn set_session(&self, control: Option<Arc<SessionControl>>) {
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = control;
    }
}

/// Caller's view of a repeat sequence
pub struct RepeatHandle {
    target: u32,
    shared: Arc<RepeatShared>,
    summary: watch::Receiver<Option<RepeatSummary>>,
}

impl RepeatHandle {
    pub fn target(&self) -> u32 {
        self.target
    }

    /// Runs completed so far
    pub fn completed(&self) -> u32 {
        self.shared.completed.load(Ordering::SeqCst)
    }

    pub fn is_finished(&self) -> bool {
        self.shared.finished.load(Ordering::SeqCst)
    }

    /// Idempotent; returns `true` only for the first call
    pub fn stop(&self) -> bool {
        self.shared.stop()
    }

    pub fn summary(&self) -> Option<RepeatSummary> {
        self.summary.borrow().clone()
    }

    pub async fn finished(&mut self) -> RepeatSummary {
        let summary = self
            .summary
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|summary| (*summary).clone());
        match summary {
            Some(summary) => summary,
            None => RepeatSummary::interrupted(
                self.completed(),
                self.target,
                "repeat task ended unexpectedly",
                None,
            ),
        }
    }
}

/// Drives a [`PlaybackEngine`] through repeated runs of one step list
pub struct RepeatController {
    engine: Arc<PlaybackEngine>,
    active: Mutex<Option<Arc<RepeatShared>>>,
}

impl RepeatController {
    pub fn new(engine: Arc<PlaybackEngine>) -> Self {
        Self {
            engine,
            active: Mutex::new(None),
        }
    }

    pub fn engine(&self) -> &Arc<PlaybackEngine> {
        &self.engine
    }

    pub fn is_active(&self) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|shared| !shared.finished.load(Ordering::SeqCst))
    }

    /// Stop the active sequence, if any
    pub fn stop(&self) -> bool {
        let active = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        active.is_some_and(|shared| shared.stop())
    }

    /// Play `steps` `target` times, `interval` seconds apart.
    ///
    /// Runs on the current tokio runtime. The sequence ends at the first run
    /// that does not complete, at `target` completed runs, or on `stop`.
    #[instrument(level = "info", skip(self, steps))]
    pub fn run_repeated(
        &self,
        steps: impl Into<Arc<[Step]>>,
        target: u32,
        interval: f64,
    ) -> Result<RepeatHandle, PlaybackError> {
        let steps: Arc<[Step]> = steps.into();
        if target == 0 {
            return Err(PlaybackError::InvalidRepeatCount(target));
        }
        validate_steps(&steps)?;
        let runtime = Handle::try_current().map_err(|_| PlaybackError::NoRuntime)?;

        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if active
            .as_ref()
            .is_some_and(|shared| !shared.finished.load(Ordering::SeqCst))
        {
            warn!("Refusing to start: a repeat sequence is already active");
            return Err(PlaybackError::AlreadyRunning);
        }

        let shared = Arc::new(RepeatShared::new());
        let (summary_tx, summary_rx) = watch::channel(None);
        let run = RepeatRun {
            engine: Arc::clone(&self.engine),
            steps,
            target,
            interval: seconds(interval),
            shared: Arc::clone(&shared),
        };
        runtime.spawn(async move {
            let shared = Arc::clone(&run.shared);
            let summary = run.drive().await;
            shared.finished.store(true, Ordering::SeqCst);
            summary_tx.send_replace(Some(summary));
        });
        *active = Some(Arc::clone(&shared));

        Ok(RepeatHandle {
            target,
            shared,
            summary: summary_rx,
        })
    }
}

struct RepeatRun {
    engine: Arc<PlaybackEngine>,
    steps: Arc<[Step]>,
    target: u32,
    interval: Option<Duration>,
    shared: Arc<RepeatShared>,
}

impl RepeatRun {
    async fn drive(self) -> RepeatSummary {
        let started = Instant::now();
        let mut cancel = self.shared.cancel.subscribe();
        let mut completed = 0u32;

        let summary = loop {
            if self.shared.is_stopped() {
                break self.stopped(completed);
            }

            let mut session = match self.engine.start(Arc::clone(&self.steps)) {
                Ok(session) => session,
                Err(e) => {
                    warn!(error = %e, "Could not start repeat run");
                    let reason = format!("could not start run {}: {}", completed + 1, e);
                    break RepeatSummary::interrupted(completed, self.target, &reason, None);
                }
            };
            self.shared.set_session(Some(session.control()));
            // A stop that raced with the start never saw this session
            if self.shared.is_stopped() {
                session.stop();
            }

            let outcome = session.finished().await.unwrap_or_else(|| PlaybackOutcome::StepFailed {
                index: session.cursor() + 1,
                reason: "playback worker exited without an outcome".to_string(),
            });
            self.shared.set_session(None);

            if !outcome.is_success() {
                let reason = outcome.to_string();
                break RepeatSummary::interrupted(completed, self.target, &reason, Some(outcome));
            }
            completed += 1;
            self.shared.completed.store(completed, Ordering::SeqCst);
            info!(run = completed, target = self.target, "Repeat run completed");
            if completed == self.target {
                break RepeatSummary::finished(completed, self.target);
            }

            match self.interval {
                // Next scheduler tick, never a nested call
                None => tokio::task::yield_now().await,
                Some(interval) => {
                    debug!(interval_ms = interval.as_millis(), "Waiting before next run");
                    tokio::select! {
                        _ = tokio::time::sleep(interval) => {}
                        _ = cancel.wait_for(|stopped| *stopped) => {
                            break self.stopped(completed);
                        }
                    }
                }
            }
        };

        info!(
            completed = summary.completed,
            target = summary.target,
            success = summary.success,
            duration_ms = started.elapsed().as_millis(),
            "{}",
            summary.message
        );
        summary
    }

    fn stopped(&self, completed: u32) -> RepeatSummary {
        RepeatSummary::interrupted(
            completed,
            self.target,
            &PlaybackOutcome::UserStopped.to_string(),
            Some(PlaybackOutcome::UserStopped),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_messages() {
        let done = RepeatSummary::finished(3, 3);
        assert!(done.success);
        assert_eq!(done.message, "all runs completed (3 of 3)");

        let cut = RepeatSummary::interrupted(1, 5, "step 1 failed: boom", None);
        assert!(!cut.success);
        assert_eq!(cut.message, "interrupted: step 1 failed: boom (completed 1 of 5)");
    }
}
