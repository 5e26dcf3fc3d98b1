//! Single-flight playback of a step list on a dedicated worker thread.
//!
//! The caller keeps full control through [`SessionHandle`] (or the engine's
//! own `pause`/`resume`/`stop`, which act on the current session) and never
//! blocks while steps play. Control requests go through [`SessionControl`],
//! a mutex-guarded state plus a condition variable; every wait the worker
//! performs is a bounded wait on that condition variable, so a stop request
//! is observed immediately and a pause freezes any delay in progress.

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, watch};
use tokio_stream::Stream;
use tracing::{debug, error, info, instrument, warn};

use crate::actions::{self, ActionContext, StepRun};
use crate::config::{millis, PlaybackConfig};
use crate::errors::PlaybackError;
use crate::events::{EventSink, PlaybackEvent, PlaybackOutcome, SessionEvent};
use crate::geometry::CoordinateMapper;
use crate::platforms::{InputDevice, WindowBinding};
use crate::step::{validate_steps, Step};

/// Lifecycle of a playback session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Running,
    Paused,
    Stopping,
    Done,
}

impl SessionState {
    /// Whether a new session must be refused while this one exists
    pub fn is_active(self) -> bool {
        matches!(
            self,
            SessionState::Running | SessionState::Paused | SessionState::Stopping
        )
    }
}

/// What the worker should do after a wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Stop,
}

impl Flow {
    pub(crate) fn is_stop(self) -> bool {
        self == Flow::Stop
    }
}

#[derive(Debug)]
struct Shared {
    state: SessionState,
    cursor: usize,
    outcome: Option<PlaybackOutcome>,
}

/// Thread-safe control surface of one session.
///
/// `pause`, `resume` and `stop` may be called from any thread at any time;
/// requests that do not apply to the current state are ignored and return
/// `false`.
#[derive(Debug)]
pub struct SessionControl {
    shared: Mutex<Shared>,
    changed: Condvar,
    poll: Duration,
}

impl SessionControl {
    pub(crate) fn new(poll: Duration) -> Self {
        Self {
            shared: Mutex::new(Shared {
                state: SessionState::Running,
                cursor: 0,
                outcome: None,
            }),
            changed: Condvar::new(),
            poll,
        }
    }

    // A panicking device must not wedge the control surface
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, Shared>, timeout: Duration) -> MutexGuard<'a, Shared> {
        self.changed
            .wait_timeout(guard, timeout)
            .unwrap_or_else(PoisonError::into_inner)
            .0
    }

    fn transition(&self, from: &[SessionState], to: SessionState) -> bool {
        let mut shared = self.lock();
        if !from.contains(&shared.state) {
            return false;
        }
        debug!(from = ?shared.state, to = ?to, "Session state change");
        shared.state = to;
        self.changed.notify_all();
        true
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    /// Index of the next step to attempt
    pub fn cursor(&self) -> usize {
        self.lock().cursor
    }

    /// Set together with the `Done` state
    pub fn outcome(&self) -> Option<PlaybackOutcome> {
        self.lock().outcome.clone()
    }

    pub fn pause(&self) -> bool {
        self.transition(&[SessionState::Running], SessionState::Paused)
    }

    pub fn resume(&self) -> bool {
        self.transition(&[SessionState::Paused], SessionState::Running)
    }

    pub fn stop(&self) -> bool {
        self.transition(
            &[SessionState::Idle, SessionState::Running, SessionState::Paused],
            SessionState::Stopping,
        )
    }

    /// Block until the worker has finished, at most `timeout`
    pub fn wait_done(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut shared = self.lock();
        while shared.state != SessionState::Done {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            shared = self.wait(shared, deadline - now);
        }
        true
    }

    pub(crate) fn advance(&self, cursor: usize) {
        self.lock().cursor = cursor;
    }

    pub(crate) fn finish(&self, outcome: PlaybackOutcome) {
        let mut shared = self.lock();
        shared.state = SessionState::Done;
        shared.outcome = Some(outcome);
        self.changed.notify_all();
    }

    pub(crate) fn check_stop(&self) -> Flow {
        match self.lock().state {
            SessionState::Stopping | SessionState::Done => Flow::Stop,
            _ => Flow::Continue,
        }
    }

    /// Block while paused; report whether a stop was requested
    pub(crate) fn checkpoint(&self) -> Flow {
        let mut shared = self.lock();
        loop {
            match shared.state {
                SessionState::Stopping | SessionState::Done => return Flow::Stop,
                SessionState::Paused => shared = self.wait(shared, self.poll),
                SessionState::Idle | SessionState::Running => return Flow::Continue,
            }
        }
    }

    /// Sleep for `duration` of running time.
    ///
    /// Returns early with `Flow::Stop` on a stop request. Time spent paused
    /// is not deducted from the remaining budget.
    pub(crate) fn sleep(&self, duration: Duration) -> Flow {
        let mut remaining = duration;
        let mut shared = self.lock();
        loop {
            match shared.state {
                SessionState::Stopping | SessionState::Done => return Flow::Stop,
                SessionState::Paused => shared = self.wait(shared, self.poll),
                SessionState::Idle | SessionState::Running => {
                    if remaining.is_zero() {
                        return Flow::Continue;
                    }
                    let started = Instant::now();
                    shared = self.wait(shared, remaining.min(self.poll));
                    remaining = remaining.saturating_sub(started.elapsed());
                }
            }
        }
    }
}

/// Caller's view of one session
pub struct SessionHandle {
    id: u64,
    total: usize,
    control: Arc<SessionControl>,
    events: mpsc::UnboundedReceiver<PlaybackEvent>,
    done: watch::Receiver<Option<PlaybackOutcome>>,
}

impl SessionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Number of steps in the session
    pub fn len(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    pub fn state(&self) -> SessionState {
        self.control.state()
    }

    pub fn cursor(&self) -> usize {
        self.control.cursor()
    }

    /// Shareable control surface, e.g. for a hotkey thread
    pub fn control(&self) -> Arc<SessionControl> {
        Arc::clone(&self.control)
    }

    pub fn pause(&self) -> bool {
        self.control.pause()
    }

    pub fn resume(&self) -> bool {
        self.control.resume()
    }

    pub fn stop(&self) -> bool {
        self.control.stop()
    }

    /// Next event in emission order; `None` once the session is over and
    /// every event has been read
    pub async fn next_event(&mut self) -> Option<PlaybackEvent> {
        self.events.recv().await
    }

    pub fn try_next_event(&mut self) -> Option<PlaybackEvent> {
        self.events.try_recv().ok()
    }

    /// Every event received so far, without waiting
    pub fn drain_events(&mut self) -> Vec<PlaybackEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }

    /// The outcome, if the session has finished
    pub fn outcome(&self) -> Option<PlaybackOutcome> {
        self.control.outcome()
    }

    /// Block up to `timeout` for the session to finish
    pub fn wait(&self, timeout: Duration) -> Option<PlaybackOutcome> {
        if self.control.wait_done(timeout) {
            self.outcome()
        } else {
            None
        }
    }

    /// Wait for the session to finish without blocking the runtime
    pub async fn finished(&mut self) -> Option<PlaybackOutcome> {
        let outcome = self
            .done
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|outcome| (*outcome).clone());
        outcome.or_else(|| self.outcome())
    }

    /// Request a stop and wait up to `timeout` for the worker to exit
    pub fn stop_and_wait(&self, timeout: Duration) -> bool {
        self.control.stop();
        self.control.wait_done(timeout)
    }
}

/// Plays step lists against one bound window, one session at a time
pub struct PlaybackEngine {
    device: Arc<dyn InputDevice>,
    mapper: Arc<CoordinateMapper>,
    config: PlaybackConfig,
    current: Mutex<Option<Arc<SessionControl>>>,
    observers: broadcast::Sender<SessionEvent>,
    next_session: AtomicU64,
}

impl PlaybackEngine {
    pub fn new(
        binding: Arc<dyn WindowBinding>,
        device: Arc<dyn InputDevice>,
        config: PlaybackConfig,
    ) -> Self {
        let (observers, _) = broadcast::channel(config.event_buffer.max(1));
        Self {
            device,
            mapper: Arc::new(CoordinateMapper::new(binding)),
            config,
            current: Mutex::new(None),
            observers,
            next_session: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.config
    }

    /// The mapper bound to this engine's window
    pub fn mapper(&self) -> &CoordinateMapper {
        &self.mapper
    }

    fn current(&self) -> Option<Arc<SessionControl>> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// State of the most recent session, `Idle` if none was started
    pub fn state(&self) -> SessionState {
        self.current()
            .map(|control| control.state())
            .unwrap_or(SessionState::Idle)
    }

    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }

    /// Start playing `steps` on a new worker thread.
    ///
    /// Fails with `AlreadyRunning` while another session is running, paused
    /// or stopping, and with `InvalidStep` before anything runs if a step
    /// carries an impossible value.
    #[instrument(level = "info", skip(self, steps))]
    pub fn start(&self, steps: impl Into<Arc<[Step]>>) -> Result<SessionHandle, PlaybackError> {
        let steps: Arc<[Step]> = steps.into();
        validate_steps(&steps)?;

        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if current.as_ref().is_some_and(|control| control.state().is_active()) {
            warn!("Refusing to start: a session is already active");
            return Err(PlaybackError::AlreadyRunning);
        }

        let id = self.next_session.fetch_add(1, Ordering::SeqCst);
        let control = Arc::new(SessionControl::new(self.config.pause_poll()));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = watch::channel(None);

        let worker = Worker {
            session: id,
            steps: Arc::clone(&steps),
            control: Arc::clone(&control),
            device: Arc::clone(&self.device),
            mapper: Arc::clone(&self.mapper),
            config: self.config.clone(),
            sink: EventSink::new(id, events_tx, self.observers.clone()),
            done: done_tx,
        };

        thread::Builder::new()
            .name(format!("deskreplay-session-{}", id))
            .spawn(move || worker.run())?;

        info!(session = id, steps = steps.len(), "Playback session started");
        *current = Some(Arc::clone(&control));

        Ok(SessionHandle {
            id,
            total: steps.len(),
            control,
            events: events_rx,
            done: done_rx,
        })
    }

    /// Pause the current session; no-op unless it is running
    pub fn pause(&self) -> bool {
        self.current().is_some_and(|control| control.pause())
    }

    /// Resume the current session; no-op unless it is paused
    pub fn resume(&self) -> bool {
        self.current().is_some_and(|control| control.resume())
    }

    /// Ask the current session to stop; safe from any thread, any time
    pub fn stop(&self) -> bool {
        self.current().is_some_and(|control| control.stop())
    }

    /// Stop and wait for the worker to exit, bounded by `timeout` or the
    /// configured default. Returns whether the worker has exited.
    #[instrument(level = "debug", skip(self))]
    pub fn stop_and_wait(&self, timeout: Option<Duration>) -> bool {
        let Some(control) = self.current() else {
            return true;
        };
        control.stop();
        let exited = control.wait_done(timeout.unwrap_or_else(|| self.config.stop_timeout()));
        if !exited {
            warn!("Playback worker did not exit in time, it will finish on its own");
        }
        exited
    }

    /// Events of every session started on this engine
    pub fn event_stream(&self) -> impl Stream<Item = SessionEvent> + Send + Unpin {
        let mut rx = self.observers.subscribe();
        Box::pin(async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(event) => yield event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Event observer lagged behind");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        if self.stop() {
            debug!("Engine dropped, active session asked to stop");
        }
    }
}

struct Worker {
    session: u64,
    steps: Arc<[Step]>,
    control: Arc<SessionControl>,
    device: Arc<dyn InputDevice>,
    mapper: Arc<CoordinateMapper>,
    config: PlaybackConfig,
    sink: EventSink,
    done: watch::Sender<Option<PlaybackOutcome>>,
}

impl Worker {
    fn run(self) {
        let started = Instant::now();
        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| self.play())) {
            Ok(outcome) => outcome,
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                error!(session = self.session, %reason, "Playback worker panicked");
                PlaybackOutcome::StepFailed {
                    index: self.control.cursor() + 1,
                    reason,
                }
            }
        };

        let message = match &outcome {
            PlaybackOutcome::Completed => {
                format!("playback completed ({} steps)", self.steps.len())
            }
            other => other.to_string(),
        };
        info!(
            session = self.session,
            success = outcome.is_success(),
            duration_ms = started.elapsed().as_millis(),
            "{}",
            message
        );

        // Done must be visible before the outcome is published
        self.control.finish(outcome.clone());
        self.sink.emit(PlaybackEvent::Finished {
            success: outcome.is_success(),
            message,
            outcome: outcome.clone(),
        });
        self.done.send_replace(Some(outcome));
    }

    fn play(&self) -> PlaybackOutcome {
        let binding = self.mapper.binding();
        let total = self.steps.len();

        if !binding.is_valid() {
            warn!(session = self.session, "Target window is gone before the first step");
            return PlaybackOutcome::WindowLost;
        }
        binding.activate();
        if let Some(settle) = millis(self.config.activation_delay_ms) {
            if self.control.sleep(settle).is_stop() {
                return PlaybackOutcome::UserStopped;
            }
        }

        let cx = ActionContext {
            device: self.device.as_ref(),
            mapper: &self.mapper,
            control: &self.control,
            config: &self.config,
        };

        for (i, step) in self.steps.iter().enumerate() {
            if self.control.checkpoint().is_stop() {
                return PlaybackOutcome::UserStopped;
            }
            if !binding.is_valid() {
                warn!(session = self.session, index = i + 1, "Target window lost");
                return PlaybackOutcome::WindowLost;
            }

            debug!(session = self.session, index = i + 1, step = %step.describe(), "Running step");
            let result = panic::catch_unwind(AssertUnwindSafe(|| actions::perform(step, &cx)));
            let message = match result {
                Ok(Ok(StepRun::Done(message))) => message,
                Ok(Ok(StepRun::Interrupted)) => return PlaybackOutcome::UserStopped,
                Ok(Err(e)) => return self.fail(i, e.to_string()),
                Err(payload) => {
                    let reason = format!("input device panicked: {}", panic_message(payload.as_ref()));
                    return self.fail(i, reason);
                }
            };

            self.sink.emit(PlaybackEvent::StepCompleted {
                index: i + 1,
                success: true,
                message,
            });
            self.sink.emit(PlaybackEvent::Progress {
                percent: ((i + 1) * 100 / total) as u8,
            });

            if let Some(delay) = step.delay() {
                if self.control.sleep(delay).is_stop() {
                    return PlaybackOutcome::UserStopped;
                }
            }
            self.control.advance(i + 1);
        }

        PlaybackOutcome::Completed
    }

    fn fail(&self, i: usize, reason: String) -> PlaybackOutcome {
        error!(session = self.session, index = i + 1, %reason, "Step failed");
        self.sink.emit(PlaybackEvent::StepCompleted {
            index: i + 1,
            success: false,
            message: reason.clone(),
        });
        PlaybackOutcome::StepFailed {
            index: i + 1,
            reason,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_ignores_out_of_order_requests() {
        let control = SessionControl::new(Duration::from_millis(10));
        assert!(!control.resume());
        assert!(control.pause());
        assert!(!control.pause());
        assert!(control.resume());
        assert!(control.stop());
        assert!(!control.stop());
        assert!(!control.pause());
        assert_eq!(control.state(), SessionState::Stopping);
    }

    #[test]
    fn test_sleep_returns_at_once_when_stopping() {
        let control = SessionControl::new(Duration::from_millis(10));
        control.stop();
        let started = Instant::now();
        assert_eq!(control.sleep(Duration::from_secs(10)), Flow::Stop);
        assert!(started.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn test_sleep_is_woken_by_stop_from_another_thread() {
        let control = Arc::new(SessionControl::new(Duration::from_millis(100)));
        let remote = Arc::clone(&control);
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            remote.stop();
        });

        let started = Instant::now();
        assert_eq!(control.sleep(Duration::from_secs(10)), Flow::Stop);
        assert!(started.elapsed() < Duration::from_millis(500));
        stopper.join().unwrap();
    }

    #[test]
    fn test_paused_time_does_not_count_against_sleep() {
        let control = Arc::new(SessionControl::new(Duration::from_millis(20)));
        control.pause();
        let remote = Arc::clone(&control);
        let resumer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            remote.resume();
        });

        let started = Instant::now();
        assert_eq!(control.sleep(Duration::from_millis(100)), Flow::Continue);
        // 200ms paused plus the full 100ms of running time
        assert!(started.elapsed() >= Duration::from_millis(290));
        resumer.join().unwrap();
    }

    #[test]
    fn test_wait_done_times_out_then_succeeds() {
        let control = SessionControl::new(Duration::from_millis(10));
        assert!(!control.wait_done(Duration::from_millis(20)));
        assert_eq!(control.outcome(), None);
        control.finish(PlaybackOutcome::Completed);
        assert!(control.wait_done(Duration::from_millis(20)));
        assert!(!control.state().is_active());
        assert_eq!(control.outcome(), Some(PlaybackOutcome::Completed));
    }

    #[test]
    fn test_panic_payloads_are_readable() {
        let payload: Box<dyn Any + Send> = Box::new("device exploded");
        assert_eq!(panic_message(payload.as_ref()), "device exploded");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
        let payload: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
