//! Device operations performed for each step kind.

use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{millis, PlaybackConfig};
use crate::engine::{Flow, SessionControl};
use crate::errors::InputError;
use crate::geometry::CoordinateMapper;
use crate::platforms::{InputDevice, MouseButton};
use crate::step::{Step, StepKind};

/// Result of dispatching one step that did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum StepRun {
    /// The step ran to the end; the message describes what was sent
    Done(String),
    /// A stop request was observed between two device operations
    Interrupted,
}

/// Everything a step needs from the running session
pub(crate) struct ActionContext<'a> {
    pub device: &'a dyn InputDevice,
    pub mapper: &'a CoordinateMapper,
    pub control: &'a SessionControl,
    pub config: &'a PlaybackConfig,
}

impl ActionContext<'_> {
    fn settle(&self, pause: Option<Duration>) -> Flow {
        match pause {
            Some(pause) => self.control.sleep(pause),
            None => self.control.check_stop(),
        }
    }
}

pub(crate) fn perform(step: &Step, cx: &ActionContext<'_>) -> Result<StepRun, InputError> {
    match step.kind {
        StepKind::LeftClick => click(step, cx, MouseButton::Left, 1, None),
        StepKind::RightClick => click(step, cx, MouseButton::Right, 1, None),
        StepKind::DoubleClick => click(
            step,
            cx,
            MouseButton::Left,
            2,
            millis(cx.config.double_click_gap_ms),
        ),
        StepKind::LeftClickMulti => {
            click(step, cx, MouseButton::Left, step.click_count, step.click_gap())
        }
        StepKind::RightClickMulti => {
            click(step, cx, MouseButton::Right, step.click_count, step.click_gap())
        }
        StepKind::TypeText => type_text(&step.text, cx),
    }
}

/// Move once, then `count` clicks with `gap` between consecutive clicks only
fn click(
    step: &Step,
    cx: &ActionContext<'_>,
    button: MouseButton,
    count: u32,
    gap: Option<Duration>,
) -> Result<StepRun, InputError> {
    let point = cx.mapper.to_screen(step.rel_x, step.rel_y);
    cx.device.move_cursor(point.x, point.y)?;
    if cx.settle(millis(cx.config.cursor_settle_ms)).is_stop() {
        return Ok(StepRun::Interrupted);
    }

    for n in 0..count {
        if n > 0 && cx.settle(gap).is_stop() {
            return Ok(StepRun::Interrupted);
        }
        cx.device.click(button)?;
    }
    debug!(kind = %step.kind, x = point.x, y = point.y, count, "Clicks sent");

    let mut message = format!("{} at ({}, {})", step.kind, point.x, point.y);
    if step.kind.is_multi() {
        message.push_str(&format!(" x{}", count));
    }
    Ok(StepRun::Done(message))
}

fn type_text(text: &str, cx: &ActionContext<'_>) -> Result<StepRun, InputError> {
    if text.trim().is_empty() {
        debug!("Empty text step, nothing to type");
        return Ok(StepRun::Done("no text to type".to_string()));
    }

    let text_settle = millis(cx.config.text_settle_ms);
    // Pasting goes to whatever has focus
    if cx.config.refocus_before_text {
        cx.mapper.binding().activate();
        if cx.settle(text_settle).is_stop() {
            return Ok(StepRun::Interrupted);
        }
    }

    let chars = text.chars().count();
    match cx.device.paste_text(text) {
        Ok(()) => {
            if cx.settle(text_settle).is_stop() {
                return Ok(StepRun::Interrupted);
            }
            Ok(StepRun::Done(format!("pasted {} chars", chars)))
        }
        Err(e) => {
            warn!(error = %e, "Clipboard paste failed, typing characters individually");
            type_chars(text, cx)
        }
    }
}

fn type_chars(text: &str, cx: &ActionContext<'_>) -> Result<StepRun, InputError> {
    let interval = millis(cx.config.char_interval_ms);
    let mut typed = 0usize;
    let mut skipped = 0usize;

    for (n, ch) in text.chars().enumerate() {
        if n > 0 && cx.settle(interval).is_stop() {
            return Ok(StepRun::Interrupted);
        }
        if cx.device.type_char(ch)? {
            typed += 1;
        } else {
            skipped += 1;
            warn!(?ch, "No key mapping for character, skipped");
        }
    }

    if skipped > 0 {
        Ok(StepRun::Done(format!(
            "typed {} chars, skipped {} without a key mapping",
            typed, skipped
        )))
    } else {
        Ok(StepRun::Done(format!("typed {} chars", typed)))
    }
}
