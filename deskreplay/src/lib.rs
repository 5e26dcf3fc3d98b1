//! Playback of recorded desktop input against a bound window
//!
//! Steps are stored in window-relative coordinates and resolved against the
//! window's live client area when they play, so recordings survive window
//! moves and resizes. A [`PlaybackEngine`] plays one step list at a time on a
//! worker thread with pause, resume and prompt stop; a [`RepeatController`]
//! chains whole runs with a delay in between.

mod actions;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod errors;
pub mod events;
pub mod geometry;
pub mod platforms;
pub mod repeat;
pub mod step;
#[cfg(test)]
mod tests;

pub use catalog::{FeatureCatalog, ImportMode};
pub use config::PlaybackConfig;
pub use engine::{PlaybackEngine, SessionControl, SessionHandle, SessionState};
pub use errors::{InputError, PlaybackError, Result, StepError};
pub use events::{PlaybackEvent, PlaybackOutcome, SessionEvent};
pub use geometry::{ClientRect, CoordinateMapper, ScreenPoint};
pub use platforms::{create_device, DryRunDevice, FixedWindow, InputDevice, MouseButton, WindowBinding};
pub use repeat::{RepeatController, RepeatHandle, RepeatSummary};
pub use step::{validate_steps, Feature, Step, StepKind};
