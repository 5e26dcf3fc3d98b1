//! Step and feature records plus their JSON interchange form.
//!
//! One step is one input action expressed in window-relative coordinates.
//! The interchange keeps the field names and the action names of the
//! catalogs written by the desktop recorder, so existing feature files
//! load unchanged:
//!
//! ```json
//! {"x": 0.5, "y": 0.25, "action": "左键多击", "delay": 1.0,
//!  "text": "", "click_count": 3, "click_interval": 0.2, "name": "open menu"}
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::errors::{PlaybackError, StepError};

/// Default spacing between clicks of a multi-click step (seconds)
pub const DEFAULT_CLICK_INTERVAL: f64 = 0.05;

/// The input action performed by a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum StepKind {
    #[default]
    #[serde(rename = "左键单击", alias = "LeftClick")]
    LeftClick,
    #[serde(rename = "右键单击", alias = "RightClick")]
    RightClick,
    #[serde(rename = "双击", alias = "DoubleClick")]
    DoubleClick,
    /// `多击` is the legacy name for a generic multi-click
    #[serde(rename = "左键多击", alias = "LeftClickMulti", alias = "多击")]
    LeftClickMulti,
    #[serde(rename = "右键多击", alias = "RightClickMulti")]
    RightClickMulti,
    #[serde(rename = "输入文本", alias = "TypeText")]
    TypeText,
}

impl StepKind {
    /// Whether the step positions the cursor before acting
    pub fn is_pointer(self) -> bool {
        !matches!(self, StepKind::TypeText)
    }

    /// Whether the step honours `click_count` / `click_interval`
    pub fn is_multi(self) -> bool {
        matches!(self, StepKind::LeftClickMulti | StepKind::RightClickMulti)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StepKind::LeftClick => "LeftClick",
            StepKind::RightClick => "RightClick",
            StepKind::DoubleClick => "DoubleClick",
            StepKind::LeftClickMulti => "LeftClickMulti",
            StepKind::RightClickMulti => "RightClickMulti",
            StepKind::TypeText => "TypeText",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_click_count() -> u32 {
    1
}

fn default_click_interval() -> f64 {
    DEFAULT_CLICK_INTERVAL
}

/// One input action, immutable for the duration of a playback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Fraction of the client width, normally in [0, 1]
    #[serde(rename = "x", default)]
    pub rel_x: f64,

    /// Fraction of the client height, normally in [0, 1]
    #[serde(rename = "y", default)]
    pub rel_y: f64,

    #[serde(rename = "action", default)]
    pub kind: StepKind,

    /// Seconds to wait after the step completes
    #[serde(rename = "delay", default)]
    pub delay_after: f64,

    /// Payload of `TypeText`; empty is a valid no-op
    #[serde(default)]
    pub text: String,

    /// Clicks performed by the multi-click kinds
    #[serde(default = "default_click_count")]
    pub click_count: u32,

    /// Seconds between consecutive clicks of a multi-click step
    #[serde(default = "default_click_interval")]
    pub click_interval: f64,

    /// Display label, no semantic meaning
    #[serde(rename = "name", default)]
    pub label: String,
}

impl Default for Step {
    fn default() -> Self {
        Self {
            rel_x: 0.0,
            rel_y: 0.0,
            kind: StepKind::default(),
            delay_after: 0.0,
            text: String::new(),
            click_count: default_click_count(),
            click_interval: default_click_interval(),
            label: String::new(),
        }
    }
}

impl Step {
    pub fn new(kind: StepKind, rel_x: f64, rel_y: f64) -> Self {
        Self {
            rel_x,
            rel_y,
            kind,
            ..Default::default()
        }
    }

    /// A `TypeText` step; the position is unused
    pub fn type_text(text: impl Into<String>) -> Self {
        Self {
            kind: StepKind::TypeText,
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_delay(mut self, seconds: f64) -> Self {
        self.delay_after = seconds;
        self
    }

    pub fn with_clicks(mut self, count: u32, interval: f64) -> Self {
        self.click_count = count;
        self.click_interval = interval;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Check the numeric invariants of the record.
    ///
    /// Positions are not clamped; values outside [0, 1] are legal and land
    /// outside the client area.
    pub fn validate(&self) -> Result<(), StepError> {
        finite("x", self.rel_x)?;
        finite("y", self.rel_y)?;
        duration("delay", self.delay_after)?;
        duration("click_interval", self.click_interval)?;
        if self.click_count == 0 {
            return Err(StepError::ZeroClickCount(self.click_count));
        }
        Ok(())
    }

    /// `None` when no sleep must happen at all
    pub fn delay(&self) -> Option<Duration> {
        seconds(self.delay_after)
    }

    /// `None` when clicks are issued back to back
    pub fn click_gap(&self) -> Option<Duration> {
        seconds(self.click_interval)
    }

    /// Short human-readable description used in logs
    pub fn describe(&self) -> String {
        let mut out = if self.kind.is_pointer() {
            format!("{} @ ({:.3}, {:.3})", self.kind, self.rel_x, self.rel_y)
        } else {
            format!("{} ({} chars)", self.kind, self.text.chars().count())
        };
        if self.kind.is_multi() {
            out.push_str(&format!(" x{}", self.click_count));
        }
        if !self.label.is_empty() {
            out.push_str(&format!(" [{}]", self.label));
        }
        out
    }
}

fn finite(field: &'static str, value: f64) -> Result<(), StepError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(StepError::NotFinite { field, value })
    }
}

fn duration(field: &'static str, value: f64) -> Result<(), StepError> {
    finite(field, value)?;
    if value < 0.0 {
        return Err(StepError::Negative { field, value });
    }
    if Duration::try_from_secs_f64(value).is_err() {
        return Err(StepError::TooLong { field, value });
    }
    Ok(())
}

/// Exactly zero (or anything not positive) means "do not sleep".
/// Values beyond what a `Duration` holds wait forever.
pub(crate) fn seconds(value: f64) -> Option<Duration> {
    if value > 0.0 && value.is_finite() {
        Some(Duration::try_from_secs_f64(value).unwrap_or(Duration::MAX))
    } else {
        None
    }
}

/// Validate a whole list, reporting the first offending index (0-based)
pub fn validate_steps(steps: &[Step]) -> Result<(), PlaybackError> {
    for (index, step) in steps.iter().enumerate() {
        step.validate()
            .map_err(|source| PlaybackError::InvalidStep { index, source })?;
    }
    Ok(())
}

/// A named, ordered list of steps
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Feature {
    pub name: String,
    #[serde(default)]
    pub steps: Vec<Step>,
    /// Group the feature was listed under, if the catalog was grouped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

impl Feature {
    pub fn new(name: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            name: name.into(),
            steps,
            group: None,
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[derive(Deserialize)]
struct FeatureGroup {
    group_name: String,
    #[serde(default)]
    features: Vec<Feature>,
}

/// The two catalog layouts found on disk
#[derive(Deserialize)]
#[serde(untagged)]
enum CatalogFile {
    Flat(Vec<Feature>),
    Grouped { groups: Vec<FeatureGroup> },
}

/// Parse a catalog, either a JSON array of features or
/// `{"groups": [{"group_name": ..., "features": [...]}]}`.
///
/// Grouped catalogs are flattened in file order; each feature keeps the
/// name of its group unless it already carries one.
pub fn features_from_json(json: &str) -> Result<Vec<Feature>, serde_json::Error> {
    Ok(match serde_json::from_str(json)? {
        CatalogFile::Flat(features) => features,
        CatalogFile::Grouped { groups } => groups
            .into_iter()
            .flat_map(|group| {
                let name = group.group_name;
                group.features.into_iter().map(move |mut feature| {
                    if feature.group.is_none() {
                        feature.group = Some(name.clone());
                    }
                    feature
                })
            })
            .collect(),
    })
}

/// Serialize features as a pretty JSON array (non-ASCII kept verbatim)
pub fn features_to_json(features: &[Feature]) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(features)
}
