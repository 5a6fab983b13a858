use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::error::InferenceError;

/// Surgical phase as reported by the classifier or chosen by the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Idle,
    Marking,
    Injection,
    Dissection,
    Unknown,
}

impl Phase {
    /// Phases an operator may select as an override.
    pub const SELECTABLE: [Phase; 4] = [
        Phase::Idle,
        Phase::Marking,
        Phase::Injection,
        Phase::Dissection,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Marking => "marking",
            Phase::Injection => "injection",
            Phase::Dissection => "dissection",
            Phase::Unknown => "unknown",
        }
    }

    /// Banner color used when the phase is drawn onto a frame.
    pub fn color(&self) -> [u8; 3] {
        match self {
            Phase::Idle => [173, 216, 230],
            Phase::Marking => [255, 255, 0],
            Phase::Injection => [255, 165, 0],
            Phase::Dissection => [255, 0, 0],
            Phase::Unknown => [255, 255, 255],
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Phase {
    type Err = InferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "idle" => Ok(Phase::Idle),
            "marking" => Ok(Phase::Marking),
            "injection" => Ok(Phase::Injection),
            "dissection" => Ok(Phase::Dissection),
            "unknown" => Ok(Phase::Unknown),
            other => Err(InferenceError::UnknownLabel(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseSource {
    Inferred,
    Manual,
}

/// The phase that applies to a sampled frame after override resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PhasePrediction {
    pub phase: Phase,
    pub source: PhaseSource,
    pub frame_index: u64,
}
