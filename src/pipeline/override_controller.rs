use tracing::{debug, info, warn};

use crate::common::{Phase, PhasePrediction, PhaseSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverrideState {
    #[default]
    NoOverride,
    Active { phase: Phase, remaining: u32 },
}

impl OverrideState {
    pub fn is_active(&self) -> bool {
        matches!(self, OverrideState::Active { .. })
    }

    pub fn phase(&self) -> Option<Phase> {
        match self {
            OverrideState::Active { phase, .. } => Some(*phase),
            OverrideState::NoOverride => None,
        }
    }
}

/// Countdown-based manual phase override.
///
/// An override chosen before tick `t` covers ticks `t..t+window-1`; the tick
/// that brings `remaining` to zero is the last covered one and clears the
/// override.
#[derive(Debug, Clone)]
pub struct ManualOverrideController {
    window: u32,
    state: OverrideState,
    // Phase covering the most recent tick, if any.
    covered: Option<Phase>,
}

impl ManualOverrideController {
    pub fn new(window: u32) -> Self {
        Self {
            window,
            state: OverrideState::NoOverride,
            covered: None,
        }
    }

    pub fn state(&self) -> OverrideState {
        self.state
    }

    /// Starts a new override, replacing any active one with a fresh countdown.
    pub fn set(&mut self, phase: Phase) {
        if self.window == 0 {
            warn!("Ignoring override to {}: override window is zero", phase);
            return;
        }
        if let OverrideState::Active {
            phase: previous,
            remaining,
        } = self.state
        {
            debug!(
                "Override {} pre-empted with {} ticks left",
                previous, remaining
            );
        }
        info!("Manual override set to {} for {} ticks", phase, self.window);
        self.state = OverrideState::Active {
            phase,
            remaining: self.window,
        };
    }

    /// Advances the countdown by one sampled frame.
    pub fn tick(&mut self) {
        self.covered = None;
        if let OverrideState::Active { phase, remaining } = self.state {
            self.covered = Some(phase);
            let remaining = remaining.saturating_sub(1);
            self.state = if remaining == 0 {
                debug!("Manual override {} expired", phase);
                OverrideState::NoOverride
            } else {
                OverrideState::Active { phase, remaining }
            };
        }
    }

    /// The override phase while it covers the current tick, else `inferred`.
    pub fn resolve(&self, inferred: Phase) -> Phase {
        self.manual_phase().unwrap_or(inferred)
    }

    /// Like `resolve`, tagged with where the phase came from.
    pub fn resolve_prediction(&self, inferred: Phase, frame_index: u64) -> PhasePrediction {
        match self.manual_phase() {
            Some(phase) => PhasePrediction {
                phase,
                source: PhaseSource::Manual,
                frame_index,
            },
            None => PhasePrediction {
                phase: inferred,
                source: PhaseSource::Inferred,
                frame_index,
            },
        }
    }

    pub fn manual_phase(&self) -> Option<Phase> {
        self.state.phase().or(self.covered)
    }

    pub fn reset(&mut self) {
        self.state = OverrideState::NoOverride;
        self.covered = None;
    }
}
