use serde::Serialize;

/// Consecutive observations needed to flip an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub incident: usize,
    pub recovery: usize,
}

impl Thresholds {
    pub fn new(incident: usize, recovery: usize) -> Self {
        Self {
            incident: incident.max(1),
            recovery: recovery.max(1),
        }
    }
}

/// Counters of one (probe, alert) bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AlertState {
    pub consecutive_triggered: usize,
    pub consecutive_cleared: usize,
    pub total_triggered: usize,
    pub total_cleared: usize,
    pub is_down: bool,

    /// No observation has been applied yet
    pub is_first_time: bool,
}

impl Default for AlertState {
    fn default() -> Self {
        Self {
            consecutive_triggered: 0,
            consecutive_cleared: 0,
            total_triggered: 0,
            total_cleared: 0,
            is_down: false,
            is_first_time: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ThresholdEvaluation {
    /// Up and not triggered
    Healthy,

    /// Up, triggered but below the incident threshold
    Degrading,

    /// Just crossed the incident threshold
    Incident,

    /// Down and still triggered
    Down,

    /// Down, cleared but below the recovery threshold
    Recovering,

    /// Just crossed the recovery threshold
    Recovery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Emission {
    Incident,
    Recovery,

    /// First observation of an alert resumed in the down state, see
    /// [`ReportingMode::Symon`]
    ResumedIncident,
}

impl ThresholdEvaluation {
    pub fn emission(&self) -> Option<Emission> {
        match self {
            ThresholdEvaluation::Incident => Some(Emission::Incident),
            ThresholdEvaluation::Recovery => Some(Emission::Recovery),
            _ => None,
        }
    }
}

impl AlertState {
    /// Bucket resumed from an open incident of a previous run.
    pub fn seeded_down() -> Self {
        Self {
            is_down: true,
            ..Default::default()
        }
    }

    /// Apply one observation, returning the new state and what happened.
    ///
    /// Crossing a threshold always flips `is_down`, so each crossing is
    /// reported exactly once. Counts above a threshold only occur after the
    /// thresholds were lowered by a reload; they flip on the next observation.
    pub fn step(&self, triggered: bool, thresholds: Thresholds) -> (AlertState, ThresholdEvaluation) {
        let mut next = *self;
        next.is_first_time = false;

        if triggered {
            next.consecutive_triggered += 1;
            next.consecutive_cleared = 0;
            next.total_triggered += 1;
        } else {
            next.consecutive_cleared += 1;
            next.consecutive_triggered = 0;
            next.total_cleared += 1;
        }

        let evaluation = match (self.is_down, triggered) {
            (false, false) => ThresholdEvaluation::Healthy,
            (false, true) if next.consecutive_triggered >= thresholds.incident => {
                next.is_down = true;
                ThresholdEvaluation::Incident
            }
            (false, true) => ThresholdEvaluation::Degrading,
            (true, true) => ThresholdEvaluation::Down,
            (true, false) if next.consecutive_cleared >= thresholds.recovery => {
                next.is_down = false;
                ThresholdEvaluation::Recovery
            }
            (true, false) => ThresholdEvaluation::Recovering,
        };

        (next, evaluation)
    }

    /// In-place variant of [`AlertState::step`].
    pub fn observe(&mut self, triggered: bool, thresholds: Thresholds) -> ThresholdEvaluation {
        let (next, evaluation) = self.step(triggered, thresholds);
        *self = next;
        evaluation
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum ReportingMode {
    #[default]
    Standalone,

    /// Reporting to an upstream server: the first observation of a resumed
    /// incident that is still triggered is reported again.
    Symon,
}

impl ReportingMode {
    /// What to notify for an observation applied to `previous`.
    pub fn emission(
        &self,
        previous: &AlertState,
        triggered: bool,
        evaluation: ThresholdEvaluation,
    ) -> Option<Emission> {
        if let Some(emission) = evaluation.emission() {
            return Some(emission);
        }

        match self {
            ReportingMode::Symon if previous.is_first_time && previous.is_down && triggered => {
                Some(Emission::ResumedIncident)
            }
            _ => None,
        }
    }
}
