//! Message types for actor communication
//!
//! 1. **Commands**: request/response messages sent to one actor via mpsc
//! 2. **Events**: [`CycleReport`]s broadcast to every subscriber

use serde::Serialize;
use tokio::sync::oneshot;

use crate::config::{Config, ConfigError};
use crate::notify::DispatchError;
use crate::orchestrator::{CycleCancelled, CycleReport};
use crate::probe::Probe;

/// Commands that can be sent to a ProbeActor
#[derive(Debug)]
pub enum ProbeCommand {
    /// Run a cycle right away, bypassing the interval timer
    CheckNow {
        respond_to: oneshot::Sender<Result<CycleReport, CycleCancelled>>,
    },

    /// Update the polling interval
    ///
    /// The timer restarts, the next cycle is one new interval away.
    UpdateInterval { interval_secs: u64 },

    /// Stop after the current cycle
    Shutdown,
}

/// Commands that can be sent to the Supervisor
#[derive(Debug)]
pub enum SupervisorCommand {
    /// Replace the running configuration
    ///
    /// An invalid configuration is rejected and the current one stays active.
    Reload {
        config: Box<Config>,
        respond_to: oneshot::Sender<Result<ReloadSummary, ConfigError>>,
    },

    /// Run one cycle of a probe right away
    CheckNow {
        probe_id: String,
        respond_to: oneshot::Sender<Option<Result<CycleReport, CycleCancelled>>>,
    },

    /// List the running probes
    Probes {
        respond_to: oneshot::Sender<Vec<ProbeSummary>>,
    },

    /// Send a status update notification now
    StatusUpdate {
        respond_to: oneshot::Sender<Result<(), DispatchError>>,
    },

    /// Stop every probe and send the termination notification
    Shutdown { respond_to: oneshot::Sender<()> },
}

/// What a reload changed, by probe id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReloadSummary {
    pub kept: Vec<String>,
    pub added: Vec<String>,
    pub removed: Vec<String>,

    /// New ids that took over the state of probes compaction grouped differently
    pub regrouped: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeSummary {
    pub id: String,
    pub name: String,
    pub target: String,
    pub interval_secs: u64,

    /// Configured probes folded into this one by compaction
    pub source_ids: Vec<String>,
}

impl From<&Probe> for ProbeSummary {
    fn from(probe: &Probe) -> Self {
        Self {
            id: probe.id.clone(),
            name: probe.name.clone(),
            target: probe.target(),
            interval_secs: probe.interval.as_secs(),
            source_ids: probe.source_ids.clone(),
        }
    }
}
