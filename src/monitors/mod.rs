//! Alert state tracking
//!
//! [`threshold`] turns raw per-cycle observations into debounced incident and
//! recovery transitions, [`state`] holds the per-(probe, alert) buckets and
//! [`incident`] records the resulting unhealthy periods.

pub mod incident;
pub mod state;
pub mod threshold;

pub use incident::{Incident, IncidentLog};
pub use state::{AlertStateStore, MemoryStateStore};
pub use threshold::{AlertState, Emission, ReportingMode, ThresholdEvaluation, Thresholds};
