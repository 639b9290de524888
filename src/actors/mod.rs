//! Actor-based scheduling
//!
//! Each probe runs in its own task, communicating via Tokio channels.
//!
//! ```text
//!                  ┌──────────────────┐
//!                  │   Supervisor     │ ◄── Reload / CheckNow / Probes / StatusUpdate / Shutdown
//!                  └────────┬─────────┘
//!                           │ spawns (one per resolved probe)
//!             ┌─────────────┼─────────────┐
//!             │             │             │
//!     ┌───────▼──────┐      │     ┌───────▼──────┐
//!     │ ProbeActor-1 │      │     │ ProbeActor-N │ ── Orchestrator::run_cycle
//!     └───────┬──────┘      │     └───────┬──────┘
//!             └─────────────┼─────────────┘
//!                           │
//!                ┌──────────▼─────────┐
//!                │ Broadcast Channel  │ (CycleReport)
//!                └────────────────────┘
//! ```
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: each actor has an mpsc command channel for control messages
//! 2. **Events**: cycle reports are published to a broadcast channel
//! 3. **Request/Response**: oneshot channels for synchronous queries
//! 4. **Cancellation**: every probe actor holds a child of the supervisor's token

pub mod messages;
pub mod probe;
pub mod supervisor;

pub use messages::{ProbeCommand, ProbeSummary, ReloadSummary, SupervisorCommand};
pub use probe::{ProbeActor, ProbeHandle};
pub use supervisor::{Supervisor, SupervisorHandle};
