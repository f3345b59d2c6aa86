//! # Execution Engine
//!
//! Executables, their dependency plans and the reconciliation driver that makes them
//! real on devices.
//!
//! - [`executable`] - data model (slots, states, variants, state reports)
//! - [`store`] - persistence seam for executables
//! - [`plan`] - [`ExecutionPlan`] / [`ReverseExecutionPlan`] batch schedulers
//! - [`executor`] - [`Executor`], one reconciliation pass per reference instant
//! - [`daemon`] - periodic driver for the executor

pub mod daemon;
pub mod executable;
pub mod executor;
pub mod plan;
pub mod store;

pub use daemon::ExecutorDaemon;
pub use executable::{
    ConnectionSpec, DeviceId, Executable, ExecutableId, ExecutableKind, ExecutableState,
    ExecutionPhase, RecordingService, ReportEntry, RoomEndpoint, RoomSpec, Slot, StateReport,
};
pub use executor::{ExecutionResult, Executor, ExecutorConfig};
pub use plan::{ExecutionPlan, PlanError, ReverseExecutionPlan};
pub use store::{ExecutableStore, MemoryExecutableStore};
