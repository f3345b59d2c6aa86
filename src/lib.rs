#![allow(clippy::doc_markdown)] // Allow technical terms like AdobeConnect, SOAP in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Conference Broker Core
//!
//! Execution engine that turns scheduled videoconferencing resources (rooms, connections,
//! recordings) into live objects on heterogeneous devices, and keeps device-side artifacts
//! consistent with the controller's view afterwards.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐   ┌───────────────┐   ┌───────────────────┐   ┌──────────┐
//! │ ExecutableStore  │──▶│   Executor    │──▶│ ConnectorRegistry │──▶│ Connector│──▶ device
//! │ (slots + edges)  │   │ (per instant) │   │ (timeout channel) │   │ (vendor) │
//! └──────────────────┘   └───────┬───────┘   └───────────────────┘   └────┬─────┘
//!                                │                                        │
//!                        ExecutionPlan /                       background reconciliation
//!                        ReverseExecutionPlan                  (capacity, recordings)
//! ```
//!
//! ## Module Organization
//!
//! - [`execution`] - executables, dependency plans and the reconciliation driver
//! - [`connector`] - uniform device command surface and the vendor connectors
//! - [`storage`] - managed storage backend for relocated recordings
//! - [`config`] - layered configuration and opaque connector options
//! - [`error`] - structured error handling
//! - [`logging`] - tracing subscriber setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use conference_broker::connector::ConnectorRegistry;
//! use conference_broker::execution::{Executor, ExecutorConfig, MemoryExecutableStore};
//!
//! # async fn example() -> conference_broker::Result<()> {
//! let store = Arc::new(MemoryExecutableStore::new());
//! let connectors = Arc::new(ConnectorRegistry::new(std::time::Duration::from_secs(60)));
//! let executor = Executor::new(store, connectors, ExecutorConfig::default());
//!
//! let result = executor.execute(chrono::Utc::now()).await?;
//! println!("started {} executables", result.started.len());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connector;
pub mod constants;
pub mod error;
pub mod execution;
pub mod logging;
pub mod storage;

pub use config::{BrokerConfig, ConfigLoader, ConnectorOptions};
pub use error::{BrokerError, Result};
pub use execution::{
    DeviceId, Executable, ExecutableId, ExecutableState, ExecutionPlan, ExecutionResult, Executor,
    ReverseExecutionPlan,
};
