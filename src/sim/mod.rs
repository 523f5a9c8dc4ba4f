//! The scheduling and synchronization engine.
//!
//! - [`launcher`]: per-dispatch-target cursors, event queues and
//!   in-flight op entries
//! - [`signal`]: value canonicalization, iteration multipliers and the
//!   signal readiness oracle
//! - [`engine`]: the four-phase event loop over one virtual clock
//!
//! The usual entry point is [`simulate`], which locates the top-level
//! `graph` function, validates its signature and runs it to completion.

pub mod engine;
pub mod launcher;
pub mod signal;

pub use engine::{simulate, SimStats, Simulator};
pub use launcher::{Launcher, OpEntry};
pub use signal::SignalState;

use thiserror::Error;

use crate::device::DeviceError;
use crate::ir::Type;

/// Everything that can abort a simulation.
///
/// None of these are recovered locally: the simulator is a batch tool,
/// and the driver terminates the run after flushing the trace prefix.
#[derive(Debug, Error)]
pub enum SimError {
    /// The module has no function with the requested entry name.
    #[error("top-level function `{0}` not found")]
    TopLevelNotFound(String),

    /// The entry function takes an argument the simulator cannot model.
    #[error("unsupported top-level argument type {0:?}; only tensor arguments are supported")]
    UnsupportedArgument(Type),

    /// Device creation or addressing failed.
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// A for-loop bound does not fold to a constant.
    #[error("for-loop bound does not fold to a constant")]
    NonConstantBound,

    /// A for-loop whose body would never (or negatively) execute; the
    /// walker unconditionally enters loop bodies, so this cannot be
    /// simulated.
    #[error("for-loop trip count must be positive, got {0}")]
    NonPositiveTripCount(i64),

    /// An async op names a dispatch target no launcher exists for.
    #[error("no launcher for dispatch target of `{0}`")]
    UnknownLauncher(String),

    /// A memory op consumes a value that is not a buffer allocation.
    #[error("`{0}` consumes a value that is not a buffer allocation")]
    NotABuffer(String),

    /// A full tick drained nothing, started nothing, retired nothing
    /// and could not advance time.
    #[error("deadlock at t={time}: no launcher can make progress\n{snapshot}")]
    Deadlock { time: u64, snapshot: String },

    /// Trace sink failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
