//! Experiment orchestration.
//!
//! [`ExperimentRunner`] drives a long-running, pausable imaging job: it
//! walks a generated plate path, synchronizes motion completion with frame
//! capture at every well, persists images under a deterministic naming
//! contract, and repeats iterations until the duration budget runs out.
//!
//! # Lifecycle
//!
//! ```text
//! Idle -> Configured -> Running <-> Paused -> (Completed | Stopped | Errored)
//! ```
//!
//! Terminal states require another `configure` before a new run. Pause and
//! stop are cooperative flags checked at well-visit boundaries; an
//! in-flight move+dwell+capture+save always completes, so no partial file
//! is ever written.

pub mod record;
pub mod runner;

pub use record::ExperimentRecord;
pub use runner::{Callbacks, ExperimentRunner, RunConfig, RunStatus};
