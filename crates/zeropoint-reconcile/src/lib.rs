//! # Zeropoint Reconcile
//!
//! Phased, single-flight reconciliation of intent onto the host.
//!
//! The [`Executor`] runs six ordered phases (probe, storage, vars, modules,
//! exposures, convergence) against a [`StateStore`](zeropoint_state::StateStore),
//! a [`Probe`] and a [`CommandRegistry`]. Reality is fast-forwarded to the
//! captured intent commit only after the host is verified to match it.

pub mod command;
pub mod executor;
pub mod phases;
pub mod probe;
pub mod vars;

pub use command::{Command, CommandContext, CommandRegistry, CommandRegistryBuilder};
pub use executor::{EngineState, Executor, ExecutorConfig, RebootPolicy, ReconcileState};
pub use phases::{first_divergence, Mismatch, Phase};
pub use probe::{probed_tables, Probe};
pub use vars::{UnresolvedVar, VarResolver};
