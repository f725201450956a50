//! # Zeropoint State
//!
//! Versioned dual-branch state store.
//!
//! Two branches share one append-only, content-addressed history:
//! `intent` records what should exist, `reality` what is known to be applied.
//! Reality only ever moves by fast-forwarding to an intent commit.
//! Reads are served by a relational cache that can be rebuilt from the log.

pub mod atomic;
pub mod branch;
pub mod cache;
pub mod checkout;
pub mod log;
pub mod store;

pub use branch::{Branch, BranchSnapshot, BranchStatus};
pub use cache::RelationalCache;
pub use checkout::Checkout;
pub use log::{Commit, ResourceLog};
pub use store::{FileStateStore, StateStore, StoreConfig, DEFAULTS_ENV, INITIAL_MESSAGE};
