//! The agent's view of, and hands on, this machine.

pub mod commands;
pub mod ledger;
pub mod probe;

pub use commands::registry;
pub use ledger::{current_boot_id, HostLedger, LEDGER_FILE};
pub use probe::LedgerProbe;
