//! Probe backed by the host ledger.

use std::sync::Arc;

use async_trait::async_trait;
use zeropoint_core::{Result, Snapshot};
use zeropoint_reconcile::Probe;

use super::ledger::HostLedger;

/// Reports the ledger's view of the host.
#[derive(Debug, Clone)]
pub struct LedgerProbe {
    ledger: Arc<HostLedger>,
}

impl LedgerProbe {
    pub fn new(ledger: Arc<HostLedger>) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl Probe for LedgerProbe {
    async fn probe(&self) -> Result<Snapshot> {
        Ok(self.ledger.snapshot())
    }
}
