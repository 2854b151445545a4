//! Transaction Submitter - two-phase writes to the ledger

use crate::LedgerGateway;
use circle_types::{Address, GatewayError, LedgerCall, Receipt, TxHash};
use std::sync::Arc;

/// Submits calls on behalf of one signer and awaits their confirmation
#[derive(Clone)]
pub struct TxSubmitter {
    gateway: Arc<dyn LedgerGateway>,
    signer: Address,
}

impl TxSubmitter {
    pub fn new(gateway: Arc<dyn LedgerGateway>, signer: Address) -> Self {
        Self { gateway, signer }
    }

    pub fn signer(&self) -> Address {
        self.signer
    }

    /// Phase one: sign and hand the call to the ledger
    pub async fn submit(&self, call: LedgerCall) -> Result<TxHash, GatewayError> {
        let label = call.to_string();
        match self.gateway.submit(self.signer, call).await {
            Ok(hash) => {
                tracing::debug!("Submitted {} from {} as {}", label, self.signer.short(), hash);
                Ok(hash)
            }
            Err(e) => {
                tracing::debug!("Submission of {} failed: {}", label, e);
                Err(e)
            }
        }
    }

    /// Phase two: wait for inclusion; a reverted receipt becomes an error
    pub async fn confirm(&self, hash: TxHash) -> Result<Receipt, GatewayError> {
        let receipt = self.gateway.wait_for_receipt(hash).await?;
        if !receipt.is_success() {
            tracing::warn!("Transaction {} reverted in block {}", hash, receipt.block);
        }
        receipt.into_result()
    }

    /// Both phases back to back
    pub async fn submit_and_confirm(&self, call: LedgerCall) -> Result<Receipt, GatewayError> {
        let hash = self.submit(call).await?;
        self.confirm(hash).await
    }
}
