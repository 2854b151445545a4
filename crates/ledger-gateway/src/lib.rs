//! Ledger Gateway - async access to the ROSCA ledger program
//!
//! Handles communication with the ledger:
//! - Batched and single reads of circle, member and token state
//! - Two-phase writes: submit (returns a hash) then await confirmation
//! - Block-height notifications that drive snapshot refreshes

pub mod clock;
pub mod reader;
pub mod submitter;

pub use clock::{Clock, ManualClock, SystemClock};
pub use reader::CircleReader;
pub use submitter::TxSubmitter;

use async_trait::async_trait;
use circle_types::{
    Address, BlockHeight, GatewayError, LedgerCall, LedgerRead, ReadValue, Receipt, TxHash,
};
use tokio::sync::watch;

/// Per-request outcome of a batched read
pub type BatchResult = Vec<Result<ReadValue, GatewayError>>;

/// The authoritative ledger as seen by the client
///
/// Implementations own all circle, member, round and token state; callers
/// only ever hold copies. Submission and confirmation are separate suspension
/// points so a flow can sequence dependent calls on confirmation.
#[async_trait]
pub trait LedgerGateway: Send + Sync {
    /// Address of the ROSCA program (the spender for token approvals)
    fn program_address(&self) -> Address;

    /// Receiver that observes every new block height
    fn subscribe_blocks(&self) -> watch::Receiver<BlockHeight>;

    /// Current block height
    async fn block_number(&self) -> Result<BlockHeight, GatewayError>;

    /// Issue many reads in one round trip
    ///
    /// The outer error is a whole-request transport failure; a failed entry
    /// does not abort the rest of the batch.
    async fn read_batch(&self, requests: Vec<LedgerRead>) -> Result<BatchResult, GatewayError>;

    /// Single read
    async fn read(&self, request: LedgerRead) -> Result<ReadValue, GatewayError> {
        let what = format!("{:?}", request);
        self.read_batch(vec![request])
            .await?
            .into_iter()
            .next()
            .unwrap_or(Err(GatewayError::Unavailable { what }))
    }

    /// Sign and submit a call; resolves once the ledger accepted it
    async fn submit(&self, from: Address, call: LedgerCall) -> Result<TxHash, GatewayError>;

    /// Suspend until the transaction is included, returning its receipt
    ///
    /// A reverted transaction still yields `Ok`; callers inspect the status.
    async fn wait_for_receipt(&self, hash: TxHash) -> Result<Receipt, GatewayError>;
}
