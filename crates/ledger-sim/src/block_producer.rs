//! Block Producer - fixed-interval block loop for the simulated ledger

use crate::{ledger::SimulatedLedger, BLOCK_TIME_MS, MAX_TXS_PER_BLOCK};
use circle_types::{BlockHeight, Receipt, Timestamp};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::task::JoinHandle;

/// Summary of one produced block
#[derive(Clone, Debug)]
pub struct BlockUpdate {
    /// Block height
    pub height: BlockHeight,
    /// Block timestamp
    pub timestamp: Timestamp,
    /// Receipts of the transactions included in this block
    pub receipts: Vec<Receipt>,
}

impl BlockUpdate {
    pub fn transaction_count(&self) -> usize {
        self.receipts.len()
    }
}

/// Block producer configuration
#[derive(Clone, Debug)]
pub struct BlockProducerConfig {
    /// Block time in milliseconds
    pub block_time_ms: u64,
    /// Maximum transactions per block
    pub max_txs_per_block: usize,
    /// Log every block, not just non-empty ones
    pub verbose: bool,
}

impl Default for BlockProducerConfig {
    fn default() -> Self {
        Self {
            block_time_ms: BLOCK_TIME_MS,
            max_txs_per_block: MAX_TXS_PER_BLOCK,
            verbose: false,
        }
    }
}

/// Runs `mine_block` on a tokio interval until stopped
pub struct BlockProducer {
    ledger: Arc<SimulatedLedger>,
    config: BlockProducerConfig,
    running: Arc<AtomicBool>,
}

impl BlockProducer {
    pub fn new(ledger: Arc<SimulatedLedger>, config: BlockProducerConfig) -> Self {
        Self {
            ledger,
            config,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Handle that stops the loop after its current tick
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    /// Spawn the block loop on the current runtime
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Run the block loop
    pub async fn run(self) {
        self.running.store(true, Ordering::SeqCst);

        let block_duration = Duration::from_millis(self.config.block_time_ms.max(1));
        let mut interval = tokio::time::interval(block_duration);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        tracing::info!(
            "Block producer started ({}ms blocks, up to {} txs)",
            self.config.block_time_ms,
            self.config.max_txs_per_block
        );

        while self.running.load(Ordering::SeqCst) {
            interval.tick().await;
            let update = self.ledger.mine_block_limited(self.config.max_txs_per_block);

            if self.config.verbose || update.transaction_count() > 0 {
                tracing::debug!(
                    "Block {} | {} txs | ts {}",
                    update.height,
                    update.transaction_count(),
                    update.timestamp
                );
            }
        }

        tracing::info!("Block producer stopped at height {}", self.ledger.height());
    }
}
