//! Simulated ledger - implements `LedgerGateway` in process
//!
//! Submissions pass a precondition check, wait in a bounded mempool and are
//! executed when a block is mined. Confirmation waits resolve once the
//! transaction's receipt exists. Fault hooks let tests drive every error path
//! a real transport can produce.

use crate::{
    block_producer::BlockUpdate, ledger_store::LedgerStore, processor::RoscaProcessor,
    MEMPOOL_CAPACITY,
};
use async_trait::async_trait;
use circle_types::{
    Address, Amount, BlockHeight, CircleId, GatewayError, LedgerCall, LedgerRead, ReadValue,
    Receipt, ReceiptStatus, Timestamp, TxHash,
};
use crossbeam_channel::{bounded, Receiver, Sender};
use dashmap::{DashMap, DashSet};
use ledger_gateway::{BatchResult, Clock, LedgerGateway, ManualClock};
use parking_lot::Mutex;
use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tokio::sync::{broadcast, watch};

/// A transaction waiting for inclusion
#[derive(Clone, Debug)]
struct PendingTx {
    hash: TxHash,
    from: Address,
    call: LedgerCall,
}

/// Record of an accepted submission (for assertions on call order)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubmittedCall {
    pub hash: TxHash,
    pub from: Address,
    pub call: LedgerCall,
    /// Chain height when the call was accepted
    pub height: BlockHeight,
}

/// One-shot fault counters; each hit consumes one
#[derive(Default, Debug)]
struct Faults {
    reject_signatures: u32,
    fail_submissions: u32,
    fail_confirmations: u32,
    revert_inclusions: u32,
    fail_batches: u32,
    unavailable_circles: HashSet<CircleId>,
}

fn take(counter: &mut u32) -> bool {
    if *counter > 0 {
        *counter -= 1;
        true
    } else {
        false
    }
}

/// In-process ledger with the ROSCA program and a token ledger
pub struct SimulatedLedger {
    processor: RoscaProcessor,
    clock: Arc<dyn Clock>,
    manual_clock: Option<ManualClock>,
    mempool_tx: Sender<PendingTx>,
    mempool_rx: Receiver<PendingTx>,
    pending: DashSet<TxHash>,
    receipts: DashMap<TxHash, Receipt>,
    height: watch::Sender<BlockHeight>,
    updates: broadcast::Sender<BlockUpdate>,
    nonce: AtomicU64,
    read_batches: AtomicU64,
    submissions: Mutex<Vec<SubmittedCall>>,
    faults: Mutex<Faults>,
}

impl SimulatedLedger {
    /// Create a ledger whose program lives at `program`
    pub fn new(program: Address, clock: Arc<dyn Clock>) -> Self {
        let (mempool_tx, mempool_rx) = bounded(MEMPOOL_CAPACITY);
        let (height, _) = watch::channel(0);
        let (updates, _) = broadcast::channel(64);

        Self {
            processor: RoscaProcessor::new(LedgerStore::new(), program),
            clock,
            manual_clock: None,
            mempool_tx,
            mempool_rx,
            pending: DashSet::new(),
            receipts: DashMap::new(),
            height,
            updates,
            nonce: AtomicU64::new(0),
            read_batches: AtomicU64::new(0),
            submissions: Mutex::new(Vec::new()),
            faults: Mutex::new(Faults::default()),
        }
    }

    /// Ledger driven by a manually advanced clock starting at `start`
    pub fn with_manual_clock(program: Address, start: Timestamp) -> Self {
        let clock = ManualClock::new(start);
        let mut ledger = Self::new(program, Arc::new(clock.clone()));
        ledger.manual_clock = Some(clock);
        ledger
    }

    /// Current ledger time
    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// The clock block timestamps are taken from
    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    /// Move ledger time forward; only effective with a manual clock
    pub fn advance_time(&self, secs: u64) -> bool {
        match &self.manual_clock {
            Some(clock) => {
                clock.advance(secs);
                true
            }
            None => {
                tracing::warn!("advance_time ignored: ledger runs on the system clock");
                false
            }
        }
    }

    pub fn store(&self) -> &LedgerStore {
        self.processor.store()
    }

    pub fn height(&self) -> BlockHeight {
        *self.height.borrow()
    }

    /// Subscribe to full block summaries
    pub fn subscribe_updates(&self) -> broadcast::Receiver<BlockUpdate> {
        self.updates.subscribe()
    }

    /// Mine a block containing every queued transaction
    pub fn mine_block(&self) -> BlockUpdate {
        self.mine_block_limited(usize::MAX)
    }

    /// Mine a block containing at most `max_txs` queued transactions
    pub fn mine_block_limited(&self, max_txs: usize) -> BlockUpdate {
        let now = self.clock.now();
        let height = self.height() + 1;
        let mut receipts = Vec::new();

        while receipts.len() < max_txs {
            let Ok(tx) = self.mempool_rx.try_recv() else {
                break;
            };

            let forced = take(&mut self.faults.lock().revert_inclusions);
            let status = if forced {
                ReceiptStatus::Reverted {
                    reason: "forced revert".to_string(),
                }
            } else {
                match self.processor.execute(tx.from, &tx.call, now) {
                    Ok(()) => ReceiptStatus::Success,
                    Err(e) => ReceiptStatus::Reverted {
                        reason: e.to_string(),
                    },
                }
            };

            if let ReceiptStatus::Reverted { reason } = &status {
                tracing::debug!("{} reverted at block {}: {}", tx.call, height, reason);
            }

            let receipt = Receipt {
                hash: tx.hash,
                block: height,
                status,
            };
            // Receipt lands before the hash leaves the pending set
            self.receipts.insert(tx.hash, receipt.clone());
            self.pending.remove(&tx.hash);
            receipts.push(receipt);
        }

        self.height.send_replace(height);

        let update = BlockUpdate {
            height,
            timestamp: now,
            receipts,
        };
        let _ = self.updates.send(update.clone());
        update
    }

    /// Mint and approve outside of any transaction (fixture setup)
    pub fn fund(&self, token: Address, owner: Address, balance: Amount) {
        self.store().set_balance(token, owner, balance);
    }

    /// Set an allowance directly (fixture setup)
    pub fn set_allowance(&self, token: Address, owner: Address, amount: Amount) {
        self.store()
            .set_allowance(token, owner, self.processor.program(), amount);
    }

    /// Administrative cancellation
    pub fn cancel_circle(&self, circle_id: CircleId) -> bool {
        self.processor.cancel_circle(circle_id).is_ok()
    }

    /// Every accepted submission in order
    pub fn submitted_calls(&self) -> Vec<SubmittedCall> {
        self.submissions.lock().clone()
    }

    /// Number of batched read round trips served
    pub fn read_batch_count(&self) -> u64 {
        self.read_batches.load(Ordering::SeqCst)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// The signer rejects the next submission
    pub fn reject_next_signature(&self) {
        self.faults.lock().reject_signatures += 1;
    }

    /// The next submission fails in transport
    pub fn fail_next_submission(&self) {
        self.faults.lock().fail_submissions += 1;
    }

    /// The next confirmation wait fails in transport
    pub fn fail_next_confirmation(&self) {
        self.faults.lock().fail_confirmations += 1;
    }

    /// The next included transaction reverts regardless of state
    pub fn revert_next_inclusion(&self) {
        self.faults.lock().revert_inclusions += 1;
    }

    /// The next batched read fails as a whole
    pub fn fail_next_batch(&self) {
        self.faults.lock().fail_batches += 1;
    }

    /// Reads touching `circle_id` fail until restored
    pub fn fail_reads_for(&self, circle_id: CircleId) {
        self.faults.lock().unavailable_circles.insert(circle_id);
    }

    pub fn restore_reads_for(&self, circle_id: CircleId) {
        self.faults.lock().unavailable_circles.remove(&circle_id);
    }

    fn next_hash(&self, from: &Address, call: &LedgerCall) -> TxHash {
        let nonce = self.nonce.fetch_add(1, Ordering::SeqCst);
        let mut hasher = blake3::Hasher::new();
        hasher.update(&nonce.to_le_bytes());
        hasher.update(&from.0);
        hasher.update(format!("{:?}", call).as_bytes());
        TxHash(*hasher.finalize().as_bytes())
    }

    fn read_one(&self, request: LedgerRead) -> Result<ReadValue, GatewayError> {
        let store = self.store();
        let circle = |id: CircleId| {
            store.get_circle(id).ok_or_else(|| GatewayError::Validation {
                reason: format!("circle {} does not exist", id),
            })
        };

        match request {
            LedgerRead::NextCircleId => Ok(ReadValue::CircleId(store.next_circle_id())),
            LedgerRead::CircleInfo(id) => Ok(ReadValue::CircleInfo(circle(id)?.info_tuple())),
            LedgerRead::CircleDetails(id) => {
                Ok(ReadValue::CircleDetails(circle(id)?.details_tuple()))
            }
            LedgerRead::Members(id) => Ok(ReadValue::Addresses(circle(id)?.members)),
            LedgerRead::PayoutOrder(id) => Ok(ReadValue::Addresses(circle(id)?.payout_order())),
            LedgerRead::InsurancePool(id) => Ok(ReadValue::Amount(circle(id)?.insurance_pool)),
            LedgerRead::MemberInfo(id, addr) => {
                Ok(ReadValue::MemberInfo(circle(id)?.member_tuple(&addr)))
            }
            LedgerRead::PendingPayout(id, addr) => Ok(ReadValue::Amount(
                circle(id)?.pending_payouts.get(&addr).copied().unwrap_or(0),
            )),
            LedgerRead::RoundDeposited(id, round, addr) => Ok(ReadValue::Bool(
                circle(id)?.deposits.contains(&(round, addr)),
            )),
            LedgerRead::Allowance {
                token,
                owner,
                spender,
            } => Ok(ReadValue::Amount(store.allowance(&token, &owner, &spender))),
            LedgerRead::BalanceOf { token, owner } => {
                Ok(ReadValue::Amount(store.balance(&token, &owner)))
            }
        }
    }
}

fn read_circle_id(request: &LedgerRead) -> Option<CircleId> {
    match request {
        LedgerRead::CircleInfo(id)
        | LedgerRead::CircleDetails(id)
        | LedgerRead::Members(id)
        | LedgerRead::PayoutOrder(id)
        | LedgerRead::InsurancePool(id)
        | LedgerRead::MemberInfo(id, _)
        | LedgerRead::PendingPayout(id, _)
        | LedgerRead::RoundDeposited(id, _, _) => Some(*id),
        _ => None,
    }
}

#[async_trait]
impl LedgerGateway for SimulatedLedger {
    fn program_address(&self) -> Address {
        self.processor.program()
    }

    fn subscribe_blocks(&self) -> watch::Receiver<BlockHeight> {
        self.height.subscribe()
    }

    async fn block_number(&self) -> Result<BlockHeight, GatewayError> {
        Ok(self.height())
    }

    async fn read_batch(&self, requests: Vec<LedgerRead>) -> Result<BatchResult, GatewayError> {
        self.read_batches.fetch_add(1, Ordering::SeqCst);

        let unavailable = {
            let mut faults = self.faults.lock();
            if take(&mut faults.fail_batches) {
                return Err(GatewayError::Transport("batch request failed".to_string()));
            }
            faults.unavailable_circles.clone()
        };

        Ok(requests
            .into_iter()
            .map(|request| match read_circle_id(&request) {
                Some(id) if unavailable.contains(&id) => Err(GatewayError::Unavailable {
                    what: format!("circle {}", id),
                }),
                _ => self.read_one(request),
            })
            .collect())
    }

    async fn submit(&self, from: Address, call: LedgerCall) -> Result<TxHash, GatewayError> {
        {
            let mut faults = self.faults.lock();
            if take(&mut faults.reject_signatures) {
                return Err(GatewayError::SignatureRejected);
            }
            if take(&mut faults.fail_submissions) {
                return Err(GatewayError::Transport("connection reset".to_string()));
            }
        }

        self.processor
            .check(from, &call, self.clock.now())
            .map_err(|e| GatewayError::Validation {
                reason: e.to_string(),
            })?;

        let hash = self.next_hash(&from, &call);
        self.pending.insert(hash);
        if let Err(e) = self.mempool_tx.try_send(PendingTx {
            hash,
            from,
            call: call.clone(),
        }) {
            self.pending.remove(&hash);
            return Err(GatewayError::Transport(format!("mempool rejected tx: {}", e)));
        }

        self.submissions.lock().push(SubmittedCall {
            hash,
            from,
            call,
            height: self.height(),
        });

        Ok(hash)
    }

    async fn wait_for_receipt(&self, hash: TxHash) -> Result<Receipt, GatewayError> {
        if take(&mut self.faults.lock().fail_confirmations) {
            return Err(GatewayError::Transport("lost connection while waiting".to_string()));
        }

        let mut heights = self.height.subscribe();
        let receipt = loop {
            if let Some(receipt) = self.receipts.get(&hash).map(|r| r.clone()) {
                break receipt;
            }
            if !self.pending.contains(&hash) {
                match self.receipts.get(&hash).map(|r| r.clone()) {
                    Some(receipt) => break receipt,
                    None => return Err(GatewayError::UnknownTransaction(hash)),
                }
            }
            heights
                .changed()
                .await
                .map_err(|_| GatewayError::Transport("ledger stopped".to_string()))?;
        };

        // Hold the receipt back until its block is published
        heights
            .wait_for(|height| *height >= receipt.block)
            .await
            .map_err(|_| GatewayError::Transport("ledger stopped".to_string()))?;
        Ok(receipt)
    }
}
