//! Simulated Ledger - in-process ROSCA program and token ledger
//!
//! This crate provides a ledger the client can run against without a chain:
//! - Circle, member, round and payout state in DashMap-backed storage
//! - A bounded mempool drained into blocks, manually or on an interval
//! - Receipts, block-height notifications and fault injection for tests

pub mod block_producer;
pub mod error;
pub mod ledger;
pub mod ledger_store;
pub mod processor;

pub use block_producer::{BlockProducer, BlockProducerConfig, BlockUpdate};
pub use error::ProgramError;
pub use ledger::{SimulatedLedger, SubmittedCall};
pub use ledger_store::{CircleRecord, LedgerStore, MemberRecord};
pub use processor::{required_join_deposit, RoscaProcessor};

/// Default block time in milliseconds
pub const BLOCK_TIME_MS: u64 = 1_000;

/// Maximum transactions per block
pub const MAX_TXS_PER_BLOCK: usize = 64;

/// Mempool capacity
pub const MEMPOOL_CAPACITY: usize = 1024;
