//! End-to-end flow tests against the simulated ledger

mod flow_test;

use crate::{
    aggregator::SnapshotAggregator, config::CoreConfig, flow::FlowRecord,
    notifications::NotificationCenter, orchestrator::FlowOrchestrator,
};
use circle_types::{Address, Amount, CircleId, CircleParams, LedgerCall, PERIOD_WEEKLY};
use ledger_gateway::LedgerGateway;
use ledger_sim::{BlockProducer, BlockProducerConfig, SimulatedLedger};
use std::{sync::Arc, time::Duration};
use tokio::{sync::watch, task::JoinHandle};

pub const PROGRAM: u64 = 0xface;
pub const USDC: u64 = 0x05dc;
pub const USDT: u64 = 0x05dd;
pub const START: u64 = 1_700_000_000;

pub fn usdc() -> Address {
    Address::from_low_u64(USDC)
}

pub fn usdt() -> Address {
    Address::from_low_u64(USDT)
}

pub struct Harness {
    pub ledger: Arc<SimulatedLedger>,
    pub aggregator: Arc<SnapshotAggregator>,
    pub config: CoreConfig,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(CoreConfig {
            flow_reset_delay_ms: 60_000,
            ..CoreConfig::default()
        })
    }

    pub fn with_config(config: CoreConfig) -> Self {
        let ledger = Arc::new(SimulatedLedger::with_manual_clock(
            Address::from_low_u64(PROGRAM),
            START,
        ));
        let aggregator = Arc::new(SnapshotAggregator::new(
            ledger.clone(),
            config.tokens.clone(),
        ));
        Self {
            ledger,
            aggregator,
            config,
        }
    }

    /// Orchestrator signing as `signer`, with its own notification center
    pub fn orchestrator(&self, signer: Address) -> FlowOrchestrator {
        FlowOrchestrator::new(
            self.ledger.clone(),
            signer,
            self.aggregator.clone(),
            self.ledger.clock(),
            Arc::new(NotificationCenter::new()),
            self.config.clone(),
        )
    }

    /// Create an Open circle directly on the ledger
    pub async fn create_circle(
        &self,
        token: Address,
        contribution: Amount,
        factor: u64,
        fee: Amount,
        max_members: u64,
    ) -> CircleId {
        let id = self.ledger.store().next_circle_id();
        let params = CircleParams {
            name: format!("Circle {}", id),
            description: "integration".to_string(),
            token,
            contribution_amount: contribution,
            period_duration: PERIOD_WEEKLY,
            max_members,
            collateral_factor: factor,
            insurance_fee: fee,
            initial_payout_order: vec![],
        };
        self.ledger
            .submit(Address::from_low_u64(1), LedgerCall::CreateCircle(params))
            .await
            .unwrap();
        self.ledger.mine_block();
        id
    }

    /// Join without going through a flow
    pub async fn join_directly(&self, who: Address, token: Address, circle_id: CircleId) {
        self.ledger.fund(token, who, 1_000_000);
        self.ledger.set_allowance(token, who, 1_000_000);
        self.ledger
            .submit(who, LedgerCall::JoinCircle { circle_id })
            .await
            .unwrap();
        self.ledger.mine_block();
    }

    /// Mine every few milliseconds until the handle is aborted
    pub fn auto_mine(&self) -> JoinHandle<()> {
        BlockProducer::new(
            self.ledger.clone(),
            BlockProducerConfig {
                block_time_ms: 5,
                ..BlockProducerConfig::default()
            },
        )
        .spawn()
    }
}

/// Wait until the tracked record satisfies `pred`
pub async fn wait_for(
    state: &mut watch::Receiver<FlowRecord>,
    pred: impl FnMut(&FlowRecord) -> bool,
) -> FlowRecord {
    tokio::time::timeout(Duration::from_secs(5), state.wait_for(pred))
        .await
        .expect("timed out waiting for flow")
        .expect("flow state dropped")
        .clone()
}
