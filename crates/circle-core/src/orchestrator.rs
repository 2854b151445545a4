//! Transaction Flow Orchestrator
//!
//! One state machine per (action, circle). Flows that move funds read the
//! caller's allowance afresh, approve when it falls short and submit the
//! primary call only after the approval's receipt has been observed. Each
//! flow owns exactly one notification and returns to idle after a delay.

use crate::{
    aggregator::SnapshotAggregator,
    config::CoreConfig,
    error::FlowError,
    flow::{FlowKey, FlowKind, FlowRecord, FlowStep, FlowTarget},
    notifications::NotificationCenter,
    snapshot::CircleView,
    timer::snapshot_round_time,
};
use circle_types::{
    parse_units, Address, Amount, CircleId, CircleParams, GatewayError, LedgerCall, Receipt,
};
use dashmap::{mapref::entry::Entry, DashMap};
use ledger_gateway::{CircleReader, Clock, LedgerGateway, TxSubmitter};
use serde::{Deserialize, Serialize};
use std::{
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tokio::{
    sync::{watch, Mutex},
    task::{AbortHandle, JoinHandle},
};

/// `createCircle` input with amounts in display units
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateCircleRequest {
    pub name: String,
    pub description: String,
    pub token: Address,
    /// Per-round contribution, e.g. "100" or "12.5"
    pub contribution: String,
    pub period_duration: u64,
    pub max_members: u64,
    pub collateral_factor: u64,
    pub insurance_fee: String,
    pub initial_payout_order: Vec<Address>,
}

impl CreateCircleRequest {
    /// Scale amounts to base units and check them against `config.limits`
    pub fn to_params(&self, config: &CoreConfig) -> Result<CircleParams, FlowError> {
        let token = config
            .tokens
            .get(&self.token)
            .ok_or_else(|| FlowError::UnknownToken(self.token.to_string()))?;

        let params = CircleParams {
            name: self.name.trim().to_string(),
            description: self.description.trim().to_string(),
            token: self.token,
            contribution_amount: parse_units(&self.contribution, token.decimals)?,
            period_duration: self.period_duration,
            max_members: self.max_members,
            collateral_factor: self.collateral_factor,
            insurance_fee: parse_units(&self.insurance_fee, token.decimals)?,
            initial_payout_order: self.initial_payout_order.clone(),
        };
        config.limits.validate(&params, token.decimals)?;
        Ok(params)
    }
}

/// Handle to a running flow
pub struct FlowHandle {
    key: FlowKey,
    state: watch::Receiver<FlowRecord>,
    task: JoinHandle<Result<Receipt, FlowError>>,
}

impl FlowHandle {
    pub fn key(&self) -> FlowKey {
        self.key
    }

    /// Current tracking state
    pub fn record(&self) -> FlowRecord {
        self.state.borrow().clone()
    }

    pub fn step(&self) -> FlowStep {
        self.state.borrow().step.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<FlowRecord> {
        self.state.clone()
    }

    /// Wait for the flow to finish
    pub async fn outcome(self) -> Result<Receipt, FlowError> {
        match self.task.await {
            Ok(result) => result,
            Err(_) => Err(FlowError::Cancelled),
        }
    }
}

struct FlowSlot {
    state: watch::Sender<FlowRecord>,
    task: Option<AbortHandle>,
}

struct Inner {
    submitter: TxSubmitter,
    reader: CircleReader,
    aggregator: Arc<SnapshotAggregator>,
    clock: Arc<dyn Clock>,
    notifications: Arc<NotificationCenter>,
    flows: DashMap<FlowKey, FlowSlot>,
    /// Held by a funded flow from its allowance read until its dependent call
    /// confirms; `approve` overwrites, so same-token flows take turns
    token_locks: DashMap<Address, Arc<Mutex<()>>>,
    next_instance: AtomicU64,
    config: CoreConfig,
}

/// Starts, tracks and resets flows for one signer
#[derive(Clone)]
pub struct FlowOrchestrator {
    inner: Arc<Inner>,
}

impl FlowOrchestrator {
    pub fn new(
        gateway: Arc<dyn LedgerGateway>,
        signer: Address,
        aggregator: Arc<SnapshotAggregator>,
        clock: Arc<dyn Clock>,
        notifications: Arc<NotificationCenter>,
        config: CoreConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                submitter: TxSubmitter::new(gateway.clone(), signer),
                reader: CircleReader::new(gateway),
                aggregator,
                clock,
                notifications,
                flows: DashMap::new(),
                token_locks: DashMap::new(),
                next_instance: AtomicU64::new(1),
                config,
            }),
        }
    }

    pub fn signer(&self) -> Address {
        self.inner.submitter.signer()
    }

    pub fn notifications(&self) -> &Arc<NotificationCenter> {
        &self.inner.notifications
    }

    /// Tracking state of the flow under `key`, if one is registered
    pub fn flow(&self, key: &FlowKey) -> Option<FlowRecord> {
        self.inner.flows.get(key).map(|slot| slot.state.borrow().clone())
    }

    /// Flows that have not reached a terminal step
    pub fn active_flows(&self) -> Vec<FlowRecord> {
        self.inner
            .flows
            .iter()
            .map(|slot| slot.state.borrow().clone())
            .filter(|record| record.step.is_active())
            .collect()
    }

    /// Forget a flow locally; anything already submitted stays on the ledger
    pub fn cancel(&self, key: &FlowKey) -> bool {
        match self.inner.flows.remove(key) {
            Some((_, slot)) => {
                if let Some(task) = slot.task {
                    task.abort();
                }
                slot.state.send_modify(|record| record.step = FlowStep::Idle);
                self.inner.notifications.dismiss(&key.notification_key());
                tracing::info!("Flow {} cancelled locally", key);
                true
            }
            None => false,
        }
    }

    /// Approve if needed, then `joinCircle`
    pub async fn join(&self, circle_id: CircleId) -> Result<FlowHandle, FlowError> {
        let view = self.inner.gate(FlowKind::Join, circle_id).await?;
        let required = view
            .eligibility(false)
            .join_deposit
            .ok_or(FlowError::NotPermitted {
                action: FlowKind::Join,
                circle_id,
            })?;
        let success = format!("Joined circle {}", circle_id);
        self.start_funded(
            FlowKey::circle(FlowKind::Join, circle_id),
            &view,
            required,
            LedgerCall::JoinCircle { circle_id },
            success,
        )
    }

    /// Approve if needed, then `contribute`
    pub async fn contribute(&self, circle_id: CircleId) -> Result<FlowHandle, FlowError> {
        let view = self.inner.gate(FlowKind::Contribute, circle_id).await?;
        let required = view.circle.contribution_amount;
        let success = format!(
            "Contributed {} {} to circle {}",
            view.circle.display_amount(required),
            view.circle.token_symbol,
            circle_id
        );
        self.start_funded(
            FlowKey::circle(FlowKind::Contribute, circle_id),
            &view,
            required,
            LedgerCall::Contribute { circle_id },
            success,
        )
    }

    pub async fn claim_payout(&self, circle_id: CircleId) -> Result<FlowHandle, FlowError> {
        let view = self.inner.gate(FlowKind::ClaimPayout, circle_id).await?;
        let success = format!(
            "Claimed {} {} from circle {}",
            view.circle.display_amount(view.caller_facts.pending_payout),
            view.circle.token_symbol,
            circle_id
        );
        self.start_single(
            FlowKey::circle(FlowKind::ClaimPayout, circle_id),
            LedgerCall::ClaimPayout { circle_id },
            success,
        )
    }

    pub async fn finalize_round(&self, circle_id: CircleId) -> Result<FlowHandle, FlowError> {
        let view = self.inner.gate(FlowKind::FinalizeRound, circle_id).await?;
        let success = format!(
            "Round {} of circle {} finalized",
            view.circle.current_round, circle_id
        );
        self.start_single(
            FlowKey::circle(FlowKind::FinalizeRound, circle_id),
            LedgerCall::FinalizeRoundIfExpired { circle_id },
            success,
        )
    }

    pub async fn withdraw_collateral(&self, circle_id: CircleId) -> Result<FlowHandle, FlowError> {
        self.inner
            .gate(FlowKind::WithdrawCollateral, circle_id)
            .await?;
        self.start_single(
            FlowKey::circle(FlowKind::WithdrawCollateral, circle_id),
            LedgerCall::WithdrawCollateral { circle_id },
            format!("Collateral withdrawn from circle {}", circle_id),
        )
    }

    /// Validate and submit `createCircle`
    pub async fn create_circle(&self, request: CreateCircleRequest) -> Result<FlowHandle, FlowError> {
        let params = request.to_params(&self.inner.config)?;
        let success = format!("Circle \"{}\" created", params.name);
        self.start_single(
            FlowKey {
                kind: FlowKind::CreateCircle,
                target: FlowTarget::New,
            },
            LedgerCall::CreateCircle(params),
            success,
        )
    }

    /// Test faucet: mint `amount` (display units) of `token` to the signer
    pub async fn mint(&self, token: Address, amount: &str) -> Result<FlowHandle, FlowError> {
        let info = self
            .inner
            .config
            .tokens
            .get(&token)
            .ok_or_else(|| FlowError::UnknownToken(token.to_string()))?;
        let base_units = parse_units(amount, info.decimals)?;
        let success = format!("Minted {} {}", amount.trim(), info.symbol);
        self.start_single(
            FlowKey {
                kind: FlowKind::Mint,
                target: FlowTarget::Token(token),
            },
            LedgerCall::Mint {
                token,
                amount: base_units,
            },
            success,
        )
    }

    fn start_funded(
        &self,
        key: FlowKey,
        view: &CircleView,
        required: Amount,
        call: LedgerCall,
        success: String,
    ) -> Result<FlowHandle, FlowError> {
        let token = view.circle.token;
        let approval_label = format!(
            "Approving {} {}...",
            view.circle.display_amount(required),
            view.circle.token_symbol
        );
        let (instance, state) =
            self.inner
                .register(key, Some(required), FlowStep::CheckingAllowance)?;
        tracing::info!("Flow {} started: {} base units required", key, required);

        let flow = self
            .inner
            .clone()
            .run_funded(key, instance, token, required, approval_label, call);
        Ok(self.spawn(key, instance, state, success, flow))
    }

    fn start_single(
        &self,
        key: FlowKey,
        call: LedgerCall,
        success: String,
    ) -> Result<FlowHandle, FlowError> {
        let (instance, state) = self.inner.register(key, None, FlowStep::Executing)?;
        tracing::info!("Flow {} started", key);

        let flow = self.inner.clone().execute(key, instance, call);
        Ok(self.spawn(key, instance, state, success, flow))
    }

    fn spawn<F>(
        &self,
        key: FlowKey,
        instance: u64,
        state: watch::Receiver<FlowRecord>,
        success: String,
        flow: F,
    ) -> FlowHandle
    where
        F: Future<Output = Result<Receipt, FlowError>> + Send + 'static,
    {
        let task = tokio::spawn(self.inner.clone().drive(key, instance, success, flow));
        if let Some(mut slot) = self.inner.flows.get_mut(&key) {
            if slot.state.borrow().instance == instance {
                slot.task = Some(task.abort_handle());
            }
        }
        FlowHandle { key, state, task }
    }
}

impl Inner {
    /// Load the caller's view of `circle_id` and check `kind` is permitted
    async fn gate(&self, kind: FlowKind, circle_id: CircleId) -> Result<CircleView, FlowError> {
        let caller = self.submitter.signer();
        let view = self
            .aggregator
            .circle_view(circle_id, caller)
            .await
            .map_err(|e| match e {
                GatewayError::Unavailable { .. } => FlowError::NoSnapshot { circle_id },
                other => FlowError::Gateway(other),
            })?;

        let expired = snapshot_round_time(&view.circle, self.clock.now())
            .map(|time| time.expired)
            .unwrap_or(false);
        if !view.eligibility(expired).permits(kind) {
            return Err(FlowError::NotPermitted {
                action: kind,
                circle_id,
            });
        }
        Ok(view)
    }

    /// Reserve the slot for `key`; a flow still in progress blocks a second start
    fn register(
        &self,
        key: FlowKey,
        required_amount: Option<Amount>,
        first_step: FlowStep,
    ) -> Result<(u64, watch::Receiver<FlowRecord>), FlowError> {
        let instance = self.next_instance.fetch_add(1, Ordering::SeqCst);
        let mut record = FlowRecord::new(instance, key, self.submitter.signer(), required_amount);
        record.step = first_step;
        let (sender, receiver) = watch::channel(record);
        let slot = FlowSlot {
            state: sender,
            task: None,
        };

        match self.flows.entry(key) {
            Entry::Occupied(mut existing) => {
                if existing.get().state.borrow().step.is_active() {
                    return Err(FlowError::AlreadyInFlight { key });
                }
                existing.insert(slot);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(slot);
            }
        }
        Ok((instance, receiver))
    }

    /// Apply `f` to the record if `instance` still owns the slot
    fn update(&self, key: &FlowKey, instance: u64, f: impl FnOnce(&mut FlowRecord)) {
        if let Some(slot) = self.flows.get(key) {
            slot.state.send_if_modified(|record| {
                if record.instance != instance {
                    return false;
                }
                f(record);
                true
            });
        }
    }

    fn set_step(&self, key: &FlowKey, instance: u64, step: FlowStep) {
        tracing::info!("Flow {}: {}", key, step.describe(key.kind));
        self.update(key, instance, |record| record.step = step);
    }

    async fn run_funded(
        self: Arc<Self>,
        key: FlowKey,
        instance: u64,
        token: Address,
        required: Amount,
        approval_label: String,
        call: LedgerCall,
    ) -> Result<Receipt, FlowError> {
        let lock = self.token_locks.entry(token).or_default().clone();
        let _turn = match lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                tracing::debug!("{} waiting for another flow spending {}", key, token);
                lock.lock().await
            }
        };

        let caller = self.submitter.signer();
        let allowance = self.reader.program_allowance(token, caller).await?;

        if allowance < required {
            tracing::debug!(
                "Allowance {} below {} for {}, approving",
                allowance,
                required,
                key
            );
            self.set_step(&key, instance, FlowStep::Approving);
            self.notifications
                .loading(&key.notification_key(), approval_label);

            let approve = LedgerCall::Approve {
                token,
                spender: self.reader.gateway().program_address(),
                amount: required,
            };
            let hash = self.submitter.submit(approve).await?;
            self.update(&key, instance, |record| record.approval_tx = Some(hash));
            self.submitter.confirm(hash).await?;
            tracing::info!("Approval {} confirmed for {}", hash, key);
        }

        self.execute(key, instance, call).await
    }

    async fn execute(
        self: Arc<Self>,
        key: FlowKey,
        instance: u64,
        call: LedgerCall,
    ) -> Result<Receipt, FlowError> {
        self.set_step(&key, instance, FlowStep::Executing);
        self.notifications.loading(
            &key.notification_key(),
            format!("{}...", FlowStep::Executing.describe(key.kind)),
        );

        let hash = self.submitter.submit(call).await?;
        self.update(&key, instance, |record| record.tx = Some(hash));
        Ok(self.submitter.confirm(hash).await?)
    }

    /// Run `flow` to its end, settle the notification and schedule the reset
    async fn drive<F>(
        self: Arc<Self>,
        key: FlowKey,
        instance: u64,
        success: String,
        flow: F,
    ) -> Result<Receipt, FlowError>
    where
        F: Future<Output = Result<Receipt, FlowError>>,
    {
        let result = flow.await;
        let note = key.notification_key();

        match &result {
            Ok(receipt) => {
                tracing::info!("Flow {} completed in block {}", key, receipt.block);
                self.update(&key, instance, |record| record.step = FlowStep::Completed);
                self.notifications.success(&note, success);
            }
            Err(e) => {
                match e {
                    FlowError::Gateway(GatewayError::Transport(_)) => {
                        tracing::error!("Flow {} failed: {}", key, e)
                    }
                    _ => tracing::warn!("Flow {} failed: {}", key, e),
                }
                let message = e.short_message();
                self.update(&key, instance, |record| {
                    record.step = FlowStep::Failed {
                        message: message.clone(),
                    }
                });
                self.notifications.error(&note, message);
            }
        }

        let inner = self.clone();
        let delay = self.config.flow_reset_delay();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.reset(&key, instance);
        });

        result
    }

    /// Return a finished flow to idle, release its slot and clear its notification
    fn reset(&self, key: &FlowKey, instance: u64) -> bool {
        let removed = self.flows.remove_if(key, |_, slot| {
            let record = slot.state.borrow();
            record.instance == instance && record.step.is_terminal()
        });
        match removed {
            Some((_, slot)) => {
                self.notifications.dismiss(&key.notification_key());
                slot.state.send_modify(|record| record.step = FlowStep::Idle);
                tracing::debug!("Flow {} reset to idle", key);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use circle_types::{CircleLimits, TokenRegistry, PERIOD_WEEKLY};

    fn request() -> CreateCircleRequest {
        CreateCircleRequest {
            name: "  Weekly savers ".to_string(),
            description: "Five friends".to_string(),
            token: Address::from_low_u64(0x05dc),
            contribution: "100".to_string(),
            period_duration: PERIOD_WEEKLY,
            max_members: 5,
            collateral_factor: 2,
            insurance_fee: "5".to_string(),
            initial_payout_order: vec![],
        }
    }

    #[test]
    fn test_request_scales_amounts() {
        let params = request().to_params(&CoreConfig::default()).unwrap();
        assert_eq!(params.name, "Weekly savers");
        assert_eq!(params.contribution_amount, 100_000_000);
        assert_eq!(params.insurance_fee, 5_000_000);
    }

    #[test]
    fn test_request_rejects_bad_input() {
        let config = CoreConfig {
            tokens: TokenRegistry::default(),
            limits: CircleLimits::default(),
            ..CoreConfig::default()
        };

        let mut bad = request();
        bad.token = Address::from_low_u64(0xdead);
        assert!(matches!(bad.to_params(&config), Err(FlowError::UnknownToken(_))));

        let mut bad = request();
        bad.contribution = "1.0000001".to_string();
        assert!(matches!(bad.to_params(&config), Err(FlowError::Units(_))));

        let mut bad = request();
        bad.collateral_factor = 11;
        assert!(matches!(bad.to_params(&config), Err(FlowError::Params(_))));
    }
}
