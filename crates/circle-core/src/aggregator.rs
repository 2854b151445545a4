//! State Snapshot Aggregator
//!
//! Turns batched ledger reads into typed snapshots:
//! - One round trip per batch of circles (info + details + members per id)
//! - Per-identifier failures become `CircleEntry::Unavailable`
//! - Results cached per block and re-read whenever a new block is observed

use crate::{
    cache::{QueryCache, QueryKey},
    snapshot::{CircleEntry, CircleSnapshot, CircleView, Loadable, MemberFacts},
};
use circle_types::{
    Address, BlockHeight, CircleId, CircleState, GatewayError, LedgerRead, ReadValue,
    TokenRegistry,
};
use ledger_gateway::LedgerGateway;
use std::sync::Arc;
use tokio::{sync::watch, task::JoinHandle};

/// Reads per circle in a snapshot batch
const READS_PER_CIRCLE: usize = 3;

type ReadResult = Result<ReadValue, GatewayError>;

pub struct SnapshotAggregator {
    gateway: Arc<dyn LedgerGateway>,
    tokens: TokenRegistry,
    blocks: watch::Receiver<BlockHeight>,
    counts: QueryCache<CircleId>,
    circles: QueryCache<Vec<CircleEntry>>,
    views: QueryCache<CircleView>,
    directory: watch::Sender<Loadable<Vec<CircleEntry>>>,
}

impl SnapshotAggregator {
    pub fn new(gateway: Arc<dyn LedgerGateway>, tokens: TokenRegistry) -> Self {
        let blocks = gateway.subscribe_blocks();
        let (directory, _) = watch::channel(Loadable::loading());
        Self {
            gateway,
            tokens,
            blocks,
            counts: QueryCache::new(),
            circles: QueryCache::new(),
            views: QueryCache::new(),
            directory,
        }
    }

    pub fn gateway(&self) -> &Arc<dyn LedgerGateway> {
        &self.gateway
    }

    pub fn tokens(&self) -> &TokenRegistry {
        &self.tokens
    }

    /// Latest observed block; moves every cache to it
    pub fn current_block(&self) -> BlockHeight {
        let block = *self.blocks.borrow();
        let invalidated = self.counts.observe_block(block)
            | self.circles.observe_block(block)
            | self.views.observe_block(block);
        if invalidated {
            tracing::debug!("Snapshot caches invalidated at block {}", block);
        }
        block
    }

    /// Number of circles created so far (`nextCircleId - 1`)
    pub async fn circle_count(&self) -> Result<u64, GatewayError> {
        let block = self.current_block();
        if let Some(next) = self.counts.get(&QueryKey::CircleCount, block) {
            return Ok(next.saturating_sub(1));
        }
        let next = self
            .gateway
            .read(LedgerRead::NextCircleId)
            .await?
            .into_circle_id()?;
        self.counts.insert(QueryKey::CircleCount, block, next);
        Ok(next.saturating_sub(1))
    }

    /// Identifiers `1..=count`; identifiers start at 1
    pub async fn known_circle_ids(&self) -> Result<Vec<CircleId>, GatewayError> {
        let count = self.circle_count().await?;
        Ok((1..=count).collect())
    }

    /// Issue one batched read for `ids`, bypassing the cache
    ///
    /// The outer error means the whole request failed; failures of single
    /// entries are reported per identifier.
    pub async fn fetch_circles(&self, ids: &[CircleId]) -> Result<Vec<CircleEntry>, GatewayError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let requests = ids
            .iter()
            .flat_map(|&id| {
                [
                    LedgerRead::CircleInfo(id),
                    LedgerRead::CircleDetails(id),
                    LedgerRead::Members(id),
                ]
            })
            .collect::<Vec<_>>();
        let expected = requests.len();

        let results = self.gateway.read_batch(requests).await?;
        if results.len() != expected {
            return Err(GatewayError::Transport(format!(
                "batch returned {} results for {} reads",
                results.len(),
                expected
            )));
        }

        let mut results = results.into_iter();
        let mut entries = Vec::with_capacity(ids.len());
        for &id in ids {
            let chunk: Vec<ReadResult> = results.by_ref().take(READS_PER_CIRCLE).collect();
            entries.push(self.build_entry(id, chunk));
        }
        Ok(entries)
    }

    fn build_entry(&self, id: CircleId, chunk: Vec<ReadResult>) -> CircleEntry {
        let mut reads = chunk.into_iter();
        let mut next = || {
            reads.next().unwrap_or_else(|| {
                Err(GatewayError::Unavailable {
                    what: format!("circle {}", id),
                })
            })
        };
        let info = next();
        let details = next();
        let members = next();

        let snapshot = info.and_then(ReadValue::into_circle_info).and_then(|info| {
            let details = details.and_then(ReadValue::into_circle_details)?;
            let members = members.and_then(ReadValue::into_addresses)?;
            CircleSnapshot::from_raw(id, info, details, members, &self.tokens)
        });

        match snapshot {
            Ok(snapshot) => CircleEntry::Ready(snapshot),
            Err(e) => {
                tracing::debug!("Circle {} unavailable: {}", id, e);
                CircleEntry::Unavailable {
                    circle_id: id,
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Snapshots for `ids`, served from the current block's cache when possible
    pub async fn circles(&self, ids: &[CircleId]) -> Result<Vec<CircleEntry>, GatewayError> {
        let block = self.current_block();
        let key = QueryKey::Circles(ids.to_vec());
        if let Some(entries) = self.circles.get(&key, block) {
            return Ok(entries);
        }
        let entries = self.fetch_circles(ids).await?;
        self.circles.insert(key, block, entries.clone());
        Ok(entries)
    }

    /// Every known circle
    pub async fn all_circles(&self) -> Result<Vec<CircleEntry>, GatewayError> {
        let ids = self.known_circle_ids().await?;
        self.circles(&ids).await
    }

    /// One circle; an unavailable entry becomes an error
    pub async fn circle(&self, circle_id: CircleId) -> Result<CircleSnapshot, GatewayError> {
        let entry = self
            .circles(&[circle_id])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::Unavailable {
                what: format!("circle {}", circle_id),
            })?;
        match entry {
            CircleEntry::Ready(snapshot) => Ok(snapshot),
            CircleEntry::Unavailable { reason, .. } => Err(GatewayError::Unavailable {
                what: format!("circle {} ({})", circle_id, reason),
            }),
        }
    }

    /// Detail view for `caller`: snapshot plus member-specific facts
    pub async fn circle_view(
        &self,
        circle_id: CircleId,
        caller: Address,
    ) -> Result<CircleView, GatewayError> {
        let block = self.current_block();
        let key = QueryKey::View { circle_id, caller };
        if let Some(view) = self.views.get(&key, block) {
            return Ok(view);
        }
        let view = self.fetch_view(circle_id, caller).await?;
        self.views.insert(key, block, view.clone());
        Ok(view)
    }

    /// `circle_view` packaged for presentation
    pub async fn load_view(&self, circle_id: CircleId, caller: Address) -> Loadable<CircleView> {
        Loadable::from_result(self.circle_view(circle_id, caller).await)
    }

    async fn fetch_view(
        &self,
        circle_id: CircleId,
        caller: Address,
    ) -> Result<CircleView, GatewayError> {
        let circle = self.circle(circle_id).await?;
        let round = circle.current_round;
        let round_open = circle.state == CircleState::Active && round >= 1;

        let mut requests = vec![
            LedgerRead::PayoutOrder(circle_id),
            LedgerRead::InsurancePool(circle_id),
            LedgerRead::MemberInfo(circle_id, caller),
            LedgerRead::PendingPayout(circle_id, caller),
        ];
        if round_open {
            requests.extend(
                circle
                    .members
                    .iter()
                    .map(|m| LedgerRead::RoundDeposited(circle_id, round, *m)),
            );
        }

        let mut results = self.gateway.read_batch(requests).await?.into_iter();
        let mut next = || {
            results.next().unwrap_or_else(|| {
                Err(GatewayError::Transport("short batch response".to_string()))
            })
        };

        let payout_order = next()?.into_addresses()?;
        let insurance_pool = next()?.into_amount()?;
        let member_info = next()?.into_member_info()?;
        let pending_payout = next()?.into_amount()?;

        let mut round_deposits = Vec::with_capacity(circle.members.len());
        if round_open {
            for member in &circle.members {
                round_deposits.push((*member, next()?.into_bool()?));
            }
        }
        let deposited_this_round = round_deposits
            .iter()
            .any(|(member, paid)| *member == caller && *paid);

        Ok(CircleView {
            caller,
            payout_order,
            insurance_pool,
            caller_facts: MemberFacts::from_raw(member_info, pending_payout, deposited_this_round),
            round_deposits,
            circle,
        })
    }

    /// Receiver of the circle directory, republished after every block
    pub fn subscribe_directory(&self) -> watch::Receiver<Loadable<Vec<CircleEntry>>> {
        self.directory.subscribe()
    }

    /// Re-read every circle and publish the result
    pub async fn refresh(&self) {
        self.directory.send_modify(|state| state.is_loading = true);
        let result = self.all_circles().await;
        self.directory.send_modify(|state| match result {
            Ok(entries) => *state = Loadable::ready(entries),
            Err(e) => {
                tracing::warn!("Circle refresh failed: {}", e);
                *state = Loadable::failed(state.data.take(), &e);
            }
        });
    }

    /// Refresh once now and again on every new block
    pub fn spawn_refresh(self: Arc<Self>) -> JoinHandle<()> {
        let mut blocks = self.gateway.subscribe_blocks();
        tokio::spawn(async move {
            self.refresh().await;
            while blocks.changed().await.is_ok() {
                let height = *blocks.borrow_and_update();
                tracing::debug!("Block {} observed, refreshing circles", height);
                self.refresh().await;
            }
            tracing::info!("Block subscription closed, refresh loop stopped");
        })
    }
}
