//! Circle Reader - typed accessors over the gateway's read methods

use crate::LedgerGateway;
use circle_types::{
    Address, Amount, CircleId, GatewayError, LedgerRead, RawCircleDetails, RawCircleInfo,
    RawMemberInfo, Round,
};
use std::sync::Arc;

/// Reads ledger state one accessor at a time
///
/// The snapshot aggregator batches its reads; this is for the small
/// per-flow lookups (allowances, balances) and for ad-hoc queries.
#[derive(Clone)]
pub struct CircleReader {
    gateway: Arc<dyn LedgerGateway>,
}

impl CircleReader {
    pub fn new(gateway: Arc<dyn LedgerGateway>) -> Self {
        Self { gateway }
    }

    pub fn gateway(&self) -> &Arc<dyn LedgerGateway> {
        &self.gateway
    }

    /// Next identifier the ledger will assign (identifiers start at 1)
    pub async fn next_circle_id(&self) -> Result<CircleId, GatewayError> {
        self.gateway
            .read(LedgerRead::NextCircleId)
            .await?
            .into_circle_id()
    }

    /// Number of circles created so far
    pub async fn circle_count(&self) -> Result<u64, GatewayError> {
        Ok(self.next_circle_id().await?.saturating_sub(1))
    }

    pub async fn circle_info(&self, circle_id: CircleId) -> Result<RawCircleInfo, GatewayError> {
        self.gateway
            .read(LedgerRead::CircleInfo(circle_id))
            .await?
            .into_circle_info()
    }

    pub async fn circle_details(
        &self,
        circle_id: CircleId,
    ) -> Result<RawCircleDetails, GatewayError> {
        self.gateway
            .read(LedgerRead::CircleDetails(circle_id))
            .await?
            .into_circle_details()
    }

    pub async fn members(&self, circle_id: CircleId) -> Result<Vec<Address>, GatewayError> {
        self.gateway
            .read(LedgerRead::Members(circle_id))
            .await?
            .into_addresses()
    }

    pub async fn payout_order(&self, circle_id: CircleId) -> Result<Vec<Address>, GatewayError> {
        self.gateway
            .read(LedgerRead::PayoutOrder(circle_id))
            .await?
            .into_addresses()
    }

    pub async fn insurance_pool(&self, circle_id: CircleId) -> Result<Amount, GatewayError> {
        self.gateway
            .read(LedgerRead::InsurancePool(circle_id))
            .await?
            .into_amount()
    }

    pub async fn member_info(
        &self,
        circle_id: CircleId,
        member: Address,
    ) -> Result<RawMemberInfo, GatewayError> {
        self.gateway
            .read(LedgerRead::MemberInfo(circle_id, member))
            .await?
            .into_member_info()
    }

    pub async fn pending_payout(
        &self,
        circle_id: CircleId,
        member: Address,
    ) -> Result<Amount, GatewayError> {
        self.gateway
            .read(LedgerRead::PendingPayout(circle_id, member))
            .await?
            .into_amount()
    }

    pub async fn round_deposited(
        &self,
        circle_id: CircleId,
        round: Round,
        member: Address,
    ) -> Result<bool, GatewayError> {
        self.gateway
            .read(LedgerRead::RoundDeposited(circle_id, round, member))
            .await?
            .into_bool()
    }

    /// Allowance `owner` has granted the ROSCA program on `token`
    ///
    /// Never cached: it can change outside this client at any time.
    pub async fn program_allowance(
        &self,
        token: Address,
        owner: Address,
    ) -> Result<Amount, GatewayError> {
        let spender = self.gateway.program_address();
        self.gateway
            .read(LedgerRead::Allowance {
                token,
                owner,
                spender,
            })
            .await?
            .into_amount()
    }

    pub async fn balance_of(&self, token: Address, owner: Address) -> Result<Amount, GatewayError> {
        self.gateway
            .read(LedgerRead::BalanceOf { token, owner })
            .await?
            .into_amount()
    }
}
