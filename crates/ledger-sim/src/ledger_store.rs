//! In-memory ledger storage using DashMap for concurrent access

use circle_types::{
    Address, Amount, CircleId, CircleState, RawCircleDetails, RawCircleInfo, RawMemberInfo,
    Round, Timestamp,
};
use dashmap::DashMap;
use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

/// Per-member bookkeeping inside a circle
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MemberRecord {
    pub collateral: Amount,
    pub defaults: u32,
}

/// Full program-side state of one circle
#[derive(Clone, Debug)]
pub struct CircleRecord {
    pub id: CircleId,
    pub creator: Address,
    pub token: Address,
    pub contribution_amount: Amount,
    pub period_duration: u64,
    pub max_members: u64,
    pub collateral_factor: u64,
    pub insurance_fee: Amount,
    pub start_timestamp: Timestamp,
    pub current_round: Round,
    pub round_start: Timestamp,
    pub state: CircleState,
    pub name: String,
    pub description: String,
    /// Join order
    pub members: Vec<Address>,
    /// Order supplied at creation (may be empty)
    pub initial_payout_order: Vec<Address>,
    pub member_info: HashMap<Address, MemberRecord>,
    pub deposits: HashSet<(Round, Address)>,
    pub pending_payouts: HashMap<Address, Amount>,
    pub insurance_pool: Amount,
}

impl CircleRecord {
    pub fn is_member(&self, addr: &Address) -> bool {
        self.members.contains(addr)
    }

    /// Supplied order restricted to members, then everyone else in join order
    pub fn payout_order(&self) -> Vec<Address> {
        let mut order: Vec<Address> = self
            .initial_payout_order
            .iter()
            .filter(|a| self.is_member(a))
            .copied()
            .collect();
        for member in &self.members {
            if !order.contains(member) {
                order.push(*member);
            }
        }
        order
    }

    pub fn info_tuple(&self) -> RawCircleInfo {
        RawCircleInfo(
            self.creator,
            self.token,
            self.contribution_amount,
            self.period_duration,
            self.max_members,
            self.collateral_factor,
            self.insurance_fee,
            self.start_timestamp,
            self.current_round,
            self.round_start,
            self.state.ordinal(),
        )
    }

    pub fn details_tuple(&self) -> RawCircleDetails {
        RawCircleDetails(self.name.clone(), self.description.clone())
    }

    pub fn member_tuple(&self, addr: &Address) -> RawMemberInfo {
        match self.member_info.get(addr) {
            Some(m) => RawMemberInfo(m.collateral, m.defaults, true),
            None => RawMemberInfo::default(),
        }
    }
}

/// Thread-safe storage for circles and token ledger entries
#[derive(Clone)]
pub struct LedgerStore {
    circles: Arc<DashMap<CircleId, CircleRecord>>,
    /// (token, owner) -> balance
    balances: Arc<DashMap<(Address, Address), Amount>>,
    /// (token, owner, spender) -> allowance
    allowances: Arc<DashMap<(Address, Address, Address), Amount>>,
    next_circle_id: Arc<AtomicU64>,
}

impl LedgerStore {
    pub fn new() -> Self {
        Self {
            circles: Arc::new(DashMap::new()),
            balances: Arc::new(DashMap::new()),
            allowances: Arc::new(DashMap::new()),
            next_circle_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn next_circle_id(&self) -> CircleId {
        self.next_circle_id.load(Ordering::SeqCst)
    }

    /// Reserve the next identifier
    pub fn allocate_circle_id(&self) -> CircleId {
        self.next_circle_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn get_circle(&self, id: CircleId) -> Option<CircleRecord> {
        self.circles.get(&id).map(|r| r.value().clone())
    }

    pub fn store_circle(&self, record: CircleRecord) {
        self.circles.insert(record.id, record);
    }

    /// Mutate a circle in place; `None` if it does not exist
    pub fn update_circle<R>(&self, id: CircleId, f: impl FnOnce(&mut CircleRecord) -> R) -> Option<R> {
        self.circles.get_mut(&id).map(|mut r| f(r.value_mut()))
    }

    pub fn circle_count(&self) -> usize {
        self.circles.len()
    }

    pub fn balance(&self, token: &Address, owner: &Address) -> Amount {
        self.balances.get(&(*token, *owner)).map(|b| *b).unwrap_or(0)
    }

    pub fn set_balance(&self, token: Address, owner: Address, amount: Amount) {
        self.balances.insert((token, owner), amount);
    }

    pub fn allowance(&self, token: &Address, owner: &Address, spender: &Address) -> Amount {
        self.allowances
            .get(&(*token, *owner, *spender))
            .map(|a| *a)
            .unwrap_or(0)
    }

    pub fn set_allowance(&self, token: Address, owner: Address, spender: Address, amount: Amount) {
        self.allowances.insert((token, owner, spender), amount);
    }

    /// Clear everything (for testing)
    pub fn clear(&self) {
        self.circles.clear();
        self.balances.clear();
        self.allowances.clear();
        self.next_circle_id.store(1, Ordering::SeqCst);
    }
}

impl Default for LedgerStore {
    fn default() -> Self {
        Self::new()
    }
}
