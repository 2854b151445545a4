//! ROSCA Program Processor
//!
//! Executes ledger calls against the in-memory store. `check` is the
//! side-effect-free precondition pass used both for pre-submission
//! validation and again at inclusion time, where state may have moved on.

use crate::{
    error::ProgramError,
    ledger_store::{CircleRecord, LedgerStore, MemberRecord},
};
use circle_types::{Address, Amount, CircleId, CircleParams, CircleState, LedgerCall, Timestamp};
use std::collections::{HashMap, HashSet};

/// Executes ROSCA program and token ledger calls
#[derive(Clone)]
pub struct RoscaProcessor {
    store: LedgerStore,
    /// The program's own address (token spender and custodian)
    program: Address,
}

/// `contributionAmount × collateralFactor + insuranceFee`
pub fn required_join_deposit(circle: &CircleRecord) -> Result<Amount, ProgramError> {
    circle
        .contribution_amount
        .checked_mul(circle.collateral_factor as Amount)
        .and_then(|c| c.checked_add(circle.insurance_fee))
        .ok_or(ProgramError::ArithmeticOverflow)
}

impl RoscaProcessor {
    pub fn new(store: LedgerStore, program: Address) -> Self {
        Self { store, program }
    }

    pub fn store(&self) -> &LedgerStore {
        &self.store
    }

    pub fn program(&self) -> Address {
        self.program
    }

    fn circle(&self, id: CircleId) -> Result<CircleRecord, ProgramError> {
        self.store.get_circle(id).ok_or(ProgramError::CircleNotFound)
    }

    /// Validate a call without touching state
    pub fn check(&self, from: Address, call: &LedgerCall, now: Timestamp) -> Result<(), ProgramError> {
        match call {
            LedgerCall::CreateCircle(params) => Self::check_create(params),
            LedgerCall::JoinCircle { circle_id } => {
                let circle = self.circle(*circle_id)?;
                if circle.state != CircleState::Open {
                    return Err(ProgramError::CircleNotOpen);
                }
                if circle.is_member(&from) {
                    return Err(ProgramError::AlreadyMember);
                }
                if circle.members.len() as u64 >= circle.max_members {
                    return Err(ProgramError::CircleFull);
                }
                self.check_pull(&circle.token, &from, required_join_deposit(&circle)?)
            }
            LedgerCall::Contribute { circle_id } => {
                let circle = self.circle(*circle_id)?;
                if circle.state != CircleState::Active {
                    return Err(ProgramError::CircleNotActive);
                }
                if !circle.is_member(&from) {
                    return Err(ProgramError::NotMember);
                }
                if circle.deposits.contains(&(circle.current_round, from)) {
                    return Err(ProgramError::AlreadyContributed);
                }
                self.check_pull(&circle.token, &from, circle.contribution_amount)
            }
            LedgerCall::ClaimPayout { circle_id } => {
                let circle = self.circle(*circle_id)?;
                match circle.pending_payouts.get(&from) {
                    Some(amount) if *amount > 0 => Ok(()),
                    _ => Err(ProgramError::NoPendingPayout),
                }
            }
            LedgerCall::FinalizeRoundIfExpired { circle_id } => {
                let circle = self.circle(*circle_id)?;
                if circle.state != CircleState::Active {
                    return Err(ProgramError::CircleNotActive);
                }
                if now < circle.round_start.saturating_add(circle.period_duration) {
                    return Err(ProgramError::RoundNotExpired);
                }
                Ok(())
            }
            LedgerCall::WithdrawCollateral { circle_id } => {
                let circle = self.circle(*circle_id)?;
                if !circle.state.is_terminal() {
                    return Err(ProgramError::CircleNotEnded);
                }
                match circle.member_info.get(&from) {
                    None => Err(ProgramError::NotMember),
                    Some(m) if m.collateral == 0 => Err(ProgramError::NoCollateral),
                    Some(_) => Ok(()),
                }
            }
            LedgerCall::Approve { .. } | LedgerCall::Mint { .. } => Ok(()),
        }
    }

    fn check_create(params: &CircleParams) -> Result<(), ProgramError> {
        if params.max_members < 2
            || params.contribution_amount == 0
            || params.period_duration == 0
            || params.collateral_factor == 0
        {
            return Err(ProgramError::InvalidParams);
        }
        Ok(())
    }

    fn check_pull(&self, token: &Address, owner: &Address, amount: Amount) -> Result<(), ProgramError> {
        if self.store.allowance(token, owner, &self.program) < amount {
            return Err(ProgramError::InsufficientAllowance);
        }
        if self.store.balance(token, owner) < amount {
            return Err(ProgramError::InsufficientBalance);
        }
        Ok(())
    }

    /// Move `amount` from `owner` to the program, consuming allowance
    fn pull(&self, token: Address, owner: Address, amount: Amount) -> Result<(), ProgramError> {
        self.check_pull(&token, &owner, amount)?;
        let allowance = self.store.allowance(&token, &owner, &self.program);
        self.store
            .set_allowance(token, owner, self.program, allowance - amount);
        self.store
            .set_balance(token, owner, self.store.balance(&token, &owner) - amount);
        let custody = self
            .store
            .balance(&token, &self.program)
            .checked_add(amount)
            .ok_or(ProgramError::ArithmeticOverflow)?;
        self.store.set_balance(token, self.program, custody);
        Ok(())
    }

    /// Move `amount` from program custody to `to`
    fn push(&self, token: Address, to: Address, amount: Amount) -> Result<(), ProgramError> {
        let custody = self.store.balance(&token, &self.program);
        if custody < amount {
            return Err(ProgramError::InsufficientBalance);
        }
        self.store.set_balance(token, self.program, custody - amount);
        let balance = self
            .store
            .balance(&token, &to)
            .checked_add(amount)
            .ok_or(ProgramError::ArithmeticOverflow)?;
        self.store.set_balance(token, to, balance);
        Ok(())
    }

    /// Validate and apply a call
    pub fn execute(&self, from: Address, call: &LedgerCall, now: Timestamp) -> Result<(), ProgramError> {
        self.check(from, call, now)?;

        match call {
            LedgerCall::CreateCircle(params) => {
                let id = self.store.allocate_circle_id();
                self.store.store_circle(CircleRecord {
                    id,
                    creator: from,
                    token: params.token,
                    contribution_amount: params.contribution_amount,
                    period_duration: params.period_duration,
                    max_members: params.max_members,
                    collateral_factor: params.collateral_factor,
                    insurance_fee: params.insurance_fee,
                    start_timestamp: 0,
                    current_round: 0,
                    round_start: 0,
                    state: CircleState::Open,
                    name: params.name.clone(),
                    description: params.description.clone(),
                    members: Vec::new(),
                    initial_payout_order: params.initial_payout_order.clone(),
                    member_info: HashMap::new(),
                    deposits: HashSet::new(),
                    pending_payouts: HashMap::new(),
                    insurance_pool: 0,
                });
                tracing::debug!("Circle {} created by {}", id, from.short());
                Ok(())
            }
            LedgerCall::JoinCircle { circle_id } => {
                let circle = self.circle(*circle_id)?;
                let required = required_join_deposit(&circle)?;
                self.pull(circle.token, from, required)?;
                let collateral = required - circle.insurance_fee;
                self.store.update_circle(*circle_id, |c| {
                    c.members.push(from);
                    c.member_info.insert(
                        from,
                        MemberRecord {
                            collateral,
                            defaults: 0,
                        },
                    );
                    c.insurance_pool += c.insurance_fee;
                    if c.members.len() as u64 == c.max_members {
                        c.state = CircleState::Active;
                        c.current_round = 1;
                        c.start_timestamp = now;
                        c.round_start = now;
                        tracing::debug!("Circle {} is now active", c.id);
                    }
                });
                Ok(())
            }
            LedgerCall::Contribute { circle_id } => {
                let circle = self.circle(*circle_id)?;
                self.pull(circle.token, from, circle.contribution_amount)?;
                self.store.update_circle(*circle_id, |c| {
                    let round = c.current_round;
                    c.deposits.insert((round, from));
                });
                Ok(())
            }
            LedgerCall::ClaimPayout { circle_id } => {
                let circle = self.circle(*circle_id)?;
                let amount = circle.pending_payouts.get(&from).copied().unwrap_or(0);
                self.push(circle.token, from, amount)?;
                self.store.update_circle(*circle_id, |c| {
                    c.pending_payouts.insert(from, 0);
                });
                Ok(())
            }
            LedgerCall::FinalizeRoundIfExpired { circle_id } => self.finalize_round(*circle_id, now),
            LedgerCall::WithdrawCollateral { circle_id } => {
                let circle = self.circle(*circle_id)?;
                let amount = circle.member_info.get(&from).map(|m| m.collateral).unwrap_or(0);
                self.push(circle.token, from, amount)?;
                self.store.update_circle(*circle_id, |c| {
                    if let Some(m) = c.member_info.get_mut(&from) {
                        m.collateral = 0;
                    }
                });
                Ok(())
            }
            LedgerCall::Approve {
                token,
                spender,
                amount,
            } => {
                self.store.set_allowance(*token, from, *spender, *amount);
                Ok(())
            }
            LedgerCall::Mint { token, amount } => {
                let balance = self
                    .store
                    .balance(token, &from)
                    .checked_add(*amount)
                    .ok_or(ProgramError::ArithmeticOverflow)?;
                self.store.set_balance(*token, from, balance);
                Ok(())
            }
        }
    }

    /// Close the current round: slash non-depositors, credit the recipient,
    /// then advance or complete the circle.
    fn finalize_round(&self, circle_id: CircleId, now: Timestamp) -> Result<(), ProgramError> {
        self.store
            .update_circle(circle_id, |c| {
                let round = c.current_round;
                let mut pot: Amount = 0;

                for member in c.members.clone() {
                    if c.deposits.contains(&(round, member)) {
                        pot += c.contribution_amount;
                        continue;
                    }
                    let record = c.member_info.entry(member).or_default();
                    let slashed = record.collateral.min(c.contribution_amount);
                    record.collateral -= slashed;
                    record.defaults += 1;
                    let shortfall = c.contribution_amount - slashed;
                    let covered = c.insurance_pool.min(shortfall);
                    c.insurance_pool -= covered;
                    pot += slashed + covered;
                }

                let order = c.payout_order();
                if let Some(recipient) = order.get((round as usize).saturating_sub(1)) {
                    *c.pending_payouts.entry(*recipient).or_insert(0) += pot;
                }

                if round as usize >= c.members.len() {
                    c.state = CircleState::Completed;
                    tracing::debug!("Circle {} completed after round {}", c.id, round);
                } else {
                    c.current_round += 1;
                    c.round_start = now;
                }
            })
            .ok_or(ProgramError::CircleNotFound)
    }

    /// Administrative cancellation (Open or Active only)
    pub fn cancel_circle(&self, circle_id: CircleId) -> Result<(), ProgramError> {
        self.store
            .update_circle(circle_id, |c| {
                if c.state.can_transition_to(CircleState::Cancelled) {
                    c.state = CircleState::Cancelled;
                    Ok(())
                } else {
                    Err(ProgramError::CircleNotActive)
                }
            })
            .ok_or(ProgramError::CircleNotFound)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use circle_types::PERIOD_WEEKLY;

    const TOKEN: u64 = 0x05dc;

    fn setup() -> (RoscaProcessor, Address) {
        let program = Address::from_low_u64(0xface);
        (RoscaProcessor::new(LedgerStore::new(), program), program)
    }

    fn params(max_members: u64) -> CircleParams {
        CircleParams {
            name: "Weekly".to_string(),
            description: "Test circle".to_string(),
            token: Address::from_low_u64(TOKEN),
            contribution_amount: 100,
            period_duration: PERIOD_WEEKLY,
            max_members,
            collateral_factor: 2,
            insurance_fee: 5,
            initial_payout_order: vec![],
        }
    }

    fn fund(p: &RoscaProcessor, program: Address, who: Address, amount: Amount) {
        let token = Address::from_low_u64(TOKEN);
        p.execute(who, &LedgerCall::Mint { token, amount }, 0).unwrap();
        p.execute(
            who,
            &LedgerCall::Approve {
                token,
                spender: program,
                amount,
            },
            0,
        )
        .unwrap();
    }

    #[test]
    fn test_join_requires_allowance() {
        let (p, _) = setup();
        let creator = Address::from_low_u64(1);
        p.execute(creator, &LedgerCall::CreateCircle(params(2)), 0).unwrap();

        let joiner = Address::from_low_u64(2);
        assert_eq!(
            p.check(joiner, &LedgerCall::JoinCircle { circle_id: 1 }, 0),
            Err(ProgramError::InsufficientAllowance)
        );
    }

    #[test]
    fn test_full_circle_lifecycle() {
        let (p, program) = setup();
        let a = Address::from_low_u64(1);
        let b = Address::from_low_u64(2);
        let token = Address::from_low_u64(TOKEN);
        p.execute(a, &LedgerCall::CreateCircle(params(2)), 0).unwrap();

        for who in [a, b] {
            fund(&p, program, who, 1_000);
            p.execute(who, &LedgerCall::JoinCircle { circle_id: 1 }, 10).unwrap();
        }

        let circle = p.store().get_circle(1).unwrap();
        assert_eq!(circle.state, CircleState::Active);
        assert_eq!(circle.current_round, 1);
        assert_eq!(circle.round_start, 10);
        assert_eq!(circle.insurance_pool, 10);
        assert_eq!(p.store().balance(&token, &a), 1_000 - 205);

        // Only `a` pays; `b` defaults and is slashed
        p.execute(a, &LedgerCall::Contribute { circle_id: 1 }, 20).unwrap();
        assert_eq!(
            p.check(b, &LedgerCall::FinalizeRoundIfExpired { circle_id: 1 }, 20),
            Err(ProgramError::RoundNotExpired)
        );
        let expiry = 10 + PERIOD_WEEKLY;
        p.execute(b, &LedgerCall::FinalizeRoundIfExpired { circle_id: 1 }, expiry)
            .unwrap();

        let circle = p.store().get_circle(1).unwrap();
        assert_eq!(circle.current_round, 2);
        assert_eq!(circle.pending_payouts.get(&a), Some(&200));
        assert_eq!(circle.member_info[&b].defaults, 1);
        assert_eq!(circle.member_info[&b].collateral, 100);

        p.execute(a, &LedgerCall::ClaimPayout { circle_id: 1 }, expiry).unwrap();
        assert_eq!(p.store().balance(&token, &a), 1_000 - 205 - 100 + 200);
        assert_eq!(
            p.check(a, &LedgerCall::ClaimPayout { circle_id: 1 }, expiry),
            Err(ProgramError::NoPendingPayout)
        );

        // Second round: both pay, circle completes
        p.execute(a, &LedgerCall::Contribute { circle_id: 1 }, expiry + 1).unwrap();
        p.execute(b, &LedgerCall::Contribute { circle_id: 1 }, expiry + 1).unwrap();
        p.execute(a, &LedgerCall::FinalizeRoundIfExpired { circle_id: 1 }, expiry * 2)
            .unwrap();
        let circle = p.store().get_circle(1).unwrap();
        assert_eq!(circle.state, CircleState::Completed);
        assert_eq!(circle.pending_payouts.get(&b), Some(&200));

        p.execute(b, &LedgerCall::WithdrawCollateral { circle_id: 1 }, expiry * 2)
            .unwrap();
        assert_eq!(
            p.check(b, &LedgerCall::WithdrawCollateral { circle_id: 1 }, expiry * 2),
            Err(ProgramError::NoCollateral)
        );
    }

    #[test]
    fn test_cancel_only_from_open_or_active() {
        let (p, _) = setup();
        let a = Address::from_low_u64(1);
        p.execute(a, &LedgerCall::CreateCircle(params(3)), 0).unwrap();
        assert!(p.cancel_circle(1).is_ok());
        assert!(p.cancel_circle(1).is_err());
        assert_eq!(p.cancel_circle(7), Err(ProgramError::CircleNotFound));
    }
}
