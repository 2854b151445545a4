//! Allowance-aware flow tests
//!
//! Covers:
//! - Skipping the approval when the allowance already suffices
//! - Approve-then-join ordering on confirmation
//! - Approval failures stopping the dependent call
//! - Independent flows on distinct circles, same-token flows taking turns
//! - Duplicate starts, cancellation and the idle reset

use super::*;
use crate::{
    config::CoreConfig,
    error::FlowError,
    flow::{FlowKey, FlowKind, FlowStep},
    notifications::NotificationLevel,
};
use circle_types::{CircleState, GatewayError, LedgerCall};

fn caller() -> Address {
    Address::from_low_u64(0xa11ce)
}

fn joins(harness: &Harness) -> Vec<CircleId> {
    harness
        .ledger
        .submitted_calls()
        .into_iter()
        .filter_map(|c| match c.call {
            LedgerCall::JoinCircle { circle_id } => Some(circle_id),
            _ => None,
        })
        .collect()
}

fn approvals(harness: &Harness) -> Vec<(Address, Amount)> {
    harness
        .ledger
        .submitted_calls()
        .into_iter()
        .filter_map(|c| match c.call {
            LedgerCall::Approve { token, amount, .. } => Some((token, amount)),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_sufficient_allowance_skips_approval() {
    let harness = Harness::new();
    let circle = harness.create_circle(usdc(), 100, 2, 5, 3).await;
    harness.ledger.fund(usdc(), caller(), 1_000);
    harness.ledger.set_allowance(usdc(), caller(), 205);

    let orchestrator = harness.orchestrator(caller());
    let miner = harness.auto_mine();
    let handle = orchestrator.join(circle).await.unwrap();
    let receipt = handle.outcome().await.unwrap();
    miner.abort();

    assert!(receipt.is_success());
    assert!(approvals(&harness).is_empty());
    assert_eq!(joins(&harness), vec![circle]);

    let snapshot = harness.ledger.store().get_circle(circle).unwrap();
    assert!(snapshot.is_member(&caller()));
}

#[tokio::test]
async fn test_join_approves_then_joins_after_confirmation() {
    let harness = Harness::new();
    let circle = harness.create_circle(usdc(), 100, 2, 5, 3).await;
    harness.ledger.fund(usdc(), caller(), 1_000);

    let orchestrator = harness.orchestrator(caller());
    let handle = orchestrator.join(circle).await.unwrap();
    let mut state = handle.subscribe();

    let record = wait_for(&mut state, |r| r.approval_tx.is_some()).await;
    assert_eq!(record.step, FlowStep::Approving);
    assert_eq!(record.required_amount, Some(205));
    assert_eq!(approvals(&harness), vec![(usdc(), 205)]);
    // Nothing dependent goes out before the approval is mined
    tokio::task::yield_now().await;
    assert!(joins(&harness).is_empty());

    let approval_block = harness.ledger.mine_block().height;
    let record = wait_for(&mut state, |r| r.tx.is_some()).await;
    assert_eq!(record.step, FlowStep::Executing);

    let calls = harness.ledger.submitted_calls();
    assert_eq!(calls.len(), 3);
    assert!(matches!(calls[1].call, LedgerCall::Approve { .. }));
    assert_eq!(calls[2].call, LedgerCall::JoinCircle { circle_id: circle });
    assert!(calls[2].height >= approval_block);

    harness.ledger.mine_block();
    let receipt = handle.outcome().await.unwrap();
    assert!(receipt.is_success());

    let notification = orchestrator
        .notifications()
        .get(&format!("join-circle-{}", circle))
        .unwrap();
    assert_eq!(notification.level, NotificationLevel::Success);
    assert_eq!(orchestrator.notifications().len(), 1);
}

#[tokio::test]
async fn test_rejected_approval_never_submits_join() {
    let harness = Harness::new();
    let circle = harness.create_circle(usdc(), 100, 2, 5, 3).await;
    harness.ledger.fund(usdc(), caller(), 1_000);
    harness.ledger.reject_next_signature();

    let orchestrator = harness.orchestrator(caller());
    let handle = orchestrator.join(circle).await.unwrap();
    let key = handle.key();
    let result = handle.outcome().await;

    assert_eq!(result, Err(FlowError::Gateway(GatewayError::SignatureRejected)));
    assert!(joins(&harness).is_empty());
    assert!(matches!(
        orchestrator.flow(&key).unwrap().step,
        FlowStep::Failed { .. }
    ));

    let notifications = orchestrator.notifications().active();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].key, format!("join-circle-{}", circle));
    assert_eq!(notifications[0].level, NotificationLevel::Error);
    assert_eq!(notifications[0].message, "User rejected the request");
}

#[tokio::test]
async fn test_reverted_approval_never_submits_join() {
    let harness = Harness::new();
    let circle = harness.create_circle(usdc(), 100, 2, 5, 3).await;
    harness.ledger.fund(usdc(), caller(), 1_000);
    harness.ledger.revert_next_inclusion();

    let orchestrator = harness.orchestrator(caller());
    let miner = harness.auto_mine();
    let result = orchestrator.join(circle).await.unwrap().outcome().await;
    miner.abort();

    assert!(matches!(
        result,
        Err(FlowError::Gateway(GatewayError::Reverted { .. }))
    ));
    assert_eq!(approvals(&harness).len(), 1);
    assert!(joins(&harness).is_empty());
}

#[tokio::test]
async fn test_transport_failure_while_waiting_fails_flow() {
    let harness = Harness::new();
    let circle = harness.create_circle(usdc(), 100, 2, 5, 3).await;
    harness.ledger.fund(usdc(), caller(), 1_000);
    harness.ledger.set_allowance(usdc(), caller(), 205);
    harness.ledger.fail_next_confirmation();

    let orchestrator = harness.orchestrator(caller());
    let result = orchestrator.join(circle).await.unwrap().outcome().await;
    assert!(matches!(
        result,
        Err(FlowError::Gateway(GatewayError::Transport(_)))
    ));
    let note = orchestrator.notifications().active().remove(0);
    assert!(note.message.starts_with("Network error"));
}

#[tokio::test]
async fn test_concurrent_joins_on_distinct_circles() {
    let harness = Harness::new();
    let first = harness.create_circle(usdc(), 100, 2, 5, 3).await;
    let second = harness.create_circle(usdt(), 300, 1, 7, 3).await;
    harness.ledger.fund(usdc(), caller(), 1_000);
    harness.ledger.fund(usdt(), caller(), 1_000);

    let orchestrator = harness.orchestrator(caller());
    let first_handle = orchestrator.join(first).await.unwrap();
    let mut first_state = first_handle.subscribe();
    wait_for(&mut first_state, |r| r.approval_tx.is_some()).await;

    let second_handle = orchestrator.join(second).await.unwrap();
    let mut second_state = second_handle.subscribe();
    wait_for(&mut second_state, |r| r.approval_tx.is_some()).await;

    let tracked = orchestrator
        .flow(&FlowKey::circle(FlowKind::Join, first))
        .unwrap();
    assert_eq!(tracked.key.circle_id(), Some(first));
    assert_eq!(tracked.required_amount, Some(205));
    assert_eq!(tracked.step, FlowStep::Approving);

    let tracked = orchestrator
        .flow(&FlowKey::circle(FlowKind::Join, second))
        .unwrap();
    assert_eq!(tracked.key.circle_id(), Some(second));
    assert_eq!(tracked.required_amount, Some(307));
    assert_eq!(orchestrator.active_flows().len(), 2);

    harness.ledger.mine_block();
    wait_for(&mut first_state, |r| r.tx.is_some()).await;
    wait_for(&mut second_state, |r| r.tx.is_some()).await;
    harness.ledger.mine_block();

    assert!(first_handle.outcome().await.is_ok());
    assert!(second_handle.outcome().await.is_ok());

    let mut joined = joins(&harness);
    joined.sort();
    assert_eq!(joined, vec![first, second]);
    assert_eq!(harness.ledger.store().balance(&usdc(), &caller()), 1_000 - 205);
    assert_eq!(harness.ledger.store().balance(&usdt(), &caller()), 1_000 - 307);
}

#[tokio::test]
async fn test_same_token_joins_take_turns() {
    let harness = Harness::new();
    let first = harness.create_circle(usdc(), 100, 2, 5, 3).await;
    let second = harness.create_circle(usdc(), 300, 1, 7, 3).await;
    harness.ledger.fund(usdc(), caller(), 1_000);

    let orchestrator = harness.orchestrator(caller());
    let first_handle = orchestrator.join(first).await.unwrap();
    let mut first_state = first_handle.subscribe();
    wait_for(&mut first_state, |r| r.approval_tx.is_some()).await;

    // The second join waits before reading the allowance
    let second_handle = orchestrator.join(second).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(second_handle.step(), FlowStep::CheckingAllowance);
    assert_eq!(approvals(&harness), vec![(usdc(), 205)]);

    let miner = harness.auto_mine();
    assert!(first_handle.outcome().await.is_ok());
    assert!(second_handle.outcome().await.is_ok());
    miner.abort();

    assert_eq!(approvals(&harness), vec![(usdc(), 205), (usdc(), 307)]);
    assert_eq!(joins(&harness), vec![first, second]);
    assert_eq!(
        harness.ledger.store().balance(&usdc(), &caller()),
        1_000 - 205 - 307
    );
}

#[tokio::test]
async fn test_second_start_on_same_circle_is_rejected() {
    let harness = Harness::new();
    let circle = harness.create_circle(usdc(), 100, 2, 5, 3).await;
    harness.ledger.fund(usdc(), caller(), 1_000);

    let orchestrator = harness.orchestrator(caller());
    let handle = orchestrator.join(circle).await.unwrap();
    let mut state = handle.subscribe();
    wait_for(&mut state, |r| r.approval_tx.is_some()).await;

    let again = orchestrator.join(circle).await;
    assert!(matches!(again, Err(FlowError::AlreadyInFlight { .. })));

    // The first flow is untouched
    assert_eq!(handle.record().key.circle_id(), Some(circle));
    assert_eq!(handle.step(), FlowStep::Approving);
}

#[tokio::test]
async fn test_cancel_keeps_submitted_effects() {
    let harness = Harness::new();
    let circle = harness.create_circle(usdc(), 100, 2, 5, 3).await;
    harness.ledger.fund(usdc(), caller(), 1_000);

    let orchestrator = harness.orchestrator(caller());
    let handle = orchestrator.join(circle).await.unwrap();
    let key = handle.key();
    let mut state = handle.subscribe();
    wait_for(&mut state, |r| r.approval_tx.is_some()).await;

    assert!(orchestrator.cancel(&key));
    assert!(!orchestrator.cancel(&key));
    assert!(orchestrator.flow(&key).is_none());
    assert_eq!(handle.step(), FlowStep::Idle);
    assert_eq!(handle.outcome().await, Err(FlowError::Cancelled));

    // The approval was already handed to the ledger
    harness.ledger.mine_block();
    assert_eq!(
        harness.ledger.store().allowance(
            &usdc(),
            &caller(),
            &Address::from_low_u64(PROGRAM)
        ),
        205
    );
    assert!(joins(&harness).is_empty());
}

#[tokio::test]
async fn test_finished_flow_resets_to_idle() {
    let harness = Harness::with_config(CoreConfig {
        flow_reset_delay_ms: 20,
        ..CoreConfig::default()
    });
    let circle = harness.create_circle(usdc(), 100, 2, 5, 3).await;
    harness.ledger.fund(usdc(), caller(), 1_000);
    harness.ledger.reject_next_signature();

    let orchestrator = harness.orchestrator(caller());
    let handle = orchestrator.join(circle).await.unwrap();
    let key = handle.key();
    let mut state = handle.subscribe();
    assert!(handle.outcome().await.is_err());

    wait_for(&mut state, |r| r.step == FlowStep::Idle).await;
    assert!(orchestrator.flow(&key).is_none());
    assert!(orchestrator
        .notifications()
        .get(&key.notification_key())
        .is_none());

    // A new attempt starts cleanly once idle
    let miner = harness.auto_mine();
    let retry = orchestrator.join(circle).await.unwrap();
    assert!(retry.outcome().await.is_ok());
    miner.abort();
}

#[tokio::test]
async fn test_unavailable_circle_cannot_start_flows() {
    let harness = Harness::new();
    let first = harness.create_circle(usdc(), 100, 2, 5, 3).await;
    let second = harness.create_circle(usdc(), 100, 2, 5, 3).await;
    harness.ledger.fail_reads_for(first);

    let orchestrator = harness.orchestrator(caller());
    assert_eq!(
        orchestrator.join(first).await.err(),
        Some(FlowError::NoSnapshot { circle_id: first })
    );
    assert_eq!(
        orchestrator.join(99).await.err(),
        Some(FlowError::NoSnapshot { circle_id: 99 })
    );

    let entries = harness.aggregator.all_circles().await.unwrap();
    assert!(entries[0].snapshot().is_none());
    assert_eq!(entries[1].snapshot().unwrap().state, CircleState::Open);
    assert!(orchestrator.join(second).await.is_ok());
}

#[tokio::test]
async fn test_ineligible_actions_are_refused() {
    let harness = Harness::new();
    let circle = harness.create_circle(usdc(), 100, 2, 5, 2).await;
    let orchestrator = harness.orchestrator(caller());

    for result in [
        orchestrator.contribute(circle).await.err(),
        orchestrator.finalize_round(circle).await.err(),
        orchestrator.withdraw_collateral(circle).await.err(),
        orchestrator.claim_payout(circle).await.err(),
    ] {
        assert!(matches!(result, Some(FlowError::NotPermitted { .. })));
    }
    assert!(harness.ledger.submitted_calls().len() == 1);
}
