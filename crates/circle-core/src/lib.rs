//! Circle Core - orchestration of ROSCA circle lifecycles
//!
//! This crate sits between the ledger gateway and presentation code:
//! - Snapshot aggregation with a block-scoped query cache
//! - Round timers and per-caller eligibility
//! - Allowance-aware transaction flows keyed by action and circle
//! - A notification center with one entry per flow

pub mod aggregator;
pub mod cache;
pub mod config;
pub mod directory;
pub mod eligibility;
pub mod error;
pub mod flow;
pub mod notifications;
pub mod orchestrator;
pub mod snapshot;
pub mod timer;

#[cfg(test)]
mod tests;

pub use aggregator::SnapshotAggregator;
pub use cache::{QueryCache, QueryKey};
pub use config::CoreConfig;
pub use directory::{describe_period, user_circles, CircleFilter, DirectoryStats, SortOrder};
pub use eligibility::{
    can_contribute, can_finalize_round, can_join, can_withdraw_collateral, has_pending_payout,
    required_contribution, required_join_deposit, Eligibility,
};
pub use error::FlowError;
pub use flow::{FlowKey, FlowKind, FlowRecord, FlowStep, FlowTarget};
pub use notifications::{Notification, NotificationCenter, NotificationEvent, NotificationLevel};
pub use orchestrator::{CreateCircleRequest, FlowHandle, FlowOrchestrator};
pub use snapshot::{CircleEntry, CircleSnapshot, CircleView, Loadable, MemberFacts};
pub use timer::{round_time, snapshot_round_time, RoundTime, RoundTimer};
