//! Orchestration errors

use crate::flow::{FlowKey, FlowKind};
use circle_types::{CircleId, GatewayError, ParamsError, UnitsError};
use thiserror::Error;

/// Why a flow could not start or did not complete
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FlowError {
    #[error("{action} is not permitted on circle {circle_id}")]
    NotPermitted { action: FlowKind, circle_id: CircleId },

    #[error("A {key} flow is already in progress")]
    AlreadyInFlight { key: FlowKey },

    #[error("Circle {circle_id} is not available yet")]
    NoSnapshot { circle_id: CircleId },

    #[error("Unknown token {0}")]
    UnknownToken(String),

    #[error(transparent)]
    Params(#[from] ParamsError),

    #[error(transparent)]
    Units(#[from] UnitsError),

    #[error("Flow was cancelled")]
    Cancelled,

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

impl FlowError {
    /// Message for the flow's notification
    pub fn short_message(&self) -> String {
        match self {
            Self::Gateway(e) => e.short_message(),
            other => other.to_string(),
        }
    }
}
