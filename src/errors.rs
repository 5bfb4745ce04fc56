//! Error taxonomy for the relay
//!
//! None of these are fatal to the process. Every variant means "skip this
//! asset / match / batch and let the next tick retry".

use rust_decimal::Decimal;
use thiserror::Error;

use crate::types::{AssetId, SourceId};

/// Failures reported by a [`crate::gateway::SubmissionGateway`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Credentials, RPC endpoint or contract address missing
    #[error("gateway not configured: {0}")]
    NotConfigured(String),

    /// The call or broadcast failed (network, revert, dropped transaction)
    #[error("transport error: {0}")]
    Transport(String),
}

impl GatewayError {
    pub fn not_configured(what: impl Into<String>) -> Self {
        GatewayError::NotConfigured(what.into())
    }

    pub fn transport(err: impl std::fmt::Display) -> Self {
        GatewayError::Transport(err.to_string())
    }
}

/// Why an asset or match was skipped in a tick
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("insufficient data for {asset}: no recent observations from {missing:?}")]
    InsufficientData {
        asset: AssetId,
        missing: Vec<SourceId>,
    },

    #[error("consensus mismatch for {asset}: spread {spread} exceeds tolerance {tolerance}")]
    ConsensusMismatch {
        asset: AssetId,
        spread: Decimal,
        tolerance: Decimal,
    },

    #[error("gateway not configured: {0}")]
    NotConfigured(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("store read failed: {0:#}")]
    Store(#[from] anyhow::Error),
}

impl From<GatewayError> for RelayError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::NotConfigured(what) => RelayError::NotConfigured(what),
            GatewayError::Transport(msg) => RelayError::Transport(msg),
        }
    }
}

impl RelayError {
    /// Informational skips need no escalation beyond an info line
    pub fn is_informational(&self) -> bool {
        matches!(
            self,
            RelayError::InsufficientData { .. } | RelayError::ConsensusMismatch { .. }
        )
    }
}
