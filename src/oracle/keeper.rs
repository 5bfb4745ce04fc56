//! Expired option settlement keeper

use std::sync::Arc;
use tracing::{info, warn};

use crate::errors::{GatewayError, RelayError};
use crate::gateway::SubmissionGateway;
use crate::types::TxRef;

pub struct SettlementKeeper {
    gateway: Arc<dyn SubmissionGateway>,
}

impl SettlementKeeper {
    pub fn new(gateway: Arc<dyn SubmissionGateway>) -> Self {
        Self { gateway }
    }

    /// Call settleExpired once. `Ok(None)` means skipped for missing configuration.
    pub async fn run_once(&self) -> Result<Option<TxRef>, RelayError> {
        match self.gateway.settle_expired().await {
            Ok(tx) => {
                info!(tx = %tx, "Expired options settled");
                Ok(Some(tx))
            }
            Err(GatewayError::NotConfigured(what)) => {
                warn!(missing = %what, "Option pool not configured, skip settleExpired");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}
