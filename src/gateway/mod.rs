//! Submission Gateway - signing and relaying to the on-chain contracts
//!
//! The relay only sees the [`SubmissionGateway`] capability. Errors come back
//! as [`GatewayError`] variants so callers choose the retry policy; the
//! gateway itself never retries and never compensates.

mod ethers_gateway;

pub use ethers_gateway::{price_to_cents, EthersGateway, GatewayConfig};

use async_trait::async_trait;
use rust_decimal::Decimal;

pub use crate::errors::GatewayError;
use crate::types::{AssetId, PriceSignature, TxRef};

/// Capability to sign and submit oracle transactions
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SubmissionGateway: Send + Sync {
    /// Whether signing credentials and an RPC endpoint are present
    fn is_ready(&self) -> bool;

    /// Sign the (asset, price) payload the adapter contract verifies
    async fn sign_price(&self, asset: &AssetId, price: Decimal)
        -> Result<PriceSignature, GatewayError>;

    /// Submit a signed price update
    async fn submit_price(
        &self,
        asset: &AssetId,
        price: Decimal,
        signature: &PriceSignature,
    ) -> Result<TxRef, GatewayError>;

    /// Resolve a finished match on the betting router
    async fn submit_match_resolution(
        &self,
        match_id: &str,
        winner: &str,
    ) -> Result<TxRef, GatewayError>;

    /// Settle expired price options
    async fn settle_expired(&self) -> Result<TxRef, GatewayError>;
}
