//! On-chain gateway backed by ethers
//!
//! Prices are signed as `keccak256(abi.encodePacked(string assetId, uint256 cents))`
//! with an EIP-191 personal-sign prefix, then relayed to the oracle adapter.
//! Match results go to the betting router, expiry settlement to the option pool.

use async_trait::async_trait;
use ethers::abi::Detokenize;
use ethers::contract::{abigen, ContractCall};
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Bytes, U256};
use ethers::utils::keccak256;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::{GatewayError, SubmissionGateway};
use crate::types::{AssetId, PriceSignature, TxRef};

abigen!(
    OracleAdapterContract,
    r#"[
        function updatePrice(string skinId, uint256 price, bytes signature)
    ]"#
);

abigen!(
    BettingRouterContract,
    r#"[
        function resolveMatch(string matchId, string winner)
    ]"#
);

abigen!(
    PriceOptionPoolContract,
    r#"[
        function settleExpired()
    ]"#
);

type RelayClient = SignerMiddleware<Provider<Http>, LocalWallet>;

/// Convert a decimal price to the integer cents the contracts store
pub fn price_to_cents(price: Decimal) -> Option<U256> {
    if price.is_sign_negative() {
        return None;
    }
    let cents = price
        .checked_mul(Decimal::ONE_HUNDRED)?
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_u128()?;
    Some(U256::from(cents))
}

/// Digest the adapter contract recovers the oracle signer from
fn price_digest(asset: &AssetId, cents: U256) -> [u8; 32] {
    let mut packed = asset.as_str().as_bytes().to_vec();
    let mut word = [0u8; 32];
    cents.to_big_endian(&mut word);
    packed.extend_from_slice(&word);
    keccak256(packed)
}

fn decode_signature(sig: &PriceSignature) -> Result<Bytes, GatewayError> {
    hex::decode(sig.as_str().trim_start_matches("0x"))
        .map(Bytes::from)
        .map_err(|e| GatewayError::transport(format!("malformed signature: {}", e)))
}

/// Endpoints and credentials. Every field is optional; absent ones surface
/// as `NotConfigured` at call time.
#[derive(Clone)]
pub struct GatewayConfig {
    pub rpc_url: Option<String>,
    pub private_key: Option<String>,
    pub adapter_address: Option<String>,
    pub betting_router_address: Option<String>,
    pub option_pool_address: Option<String>,
    pub chain_id: u64,
    /// Longest wait for a receipt before the call counts as a transport failure
    pub confirm_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            rpc_url: None,
            private_key: None,
            adapter_address: None,
            betting_router_address: None,
            option_pool_address: None,
            chain_id: 137,
            confirm_timeout: Duration::from_secs(180),
        }
    }
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("rpc_url", &self.rpc_url)
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .field("adapter_address", &self.adapter_address)
            .field("betting_router_address", &self.betting_router_address)
            .field("option_pool_address", &self.option_pool_address)
            .field("chain_id", &self.chain_id)
            .field("confirm_timeout", &self.confirm_timeout)
            .finish()
    }
}

/// [`SubmissionGateway`] that signs with a local key and sends through JSON-RPC
pub struct EthersGateway {
    config: GatewayConfig,
    wallet: Option<LocalWallet>,
    client: Option<Arc<RelayClient>>,
}

impl EthersGateway {
    /// Build the gateway. Missing credentials are fine; malformed ones are not.
    pub fn new(config: GatewayConfig) -> anyhow::Result<Self> {
        use anyhow::Context;

        let wallet = match config.private_key.as_deref().filter(|k| !k.trim().is_empty()) {
            Some(key) => Some(
                key.trim()
                    .parse::<LocalWallet>()
                    .context("Invalid ORACLE_PRIVATE_KEY")?
                    .with_chain_id(config.chain_id),
            ),
            None => None,
        };

        let client = match (&wallet, config.rpc_url.as_deref().filter(|u| !u.trim().is_empty())) {
            (Some(wallet), Some(url)) => {
                let provider = Provider::<Http>::try_from(url.trim())
                    .with_context(|| format!("Invalid oracle RPC url '{}'", url))?;
                Some(Arc::new(SignerMiddleware::new(provider, wallet.clone())))
            }
            _ => None,
        };

        if let Some(wallet) = &wallet {
            tracing::info!(
                signer = %format!("{:#x}", wallet.address()),
                chain_id = config.chain_id,
                rpc = client.is_some(),
                "Oracle gateway initialised"
            );
        }

        Ok(Self {
            config,
            wallet,
            client,
        })
    }

    /// Address of the signing key, if configured
    pub fn signer_address(&self) -> Option<Address> {
        self.wallet.as_ref().map(|w| w.address())
    }

    fn wallet(&self) -> Result<&LocalWallet, GatewayError> {
        self.wallet
            .as_ref()
            .ok_or_else(|| GatewayError::not_configured("ORACLE_PRIVATE_KEY"))
    }

    fn client(&self) -> Result<Arc<RelayClient>, GatewayError> {
        self.wallet()?;
        self.client
            .clone()
            .ok_or_else(|| GatewayError::not_configured("chain.rpc_url"))
    }

    fn contract_address(value: &Option<String>, key: &str) -> Result<Address, GatewayError> {
        let raw = value
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| GatewayError::not_configured(key))?;
        raw.parse::<Address>()
            .map_err(|_| GatewayError::not_configured(format!("{} is not an address: {}", key, raw)))
    }

    async fn confirm<D: Detokenize>(
        &self,
        call: ContractCall<RelayClient, D>,
        what: &str,
    ) -> Result<TxRef, GatewayError> {
        let pending = call
            .send()
            .await
            .map_err(|e| GatewayError::transport(format!("{} submit failed: {}", what, e)))?;
        let tx_hash = pending.tx_hash();
        let receipt = tokio::time::timeout(self.config.confirm_timeout, pending)
            .await
            .map_err(|_| {
                GatewayError::transport(format!(
                    "{} transaction {:#x} not confirmed within {:?}",
                    what, tx_hash, self.config.confirm_timeout
                ))
            })?
            .map_err(|e| GatewayError::transport(format!("{} confirmation failed: {}", what, e)))?
            .ok_or_else(|| {
                GatewayError::transport(format!(
                    "{} transaction {:#x} dropped before confirmation",
                    what, tx_hash
                ))
            })?;

        tracing::info!(
            call = what,
            tx_hash = %format!("{:#x}", receipt.transaction_hash),
            block = ?receipt.block_number,
            "Transaction confirmed"
        );
        Ok(TxRef(format!("{:#x}", receipt.transaction_hash)))
    }
}

#[async_trait]
impl SubmissionGateway for EthersGateway {
    fn is_ready(&self) -> bool {
        self.wallet.is_some() && self.client.is_some()
    }

    async fn sign_price(
        &self,
        asset: &AssetId,
        price: Decimal,
    ) -> Result<PriceSignature, GatewayError> {
        let wallet = self.wallet()?;
        let cents = price_to_cents(price)
            .ok_or_else(|| GatewayError::transport(format!("price {} not encodable", price)))?;
        let digest = price_digest(asset, cents);
        let signature = wallet
            .sign_message(digest)
            .await
            .map_err(|e| GatewayError::transport(format!("signing failed: {}", e)))?;
        Ok(PriceSignature(format!("0x{}", hex::encode(signature.to_vec()))))
    }

    async fn submit_price(
        &self,
        asset: &AssetId,
        price: Decimal,
        signature: &PriceSignature,
    ) -> Result<TxRef, GatewayError> {
        let client = self.client()?;
        let address =
            Self::contract_address(&self.config.adapter_address, "chain.adapter_address")?;
        let cents = price_to_cents(price)
            .ok_or_else(|| GatewayError::transport(format!("price {} not encodable", price)))?;
        let sig_bytes = decode_signature(signature)?;

        tracing::info!(asset = %asset, price = %price, cents = %cents, "Submitting updatePrice");
        let contract = OracleAdapterContract::new(address, client);
        self.confirm(contract.update_price(asset.to_string(), cents, sig_bytes), "updatePrice").await
    }

    async fn submit_match_resolution(
        &self,
        match_id: &str,
        winner: &str,
    ) -> Result<TxRef, GatewayError> {
        let client = self.client()?;
        let address = Self::contract_address(
            &self.config.betting_router_address,
            "chain.betting_router_address",
        )?;

        tracing::info!(match_id = %match_id, winner = %winner, "Submitting resolveMatch");
        let contract = BettingRouterContract::new(address, client);
        self.confirm(
            contract.resolve_match(match_id.to_string(), winner.to_string()),
            "resolveMatch",
        )
        .await
    }

    async fn settle_expired(&self) -> Result<TxRef, GatewayError> {
        let address =
            Self::contract_address(&self.config.option_pool_address, "chain.option_pool_address")?;
        let client = self.client()?;

        let contract = PriceOptionPoolContract::new(address, client);
        self.confirm(contract.settle_expired(), "settleExpired").await
    }
}
