//! Core types used throughout the relay
//!
//! Defines observations, aggregated prices, match records and the opaque
//! references handed back by the submission gateway.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier of a tracked asset (skin id in the market store)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetId(pub String);

impl AssetId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AssetId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Independent market a price sample was scraped from (e.g. "buff163", "steam")
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(pub String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A single timestamped price sample from one source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceObservation {
    pub asset: AssetId,
    pub source: SourceId,
    pub price: Decimal,
    pub volume: Option<Decimal>,
    pub observed_at: DateTime<Utc>,
}

impl PriceObservation {
    pub fn new(
        asset: impl Into<String>,
        source: impl Into<String>,
        price: Decimal,
        volume: Option<Decimal>,
        observed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            asset: AssetId::new(asset),
            source: SourceId::new(source),
            price,
            volume,
            observed_at,
        }
    }
}

/// Sample window a VWAP was computed over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleWindow {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

/// VWAP for one (asset, source) pair over one tick's window. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedPrice {
    pub asset: AssetId,
    pub source: SourceId,
    /// `None` when the window held no usable observations
    pub vwap: Option<Decimal>,
    pub window: SampleWindow,
    pub samples: usize,
}

/// Lifecycle status of a match in the match store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchStatus {
    Upcoming,
    Live,
    Finished,
    Cancelled,
}

impl FromStr for MatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "UPCOMING" => Ok(MatchStatus::Upcoming),
            "LIVE" => Ok(MatchStatus::Live),
            "FINISHED" => Ok(MatchStatus::Finished),
            "CANCELLED" | "CANCELED" => Ok(MatchStatus::Cancelled),
            other => Err(format!("unknown match status '{}'", other)),
        }
    }
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchStatus::Upcoming => write!(f, "UPCOMING"),
            MatchStatus::Live => write!(f, "LIVE"),
            MatchStatus::Finished => write!(f, "FINISHED"),
            MatchStatus::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// A match whose outcome is final: status FINISHED with a non-empty winner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizedMatch {
    pub match_id: String,
    pub winner: String,
}

impl FinalizedMatch {
    /// Build from a raw store row, rejecting anything not yet final
    pub fn from_record(match_id: &str, status: MatchStatus, winner: Option<&str>) -> Option<Self> {
        if status != MatchStatus::Finished {
            return None;
        }
        let winner = winner.map(str::trim).filter(|w| !w.is_empty())?;
        Some(Self {
            match_id: match_id.to_string(),
            winner: winner.to_string(),
        })
    }
}

/// Hex-encoded (0x-prefixed) signature over a price payload
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PriceSignature(pub String);

impl PriceSignature {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PriceSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Transaction reference returned by the ledger for a confirmed submission
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TxRef(pub String);

impl fmt::Display for TxRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
