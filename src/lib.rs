//! Skin Oracle Relay Library
//!
//! Cross-checked, debounced price and match-result relay for skin markets

pub mod config;
pub mod errors;
pub mod gateway;
pub mod oracle;
pub mod persistence;
pub mod scheduler;
pub mod store;
pub mod types;
