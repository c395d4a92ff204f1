//! Shared types for the solver workspace.
//!
//! Everything that crosses a crate boundary lives here: intents and quotes,
//! permit payloads, vault status, rebalance quotes and operations, chain
//! transactions, events and the configuration schema helpers.

pub mod account;
pub mod amounts;
pub mod clock;
pub mod contracts;
pub mod delivery;
pub mod events;
pub mod intent;
pub mod operation;
pub mod permit;
pub mod quote;
pub mod rebalance;
pub mod validation;
pub mod vault;

pub use account::*;
pub use amounts::*;
pub use clock::*;
pub use delivery::*;
pub use events::*;
pub use intent::*;
pub use operation::*;
pub use permit::*;
pub use quote::*;
pub use rebalance::*;
pub use validation::*;
pub use vault::*;

pub use alloy::primitives::{Address, Bytes, B256, U256};

/// Returns a short display form of a 32-byte hash (`0x1234abcd..`).
pub fn truncate_id(id: &str) -> String {
	let trimmed = id.strip_prefix("0x").unwrap_or(id);
	if trimmed.len() <= 8 {
		format!("0x{}", trimmed)
	} else {
		format!("0x{}..", &trimmed[..8])
	}
}
