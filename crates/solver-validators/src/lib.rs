//! Off-chain authorization and on-chain funding checks.
//!
//! - [`permit`]: EIP-2612 and Permit2 signature validation against domains
//!   derived from chain state.
//! - [`vault`]: classification of an intent vault's funding status.
//! - [`domain`]: token EIP-712 domain lookup with a storage-backed cache.

pub mod domain;
pub mod permit;
pub mod vault;

pub use domain::{TokenDomain, TokenDomainResolver};
pub use permit::{PermitError, PermitValidationArgs, PermitValidator};
pub use vault::{VaultError, VaultValidator};
