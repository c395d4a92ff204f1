//! Permit signature validation.
//!
//! Supports EIP-2612 `permit` signatures and Permit2 allowance signatures
//! (single and batch). Domains are always derived from chain state or the
//! Permit2 whitelist, never taken from the request. Expiry is checked before
//! any signature work.

use crate::domain::TokenDomainResolver;
use alloy::primitives::aliases::{U160, U48};
use alloy::primitives::Signature;
use alloy::sol_types::{Eip712Domain, SolCall, SolStruct};
use solver_delivery::{DeliveryError, DeliveryService};
use solver_types::contracts::{IERC20Permit, IPermit2};
use solver_types::{
	Address, Bytes, Clock, PermitDetails, PermitEntry, Permit2Data, Permit2Payload, TokenAmount,
	B256, CANONICAL_PERMIT2, U256,
};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

mod eip712 {
	alloy::sol! {
		struct Permit {
			address owner;
			address spender;
			uint256 value;
			uint256 nonce;
			uint256 deadline;
		}
	}
}

#[derive(Debug, Error)]
pub enum PermitError {
	#[error("Exactly one of permit or permit2 authorizations must be provided")]
	AmbiguousAuthorization,
	#[error("Insufficient authorization for token {token}: {reason}")]
	InsufficientAuthorization { token: Address, reason: String },
	#[error("Permit for token {token} expired at {deadline} (now {now})")]
	PermitExpired { token: Address, deadline: u64, now: u64 },
	#[error("Signature does not recover to owner {owner}")]
	SignatureMismatch { owner: Address },
	#[error("Unknown Permit2 contract {0}")]
	UnknownPermitContract(Address),
	#[error("Permit2 spender {actual} does not match expected {expected}")]
	SpenderMismatch { expected: Address, actual: Address },
	#[error("Permit2 nonce mismatch for token {token}: on chain {on_chain}, signed {signed}")]
	NonceMismatch {
		token: Address,
		on_chain: u64,
		signed: u64,
	},
	#[error("Permit for token {token} reverts when simulated: {reason}")]
	SimulationFailed { token: Address, reason: String },
	#[error("Chain read failed: {0}")]
	ChainRead(#[from] DeliveryError),
}

/// Inputs for a single validation.
#[derive(Debug, Clone, Copy)]
pub struct PermitValidationArgs<'a> {
	pub chain_id: u64,
	/// Address expected to have signed (the funder).
	pub owner: Address,
	/// Address allowed to pull the funds (the vault).
	pub spender: Address,
	pub reward: &'a [TokenAmount],
	pub permits: Option<&'a [PermitEntry]>,
	pub permit2: Option<&'a Permit2Payload>,
}

pub struct PermitValidator {
	delivery: Arc<DeliveryService>,
	domains: Arc<TokenDomainResolver>,
	clock: Arc<dyn Clock>,
	permit2_contracts: HashSet<Address>,
}

impl PermitValidator {
	/// `extra_permit2` extends the canonical Permit2 deployment.
	pub fn new(
		delivery: Arc<DeliveryService>,
		domains: Arc<TokenDomainResolver>,
		clock: Arc<dyn Clock>,
		extra_permit2: impl IntoIterator<Item = Address>,
	) -> Self {
		let mut permit2_contracts: HashSet<Address> = extra_permit2.into_iter().collect();
		permit2_contracts.insert(CANONICAL_PERMIT2);
		Self {
			delivery,
			domains,
			clock,
			permit2_contracts,
		}
	}

	pub async fn validate(&self, args: PermitValidationArgs<'_>) -> Result<(), PermitError> {
		match (args.permits, args.permit2) {
			(Some(permits), None) => self.validate_permits(&args, permits).await,
			(None, Some(permit2)) => self.validate_permit2(&args, permit2).await,
			_ => Err(PermitError::AmbiguousAuthorization),
		}
	}

	async fn validate_permits(
		&self,
		args: &PermitValidationArgs<'_>,
		permits: &[PermitEntry],
	) -> Result<(), PermitError> {
		let required = required_per_token(args.reward);
		let mut matched = Vec::with_capacity(required.len());
		for reward in &required {
			let entry = permits
				.iter()
				.find(|p| p.token == reward.token)
				.ok_or_else(|| PermitError::InsufficientAuthorization {
					token: reward.token,
					reason: "no permit for reward token".to_string(),
				})?;
			let value = entry.amount.unwrap_or(reward.amount);
			if value < reward.amount {
				return Err(PermitError::InsufficientAuthorization {
					token: reward.token,
					reason: format!("permit value {} below reward {}", value, reward.amount),
				});
			}
			matched.push((entry, value));
		}

		let now = self.clock.now();
		for (entry, _) in &matched {
			if now > entry.deadline {
				return Err(PermitError::PermitExpired {
					token: entry.token,
					deadline: entry.deadline,
					now,
				});
			}
		}

		for (entry, value) in matched {
			let domain = self
				.domains
				.resolve(args.chain_id, entry.token)
				.await?
				.eip712_domain(args.chain_id, entry.token);

			let nonce = self
				.delivery
				.contract_call(
					args.chain_id,
					entry.token,
					&IERC20Permit::noncesCall { owner: args.owner },
				)
				.await?;

			let permit = eip712::Permit {
				owner: args.owner,
				spender: args.spender,
				value,
				nonce,
				deadline: U256::from(entry.deadline),
			};
			let signature =
				verify_signer(&permit.eip712_signing_hash(&domain), &entry.signature, args.owner)?;

			let call = IERC20Permit::permitCall {
				owner: args.owner,
				spender: args.spender,
				value,
				deadline: U256::from(entry.deadline),
				v: 27 + u8::from(signature.v()),
				r: B256::from(signature.r().to_be_bytes::<32>()),
				s: B256::from(signature.s().to_be_bytes::<32>()),
			};
			self.simulate(args.chain_id, entry.token, entry.token, call.abi_encode())
				.await?;
		}

		Ok(())
	}

	async fn validate_permit2(
		&self,
		args: &PermitValidationArgs<'_>,
		payload: &Permit2Payload,
	) -> Result<(), PermitError> {
		let details = payload.data.details();
		let required = required_per_token(args.reward);
		let mut matched = Vec::with_capacity(required.len());
		for reward in &required {
			let detail = details
				.iter()
				.find(|d| d.token == reward.token)
				.copied()
				.ok_or_else(|| PermitError::InsufficientAuthorization {
					token: reward.token,
					reason: "no permit2 details for reward token".to_string(),
				})?;
			matched.push((reward, detail));
		}

		let now = self.clock.now();
		let sig_deadline = payload.data.sig_deadline();
		if now > sig_deadline {
			return Err(PermitError::PermitExpired {
				token: matched.first().map(|(r, _)| r.token).unwrap_or_default(),
				deadline: sig_deadline,
				now,
			});
		}
		for detail in &details {
			if detail.expiration != 0 && now > detail.expiration {
				return Err(PermitError::PermitExpired {
					token: detail.token,
					deadline: detail.expiration,
					now,
				});
			}
		}

		if !self.permit2_contracts.contains(&payload.permit_contract) {
			return Err(PermitError::UnknownPermitContract(payload.permit_contract));
		}
		let domain = Eip712Domain::new(
			Some("Permit2".into()),
			None,
			Some(U256::from(args.chain_id)),
			Some(payload.permit_contract),
			None,
		);

		let (signing_hash, simulation) = match &payload.data {
			Permit2Data::Single {
				details,
				spender,
				sig_deadline,
			} => {
				let permit = IPermit2::PermitSingle {
					details: typed_details(details, args.owner)?,
					spender: *spender,
					sigDeadline: U256::from(*sig_deadline),
				};
				let hash = permit.eip712_signing_hash(&domain);
				let call = IPermit2::permit_0Call {
					owner: args.owner,
					permitSingle: permit,
					signature: payload.signature.clone(),
				};
				(hash, call.abi_encode())
			},
			Permit2Data::Batch {
				details,
				spender,
				sig_deadline,
			} => {
				let permit = IPermit2::PermitBatch {
					details: details
						.iter()
						.map(|d| typed_details(d, args.owner))
						.collect::<Result<_, _>>()?,
					spender: *spender,
					sigDeadline: U256::from(*sig_deadline),
				};
				let hash = permit.eip712_signing_hash(&domain);
				let call = IPermit2::permit_1Call {
					owner: args.owner,
					permitBatch: permit,
					signature: payload.signature.clone(),
				};
				(hash, call.abi_encode())
			},
		};
		verify_signer(&signing_hash, &payload.signature, args.owner)?;

		let spender = payload.data.spender();
		if spender != args.spender {
			return Err(PermitError::SpenderMismatch {
				expected: args.spender,
				actual: spender,
			});
		}

		for (reward, detail) in &matched {
			if detail.amount < reward.amount {
				return Err(PermitError::InsufficientAuthorization {
					token: reward.token,
					reason: format!(
						"permit2 amount {} below reward {}",
						detail.amount, reward.amount
					),
				});
			}

			let allowance = self
				.delivery
				.contract_call(
					args.chain_id,
					payload.permit_contract,
					&IPermit2::allowanceCall {
						owner: args.owner,
						token: detail.token,
						spender,
					},
				)
				.await?;
			let on_chain = allowance.nonce.to::<u64>();
			if on_chain != detail.nonce {
				return Err(PermitError::NonceMismatch {
					token: detail.token,
					on_chain,
					signed: detail.nonce,
				});
			}
		}

		let token = matched.first().map(|(r, _)| r.token).unwrap_or_default();
		self.simulate(args.chain_id, payload.permit_contract, token, simulation)
			.await
	}

	/// Runs a permit call through `eth_call`. A revert means the permit
	/// would not be accepted on chain even though its signature verified.
	async fn simulate(
		&self,
		chain_id: u64,
		to: Address,
		token: Address,
		calldata: Vec<u8>,
	) -> Result<(), PermitError> {
		match self.delivery.call(chain_id, to, calldata.into()).await {
			Ok(_) => Ok(()),
			Err(DeliveryError::Reverted(reason)) => {
				tracing::debug!(chain_id, %token, %reason, "Permit simulation reverted");
				Err(PermitError::SimulationFailed { token, reason })
			},
			Err(e) => Err(e.into()),
		}
	}
}

/// Reward amounts summed per token, in first-seen order.
fn required_per_token(reward: &[TokenAmount]) -> Vec<TokenAmount> {
	let mut totals: Vec<TokenAmount> = Vec::with_capacity(reward.len());
	for entry in reward {
		match totals.iter_mut().find(|t| t.token == entry.token) {
			Some(total) => total.amount = total.amount.saturating_add(entry.amount),
			None => totals.push(TokenAmount::new(entry.token, entry.amount)),
		}
	}
	totals
}

/// Converts details to their typed-data form. Values that do not fit the
/// signed field widths cannot carry a valid signature.
fn typed_details(
	details: &PermitDetails,
	owner: Address,
) -> Result<IPermit2::PermitDetails, PermitError> {
	const U48_LIMIT: u64 = 1 << 48;
	if details.amount.bit_len() > 160
		|| details.expiration >= U48_LIMIT
		|| details.nonce >= U48_LIMIT
	{
		return Err(PermitError::SignatureMismatch { owner });
	}
	Ok(IPermit2::PermitDetails {
		token: details.token,
		amount: details.amount.to::<U160>(),
		expiration: U48::from(details.expiration),
		nonce: U48::from(details.nonce),
	})
}

fn verify_signer(hash: &B256, signature: &Bytes, owner: Address) -> Result<Signature, PermitError> {
	let signature = Signature::try_from(signature.as_ref())
		.map_err(|_| PermitError::SignatureMismatch { owner })?;
	let recovered = signature
		.recover_address_from_prehash(hash)
		.map_err(|_| PermitError::SignatureMismatch { owner })?;
	if recovered != owner {
		return Err(PermitError::SignatureMismatch { owner });
	}
	Ok(signature)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::domain::TokenDomainResolver;
	use alloy::primitives::address;
	use alloy::signers::local::PrivateKeySigner;
	use alloy::signers::SignerSync;
	use solver_delivery::testing::MockChain;
	use solver_delivery::DeliveryInterface;
	use solver_storage::implementations::memory::MemoryStorage;
	use solver_storage::StorageService;
	use solver_types::ManualClock;
	use std::collections::HashMap;
	use std::sync::Mutex;
	use std::time::Duration;

	const CHAIN: u64 = 10;
	const TOKEN: Address = address!("0x0b2C639c533813f4Aa9D7837CAf62653d097Ff85");
	const OTHER_TOKEN: Address = address!("0x94b008aA00579c1307B0EF2c499aD98a8ce58e58");
	const VAULT: Address = address!("0x00000000000000000000000000000000000000f1");
	const NOW: u64 = 1_700_000_000;

	struct Fixture {
		chain: Arc<MockChain>,
		validator: PermitValidator,
		signer: PrivateKeySigner,
		simulated_values: Arc<Mutex<Vec<U256>>>,
	}

	fn fixture() -> Fixture {
		let signer = PrivateKeySigner::random();
		let chain = Arc::new(MockChain::new(CHAIN, Address::ZERO));
		chain.on_call::<IERC20Permit::nameCall, _>(TOKEN, |_| "USD Coin".to_string());
		chain.on_call::<IERC20Permit::versionCall, _>(TOKEN, |_| "2".to_string());
		chain.on_call::<IERC20Permit::noncesCall, _>(TOKEN, |_| U256::from(3u64));
		chain.on_call::<IPermit2::allowanceCall, _>(CANONICAL_PERMIT2, |_| {
			IPermit2::allowanceReturn {
				amount: U160::ZERO,
				expiration: U48::ZERO,
				nonce: U48::from(7u64),
			}
		});
		let simulated_values = Arc::new(Mutex::new(Vec::new()));
		let seen = simulated_values.clone();
		chain.on_call::<IERC20Permit::permitCall, _>(TOKEN, move |call| {
			seen.lock().unwrap().push(call.value);
			IERC20Permit::permitReturn {}
		});
		chain.on_call::<IPermit2::permit_0Call, _>(CANONICAL_PERMIT2, |_| IPermit2::permit_0Return {});
		chain.on_call::<IPermit2::permit_1Call, _>(CANONICAL_PERMIT2, |_| IPermit2::permit_1Return {});

		let mut implementations: HashMap<u64, Arc<dyn DeliveryInterface>> = HashMap::new();
		implementations.insert(CHAIN, chain.clone());
		let delivery = Arc::new(DeliveryService::new(implementations));
		let domains = Arc::new(TokenDomainResolver::new(
			delivery.clone(),
			Arc::new(StorageService::new(Box::new(MemoryStorage::new()))),
			Duration::from_secs(60),
		));
		let validator = PermitValidator::new(
			delivery,
			domains,
			Arc::new(ManualClock::new(NOW)),
			Vec::new(),
		);

		Fixture {
			chain,
			validator,
			signer,
			simulated_values,
		}
	}

	fn reward(amount: u64) -> Vec<TokenAmount> {
		vec![TokenAmount::new(TOKEN, U256::from(amount))]
	}

	fn sign_permit(signer: &PrivateKeySigner, value: u64, deadline: u64) -> Bytes {
		let domain = Eip712Domain::new(
			Some("USD Coin".into()),
			Some("2".into()),
			Some(U256::from(CHAIN)),
			Some(TOKEN),
			None,
		);
		let permit = eip712::Permit {
			owner: signer.address(),
			spender: VAULT,
			value: U256::from(value),
			nonce: U256::from(3u64),
			deadline: U256::from(deadline),
		};
		let signature = signer
			.sign_hash_sync(&permit.eip712_signing_hash(&domain))
			.unwrap();
		Bytes::from(signature.as_bytes().to_vec())
	}

	fn permit2_domain() -> Eip712Domain {
		Eip712Domain::new(
			Some("Permit2".into()),
			None,
			Some(U256::from(CHAIN)),
			Some(CANONICAL_PERMIT2),
			None,
		)
	}

	fn detail(token: Address, amount: u64) -> PermitDetails {
		PermitDetails {
			token,
			amount: U256::from(amount),
			expiration: NOW + 3600,
			nonce: 7,
		}
	}

	fn permit2_batch(signer: &PrivateKeySigner, details: Vec<PermitDetails>) -> Permit2Payload {
		let typed = IPermit2::PermitBatch {
			details: details
				.iter()
				.map(|d| typed_details(d, signer.address()).unwrap())
				.collect(),
			spender: VAULT,
			sigDeadline: U256::from(NOW + 600),
		};
		let signature = signer
			.sign_hash_sync(&typed.eip712_signing_hash(&permit2_domain()))
			.unwrap();
		Permit2Payload {
			permit_contract: CANONICAL_PERMIT2,
			data: Permit2Data::Batch {
				details,
				spender: VAULT,
				sig_deadline: NOW + 600,
			},
			signature: Bytes::from(signature.as_bytes().to_vec()),
		}
	}

	fn permit2_single(signer: &PrivateKeySigner, amount: u64, nonce: u64, spender: Address) -> Permit2Payload {
		let details = PermitDetails {
			token: TOKEN,
			amount: U256::from(amount),
			expiration: NOW + 3600,
			nonce,
		};
		let typed = IPermit2::PermitSingle {
			details: typed_details(&details, signer.address()).unwrap(),
			spender,
			sigDeadline: U256::from(NOW + 600),
		};
		let signature = signer
			.sign_hash_sync(&typed.eip712_signing_hash(&permit2_domain()))
			.unwrap();
		Permit2Payload {
			permit_contract: CANONICAL_PERMIT2,
			data: Permit2Data::Single {
				details,
				spender,
				sig_deadline: NOW + 600,
			},
			signature: Bytes::from(signature.as_bytes().to_vec()),
		}
	}

	fn args<'a>(
		owner: Address,
		reward: &'a [TokenAmount],
		permits: Option<&'a [PermitEntry]>,
		permit2: Option<&'a Permit2Payload>,
	) -> PermitValidationArgs<'a> {
		PermitValidationArgs {
			chain_id: CHAIN,
			owner,
			spender: VAULT,
			reward,
			permits,
			permit2,
		}
	}

	#[tokio::test]
	async fn test_valid_permit_succeeds() {
		let f = fixture();
		let reward = reward(1003);
		let permits = vec![PermitEntry {
			token: TOKEN,
			amount: None,
			deadline: NOW + 600,
			signature: sign_permit(&f.signer, 1003, NOW + 600),
		}];

		f.validator
			.validate(args(f.signer.address(), &reward, Some(&permits), None))
			.await
			.unwrap();
		assert_eq!(*f.simulated_values.lock().unwrap(), vec![U256::from(1003u64)]);
	}

	#[tokio::test]
	async fn test_reverting_permit_simulation_fails() {
		let f = fixture();
		f.chain.fail_call::<IERC20Permit::permitCall, _>(TOKEN, || {
			DeliveryError::Reverted("ERC20Permit: invalid signature".to_string())
		});
		let reward = reward(1003);
		let permits = vec![PermitEntry {
			token: TOKEN,
			amount: None,
			deadline: NOW + 600,
			signature: sign_permit(&f.signer, 1003, NOW + 600),
		}];

		let result = f
			.validator
			.validate(args(f.signer.address(), &reward, Some(&permits), None))
			.await;
		assert!(matches!(
			result,
			Err(PermitError::SimulationFailed { token, .. }) if token == TOKEN
		));
	}

	#[tokio::test]
	async fn test_repeated_reward_token_needs_the_summed_permit_value() {
		let f = fixture();
		let reward = vec![
			TokenAmount::new(TOKEN, U256::from(600u64)),
			TokenAmount::new(TOKEN, U256::from(600u64)),
		];
		let permits = vec![PermitEntry {
			token: TOKEN,
			amount: Some(U256::from(1003u64)),
			deadline: NOW + 600,
			signature: sign_permit(&f.signer, 1003, NOW + 600),
		}];

		let result = f
			.validator
			.validate(args(f.signer.address(), &reward, Some(&permits), None))
			.await;
		assert!(matches!(result, Err(PermitError::InsufficientAuthorization { .. })));
	}

	#[tokio::test]
	async fn test_mutated_signature_fails() {
		let f = fixture();
		let reward = reward(1003);
		let mut signature = sign_permit(&f.signer, 1003, NOW + 600).to_vec();
		signature[5] ^= 0xff;
		let permits = vec![PermitEntry {
			token: TOKEN,
			amount: None,
			deadline: NOW + 600,
			signature: Bytes::from(signature),
		}];

		let result = f
			.validator
			.validate(args(f.signer.address(), &reward, Some(&permits), None))
			.await;
		assert!(matches!(result, Err(PermitError::SignatureMismatch { .. })));
	}

	#[tokio::test]
	async fn test_expired_permit_fails_regardless_of_signature() {
		let f = fixture();
		let reward = reward(1003);
		let deadline = NOW - 1;

		let valid = vec![PermitEntry {
			token: TOKEN,
			amount: None,
			deadline,
			signature: sign_permit(&f.signer, 1003, deadline),
		}];
		let garbage = vec![PermitEntry {
			token: TOKEN,
			amount: None,
			deadline,
			signature: Bytes::from(vec![0u8; 3]),
		}];

		for permits in [valid, garbage] {
			let result = f
				.validator
				.validate(args(f.signer.address(), &reward, Some(&permits), None))
				.await;
			assert!(matches!(result, Err(PermitError::PermitExpired { .. })));
		}
	}

	#[tokio::test]
	async fn test_both_or_neither_authorization_is_ambiguous() {
		let f = fixture();
		let reward = reward(1003);
		let permits: Vec<PermitEntry> = Vec::new();
		let permit2 = permit2_single(&f.signer, 1003, 7, VAULT);

		let both = f
			.validator
			.validate(args(f.signer.address(), &reward, Some(&permits), Some(&permit2)))
			.await;
		let neither = f
			.validator
			.validate(args(f.signer.address(), &reward, None, None))
			.await;

		assert!(matches!(both, Err(PermitError::AmbiguousAuthorization)));
		assert!(matches!(neither, Err(PermitError::AmbiguousAuthorization)));
	}

	#[tokio::test]
	async fn test_missing_permit_for_reward_token() {
		let f = fixture();
		let reward = vec![
			TokenAmount::new(TOKEN, U256::from(500u64)),
			TokenAmount::new(OTHER_TOKEN, U256::from(503u64)),
		];
		let permits = vec![PermitEntry {
			token: TOKEN,
			amount: None,
			deadline: NOW + 600,
			signature: sign_permit(&f.signer, 500, NOW + 600),
		}];

		let result = f
			.validator
			.validate(args(f.signer.address(), &reward, Some(&permits), None))
			.await;
		assert!(matches!(
			result,
			Err(PermitError::InsufficientAuthorization { token, .. }) if token == OTHER_TOKEN
		));
	}

	#[tokio::test]
	async fn test_valid_permit2_single() {
		let f = fixture();
		let reward = reward(1003);
		let permit2 = permit2_single(&f.signer, 1003, 7, VAULT);

		f.validator
			.validate(args(f.signer.address(), &reward, None, Some(&permit2)))
			.await
			.unwrap();
	}

	#[tokio::test]
	async fn test_permit2_partial_coverage() {
		let f = fixture();
		let reward = reward(1003);
		let permit2 = permit2_single(&f.signer, 1000, 7, VAULT);

		let result = f
			.validator
			.validate(args(f.signer.address(), &reward, None, Some(&permit2)))
			.await;
		assert!(matches!(result, Err(PermitError::InsufficientAuthorization { .. })));
	}

	#[tokio::test]
	async fn test_permit2_covers_repeated_reward_token_in_total() {
		let f = fixture();
		let reward = vec![
			TokenAmount::new(TOKEN, U256::from(600u64)),
			TokenAmount::new(TOKEN, U256::from(600u64)),
		];

		let short = permit2_single(&f.signer, 1003, 7, VAULT);
		let result = f
			.validator
			.validate(args(f.signer.address(), &reward, None, Some(&short)))
			.await;
		assert!(matches!(result, Err(PermitError::InsufficientAuthorization { .. })));

		let covering = permit2_single(&f.signer, 1200, 7, VAULT);
		f.validator
			.validate(args(f.signer.address(), &reward, None, Some(&covering)))
			.await
			.unwrap();
	}

	#[tokio::test]
	async fn test_valid_permit2_batch() {
		let f = fixture();
		let reward = vec![
			TokenAmount::new(TOKEN, U256::from(1003u64)),
			TokenAmount::new(OTHER_TOKEN, U256::from(500u64)),
		];
		let permit2 = permit2_batch(&f.signer, vec![detail(TOKEN, 1003), detail(OTHER_TOKEN, 500)]);

		f.validator
			.validate(args(f.signer.address(), &reward, None, Some(&permit2)))
			.await
			.unwrap();
	}

	#[tokio::test]
	async fn test_permit2_batch_with_short_detail() {
		let f = fixture();
		let reward = vec![
			TokenAmount::new(TOKEN, U256::from(1003u64)),
			TokenAmount::new(OTHER_TOKEN, U256::from(500u64)),
		];
		let permit2 = permit2_batch(&f.signer, vec![detail(TOKEN, 1003), detail(OTHER_TOKEN, 499)]);

		let result = f
			.validator
			.validate(args(f.signer.address(), &reward, None, Some(&permit2)))
			.await;
		assert!(matches!(
			result,
			Err(PermitError::InsufficientAuthorization { token, .. }) if token == OTHER_TOKEN
		));
	}

	#[tokio::test]
	async fn test_permit2_unknown_contract() {
		let f = fixture();
		let reward = reward(1003);
		let mut permit2 = permit2_single(&f.signer, 1003, 7, VAULT);
		permit2.permit_contract = address!("0x00000000000000000000000000000000000000bd");

		let result = f
			.validator
			.validate(args(f.signer.address(), &reward, None, Some(&permit2)))
			.await;
		assert!(matches!(result, Err(PermitError::UnknownPermitContract(_))));
	}

	#[tokio::test]
	async fn test_permit2_spender_and_nonce_checks() {
		let f = fixture();
		let reward = reward(1003);

		let wrong_spender = permit2_single(&f.signer, 1003, 7, address!("0x00000000000000000000000000000000000000ee"));
		let result = f
			.validator
			.validate(args(f.signer.address(), &reward, None, Some(&wrong_spender)))
			.await;
		assert!(matches!(result, Err(PermitError::SpenderMismatch { .. })));

		let stale_nonce = permit2_single(&f.signer, 1003, 6, VAULT);
		let result = f
			.validator
			.validate(args(f.signer.address(), &reward, None, Some(&stale_nonce)))
			.await;
		assert!(matches!(
			result,
			Err(PermitError::NonceMismatch { on_chain: 7, signed: 6, .. })
		));
	}

	#[tokio::test]
	async fn test_chain_read_failure_surfaces() {
		let f = fixture();
		let reward = reward(1003);
		let permits = vec![PermitEntry {
			token: TOKEN,
			amount: None,
			deadline: NOW + 600,
			signature: sign_permit(&f.signer, 1003, NOW + 600),
		}];
		f.chain.fail_reads(true);

		let result = f
			.validator
			.validate(args(f.signer.address(), &reward, Some(&permits), None))
			.await;
		assert!(matches!(result, Err(PermitError::ChainRead(_))));
	}
}
