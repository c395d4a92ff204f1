//! In-memory chain for tests of crates that read from or submit to chains.

use crate::{DeliveryError, DeliveryInterface};
use alloy::primitives::keccak256;
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use solver_types::contracts::IERC20;
use solver_types::{
	Address, Bytes, ConfigSchema, Log, Schema, Transaction, TransactionHash, TransactionReceipt,
	ValidationError, B256, U256,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

type CallHandler = Box<dyn Fn(&[u8]) -> Result<Bytes, DeliveryError> + Send + Sync>;

#[derive(Default)]
struct State {
	handlers: HashMap<(Address, [u8; 4]), CallHandler>,
	token_balances: HashMap<(Address, Address), U256>,
	native_balances: HashMap<Address, U256>,
	nonces: HashMap<Address, u64>,
	submitted: Vec<Transaction>,
	receipts: HashMap<B256, TransactionReceipt>,
	logs_for: HashMap<Address, Vec<Log>>,
	reverting: HashSet<Address>,
	withheld: bool,
	fail_submit_at: Option<usize>,
}

/// Programmable single-chain mock.
///
/// Submissions are signed by `sender`, bump its nonce and are mined
/// immediately unless receipts are withheld.
pub struct MockChain {
	chain_id: u64,
	sender: Address,
	fail_reads: AtomicBool,
	fail_submits: AtomicBool,
	state: Mutex<State>,
}

impl MockChain {
	pub fn new(chain_id: u64, sender: Address) -> Self {
		Self {
			chain_id,
			sender,
			fail_reads: AtomicBool::new(false),
			fail_submits: AtomicBool::new(false),
			state: Mutex::new(State::default()),
		}
	}

	fn state(&self) -> std::sync::MutexGuard<'_, State> {
		self.state.lock().unwrap_or_else(|e| e.into_inner())
	}

	/// Answers calls of type `C` to `to` with `handler`.
	pub fn on_call<C, F>(&self, to: Address, handler: F)
	where
		C: SolCall,
		F: Fn(C) -> C::Return + Send + Sync + 'static,
	{
		let boxed: CallHandler = Box::new(move |data| {
			let call = C::abi_decode(data).map_err(|e| DeliveryError::Decode(e.to_string()))?;
			Ok(C::abi_encode_returns(&handler(call)).into())
		});
		self.state().handlers.insert((to, C::SELECTOR), boxed);
	}

	/// Makes calls of type `C` to `to` fail with the error `error` builds.
	pub fn fail_call<C, F>(&self, to: Address, error: F)
	where
		C: SolCall,
		F: Fn() -> DeliveryError + Send + Sync + 'static,
	{
		let boxed: CallHandler = Box::new(move |_| Err(error()));
		self.state().handlers.insert((to, C::SELECTOR), boxed);
	}

	pub fn set_token_balance(&self, token: Address, owner: Address, amount: U256) {
		self.state().token_balances.insert((token, owner), amount);
	}

	pub fn set_native_balance(&self, owner: Address, amount: U256) {
		self.state().native_balances.insert(owner, amount);
	}

	pub fn set_nonce(&self, address: Address, nonce: u64) {
		self.state().nonces.insert(address, nonce);
	}

	pub fn nonce_of(&self, address: Address) -> u64 {
		self.state().nonces.get(&address).copied().unwrap_or(0)
	}

	/// Logs attached to the receipt of every transaction sent to `to`.
	pub fn emit_on_call_to(&self, to: Address, log: Log) {
		self.state().logs_for.entry(to).or_default().push(log);
	}

	/// Transactions sent to `to` are mined as reverted.
	pub fn revert_calls_to(&self, to: Address) {
		self.state().reverting.insert(to);
	}

	/// While set, submitted transactions stay unmined.
	pub fn withhold_receipts(&self, withheld: bool) {
		self.state().withheld = withheld;
	}

	pub fn fail_reads(&self, fail: bool) {
		self.fail_reads.store(fail, Ordering::SeqCst);
	}

	pub fn fail_submits(&self, fail: bool) {
		self.fail_submits.store(fail, Ordering::SeqCst);
	}

	/// The submission after `accepted` more have gone through fails once.
	pub fn fail_submit_after(&self, accepted: usize) {
		let mut state = self.state();
		state.fail_submit_at = Some(state.submitted.len() + accepted);
	}

	pub fn chain_id(&self) -> u64 {
		self.chain_id
	}

	pub fn submitted(&self) -> Vec<Transaction> {
		self.state().submitted.clone()
	}

	fn check_reads(&self) -> Result<(), DeliveryError> {
		if self.fail_reads.load(Ordering::SeqCst) {
			Err(DeliveryError::Network("connection refused".to_string()))
		} else {
			Ok(())
		}
	}
}

pub struct MockChainSchema;

impl ConfigSchema for MockChainSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		Schema::new(vec![], vec![]).validate(config)
	}
}

#[async_trait]
impl DeliveryInterface for MockChain {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(MockChainSchema)
	}

	async fn submit(&self, tx: Transaction) -> Result<TransactionHash, DeliveryError> {
		if self.fail_submits.load(Ordering::SeqCst) {
			return Err(DeliveryError::Network("connection reset".to_string()));
		}
		let mut state = self.state();
		if state.fail_submit_at == Some(state.submitted.len()) {
			state.fail_submit_at = None;
			return Err(DeliveryError::Network("connection reset".to_string()));
		}
		let nonce = state.nonces.entry(self.sender).or_insert(0);
		let used = tx.nonce.unwrap_or(*nonce);
		*nonce = used + 1;

		let mut preimage = self.chain_id.to_be_bytes().to_vec();
		preimage.extend_from_slice(&used.to_be_bytes());
		preimage.extend_from_slice(&(state.submitted.len() as u64).to_be_bytes());
		let hash = keccak256(&preimage);

		let receipt = TransactionReceipt {
			hash: TransactionHash(hash),
			block_number: state.submitted.len() as u64 + 1,
			success: !state.reverting.contains(&tx.to),
			logs: state.logs_for.get(&tx.to).cloned().unwrap_or_default(),
		};
		if !state.withheld {
			state.receipts.insert(hash, receipt);
		}
		state.submitted.push(tx);

		Ok(TransactionHash(hash))
	}

	async fn wait_for_confirmation(
		&self,
		hash: &TransactionHash,
	) -> Result<TransactionReceipt, DeliveryError> {
		self.get_receipt(hash)
			.await?
			.ok_or_else(|| DeliveryError::Timeout(format!("{} not mined", hash)))
	}

	async fn get_receipt(
		&self,
		hash: &TransactionHash,
	) -> Result<Option<TransactionReceipt>, DeliveryError> {
		self.check_reads()?;
		Ok(self.state().receipts.get(&hash.0).cloned())
	}

	async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, DeliveryError> {
		self.check_reads()?;
		if data.len() < 4 {
			return Err(DeliveryError::Decode("calldata too short".to_string()));
		}
		let mut selector = [0u8; 4];
		selector.copy_from_slice(&data[..4]);

		let state = self.state();
		if let Some(handler) = state.handlers.get(&(to, selector)) {
			return handler(&data);
		}
		if selector == IERC20::balanceOfCall::SELECTOR {
			let call = IERC20::balanceOfCall::abi_decode(&data)
				.map_err(|e| DeliveryError::Decode(e.to_string()))?;
			let balance = state
				.token_balances
				.get(&(to, call.owner))
				.copied()
				.unwrap_or_default();
			return Ok(IERC20::balanceOfCall::abi_encode_returns(&balance).into());
		}
		Err(DeliveryError::Reverted(format!(
			"no handler for 0x{} on {}",
			alloy::primitives::hex::encode(selector),
			to
		)))
	}

	async fn get_native_balance(&self, owner: Address) -> Result<U256, DeliveryError> {
		self.check_reads()?;
		Ok(self
			.state()
			.native_balances
			.get(&owner)
			.copied()
			.unwrap_or_default())
	}

	async fn get_nonce(&self, address: Address) -> Result<u64, DeliveryError> {
		self.check_reads()?;
		Ok(self.nonce_of(address))
	}
}
