//! Fixtures shared by provider and orchestrator tests.

use alloy::primitives::address;
use solver_config::{Config, ConfigLoader};
use solver_types::{Address, TokenData};

pub const ARBITRUM: u64 = 42161;
pub const OPTIMISM: u64 = 10;

pub const USDC_ARB: Address = address!("0xaf88d065e77c8cC2239327C5EDb3A432268e5831");
pub const USDC_OP: Address = address!("0x0b2C639c533813f4Aa9D7837CAf62653d097Ff85");
pub const USDT_OP: Address = address!("0x94b008aA00579c1307B0EF2c499aD98a8ce58e58");

pub const MESSENGER_ARB: Address = address!("0x19330d10D9Cc8751218eaf51E8885D058642E08A");
pub const TRANSMITTER_ARB: Address = address!("0xC30362313FBBA5cf9163F0bb16a0e01f01A896ca");
pub const MESSENGER_OP: Address = address!("0x2B4069517957735bE00ceE0fadAE88a26365528f");
pub const TRANSMITTER_OP: Address = address!("0x4D41f22c5a0e5c74090899E5a8Fb597a8842b3e8");

pub fn config(attestation_url: &str, swap_url: Option<&str>) -> Config {
	let swap = swap_url
		.map(|url| {
			format!(
				"[swap]\napi_url = \"{}\"\nslippage = \"0.005\"\nrequest_timeout_secs = 2\n",
				url
			)
		})
		.unwrap_or_default();

	let content = format!(
		r#"
[solver]
id = "liquidity-test"

[chains.42161]
name = "arbitrum"
rpc_url = "http://localhost:8545"
portal = "0x0000000000000000000000000000000000000a0a"

[chains.42161.tokens.USDC]
address = "{usdc_arb}"
decimals = 6

[chains.10]
name = "optimism"
rpc_url = "http://localhost:8546"
portal = "0x0000000000000000000000000000000000000b0b"

[chains.10.tokens.USDC]
address = "{usdc_op}"
decimals = 6

[chains.10.tokens.USDT]
address = "{usdt_op}"
decimals = 6

[rebalance]
enabled = true
max_slippage = "0.02"
max_poll_attempts = 3
poll_base_delay_secs = 10
poll_max_delay_secs = 60

[[rebalance.tokens]]
chain_id = 42161
symbol = "USDC"
min_balance = 1000000000
target_balance = 2000000000
max_balance = 3000000000

[[rebalance.tokens]]
chain_id = 10
symbol = "USDC"
min_balance = 1000000000
target_balance = 2000000000
max_balance = 3000000000

[cctp]
attestation_api_url = "{attestation_url}"
request_timeout_secs = 2

[cctp.chains.42161]
domain = 3
token_messenger = "{messenger_arb}"
message_transmitter = "{transmitter_arb}"

[cctp.chains.10]
domain = 2
token_messenger = "{messenger_op}"
message_transmitter = "{transmitter_op}"

{swap}
"#,
		usdc_arb = USDC_ARB,
		usdc_op = USDC_OP,
		usdt_op = USDT_OP,
		attestation_url = attestation_url,
		messenger_arb = MESSENGER_ARB,
		transmitter_arb = TRANSMITTER_ARB,
		messenger_op = MESSENGER_OP,
		transmitter_op = TRANSMITTER_OP,
		swap = swap,
	);

	ConfigLoader::new()
		.with_env_prefix("SOLVER_LIQUIDITY_TEST_")
		.load_from_str(&content)
		.unwrap()
}

pub fn token(chain_id: u64, address: Address, symbol: &str) -> TokenData {
	TokenData {
		chain_id,
		address,
		decimals: 6,
		symbol: symbol.to_string(),
	}
}

pub fn usdc_arb() -> TokenData {
	token(ARBITRUM, USDC_ARB, "USDC")
}

pub fn usdc_op() -> TokenData {
	token(OPTIMISM, USDC_OP, "USDC")
}

pub fn usdt_op() -> TokenData {
	token(OPTIMISM, USDT_OP, "USDT")
}
