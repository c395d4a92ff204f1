//! Swap aggregator client (LiFi quote API).

use crate::ProviderError;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use solver_config::SwapConfig;
use solver_types::{Address, Bytes, LegSide, SwapLeg, TokenData, Transaction, U256};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteResponse {
	estimate: Estimate,
	transaction_request: Option<TransactionRequest>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Estimate {
	from_amount: String,
	to_amount: String,
	to_amount_min: String,
	approval_address: Option<Address>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionRequest {
	to: Address,
	data: Bytes,
	#[serde(default)]
	value: Option<String>,
	#[serde(default)]
	gas_limit: Option<String>,
}

#[derive(Clone, Debug)]
pub struct SwapClient {
	client: Client,
	api_url: String,
	api_key: Option<String>,
	integrator: Option<String>,
	slippage: Decimal,
}

impl SwapClient {
	pub fn new(config: &SwapConfig) -> Result<Self, ProviderError> {
		let client = Client::builder()
			.timeout(Duration::from_secs(config.request_timeout_secs))
			.build()
			.map_err(|e| ProviderError::Configuration(format!("HTTP client: {}", e)))?;
		Ok(Self {
			client,
			api_url: config.api_url.trim_end_matches('/').to_string(),
			api_key: config.api_key.clone(),
			integrator: config.integrator.clone(),
			slippage: config.slippage,
		})
	}

	/// Quotes swapping `amount` of `from` into `to`, executed by `wallet`.
	pub async fn quote(
		&self,
		side: LegSide,
		from: &TokenData,
		to: &TokenData,
		amount: U256,
		wallet: Address,
	) -> Result<SwapLeg, ProviderError> {
		let mut query = vec![
			("fromChain", from.chain_id.to_string()),
			("toChain", to.chain_id.to_string()),
			("fromToken", from.address.to_string()),
			("toToken", to.address.to_string()),
			("fromAmount", amount.to_string()),
			("fromAddress", wallet.to_string()),
			("slippage", self.slippage.to_string()),
		];
		if let Some(integrator) = &self.integrator {
			query.push(("integrator", integrator.clone()));
		}

		let mut request = self
			.client
			.get(format!("{}/v1/quote", self.api_url))
			.query(&query);
		if let Some(key) = &self.api_key {
			request = request.header("x-lifi-api-key", key);
		}

		let response = request
			.send()
			.await
			.map_err(|e| ProviderError::Network(format!("Swap quote request failed: {}", e)))?;
		let status = response.status();
		if status.is_server_error() || status.as_u16() == 429 {
			return Err(ProviderError::Network(format!("Swap API returned {}", status)));
		}
		if !status.is_success() {
			let body = response.text().await.unwrap_or_default();
			return Err(ProviderError::Quote(format!(
				"No swap route from {} to {}: {} {}",
				from, to, status, body
			)));
		}

		let body: QuoteResponse = response
			.json()
			.await
			.map_err(|e| ProviderError::Api(format!("Invalid swap quote response: {}", e)))?;

		let transaction = body
			.transaction_request
			.map(|tx| -> Result<Transaction, ProviderError> {
				let value = tx.value.as_deref().map(parse_amount).transpose()?;
				let gas_limit = tx
					.gas_limit
					.as_deref()
					.map(parse_amount)
					.transpose()?
					.map(|gas| gas.saturating_to::<u64>());
				let mut transaction =
					Transaction::call(from.chain_id, tx.to, tx.data).with_value(value.unwrap_or_default());
				transaction.gas_limit = gas_limit;
				Ok(transaction)
			})
			.transpose()?;

		Ok(SwapLeg {
			side,
			from_token: from.clone(),
			to_token: to.clone(),
			from_amount: parse_amount(&body.estimate.from_amount)?,
			to_amount: parse_amount(&body.estimate.to_amount)?,
			to_amount_min: parse_amount(&body.estimate.to_amount_min)?,
			approval_address: body.estimate.approval_address,
			transaction,
		})
	}
}

/// Parses decimal or `0x` hex amounts.
fn parse_amount(raw: &str) -> Result<U256, ProviderError> {
	U256::from_str(raw).map_err(|e| ProviderError::Api(format!("Invalid amount '{}': {}", raw, e)))
}

#[cfg(test)]
mod tests {
	use super::*;
	use alloy::primitives::address;
	use wiremock::matchers::{header, method, path, query_param};
	use wiremock::{Mock, MockServer, ResponseTemplate};

	fn token(chain_id: u64, address: Address, symbol: &str, decimals: u8) -> TokenData {
		TokenData {
			chain_id,
			address,
			decimals,
			symbol: symbol.to_string(),
		}
	}

	fn config(url: String) -> SwapConfig {
		SwapConfig {
			api_url: url,
			api_key: Some("secret".to_string()),
			integrator: None,
			slippage: Decimal::new(5, 3),
			request_timeout_secs: 5,
		}
	}

	#[tokio::test]
	async fn test_quote_maps_estimate_and_transaction() {
		let server = MockServer::start().await;
		Mock::given(method("GET"))
			.and(path("/v1/quote"))
			.and(query_param("fromChain", "10"))
			.and(query_param("fromAmount", "1000000"))
			.and(header("x-lifi-api-key", "secret"))
			.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
				"estimate": {
					"fromAmount": "1000000",
					"toAmount": "999000",
					"toAmountMin": "994000",
					"approvalAddress": "0x1231deb6f5749ef6ce6943a275a1d3e7486f4eae"
				},
				"transactionRequest": {
					"to": "0x1231deb6f5749ef6ce6943a275a1d3e7486f4eae",
					"data": "0xabcdef",
					"value": "0x0",
					"gasLimit": "0x30d40"
				}
			})))
			.expect(1)
			.mount(&server)
			.await;

		let client = SwapClient::new(&config(server.uri())).unwrap();
		let usdt = token(10, address!("0x94b008aA00579c1307B0EF2c499aD98a8ce58e58"), "USDT", 6);
		let usdc = token(10, address!("0x0b2C639c533813f4Aa9D7837CAf62653d097Ff85"), "USDC", 6);

		let leg = client
			.quote(LegSide::Source, &usdt, &usdc, U256::from(1_000_000u64), Address::ZERO)
			.await
			.unwrap();

		assert_eq!(leg.to_amount_min, U256::from(994_000u64));
		assert_eq!(
			leg.approval_address,
			Some(address!("0x1231deb6f5749ef6ce6943a275a1d3e7486f4eae"))
		);
		let tx = leg.transaction.unwrap();
		assert_eq!(tx.chain_id, 10);
		assert_eq!(tx.gas_limit, Some(200_000));
		assert_eq!(tx.data, Bytes::from(vec![0xab, 0xcd, 0xef]));
	}

	#[tokio::test]
	async fn test_client_errors_are_not_transient() {
		let server = MockServer::start().await;
		Mock::given(method("GET"))
			.respond_with(ResponseTemplate::new(404).set_body_string("no route"))
			.mount(&server)
			.await;

		let client = SwapClient::new(&config(server.uri())).unwrap();
		let token = token(10, Address::ZERO, "X", 18);
		let err = client
			.quote(LegSide::Destination, &token, &token, U256::from(1u64), Address::ZERO)
			.await
			.unwrap_err();
		assert!(matches!(err, ProviderError::Quote(_)));
		assert!(!err.is_transient());
	}
}
