//! Circle attestation API client.
//!
//! `GET {base}/v1/attestations/{message_hash}`. A missing message, a
//! timeout or any `pending*` status all mean "not yet".

use crate::ProviderError;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use solver_types::{Bytes, B256};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttestationStatus {
	Pending,
	Complete(Bytes),
}

#[derive(Debug, Deserialize)]
struct AttestationResponse {
	#[serde(default)]
	status: Option<String>,
	#[serde(default)]
	attestation: Option<String>,
	#[serde(default)]
	error: Option<String>,
}

#[derive(Clone, Debug)]
pub struct AttestationClient {
	client: Client,
	base_url: String,
}

impl AttestationClient {
	pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ProviderError> {
		let client = Client::builder()
			.timeout(timeout)
			.build()
			.map_err(|e| ProviderError::Configuration(format!("HTTP client: {}", e)))?;
		Ok(Self {
			client,
			base_url: base_url.trim_end_matches('/').to_string(),
		})
	}

	pub async fn fetch(&self, message_hash: B256) -> Result<AttestationStatus, ProviderError> {
		let url = format!("{}/v1/attestations/{}", self.base_url, message_hash);

		let response = match self.client.get(&url).send().await {
			Ok(response) => response,
			Err(e) if e.is_timeout() => {
				tracing::debug!(%message_hash, "Attestation request timed out, treating as pending");
				return Ok(AttestationStatus::Pending);
			},
			Err(e) => return Err(ProviderError::Network(format!("Attestation request failed: {}", e))),
		};

		if response.status() == StatusCode::NOT_FOUND {
			return Ok(AttestationStatus::Pending);
		}
		if !response.status().is_success() {
			return Err(ProviderError::Network(format!(
				"Attestation API returned {}",
				response.status()
			)));
		}

		let body: AttestationResponse = response
			.json()
			.await
			.map_err(|e| ProviderError::Api(format!("Invalid attestation response: {}", e)))?;

		if body.error.is_some() {
			return Ok(AttestationStatus::Pending);
		}
		match body.status.as_deref() {
			Some("complete") => {
				let attestation = body
					.attestation
					.ok_or_else(|| ProviderError::Api("Complete attestation without data".to_string()))?
					.parse::<Bytes>()
					.map_err(|e| ProviderError::Api(format!("Invalid attestation bytes: {}", e)))?;
				Ok(AttestationStatus::Complete(attestation))
			},
			Some(status) if status.starts_with("pending") => Ok(AttestationStatus::Pending),
			other => Err(ProviderError::Api(format!(
				"Unexpected attestation status {:?}",
				other
			))),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use wiremock::matchers::{method, path};
	use wiremock::{Mock, MockServer, ResponseTemplate};

	fn hash() -> B256 {
		B256::repeat_byte(0xab)
	}

	async fn client_for(server: &MockServer) -> AttestationClient {
		AttestationClient::new(&server.uri(), Duration::from_secs(2)).unwrap()
	}

	#[tokio::test]
	async fn test_not_found_is_pending() {
		let server = MockServer::start().await;
		Mock::given(method("GET"))
			.and(path(format!("/v1/attestations/{}", hash())))
			.respond_with(ResponseTemplate::new(404))
			.expect(1)
			.mount(&server)
			.await;

		let status = client_for(&server).await.fetch(hash()).await.unwrap();
		assert_eq!(status, AttestationStatus::Pending);
	}

	#[tokio::test]
	async fn test_pending_confirmations_is_pending() {
		let server = MockServer::start().await;
		Mock::given(method("GET"))
			.respond_with(
				ResponseTemplate::new(200)
					.set_body_json(serde_json::json!({ "status": "pending_confirmations" })),
			)
			.mount(&server)
			.await;

		let status = client_for(&server).await.fetch(hash()).await.unwrap();
		assert_eq!(status, AttestationStatus::Pending);
	}

	#[tokio::test]
	async fn test_complete_returns_attestation() {
		let server = MockServer::start().await;
		Mock::given(method("GET"))
			.and(path(format!("/v1/attestations/{}", hash())))
			.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
				"status": "complete",
				"attestation": "0xdeadbeef"
			})))
			.mount(&server)
			.await;

		let status = client_for(&server).await.fetch(hash()).await.unwrap();
		assert_eq!(
			status,
			AttestationStatus::Complete(Bytes::from(vec![0xde, 0xad, 0xbe, 0xef]))
		);
	}

	#[tokio::test]
	async fn test_timeout_is_pending() {
		let server = MockServer::start().await;
		Mock::given(method("GET"))
			.respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
			.mount(&server)
			.await;

		let client = AttestationClient::new(&server.uri(), Duration::from_millis(100)).unwrap();
		assert_eq!(client.fetch(hash()).await.unwrap(), AttestationStatus::Pending);
	}

	#[tokio::test]
	async fn test_server_error_is_transient() {
		let server = MockServer::start().await;
		Mock::given(method("GET"))
			.respond_with(ResponseTemplate::new(503))
			.mount(&server)
			.await;

		let err = client_for(&server).await.fetch(hash()).await.unwrap_err();
		assert!(err.is_transient());
	}
}
