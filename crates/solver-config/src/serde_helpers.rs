//! Serde helpers for configuration deserialization.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use solver_types::U256;
use std::collections::HashMap;

/// Deserializes a map keyed by chain id. TOML table keys are always strings.
pub fn deserialize_chain_id_map<'de, D, T>(deserializer: D) -> Result<HashMap<u64, T>, D::Error>
where
	D: Deserializer<'de>,
	T: Deserialize<'de>,
{
	let map = HashMap::<String, T>::deserialize(deserializer)?;

	map.into_iter()
		.map(|(k, v)| {
			k.parse::<u64>()
				.map(|id| (id, v))
				.map_err(|_| de::Error::custom(format!("Invalid chain ID: {}", k)))
		})
		.collect()
}

/// Serializes a chain id map with string keys.
pub fn serialize_chain_id_map<S, T>(map: &HashMap<u64, T>, serializer: S) -> Result<S::Ok, S::Error>
where
	S: Serializer,
	T: Serialize,
{
	let string_map: HashMap<String, &T> = map.iter().map(|(k, v)| (k.to_string(), v)).collect();

	string_map.serialize(serializer)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawAmount {
	Int(u64),
	Str(String),
}

/// Deserializes an amount given either as a TOML integer or as a decimal /
/// `0x` hex string (for values beyond `i64`).
pub fn deserialize_u256<'de, D>(deserializer: D) -> Result<U256, D::Error>
where
	D: Deserializer<'de>,
{
	match RawAmount::deserialize(deserializer)? {
		RawAmount::Int(value) => Ok(U256::from(value)),
		RawAmount::Str(raw) => raw
			.parse::<U256>()
			.map_err(|e| de::Error::custom(format!("Invalid amount '{}': {}", raw, e))),
	}
}

pub fn serialize_u256<S>(value: &U256, serializer: S) -> Result<S::Ok, S::Error>
where
	S: Serializer,
{
	serializer.serialize_str(&value.to_string())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[derive(Debug, Deserialize, Serialize)]
	struct TestStruct {
		#[serde(
			deserialize_with = "deserialize_chain_id_map",
			serialize_with = "serialize_chain_id_map"
		)]
		endpoints: HashMap<u64, String>,
		#[serde(deserialize_with = "deserialize_u256", serialize_with = "serialize_u256")]
		amount: U256,
	}

	#[test]
	fn test_deserialize_chain_id_map() {
		let toml = r#"
            amount = 5
            [endpoints]
            1 = "endpoint1"
            42161 = "endpoint2"
        "#;

		let result: TestStruct = toml::from_str(toml).unwrap();
		assert_eq!(result.endpoints.get(&1).unwrap(), "endpoint1");
		assert_eq!(result.endpoints.get(&42161).unwrap(), "endpoint2");
		assert_eq!(result.amount, U256::from(5u64));
	}

	#[test]
	fn test_invalid_chain_id_key() {
		let toml = r#"
            amount = 1
            [endpoints]
            mainnet = "endpoint1"
        "#;
		assert!(toml::from_str::<TestStruct>(toml).is_err());
	}

	#[test]
	fn test_large_amount_from_string_round_trips() {
		let toml = r#"
            amount = "1000000000000000000000000"
            [endpoints]
        "#;
		let parsed: TestStruct = toml::from_str(toml).unwrap();
		assert_eq!(
			parsed.amount,
			U256::from(10u64).pow(U256::from(24u64))
		);

		let encoded = toml::to_string(&parsed).unwrap();
		let again: TestStruct = toml::from_str(&encoded).unwrap();
		assert_eq!(again.amount, parsed.amount);
	}
}
