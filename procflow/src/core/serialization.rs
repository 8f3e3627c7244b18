use super::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Compute a stable hash of serialized bytes.
///
/// SeaHash is stable across compiler versions, processes and machines, which
/// is what replay needs: an activity input recorded last week must hash to
/// the same value when the instance is recovered today. Not cryptographic.
pub fn hash_params(bytes: &[u8]) -> u64 {
    seahash::hash(bytes)
}

/// Serializes a value and returns the SeaHash fingerprint of its JSON form.
///
/// # Errors
/// Returns `Error::Serialization` if the value cannot be serialized.
pub fn fingerprint<T: Serialize>(value: &T) -> Result<u64> {
    Ok(hash_params(&serialize_value(value)?))
}

/// Serializes a value to bytes using JSON.
///
/// # Errors
/// Returns `Error::Serialization` if the value cannot be serialized.
pub fn serialize_value<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(Error::Serialization)
}

/// Deserializes bytes to a value using JSON.
///
/// # Errors
/// Returns `Error::Deserialization` if the bytes cannot be deserialized.
pub fn deserialize_value<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(Error::Deserialization)
}

/// Converts a value into a structured JSON document.
pub fn to_json<T: Serialize>(value: &T) -> Result<serde_json::Value> {
    serde_json::to_value(value).map_err(Error::Serialization)
}

/// Converts a structured JSON document back into a typed value.
pub fn from_json<T: DeserializeOwned>(value: serde_json::Value) -> Result<T> {
    serde_json::from_value(value).map_err(Error::Deserialization)
}
