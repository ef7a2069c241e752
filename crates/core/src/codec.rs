//! MessagePack helpers for collection codecs and extension rows

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// Encode `value` as MessagePack with named fields
pub fn to_msgpack<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    Ok(rmp_serde::to_vec_named(value)?)
}

/// Decode a MessagePack value
pub fn from_msgpack<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    Ok(rmp_serde::from_slice(data)?)
}
