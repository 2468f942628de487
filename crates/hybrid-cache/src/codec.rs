//! Payload encoding shared by both tiers.
//!
//! Values cross the tiers as opaque bytes. JSON is the default; MessagePack
//! trades readability in `redis-cli` for a smaller footprint.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{CacheError, CorruptedEntry};

/// MessagePack encoding of nil
const MSGPACK_NIL: u8 = 0xc0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    #[default]
    Json,
    #[serde(rename = "msgpack", alias = "messagepack")]
    MessagePack,
}

impl Codec {
    pub fn encode<T: Serialize>(&self, key: &str, value: &T) -> Result<Vec<u8>, CacheError> {
        let encoded = match self {
            Codec::Json => serde_json::to_vec(value).map_err(|e| e.to_string()),
            Codec::MessagePack => rmp_serde::to_vec_named(value).map_err(|e| e.to_string()),
        };
        encoded.map_err(|message| CacheError::Serialization {
            key: key.to_string(),
            message,
        })
    }

    pub(crate) fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CorruptedEntry> {
        match self {
            Codec::Json => serde_json::from_slice(bytes).map_err(|e| CorruptedEntry(e.to_string())),
            Codec::MessagePack => {
                rmp_serde::from_slice(bytes).map_err(|e| CorruptedEntry(e.to_string()))
            }
        }
    }

    /// Whether `bytes` is this codec's encoding of an absent value.
    pub fn is_null(&self, bytes: &[u8]) -> bool {
        match self {
            Codec::Json => bytes == b"null",
            Codec::MessagePack => bytes == [MSGPACK_NIL],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Basket {
        user_id: String,
        items: Vec<u32>,
    }

    #[test]
    fn test_none_encodes_to_null() {
        for codec in [Codec::Json, Codec::MessagePack] {
            let bytes = codec.encode("k", &Option::<Basket>::None).unwrap();
            assert!(codec.is_null(&bytes), "{codec:?}");
        }
    }

    #[test]
    fn test_value_is_not_null() {
        let basket = Basket {
            user_id: "u1".into(),
            items: vec![1, 2],
        };
        for codec in [Codec::Json, Codec::MessagePack] {
            let bytes = codec.encode("k", &basket).unwrap();
            assert!(!codec.is_null(&bytes));
            let decoded: Basket = codec.decode(&bytes).unwrap();
            assert_eq!(decoded, basket);
        }
    }

    #[test]
    fn test_decode_garbage_is_corrupted() {
        let result: Result<Basket, _> = Codec::Json.decode(b"{not json");
        assert!(result.is_err());

        // valid JSON, wrong shape
        let result: Result<Basket, _> = Codec::Json.decode(br#"{"user":"u1"}"#);
        assert!(result.is_err());
    }
}
