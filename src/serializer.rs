//! Result-set codecs.
//!
//! A [`Serializer`] turns whatever the host stores in a statement's
//! destination into an opaque payload and back. JSON is the default; a compact
//! binary codec is available behind the `bincode` feature.

use crate::error::ErrorContext;
use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

pub trait Serializer: Send + Sync + 'static {
    fn marshal<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>>;
    fn unmarshal<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T>;

    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn marshal<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| codec_error(e, "json", "encode"))
    }

    fn unmarshal<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        serde_json::from_slice(bytes).map_err(|e| codec_error(e, "json", "decode"))
    }

    fn name(&self) -> &'static str {
        "json"
    }
}

#[cfg(feature = "bincode")]
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeSerializer;

#[cfg(feature = "bincode")]
impl Serializer for BincodeSerializer {
    fn marshal<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        bincode::serialize(value).map_err(|e| codec_error(e, "bincode", "encode"))
    }

    fn unmarshal<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        bincode::deserialize(bytes).map_err(|e| codec_error(e, "bincode", "decode"))
    }

    fn name(&self) -> &'static str {
        "bincode"
    }
}

fn codec_error(err: impl std::fmt::Display, codec: &str, op: &str) -> Error {
    Error::serialization_with_context(
        err.to_string(),
        ErrorContext::new()
            .with_source(codec.to_string())
            .with_details(op.to_string()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct User {
        id: u64,
        name: String,
    }

    #[test]
    fn test_json_round_trip() {
        let rows = vec![
            User { id: 1, name: "ada".into() },
            User { id: 2, name: "linus".into() },
        ];
        let s = JsonSerializer;
        let bytes = s.marshal(&rows).unwrap();
        let back: Vec<User> = s.unmarshal(&bytes).unwrap();
        assert_eq!(back, rows);
    }

    #[test]
    fn test_json_decode_failure_is_serialization_error() {
        let err = JsonSerializer.unmarshal::<Vec<User>>(b"not json").unwrap_err();
        assert!(matches!(err, Error::Serialization { .. }));
        assert_eq!(
            err.context().and_then(|c| c.details.as_deref()),
            Some("decode")
        );
    }

    #[cfg(feature = "bincode")]
    #[test]
    fn test_bincode_round_trip() {
        let row = Some(User { id: 7, name: "grace".into() });
        let s = BincodeSerializer;
        let back: Option<User> = s.unmarshal(&s.marshal(&row).unwrap()).unwrap();
        assert_eq!(back, row);
    }
}
