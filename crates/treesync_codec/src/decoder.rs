//! CBOR decoding for durable records.

use serde::de::DeserializeOwned;

use crate::error::{CodecError, CodecResult};

/// Decode a record from CBOR bytes.
///
/// # Errors
///
/// Returns [`CodecError::DecodingFailed`] if the bytes are not valid CBOR or
/// do not match the expected shape.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<T> {
    ciborium::de::from_reader(bytes).map_err(|e| CodecError::decoding_failed(e.to_string()))
}

/// Types that know how to decode themselves from durable storage.
pub trait Decode: Sized {
    /// Decode from CBOR bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::DecodingFailed`] if the bytes are malformed.
    fn decode(bytes: &[u8]) -> CodecResult<Self>;
}

impl<T: DeserializeOwned> Decode for T {
    fn decode(bytes: &[u8]) -> CodecResult<Self> {
        from_cbor(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::to_cbor;
    use crate::value::Value;

    #[test]
    fn roundtrips_nested_maps() {
        let v = Value::map_from([
            ("leaf", Value::Float(1.25)),
            ("nested", Value::map_from([("k", Value::Null)])),
        ]);
        let bytes = to_cbor(&v).unwrap();
        let back: Value = from_cbor(&bytes).unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn rejects_garbage() {
        let result: CodecResult<Value> = from_cbor(&[0xff, 0x00, 0x13]);
        assert!(result.is_err());
    }
}
