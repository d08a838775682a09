use serde::{Serialize, de::DeserializeOwned};

use crate::error::{Error, Result};

/// Encode a value as a JSON payload.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(Error::from)
}

/// Decode a JSON payload.
pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    serde_json::from_slice(data).map_err(Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::{ReadingEnvelope, RegisterValue};

    #[test]
    fn test_encode_reading() {
        let envelope = ReadingEnvelope::reading("flow", RegisterValue::F64(12.25));
        let payload = encode(&envelope).unwrap();

        let decoded: serde_json::Value = decode(&payload).unwrap();
        assert_eq!(decoded["register"], "flow");
        assert_eq!(decoded["value"], 12.25);
    }

    #[test]
    fn test_encode_is_single_object() {
        let envelope = ReadingEnvelope::connect_failure("flow", "abc");
        let payload = encode(&envelope).unwrap();

        assert_eq!(payload.first(), Some(&b'{'));
        assert_eq!(payload.last(), Some(&b'}'));
    }

    #[test]
    fn test_encode_nan_reports_error() {
        let envelope = ReadingEnvelope::reading("flow", RegisterValue::F32(f32::NAN));
        assert!(matches!(encode(&envelope), Err(Error::Json(_))));
    }
}
