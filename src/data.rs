//! Hex/binary canonicalization for command data.
//!
//! Callers may hand in a command either as raw bytes or as a hex string,
//! and the response they get back mirrors the encoding of the request.

use crate::error::NfcError;

/// A request or response value that is either raw bytes or a hex string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransceiveData {
    Bytes(Vec<u8>),
    Hex(String),
}

impl TransceiveData {
    /// Canonicalize into both forms: the binary buffer and its uppercase
    /// hex rendering.
    ///
    /// Odd-length or non-hex-digit strings fail with `InvalidArgument`.
    pub fn canonicalize(&self) -> Result<(Vec<u8>, String), NfcError> {
        match self {
            TransceiveData::Bytes(bytes) => Ok((bytes.clone(), hex::encode_upper(bytes))),
            TransceiveData::Hex(s) => {
                let bytes = hex::decode(s)?;
                let canonical = hex::encode_upper(&bytes);
                Ok((bytes, canonical))
            }
        }
    }

    /// Wrap a response in the same encoding as this request.
    pub fn mirror(&self, response: Vec<u8>) -> TransceiveData {
        match self {
            TransceiveData::Bytes(_) => TransceiveData::Bytes(response),
            TransceiveData::Hex(_) => TransceiveData::Hex(hex::encode_upper(&response)),
        }
    }
}

impl From<Vec<u8>> for TransceiveData {
    fn from(bytes: Vec<u8>) -> Self {
        TransceiveData::Bytes(bytes)
    }
}

impl From<&str> for TransceiveData {
    fn from(s: &str) -> Self {
        TransceiveData::Hex(s.to_string())
    }
}

/// Serde adapter serializing binary fields as uppercase hex strings,
/// so callers round-trip whichever representation they supplied.
pub mod hex_str {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode_upper(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map_err(D::Error::custom)
    }
}

/// Same as [`hex_str`] for optional fields.
pub mod hex_opt {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => serializer.serialize_some(&hex::encode_upper(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(s) => hex::decode(&s).map(Some).map_err(D::Error::custom),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_canonicalization_is_uppercase() {
        let (bytes, canonical) = TransceiveData::from("00a4b0ff").canonicalize().unwrap();
        assert_eq!(bytes, vec![0x00, 0xA4, 0xB0, 0xFF]);
        assert_eq!(canonical, "00A4B0FF");
    }

    #[test]
    fn round_trips_well_formed_hex() {
        for s in ["", "00", "DEADBEEF", "0123456789ABCDEF"] {
            let (bytes, canonical) = TransceiveData::from(s).canonicalize().unwrap();
            assert_eq!(canonical, s.to_uppercase());
            assert_eq!(hex::encode_upper(&bytes), canonical);
        }
    }

    #[test]
    fn odd_length_hex_is_rejected() {
        let err = TransceiveData::from("ABC").canonicalize().unwrap_err();
        assert!(matches!(err, NfcError::InvalidArgument(_)));
    }

    #[test]
    fn non_hex_digit_is_rejected() {
        let err = TransceiveData::from("zz").canonicalize().unwrap_err();
        assert!(matches!(err, NfcError::InvalidArgument(_)));
    }

    #[test]
    fn response_mirrors_request_encoding() {
        let hex_req = TransceiveData::from("00A4");
        assert_eq!(
            hex_req.mirror(vec![0x90, 0x00]),
            TransceiveData::Hex("9000".to_string())
        );

        let byte_req = TransceiveData::Bytes(vec![0x00]);
        assert_eq!(
            byte_req.mirror(vec![0x90, 0x00]),
            TransceiveData::Bytes(vec![0x90, 0x00])
        );
    }
}
