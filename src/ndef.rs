//! NDEF message codec.
//!
//! An NDEF message is an ordered sequence of records; wire order is
//! significant and preserved. Each record carries a type, an optional
//! identifier, a payload, and a 3-bit Type Name Format.

use bytes::{BufMut, Bytes, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

use crate::data::hex_str;
use crate::error::NfcError;

// record header flag bits
const FLAG_MB: u8 = 0x80; // message begin
const FLAG_ME: u8 = 0x40; // message end
const FLAG_CF: u8 = 0x20; // chunk flag
const FLAG_SR: u8 = 0x10; // short record
const FLAG_IL: u8 = 0x08; // id length present
const TNF_MASK: u8 = 0x07;

/// Type Name Format of an NDEF record.
///
/// `Unknown` is accepted on encode but never produced by decoding a
/// standards-conformant tag.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive, Serialize, Deserialize,
)]
#[repr(u8)]
pub enum Tnf {
    #[serde(rename = "empty")]
    Empty = 0x00,
    #[serde(rename = "nfcWellKnown")]
    WellKnown = 0x01,
    #[serde(rename = "media")]
    Media = 0x02,
    #[serde(rename = "absoluteURI")]
    AbsoluteUri = 0x03,
    #[serde(rename = "nfcExternal")]
    External = 0x04,
    #[serde(rename = "unknown")]
    Unknown = 0x05,
    #[serde(rename = "unchanged")]
    Unchanged = 0x06,
}

/// One NDEF record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NdefRecord {
    #[serde(with = "hex_str")]
    pub identifier: Vec<u8>,
    #[serde(with = "hex_str")]
    pub payload: Vec<u8>,
    #[serde(rename = "type", with = "hex_str")]
    pub record_type: Vec<u8>,
    pub type_name_format: Tnf,
}

impl NdefRecord {
    pub fn new(
        type_name_format: Tnf,
        record_type: Vec<u8>,
        identifier: Vec<u8>,
        payload: Vec<u8>,
    ) -> Self {
        NdefRecord {
            identifier,
            payload,
            record_type,
            type_name_format,
        }
    }
}

/// Decode a raw NDEF message into its records.
///
/// A tag with no message present decodes to an empty sequence, not an
/// error. Chunked records and the reserved TNF value are rejected with
/// `FormatError`.
pub fn decode(raw: Bytes) -> Result<Vec<NdefRecord>, NfcError> {
    let mut buf = raw;
    let mut records = Vec::new();

    while !buf.is_empty() {
        let header = take(&mut buf, 1)?[0];
        if header & FLAG_CF != 0 {
            return Err(NfcError::FormatError(
                "chunked records are not supported".to_string(),
            ));
        }
        let tnf = Tnf::try_from(header & TNF_MASK).map_err(|_| {
            NfcError::FormatError(format!("reserved TNF value {}", header & TNF_MASK))
        })?;

        let type_len = take(&mut buf, 1)?[0] as usize;
        let payload_len = if header & FLAG_SR != 0 {
            take(&mut buf, 1)?[0] as usize
        } else {
            let mut len_bytes = [0u8; 4];
            len_bytes.copy_from_slice(&take(&mut buf, 4)?);
            u32::from_be_bytes(len_bytes) as usize
        };
        let id_len = if header & FLAG_IL != 0 {
            take(&mut buf, 1)?[0] as usize
        } else {
            0
        };

        let record_type = take(&mut buf, type_len)?.to_vec();
        let identifier = take(&mut buf, id_len)?.to_vec();
        let payload = take(&mut buf, payload_len)?.to_vec();

        records.push(NdefRecord {
            identifier,
            payload,
            record_type,
            type_name_format: tnf,
        });

        if header & FLAG_ME != 0 {
            break;
        }
    }

    Ok(records)
}

fn take(buf: &mut Bytes, len: usize) -> Result<Bytes, NfcError> {
    if buf.len() < len {
        return Err(NfcError::FormatError(format!(
            "truncated record: wanted {len} more bytes, have {}",
            buf.len()
        )));
    }
    Ok(buf.split_to(len))
}

/// Serialize records into a raw NDEF message, in the given order.
///
/// Fails with `FormatError` when a field does not fit its wire length
/// prefix: type and identifier are limited to 255 bytes, the payload to
/// `u32::MAX`.
pub fn encode(records: &[NdefRecord]) -> Result<Bytes, NfcError> {
    let mut buf = BytesMut::new();
    let last = records.len().saturating_sub(1);

    for (i, record) in records.iter().enumerate() {
        if record.record_type.len() > u8::MAX as usize {
            return Err(NfcError::FormatError(format!(
                "record type of {} bytes exceeds the 255-byte limit",
                record.record_type.len()
            )));
        }
        if record.identifier.len() > u8::MAX as usize {
            return Err(NfcError::FormatError(format!(
                "record identifier of {} bytes exceeds the 255-byte limit",
                record.identifier.len()
            )));
        }
        if record.payload.len() > u32::MAX as usize {
            return Err(NfcError::FormatError(format!(
                "record payload of {} bytes exceeds the 4 GiB limit",
                record.payload.len()
            )));
        }
        let short = record.payload.len() <= u8::MAX as usize;
        let mut header: u8 = record.type_name_format.into();
        if i == 0 {
            header |= FLAG_MB;
        }
        if i == last {
            header |= FLAG_ME;
        }
        if short {
            header |= FLAG_SR;
        }
        if !record.identifier.is_empty() {
            header |= FLAG_IL;
        }

        buf.put_u8(header);
        buf.put_u8(record.record_type.len() as u8);
        if short {
            buf.put_u8(record.payload.len() as u8);
        } else {
            buf.put_u32(record.payload.len() as u32);
        }
        if !record.identifier.is_empty() {
            buf.put_u8(record.identifier.len() as u8);
        }
        buf.put_slice(&record.record_type);
        buf.put_slice(&record.identifier);
        buf.put_slice(&record.payload);
    }

    Ok(buf.freeze())
}

/// Render records as the JSON array the command surface speaks.
pub fn to_json(records: &[NdefRecord]) -> Result<String, NfcError> {
    serde_json::to_string(records)
        .map_err(|err| NfcError::FormatError(format!("serializing records: {err}")))
}

/// Parse a JSON array of records.
pub fn from_json(json: &str) -> Result<Vec<NdefRecord>, NfcError> {
    serde_json::from_str(json)
        .map_err(|err| NfcError::FormatError(format!("parsing records: {err}")))
}
