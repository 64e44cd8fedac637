//! Per-technology framing for raw command/response exchange.
//!
//! From the caller's point of view `transceive(bytes) -> bytes` is
//! technology-agnostic; this module adapts the logical command to the
//! framing each wire protocol demands and restores the response.

use std::time::Duration;

use tracing::trace;

use crate::error::NfcError;
use crate::reader::RawTag;
use crate::tag::TagType;

/// Exchange `data` with the tag using the framing its technology demands.
///
/// - ISO7816: `data` is a complete APDU; the status word is appended to
///   the response body, not dropped.
/// - FeliCa: the caller-visible length prefix is stripped before the
///   radio command; the radio re-derives it.
/// - ISO15693: `data` is `[flags, command, params...]`; extended
///   addressing is a caller-selectable flag, never auto-detected.
/// - MIFARE and unclassified tags: bytes pass through unmodified.
///
/// The timeout override is applied best-effort before sending; handles
/// without the capability ignore it silently.
pub fn exchange(
    tag_type: TagType,
    tag: &dyn RawTag,
    data: &[u8],
    timeout: Option<Duration>,
) -> Result<Vec<u8>, NfcError> {
    if let Some(timeout) = timeout {
        let honoured = tag.set_transceive_timeout(timeout);
        trace!(?timeout, honoured, "transceive timeout override");
    }

    match tag_type {
        TagType::Iso7816 => {
            let response = tag.send_apdu(data)?;
            let mut out = response.body;
            out.push(response.sw1);
            out.push(response.sw2);
            Ok(out)
        }
        TagType::Iso18092 => {
            let Some((_length, packet)) = data.split_first() else {
                return Err(NfcError::InvalidArgument(
                    "empty FeliCa command".to_string(),
                ));
            };
            tag.send_felica(packet)
        }
        TagType::Iso15693 => {
            if data.len() < 2 {
                return Err(NfcError::InvalidArgument(
                    "ISO15693 command needs at least flags and command code".to_string(),
                ));
            }
            tag.send_iso15693(data[0], data[1], &data[2..])
        }
        TagType::MifareClassic | TagType::MifareUltralight | TagType::Unknown => {
            tag.send_raw(data)
        }
    }
}
