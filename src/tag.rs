//! Technology classification: turning a tag's advertised capability set
//! into a descriptor with a protocol family label and a technology tag.

use serde::{Deserialize, Serialize};
use strum_macros::Display;
use tracing::{debug, warn};

use crate::data::{hex_opt, hex_str};
use crate::mifare::MifareProfile;
use crate::reader::RawTag;

/// Closed enumeration of technology tags a poll can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
pub enum TagType {
    #[strum(to_string = "iso7816")]
    #[serde(rename = "iso7816")]
    Iso7816,
    #[strum(to_string = "mifare_classic")]
    #[serde(rename = "mifare_classic")]
    MifareClassic,
    #[strum(to_string = "mifare_ultralight")]
    #[serde(rename = "mifare_ultralight")]
    MifareUltralight,
    #[strum(to_string = "iso18092")]
    #[serde(rename = "iso18092")]
    Iso18092,
    #[strum(to_string = "iso15693")]
    #[serde(rename = "iso15693")]
    Iso15693,
    #[strum(to_string = "unknown")]
    #[serde(rename = "unknown")]
    Unknown,
}

/// ISO14443-A low-level parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NfcAInfo {
    pub atqa: Vec<u8>,
    pub sak: u8,
}

/// ISO14443-B low-level parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NfcBInfo {
    pub protocol_info: Vec<u8>,
    pub application_data: Vec<u8>,
}

/// ISO-DEP (ISO7816) parameters; which field is present depends on
/// whether the carrier is Type A or Type B.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IsoDepInfo {
    pub historical_bytes: Vec<u8>,
    pub hi_layer_response: Vec<u8>,
}

/// FeliCa parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FelicaInfo {
    pub manufacturer: Vec<u8>,
    pub system_code: Vec<u8>,
}

/// ISO15693 parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Iso15693Info {
    pub dsf_id: u8,
}

/// NDEF capability as reported by the tag. Mutated only by re-poll.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NdefCapability {
    pub available: bool,
    pub writable: bool,
    pub can_make_read_only: bool,
    pub capacity: usize,
    /// Tag-reported NDEF type string, e.g. `org.nfcforum.ndef.type2`.
    #[serde(rename = "type")]
    pub ndef_type: String,
}

/// The set of low-level capability handles a tag advertises.
/// Never empty for a real tag; overlapping capabilities are expected.
#[derive(Debug, Clone, Default)]
pub struct CapabilitySet {
    pub id: Vec<u8>,
    pub nfc_a: Option<NfcAInfo>,
    pub nfc_b: Option<NfcBInfo>,
    pub iso_dep: Option<IsoDepInfo>,
    pub mifare_classic: bool,
    pub mifare_ultralight: bool,
    pub felica: Option<FelicaInfo>,
    pub iso15693: Option<Iso15693Info>,
    pub ndef: Option<NdefCapability>,
}

/// Everything a successful poll reports about the detected tag.
/// Immutable once constructed; owned by the session for its lifetime.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TagDescriptor {
    #[serde(with = "hex_str")]
    pub id: Vec<u8>,
    #[serde(rename = "type")]
    pub tag_type: TagType,
    pub standard: String,
    #[serde(with = "hex_opt", skip_serializing_if = "Option::is_none")]
    pub atqa: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sak: Option<u8>,
    #[serde(with = "hex_opt", skip_serializing_if = "Option::is_none")]
    pub protocol_info: Option<Vec<u8>>,
    #[serde(with = "hex_opt", skip_serializing_if = "Option::is_none")]
    pub application_data: Option<Vec<u8>>,
    #[serde(with = "hex_opt", skip_serializing_if = "Option::is_none")]
    pub historical_bytes: Option<Vec<u8>>,
    #[serde(with = "hex_opt", skip_serializing_if = "Option::is_none")]
    pub hi_layer_response: Option<Vec<u8>>,
    #[serde(with = "hex_opt", skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<Vec<u8>>,
    #[serde(with = "hex_opt", skip_serializing_if = "Option::is_none")]
    pub system_code: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dsf_id: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ndef: Option<NdefCapability>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mifare: Option<MifareProfile>,
}

impl TagDescriptor {
    fn new(id: Vec<u8>, tag_type: TagType, standard: &str) -> Self {
        TagDescriptor {
            id,
            tag_type,
            standard: standard.to_string(),
            atqa: None,
            sak: None,
            protocol_info: None,
            application_data: None,
            historical_bytes: None,
            hi_layer_response: None,
            manufacturer: None,
            system_code: None,
            dsf_id: None,
            ndef: None,
            mifare: None,
        }
    }
}

/// Classify a detected tag from its advertised capabilities.
///
/// First match wins; real tags expose overlapping capability sets. The
/// NDEF capability is orthogonal to the primary classification, and a
/// failed MIFARE geometry query degrades to a descriptor without a
/// profile rather than a failed poll.
pub fn classify(tag: &dyn RawTag) -> TagDescriptor {
    let caps = tag.capabilities();
    let id = caps.id.clone();

    let mut descriptor = if let Some(nfc_a) = &caps.nfc_a {
        let mut descriptor = if let Some(iso_dep) = &caps.iso_dep {
            let mut d = TagDescriptor::new(id, TagType::Iso7816, "ISO 14443-4 (Type A)");
            d.historical_bytes = Some(iso_dep.historical_bytes.clone());
            d
        } else if caps.mifare_classic {
            TagDescriptor::new(id, TagType::MifareClassic, "ISO 14443-3 (Type A)")
        } else if caps.mifare_ultralight {
            TagDescriptor::new(id, TagType::MifareUltralight, "ISO 14443-3 (Type A)")
        } else {
            TagDescriptor::new(id, TagType::Unknown, "ISO 14443-3 (Type A)")
        };
        descriptor.atqa = Some(nfc_a.atqa.clone());
        descriptor.sak = Some(nfc_a.sak);
        descriptor
    } else if let Some(nfc_b) = &caps.nfc_b {
        let mut descriptor = if let Some(iso_dep) = &caps.iso_dep {
            let mut d = TagDescriptor::new(id, TagType::Iso7816, "ISO 14443-4 (Type B)");
            d.hi_layer_response = Some(iso_dep.hi_layer_response.clone());
            d
        } else {
            TagDescriptor::new(id, TagType::Unknown, "ISO 14443-3 (Type B)")
        };
        descriptor.protocol_info = Some(nfc_b.protocol_info.clone());
        descriptor.application_data = Some(nfc_b.application_data.clone());
        descriptor
    } else if let Some(felica) = &caps.felica {
        let mut d = TagDescriptor::new(id, TagType::Iso18092, "ISO 18092 (FeliCa)");
        d.manufacturer = Some(felica.manufacturer.clone());
        d.system_code = Some(felica.system_code.clone());
        d
    } else if let Some(iso15693) = &caps.iso15693 {
        let mut d = TagDescriptor::new(id, TagType::Iso15693, "ISO 15693");
        d.dsf_id = Some(iso15693.dsf_id);
        d
    } else {
        TagDescriptor::new(id, TagType::Unknown, "unknown")
    };

    descriptor.ndef = caps.ndef.clone();

    if matches!(
        descriptor.tag_type,
        TagType::MifareClassic | TagType::MifareUltralight
    ) {
        match tag.mifare_profile() {
            Ok(profile) => descriptor.mifare = Some(profile),
            // the rest of the descriptor is still usable
            Err(err) => warn!(%err, "querying MIFARE profile failed"),
        }
    }

    debug!(
        tag_type = %descriptor.tag_type,
        standard = %descriptor.standard,
        ndef = descriptor.ndef.is_some(),
        "classified tag"
    );
    descriptor
}
