//! Platform collaborator seams: reader-mode control and per-tag radio
//! primitives.
//!
//! The session core is written entirely against these traits so the state
//! machine can be driven by a real platform driver or by the stub radio
//! used in the integration tests.

use std::ops::BitOr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum_macros::Display;
use tokio::sync::mpsc::UnboundedSender;

use crate::error::NfcError;
use crate::mifare::{KeySlot, MifareKey, MifareProfile};
use crate::tag::CapabilitySet;

/// Radio availability as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
pub enum Availability {
    #[strum(to_string = "not_supported")]
    #[serde(rename = "not_supported")]
    NotSupported,
    #[strum(to_string = "disabled")]
    #[serde(rename = "disabled")]
    Disabled,
    #[strum(to_string = "available")]
    #[serde(rename = "available")]
    Available,
}

/// Bitmask restricting which wire protocols a poll scans for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TechnologyMask(pub u32);

impl TechnologyMask {
    pub const ISO14443_A: Self = Self(1 << 0);
    pub const ISO14443_B: Self = Self(1 << 1);
    pub const ISO18092: Self = Self(1 << 2);
    pub const ISO15693: Self = Self(1 << 3);
    pub const ALL: Self = Self(0b1111);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for TechnologyMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// The two exclusive connection handles a polled tag exposes.
///
/// At most one of the pair may be physically open at any instant; switching
/// closes the other first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    Technology,
    Ndef,
}

impl HandleKind {
    pub fn other(self) -> Self {
        match self {
            HandleKind::Technology => HandleKind::Ndef,
            HandleKind::Ndef => HandleKind::Technology,
        }
    }
}

/// One reader-mode callback: every tag currently in the field.
/// More than one entry is a collision the session resolves by backoff.
pub type Detection = Vec<Arc<dyn RawTag>>;

/// An APDU response with the status word kept separate from the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApduResponse {
    pub body: Vec<u8>,
    pub sw1: u8,
    pub sw2: u8,
}

/// Platform reader-mode API: hardware scanning with async tag-detect
/// delivery.
pub trait ReaderMode: Send + Sync {
    fn availability(&self) -> Availability;

    /// Begin scanning restricted to `mask`, pushing detections into `sink`.
    fn enable(&self, mask: TechnologyMask, sink: UnboundedSender<Detection>)
    -> Result<(), NfcError>;

    /// Re-issue the scan after a collision without tearing reader mode down.
    fn restart_polling(&self);

    fn disable(&self);

    /// Update the operator-visible advisory text, where the platform has one.
    fn set_message(&self, _message: &str) {}
}

impl<T: ReaderMode + ?Sized> ReaderMode for Arc<T> {
    fn availability(&self) -> Availability {
        (**self).availability()
    }

    fn enable(
        &self,
        mask: TechnologyMask,
        sink: UnboundedSender<Detection>,
    ) -> Result<(), NfcError> {
        (**self).enable(mask, sink)
    }

    fn restart_polling(&self) {
        (**self).restart_polling()
    }

    fn disable(&self) {
        (**self).disable()
    }

    fn set_message(&self, message: &str) {
        (**self).set_message(message)
    }
}

/// Radio primitives for one tag in the field.
///
/// Capability methods default to the appropriate "not supported" failure;
/// a platform handle overrides exactly the ones its technology implements.
/// This replaces the runtime method lookup the platform APIs force on
/// their callers with a set checked per technology arm at compile time.
pub trait RawTag: Send + Sync {
    fn capabilities(&self) -> &CapabilitySet;

    /// Open the given handle. Opening an already-open handle is a no-op.
    fn connect(&self, handle: HandleKind) -> Result<(), NfcError>;

    /// Close the given handle. Closing an already-closed handle is a no-op.
    fn close(&self, handle: HandleKind) -> Result<(), NfcError>;

    fn is_connected(&self, handle: HandleKind) -> bool;

    /// Exchange a complete APDU with an ISO7816 tag.
    fn send_apdu(&self, _apdu: &[u8]) -> Result<ApduResponse, NfcError> {
        Err(NfcError::TransceiveUnsupported)
    }

    /// Exchange a FeliCa command packet (without its length prefix, which
    /// the radio layer re-derives).
    fn send_felica(&self, _packet: &[u8]) -> Result<Vec<u8>, NfcError> {
        Err(NfcError::TransceiveUnsupported)
    }

    /// Exchange an ISO15693 command, flags and command code split out.
    fn send_iso15693(&self, _flags: u8, _command: u8, _params: &[u8]) -> Result<Vec<u8>, NfcError> {
        Err(NfcError::TransceiveUnsupported)
    }

    /// Exchange raw bytes with no framing (MIFARE and unclassified tags).
    fn send_raw(&self, _data: &[u8]) -> Result<Vec<u8>, NfcError> {
        Err(NfcError::TransceiveUnsupported)
    }

    /// Best-effort transceive timeout override. Returns whether the
    /// technology honoured it; handles without the capability keep the
    /// no-op default.
    fn set_transceive_timeout(&self, _timeout: Duration) -> bool {
        false
    }

    /// Raw NDEF message bytes; an empty buffer means no message present.
    fn read_ndef(&self, _cached: bool) -> Result<Vec<u8>, NfcError> {
        Err(NfcError::TechnologyNotSupported("NDEF"))
    }

    fn write_ndef(&self, _raw: &[u8]) -> Result<(), NfcError> {
        Err(NfcError::TechnologyNotSupported("NDEF"))
    }

    /// Permanently lock the NDEF area. `Ok(false)` means the tag reported
    /// failure without an I/O error.
    fn make_ndef_read_only(&self) -> Result<bool, NfcError> {
        Err(NfcError::TechnologyNotSupported("NDEF"))
    }

    /// Query family/variant/size/block/sector counts from a MIFARE tag.
    fn mifare_profile(&self) -> Result<MifareProfile, NfcError> {
        Err(NfcError::TechnologyNotSupported("MIFARE"))
    }

    fn mifare_authenticate(
        &self,
        _sector: u8,
        _key: &MifareKey,
        _slot: KeySlot,
    ) -> Result<bool, NfcError> {
        Err(NfcError::TechnologyNotSupported("MIFARE"))
    }

    /// Read one block (Classic) or one page run (Ultralight) at `offset`.
    fn mifare_read(&self, _offset: u8) -> Result<Vec<u8>, NfcError> {
        Err(NfcError::TechnologyNotSupported("MIFARE"))
    }

    /// Write one block (Classic) or one page (Ultralight) at `offset`.
    fn mifare_write(&self, _offset: u8, _data: &[u8]) -> Result<(), NfcError> {
        Err(NfcError::TechnologyNotSupported("MIFARE"))
    }
}
