//! Shared stub radio for integration tests.
//!
//! The stubs record every radio call so tests can assert not only on
//! results but on which hardware operations were (or were not) issued.

// not every test file uses every helper
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use nfckit::error::NfcError;
use nfckit::mifare::{KeySlot, MifareKey, MifareProfile, MifareVariant};
use nfckit::reader::{
    ApduResponse, Availability, Detection, HandleKind, RawTag, ReaderMode, TechnologyMask,
};
use nfckit::tag::{
    CapabilitySet, FelicaInfo, Iso15693Info, IsoDepInfo, NdefCapability, NfcAInfo, NfcBInfo,
};
use tokio::sync::mpsc::UnboundedSender;

/// Everything the stub tag was asked to do, in order per category.
#[derive(Debug, Default)]
pub struct TagCalls {
    pub connects: Vec<HandleKind>,
    pub closes: Vec<HandleKind>,
    pub apdu: Vec<Vec<u8>>,
    pub felica: Vec<Vec<u8>>,
    pub iso15693: Vec<(u8, u8, Vec<u8>)>,
    pub raw: Vec<Vec<u8>>,
    pub auth: Vec<(u8, [u8; 6], KeySlot)>,
    pub reads: Vec<u8>,
    pub writes: Vec<(u8, Vec<u8>)>,
    pub ndef_reads: usize,
    pub ndef_writes: Vec<Vec<u8>>,
    pub lock_attempts: usize,
    pub timeout_overrides: Vec<Duration>,
}

pub struct StubTag {
    pub caps: CapabilitySet,
    /// `None` makes the geometry query fail with a communication error.
    pub profile: Option<MifareProfile>,
    pub apdu_response: ApduResponse,
    pub raw_response: Vec<u8>,
    pub felica_response: Vec<u8>,
    pub iso15693_response: Vec<u8>,
    /// Returned by every `mifare_read`.
    pub read_response: Vec<u8>,
    pub ndef_message: Vec<u8>,
    pub auth_ok_a: bool,
    pub auth_ok_b: bool,
    pub lock_result: bool,
    pub honours_timeout: bool,
    connected: Mutex<Option<HandleKind>>,
    pub calls: Mutex<TagCalls>,
}

impl Default for StubTag {
    fn default() -> Self {
        StubTag {
            caps: CapabilitySet::default(),
            profile: None,
            apdu_response: ApduResponse {
                body: vec![0x6F, 0x10],
                sw1: 0x90,
                sw2: 0x00,
            },
            raw_response: vec![0x0A],
            felica_response: vec![0x0D, 0x07],
            iso15693_response: vec![0x00, 0x01],
            read_response: vec![0xEE; 16],
            ndef_message: Vec::new(),
            auth_ok_a: true,
            auth_ok_b: true,
            lock_result: true,
            honours_timeout: false,
            connected: Mutex::new(None),
            calls: Mutex::new(TagCalls::default()),
        }
    }
}

impl StubTag {
    /// ISO-DEP tag on a Type A carrier.
    pub fn iso7816() -> Self {
        StubTag {
            caps: CapabilitySet {
                id: vec![0x04, 0xA1, 0xB2, 0xC3],
                nfc_a: Some(NfcAInfo {
                    atqa: vec![0x04, 0x00],
                    sak: 0x20,
                }),
                iso_dep: Some(IsoDepInfo {
                    historical_bytes: vec![0x80, 0x31],
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Type B carrier with ISO-DEP.
    pub fn iso7816_type_b() -> Self {
        StubTag {
            caps: CapabilitySet {
                id: vec![0x0B, 0x0B],
                nfc_b: Some(NfcBInfo {
                    protocol_info: vec![0x01],
                    application_data: vec![0x02],
                }),
                iso_dep: Some(IsoDepInfo {
                    hi_layer_response: vec![0x99],
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// MIFARE Classic 1K: 1024 bytes, 64 blocks, 16 sectors.
    pub fn mifare_classic_1k() -> Self {
        StubTag {
            caps: CapabilitySet {
                id: vec![0xC1, 0xA5, 0x51, 0xC0],
                nfc_a: Some(NfcAInfo {
                    atqa: vec![0x04, 0x00],
                    sak: 0x08,
                }),
                mifare_classic: true,
                ..Default::default()
            },
            profile: Some(MifareProfile::classic(MifareVariant::Classic, 1024, 16)),
            ..Default::default()
        }
    }

    pub fn mifare_ultralight() -> Self {
        StubTag {
            caps: CapabilitySet {
                id: vec![0x04, 0x11, 0x22],
                nfc_a: Some(NfcAInfo {
                    atqa: vec![0x44, 0x00],
                    sak: 0x00,
                }),
                mifare_ultralight: true,
                ..Default::default()
            },
            profile: Some(MifareProfile::ultralight(MifareVariant::Ultralight)),
            read_response: vec![0xEE; 16],
            ..Default::default()
        }
    }

    pub fn felica() -> Self {
        StubTag {
            caps: CapabilitySet {
                id: vec![0x01, 0xFE],
                felica: Some(FelicaInfo {
                    manufacturer: vec![0x01, 0x2E],
                    system_code: vec![0x88, 0xB4],
                }),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn iso15693() -> Self {
        StubTag {
            caps: CapabilitySet {
                id: vec![0xE0, 0x04],
                iso15693: Some(Iso15693Info { dsf_id: 0x15 }),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Attach an NDEF capability; orthogonal to the primary technology.
    pub fn with_ndef(mut self, writable: bool) -> Self {
        self.caps.ndef = Some(NdefCapability {
            available: true,
            writable,
            can_make_read_only: writable,
            capacity: 137,
            ndef_type: "org.nfcforum.ndef.type2".to_string(),
        });
        self
    }

    pub fn with_ndef_message(mut self, raw: Vec<u8>) -> Self {
        self.ndef_message = raw;
        self
    }

    pub fn calls(&self) -> std::sync::MutexGuard<'_, TagCalls> {
        self.calls.lock().unwrap()
    }

    pub fn open_handle(&self) -> Option<HandleKind> {
        *self.connected.lock().unwrap()
    }
}

impl RawTag for StubTag {
    fn capabilities(&self) -> &CapabilitySet {
        &self.caps
    }

    fn connect(&self, handle: HandleKind) -> Result<(), NfcError> {
        let mut connected = self.connected.lock().unwrap();
        if let Some(open) = *connected {
            assert_eq!(open, handle, "both handles open at once");
        }
        *connected = Some(handle);
        self.calls().connects.push(handle);
        Ok(())
    }

    fn close(&self, handle: HandleKind) -> Result<(), NfcError> {
        let mut connected = self.connected.lock().unwrap();
        if *connected == Some(handle) {
            *connected = None;
            self.calls().closes.push(handle);
        }
        Ok(())
    }

    fn is_connected(&self, handle: HandleKind) -> bool {
        *self.connected.lock().unwrap() == Some(handle)
    }

    fn send_apdu(&self, apdu: &[u8]) -> Result<ApduResponse, NfcError> {
        self.calls().apdu.push(apdu.to_vec());
        Ok(self.apdu_response.clone())
    }

    fn send_felica(&self, packet: &[u8]) -> Result<Vec<u8>, NfcError> {
        self.calls().felica.push(packet.to_vec());
        Ok(self.felica_response.clone())
    }

    fn send_iso15693(&self, flags: u8, command: u8, params: &[u8]) -> Result<Vec<u8>, NfcError> {
        self.calls().iso15693.push((flags, command, params.to_vec()));
        Ok(self.iso15693_response.clone())
    }

    fn send_raw(&self, data: &[u8]) -> Result<Vec<u8>, NfcError> {
        self.calls().raw.push(data.to_vec());
        Ok(self.raw_response.clone())
    }

    fn set_transceive_timeout(&self, timeout: Duration) -> bool {
        self.calls().timeout_overrides.push(timeout);
        self.honours_timeout
    }

    fn read_ndef(&self, _cached: bool) -> Result<Vec<u8>, NfcError> {
        self.calls().ndef_reads += 1;
        Ok(self.ndef_message.clone())
    }

    fn write_ndef(&self, raw: &[u8]) -> Result<(), NfcError> {
        self.calls().ndef_writes.push(raw.to_vec());
        Ok(())
    }

    fn make_ndef_read_only(&self) -> Result<bool, NfcError> {
        self.calls().lock_attempts += 1;
        Ok(self.lock_result)
    }

    fn mifare_profile(&self) -> Result<MifareProfile, NfcError> {
        self.profile
            .clone()
            .ok_or_else(|| NfcError::CommunicationError("profile query failed".to_string()))
    }

    fn mifare_authenticate(
        &self,
        sector: u8,
        key: &MifareKey,
        slot: KeySlot,
    ) -> Result<bool, NfcError> {
        self.calls().auth.push((sector, *key.as_bytes(), slot));
        Ok(match slot {
            KeySlot::A => self.auth_ok_a,
            KeySlot::B => self.auth_ok_b,
        })
    }

    fn mifare_read(&self, offset: u8) -> Result<Vec<u8>, NfcError> {
        self.calls().reads.push(offset);
        Ok(self.read_response.clone())
    }

    fn mifare_write(&self, offset: u8, data: &[u8]) -> Result<(), NfcError> {
        self.calls().writes.push((offset, data.to_vec()));
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct ReaderCalls {
    pub enables: usize,
    pub disables: usize,
    pub restarts: usize,
    pub messages: Vec<String>,
    pub last_mask: Option<TechnologyMask>,
}

/// Stub reader mode delivering scripted detection batches: one batch on
/// enable, one per restart.
pub struct StubReader {
    availability: Availability,
    batches: Mutex<VecDeque<Detection>>,
    sink: Mutex<Option<UnboundedSender<Detection>>>,
    pub calls: Mutex<ReaderCalls>,
}

impl StubReader {
    pub fn new(batches: Vec<Detection>) -> Arc<Self> {
        Arc::new(StubReader {
            availability: Availability::Available,
            batches: Mutex::new(batches.into()),
            sink: Mutex::new(None),
            calls: Mutex::new(ReaderCalls::default()),
        })
    }

    pub fn unavailable(availability: Availability) -> Arc<Self> {
        Arc::new(StubReader {
            availability,
            batches: Mutex::new(VecDeque::new()),
            sink: Mutex::new(None),
            calls: Mutex::new(ReaderCalls::default()),
        })
    }

    /// Queue another batch for a later poll.
    pub fn push_batch(&self, batch: Detection) {
        self.batches.lock().unwrap().push_back(batch);
    }

    pub fn calls(&self) -> std::sync::MutexGuard<'_, ReaderCalls> {
        self.calls.lock().unwrap()
    }

    fn deliver_next(&self) {
        let batch = self.batches.lock().unwrap().pop_front();
        if let (Some(batch), Some(sink)) = (batch, self.sink.lock().unwrap().as_ref()) {
            let _ = sink.send(batch);
        }
    }
}

impl ReaderMode for StubReader {
    fn availability(&self) -> Availability {
        self.availability
    }

    fn enable(
        &self,
        mask: TechnologyMask,
        sink: UnboundedSender<Detection>,
    ) -> Result<(), NfcError> {
        {
            let mut calls = self.calls();
            calls.enables += 1;
            calls.last_mask = Some(mask);
        }
        *self.sink.lock().unwrap() = Some(sink);
        self.deliver_next();
        Ok(())
    }

    fn restart_polling(&self) {
        self.calls().restarts += 1;
        self.deliver_next();
    }

    fn disable(&self) {
        self.calls().disables += 1;
        *self.sink.lock().unwrap() = None;
    }

    fn set_message(&self, message: &str) {
        self.calls().messages.push(message.to_string());
    }
}

/// Single-tag detection batch.
pub fn batch_of(tags: &[Arc<StubTag>]) -> Detection {
    tags.iter().map(|t| t.clone() as Arc<dyn RawTag>).collect()
}
