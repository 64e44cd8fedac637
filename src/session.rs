//! The tag-session state machine.
//!
//! A session owns at most one active low-level technology connection and,
//! independently, at most one active NDEF connection; at most one of the
//! pair is physically open at any instant. All mutating operations run
//! strictly serialized (see [`crate::service`]), so every method here
//! takes `&mut self` and the connection switch inside an operation can
//! never be raced.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep, sleep_until};
use tracing::{debug, info, warn};

use crate::data::TransceiveData;
use crate::error::NfcError;
use crate::mifare::{MemoryAccess, MifareKey};
use crate::ndef::{self, NdefRecord};
use crate::reader::{Availability, Detection, HandleKind, RawTag, ReaderMode, TechnologyMask};
use crate::tag::{TagDescriptor, classify};
use crate::transceive;

/// Fixed backoff before re-issuing the scan after a multi-tag collision.
const COLLISION_BACKOFF: Duration = Duration::from_millis(500);

/// Parameters for one poll.
#[derive(Debug, Clone)]
pub struct PollOptions {
    /// Callers must supply a deadline explicitly; there is no built-in
    /// default.
    pub timeout: Duration,
    pub mask: TechnologyMask,
    /// Operator-visible prompt while scanning, where the platform shows one.
    pub alert_message: Option<String>,
    /// Advisory shown when more than one tag is in the field.
    pub multiple_tag_message: Option<String>,
}

impl PollOptions {
    pub fn new(timeout: Duration, mask: TechnologyMask) -> Self {
        PollOptions {
            timeout,
            mask,
            alert_message: None,
            multiple_tag_message: None,
        }
    }
}

struct ActiveTag {
    tag: Arc<dyn RawTag>,
    descriptor: TagDescriptor,
}

enum SessionState {
    Idle,
    Polling,
    Connected(ActiveTag),
    Closed,
}

/// One NFC session: poll, operate, finish.
///
/// Instantiated once per host-application lifetime and torn down
/// explicitly at detach time; there is no ambient global state.
pub struct TagSession<R: ReaderMode> {
    reader: R,
    state: SessionState,
}

impl<R: ReaderMode> TagSession<R> {
    pub fn new(reader: R) -> Self {
        TagSession {
            reader,
            state: SessionState::Idle,
        }
    }

    /// Pure capability query; never requires an active session.
    pub fn availability(&self) -> Availability {
        self.reader.availability()
    }

    /// Scan for a single tag, classify it, and connect to it.
    ///
    /// A multi-tag collision never reaches the caller: the scan is
    /// re-issued after a fixed backoff until one tag remains or the
    /// deadline fires.
    pub async fn poll(&mut self, options: PollOptions) -> Result<TagDescriptor, NfcError> {
        match self.state {
            SessionState::Idle => {}
            SessionState::Polling | SessionState::Connected(_) => {
                return Err(NfcError::SessionAlreadyActive);
            }
            SessionState::Closed => return Err(NfcError::SessionNotActive),
        }
        if self.reader.availability() != Availability::Available {
            return Err(NfcError::NotAvailable);
        }

        let (sink, mut detections) = mpsc::unbounded_channel::<Detection>();
        self.reader.enable(options.mask, sink)?;
        if let Some(message) = &options.alert_message {
            self.reader.set_message(message);
        }
        self.state = SessionState::Polling;
        info!(timeout_ms = options.timeout.as_millis() as u64, "polling started");

        let deadline = Instant::now() + options.timeout;
        let outcome = loop {
            tokio::select! {
                // the detection arm and the deadline arm share this single
                // decision point; detection wins when both are ready
                biased;
                detection = detections.recv() => match detection {
                    None => break Err(NfcError::CommunicationError(
                        "reader mode stopped unexpectedly".to_string(),
                    )),
                    Some(tags) if tags.len() > 1 => {
                        debug!(count = tags.len(), "multiple tags in field, restarting poll");
                        if let Some(message) = &options.multiple_tag_message {
                            self.reader.set_message(message);
                        }
                        sleep(COLLISION_BACKOFF).await;
                        self.reader.restart_polling();
                    }
                    Some(mut tags) => match tags.pop() {
                        Some(tag) => break Ok(tag),
                        // an empty detection is a driver bug; keep waiting
                        None => warn!("empty detection callback"),
                    },
                },
                _ = sleep_until(deadline) => break Err(NfcError::PollingTimeout),
            }
        };

        match outcome {
            Ok(tag) => {
                let descriptor = classify(tag.as_ref());
                info!(
                    tag_type = %descriptor.tag_type,
                    standard = %descriptor.standard,
                    "tag connected"
                );
                self.state = SessionState::Connected(ActiveTag {
                    tag,
                    descriptor: descriptor.clone(),
                });
                Ok(descriptor)
            }
            Err(err) => {
                self.reader.disable();
                self.state = SessionState::Idle;
                Err(err)
            }
        }
    }

    /// Tear the session down. Idempotent: finishing an idle or closed
    /// session succeeds without touching the radio.
    pub fn finish(
        &mut self,
        alert_message: Option<&str>,
        error_message: Option<&str>,
    ) -> Result<(), NfcError> {
        if let Some(message) = error_message.or(alert_message) {
            self.reader.set_message(message);
        }
        match std::mem::replace(&mut self.state, SessionState::Idle) {
            SessionState::Connected(active) => {
                close_handles(active.tag.as_ref());
                self.reader.disable();
                info!("session finished");
            }
            // unreachable under serialized dispatch, but keep the reader off
            SessionState::Polling => self.reader.disable(),
            SessionState::Idle => {}
            SessionState::Closed => self.state = SessionState::Closed,
        }
        Ok(())
    }

    /// Forced teardown at owner detach; the session is unusable afterwards.
    pub fn shutdown(&mut self) {
        if let SessionState::Connected(active) = &self.state {
            close_handles(active.tag.as_ref());
        }
        self.reader.disable();
        self.state = SessionState::Closed;
    }

    fn active(&self) -> Result<&ActiveTag, NfcError> {
        match &self.state {
            SessionState::Connected(active) => Ok(active),
            _ => Err(NfcError::NoTagPolled),
        }
    }

    /// Open `target`, closing the other handle first if it is the one
    /// currently open. The switch is part of the calling operation.
    fn switch_to(active: &ActiveTag, target: HandleKind) -> Result<(), NfcError> {
        if !active.tag.is_connected(target) {
            if active.tag.is_connected(target.other()) {
                active.tag.close(target.other())?;
            }
            active.tag.connect(target)?;
        }
        Ok(())
    }

    /// Exchange raw bytes with the connected tag; the response encoding
    /// mirrors the request encoding.
    pub fn transceive(
        &mut self,
        data: &TransceiveData,
        timeout: Option<Duration>,
    ) -> Result<TransceiveData, NfcError> {
        let (bytes, canonical) = data.canonicalize()?;
        let active = self.active()?;
        Self::switch_to(active, HandleKind::Technology)?;
        debug!(command = %canonical, "transceive");
        let response =
            transceive::exchange(active.descriptor.tag_type, active.tag.as_ref(), &bytes, timeout)?;
        Ok(data.mirror(response))
    }

    fn ndef_ready(&self) -> Result<&ActiveTag, NfcError> {
        let active = self.active()?;
        match &active.descriptor.ndef {
            Some(capability) if capability.available => Ok(active),
            _ => Err(NfcError::TechnologyNotSupported("NDEF")),
        }
    }

    /// Read the tag's NDEF message as an ordered record sequence.
    /// A tag with no message present yields an empty sequence.
    pub fn read_ndef(&mut self, cached: bool) -> Result<Vec<NdefRecord>, NfcError> {
        let active = self.ndef_ready()?;
        Self::switch_to(active, HandleKind::Ndef)?;
        let raw = active.tag.read_ndef(cached)?;
        ndef::decode(Bytes::from(raw))
    }

    /// Write an NDEF message, preserving record order.
    pub fn write_ndef(&mut self, records: &[NdefRecord]) -> Result<(), NfcError> {
        let active = self.ndef_ready()?;
        if !active.descriptor.ndef.as_ref().is_some_and(|c| c.writable) {
            return Err(NfcError::NotWritable);
        }
        Self::switch_to(active, HandleKind::Ndef)?;
        active.tag.write_ndef(&ndef::encode(records)?)
    }

    /// Permanently lock the NDEF area. One-way and irreversible.
    pub fn make_ndef_read_only(&mut self) -> Result<(), NfcError> {
        let active = self.ndef_ready()?;
        if !active.descriptor.ndef.as_ref().is_some_and(|c| c.writable) {
            return Err(NfcError::NotWritable);
        }
        Self::switch_to(active, HandleKind::Ndef)?;
        if active.tag.make_ndef_read_only()? {
            Ok(())
        } else {
            Err(NfcError::LockFailed)
        }
    }

    fn mifare_ready(&self) -> Result<(&ActiveTag, MemoryAccess<'_>), NfcError> {
        let active = self.active()?;
        let profile = active
            .descriptor
            .mifare
            .as_ref()
            .ok_or(NfcError::TechnologyNotSupported("MIFARE"))?;
        Ok((active, MemoryAccess::new(profile, active.tag.as_ref())))
    }

    /// Authenticate a Classic sector; the key is scoped to this call only.
    pub fn authenticate_sector(
        &mut self,
        index: usize,
        key_a: Option<&str>,
        key_b: Option<&str>,
    ) -> Result<bool, NfcError> {
        let key_a = key_a.map(MifareKey::from_hex).transpose()?;
        let key_b = key_b.map(MifareKey::from_hex).transpose()?;
        let (active, memory) = self.mifare_ready()?;
        Self::switch_to(active, HandleKind::Technology)?;
        memory.authenticate_sector(index, key_a.as_ref(), key_b.as_ref())
    }

    /// Read one block (Classic) or page run (Ultralight).
    pub fn read_block(&mut self, index: usize, key: Option<&str>) -> Result<Vec<u8>, NfcError> {
        let key = key.map(MifareKey::from_hex).transpose()?;
        let (active, memory) = self.mifare_ready()?;
        Self::switch_to(active, HandleKind::Technology)?;
        memory.read_block(index, key.as_ref())
    }

    /// Write one block (Classic) or page (Ultralight).
    pub fn write_block(
        &mut self,
        index: usize,
        data: &[u8],
        key: Option<&str>,
    ) -> Result<(), NfcError> {
        let key = key.map(MifareKey::from_hex).transpose()?;
        let (active, memory) = self.mifare_ready()?;
        Self::switch_to(active, HandleKind::Technology)?;
        memory.write_block(index, data, key.as_ref())
    }

    /// Read a whole Classic sector as one buffer.
    pub fn read_sector(&mut self, index: usize, key: Option<&str>) -> Result<Vec<u8>, NfcError> {
        let key = key.map(MifareKey::from_hex).transpose()?;
        let (active, memory) = self.mifare_ready()?;
        Self::switch_to(active, HandleKind::Technology)?;
        memory.read_sector(index, key.as_ref())
    }

    /// Dump every sector (Classic) or page run (Ultralight) of the tag.
    pub fn read_all(&mut self, key: Option<&str>) -> Result<Vec<Vec<u8>>, NfcError> {
        let key = key.map(MifareKey::from_hex).transpose()?;
        let (active, memory) = self.mifare_ready()?;
        Self::switch_to(active, HandleKind::Technology)?;
        memory.read_all(key.as_ref())
    }
}

/// Close whichever handles are still open, tolerating already-closed ones.
fn close_handles(tag: &dyn RawTag) {
    for handle in [HandleKind::Technology, HandleKind::Ndef] {
        if tag.is_connected(handle) {
            if let Err(err) = tag.close(handle) {
                warn!(%err, ?handle, "closing tag handle failed");
            }
        }
    }
}

impl<R: ReaderMode> Drop for TagSession<R> {
    fn drop(&mut self) {
        match &self.state {
            SessionState::Connected(active) => {
                close_handles(active.tag.as_ref());
                self.reader.disable();
            }
            // dropped mid-poll (owner detach): reader mode is still on
            SessionState::Polling => self.reader.disable(),
            SessionState::Idle | SessionState::Closed => {}
        }
    }
}
