//! Serialized command dispatch for a [`TagSession`].
//!
//! Every operation is forwarded onto one dedicated worker task draining a
//! FIFO queue, so operations against the same session never interleave:
//! an operation that switches the open connection handle completes before
//! the next one starts. Detaching the owner aborts the worker; the
//! session's drop releases any open handle, and callers whose reply was
//! discarded observe `SessionNotActive` instead of hanging forever.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::data::TransceiveData;
use crate::error::NfcError;
use crate::ndef::NdefRecord;
use crate::reader::{Availability, ReaderMode};
use crate::session::{PollOptions, TagSession};
use crate::tag::TagDescriptor;

type Reply<T> = oneshot::Sender<Result<T, NfcError>>;

enum Command {
    GetAvailability {
        reply: Reply<Availability>,
    },
    Poll {
        options: PollOptions,
        reply: Reply<TagDescriptor>,
    },
    Finish {
        alert_message: Option<String>,
        error_message: Option<String>,
        reply: Reply<()>,
    },
    Transceive {
        data: TransceiveData,
        timeout: Option<Duration>,
        reply: Reply<TransceiveData>,
    },
    ReadNdef {
        cached: bool,
        reply: Reply<Vec<NdefRecord>>,
    },
    WriteNdef {
        records: Vec<NdefRecord>,
        reply: Reply<()>,
    },
    MakeNdefReadOnly {
        reply: Reply<()>,
    },
    AuthenticateSector {
        index: usize,
        key_a: Option<String>,
        key_b: Option<String>,
        reply: Reply<bool>,
    },
    ReadBlock {
        index: usize,
        key: Option<String>,
        reply: Reply<Vec<u8>>,
    },
    WriteBlock {
        index: usize,
        data: Vec<u8>,
        key: Option<String>,
        reply: Reply<()>,
    },
    ReadSector {
        index: usize,
        key: Option<String>,
        reply: Reply<Vec<u8>>,
    },
    ReadAll {
        key: Option<String>,
        reply: Reply<Vec<Vec<u8>>>,
    },
}

/// Handle to a session running on its own serial worker task.
pub struct NfcService {
    commands: mpsc::UnboundedSender<Command>,
    worker: JoinHandle<()>,
}

impl NfcService {
    /// Create the session and spawn its worker. Call once at attach time.
    pub fn spawn<R: ReaderMode + 'static>(reader: R) -> Self {
        let (commands, queue) = mpsc::unbounded_channel();
        let session = TagSession::new(reader);
        let worker = tokio::spawn(run_worker(session, queue));
        NfcService { commands, worker }
    }

    /// Abort the worker and release everything. Call at detach time.
    /// Any in-flight operation fails with `SessionNotActive`.
    pub fn detach(self) {
        debug!("detaching NFC service");
        self.worker.abort();
    }

    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Result<T, NfcError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .map_err(|_| NfcError::SessionNotActive)?;
        response.await.map_err(|_| NfcError::SessionNotActive)?
    }

    pub async fn get_availability(&self) -> Result<Availability, NfcError> {
        self.request(|reply| Command::GetAvailability { reply }).await
    }

    pub async fn poll(&self, options: PollOptions) -> Result<TagDescriptor, NfcError> {
        self.request(|reply| Command::Poll { options, reply }).await
    }

    pub async fn finish(
        &self,
        alert_message: Option<String>,
        error_message: Option<String>,
    ) -> Result<(), NfcError> {
        self.request(|reply| Command::Finish {
            alert_message,
            error_message,
            reply,
        })
        .await
    }

    pub async fn transceive(
        &self,
        data: TransceiveData,
        timeout: Option<Duration>,
    ) -> Result<TransceiveData, NfcError> {
        self.request(|reply| Command::Transceive {
            data,
            timeout,
            reply,
        })
        .await
    }

    pub async fn read_ndef(&self, cached: bool) -> Result<Vec<NdefRecord>, NfcError> {
        self.request(|reply| Command::ReadNdef { cached, reply }).await
    }

    pub async fn write_ndef(&self, records: Vec<NdefRecord>) -> Result<(), NfcError> {
        self.request(|reply| Command::WriteNdef { records, reply }).await
    }

    pub async fn make_ndef_read_only(&self) -> Result<(), NfcError> {
        self.request(|reply| Command::MakeNdefReadOnly { reply }).await
    }

    pub async fn authenticate_sector(
        &self,
        index: usize,
        key_a: Option<String>,
        key_b: Option<String>,
    ) -> Result<bool, NfcError> {
        self.request(|reply| Command::AuthenticateSector {
            index,
            key_a,
            key_b,
            reply,
        })
        .await
    }

    pub async fn read_block(&self, index: usize, key: Option<String>) -> Result<Vec<u8>, NfcError> {
        self.request(|reply| Command::ReadBlock { index, key, reply }).await
    }

    pub async fn write_block(
        &self,
        index: usize,
        data: Vec<u8>,
        key: Option<String>,
    ) -> Result<(), NfcError> {
        self.request(|reply| Command::WriteBlock {
            index,
            data,
            key,
            reply,
        })
        .await
    }

    pub async fn read_sector(
        &self,
        index: usize,
        key: Option<String>,
    ) -> Result<Vec<u8>, NfcError> {
        self.request(|reply| Command::ReadSector { index, key, reply })
            .await
    }

    pub async fn read_all(&self, key: Option<String>) -> Result<Vec<Vec<u8>>, NfcError> {
        self.request(|reply| Command::ReadAll { key, reply }).await
    }
}

async fn run_worker<R: ReaderMode>(
    mut session: TagSession<R>,
    mut queue: mpsc::UnboundedReceiver<Command>,
) {
    // submission order is execution order; nothing here runs concurrently
    while let Some(command) = queue.recv().await {
        match command {
            Command::GetAvailability { reply } => {
                let _ = reply.send(Ok(session.availability()));
            }
            Command::Poll { options, reply } => {
                let _ = reply.send(session.poll(options).await);
            }
            Command::Finish {
                alert_message,
                error_message,
                reply,
            } => {
                let _ = reply.send(
                    session.finish(alert_message.as_deref(), error_message.as_deref()),
                );
            }
            Command::Transceive {
                data,
                timeout,
                reply,
            } => {
                let _ = reply.send(session.transceive(&data, timeout));
            }
            Command::ReadNdef { cached, reply } => {
                let _ = reply.send(session.read_ndef(cached));
            }
            Command::WriteNdef { records, reply } => {
                let _ = reply.send(session.write_ndef(&records));
            }
            Command::MakeNdefReadOnly { reply } => {
                let _ = reply.send(session.make_ndef_read_only());
            }
            Command::AuthenticateSector {
                index,
                key_a,
                key_b,
                reply,
            } => {
                let _ = reply.send(session.authenticate_sector(
                    index,
                    key_a.as_deref(),
                    key_b.as_deref(),
                ));
            }
            Command::ReadBlock { index, key, reply } => {
                let _ = reply.send(session.read_block(index, key.as_deref()));
            }
            Command::WriteBlock {
                index,
                data,
                key,
                reply,
            } => {
                let _ = reply.send(session.write_block(index, &data, key.as_deref()));
            }
            Command::ReadSector { index, key, reply } => {
                let _ = reply.send(session.read_sector(index, key.as_deref()));
            }
            Command::ReadAll { key, reply } => {
                let _ = reply.send(session.read_all(key.as_deref()));
            }
        }
    }
    session.shutdown();
}
