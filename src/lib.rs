//! Short-lived communication sessions with contactless (NFC) tags:
//! polling with timeout and collision handling, technology classification,
//! raw transceive with per-technology framing, NDEF messages, and
//! MIFARE Classic/Ultralight memory access.

pub mod data;
pub mod error;
pub mod mifare;
pub mod ndef;
pub mod reader;
pub mod service;
pub mod session;
pub mod tag;
pub mod transceive;

pub use data::TransceiveData;
pub use error::NfcError;
pub use service::NfcService;
pub use session::{PollOptions, TagSession};
pub use tag::TagDescriptor;
