//! Opcode framing, length-prefixed message units, and payload codecs for conduit.
//!
//! This crate provides the low-level wire format of a conduit session: the
//! one-byte opcode that leads every message unit, the decoder that splits a
//! byte stream into units, and the codecs that turn application messages into
//! plaintext for the crypto layer.
//!
//! ## Wire Format
//!
//! ```text
//! Connect / ConnectOk / Disconnect
//! +-----------+
//! | opcode:1  |
//! +-----------+
//!
//! Ping / PingOk
//! +-----------+-----------+
//! | opcode:1  | token:1   |
//! +-----------+-----------+
//!
//! Message / Raw
//! +-----------+-----------------+---------------------+
//! | opcode:1  | u32 len (BE)    | ciphertext (len)    |
//! +-----------+-----------------+---------------------+
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod error;
pub mod frame;
pub mod opcode;

// Re-export main types
pub use codec::{CodecError, JsonCodec, PayloadCodec, WireCodec};
pub use error::WireError;
pub use frame::{FrameDecoder, WireMessage, DEFAULT_MAX_PAYLOAD_SIZE, LENGTH_PREFIX_SIZE};
pub use opcode::Opcode;
