//! Stream codec and payload codecs for the wire protocol.
//!
//! [`WireCodec`] plugs the frame decoder into `tokio_util::codec` so a read
//! half can be driven as a stream of [`WireMessage`] values and a write half
//! as a sink. [`PayloadCodec`] turns structured application messages into the
//! plaintext that the crypto session encrypts.

use crate::frame::{FrameDecoder, WireMessage};
use bytes::BytesMut;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::marker::PhantomData;
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

/// `tokio_util` codec over [`FrameDecoder`]
#[derive(Debug, Clone, Default)]
pub struct WireCodec {
    decoder: FrameDecoder,
}

impl WireCodec {
    /// Create a codec with the default payload limit
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a codec with a custom payload limit
    pub fn with_max_payload_size(max_payload_size: usize) -> Self {
        Self {
            decoder: FrameDecoder::with_max_payload_size(max_payload_size),
        }
    }
}

impl Decoder for WireCodec {
    type Item = WireMessage;
    type Error = crate::WireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        self.decoder.decode(src)
    }
}

impl Encoder<WireMessage> for WireCodec {
    type Error = crate::WireError;

    fn encode(&mut self, item: WireMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if let WireMessage::Message(cipher) | WireMessage::Raw(cipher) = &item {
            let max = self.decoder.max_payload_size();
            if cipher.len() > max {
                return Err(crate::WireError::Size {
                    len: cipher.len(),
                    max,
                });
            }
        }
        item.encode(dst)
    }
}

/// Serialization of structured application messages
pub trait PayloadCodec: Send + Sync + 'static {
    /// Message type carried on the structured channel
    type Message: Clone + fmt::Debug + Send + Sync + 'static;

    /// Serialize a message to plaintext bytes
    fn encode(&self, message: &Self::Message) -> Result<Vec<u8>, CodecError>;

    /// Deserialize plaintext bytes into a message
    fn decode(&self, bytes: &[u8]) -> Result<Self::Message, CodecError>;
}

/// JSON payload codec backed by `serde_json`
pub struct JsonCodec<T = serde_json::Value> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    /// Create a JSON codec
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonCodec<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for JsonCodec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("JsonCodec")
    }
}

impl<T> PayloadCodec for JsonCodec<T>
where
    T: Serialize + DeserializeOwned + Clone + fmt::Debug + Send + Sync + 'static,
{
    type Message = T;

    fn encode(&self, message: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(message).map_err(CodecError::Encode)
    }

    fn decode(&self, bytes: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(bytes).map_err(CodecError::Decode)
    }
}

/// Payload codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    /// Message could not be serialized
    #[error("payload encoding failed: {0}")]
    Encode(#[source] serde_json::Error),
    /// Bytes are not a valid message
    #[error("payload decoding failed: {0}")]
    Decode(#[source] serde_json::Error),
    /// Codec-specific failure
    #[error("payload codec error: {0}")]
    Other(String),
}
