//! Basic usage example for the conduit wire format.

use bytes::{Bytes, BytesMut};
use conduit_wire::{FrameDecoder, JsonCodec, PayloadCodec, WireMessage};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Conduit Wire Format Example ===\n");

    // 1. Encode a handful of control units
    println!("1. Encoding control units...");
    let mut buf = BytesMut::new();
    WireMessage::Connect.encode(&mut buf)?;
    WireMessage::Ping(42).encode(&mut buf)?;
    println!("   {} bytes: {:02X?}", buf.len(), buf.as_ref());

    // 2. Encode a structured message (plaintext here, ciphertext on a live session)
    println!("\n2. Encoding a structured message...");
    let codec = JsonCodec::<serde_json::Value>::new();
    let plaintext = codec.encode(&serde_json::json!({ "x": 1 }))?;
    WireMessage::Message(Bytes::from(plaintext)).encode(&mut buf)?;
    println!("   buffer is now {} bytes", buf.len());

    // 3. Decode everything back
    println!("\n3. Decoding...");
    let mut decoder = FrameDecoder::new();
    while let Some(unit) = decoder.decode(&mut buf)? {
        match unit {
            WireMessage::Message(payload) => {
                let value = codec.decode(&payload)?;
                println!("   Message {}", value);
            }
            other => println!("   {:?}", other),
        }
    }

    Ok(())
}
