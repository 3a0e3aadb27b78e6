//! Wire protocol error types.

use thiserror::Error;

/// Wire protocol errors
#[derive(Error, Debug)]
pub enum WireError {
    /// Unknown opcode byte
    #[error("unknown opcode {0}")]
    Opcode(u8),

    /// Application payload length above the configured limit
    #[error("payload length {len} exceeds limit {max}")]
    Size {
        /// Length announced by the prefix
        len: usize,
        /// Configured maximum
        max: usize,
    },

    /// Underlying stream error
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
