//! Error types for OxiArc codec crates.
//!
//! This module provides the error type shared by the LZMA2 encoder core and
//! its test-support decoder: I/O errors from the underlying reader/writer,
//! stream validation errors raised while decoding test fixtures, and the
//! three failure kinds the encoder core itself can raise.

use std::io;
use thiserror::Error;

/// The main error type for OxiArc codec operations.
#[derive(Debug, Error)]
pub enum OxiArcError {
    /// I/O error from underlying reader/writer.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Corrupted data in a compressed stream.
    #[error("Corrupted data at offset {offset}: {message}")]
    CorruptedData {
        /// Byte offset where corruption was detected.
        offset: u64,
        /// Description of the corruption.
        message: String,
    },

    /// Invalid header format.
    #[error("Invalid header: {message}")]
    InvalidHeader {
        /// Description of the header error.
        message: String,
    },

    /// Unexpected end of file.
    #[error("Unexpected end of file: expected {expected} more bytes")]
    UnexpectedEof {
        /// Number of bytes that were expected but not available.
        expected: usize,
    },

    /// Buffer too small for operation.
    #[error("Buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall {
        /// Number of bytes needed.
        needed: usize,
        /// Number of bytes available.
        available: usize,
    },

    /// Invalid distance in LZ77/LZSS back-reference.
    #[error("Invalid back-reference distance: {distance} exceeds history size {history_size}")]
    InvalidDistance {
        /// The invalid distance value.
        distance: usize,
        /// Current history buffer size.
        history_size: usize,
    },

    /// The encoder could not allocate the hash-3 chain table.
    #[error("memory allocation failed: {context}")]
    MemoryAllocation {
        /// What was being allocated.
        context: String,
    },

    /// An encoder invariant was violated; this indicates a bug rather than
    /// bad input, since the parser loop is structurally bounded by
    /// `chunk_size`.
    #[error("internal encoder error: {message}")]
    Internal {
        /// Description of the violated invariant.
        message: String,
    },

    /// The caller's cancellation flag was observed set between chunks.
    #[error("encoding canceled")]
    Canceled,
}

/// Result type alias for OxiArc codec operations.
pub type Result<T> = std::result::Result<T, OxiArcError>;

impl OxiArcError {
    /// Create a corrupted data error.
    pub fn corrupted(offset: u64, message: impl Into<String>) -> Self {
        Self::CorruptedData {
            offset,
            message: message.into(),
        }
    }

    /// Create an invalid header error.
    pub fn invalid_header(message: impl Into<String>) -> Self {
        Self::InvalidHeader {
            message: message.into(),
        }
    }

    /// Create an unexpected EOF error.
    pub fn unexpected_eof(expected: usize) -> Self {
        Self::UnexpectedEof { expected }
    }

    /// Create a buffer too small error.
    pub fn buffer_too_small(needed: usize, available: usize) -> Self {
        Self::BufferTooSmall { needed, available }
    }

    /// Create an invalid distance error.
    pub fn invalid_distance(distance: usize, history_size: usize) -> Self {
        Self::InvalidDistance {
            distance,
            history_size,
        }
    }

    /// Create a memory allocation error.
    pub fn memory_allocation(context: impl Into<String>) -> Self {
        Self::MemoryAllocation {
            context: context.into(),
        }
    }

    /// Create an internal invariant-violation error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create a cancellation error.
    pub fn canceled() -> Self {
        Self::Canceled
    }
}
