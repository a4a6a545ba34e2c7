//! # OxiArc LZMA
//!
//! The core of an LZMA2 encoder: an adaptive binary range coder, a
//! dual-strategy parser (greedy/lazy "fast" and a dynamic-programming
//! "optimal" strategy, with an optional hash-3 hybrid mode), and the
//! LZMA2 chunk framer that ties them together.
//!
//! ## Features
//!
//! - **Pure Rust** implementation
//! - Range coder for entropy coding
//! - Probability-based context modeling
//! - Greedy/lazy and dynamic-programming parsers, selectable per
//!   [`config::Strategy`]
//! - LZMA2 chunk framing, including cross-chunk state continuation and
//!   stored (uncompressed) chunk fallback
//!
//! Finding matches is not this crate's job: the parsers consult a
//! read-only [`match_table::MatchTable`] the caller supplies. See that
//! module for why, and [`match_table::TestMatchTable`] for the
//! correctness-first stand-in this crate's own tests use.
//!
//! ## Usage
//!
//! ### Decompression
//!
//! ```ignore
//! use oxiarc_lzma::decode_lzma2;
//!
//! let compressed = include_bytes!("data.lzma2");
//! let decompressed = decode_lzma2(compressed, 1 << 20)?;
//! ```
//!
//! ### Compression
//!
//! ```ignore
//! use oxiarc_lzma::{Lzma2Encoder, LzmaLevel, match_table::TestMatchTable};
//!
//! let data = b"Hello, World!";
//! let table = TestMatchTable::new(data, 273);
//! let encoder = Lzma2Encoder::new(LzmaLevel::DEFAULT);
//! let compressed = encoder.encode(data, &table)?;
//! ```
//!
//! ## LZMA2 chunk format
//!
//! An LZMA2 stream is a sequence of chunks, each led by a control byte:
//! - `0x00`: end of stream
//! - `0x01`/`0x02`: stored chunk, with/without a dictionary reset
//! - `0x80..=0xFF`: LZMA-compressed chunk, with reset flags and the
//!   high bits of the uncompressed size packed into the low 5 bits
//!
//! See [`lzma2`] for the exact field layout and size limits.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod decoder;
pub mod encode_ops;
pub mod fast;
pub mod hash3;
pub mod lzma2;
pub mod match_table;
pub mod model;
pub mod optimal;
pub mod price;
pub mod range_coder;

// Re-exports
pub use config::{Lzma2Parameters, Strategy};
pub use decoder::{LzmaDecoder, decompress, decompress_raw};
pub use fast::FastParser;
pub use lzma2::{
    LZMA_CHUNK_MAX_COMPRESSED, LZMA_CHUNK_MAX_UNCOMPRESSED, Lzma2Decoder, Lzma2Encoder,
    UNCOMPRESSED_CHUNK_MAX, decode_lzma2, dict_size_from_props, encode_lzma2, props_from_dict_size,
};
pub use match_table::{MatchTable, RawMatch, TestMatchTable};
pub use model::{LzmaModel, LzmaProperties, State};
pub use optimal::OptimalParser;
pub use range_coder::{RangeDecoder, RangeEncoder};

use oxiarc_core::error::Result;

/// LZMA compression level, a coarse `0..=9` knob mapped onto
/// [`Lzma2Parameters`] by [`Lzma2Encoder::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LzmaLevel(u8);

impl LzmaLevel {
    /// Fastest compression (level 0).
    pub const FAST: Self = Self(0);
    /// Default compression (level 6).
    pub const DEFAULT: Self = Self(6);
    /// Best compression (level 9).
    pub const BEST: Self = Self(9);

    /// Create a new compression level.
    pub fn new(level: u8) -> Self {
        Self(level.min(9))
    }

    /// Get the level value.
    pub fn level(&self) -> u8 {
        self.0
    }

    /// Get the dictionary size for this level.
    pub fn dict_size(&self) -> u32 {
        match self.0 {
            0 => 1 << 16, // 64 KB
            1 => 1 << 18, // 256 KB
            2 => 1 << 19, // 512 KB
            3 => 1 << 20, // 1 MB
            4 => 1 << 21, // 2 MB
            5 => 1 << 22, // 4 MB
            6 => 1 << 23, // 8 MB
            7 => 1 << 24, // 16 MB
            8 => 1 << 25, // 32 MB
            _ => 1 << 26, // 64 MB
        }
    }
}

impl Default for LzmaLevel {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Decompress an LZMA2 stream to a `Vec`.
///
/// Convenience wrapper around [`decode_lzma2`] for callers who already
/// have the whole stream in memory.
pub fn decompress_bytes(data: &[u8], dict_size: u32) -> Result<Vec<u8>> {
    decode_lzma2(data, dict_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::match_table::TestMatchTable;

    fn roundtrip(data: &[u8], level: LzmaLevel) -> Vec<u8> {
        let table = TestMatchTable::new(data, 273);
        let encoder = Lzma2Encoder::new(level);
        let encoded = encoder.encode(data, &table).unwrap();
        decode_lzma2(&encoded, encoder.dict_size().max(4096)).unwrap()
    }

    fn roundtrip_with_params(data: &[u8], params: Lzma2Parameters) -> Vec<u8> {
        let table = TestMatchTable::new(data, 273);
        let encoder = Lzma2Encoder::with_params(params);
        let encoded = encoder.encode(data, &table).unwrap();
        decode_lzma2(&encoded, params.dict_size.max(4096)).unwrap()
    }

    #[test]
    fn test_level() {
        assert_eq!(LzmaLevel::FAST.level(), 0);
        assert_eq!(LzmaLevel::DEFAULT.level(), 6);
        assert_eq!(LzmaLevel::BEST.level(), 9);
    }

    #[test]
    fn test_level_clamp() {
        assert_eq!(LzmaLevel::new(100).level(), 9);
    }

    #[test]
    fn test_dict_size() {
        assert_eq!(LzmaLevel::FAST.dict_size(), 1 << 16);
        assert_eq!(LzmaLevel::DEFAULT.dict_size(), 1 << 23);
        assert_eq!(LzmaLevel::BEST.dict_size(), 1 << 26);
    }

    #[test]
    fn test_properties_roundtrip() {
        let props = LzmaProperties::new(3, 0, 2);
        let byte = props.to_byte();
        let decoded = LzmaProperties::from_byte(byte).unwrap();

        assert_eq!(decoded.lc, 3);
        assert_eq!(decoded.lp, 0);
        assert_eq!(decoded.pb, 2);
    }

    #[test]
    fn test_compress_decompress_empty() {
        let original: &[u8] = b"";
        assert_eq!(roundtrip(original, LzmaLevel::DEFAULT), original);
    }

    #[test]
    fn test_compress_decompress_single_byte() {
        let original = b"A";
        assert_eq!(roundtrip(original, LzmaLevel::DEFAULT), original);
    }

    #[test]
    fn test_compress_decompress_few_bytes() {
        let original = b"ABC";
        assert_eq!(roundtrip(original, LzmaLevel::DEFAULT), original);
    }

    #[test]
    fn test_compress_decompress_hello() {
        let original = b"Hello";
        assert_eq!(roundtrip(original, LzmaLevel::DEFAULT), original);
    }

    #[test]
    fn test_compress_decompress_roundtrip() {
        let original = b"Hello, LZMA World! This is a test of compression and decompression.";
        assert_eq!(roundtrip(original, LzmaLevel::DEFAULT), original);
    }

    #[test]
    fn test_compress_decompress_repeated() {
        let original = vec![b'A'; 1000];
        assert_eq!(roundtrip(&original, LzmaLevel::DEFAULT), original);
    }

    #[test]
    fn test_compression_levels() {
        let data = b"Hello World! This is a test of LZMA compression with various levels.";
        for level in 0..=9 {
            let decompressed = roundtrip(data, LzmaLevel::new(level));
            assert_eq!(&decompressed[..], &data[..], "Level {} roundtrip failed", level);
        }
    }

    #[test]
    fn test_optimal_vs_fast_parsing() {
        let mut data = Vec::new();
        for _ in 0..10 {
            data.extend_from_slice(b"The quick brown fox jumps over the lazy dog. ");
        }

        let compressed_fast = {
            let table = TestMatchTable::new(&data, 273);
            Lzma2Encoder::with_params(Lzma2Parameters::default_fast(1 << 20))
                .encode(&data, &table)
                .unwrap()
        };
        let compressed_optimal = {
            let table = TestMatchTable::new(&data, 273);
            Lzma2Encoder::with_params(Lzma2Parameters::default_opt(1 << 20))
                .encode(&data, &table)
                .unwrap()
        };

        assert_eq!(decode_lzma2(&compressed_fast, 1 << 20).unwrap(), data);
        assert_eq!(decode_lzma2(&compressed_optimal, 1 << 20).unwrap(), data);
    }

    #[test]
    fn test_ultra_strategy_roundtrip() {
        let original = b"abcabcabcabcxyzxyzxyz".repeat(50);
        let params = Lzma2Parameters::default_ultra(1 << 20);
        assert_eq!(roundtrip_with_params(&original, params), original);
    }

    #[test]
    fn test_incompressible_data_falls_back_to_stored() {
        // Pseudo-random bytes via a simple LCG: no repeats for the
        // parser to exploit, so the encoder should prefer stored chunks.
        let mut seed = 0x2545F4914F6CDD1Du64;
        let original: Vec<u8> = (0..5000)
            .map(|_| {
                seed ^= seed << 13;
                seed ^= seed >> 7;
                seed ^= seed << 17;
                (seed & 0xFF) as u8
            })
            .collect();
        assert_eq!(roundtrip(&original, LzmaLevel::DEFAULT), original);
    }

    #[test]
    fn test_level_9_compression() {
        let original = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ".repeat(20);
        assert_eq!(roundtrip(&original, LzmaLevel::BEST), original);
    }

    #[test]
    fn test_level_8_compression() {
        let original = b"Testing level 8 compression with optimal parsing enabled.".repeat(10);
        assert_eq!(roundtrip(&original, LzmaLevel::new(8)), original);
    }
}
