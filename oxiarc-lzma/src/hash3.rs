//! Secondary 3-byte hash-chain matcher used by the hybrid (`ultra`) optimal
//! parser to find short near matches the primary match-finder's longer
//! minimum length may miss.
//!
//! Grounded in `original_source/lzma2_enc.c`'s `HashChains`,
//! `LZMA_hashReset`, `LZMA_hashCreate`, `LZMA2_hashAlloc`, `GET_HASH_3`,
//! and `LZMA_hashGetMatches`.

use crate::match_table::RawMatch;
use oxiarc_core::error::{OxiArcError, Result};

/// Hash table width: 14-bit hash, matching `T[2^14]` in the reference
/// encoder.
const HASH_3_BITS: u32 = 14;
const HASH_3_SIZE: usize = 1 << HASH_3_BITS;

/// 3-byte hash, grounded in `GET_HASH_3`:
/// `((read_le32(p) << 8) * 0x1E36_1E9D) >> (32 - 14)`.
fn hash3(data: &[u8]) -> usize {
    let word = u32::from_le_bytes([data[0], data[1], data[2], 0]);
    (((word << 8) as u32).wrapping_mul(0x1E36_1E9D) >> (32 - HASH_3_BITS)) as usize
}

/// Hash-chain table for the 3-byte secondary matcher.
pub struct HashChains {
    /// Maps a hash bucket to the most recent absolute position with that
    /// hash.
    table_3: Vec<i64>,
    /// Chained previous-position-with-same-hash links, indexed by
    /// `pos & mask`.
    chain: Vec<i64>,
    /// `second_dict_bits`: chain size is `1 << mask_bits`.
    mask_bits: u32,
    /// Cursor tracking how far the chain has been back-filled, per §9's
    /// "hash-3 back-fill" note: every position the parser passes must
    /// update the chain, not only queried ones.
    hash_prev_index: i64,
}

impl HashChains {
    /// Allocate a hash-chain table. `second_dict_bits` must be in
    /// `[4, 14]`; the caller is expected to have already clamped it
    /// (see [`crate::config::Lzma2Parameters`]).
    pub fn new(second_dict_bits: u32) -> Result<Self> {
        if !(4..=14).contains(&second_dict_bits) {
            return Err(OxiArcError::internal(
                "second_dict_bits out of range for hash-3 chain",
            ));
        }
        let chain_size = 1usize << second_dict_bits;
        Ok(Self {
            table_3: vec![-1; HASH_3_SIZE],
            chain: vec![-1; chain_size],
            mask_bits: second_dict_bits,
            hash_prev_index: -1,
        })
    }

    /// Reset all hash/chain entries to empty and rewind the back-fill
    /// cursor. Called on a dictionary reset.
    pub fn reset(&mut self) {
        self.table_3.fill(-1);
        self.chain.fill(-1);
        self.hash_prev_index = -1;
    }

    fn mask(&self) -> usize {
        (1usize << self.mask_bits) - 1
    }

    /// Insert position `pos` into the chain without searching for
    /// matches. Used to back-fill positions the parser skipped over
    /// without querying (§9).
    pub fn insert(&mut self, data: &[u8], pos: usize) {
        if pos + 3 > data.len() {
            return;
        }
        let h = hash3(&data[pos..]);
        let prev = self.table_3[h];
        self.chain[pos & self.mask()] = prev;
        self.table_3[h] = pos as i64;
        self.hash_prev_index = pos as i64;
    }

    /// Back-fill every position in `(hash_prev_index, upto)` that the
    /// parser advanced past without querying, then insert `upto` itself.
    pub fn catch_up_and_insert(&mut self, data: &[u8], upto: usize) {
        let mut p = (self.hash_prev_index + 1).max(0) as usize;
        while p < upto {
            self.insert(data, p);
            p += 1;
        }
        self.insert(data, upto);
    }

    /// Walk the hash-3 chain at `pos`, extending every candidate into a
    /// full match and keeping monotonically increasing lengths.
    /// Grounded in `LZMA_hashGetMatches`.
    ///
    /// `match_cycles` bounds how many chain links are followed.
    /// `primary_dist`, when `Some`, further bounds the walk to candidates
    /// at least as close as the primary match-finder's best distance
    /// (there is no point considering a hash-3 candidate farther away
    /// than a match the primary finder already found).
    pub fn get_matches(
        &mut self,
        data: &[u8],
        pos: usize,
        max_len: usize,
        match_cycles: u32,
        primary_dist: Option<u32>,
    ) -> Vec<RawMatch> {
        self.catch_up_and_insert(data, pos);

        let mut out = Vec::new();
        if pos + 3 > data.len() || max_len < 3 {
            return out;
        }
        let h = hash3(&data[pos..]);
        let mut link = self.table_3[h];
        // Exclude the entry we just inserted for `pos` itself.
        if link == pos as i64 {
            link = self.chain[pos & self.mask()];
        }

        let dict_window = 1i64 << self.mask_bits;
        let lower_bound = (pos as i64 - dict_window).max(0);
        let lower_bound = match primary_dist {
            Some(d) => lower_bound.max(pos as i64 - d as i64 - 1),
            None => lower_bound,
        };

        let mut best_len = 2usize;
        let mut cycles = match_cycles;
        while link >= lower_bound && cycles > 0 {
            cycles -= 1;
            let cand = link as usize;
            if cand >= pos {
                link = self.chain[cand & self.mask()];
                continue;
            }
            let avail = (data.len() - pos).min(max_len);
            let mut len = 0usize;
            while len < avail && data[cand + len] == data[pos + len] {
                len += 1;
            }
            if len > best_len {
                best_len = len;
                out.push(RawMatch {
                    length: len as u32,
                    dist: (pos - cand - 1) as u32,
                });
                if len >= max_len {
                    break;
                }
            }
            link = self.chain[cand & self.mask()];
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_dict_bits() {
        assert!(HashChains::new(3).is_err());
        assert!(HashChains::new(15).is_err());
        assert!(HashChains::new(14).is_ok());
    }

    #[test]
    fn finds_repeated_trigram() {
        let data = b"xyzxyzabcxyz";
        let mut hc = HashChains::new(10).unwrap();
        for p in 0..3 {
            hc.insert(data, p);
        }
        let matches = hc.get_matches(data, 3, 273, 64, None);
        assert!(matches.iter().any(|m| m.dist == 2));
    }
}
