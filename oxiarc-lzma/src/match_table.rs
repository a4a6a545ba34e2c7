//! The match-finder boundary.
//!
//! The encoder core never finds matches itself; it consults a read-only
//! oracle indexed by absolute position, as described in §6 of the design
//! spec this crate implements. [`MatchTable`] is that oracle's contract —
//! grounded in `RMF_getMatch`/`RMF_getNextMatch` from
//! `original_source/lzma2_enc.c`, which abstract over the radix
//! match-finder's "struct" vs. "flat link" physical table layouts.
//!
//! Production match-finding (the radix/hash match-finder itself) is out of
//! scope for this crate; [`TestMatchTable`] is a minimal, correctness-first
//! implementation used by this crate's own round-trip tests and benches.

/// A single candidate match: `length` bytes copied from `dist` bytes
/// before the current position (`dist = 0` means the immediately
/// preceding byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RawMatch {
    /// Match length in bytes. `length < 2` means "no match".
    pub length: u32,
    /// Distance, 0-based.
    pub dist: u32,
}

impl RawMatch {
    /// The canonical "no match here" value.
    pub const NONE: Self = Self {
        length: 0,
        dist: 0,
    };

    /// Whether this is a usable match (`length >= 2`).
    pub fn is_some(&self) -> bool {
        self.length >= 2
    }
}

/// Read-only match-finder oracle, queried by absolute input position.
///
/// Implementations must be stable: calling `get_match`/`get_next_match`
/// repeatedly at the same position without an intervening `advance` must
/// return the same answer, matching the contract the reference encoder
/// relies on when composite-edge look-ahead re-queries a position it has
/// already passed once during `initOptimizerPos0`.
pub trait MatchTable {
    /// Best (longest) candidate match at absolute position `pos`.
    fn get_match(&self, pos: usize) -> RawMatch;

    /// All candidate matches at `pos`, sorted by increasing length (and
    /// therefore, for a well-formed match-finder, increasing distance).
    /// Used by the hybrid optimal parser to consider several (length,
    /// distance) pairs instead of only the longest. Returns empty when
    /// no match exists.
    fn get_matches(&self, pos: usize) -> Vec<RawMatch>;

    /// Upper bound on how far a match can reach from `pos` before running
    /// past the end of the data the table was built over.
    fn limit(&self) -> usize;
}

/// A minimal in-memory [`MatchTable`] built by brute-force longest-match
/// search. Not a production match-finder (`O(n^2)` worst case) — exists
/// so this crate's round-trip tests and benches have a correctness-first
/// oracle to drive the parser with, per §6's "match-finder is an external
/// collaborator" boundary.
pub struct TestMatchTable<'a> {
    data: &'a [u8],
    max_len: usize,
}

impl<'a> TestMatchTable<'a> {
    /// Build a table over `data`, capping match length search at `max_len`
    /// (LZMA's hard cap is 273).
    pub fn new(data: &'a [u8], max_len: usize) -> Self {
        Self {
            data,
            max_len: max_len.min(273),
        }
    }

    fn compute(&self, pos: usize) -> Vec<RawMatch> {
        let data = self.data;
        if pos >= data.len() {
            return Vec::new();
        }
        let avail = data.len() - pos;
        if avail < 2 {
            return Vec::new();
        }
        let max_len = avail.min(self.max_len);
        let mut best_by_len: Vec<RawMatch> = Vec::new();
        let mut best_len_so_far = 1usize;
        // Search every earlier position (bounded by a 1 MiB window to
        // keep this usable in tests on larger inputs).
        let window_start = pos.saturating_sub(1 << 20);
        for cand in window_start..pos {
            let max_possible = (pos - cand).min(max_len);
            if max_possible <= best_len_so_far {
                continue;
            }
            let mut len = 0usize;
            while len < max_possible && data[cand + len] == data[pos + len] {
                len += 1;
            }
            if len > best_len_so_far && len >= 2 {
                best_len_so_far = len;
                best_by_len.push(RawMatch {
                    length: len as u32,
                    dist: (pos - cand - 1) as u32,
                });
            }
        }
        best_by_len
    }
}

impl<'a> MatchTable for TestMatchTable<'a> {
    fn get_match(&self, pos: usize) -> RawMatch {
        self.get_matches(pos).last().copied().unwrap_or(RawMatch::NONE)
    }

    fn get_matches(&self, pos: usize) -> Vec<RawMatch> {
        self.compute(pos)
    }

    fn limit(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_match_at_start() {
        let data = b"abcdef";
        let table = TestMatchTable::new(data, 273);
        assert!(!table.get_match(0).is_some());
    }

    #[test]
    fn finds_repeat() {
        let data = b"abcabc";
        let table = TestMatchTable::new(data, 273);
        let m = table.get_match(3);
        assert!(m.is_some());
        assert_eq!(m.dist, 2);
        assert_eq!(m.length, 3);
    }
}
