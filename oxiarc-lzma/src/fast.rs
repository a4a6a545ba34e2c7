//! Greedy/lazy ("fast") parser: the `Strategy::Fast` match-selection
//! policy.
//!
//! Grounded in `original_source/lzma2_enc.c`'s `LZMA_encodeChunkFast`: at
//! each position, accept the primary match-finder's candidate only if it
//! clears a length/distance acceptance gate, let a rep-distance match
//! replace it when the rep is cheap enough relative to the match's own
//! distance, and defer to a one- or two-byte lookahead ("lazy matching")
//! when the very next position offers a meaningfully longer match.
//! Intermediate bytes between the previous emit and the chosen
//! instruction go out as literals, except where the byte happens to
//! equal the short-rep prediction, in which case a short-rep is cheaper.

use crate::config::Lzma2Parameters;
use crate::encode_ops::{encode_literal, encode_literal_matched, encode_normal_match, encode_rep_match};
use crate::match_table::MatchTable;
use crate::model::{LzmaModel, MATCH_LEN_MIN};
use crate::range_coder::RangeEncoder;

/// Per-length minimum distance below which a match this short is worth
/// taking; indices `0..3` are unused (no match shorter than
/// `MATCH_LEN_MIN` is ever considered). Grounded in SPEC_FULL.md §4.7
/// step 2 / `LZMA_encodeChunkFast`'s `maxDist` gate: short matches only
/// pay for themselves against a nearby rep-distance-sized window.
const MAX_DIST_BY_LEN: [u32; 5] = [0, 0, 0, 64, 16384];

/// Weight applied to a lookahead match's length advantage before it is
/// allowed to defer the current emit; grounded in `LZMA_encodeChunkFast`'s
/// `gain1`/`gain2` computation.
const LAZY_WEIGHT: usize = 4;

/// Greedy/lazy parser. Stateless beyond the shared [`LzmaModel`]; one
/// instance covers an entire encode since it carries no buffers of its
/// own.
#[derive(Debug, Default)]
pub struct FastParser;

impl FastParser {
    /// Encode input in `[anchor_pos, end_pos)` until either the chunk
    /// fills (`rc.is_full()`) or the range is exhausted. Returns the
    /// number of input bytes consumed.
    pub fn encode(
        &self,
        model: &mut LzmaModel,
        rc: &mut RangeEncoder,
        table: &dyn MatchTable,
        data: &[u8],
        anchor_pos: usize,
        end_pos: usize,
        params: &Lzma2Parameters,
    ) -> usize {
        let pos_mask = (1usize << model.props.pb) - 1;
        let mut pos = anchor_pos;

        while pos < end_pos && !rc.is_full() {
            let max_len = (end_pos - pos).min(params.fast_length as usize);

            let rep = best_rep_len(model, data, pos, max_len);
            let candidate = accepted_match(table, pos, max_len);

            // Rep-vs-match replacement test (step 4): a usable rep is
            // kept unless the match's own length/distance tradeoff beats
            // it under the documented `length*3 - dist` comparison.
            let chosen = match (rep.1 >= MATCH_LEN_MIN, candidate) {
                (true, Some((len, dist))) if replacement_favors_match(rep.1, len, dist) => Some(Emit::Match(dist, len)),
                (true, _) => Some(Emit::Rep(rep.0, rep.1)),
                (false, Some((len, dist))) => Some(Emit::Match(dist, len)),
                (false, None) => None,
            };

            let Some(mut chosen) = chosen else {
                self.emit_literal_or_short_rep(model, rc, data, pos);
                pos += 1;
                continue;
            };

            // Lazy step (step 5): look one and, length permitting, two
            // bytes ahead; defer to a literal now if the lookahead
            // position offers a sufficiently better instruction.
            if let Some(defer) = self.lazy_lookahead(model, table, data, pos, end_pos, params, &chosen) {
                let _ = defer;
                self.emit_literal_or_short_rep(model, rc, data, pos);
                pos += 1;
                continue;
            }

            match &mut chosen {
                Emit::Rep(index, len) => {
                    let ps = pos & pos_mask;
                    encode_rep_match(model, rc, ps, *index, *len);
                    pos += *len;
                }
                Emit::Match(dist, len) => {
                    let ps = pos & pos_mask;
                    encode_normal_match(model, rc, ps, *len, *dist);
                    pos += *len;
                }
            }
        }
        pos - anchor_pos
    }

    /// Emit a literal at `pos`, or a short-rep if the byte matches the
    /// rep0 prediction (SPEC_FULL.md §4.7 step 6).
    fn emit_literal_or_short_rep(&self, model: &mut LzmaModel, rc: &mut RangeEncoder, data: &[u8], pos: usize) {
        let byte = data[pos];
        let d = model.reps[0] as usize;
        let match_byte = if d + 1 <= pos { data[pos - d - 1] } else { 0 };
        if match_byte == byte {
            let pos_mask = (1usize << model.props.pb) - 1;
            encode_rep_match(model, rc, pos & pos_mask, 0, 1);
            return;
        }
        let prev = if pos == 0 { 0 } else { data[pos - 1] };
        if model.state.is_literal() {
            encode_literal(model, rc, pos as u64, prev, byte);
        } else {
            encode_literal_matched(model, rc, pos as u64, prev, byte, match_byte);
        }
    }

    /// One- (and, length permitting, two-) byte lookahead deciding
    /// whether to defer `chosen` in favor of a literal now. Returns
    /// `Some(())` when the lookahead instruction wins.
    fn lazy_lookahead(
        &self,
        model: &LzmaModel,
        table: &dyn MatchTable,
        data: &[u8],
        pos: usize,
        end_pos: usize,
        params: &Lzma2Parameters,
        chosen: &Emit,
    ) -> Option<()> {
        let chosen_len = chosen.len();
        if pos + 1 >= end_pos {
            return None;
        }
        let max_len1 = (end_pos - pos - 1).min(params.fast_length as usize);
        let rep1 = best_rep_len(model, data, pos + 1, max_len1);
        let match1 = accepted_match(table, pos + 1, max_len1);
        let best1 = rep1.1.max(match1.map(|(l, _)| l).unwrap_or(0));
        if best1 * LAZY_WEIGHT > chosen_len * LAZY_WEIGHT + 4 {
            return Some(());
        }

        if chosen_len >= 4 && pos + 2 < end_pos {
            let max_len2 = (end_pos - pos - 2).min(params.fast_length as usize);
            let rep2 = best_rep_len(model, data, pos + 2, max_len2);
            let match2 = accepted_match(table, pos + 2, max_len2);
            let best2 = rep2.1.max(match2.map(|(l, _)| l).unwrap_or(0));
            if best2 * LAZY_WEIGHT > chosen_len * LAZY_WEIGHT + 7 {
                return Some(());
            }
        }
        None
    }
}

/// An instruction the fast parser has committed to emitting.
enum Emit {
    Rep(usize, usize),
    Match(u32, usize),
}

impl Emit {
    fn len(&self) -> usize {
        match *self {
            Emit::Rep(_, len) | Emit::Match(_, len) => len,
        }
    }
}

/// Query the match-finder at `pos` and apply the length/distance
/// acceptance gate (SPEC_FULL.md §4.7 steps 1-2). Returns
/// `(length, dist)` on acceptance.
fn accepted_match(table: &dyn MatchTable, pos: usize, max_len: usize) -> Option<(usize, u32)> {
    let m = table.get_match(pos);
    if !m.is_some() || (m.length as usize) < MATCH_LEN_MIN {
        return None;
    }
    let len = (m.length as usize).min(max_len);
    if len < MATCH_LEN_MIN {
        return None;
    }
    let gate = MAX_DIST_BY_LEN.get(len).copied().unwrap_or(u32::MAX);
    if len >= 5 || m.dist < gate {
        Some((len, m.dist))
    } else {
        None
    }
}

/// SPEC_FULL.md §4.7 step 4: `rep_best.length*3 - rep_best.dist >
/// match.length*3 - floor(log2(match.dist+1)) + 1`, where a true rep's
/// notional distance cost is zero. Returns `true` when the match should
/// replace the rep.
fn replacement_favors_match(rep_len: usize, match_len: usize, match_dist: u32) -> bool {
    let rep_score = rep_len as i64 * 3;
    let match_log = 31 - (match_dist + 1).leading_zeros();
    let match_score = match_len as i64 * 3 - match_log as i64 + 1;
    !(rep_score > match_score)
}

/// Longest rep-match at `pos` over all four MRU distances, returned as
/// `(rep_index, length)`. `length == 0` means no rep match.
fn best_rep_len(model: &LzmaModel, data: &[u8], pos: usize, max_len: usize) -> (usize, usize) {
    let mut best = (0usize, 0usize);
    for (i, &d) in model.reps.iter().enumerate() {
        let dist = d as usize;
        if dist + 1 > pos {
            continue;
        }
        let base = pos - dist - 1;
        let mut len = 0usize;
        while len < max_len && pos + len < data.len() && data[base + len] == data[pos + len] {
            len += 1;
        }
        if len > best.1 {
            best = (i, len);
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Lzma2Parameters;
    use crate::match_table::TestMatchTable;
    use crate::model::{LzmaModel, LzmaProperties};
    use crate::range_coder::RangeEncoder;

    #[test]
    fn encodes_repetitive_text_without_panicking() {
        let data = b"the quick brown fox the quick brown fox the quick brown fox".repeat(3);
        let params = Lzma2Parameters::default_fast(1 << 16);
        let mut model = LzmaModel::new(LzmaProperties::new(params.lc, params.lp, params.pb));
        let mut rc = RangeEncoder::with_capacity(data.len());
        let table = TestMatchTable::new(&data, params.fast_length as usize);
        let parser = FastParser;

        let mut pos = 0;
        while pos < data.len() {
            let consumed = parser.encode(&mut model, &mut rc, &table, &data, pos, data.len(), &params);
            assert!(consumed > 0);
            pos += consumed;
        }
        assert!(!rc.is_empty());
        assert!(rc.len() < data.len());
    }

    #[test]
    fn handles_single_byte_input() {
        let data = b"Z";
        let params = Lzma2Parameters::default_fast(1 << 16);
        let mut model = LzmaModel::new(LzmaProperties::new(params.lc, params.lp, params.pb));
        let mut rc = RangeEncoder::with_capacity(16);
        let table = TestMatchTable::new(data, params.fast_length as usize);
        let parser = FastParser;
        let consumed = parser.encode(&mut model, &mut rc, &table, data, 0, data.len(), &params);
        assert_eq!(consumed, 1);
    }
}
