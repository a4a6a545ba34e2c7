//! Bit-level instruction encoders shared by the fast and optimal parsers.
//!
//! Each function here both emits bits through the range coder and updates
//! the probability models the price tables are derived from, the pairing
//! the design notes call out as the reason the coder, prices, and parser
//! are kept behind one owning handle (§9 "Cyclic module coupling").
//! Grounded in `LZMA_encodeLiteral`, `LZMA_encodeLiteralMatched`,
//! `LZMA_encodeLength`, `LZMA_encodeRepMatch`, and `LZMA_encodeNormalMatch`
//! from `original_source/lzma2_enc.c`.

use crate::model::{
    DIST_ALIGN_BITS, END_POS_MODEL_INDEX, LEN_HIGH_BITS, LEN_LOW_BITS, LEN_LOW_SYMBOLS,
    LEN_MID_BITS, LEN_MID_SYMBOLS, LzmaModel, MATCH_LEN_MIN, NUM_REPS, STATE_LIT_AFTER_MATCH,
    STATE_LIT_AFTER_REP,
};
use crate::price::get_dist_slot;
use crate::range_coder::RangeEncoder;

/// Encode a plain literal (the byte at a literal state).
pub fn encode_literal(model: &mut LzmaModel, rc: &mut RangeEncoder, pos: u64, prev_byte: u8, symbol: u8) {
    let idx = model.literal_state(pos, prev_byte);
    let probs = &mut model.literal.probs[idx];
    let mut sym = symbol as u32 | 0x100;
    while sym < 0x10000 {
        let bit = (sym >> 7) & 1;
        rc.encode_bit(&mut probs[(sym >> 8) as usize], bit);
        sym <<= 1;
    }
    model.state.update_literal();
}

/// Encode a matched literal (match-byte-guided prefix collapse), grounded
/// in `LZMA_encodeLiteralMatched`.
pub fn encode_literal_matched(
    model: &mut LzmaModel,
    rc: &mut RangeEncoder,
    pos: u64,
    prev_byte: u8,
    symbol: u8,
    match_byte: u8,
) {
    let idx = model.literal_state(pos, prev_byte);
    let probs = &mut model.literal.probs[idx];
    let mut offs = 0x100u32;
    let mut sym = symbol as u32 | 0x100;
    let mut mb = match_byte as u32;
    while sym < 0x10000 {
        mb <<= 1;
        let bit = (sym >> 7) & 1;
        let index = (offs + (mb & offs) + (sym >> 8)) as usize;
        rc.encode_bit(&mut probs[index], bit);
        sym <<= 1;
        offs &= !(mb ^ sym);
    }
    model.state.update_literal();
}

/// Encode `len` (already in `[2, 273]`) through the 3-tier low/mid/high
/// tree, grounded in `LZMA_encodeLength`.
pub fn encode_length(rc: &mut RangeEncoder, lm: &mut crate::model::LengthModel, pos_state: usize, len: usize) {
    let v = len - MATCH_LEN_MIN;
    if v < LEN_LOW_SYMBOLS {
        rc.encode_bit(&mut lm.choice, 0);
        rc.encode_bit_tree(&mut lm.low[pos_state], LEN_LOW_BITS, v as u32);
    } else {
        rc.encode_bit(&mut lm.choice, 1);
        let v = v - LEN_LOW_SYMBOLS;
        if v < LEN_MID_SYMBOLS {
            rc.encode_bit(&mut lm.choice2, 0);
            rc.encode_bit_tree(&mut lm.mid[pos_state], LEN_MID_BITS, v as u32);
        } else {
            rc.encode_bit(&mut lm.choice2, 1);
            let v = v - LEN_MID_SYMBOLS;
            rc.encode_bit_tree(&mut lm.high, LEN_HIGH_BITS, v as u32);
        }
    }
    lm.counter = lm.counter.saturating_sub(1);
}

/// Encode a rep match (`rep_index` in `0..=3`, `len >= 1`). Rotates the
/// rep MRU and advances `state`, grounded in `LZMA_encodeRepMatch`.
pub fn encode_rep_match(
    model: &mut LzmaModel,
    rc: &mut RangeEncoder,
    pos_state: usize,
    rep_index: usize,
    len: usize,
) {
    let state_idx = model.state.value();
    rc.encode_bit(&mut model.is_rep[state_idx], 1);
    if rep_index == 0 {
        rc.encode_bit(&mut model.is_rep0[state_idx], 0);
        rc.encode_bit(&mut model.is_rep0_long[state_idx][pos_state], if len == 1 { 0 } else { 1 });
    } else {
        rc.encode_bit(&mut model.is_rep0[state_idx], 1);
        let dist = model.reps[rep_index];
        if rep_index == 1 {
            rc.encode_bit(&mut model.is_rep1[state_idx], 0);
        } else {
            rc.encode_bit(&mut model.is_rep1[state_idx], 1);
            rc.encode_bit(&mut model.is_rep2[state_idx], (rep_index - 2) as u32);
        }
        // Rotate the MRU so the chosen distance moves to the front,
        // preserving the relative order of the others (§3 Rep-MRU).
        for i in (1..=rep_index).rev() {
            model.reps[i] = model.reps[i - 1];
        }
        model.reps[0] = dist;
    }

    if len == 1 {
        model.state.update_short_rep();
    } else {
        encode_length(rc, &mut model.rep_len, pos_state, len);
        model.state.update_long_rep();
    }
}

/// Encode a normal (non-rep) match at `dist` (0-based) and `len`,
/// grounded in `LZMA_encodeNormalMatch`. Pushes `dist` onto the rep MRU
/// and advances `state`.
pub fn encode_normal_match(model: &mut LzmaModel, rc: &mut RangeEncoder, pos_state: usize, len: usize, dist: u32) {
    let state_idx = model.state.value();
    rc.encode_bit(&mut model.is_match[state_idx][pos_state], 1);
    rc.encode_bit(&mut model.is_rep[state_idx], 0);
    encode_length(rc, &mut model.match_len, pos_state, len);

    let len_to_dist_state = crate::price::len_to_dist_state(len);
    let slot = get_dist_slot(dist);
    rc.encode_bit_tree(&mut model.distance.slot[len_to_dist_state], 6, slot);

    const START_POS_MODEL_INDEX: u32 = 4;
    if slot >= START_POS_MODEL_INDEX {
        let footer_bits = (slot >> 1) - 1;
        let base = (2 | (slot & 1)) << footer_bits;
        let reduced = dist - base;
        if slot < END_POS_MODEL_INDEX as u32 {
            // `decode_distance` in decoder.rs indexes `special` with its
            // own inline reverse-bit-tree walk starting at `base_idx`
            // (tree index `m=1` hitting `special[base_idx]` first), not
            // through `decode_bit_tree_reverse`'s own `index` starting at
            // 1. `encode_bit_tree_reverse` below does start its walk at
            // index 1, so the slice handed to it must begin one element
            // earlier than `base_idx` for the two to land on the same
            // cells.
            let base_idx = (slot as usize) - ((slot as usize) >> 1) - 1;
            let special_index = base_idx - 1;
            rc.encode_bit_tree_reverse(&mut model.distance.special[special_index..], footer_bits, reduced);
        } else {
            rc.encode_direct_bits(reduced >> DIST_ALIGN_BITS, footer_bits - DIST_ALIGN_BITS);
            rc.encode_bit_tree_reverse(
                &mut model.distance.align,
                DIST_ALIGN_BITS,
                reduced & ((1 << DIST_ALIGN_BITS) - 1),
            );
        }
    }

    for i in (1..NUM_REPS).rev() {
        model.reps[i] = model.reps[i - 1];
    }
    model.reps[0] = dist;
    model.state.update_match();
}

/// State reached for the second literal of a "rep + literal + rep0"
/// composite edge.
pub fn state_after_rep_for_composite() -> usize {
    STATE_LIT_AFTER_REP
}

/// State reached for the second literal of a "match + literal + rep0"
/// composite edge.
pub fn state_after_match_for_composite() -> usize {
    STATE_LIT_AFTER_MATCH
}
