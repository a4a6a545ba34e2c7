//! Optimal (dynamic-programming) parser.
//!
//! Builds a shortest-path price graph over a fixed 2048-node buffer and
//! traces the cheapest path back to an instruction sequence. Grounded in
//! `original_source/lzma2_enc.c`'s `LZMA_initOptimizerPos0`,
//! `LZMA_optimalParse`, `LZMA_reverseOptimalChain`, and
//! `LZMA_encodeOptimumSequence`.
//!
//! Each [`OptimalNode`] carries the full `(state, reps)` reached by its
//! cheapest known edge rather than a back-pointer the parser re-derives
//! on demand, the way the reference encoder's pointer-chasing node
//! layout does. Trading a few bytes of node size for a direct lookup
//! keeps the relaxation loop free of the reference encoder's delicate
//! "reconstruct the predecessor's context" bookkeeping; see
//! `DESIGN.md`.
//!
//! Composite edges (§9 "Composite edges"): `extra == 0` is a plain edge
//! (`dist == NULL_DIST` literal, `dist < 4` rep index, otherwise
//! `dist - 4` is a normal distance); `extra == 1` is "literal then
//! rep0"; `extra > 1` is "<rep-or-match> then literal then rep0", where
//! `extra - 1` is the length of the first half and `len` is the length
//! of the trailing rep0.

use crate::config::{Lzma2Parameters, Strategy};
use crate::encode_ops::{encode_literal, encode_literal_matched, encode_normal_match, encode_rep_match};
use crate::hash3::HashChains;
use crate::match_table::{MatchTable, RawMatch};
use crate::model::{LzmaModel, MATCH_LEN_MIN, NUM_REPS, STATE_LIT_AFTER_MATCH, STATE_LIT_AFTER_REP};
use crate::price::{
    len_to_dist_state, price0, price1, price_literal, price_literal_matched, ALIGN_MASK,
    DistancePrices, INFINITY_PRICE, MIN_LIT_PRICE,
};
use crate::range_coder::RangeEncoder;
use oxiarc_core::error::Result;

/// Sentinel marking a literal edge in [`OptimalNode::dist`].
pub const NULL_DIST: u32 = u32::MAX;

/// Size of the optimal-parser node buffer.
pub const OPT_BUF_SIZE: usize = 2048;

/// How close to the end of `opt_buf` the parser stops relaxing further
/// and commits to the best node found so far (§4.8).
const OPT_END_SIZE: usize = 64;

/// One node of the price graph: the cheapest known way to reach this
/// offset from the anchor, and the context (`state`, `reps`) that edge
/// leaves behind.
#[derive(Debug, Clone, Copy)]
pub struct OptimalNode {
    /// Cumulative price to reach this node.
    pub price: u32,
    /// State after taking the edge into this node.
    pub state: crate::model::State,
    /// Rep-distance MRU after taking the edge into this node.
    pub reps: [u32; NUM_REPS],
    /// Length of the edge's trailing segment (1 for literal/rep/match
    /// with no composite prefix; the rep0 tail length for composites).
    pub len: u32,
    /// `NULL_DIST` for literal, `<4` for rep index, else `normal_dist + 4`.
    /// For composite edges this describes the *first* segment.
    pub dist: u32,
    /// Composite-edge encoding; see module docs.
    pub extra: u32,
}

impl OptimalNode {
    fn unset() -> Self {
        Self {
            price: INFINITY_PRICE,
            state: crate::model::State::new(),
            reps: [0; NUM_REPS],
            len: 0,
            dist: NULL_DIST,
            extra: 0,
        }
    }
}

/// A primitive emitted instruction. Literal vs. matched-literal is
/// decided at emit time from the live `model.state`, since by
/// construction it always matches what the DP assumed.
#[derive(Debug, Clone, Copy)]
enum Instr {
    Literal,
    Rep { index: usize, len: usize },
    Match { dist: u32, len: usize },
}

fn instr_len(instr: &Instr) -> usize {
    match *instr {
        Instr::Literal => 1,
        Instr::Rep { len, .. } | Instr::Match { len, .. } => len,
    }
}

/// Owns the fixed-size node buffer and the hybrid hash-3 matcher. Created
/// once per encoder and reused across every `encode_optimum_sequence`
/// call within a block, per §9 "Optimizer graph allocation".
pub struct OptimalParser {
    opt_buf: Vec<OptimalNode>,
    hash3: Option<HashChains>,
}

impl OptimalParser {
    /// Build a parser. Allocates the hash-3 chain only for
    /// [`Strategy::Ultra`].
    pub fn new(params: &Lzma2Parameters) -> Result<Self> {
        let hash3 = if matches!(params.strategy, Strategy::Ultra) {
            Some(HashChains::new(params.second_dict_bits)?)
        } else {
            None
        };
        Ok(Self {
            opt_buf: vec![OptimalNode::unset(); OPT_BUF_SIZE],
            hash3,
        })
    }

    fn is_hybrid(&self) -> bool {
        self.hash3.is_some()
    }

    /// Reset the hash-3 chain on a dictionary reset.
    pub fn reset_dict(&mut self) {
        if let Some(h) = &mut self.hash3 {
            h.reset();
        }
    }

    fn hash3_matches(&mut self, data: &[u8], pos: usize, max_len: usize, match_cycles: u32, primary_dist: Option<u32>) -> Vec<RawMatch> {
        match &mut self.hash3 {
            Some(h) => h.get_matches(data, pos, max_len, match_cycles, primary_dist),
            None => Vec::new(),
        }
    }

    /// Gather the candidate (length, dist) pairs to relax a normal match
    /// against at `pos`: the primary match-finder's match plus, in
    /// hybrid mode, any shorter hash-3 candidates, sorted by increasing
    /// length.
    fn gather_matches(&mut self, data: &[u8], pos: usize, max_len: usize, match_cycles: u32, primary: RawMatch) -> Vec<RawMatch> {
        if !primary.is_some() {
            return Vec::new();
        }
        if !self.is_hybrid() || primary.length < 3 || max_len < 4 {
            return vec![primary];
        }
        let mut v = self.hash3_matches(data, pos, max_len, match_cycles, Some(primary.dist));
        if v.last().map(|m| m.length) != Some(primary.length) {
            v.push(primary);
        }
        v.retain(|m| m.length >= MATCH_LEN_MIN as u32);
        v
    }

    /// Run the optimal parser starting at absolute position `anchor_pos`,
    /// encoding instructions until either the chunk fills (`rc.is_full()`)
    /// or `end_pos` is reached. Returns the number of input bytes
    /// consumed.
    #[allow(clippy::too_many_arguments)]
    pub fn encode_optimum_sequence(
        &mut self,
        model: &mut LzmaModel,
        rc: &mut RangeEncoder,
        prices: &mut DistancePrices,
        table: &dyn MatchTable,
        data: &[u8],
        anchor_pos: usize,
        end_pos: usize,
        params: &Lzma2Parameters,
    ) -> usize {
        let pos_mask = (1usize << model.props.pb) - 1;
        let mut pos = anchor_pos;

        while pos < end_pos && !rc.is_full() {
            for node in self.opt_buf.iter_mut() {
                *node = OptimalNode::unset();
            }
            self.opt_buf[0] = OptimalNode {
                price: 0,
                state: model.state,
                reps: model.reps,
                len: 0,
                dist: NULL_DIST,
                extra: 0,
            };

            let primary = table.get_match(pos);
            let bytes_avail = end_pos - pos;

            match self.init_optimizer_pos0(model, prices, data, pos, bytes_avail, params, primary) {
                InitResult::Immediate(len, dist) => {
                    self.emit_single(model, rc, data, pos, pos_mask, len, dist);
                    pos += len;
                }
                InitResult::Relax(mut len_end) => {
                    let boundary = OPT_BUF_SIZE - OPT_END_SIZE;
                    let mut cur = 1usize;
                    let mut early_stop = None;
                    while cur < len_end && cur < boundary {
                        if self.opt_buf[cur].price < INFINITY_PRICE {
                            let remaining = bytes_avail.saturating_sub(cur);
                            let (new_len_end, stop) = self.optimal_parse(model, prices, table, data, pos, cur, len_end, remaining, params);
                            len_end = new_len_end;
                            if stop.is_some() {
                                early_stop = stop;
                                break;
                            }
                        }
                        cur += 1;
                    }
                    let end = match early_stop {
                        Some(offset) => offset.min(OPT_BUF_SIZE - 1),
                        None if cur >= boundary => self.pick_boundary_stop(cur, len_end),
                        None => cur.min(len_end),
                    };
                    let instrs = self.reverse_optimal_chain(end);
                    let mut p = pos;
                    for instr in &instrs {
                        self.emit_instruction(model, rc, data, p, pos_mask, instr);
                        p += instr_len(instr);
                    }
                    pos = p;
                }
            }

            if model.match_len.counter == 0 {
                model.match_len.update_prices(1 << model.props.pb);
                prices.fill_distances(&model.distance.slot, &model.distance.special, &model.distance.align);
            }
            if model.rep_len.counter == 0 {
                model.rep_len.update_prices(1 << model.props.pb);
            }
        }
        pos - anchor_pos
    }

    fn emit_single(&self, model: &mut LzmaModel, rc: &mut RangeEncoder, data: &[u8], pos: usize, pos_mask: usize, len: usize, dist: u32) {
        if dist == NULL_DIST {
            self.emit_instruction(model, rc, data, pos, pos_mask, &Instr::Literal);
        } else if (dist as usize) < NUM_REPS {
            self.emit_instruction(model, rc, data, pos, pos_mask, &Instr::Rep { index: dist as usize, len });
        } else {
            self.emit_instruction(model, rc, data, pos, pos_mask, &Instr::Match { dist: dist - NUM_REPS as u32, len });
        }
    }

    fn emit_instruction(&self, model: &mut LzmaModel, rc: &mut RangeEncoder, data: &[u8], pos: usize, pos_mask: usize, instr: &Instr) {
        let ps = pos & pos_mask;
        match *instr {
            Instr::Literal => {
                let byte = data[pos];
                let prev = if pos == 0 { 0 } else { data[pos - 1] };
                if model.state.is_literal() {
                    encode_literal(model, rc, pos as u64, prev, byte);
                } else {
                    let d = model.reps[0] as usize;
                    let match_byte = if d + 1 <= pos { data[pos - d - 1] } else { 0 };
                    encode_literal_matched(model, rc, pos as u64, prev, byte, match_byte);
                }
            }
            Instr::Rep { index, len } => encode_rep_match(model, rc, ps, index, len),
            Instr::Match { dist, len } => encode_normal_match(model, rc, ps, len, dist),
        }
    }

    /// Node-0 seeding, grounded in `LZMA_initOptimizerPos0` /
    /// `LZMA_initMatchesPos0` / `LZMA_initMatchesPos0Best`.
    #[allow(clippy::too_many_arguments)]
    fn init_optimizer_pos0(
        &mut self,
        model: &mut LzmaModel,
        prices: &DistancePrices,
        data: &[u8],
        pos: usize,
        bytes_avail: usize,
        params: &Lzma2Parameters,
        primary: RawMatch,
    ) -> InitResult {
        let pos_state = pos & ((1usize << model.props.pb) - 1);
        let state = model.state;
        let reps = model.reps;

        let mut rep_lens = [0usize; NUM_REPS];
        let mut best_rep_len = 0usize;
        let mut best_rep_index = 0usize;
        for (i, &r) in reps.iter().enumerate() {
            let dist = r as usize;
            if dist + 1 > pos {
                continue;
            }
            let base = pos - dist - 1;
            let max_len = bytes_avail.min(params.fast_length as usize);
            let len = common_len(data, pos, base, max_len);
            rep_lens[i] = len;
            if len > best_rep_len {
                best_rep_len = len;
                best_rep_index = i;
            }
        }

        if best_rep_len >= MATCH_LEN_MIN && best_rep_len >= params.fast_length as usize {
            return InitResult::Immediate(best_rep_len, best_rep_index as u32);
        }
        if primary.is_some() && primary.length as usize >= params.fast_length as usize {
            return InitResult::Immediate(primary.length as usize, primary.dist + NUM_REPS as u32);
        }

        let cur_byte = data[pos];
        let match_byte = if reps[0] as usize + 1 <= pos { data[pos - reps[0] as usize - 1] } else { 0 };
        let prev_byte = if pos == 0 { 0 } else { data[pos - 1] };
        let lit_idx = model.literal_state(pos as u64, prev_byte);
        let lit_probs = &model.literal.probs[lit_idx];
        let is_match_prob = model.is_match[state.value()][pos_state];
        let is_rep_prob = model.is_rep[state.value()];

        let lit_price = price0(is_match_prob)
            + if state.is_literal() {
                price_literal(lit_probs, cur_byte)
            } else {
                price_literal_matched(lit_probs, cur_byte, match_byte)
            };
        self.opt_buf[1] = OptimalNode {
            price: lit_price,
            state: state.after_literal(),
            reps,
            len: 1,
            dist: NULL_DIST,
            extra: 0,
        };

        if match_byte == cur_byte {
            let short_rep_price = price1(is_match_prob) + price1(is_rep_prob) + model.rep_len1_price(state.value(), pos_state);
            if short_rep_price < self.opt_buf[1].price {
                self.opt_buf[1] = OptimalNode {
                    price: short_rep_price,
                    state: state.after_long_rep(),
                    reps,
                    len: 1,
                    dist: 0,
                    extra: 0,
                };
            }
        }

        let mut len_end = 1usize;
        let match_price = price1(is_match_prob);
        let rep_match_price = match_price + price1(is_rep_prob);

        for (i, &rlen) in rep_lens.iter().enumerate() {
            if rlen < MATCH_LEN_MIN {
                continue;
            }
            let rep_price = rep_match_price + model.rep_index_price(i, state.value(), pos_state);
            let mut reps2 = reps;
            let d = reps2[i];
            for k in (1..=i).rev() {
                reps2[k] = reps2[k - 1];
            }
            reps2[0] = d;
            let state2 = state.after_long_rep();
            for len in MATCH_LEN_MIN..=rlen {
                let p = rep_price + model.rep_len.price(pos_state, len - MATCH_LEN_MIN);
                if p < self.opt_buf[len].price {
                    self.opt_buf[len] = OptimalNode { price: p, state: state2, reps: reps2, len: len as u32, dist: i as u32, extra: 0 };
                }
            }
            len_end = len_end.max(rlen);
        }

        if primary.is_some() {
            let max_len = bytes_avail.min(params.fast_length as usize);
            let candidates = self.gather_matches(data, pos, max_len, params.match_cycles, primary);
            let normal_match_price = match_price + price0(is_rep_prob);
            let start_len = MATCH_LEN_MIN;
            for m in &candidates {
                if (m.length as usize) < start_len {
                    continue;
                }
                let mut reps2 = reps;
                for k in (1..NUM_REPS).rev() {
                    reps2[k] = reps2[k - 1];
                }
                reps2[0] = m.dist;
                let state2 = state.after_match();
                let dist_slot = crate::price::get_dist_slot(m.dist);
                for len in start_len..=(m.length as usize) {
                    let lds = len_to_dist_state(len);
                    let mut p = normal_match_price + model.match_len.price(pos_state, len - MATCH_LEN_MIN);
                    p += if (m.dist as usize) < crate::model::FULL_DISTANCES {
                        prices.distance[lds][m.dist as usize]
                    } else {
                        prices.dist_slot[lds][dist_slot as usize] + prices.align[(m.dist & ALIGN_MASK) as usize]
                    };
                    if p < self.opt_buf[len].price {
                        self.opt_buf[len] = OptimalNode { price: p, state: state2, reps: reps2, len: len as u32, dist: m.dist + NUM_REPS as u32, extra: 0 };
                    }
                }
                len_end = len_end.max(m.length as usize);
            }
        }

        InitResult::Relax(len_end + 1)
    }

    /// Main relaxation step at node `cur`. Grounded in
    /// `LZMA_optimalParse`.
    #[allow(clippy::too_many_arguments)]
    fn optimal_parse(
        &mut self,
        model: &mut LzmaModel,
        prices: &DistancePrices,
        table: &dyn MatchTable,
        data: &[u8],
        anchor: usize,
        cur: usize,
        mut len_end: usize,
        bytes_avail_total: usize,
        params: &Lzma2Parameters,
    ) -> (usize, Option<usize>) {
        let index = anchor + cur;
        if index >= data.len() {
            return (len_end, None);
        }
        let node = self.opt_buf[cur];
        let state = node.state;
        let reps = node.reps;
        let cur_price = node.price;
        let pos_state = index & ((1usize << model.props.pb) - 1);

        let is_match_prob = model.is_match[state.value()][pos_state];
        let is_rep_prob = model.is_rep[state.value()];
        let cur_byte = data[index];
        let match_byte = if reps[0] as usize + 1 <= index { data[index - reps[0] as usize - 1] } else { 0 };
        let next_idx = cur + 1;
        if next_idx >= self.opt_buf.len() {
            return (len_end, None);
        }

        let mut cur_and_lit_price = INFINITY_PRICE;
        let candidate_lit_price = cur_price + price0(is_match_prob);
        if candidate_lit_price + MIN_LIT_PRICE / 2 <= self.opt_buf[next_idx].price {
            let prev_byte = data[index - 1];
            let lit_idx = model.literal_state(index as u64, prev_byte);
            let lit_probs = &model.literal.probs[lit_idx];
            let full = candidate_lit_price
                + if state.is_literal() {
                    price_literal(lit_probs, cur_byte)
                } else {
                    price_literal_matched(lit_probs, cur_byte, match_byte)
                };
            if full < self.opt_buf[next_idx].price {
                self.opt_buf[next_idx] = OptimalNode { price: full, state: state.after_literal(), reps, len: 1, dist: NULL_DIST, extra: 0 };
            }
            cur_and_lit_price = full;
        }

        let match_price = cur_price + price1(is_match_prob);
        let rep_match_price = match_price + price1(is_rep_prob);
        if match_byte == cur_byte {
            let short_rep_price = rep_match_price + model.rep_len1_price(state.value(), pos_state);
            if short_rep_price < self.opt_buf[next_idx].price {
                self.opt_buf[next_idx] = OptimalNode { price: short_rep_price, state: state.after_long_rep(), reps, len: 1, dist: 0, extra: 0 };
            }
        }

        let bytes_avail = bytes_avail_total.min(self.opt_buf.len() - 1 - cur);
        if bytes_avail < 2 {
            return (len_end, None);
        }

        // "literal then rep0" composite.
        if cur_and_lit_price < INFINITY_PRICE && match_byte != cur_byte && reps[0] as usize + 2 <= index + 1 {
            let base = index + 1 - reps[0] as usize - 1;
            let limit = (bytes_avail - 1).min(params.fast_length as usize);
            let len_test_2 = common_len(data, index + 1, base, limit);
            if len_test_2 >= MATCH_LEN_MIN {
                let state2 = state.after_literal();
                let pos_state_next = (index + 1) & ((1usize << model.props.pb) - 1);
                let p = cur_and_lit_price
                    + price1(model.is_match[state2.value()][pos_state_next])
                    + price1(model.is_rep[state2.value()])
                    + model.rep_match0_price(len_test_2, state2.value(), pos_state_next);
                let offset = cur + 1 + len_test_2;
                if offset < self.opt_buf.len() && p < self.opt_buf[offset].price {
                    len_end = len_end.max(offset);
                    self.opt_buf[offset] = OptimalNode { price: p, state: state2.after_long_rep(), reps, len: len_test_2 as u32, dist: 0, extra: 1 };
                }
            }
        }

        let max_length = bytes_avail.min(params.fast_length as usize);
        let mut start_len = MATCH_LEN_MIN;

        for rep_index in 0..NUM_REPS {
            let dist = reps[rep_index] as usize;
            if dist + 1 > index {
                continue;
            }
            let base = index - dist - 1;
            if data[index] != data[base] {
                continue;
            }
            let len_test = common_len(data, index, base, max_length);
            if len_test < MATCH_LEN_MIN {
                continue;
            }
            len_end = len_end.max(cur + len_test);
            let rep_price = rep_match_price + model.rep_index_price(rep_index, state.value(), pos_state);
            let mut reps2 = reps;
            let d = reps2[rep_index];
            for k in (1..=rep_index).rev() {
                reps2[k] = reps2[k - 1];
            }
            reps2[0] = d;
            let state2 = state.after_long_rep();
            for len in MATCH_LEN_MIN..=len_test {
                let p = rep_price + model.rep_len.price(pos_state, len - MATCH_LEN_MIN);
                let slot = cur + len;
                if slot < self.opt_buf.len() && p < self.opt_buf[slot].price {
                    self.opt_buf[slot] = OptimalNode { price: p, state: state2, reps: reps2, len: len as u32, dist: rep_index as u32, extra: 0 };
                }
            }
            if rep_index == 0 {
                start_len = len_test + 1;
            }

            if self.is_hybrid() && len_test + 3 <= bytes_avail {
                let pos2 = index + len_test + 1;
                if data.get(pos2) == data.get(base + len_test + 1) && data.get(pos2 + 1) == data.get(base + len_test + 2) {
                    let limit = (len_test + 1 + max_length).min(bytes_avail);
                    let len_test_2 = common_len(data, index + len_test + 1, base + len_test + 1, limit.saturating_sub(len_test + 1));
                    if len_test_2 >= MATCH_LEN_MIN {
                        let pos_state_after = (index + len_test) & ((1usize << model.props.pb) - 1);
                        let mut p = rep_price + model.rep_len.price(pos_state, len_test - MATCH_LEN_MIN)
                            + price0(model.is_match[state2.value()][pos_state_after]);
                        let lit_idx = model.literal_state((index + len_test) as u64, data[index + len_test - 1]);
                        p += price_literal_matched(&model.literal.probs[lit_idx], data[index + len_test], data[base + len_test]);
                        let state3 = STATE_LIT_AFTER_REP;
                        let pos_state_next2 = (pos_state_after + 1) & ((1usize << model.props.pb) - 1);
                        p += price1(model.is_match[state3][pos_state_next2]) + price1(model.is_rep[state3]);
                        p += model.rep_match0_price(len_test_2, state3, pos_state_next2);
                        let offset = cur + len_test + 1 + len_test_2;
                        if offset < self.opt_buf.len() && p < self.opt_buf[offset].price {
                            len_end = len_end.max(offset);
                            self.opt_buf[offset] = OptimalNode {
                                price: p,
                                state: crate::model::State::from_value(state3).after_long_rep(),
                                reps: reps2,
                                len: len_test_2 as u32,
                                dist: rep_index as u32,
                                extra: (len_test + 1) as u32,
                            };
                        }
                    }
                }
            }
        }

        let primary = table.get_match(index);
        if primary.is_some() && max_length >= start_len {
            let normal_match_price = match_price + price0(is_rep_prob);
            let candidates = self.gather_matches(data, index, max_length, params.match_cycles, primary);
            for m in &candidates {
                let len_test_max = (m.length as usize).min(max_length);
                if len_test_max < start_len {
                    continue;
                }
                len_end = len_end.max(cur + len_test_max);
                // Early termination (SPEC_FULL.md §4.8): once a match
                // reaching `fast_length` turns up mid-scan, stop relaxing
                // further nodes and let the caller trace back from here.
                let reaches_fast_length = len_test_max >= params.fast_length as usize;
                let mut reps2 = reps;
                for k in (1..NUM_REPS).rev() {
                    reps2[k] = reps2[k - 1];
                }
                reps2[0] = m.dist;
                let state2 = state.after_match();
                let dist_slot = crate::price::get_dist_slot(m.dist);
                for len_test in start_len..=len_test_max {
                    let lds = len_to_dist_state(len_test);
                    let mut p = normal_match_price + model.match_len.price(pos_state, len_test - MATCH_LEN_MIN);
                    p += if (m.dist as usize) < crate::model::FULL_DISTANCES {
                        prices.distance[lds][m.dist as usize]
                    } else {
                        prices.dist_slot[lds][dist_slot as usize] + prices.align[(m.dist & ALIGN_MASK) as usize]
                    };
                    let slot = cur + len_test;
                    if slot < self.opt_buf.len() && p < self.opt_buf[slot].price {
                        self.opt_buf[slot] = OptimalNode { price: p, state: state2, reps: reps2, len: len_test as u32, dist: m.dist + NUM_REPS as u32, extra: 0 };
                    }

                    if self.is_hybrid() && len_test == m.length as usize {
                        let base2 = index - m.dist as usize - 1;
                        let rep0_pos = len_test + 1;
                        if rep0_pos + 2 <= bytes_avail
                            && data.get(index + rep0_pos) == data.get(base2 + rep0_pos)
                            && data.get(index + rep0_pos + 1) == data.get(base2 + rep0_pos + 1)
                        {
                            let limit = (rep0_pos + max_length).min(bytes_avail);
                            let len_test_2 = common_len(data, index + rep0_pos, base2 + rep0_pos, limit.saturating_sub(rep0_pos));
                            if len_test_2 >= MATCH_LEN_MIN {
                                let pos_state_after = (index + len_test) & ((1usize << model.props.pb) - 1);
                                let mut p2 = p + price0(model.is_match[state2.value()][pos_state_after]);
                                let lit_idx = model.literal_state((index + len_test) as u64, data[index + len_test - 1]);
                                p2 += price_literal_matched(&model.literal.probs[lit_idx], data[index + len_test], data[base2 + len_test]);
                                let state3 = STATE_LIT_AFTER_MATCH;
                                let pos_state_next2 = (pos_state_after + 1) & ((1usize << model.props.pb) - 1);
                                p2 += price1(model.is_match[state3][pos_state_next2]) + price1(model.is_rep[state3]);
                                p2 += model.rep_match0_price(len_test_2, state3, pos_state_next2);
                                let offset = cur + rep0_pos + len_test_2;
                                if offset < self.opt_buf.len() && p2 < self.opt_buf[offset].price {
                                    len_end = len_end.max(offset);
                                    self.opt_buf[offset] = OptimalNode {
                                        price: p2,
                                        state: crate::model::State::from_value(state3).after_long_rep(),
                                        reps: reps2,
                                        len: len_test_2 as u32,
                                        dist: m.dist + NUM_REPS as u32,
                                        extra: rep0_pos as u32,
                                    };
                                }
                            }
                        }
                    }
                }
                if reaches_fast_length {
                    return (len_end, Some(cur + len_test_max));
                }
            }
        }

        (len_end, None)
    }

    /// Linear "price + delta" boundary heuristic (SPEC_FULL.md §4.8):
    /// once the relax loop reaches `opt_buf_size - OPT_END_SIZE` without
    /// an early-terminating long match, pick a stopping node among the
    /// already-relaxed nodes `[cur, len_end]` by normalized price rather
    /// than raw price, so a node reached by a longer chain isn't
    /// penalized purely for covering more bytes. `delta` is `cur`'s
    /// average price per byte so far; each candidate's price is
    /// discounted by `delta` times its extra distance from `cur` before
    /// comparing.
    fn pick_boundary_stop(&self, cur: usize, len_end: usize) -> usize {
        let last = len_end.min(self.opt_buf.len() - 1).max(cur);
        let base_price = self.opt_buf[cur].price;
        let delta = if cur > 0 { base_price / cur as u32 } else { 0 };
        let mut best = cur;
        let mut best_norm = base_price;
        for i in (cur + 1)..=last {
            let node = self.opt_buf[i];
            if node.price >= INFINITY_PRICE {
                continue;
            }
            let norm = node.price.saturating_sub(delta.saturating_mul((i - cur) as u32));
            if norm < best_norm {
                best_norm = norm;
                best = i;
            }
        }
        best
    }

    /// Traceback from node `end` to the anchor, expanding composite
    /// edges into their constituent primitive instructions. Grounded in
    /// `LZMA_reverseOptimalChain`.
    fn reverse_optimal_chain(&self, end: usize) -> Vec<Instr> {
        let mut rev = Vec::new();
        let mut cur = end;
        while cur > 0 {
            let node = self.opt_buf[cur];
            if node.extra == 0 {
                if node.dist == NULL_DIST {
                    rev.push(Instr::Literal);
                } else if (node.dist as usize) < NUM_REPS {
                    rev.push(Instr::Rep { index: node.dist as usize, len: node.len as usize });
                } else {
                    rev.push(Instr::Match { dist: node.dist - NUM_REPS as u32, len: node.len as usize });
                }
                cur -= node.len.max(1) as usize;
            } else {
                rev.push(Instr::Rep { index: 0, len: node.len as usize });
                cur -= node.len as usize;
                rev.push(Instr::Literal);
                cur -= 1;
                if node.extra > 1 {
                    let first_len = node.extra as usize - 1;
                    if (node.dist as usize) < NUM_REPS {
                        rev.push(Instr::Rep { index: node.dist as usize, len: first_len });
                    } else {
                        rev.push(Instr::Match { dist: node.dist - NUM_REPS as u32, len: first_len });
                    }
                    cur -= first_len;
                }
            }
        }
        rev.reverse();
        rev
    }
}

enum InitResult {
    Immediate(usize, u32),
    Relax(usize),
}

fn common_len(data: &[u8], a: usize, b: usize, max_len: usize) -> usize {
    let mut len = 0;
    while len < max_len && a + len < data.len() && data.get(b + len) == Some(&data[a + len]) {
        len += 1;
    }
    len
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Lzma2Parameters;
    use crate::match_table::TestMatchTable;
    use crate::model::{LzmaModel, LzmaProperties};
    use crate::range_coder::RangeEncoder;

    #[test]
    fn encodes_without_panicking_on_repetitive_input() {
        let data = b"abcabcabcabcabcabcabcabcxyzabcabcabcabc".repeat(4);
        let params = Lzma2Parameters::default_opt(1 << 16);
        let mut parser = OptimalParser::new(&params).unwrap();
        let mut model = LzmaModel::new(LzmaProperties::new(params.lc, params.lp, params.pb));
        let mut rc = RangeEncoder::with_capacity(data.len() * 2);
        let mut prices = DistancePrices::new();
        prices.fill_align(&model.distance.align);
        prices.fill_distances(&model.distance.slot, &model.distance.special, &model.distance.align);
        let table = TestMatchTable::new(&data, params.fast_length as usize);

        let mut pos = 0;
        while pos < data.len() {
            let consumed = parser.encode_optimum_sequence(
                &mut model,
                &mut rc,
                &mut prices,
                &table,
                &data,
                pos,
                data.len(),
                &params,
            );
            assert!(consumed > 0);
            pos += consumed;
        }
        assert!(!rc.is_empty());
    }

    #[test]
    fn hybrid_parser_runs_on_short_input() {
        let data = b"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaabbbb".to_vec();
        let params = Lzma2Parameters::default_ultra(1 << 16);
        let mut parser = OptimalParser::new(&params).unwrap();
        let mut model = LzmaModel::new(LzmaProperties::new(params.lc, params.lp, params.pb));
        let mut rc = RangeEncoder::with_capacity(256);
        let mut prices = DistancePrices::new();
        prices.fill_align(&model.distance.align);
        prices.fill_distances(&model.distance.slot, &model.distance.special, &model.distance.align);
        let table = TestMatchTable::new(&data, params.fast_length as usize);

        let consumed = parser.encode_optimum_sequence(&mut model, &mut rc, &mut prices, &table, &data, 0, data.len(), &params);
        assert!(consumed > 0);
    }
}
