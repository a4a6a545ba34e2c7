//! LZMA probability models.
//!
//! LZMA uses context-dependent probability models for:
//! - Literal encoding (context = previous byte + position)
//! - Match length encoding
//! - Distance encoding
//! - State machine transitions

use crate::price::{price, price0, price1, price_bit_tree};
use crate::range_coder::PROB_INIT;

/// Number of position bits for literal coding (default: 0).
pub const LC_DEFAULT: u32 = 3;

/// Number of literal position bits (default: 0).
pub const LP_DEFAULT: u32 = 0;

/// Number of position bits (default: 2).
pub const PB_DEFAULT: u32 = 2;

/// Maximum number of position states.
pub const POS_STATES_MAX: usize = 1 << 4;

/// Number of states in the LZMA state machine.
pub const NUM_STATES: usize = 12;

/// Number of bits for low length coding.
pub const LEN_LOW_BITS: u32 = 3;
/// Number of bits for mid length coding.
pub const LEN_MID_BITS: u32 = 3;
/// Number of bits for high length coding.
pub const LEN_HIGH_BITS: u32 = 8;

/// Number of low length symbols.
pub const LEN_LOW_SYMBOLS: usize = 1 << LEN_LOW_BITS;
/// Number of mid length symbols.
pub const LEN_MID_SYMBOLS: usize = 1 << LEN_MID_BITS;
/// Number of high length symbols.
pub const LEN_HIGH_SYMBOLS: usize = 1 << LEN_HIGH_BITS;

/// Minimum match length.
pub const MATCH_LEN_MIN: usize = 2;

/// Number of distance slots.
pub const DIST_SLOTS: usize = 64;

/// Number of alignment bits for distance encoding.
pub const DIST_ALIGN_BITS: u32 = 4;
/// Size of alignment table.
pub const DIST_ALIGN_SIZE: usize = 1 << DIST_ALIGN_BITS;

/// Number of full distance symbols.
pub const FULL_DISTANCES: usize = 128;

/// End position model index.
pub const END_POS_MODEL_INDEX: usize = 14;

/// State reached after coding a literal, indexed by the prior state.
///
/// `kLiteralNextStates` in the reference encoder. State 10 maps to 4, not
/// 6 — a transcription this port corrects; see `DESIGN.md`.
const LITERAL_NEXT_STATES: [u8; NUM_STATES] = [0, 0, 0, 0, 1, 2, 3, 4, 5, 6, 4, 5];

/// `kMatchNextStates`.
const MATCH_NEXT_STATES: [u8; NUM_STATES] = [7, 7, 7, 7, 7, 7, 7, 10, 10, 10, 10, 10];

/// `kRepNextStates`.
const REP_NEXT_STATES: [u8; NUM_STATES] = [8, 8, 8, 8, 8, 8, 8, 11, 11, 11, 11, 11];

/// `kShortRepNextStates`.
const SHORT_REP_NEXT_STATES: [u8; NUM_STATES] = [9, 9, 9, 9, 9, 9, 9, 11, 11, 11, 11, 11];

/// State used for the second literal of a "rep + literal + rep0" composite
/// edge in the optimal parser.
pub const STATE_LIT_AFTER_REP: usize = 8;
/// State used for the second literal of a "match + literal + rep0"
/// composite edge in the optimal parser.
pub const STATE_LIT_AFTER_MATCH: usize = 7;

/// LZMA state machine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct State(u8);

impl State {
    /// Initial state.
    pub const fn new() -> Self {
        Self(0)
    }

    /// Build a state from a raw value, as used when the optimal parser
    /// reconstructs state across a composite edge.
    pub fn from_value(value: usize) -> Self {
        Self(value as u8)
    }

    /// Get state value.
    pub fn value(self) -> usize {
        self.0 as usize
    }

    /// Check if state represents a literal.
    pub fn is_literal(self) -> bool {
        self.0 < 7
    }

    /// Update state after literal.
    pub fn update_literal(&mut self) {
        self.0 = LITERAL_NEXT_STATES[self.0 as usize];
    }

    /// Update state after match.
    pub fn update_match(&mut self) {
        self.0 = MATCH_NEXT_STATES[self.0 as usize];
    }

    /// Update state after rep match (length > 1).
    pub fn update_long_rep(&mut self) {
        self.0 = REP_NEXT_STATES[self.0 as usize];
    }

    /// Update state after short rep (length == 1).
    pub fn update_short_rep(&mut self) {
        self.0 = SHORT_REP_NEXT_STATES[self.0 as usize];
    }

    /// State reached after a literal, without mutating `self`.
    pub fn after_literal(self) -> Self {
        Self(LITERAL_NEXT_STATES[self.0 as usize])
    }

    /// State reached after a match, without mutating `self`.
    pub fn after_match(self) -> Self {
        Self(MATCH_NEXT_STATES[self.0 as usize])
    }

    /// State reached after a rep match, without mutating `self`.
    pub fn after_long_rep(self) -> Self {
        Self(REP_NEXT_STATES[self.0 as usize])
    }
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

/// LZMA properties (lc, lp, pb).
#[derive(Debug, Clone, Copy)]
pub struct LzmaProperties {
    /// Literal context bits.
    pub lc: u32,
    /// Literal position bits.
    pub lp: u32,
    /// Position bits.
    pub pb: u32,
}

impl LzmaProperties {
    /// Create new properties.
    pub fn new(lc: u32, lp: u32, pb: u32) -> Self {
        Self { lc, lp, pb }
    }

    /// Parse from property byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        let pb = byte as u32 / 45;
        let remaining = byte as u32 - pb * 45;
        let lp = remaining / 9;
        let lc = remaining - lp * 9;

        if lc > 8 || lp > 4 || pb > 4 {
            return None;
        }

        Some(Self { lc, lp, pb })
    }

    /// Encode to property byte.
    pub fn to_byte(&self) -> u8 {
        ((self.pb * 45) + (self.lp * 9) + self.lc) as u8
    }

    /// Get number of literal states.
    pub fn num_lit_states(&self) -> usize {
        1 << (self.lc + self.lp)
    }

    /// Get number of position states.
    pub fn num_pos_states(&self) -> usize {
        1 << self.pb
    }
}

impl Default for LzmaProperties {
    fn default() -> Self {
        Self {
            lc: LC_DEFAULT,
            lp: LP_DEFAULT,
            pb: PB_DEFAULT,
        }
    }
}

/// Number of length symbols covered by the full low+mid+high tree.
pub const NUM_LEN_SYMBOLS: usize = LEN_LOW_SYMBOLS + LEN_MID_SYMBOLS + LEN_HIGH_SYMBOLS;

/// How often (in encoded lengths) the length price tables are rebuilt.
/// `kMatchRepriceFrequency` / `kRepLenRepriceFrequency` in the reference
/// encoder, both 64.
pub const LEN_REPRICE_FREQUENCY: u32 = 64;

/// Length decoder/encoder model, paired with its own price table.
///
/// Grounded in `LengthStates` from `original_source/lzma2_enc.c`: the
/// reference encoder stores `prices` alongside the probabilities so the
/// optimal parser can look costs up directly instead of re-deriving them
/// bit by bit, and rebuilds them only every [`LEN_REPRICE_FREQUENCY`]
/// lengths encoded (`LZMA_lengthStates_updatePrices`).
#[derive(Debug, Clone)]
pub struct LengthModel {
    /// Choice bit (low vs mid+high).
    pub choice: u16,
    /// Choice2 bit (mid vs high).
    pub choice2: u16,
    /// Low length probabilities (per position state).
    pub low: Vec<[u16; LEN_LOW_SYMBOLS]>,
    /// Mid length probabilities (per position state).
    pub mid: Vec<[u16; LEN_MID_SYMBOLS]>,
    /// High length probabilities (shared).
    pub high: [u16; LEN_HIGH_SYMBOLS],
    /// Cached price of each length symbol, per position state. Index
    /// `[pos_state][len - kMatchLenMin]`.
    pub prices: Vec<[u32; NUM_LEN_SYMBOLS]>,
    /// Lengths encoded since the last price-table rebuild.
    pub counter: u32,
    /// How many length symbols are actually reachable given the current
    /// `fast_length` / chunk remainder (`LZMA_lengthStates_SetPrices`'s
    /// `table_size`).
    pub table_size: usize,
}

impl LengthModel {
    /// Create a new length model.
    pub fn new(num_pos_states: usize) -> Self {
        Self {
            choice: PROB_INIT,
            choice2: PROB_INIT,
            low: vec![[PROB_INIT; LEN_LOW_SYMBOLS]; num_pos_states],
            mid: vec![[PROB_INIT; LEN_MID_SYMBOLS]; num_pos_states],
            high: [PROB_INIT; LEN_HIGH_SYMBOLS],
            prices: vec![[0; NUM_LEN_SYMBOLS]; num_pos_states],
            counter: 0,
            table_size: NUM_LEN_SYMBOLS,
        }
    }

    /// Reset the model.
    pub fn reset(&mut self) {
        self.choice = PROB_INIT;
        self.choice2 = PROB_INIT;
        for arr in &mut self.low {
            arr.fill(PROB_INIT);
        }
        for arr in &mut self.mid {
            arr.fill(PROB_INIT);
        }
        self.high.fill(PROB_INIT);
        for p in &mut self.prices {
            p.fill(0);
        }
        self.counter = 0;
    }

    /// Rebuild the price table for one position state, grounded in
    /// `LZMA_lengthStates_SetPrices`.
    fn set_prices(&mut self, pos_state: usize) {
        let table_size = self.table_size;
        let a0 = price0(self.choice);
        let a1 = price1(self.choice);
        let b0 = a1 + price0(self.choice2);
        let b1 = a1 + price1(self.choice2);
        let prices = &mut self.prices[pos_state];
        let mut i = 0;
        while i < table_size && i < LEN_LOW_SYMBOLS {
            prices[i] = a0 + price_bit_tree(&self.low[pos_state], LEN_LOW_BITS, i as u32);
            i += 1;
        }
        while i < table_size && i < LEN_LOW_SYMBOLS + LEN_MID_SYMBOLS {
            prices[i] = b0
                + price_bit_tree(&self.mid[pos_state], LEN_MID_BITS, (i - LEN_LOW_SYMBOLS) as u32);
            i += 1;
        }
        while i < table_size {
            prices[i] = b1
                + price_bit_tree(
                    &self.high,
                    LEN_HIGH_BITS,
                    (i - LEN_LOW_SYMBOLS - LEN_MID_SYMBOLS) as u32,
                );
            i += 1;
        }
    }

    /// Rebuild price tables for every position state. The reference
    /// encoder memcpy's the low/mid entries across position states when
    /// the `choice`/`choice2` selector probabilities are shared in the
    /// first pass and only the later bits diverge; this port recomputes
    /// each position state directly; the result is bit-identical, just
    /// without that micro-optimization (see `DESIGN.md`).
    pub fn update_prices(&mut self, num_pos_states: usize) {
        for pos_state in 0..num_pos_states {
            self.set_prices(pos_state);
        }
        self.counter = LEN_REPRICE_FREQUENCY;
    }

    /// Price of encoding `len` (already offset by `kMatchLenMin`) under
    /// `pos_state`.
    pub fn price(&self, pos_state: usize, len_offset: usize) -> u32 {
        self.prices[pos_state][len_offset]
    }
}

/// Literal decoder/encoder model.
#[derive(Debug, Clone)]
pub struct LiteralModel {
    /// Probability table for each literal state.
    /// Each state has 256 entries for decoding a byte.
    pub probs: Vec<[u16; 0x300]>,
}

impl LiteralModel {
    /// Create a new literal model.
    pub fn new(num_lit_states: usize) -> Self {
        Self {
            probs: vec![[PROB_INIT; 0x300]; num_lit_states],
        }
    }

    /// Reset the model.
    pub fn reset(&mut self) {
        for state in &mut self.probs {
            state.fill(PROB_INIT);
        }
    }

    /// Get the literal state index.
    pub fn get_state(&self, pos: u64, prev_byte: u8, lc: u32, lp: u32) -> usize {
        let lit_pos = pos & ((1 << lp) - 1);
        let prev_bits = (prev_byte as usize) >> (8 - lc as usize);
        ((lit_pos as usize) << lc as usize) + prev_bits
    }
}

/// Distance slot model.
#[derive(Debug, Clone)]
pub struct DistanceModel {
    /// Distance slot probabilities (per length state).
    pub slot: [[u16; DIST_SLOTS]; 4],
    /// Special position probabilities (flat array for slots 4-13).
    pub special: [u16; FULL_DISTANCES - END_POS_MODEL_INDEX],
    /// Alignment probabilities.
    pub align: [u16; DIST_ALIGN_SIZE],
}

impl DistanceModel {
    /// Create a new distance model.
    pub fn new() -> Self {
        Self {
            slot: [[PROB_INIT; DIST_SLOTS]; 4],
            special: [PROB_INIT; FULL_DISTANCES - END_POS_MODEL_INDEX],
            align: [PROB_INIT; DIST_ALIGN_SIZE],
        }
    }

    /// Reset the model.
    pub fn reset(&mut self) {
        for s in &mut self.slot {
            s.fill(PROB_INIT);
        }
        self.special.fill(PROB_INIT);
        self.align.fill(PROB_INIT);
    }
}

impl Default for DistanceModel {
    fn default() -> Self {
        Self::new()
    }
}

/// Complete LZMA model containing all probability tables.
#[derive(Debug, Clone)]
pub struct LzmaModel {
    /// LZMA properties.
    pub props: LzmaProperties,

    /// Is-match probabilities.
    pub is_match: [[u16; POS_STATES_MAX]; NUM_STATES],
    /// Is-rep probabilities.
    pub is_rep: [u16; NUM_STATES],
    /// Is-rep0 probabilities.
    pub is_rep0: [u16; NUM_STATES],
    /// Is-rep1 probabilities.
    pub is_rep1: [u16; NUM_STATES],
    /// Is-rep2 probabilities.
    pub is_rep2: [u16; NUM_STATES],
    /// Is-rep0-long probabilities.
    pub is_rep0_long: [[u16; POS_STATES_MAX]; NUM_STATES],

    /// Match length model.
    pub match_len: LengthModel,
    /// Rep match length model.
    pub rep_len: LengthModel,

    /// Literal model.
    pub literal: LiteralModel,

    /// Distance model.
    pub distance: DistanceModel,

    /// Current LZMA state-machine state.
    pub state: State,
    /// Most-recently-used repeat distances (0-based), most recent first.
    pub reps: [u32; NUM_REPS],
}

/// Number of MRU repeat-distance slots.
pub const NUM_REPS: usize = 4;

impl LzmaModel {
    /// Create a new LZMA model with the given properties.
    pub fn new(props: LzmaProperties) -> Self {
        let num_pos_states = props.num_pos_states();
        let num_lit_states = props.num_lit_states();

        Self {
            props,
            is_match: [[PROB_INIT; POS_STATES_MAX]; NUM_STATES],
            is_rep: [PROB_INIT; NUM_STATES],
            is_rep0: [PROB_INIT; NUM_STATES],
            is_rep1: [PROB_INIT; NUM_STATES],
            is_rep2: [PROB_INIT; NUM_STATES],
            is_rep0_long: [[PROB_INIT; POS_STATES_MAX]; NUM_STATES],
            match_len: LengthModel::new(num_pos_states),
            rep_len: LengthModel::new(num_pos_states),
            literal: LiteralModel::new(num_lit_states),
            distance: DistanceModel::new(),
            state: State::new(),
            reps: [0; NUM_REPS],
        }
    }

    /// Reset all probabilities to initial values.
    pub fn reset(&mut self) {
        for state in &mut self.is_match {
            state.fill(PROB_INIT);
        }
        self.is_rep.fill(PROB_INIT);
        self.is_rep0.fill(PROB_INIT);
        self.is_rep1.fill(PROB_INIT);
        self.is_rep2.fill(PROB_INIT);
        for state in &mut self.is_rep0_long {
            state.fill(PROB_INIT);
        }
        self.match_len.reset();
        self.rep_len.reset();
        self.literal.reset();
        self.distance.reset();
        self.state = State::new();
        self.reps = [0; NUM_REPS];
    }

    /// Price of a 1-byte rep0 ("short rep"), grounded in
    /// `LZMA_getRepLen1Price`. Does not include the leading
    /// `is_match`/`is_rep` bits; callers add those separately since they
    /// are shared with the long-rep-match price.
    pub fn rep_len1_price(&self, state: usize, pos_state: usize) -> u32 {
        price0(self.is_rep0[state]) + price0(self.is_rep0_long[state][pos_state])
    }

    /// Price of selecting rep index `rep_index` (0..=3), grounded in
    /// `LZMA_getRepPrice`. For `rep_index == 0` this also prices the
    /// "long rep" `is_rep0_long` bit, since a caller choosing a
    /// multi-byte rep0 match always needs it.
    pub fn rep_index_price(&self, rep_index: usize, state: usize, pos_state: usize) -> u32 {
        if rep_index == 0 {
            price0(self.is_rep0[state]) + price1(self.is_rep0_long[state][pos_state])
        } else {
            let mut cost = price1(self.is_rep0[state]);
            if rep_index == 1 {
                cost += price0(self.is_rep1[state]);
            } else {
                cost += price1(self.is_rep1[state]);
                cost += price(self.is_rep2[state], (rep_index - 2) as u32);
            }
            cost
        }
    }

    /// Price of a rep match of length `len` at rep index `rep_index`.
    pub fn rep_match0_price(&self, len: usize, state: usize, pos_state: usize) -> u32 {
        self.rep_index_price(0, state, pos_state)
            + self.rep_len.price(pos_state, len - MATCH_LEN_MIN)
    }

    /// Literal-probability sub-table index for the literal coded at
    /// `pos` following `prev_byte`.
    pub fn literal_state(&self, pos: u64, prev_byte: u8) -> usize {
        self.literal
            .get_state(pos, prev_byte, self.props.lc, self.props.lp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        let mut state = State::new();
        assert!(state.is_literal());

        state.update_match();
        assert!(!state.is_literal());
        assert_eq!(state.value(), 7);

        state.update_literal();
        assert!(state.is_literal());
    }

    #[test]
    fn test_properties_encoding() {
        let props = LzmaProperties::new(3, 0, 2);
        let byte = props.to_byte();
        let decoded = LzmaProperties::from_byte(byte).unwrap();

        assert_eq!(decoded.lc, props.lc);
        assert_eq!(decoded.lp, props.lp);
        assert_eq!(decoded.pb, props.pb);
    }

    #[test]
    fn test_default_properties() {
        let props = LzmaProperties::default();
        assert_eq!(props.lc, 3);
        assert_eq!(props.lp, 0);
        assert_eq!(props.pb, 2);
    }

    #[test]
    fn test_model_creation() {
        let props = LzmaProperties::default();
        let model = LzmaModel::new(props);

        assert_eq!(model.is_match.len(), NUM_STATES);
        assert_eq!(model.is_rep.len(), NUM_STATES);
    }

    #[test]
    fn test_literal_transition_from_state_10() {
        // State 10 (reached after a long rep match following a match)
        // must transition to 4 on a literal, not 6.
        let mut state = State::from_value(10);
        state.update_literal();
        assert_eq!(state.value(), 4);
    }

    #[test]
    fn test_all_literal_transitions() {
        let expected = [0u8, 0, 0, 0, 1, 2, 3, 4, 5, 6, 4, 5];
        for (s, &want) in expected.iter().enumerate() {
            let mut state = State::from_value(s);
            state.update_literal();
            assert_eq!(state.value(), want as usize, "state {s}");
        }
    }
}
