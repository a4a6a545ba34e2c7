//! Caller-facing configuration for the LZMA2 encoder core.
//!
//! Grounded in `LZMA2_CCtx`/`FL2_createCCtxPool`-style parameter structs
//! from the teacher's sibling codec crates and in §6 of the design spec,
//! which enumerates the recognized options and their clamping rules.
//! Invalid values are corrected rather than rejected (§7: "Invalid option
//! values are corrected rather than rejected").

/// Parser strategy. Matches `strategy ∈ {fast, opt, ultra}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Greedy/lazy parser (§4.7).
    Fast,
    /// Optimal dynamic-programming parser without the hash-3 matcher.
    Opt,
    /// Optimal parser plus the hash-3 secondary matcher (§4.9).
    Ultra,
}

/// Encoder configuration. Construct with [`Lzma2Parameters::new`], which
/// applies every clamp documented in §6, then adjust fields directly —
/// every field remains independently re-clampable via [`Self::normalize`].
#[derive(Debug, Clone, Copy)]
pub struct Lzma2Parameters {
    /// Literal context bits.
    pub lc: u32,
    /// Literal position bits.
    pub lp: u32,
    /// Position bits.
    pub pb: u32,
    /// Maximum length the fast parser's lazy lookahead and the optimal
    /// parser's per-node search will consider.
    pub fast_length: u32,
    /// Hash-3 chain walk bound (`ultra` strategy only).
    pub match_cycles: u32,
    /// Parser strategy.
    pub strategy: Strategy,
    /// `log2` of the hash-3 chain size (`ultra` strategy only).
    pub second_dict_bits: u32,
    /// Dictionary size in bytes, used for the LZMA2 properties byte and
    /// distance-table sizing.
    pub dict_size: u32,
}

impl Lzma2Parameters {
    /// Build parameters from raw caller input, applying every §6 clamp.
    pub fn new(
        lc: u32,
        lp: u32,
        pb: u32,
        fast_length: u32,
        match_cycles: u32,
        strategy: Strategy,
        second_dict_bits: u32,
        dict_size: u32,
    ) -> Self {
        let mut p = Self {
            lc,
            lp,
            pb,
            fast_length,
            match_cycles,
            strategy,
            second_dict_bits,
            dict_size,
        };
        p.normalize();
        p
    }

    /// Re-apply every clamp. Per §9's recorded Open Question: `lp` is
    /// clamped to `4` first, and only then is `lc` reduced to satisfy
    /// `lc + lp <= 4` — not the other way around.
    pub fn normalize(&mut self) {
        self.lp = self.lp.min(4);
        self.lc = self.lc.min(4);
        if self.lc + self.lp > 4 {
            self.lc = 4 - self.lp;
        }
        self.pb = self.pb.min(4);
        self.fast_length = self.fast_length.clamp(6, 273);
        self.match_cycles = self.match_cycles.clamp(1, 1000);
        self.second_dict_bits = self.second_dict_bits.clamp(4, 14);
        self.dict_size = self.dict_size.max(1 << 12);
    }

    /// Default settings matching the reference encoder's level-6-ish
    /// middle ground: `lc=3, lp=0, pb=2`, fast strategy.
    pub fn default_fast(dict_size: u32) -> Self {
        Self::new(3, 0, 2, 48, 1, Strategy::Fast, 8, dict_size)
    }

    /// Default settings for the optimal parser without hash-3.
    pub fn default_opt(dict_size: u32) -> Self {
        Self::new(3, 0, 2, 64, 16, Strategy::Opt, 8, dict_size)
    }

    /// Default settings for the hybrid optimal parser (hash-3 enabled).
    pub fn default_ultra(dict_size: u32) -> Self {
        Self::new(3, 0, 2, 273, 200, Strategy::Ultra, 10, dict_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_lp_before_lc() {
        // §9 Open Question: lc=3, lp=3 must clamp to lc=1, lp=3.
        let p = Lzma2Parameters::new(3, 3, 2, 48, 1, Strategy::Fast, 8, 1 << 20);
        assert_eq!(p.lp, 3);
        assert_eq!(p.lc, 1);
    }

    #[test]
    fn clamps_ranges() {
        let p = Lzma2Parameters::new(0, 0, 0, 1000, 5000, Strategy::Ultra, 20, 1 << 20);
        assert_eq!(p.fast_length, 273);
        assert_eq!(p.match_cycles, 1000);
        assert_eq!(p.second_dict_bits, 14);
    }
}
