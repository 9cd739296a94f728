use std::fmt;

/// Execution parameter bitset.
///
/// A child context (a function-call boundary in the rule tree) inherits
/// only the execution-mode flags named in [`Params::CHILD_MASK`];
/// structural flags such as `LAZY` and `MULTI` never leak across.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Params(u32);

impl Params {
    /// Symbols compare case-insensitively.
    pub const CASE_INSENSITIVE: u32 = 1 << 0;
    /// Whitespace between rule matches is skipped.
    pub const IGNORE_WS: u32 = 1 << 1;
    /// The whole input must be covered by rule matches.
    pub const FULL_MATCH: u32 = 1 << 2;
    /// Left-recursion detection is active in the walker.
    pub const LEFT_RECURSION: u32 = 1 << 3;
    /// Alternation picks the longest matching branch instead of the first.
    pub const SEARCH_BEST: u32 = 1 << 4;
    /// Quantifiers match as few symbols as possible.
    pub const LAZY: u32 = 1 << 5;
    /// Matches accumulate into the `match` pseudo-variable.
    pub const MULTI: u32 = 1 << 6;
    /// `add_match` stores raw sequences without `Seq` normalization.
    pub const SIMPLE_MATCH: u32 = 1 << 7;

    /// Flags a child context inherits from its parent.
    pub const CHILD_MASK: u32 = Self::IGNORE_WS
        | Self::CASE_INSENSITIVE
        | Self::FULL_MATCH
        | Self::LEFT_RECURSION
        | Self::SEARCH_BEST;

    pub fn new() -> Params {
        Params(0)
    }

    pub fn get(self, flag: u32) -> bool {
        self.0 & flag != 0
    }

    pub fn set(&mut self, flag: u32, on: bool) {
        if on {
            self.0 |= flag;
        } else {
            self.0 &= !flag;
        }
    }

    pub fn with(mut self, flag: u32, on: bool) -> Params {
        self.set(flag, on);
        self
    }

    /// The view of these params a child context inherits.
    pub fn child_view(self) -> Params {
        Params(self.0 & Self::CHILD_MASK)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn from_bits(bits: u32) -> Params {
        Params(bits)
    }
}

impl fmt::Display for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010b}", self.0)
    }
}
