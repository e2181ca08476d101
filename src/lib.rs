#![doc = include_str!("../README.md")]

pub mod address {
    #[doc(inline)]
    pub use vigil_address::{
        AddrRange, AddressError, AddressNode, AddressSet, RangeRelation, RuleSet,
    };
}

pub mod matcher {
    #[doc(inline)]
    pub use vigil_matcher::{
        MatchQueue, Matcher, MatcherBuilder, MatcherConfig, MatcherError, MatcherStats,
        PatternMatch, PhaseStats, ScanStats, ThreadCtx, MAX_PATTERNS,
    };
}

pub mod utils {
    #[doc(inline)]
    pub use vigil_utils::{to_lower, BloomFilter, BloomHashFn, LOWER_TABLE};
}
