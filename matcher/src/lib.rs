//! Multi-pattern content matching over packet payloads.
//!
//! Patterns are registered in two sets, *scan* patterns checked against
//! packet payloads and *search* patterns checked against reassembled
//! stream data, and compiled into a 3-gram backward-matching structure
//! with dedicated fast paths for 1- and 2-byte patterns and a per-bucket
//! bloom filter that short-circuits most failed verifications. After
//! compilation the matcher is immutable and freely shared across worker
//! threads; each worker passes its own [`ThreadCtx`] scratch state and a
//! [`MatchQueue`] to collect results.

use thiserror::Error;

mod matcher;
mod pattern;
mod queue;

pub use matcher::{Matcher, MatcherStats, PhaseStats};
pub use pattern::MatcherBuilder;
pub use queue::{MatchQueue, PatternMatch, ScanStats, ThreadCtx};

/// Maximum number of unique patterns one matcher can hold, fixed by the
/// 16-bit pattern index used in the compiled dispatch tables.
pub const MAX_PATTERNS: usize = 65_535;

/// Errors raised while registering patterns.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum MatcherError {
    /// Empty patterns match everywhere and are rejected.
    #[error("empty patterns cannot be matched")]
    EmptyPattern,
    /// The unique-pattern capacity was exhausted.
    #[error("pattern set exceeds {MAX_PATTERNS} unique patterns")]
    TooManyPatterns,
}

/// Build-time tuning for the compiled matcher.
#[derive(Clone, Copy, Debug)]
pub struct MatcherConfig {
    /// Bit size of each per-bucket bloom filter.
    pub bloom_bits: u32,
    /// Hash iterations per bloom filter.
    pub bloom_iterations: u8,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            bloom_bits: 1024,
            bloom_iterations: 2,
        }
    }
}
