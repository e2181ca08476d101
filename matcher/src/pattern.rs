use std::collections::HashMap;

use vigil_utils::to_lower;

use crate::matcher::Matcher;
use crate::{MatcherConfig, MatcherError, MAX_PATTERNS};

/// One (pattern, rule) association with its placement constraints. A
/// pattern registered for several rules carries one record per rule.
#[derive(Clone, Copy, Debug)]
pub(crate) struct EndMatch {
    pub pattern: u32,
    pub rule: u32,
    /// Lowest admissible match position; 0 means unconstrained.
    pub offset: u16,
    /// The match must end at or before this position; 0 means
    /// unconstrained.
    pub depth: u16,
}

/// A unique pattern: the case-folded and original byte forms plus every
/// end-match record attached to it.
#[derive(Clone, Debug)]
pub(crate) struct Pattern {
    pub ci: Vec<u8>,
    pub cs: Vec<u8>,
    pub nocase: bool,
    pub scan: bool,
    pub ends: Vec<EndMatch>,
}

impl Pattern {
    pub fn len(&self) -> usize {
        self.ci.len()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct PatternKey {
    bytes: Vec<u8>,
    nocase: bool,
}

/// Accumulates patterns before compilation.
///
/// Registration deduplicates on (bytes, case flag): the first addition
/// materializes the pattern, later additions only append another
/// end-match record. `compile` consumes the builder, so patterns cannot
/// be added to a live matcher and a matcher cannot scan before it is
/// built.
#[derive(Clone, Debug, Default)]
pub struct MatcherBuilder {
    config: MatcherConfig,
    patterns: Vec<Pattern>,
    index: HashMap<PatternKey, usize>,
    max_pattern_id: u32,
}

impl MatcherBuilder {
    pub fn new() -> Self {
        Self::with_config(MatcherConfig::default())
    }

    pub fn with_config(config: MatcherConfig) -> Self {
        Self {
            config,
            patterns: Vec::new(),
            index: HashMap::new(),
            max_pattern_id: 0,
        }
    }

    /// Adds a case-sensitive scan pattern.
    pub fn add_scan_cs(
        &mut self,
        bytes: &[u8],
        offset: u16,
        depth: u16,
        pattern_id: u32,
        rule_id: u32,
    ) -> Result<(), MatcherError> {
        self.add(bytes, offset, depth, pattern_id, rule_id, false, true)
    }

    /// Adds a case-insensitive scan pattern.
    pub fn add_scan_ci(
        &mut self,
        bytes: &[u8],
        offset: u16,
        depth: u16,
        pattern_id: u32,
        rule_id: u32,
    ) -> Result<(), MatcherError> {
        self.add(bytes, offset, depth, pattern_id, rule_id, true, true)
    }

    /// Adds a case-sensitive search pattern.
    pub fn add_search_cs(
        &mut self,
        bytes: &[u8],
        offset: u16,
        depth: u16,
        pattern_id: u32,
        rule_id: u32,
    ) -> Result<(), MatcherError> {
        self.add(bytes, offset, depth, pattern_id, rule_id, false, false)
    }

    /// Adds a case-insensitive search pattern.
    pub fn add_search_ci(
        &mut self,
        bytes: &[u8],
        offset: u16,
        depth: u16,
        pattern_id: u32,
        rule_id: u32,
    ) -> Result<(), MatcherError> {
        self.add(bytes, offset, depth, pattern_id, rule_id, true, false)
    }

    #[allow(clippy::too_many_arguments)]
    fn add(
        &mut self,
        bytes: &[u8],
        offset: u16,
        depth: u16,
        pattern_id: u32,
        rule_id: u32,
        nocase: bool,
        scan: bool,
    ) -> Result<(), MatcherError> {
        if bytes.is_empty() {
            return Err(MatcherError::EmptyPattern);
        }
        let key = PatternKey {
            bytes: bytes.to_vec(),
            nocase,
        };
        let idx = match self.index.get(&key) {
            Some(&idx) => idx,
            None => {
                if self.patterns.len() >= MAX_PATTERNS {
                    return Err(MatcherError::TooManyPatterns);
                }
                self.patterns.push(Pattern {
                    ci: bytes.iter().copied().map(to_lower).collect(),
                    cs: bytes.to_vec(),
                    nocase,
                    scan,
                    ends: Vec::new(),
                });
                let idx = self.patterns.len() - 1;
                self.index.insert(key, idx);
                idx
            }
        };
        self.patterns[idx].ends.push(EndMatch {
            pattern: pattern_id,
            rule: rule_id,
            offset,
            depth,
        });
        self.max_pattern_id = self.max_pattern_id.max(pattern_id);
        Ok(())
    }

    /// Number of unique patterns registered so far.
    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }

    /// Compiles the registered patterns into an immutable [`Matcher`].
    pub fn compile(self) -> Matcher {
        Matcher::from_parts(self.config, self.patterns, self.max_pattern_id)
    }
}
