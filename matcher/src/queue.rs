use std::collections::HashSet;

/// A single reported pattern occurrence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PatternMatch {
    /// Pattern id from the end-match record that fired.
    pub pattern: u32,
    /// Rule id from the same record.
    pub rule: u32,
    /// Start position of the occurrence in the scanned buffer.
    pub offset: u32,
    /// Length of the matched bytes.
    pub len: u16,
}

/// Collects the output of scan and search calls.
///
/// Besides the match records themselves, the queue keeps the
/// deduplicated list of candidate rule ids touched by any match attempt;
/// the detection driver walks that list to pick the rules worth
/// evaluating in full. The caller clears the queue between packets.
#[derive(Clone, Debug, Default)]
pub struct MatchQueue {
    matches: Vec<PatternMatch>,
    rules: Vec<u32>,
    seen_rules: HashSet<u32>,
}

impl MatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// All matches appended since the last [`clear`](Self::clear).
    pub fn matches(&self) -> &[PatternMatch] {
        &self.matches
    }

    /// Candidate rule ids in first-seen order, deduplicated.
    pub fn rules(&self) -> &[u32] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    pub fn clear(&mut self) {
        self.matches.clear();
        self.rules.clear();
        self.seen_rules.clear();
    }

    pub(crate) fn push(&mut self, m: PatternMatch) {
        self.matches.push(m);
    }

    pub(crate) fn note_rule(&mut self, rule: u32) {
        if self.seen_rules.insert(rule) {
            self.rules.push(rule);
        }
    }
}

/// Counters describing how a worker's scans behaved, accumulated across
/// calls until [`ThreadCtx::reset_stats`] clears them. Cheap enough to
/// keep on in production; useful for judging how well the gram filter
/// and the bloom filters are pruning work.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScanStats {
    /// Scan/search calls that entered the 3-gram loop.
    pub calls: u32,
    /// Windows whose gram mask survived to verification.
    pub potential_matches: u32,
    /// Patterns compared byte-for-byte during verification.
    pub verify_attempts: u32,
    /// Comparisons that confirmed a pattern occurrence.
    pub verify_matches: u32,
    /// Bloom filter consultations.
    pub bloom_checks: u32,
    /// Verifications skipped because a bloom filter ruled them out.
    pub bloom_skips: u32,
    /// Shift advances taken on failed windows.
    pub shifts: u32,
    /// Total bytes advanced by failed-window shifts.
    pub shifted_bytes: u64,
}

impl ScanStats {
    /// Mean advance of a failed-window shift; a feel for how much of the
    /// buffer the gram filter lets the loop skip.
    pub fn avg_shift(&self) -> f64 {
        if self.shifts == 0 {
            0.0
        } else {
            self.shifted_bytes as f64 / self.shifts as f64
        }
    }
}

/// Per-worker scratch state.
///
/// Holds a transient per-pattern-id position set used to deduplicate
/// hits within one scan or search call, plus the worker's accumulated
/// [`ScanStats`]. The compiled matcher itself is never mutated while
/// scanning, so sharing it across workers only requires giving each
/// worker its own `ThreadCtx`.
#[derive(Clone, Debug)]
pub struct ThreadCtx {
    seen: Vec<Vec<u32>>,
    touched: Vec<u32>,
    pub(crate) stats: ScanStats,
}

impl ThreadCtx {
    pub(crate) fn new(max_pattern_id: u32) -> Self {
        Self {
            seen: vec![Vec::new(); max_pattern_id as usize + 1],
            touched: Vec::new(),
            stats: ScanStats::default(),
        }
    }

    /// The counters accumulated since creation or the last
    /// [`reset_stats`](Self::reset_stats).
    pub fn stats(&self) -> &ScanStats {
        &self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = ScanStats::default();
    }

    /// Clears only the buckets used since the last reset.
    pub(crate) fn reset(&mut self) {
        for &pattern in &self.touched {
            self.seen[pattern as usize].clear();
        }
        self.touched.clear();
    }

    /// Returns `true` the first time (pattern, pos) is seen this call.
    pub(crate) fn note(&mut self, pattern: u32, pos: u32) -> bool {
        if pattern as usize >= self.seen.len() {
            self.seen.resize(pattern as usize + 1, Vec::new());
        }
        let bucket = &mut self.seen[pattern as usize];
        if bucket.contains(&pos) {
            return false;
        }
        if bucket.is_empty() {
            self.touched.push(pattern);
        }
        bucket.push(pos);
        true
    }
}
