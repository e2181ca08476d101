use std::fmt;

use log::warn;
use vigil_utils::{to_lower, BloomFilter};

use crate::pattern::Pattern;
use crate::queue::{MatchQueue, PatternMatch, ThreadCtx};
use crate::MatcherConfig;

/// Bitmask word for the backward-matching shift table.
type ShiftWord = u64;

/// Size of the 3-gram and 2-byte dispatch tables. [`gram_hash`] stays
/// within this range by construction.
const HASH_SIZE: usize = 1 << 16;

/// Ceiling for the matching window `m`. The shift table sets bit `m` for
/// a gram at window position 0 and the search loop shifts once more
/// after its final AND, so the window stays two bits short of the word.
const MAX_WINDOW: usize = (ShiftWord::BITS - 2) as usize;
const MIN_WINDOW: usize = 3;

#[inline]
fn gram_hash(a: u8, b: u8, c: u8) -> usize {
    ((a as usize) << 8) ^ ((b as usize) << 4) ^ (c as usize)
}

/// Bloom hash over case-folded bytes: fold each byte with its index,
/// spread by the iteration, reduce modulo the bitmap size.
fn bloom_hash(data: &[u8], iteration: u8, bit_size: u32) -> u32 {
    let mut hash = to_lower(data[0]) as u32;
    for (i, &b) in data.iter().enumerate().skip(1) {
        hash = hash.wrapping_add((to_lower(b) as u32) ^ (i as u32));
    }
    hash.wrapping_shl(iteration as u32 + 1) % bit_size
}

/// Compiled dispatch structures for one pattern set (scan or search).
struct PhaseCtx {
    /// Matching window: the smallest pattern length, clamped into
    /// `[MIN_WINDOW, MAX_WINDOW]`.
    m: usize,
    /// 1-byte patterns bucketed by their case-folded byte.
    hash1: Box<[Vec<u16>]>,
    /// 2-byte patterns bucketed by their two case-folded bytes.
    hash2: Box<[Vec<u16>]>,
    /// Longer patterns bucketed by the 3-gram hash of bytes `m-3..m`.
    hash3: Box<[Vec<u16>]>,
    /// Per-gram window-position bitmasks driving the backward loop.
    shift: Box<[ShiftWord]>,
    /// Scan only: per-bucket pre-verification filters over the first
    /// `min(bucket min length, 8)` case-folded bytes of each member.
    bloom: Vec<Option<BloomFilter>>,
    pminlen: Vec<u8>,
    count1: u32,
    count2: u32,
    count3: u32,
}

impl PhaseCtx {
    fn build(patterns: &[Pattern], scan: bool, config: &MatcherConfig) -> Self {
        let min_len = patterns
            .iter()
            .filter(|p| p.scan == scan)
            .map(Pattern::len)
            .min()
            .unwrap_or(0);
        if min_len > MAX_WINDOW {
            warn!(
                "smallest pattern ({} bytes) exceeds the shift window, clamping to {}",
                min_len, MAX_WINDOW
            );
        }
        let m = min_len.clamp(MIN_WINDOW, MAX_WINDOW);

        let mut ctx = PhaseCtx {
            m,
            hash1: vec![Vec::new(); 256].into_boxed_slice(),
            hash2: vec![Vec::new(); HASH_SIZE].into_boxed_slice(),
            hash3: vec![Vec::new(); HASH_SIZE].into_boxed_slice(),
            shift: vec![0; HASH_SIZE].into_boxed_slice(),
            bloom: Vec::new(),
            pminlen: Vec::new(),
            count1: 0,
            count2: 0,
            count3: 0,
        };

        for (idx, p) in patterns.iter().enumerate() {
            if p.scan != scan {
                continue;
            }
            match p.len() {
                1 => {
                    ctx.hash1[p.ci[0] as usize].push(idx as u16);
                    ctx.count1 += 1;
                }
                2 => {
                    ctx.hash2[(p.ci[0] as usize) << 8 | p.ci[1] as usize].push(idx as u16);
                    ctx.count2 += 1;
                }
                _ => {
                    let h = gram_hash(p.ci[m - 3], p.ci[m - 2], p.ci[m - 1]);
                    ctx.hash3[h].push(idx as u16);
                    ctx.count3 += 1;
                }
            }
        }

        for j in 0..=(m - MIN_WINDOW) {
            for p in patterns.iter() {
                if p.scan != scan || p.len() < m {
                    continue;
                }
                let h = gram_hash(p.ci[j], p.ci[j + 1], p.ci[j + 2]);
                ctx.shift[h] |= 1 << (m - j);
            }
        }

        if scan {
            ctx.pminlen = vec![0u8; HASH_SIZE];
            ctx.bloom = (0..HASH_SIZE).map(|_| None).collect();
            for h in 0..HASH_SIZE {
                if ctx.hash3[h].is_empty() {
                    continue;
                }
                let mut pminlen = usize::MAX;
                for &idx in &ctx.hash3[h] {
                    pminlen = pminlen.min(patterns[idx as usize].len());
                }
                let pminlen = pminlen.min(8);
                ctx.pminlen[h] = pminlen as u8;
                let mut filter =
                    BloomFilter::new(config.bloom_bits, config.bloom_iterations, bloom_hash);
                for &idx in &ctx.hash3[h] {
                    filter.add(&patterns[idx as usize].ci[..pminlen]);
                }
                ctx.bloom[h] = Some(filter);
            }
        }

        ctx
    }
}

/// Compile-time shape of one pattern set, for diagnostics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PhaseStats {
    /// The matching window in effect.
    pub window: usize,
    pub one_byte_patterns: u32,
    pub two_byte_patterns: u32,
    pub longer_patterns: u32,
    /// Non-empty gram buckets carrying a bloom filter (scan side only).
    pub bloom_filters: usize,
    /// Bytes held by those filters' bitmaps.
    pub bloom_bytes: usize,
}

/// Compile-time shape of a whole matcher, for diagnostics and capacity
/// planning.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MatcherStats {
    pub unique_patterns: usize,
    /// Total pattern/rule associations across all patterns.
    pub end_matches: usize,
    pub max_pattern_id: u32,
    pub scan: PhaseStats,
    pub search: PhaseStats,
}

impl fmt::Display for MatcherStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} unique patterns, {} end matches, highest id {}",
            self.unique_patterns, self.end_matches, self.max_pattern_id
        )?;
        for (name, phase) in [("scan", &self.scan), ("search", &self.search)] {
            writeln!(
                f,
                "{}: window {}, lengths 1/2/3+: {}/{}/{}, {} bloom filters ({} bytes)",
                name,
                phase.window,
                phase.one_byte_patterns,
                phase.two_byte_patterns,
                phase.longer_patterns,
                phase.bloom_filters,
                phase.bloom_bytes,
            )?;
        }
        Ok(())
    }
}

/// The compiled matcher. Immutable once built; share it freely across
/// workers and give each its own [`ThreadCtx`].
pub struct Matcher {
    patterns: Vec<Pattern>,
    scan: PhaseCtx,
    search: PhaseCtx,
    max_pattern_id: u32,
}

impl Matcher {
    pub(crate) fn from_parts(
        config: MatcherConfig,
        patterns: Vec<Pattern>,
        max_pattern_id: u32,
    ) -> Self {
        let scan = PhaseCtx::build(&patterns, true, &config);
        let search = PhaseCtx::build(&patterns, false, &config);
        Self {
            patterns,
            scan,
            search,
            max_pattern_id,
        }
    }

    /// Scratch state sized for this matcher's pattern ids.
    pub fn thread_ctx(&self) -> ThreadCtx {
        ThreadCtx::new(self.max_pattern_id)
    }

    /// Number of unique patterns across both sets.
    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }

    pub fn max_pattern_id(&self) -> u32 {
        self.max_pattern_id
    }

    /// The compiled scan-phase matching window.
    pub fn scan_window(&self) -> usize {
        self.scan.m
    }

    /// The compiled search-phase matching window.
    pub fn search_window(&self) -> usize {
        self.search.m
    }

    /// Describes the compiled shape of both pattern sets.
    pub fn stats(&self) -> MatcherStats {
        let phase = |ctx: &PhaseCtx| PhaseStats {
            window: ctx.m,
            one_byte_patterns: ctx.count1,
            two_byte_patterns: ctx.count2,
            longer_patterns: ctx.count3,
            bloom_filters: ctx.bloom.iter().flatten().count(),
            bloom_bytes: ctx.bloom.iter().flatten().map(BloomFilter::memory_size).sum(),
        };
        MatcherStats {
            unique_patterns: self.patterns.len(),
            end_matches: self.patterns.iter().map(|p| p.ends.len()).sum(),
            max_pattern_id: self.max_pattern_id,
            scan: phase(&self.scan),
            search: phase(&self.search),
        }
    }

    /// Runs the scan pattern set over `buf`, appending matches to
    /// `queue`. Returns the number of matches appended. Infallible:
    /// short or empty buffers simply yield no matches.
    pub fn scan(&self, thread: &mut ThreadCtx, queue: &mut MatchQueue, buf: &[u8]) -> u32 {
        thread.reset();
        let phase = &self.scan;
        let mut count = 0;
        if phase.count1 > 0 {
            count += self.walk1(phase, thread, queue, buf);
        }
        if phase.count2 > 0 {
            count += self.walk2(phase, thread, queue, buf);
        }
        if phase.count3 > 0 {
            count += self.gram_scan(phase, thread, queue, buf);
        }
        count
    }

    /// Runs the search pattern set over `buf`; otherwise like
    /// [`scan`](Self::scan).
    pub fn search(&self, thread: &mut ThreadCtx, queue: &mut MatchQueue, buf: &[u8]) -> u32 {
        thread.reset();
        let phase = &self.search;
        let mut count = 0;
        if phase.count1 > 0 {
            count += self.walk1(phase, thread, queue, buf);
        }
        if phase.count2 > 0 {
            count += self.walk2(phase, thread, queue, buf);
        }
        if phase.count3 > 0 {
            count += self.gram_search(phase, thread, queue, buf);
        }
        count
    }

    /// Straight byte walk for 1-byte patterns.
    fn walk1(
        &self,
        phase: &PhaseCtx,
        thread: &mut ThreadCtx,
        queue: &mut MatchQueue,
        buf: &[u8],
    ) -> u32 {
        let mut count = 0;
        for (pos, &b) in buf.iter().enumerate() {
            for &idx in &phase.hash1[to_lower(b) as usize] {
                let p = &self.patterns[idx as usize];
                let hit = if p.nocase {
                    to_lower(b) == p.ci[0]
                } else {
                    b == p.cs[0]
                };
                if hit {
                    count += self.emit(p, pos, thread, queue);
                }
            }
        }
        count
    }

    /// Overlapping 2-byte window walk for 2-byte patterns.
    fn walk2(
        &self,
        phase: &PhaseCtx,
        thread: &mut ThreadCtx,
        queue: &mut MatchQueue,
        buf: &[u8],
    ) -> u32 {
        if buf.len() < 2 {
            return 0;
        }
        let mut count = 0;
        for pos in 0..buf.len() - 1 {
            let h = (to_lower(buf[pos]) as usize) << 8 | to_lower(buf[pos + 1]) as usize;
            for &idx in &phase.hash2[h] {
                let p = &self.patterns[idx as usize];
                let hit = if p.nocase {
                    to_lower(buf[pos]) == p.ci[0] && to_lower(buf[pos + 1]) == p.ci[1]
                } else {
                    buf[pos] == p.cs[0] && buf[pos + 1] == p.cs[1]
                };
                if hit {
                    count += self.emit(p, pos, thread, queue);
                }
            }
        }
        count
    }

    /// Backward 3-gram loop for the scan set: shift, then AND, with the
    /// per-bucket bloom filter consulted before verification.
    fn gram_scan(
        &self,
        phase: &PhaseCtx,
        thread: &mut ThreadCtx,
        queue: &mut MatchQueue,
        buf: &[u8],
    ) -> u32 {
        let m = phase.m;
        thread.stats.calls += 1;
        if buf.len() < m {
            return 0;
        }
        let mut count = 0;
        let mut pos = 0usize;
        while pos <= buf.len() - m {
            let mut j = m - 2;
            let mut d: ShiftWord = !0;
            loop {
                let h = gram_hash(
                    to_lower(buf[pos + j - 1]),
                    to_lower(buf[pos + j]),
                    to_lower(buf[pos + j + 1]),
                );
                d = (d << 1) & phase.shift[h];
                j -= 1;
                if d == 0 || j == 0 {
                    break;
                }
            }
            if d != 0 {
                // the whole window survived: some pattern may start here
                thread.stats.potential_matches += 1;
                count += self.verify(phase, true, thread, queue, buf, pos);
                pos += 1;
            } else {
                // no pattern can start before the failed gram
                thread.stats.shifts += 1;
                thread.stats.shifted_bytes += (j + 1) as u64;
                pos += j + 1;
            }
        }
        count
    }

    /// Backward 3-gram loop for the search set: AND, then shift. No
    /// bloom filters on this side.
    fn gram_search(
        &self,
        phase: &PhaseCtx,
        thread: &mut ThreadCtx,
        queue: &mut MatchQueue,
        buf: &[u8],
    ) -> u32 {
        let m = phase.m;
        thread.stats.calls += 1;
        if buf.len() < m {
            return 0;
        }
        let mut count = 0;
        let mut pos = 0usize;
        while pos <= buf.len() - m {
            let mut j = m - 2;
            let mut d: ShiftWord = !0;
            loop {
                let h = gram_hash(
                    to_lower(buf[pos + j - 1]),
                    to_lower(buf[pos + j]),
                    to_lower(buf[pos + j + 1]),
                );
                d &= phase.shift[h];
                d <<= 1;
                j -= 1;
                if d == 0 || j == 0 {
                    break;
                }
            }
            if d != 0 {
                thread.stats.potential_matches += 1;
                count += self.verify(phase, false, thread, queue, buf, pos);
                pos += 1;
            } else {
                thread.stats.shifts += 1;
                thread.stats.shifted_bytes += (j + 1) as u64;
                pos += j + 1;
            }
        }
        count
    }

    /// Checks every pattern in the window's tail-gram bucket against the
    /// buffer at `pos`.
    fn verify(
        &self,
        phase: &PhaseCtx,
        use_bloom: bool,
        thread: &mut ThreadCtx,
        queue: &mut MatchQueue,
        buf: &[u8],
        pos: usize,
    ) -> u32 {
        let m = phase.m;
        let h = gram_hash(
            to_lower(buf[pos + m - 3]),
            to_lower(buf[pos + m - 2]),
            to_lower(buf[pos + m - 1]),
        );
        if use_bloom {
            if let Some(filter) = &phase.bloom[h] {
                let pminlen = phase.pminlen[h] as usize;
                if buf.len() - pos < pminlen {
                    return 0;
                }
                thread.stats.bloom_checks += 1;
                if !filter.test(&buf[pos..pos + pminlen]) {
                    thread.stats.bloom_skips += 1;
                    return 0;
                }
            }
        }
        let mut count = 0;
        for &idx in &phase.hash3[h] {
            let p = &self.patterns[idx as usize];
            if buf.len() - pos < p.len() {
                continue;
            }
            thread.stats.verify_attempts += 1;
            let window = &buf[pos..pos + p.len()];
            let hit = if p.nocase {
                eq_lowercase(&p.ci, window)
            } else {
                p.cs == window
            };
            if hit {
                thread.stats.verify_matches += 1;
                count += self.emit(p, pos, thread, queue);
            }
        }
        count
    }

    /// Applies every end-match record of a verified pattern occurrence.
    fn emit(&self, p: &Pattern, pos: usize, thread: &mut ThreadCtx, queue: &mut MatchQueue) -> u32 {
        let mut appended = 0;
        for em in &p.ends {
            if em.offset != 0 && pos < em.offset as usize {
                continue;
            }
            if em.depth != 0 && pos + p.len() > em.depth as usize {
                continue;
            }
            queue.note_rule(em.rule);
            if thread.note(em.pattern, pos as u32) {
                queue.push(PatternMatch {
                    pattern: em.pattern,
                    rule: em.rule,
                    offset: pos as u32,
                    len: p.len() as u16,
                });
                appended += 1;
            }
        }
        appended
    }
}

/// Backward compare of a pre-folded pattern against raw buffer bytes:
/// the tail is the part the gram filter has said least about.
fn eq_lowercase(ci: &[u8], window: &[u8]) -> bool {
    ci.iter()
        .zip(window)
        .rev()
        .all(|(&p, &b)| p == to_lower(b))
}

#[cfg(test)]
mod tests {
    use crate::{MatchQueue, MatcherBuilder, MatcherConfig};

    fn scan_offsets(queue: &MatchQueue) -> Vec<(u32, u32)> {
        queue.matches().iter().map(|m| (m.pattern, m.offset)).collect()
    }

    #[test]
    fn window_tracks_smallest_pattern() {
        let mut builder = MatcherBuilder::new();
        builder.add_search_cs(b"abcd", 0, 0, 0, 0).unwrap();
        let matcher = builder.compile();
        assert_eq!(matcher.search_window(), 4);
        // nothing registered on the scan side: clamped to the floor
        assert_eq!(matcher.scan_window(), 3);
    }

    #[test]
    fn scan_finds_three_patterns() {
        let mut builder = MatcherBuilder::new();
        builder.add_scan_cs(b"abcd", 0, 0, 0, 10).unwrap();
        builder.add_scan_cs(b"bcde", 0, 0, 1, 11).unwrap();
        builder.add_scan_cs(b"fghj", 0, 0, 2, 12).unwrap();
        let matcher = builder.compile();
        let mut thread = matcher.thread_ctx();
        let mut queue = MatchQueue::new();
        let buf = b"abcdefghjiklmnopqrstuvwxyz";
        assert_eq!(matcher.scan(&mut thread, &mut queue, buf), 3);
        let mut hits = scan_offsets(&queue);
        hits.sort_unstable();
        assert_eq!(hits, vec![(0, 0), (1, 1), (2, 5)]);
        // every reported match really occurs in the buffer
        for m in queue.matches() {
            let window = &buf[m.offset as usize..m.offset as usize + m.len as usize];
            assert_eq!(window.len(), 4);
        }
    }

    #[test]
    fn scan_is_case_insensitive_when_asked() {
        let mut builder = MatcherBuilder::new();
        builder.add_scan_ci(b"ABCD", 0, 0, 0, 10).unwrap();
        builder.add_scan_ci(b"bCdEfG", 0, 0, 1, 11).unwrap();
        builder.add_scan_ci(b"fghJikl", 0, 0, 2, 12).unwrap();
        let matcher = builder.compile();
        let mut thread = matcher.thread_ctx();
        let mut queue = MatchQueue::new();
        assert_eq!(
            matcher.scan(&mut thread, &mut queue, b"abcdefghjiklmnopqrstuvwxyz"),
            3
        );
        let mut hits = scan_offsets(&queue);
        hits.sort_unstable();
        assert_eq!(hits, vec![(0, 0), (1, 1), (2, 5)]);
    }

    #[test]
    fn case_sensitive_patterns_demand_exact_case() {
        let mut builder = MatcherBuilder::new();
        builder.add_scan_cs(b"abcd", 0, 0, 0, 10).unwrap();
        let matcher = builder.compile();
        let mut thread = matcher.thread_ctx();
        let mut queue = MatchQueue::new();
        assert_eq!(matcher.scan(&mut thread, &mut queue, b"xxABCDxx"), 0);
        assert_eq!(matcher.scan(&mut thread, &mut queue, b"xxabcdxx"), 1);
    }

    #[test]
    fn short_buffers_yield_nothing() {
        let mut builder = MatcherBuilder::new();
        builder.add_scan_cs(b"abcd", 0, 0, 0, 10).unwrap();
        let matcher = builder.compile();
        let mut thread = matcher.thread_ctx();
        let mut queue = MatchQueue::new();
        assert_eq!(matcher.scan(&mut thread, &mut queue, b"a"), 0);
        assert_eq!(matcher.scan(&mut thread, &mut queue, b""), 0);
        assert_eq!(matcher.scan(&mut thread, &mut queue, b"abcd"), 1);
        assert_eq!(queue.matches()[0].offset, 0);
    }

    #[test]
    fn repeated_pattern_run_counts_every_occurrence() {
        let mut builder = MatcherBuilder::new();
        builder.add_scan_cs(b"A", 0, 0, 0, 0).unwrap();
        builder.add_scan_cs(b"AA", 0, 0, 1, 1).unwrap();
        builder.add_scan_cs(b"AAA", 0, 0, 2, 2).unwrap();
        builder.add_scan_cs(b"AAAAA", 0, 0, 3, 3).unwrap();
        builder.add_scan_cs(b"AAAAAAAAAA", 0, 0, 4, 4).unwrap();
        builder.add_scan_cs(&[b'A'; 30], 0, 0, 5, 5).unwrap();
        let matcher = builder.compile();
        let mut thread = matcher.thread_ctx();
        let mut queue = MatchQueue::new();
        let buf = [b'A'; 30];
        assert_eq!(matcher.scan(&mut thread, &mut queue, &buf), 135);
    }

    #[test]
    fn mixed_length_classes_chain() {
        let mut builder = MatcherBuilder::new();
        builder.add_scan_cs(b"a", 0, 0, 0, 0).unwrap();
        builder.add_scan_cs(b"ab", 0, 0, 1, 1).unwrap();
        builder.add_scan_cs(b"abc", 0, 0, 2, 2).unwrap();
        let matcher = builder.compile();
        let mut thread = matcher.thread_ctx();
        let mut queue = MatchQueue::new();
        assert_eq!(matcher.scan(&mut thread, &mut queue, b"aabcabc"), 7);
        let mut hits = scan_offsets(&queue);
        hits.sort_unstable();
        assert_eq!(
            hits,
            vec![(0, 0), (0, 1), (0, 4), (1, 1), (1, 4), (2, 1), (2, 4)]
        );
    }

    #[test]
    fn duplicate_addition_reports_both_ids() {
        let mut builder = MatcherBuilder::new();
        builder.add_scan_cs(b"abcd", 0, 0, 7, 70).unwrap();
        builder.add_scan_cs(b"abcd", 0, 0, 8, 80).unwrap();
        let matcher = builder.compile();
        assert_eq!(matcher.pattern_count(), 1);
        let mut thread = matcher.thread_ctx();
        let mut queue = MatchQueue::new();
        assert_eq!(matcher.scan(&mut thread, &mut queue, b"xxabcdxx"), 2);
        let mut hits = scan_offsets(&queue);
        hits.sort_unstable();
        assert_eq!(hits, vec![(7, 2), (8, 2)]);
        assert_eq!(queue.rules(), &[70, 80]);
    }

    #[test]
    fn offset_constrains_the_match_start() {
        let mut builder = MatcherBuilder::new();
        builder.add_scan_cs(b"abcd", 2, 0, 0, 0).unwrap();
        let matcher = builder.compile();
        let mut thread = matcher.thread_ctx();
        let mut queue = MatchQueue::new();
        assert_eq!(matcher.scan(&mut thread, &mut queue, b"abcdabcd"), 1);
        assert_eq!(queue.matches()[0].offset, 4);
    }

    #[test]
    fn depth_constrains_the_match_end() {
        let mut builder = MatcherBuilder::new();
        builder.add_scan_cs(b"abcd", 0, 4, 0, 0).unwrap();
        let matcher = builder.compile();
        let mut thread = matcher.thread_ctx();
        let mut queue = MatchQueue::new();
        assert_eq!(matcher.scan(&mut thread, &mut queue, b"abcdabcd"), 1);
        assert_eq!(queue.matches()[0].offset, 0);
    }

    #[test]
    fn search_set_is_independent_of_scan_set() {
        let mut builder = MatcherBuilder::new();
        builder.add_search_cs(b"abcd", 0, 0, 0, 10).unwrap();
        builder.add_search_cs(b"bcde", 0, 0, 1, 11).unwrap();
        builder.add_search_cs(b"fghj", 0, 0, 2, 12).unwrap();
        builder.add_scan_cs(b"zzzz", 0, 0, 3, 13).unwrap();
        let matcher = builder.compile();
        let mut thread = matcher.thread_ctx();
        let mut queue = MatchQueue::new();
        let buf = b"abcdefghjiklmnopqrstuvwxyz";
        assert_eq!(matcher.scan(&mut thread, &mut queue, buf), 0);
        assert_eq!(matcher.search(&mut thread, &mut queue, buf), 3);
        let mut hits = scan_offsets(&queue);
        hits.sort_unstable();
        assert_eq!(hits, vec![(0, 0), (1, 1), (2, 5)]);
    }

    #[test]
    fn search_handles_short_pattern_classes() {
        let mut builder = MatcherBuilder::new();
        builder.add_search_ci(b"K", 0, 0, 0, 0).unwrap();
        builder.add_search_cs(b"lm", 0, 0, 1, 1).unwrap();
        builder.add_search_cs(b"nopq", 0, 0, 2, 2).unwrap();
        let matcher = builder.compile();
        let mut thread = matcher.thread_ctx();
        let mut queue = MatchQueue::new();
        assert_eq!(matcher.search(&mut thread, &mut queue, b"jklmnopqr"), 3);
        let mut hits = scan_offsets(&queue);
        hits.sort_unstable();
        assert_eq!(hits, vec![(0, 1), (1, 2), (2, 4)]);
    }

    #[test]
    fn bloom_filter_never_hides_a_match() {
        let patterns: [&[u8]; 5] = [b"abcd", b"abcz", b"aduup", b"zzzzzz", b"unrelated"];
        let buf = b"xxabcdyyaduupzzzzzzqqunrelatedqq";

        let mut collected = Vec::new();
        for config in [
            MatcherConfig::default(),
            // one-bit filters collide constantly but may only pass more
            MatcherConfig {
                bloom_bits: 1,
                bloom_iterations: 1,
            },
        ] {
            let mut builder = MatcherBuilder::with_config(config);
            for (i, p) in patterns.iter().enumerate() {
                builder.add_scan_cs(p, 0, 0, i as u32, i as u32).unwrap();
            }
            let matcher = builder.compile();
            let mut thread = matcher.thread_ctx();
            let mut queue = MatchQueue::new();
            matcher.scan(&mut thread, &mut queue, buf);
            let mut hits = scan_offsets(&queue);
            hits.sort_unstable();
            collected.push(hits);
        }
        assert_eq!(collected[0], collected[1]);
        assert!(!collected[0].is_empty());
    }

    #[test]
    fn matches_survive_binary_payloads() {
        let mut builder = MatcherBuilder::new();
        builder.add_scan_cs(&[0x00, 0xff, 0x80, 0x7f], 0, 0, 0, 0).unwrap();
        let matcher = builder.compile();
        let mut thread = matcher.thread_ctx();
        let mut queue = MatchQueue::new();
        let mut buf = vec![0u8; 64];
        buf.extend_from_slice(&[0x00, 0xff, 0x80, 0x7f]);
        buf.extend_from_slice(&[0xde, 0xad]);
        assert_eq!(matcher.scan(&mut thread, &mut queue, &buf), 1);
        assert_eq!(queue.matches()[0].offset, 64);
    }

    #[test]
    fn empty_matcher_scans_quietly() {
        let matcher = MatcherBuilder::new().compile();
        let mut thread = matcher.thread_ctx();
        let mut queue = MatchQueue::new();
        assert_eq!(matcher.scan(&mut thread, &mut queue, b"anything at all"), 0);
        assert_eq!(matcher.search(&mut thread, &mut queue, b"anything at all"), 0);
    }

    #[test]
    fn cs_and_ci_copies_of_the_same_bytes_both_fire() {
        let mut builder = MatcherBuilder::new();
        builder.add_scan_cs(b"abcd", 0, 0, 0, 10).unwrap();
        builder.add_scan_ci(b"ABCD", 0, 0, 1, 11).unwrap();
        let matcher = builder.compile();
        assert_eq!(matcher.pattern_count(), 2);
        let mut thread = matcher.thread_ctx();
        let mut queue = MatchQueue::new();
        assert_eq!(matcher.scan(&mut thread, &mut queue, b"abcd"), 2);
        // with the wrong case only the insensitive copy survives
        queue.clear();
        assert_eq!(matcher.scan(&mut thread, &mut queue, b"aBcD"), 1);
        assert_eq!(queue.matches()[0].pattern, 1);
    }

    #[test]
    fn two_byte_pattern_matches_its_overlaps() {
        let mut builder = MatcherBuilder::new();
        builder.add_scan_cs(b"aa", 0, 0, 0, 0).unwrap();
        let matcher = builder.compile();
        let mut thread = matcher.thread_ctx();
        let mut queue = MatchQueue::new();
        assert_eq!(matcher.scan(&mut thread, &mut queue, b"aaaa"), 3);
    }

    #[test]
    fn offset_and_depth_combine() {
        let mut builder = MatcherBuilder::new();
        builder.add_scan_cs(b"abcd", 2, 10, 0, 0).unwrap();
        let matcher = builder.compile();
        let mut thread = matcher.thread_ctx();
        let mut queue = MatchQueue::new();
        // occurrences at 0 (before offset), 4 (inside) and 8 (past depth)
        assert_eq!(matcher.scan(&mut thread, &mut queue, b"abcdabcdabcd"), 1);
        assert_eq!(queue.matches()[0].offset, 4);
    }

    #[test]
    fn long_patterns_use_a_deep_window() {
        let mut builder = MatcherBuilder::new();
        builder.add_scan_cs(b"abcdefghijkl", 0, 0, 0, 0).unwrap();
        let matcher = builder.compile();
        assert_eq!(matcher.scan_window(), 12);
        let mut thread = matcher.thread_ctx();
        let mut queue = MatchQueue::new();
        assert_eq!(
            matcher.scan(&mut thread, &mut queue, b"zzzabcdefghijklzzz"),
            1
        );
        assert_eq!(queue.matches()[0].offset, 3);
        assert_eq!(matcher.scan(&mut thread, &mut queue, b"abcdefghijk"), 0);
    }

    #[test]
    fn stats_describe_the_compiled_shape() {
        let mut builder = MatcherBuilder::new();
        builder.add_scan_cs(b"abcd", 0, 0, 0, 0).unwrap();
        builder.add_scan_cs(b"bcde", 0, 0, 1, 1).unwrap();
        builder.add_scan_cs(b"fghj", 0, 0, 2, 2).unwrap();
        builder.add_search_ci(b"x", 0, 0, 3, 3).unwrap();
        let matcher = builder.compile();
        let stats = matcher.stats();
        assert_eq!(stats.unique_patterns, 4);
        assert_eq!(stats.end_matches, 4);
        assert_eq!(stats.max_pattern_id, 3);
        assert_eq!(stats.scan.window, 4);
        assert_eq!(stats.scan.longer_patterns, 3);
        assert_eq!(stats.scan.one_byte_patterns, 0);
        // three distinct tail grams, one filter each
        assert_eq!(stats.scan.bloom_filters, 3);
        assert_eq!(stats.scan.bloom_bytes, 3 * 128);
        assert_eq!(stats.search.one_byte_patterns, 1);
        assert_eq!(stats.search.bloom_filters, 0);
        let text = stats.to_string();
        assert!(text.contains("4 unique patterns"));
        assert!(text.contains("scan: window 4"));
    }

    #[test]
    fn engine_agrees_with_naive_search() {
        // every occurrence the obvious quadratic search finds, the
        // engine must find too, and nothing more
        let patterns: [&[u8]; 5] = [b"a", b"ab", b"aba", b"abab", b"bb"];
        let buffers: [&[u8]; 6] = [
            b"",
            b"a",
            b"ababab",
            b"aababbababa",
            b"bbbbbb",
            b"xyabxyababx",
        ];
        let mut builder = MatcherBuilder::new();
        for (i, p) in patterns.iter().enumerate() {
            builder.add_scan_cs(p, 0, 0, i as u32, i as u32).unwrap();
        }
        let matcher = builder.compile();
        let mut thread = matcher.thread_ctx();

        for buf in buffers {
            let mut expected = Vec::new();
            for (i, p) in patterns.iter().enumerate() {
                for pos in 0..buf.len().saturating_sub(p.len() - 1) {
                    if &buf[pos..pos + p.len()] == *p {
                        expected.push((i as u32, pos as u32));
                    }
                }
            }
            expected.sort_unstable();

            let mut queue = MatchQueue::new();
            matcher.scan(&mut thread, &mut queue, buf);
            let mut found = scan_offsets(&queue);
            found.sort_unstable();
            assert_eq!(found, expected, "buffer {:?}", buf);
        }
    }

    #[test]
    fn thread_stats_observe_the_filtering() {
        let mut builder = MatcherBuilder::new();
        builder.add_scan_cs(b"abcd", 0, 0, 0, 0).unwrap();
        let matcher = builder.compile();
        let mut thread = matcher.thread_ctx();
        let mut queue = MatchQueue::new();

        assert_eq!(matcher.scan(&mut thread, &mut queue, b"zzzzzzzz"), 0);
        let stats = *thread.stats();
        assert_eq!(stats.calls, 1);
        assert_eq!(stats.potential_matches, 0);
        assert_eq!(stats.shifts, 3);
        assert_eq!(stats.shifted_bytes, 6);
        assert!((stats.avg_shift() - 2.0).abs() < f64::EPSILON);

        thread.reset_stats();
        assert_eq!(matcher.scan(&mut thread, &mut queue, b"xxabcdxx"), 1);
        let stats = *thread.stats();
        assert_eq!(stats.calls, 1);
        assert_eq!(stats.potential_matches, 1);
        assert_eq!(stats.bloom_checks, 1);
        assert_eq!(stats.bloom_skips, 0);
        assert_eq!(stats.verify_attempts, 1);
        assert_eq!(stats.verify_matches, 1);
    }
}
