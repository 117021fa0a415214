//! Fuzzy text similarity in `[0, 1]`.
//!
//! Three views of the same comparison are combined: the plain indel ratio,
//! the best alignment of the shorter text inside the longer one, and a
//! token-set ratio that ignores word order and duplicated words.

use std::collections::{BTreeSet, HashMap};

/// Lowercases and collapses all whitespace runs into single spaces.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Texts are compared on at most this many characters.
pub const MAX_COMPARE_CHARS: usize = 2000;

fn capped(text: &str) -> Vec<char> {
    text.chars().take(MAX_COMPARE_CHARS).collect()
}

/// Bit-parallel LCS over a fixed pattern (Hyyrö's formulation).
///
/// Bit `i` of the match mask for a character is set when `pattern[i]` is
/// that character. After scanning a text, the LCS length is the number of
/// cleared bits in the state vector.
struct LcsPattern {
    len: usize,
    words: usize,
    masks: HashMap<char, Vec<u64>>,
}

impl LcsPattern {
    fn new(pattern: &[char]) -> Self {
        let words = pattern.len().div_ceil(64);
        let mut masks: HashMap<char, Vec<u64>> = HashMap::new();
        for (i, &c) in pattern.iter().enumerate() {
            masks.entry(c).or_insert_with(|| vec![0; words])[i / 64] |= 1u64 << (i % 64);
        }
        Self {
            len: pattern.len(),
            words,
            masks,
        }
    }

    fn lcs_len(&self, text: &[char]) -> usize {
        if self.len == 0 || text.is_empty() {
            return 0;
        }
        let mut state = vec![u64::MAX; self.words];
        for c in text {
            let Some(mask) = self.masks.get(c) else {
                continue;
            };
            let mut carry = false;
            for (v, &m) in state.iter_mut().zip(mask) {
                let u = *v & m;
                let (sum, c1) = v.overflowing_add(u);
                let (sum, c2) = sum.overflowing_add(carry as u64);
                carry = c1 || c2;
                *v = sum | (*v & !u);
            }
        }

        let mut matched = 0;
        for (i, v) in state.iter().enumerate() {
            let bits = (self.len - i * 64).min(64);
            let valid = if bits == 64 { u64::MAX } else { (1u64 << bits) - 1 };
            matched += bits - (v & valid).count_ones() as usize;
        }
        matched
    }
}

fn indel_ratio(lcs: usize, a_len: usize, b_len: usize) -> f64 {
    if a_len == 0 || b_len == 0 {
        return 0.0;
    }
    2.0 * lcs as f64 / (a_len + b_len) as f64
}

/// Indel similarity: `2 * LCS / (len(a) + len(b))`.
pub fn ratio(a: &str, b: &str) -> f64 {
    let a = capped(a);
    let b = capped(b);
    let (short, long) = if a.len() <= b.len() { (&a, &b) } else { (&b, &a) };
    indel_ratio(LcsPattern::new(short).lcs_len(long), a.len(), b.len())
}

/// Best ratio of the shorter string against equally long windows of the longer.
pub fn partial_ratio(a: &str, b: &str) -> f64 {
    let a = capped(a);
    let b = capped(b);
    let (short, long) = if a.len() <= b.len() { (&a, &b) } else { (&b, &a) };
    if short.is_empty() {
        return 0.0;
    }
    if long.windows(short.len()).any(|w| w == short.as_slice()) {
        return 1.0;
    }

    let pattern = LcsPattern::new(short);
    let mut best_lcs = 0;
    let last = long.len() - short.len();
    for (start, window) in long.windows(short.len()).enumerate() {
        // A window opening on an unshared character never beats the next one.
        if start < last && !pattern.masks.contains_key(&window[0]) {
            continue;
        }
        best_lcs = best_lcs.max(pattern.lcs_len(window));
        if best_lcs == short.len() {
            break;
        }
    }
    indel_ratio(best_lcs, short.len(), short.len())
}

/// Ratio over sorted token sets, tolerant of reordering and extra words.
pub fn token_set_ratio(a: &str, b: &str) -> f64 {
    let ta: BTreeSet<&str> = a.split_whitespace().collect();
    let tb: BTreeSet<&str> = b.split_whitespace().collect();
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }

    let common: Vec<&str> = ta.intersection(&tb).copied().collect();
    let only_a: Vec<&str> = ta.difference(&tb).copied().collect();
    let only_b: Vec<&str> = tb.difference(&ta).copied().collect();

    let base = common.join(" ");
    let join = |rest: &[&str]| -> String {
        match (base.is_empty(), rest.is_empty()) {
            (true, _) => rest.join(" "),
            (false, true) => base.clone(),
            (false, false) => format!("{} {}", base, rest.join(" ")),
        }
    };
    let with_a = join(&only_a);
    let with_b = join(&only_b);

    let mut best = ratio(&with_a, &with_b);
    if !base.is_empty() {
        best = best.max(ratio(&base, &with_a)).max(ratio(&base, &with_b));
    }
    best
}

/// Best of the three measures over normalized text.
pub fn score(a: &str, b: &str) -> f64 {
    let a = normalize(a);
    let b = normalize(b);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }
    ratio(&a, &b)
        .max(partial_ratio(&a, &b))
        .max(token_set_ratio(&a, &b))
}
