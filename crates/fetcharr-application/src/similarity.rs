// SPDX-License-Identifier: GPL-3.0-or-later
use unicode_normalization::UnicodeNormalization;

/// Normalized Levenshtein similarity in [0, 1] over case-folded,
/// NFKD-normalized, alphanumeric-only forms of both strings.
pub fn normalized_similarity(left: &str, right: &str) -> f64 {
    let left = normalize_for_match(left);
    let right = normalize_for_match(right);

    if left.is_empty() && right.is_empty() {
        return 1.0;
    }
    if left.is_empty() || right.is_empty() {
        return 0.0;
    }

    let distance = levenshtein_distance(&left, &right) as f64;
    let max_len = left.chars().count().max(right.chars().count()) as f64;
    (1.0 - distance / max_len).clamp(0.0, 1.0)
}

/// Character-overlap ratio used as a sanity check against high-fuzzy false
/// matches: the fraction of distinct characters of the shorter string that
/// also occur in the longer one.
pub fn char_overlap(left: &str, right: &str) -> f64 {
    let left = normalize_for_match(left);
    let right = normalize_for_match(right);
    if left.is_empty() || right.is_empty() {
        return 0.0;
    }

    let (shorter, longer) = if left.chars().count() <= right.chars().count() {
        (&left, &right)
    } else {
        (&right, &left)
    };

    let mut distinct = Vec::new();
    for c in shorter.chars() {
        if !distinct.contains(&c) {
            distinct.push(c);
        }
    }
    let hits = distinct.iter().filter(|c| longer.contains(**c)).count();
    hits as f64 / distinct.len() as f64
}

fn normalize_for_match(value: &str) -> String {
    value
        .nfkd()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

fn levenshtein_distance(left: &str, right: &str) -> usize {
    let left: Vec<char> = left.chars().collect();
    let right: Vec<char> = right.chars().collect();

    if left.is_empty() {
        return right.len();
    }
    if right.is_empty() {
        return left.len();
    }

    let mut previous: Vec<usize> = (0..=right.len()).collect();
    let mut current = vec![0usize; right.len() + 1];

    for (i, lc) in left.iter().enumerate() {
        current[0] = i + 1;
        for (j, rc) in right.iter().enumerate() {
            let substitution = previous[j] + usize::from(lc != rc);
            current[j + 1] = substitution
                .min(previous[j + 1] + 1)
                .min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[right.len()]
}
