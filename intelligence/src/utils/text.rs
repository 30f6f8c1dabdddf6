//! Text normalization and token-set similarity for category matching.

use std::collections::BTreeSet;

/// Normalize a candidate string for matching: lowercase, punctuation
/// stripped, whitespace collapsed.
pub fn normalize(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last_was_space = true;

    for ch in input.chars() {
        if ch.is_alphanumeric() {
            out.extend(ch.to_lowercase());
            last_was_space = false;
        } else if !last_was_space {
            out.push(' ');
            last_was_space = true;
        }
    }

    while out.ends_with(' ') {
        out.pop();
    }
    out
}

/// Sorted, deduplicated token set of a normalized string.
fn token_set(normalized: &str) -> BTreeSet<&str> {
    normalized.split(' ').filter(|t| !t.is_empty()).collect()
}

fn join(tokens: &BTreeSet<&str>) -> String {
    tokens.iter().copied().collect::<Vec<_>>().join(" ")
}

fn ratio(a: &str, b: &str) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    strsim::normalized_levenshtein(a, b)
}

/// Token-set similarity score in 0–100.
///
/// Both inputs are normalized, split into token sets, and compared as the
/// best of (intersection vs intersection+left, intersection vs
/// intersection+right, full vs full) so word order and repeated words do
/// not matter. "Cables & Adapters" vs "adapters cables" scores 100.
pub fn token_set_score(a: &str, b: &str) -> u8 {
    let a_norm = normalize(a);
    let b_norm = normalize(b);
    let a_tokens = token_set(&a_norm);
    let b_tokens = token_set(&b_norm);

    if a_tokens.is_empty() || b_tokens.is_empty() {
        return if a_tokens == b_tokens { 100 } else { 0 };
    }

    let intersection: BTreeSet<&str> = a_tokens.intersection(&b_tokens).copied().collect();
    let sect = join(&intersection);
    let combined_a = join(&a_tokens);
    let combined_b = join(&b_tokens);

    let mut best = ratio(&combined_a, &combined_b);
    if !intersection.is_empty() {
        best = best
            .max(ratio(&sect, &combined_a))
            .max(ratio(&sect, &combined_b));
        // Identical token sets are a perfect match regardless of length.
        if intersection == a_tokens && intersection == b_tokens {
            best = 1.0;
        }
    }

    (best * 100.0).round().clamp(0.0, 100.0) as u8
}
