//! Edit-distance suggestions for misspelled names.

/// Default maximum edit distance for a suggestion.
pub const DEFAULT_THRESHOLD: usize = 3;

/// Levenshtein distance between two strings, counted in characters.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];
    for i in 1..=a.len() {
        curr[0] = i;
        for j in 1..=b.len() {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Closest candidate within `threshold` edits, compared case-insensitively.
///
/// Ties go to the candidate listed first.
pub fn suggest<'a>(
    target: &str,
    candidates: impl IntoIterator<Item = &'a str>,
    threshold: usize,
) -> Option<String> {
    let target = target.to_lowercase();
    let mut best: Option<(usize, &str)> = None;
    for candidate in candidates {
        let distance = levenshtein(&target, &candidate.to_lowercase());
        if distance > threshold {
            continue;
        }
        if best.map_or(true, |(d, _)| distance < d) {
            best = Some((distance, candidate));
        }
    }
    best.map(|(_, name)| name.to_string())
}

/// `" Did you mean 'x'?"`, or an empty string.
pub fn did_you_mean(suggestion: Option<&str>) -> String {
    match suggestion {
        Some(s) => format!(" Did you mean '{}'?", s),
        None => String::new(),
    }
}
