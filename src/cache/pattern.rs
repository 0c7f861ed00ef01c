//! Glob matching for key patterns (`*` and `?`), as used by SCAN MATCH.

/// Returns true if `key` matches `pattern`.
///
/// `*` matches any run of characters (including `:`), `?` matches exactly one.
pub fn glob_match(pattern: &str, key: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let key: Vec<char> = key.chars().collect();

    let (mut p, mut k) = (0, 0);
    // Position of the last `*` seen and the key index it was matched against
    let mut backtrack: Option<(usize, usize)> = None;

    while k < key.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == key[k]) {
            p += 1;
            k += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            backtrack = Some((p, k));
            p += 1;
        } else if let Some((star, matched)) = backtrack {
            p = star + 1;
            k = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|c| *c == '*')
}
