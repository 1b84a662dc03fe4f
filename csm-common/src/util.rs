//! Small text helpers.

/// Keep at most the first `max_chars` characters of `s`.
///
/// Cuts on character boundaries, so multi-byte text never panics.
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
