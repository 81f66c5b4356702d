//! Bounded one-line previews for CLI listings.

/// Collapse whitespace and cap length so listings stay one row per item.
pub fn compact_line(input: &str, max_chars: usize) -> String {
    let collapsed = input.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_chars {
        return collapsed;
    }
    let preview: String = collapsed.chars().take(max_chars).collect();
    format!("{}...", preview)
}
