//! Text helpers

/// Suffix appended by [`truncate_with_marker`].
pub const TRUNCATION_MARKER: &str = "... [truncated]";

/// Cut `text` to at most `max_chars` characters, appending the truncation marker
/// when anything was dropped.
pub fn truncate_with_marker(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}{}", &text[..byte_idx], TRUNCATION_MARKER),
        None => text.to_string(),
    }
}

/// Cut `text` so that, marker included, it is at most `max_chars` characters.
pub fn truncate_within(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(TRUNCATION_MARKER.chars().count());
    truncate_with_marker(text, keep)
}

/// Make a component identifier usable inside a file name.
pub fn sanitize_component(component: &str) -> String {
    component
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}
