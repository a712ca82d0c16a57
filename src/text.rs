//! Text helpers shared by the fetcher and the LLM provider

/// The first `max_chars` characters of `text`, cut on a char boundary
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Like [`truncate_chars`], marking a cut with a trailing `...`
pub fn truncate_with_ellipsis(text: &str, max_chars: usize) -> String {
    let kept = truncate_chars(text, max_chars);
    if kept.len() < text.len() {
        format!("{kept}...")
    } else {
        kept.to_string()
    }
}
