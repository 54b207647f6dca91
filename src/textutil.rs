//! UTF-8-safe text helpers for previews, log excerpts, and traceback tails.

/// Truncate by characters and append `suffix` when truncation occurs.
pub fn truncate_with_suffix_by_chars(text: &str, max_chars: usize, suffix: &str) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let prefix: String = text.chars().take(max_chars).collect();
    format!("{prefix}{suffix}")
}

/// Short single-line preview used in log lines and status events.
pub fn preview(text: &str, max_chars: usize) -> String {
    let flattened = text.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_with_suffix_by_chars(&flattened, max_chars, "...")
}

/// Keep only the last `max_lines` lines of `text`.
///
/// Tracebacks put the useful frames at the bottom, so excerpts keep the tail.
pub fn tail_lines(text: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(max_lines);
    lines[start..].join("\n")
}
