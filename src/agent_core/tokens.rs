//! Token estimation and budget truncation.
//!
//! Uses the same rough heuristic the model-facing prompts assume: about four
//! characters per token. Counting is by `char`, so multi-byte text is never
//! split mid-character.

// ─── Constants ──────────────────────────────────────────────────────────────

/// Characters per token for the budget heuristic.
const CHARS_PER_TOKEN: usize = 4;

// ─── UTF-8 Safe Truncation ──────────────────────────────────────────────────

/// Truncate a string to at most `max_bytes` bytes on a valid UTF-8 char boundary.
///
/// Returns a `&str` that is always valid UTF-8 and at most `max_bytes` long.
/// If the byte at `max_bytes` is inside a multi-byte character, the slice is
/// shortened to the preceding character boundary.
pub(crate) fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Truncate for log output, appending `...` when anything was cut.
pub(crate) fn preview(s: &str, max_bytes: usize) -> String {
    let cut = truncate_utf8(s, max_bytes);
    if cut.len() < s.len() {
        format!("{cut}...")
    } else {
        cut.to_string()
    }
}

// ─── Public API ─────────────────────────────────────────────────────────────

/// Estimate the token count for a piece of text.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Fit `content` into `max_tokens`, keeping its head and tail.
///
/// Content within budget is returned unchanged, as is everything when
/// `max_tokens` is zero. Otherwise `2 * (max_tokens * 4 / 2)` characters
/// survive, split evenly around a marker naming the limit.
pub fn truncate_to_budget(content: &str, max_tokens: usize) -> String {
    if max_tokens == 0 {
        return content.to_string();
    }

    let estimated = estimate_tokens(content);
    if estimated <= max_tokens {
        return content.to_string();
    }

    tracing::info!(
        estimated_tokens = estimated,
        max_tokens,
        "content exceeds token limit, truncating"
    );

    let half_keep = max_tokens * CHARS_PER_TOKEN / 2;
    let total_chars = content.chars().count();

    let head_end = byte_offset_of_char(content, half_keep);
    let tail_start = byte_offset_of_char(content, total_chars - half_keep);

    format!(
        "{}\n\n[...Content truncated to fit within {max_tokens} token limit...]\n\n{}",
        &content[..head_end],
        &content[tail_start..]
    )
}

/// Byte offset of the `n`th char, or the string length when out of range.
fn byte_offset_of_char(s: &str, n: usize) -> usize {
    s.char_indices().nth(n).map_or(s.len(), |(i, _)| i)
}

// ─── Tests ──────────────────────────────────────────────────────────────────
