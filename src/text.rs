//! Pure text transforms used by the streaming pipeline.
//!
//! None of these functions allocate more than one output string or touch any
//! shared state, so they are safe to call from any task.

/// Emoji and pictograph code points removed before a reply is stored.
///
/// Covers the pictograph planes, dingbats and misc symbols, regional indicator
/// pairs, variation selectors, and the zero-width joiner used to build emoji
/// sequences.
fn is_emoji(c: char) -> bool {
    matches!(
        c as u32,
        0x1F300..=0x1F9FF
            | 0x1FA70..=0x1FAFF
            | 0x2600..=0x26FF
            | 0x2700..=0x27BF
            | 0x2300..=0x23FF
            | 0x2B50
            | 0x2139
            | 0x2122
            | 0x00A9
            | 0x00AE
            | 0xFE00..=0xFE0F
            | 0x200D
            | 0x1F1E0..=0x1F1FF
    )
}

/// Remove emoji code points, leaving every other character untouched.
pub fn strip_emoji(text: &str) -> String {
    text.chars().filter(|&c| !is_emoji(c)).collect()
}

/// Replace every run of two or more whitespace characters with one space and trim.
///
/// A lone newline is kept so sentence splitting can still see it.
pub fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut run = String::new();

    for c in text.chars() {
        if c.is_whitespace() {
            run.push(c);
            continue;
        }
        flush_whitespace(&mut out, &mut run);
        out.push(c);
    }
    flush_whitespace(&mut out, &mut run);

    out.trim().to_string()
}

fn flush_whitespace(out: &mut String, run: &mut String) {
    match run.chars().count() {
        0 => {}
        1 => out.push_str(run),
        _ => out.push(' '),
    }
    run.clear();
}

/// Remove `<think>...</think>` reasoning blocks.
///
/// An unterminated opening tag drops everything after it, since the model never
/// left its reasoning phase.
pub fn strip_reasoning_tags(text: &str) -> String {
    const OPEN: &str = "<think>";
    const CLOSE: &str = "</think>";

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find(OPEN) {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + OPEN.len()..];
        match after_open.find(CLOSE) {
            Some(end) => rest = &after_open[end + CLOSE.len()..],
            None => {
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);

    // A stray closing tag means the opening one came before this text began.
    match out.rfind(CLOSE) {
        Some(idx) => out[idx + CLOSE.len()..].trim().to_string(),
        None => out.trim().to_string(),
    }
}

/// First non-empty sentence, splitting on `.`, `!`, `?` and newlines.
pub fn first_sentence(text: &str) -> Option<&str> {
    text.split(['.', '!', '?', '\n'])
        .map(str::trim)
        .find(|s| !s.is_empty())
}

/// Clean a model reply for storage: reasoning blocks, emoji, and extra whitespace removed.
pub fn sanitize_reply(reply: &str) -> String {
    collapse_whitespace(&strip_emoji(&strip_reasoning_tags(reply)))
}

/// Build the compact record stored for one chat exchange.
///
/// Returns `None` when the reply has no usable sentence once sanitized.
pub fn compose_memory_record(user_text: &str, reply: &str) -> Option<String> {
    let cleaned = sanitize_reply(reply);
    let sentence = first_sentence(&cleaned)?;
    Some(format!(
        "Log - Human stated: \"{}\" | AI replied: \"{}\"",
        user_text, sentence
    ))
}

/// Strip a `data:image/<type>;base64,` envelope if present.
pub fn strip_data_url_prefix(payload: &str) -> &str {
    let trimmed = payload.trim();
    let Some(rest) = trimmed.strip_prefix("data:image/") else {
        return trimmed;
    };
    let Some((subtype, data)) = rest.split_once(";base64,") else {
        return trimmed;
    };
    if !subtype.is_empty() && subtype.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        data
    } else {
        trimmed
    }
}

/// Rough token count for budgeting prompt history (about four bytes per token).
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}
