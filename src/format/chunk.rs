//! Splitting long replies into messages that fit Telegram's length limit.
//!
//! Chunks are cut at the coarsest boundary that works: paragraphs, then
//! lines, then sentences, then words. A single token longer than the limit
//! is cut at the limit. Separators stay attached to the end of the chunk
//! before the cut, so concatenating the chunks gives back the original text.
//!
//! Lengths are UTF-16 code units, which is what Telegram counts: an emoji
//! outside the Basic Multilingual Plane takes two.

use regex::Regex;
use std::sync::LazyLock;

/// Telegram's limit on message text length.
pub const TELEGRAM_MESSAGE_LIMIT: usize = 4096;

static PARAGRAPH_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t]*\n\s*").unwrap());
static LINE_BREAK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n").unwrap());
static SENTENCE_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[.!?…]+["'»”)\]]*\s+"#).unwrap());
static WORD_GAP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static PROGRESS_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\\?\(\d+/\d+\\?\) ").unwrap());

#[derive(Debug, Clone, Copy)]
enum Boundary {
    Paragraph,
    Line,
    Sentence,
    Word,
}

impl Boundary {
    fn pattern(self) -> &'static Regex {
        match self {
            Boundary::Paragraph => &PARAGRAPH_BREAK,
            Boundary::Line => &LINE_BREAK,
            Boundary::Sentence => &SENTENCE_END,
            Boundary::Word => &WORD_GAP,
        }
    }

    /// The next finer boundary, `None` once only hard cuts are left.
    fn finer(self) -> Option<Boundary> {
        match self {
            Boundary::Paragraph => Some(Boundary::Line),
            Boundary::Line => Some(Boundary::Sentence),
            Boundary::Sentence => Some(Boundary::Word),
            Boundary::Word => None,
        }
    }
}

/// Length of `s` as Telegram counts it.
pub fn message_len(s: &str) -> usize {
    s.encode_utf16().count()
}

/// Split `text` into segments ending right after each match of `separator`.
fn split_after<'a>(text: &'a str, separator: &Regex) -> Vec<&'a str> {
    let mut segments = Vec::new();
    let mut start = 0;
    for m in separator.find_iter(text) {
        if m.end() > start {
            segments.push(&text[start..m.end()]);
            start = m.end();
        }
    }
    if start < text.len() {
        segments.push(&text[start..]);
    }
    segments
}

/// Split `text` into chunks of at most `limit` UTF-16 code units.
///
/// Returns an empty list for empty input and the input itself when it
/// already fits. A `limit` of zero is treated as one.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    if text.is_empty() {
        return Vec::new();
    }
    if message_len(text) <= limit {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    pack(text, limit, Some(Boundary::Paragraph), &mut chunks);
    chunks
}

/// Greedily pack the segments of `text` at `boundary` into chunks.
fn pack(text: &str, limit: usize, boundary: Option<Boundary>, out: &mut Vec<String>) {
    let Some(boundary) = boundary else {
        hard_split(text, limit, out);
        return;
    };

    let mut current = String::new();
    let mut current_len = 0;

    for segment in split_after(text, boundary.pattern()) {
        let len = message_len(segment);

        if len > limit {
            if !current.is_empty() {
                out.push(std::mem::take(&mut current));
            }
            let mut pieces = Vec::new();
            pack(segment, limit, boundary.finer(), &mut pieces);
            // The tail stays open so the following segments can join it.
            current = pieces.pop().unwrap_or_default();
            current_len = message_len(&current);
            out.extend(pieces);
            continue;
        }

        if current_len + len > limit {
            out.push(std::mem::take(&mut current));
            current_len = 0;
        }
        current.push_str(segment);
        current_len += len;
    }

    if !current.is_empty() {
        out.push(current);
    }
}

/// Cut at the limit, keeping `\x` escape pairs together. A character wider
/// than the limit still makes a chunk of its own.
fn hard_split(text: &str, limit: usize, out: &mut Vec<String>) {
    let chars: Vec<char> = text.chars().collect();
    let mut start = 0;
    while start < chars.len() {
        let mut end = start;
        let mut units = 0;
        while end < chars.len() && (end == start || units + chars[end].len_utf16() <= limit) {
            units += chars[end].len_utf16();
            end += 1;
        }
        if end < chars.len() && end - start > 1 && ends_with_open_escape(&chars[start..end]) {
            end -= 1;
        }
        out.push(chars[start..end].iter().collect());
        start = end;
    }
}

fn ends_with_open_escape(chars: &[char]) -> bool {
    let trailing = chars.iter().rev().take_while(|&&c| c == '\\').count();
    trailing % 2 == 1
}

fn progress_marker(index: usize, total: usize) -> String {
    format!("\\({index}/{total}\\) ")
}

/// Prefix each chunk with an escaped `(i/n) ` marker when there is more than one.
pub fn with_progress(chunks: Vec<String>) -> Vec<String> {
    let total = chunks.len();
    if total <= 1 {
        return chunks;
    }
    chunks
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| format!("{}{}", progress_marker(i + 1, total), chunk))
        .collect()
}

/// Like [`split_message`] followed by [`with_progress`], but leaves room for
/// the marker so every annotated chunk still fits `limit`.
pub fn split_with_progress(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let chunks = split_message(text, limit);
    if chunks.len() <= 1 {
        return chunks;
    }

    let mut total = chunks.len();
    loop {
        let reserve = message_len(&progress_marker(total, total));
        let chunks = split_message(text, limit.saturating_sub(reserve).max(1));
        // Marker width only grows with the digit count of the total.
        if message_len(&progress_marker(chunks.len(), chunks.len())) <= reserve {
            return with_progress(chunks);
        }
        total = chunks.len();
    }
}

/// Remove a leading progress marker, escaped or not.
pub fn strip_progress(chunk: &str) -> &str {
    match PROGRESS_MARKER.find(chunk) {
        Some(m) => &chunk[m.end()..],
        None => chunk,
    }
}
