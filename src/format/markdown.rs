//! Telegram MarkdownV2 rendering for model output.
//!
//! Models answer in loose Markdown (`**bold**`, `# headings`, `<br>`), while
//! MarkdownV2 rejects the whole message if any reserved character is left
//! unescaped. The renderer keeps the emphasis it recognizes and escapes
//! everything else, so a stray `*` or `.` can never break a send.

use regex::Regex;
use std::sync::LazyLock;

use crate::format::chunk::strip_progress;

/// Characters MarkdownV2 requires to be escaped outside of entities.
const RESERVED: &[char] = &[
    '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!',
    '\\',
];

static LINE_BREAK_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<br\s*/?>").unwrap());

/// Paired spans recognized in model output and their MarkdownV2 delimiters.
const DOUBLE_SPANS: &[(&str, &str)] = &[("**", "*"), ("__", "__"), ("~~", "~"), ("||", "||")];

/// Remove `marker` when it occurs an even number of times, otherwise leave
/// the text alone so literal characters survive.
fn drop_paired(text: &str, marker: &str) -> String {
    let count = text.matches(marker).count();
    if count > 0 && count % 2 == 0 {
        text.replace(marker, "")
    } else {
        text.to_string()
    }
}

fn push_escaped(out: &mut String, c: char) {
    if RESERVED.contains(&c) {
        out.push('\\');
    }
    out.push(c);
}

/// Escape every reserved character. No markup survives.
pub fn escape_markdown_v2(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + text.len() / 4);
    for c in text.chars() {
        push_escaped(&mut out, c);
    }
    out
}

fn escape_chars(chars: &[char]) -> String {
    let mut out = String::with_capacity(chars.len() + chars.len() / 4);
    for &c in chars {
        push_escaped(&mut out, c);
    }
    out
}

/// Inside `code` and ```pre``` only the backtick and backslash are escaped.
fn escape_code(chars: &[char]) -> String {
    let mut out = String::with_capacity(chars.len());
    for &c in chars {
        if c == '`' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Inside the `(...)` part of a link only `)` and backslash are escaped.
fn escape_url(chars: &[char]) -> String {
    let mut out = String::with_capacity(chars.len());
    for &c in chars {
        if c == ')' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Convert model output into MarkdownV2 that Telegram will accept.
pub fn render_markdown_v2(text: &str) -> String {
    let text = LINE_BREAK_TAG.replace_all(text, "\n");
    Renderer::new(&text).run()
}

struct Renderer {
    chars: Vec<char>,
    pos: usize,
    out: String,
}

impl Renderer {
    fn new(text: &str) -> Self {
        Self {
            chars: text.chars().collect(),
            pos: 0,
            out: String::with_capacity(text.len() + text.len() / 4),
        }
    }

    fn run(mut self) -> String {
        while self.pos < self.chars.len() {
            if self.at_line_start() && self.line_prefix() {
                continue;
            }
            if self.code_block() || self.inline_code() || self.link() || self.emphasis() {
                continue;
            }
            push_escaped(&mut self.out, self.chars[self.pos]);
            self.pos += 1;
        }
        self.out
    }

    fn at_line_start(&self) -> bool {
        self.pos == 0 || self.chars[self.pos - 1] == '\n'
    }

    fn starts_with(&self, at: usize, marker: &[char]) -> bool {
        self.chars.get(at..at + marker.len()) == Some(marker)
    }

    fn line_end(&self, from: usize) -> usize {
        self.chars[from..]
            .iter()
            .position(|&c| c == '\n')
            .map_or(self.chars.len(), |i| from + i)
    }

    /// Headings become bold lines, list bullets become `•`.
    fn line_prefix(&mut self) -> bool {
        let level = self.chars[self.pos..].iter().take_while(|&&c| c == '#').count();
        if (1..=6).contains(&level) && self.chars.get(self.pos + level) == Some(&' ') {
            let end = self.line_end(self.pos);
            let raw: String = self.chars[self.pos + level + 1..end].iter().collect();
            let raw = raw.trim().trim_end_matches('#').trim_end();
            let content: Vec<char> = drop_paired(&drop_paired(raw, "**"), "__")
                .trim()
                .chars()
                .collect();
            if content.is_empty() {
                return false;
            }
            self.out.push('*');
            self.out.push_str(&escape_chars(&content));
            self.out.push('*');
            self.pos = end;
            return true;
        }

        let indent = self.chars[self.pos..]
            .iter()
            .take_while(|&&c| c == ' ' || c == '\t')
            .count();
        let marker = self.pos + indent;
        if matches!(self.chars.get(marker), Some('-' | '*' | '+'))
            && self.chars.get(marker + 1) == Some(&' ')
        {
            self.out.extend(&self.chars[self.pos..marker]);
            self.out.push_str("• ");
            self.pos = marker + 2;
            return true;
        }
        false
    }

    fn code_block(&mut self) -> bool {
        const FENCE: [char; 3] = ['`', '`', '`'];
        if !self.starts_with(self.pos, &FENCE) {
            return false;
        }
        let start = self.pos + FENCE.len();
        let Some(close) = (start + 1..=self.chars.len().saturating_sub(FENCE.len()))
            .find(|&j| self.starts_with(j, &FENCE))
        else {
            return false;
        };
        self.out.push_str("```");
        self.out.push_str(&escape_code(&self.chars[start..close]));
        self.out.push_str("```");
        self.pos = close + FENCE.len();
        true
    }

    fn inline_code(&mut self) -> bool {
        if self.chars[self.pos] != '`' {
            return false;
        }
        let start = self.pos + 1;
        let end = self.line_end(start);
        let Some(close) = self.chars[start..end].iter().position(|&c| c == '`') else {
            return false;
        };
        if close == 0 {
            return false;
        }
        let close = start + close;
        self.out.push('`');
        self.out.push_str(&escape_code(&self.chars[start..close]));
        self.out.push('`');
        self.pos = close + 1;
        true
    }

    fn link(&mut self) -> bool {
        if self.chars[self.pos] != '[' {
            return false;
        }
        let text_start = self.pos + 1;
        let end = self.line_end(text_start);
        let Some(text_end) = self.chars[text_start..end].iter().position(|&c| c == ']') else {
            return false;
        };
        let text_end = text_start + text_end;
        if text_end == text_start || self.chars.get(text_end + 1) != Some(&'(') {
            return false;
        }
        let url_start = text_end + 2;
        let Some(url_len) = self.chars[url_start.min(end)..end]
            .iter()
            .position(|&c| c == ')' || c.is_whitespace())
        else {
            return false;
        };
        let url_end = url_start + url_len;
        if url_len == 0 || self.chars[url_end] != ')' {
            return false;
        }
        self.out.push('[');
        self.out.push_str(&escape_chars(&self.chars[text_start..text_end]));
        self.out.push_str("](");
        self.out.push_str(&escape_url(&self.chars[url_start..url_end]));
        self.out.push(')');
        self.pos = url_end + 1;
        true
    }

    fn emphasis(&mut self) -> bool {
        for &(marker, delimiter) in DOUBLE_SPANS {
            if self.wrap_span(marker, delimiter) {
                return true;
            }
        }
        self.wrap_span("*", "_") || self.wrap_span("_", "_")
    }

    fn wrap_span(&mut self, marker: &str, delimiter: &str) -> bool {
        let marker: Vec<char> = marker.chars().collect();
        let Some(close) = self.find_close(&marker) else {
            return false;
        };
        let start = self.pos + marker.len();
        self.out.push_str(delimiter);
        self.out.push_str(&escape_chars(&self.chars[start..close]));
        self.out.push_str(delimiter);
        self.pos = close + marker.len();
        true
    }

    /// Index of the closing marker for a span opening at `pos`, if the span
    /// is well formed and closes before the end of the paragraph.
    fn find_close(&self, marker: &[char]) -> Option<usize> {
        if !self.starts_with(self.pos, marker) {
            return None;
        }
        let single = marker.len() == 1;
        let intraword = marker[0] == '_';
        let before = self.pos.checked_sub(1).map(|i| self.chars[i]);
        if intraword && before.is_some_and(char::is_alphanumeric) {
            return None;
        }
        if single && before == Some(marker[0]) {
            return None;
        }

        let start = self.pos + marker.len();
        let first = *self.chars.get(start)?;
        if first.is_whitespace() || (single && first == marker[0]) {
            return None;
        }

        let mut j = start + 1;
        while j + marker.len() <= self.chars.len() {
            if self.chars[j] == '\n' && self.chars.get(j + 1) == Some(&'\n') {
                return None;
            }
            if self.starts_with(j, marker) && !self.chars[j - 1].is_whitespace() {
                let after = self.chars.get(j + marker.len()).copied();
                let doubled = single && (after == Some(marker[0]) || self.chars[j - 1] == marker[0]);
                let glued = intraword && after.is_some_and(char::is_alphanumeric);
                if !doubled && !glued {
                    return Some(j);
                }
            }
            j += 1;
        }
        None
    }
}

/// A MarkdownV2 entity left open at some point of a rendered text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Open {
    Span(&'static str),
    Code,
    Pre,
    LinkText,
    LinkUrl,
}

/// Longest first, so `__` is not read as two italics.
const SPAN_DELIMITERS: &[&str] = &["__", "||", "*", "_", "~"];

fn starts_at(chars: &[char], at: usize, marker: &str) -> bool {
    let mut i = at;
    for m in marker.chars() {
        if chars.get(i) != Some(&m) {
            return false;
        }
        i += 1;
    }
    true
}

/// The entity still open at the end of `text`, given the one open before it.
fn open_after(text: &str, mut open: Option<Open>) -> Option<Open> {
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '\\' {
            i += 2;
            continue;
        }
        let (next, width) = match open {
            Some(Open::Pre) if starts_at(&chars, i, "```") => (None, 3),
            Some(Open::Code) if chars[i] == '`' => (None, 1),
            Some(Open::LinkText) if starts_at(&chars, i, "](") => (Some(Open::LinkUrl), 2),
            Some(Open::LinkUrl) if chars[i] == ')' => (None, 1),
            Some(Open::Span(d)) if starts_at(&chars, i, d) => (None, d.len()),
            Some(_) => (open, 1),
            None if starts_at(&chars, i, "```") => (Some(Open::Pre), 3),
            None if chars[i] == '`' => (Some(Open::Code), 1),
            None if chars[i] == '[' => (Some(Open::LinkText), 1),
            None => match SPAN_DELIMITERS.iter().copied().find(|d| starts_at(&chars, i, d)) {
                Some(d) => (Some(Open::Span(d)), d.len()),
                None => (None, 1),
            },
        };
        open = next;
        i += width;
    }
    open
}

/// URL of a link whose text continues into `rest`.
fn pending_link_url(rest: &str) -> Option<String> {
    let chars: Vec<char> = rest.chars().collect();
    let mut url = String::new();
    let mut in_url = false;
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '\\' {
            if in_url {
                url.extend(chars.get(i..i + 2).unwrap_or(&chars[i..]));
            }
            i += 2;
            continue;
        }
        if in_url {
            if c == ')' {
                return Some(url);
            }
            url.push(c);
        } else if starts_at(&chars, i, "](") {
            in_url = true;
            i += 2;
            continue;
        } else if c == '\n' {
            return None;
        }
        i += 1;
    }
    None
}

/// Close an entity at the end of a chunk. `None` when it cannot be closed,
/// as for a cut inside a link URL.
fn closing(open: Open, rest: impl FnOnce() -> String) -> Option<String> {
    match open {
        Open::Span(d) => Some(d.to_string()),
        Open::Code => Some("`".to_string()),
        Open::Pre => Some("```".to_string()),
        Open::LinkText => pending_link_url(&rest()).map(|url| format!("]({url})")),
        Open::LinkUrl => None,
    }
}

fn reopening(open: Open) -> &'static str {
    match open {
        Open::Span(d) => d,
        Open::Code => "`",
        Open::Pre => "```\n",
        Open::LinkText => "[",
        Open::LinkUrl => "",
    }
}

/// Make every chunk of a rendered reply parse on its own: an entity cut by
/// a chunk boundary is closed at the end of one chunk and reopened at the
/// start of the next, after any progress marker. Chunks may grow by a few
/// characters, more for a cut link.
pub fn balance_spans(chunks: Vec<String>) -> Vec<String> {
    let mut balanced = Vec::with_capacity(chunks.len());
    let mut open_before = None;
    let mut reopen = None;

    for (i, chunk) in chunks.iter().enumerate() {
        let body = strip_progress(chunk);
        let marker = &chunk[..chunk.len() - body.len()];
        let open = open_after(body, open_before);
        let close = open.and_then(|o| {
            closing(o, || chunks[i + 1..].iter().map(|c| strip_progress(c)).collect())
        });

        let mut out = String::with_capacity(chunk.len() + 8);
        out.push_str(marker);
        if let Some(o) = reopen {
            out.push_str(reopening(o));
        }
        match (&close, open) {
            // Emphasis closes before the trailing whitespace, code keeps it.
            (Some(close), Some(Open::Span(_) | Open::LinkText)) => {
                let text = body.trim_end();
                out.push_str(text);
                out.push_str(close);
                out.push_str(&body[text.len()..]);
            }
            (Some(close), _) => {
                out.push_str(body);
                out.push_str(close);
            }
            (None, _) => out.push_str(body),
        }

        reopen = if close.is_some() { open } else { None };
        open_before = open;
        balanced.push(out);
    }
    balanced
}

/// Undo [`render_markdown_v2`] for a plain-text resend: drop escapes and
/// markup delimiters, turn links into `text (url)`.
pub fn strip_markdown_v2(rendered: &str) -> String {
    let chars: Vec<char> = rendered.chars().collect();
    let mut out = String::with_capacity(rendered.len());
    let mut in_code = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        if c == '\\' {
            if let Some(escaped) = next {
                out.push(escaped);
                i += 2;
                continue;
            }
        }
        if c == '`' {
            in_code = !in_code;
            i += 1;
            continue;
        }
        if in_code {
            out.push(c);
            i += 1;
            continue;
        }

        match c {
            '*' | '_' | '~' | '[' => {}
            '|' if next == Some('|') => i += 1,
            ']' if next == Some('(') => {
                out.push_str(" (");
                i += 1;
            }
            _ => out.push(c),
        }
        i += 1;
    }
    out
}
