//! HTML to plain text.

use regex::{Captures, Regex};
use std::sync::LazyLock;

static HIDDEN_BLOCKS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<!--.*?-->|<(script|style|noscript|template|svg)\b[^>]*>.*?</(script|style|noscript|template|svg)\s*>")
        .unwrap()
});
static BLOCK_BREAKS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<br\s*/?>|</(p|div|li|tr|h[1-6]|section|article|header|footer|ul|ol|table|blockquote)\s*>")
        .unwrap()
});
static TAGS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());
static ENTITIES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[a-zA-Z]{2,8});").unwrap());
static SPACES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t\u{a0}\r\f\v]+").unwrap());
static BLANK_LINES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n(\s*\n)+").unwrap());

fn decode_entity(entity: &str) -> Option<String> {
    if let Some(num) = entity.strip_prefix('#') {
        let code = match num.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => num.parse::<u32>().ok()?,
        };
        return char::from_u32(code).map(String::from);
    }
    let decoded = match entity {
        "amp" => "&",
        "lt" => "<",
        "gt" => ">",
        "quot" => "\"",
        "apos" => "'",
        "nbsp" => " ",
        "laquo" => "«",
        "raquo" => "»",
        "mdash" => "—",
        "ndash" => "–",
        "hellip" => "…",
        "copy" => "©",
        "rub" => "₽",
        _ => return None,
    };
    Some(decoded.to_string())
}

/// Strip markup from an HTML page, keeping block structure as line breaks.
pub fn html_to_text(html: &str) -> String {
    let text = HIDDEN_BLOCKS.replace_all(html, " ");
    let text = BLOCK_BREAKS.replace_all(&text, "\n");
    let text = TAGS.replace_all(&text, " ");
    let text = ENTITIES.replace_all(&text, |caps: &Captures| {
        decode_entity(&caps[1]).unwrap_or_else(|| caps[0].to_string())
    });
    let text = SPACES.replace_all(&text, " ");

    let lines: Vec<&str> = text.lines().map(str::trim).collect();
    let text = lines.join("\n");
    BLANK_LINES.replace_all(&text, "\n\n").trim().to_string()
}

/// Keep at most `max_chars` characters, cutting on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_tags_and_scripts() {
        let html = r#"<html><head><title>Школа</title><style>body { color: red }</style>
            <script>var x = "<p>";</script></head>
            <body><h1>Цены</h1><p>Абонемент &mdash; 5000&nbsp;руб.</p><!-- hidden --></body></html>"#;
        let text = html_to_text(html);
        assert!(text.contains("Цены"));
        assert!(text.contains("Абонемент — 5000 руб."));
        assert!(!text.contains("color"));
        assert!(!text.contains("var x"));
        assert!(!text.contains("hidden"));
        assert!(!text.contains('<'));
    }

    #[test]
    fn test_block_elements_become_lines() {
        let text = html_to_text("<ul><li>Гитара</li><li>Укулеле</li></ul>");
        assert_eq!(text, "Гитара\nУкулеле");
    }

    #[test]
    fn test_collapses_whitespace() {
        let text = html_to_text("<p>  много    пробелов </p>\n\n\n\n<p>второй</p>");
        assert_eq!(text, "много пробелов\n\nвторой");
    }

    #[test]
    fn test_decodes_entities() {
        let text = html_to_text("&laquo;Аккорд&raquo; &amp; &#1043;&#x438; &unknown;");
        assert_eq!(text, "«Аккорд» & Ги &unknown;");
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("гитара", 3), "гит");
        assert_eq!(truncate_chars("гитара", 10), "гитара");
        assert_eq!(truncate_chars("", 3), "");
    }
}
