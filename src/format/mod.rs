//! Reply formatting: MarkdownV2 rendering and message chunking.

pub mod chunk;
pub mod markdown;

pub use chunk::{
    message_len, split_message, split_with_progress, strip_progress, with_progress, TELEGRAM_MESSAGE_LIMIT,
};
pub use markdown::{balance_spans, escape_markdown_v2, render_markdown_v2, strip_markdown_v2};

/// Render a model reply and cut it into annotated chunks of at most `limit`
/// UTF-16 code units, ready to send with MarkdownV2. Spans cut by a chunk
/// boundary are closed and reopened, so each chunk parses on its own.
pub fn prepare_reply(reply: &str, limit: usize) -> Vec<String> {
    let rendered = render_markdown_v2(reply.trim());
    let limit = limit.max(1);

    // Closing and reopening spans adds delimiters; shrink the split until
    // the balanced chunks fit.
    let mut reserve = 0;
    while reserve < limit {
        let chunks = balance_spans(split_with_progress(&rendered, limit - reserve));
        let overflow = chunks
            .iter()
            .map(|c| message_len(c).saturating_sub(limit))
            .max()
            .unwrap_or(0);
        if overflow == 0 {
            return chunks;
        }
        reserve += overflow;
    }
    split_with_progress(&rendered, limit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_short_reply() {
        assert_eq!(prepare_reply("  Да!  ", 4096), vec!["Да\\!"]);
    }

    #[test]
    fn test_prepare_empty_reply() {
        assert!(prepare_reply("   ", 4096).is_empty());
    }

    /// Unescaped occurrences of `delimiter`.
    fn count_delimiters(chunk: &str, delimiter: char) -> usize {
        let mut count = 0;
        let mut escaped = false;
        for c in chunk.chars() {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == delimiter {
                count += 1;
            }
        }
        count
    }

    #[test]
    fn test_prepare_long_bold_reply_keeps_each_chunk_balanced() {
        let body = "Занятия проходят два раза в неделю. ".repeat(150);
        let reply = format!("**{}**", body.trim());
        let chunks = prepare_reply(&reply, TELEGRAM_MESSAGE_LIMIT);

        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].starts_with("\\(1/2\\) *Зан"));
        assert!(chunks[1].starts_with("\\(2/2\\) *"));
        for chunk in &chunks {
            assert!(message_len(chunk) <= TELEGRAM_MESSAGE_LIMIT);
            assert_eq!(count_delimiters(chunk, '*') % 2, 0, "unbalanced bold in {chunk:?}");
        }

        let plain: String = chunks.iter().map(|c| strip_markdown_v2(strip_progress(c))).collect();
        assert_eq!(plain, body.trim());
    }

    #[test]
    fn test_prepare_reply_fits_after_rebalancing() {
        let reply = format!("**{}**", "слово ".repeat(60).trim());
        for chunk in prepare_reply(&reply, 50) {
            assert!(message_len(&chunk) <= 50, "{chunk:?} too long");
            assert_eq!(count_delimiters(&chunk, '*') % 2, 0);
        }
    }

    #[test]
    fn test_prepare_long_reply_keeps_escapes_intact() {
        let reply = "Занятия проходят 2 раза в неделю. ".repeat(40);
        let chunks = prepare_reply(&reply, 300);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 300);
            assert!(!chunk.trim_end().ends_with('\\'));
        }
        let plain: String = chunks.iter().map(|c| strip_markdown_v2(strip_progress(c))).collect();
        assert_eq!(plain, reply.trim());
    }
}
