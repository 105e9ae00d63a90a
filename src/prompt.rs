//! Building the completion prompt from cached site text.

use crate::completion::ChatMessage;
use crate::site::html::truncate_chars;
use crate::site::SiteContent;

/// Sections shorter than this are not worth adding once the budget runs low.
const MIN_SECTION_CHARS: usize = 50;

#[derive(Debug, Clone)]
pub struct PromptOptions {
    pub school_name: String,
    /// Upper bound on the characters of site text included in the prompt.
    pub char_budget: usize,
}

fn preamble(school_name: &str) -> String {
    format!(
        "Ты — вежливый помощник, который отвечает на вопросы от имени школы «{school_name}». \
Отвечай по-русски, кратко и по делу, опираясь только на информацию с сайта школы. \
Если нужной информации нет, честно скажи об этом и предложи связаться с администратором. \
Не выдумывай цены, даты, адреса и имена преподавателей."
    )
}

/// Site text as `### <page>` sections, within `budget` characters.
fn site_sections(content: &SiteContent, budget: usize) -> String {
    let mut sections = String::new();
    let mut remaining = budget;

    for page in content.pages.iter().filter(|p| !p.text.trim().is_empty()) {
        let header = format!("### {}\n", page.name);
        let header_len = header.chars().count();
        let text_len = page.text.chars().count();

        if header_len + text_len + 2 <= remaining {
            sections.push_str(&header);
            sections.push_str(&page.text);
            sections.push_str("\n\n");
            remaining -= header_len + text_len + 2;
            continue;
        }
        if remaining >= header_len + MIN_SECTION_CHARS {
            sections.push_str(&header);
            sections.push_str(truncate_chars(&page.text, remaining - header_len));
        }
        break;
    }
    sections.trim_end().to_string()
}

/// System message with the site text, followed by the user's question.
pub fn build_messages(content: &SiteContent, question: &str, options: &PromptOptions) -> Vec<ChatMessage> {
    let mut system = preamble(&options.school_name);
    let sections = site_sections(content, options.char_budget);

    if sections.is_empty() {
        system.push_str(
            "\n\nСейчас информация с сайта недоступна: отвечай общими словами \
и предложи уточнить детали у администратора.",
        );
    } else {
        system.push_str("\n\nИнформация с сайта:\n\n");
        system.push_str(&sections);
    }

    vec![ChatMessage::system(system), ChatMessage::user(question.trim())]
}
