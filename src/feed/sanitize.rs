//! Best-effort repair of real-world feed XML.
//!
//! Servers prepend BOMs, stray bytes or whitespace, embed control characters,
//! and truncate documents. [`sanitize`] fixes the common cases so the parser
//! gets a chance. It knows nothing about the parser and never fails.

use std::panic::{self, AssertUnwindSafe};

const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

/// Repair `raw` for parsing. Returns `raw` unchanged if repair fails.
pub fn sanitize(raw: &str) -> String {
    match panic::catch_unwind(AssertUnwindSafe(|| repair(raw))) {
        Ok(repaired) => repaired,
        Err(_) => {
            tracing::warn!(len = raw.len(), "XML sanitizer failed, using input unchanged");
            raw.to_string()
        }
    }
}

fn repair(raw: &str) -> String {
    let text: String = raw.chars().filter(|&c| !is_invisible(c)).collect();

    let text = trim_outside_markup(&text);

    let text: String = text.chars().filter(|&c| !is_stray_control(c)).collect();
    let text = text.trim();

    let text = if text.starts_with("<?xml") {
        text.to_string()
    } else {
        format!("{XML_DECLARATION}\n{text}")
    };

    let mut text: String = text.chars().filter(|&c| !is_control(c)).collect();

    if text.contains("<rss") && !text.contains("</rss>") {
        text.push_str("</rss>");
    } else if text.contains("<feed") && !text.contains("</feed>") {
        text.push_str("</feed>");
    }

    text
}

/// Byte-order mark and zero-width space/joiners.
fn is_invisible(c: char) -> bool {
    matches!(c, '\u{FEFF}' | '\u{200B}'..='\u{200D}')
}

/// Control characters other than tab, newline and carriage return.
fn is_stray_control(c: char) -> bool {
    matches!(c, '\u{00}'..='\u{08}' | '\u{0B}' | '\u{0C}' | '\u{0E}'..='\u{1F}' | '\u{7F}')
}

fn is_control(c: char) -> bool {
    matches!(c, '\u{00}'..='\u{1F}' | '\u{7F}')
}

/// Drop everything before the first `<` and after the last `>`.
///
/// Input with no `<` or no `>` reduces to an empty string.
fn trim_outside_markup(text: &str) -> &str {
    let text = match text.find('<') {
        Some(start) => &text[start..],
        None => "",
    };
    match text.rfind('>') {
        Some(end) => &text[..=end],
        None => "",
    }
}
