//! Removal of prompt echoes from recovered translations.

use regex::Regex;
use std::sync::LazyLock;

static INPUT_MARKER_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?im)^\s*(?:###\s*INPUT\b.*|<<<INPUT_TEXT>>>|<<<END_INPUT_TEXT>>>|===INPUT_TEXT===|===END_INPUT_TEXT===)\s*$",
    )
    .unwrap()
});
static LEADING_ID_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\[\[ID:\d+\]\]\s*").unwrap());
static LABEL_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:英語翻訳|日本語翻訳|English\s*Translation|Japanese\s*Translation)\s*[:：]?\s*")
        .unwrap()
});
static MARKDOWN_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n?\s*[*\-]{3,}\s*$").unwrap());

/// Strips echoed input markers, id markers, template labels and trailing separators.
pub(crate) fn clean_translation(text: &str) -> String {
    let without_markers = INPUT_MARKER_LINE.replace_all(text, "");
    let trimmed = without_markers.trim();
    let trimmed = LEADING_ID_MARKER.replace(trimmed, "");
    let trimmed = LABEL_PREFIX.replace(&trimmed, "");
    let trimmed = MARKDOWN_SEPARATOR.replace(&trimmed, "");
    trimmed.trim().to_string()
}
