//! Section-label extraction for single-fragment conversational replies.

use regex::Regex;
use std::sync::LazyLock;

// 翻訳 and English labels need a colon so "翻訳してください" and prose do not match.
static TRANSLATION_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?im)^[#>*\s-]*[\[(]?\**(?:訳文[:：]?|翻訳[:：]|(?:Translation|Translated)[:：])\**[\])]?[ \t]*",
    )
    .unwrap()
});
static EXPLANATION_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^[#>*\s-]*[\[(]?\**(?:解説|説明|Explanation|Notes?|Commentary)\**[\])]?[:：]?")
        .unwrap()
});

/// Text after the first translation label, cut at an explanation section.
pub(super) fn extract(text: &str) -> Option<String> {
    let label = TRANSLATION_LABEL.find(text)?;
    let rest = &text[label.end()..];
    let body = match EXPLANATION_LABEL.find(rest) {
        Some(explanation) if explanation.start() > 0 => &rest[..explanation.start()],
        _ => rest,
    };
    let body = body.trim();
    (!body.is_empty()).then(|| body.to_string())
}
