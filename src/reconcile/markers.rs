//! `[[ID:n]]` marker scan.

use crate::types::{FragmentId, ParsedItem};
use regex::Regex;
use std::sync::LazyLock;

static ID_MARKER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[\[ID:(\d+)\]\]").unwrap());
/// List numbering left dangling before the next marker, e.g. the `2.` in `…\n2. [[ID:5]]`.
static DANGLING_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|\n)[ \t]*(?:[-*]|\d+[.)])?[ \t]*$").unwrap());

/// Each marker's block runs to the next marker or the end of the text, so a
/// translation spanning several paragraphs stays whole.
pub(super) fn parse(text: &str) -> Vec<ParsedItem> {
    let markers: Vec<(u64, usize, usize)> = ID_MARKER
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let id = caps.get(1)?.as_str().parse::<u64>().ok()?;
            Some((id, whole.start(), whole.end()))
        })
        .collect();

    markers
        .iter()
        .enumerate()
        .map(|(index, (id, _, end))| {
            let segment = match markers.get(index + 1) {
                Some((_, next_start, _)) => &text[*end..*next_start],
                None => &text[*end..],
            };
            let segment = DANGLING_NUMBER.replace(segment, "");
            ParsedItem {
                id: FragmentId(*id),
                translation: segment.trim().to_string(),
            }
        })
        .collect()
}
