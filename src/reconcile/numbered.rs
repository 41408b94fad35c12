//! Numbered-list scan aligned to batch order.

use crate::types::{Batch, ParsedItem};
use regex::Regex;
use std::sync::LazyLock;

static NUMBERED_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([ \t]*)(\d+)[.)][ \t]*(.*)$").unwrap());

struct Item {
    number: usize,
    lines: Vec<String>,
}

/// Item `N` maps to the `N`th fragment of the batch.
///
/// Indentation common to every line is removed first. A numbered line indented deeper
/// than the first item is continuation text, as is any unnumbered line below an item,
/// including paragraphs after a blank line. Those keep their paragraph break.
pub(super) fn parse(text: &str, batch: &Batch) -> Vec<ParsedItem> {
    let lines = dedent(text);
    let fragments = batch.fragments();

    let mut items: Vec<Item> = Vec::new();
    let mut baseline: Option<usize> = None;
    let mut after_blank = false;

    for line in &lines {
        if line.trim().is_empty() {
            after_blank = true;
            continue;
        }
        let indent = indent_width(line);

        if let Some(caps) = NUMBERED_LINE.captures(line) {
            let number = caps[2].parse::<usize>().unwrap_or(0);
            let content = caps[3].to_string();
            let base = *baseline.get_or_insert(indent);
            if indent <= base {
                after_blank = false;
                items.push(Item {
                    number,
                    lines: vec![content],
                });
                continue;
            }
        }

        if let Some(item) = items.last_mut() {
            if after_blank {
                item.lines.push(String::new());
            }
            item.lines.push(line.trim_end().to_string());
        }
        after_blank = false;
    }

    items
        .into_iter()
        .filter(|item| item.number >= 1 && item.number <= fragments.len())
        .map(|item| ParsedItem {
            id: fragments[item.number - 1].id,
            translation: item.lines.join("\n").trim().to_string(),
        })
        .collect()
}

fn indent_width(line: &str) -> usize {
    line.len() - line.trim_start_matches([' ', '\t']).len()
}

fn dedent(text: &str) -> Vec<String> {
    let lines: Vec<&str> = text.lines().collect();
    let common = lines
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| indent_width(l))
        .min()
        .unwrap_or(0);
    lines
        .into_iter()
        .map(|l| {
            if l.trim().is_empty() {
                String::new()
            } else {
                l[common.min(indent_width(l))..].to_string()
            }
        })
        .collect()
}
