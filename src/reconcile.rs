//! Response Reconciler
//!
//! Maps raw backend output back to fragment ids through an ordered ladder of parse
//! strategies. The first strategy that recovers at least one item belonging to the batch
//! wins; ids the batch does not contain are dropped and batch fragments without a usable
//! translation are reported as unresolved.

use crate::error::ParseError;
use crate::types::{Batch, FragmentId, ParsedItem, RawResponse, ResolutionMap};
use std::collections::BTreeMap;
use tracing::{debug, warn};

mod cleanup;
mod json;
mod label;
mod markers;
mod numbered;

pub use json::looks_truncated;

/// Parse strategies, tried in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// A (possibly embedded) JSON list of `{id, translation}` objects.
    StructuredList,
    /// `[[ID:n]] text` segments running to the next marker.
    IdMarkers,
    /// `N. text` lines aligned to batch order.
    NumberedList,
    /// Whole response taken as the translation of a single-fragment batch.
    SingleFragment,
}

const LADDER: [Strategy; 3] = [
    Strategy::StructuredList,
    Strategy::IdMarkers,
    Strategy::NumberedList,
];

impl Strategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::StructuredList => "structured_list",
            Strategy::IdMarkers => "id_markers",
            Strategy::NumberedList => "numbered_list",
            Strategy::SingleFragment => "single_fragment",
        }
    }

    fn parse(self, text: &str, batch: &Batch) -> Vec<ParsedItem> {
        match self {
            Strategy::StructuredList => json::parse_items(text).unwrap_or_default(),
            Strategy::IdMarkers => markers::parse(text),
            Strategy::NumberedList => numbered::parse(text, batch),
            Strategy::SingleFragment => Vec::new(),
        }
    }
}

/// Translations recovered from one response.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    /// Contains translated entries only.
    pub resolved: ResolutionMap,
    /// Batch fragments, in batch order, with no usable translation in this response.
    pub unresolved_ids: Vec<FragmentId>,
    pub strategy: Strategy,
}

impl Reconciliation {
    pub fn is_complete(&self) -> bool {
        self.unresolved_ids.is_empty()
    }
}

/// Reconciles `raw` against `batch`.
pub fn reconcile(raw: &RawResponse, batch: &Batch) -> Result<Reconciliation, ParseError> {
    let text = raw.text();
    if text.trim().is_empty() {
        warn!(batch_id = %batch.id(), "Backend returned an empty response");
        return Err(ParseError::Empty);
    }

    if batch.is_single() {
        return reconcile_single(raw, batch);
    }

    for strategy in LADDER {
        let items = strategy.parse(text, batch);
        let matched = accept(items, batch);
        if matched.is_empty() {
            continue;
        }

        let reconciliation = build(matched, batch, strategy);
        debug!(
            batch_id = %batch.id(),
            strategy = strategy.as_str(),
            resolved = reconciliation.resolved.len(),
            unresolved = reconciliation.unresolved_ids.len(),
            "Reconciled response"
        );
        return Ok(reconciliation);
    }

    let error = if looks_truncated(text) {
        ParseError::TruncatedJson
    } else {
        ParseError::Unrecognized
    };
    warn!(
        batch_id = %batch.id(),
        fragment_count = batch.len(),
        error = %error,
        response_chars = text.chars().count(),
        preview = %preview(text, 500),
        "No parse strategy matched the response"
    );
    Err(error)
}

fn reconcile_single(raw: &RawResponse, batch: &Batch) -> Result<Reconciliation, ParseError> {
    let text = raw.text();
    let id = batch.fragments()[0].id;

    let translation = match json::parse_payload(text) {
        Some(json::Payload::Single(translation)) => Some(translation),
        Some(json::Payload::Items(items)) => items.into_iter().next().map(|item| item.translation),
        None if raw.is_structured() && looks_truncated(text) => {
            warn!(
                batch_id = %batch.id(),
                preview = %preview(text, 500),
                "Single-fragment response JSON is truncated"
            );
            return Err(ParseError::TruncatedJson);
        }
        None => label::extract(text)
            .or_else(|| markers::parse(text).into_iter().next().map(|item| item.translation))
            .or_else(|| Some(cleanup::clean_translation(&json::strip_code_fences(text)))),
    };

    let mut resolved = ResolutionMap::new();
    let mut unresolved_ids = Vec::new();
    match translation.map(|t| cleanup::clean_translation(&t)).filter(|t| !t.is_empty()) {
        Some(translation) => {
            resolved.merge_translation(id, translation);
        }
        None => unresolved_ids.push(id),
    }
    Ok(Reconciliation {
        resolved,
        unresolved_ids,
        strategy: Strategy::SingleFragment,
    })
}

/// Hallucination guard plus last-wins de-duplication.
fn accept(items: Vec<ParsedItem>, batch: &Batch) -> BTreeMap<FragmentId, String> {
    let mut matched = BTreeMap::new();
    for item in items {
        if !batch.contains(item.id) {
            debug!(batch_id = %batch.id(), fragment_id = %item.id, "Dropping item with unknown id");
            continue;
        }
        let translation = cleanup::clean_translation(&item.translation);
        if translation.is_empty() {
            continue;
        }
        matched.insert(item.id, translation);
    }
    matched
}

fn build(matched: BTreeMap<FragmentId, String>, batch: &Batch, strategy: Strategy) -> Reconciliation {
    let mut resolved = ResolutionMap::new();
    for (id, translation) in matched {
        resolved.merge_translation(id, translation);
    }
    let unresolved_ids = batch
        .ids()
        .into_iter()
        .filter(|id| !resolved.contains(*id))
        .collect();
    Reconciliation {
        resolved,
        unresolved_ids,
        strategy,
    }
}

pub(crate) fn preview(text: &str, max_chars: usize) -> String {
    let mut out: String = text.chars().take(max_chars).collect();
    if text.chars().count() > max_chars {
        out.push('…');
    }
    out.replace('\n', "\\n")
}
