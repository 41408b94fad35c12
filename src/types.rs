//! Core data model shared by the planner, transports, reconciler and retry controller.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// Stable fragment identifier assigned by the extraction collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FragmentId(pub u64);

impl FragmentId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for FragmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for FragmentId {
    fn from(value: u64) -> Self {
        FragmentId(value)
    }
}

/// Batch identifier, unique within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(u64);

impl BatchId {
    pub fn next() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        BatchId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "b{}", self.0)
    }
}

/// Extraction hints attached to a fragment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentMetadata {
    /// Formula cells/blocks are kept verbatim.
    #[serde(default)]
    pub is_formula: bool,
    /// Numbers, dates and similar content the reassembly collaborator preserves itself.
    #[serde(default)]
    pub skip_translation: bool,
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

/// Atomic unit of text to translate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    pub id: FragmentId,
    pub text: String,
    /// Opaque position inside the source document (sheet/cell, page/block, ...).
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub metadata: FragmentMetadata,
}

impl Fragment {
    pub fn new(id: impl Into<FragmentId>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            location: None,
            metadata: FragmentMetadata::default(),
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_metadata(mut self, metadata: FragmentMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Character length used for batch budgeting.
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// Ordered, non-empty group of fragments sent together in one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    id: BatchId,
    fragments: Vec<Fragment>,
}

impl Batch {
    /// Returns `None` for an empty fragment list.
    pub fn new(fragments: Vec<Fragment>) -> Option<Self> {
        if fragments.is_empty() {
            return None;
        }
        Some(Self {
            id: BatchId::next(),
            fragments,
        })
    }

    pub fn id(&self) -> BatchId {
        self.id
    }

    pub fn fragments(&self) -> &[Fragment] {
        &self.fragments
    }

    pub fn into_fragments(self) -> Vec<Fragment> {
        self.fragments
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn is_single(&self) -> bool {
        self.fragments.len() == 1
    }

    pub fn ids(&self) -> Vec<FragmentId> {
        self.fragments.iter().map(|f| f.id).collect()
    }

    pub fn contains(&self, id: FragmentId) -> bool {
        self.fragments.iter().any(|f| f.id == id)
    }

    /// Sum of fragment text lengths in characters.
    pub fn char_len(&self) -> usize {
        self.fragments.iter().map(Fragment::char_len).sum()
    }

    /// Same batch restricted to `keep`, preserving order and batch id.
    pub fn retain(&self, keep: &HashSet<FragmentId>) -> Option<Batch> {
        let fragments: Vec<Fragment> = self
            .fragments
            .iter()
            .filter(|f| keep.contains(&f.id))
            .cloned()
            .collect();
        if fragments.is_empty() {
            return None;
        }
        Some(Batch {
            id: self.id,
            fragments,
        })
    }
}

/// One `{id, translation}` pair recovered from a backend response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedItem {
    pub id: FragmentId,
    pub translation: String,
}

/// Backend output before parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawResponse {
    /// Content of a machine-parseable endpoint; may still be malformed.
    Structured(String),
    /// Free text from a conversational endpoint.
    FreeText(String),
}

impl RawResponse {
    pub fn text(&self) -> &str {
        match self {
            RawResponse::Structured(text) | RawResponse::FreeText(text) => text,
        }
    }

    pub fn is_structured(&self) -> bool {
        matches!(self, RawResponse::Structured(_))
    }
}

/// Incremental output forwarded to the caller while a request is in flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamChunk {
    pub batch_id: BatchId,
    pub ordinal: u64,
    pub text_delta: String,
}

/// Why a fragment ended without a translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvedReason {
    /// Every attempt finished without a usable translation for this id.
    AttemptsExhausted,
    /// The fragment alone exceeds the backend budget at the minimum split floor.
    Oversize,
    /// Marked `skip_translation` by the extraction collaborator.
    Skipped,
    /// The job was cancelled before this fragment resolved.
    Cancelled,
    /// The backend session went down before this fragment resolved.
    SessionUnavailable,
}

impl UnresolvedReason {
    pub fn as_str(self) -> &'static str {
        match self {
            UnresolvedReason::AttemptsExhausted => "attempts_exhausted",
            UnresolvedReason::Oversize => "oversize",
            UnresolvedReason::Skipped => "skipped",
            UnresolvedReason::Cancelled => "cancelled",
            UnresolvedReason::SessionUnavailable => "session_unavailable",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Resolution {
    Translated { text: String },
    Unresolved { reason: UnresolvedReason },
}

impl Resolution {
    pub fn is_translated(&self) -> bool {
        matches!(self, Resolution::Translated { .. })
    }
}

/// Final `Fragment.id -> translation | unresolved` result of a job.
///
/// The first translation recorded for an id wins: later merges never overwrite it,
/// and an unresolved mark can only be replaced by a translation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionMap {
    entries: BTreeMap<FragmentId, Resolution>,
}

impl ResolutionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a translation. Returns `false` if the id was already translated.
    pub fn merge_translation(&mut self, id: FragmentId, text: impl Into<String>) -> bool {
        match self.entries.get(&id) {
            Some(Resolution::Translated { .. }) => false,
            _ => {
                self.entries
                    .insert(id, Resolution::Translated { text: text.into() });
                true
            }
        }
    }

    /// Marks `id` unresolved unless it already has an entry.
    pub fn mark_unresolved(&mut self, id: FragmentId, reason: UnresolvedReason) -> bool {
        if self.entries.contains_key(&id) {
            return false;
        }
        self.entries.insert(id, Resolution::Unresolved { reason });
        true
    }

    /// Folds `other` in, honoring first-translation-wins.
    pub fn merge(&mut self, other: ResolutionMap) {
        for (id, resolution) in other.entries {
            match resolution {
                Resolution::Translated { text } => {
                    self.merge_translation(id, text);
                }
                Resolution::Unresolved { reason } => {
                    self.mark_unresolved(id, reason);
                }
            }
        }
    }

    pub fn get(&self, id: FragmentId) -> Option<&Resolution> {
        self.entries.get(&id)
    }

    pub fn translation(&self, id: FragmentId) -> Option<&str> {
        match self.entries.get(&id) {
            Some(Resolution::Translated { text }) => Some(text.as_str()),
            _ => None,
        }
    }

    pub fn contains(&self, id: FragmentId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn is_translated(&self, id: FragmentId) -> bool {
        matches!(self.entries.get(&id), Some(Resolution::Translated { .. }))
    }

    pub fn unresolved_ids(&self) -> Vec<FragmentId> {
        self.entries
            .iter()
            .filter(|(_, r)| !r.is_translated())
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn unresolved_with_reason(&self, reason: UnresolvedReason) -> Vec<FragmentId> {
        self.entries
            .iter()
            .filter(|(_, r)| matches!(r, Resolution::Unresolved { reason: r } if *r == reason))
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn translated_count(&self) -> usize {
        self.entries.values().filter(|r| r.is_translated()).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = FragmentId> + '_ {
        self.entries.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (FragmentId, &Resolution)> {
        self.entries.iter().map(|(id, r)| (*id, r))
    }
}
