//! Prompt Assembler
//!
//! Turns a batch plus prompt options into a backend-appropriate request. The structured
//! protocol receives an ordered `{id, text}` list and a directive to answer with a matching
//! `{id, translation}` list; the conversational protocol receives one free-text prompt with
//! a numbered list (optionally `[[ID:n]]`-marked) and the same constraints restated in prose.
//!
//! Assembly is pure and never fails.

use crate::types::{Batch, BatchId, FragmentId};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Output register requested from the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranslationStyle {
    Standard,
    #[default]
    Concise,
    Minimal,
}

impl TranslationStyle {
    pub fn as_str(self) -> &'static str {
        match self {
            TranslationStyle::Standard => "standard",
            TranslationStyle::Concise => "concise",
            TranslationStyle::Minimal => "minimal",
        }
    }

    fn guidance(self) -> &'static str {
        match self {
            TranslationStyle::Standard => "Write natural, complete sentences suitable for formal business documents.",
            TranslationStyle::Concise => "Keep the wording concise; prefer short phrasing over full sentences where the source allows it.",
            TranslationStyle::Minimal => "Use the shortest faithful rendering, suitable for table cells and headings.",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    ToEnglish,
    ToJapanese,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::ToEnglish => "to_english",
            Direction::ToJapanese => "to_japanese",
        }
    }

    fn target_language(self) -> &'static str {
        match self {
            Direction::ToEnglish => "English",
            Direction::ToJapanese => "Japanese",
        }
    }
}

/// Enumerated option set consumed by [`assemble`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptOptions {
    #[serde(default)]
    pub style: TranslationStyle,

    #[serde(default)]
    pub direction: Direction,

    /// Caller-supplied glossary, embedded verbatim.
    #[serde(default)]
    pub glossary_text: Option<String>,

    /// Add unit-conversion hints when the batch contains Japanese large-number units.
    #[serde(default)]
    pub numeric_hints: bool,

    /// Extra guidance appended to the directive; the only field that changes between attempts.
    #[serde(default)]
    pub extra_instruction: Option<String>,
}

impl PromptOptions {
    /// Copy of these options with `instruction` appended to any caller-supplied extra instruction.
    pub fn with_escalation(&self, instruction: Option<&str>) -> PromptOptions {
        let mut options = self.clone();
        if let Some(instruction) = instruction {
            options.extra_instruction = Some(match &self.extra_instruction {
                Some(base) if !base.trim().is_empty() => format!("{}\n{}", base.trim(), instruction),
                _ => instruction.to_string(),
            });
        }
        options
    }
}

/// Request protocol of the selected transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Structured,
    Conversational { id_markers: bool },
}

/// Expected response layout for the structured protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseShape {
    /// `{"items": [{"id": .., "translation": ..}, ..]}`
    ItemList,
    /// `{"translation": ..}`
    SingleTranslation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestItem {
    pub id: FragmentId,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructuredRequest {
    pub batch_id: BatchId,
    pub system: String,
    pub user: String,
    pub items: Vec<RequestItem>,
    pub response_shape: ResponseShape,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConversationalRequest {
    pub batch_id: BatchId,
    pub prompt: String,
    /// Fragment ids in prompt order.
    pub ids: Vec<FragmentId>,
    pub fragment_count: usize,
    pub id_markers: bool,
}

/// Backend-specific serialization of one batch; rebuilt per attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum TranslationRequest {
    Structured(StructuredRequest),
    Conversational(ConversationalRequest),
}

impl TranslationRequest {
    pub fn batch_id(&self) -> BatchId {
        match self {
            TranslationRequest::Structured(r) => r.batch_id,
            TranslationRequest::Conversational(r) => r.batch_id,
        }
    }

    pub fn fragment_ids(&self) -> Vec<FragmentId> {
        match self {
            TranslationRequest::Structured(r) => r.items.iter().map(|item| item.id).collect(),
            TranslationRequest::Conversational(r) => r.ids.clone(),
        }
    }

    /// Characters the backend will receive, compared against transport budgets.
    pub fn serialized_len(&self) -> usize {
        match self {
            TranslationRequest::Structured(r) => r.system.chars().count() + r.user.chars().count(),
            TranslationRequest::Conversational(r) => r.prompt.chars().count(),
        }
    }
}

/// Builds the request for `batch` under `options` for the given protocol.
pub fn assemble(batch: &Batch, options: &PromptOptions, protocol: Protocol) -> TranslationRequest {
    match protocol {
        Protocol::Structured => TranslationRequest::Structured(assemble_structured(batch, options)),
        Protocol::Conversational { id_markers } => TranslationRequest::Conversational(
            assemble_conversational(batch, options, id_markers),
        ),
    }
}

/// Formatting guidance added on retries. Attempt 1 gets none; later attempts get stricter.
pub fn escalation_instruction(protocol: Protocol, attempt: u32) -> Option<&'static str> {
    match (protocol, attempt) {
        (_, 0 | 1) => None,
        (Protocol::Structured, 2) => Some(
            "Your previous answer could not be parsed. Reply with JSON only: one object with an \"items\" array containing every id exactly once.",
        ),
        (Protocol::Structured, _) => Some(
            "STRICT FORMAT: output a single JSON object and nothing else. No code fences, no comments, no explanations. Every input id must appear exactly once with a non-empty \"translation\" string.",
        ),
        (Protocol::Conversational { .. }, 2) => Some(
            "Your previous answer could not be matched to the input. Answer with the numbered list only, one item per input number, in the same order.",
        ),
        (Protocol::Conversational { .. }, _) => Some(
            "STRICT FORMAT: output exactly one line starting with each number (and its [[ID:n]] marker, if given). Do not add greetings, notes, headings or questions. Do not merge or skip items.",
        ),
    }
}

/// Guidance added after a translation came back in the wrong language.
pub fn language_instruction(direction: Direction) -> &'static str {
    match direction {
        Direction::ToEnglish => {
            "Output must be English only. Do NOT output Japanese (hiragana, katakana, kanji) or Korean (Hangul), and do not copy the input unchanged."
        }
        Direction::ToJapanese => {
            "Output must be natural Japanese only. Do NOT answer in English, Chinese or Korean."
        }
    }
}

fn assemble_structured(batch: &Batch, options: &PromptOptions) -> StructuredRequest {
    let items: Vec<RequestItem> = batch
        .fragments()
        .iter()
        .map(|f| RequestItem {
            id: f.id,
            text: f.text.clone(),
        })
        .collect();
    let single = batch.is_single();
    let response_shape = if single {
        ResponseShape::SingleTranslation
    } else {
        ResponseShape::ItemList
    };

    let mut system = format!(
        "You are a professional translator. Translate the input into {}.\n",
        options.direction.target_language()
    );
    system.push_str(options.style.guidance());
    system.push('\n');
    if single {
        system.push_str(
            "Respond with JSON only, exactly in the form {\"translation\": \"...\"}. Do not add prose.\n",
        );
    } else {
        system.push_str(&format!(
            "Respond with JSON only, exactly in the form {{\"items\": [{{\"id\": <id>, \"translation\": \"...\"}}]}}. \
             Return all {} items, keep every id unchanged, and do not add prose.\n",
            items.len()
        ));
    }
    push_shared_sections(&mut system, batch, options);

    let user = if single {
        json!({ "text": items[0].text }).to_string()
    } else {
        json!({ "items": items }).to_string()
    };

    StructuredRequest {
        batch_id: batch.id(),
        system,
        user,
        items,
        response_shape,
    }
}

fn assemble_conversational(
    batch: &Batch,
    options: &PromptOptions,
    id_markers: bool,
) -> ConversationalRequest {
    let target = options.direction.target_language();
    let mut prompt = String::new();

    if batch.is_single() {
        prompt.push_str(&format!(
            "Translate the following text into {}.\n{}\n\
             Output format: write the label \"Translation:\" followed by the translated text only. \
             Do not add explanations, greetings or questions.\n",
            target,
            options.style.guidance()
        ));
    } else {
        prompt.push_str(&format!(
            "Translate each numbered item below into {}.\n{}\n\
             Output format: a numbered list with exactly {} items, using the same numbers and order as the input. \
             One translation per number; do not merge, split or skip items, and do not add any other text.\n",
            target,
            options.style.guidance(),
            batch.len()
        ));
        if id_markers {
            prompt.push_str(
                "Each item starts with an [[ID:n]] marker. Copy the marker unchanged at the start of its translation.\n",
            );
        }
    }
    push_shared_sections(&mut prompt, batch, options);
    prompt.push_str("\n### INPUT\n");

    if batch.is_single() {
        prompt.push_str(&batch.fragments()[0].text);
        prompt.push('\n');
    } else {
        for (index, fragment) in batch.fragments().iter().enumerate() {
            let text = fragment.text.replace('\n', " ");
            if id_markers {
                prompt.push_str(&format!("{}. [[ID:{}]] {}\n", index + 1, fragment.id, text));
            } else {
                prompt.push_str(&format!("{}. {}\n", index + 1, text));
            }
        }
    }

    ConversationalRequest {
        batch_id: batch.id(),
        prompt,
        ids: batch.ids(),
        fragment_count: batch.len(),
        id_markers: id_markers && !batch.is_single(),
    }
}

fn push_shared_sections(out: &mut String, batch: &Batch, options: &PromptOptions) {
    if let Some(glossary) = options.glossary_text.as_deref().filter(|g| !g.trim().is_empty()) {
        out.push_str("\n### Glossary (use these renderings)\n");
        out.push_str(glossary.trim());
        out.push('\n');
    }
    if options.numeric_hints {
        let hints = numeric_hint_lines(batch, options.direction);
        if !hints.is_empty() {
            out.push_str("\n### Number conversion\n");
            for hint in hints {
                out.push_str("- ");
                out.push_str(hint);
                out.push('\n');
            }
        }
    }
    if let Some(extra) = options.extra_instruction.as_deref().filter(|e| !e.trim().is_empty()) {
        out.push_str("\n### Additional instructions\n");
        out.push_str(extra.trim());
        out.push('\n');
    }
}

fn numeric_hint_lines(batch: &Batch, direction: Direction) -> Vec<&'static str> {
    let mut hints = Vec::new();
    if direction != Direction::ToEnglish {
        return hints;
    }
    let has = |needle: char| batch.fragments().iter().any(|f| f.text.contains(needle));
    if has('兆') {
        hints.push("1兆 = 1 trillion; convert 兆 amounts to trillions.");
    }
    if has('億') {
        hints.push("1億 = 100 million; convert 億 amounts to millions or billions (e.g. 25億円 = ¥2.5 billion).");
    }
    if has('万') {
        hints.push("1万 = 10 thousand; convert 万 amounts to thousands or millions (e.g. 350万円 = ¥3.5 million).");
    }
    hints
}
