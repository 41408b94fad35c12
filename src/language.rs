//! Output-language guard.
//!
//! Backends sometimes answer in the wrong language: they echo the Japanese source, leave
//! most of it untranslated, or drift into Korean. Such translations are rejected here and
//! the fragment is retried with an explicit language instruction.

use crate::prompt::Direction;

/// Share of Japanese characters at which a source counts as Japanese.
const SOURCE_JAPANESE_RATIO: f64 = 0.3;
/// Share of Japanese characters at which an English answer counts as untranslated.
const OUTPUT_JAPANESE_RATIO: f64 = 0.6;
/// Latin-only answers this long are prose, not a kept token such as `PDF` or `FY2025`.
const LATIN_PROSE_CHARS: usize = 12;

/// Why a translation was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LanguageMismatch {
    /// Korean script in the output.
    Hangul,
    /// The output is the source, unchanged.
    EchoedSource,
    /// The output is still mostly Japanese.
    Untranslated,
    /// The output is Latin prose where Japanese was asked for.
    NotJapanese,
}

impl LanguageMismatch {
    pub fn as_str(self) -> &'static str {
        match self {
            LanguageMismatch::Hangul => "hangul",
            LanguageMismatch::EchoedSource => "echoed_source",
            LanguageMismatch::Untranslated => "untranslated",
            LanguageMismatch::NotJapanese => "not_japanese",
        }
    }
}

/// Checks `translation` of `source` against the requested output language.
pub fn check_output(
    direction: Direction,
    source: &str,
    translation: &str,
) -> Option<LanguageMismatch> {
    let source = source.trim();
    let translation = translation.trim();
    if source.is_empty() || translation.is_empty() {
        return None;
    }
    if translation.chars().any(is_hangul) {
        return Some(LanguageMismatch::Hangul);
    }

    match direction {
        Direction::ToEnglish => {
            if japanese_ratio(source) < SOURCE_JAPANESE_RATIO {
                return None;
            }
            if source == translation {
                return Some(LanguageMismatch::EchoedSource);
            }
            (japanese_ratio(translation) >= OUTPUT_JAPANESE_RATIO)
                .then_some(LanguageMismatch::Untranslated)
        }
        Direction::ToJapanese => {
            let latin_only = translation.chars().any(|c| c.is_ascii_alphabetic())
                && !translation.chars().any(is_japanese);
            let prose = translation.chars().any(char::is_whitespace)
                || translation.chars().count() >= LATIN_PROSE_CHARS;
            (latin_only && prose).then_some(LanguageMismatch::NotJapanese)
        }
    }
}

/// Share of Japanese characters among letters and digits; 0 when there are none.
pub fn japanese_ratio(text: &str) -> f64 {
    let (japanese, meaningful) = text
        .chars()
        .filter(|c| c.is_alphanumeric())
        .fold((0usize, 0usize), |(jp, all), c| {
            (jp + usize::from(is_japanese(c)), all + 1)
        });
    if meaningful == 0 {
        0.0
    } else {
        japanese as f64 / meaningful as f64
    }
}

fn is_japanese(c: char) -> bool {
    matches!(
        c as u32,
        0x3040..=0x309F | 0x30A0..=0x30FF | 0x31F0..=0x31FF | 0x4E00..=0x9FFF | 0xFF65..=0xFF9F
    )
}

fn is_hangul(c: char) -> bool {
    matches!(c as u32, 0xAC00..=0xD7AF | 0x1100..=0x11FF | 0x3130..=0x318F)
}
