//! Prompt sanitizer
//!
//! Normalizes user text before it reaches the requirements analyzer or gets
//! concatenated into worker prompts:
//!
//! - strips repeated "user requested:"-style prefixes
//! - splits on sentence terminators and deduplicates identical sentences
//! - collapses whitespace and caps the result, appending an ellipsis
//! - enforces a hard byte ceiling on any outbound prompt
//!
//! `clean` is idempotent: `clean(clean(x)) == clean(x)`.

use regex::Regex;
use std::sync::OnceLock;
use tracing::warn;

/// Appended when a cleaned string is truncated. U+2026 survives re-cleaning
/// because it is not a sentence terminator.
pub const ELLIPSIS: &str = "\u{2026}";

/// Default per-field character cap
pub const DEFAULT_MAX_CHARS: usize = 2_000;

/// Default hard ceiling for outbound prompts, in bytes
pub const DEFAULT_MAX_PROMPT_BYTES: usize = 100_000;

/// Fraction of the byte ceiling at which a warning is emitted
const WARN_FRACTION: f64 = 0.8;

fn prefix_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(?:the\s+)?user\s+(?:requested|asked|said)\s*:\s*").unwrap())
}

fn sentence_terminators() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[.!?:;]+").unwrap())
}

fn whitespace() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").unwrap())
}

/// Size validation outcome for prompts under the ceiling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeCheck {
    WithinLimit,
    /// Above the warning threshold (80% of the ceiling) but still allowed
    NearLimit,
}

/// Raised when a prompt exceeds the hard byte ceiling
#[derive(Debug, thiserror::Error)]
#[error("Prompt for {context} is {bytes} bytes, over the {limit}-byte limit")]
pub struct PromptTooLarge {
    pub context: String,
    pub bytes: usize,
    pub limit: usize,
}

/// Sanitizer with its configured caps
#[derive(Debug, Clone)]
pub struct Sanitizer {
    /// Per-field character cap applied by `clean`
    pub max_chars: usize,
    /// Hard ceiling for any outbound prompt, in bytes
    pub max_prompt_bytes: usize,
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self {
            max_chars: DEFAULT_MAX_CHARS,
            max_prompt_bytes: DEFAULT_MAX_PROMPT_BYTES,
        }
    }
}

impl Sanitizer {
    pub fn new(max_chars: usize, max_prompt_bytes: usize) -> Self {
        Self { max_chars, max_prompt_bytes }
    }

    /// Clean user text: strip prefix markers, deduplicate sentences, collapse
    /// whitespace, cap the length.
    pub fn clean(&self, text: &str) -> String {
        let stripped = prefix_marker().replace_all(text, " ");

        let mut seen = Vec::new();
        for raw in sentence_terminators().split(&stripped) {
            let sentence = whitespace().replace_all(raw, " ").trim().to_string();
            if sentence.is_empty() {
                continue;
            }
            if !seen.contains(&sentence) {
                seen.push(sentence);
            }
        }

        let joined = seen.join(". ");
        self.truncate_with_ellipsis(joined)
    }

    /// Everything before the first repeated-prefix marker, cleaned
    ///
    /// A marker at the very start of the text is skipped over first, so the
    /// core of `"User requested: X User requested: X"` is `X`, not the empty
    /// string.
    pub fn extract_core(&self, text: &str) -> String {
        let stripped = match prefix_marker().find(text) {
            Some(m) if m.start() == 0 => &text[m.end()..],
            _ => text,
        };
        let core = match prefix_marker().find(stripped) {
            Some(m) => &stripped[..m.start()],
            None => stripped,
        };
        self.clean(core)
    }

    /// Enforce the hard byte ceiling on an outbound prompt
    ///
    /// Emits a warning once the prompt passes 80% of the ceiling. Callers
    /// receiving `PromptTooLarge` must substitute a minimal fallback prompt,
    /// never truncate mid-sentence silently.
    pub fn validate_size(&self, prompt: &str, context: &str) -> Result<SizeCheck, PromptTooLarge> {
        let bytes = prompt.len();
        if bytes > self.max_prompt_bytes {
            return Err(PromptTooLarge {
                context: context.to_string(),
                bytes,
                limit: self.max_prompt_bytes,
            });
        }
        let warn_at = (self.max_prompt_bytes as f64 * WARN_FRACTION) as usize;
        if bytes >= warn_at {
            warn!(context, bytes, limit = self.max_prompt_bytes, "Prompt approaching size limit");
            return Ok(SizeCheck::NearLimit);
        }
        Ok(SizeCheck::WithinLimit)
    }

    /// Minimal fallback when a full prompt exceeds the ceiling
    pub fn fallback_description(title: &str, specialist_kind: &str) -> String {
        format!("{} ({} task)", title, specialist_kind)
    }

    fn truncate_with_ellipsis(&self, text: String) -> String {
        if text.chars().count() <= self.max_chars {
            return text;
        }
        let cut: String = text.chars().take(self.max_chars).collect();
        // Trim trailing terminators and whitespace so re-cleaning the
        // truncated text reproduces it exactly.
        let trimmed = cut.trim_end_matches(|c: char| c.is_whitespace() || ".!?:;".contains(c));
        format!("{}{}", trimmed, ELLIPSIS)
    }
}
