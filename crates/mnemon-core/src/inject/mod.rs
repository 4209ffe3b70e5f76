//! Context Injection
//!
//! Builds a budgeted prompt fragment from recalled memories: rank, fit
//! greedily into the token budget (4-chars-per-token heuristic), truncate
//! to whole sentences when the next candidate would overflow, and emit a
//! single structured `system` message.

use serde::{Deserialize, Serialize};

use crate::embed::CHARS_PER_TOKEN;
use crate::memory::{MemoryType, ScoredMemory};

// ============================================================================
// DEFAULTS
// ============================================================================

/// Default token budget for one injection
pub const DEFAULT_TOKEN_BUDGET: usize = 1200;

/// Default number of memories considered
pub const DEFAULT_MAX_MEMORIES: usize = 5;

/// Fixed message when nothing was recalled
pub const NO_MEMORIES_MESSAGE: &str = "No related memories found.";

/// What the injected context is for; changes the header wording only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextType {
    Conversation,
    Task,
    #[default]
    General,
}

/// One `(role, text)` pair; role is always `system`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InjectedMessage {
    pub role: String,
    pub text: String,
}

/// Injection outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InjectionResult {
    pub content: Vec<InjectedMessage>,
    pub included: usize,
    pub tokens_used: usize,
}

// ============================================================================
// TOKEN ESTIMATION
// ============================================================================

/// 4-chars-per-token heuristic, rounded up
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Truncate to the last whole sentence that fits in `max_chars`.
/// Returns an empty string when no sentence boundary fits.
pub fn truncate_to_sentences(text: &str, max_chars: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max_chars {
        return text.to_string();
    }

    let mut last_boundary = 0;
    for (i, c) in chars.iter().take(max_chars).enumerate() {
        if matches!(c, '.' | '!' | '?' | '。') {
            last_boundary = i + 1;
        }
    }
    chars[..last_boundary].iter().collect::<String>().trim().to_string()
}

// ============================================================================
// FORMATTING
// ============================================================================

fn type_emoji(memory_type: MemoryType) -> &'static str {
    match memory_type {
        MemoryType::Working => "📝",
        MemoryType::Episodic => "📅",
        MemoryType::Semantic => "📚",
        MemoryType::Procedural => "⚙️",
    }
}

/// 0-5 stars from importance
fn importance_stars(importance: f64) -> String {
    let filled = (importance.clamp(0.0, 1.0) * 5.0).round() as usize;
    "★".repeat(filled) + &"☆".repeat(5 - filled)
}

fn header_for(context_type: ContextType, query: &str) -> String {
    match context_type {
        ContextType::Conversation => format!("🧠 Memories related to this conversation: \"{query}\""),
        ContextType::Task => format!("🧠 Memories relevant to the task: \"{query}\""),
        ContextType::General => format!("🧠 Related memories for \"{query}\""),
    }
}

// ============================================================================
// INJECTION
// ============================================================================

/// Assemble the injected context from ranked candidates.
///
/// Candidates are consumed in score order. A candidate that would
/// overflow the remaining budget is truncated to whole sentences; if
/// nothing survives truncation it is skipped.
pub fn build_context(
    query: &str,
    context_type: ContextType,
    candidates: &[ScoredMemory],
    token_budget: usize,
) -> InjectionResult {
    if candidates.is_empty() {
        return InjectionResult {
            content: vec![InjectedMessage {
                role: "system".to_string(),
                text: NO_MEMORIES_MESSAGE.to_string(),
            }],
            included: 0,
            tokens_used: estimate_tokens(NO_MEMORIES_MESSAGE),
        };
    }

    let header = header_for(context_type, query);
    let mut lines: Vec<String> = vec![header.clone()];
    let mut used = estimate_tokens(&header);
    let mut included = 0usize;

    for candidate in candidates {
        if used >= token_budget {
            break;
        }
        let remaining = token_budget - used;
        let prefix = format!(
            "{}. {} {} ",
            included + 1,
            type_emoji(candidate.item.memory_type),
            importance_stars(candidate.item.importance),
        );

        let prefix_tokens = estimate_tokens(&prefix);
        if prefix_tokens >= remaining {
            break;
        }
        let content_budget_chars = (remaining - prefix_tokens) * CHARS_PER_TOKEN;

        let content = if estimate_tokens(&candidate.item.content)
            <= remaining.saturating_sub(prefix_tokens)
        {
            candidate.item.content.clone()
        } else {
            truncate_to_sentences(&candidate.item.content, content_budget_chars)
        };
        if content.is_empty() {
            continue;
        }

        let line = format!("{prefix}{content}");
        used += estimate_tokens(&line);
        included += 1;
        lines.push(line);
    }

    let footer = format!("({included} memories, ~{used} tokens)");
    used += estimate_tokens(&footer);
    lines.push(footer);

    if included == 0 {
        return InjectionResult {
            content: vec![InjectedMessage {
                role: "system".to_string(),
                text: NO_MEMORIES_MESSAGE.to_string(),
            }],
            included: 0,
            tokens_used: estimate_tokens(NO_MEMORIES_MESSAGE),
        };
    }

    InjectionResult {
        content: vec![InjectedMessage {
            role: "system".to_string(),
            text: lines.join("\n"),
        }],
        included,
        tokens_used: used,
    }
}

// ============================================================================
// TESTS
// ============================================================================
