//! Query Preprocessing and Adaptive Weights
//!
//! Turns raw user queries into FTS-safe token sequences and computes the
//! per-query lexical/vector mixing weights used by hybrid search.

use std::collections::HashSet;
use std::sync::LazyLock;

// ============================================================================
// STOP LIST
// ============================================================================

/// Small default stop-list; configurable at the call site
pub static DEFAULT_STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "of", "to", "in", "on", "is", "are", "was", "were", "be",
];

static STOP_SET: LazyLock<HashSet<&'static str>> =
    LazyLock::new(|| DEFAULT_STOP_WORDS.iter().copied().collect());

/// Tokens that signal a technical lookup, where vector similarity tends
/// to beat exact lexical matching
static TECHNICAL_TOKENS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "api", "sql", "http", "https", "json", "yaml", "html", "css", "js", "ts", "rust", "go",
        "python", "java", "db", "orm", "cli", "sdk", "grpc", "rpc", "tcp", "udp", "dns", "jwt",
        "oauth", "regex", "docker", "k8s", "git", "npm", "cargo", "react", "vue", "node",
    ]
    .into_iter()
    .collect()
});

// ============================================================================
// NORMALIZATION
// ============================================================================

/// Canonical form of a query: trimmed, lowercased, whitespace collapsed.
/// Used as the memoization and statistics key.
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn is_kept_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || ('\u{AC00}'..='\u{D7A3}').contains(&c) || c == ' '
}

/// Tokenize for FTS: strip everything outside ASCII alphanumerics, Hangul
/// syllables, and spaces, then drop stop words. An empty result signals
/// "match all".
pub fn sanitize_tokens(query: &str) -> Vec<String> {
    let cleaned: String = normalize_query(query)
        .chars()
        .map(|c| if is_kept_char(c) { c } else { ' ' })
        .collect();

    cleaned
        .split_whitespace()
        .filter(|t| !STOP_SET.contains(t))
        .map(|t| t.to_string())
        .collect()
}

/// Build an FTS5 MATCH expression. Tokens are double-quoted so the FTS
/// query language operators inside them are inert; quotes and brackets
/// were already stripped by `sanitize_tokens`.
pub fn fts_match_expr(tokens: &[String]) -> String {
    tokens
        .iter()
        .map(|t| format!("\"{t}\""))
        .collect::<Vec<_>>()
        .join(" ")
}

// ============================================================================
// ADAPTIVE WEIGHTS
// ============================================================================

/// Default (text, vector) mix
pub const DEFAULT_WEIGHTS: (f64, f64) = (0.4, 0.6);

/// Compute per-query (w_text, w_vec), normalized to sum to 1.
///
/// One bias applies per query, strongest signal first:
/// - a known technical token shifts 0.2 toward vector
/// - a phrase of three or more words shifts 0.2 toward text
/// - a short query (<= 10 chars) shifts 0.1 toward vector
pub fn adaptive_weights(query: &str) -> (f64, f64) {
    let normalized = normalize_query(query);
    let tokens = sanitize_tokens(&normalized);
    let (mut w_text, mut w_vec) = DEFAULT_WEIGHTS;

    if tokens.iter().any(|t| TECHNICAL_TOKENS.contains(t.as_str())) {
        w_text -= 0.2;
        w_vec += 0.2;
    } else if tokens.len() >= 3 {
        w_text += 0.2;
        w_vec -= 0.2;
    } else if normalized.chars().count() <= 10 {
        w_text -= 0.1;
        w_vec += 0.1;
    }

    let w_text = w_text.clamp(0.0, 1.0);
    let w_vec = w_vec.clamp(0.0, 1.0);
    let sum = w_text + w_vec;
    if sum > 0.0 {
        (w_text / sum, w_vec / sum)
    } else {
        DEFAULT_WEIGHTS
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_query() {
        assert_eq!(normalize_query("  Hello   WORLD  "), "hello world");
    }

    #[test]
    fn test_sanitize_strips_punctuation_and_stopwords() {
        let tokens = sanitize_tokens("The quick (brown) fox's \"tricks\"!");
        assert_eq!(tokens, vec!["quick", "brown", "fox", "s", "tricks"]);
    }

    #[test]
    fn test_sanitize_keeps_hangul() {
        let tokens = sanitize_tokens("테스트 기억 검색");
        assert_eq!(tokens, vec!["테스트", "기억", "검색"]);
    }

    #[test]
    fn test_sanitize_empty_means_match_all() {
        assert!(sanitize_tokens("!!! ...").is_empty());
        assert!(sanitize_tokens("the of and").is_empty());
    }

    #[test]
    fn test_fts_expr_quotes_tokens() {
        let tokens = vec!["quick".to_string(), "검색".to_string()];
        assert_eq!(fts_match_expr(&tokens), "\"quick\" \"검색\"");
    }

    #[test]
    fn test_adaptive_weights_technical_token() {
        let (w_text, w_vec) = adaptive_weights("api");
        assert!((w_text - 0.2).abs() < 1e-9);
        assert!((w_vec - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_adaptive_weights_long_phrase() {
        let (w_text, w_vec) = adaptive_weights("how to implement authentication flow");
        assert!((w_text - 0.6).abs() < 1e-9);
        assert!((w_vec - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_adaptive_weights_short_query() {
        let (w_text, w_vec) = adaptive_weights("hello");
        assert!((w_text - 0.3).abs() < 1e-9);
        assert!((w_vec - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_adaptive_weights_default() {
        let (w_text, w_vec) = adaptive_weights("distributed tracing");
        assert!((w_text - 0.4).abs() < 1e-9);
        assert!((w_vec - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_weights_sum_to_one() {
        for q in ["api", "hello", "how to do the thing", "기억", ""] {
            let (t, v) = adaptive_weights(q);
            assert!((t + v - 1.0).abs() < 1e-9, "weights for {q:?} don't sum");
        }
    }
}
