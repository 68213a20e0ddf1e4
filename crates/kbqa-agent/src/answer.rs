//! Final-answer hygiene: process-chatter detection and the ordered cleanup
//! pipeline applied once to the agent's final text.
//!
//! The pipeline is a list of named [`SanitizeRule`]s. Order matters:
//! payloads go before whitespace collapsing (they may span lines), and
//! source names go before identifier clauses ("whose Wikidata ID is Q1"
//! becomes "whose ID is Q1" before the clause itself is removed).

use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::tools::TOOL_NAMES;

/// Substituted whenever cleanup leaves nothing to say.
pub const REFUSAL: &str = "I cannot verify that.";

macro_rules! lazy_regex {
    ($name:ident, $pattern:expr) => {
        fn $name() -> Option<&'static Regex> {
            static RE: OnceLock<Option<Regex>> = OnceLock::new();
            RE.get_or_init(|| Regex::new($pattern).ok()).as_ref()
        }
    };
}

lazy_regex!(special_token_re, r"<\|[^|<>]{0,40}\|>");
lazy_regex!(code_fence_re, r"```[A-Za-z]*");
lazy_regex!(
    invocation_re,
    r"(?i)\b(?:search_entity_candidates|fetch_entity_properties|wikidata_sparql|fetch_wikipedia_article)\s*\([^()]*\)(?:\[[^\]]*\])*"
);
lazy_regex!(
    planning_re,
    r"(?i)^\s*(?:let me|let's|let us|i will|i'll|i need to|i should|i must|i am going to|i'm going to|first,? i|next,? i|now,? i|now let me|step \d)\b.*\b(?:search|look up|lookup|query|fetch|call|check|retrieve|verify|find|use|confirm|gather|get)"
);
lazy_regex!(
    json_tool_key_re,
    r#""(?:name|function|tool|tool_name)"\s*:"#
);
lazy_regex!(
    json_args_key_re,
    r#""(?:parameters|arguments|args|input)"\s*:"#
);
lazy_regex!(
    meta_parenthetical_re,
    r"(?i)\s*[\(\[][^()\[\]]*\b(?:note|notes|source|sources|wikidata|wikipedia|qid|tool|tools|search results?|retriev\w*|sparql|knowledge (?:base|graph)|verified via|according to)\b[^()\[\]]*[\)\]]"
);
lazy_regex!(
    meta_sentence_re,
    r"(?i)^(?:let me|let's|let us|i (?:will|'ll|need to|should|am going to)|i'm going to|i(?: have|'ve)? (?:searched|looked up|checked|queried|retrieved|called|used|fetched|found the following)|(?:the )?(?:search|tool|query|sparql|retrieval)(?: results?)? (?:returned|shows?|indicates?|found|yielded|confirms?)|(?:here is|here's) (?:what|the (?:answer|information|result))|(?:step \d|first|next|now)[, ]+(?:i|let)\b)"
);
lazy_regex!(
    leading_attribution_re,
    r"(?i)(^|[.!?]\s+)(?:based on|according to|from|per|using)\s+(?:the\s+|my\s+)?(?:search results?|retrieved (?:data|evidence|information|facts|results)|available (?:data|evidence|information|records)|tool (?:output|results?)|wikidata|wikipedia|knowledge (?:base|graph)|sources?)(?:[^,.]{0,30},\s*|\s+)(\p{Ll})?"
);
lazy_regex!(
    inline_attribution_re,
    r"(?i),?\s*\b(?:based on|according to|as (?:per|shown in|found in|listed in|recorded in|reported (?:in|by)))\s+(?:the\s+|my\s+)?(?:search results?|retrieved (?:data|evidence|information|facts|results)|available (?:data|evidence|information|records)|tool (?:output|results?)|(?:wikidata|wikipedia)(?:\s+(?:data|entry|entries|article|page|records?|results?))?|knowledge (?:base|graph)|sources?)\b"
);
lazy_regex!(
    prepositional_source_re,
    r"(?i)\s*,?\s*\b(?:in|on|from|via|within|using|per|through)\s+(?:the\s+)?(?:wikidata|wikipedia)(?:\s+(?:database|entry|entries|article|page|data|records?|knowledge (?:base|graph)))?\b"
);
lazy_regex!(source_modifier_re, r"(?i)\b(?:wikidata|wikipedia)(?:'s)?\s+");
lazy_regex!(bare_source_re, r"(?i)\s*\b(?:wikidata|wikipedia)\b");
lazy_regex!(
    id_clause_re,
    r"(?i),?\s*\b(?:whose|with|having|which has)\s+(?:an?\s+|the\s+)?(?:entity\s+|item\s+)?(?:id|qid|identifier)\s+(?:is\s+|of\s+)?Q\d+\b\s*,?"
);
lazy_regex!(
    id_parenthetical_re,
    r"(?i)\s*\((?:(?:qid|id|identifier)\s*:?\s*)?Q\d+\)"
);
lazy_regex!(labelled_id_re, r"(?i)\s*\b(?:qid|id)\s*:?\s*Q\d+\b");
lazy_regex!(bare_id_re, r"\s*\bQ\d+\b");
lazy_regex!(
    asks_for_id_re,
    r"(?i)\b(?:qid|wikidata id|identifier|entity id|id)\b"
);
lazy_regex!(empty_brackets_re, r"\s*(?:\(\s*\)|\[\s*\])");
lazy_regex!(space_before_punct_re, r"\s+([,.;:!?])");
lazy_regex!(comma_before_stop_re, r"[,;:]\s*([.!?])");
lazy_regex!(repeated_comma_re, r",(?:\s*,)+");
lazy_regex!(repeated_period_re, r"([.!?])(?:\s*\.)+");
lazy_regex!(leading_junk_re, r"^[\s,;:.\-]+");
lazy_regex!(multi_space_re, r"[ \t]{2,}");

fn replace(re: Option<&'static Regex>, text: &str, rep: &str) -> String {
    match re {
        Some(re) => re.replace_all(text, rep).into_owned(),
        None => text.to_string(),
    }
}

// ============================================================================
// Chatter classification
// ============================================================================

/// True when `text` is process chatter rather than a final answer: empty
/// text, special tokens, serialized tool-call payloads, literal tool
/// invocations, tool names, or planning language.
pub fn is_process_message(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return true;
    }
    if special_token_re().is_some_and(|re| re.is_match(trimmed)) {
        return true;
    }
    let lower = trimmed.to_lowercase();
    if TOOL_NAMES.iter().any(|name| lower.contains(name)) {
        return true;
    }
    if looks_like_tool_payload(trimmed) {
        return true;
    }
    planning_re().is_some_and(|re| re.is_match(trimmed))
}

fn looks_like_tool_payload(text: &str) -> bool {
    json_object_spans(text)
        .into_iter()
        .any(|(start, end)| is_tool_payload(&text[start..end]))
}

fn is_tool_payload(object: &str) -> bool {
    let keyed = json_tool_key_re().is_some_and(|re| re.is_match(object))
        && json_args_key_re().is_some_and(|re| re.is_match(object));
    keyed || TOOL_NAMES.iter().any(|name| object.contains(name))
}

/// Byte spans of top-level brace-balanced `{...}` substrings (quotes and
/// escapes respected). An unterminated object extends to the end of text.
fn json_object_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut in_string = false;
    let mut escape = false;

    for (idx, ch) in text.char_indices() {
        if depth > 0 && in_string {
            if escape {
                escape = false;
            } else if ch == '\\' {
                escape = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start = idx;
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    spans.push((start, idx + 1));
                }
            }
            _ => {}
        }
    }
    if depth > 0 {
        spans.push((start, text.len()));
    }
    spans
}

// ============================================================================
// Sentences
// ============================================================================

const ABBREVIATIONS: &[&str] = &[
    "dr", "prof", "mr", "mrs", "ms", "st", "jr", "sr", "vs", "e.g", "i.e", "etc", "no", "u.s",
    "u.k", "inc", "ltd", "co", "mt", "ft", "gen", "col", "lt", "sgt", "rev", "hon",
];

/// Split on `.`/`!`/`?` followed by whitespace, except after common
/// abbreviations and single-letter initials.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0usize;
    let mut chars = text.char_indices().peekable();

    while let Some((idx, ch)) = chars.next() {
        if !matches!(ch, '.' | '!' | '?') {
            continue;
        }
        let Some(&(next_idx, next)) = chars.peek() else {
            continue;
        };
        if !next.is_whitespace() {
            continue;
        }
        if ch == '.' {
            let word = text[start..idx]
                .rsplit(char::is_whitespace)
                .next()
                .unwrap_or("")
                .trim_start_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase();
            let initial = word.chars().count() == 1 && word.chars().all(char::is_alphabetic);
            if initial || ABBREVIATIONS.contains(&word.as_str()) {
                continue;
            }
        }
        let sentence = text[start..next_idx].trim();
        if !sentence.is_empty() {
            out.push(sentence);
        }
        start = next_idx;
    }
    let rest = text[start..].trim();
    if !rest.is_empty() {
        out.push(rest);
    }
    out
}

// ============================================================================
// Pipeline
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SanitizeContext {
    /// The question explicitly asked for an identifier; keep ids in the answer.
    pub keep_identifiers: bool,
}

impl SanitizeContext {
    pub fn for_question(question: &str) -> Self {
        Self {
            keep_identifiers: asks_for_id_re().is_some_and(|re| re.is_match(question)),
        }
    }
}

#[derive(Clone, Copy)]
pub struct SanitizeRule {
    pub name: &'static str,
    apply: fn(&str, &SanitizeContext) -> String,
}

impl SanitizeRule {
    pub fn apply(&self, text: &str, ctx: &SanitizeContext) -> String {
        (self.apply)(text, ctx)
    }
}

impl std::fmt::Debug for SanitizeRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SanitizeRule").field(&self.name).finish()
    }
}

fn strip_tool_payloads(text: &str, _: &SanitizeContext) -> String {
    let text = replace(special_token_re(), text, " ");
    let text = replace(code_fence_re(), &text, " ");

    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for (start, end) in json_object_spans(&text) {
        if is_tool_payload(&text[start..end]) {
            out.push_str(&text[cursor..start]);
            out.push(' ');
            cursor = end;
        }
    }
    out.push_str(&text[cursor..]);

    replace(invocation_re(), &out, " ")
}

fn strip_meta_parentheticals(text: &str, _: &SanitizeContext) -> String {
    replace(meta_parenthetical_re(), text, "")
}

fn collapse_whitespace(text: &str, _: &SanitizeContext) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn drop_meta_sentences(text: &str, _: &SanitizeContext) -> String {
    let Some(meta) = meta_sentence_re() else {
        return text.to_string();
    };
    split_sentences(text)
        .into_iter()
        .filter(|sentence| !meta.is_match(sentence))
        .collect::<Vec<_>>()
        .join(" ")
}

fn strip_attribution_phrases(text: &str, _: &SanitizeContext) -> String {
    let text = match leading_attribution_re() {
        Some(re) => re
            .replace_all(text, |caps: &Captures<'_>| {
                let boundary = caps.get(1).map_or("", |m| m.as_str());
                let first = caps.get(2).map_or(String::new(), |m| m.as_str().to_uppercase());
                format!("{boundary}{first}")
            })
            .into_owned(),
        None => text.to_string(),
    };
    replace(inline_attribution_re(), &text, "")
}

fn strip_source_names(text: &str, _: &SanitizeContext) -> String {
    let text = replace(prepositional_source_re(), text, "");
    let text = replace(source_modifier_re(), &text, "");
    replace(bare_source_re(), &text, "")
}

fn strip_identifier_clauses(text: &str, ctx: &SanitizeContext) -> String {
    if ctx.keep_identifiers {
        return text.to_string();
    }
    let text = replace(id_clause_re(), text, " ");
    let text = replace(id_parenthetical_re(), &text, "");
    let text = replace(labelled_id_re(), &text, "");
    replace(bare_id_re(), &text, "")
}

fn tidy_punctuation(text: &str, _: &SanitizeContext) -> String {
    let text = replace(empty_brackets_re(), text, "");
    let text = replace(multi_space_re(), &text, " ");
    let text = replace(space_before_punct_re(), &text, "$1");
    let text = replace(comma_before_stop_re(), &text, "$1");
    let text = replace(repeated_comma_re(), &text, ",");
    let text = replace(repeated_period_re(), &text, "$1");
    let text = replace(leading_junk_re(), &text, "");
    let text = text.trim();

    if !text.chars().any(char::is_alphanumeric) {
        return String::new();
    }
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Ordered cleanup pipeline.
#[derive(Debug, Clone)]
pub struct AnswerSanitizer {
    rules: Vec<SanitizeRule>,
}

impl Default for AnswerSanitizer {
    fn default() -> Self {
        Self::standard()
    }
}

impl AnswerSanitizer {
    pub fn standard() -> Self {
        let rule = |name, apply| SanitizeRule { name, apply };
        Self {
            rules: vec![
                rule("strip_tool_payloads", strip_tool_payloads),
                rule("strip_meta_parentheticals", strip_meta_parentheticals),
                rule("collapse_whitespace", collapse_whitespace),
                rule("drop_meta_sentences", drop_meta_sentences),
                rule("strip_attribution_phrases", strip_attribution_phrases),
                rule("strip_source_names", strip_source_names),
                rule("strip_identifier_clauses", strip_identifier_clauses),
                rule("tidy_punctuation", tidy_punctuation),
            ],
        }
    }

    pub fn rules(&self) -> &[SanitizeRule] {
        &self.rules
    }

    pub fn rule(&self, name: &str) -> Option<&SanitizeRule> {
        self.rules.iter().find(|r| r.name == name)
    }

    /// Run every rule in order. May return an empty string.
    pub fn sanitize(&self, raw: &str, question: &str) -> String {
        let ctx = SanitizeContext::for_question(question);
        self.rules
            .iter()
            .fold(raw.to_string(), |text, rule| rule.apply(&text, &ctx))
    }

    /// Intermediate output after each rule, for debugging.
    pub fn trace(&self, raw: &str, question: &str) -> Vec<(&'static str, String)> {
        let ctx = SanitizeContext::for_question(question);
        let mut text = raw.to_string();
        let mut out = Vec::with_capacity(self.rules.len());
        for rule in &self.rules {
            text = rule.apply(&text, &ctx);
            out.push((rule.name, text.clone()));
        }
        out
    }
}

/// Sanitize with the standard pipeline.
pub fn sanitize_answer(raw: &str, question: &str) -> String {
    AnswerSanitizer::standard().sanitize(raw, question)
}

/// Sanitize, substituting [`REFUSAL`] when nothing is left.
pub fn finalize_answer(raw: &str, question: &str) -> String {
    let cleaned = sanitize_answer(raw, question);
    if cleaned.trim().is_empty() {
        REFUSAL.to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_patterns_compile() {
        let patterns: &[fn() -> Option<&'static Regex>] = &[
            special_token_re,
            code_fence_re,
            invocation_re,
            planning_re,
            json_tool_key_re,
            json_args_key_re,
            meta_parenthetical_re,
            meta_sentence_re,
            leading_attribution_re,
            inline_attribution_re,
            prepositional_source_re,
            source_modifier_re,
            bare_source_re,
            id_clause_re,
            id_parenthetical_re,
            labelled_id_re,
            bare_id_re,
            asks_for_id_re,
            empty_brackets_re,
            space_before_punct_re,
            comma_before_stop_re,
            repeated_comma_re,
            repeated_period_re,
            leading_junk_re,
            multi_space_re,
        ];
        for (i, pattern) in patterns.iter().enumerate() {
            assert!(pattern().is_some(), "pattern #{i} failed to compile");
        }
    }

    #[test]
    fn classifies_process_chatter() {
        assert!(is_process_message(
            r#"<|python_tag|>{"name": "search_entity_candidates", "parameters": {"entity_name": "Albert Einstein"}}"#
        ));
        assert!(is_process_message(r#"{"name": "lookup", "arguments": {"q": 1}}"#));
        assert!(is_process_message("Let me search for Albert Einstein first."));
        assert!(is_process_message("I will call fetch_entity_properties next."));
        assert!(is_process_message("fetch_entity_properties(qid='Q937', properties=['P569'])"));
        assert!(is_process_message("   "));

        assert!(!is_process_message("Paris is the capital of France."));
        assert!(!is_process_message("I cannot verify that Helena Vargass exists."));
        assert!(!is_process_message("Albert Einstein was born on 14 March 1879."));
    }

    #[test]
    fn strips_source_attribution_without_leaving_artifacts() {
        let raw = "I cannot verify a real-world collaboration between Dr. Liora Anstrum and \
                   Prof. Armin Delacroix in Wikidata, based on the search results.";
        let cleaned = sanitize_answer(raw, "Did Dr. Liora Anstrum collaborate with Prof. Armin Delacroix?");
        assert!(cleaned.contains("I cannot verify a real-world collaboration"));
        assert!(!cleaned.to_lowercase().contains("wikidata"));
        assert!(!cleaned.to_lowercase().contains("search results"));
        assert!(!cleaned.contains(",."));
        assert!(cleaned.ends_with("Armin Delacroix."));
    }

    #[test]
    fn strips_trailing_source_mention() {
        assert_eq!(
            sanitize_answer("Paris is the capital of France from Wikipedia.", "What is the capital of France?"),
            "Paris is the capital of France."
        );
    }

    #[test]
    fn removes_identifier_clause_unless_asked() {
        let raw = "George Orwell, whose Wikidata ID is Q3335, is the British writer of Nineteen Eighty-Four.";
        let cleaned = sanitize_answer(raw, "Who wrote Nineteen Eighty-Four?");
        assert_eq!(cleaned, "George Orwell is the British writer of Nineteen Eighty-Four.");

        let kept = sanitize_answer("The QID of France is Q142.", "What is the Wikidata ID of France?");
        assert!(kept.contains("Q142"));
    }

    #[test]
    fn tool_payload_only_sanitizes_to_empty_and_refusal() {
        let raw = r#"<|python_tag|>{"name": "search_entity_candidates", "parameters": {"entity_name": "Liora Anstrum", "entity_type": "person"}}"#;
        assert_eq!(sanitize_answer(raw, "Who is Liora Anstrum?"), "");
        assert_eq!(finalize_answer(raw, "Who is Liora Anstrum?"), REFUSAL);
    }

    #[test]
    fn leading_attribution_is_removed_and_recapitalized() {
        let cleaned = sanitize_answer(
            "Based on the search results, the capital of France is Paris.",
            "What is the capital of France?",
        );
        assert_eq!(cleaned, "The capital of France is Paris.");
    }

    #[test]
    fn attribution_without_comma_keeps_the_answer() {
        let question = "What is the capital of France?";
        assert_eq!(
            finalize_answer("Based on the search results the capital of France is Paris.", question),
            "The capital of France is Paris."
        );
        assert_eq!(
            finalize_answer("According to Wikidata Paris is the capital of France.", question),
            "Paris is the capital of France."
        );
        assert_eq!(finalize_answer("Based on the search results.", question), REFUSAL);
    }

    #[test]
    fn meta_sentences_and_parentheticals_are_dropped() {
        let raw = "Let me check the records. Niels Bohr was born on 7 October 1885 (source: Wikidata). \
                   The search results show this clearly.";
        assert_eq!(
            sanitize_answer(raw, "When was Niels Bohr born?"),
            "Niels Bohr was born on 7 October 1885."
        );
    }

    #[test]
    fn sentence_splitting_respects_abbreviations_and_initials() {
        let sentences = split_sentences("Dr. Smith met J. R. R. Tolkien. They talked! Done?");
        assert_eq!(sentences, vec!["Dr. Smith met J. R. R. Tolkien.", "They talked!", "Done?"]);
    }

    #[test]
    fn each_rule_is_independently_addressable() {
        let sanitizer = AnswerSanitizer::standard();
        let names: Vec<&str> = sanitizer.rules().iter().map(|r| r.name).collect();
        assert_eq!(
            names,
            vec![
                "strip_tool_payloads",
                "strip_meta_parentheticals",
                "collapse_whitespace",
                "drop_meta_sentences",
                "strip_attribution_phrases",
                "strip_source_names",
                "strip_identifier_clauses",
                "tidy_punctuation",
            ]
        );

        let ctx = SanitizeContext::default();
        let tidy = sanitizer.rule("tidy_punctuation").unwrap();
        assert_eq!(tidy.apply("  , paris is nice ,.", &ctx), "Paris is nice.");

        let trace = sanitizer.trace("Paris  is\nnice.", "");
        assert_eq!(trace.len(), names.len());
        assert_eq!(trace[2], ("collapse_whitespace", "Paris is nice.".to_string()));
    }

    #[test]
    fn clean_answers_pass_through_unchanged() {
        for answer in [
            "Paris is the capital of France.",
            "Albert Einstein was born on 14 March 1879 in Ulm.",
            "I cannot verify that Helena Vargass exists.",
        ] {
            assert_eq!(sanitize_answer(answer, "q"), answer);
        }
    }
}
