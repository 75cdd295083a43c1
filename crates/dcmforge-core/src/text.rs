//! Semantic text normalizer (§4.1).
//!
//! Turns a concatenation of free-text DICOM fields into a space-separated,
//! deduplicated, order-preserving token stream. Every step is
//! position-preserving so multi-word phrases like `+gd` or `t2 flair`
//! survive intact, and the whole pipeline is idempotent under repeated
//! application (tested below, and required by spec invariant §8.9).

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// A conditional token replacement: fires when `ambiguous` is present in the
/// token stream AND either any of `any_of` is present, or all of `all_of`
/// are present (§4.1 step 11).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionalRule {
    pub ambiguous: String,
    pub replacement: String,
    #[serde(default)]
    pub any_of: Vec<String>,
    #[serde(default)]
    pub all_of: Vec<String>,
}

impl ConditionalRule {
    fn fires(&self, tokens: &[String]) -> bool {
        if !tokens.iter().any(|t| t == &self.ambiguous) {
            return false;
        }
        let any_ok = self.any_of.is_empty() || self.any_of.iter().any(|c| tokens.iter().any(|t| t == c));
        let all_ok = self.all_of.is_empty() || self.all_of.iter().all(|c| tokens.iter().any(|t| t == c));
        // Spec: "any-of context tokens present OR all-of context tokens present".
        // When only one of the two lists is configured, the other is
        // vacuously satisfied so the populated list alone gates the rule.
        if self.any_of.is_empty() && self.all_of.is_empty() {
            return false;
        }
        any_ok || all_ok
    }
}

/// The full configuration driving the normalizer (loaded from
/// `semantic-token-map.yaml`, §6 "Classification configuration").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NormalizerConfig {
    /// Literal substrings replaced with a single space, checked first.
    #[serde(default)]
    pub raw_removals: Vec<String>,
    /// Single characters mapped to words/phrases, preserving contrast-agent
    /// semantics (e.g. `*` → `star`, `+` → ` + `, `-` → ` - `).
    #[serde(default)]
    pub meaningful_chars: Vec<(char, String)>,
    /// Characters replaced with a single space.
    #[serde(default)]
    pub separators: Vec<char>,
    /// Characters removed entirely.
    #[serde(default)]
    pub noise_chars: Vec<char>,
    /// Tokens dropped unconditionally after split+dedup (step 9).
    #[serde(default)]
    pub boilerplate_tokens: HashSet<String>,
    /// Unconditional alias → canonical token map (step 10).
    #[serde(default)]
    pub canonical: Vec<(String, String)>,
    /// Conditional replacement rules (step 11).
    #[serde(default)]
    pub conditional: Vec<ConditionalRule>,
}

/// A compiled normalizer. Construction is cheap; keep one instance around
/// per detector pipeline rather than rebuilding per call.
#[derive(Debug, Clone)]
pub struct Normalizer {
    config: NormalizerConfig,
}

impl Normalizer {
    pub fn new(config: NormalizerConfig) -> Self {
        Self { config }
    }

    /// Run the full 12-step pipeline (§4.1).
    pub fn normalize(&self, input: &str) -> String {
        let mut s = input.to_string();

        // 1. Raw substring removals.
        for raw in &self.config.raw_removals {
            s = s.replace(raw.as_str(), " ");
        }

        // 2. Meaningful character replacements.
        for (ch, replacement) in &self.config.meaningful_chars {
            s = s.replace(*ch, replacement.as_str());
        }

        // 3. Separator replacements.
        s = s
            .chars()
            .map(|c| if self.config.separators.contains(&c) { ' ' } else { c })
            .collect();

        // 4. Noise removal.
        s = s.chars().filter(|c| !self.config.noise_chars.contains(c)).collect();

        // 5. Lowercase, then pad +/- as standalone tokens.
        s = s.to_lowercase();
        s = s.replace('+', " + ").replace('-', " - ");

        // 6. Strip everything outside [a-z0-9 _+\-].
        s = s
            .chars()
            .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == ' ' || *c == '_' || *c == '+' || *c == '-')
            .collect();

        // 7. Split on whitespace and underscore.
        let mut tokens: Vec<String> = s
            .split(|c: char| c.is_whitespace() || c == '_')
            .filter(|t| !t.is_empty())
            .map(|t| t.to_string())
            .collect();

        // 8. Deduplicate, preserving first-occurrence order.
        let mut seen = HashSet::with_capacity(tokens.len());
        tokens.retain(|t| seen.insert(t.clone()));

        // 9. Remove boilerplate tokens.
        tokens.retain(|t| !self.config.boilerplate_tokens.contains(t));

        // 10. Unconditional canonicalization, in place.
        for (alias, canonical) in &self.config.canonical {
            for t in tokens.iter_mut() {
                if t == alias {
                    *t = canonical.clone();
                }
            }
        }

        // 11. Conditional replacements. Evaluated against the token stream
        // as it stood before any conditional rule fired this pass, so two
        // rules can't chain into each other unpredictably within one call.
        let snapshot = tokens.clone();
        for rule in &self.config.conditional {
            if rule.fires(&snapshot) {
                for t in tokens.iter_mut() {
                    if t == &rule.ambiguous {
                        *t = rule.replacement.clone();
                    }
                }
            }
        }

        // 12. Re-join with single spaces.
        tokens.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> NormalizerConfig {
        NormalizerConfig {
            raw_removals: vec!["WIP ".to_string()],
            meaningful_chars: vec![('*', "star".to_string())],
            separators: vec!['/', '.'],
            noise_chars: vec!['!', '('],
            boilerplate_tokens: ["scan".to_string()].into_iter().collect(),
            canonical: vec![("flair".to_string(), "flair".to_string())],
            conditional: vec![ConditionalRule {
                ambiguous: "t2".to_string(),
                replacement: "t2star".to_string(),
                any_of: vec!["star".to_string()],
                all_of: vec![],
            }],
        }
    }

    #[test]
    fn preserves_plus_minus_as_tokens() {
        let norm = Normalizer::new(NormalizerConfig::default());
        assert_eq!(norm.normalize("T1+Gd"), "t1 + gd");
        assert_eq!(norm.normalize("pre-contrast"), "pre - contrast");
    }

    #[test]
    fn conditional_rule_fires_with_context() {
        let norm = Normalizer::new(sample_config());
        assert_eq!(norm.normalize("t2* scan"), "t2star star");
    }

    #[test]
    fn conditional_rule_does_not_fire_without_context() {
        let norm = Normalizer::new(sample_config());
        assert_eq!(norm.normalize("t2 scan"), "t2");
    }

    #[test]
    fn dedup_preserves_first_occurrence_order() {
        let norm = Normalizer::new(NormalizerConfig::default());
        assert_eq!(norm.normalize("flair flair t1 flair"), "flair t1");
    }

    #[test]
    fn idempotent_under_repeated_application() {
        let norm = Normalizer::new(sample_config());
        let once = norm.normalize("T2*  Axial   WIP Scan!!");
        let twice = norm.normalize(&once);
        assert_eq!(once, twice);
    }
}
