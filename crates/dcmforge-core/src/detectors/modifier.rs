//! Modifier detector (§4.4): additive. The IR_CONTRAST and TRAJECTORY
//! exclusion groups keep only their highest-priority match; independent
//! modifiers combine freely.

use std::collections::HashMap;

use crate::config::{ClassRule, DetectorConfig};
use crate::evidence::{calculate_confidence, Evidence};
use crate::evidence::AxisResult;

use super::{standard_tiers, AxisContext, Detector};

pub struct ModifierDetector {
    config: DetectorConfig,
}

impl ModifierDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    /// All matched modifiers with their winning evidence, after applying
    /// exclusion groups. Order follows configured priority.
    pub fn detect_all(&self, ctx: &AxisContext<'_>) -> Vec<(String, Evidence)> {
        let ordered = self.config.ordered_classes();
        let mut matches: HashMap<String, (&ClassRule, Evidence)> = HashMap::new();
        for rule in &ordered {
            if let Some(evidence) = standard_tiers(ctx, rule, "modifier") {
                matches.insert(rule.name.clone(), (rule, evidence));
            }
        }

        // Resolve exclusion groups: among members present, keep only the
        // highest-priority one (priority_order / rules.priority_order index).
        let priority_index: HashMap<&str, usize> = self
            .config
            .rules
            .priority_order
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();

        for group in self.config.exclusion_groups.values() {
            let present: Vec<&str> = group
                .iter()
                .filter_map(|class_id| {
                    self.config
                        .classes
                        .get(class_id)
                        .map(|r| r.name.as_str())
                        .filter(|name| matches.contains_key(*name))
                })
                .collect();
            if present.len() <= 1 {
                continue;
            }
            let keep = group
                .iter()
                .min_by_key(|class_id| priority_index.get(class_id.as_str()).copied().unwrap_or(usize::MAX))
                .and_then(|class_id| self.config.classes.get(class_id))
                .map(|r| r.name.clone());
            for name in present {
                if Some(name.to_string()) != keep {
                    matches.remove(name);
                }
            }
        }

        ordered
            .iter()
            .filter_map(|rule| matches.remove(&rule.name).map(|(_, ev)| (rule.name.clone(), ev)))
            .collect()
    }
}

impl Detector for ModifierDetector {
    fn axis_name(&self) -> &'static str {
        "modifier"
    }

    /// Returns the highest-confidence modifier as `value`, with every
    /// matched modifier's evidence attached; callers that need the full set
    /// should use [`ModifierDetector::detect_all`] (§4.4 is additive, but
    /// `AxisResult` only names a single winner for failure-mode purposes).
    fn detect(&self, ctx: &AxisContext<'_>) -> AxisResult {
        let all = self.detect_all(ctx);
        if all.is_empty() {
            return AxisResult::default();
        }
        let evidence: Vec<Evidence> = all.iter().map(|(_, e)| e.clone()).collect();
        let best = all
            .iter()
            .max_by(|a, b| {
                calculate_confidence(&evidence, &a.0)
                    .partial_cmp(&calculate_confidence(&evidence, &b.0))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap();
        let confidence = calculate_confidence(&evidence, &best.0);
        AxisResult {
            value: Some(best.0.clone()),
            confidence,
            evidence,
            alternatives: Vec::new(),
            has_conflict: false,
            conflict_target: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClassificationConfig;
    use crate::entities::StackFingerprint;

    fn detector() -> ModifierDetector {
        ModifierDetector::new(ClassificationConfig::embedded().unwrap().modifier)
    }

    #[test]
    fn independent_modifiers_combine() {
        let mut fp = StackFingerprint::default();
        fp.text_search_blob = "flair fat sat".to_string();
        let ctx = AxisContext::new(&fp);
        let all = detector().detect_all(&ctx);
        let names: Vec<&str> = all.iter().map(|(n, _)| n.as_str()).collect();
        assert!(names.contains(&"FLAIR"));
        assert!(names.contains(&"FatSat"));
    }

    #[test]
    fn ir_contrast_exclusion_keeps_highest_priority() {
        let mut fp = StackFingerprint::default();
        fp.parsed_sequence_variant = vec!["is_flair".to_string(), "is_stir".to_string()];
        let ctx = AxisContext::new(&fp);
        let all = detector().detect_all(&ctx);
        let names: Vec<&str> = all.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["FLAIR"]);
    }
}
