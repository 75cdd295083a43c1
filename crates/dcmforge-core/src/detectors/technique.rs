//! Technique detector (§4.4): pulse-sequence technique within one of four
//! physics families {SE, GRE, EPI, MIXED}. First match wins; a family
//! conflict is raised when the winner lacks direct flag/keyword support
//! while a competing family has it.

use crate::config::DetectorConfig;
use crate::evidence::{calculate_confidence, Evidence, EvidenceSource};
use crate::evidence::AxisResult;

use super::{standard_tiers, AxisContext, Detector};

pub struct TechniqueDetector {
    config: DetectorConfig,
}

impl TechniqueDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    fn physics_match(ctx: &AxisContext<'_>, rule: &crate::config::ClassRule) -> Option<Evidence> {
        let fp = ctx.fingerprint;
        if let Some(&te_max) = rule.physics.get("te_max") {
            if let Some(te) = fp.echo_time {
                if te <= te_max {
                    return Some(Evidence::from_physics(&[("TE", te)], &rule.name, true, None));
                }
            }
        }
        if let Some(&te_min) = rule.physics.get("te_min") {
            if let Some(te) = fp.echo_time {
                if te >= te_min {
                    return Some(Evidence::from_physics(&[("TE", te)], &rule.name, true, None));
                }
            }
        }
        None
    }

    /// Family-conflict check (§4.4): does some other-family rule also have
    /// direct flag/keyword/combination support for this fingerprint? Run
    /// after any tier match, not just the physics-range tier.
    fn family_conflict<'a>(
        ctx: &AxisContext<'_>,
        ordered: &'a [&crate::config::ClassRule],
        winner: &crate::config::ClassRule,
    ) -> Option<&'a crate::config::ClassRule> {
        ordered
            .iter()
            .find(|other| other.family != winner.family && standard_tiers(ctx, other, "technique").is_some())
            .copied()
    }
}

impl Detector for TechniqueDetector {
    fn axis_name(&self) -> &'static str {
        "technique"
    }

    fn detect(&self, ctx: &AxisContext<'_>) -> AxisResult {
        let ordered = self.config.ordered_classes();

        // Tiers 1-3: direct flag/keyword/combination support, first match wins.
        let mut direct_matches: Vec<(&crate::config::ClassRule, Evidence)> = Vec::new();
        for rule in &ordered {
            if let Some(evidence) = standard_tiers(ctx, rule, "technique") {
                direct_matches.push((rule, evidence));
            }
        }

        if let Some((winner, evidence)) = direct_matches.first() {
            let competing_family_support = Self::family_conflict(ctx, &ordered, winner);
            let confidence = calculate_confidence(std::slice::from_ref(evidence), &winner.name);
            return AxisResult {
                value: Some(winner.name.clone()),
                confidence,
                evidence: vec![evidence.clone()],
                alternatives: Vec::new(),
                has_conflict: competing_family_support.is_some(),
                conflict_target: competing_family_support.map(|r| r.name.clone()),
            };
        }

        // Tier 4: physics range.
        for rule in &ordered {
            if let Some(evidence) = Self::physics_match(ctx, rule) {
                let competing_family_support = Self::family_conflict(ctx, &ordered, rule);
                let confidence = calculate_confidence(std::slice::from_ref(&evidence), &rule.name);
                return AxisResult {
                    value: Some(rule.name.clone()),
                    confidence,
                    evidence: vec![evidence],
                    alternatives: Vec::new(),
                    has_conflict: competing_family_support.is_some(),
                    conflict_target: competing_family_support.map(|r| r.name.clone()),
                };
            }
        }

        // Tier 5: family fallback, lowest-priority generic member of the
        // most commonly supported family, or MIXED/"MIX" if nothing fits.
        if let Some(fallback) = ordered.iter().min_by_key(|r| r.priority) {
            let evidence = Evidence {
                source: EvidenceSource::PhysicsOverlap,
                field: "technique".to_string(),
                value: fallback.name.clone(),
                target: fallback.name.clone(),
                weight: 0.60,
                description: format!("{} family fallback", fallback.family.clone().unwrap_or_default()),
            };
            return AxisResult {
                value: Some(fallback.name.clone()),
                confidence: 0.60,
                evidence: vec![evidence],
                alternatives: Vec::new(),
                has_conflict: false,
                conflict_target: None,
            };
        }

        AxisResult::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClassificationConfig;
    use crate::entities::StackFingerprint;

    fn detector() -> TechniqueDetector {
        TechniqueDetector::new(ClassificationConfig::embedded().unwrap().technique)
    }

    #[test]
    fn mprage_exclusive_flag() {
        let mut fp = StackFingerprint::default();
        fp.parsed_sequence_name = vec!["is_mprage".to_string()];
        let ctx = AxisContext::new(&fp);
        let result = detector().detect(&ctx);
        assert_eq!(result.value.as_deref(), Some("MPRAGE"));
        assert_eq!(result.confidence, 0.95);
    }

    #[test]
    fn keyword_match_in_text() {
        let mut fp = StackFingerprint::default();
        fp.text_search_blob = "mprage sag".to_string();
        let ctx = AxisContext::new(&fp);
        let result = detector().detect(&ctx);
        assert_eq!(result.value.as_deref(), Some("MPRAGE"));
    }

    #[test]
    fn direct_match_still_flags_competing_family() {
        let mut fp = StackFingerprint::default();
        // MPRAGE (GRE) is higher priority and wins, but TSE (SE) also has
        // direct exclusive-flag support — a real family conflict, not just
        // a tier-4 physics-range one.
        fp.parsed_sequence_name = vec!["is_mprage".to_string(), "is_tse".to_string()];
        let ctx = AxisContext::new(&fp);
        let result = detector().detect(&ctx);
        assert_eq!(result.value.as_deref(), Some("MPRAGE"));
        assert!(result.has_conflict);
        assert_eq!(result.conflict_target.as_deref(), Some("TSE"));
    }

    #[test]
    fn direct_match_without_competing_family_has_no_conflict() {
        let mut fp = StackFingerprint::default();
        fp.parsed_sequence_name = vec!["is_mprage".to_string()];
        let ctx = AxisContext::new(&fp);
        let result = detector().detect(&ctx);
        assert!(!result.has_conflict);
        assert!(result.conflict_target.is_none());
    }
}
