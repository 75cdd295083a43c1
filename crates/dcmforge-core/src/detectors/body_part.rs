//! Body part / spinal cord detector (§4.4): text keywords first; conflict
//! when both spine and brain keywords match; a geometry heuristic flags
//! ambiguous stacks for review when text is silent on both sides.

use crate::config::DetectorConfig;
use crate::entities::TriState;
use crate::evidence::{calculate_confidence, Evidence};
use crate::evidence::AxisResult;

use super::{AxisContext, Detector};

pub struct BodyPartDetector {
    config: DetectorConfig,
}

/// Outcome of the spine/brain resolution, including whether the geometry
/// heuristic fired (always contributes a review reason per §4.4).
pub struct BodyPartOutcome {
    pub spinal_cord: TriState,
    pub result: AxisResult,
    pub heuristic_flagged: bool,
}

impl BodyPartDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    pub fn resolve(&self, ctx: &AxisContext<'_>, technique: Option<&str>) -> BodyPartOutcome {
        let spine_rule = self.config.classes.get("spine");
        let brain_rule = self.config.classes.get("brain");

        let spine_hit = spine_rule.and_then(|r| r.keywords.iter().find(|kw| ctx.text_contains(kw)));
        let brain_hit = brain_rule.and_then(|r| r.keywords.iter().find(|kw| ctx.text_contains(kw)));

        match (spine_hit, brain_hit) {
            (Some(kw), None) => {
                let evidence = Evidence::from_text_search(kw, "spine", None);
                let confidence = calculate_confidence(std::slice::from_ref(&evidence), "spine");
                return BodyPartOutcome {
                    spinal_cord: Some(true),
                    result: AxisResult {
                        value: Some("spine".to_string()),
                        confidence,
                        evidence: vec![evidence],
                        ..Default::default()
                    },
                    heuristic_flagged: false,
                };
            }
            (None, Some(kw)) => {
                let evidence = Evidence::from_text_search(kw, "brain", None);
                let confidence = calculate_confidence(std::slice::from_ref(&evidence), "brain");
                return BodyPartOutcome {
                    spinal_cord: Some(false),
                    result: AxisResult {
                        value: Some("brain".to_string()),
                        confidence,
                        evidence: vec![evidence],
                        ..Default::default()
                    },
                    heuristic_flagged: false,
                };
            }
            (Some(spine_kw), Some(brain_kw)) => {
                let evidence = vec![
                    Evidence::from_text_search(spine_kw, "spine", None),
                    Evidence::from_text_search(brain_kw, "brain", None),
                ];
                return BodyPartOutcome {
                    spinal_cord: None,
                    result: AxisResult {
                        value: None,
                        confidence: 0.0,
                        evidence,
                        has_conflict: true,
                        conflict_target: Some("brain".to_string()),
                        alternatives: Vec::new(),
                    },
                    heuristic_flagged: false,
                };
            }
            (None, None) => {}
        }

        // Geometry heuristic fallback (§9 open question 2: thresholds are
        // configuration, read from the YAML, not physics constants).
        let Some(heuristic) = &self.config.heuristic else {
            return BodyPartOutcome {
                spinal_cord: None,
                result: AxisResult::default(),
                heuristic_flagged: false,
            };
        };

        let fp = ctx.fingerprint;
        let aspect_out_of_band = fp
            .aspect_ratio
            .map(|ratio| ratio < heuristic.aspect_ratio_min || ratio > heuristic.aspect_ratio_max)
            .unwrap_or(false);
        let simple_technique = technique
            .map(|t| heuristic.simple_techniques.iter().any(|s| s == t))
            .unwrap_or(false);
        let few_slices = fp.slice_count.map(|n| n < heuristic.max_slice_count).unwrap_or(false);

        if aspect_out_of_band && simple_technique && few_slices {
            let evidence = Evidence::from_geometry(
                "aspect_ratio out of band, simple technique, low slice count",
                "spine",
                Some("geometry heuristic suggests spine but is unconfirmed".to_string()),
            );
            return BodyPartOutcome {
                spinal_cord: None,
                result: AxisResult {
                    value: None,
                    confidence: evidence.weight,
                    evidence: vec![evidence],
                    ..Default::default()
                },
                heuristic_flagged: true,
            };
        }

        BodyPartOutcome {
            spinal_cord: None,
            result: AxisResult::default(),
            heuristic_flagged: false,
        }
    }
}

impl Detector for BodyPartDetector {
    fn axis_name(&self) -> &'static str {
        "body_part"
    }

    fn detect(&self, ctx: &AxisContext<'_>) -> AxisResult {
        self.resolve(ctx, None).result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClassificationConfig;
    use crate::entities::StackFingerprint;

    fn detector() -> BodyPartDetector {
        BodyPartDetector::new(ClassificationConfig::embedded().unwrap().body_part)
    }

    #[test]
    fn spine_keyword_sets_true() {
        let mut fp = StackFingerprint::default();
        fp.text_search_blob = "cervical spine".to_string();
        let outcome = detector().resolve(&AxisContext::new(&fp), None);
        assert_eq!(outcome.spinal_cord, Some(true));
    }

    #[test]
    fn conflicting_keywords_flag_review() {
        let mut fp = StackFingerprint::default();
        fp.text_search_blob = "brain and spine".to_string();
        let outcome = detector().resolve(&AxisContext::new(&fp), None);
        assert_eq!(outcome.spinal_cord, None);
        assert!(outcome.result.has_conflict);
    }

    #[test]
    fn heuristic_flags_without_asserting() {
        let mut fp = StackFingerprint::default();
        fp.aspect_ratio = Some(0.5);
        fp.slice_count = Some(20);
        let outcome = detector().resolve(&AxisContext::new(&fp), Some("TSE"));
        assert_eq!(outcome.spinal_cord, None);
        assert!(outcome.heuristic_flagged);
    }
}
