//! Provenance detector (§4.4): identifies the processing pipeline that
//! produced a stack and therefore which classification branch (§4.5)
//! handles it. First match wins; classes are evaluated in configured
//! priority order, most specific first.

use crate::config::DetectorConfig;
use crate::evidence::{calculate_confidence, AxisResult};

use super::{standard_tiers, AxisContext, Detector};

pub struct ProvenanceDetector {
    config: DetectorConfig,
}

impl ProvenanceDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }
}

impl Detector for ProvenanceDetector {
    fn axis_name(&self) -> &'static str {
        "provenance"
    }

    fn detect(&self, ctx: &AxisContext<'_>) -> AxisResult {
        for rule in self.config.ordered_classes() {
            if let Some(evidence) = standard_tiers(ctx, rule, "provenance") {
                let confidence = calculate_confidence(std::slice::from_ref(&evidence), &rule.name);
                return AxisResult {
                    value: Some(rule.name.clone()),
                    confidence,
                    evidence: vec![evidence],
                    alternatives: Vec::new(),
                    has_conflict: false,
                    conflict_target: None,
                };
            }
        }
        // RawRecon is the default branch when nothing else fires (§4.4, §4.5).
        AxisResult {
            value: Some("RawRecon".to_string()),
            confidence: 0.60,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClassificationConfig;
    use crate::entities::StackFingerprint;

    fn detector() -> ProvenanceDetector {
        ProvenanceDetector::new(ClassificationConfig::embedded().unwrap().provenance)
    }

    #[test]
    fn swi_exclusive_flag_wins() {
        let mut fp = StackFingerprint::default();
        fp.parsed_image_type = vec!["has_swi".to_string()];
        let ctx = AxisContext::new(&fp);
        let result = detector().detect(&ctx);
        assert_eq!(result.value.as_deref(), Some("SWIRecon"));
        assert_eq!(result.confidence, 0.95);
    }

    #[test]
    fn defaults_to_raw_recon() {
        let fp = StackFingerprint::default();
        let ctx = AxisContext::new(&fp);
        let result = detector().detect(&ctx);
        assert_eq!(result.value.as_deref(), Some("RawRecon"));
    }
}
