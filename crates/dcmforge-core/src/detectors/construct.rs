//! Construct detector (§4.4): additive, derived-artifact classification.
//! No exclusion groups — every matching class contributes.

use crate::config::DetectorConfig;
use crate::evidence::{calculate_confidence, Evidence};
use crate::evidence::AxisResult;

use super::{standard_tiers, AxisContext, Detector};

pub struct ConstructDetector {
    config: DetectorConfig,
}

impl ConstructDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    pub fn detect_all(&self, ctx: &AxisContext<'_>) -> Vec<(String, Evidence)> {
        self.config
            .ordered_classes()
            .into_iter()
            .filter_map(|rule| standard_tiers(ctx, rule, "construct").map(|ev| (rule.name.clone(), ev)))
            .collect()
    }
}

impl Detector for ConstructDetector {
    fn axis_name(&self) -> &'static str {
        "construct"
    }

    fn detect(&self, ctx: &AxisContext<'_>) -> AxisResult {
        let all = self.detect_all(ctx);
        if all.is_empty() {
            return AxisResult::default();
        }
        let evidence: Vec<Evidence> = all.iter().map(|(_, e)| e.clone()).collect();
        let (best_name, _) = all.first().unwrap();
        let confidence = calculate_confidence(&evidence, best_name);
        AxisResult {
            value: Some(best_name.clone()),
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

    #[test]
    fn adc_keyword_detected() {
        let detector = ConstructDetector::new(ClassificationConfig::embedded().unwrap().construct);
        let mut fp = StackFingerprint::default();
        fp.text_search_blob = "adc map".to_string();
        let ctx = AxisContext::new(&fp);
        let all = detector.detect_all(&ctx);
        assert!(all.iter().any(|(name, _)| name == "ADC"));
    }
}
