//! Contrast agent detector (§4.4): two-tier. A populated DICOM contrast
//! field settles it outright; otherwise negative text keywords override a
//! positive keyword match; otherwise the axis is undetermined.

use crate::config::DetectorConfig;
use crate::entities::TriState;
use crate::evidence::{calculate_confidence, Evidence};
use crate::evidence::AxisResult;

use super::{AxisContext, Detector};

pub struct ContrastDetector {
    config: DetectorConfig,
}

impl ContrastDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    /// Resolve straight to the tri-state `post_contrast` value the pipeline
    /// persists, alongside the `AxisResult` used for failure-mode tracking.
    pub fn resolve(&self, ctx: &AxisContext<'_>) -> (TriState, AxisResult) {
        if ctx.fingerprint.contrast_bolus_agent_present {
            let evidence = Evidence::from_dicom_structured(
                "contrast_bolus_agent",
                "present",
                "positive",
                Some("contrast_bolus_agent_present set".to_string()),
            );
            let confidence = calculate_confidence(std::slice::from_ref(&evidence), "positive");
            return (
                Some(true),
                AxisResult {
                    value: Some("positive".to_string()),
                    confidence,
                    evidence: vec![evidence],
                    ..Default::default()
                },
            );
        }

        let negative = self.config.classes.get("text_negative");
        if let Some(rule) = negative {
            if let Some(kw) = rule.keywords.iter().find(|kw| ctx.contrast_text_contains(kw) || ctx.text_contains(kw)) {
                let evidence = Evidence::from_text_search(kw, "negative", None);
                let confidence = calculate_confidence(std::slice::from_ref(&evidence), "negative");
                return (
                    Some(false),
                    AxisResult {
                        value: Some("negative".to_string()),
                        confidence,
                        evidence: vec![evidence],
                        ..Default::default()
                    },
                );
            }
        }

        let positive = self.config.classes.get("text_positive");
        if let Some(rule) = positive {
            if let Some(kw) = rule.keywords.iter().find(|kw| ctx.contrast_text_contains(kw) || ctx.text_contains(kw)) {
                let evidence = Evidence::from_text_search(kw, "positive", None);
                let confidence = calculate_confidence(std::slice::from_ref(&evidence), "positive");
                return (
                    Some(true),
                    AxisResult {
                        value: Some("positive".to_string()),
                        confidence,
                        evidence: vec![evidence],
                        ..Default::default()
                    },
                );
            }
        }

        (None, AxisResult::default())
    }
}

impl Detector for ContrastDetector {
    fn axis_name(&self) -> &'static str {
        "contrast"
    }

    fn detect(&self, ctx: &AxisContext<'_>) -> AxisResult {
        self.resolve(ctx).1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClassificationConfig;
    use crate::entities::StackFingerprint;

    fn detector() -> ContrastDetector {
        ContrastDetector::new(ClassificationConfig::embedded().unwrap().contrast)
    }

    #[test]
    fn dicom_field_wins_outright() {
        let mut fp = StackFingerprint::default();
        fp.contrast_bolus_agent_present = true;
        fp.contrast_search_blob = "utan gd".to_string();
        let (value, _) = detector().resolve(&AxisContext::new(&fp));
        assert_eq!(value, Some(true));
    }

    #[test]
    fn negative_keyword_overrides_positive() {
        let mut fp = StackFingerprint::default();
        fp.text_search_blob = "post contrast utan gd".to_string();
        let (value, _) = detector().resolve(&AxisContext::new(&fp));
        assert_eq!(value, Some(false));
    }

    #[test]
    fn undetermined_when_silent() {
        let fp = StackFingerprint::default();
        let (value, _) = detector().resolve(&AxisContext::new(&fp));
        assert_eq!(value, None);
    }
}
