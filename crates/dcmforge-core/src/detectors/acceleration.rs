//! Acceleration detector (§4.4): additive, bounded-regex patterns so e.g.
//! `\barc\b` matches standalone "ARC" without matching inside "search".

use regex::Regex;

use crate::config::DetectorConfig;
use crate::evidence::{calculate_confidence, Evidence};
use crate::evidence::AxisResult;

use super::{AxisContext, Detector};

struct CompiledRule {
    name: String,
    patterns: Vec<Regex>,
}

pub struct AccelerationDetector {
    rules: Vec<CompiledRule>,
}

impl AccelerationDetector {
    pub fn new(config: DetectorConfig) -> Self {
        let rules = config
            .ordered_classes()
            .into_iter()
            .map(|rule| CompiledRule {
                name: rule.name.clone(),
                patterns: rule
                    .patterns
                    .iter()
                    .filter_map(|p| Regex::new(p).ok())
                    .collect(),
            })
            .collect();
        Self { rules }
    }

    pub fn detect_all(&self, ctx: &AxisContext<'_>) -> Vec<(String, Evidence)> {
        let blob = &ctx.fingerprint.text_search_blob;
        self.rules
            .iter()
            .filter_map(|rule| {
                rule.patterns
                    .iter()
                    .find(|re| re.is_match(blob))
                    .map(|re| (rule.name.clone(), Evidence::from_text_search(re.as_str(), &rule.name, None)))
            })
            .collect()
    }
}

impl Detector for AccelerationDetector {
    fn axis_name(&self) -> &'static str {
        "acceleration"
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
    fn arc_matches_standalone_only() {
        let detector = AccelerationDetector::new(ClassificationConfig::embedded().unwrap().acceleration);

        let mut hits = StackFingerprint::default();
        hits.text_search_blob = "t1 arc accel".to_string();
        let all = detector.detect_all(&AxisContext::new(&hits));
        assert!(all.iter().any(|(n, _)| n == "ParallelImaging"));

        let mut misses = StackFingerprint::default();
        misses.text_search_blob = "search protocol".to_string();
        let all = detector.detect_all(&AxisContext::new(&misses));
        assert!(all.is_empty());
    }

    #[test]
    fn multiple_methods_combine() {
        let detector = AccelerationDetector::new(ClassificationConfig::embedded().unwrap().acceleration);
        let mut fp = StackFingerprint::default();
        fp.text_search_blob = "grappa2 multiband".to_string();
        let all = detector.detect_all(&AxisContext::new(&fp));
        let names: Vec<&str> = all.iter().map(|(n, _)| n.as_str()).collect();
        assert!(names.contains(&"ParallelImaging"));
        assert!(names.contains(&"SimultaneousMultiSlice"));
    }
}
