//! Shared detector machinery (§4.4, §9 "Dynamic dispatch"). Detectors are
//! modeled as small structs implementing [`Detector`] rather than a class
//! hierarchy; `detect` is the only polymorphic entry point.

mod acceleration;
mod base_contrast;
mod body_part;
mod construct;
mod contrast;
mod modifier;
mod provenance;
mod technique;

pub use acceleration::AccelerationDetector;
pub use base_contrast::BaseContrastDetector;
pub use body_part::BodyPartDetector;
pub use construct::ConstructDetector;
pub use contrast::ContrastDetector;
pub use modifier::ModifierDetector;
pub use provenance::ProvenanceDetector;
pub use technique::TechniqueDetector;

use std::collections::HashSet;

use crate::entities::StackFingerprint;
use crate::evidence::{AxisResult, Evidence, EvidenceSource};

/// Everything a detector needs to evaluate one stack. Built once per stack
/// and handed to every axis detector in turn (§4.6).
pub struct AxisContext<'a> {
    pub fingerprint: &'a StackFingerprint,
    /// Structured flags parsed upstream from DICOM tags (ImageType,
    /// ScanningSequence, SequenceVariant, ScanOptions, SequenceName), e.g.
    /// `is_mprage`, `has_swi`, `is_screenshot`. Exact-match, not free text.
    pub flags: HashSet<String>,
}

impl<'a> AxisContext<'a> {
    pub fn new(fingerprint: &'a StackFingerprint) -> Self {
        let mut flags = HashSet::new();
        for bucket in [
            &fingerprint.parsed_image_type,
            &fingerprint.parsed_scanning_sequence,
            &fingerprint.parsed_sequence_variant,
            &fingerprint.parsed_scan_options,
            &fingerprint.parsed_sequence_name,
        ] {
            flags.extend(bucket.iter().cloned());
        }
        Self { fingerprint, flags }
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.contains(flag)
    }

    pub fn has_all_flags(&self, required: &[String]) -> bool {
        required.iter().all(|f| self.has_flag(f))
    }

    pub fn has_any_flag(&self, candidates: &[String]) -> bool {
        candidates.iter().any(|f| self.has_flag(f))
    }

    pub fn text_contains(&self, keyword: &str) -> bool {
        self.fingerprint.text_search_blob.contains(keyword)
    }

    pub fn contrast_text_contains(&self, keyword: &str) -> bool {
        self.fingerprint.contrast_search_blob.contains(keyword)
    }
}

/// Common detector operation set (§9): `detect`, `axis_name`, `explain`.
pub trait Detector {
    fn axis_name(&self) -> &'static str;

    /// Run the detector and produce a resolved axis result.
    fn detect(&self, ctx: &AxisContext<'_>) -> AxisResult;

    /// Human-readable summary of the winning evidence, for logging/debug.
    fn explain(&self, result: &AxisResult) -> String {
        match &result.value {
            Some(value) => {
                let reasons: Vec<&str> = result.evidence.iter().map(|e| e.description.as_str()).collect();
                format!("{}={} ({:.2}): {}", self.axis_name(), value, result.confidence, reasons.join("; "))
            }
            None => format!("{}=<undetermined>", self.axis_name()),
        }
    }
}

/// One matched evidence tier, in priority order (§4.4):
/// 1. Exclusive flag (0.95)
/// 2. Keyword in normalized text (0.85)
/// 3. Combination of flags, AND'd (0.75)
/// 4. Physics range (0.65-0.75, detector-specific)
/// 5. Family fallback (0.60)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Tier {
    Exclusive = 1,
    Keyword = 2,
    Combination = 3,
    Physics = 4,
    FamilyFallback = 5,
}

/// Evaluate the standard exclusive → keyword → combination ladder for one
/// class rule, returning evidence if any tier matched. Tiers 4/5 (physics,
/// family fallback) are detector-specific and layered on by callers.
pub fn standard_tiers(ctx: &AxisContext<'_>, rule: &crate::config::ClassRule, field: &str) -> Option<Evidence> {
    if let Some(flag) = &rule.detection.exclusive {
        if ctx.has_flag(flag) {
            return Some(Evidence::from_token(field, flag, &rule.name, Some(format!("{} exclusive flag", rule.name))));
        }
    }

    if !rule.detection.alternative_flags.is_empty() && ctx.has_any_flag(&rule.detection.alternative_flags) {
        return Some(Evidence::from_token(
            field,
            &rule.detection.alternative_flags.join("|"),
            &rule.name,
            Some(format!("{} alternative flag", rule.name)),
        ));
    }

    if rule.keywords.iter().any(|kw| ctx.text_contains(kw)) {
        let matched = rule.keywords.iter().find(|kw| ctx.text_contains(kw)).unwrap();
        return Some(Evidence::from_text_search(matched, &rule.name, Some(format!("{} keyword match", rule.name))));
    }

    if !rule.detection.combination.is_empty() && ctx.has_all_flags(&rule.detection.combination) {
        return Some(Evidence {
            source: EvidenceSource::DicomStructured,
            field: field.to_string(),
            value: rule.detection.combination.join("+"),
            target: rule.name.clone(),
            weight: 0.75,
            description: format!("{} via combination of {}", rule.name, rule.detection.combination.join(", ")),
        });
    }

    None
}
