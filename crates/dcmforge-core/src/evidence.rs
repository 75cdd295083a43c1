//! Evidence & confidence model (§4.3).
//!
//! Detectors don't assign confidence directly; they emit [`Evidence`] and
//! let [`calculate_confidence`] and [`select_best_candidate`] turn that into
//! an [`AxisResult`]. This keeps the weighting fixed and centralized instead
//! of re-litigated per detector.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Categorical evidence source. Each has a fixed base weight (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceSource {
    /// Parsed flags from DICOM tags (ImageType, ScanningSequence, SequenceName, ...).
    HighValueToken,
    /// Base inferred from technique (e.g. MPRAGE → T1w).
    TechniqueInference,
    /// Structured DICOM fields (contrast_search_blob, body_part_examined, ...).
    DicomStructured,
    /// Pattern match in text_search_blob.
    TextSearch,
    /// Base inferred from modifier + physics (e.g. FLAIR + TE>60 → T2w).
    ModifierInference,
    /// Physics parameters in a non-overlapping diagnostic range.
    PhysicsDistinct,
    /// Physics parameters in an overlapping, ambiguous range.
    PhysicsOverlap,
    /// FOV, aspect ratio, or other geometry-based heuristic.
    GeometryHint,
}

impl EvidenceSource {
    pub fn weight(&self) -> f64 {
        match self {
            EvidenceSource::HighValueToken => 0.95,
            EvidenceSource::DicomStructured => 0.95,
            EvidenceSource::TechniqueInference => 0.90,
            EvidenceSource::ModifierInference => 0.80,
            EvidenceSource::TextSearch => 0.75,
            EvidenceSource::PhysicsDistinct => 0.70,
            EvidenceSource::PhysicsOverlap => 0.50,
            EvidenceSource::GeometryHint => 0.40,
        }
    }
}

/// A single decision point: some field/value supports some target
/// classification, weighted by its source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub source: EvidenceSource,
    pub field: String,
    pub value: String,
    pub target: String,
    pub weight: f64,
    pub description: String,
}

impl Evidence {
    pub fn from_token(field: &str, value: &str, target: &str, description: Option<String>) -> Self {
        let source = EvidenceSource::HighValueToken;
        Self {
            description: description.unwrap_or_else(|| format!("{value} token in {field}")),
            source,
            field: field.to_string(),
            value: value.to_string(),
            target: target.to_string(),
            weight: source.weight(),
        }
    }

    pub fn from_text_search(pattern: &str, target: &str, description: Option<String>) -> Self {
        let source = EvidenceSource::TextSearch;
        Self {
            description: description.unwrap_or_else(|| format!("'{pattern}' found in text_search_blob")),
            source,
            field: "text_search_blob".to_string(),
            value: pattern.to_string(),
            target: target.to_string(),
            weight: source.weight(),
        }
    }

    pub fn from_technique(technique: &str, implied_base: &str, confidence: Option<f64>) -> Self {
        let source = EvidenceSource::TechniqueInference;
        Self {
            description: format!("{technique} implies {implied_base}"),
            source,
            field: "technique".to_string(),
            value: technique.to_string(),
            target: implied_base.to_string(),
            weight: confidence.unwrap_or_else(|| source.weight()),
        }
    }

    pub fn from_modifier(modifier: &str, physics_hint: &str, implied_base: &str, description: Option<String>) -> Self {
        let source = EvidenceSource::ModifierInference;
        Self {
            description: description
                .unwrap_or_else(|| format!("{modifier} with {physics_hint} implies {implied_base}")),
            source,
            field: "modifier+physics".to_string(),
            value: format!("{modifier}+{physics_hint}"),
            target: implied_base.to_string(),
            weight: source.weight(),
        }
    }

    pub fn from_physics(parameters: &[(&str, f64)], target: &str, is_distinct: bool, description: Option<String>) -> Self {
        let source = if is_distinct {
            EvidenceSource::PhysicsDistinct
        } else {
            EvidenceSource::PhysicsOverlap
        };
        let param_str = parameters
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(", ");
        Self {
            description: description.unwrap_or_else(|| format!("Physics ({param_str}) suggests {target}")),
            source,
            field: "physics".to_string(),
            value: param_str,
            target: target.to_string(),
            weight: source.weight(),
        }
    }

    pub fn from_geometry(hint: &str, target: &str, description: Option<String>) -> Self {
        let source = EvidenceSource::GeometryHint;
        Self {
            description: description.unwrap_or_else(|| format!("Geometry ({hint}) suggests {target}")),
            source,
            field: "geometry".to_string(),
            value: hint.to_string(),
            target: target.to_string(),
            weight: source.weight(),
        }
    }

    /// Evidence from a structured, non-free-text DICOM field.
    pub fn from_dicom_structured(field_name: &str, value: &str, target: &str, description: Option<String>) -> Self {
        let source = EvidenceSource::DicomStructured;
        Self {
            description: description.unwrap_or_else(|| format!("{value} in {field_name}")),
            source,
            field: field_name.to_string(),
            value: value.to_string(),
            target: target.to_string(),
            weight: source.weight(),
        }
    }
}

/// The outcome of evaluating one classification axis.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AxisResult {
    pub value: Option<String>,
    pub confidence: f64,
    pub evidence: Vec<Evidence>,
    pub alternatives: Vec<(String, f64)>,
    pub has_conflict: bool,
    pub conflict_target: Option<String>,
}

const CONFIDENT_THRESHOLD: f64 = 0.6;
const AMBIGUOUS_MARGIN: f64 = 0.1;

impl AxisResult {
    pub fn add_evidence(&mut self, evidence: Evidence) {
        self.evidence.push(evidence);
    }

    pub fn is_confident(&self) -> bool {
        self.confidence >= CONFIDENT_THRESHOLD
    }

    /// Ambiguous when an alternative sits within [`AMBIGUOUS_MARGIN`] of the
    /// top result's confidence.
    pub fn is_ambiguous(&self) -> bool {
        match self.alternatives.iter().map(|(_, c)| *c).fold(None, |acc, c| {
            Some(acc.map_or(c, |m: f64| m.max(c)))
        }) {
            Some(top_alt) => (self.confidence - top_alt) < AMBIGUOUS_MARGIN,
            None => false,
        }
    }

    /// One of `missing`, `conflict`, `low_confidence`, `ambiguous`, or `None`
    /// when the axis resolved cleanly (§4.3).
    pub fn failure_mode(&self) -> Option<&'static str> {
        if self.value.is_none() {
            return Some("missing");
        }
        if self.has_conflict {
            return Some("conflict");
        }
        if !self.is_confident() {
            return Some("low_confidence");
        }
        if self.is_ambiguous() {
            return Some("ambiguous");
        }
        None
    }
}

/// Confidence for one target value: the maximum evidence weight supporting
/// it, boosted 0.05 per additional distinct source type beyond the first,
/// capped at 0.99 (§4.3).
pub fn calculate_confidence(evidences: &[Evidence], target: &str) -> f64 {
    let relevant: Vec<&Evidence> = evidences.iter().filter(|e| e.target == target).collect();
    if relevant.is_empty() {
        return 0.0;
    }

    let max_weight = relevant.iter().map(|e| e.weight).fold(f64::MIN, f64::max);

    let source_types: HashSet<EvidenceSource> = relevant.iter().map(|e| e.source).collect();
    if source_types.len() >= 2 {
        let boost = 0.05 * (source_types.len() - 1) as f64;
        (max_weight + boost).min(0.99)
    } else {
        max_weight
    }
}

/// Score every candidate and pick the best, carrying the rest forward as
/// alternatives for ambiguity detection (§4.3).
pub fn select_best_candidate(evidences: &[Evidence], candidates: &[&str]) -> AxisResult {
    if evidences.is_empty() {
        return AxisResult::default();
    }

    let mut scored: Vec<(String, f64)> = candidates
        .iter()
        .filter_map(|c| {
            let conf = calculate_confidence(evidences, c);
            (conf > 0.0).then(|| (c.to_string(), conf))
        })
        .collect();

    if scored.is_empty() {
        return AxisResult {
            evidence: evidences.to_vec(),
            ..Default::default()
        };
    }

    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let (best_value, best_conf) = scored[0].clone();
    let alternatives = scored[1..].to_vec();
    let best_evidence: Vec<Evidence> = evidences.iter().filter(|e| e.target == best_value).cloned().collect();

    AxisResult {
        value: Some(best_value),
        confidence: best_conf,
        evidence: best_evidence,
        alternatives,
        has_conflict: false,
        conflict_target: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_source_confidence_is_its_weight() {
        let evidences = vec![Evidence::from_token("image_type", "DIFFUSION", "DWI", None)];
        assert_eq!(calculate_confidence(&evidences, "DWI"), 0.95);
    }

    #[test]
    fn multi_source_agreement_boosts_confidence() {
        let evidences = vec![
            Evidence::from_token("image_type", "DIFFUSION", "DWI", None),
            Evidence::from_text_search("dwi", "DWI", None),
        ];
        // max(0.95, 0.75) + 0.05 * (2-1) = 1.00 -> capped at 0.99
        assert_eq!(calculate_confidence(&evidences, "DWI"), 0.99);
    }

    #[test]
    fn confidence_boost_caps_at_99() {
        let evidences = vec![
            Evidence::from_token("a", "x", "T1w", None),
            Evidence::from_technique("MPRAGE", "T1w", None),
            Evidence::from_text_search("t1", "T1w", None),
        ];
        assert!(calculate_confidence(&evidences, "T1w") <= 0.99);
    }

    #[test]
    fn irrelevant_target_has_zero_confidence() {
        let evidences = vec![Evidence::from_token("image_type", "DIFFUSION", "DWI", None)];
        assert_eq!(calculate_confidence(&evidences, "T1w"), 0.0);
    }

    #[test]
    fn missing_failure_mode_when_no_value() {
        let result = AxisResult::default();
        assert_eq!(result.failure_mode(), Some("missing"));
    }

    #[test]
    fn ambiguous_failure_mode_when_alternative_is_close() {
        let result = select_best_candidate(
            &[
                Evidence::from_text_search("t1", "T1w", None),
                Evidence::from_text_search("t2", "T2w", None),
            ],
            &["T1w", "T2w"],
        );
        assert_eq!(result.value.as_deref(), Some("T1w"));
        assert_eq!(result.failure_mode(), Some("ambiguous"));
    }

    #[test]
    fn low_confidence_failure_mode() {
        let result = select_best_candidate(&[Evidence::from_geometry("FOV<300", "T1w", None)], &["T1w"]);
        assert_eq!(result.failure_mode(), Some("low_confidence"));
    }

    #[test]
    fn clean_resolution_has_no_failure_mode() {
        let result = select_best_candidate(
            &[
                Evidence::from_token("image_type", "DIFFUSION", "DWI", None),
                Evidence::from_text_search("dwi", "DWI", None),
            ],
            &["DWI"],
        );
        assert_eq!(result.failure_mode(), None);
    }
}
