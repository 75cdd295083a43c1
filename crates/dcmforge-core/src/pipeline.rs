//! Classification pipeline (§4.6): a fixed 9-stage orchestration from raw
//! fingerprint to a `series_classification_cache` row.

use crate::branches::{apply_branch, branch_axis_result, BranchOutput};
use crate::config::ClassificationConfig;
use crate::detectors::{
    AccelerationDetector, AxisContext, BaseContrastDetector, BodyPartDetector, ConstructDetector, ContrastDetector,
    Detector, ModifierDetector, ProvenanceDetector, TechniqueDetector,
};
use crate::entities::{DirectoryType, SeriesClassificationCache};
use crate::evidence::AxisResult;
use crate::review;

/// All per-axis results, kept around for Step 3 histogram metrics even
/// though only `cache` is persisted.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub cache: SeriesClassificationCache,
    pub provenance: AxisResult,
    pub technique: AxisResult,
    pub base: AxisResult,
    pub contrast: AxisResult,
    pub body_part: AxisResult,
}

/// Detectors bundled once per cohort/run; cheap to hold, expensive-ish to
/// construct (YAML parse), so callers build one and classify many stacks.
pub struct Pipeline {
    provenance: ProvenanceDetector,
    technique: TechniqueDetector,
    base: BaseContrastDetector,
    modifier: ModifierDetector,
    construct: ConstructDetector,
    acceleration: AccelerationDetector,
    contrast: ContrastDetector,
    body_part: BodyPartDetector,
}

impl Pipeline {
    pub fn new(config: ClassificationConfig) -> Self {
        Self {
            provenance: ProvenanceDetector::new(config.provenance),
            technique: TechniqueDetector::new(config.technique),
            base: BaseContrastDetector::new(config.base),
            modifier: ModifierDetector::new(config.modifier),
            construct: ConstructDetector::new(config.construct),
            acceleration: AccelerationDetector::new(config.acceleration),
            contrast: ContrastDetector::new(config.contrast),
            body_part: BodyPartDetector::new(config.body_part),
        }
    }

    pub fn classify(&self, fingerprint: &crate::entities::StackFingerprint) -> PipelineOutcome {
        let ctx = AxisContext::new(fingerprint);
        let mut reasons: Vec<String> = Vec::new();

        // Stage 0: exclusion.
        if ctx.has_any_flag(&[
            "is_screenshot".to_string(),
            "is_secondary_reformat".to_string(),
            "is_error".to_string(),
        ]) {
            let mut cache = SeriesClassificationCache {
                series_stack_id: fingerprint.series_stack_id,
                directory_type: DirectoryType::Excluded,
                ..Default::default()
            };
            cache.set_review_reasons(Vec::new());
            return PipelineOutcome {
                cache,
                provenance: AxisResult::default(),
                technique: AxisResult::default(),
                base: AxisResult::default(),
                contrast: AxisResult::default(),
                body_part: AxisResult::default(),
            };
        }

        // Stage 1: provenance -> branch name.
        let provenance = self.provenance.detect(&ctx);
        let provenance_name = provenance.value.clone().unwrap_or_else(|| "RawRecon".to_string());

        // Stage 2: technique (standard detector always runs).
        let mut technique = self.technique.detect(&ctx);
        if technique.has_conflict {
            reasons.push(review::token("technique", "conflict"));
        }

        // Stage 3: branch; overrides base/construct/technique per flags.
        let branch: BranchOutput = apply_branch(&provenance_name, &ctx);
        if branch.skip_technique_detection {
            if let Some(value) = &branch.technique {
                technique = branch_axis_result(Some(value), branch.confidence);
            }
        }

        // Modifiers computed once, reused by both base's FLAIR logic and
        // stage 4's final merge (detection is independent of base/technique).
        let mut modifier_matches = self.modifier.detect_all(&ctx);
        for extra in &branch.extra_modifiers {
            if !modifier_matches.iter().any(|(name, _)| name == extra) {
                modifier_matches.push((
                    extra.clone(),
                    crate::evidence::Evidence::from_token("branch", extra, extra, Some(format!("{extra} from branch"))),
                ));
            }
        }
        let modifier_names: Vec<String> = modifier_matches.iter().map(|(n, _)| n.clone()).collect();

        let base = if branch.skip_base_detection {
            branch_axis_result(branch.base.as_deref(), branch.confidence)
        } else {
            self.base.resolve(&ctx, &modifier_names, technique.value.as_deref())
        };

        let construct_names: Vec<String> = if branch.skip_construct_detection {
            branch.construct.iter().cloned().collect()
        } else {
            self.construct.detect_all(&ctx).into_iter().map(|(n, _)| n).collect()
        };

        // Stage 5: acceleration (always, additive).
        let acceleration_names: Vec<String> = self.acceleration.detect_all(&ctx).into_iter().map(|(n, _)| n).collect();

        // Stage 6: contrast.
        let (post_contrast, contrast_result) = self.contrast.resolve(&ctx);

        // Stage 7: body part.
        let body_part_outcome = self.body_part.resolve(&ctx, technique.value.as_deref());
        if body_part_outcome.result.has_conflict {
            reasons.push(review::token("body_part", "conflict"));
        }
        if body_part_outcome.heuristic_flagged {
            reasons.push(review::token("body_part", "heuristic"));
        }

        // Stage 8: intent synthesis.
        let directory_type = synthesize_intent(
            &provenance_name,
            &construct_names,
            base.value.as_deref(),
            &modifier_names,
            fingerprint,
        );
        let mut manual_review_reasons = reasons;
        if directory_type == DirectoryType::Misc {
            manual_review_reasons.push(review::token("intent", "unresolved"));
        }

        // Stage 9: review aggregation (§4.3 failure modes). BOLD has no
        // base by design.
        let base_exempt = provenance_name == "BOLDRecon";
        if let Some(mode) = provenance.failure_mode() {
            manual_review_reasons.push(review::token("provenance", mode));
        }
        if let Some(mode) = technique.failure_mode() {
            manual_review_reasons.push(review::token("technique", mode));
        }
        if let Some(mode) = base.failure_mode() {
            if !(base_exempt && mode == "missing") {
                manual_review_reasons.push(review::token("base", mode));
            }
        }
        if contrast_result.has_conflict {
            manual_review_reasons.push(review::token("contrast", "conflict"));
        }

        let mut cache = SeriesClassificationCache {
            series_stack_id: fingerprint.series_stack_id,
            base: base.value.clone(),
            technique: technique.value.clone(),
            modifier_csv: review::to_csv(modifier_names),
            construct_csv: review::to_csv(construct_names),
            provenance: Some(provenance_name.clone()),
            acceleration_csv: review::to_csv(acceleration_names),
            directory_type,
            post_contrast,
            spinal_cord: body_part_outcome.spinal_cord,
            localizer: provenance_name == "Localizer",
            manual_review_required: false,
            manual_review_reasons_csv: String::new(),
        };
        cache.set_review_reasons(manual_review_reasons);

        PipelineOutcome {
            cache,
            provenance,
            technique,
            base,
            contrast: contrast_result,
            body_part: body_part_outcome.result,
        }
    }
}

/// Stage 8: maps (provenance, constructs, base, modifiers, text) to intent
/// via a fixed priority ladder: provenance > constructs > functional
/// keywords > base+modifier > projections/quant > fallback to misc (§4.6).
fn synthesize_intent(
    provenance: &str,
    constructs: &[String],
    base: Option<&str>,
    modifiers: &[String],
    fingerprint: &crate::entities::StackFingerprint,
) -> DirectoryType {
    if provenance == "Localizer" {
        return DirectoryType::Localizer;
    }
    if provenance == "PerfusionRecon" || provenance == "ASLRecon" {
        return DirectoryType::Perf;
    }
    if provenance == "BOLDRecon" {
        return DirectoryType::Func;
    }

    if constructs.iter().any(|c| matches!(c.as_str(), "ADC" | "FA" | "Trace")) {
        return DirectoryType::Dwi;
    }
    if constructs.iter().any(|c| matches!(c.as_str(), "CBF" | "CBV" | "MTT")) {
        return DirectoryType::Perf;
    }

    if fingerprint.text_search_blob.contains("fmri") || fingerprint.text_search_blob.contains("task") {
        return DirectoryType::Func;
    }
    if fingerprint.text_search_blob.contains("fieldmap") || fingerprint.text_search_blob.contains("b0 map") {
        return DirectoryType::Fmap;
    }

    if base == Some("DWI") {
        return DirectoryType::Dwi;
    }
    if matches!(base, Some("T1w") | Some("T2w") | Some("PDw") | Some("T2starw") | Some("SWI"))
        || base.map(|b| b.ends_with("FLAIR")).unwrap_or(false)
    {
        return DirectoryType::Anat;
    }
    if modifiers.iter().any(|m| m == "FLAIR") {
        return DirectoryType::Anat;
    }

    if constructs
        .iter()
        .any(|c| matches!(c.as_str(), "MIP" | "MinIP" | "QSM" | "T1map" | "T2map"))
    {
        return DirectoryType::Anat;
    }

    DirectoryType::Misc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::StackFingerprint;

    fn pipeline() -> Pipeline {
        Pipeline::new(ClassificationConfig::embedded().unwrap())
    }

    #[test]
    fn mprage_anatomical_scenario() {
        let mut fp = StackFingerprint::default();
        fp.parsed_sequence_name = vec!["is_mprage".to_string()];
        let outcome = pipeline().classify(&fp);
        assert_eq!(outcome.cache.technique.as_deref(), Some("MPRAGE"));
        assert_eq!(outcome.cache.base.as_deref(), Some("T1w"));
        assert_eq!(outcome.cache.post_contrast, None);
        assert_eq!(outcome.cache.directory_type, DirectoryType::Anat);
        assert!(!outcome.cache.manual_review_required);
    }

    #[test]
    fn dual_echo_pd_t2_scenario() {
        let mut fp = StackFingerprint::default();
        fp.text_search_blob = "proton density t2".to_string();
        fp.echo_time = Some(22.0);
        let outcome = pipeline().classify(&fp);
        assert_eq!(outcome.cache.base.as_deref(), Some("PDw"));
        assert_eq!(outcome.cache.directory_type, DirectoryType::Anat);
    }

    #[test]
    fn swi_minip_scenario() {
        let mut fp = StackFingerprint::default();
        fp.parsed_image_type = vec!["has_swi".to_string(), "is_minip".to_string()];
        let outcome = pipeline().classify(&fp);
        assert_eq!(outcome.cache.base.as_deref(), Some("SWI"));
        assert_eq!(outcome.cache.construct_csv, "MinIP");
        assert_eq!(outcome.cache.technique.as_deref(), Some("GRE"));
        assert_eq!(outcome.cache.directory_type, DirectoryType::Anat);
    }

    #[test]
    fn epimix_t1_flair_scenario() {
        let mut fp = StackFingerprint::default();
        fp.parsed_image_type = vec!["is_epimix".to_string()];
        fp.text_search_blob = "t1 flair epimix".to_string();
        let outcome = pipeline().classify(&fp);
        assert_eq!(outcome.cache.base.as_deref(), Some("T1w"));
        assert_eq!(outcome.cache.technique.as_deref(), Some("SE-EPI"));
        assert!(outcome.cache.modifier_csv.contains("FLAIR"));
        assert_eq!(outcome.cache.directory_type, DirectoryType::Anat);
    }

    #[test]
    fn adc_from_dti_recon_scenario() {
        let mut fp = StackFingerprint::default();
        fp.parsed_image_type = vec!["has_adc".to_string()];
        fp.text_search_blob = "adc".to_string();
        let outcome = pipeline().classify(&fp);
        assert_eq!(outcome.cache.base.as_deref(), Some("DWI"));
        assert_eq!(outcome.cache.construct_csv, "ADC");
        assert_eq!(outcome.cache.directory_type, DirectoryType::Dwi);
    }
}
