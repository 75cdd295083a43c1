//! Classification branches (§4.5). Once provenance resolves to SyMRI,
//! SWIRecon, or EPIMix, the branch overrides base/construct (and sometimes
//! technique) in place of the standard detectors. RawRecon is a no-op: the
//! standard detectors run unchanged.
//!
//! §9 open question 1 ("source rule: branch wins"): when a branch sets a
//! `skip_*_detection` flag, its value is authoritative and no conflict
//! check runs against the standard detector's own inference for that axis.

use crate::evidence::AxisResult;

/// Provenance-specific override, applied on top of the standard detector
/// results for the axes it claims.
#[derive(Debug, Clone, Default)]
pub struct BranchOutput {
    pub base: Option<String>,
    pub construct: Option<String>,
    pub technique: Option<String>,
    /// Modifiers contributed additively; never replaces base modifiers.
    pub extra_modifiers: Vec<String>,
    pub skip_base_detection: bool,
    pub skip_construct_detection: bool,
    pub skip_technique_detection: bool,
    pub confidence: f64,
}

impl BranchOutput {
    fn none() -> Self {
        Self::default()
    }
}

/// Dispatch on the resolved provenance value. Flags referenced here (e.g.
/// `is_minip`) are the same structured flag tokens the standard detectors
/// read from the fingerprint's parsed_* vectors.
pub fn apply_branch(provenance: &str, ctx: &crate::detectors::AxisContext<'_>) -> BranchOutput {
    match provenance {
        "SWIRecon" => swi_branch(ctx),
        "SyMRI" => symri_branch(ctx),
        "EPIMix" => epimix_branch(ctx),
        _ => BranchOutput::none(),
    }
}

fn swi_branch(ctx: &crate::detectors::AxisContext<'_>) -> BranchOutput {
    if ctx.has_flag("is_minip") {
        return BranchOutput {
            base: Some("SWI".to_string()),
            construct: Some("MinIP".to_string()),
            technique: Some("GRE".to_string()),
            skip_base_detection: true,
            skip_construct_detection: true,
            skip_technique_detection: true,
            confidence: 0.95,
            ..Default::default()
        };
    }
    if ctx.has_flag("is_swi_phase") {
        return BranchOutput {
            base: Some("SWI".to_string()),
            construct: Some("Phase".to_string()),
            technique: Some("GRE".to_string()),
            skip_base_detection: true,
            skip_construct_detection: true,
            skip_technique_detection: true,
            confidence: 0.95,
            ..Default::default()
        };
    }
    // Default SWI output: base/technique settled, construct left to the
    // standard detector (e.g. magnitude vs. the minip/phase derivatives).
    BranchOutput {
        base: Some("SWI".to_string()),
        technique: Some("GRE".to_string()),
        skip_base_detection: true,
        skip_technique_detection: true,
        confidence: 0.90,
        ..Default::default()
    }
}

fn symri_branch(ctx: &crate::detectors::AxisContext<'_>) -> BranchOutput {
    if ctx.has_flag("is_synthetic_t1") {
        return BranchOutput {
            base: Some("T1w".to_string()),
            construct: Some("SyntheticT1w".to_string()),
            skip_base_detection: true,
            skip_construct_detection: true,
            confidence: 0.90,
            ..Default::default()
        };
    }
    if ctx.has_flag("is_synthetic_t2") {
        return BranchOutput {
            base: Some("T2w".to_string()),
            construct: Some("SyntheticT2w".to_string()),
            skip_base_detection: true,
            skip_construct_detection: true,
            confidence: 0.90,
            ..Default::default()
        };
    }
    if ctx.has_flag("is_synthetic_flair") {
        return BranchOutput {
            base: Some("T2w".to_string()),
            construct: Some("SyntheticFLAIR".to_string()),
            extra_modifiers: vec!["FLAIR".to_string()],
            skip_base_detection: true,
            skip_construct_detection: true,
            confidence: 0.90,
            ..Default::default()
        };
    }
    BranchOutput::none()
}

fn epimix_branch(ctx: &crate::detectors::AxisContext<'_>) -> BranchOutput {
    let has_t1 = ctx.text_contains("t1");
    let has_t2 = ctx.text_contains("t2");
    let has_flair = ctx.text_contains("flair");
    let has_dwi = ctx.text_contains("dwi") || ctx.has_flag("has_adc");

    if has_t1 && has_flair {
        return BranchOutput {
            base: Some("T1w".to_string()),
            technique: Some("SE-EPI".to_string()),
            extra_modifiers: vec!["FLAIR".to_string()],
            skip_base_detection: true,
            skip_technique_detection: true,
            confidence: 0.90,
            ..Default::default()
        };
    }
    if has_t2 && has_flair {
        return BranchOutput {
            base: Some("T2w".to_string()),
            technique: Some("SE-EPI".to_string()),
            extra_modifiers: vec!["FLAIR".to_string()],
            skip_base_detection: true,
            skip_technique_detection: true,
            confidence: 0.90,
            ..Default::default()
        };
    }
    if has_dwi {
        return BranchOutput {
            base: Some("DWI".to_string()),
            technique: Some("SE-EPI".to_string()),
            skip_base_detection: true,
            skip_technique_detection: true,
            confidence: 0.90,
            ..Default::default()
        };
    }
    BranchOutput {
        technique: Some("SE-EPI".to_string()),
        skip_technique_detection: true,
        confidence: 0.60,
        ..Default::default()
    }
}

/// Turn a branch override into an [`AxisResult`] for the given axis, so the
/// pipeline can treat branch and detector outputs uniformly for review-
/// reason bookkeeping.
pub fn branch_axis_result(value: Option<&str>, confidence: f64) -> AxisResult {
    AxisResult {
        value: value.map(|v| v.to_string()),
        confidence,
        ..Default::default()
    }
}
