//! Base contrast detector (§4.4): four-tier (technique inference ->
//! exclusive flag -> keyword -> physics), plus two special cases evaluated
//! first: FLAIR T1-vs-T2 disambiguation by TE (text preferred over TE), and
//! dual-echo PD+T2 splitting by TE.

use crate::config::DetectorConfig;
use crate::evidence::{calculate_confidence, Evidence};
use crate::evidence::AxisResult;

use super::{standard_tiers, AxisContext, Detector};

const FLAIR_TE_SPLIT: f64 = 40.0;
const DUAL_ECHO_TE_SPLIT: f64 = 40.0;

/// Techniques that imply a base contrast outright (§4.4, scenario a).
/// Not exhaustive by design — ambiguous techniques (TSE, SE) fall through
/// to the other tiers rather than guessing.
fn technique_implied_base(technique: &str) -> Option<&'static str> {
    match technique {
        "MPRAGE" | "SPGR" | "TFE" | "FLASH" | "VIBE" | "THRIVE" => Some("T1w"),
        "HASTE" => Some("T2w"),
        _ => None,
    }
}

pub struct BaseContrastDetector {
    config: DetectorConfig,
}

impl BaseContrastDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    pub fn resolve(&self, ctx: &AxisContext<'_>, modifiers: &[String], technique: Option<&str>) -> AxisResult {
        let fp = ctx.fingerprint;
        let has_pd_text = ctx.text_contains("proton density") || ctx.text_contains("pd");
        let has_t2_text = ctx.text_contains("t2");

        // Dual-echo PD+T2 split (scenario b): evaluated before the standard
        // ladder because it overrides a plain T2w keyword match.
        if has_pd_text && has_t2_text && !modifiers.iter().any(|m| m == "FLAIR") {
            if let Some(te) = fp.echo_time {
                let target = if te < DUAL_ECHO_TE_SPLIT { "PDw" } else { "T2w" };
                let evidence = Evidence::from_physics(
                    &[("TE", te)],
                    target,
                    true,
                    Some(format!("dual-echo PD/T2 split by TE={te}")),
                );
                let evidence = Evidence { weight: 0.85, ..evidence };
                let confidence = calculate_confidence(std::slice::from_ref(&evidence), target);
                return AxisResult {
                    value: Some(target.to_string()),
                    confidence,
                    evidence: vec![evidence],
                    ..Default::default()
                };
            }
        }

        // FLAIR T1-vs-T2 disambiguation: text wins over TE when both agree
        // on a concrete variant.
        if modifiers.iter().any(|m| m == "FLAIR") {
            let text_says_t1 = ctx.text_contains("t1 flair");
            let text_says_t2 = ctx.text_contains("t2 flair");
            let target = if text_says_t1 {
                "T1-FLAIR"
            } else if text_says_t2 {
                "T2-FLAIR"
            } else if let Some(te) = fp.echo_time {
                if te < FLAIR_TE_SPLIT {
                    "T1-FLAIR"
                } else {
                    "T2-FLAIR"
                }
            } else {
                "T2-FLAIR"
            };
            let evidence = if text_says_t1 || text_says_t2 {
                Evidence::from_text_search(target, target, Some(format!("{target} stated explicitly in text")))
            } else {
                Evidence::from_physics(
                    &[("TE", fp.echo_time.unwrap_or(0.0))],
                    target,
                    true,
                    Some(format!("FLAIR TE split -> {target}")),
                )
            };
            let confidence = calculate_confidence(std::slice::from_ref(&evidence), target);
            return AxisResult {
                value: Some(target.to_string()),
                confidence,
                evidence: vec![evidence],
                ..Default::default()
            };
        }

        // Tier 1: technique inference.
        if let Some(technique) = technique {
            if let Some(implied) = technique_implied_base(technique) {
                let confidence_override = self.config.rules.confidence_thresholds.get("technique_inference").copied();
                let evidence = Evidence::from_technique(technique, implied, confidence_override);
                let confidence = calculate_confidence(std::slice::from_ref(&evidence), implied);
                return AxisResult {
                    value: Some(implied.to_string()),
                    confidence,
                    evidence: vec![evidence],
                    ..Default::default()
                };
            }
        }

        // Tiers 2-3: exclusive flag / keyword, first match wins, priority order.
        for rule in self.config.ordered_classes() {
            if let Some(evidence) = standard_tiers(ctx, rule, "base") {
                let confidence = calculate_confidence(std::slice::from_ref(&evidence), &rule.name);
                return AxisResult {
                    value: Some(rule.name.clone()),
                    confidence,
                    evidence: vec![evidence],
                    ..Default::default()
                };
            }
        }

        // Tier 4: physics range.
        for rule in self.config.ordered_classes() {
            let te = fp.echo_time;
            let matches_range = match (rule.physics.get("te_min"), rule.physics.get("te_max"), te) {
                (Some(&min), Some(&max), Some(te)) => te >= min && te <= max,
                (Some(&min), None, Some(te)) => te >= min,
                (None, Some(&max), Some(te)) => te <= max,
                _ => false,
            };
            if matches_range {
                let evidence = Evidence::from_physics(&[("TE", te.unwrap())], &rule.name, false, None);
                let confidence = calculate_confidence(std::slice::from_ref(&evidence), &rule.name);
                return AxisResult {
                    value: Some(rule.name.clone()),
                    confidence,
                    evidence: vec![evidence],
                    ..Default::default()
                };
            }
        }

        AxisResult::default()
    }
}

impl Detector for BaseContrastDetector {
    fn axis_name(&self) -> &'static str {
        "base"
    }

    fn detect(&self, ctx: &AxisContext<'_>) -> AxisResult {
        self.resolve(ctx, &[], None)
    }
}
