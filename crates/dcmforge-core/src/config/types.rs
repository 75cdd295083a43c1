//! Typed configuration tree for the eight YAML-driven detectors (§4.4, §6,
//! §9 "Dynamic config shape"). One [`DetectorConfig`] per axis; heterogeneous
//! per-class detection rules live in [`Detection`] rather than an untyped
//! map.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// The detection strategy for one class, in priority order per §4.4.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Detection {
    /// A single parsed flag that, alone, definitively identifies this class
    /// (tier 1, confidence 0.95).
    #[serde(default)]
    pub exclusive: Option<String>,
    /// AND over multiple parsed flags (tier 3, confidence 0.75).
    #[serde(default)]
    pub combination: Vec<String>,
    /// Flags that resolve the class individually, same tier as `exclusive`
    /// but OR'd rather than a single name (used by provenance's 4th tier).
    #[serde(default)]
    pub alternative_flags: Vec<String>,
}

/// One classification value's full rule set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassRule {
    pub name: String,
    #[serde(default)]
    pub family: Option<String>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub detection: Detection,
    /// Physics range hints, e.g. `{"te_min": 40.0}`; tier 4 for detectors
    /// that use them (technique, base contrast).
    #[serde(default)]
    pub physics: HashMap<String, f64>,
    /// Bounded regex patterns (acceleration detector only), e.g. `\barc\b`
    /// to match standalone "ARC" without matching inside "search".
    #[serde(default)]
    pub patterns: Vec<String>,
}

/// Top-level shape of one detector's YAML file (§6): a map of class id to
/// rule, plus `rules.priority_order` / `rules.confidence_thresholds`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectorConfig {
    #[serde(flatten)]
    pub classes: HashMap<String, ClassRule>,
    #[serde(default)]
    pub rules: RulesMeta,
    /// Named groups of mutually exclusive class ids (modifier detector
    /// only): within a group, only the highest-priority match survives.
    #[serde(default)]
    pub exclusion_groups: HashMap<String, Vec<String>>,
    /// Geometry-heuristic thresholds (body part detector only, §9 open
    /// question 2: these are configuration, not physics constants).
    #[serde(default)]
    pub heuristic: Option<BodyPartHeuristic>,
}

/// Thresholds for the spine/brain geometry fallback heuristic (§4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BodyPartHeuristic {
    pub aspect_ratio_min: f64,
    pub aspect_ratio_max: f64,
    pub max_slice_count: i32,
    pub simple_techniques: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RulesMeta {
    #[serde(default)]
    pub priority_order: Vec<String>,
    #[serde(default)]
    pub confidence_thresholds: HashMap<String, f64>,
}

impl DetectorConfig {
    /// Classes in configured priority order, falling back to the order
    /// `serde_yaml` happened to deserialize when `priority_order` omits an
    /// entry (those are appended, sorted by descending `priority`).
    pub fn ordered_classes(&self) -> Vec<&ClassRule> {
        let mut ordered: Vec<&ClassRule> = Vec::with_capacity(self.classes.len());
        let mut seen = std::collections::HashSet::new();
        for id in &self.rules.priority_order {
            if let Some(rule) = self.classes.get(id) {
                ordered.push(rule);
                seen.insert(id.as_str());
            }
        }
        let mut rest: Vec<&ClassRule> = self
            .classes
            .iter()
            .filter(|(id, _)| !seen.contains(id.as_str()))
            .map(|(_, rule)| rule)
            .collect();
        rest.sort_by(|a, b| b.priority.cmp(&a.priority));
        ordered.extend(rest);
        ordered
    }
}
