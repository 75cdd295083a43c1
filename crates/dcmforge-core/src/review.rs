//! Review-reason formatting: sorted, comma-separated `axis:mode` tokens
//! (§4.3, §9 "Review-reason format").
//!
//! Every helper here preserves the sorted, duplicate-free invariant so a
//! reviewer UI can filter/route on the CSV without re-parsing defensively.

/// Render an `axis:mode` token.
pub fn token(axis: &str, mode: &str) -> String {
    format!("{axis}:{mode}")
}

/// Sort and dedup a reason list, then join with commas.
pub fn to_csv(mut reasons: Vec<String>) -> String {
    reasons.sort_unstable();
    reasons.dedup();
    reasons.join(",")
}

/// Parse a CSV back into a reason list (empty string → empty list).
pub fn from_csv(csv: &str) -> Vec<String> {
    if csv.is_empty() {
        Vec::new()
    } else {
        csv.split(',').map(|s| s.to_string()).collect()
    }
}

/// Add a reason to an existing CSV, keeping sorted/deduped order.
pub fn add(csv: &str, axis: &str, mode: &str) -> String {
    let mut reasons = from_csv(csv);
    reasons.push(token(axis, mode));
    to_csv(reasons)
}

/// Remove every reason for `axis:mode` from an existing CSV.
pub fn remove(csv: &str, axis: &str, mode: &str) -> String {
    let target = token(axis, mode);
    let reasons: Vec<String> = from_csv(csv).into_iter().filter(|r| r != &target).collect();
    to_csv(reasons)
}

/// Remove every reason for `axis:*` from an existing CSV, regardless of mode.
/// Used when a later phase definitively resolves an axis that was
/// previously flagged (e.g. a Phase 3 fill removing `base:missing`).
pub fn remove_axis(csv: &str, axis: &str) -> String {
    let prefix = format!("{axis}:");
    let reasons: Vec<String> = from_csv(csv)
        .into_iter()
        .filter(|r| !r.starts_with(&prefix))
        .collect();
    to_csv(reasons)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_csv_sorts_and_dedups() {
        let reasons = vec!["base:low_confidence".to_string(), "acceleration:missing".to_string(), "base:low_confidence".to_string()];
        assert_eq!(to_csv(reasons), "acceleration:missing,base:low_confidence");
    }

    #[test]
    fn add_then_remove_round_trips() {
        let csv = add("", "base", "missing");
        assert_eq!(csv, "base:missing");
        let csv = add(&csv, "technique", "low_confidence");
        assert_eq!(csv, "base:missing,technique:low_confidence");
        let csv = remove(&csv, "base", "missing");
        assert_eq!(csv, "technique:low_confidence");
    }

    #[test]
    fn remove_axis_drops_any_mode() {
        let csv = "base:low_confidence,technique:missing";
        assert_eq!(remove_axis(csv, "base"), "technique:missing");
    }
}
