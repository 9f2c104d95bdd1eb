//! Heuristic hallucination detection for LLM output text.
//!
//! Grounded on `hallucination_checker.py`: pattern/hedge/contradiction/
//! certainty-marker counting with a confidence score derived from weighted
//! issue and warning counts.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

const HEDGING_PHRASES: &[&str] = &[
    "might be", "could be", "possibly", "perhaps", "i think", "i believe",
    "probably", "likely", "seems like", "appears to",
];

const CONTRADICTION_MARKERS: &[&str] =
    &["however", "but", "although", "on the other hand", "conversely"];

const CERTAINTY_MARKERS: &[&str] =
    &["definitely", "certainly", "absolutely", "always", "never", "all", "none"];

static SUSPICIOUS_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)I (?:don't|do not) have (?:access|information)",
        r"(?i)As an AI",
        r"(?i)I (?:cannot|can't) (?:access|verify|confirm)",
        r"(?i)(?:fictional|made-up|invented) (?:data|information|fact)",
        r"(?i)I (?:just|simply) (?:made|invented|created) (?:that|this)",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static NUMERIC_CLAIM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b\d+(?:\.\d+)?\s*(?:%|percent|dollars?|euros?|years?)\b").unwrap()
});

#[derive(Debug, Clone, Serialize)]
pub struct HallucinationCheck {
    pub hallucination_detected: bool,
    pub confidence_score: f32,
    pub issues: Vec<String>,
    pub warnings: Vec<String>,
    pub hedging_count: usize,
    pub contradiction_markers: usize,
    pub numeric_claims: usize,
    pub certainty_count: usize,
}

pub struct HallucinationChecker {
    strict_mode: bool,
}

impl HallucinationChecker {
    pub fn new(strict_mode: bool) -> Self {
        Self { strict_mode }
    }

    pub fn check_text(&self, text: &str) -> HallucinationCheck {
        let lower = text.to_lowercase();
        let mut issues = Vec::new();
        let mut warnings = Vec::new();

        for pattern in SUSPICIOUS_PATTERNS.iter() {
            if pattern.is_match(text) {
                issues.push(format!("suspicious pattern detected: {}", pattern.as_str()));
            }
        }

        let hedging_count = HEDGING_PHRASES.iter().filter(|p| lower.contains(*p)).count();
        if hedging_count > 3 {
            warnings.push(format!("high hedging phrase count: {hedging_count}"));
        }

        let sentences: Vec<&str> = text.split('.').collect();
        let contradiction_markers = if sentences.len() > 1 {
            sentences
                .iter()
                .filter(|s| CONTRADICTION_MARKERS.iter().any(|m| s.to_lowercase().contains(m)))
                .count()
        } else {
            0
        };
        if contradiction_markers > 0 {
            warnings.push(format!("potential contradictions: {contradiction_markers}"));
        }

        let numeric_claims = NUMERIC_CLAIM.find_iter(text).count();
        if numeric_claims > 5 {
            warnings.push(format!("many numeric claims without context: {numeric_claims}"));
        }

        let certainty_count = CERTAINTY_MARKERS.iter().filter(|m| lower.contains(*m)).count();
        if certainty_count > 3 {
            warnings.push(format!("high certainty marker count: {certainty_count}"));
        }

        let issue_weight = issues.len() as f32 * 0.3;
        let warning_weight = warnings.len() as f32 * 0.1;
        let confidence_score = (1.0 - issue_weight - warning_weight).max(0.0);

        let hallucination_detected = !issues.is_empty() || (self.strict_mode && warnings.len() > 2);

        HallucinationCheck {
            hallucination_detected,
            confidence_score,
            issues,
            warnings,
            hedging_count,
            contradiction_markers,
            numeric_claims,
            certainty_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_text_has_no_issues() {
        let checker = HallucinationChecker::new(false);
        let result = checker.check_text("The capital of France is Paris.");
        assert!(!result.hallucination_detected);
        assert!(result.issues.is_empty());
    }

    #[test]
    fn suspicious_pattern_flags_issue() {
        let checker = HallucinationChecker::new(false);
        let result = checker.check_text("As an AI, I cannot verify this claim.");
        assert!(result.hallucination_detected);
        assert!(!result.issues.is_empty());
    }

    #[test]
    fn strict_mode_flags_heavy_hedging() {
        let checker = HallucinationChecker::new(true);
        let text = "It might be true, it could be false, perhaps it's unclear, I think so, I believe so.";
        let result = checker.check_text(text);
        assert!(result.hedging_count > 3);
        assert!(result.hallucination_detected);
    }

    #[test]
    fn non_strict_mode_does_not_flag_on_warnings_alone() {
        let checker = HallucinationChecker::new(false);
        let text = "It might be true, it could be false, perhaps it's unclear, I think so.";
        let result = checker.check_text(text);
        assert!(!result.hallucination_detected);
    }
}
