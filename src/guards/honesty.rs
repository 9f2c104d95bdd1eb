//! Honesty policy enforcement: flags unsourced claims, excessive absolute
//! statements, false-confidence phrasing, and missing professional-advice
//! disclaimers. Grounded on `honesty_policy.py`.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

const ABSOLUTE_MARKERS: &[&str] =
    &["always", "never", "all", "none", "everyone", "no one", "impossible", "certain"];

const HEDGE_PHRASES: &[&str] =
    &["generally", "typically", "often", "in many cases", "usually", "commonly", "frequently"];

const FALSE_CONFIDENCE: &[&str] =
    &["i know for sure", "i am certain", "without a doubt", "100% accurate"];

const UNCERTAIN_TOPICS: &[&str] =
    &["medical", "legal", "financial", "investment", "diagnosis", "treatment"];

const DISCLAIMER_PHRASES: &[&str] =
    &["consult a professional", "seek professional advice", "not professional advice"];

static UNSOURCED_CLAIM_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)(?:studies|research|data) (?:show|shows|indicate|suggests)",
        r"(?i)(?:according|refers) to (?:experts|scientists|researchers)",
        r"(?i)it is (?:proven|demonstrated|established) that",
        r"(?i)(?:all|most|many) (?:experts|scientists) (?:agree|believe)",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

#[derive(Debug, Clone, Serialize)]
pub struct HonestyAnalysis {
    pub compliant: bool,
    pub confidence_score: f32,
    pub violations: Vec<String>,
    pub suggestions: Vec<String>,
    pub transformed_text: Option<String>,
    pub absolute_claims: usize,
    pub false_confidence: usize,
    pub professional_topic_detected: bool,
}

pub struct HonestyPolicy {
    enforce_sources: bool,
    enforce_uncertainty: bool,
}

impl HonestyPolicy {
    pub fn new(enforce_sources: bool, enforce_uncertainty: bool) -> Self {
        Self { enforce_sources, enforce_uncertainty }
    }

    pub fn analyze_text(&self, text: &str) -> HonestyAnalysis {
        let lower = text.to_lowercase();
        let mut violations = Vec::new();
        let mut suggestions = Vec::new();
        let mut transformed = text.to_string();

        if self.enforce_sources {
            for pattern in UNSOURCED_CLAIM_PATTERNS.iter() {
                if pattern.is_match(text) {
                    violations.push(format!("unsourced claim detected: {}", pattern.as_str()));
                    suggestions.push("add source citations or use hedging language".to_string());
                }
            }
        }

        let padded = format!(" {lower} ");
        let absolute_claims = ABSOLUTE_MARKERS
            .iter()
            .filter(|m| padded.contains(&format!(" {m} ")))
            .count();

        if self.enforce_uncertainty && absolute_claims > 2 {
            violations.push(format!("excessive absolute claims: {absolute_claims}"));
            suggestions.push("consider hedging with: generally, typically, often, etc.".to_string());

            for marker in ABSOLUTE_MARKERS {
                let re = Regex::new(&format!(r"(?i)\b{marker}\b")).unwrap();
                if re.is_match(&transformed) {
                    transformed = re.replacen(&transformed, 1, format!("{} {marker}", HEDGE_PHRASES[0])).into_owned();
                    break;
                }
            }
        }

        let false_confidence = FALSE_CONFIDENCE.iter().filter(|p| lower.contains(*p)).count();
        if false_confidence > 0 {
            violations.push(format!("false confidence indicators: {false_confidence}"));
            suggestions.push(
                "replace with: 'based on available information' or 'to the best of my knowledge'".to_string(),
            );
        }

        let has_disclaimer = DISCLAIMER_PHRASES.iter().any(|p| lower.contains(p));
        let professional_topic_detected =
            UNCERTAIN_TOPICS.iter().any(|t| lower.contains(t)) && !has_disclaimer;
        if professional_topic_detected {
            suggestions.push(
                "consider adding a disclaimer for professional advice (medical/legal/financial topic detected)"
                    .to_string(),
            );
        }

        let compliant = violations.is_empty();
        let confidence_score = (1.0 - violations.len() as f32 * 0.25).max(0.0);
        let transformed_text = if transformed != text { Some(transformed) } else { None };

        HonestyAnalysis {
            compliant,
            confidence_score,
            violations,
            suggestions,
            transformed_text,
            absolute_claims,
            false_confidence,
            professional_topic_detected,
        }
    }

    /// Apply the policy, optionally rewriting absolute claims with hedging.
    pub fn enforce(&self, text: &str, auto_transform: bool) -> String {
        let analysis = self.analyze_text(text);
        if auto_transform {
            if let Some(t) = analysis.transformed_text {
                return t;
            }
        }
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compliant_text_has_no_violations() {
        let policy = HonestyPolicy::new(true, true);
        let result = policy.analyze_text("Many cats enjoy sunlight, generally speaking.");
        assert!(result.compliant);
    }

    #[test]
    fn unsourced_claim_is_a_violation() {
        let policy = HonestyPolicy::new(true, true);
        let result = policy.analyze_text("Studies show that this works.");
        assert!(!result.compliant);
        assert!(!result.violations.is_empty());
    }

    #[test]
    fn excessive_absolutes_get_hedged() {
        let policy = HonestyPolicy::new(false, true);
        let result = policy.analyze_text("This always works, it never fails, all users agree.");
        assert!(result.absolute_claims > 2);
        assert!(result.transformed_text.is_some());
    }

    #[test]
    fn professional_topic_without_disclaimer_suggests_one() {
        let policy = HonestyPolicy::new(false, false);
        let result = policy.analyze_text("For your medical condition, take this twice a day.");
        assert!(result.professional_topic_detected);
    }

    #[test]
    fn enforce_returns_original_without_auto_transform() {
        let policy = HonestyPolicy::new(false, true);
        let text = "This always works, it never fails, all users agree.";
        assert_eq!(policy.enforce(text, false), text);
    }
}
