//! Rule-based output evaluation.
//!
//! The evaluator turns arbitrary node output into a normalized quality score
//! in `[0, 1]` plus a pass/fail decision against a configured threshold. It
//! never errors on malformed input: every defect degrades the score and is
//! explained in `feedback`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use switchyard_types::RunConfig;

/// Metric weights for the composite score. Completeness dominates so that an
/// empty output always lands below 0.5 regardless of the other metrics.
pub const WEIGHT_COMPLETENESS: f64 = 0.5;
pub const WEIGHT_FORMAT: f64 = 0.25;
pub const WEIGHT_LENGTH: f64 = 0.25;

const SCORE_UNPARSEABLE_JSON: f64 = 0.3;
const SCORE_MISSING_KEYS: f64 = 0.6;
const SCORE_PLAIN_TEXT: f64 = 0.8;
const SCORE_TOO_SHORT: f64 = 0.4;
const SCORE_TOO_LONG: f64 = 0.7;

/// Caller-supplied expectations for one evaluation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EvaluationContext {
    #[serde(default)]
    pub expect_json: bool,
    #[serde(default)]
    pub required_keys: Vec<String>,
    #[serde(default)]
    pub min_length: Option<usize>,
    #[serde(default)]
    pub max_length: Option<usize>,
}

impl EvaluationContext {
    /// Build an evaluation context from a node's free-form payload.
    /// Unknown keys are ignored; a malformed payload falls back to defaults
    /// rather than failing the evaluation.
    pub fn from_attrs(attrs: &HashMap<String, serde_json::Value>) -> Self {
        let object = serde_json::Value::Object(
            attrs
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        );
        serde_json::from_value(object).unwrap_or_default()
    }
}

/// Result of scoring one output. Immutable once returned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub score: f64,
    pub passed: bool,
    pub metrics: HashMap<String, f64>,
    pub details: HashMap<String, serde_json::Value>,
    pub feedback: String,
}

/// Scores output into a quality signal and gates it against a threshold.
#[derive(Debug, Clone)]
pub struct Evaluator {
    threshold: f64,
}

impl Evaluator {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    /// Threshold comes from `ci.minimum_score` at construction time.
    pub fn from_config(config: &RunConfig) -> Self {
        Self::new(config.ci.minimum_score)
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Score `output` against the context rules without deciding pass/fail.
    pub fn rule_based_score(&self, output: &str, ctx: &EvaluationContext) -> EvaluationResult {
        let mut metrics = HashMap::new();
        let mut details = HashMap::new();
        let mut feedback: Vec<String> = Vec::new();

        let completeness = if output.trim().is_empty() { 0.0 } else { 1.0 };
        if completeness == 0.0 {
            feedback.push("output is empty".to_string());
        }
        metrics.insert("completeness".to_string(), completeness);

        let format_valid = self.score_format(output, ctx, &mut details, &mut feedback);
        metrics.insert("format_valid".to_string(), format_valid);

        let length_appropriate = self.score_length(output, ctx, &mut details, &mut feedback);
        metrics.insert("length_appropriate".to_string(), length_appropriate);

        let score = (WEIGHT_COMPLETENESS * completeness
            + WEIGHT_FORMAT * format_valid
            + WEIGHT_LENGTH * length_appropriate)
            .clamp(0.0, 1.0);

        let feedback = if feedback.is_empty() {
            "output meets all checks".to_string()
        } else {
            feedback.join("; ")
        };

        EvaluationResult {
            score,
            passed: false,
            metrics,
            details,
            feedback,
        }
    }

    /// Score `output` and gate it: `passed = score >= threshold`.
    pub fn evaluate(&self, output: &str, ctx: &EvaluationContext) -> EvaluationResult {
        let mut result = self.rule_based_score(output, ctx);
        result.passed = result.score >= self.threshold;
        result
    }

    fn score_format(
        &self,
        output: &str,
        ctx: &EvaluationContext,
        details: &mut HashMap<String, serde_json::Value>,
        feedback: &mut Vec<String>,
    ) -> f64 {
        if ctx.expect_json {
            match serde_json::from_str::<serde_json::Value>(output) {
                Ok(parsed) => {
                    details.insert("parse_ok".to_string(), serde_json::Value::Bool(true));
                    let missing: Vec<&String> = ctx
                        .required_keys
                        .iter()
                        .filter(|key| parsed.get(key.as_str()).is_none())
                        .collect();
                    if missing.is_empty() {
                        1.0
                    } else {
                        let names: Vec<String> =
                            missing.iter().map(|k| k.to_string()).collect();
                        feedback.push(format!("missing required keys: {}", names.join(", ")));
                        details.insert(
                            "missing_keys".to_string(),
                            serde_json::json!(names),
                        );
                        SCORE_MISSING_KEYS
                    }
                }
                Err(err) => {
                    details.insert("parse_ok".to_string(), serde_json::Value::Bool(false));
                    feedback.push(format!("output failed to parse as JSON: {err}"));
                    SCORE_UNPARSEABLE_JSON
                }
            }
        } else if has_sentence_structure(output) {
            1.0
        } else {
            // Plain fragments still pass, just below structured prose.
            SCORE_PLAIN_TEXT
        }
    }

    fn score_length(
        &self,
        output: &str,
        ctx: &EvaluationContext,
        details: &mut HashMap<String, serde_json::Value>,
        feedback: &mut Vec<String>,
    ) -> f64 {
        let length = output.chars().count();
        details.insert("length".to_string(), serde_json::json!(length));
        if let Some(min) = ctx.min_length {
            if length < min {
                feedback.push(format!("output is too short ({length} < {min} chars)"));
                return SCORE_TOO_SHORT;
            }
        }
        if let Some(max) = ctx.max_length {
            if length > max {
                feedback.push(format!("output is very long ({length} > {max} chars)"));
                return SCORE_TOO_LONG;
            }
        }
        1.0
    }
}

/// Sentence/paragraph heuristic for free-form text: a terminator followed by
/// whitespace or end-of-text, or multiple paragraphs.
fn has_sentence_structure(output: &str) -> bool {
    if output.contains("\n\n") {
        return true;
    }
    regex::Regex::new(r"[.!?](\s|$)")
        .unwrap()
        .is_match(output.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evaluator() -> Evaluator {
        Evaluator::new(0.75)
    }

    #[test]
    fn empty_output_scores_below_half() {
        let result = evaluator().evaluate("", &EvaluationContext::default());
        assert_eq!(result.metrics["completeness"], 0.0);
        assert!(result.score < 0.5, "score was {}", result.score);
        assert!(!result.passed);
        assert!(result.feedback.contains("empty"));
    }

    #[test]
    fn whitespace_only_counts_as_empty() {
        let result = evaluator().evaluate("   \n\t  ", &EvaluationContext::default());
        assert_eq!(result.metrics["completeness"], 0.0);
        assert!(!result.passed);
    }

    #[test]
    fn structured_prose_passes() {
        let result = evaluator().evaluate(
            "The migration plan is complete. All three services were updated.",
            &EvaluationContext::default(),
        );
        assert_eq!(result.score, 1.0);
        assert!(result.passed);
        assert_eq!(result.feedback, "output meets all checks");
    }

    #[test]
    fn plain_fragment_scores_lower_but_still_passes() {
        let result = evaluator().evaluate("done", &EvaluationContext::default());
        assert_eq!(result.metrics["format_valid"], SCORE_PLAIN_TEXT);
        assert!(result.passed, "score was {}", result.score);
    }

    #[test]
    fn invalid_json_degrades_without_panicking() {
        let ctx = EvaluationContext {
            expect_json: true,
            ..Default::default()
        };
        let result = evaluator().evaluate("{not json", &ctx);
        assert!(result.metrics["format_valid"] < 1.0);
        assert_eq!(result.details["parse_ok"], false);
        assert!(result.feedback.contains("parse"));
    }

    #[test]
    fn missing_required_keys_are_enumerated() {
        let ctx = EvaluationContext {
            expect_json: true,
            required_keys: vec!["status".to_string(), "summary".to_string()],
            ..Default::default()
        };
        let result = evaluator().evaluate(r#"{"status": "ok"}"#, &ctx);
        assert!(result.metrics["format_valid"] < 1.0);
        assert!(result.feedback.contains("summary"));
        assert_eq!(result.details["missing_keys"], serde_json::json!(["summary"]));
    }

    #[test]
    fn valid_json_with_all_keys_scores_full_format() {
        let ctx = EvaluationContext {
            expect_json: true,
            required_keys: vec!["status".to_string()],
            ..Default::default()
        };
        let result = evaluator().evaluate(r#"{"status": "ok", "extra": 1}"#, &ctx);
        assert_eq!(result.metrics["format_valid"], 1.0);
        assert_eq!(result.details["parse_ok"], true);
    }

    #[test]
    fn short_output_mentions_shortness() {
        let ctx = EvaluationContext {
            min_length: Some(50),
            ..Default::default()
        };
        let result = evaluator().evaluate("Too brief.", &ctx);
        assert_eq!(result.metrics["length_appropriate"], SCORE_TOO_SHORT);
        assert!(result.feedback.contains("too short"));
    }

    #[test]
    fn long_output_mentions_length() {
        let ctx = EvaluationContext {
            max_length: Some(10),
            ..Default::default()
        };
        let result = evaluator().evaluate("This output definitely exceeds the cap.", &ctx);
        assert_eq!(result.metrics["length_appropriate"], SCORE_TOO_LONG);
        assert!(result.feedback.contains("very long"));
    }

    #[test]
    fn length_within_bounds_is_full_score() {
        let ctx = EvaluationContext {
            min_length: Some(5),
            max_length: Some(100),
            ..Default::default()
        };
        let result = evaluator().evaluate("A perfectly sized answer.", &ctx);
        assert_eq!(result.metrics["length_appropriate"], 1.0);
    }

    #[test]
    fn threshold_comes_from_config() {
        let config: RunConfig =
            serde_json::from_str(r#"{"ci": {"minimum_score": 0.96}}"#).unwrap();
        let evaluator = Evaluator::from_config(&config);
        assert_eq!(evaluator.threshold(), 0.96);

        // A fragment scores 0.95: passes the default gate but not this one.
        let result = evaluator.evaluate("done", &EvaluationContext::default());
        assert!(!result.passed);
    }

    #[test]
    fn context_from_attrs_ignores_unknown_keys() {
        let mut attrs = HashMap::new();
        attrs.insert("prompt".to_string(), serde_json::json!("build the thing"));
        attrs.insert("min_length".to_string(), serde_json::json!(12));
        attrs.insert("expect_json".to_string(), serde_json::json!(true));

        let ctx = EvaluationContext::from_attrs(&attrs);
        assert!(ctx.expect_json);
        assert_eq!(ctx.min_length, Some(12));
        assert_eq!(ctx.max_length, None);
    }

    #[test]
    fn context_from_malformed_attrs_falls_back_to_defaults() {
        let mut attrs = HashMap::new();
        attrs.insert("min_length".to_string(), serde_json::json!("not a number"));

        let ctx = EvaluationContext::from_attrs(&attrs);
        assert_eq!(ctx.min_length, None);
        assert!(!ctx.expect_json);
    }

    #[test]
    fn sentence_structure_heuristic() {
        assert!(has_sentence_structure("One sentence."));
        assert!(has_sentence_structure("Really? Yes!"));
        assert!(has_sentence_structure("para one\n\npara two"));
        assert!(!has_sentence_structure("just-a-fragment"));
        assert!(!has_sentence_structure("v1.2.3"));
    }
}
