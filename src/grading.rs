use serde::{Deserialize, Serialize};
use serde_json::json;

pub const TRUE_FALSE_CHOICES: [&str; 2] = ["true", "false"];

/// Threshold (in percentage points) separating a real change in a
/// student's results from noise when classifying a trend.
const TREND_THRESHOLD: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestionKind {
    MultipleChoice,
    TrueFalse,
    Subjective,
}

impl QuestionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            QuestionKind::MultipleChoice => "multiple_choice",
            QuestionKind::TrueFalse => "true_false",
            QuestionKind::Subjective => "subjective",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "multiple_choice" => Some(QuestionKind::MultipleChoice),
            "true_false" => Some(QuestionKind::TrueFalse),
            "subjective" => Some(QuestionKind::Subjective),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradingStatus {
    FullyGraded,
    PendingManual,
    Reopened,
}

impl GradingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            GradingStatus::FullyGraded => "fully_graded",
            GradingStatus::PendingManual => "pending_manual",
            GradingStatus::Reopened => "reopened",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GradeError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl GradeError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    fn question(index: usize, field: &str, message: impl Into<String>) -> Self {
        Self {
            code: "validation_failed".to_string(),
            message: message.into(),
            details: Some(json!({ "questionIndex": index, "field": field })),
        }
    }
}

/// Incoming question definition, as authored by a teacher.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionSpec {
    pub kind: String,
    pub prompt: String,
    #[serde(default)]
    pub choices: Option<Vec<String>>,
    #[serde(default)]
    pub correct_answer: Option<String>,
    pub points: f64,
}

/// Trim + ASCII-lowercase. Every response/correct-answer comparison in the
/// engine goes through this, so grading never depends on case or padding.
pub fn normalize_response(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

/// Validate an authored question set. All-or-nothing: the first offending
/// question aborts with its index and field so the caller persists nothing.
pub fn validate_questions(specs: &[QuestionSpec]) -> Result<(), GradeError> {
    if specs.is_empty() {
        return Err(GradeError::new(
            "validation_failed",
            "assignment must contain at least one question",
        ));
    }

    for (i, spec) in specs.iter().enumerate() {
        let Some(kind) = QuestionKind::parse(spec.kind.as_str()) else {
            return Err(GradeError::question(
                i,
                "kind",
                "kind must be one of: multiple_choice, true_false, subjective",
            ));
        };
        if spec.prompt.trim().is_empty() {
            return Err(GradeError::question(i, "prompt", "prompt must not be empty"));
        }
        if !(spec.points > 0.0) || !spec.points.is_finite() {
            return Err(GradeError::question(i, "points", "points must be > 0"));
        }

        match kind {
            QuestionKind::MultipleChoice => {
                let Some(choices) = spec.choices.as_ref() else {
                    return Err(GradeError::question(
                        i,
                        "choices",
                        "multiple_choice requires a choice set",
                    ));
                };
                if choices.len() < 2 {
                    return Err(GradeError::question(
                        i,
                        "choices",
                        "multiple_choice requires at least 2 choices",
                    ));
                }
                let mut normalized = Vec::with_capacity(choices.len());
                for c in choices {
                    let n = normalize_response(c);
                    if n.is_empty() {
                        return Err(GradeError::question(
                            i,
                            "choices",
                            "choices must not be empty",
                        ));
                    }
                    if normalized.contains(&n) {
                        return Err(GradeError::question(
                            i,
                            "choices",
                            "choices must be distinct",
                        ));
                    }
                    normalized.push(n);
                }
                let Some(correct) = spec.correct_answer.as_ref() else {
                    return Err(GradeError::question(
                        i,
                        "correctAnswer",
                        "multiple_choice requires a correct answer",
                    ));
                };
                let correct_n = normalize_response(correct);
                let matches = normalized.iter().filter(|c| **c == correct_n).count();
                if matches != 1 {
                    return Err(GradeError::question(
                        i,
                        "correctAnswer",
                        "correct answer must match exactly one choice",
                    ));
                }
            }
            QuestionKind::TrueFalse => {
                let Some(correct) = spec.correct_answer.as_ref() else {
                    return Err(GradeError::question(
                        i,
                        "correctAnswer",
                        "true_false requires a correct answer",
                    ));
                };
                let correct_n = normalize_response(correct);
                if !TRUE_FALSE_CHOICES.contains(&correct_n.as_str()) {
                    return Err(GradeError::question(
                        i,
                        "correctAnswer",
                        "true_false correct answer must be true or false",
                    ));
                }
                if let Some(choices) = spec.choices.as_ref() {
                    let mut normalized: Vec<String> =
                        choices.iter().map(|c| normalize_response(c)).collect();
                    normalized.sort();
                    if normalized != ["false", "true"] {
                        return Err(GradeError::question(
                            i,
                            "choices",
                            "true_false choices are fixed to true/false",
                        ));
                    }
                }
            }
            QuestionKind::Subjective => {
                if spec.choices.as_ref().map(|c| !c.is_empty()).unwrap_or(false) {
                    return Err(GradeError::question(
                        i,
                        "choices",
                        "subjective questions have no choice set",
                    ));
                }
                if spec.correct_answer.as_ref().map(|c| !c.trim().is_empty()).unwrap_or(false) {
                    return Err(GradeError::question(
                        i,
                        "correctAnswer",
                        "subjective questions have no stored correct answer",
                    ));
                }
            }
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectiveResult {
    pub is_correct: bool,
    pub awarded_points: f64,
    pub feedback: String,
}

/// Deterministic objective scoring: exact match after normalization earns
/// the full point value, anything else earns 0.
pub fn score_objective(correct_answer: &str, response: &str, points: f64) -> ObjectiveResult {
    let trimmed = response.trim();
    if trimmed.is_empty() {
        return ObjectiveResult {
            is_correct: false,
            awarded_points: 0.0,
            feedback: "No answer provided.".to_string(),
        };
    }
    if normalize_response(trimmed) == normalize_response(correct_answer) {
        ObjectiveResult {
            is_correct: true,
            awarded_points: points,
            feedback: "Correct! Well done.".to_string(),
        }
    } else {
        ObjectiveResult {
            is_correct: false,
            awarded_points: 0.0,
            feedback: format!("Incorrect. The correct answer is {}.", correct_answer),
        }
    }
}

pub fn pending_feedback() -> &'static str {
    "Pending teacher review."
}

/// Initial status for a fresh submission: terminal immediately when the
/// assignment carries no subjective questions.
pub fn initial_status(has_subjective: bool) -> GradingStatus {
    if has_subjective {
        GradingStatus::PendingManual
    } else {
        GradingStatus::FullyGraded
    }
}

pub fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

pub fn percent(score: f64, max_score: f64) -> Option<f64> {
    if max_score > 0.0 {
        Some(round1(score * 100.0 / max_score))
    } else {
        None
    }
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / (values.len() as f64))
}

pub fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        Some(values[mid])
    } else {
        Some((values[mid - 1] + values[mid]) / 2.0)
    }
}

/// Direction of a student's percent series, first point vs last.
pub fn trend_direction(percents: &[f64]) -> &'static str {
    if percents.len() < 2 {
        return "insufficient_data";
    }
    let first = percents[0];
    let last = percents[percents.len() - 1];
    if last > first + TREND_THRESHOLD {
        "improving"
    } else if last < first - TREND_THRESHOLD {
        "declining"
    } else {
        "steady"
    }
}
