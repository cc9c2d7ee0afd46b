use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum QuizError {
    #[error("{0}")]
    Invalid(String),
    #[error("question {0} does not exist")]
    NoSuchQuestion(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuestionType {
    #[default]
    McqSingle,
    McqMulti,
    TrueFalse,
    ShortAnswer,
}

impl QuestionType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "MCQ_SINGLE" => Some(Self::McqSingle),
            "MCQ_MULTI" => Some(Self::McqMulti),
            "TRUE_FALSE" => Some(Self::TrueFalse),
            "SHORT_ANSWER" => Some(Self::ShortAnswer),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::McqSingle => "MCQ_SINGLE",
            Self::McqMulti => "MCQ_MULTI",
            Self::TrueFalse => "TRUE_FALSE",
            Self::ShortAnswer => "SHORT_ANSWER",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionDraft {
    pub option_text: String,
    #[serde(default)]
    pub is_correct: bool,
    pub rationale: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionDraft {
    pub question_text: String,
    pub question_type: QuestionType,
    pub explanation: Option<String>,
    pub difficulty: Option<String>,
    #[serde(default)]
    pub order_index: i64,
    #[serde(default)]
    pub options: Vec<OptionDraft>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizDraft {
    pub title: String,
    pub description: Option<String>,
    #[serde(default)]
    pub max_marks: i64,
    pub topic_id: String,
    pub subtopic_id: Option<String>,
    pub layer_id: String,
    pub status: Option<String>,
    #[serde(default)]
    pub questions: Vec<QuestionDraft>,
}

pub fn validate_quiz(draft: &QuizDraft) -> Result<(), QuizError> {
    if draft.title.trim().is_empty() {
        return Err(QuizError::Invalid("title is required".into()));
    }
    if draft.topic_id.trim().is_empty() {
        return Err(QuizError::Invalid("topic is required".into()));
    }
    if draft.layer_id.trim().is_empty() {
        return Err(QuizError::Invalid("layer is required".into()));
    }
    if draft.max_marks < 0 {
        return Err(QuizError::Invalid("maxMarks must not be negative".into()));
    }
    for (i, q) in draft.questions.iter().enumerate() {
        validate_question(q).map_err(|e| QuizError::Invalid(format!("question {}: {}", i + 1, e)))?;
    }
    Ok(())
}

fn validate_question(q: &QuestionDraft) -> Result<(), QuizError> {
    if q.question_text.trim().is_empty() {
        return Err(QuizError::Invalid("question text is required".into()));
    }
    if q.options.iter().any(|o| o.option_text.trim().is_empty()) {
        return Err(QuizError::Invalid("option text is required".into()));
    }
    let correct = q.options.iter().filter(|o| o.is_correct).count();
    match q.question_type {
        QuestionType::McqSingle if correct != 1 => Err(QuizError::Invalid(
            "MCQ_SINGLE needs exactly one correct option".into(),
        )),
        QuestionType::McqMulti if correct == 0 => Err(QuizError::Invalid(
            "MCQ_MULTI needs at least one correct option".into(),
        )),
        QuestionType::TrueFalse if q.options.len() != 2 || correct != 1 => Err(
            QuizError::Invalid("TRUE_FALSE needs two options, one correct".into()),
        ),
        _ => Ok(()),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerOption {
    pub text: String,
    #[serde(default)]
    pub is_correct: bool,
    pub rationale: Option<String>,
}

/// One playable question, the shape QUIZ resources keep in their `content`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerQuestion {
    pub question: String,
    #[serde(default)]
    pub kind: QuestionType,
    pub answer_options: Vec<AnswerOption>,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlayerQuiz {
    #[serde(default)]
    pub quiz: Vec<PlayerQuestion>,
}

impl PlayerQuestion {
    pub fn is_correct(&self, selected: &[String]) -> bool {
        if selected.is_empty() {
            return false;
        }
        if self.kind == QuestionType::ShortAnswer {
            return selected.iter().all(|s| {
                self.answer_options
                    .iter()
                    .any(|o| o.is_correct && o.text.trim().eq_ignore_ascii_case(s.trim()))
            });
        }
        let chosen: BTreeSet<&str> = selected.iter().map(|s| s.as_str()).collect();
        let correct: BTreeSet<&str> = self
            .answer_options
            .iter()
            .filter(|o| o.is_correct)
            .map(|o| o.text.as_str())
            .collect();
        chosen == correct
    }

    pub fn rationale_for(&self, selected: &str) -> Option<&str> {
        self.answer_options
            .iter()
            .find(|o| o.text == selected)
            .and_then(|o| o.rationale.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResult {
    pub question_index: usize,
    pub correct: bool,
    /// False when the question had already been checked; the score did not move.
    pub counted: bool,
    pub rationale: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizScore {
    pub score: usize,
    pub total: usize,
    pub percentage: i64,
}

/// One sitting of a quiz. The first check of a question decides whether it
/// counts; later checks of the same question only report correctness.
#[derive(Debug, Clone)]
pub struct QuizAttempt {
    questions: Vec<PlayerQuestion>,
    current: usize,
    answers: BTreeMap<usize, bool>,
    completed: bool,
}

impl QuizAttempt {
    pub fn new(questions: Vec<PlayerQuestion>) -> Result<Self, QuizError> {
        if questions.is_empty() {
            return Err(QuizError::Invalid("this quiz has no questions".into()));
        }
        Ok(Self {
            questions,
            current: 0,
            answers: BTreeMap::new(),
            completed: false,
        })
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn current_question(&self) -> &PlayerQuestion {
        &self.questions[self.current]
    }

    pub fn check(&mut self, selected: &[String]) -> CheckResult {
        self.record(self.current, selected)
    }

    pub fn check_at(&mut self, index: usize, selected: &[String]) -> Result<CheckResult, QuizError> {
        if index >= self.questions.len() {
            return Err(QuizError::NoSuchQuestion(index));
        }
        Ok(self.record(index, selected))
    }

    fn record(&mut self, index: usize, selected: &[String]) -> CheckResult {
        let question = &self.questions[index];
        let correct = question.is_correct(selected);
        let rationale = selected
            .first()
            .and_then(|s| question.rationale_for(s))
            .map(|s| s.to_string());
        let counted = !self.answers.contains_key(&index);
        if counted {
            self.answers.insert(index, correct);
        }
        CheckResult {
            question_index: index,
            correct,
            counted,
            rationale,
        }
    }

    /// Moves forward; past the last question the attempt is completed.
    pub fn next(&mut self) {
        if self.current + 1 < self.questions.len() {
            self.current += 1;
        } else {
            self.completed = true;
        }
    }

    pub fn previous(&mut self) {
        if self.current > 0 {
            self.current -= 1;
        }
    }

    pub fn restart(&mut self) {
        self.current = 0;
        self.answers.clear();
        self.completed = false;
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn answered(&self, index: usize) -> Option<bool> {
        self.answers.get(&index).copied()
    }

    pub fn score(&self) -> QuizScore {
        let score = self.answers.values().filter(|c| **c).count();
        let total = self.questions.len();
        QuizScore {
            score,
            total,
            percentage: percentage(score, total),
        }
    }
}

/// Half-up rounding of 100 * score / total.
pub fn percentage(score: usize, total: usize) -> i64 {
    if total == 0 {
        return 0;
    }
    ((100.0 * score as f64 / total as f64) + 0.5).floor() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(question: &str, options: &[(&str, bool)]) -> PlayerQuestion {
        PlayerQuestion {
            question: question.to_string(),
            kind: QuestionType::McqSingle,
            answer_options: options
                .iter()
                .map(|(t, c)| AnswerOption {
                    text: t.to_string(),
                    is_correct: *c,
                    rationale: Some(format!("because {}", t)),
                })
                .collect(),
            hint: None,
        }
    }

    fn sel(s: &str) -> Vec<String> {
        vec![s.to_string()]
    }

    fn three_questions() -> Vec<PlayerQuestion> {
        vec![
            q("2+2", &[("4", true), ("5", false)]),
            q("3*3", &[("6", false), ("9", true)]),
            q("10/2", &[("5", true), ("2", false)]),
        ]
    }

    #[test]
    fn only_the_first_check_counts() {
        let mut attempt = QuizAttempt::new(three_questions()).expect("attempt");
        let first = attempt.check(&sel("5"));
        assert!(!first.correct);
        assert!(first.counted);
        let retry = attempt.check(&sel("4"));
        assert!(retry.correct);
        assert!(!retry.counted);
        assert_eq!(attempt.score().score, 0);
        assert_eq!(first.rationale.as_deref(), Some("because 5"));
    }

    #[test]
    fn navigation_completes_after_last_question() {
        let mut attempt = QuizAttempt::new(three_questions()).expect("attempt");
        attempt.previous();
        assert_eq!(attempt.current_index(), 0);
        attempt.check(&sel("4"));
        attempt.next();
        attempt.check(&sel("9"));
        attempt.next();
        assert_eq!(attempt.current_question().question, "10/2");
        attempt.check(&sel("2"));
        assert!(!attempt.is_completed());
        attempt.next();
        assert!(attempt.is_completed());
        assert_eq!(
            attempt.score(),
            QuizScore {
                score: 2,
                total: 3,
                percentage: 67
            }
        );

        attempt.restart();
        assert!(!attempt.is_completed());
        assert_eq!(attempt.score().score, 0);
        assert_eq!(attempt.answered(0), None);
    }

    #[test]
    fn empty_quiz_is_rejected() {
        assert!(QuizAttempt::new(vec![]).is_err());
    }

    #[test]
    fn multi_select_needs_exact_set() {
        let mut question = q("primes", &[("2", true), ("3", true), ("4", false)]);
        question.kind = QuestionType::McqMulti;
        assert!(question.is_correct(&["3".into(), "2".into()]));
        assert!(!question.is_correct(&["2".into()]));
        assert!(!question.is_correct(&["2".into(), "3".into(), "4".into()]));
    }

    #[test]
    fn short_answer_ignores_case_and_padding() {
        let mut question = q("capital of France", &[("Paris", true)]);
        question.kind = QuestionType::ShortAnswer;
        assert!(question.is_correct(&[" paris ".into()]));
        assert!(!question.is_correct(&["Lyon".into()]));
    }

    #[test]
    fn percentage_rounds_half_up() {
        assert_eq!(percentage(1, 8), 13);
        assert_eq!(percentage(1, 3), 33);
        assert_eq!(percentage(0, 0), 0);
    }

    fn draft(questions: serde_json::Value) -> QuizDraft {
        serde_json::from_value(serde_json::json!({
            "title": "Fractions check",
            "topicId": "t1",
            "layerId": "l1",
            "questions": questions
        }))
        .expect("draft")
    }

    #[test]
    fn authoring_rules_per_question_type() {
        let ok = draft(serde_json::json!([
            { "questionText": "1/2 = 0.5?", "questionType": "TRUE_FALSE",
              "options": [{ "optionText": "True", "isCorrect": true }, { "optionText": "False" }] },
            { "questionText": "Pick halves", "questionType": "MCQ_MULTI",
              "options": [{ "optionText": "2/4", "isCorrect": true }, { "optionText": "3/6", "isCorrect": true }] },
            { "questionText": "Name the top number", "questionType": "SHORT_ANSWER" }
        ]));
        assert_eq!(validate_quiz(&ok), Ok(()));

        let two_correct = draft(serde_json::json!([
            { "questionText": "Pick one", "questionType": "MCQ_SINGLE",
              "options": [{ "optionText": "a", "isCorrect": true }, { "optionText": "b", "isCorrect": true }] }
        ]));
        assert!(validate_quiz(&two_correct).is_err());

        let three_way_tf = draft(serde_json::json!([
            { "questionText": "True?", "questionType": "TRUE_FALSE",
              "options": [{ "optionText": "T", "isCorrect": true }, { "optionText": "F" }, { "optionText": "?" }] }
        ]));
        assert!(validate_quiz(&three_way_tf).is_err());
    }

    #[test]
    fn player_content_parses_from_resource_json() {
        let content: PlayerQuiz = serde_json::from_str(
            r#"{"quiz":[{"question":"2+2","answerOptions":[{"text":"4","isCorrect":true},{"text":"3"}],"hint":"count"}]}"#,
        )
        .expect("content");
        assert_eq!(content.quiz.len(), 1);
        assert_eq!(content.quiz[0].kind, QuestionType::McqSingle);
        assert!(content.quiz[0].is_correct(&sel("4")));
    }
}
