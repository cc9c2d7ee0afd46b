use crate::db;
use crate::ipc::handlers::resources::RESOURCE_STATUSES;
use crate::ipc::helpers::{
    begin, commit, db_err, get_optional_str, get_required_str, query_err, require_row,
    with_conn, with_conn_or_empty, HandlerErr, Table,
};
use crate::ipc::types::{AppState, Request};
use crate::quiz::{
    validate_quiz, AnswerOption, PlayerQuestion, PlayerQuiz, QuestionType, QuizAttempt, QuizDraft,
};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

fn check_placement(conn: &Connection, draft: &QuizDraft) -> Result<(), HandlerErr> {
    require_row(conn, Table::Topics, &draft.topic_id)?;
    require_row(conn, Table::Layers, &draft.layer_id)?;
    if let Some(sid) = draft.subtopic_id.as_deref().filter(|s| !s.is_empty()) {
        let parent: Option<String> = conn
            .query_row("SELECT topic_id FROM subtopics WHERE id = ?", [sid], |r| {
                r.get(0)
            })
            .optional()
            .map_err(query_err)?;
        match parent {
            None => return Err(HandlerErr::not_found("subtopic")),
            Some(p) if p != draft.topic_id => {
                return Err(HandlerErr::bad_params(
                    "subtopic does not belong to the topic",
                ))
            }
            Some(_) => {}
        }
    }
    Ok(())
}

fn handle_quizzes_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let created_by = state.session.as_ref().map(|u| u.id.clone());
    with_conn(state, req, |conn, params| {
        let draft: QuizDraft = serde_json::from_value(params.clone())
            .map_err(|e| HandlerErr::bad_params(format!("invalid quiz: {}", e)))?;
        validate_quiz(&draft)?;
        let status = match draft.status.as_deref().map(|s| s.trim().to_ascii_uppercase()) {
            None => "DRAFT".to_string(),
            Some(s) if RESOURCE_STATUSES.contains(&s.as_str()) => s,
            Some(_) => {
                return Err(HandlerErr::bad_params(format!(
                    "status must be one of: {}",
                    RESOURCE_STATUSES.join(", ")
                )))
            }
        };
        check_placement(conn, &draft)?;

        let quiz_id = Uuid::new_v4().to_string();
        let tx = begin(conn)?;
        tx.execute(
            "INSERT INTO quizzes(id, title, description, max_marks, topic_id, subtopic_id,
                                 layer_id, status, created_at, created_by_id)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            (
                &quiz_id,
                draft.title.trim(),
                draft.description.as_deref(),
                draft.max_marks,
                &draft.topic_id,
                draft.subtopic_id.as_deref().filter(|s| !s.is_empty()),
                &draft.layer_id,
                &status,
                db::now_rfc3339(),
                created_by.as_deref(),
            ),
        )
        .map_err(db_err("db_insert_failed", "quizzes"))?;
        for (qi, question) in draft.questions.iter().enumerate() {
            let question_id = Uuid::new_v4().to_string();
            let order_index = if question.order_index > 0 {
                question.order_index
            } else {
                qi as i64
            };
            tx.execute(
                "INSERT INTO quiz_questions(id, quiz_id, question_text, question_type,
                                            explanation, difficulty, order_index)
                 VALUES(?, ?, ?, ?, ?, ?, ?)",
                (
                    &question_id,
                    &quiz_id,
                    question.question_text.trim(),
                    question.question_type.as_str(),
                    question.explanation.as_deref(),
                    question.difficulty.as_deref().unwrap_or("medium"),
                    order_index,
                ),
            )
            .map_err(db_err("db_insert_failed", "quiz_questions"))?;
            for (oi, option) in question.options.iter().enumerate() {
                tx.execute(
                    "INSERT INTO quiz_options(id, question_id, option_text, is_correct, rationale, sort_order)
                     VALUES(?, ?, ?, ?, ?, ?)",
                    (
                        Uuid::new_v4().to_string(),
                        &question_id,
                        option.option_text.trim(),
                        option.is_correct,
                        option.rationale.as_deref(),
                        oi as i64,
                    ),
                )
                .map_err(db_err("db_insert_failed", "quiz_options"))?;
            }
        }
        commit(tx)?;
        info!(quiz_id = %quiz_id, questions = draft.questions.len(), "quiz created");
        Ok(json!({ "quiz": load_quiz(conn, &quiz_id)? }))
    })
}

fn handle_quizzes_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_conn_or_empty(state, req, "quizzes", |conn, params| {
        let topic_id = get_optional_str(params, "topicId");
        let mut stmt = conn
            .prepare(
                "SELECT q.id, q.title, q.description, q.max_marks, q.topic_id, q.subtopic_id,
                        q.layer_id, q.status, q.created_at, t.title, l.name,
                        (SELECT COUNT(*) FROM quiz_questions qq WHERE qq.quiz_id = q.id)
                 FROM quizzes q
                 LEFT JOIN topics t ON t.id = q.topic_id
                 LEFT JOIN layers l ON l.id = q.layer_id
                 WHERE ?1 IS NULL OR q.topic_id = ?1
                 ORDER BY q.created_at DESC, q.id",
            )
            .map_err(query_err)?;
        let quizzes = stmt
            .query_map([topic_id.as_deref()], |r| {
                Ok(json!({
                    "id": r.get::<_, String>(0)?,
                    "title": r.get::<_, String>(1)?,
                    "description": r.get::<_, Option<String>>(2)?,
                    "maxMarks": r.get::<_, i64>(3)?,
                    "topicId": r.get::<_, String>(4)?,
                    "subtopicId": r.get::<_, Option<String>>(5)?,
                    "layerId": r.get::<_, String>(6)?,
                    "status": r.get::<_, String>(7)?,
                    "createdAt": r.get::<_, String>(8)?,
                    "topicTitle": r.get::<_, Option<String>>(9)?,
                    "layerName": r.get::<_, Option<String>>(10)?,
                    "questionCount": r.get::<_, i64>(11)?,
                }))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(query_err)?;
        Ok(json!({ "quizzes": quizzes }))
    })
}

struct StoredQuestion {
    id: String,
    text: String,
    question_type: String,
    explanation: Option<String>,
    difficulty: String,
    order_index: i64,
}

struct StoredOption {
    id: String,
    text: String,
    is_correct: bool,
    rationale: Option<String>,
}

fn load_questions(conn: &Connection, quiz_id: &str) -> Result<Vec<(StoredQuestion, Vec<StoredOption>)>, HandlerErr> {
    let mut q_stmt = conn
        .prepare(
            "SELECT id, question_text, question_type, explanation, difficulty, order_index
             FROM quiz_questions WHERE quiz_id = ? ORDER BY order_index, id",
        )
        .map_err(query_err)?;
    let questions = q_stmt
        .query_map([quiz_id], |r| {
            Ok(StoredQuestion {
                id: r.get(0)?,
                text: r.get(1)?,
                question_type: r.get(2)?,
                explanation: r.get(3)?,
                difficulty: r.get(4)?,
                order_index: r.get(5)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_err)?;

    let mut o_stmt = conn
        .prepare(
            "SELECT id, option_text, is_correct, rationale
             FROM quiz_options WHERE question_id = ? ORDER BY sort_order",
        )
        .map_err(query_err)?;
    let mut out = Vec::with_capacity(questions.len());
    for q in questions {
        let options = o_stmt
            .query_map([&q.id], |r| {
                Ok(StoredOption {
                    id: r.get(0)?,
                    text: r.get(1)?,
                    is_correct: r.get::<_, i64>(2)? != 0,
                    rationale: r.get(3)?,
                })
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(query_err)?;
        out.push((q, options));
    }
    Ok(out)
}

fn load_quiz(conn: &Connection, quiz_id: &str) -> Result<Value, HandlerErr> {
    let quiz = conn
        .query_row(
            "SELECT id, title, description, max_marks, topic_id, subtopic_id, layer_id, status,
                    created_at, created_by_id
             FROM quizzes WHERE id = ?",
            [quiz_id],
            |r| {
                Ok(json!({
                    "id": r.get::<_, String>(0)?,
                    "title": r.get::<_, String>(1)?,
                    "description": r.get::<_, Option<String>>(2)?,
                    "maxMarks": r.get::<_, i64>(3)?,
                    "topicId": r.get::<_, String>(4)?,
                    "subtopicId": r.get::<_, Option<String>>(5)?,
                    "layerId": r.get::<_, String>(6)?,
                    "status": r.get::<_, String>(7)?,
                    "createdAt": r.get::<_, String>(8)?,
                    "createdById": r.get::<_, Option<String>>(9)?,
                }))
            },
        )
        .optional()
        .map_err(query_err)?;
    let Some(mut quiz) = quiz else {
        return Err(HandlerErr::not_found("quiz"));
    };
    let questions: Vec<Value> = load_questions(conn, quiz_id)?
        .into_iter()
        .map(|(q, options)| {
            json!({
                "id": q.id,
                "questionText": q.text,
                "questionType": q.question_type,
                "explanation": q.explanation,
                "difficulty": q.difficulty,
                "orderIndex": q.order_index,
                "options": options.into_iter().map(|o| json!({
                    "id": o.id,
                    "optionText": o.text,
                    "isCorrect": o.is_correct,
                    "rationale": o.rationale,
                })).collect::<Vec<_>>(),
            })
        })
        .collect();
    quiz["questions"] = json!(questions);
    Ok(quiz)
}

fn handle_quizzes_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_conn(state, req, |conn, params| {
        let id = get_required_str(params, "quizId")?;
        Ok(json!({ "quiz": load_quiz(conn, &id)? }))
    })
}

fn handle_quizzes_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_conn(state, req, |conn, params| {
        let id = get_required_str(params, "quizId")?;
        require_row(conn, Table::Quizzes, &id)?;
        let tx = begin(conn)?;
        tx.execute(
            "DELETE FROM quiz_options
             WHERE question_id IN (SELECT id FROM quiz_questions WHERE quiz_id = ?)",
            [&id],
        )
        .map_err(db_err("db_delete_failed", "quiz_options"))?;
        tx.execute("DELETE FROM quiz_questions WHERE quiz_id = ?", [&id])
            .map_err(db_err("db_delete_failed", "quiz_questions"))?;
        tx.execute("DELETE FROM quizzes WHERE id = ?", [&id])
            .map_err(db_err("db_delete_failed", "quizzes"))?;
        commit(tx)?;
        info!(quiz_id = %id, "quiz deleted");
        Ok(json!({ "ok": true }))
    })
}

/// Authored quizzes become playable questions; the explanation doubles as the hint.
fn player_questions_from_quiz(conn: &Connection, quiz_id: &str) -> Result<Vec<PlayerQuestion>, HandlerErr> {
    require_row(conn, Table::Quizzes, quiz_id)?;
    Ok(load_questions(conn, quiz_id)?
        .into_iter()
        .map(|(q, options)| PlayerQuestion {
            question: q.text,
            kind: QuestionType::parse(&q.question_type).unwrap_or_default(),
            answer_options: options
                .into_iter()
                .map(|o| AnswerOption {
                    text: o.text,
                    is_correct: o.is_correct,
                    rationale: o.rationale,
                })
                .collect(),
            hint: q.explanation,
        })
        .collect())
}

fn player_questions_from_resource(conn: &Connection, resource_id: &str) -> Result<Vec<PlayerQuestion>, HandlerErr> {
    let row: Option<(String, Option<String>)> = conn
        .query_row(
            "SELECT type, content FROM resources WHERE id = ?",
            [resource_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(query_err)?;
    let Some((resource_type, content)) = row else {
        return Err(HandlerErr::not_found("resource"));
    };
    if resource_type != "QUIZ" {
        return Err(HandlerErr::bad_params("resource is not a quiz"));
    }
    let Some(content) = content else {
        return Err(HandlerErr::bad_params("quiz resource has no content"));
    };
    let parsed: PlayerQuiz = serde_json::from_str(&content)
        .map_err(|e| HandlerErr::bad_params(format!("quiz content is invalid: {}", e)))?;
    Ok(parsed.quiz)
}

fn parse_selected(v: Option<&Value>) -> Result<Vec<String>, HandlerErr> {
    match v {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::String(s)) => Ok(vec![s.clone()]),
        Some(Value::Array(items)) => items
            .iter()
            .map(|i| {
                i.as_str()
                    .map(|s| s.to_string())
                    .ok_or_else(|| HandlerErr::bad_params("selected must be strings"))
            })
            .collect(),
        Some(_) => Err(HandlerErr::bad_params("selected must be a string or array")),
    }
}

fn handle_quizzes_grade(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_conn(state, req, |conn, params| {
        let questions = match (
            get_optional_str(params, "quizId"),
            get_optional_str(params, "resourceId"),
        ) {
            (Some(quiz_id), _) => player_questions_from_quiz(conn, &quiz_id)?,
            (None, Some(resource_id)) => player_questions_from_resource(conn, &resource_id)?,
            (None, None) => return Err(HandlerErr::bad_params("missing quizId or resourceId")),
        };
        let Some(answers) = params.get("answers").and_then(|v| v.as_array()) else {
            return Err(HandlerErr::bad_params("missing/invalid answers"));
        };

        let mut attempt = QuizAttempt::new(questions)?;
        let mut per_question = Vec::with_capacity(answers.len());
        for answer in answers {
            let Some(index) = answer.get("questionIndex").and_then(|v| v.as_u64()) else {
                return Err(HandlerErr::bad_params("questionIndex must be a non-negative integer"));
            };
            let selected = parse_selected(answer.get("selected"))?;
            per_question.push(attempt.check_at(index as usize, &selected)?);
        }
        let score = attempt.score();
        Ok(json!({
            "score": score.score,
            "total": score.total,
            "percentage": score.percentage,
            "perQuestion": per_question,
        }))
    })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "quizzes.create" => Some(handle_quizzes_create(state, req)),
        "quizzes.list" => Some(handle_quizzes_list(state, req)),
        "quizzes.get" => Some(handle_quizzes_get(state, req)),
        "quizzes.delete" => Some(handle_quizzes_delete(state, req)),
        "quizzes.grade" => Some(handle_quizzes_grade(state, req)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selected_accepts_one_or_many() {
        assert_eq!(parse_selected(Some(&json!("A"))).expect("one"), vec!["A"]);
        assert_eq!(
            parse_selected(Some(&json!(["A", "C"]))).expect("many"),
            vec!["A", "C"]
        );
        assert!(parse_selected(None).expect("none").is_empty());
        assert!(parse_selected(Some(&json!(3))).is_err());
    }
}
