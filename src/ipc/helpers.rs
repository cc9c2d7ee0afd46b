use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::learning_path::{LearningPathError, OrderItem};
use crate::quiz::QuizError;
use crate::session::{SessionError, SessionUser};
use crate::uploads::UploadError;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::json;
use tracing::{info, warn};

#[derive(Debug)]
pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn not_found(what: &str) -> Self {
        Self::new("not_found", format!("{} not found", what))
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<LearningPathError> for HandlerErr {
    fn from(e: LearningPathError) -> Self {
        Self::new(e.code(), e.to_string())
    }
}

impl From<UploadError> for HandlerErr {
    fn from(e: UploadError) -> Self {
        Self::new(e.code(), e.to_string())
    }
}

impl From<SessionError> for HandlerErr {
    fn from(e: SessionError) -> Self {
        Self::new(e.code(), e.to_string())
    }
}

impl From<QuizError> for HandlerErr {
    fn from(e: QuizError) -> Self {
        Self::bad_params(e.to_string())
    }
}

/// Maps a rusqlite failure onto the given error code, tagging the table.
pub fn db_err(code: &'static str, table: &'static str) -> impl Fn(rusqlite::Error) -> HandlerErr {
    move |e| HandlerErr::new(code, e.to_string()).with_details(json!({ "table": table }))
}

pub fn query_err(e: rusqlite::Error) -> HandlerErr {
    HandlerErr::new("db_query_failed", e.to_string())
}

/// Runs `f` against the open workspace and wraps the outcome into a response.
pub fn with_conn<F>(state: &AppState, req: &Request, f: F) -> serde_json::Value
where
    F: FnOnce(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
{
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    respond(req, f(conn, &req.params))
}

/// List methods answer with an empty list before a workspace is selected.
pub fn with_conn_or_empty<F>(
    state: &AppState,
    req: &Request,
    key: &str,
    f: F,
) -> serde_json::Value
where
    F: FnOnce(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
{
    if state.db.is_none() {
        let mut out = serde_json::Map::new();
        out.insert(key.to_string(), json!([]));
        return ok(&req.id, serde_json::Value::Object(out));
    }
    with_conn(state, req, f)
}

pub fn respond(req: &Request, result: Result<serde_json::Value, HandlerErr>) -> serde_json::Value {
    match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => {
            warn!(method = %req.method, code = e.code, message = %e.message, "request failed");
            e.response(&req.id)
        }
    }
}

/// Resource mutations record who made them, so they need a logged-in user.
pub fn require_session(session: Option<SessionUser>) -> Result<SessionUser, HandlerErr> {
    session.ok_or_else(|| HandlerErr::new("not_authenticated", "log in first"))
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

/// Trimmed, non-empty text field.
pub fn get_required_text(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    let v = get_required_str(params, key)?;
    let v = v.trim();
    if v.is_empty() {
        return Err(HandlerErr::bad_params(format!("{} must not be empty", key)));
    }
    Ok(v.to_string())
}

/// Absent, null and blank strings all read as None.
pub fn get_optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

pub fn get_optional_i64(params: &serde_json::Value, key: &str) -> Result<Option<i64>, HandlerErr> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => v
            .as_i64()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be an integer", key))),
    }
}

pub fn get_string_list(
    params: &serde_json::Value,
    key: &str,
) -> Result<Option<Vec<String>>, HandlerErr> {
    let Some(v) = params.get(key) else {
        return Ok(None);
    };
    if v.is_null() {
        return Ok(None);
    }
    let Some(arr) = v.as_array() else {
        return Err(HandlerErr::bad_params(format!("{} must be an array", key)));
    };
    let mut out = Vec::with_capacity(arr.len());
    for item in arr {
        let Some(s) = item.as_str() else {
            return Err(HandlerErr::bad_params(format!("{} must be strings", key)));
        };
        out.push(s.to_string());
    }
    Ok(Some(out))
}

pub fn get_patch(params: &serde_json::Value) -> Result<&serde_json::Map<String, serde_json::Value>, HandlerErr> {
    params
        .get("patch")
        .and_then(|v| v.as_object())
        .ok_or_else(|| HandlerErr::bad_params("patch must be an object"))
}

/// `[{id, orderIndex}]` batch used by every reorder method.
pub fn get_order_items(params: &serde_json::Value) -> Result<Vec<OrderItem>, HandlerErr> {
    let Some(arr) = params.get("items").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing/invalid items"));
    };
    let mut items = Vec::with_capacity(arr.len());
    for v in arr {
        let item: OrderItem = serde_json::from_value(v.clone())
            .map_err(|_| HandlerErr::bad_params("items must be {id, orderIndex}"))?;
        if item.order_index < 0 {
            return Err(HandlerErr::bad_params("orderIndex must not be negative"));
        }
        items.push(item);
    }
    Ok(items)
}

/// Tables addressable by id from handlers. Kept as a closed list because the
/// name is spliced into SQL.
#[derive(Debug, Clone, Copy)]
pub enum Table {
    Classes,
    Subjects,
    Chapters,
    Topics,
    Subtopics,
    Layers,
    Resources,
    Quizzes,
}

impl Table {
    pub fn name(self) -> &'static str {
        match self {
            Self::Classes => "classes",
            Self::Subjects => "subjects",
            Self::Chapters => "chapters",
            Self::Topics => "topics",
            Self::Subtopics => "subtopics",
            Self::Layers => "layers",
            Self::Resources => "resources",
            Self::Quizzes => "quizzes",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Classes => "class",
            Self::Subjects => "subject",
            Self::Chapters => "chapter",
            Self::Topics => "topic",
            Self::Subtopics => "subtopic",
            Self::Layers => "layer",
            Self::Resources => "resource",
            Self::Quizzes => "quiz",
        }
    }
}

pub fn row_exists(conn: &Connection, table: Table, id: &str) -> Result<bool, HandlerErr> {
    let sql = format!("SELECT 1 FROM {} WHERE id = ?", table.name());
    conn.query_row(&sql, [id], |r| r.get::<_, i64>(0))
        .optional()
        .map(|v| v.is_some())
        .map_err(query_err)
}

pub fn require_row(conn: &Connection, table: Table, id: &str) -> Result<(), HandlerErr> {
    if row_exists(conn, table, id)? {
        Ok(())
    } else {
        Err(HandlerErr::not_found(table.label()))
    }
}

pub fn count_where(conn: &Connection, table: &str, column: &str, id: &str) -> Result<i64, HandlerErr> {
    let sql = format!("SELECT COUNT(*) FROM {} WHERE {} = ?", table, column);
    conn.query_row(&sql, [id], |r| r.get(0)).map_err(query_err)
}

pub fn begin(conn: &Connection) -> Result<rusqlite::Transaction<'_>, HandlerErr> {
    conn.unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))
}

pub fn commit(tx: rusqlite::Transaction<'_>) -> Result<(), HandlerErr> {
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))
}

/// Deletes one row unless dependents still reference it. `links` are join
/// tables keyed by the same id; their rows go in the same transaction.
pub fn delete_guarded(
    conn: &Connection,
    table: Table,
    id: &str,
    dependents: &[(&str, &str)],
    links: &[(&str, &str)],
) -> Result<(), HandlerErr> {
    require_row(conn, table, id)?;
    let mut counts = serde_json::Map::new();
    let mut total = 0;
    for (dep_table, column) in dependents {
        let n = count_where(conn, dep_table, column, id)?;
        if n > 0 {
            counts.insert(dep_table.to_string(), json!(n));
            total += n;
        }
    }
    if total > 0 {
        return Err(HandlerErr::new(
            "conflict",
            format!(
                "{} is still referenced by {} record(s)",
                table.label(),
                total
            ),
        )
        .with_details(json!({ "count": total, "dependents": counts })));
    }

    let tx = begin(conn)?;
    for (link_table, column) in links {
        tx.execute(
            &format!("DELETE FROM {} WHERE {} = ?", link_table, column),
            [id],
        )
        .map_err(|e| {
            HandlerErr::new("db_delete_failed", e.to_string())
                .with_details(json!({ "table": link_table }))
        })?;
    }
    tx.execute(&format!("DELETE FROM {} WHERE id = ?", table.name()), [id])
        .map_err(db_err("db_delete_failed", table.name()))?;
    commit(tx)?;
    info!(table = table.name(), id, "deleted");
    Ok(())
}

/// Next free slot among siblings: `max(order_index) + 1`, or 0 for the first.
pub fn next_order_index(
    conn: &Connection,
    table: Table,
    parent_column: &str,
    parent_id: &str,
) -> Result<i64, HandlerErr> {
    let sql = format!(
        "SELECT COALESCE(MAX(order_index) + 1, 0) FROM {} WHERE {} = ?",
        table.name(),
        parent_column
    );
    conn.query_row(&sql, [parent_id], |r| r.get(0))
        .map_err(query_err)
}

pub fn reject_unknown_fields(
    patch: &serde_json::Map<String, serde_json::Value>,
    allowed: &[&str],
) -> Result<(), HandlerErr> {
    match patch.keys().find(|k| !allowed.contains(&k.as_str())) {
        Some(k) => Err(HandlerErr::bad_params(format!("unknown field: {}", k))),
        None => Ok(()),
    }
}

/// `UPDATE <table> SET a = ?, b = ? WHERE id = ?` for the collected columns.
pub fn apply_patch(
    conn: &Connection,
    table: Table,
    id: &str,
    sets: Vec<(&'static str, Value)>,
) -> Result<(), HandlerErr> {
    if sets.is_empty() {
        return Ok(());
    }
    let assignments: Vec<String> = sets.iter().map(|(c, _)| format!("{} = ?", c)).collect();
    let sql = format!(
        "UPDATE {} SET {} WHERE id = ?",
        table.name(),
        assignments.join(", ")
    );
    let mut values: Vec<Value> = sets.into_iter().map(|(_, v)| v).collect();
    values.push(Value::Text(id.to_string()));
    conn.execute(&sql, params_from_iter(values))
        .map_err(db_err("db_update_failed", table.name()))?;
    Ok(())
}

pub fn patch_text(
    patch: &serde_json::Map<String, serde_json::Value>,
    key: &str,
) -> Result<Option<String>, HandlerErr> {
    match patch.get(key) {
        None => Ok(None),
        Some(v) => {
            let s = v
                .as_str()
                .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a string", key)))?
                .trim();
            if s.is_empty() {
                return Err(HandlerErr::bad_params(format!("{} must not be empty", key)));
            }
            Ok(Some(s.to_string()))
        }
    }
}

/// Nullable text: null or blank clears the column.
pub fn patch_nullable_text(
    patch: &serde_json::Map<String, serde_json::Value>,
    key: &str,
) -> Result<Option<Value>, HandlerErr> {
    match patch.get(key) {
        None => Ok(None),
        Some(serde_json::Value::Null) => Ok(Some(Value::Null)),
        Some(v) => {
            let s = v
                .as_str()
                .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a string or null", key)))?
                .trim();
            if s.is_empty() {
                Ok(Some(Value::Null))
            } else {
                Ok(Some(Value::Text(s.to_string())))
            }
        }
    }
}

pub fn patch_i64(
    patch: &serde_json::Map<String, serde_json::Value>,
    key: &str,
) -> Result<Option<i64>, HandlerErr> {
    match patch.get(key) {
        None => Ok(None),
        Some(v) => v
            .as_i64()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be an integer", key))),
    }
}

pub fn patch_order_index(
    patch: &serde_json::Map<String, serde_json::Value>,
) -> Result<Option<i64>, HandlerErr> {
    let v = patch_i64(patch, "orderIndex")?;
    if v.is_some_and(|n| n < 0) {
        return Err(HandlerErr::bad_params("orderIndex must not be negative"));
    }
    Ok(v)
}
