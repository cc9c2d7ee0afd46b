use crate::blob::{BlobStore, FileStore};
use crate::db;
use crate::ipc::handlers::setup::{self, ResourceSettings};
use crate::ipc::handlers::uploads::store_from_path;
use crate::ipc::helpers::{
    apply_patch, begin, commit, db_err, delete_guarded, get_optional_i64, get_optional_str, get_order_items, get_patch,
    get_required_str, get_required_text, patch_nullable_text, patch_order_index, patch_text,
    query_err, reject_unknown_fields, require_row, require_session, with_conn, with_conn_or_empty, HandlerErr,
    Table,
};
use crate::ipc::types::{AppState, Request};
use crate::learning_path::{self, OrderedTable};
use crate::quiz::PlayerQuiz;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

pub const RESOURCE_TYPES: [&str; 6] = [
    "QUIZ",
    "VIDEO",
    "PRINTABLE",
    "INFOGRAPHICS",
    "SLIDES",
    "MINDMAP",
];
pub const RESOURCE_STATUSES: [&str; 3] = ["DRAFT", "REVIEW", "PUBLISHED"];
const FILTER_ALL: &str = "ALL";

const RESOURCE_COLS: &str = "r.id, r.title, r.type, r.description, r.content, r.topic_id,
    r.subtopic_id, r.layer_id, r.language, r.difficulty, r.status, r.file_url, r.file_name,
    r.file_size, r.mime_type, r.order_index, r.created_at, r.updated_at, r.created_by_id,
    r.updated_by_id, l.name, t.title";

fn resource_row(r: &Row<'_>) -> rusqlite::Result<Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "title": r.get::<_, String>(1)?,
        "type": r.get::<_, String>(2)?,
        "description": r.get::<_, Option<String>>(3)?,
        "content": r.get::<_, Option<String>>(4)?,
        "topicId": r.get::<_, String>(5)?,
        "subtopicId": r.get::<_, Option<String>>(6)?,
        "layerId": r.get::<_, String>(7)?,
        "language": r.get::<_, String>(8)?,
        "difficulty": r.get::<_, String>(9)?,
        "status": r.get::<_, String>(10)?,
        "fileUrl": r.get::<_, Option<String>>(11)?,
        "fileName": r.get::<_, Option<String>>(12)?,
        "fileSize": r.get::<_, Option<i64>>(13)?,
        "mimeType": r.get::<_, Option<String>>(14)?,
        "orderIndex": r.get::<_, i64>(15)?,
        "createdAt": r.get::<_, String>(16)?,
        "updatedAt": r.get::<_, Option<String>>(17)?,
        "createdById": r.get::<_, Option<String>>(18)?,
        "updatedById": r.get::<_, Option<String>>(19)?,
        "layerName": r.get::<_, Option<String>>(20)?,
        "topicTitle": r.get::<_, Option<String>>(21)?,
    }))
}

fn select_resources(where_clause: &str) -> String {
    format!(
        "SELECT {}
         FROM resources r
         LEFT JOIN layers l ON l.id = r.layer_id
         LEFT JOIN topics t ON t.id = r.topic_id
         {}",
        RESOURCE_COLS, where_clause
    )
}

fn load_resource(conn: &Connection, id: &str) -> Result<Value, HandlerErr> {
    conn.query_row(&select_resources("WHERE r.id = ?"), [id], resource_row)
        .optional()
        .map_err(query_err)?
        .ok_or_else(|| HandlerErr::not_found("resource"))
}

fn parse_choice(raw: &str, key: &str, allowed: &[&str]) -> Result<String, HandlerErr> {
    let v = raw.trim().to_ascii_uppercase();
    if allowed.contains(&v.as_str()) {
        Ok(v)
    } else {
        Err(HandlerErr::bad_params(format!(
            "{} must be one of: {}",
            key,
            allowed.join(", ")
        )))
    }
}

/// Quiz resources carry their questions inline; anything else is stored as given.
fn normalize_content(resource_type: &str, content: Option<&Value>) -> Result<Option<String>, HandlerErr> {
    let text = match content {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => return Ok(None),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    };
    if resource_type == "QUIZ" {
        let parsed: PlayerQuiz = serde_json::from_str(&text)
            .map_err(|e| HandlerErr::bad_params(format!("quiz content is invalid: {}", e)))?;
        if parsed.quiz.is_empty() {
            return Err(HandlerErr::bad_params("quiz content has no questions"));
        }
    }
    Ok(Some(text))
}

/// Topic, layer and subtopic must exist and the subtopic must sit under the
/// topic. With enforcement on, the layer must also be one the subtopic allows.
fn validate_placement(
    conn: &Connection,
    settings: &ResourceSettings,
    topic_id: &str,
    subtopic_id: Option<&str>,
    layer_id: &str,
) -> Result<(), HandlerErr> {
    require_row(conn, Table::Topics, topic_id)?;
    require_row(conn, Table::Layers, layer_id)?;
    let Some(subtopic_id) = subtopic_id else {
        return Ok(());
    };
    let parent: Option<String> = conn
        .query_row(
            "SELECT topic_id FROM subtopics WHERE id = ?",
            [subtopic_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(query_err)?;
    match parent {
        None => return Err(HandlerErr::not_found("subtopic")),
        Some(p) if p != topic_id => {
            return Err(HandlerErr::bad_params(
                "subtopic does not belong to the topic",
            ))
        }
        Some(_) => {}
    }
    if !settings.enforce_required_layers {
        return Ok(());
    }
    let mut stmt = conn
        .prepare("SELECT layer_id FROM subtopic_required_layers WHERE subtopic_id = ?")
        .map_err(query_err)?;
    let required = stmt
        .query_map([subtopic_id], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_err)?;
    if !required.is_empty() && !required.iter().any(|l| l == layer_id) {
        return Err(HandlerErr::new(
            "layer_not_allowed",
            "layer is not one of the subtopic's required layers",
        )
        .with_details(json!({ "requiredLayerIds": required })));
    }
    Ok(())
}

struct Attachment {
    url: String,
    name: String,
    size: i64,
    mime_type: String,
    storage_key: String,
}

fn attach_file(
    conn: &Connection,
    blobs: Option<&FileStore>,
    file: &Value,
) -> Result<Attachment, HandlerErr> {
    let Some(blobs) = blobs else {
        return Err(HandlerErr::new("no_workspace", "select a workspace first"));
    };
    if !file.is_object() {
        return Err(HandlerErr::bad_params("file must be an object"));
    }
    let source = get_required_str(file, "sourcePath")?;
    let name = get_optional_str(file, "name");
    let mime_type = get_optional_str(file, "mimeType");
    let stored = store_from_path(
        conn,
        blobs,
        None,
        &source,
        name.as_deref(),
        mime_type.as_deref(),
    )?;
    Ok(Attachment {
        url: stored.url,
        name: stored.name,
        size: stored.size,
        mime_type: stored.mime_type,
        storage_key: stored.storage_key,
    })
}

/// Stores the optional attachment and runs `write` in one transaction. On any
/// failure the uploads row rolls back and the blob is removed again.
fn write_with_attachment<T>(
    conn: &Connection,
    blobs: Option<&FileStore>,
    file: Option<&Value>,
    write: impl FnOnce(&Connection, Option<Attachment>) -> Result<T, HandlerErr>,
) -> Result<T, HandlerErr> {
    let tx = begin(conn)?;
    let attachment = match file {
        Some(file) => Some(attach_file(&tx, blobs, file)?),
        None => None,
    };
    let key = attachment.as_ref().map(|a| a.storage_key.clone());
    let result = match write(&tx, attachment) {
        Ok(v) => commit(tx).map(|_| v),
        Err(e) => Err(e),
    };
    if result.is_err() {
        if let (Some(key), Some(store)) = (key, blobs) {
            let _ = store.delete(&key);
        }
    }
    result
}

fn load_settings(conn: &Connection) -> Result<ResourceSettings, HandlerErr> {
    setup::resource_settings(conn).map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))
}

fn handle_resources_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = state.session.clone();
    let blobs = state.blobs.clone();
    with_conn(state, req, |conn, params| {
        let user = require_session(session)?;
        let settings = load_settings(conn)?;

        let title = get_required_text(params, "title")?;
        let resource_type = parse_choice(&get_required_str(params, "type")?, "type", &RESOURCE_TYPES)?;
        let status = match get_optional_str(params, "status") {
            Some(s) => parse_choice(&s, "status", &RESOURCE_STATUSES)?,
            None => "DRAFT".to_string(),
        };
        let topic_id = get_required_str(params, "topicId")?;
        let subtopic_id = get_optional_str(params, "subtopicId");
        let layer_id = get_required_str(params, "layerId")?;
        let description = get_optional_str(params, "description");
        let content = normalize_content(&resource_type, params.get("content"))?;
        let language = get_optional_str(params, "language").unwrap_or_else(|| settings.default_language.clone());
        let difficulty =
            get_optional_str(params, "difficulty").unwrap_or_else(|| settings.default_difficulty.clone());
        let order_index = get_optional_i64(params, "orderIndex")?.unwrap_or(0);
        if order_index < 0 {
            return Err(HandlerErr::bad_params("orderIndex must not be negative"));
        }
        validate_placement(conn, &settings, &topic_id, subtopic_id.as_deref(), &layer_id)?;

        let file = params.get("file").filter(|f| !f.is_null());
        let id = Uuid::new_v4().to_string();
        let now = db::now_rfc3339();
        write_with_attachment(conn, blobs.as_ref(), file, |tx, attachment| {
            tx.execute(
                "INSERT INTO resources(
                    id, title, type, description, content, topic_id, subtopic_id, layer_id,
                    language, difficulty, status, file_url, file_name, file_size, mime_type,
                    order_index, created_at, updated_at, created_by_id, updated_by_id
                 ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params_from_iter([
                    SqlValue::Text(id.clone()),
                    SqlValue::Text(title),
                    SqlValue::Text(resource_type.clone()),
                    opt_text(description),
                    opt_text(content),
                    SqlValue::Text(topic_id.clone()),
                    opt_text(subtopic_id),
                    SqlValue::Text(layer_id.clone()),
                    SqlValue::Text(language),
                    SqlValue::Text(difficulty),
                    SqlValue::Text(status),
                    opt_text(attachment.as_ref().map(|a| a.url.clone())),
                    opt_text(attachment.as_ref().map(|a| a.name.clone())),
                    attachment
                        .as_ref()
                        .map(|a| SqlValue::Integer(a.size))
                        .unwrap_or(SqlValue::Null),
                    opt_text(attachment.as_ref().map(|a| a.mime_type.clone())),
                    SqlValue::Integer(order_index),
                    SqlValue::Text(now.clone()),
                    SqlValue::Text(now),
                    SqlValue::Text(user.id.clone()),
                    SqlValue::Text(user.id.clone()),
                ]),
            )
            .map_err(db_err("db_insert_failed", "resources"))
        })?;
        info!(resource_id = %id, resource_type = %resource_type, topic_id = %topic_id, layer_id = %layer_id, "resource created");
        Ok(json!({ "resource": load_resource(conn, &id)? }))
    })
}

fn opt_text(v: Option<String>) -> SqlValue {
    v.map(SqlValue::Text).unwrap_or(SqlValue::Null)
}

fn handle_resources_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = state.session.clone();
    let blobs = state.blobs.clone();
    with_conn(state, req, |conn, params| {
        let user = require_session(session)?;
        let settings = load_settings(conn)?;
        let id = get_required_str(params, "resourceId")?;
        let patch = get_patch(params)?;
        reject_unknown_fields(
            patch,
            &[
                "title",
                "type",
                "description",
                "content",
                "topicId",
                "subtopicId",
                "layerId",
                "language",
                "difficulty",
                "status",
                "orderIndex",
                "file",
            ],
        )?;

        let current: Option<(String, String, Option<String>, String)> = conn
            .query_row(
                "SELECT type, topic_id, subtopic_id, layer_id FROM resources WHERE id = ?",
                [&id],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
            )
            .optional()
            .map_err(query_err)?;
        let Some((cur_type, cur_topic, cur_subtopic, cur_layer)) = current else {
            return Err(HandlerErr::not_found("resource"));
        };

        let mut sets: Vec<(&'static str, SqlValue)> = Vec::new();
        if let Some(title) = patch_text(patch, "title")? {
            sets.push(("title", SqlValue::Text(title)));
        }
        let resource_type = match patch_text(patch, "type")? {
            Some(t) => {
                let t = parse_choice(&t, "type", &RESOURCE_TYPES)?;
                sets.push(("type", SqlValue::Text(t.clone())));
                t
            }
            None => cur_type,
        };
        if let Some(s) = patch_text(patch, "status")? {
            sets.push(("status", SqlValue::Text(parse_choice(&s, "status", &RESOURCE_STATUSES)?)));
        }
        if let Some(description) = patch_nullable_text(patch, "description")? {
            sets.push(("description", description));
        }
        if patch.contains_key("content") {
            let content = normalize_content(&resource_type, patch.get("content"))?;
            sets.push(("content", opt_text(content)));
        }
        if let Some(language) = patch_text(patch, "language")? {
            sets.push(("language", SqlValue::Text(language)));
        }
        if let Some(difficulty) = patch_text(patch, "difficulty")? {
            sets.push(("difficulty", SqlValue::Text(difficulty)));
        }
        if let Some(n) = patch_order_index(patch)? {
            sets.push(("order_index", SqlValue::Integer(n)));
        }

        let topic_id = patch_text(patch, "topicId")?.unwrap_or(cur_topic);
        let subtopic_id = match patch_nullable_text(patch, "subtopicId")? {
            Some(SqlValue::Text(s)) => Some(s),
            Some(_) => None,
            None => cur_subtopic,
        };
        let layer_id = patch_text(patch, "layerId")?.unwrap_or(cur_layer);
        validate_placement(conn, &settings, &topic_id, subtopic_id.as_deref(), &layer_id)?;
        sets.push(("topic_id", SqlValue::Text(topic_id)));
        sets.push(("subtopic_id", opt_text(subtopic_id)));
        sets.push(("layer_id", SqlValue::Text(layer_id)));

        let file = match patch.get("file") {
            Some(Value::Null) => {
                for col in ["file_url", "file_name", "file_size", "mime_type"] {
                    sets.push((col, SqlValue::Null));
                }
                None
            }
            other => other,
        };

        sets.push(("updated_at", SqlValue::Text(db::now_rfc3339())));
        sets.push(("updated_by_id", SqlValue::Text(user.id.clone())));
        write_with_attachment(conn, blobs.as_ref(), file, |tx, attachment| {
            if let Some(a) = attachment {
                sets.push(("file_url", SqlValue::Text(a.url)));
                sets.push(("file_name", SqlValue::Text(a.name)));
                sets.push(("file_size", SqlValue::Integer(a.size)));
                sets.push(("mime_type", SqlValue::Text(a.mime_type)));
            }
            apply_patch(tx, Table::Resources, &id, sets)
        })?;
        info!(resource_id = %id, user_id = %user.id, "resource updated");
        Ok(json!({ "resource": load_resource(conn, &id)? }))
    })
}

fn user_ref(conn: &Connection, id: Option<&str>) -> Result<Value, HandlerErr> {
    let Some(id) = id else {
        return Ok(Value::Null);
    };
    let row = conn
        .query_row(
            "SELECT id, name, email FROM users WHERE id = ?",
            [id],
            |r| {
                Ok(json!({
                    "id": r.get::<_, String>(0)?,
                    "name": r.get::<_, Option<String>>(1)?,
                    "email": r.get::<_, String>(2)?,
                }))
            },
        )
        .optional()
        .map_err(query_err)?;
    Ok(row.unwrap_or(Value::Null))
}

/// topic → chapter → subject → class, nearest first.
fn breadcrumb(conn: &Connection, topic_id: &str) -> Result<Value, HandlerErr> {
    let crumb = conn
        .query_row(
            "SELECT t.id, t.title, ch.id, ch.title, s.id, s.name, c.id, c.name
             FROM topics t
             JOIN chapters ch ON ch.id = t.chapter_id
             JOIN subjects s ON s.id = ch.subject_id
             JOIN classes c ON c.id = s.class_id
             WHERE t.id = ?",
            [topic_id],
            |r| {
                Ok(json!({
                    "topic": { "id": r.get::<_, String>(0)?, "title": r.get::<_, String>(1)? },
                    "chapter": { "id": r.get::<_, String>(2)?, "title": r.get::<_, String>(3)? },
                    "subject": { "id": r.get::<_, String>(4)?, "name": r.get::<_, String>(5)? },
                    "class": { "id": r.get::<_, String>(6)?, "name": r.get::<_, String>(7)? },
                }))
            },
        )
        .optional()
        .map_err(query_err)?;
    crumb.ok_or_else(|| HandlerErr::not_found("topic"))
}

fn handle_resources_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_conn(state, req, |conn, params| {
        let id = get_required_str(params, "resourceId")?;
        let mut resource = load_resource(conn, &id)?;
        let topic_id = resource["topicId"].as_str().unwrap_or_default().to_string();
        resource["breadcrumb"] = breadcrumb(conn, &topic_id)?;
        resource["subtopic"] = match resource["subtopicId"].as_str() {
            Some(sid) => conn
                .query_row(
                    "SELECT id, title FROM subtopics WHERE id = ?",
                    [sid],
                    |r| {
                        Ok(json!({
                            "id": r.get::<_, String>(0)?,
                            "title": r.get::<_, String>(1)?,
                        }))
                    },
                )
                .optional()
                .map_err(query_err)?
                .unwrap_or(Value::Null),
            None => Value::Null,
        };
        resource["layer"] = json!({
            "id": resource["layerId"].clone(),
            "name": resource["layerName"].clone(),
        });
        resource["createdBy"] = user_ref(conn, resource["createdById"].as_str())?;
        resource["updatedBy"] = user_ref(conn, resource["updatedById"].as_str())?;
        Ok(json!({ "resource": resource }))
    })
}

fn filter_value(params: &Value, key: &str) -> Option<String> {
    get_optional_str(params, key).filter(|v| !v.eq_ignore_ascii_case(FILTER_ALL))
}

fn like_pattern(term: &str) -> String {
    let escaped = term
        .to_lowercase()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

fn handle_resources_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_conn_or_empty(state, req, "resources", |conn, params| {
        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<SqlValue> = Vec::new();

        if let Some(t) = filter_value(params, "type") {
            clauses.push("r.type = ?");
            values.push(SqlValue::Text(t.to_ascii_uppercase()));
        }
        if let Some(s) = filter_value(params, "status") {
            clauses.push("r.status = ?");
            values.push(SqlValue::Text(s.to_ascii_uppercase()));
        }
        if let Some(l) = filter_value(params, "layerId") {
            clauses.push("r.layer_id = ?");
            values.push(SqlValue::Text(l));
        }
        let topic = filter_value(params, "topicId");
        let subtopic = filter_value(params, "subtopicId");
        if let Some(t) = &topic {
            clauses.push("r.topic_id = ?");
            values.push(SqlValue::Text(t.clone()));
        }
        if let Some(s) = &subtopic {
            clauses.push("r.subtopic_id = ?");
            values.push(SqlValue::Text(s.clone()));
        }
        if topic.is_none() && subtopic.is_none() {
            if let Some(subject) = filter_value(params, "subjectId") {
                clauses.push(
                    "r.topic_id IN (SELECT t2.id FROM topics t2
                     JOIN chapters ch ON ch.id = t2.chapter_id
                     WHERE ch.subject_id = ?)",
                );
                values.push(SqlValue::Text(subject));
            } else if let Some(class) = filter_value(params, "classId") {
                clauses.push(
                    "r.topic_id IN (SELECT t2.id FROM topics t2
                     JOIN chapters ch ON ch.id = t2.chapter_id
                     JOIN subjects s ON s.id = ch.subject_id
                     WHERE s.class_id = ?)",
                );
                values.push(SqlValue::Text(class));
            }
        }
        if let Some(term) = get_optional_str(params, "search") {
            clauses.push(
                "(lower(r.title) LIKE ? ESCAPE '\\' OR lower(COALESCE(r.description, '')) LIKE ? ESCAPE '\\')",
            );
            let pattern = like_pattern(&term);
            values.push(SqlValue::Text(pattern.clone()));
            values.push(SqlValue::Text(pattern));
        }

        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let sql = format!(
            "{} ORDER BY r.created_at DESC, r.id",
            select_resources(&where_clause)
        );
        let mut stmt = conn.prepare(&sql).map_err(query_err)?;
        let rows = stmt
            .query_map(params_from_iter(values), resource_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(query_err)?;
        Ok(json!({ "resources": rows }))
    })
}

fn handle_resources_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = state.session.clone();
    with_conn(state, req, |conn, params| {
        let user = require_session(session)?;
        let id = get_required_str(params, "resourceId")?;
        delete_guarded(conn, Table::Resources, &id, &[], &[])?;
        info!(resource_id = %id, user_id = %user.id, "resource deleted");
        Ok(json!({ "ok": true }))
    })
}

fn handle_resources_reorder(state: &mut AppState, req: &Request) -> serde_json::Value {
    let updated_by = state.session.as_ref().map(|u| u.id.clone());
    with_conn(state, req, |conn, params| {
        let items = get_order_items(params)?;
        learning_path::persist_order(
            conn,
            OrderedTable::Resources,
            None,
            updated_by.as_deref(),
            &items,
        )?;
        Ok(json!({ "ok": true, "count": items.len() }))
    })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "resources.create" => Some(handle_resources_create(state, req)),
        "resources.update" => Some(handle_resources_update(state, req)),
        "resources.get" => Some(handle_resources_get(state, req)),
        "resources.list" => Some(handle_resources_list(state, req)),
        "resources.delete" => Some(handle_resources_delete(state, req)),
        "resources.reorder" => Some(handle_resources_reorder(state, req)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::handlers::core::select_workspace;
    use crate::session;
    use std::path::{Path, PathBuf};
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_dir(prefix: &str) -> PathBuf {
        let p = std::env::temp_dir().join(format!(
            "{}-{}",
            prefix,
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        std::fs::create_dir_all(&p).expect("create temp dir");
        p
    }

    fn logged_in_workspace(dir: &Path) -> AppState {
        let mut state = AppState::default();
        select_workspace(&mut state, dir).expect("select");
        let conn = state.db.as_ref().expect("db");
        conn.execute_batch(
            "INSERT INTO classes(id, name, created_at) VALUES('c1', 'Grade 8', '2024-01-01T00:00:00.000Z');
             INSERT INTO subjects(id, class_id, name, created_at) VALUES('s1', 'c1', 'Math', '2024-01-01T00:00:00.000Z');
             INSERT INTO chapters(id, subject_id, title, created_at) VALUES('ch1', 's1', 'Algebra', '2024-01-01T00:00:00.000Z');
             INSERT INTO topics(id, chapter_id, title, created_at) VALUES('t1', 'ch1', 'Equations', '2024-01-01T00:00:00.000Z');
             INSERT INTO layers(id, name, created_at) VALUES('l1', 'Foundation', '2024-01-01T00:00:00.000Z');",
        )
        .expect("seed");
        let user = session::create_user(conn, "teacher@school.org", None, "secret1").expect("user");
        state.session = Some(user);
        state
    }

    fn call(state: &mut AppState, method: &str, params: Value) -> Value {
        let req = Request {
            id: "1".into(),
            method: method.into(),
            params,
        };
        try_handle(state, &req).expect("handled")
    }

    fn stored_files(dir: &Path) -> usize {
        std::fs::read_dir(dir)
            .expect("read dir")
            .map(|e| e.expect("entry").path())
            .map(|p| if p.is_dir() { stored_files(&p) } else { 1 })
            .sum()
    }

    fn upload_rows(state: &AppState) -> i64 {
        state
            .db
            .as_ref()
            .expect("db")
            .query_row("SELECT COUNT(*) FROM uploads", [], |r| r.get(0))
            .expect("count")
    }

    #[test]
    fn failed_resource_insert_discards_the_attachment() {
        let workspace = temp_dir("learnpath-attach-insert");
        let scratch = temp_dir("learnpath-attach-insert-src");
        let source = scratch.join("worksheet.pdf");
        std::fs::write(&source, b"%PDF worksheet").expect("write source");
        let mut state = logged_in_workspace(&workspace);
        state
            .db
            .as_ref()
            .expect("db")
            .execute_batch(
                "CREATE TRIGGER fail_resource_insert BEFORE INSERT ON resources
                 BEGIN SELECT RAISE(ABORT, 'simulated failure'); END;",
            )
            .expect("trigger");

        let resp = call(
            &mut state,
            "resources.create",
            json!({
                "title": "Worksheet",
                "type": "PRINTABLE",
                "topicId": "t1",
                "layerId": "l1",
                "file": { "sourcePath": source.to_string_lossy() }
            }),
        );
        assert_eq!(resp["ok"], json!(false));
        assert_eq!(resp["error"]["code"], json!("db_insert_failed"));
        assert_eq!(upload_rows(&state), 0);
        assert_eq!(stored_files(&workspace.join("uploads")), 0);

        let _ = std::fs::remove_dir_all(workspace);
        let _ = std::fs::remove_dir_all(scratch);
    }

    #[test]
    fn failed_resource_update_discards_the_attachment() {
        let workspace = temp_dir("learnpath-attach-update");
        let scratch = temp_dir("learnpath-attach-update-src");
        let source = scratch.join("slides.pdf");
        std::fs::write(&source, b"%PDF slides").expect("write source");
        let mut state = logged_in_workspace(&workspace);

        let created = call(
            &mut state,
            "resources.create",
            json!({ "title": "Slides", "type": "SLIDES", "topicId": "t1", "layerId": "l1" }),
        );
        assert_eq!(created["ok"], json!(true), "{}", created);
        let id = created["result"]["resource"]["id"]
            .as_str()
            .expect("id")
            .to_string();
        state
            .db
            .as_ref()
            .expect("db")
            .execute_batch(
                "CREATE TRIGGER fail_resource_update BEFORE UPDATE ON resources
                 BEGIN SELECT RAISE(ABORT, 'simulated failure'); END;",
            )
            .expect("trigger");

        let resp = call(
            &mut state,
            "resources.update",
            json!({ "resourceId": id, "patch": { "file": { "sourcePath": source.to_string_lossy() } } }),
        );
        assert_eq!(resp["ok"], json!(false));
        assert_eq!(upload_rows(&state), 0);
        assert_eq!(stored_files(&workspace.join("uploads")), 0);

        let _ = std::fs::remove_dir_all(workspace);
        let _ = std::fs::remove_dir_all(scratch);
    }

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("Linear"), "%linear%");
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
    }

    #[test]
    fn quiz_content_must_hold_questions() {
        let ok = json!({ "quiz": [{ "question": "2+2?", "answerOptions": [
            { "text": "4", "isCorrect": true }, { "text": "5", "isCorrect": false }
        ] }] });
        assert!(normalize_content("QUIZ", Some(&ok)).expect("valid").is_some());
        assert!(normalize_content("QUIZ", Some(&json!({ "quiz": [] }))).is_err());
        assert!(normalize_content("QUIZ", Some(&json!("not json"))).is_err());
        assert_eq!(
            normalize_content("VIDEO", Some(&json!("notes"))).expect("text"),
            Some("notes".to_string())
        );
        assert_eq!(normalize_content("VIDEO", Some(&json!("  "))).expect("blank"), None);
    }

    #[test]
    fn choices_are_case_insensitive() {
        assert_eq!(parse_choice("video", "type", &RESOURCE_TYPES).expect("ok"), "VIDEO");
        assert_eq!(
            parse_choice("PODCAST", "type", &RESOURCE_TYPES).err().map(|e| e.code),
            Some("bad_params")
        );
    }
}
