use crate::db;
use crate::ipc::helpers::{
    apply_patch, begin, commit, db_err, delete_guarded, get_optional_i64, get_optional_str,
    get_patch, get_required_str, get_required_text, get_string_list, next_order_index,
    patch_nullable_text, patch_order_index, patch_text, query_err, reject_unknown_fields,
    require_row, with_conn, with_conn_or_empty, HandlerErr, Table,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

const CLASS_COLS: &str = "id, name, created_at";
const SUBJECT_COLS: &str = "id, class_id, name, board, created_at";
const CHAPTER_COLS: &str = "id, subject_id, title, order_index, created_at";
const TOPIC_COLS: &str = "id, chapter_id, title, order_index, created_at";
const SUBTOPIC_COLS: &str = "id, topic_id, title, description, order_index, created_at";

fn class_row(r: &Row<'_>) -> rusqlite::Result<Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "name": r.get::<_, String>(1)?,
        "createdAt": r.get::<_, String>(2)?,
    }))
}

fn subject_row(r: &Row<'_>) -> rusqlite::Result<Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "classId": r.get::<_, String>(1)?,
        "name": r.get::<_, String>(2)?,
        "board": r.get::<_, Option<String>>(3)?,
        "createdAt": r.get::<_, String>(4)?,
    }))
}

fn chapter_row(r: &Row<'_>) -> rusqlite::Result<Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "subjectId": r.get::<_, String>(1)?,
        "title": r.get::<_, String>(2)?,
        "orderIndex": r.get::<_, i64>(3)?,
        "createdAt": r.get::<_, String>(4)?,
    }))
}

fn topic_row(r: &Row<'_>) -> rusqlite::Result<Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "chapterId": r.get::<_, String>(1)?,
        "title": r.get::<_, String>(2)?,
        "orderIndex": r.get::<_, i64>(3)?,
        "createdAt": r.get::<_, String>(4)?,
    }))
}

fn subtopic_row(r: &Row<'_>) -> rusqlite::Result<Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "topicId": r.get::<_, String>(1)?,
        "title": r.get::<_, String>(2)?,
        "description": r.get::<_, Option<String>>(3)?,
        "orderIndex": r.get::<_, i64>(4)?,
        "createdAt": r.get::<_, String>(5)?,
    }))
}

fn load_one(
    conn: &Connection,
    table: Table,
    cols: &str,
    id: &str,
    map: fn(&Row<'_>) -> rusqlite::Result<Value>,
) -> Result<Value, HandlerErr> {
    let sql = format!("SELECT {} FROM {} WHERE id = ?", cols, table.name());
    conn.query_row(&sql, [id], map)
        .optional()
        .map_err(query_err)?
        .ok_or_else(|| HandlerErr::not_found(table.label()))
}

fn load_children(
    conn: &Connection,
    table: Table,
    cols: &str,
    parent_column: &str,
    parent_id: &str,
    order_by: &str,
    map: fn(&Row<'_>) -> rusqlite::Result<Value>,
) -> Result<Vec<Value>, HandlerErr> {
    let sql = format!(
        "SELECT {} FROM {} WHERE {} = ? ORDER BY {}",
        cols,
        table.name(),
        parent_column,
        order_by
    );
    let mut stmt = conn.prepare(&sql).map_err(query_err)?;
    let rows = stmt
        .query_map([parent_id], map)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_err)?;
    Ok(rows)
}

fn string_column(conn: &Connection, sql: &str, id: &str) -> Result<Vec<String>, HandlerErr> {
    let mut stmt = conn.prepare(sql).map_err(query_err)?;
    let rows = stmt
        .query_map([id], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_err)?;
    Ok(rows)
}

fn required_layer_ids(conn: &Connection, subtopic_id: &str) -> Result<Vec<String>, HandlerErr> {
    string_column(
        conn,
        "SELECT srl.layer_id
         FROM subtopic_required_layers srl
         JOIN layers l ON l.id = srl.layer_id
         WHERE srl.subtopic_id = ?
         ORDER BY l.name",
        subtopic_id,
    )
}

fn resource_layer_ids(conn: &Connection, subtopic_id: &str) -> Result<Vec<String>, HandlerErr> {
    string_column(
        conn,
        "SELECT DISTINCT layer_id FROM resources WHERE subtopic_id = ? ORDER BY layer_id",
        subtopic_id,
    )
}

/// Replaces the subtopic's required-layer set. Runs inside the caller's
/// transaction.
fn set_required_layers(
    conn: &Connection,
    subtopic_id: &str,
    layer_ids: &[String],
) -> Result<(), HandlerErr> {
    conn.execute(
        "DELETE FROM subtopic_required_layers WHERE subtopic_id = ?",
        [subtopic_id],
    )
    .map_err(db_err("db_delete_failed", "subtopic_required_layers"))?;
    for layer_id in layer_ids {
        require_row(conn, Table::Layers, layer_id)?;
        conn.execute(
            "INSERT OR IGNORE INTO subtopic_required_layers(subtopic_id, layer_id) VALUES(?, ?)",
            (subtopic_id, layer_id),
        )
        .map_err(db_err("db_insert_failed", "subtopic_required_layers"))?;
    }
    Ok(())
}

fn load_subtopic(conn: &Connection, id: &str) -> Result<Value, HandlerErr> {
    let mut subtopic = load_one(conn, Table::Subtopics, SUBTOPIC_COLS, id, subtopic_row)?;
    subtopic["requiredLayerIds"] = json!(required_layer_ids(conn, id)?);
    Ok(subtopic)
}

fn subtopics_of(conn: &Connection, topic_id: &str, with_resources: bool) -> Result<Vec<Value>, HandlerErr> {
    let mut subtopics = load_children(
        conn,
        Table::Subtopics,
        SUBTOPIC_COLS,
        "topic_id",
        topic_id,
        "order_index, created_at",
        subtopic_row,
    )?;
    for s in subtopics.iter_mut() {
        let id = s["id"].as_str().unwrap_or_default().to_string();
        s["requiredLayerIds"] = json!(required_layer_ids(conn, &id)?);
        if with_resources {
            s["resourceLayerIds"] = json!(resource_layer_ids(conn, &id)?);
        }
    }
    Ok(subtopics)
}

/// Chapters of a subject with their topics and subtopics, each level by orderIndex.
fn chapter_tree(conn: &Connection, subject_id: &str) -> Result<Vec<Value>, HandlerErr> {
    let mut chapters = load_children(
        conn,
        Table::Chapters,
        CHAPTER_COLS,
        "subject_id",
        subject_id,
        "order_index, created_at",
        chapter_row,
    )?;
    for chapter in chapters.iter_mut() {
        let chapter_id = chapter["id"].as_str().unwrap_or_default().to_string();
        let mut topics = load_children(
            conn,
            Table::Topics,
            TOPIC_COLS,
            "chapter_id",
            &chapter_id,
            "order_index, created_at",
            topic_row,
        )?;
        for topic in topics.iter_mut() {
            let topic_id = topic["id"].as_str().unwrap_or_default().to_string();
            topic["subtopics"] = json!(subtopics_of(conn, &topic_id, true)?);
        }
        chapter["topics"] = json!(topics);
    }
    Ok(chapters)
}

fn handle_classes_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_conn_or_empty(state, req, "classes", |conn, _| {
        let mut stmt = conn
            .prepare(&format!("SELECT {} FROM classes ORDER BY name", CLASS_COLS))
            .map_err(query_err)?;
        let mut classes = stmt
            .query_map([], class_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(query_err)?;
        for class in classes.iter_mut() {
            let id = class["id"].as_str().unwrap_or_default().to_string();
            class["subjects"] = json!(load_children(
                conn,
                Table::Subjects,
                SUBJECT_COLS,
                "class_id",
                &id,
                "name",
                subject_row
            )?);
        }
        Ok(json!({ "classes": classes }))
    })
}

fn handle_classes_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_conn(state, req, |conn, params| {
        let name = get_required_text(params, "name")?;
        let id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO classes(id, name, created_at) VALUES(?, ?, ?)",
            (&id, &name, db::now_rfc3339()),
        )
        .map_err(db_err("db_insert_failed", "classes"))?;
        info!(class_id = %id, "class created");
        Ok(json!({ "class": load_one(conn, Table::Classes, CLASS_COLS, &id, class_row)? }))
    })
}

fn handle_classes_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_conn(state, req, |conn, params| {
        let id = get_required_str(params, "classId")?;
        let patch = get_patch(params)?;
        reject_unknown_fields(patch, &["name"])?;
        require_row(conn, Table::Classes, &id)?;
        let mut sets = Vec::new();
        if let Some(name) = patch_text(patch, "name")? {
            sets.push(("name", SqlValue::Text(name)));
        }
        apply_patch(conn, Table::Classes, &id, sets)?;
        Ok(json!({ "class": load_one(conn, Table::Classes, CLASS_COLS, &id, class_row)? }))
    })
}

fn handle_classes_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_conn(state, req, |conn, params| {
        let id = get_required_str(params, "classId")?;
        delete_guarded(conn, Table::Classes, &id, &[("subjects", "class_id")], &[])?;
        Ok(json!({ "ok": true }))
    })
}

fn handle_classes_hierarchy(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_conn(state, req, |conn, params| {
        let id = get_required_str(params, "classId")?;
        let mut class = load_one(conn, Table::Classes, CLASS_COLS, &id, class_row)?;
        let mut subjects = load_children(
            conn,
            Table::Subjects,
            SUBJECT_COLS,
            "class_id",
            &id,
            "name",
            subject_row,
        )?;
        for subject in subjects.iter_mut() {
            let subject_id = subject["id"].as_str().unwrap_or_default().to_string();
            subject["chapters"] = json!(chapter_tree(conn, &subject_id)?);
        }
        class["subjects"] = json!(subjects);
        Ok(json!({ "class": class }))
    })
}

fn handle_subjects_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_conn_or_empty(state, req, "subjects", |conn, params| {
        let class_id = get_required_str(params, "classId")?;
        require_row(conn, Table::Classes, &class_id)?;
        let subjects = load_children(
            conn,
            Table::Subjects,
            SUBJECT_COLS,
            "class_id",
            &class_id,
            "name",
            subject_row,
        )?;
        Ok(json!({ "subjects": subjects }))
    })
}

fn handle_subjects_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_conn(state, req, |conn, params| {
        let class_id = get_required_str(params, "classId")?;
        let name = get_required_text(params, "name")?;
        let board = get_optional_str(params, "board");
        require_row(conn, Table::Classes, &class_id)?;
        let id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO subjects(id, class_id, name, board, created_at) VALUES(?, ?, ?, ?, ?)",
            (&id, &class_id, &name, board.as_deref(), db::now_rfc3339()),
        )
        .map_err(db_err("db_insert_failed", "subjects"))?;
        info!(subject_id = %id, class_id = %class_id, "subject created");
        Ok(json!({ "subject": load_one(conn, Table::Subjects, SUBJECT_COLS, &id, subject_row)? }))
    })
}

fn handle_subjects_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_conn(state, req, |conn, params| {
        let id = get_required_str(params, "subjectId")?;
        let patch = get_patch(params)?;
        reject_unknown_fields(patch, &["name", "board"])?;
        require_row(conn, Table::Subjects, &id)?;
        let mut sets = Vec::new();
        if let Some(name) = patch_text(patch, "name")? {
            sets.push(("name", SqlValue::Text(name)));
        }
        if let Some(board) = patch_nullable_text(patch, "board")? {
            sets.push(("board", board));
        }
        apply_patch(conn, Table::Subjects, &id, sets)?;
        Ok(json!({ "subject": load_one(conn, Table::Subjects, SUBJECT_COLS, &id, subject_row)? }))
    })
}

fn handle_subjects_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_conn(state, req, |conn, params| {
        let id = get_required_str(params, "subjectId")?;
        delete_guarded(conn, Table::Subjects, &id, &[("chapters", "subject_id")], &[])?;
        Ok(json!({ "ok": true }))
    })
}

fn handle_subjects_details(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_conn(state, req, |conn, params| {
        let id = get_required_str(params, "subjectId")?;
        let mut subject = load_one(conn, Table::Subjects, SUBJECT_COLS, &id, subject_row)?;
        subject["chapters"] = json!(chapter_tree(conn, &id)?);
        Ok(json!({ "subject": subject }))
    })
}

fn handle_chapters_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_conn_or_empty(state, req, "chapters", |conn, params| {
        let subject_id = get_required_str(params, "subjectId")?;
        require_row(conn, Table::Subjects, &subject_id)?;
        let chapters = load_children(
            conn,
            Table::Chapters,
            CHAPTER_COLS,
            "subject_id",
            &subject_id,
            "order_index, created_at",
            chapter_row,
        )?;
        Ok(json!({ "chapters": chapters }))
    })
}

fn handle_chapters_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_conn(state, req, |conn, params| {
        let subject_id = get_required_str(params, "subjectId")?;
        let title = get_required_text(params, "title")?;
        require_row(conn, Table::Subjects, &subject_id)?;
        let order_index = match get_optional_i64(params, "orderIndex")? {
            Some(n) if n < 0 => return Err(HandlerErr::bad_params("orderIndex must not be negative")),
            Some(n) => n,
            None => next_order_index(conn, Table::Chapters, "subject_id", &subject_id)?,
        };
        let id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO chapters(id, subject_id, title, order_index, created_at) VALUES(?, ?, ?, ?, ?)",
            (&id, &subject_id, &title, order_index, db::now_rfc3339()),
        )
        .map_err(db_err("db_insert_failed", "chapters"))?;
        info!(chapter_id = %id, subject_id = %subject_id, "chapter created");
        Ok(json!({ "chapter": load_one(conn, Table::Chapters, CHAPTER_COLS, &id, chapter_row)? }))
    })
}

fn handle_chapters_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_conn(state, req, |conn, params| {
        let id = get_required_str(params, "chapterId")?;
        let patch = get_patch(params)?;
        reject_unknown_fields(patch, &["title", "orderIndex"])?;
        require_row(conn, Table::Chapters, &id)?;
        let mut sets = Vec::new();
        if let Some(title) = patch_text(patch, "title")? {
            sets.push(("title", SqlValue::Text(title)));
        }
        if let Some(n) = patch_order_index(patch)? {
            sets.push(("order_index", SqlValue::Integer(n)));
        }
        apply_patch(conn, Table::Chapters, &id, sets)?;
        Ok(json!({ "chapter": load_one(conn, Table::Chapters, CHAPTER_COLS, &id, chapter_row)? }))
    })
}

fn handle_chapters_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_conn(state, req, |conn, params| {
        let id = get_required_str(params, "chapterId")?;
        delete_guarded(conn, Table::Chapters, &id, &[("topics", "chapter_id")], &[])?;
        Ok(json!({ "ok": true }))
    })
}

fn handle_topics_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_conn_or_empty(state, req, "topics", |conn, params| {
        let chapter_id = get_required_str(params, "chapterId")?;
        require_row(conn, Table::Chapters, &chapter_id)?;
        let topics = load_children(
            conn,
            Table::Topics,
            TOPIC_COLS,
            "chapter_id",
            &chapter_id,
            "order_index, created_at",
            topic_row,
        )?;
        Ok(json!({ "topics": topics }))
    })
}

fn handle_topics_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_conn(state, req, |conn, params| {
        let chapter_id = get_required_str(params, "chapterId")?;
        let title = get_required_text(params, "title")?;
        require_row(conn, Table::Chapters, &chapter_id)?;
        let order_index = match get_optional_i64(params, "orderIndex")? {
            Some(n) if n < 0 => return Err(HandlerErr::bad_params("orderIndex must not be negative")),
            Some(n) => n,
            None => next_order_index(conn, Table::Topics, "chapter_id", &chapter_id)?,
        };
        let id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO topics(id, chapter_id, title, order_index, created_at) VALUES(?, ?, ?, ?, ?)",
            (&id, &chapter_id, &title, order_index, db::now_rfc3339()),
        )
        .map_err(db_err("db_insert_failed", "topics"))?;
        info!(topic_id = %id, chapter_id = %chapter_id, "topic created");
        Ok(json!({ "topic": load_one(conn, Table::Topics, TOPIC_COLS, &id, topic_row)? }))
    })
}

fn handle_topics_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_conn(state, req, |conn, params| {
        let id = get_required_str(params, "topicId")?;
        let patch = get_patch(params)?;
        reject_unknown_fields(patch, &["title", "orderIndex"])?;
        require_row(conn, Table::Topics, &id)?;
        let mut sets = Vec::new();
        if let Some(title) = patch_text(patch, "title")? {
            sets.push(("title", SqlValue::Text(title)));
        }
        if let Some(n) = patch_order_index(patch)? {
            sets.push(("order_index", SqlValue::Integer(n)));
        }
        apply_patch(conn, Table::Topics, &id, sets)?;
        Ok(json!({ "topic": load_one(conn, Table::Topics, TOPIC_COLS, &id, topic_row)? }))
    })
}

fn handle_topics_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_conn(state, req, |conn, params| {
        let id = get_required_str(params, "topicId")?;
        delete_guarded(
            conn,
            Table::Topics,
            &id,
            &[
                ("subtopics", "topic_id"),
                ("resources", "topic_id"),
                ("quizzes", "topic_id"),
            ],
            &[],
        )?;
        Ok(json!({ "ok": true }))
    })
}

fn handle_subtopics_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_conn_or_empty(state, req, "subtopics", |conn, params| {
        let topic_id = get_required_str(params, "topicId")?;
        require_row(conn, Table::Topics, &topic_id)?;
        Ok(json!({ "subtopics": subtopics_of(conn, &topic_id, false)? }))
    })
}

fn handle_subtopics_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_conn(state, req, |conn, params| {
        let topic_id = get_required_str(params, "topicId")?;
        let title = get_required_text(params, "title")?;
        let description = get_optional_str(params, "description");
        let layer_ids = get_string_list(params, "layerIds")?.unwrap_or_default();
        require_row(conn, Table::Topics, &topic_id)?;
        let order_index = match get_optional_i64(params, "orderIndex")? {
            Some(n) if n < 0 => return Err(HandlerErr::bad_params("orderIndex must not be negative")),
            Some(n) => n,
            None => next_order_index(conn, Table::Subtopics, "topic_id", &topic_id)?,
        };

        let id = Uuid::new_v4().to_string();
        let tx = begin(conn)?;
        tx.execute(
            "INSERT INTO subtopics(id, topic_id, title, description, order_index, created_at)
             VALUES(?, ?, ?, ?, ?, ?)",
            (
                &id,
                &topic_id,
                &title,
                description.as_deref(),
                order_index,
                db::now_rfc3339(),
            ),
        )
        .map_err(db_err("db_insert_failed", "subtopics"))?;
        set_required_layers(&tx, &id, &layer_ids)?;
        commit(tx)?;
        info!(subtopic_id = %id, topic_id = %topic_id, required_layers = layer_ids.len(), "subtopic created");
        Ok(json!({ "subtopic": load_subtopic(conn, &id)? }))
    })
}

fn handle_subtopics_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_conn(state, req, |conn, params| {
        let id = get_required_str(params, "subtopicId")?;
        let patch = get_patch(params)?;
        reject_unknown_fields(patch, &["title", "description", "orderIndex", "layerIds"])?;
        require_row(conn, Table::Subtopics, &id)?;
        let mut sets = Vec::new();
        if let Some(title) = patch_text(patch, "title")? {
            sets.push(("title", SqlValue::Text(title)));
        }
        if let Some(description) = patch_nullable_text(patch, "description")? {
            sets.push(("description", description));
        }
        if let Some(n) = patch_order_index(patch)? {
            sets.push(("order_index", SqlValue::Integer(n)));
        }
        let layer_ids = get_string_list(&params["patch"], "layerIds")?;

        let tx = begin(conn)?;
        apply_patch(&tx, Table::Subtopics, &id, sets)?;
        if let Some(layer_ids) = &layer_ids {
            set_required_layers(&tx, &id, layer_ids)?;
        }
        commit(tx)?;
        Ok(json!({ "subtopic": load_subtopic(conn, &id)? }))
    })
}

fn handle_subtopics_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_conn(state, req, |conn, params| {
        let id = get_required_str(params, "subtopicId")?;
        delete_guarded(
            conn,
            Table::Subtopics,
            &id,
            &[("resources", "subtopic_id"), ("quizzes", "subtopic_id")],
            &[("subtopic_required_layers", "subtopic_id")],
        )?;
        Ok(json!({ "ok": true }))
    })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.list" => Some(handle_classes_list(state, req)),
        "classes.create" => Some(handle_classes_create(state, req)),
        "classes.update" => Some(handle_classes_update(state, req)),
        "classes.delete" => Some(handle_classes_delete(state, req)),
        "classes.hierarchy" => Some(handle_classes_hierarchy(state, req)),
        "subjects.list" => Some(handle_subjects_list(state, req)),
        "subjects.create" => Some(handle_subjects_create(state, req)),
        "subjects.update" => Some(handle_subjects_update(state, req)),
        "subjects.delete" => Some(handle_subjects_delete(state, req)),
        "subjects.details" => Some(handle_subjects_details(state, req)),
        "chapters.list" => Some(handle_chapters_list(state, req)),
        "chapters.create" => Some(handle_chapters_create(state, req)),
        "chapters.update" => Some(handle_chapters_update(state, req)),
        "chapters.delete" => Some(handle_chapters_delete(state, req)),
        "topics.list" => Some(handle_topics_list(state, req)),
        "topics.create" => Some(handle_topics_create(state, req)),
        "topics.update" => Some(handle_topics_update(state, req)),
        "topics.delete" => Some(handle_topics_delete(state, req)),
        "subtopics.list" => Some(handle_subtopics_list(state, req)),
        "subtopics.create" => Some(handle_subtopics_create(state, req)),
        "subtopics.update" => Some(handle_subtopics_update(state, req)),
        "subtopics.delete" => Some(handle_subtopics_delete(state, req)),
        _ => None,
    }
}
