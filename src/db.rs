use anyhow::Context;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE: &str = "learnpath.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(&db_path)
        .with_context(|| format!("failed to open {}", db_path.to_string_lossy()))?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            name TEXT,
            password_hash TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            name TEXT NOT NULL,
            board TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subjects_class ON subjects(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS chapters(
            id TEXT PRIMARY KEY,
            subject_id TEXT NOT NULL,
            title TEXT NOT NULL,
            order_index INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            FOREIGN KEY(subject_id) REFERENCES subjects(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_chapters_subject ON chapters(subject_id, order_index)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS topics(
            id TEXT PRIMARY KEY,
            chapter_id TEXT NOT NULL,
            title TEXT NOT NULL,
            order_index INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            FOREIGN KEY(chapter_id) REFERENCES chapters(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_topics_chapter ON topics(chapter_id, order_index)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subtopics(
            id TEXT PRIMARY KEY,
            topic_id TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT,
            order_index INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            FOREIGN KEY(topic_id) REFERENCES topics(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subtopics_topic ON subtopics(topic_id, order_index)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS layers(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            description TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subtopic_required_layers(
            subtopic_id TEXT NOT NULL,
            layer_id TEXT NOT NULL,
            PRIMARY KEY(subtopic_id, layer_id),
            FOREIGN KEY(subtopic_id) REFERENCES subtopics(id),
            FOREIGN KEY(layer_id) REFERENCES layers(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subtopic_required_layers_layer ON subtopic_required_layers(layer_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS resources(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            type TEXT NOT NULL,
            description TEXT,
            content TEXT,
            topic_id TEXT NOT NULL,
            subtopic_id TEXT,
            layer_id TEXT NOT NULL,
            language TEXT NOT NULL DEFAULT 'en',
            difficulty TEXT NOT NULL DEFAULT 'medium',
            status TEXT NOT NULL DEFAULT 'DRAFT',
            file_url TEXT,
            file_name TEXT,
            file_size INTEGER,
            mime_type TEXT,
            order_index INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT,
            created_by_id TEXT,
            updated_by_id TEXT,
            FOREIGN KEY(topic_id) REFERENCES topics(id),
            FOREIGN KEY(subtopic_id) REFERENCES subtopics(id),
            FOREIGN KEY(layer_id) REFERENCES layers(id),
            FOREIGN KEY(created_by_id) REFERENCES users(id),
            FOREIGN KEY(updated_by_id) REFERENCES users(id)
        )",
        [],
    )?;
    // Workspaces created before manual ordering existed have no order_index column.
    ensure_resources_order_index(conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_resources_scope ON resources(topic_id, subtopic_id, layer_id, order_index)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_resources_layer ON resources(layer_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS quizzes(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT,
            max_marks INTEGER NOT NULL DEFAULT 0,
            topic_id TEXT NOT NULL,
            subtopic_id TEXT,
            layer_id TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'DRAFT',
            created_at TEXT NOT NULL,
            created_by_id TEXT,
            FOREIGN KEY(topic_id) REFERENCES topics(id),
            FOREIGN KEY(subtopic_id) REFERENCES subtopics(id),
            FOREIGN KEY(layer_id) REFERENCES layers(id),
            FOREIGN KEY(created_by_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_quizzes_layer ON quizzes(layer_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS quiz_questions(
            id TEXT PRIMARY KEY,
            quiz_id TEXT NOT NULL,
            question_text TEXT NOT NULL,
            question_type TEXT NOT NULL,
            explanation TEXT,
            difficulty TEXT NOT NULL DEFAULT 'medium',
            order_index INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(quiz_id) REFERENCES quizzes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_quiz_questions_quiz ON quiz_questions(quiz_id, order_index)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS quiz_options(
            id TEXT PRIMARY KEY,
            question_id TEXT NOT NULL,
            option_text TEXT NOT NULL,
            is_correct INTEGER NOT NULL DEFAULT 0,
            rationale TEXT,
            sort_order INTEGER NOT NULL,
            FOREIGN KEY(question_id) REFERENCES quiz_questions(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_quiz_options_question ON quiz_options(question_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS upload_folders(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            parent_id TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(parent_id) REFERENCES upload_folders(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS uploads(
            id TEXT PRIMARY KEY,
            folder_id TEXT,
            name TEXT NOT NULL,
            mime_type TEXT NOT NULL,
            size INTEGER NOT NULL,
            sha256 TEXT NOT NULL,
            storage_key TEXT NOT NULL UNIQUE,
            url TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(folder_id) REFERENCES upload_folders(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_uploads_folder ON uploads(folder_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    Ok(())
}

fn ensure_resources_order_index(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "resources", "order_index")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE resources ADD COLUMN order_index INTEGER NOT NULL DEFAULT 0",
        [],
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn settings_get_json(
    conn: &Connection,
    key: &str,
) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(
            serde_json::from_str(&s).with_context(|| format!("setting {} is not valid JSON", key))?,
        )),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

/// Timestamps are stored as RFC 3339 UTC with millisecond precision so that
/// lexical and chronological order agree.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_init_is_idempotent() {
        let conn = Connection::open_in_memory().expect("open");
        init_schema(&conn).expect("first init");
        init_schema(&conn).expect("second init");
        assert!(table_has_column(&conn, "resources", "order_index").expect("probe"));
    }

    #[test]
    fn older_resources_table_gains_order_index() {
        let conn = Connection::open_in_memory().expect("open");
        conn.execute(
            "CREATE TABLE resources(
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                type TEXT NOT NULL,
                topic_id TEXT NOT NULL,
                subtopic_id TEXT,
                layer_id TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            [],
        )
        .expect("legacy table");
        conn.execute(
            "INSERT INTO resources(id, title, type, topic_id, layer_id, created_at)
             VALUES('r1', 'Old', 'VIDEO', 't1', 'l1', '2024-01-01T00:00:00.000Z')",
            [],
        )
        .expect("legacy row");

        init_schema(&conn).expect("init");
        let order_index: i64 = conn
            .query_row("SELECT order_index FROM resources WHERE id = 'r1'", [], |r| {
                r.get(0)
            })
            .expect("order_index");
        assert_eq!(order_index, 0);
    }

    #[test]
    fn settings_roundtrip_and_overwrite() {
        let conn = Connection::open_in_memory().expect("open");
        init_schema(&conn).expect("init");
        assert!(settings_get_json(&conn, "resources").expect("get").is_none());
        settings_set_json(&conn, "resources", &serde_json::json!({ "a": 1 })).expect("set");
        settings_set_json(&conn, "resources", &serde_json::json!({ "a": 2 })).expect("set");
        let v = settings_get_json(&conn, "resources").expect("get").expect("some");
        assert_eq!(v["a"], 2);
    }

    #[test]
    fn timestamps_parse_back() {
        let now = now_rfc3339();
        assert!(parse_timestamp(&now).is_some());
        assert!(parse_timestamp("not a date").is_none());
    }
}
