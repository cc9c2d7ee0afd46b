use crate::blob::{storage_file_name, BlobError, BlobStore};
use crate::db;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

pub const DEFAULT_MAX_BYTES: i64 = 50 * 1024 * 1024;
pub const URL_PREFIX: &str = "/uploads/";

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    InvalidInput(String),
    #[error("file is {size} bytes; the limit is {max} bytes")]
    TooLarge { size: u64, max: i64 },
    #[error("blob store: {0}")]
    Blob(#[from] BlobError),
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

impl UploadError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::InvalidInput(_) => "bad_params",
            Self::TooLarge { .. } => "too_large",
            Self::Blob(_) => "upload_failed",
            Self::Storage(_) => "db_insert_failed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Folder {
    pub id: String,
    pub name: String,
    pub parent_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredUpload {
    pub id: String,
    pub folder_id: Option<String>,
    pub name: String,
    pub mime_type: String,
    pub size: i64,
    pub sha256: String,
    pub storage_key: String,
    pub url: String,
    pub created_at: String,
}

pub fn guess_mime_type(name: &str) -> &'static str {
    let ext = name
        .rsplit_once('.')
        .map(|(_, e)| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "ppt" => "application/vnd.ms-powerpoint",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "json" => "application/json",
        "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}

pub fn create_folder(
    conn: &Connection,
    name: &str,
    parent_id: Option<&str>,
) -> Result<Folder, UploadError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(UploadError::InvalidInput("folder name must not be empty".into()));
    }
    if let Some(pid) = parent_id {
        folder_key_path(conn, pid)?;
    }
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO upload_folders(id, name, parent_id, created_at) VALUES(?, ?, ?, ?)",
        (&id, name, parent_id, db::now_rfc3339()),
    )?;
    Ok(Folder {
        id,
        name: name.to_string(),
        parent_id: parent_id.map(|s| s.to_string()),
    })
}

/// Folder ids from the root down to `folder_id`, joined with `/`.
fn folder_key_path(conn: &Connection, folder_id: &str) -> Result<String, UploadError> {
    let mut parts: Vec<String> = Vec::new();
    let mut cursor = Some(folder_id.to_string());
    while let Some(id) = cursor {
        if parts.contains(&id) {
            return Err(UploadError::InvalidInput("folder cycle detected".into()));
        }
        let parent: Option<Option<String>> = conn
            .query_row(
                "SELECT parent_id FROM upload_folders WHERE id = ?",
                [&id],
                |r| r.get(0),
            )
            .optional()?;
        let Some(parent) = parent else {
            return Err(UploadError::NotFound(format!("folder {}", id)));
        };
        parts.push(id);
        cursor = parent;
    }
    parts.reverse();
    Ok(parts.join("/"))
}

pub fn store_upload<S: BlobStore + ?Sized>(
    conn: &Connection,
    store: &S,
    folder_id: Option<&str>,
    name: &str,
    mime_type: Option<&str>,
    bytes: &[u8],
    max_bytes: i64,
) -> Result<StoredUpload, UploadError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(UploadError::InvalidInput("file name must not be empty".into()));
    }
    if bytes.len() as i64 > max_bytes {
        return Err(UploadError::TooLarge {
            size: bytes.len() as u64,
            max: max_bytes,
        });
    }
    let prefix = match folder_id {
        Some(fid) => format!("{}/", folder_key_path(conn, fid)?),
        None => String::new(),
    };

    let mut millis = Utc::now().timestamp_millis();
    let mut key = format!("{}{}", prefix, storage_file_name(millis, name));
    while store.exists(&key)? {
        millis += 1;
        key = format!("{}{}", prefix, storage_file_name(millis, name));
    }
    store.put(&key, bytes)?;

    let upload = StoredUpload {
        id: Uuid::new_v4().to_string(),
        folder_id: folder_id.map(|s| s.to_string()),
        name: name.to_string(),
        mime_type: mime_type
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| guess_mime_type(name))
            .to_string(),
        size: bytes.len() as i64,
        sha256: format!("{:x}", Sha256::digest(bytes)),
        url: format!("{}{}", URL_PREFIX, key),
        storage_key: key,
        created_at: db::now_rfc3339(),
    };
    if let Err(e) = conn.execute(
        "INSERT INTO uploads(id, folder_id, name, mime_type, size, sha256, storage_key, url, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &upload.id,
            upload.folder_id.as_deref(),
            &upload.name,
            &upload.mime_type,
            upload.size,
            &upload.sha256,
            &upload.storage_key,
            &upload.url,
            &upload.created_at,
        ),
    ) {
        // Keep the blob directory in step with the uploads table.
        let _ = store.delete(&upload.storage_key);
        return Err(e.into());
    }
    info!(key = %upload.storage_key, size = upload.size, "stored upload");
    Ok(upload)
}

pub fn list_uploads(
    conn: &Connection,
    folder_id: Option<&str>,
) -> Result<Vec<StoredUpload>, UploadError> {
    let mut stmt = conn.prepare(
        "SELECT id, folder_id, name, mime_type, size, sha256, storage_key, url, created_at
         FROM uploads
         WHERE (?1 IS NULL AND folder_id IS NULL) OR folder_id = ?1
         ORDER BY created_at DESC, name",
    )?;
    let rows = stmt
        .query_map([folder_id], |r| {
            Ok(StoredUpload {
                id: r.get(0)?,
                folder_id: r.get(1)?,
                name: r.get(2)?,
                mime_type: r.get(3)?,
                size: r.get(4)?,
                sha256: r.get(5)?,
                storage_key: r.get(6)?,
                url: r.get(7)?,
                created_at: r.get(8)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::FileStore;
    use std::path::PathBuf;
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

    fn setup() -> (Connection, FileStore, PathBuf) {
        let conn = Connection::open_in_memory().expect("open");
        db::init_schema(&conn).expect("schema");
        let dir = temp_dir("learnpath-uploads");
        let store = FileStore::open(&dir).expect("store");
        (conn, store, dir)
    }

    #[test]
    fn upload_lands_under_its_folder_with_checksum() {
        let (conn, store, dir) = setup();
        let parent = create_folder(&conn, "Grade 8", None).expect("parent");
        let child = create_folder(&conn, "Algebra", Some(&parent.id)).expect("child");

        let up = store_upload(
            &conn,
            &store,
            Some(&child.id),
            "linear equations.pdf",
            None,
            b"abc",
            DEFAULT_MAX_BYTES,
        )
        .expect("upload");
        assert!(up
            .storage_key
            .starts_with(&format!("{}/{}/", parent.id, child.id)));
        assert!(up.storage_key.ends_with("-linear_equations.pdf"));
        assert_eq!(up.url, format!("/uploads/{}", up.storage_key));
        assert_eq!(up.mime_type, "application/pdf");
        assert_eq!(
            up.sha256,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(
            store.get(&up.storage_key).expect("get").as_deref(),
            Some(&b"abc"[..])
        );

        let listed = list_uploads(&conn, Some(&child.id)).expect("list");
        assert_eq!(listed.len(), 1);
        assert!(list_uploads(&conn, None).expect("root").is_empty());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn same_name_twice_gets_distinct_keys() {
        let (conn, store, dir) = setup();
        let a = store_upload(&conn, &store, None, "a.png", None, b"1", DEFAULT_MAX_BYTES)
            .expect("a");
        let b = store_upload(&conn, &store, None, "a.png", None, b"2", DEFAULT_MAX_BYTES)
            .expect("b");
        assert_ne!(a.storage_key, b.storage_key);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn limits_and_unknown_folders_are_rejected() {
        let (conn, store, dir) = setup();
        let err = store_upload(&conn, &store, None, "big.mp4", None, &[0u8; 16], 8).unwrap_err();
        assert_eq!(err.code(), "too_large");
        let err =
            store_upload(&conn, &store, Some("missing"), "a.pdf", None, b"x", 8).unwrap_err();
        assert_eq!(err.code(), "not_found");
        let err = create_folder(&conn, "  ", None).unwrap_err();
        assert_eq!(err.code(), "bad_params");
        let _ = std::fs::remove_dir_all(dir);
    }
}
