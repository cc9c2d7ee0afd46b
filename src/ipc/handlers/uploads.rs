use crate::blob::FileStore;
use crate::ipc::handlers::setup;
use crate::ipc::helpers::{
    get_optional_str, get_required_str, get_required_text, respond, with_conn_or_empty, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::uploads::{self, StoredUpload, UploadError};
use rusqlite::Connection;
use serde_json::json;
use std::path::Path;

/// Reads a file from the local filesystem into the blob store. Shared with
/// resource attachments.
pub fn store_from_path(
    conn: &Connection,
    blobs: &FileStore,
    folder_id: Option<&str>,
    source_path: &str,
    name: Option<&str>,
    mime_type: Option<&str>,
) -> Result<StoredUpload, HandlerErr> {
    let path = Path::new(source_path);
    let max_bytes = setup::upload_max_bytes(conn)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let meta = std::fs::metadata(path).map_err(|e| {
        HandlerErr::new("upload_failed", format!("cannot read {}: {}", source_path, e))
    })?;
    if !meta.is_file() {
        return Err(HandlerErr::bad_params(format!("{} is not a file", source_path)));
    }
    if meta.len() as i64 > max_bytes {
        return Err(UploadError::TooLarge {
            size: meta.len(),
            max: max_bytes,
        }
        .into());
    }
    let bytes = std::fs::read(path).map_err(|e| {
        HandlerErr::new("upload_failed", format!("cannot read {}: {}", source_path, e))
    })?;
    let name = match name {
        Some(n) => n.to_string(),
        None => path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| HandlerErr::bad_params("cannot derive a file name"))?,
    };
    Ok(uploads::store_upload(
        conn, blobs, folder_id, &name, mime_type, &bytes, max_bytes,
    )?)
}

fn handle_create_folder(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return HandlerErr::new("no_workspace", "select a workspace first").response(&req.id);
    };
    let result = get_required_text(&req.params, "name").and_then(|name| {
        let parent_id = get_optional_str(&req.params, "parentId");
        let folder = uploads::create_folder(conn, &name, parent_id.as_deref())?;
        Ok(json!({ "folder": folder }))
    });
    respond(req, result)
}

fn handle_put(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (Some(conn), Some(blobs)) = (state.db.as_ref(), state.blobs.as_ref()) else {
        return HandlerErr::new("no_workspace", "select a workspace first").response(&req.id);
    };
    let result = get_required_str(&req.params, "sourcePath").and_then(|source| {
        let name = get_optional_str(&req.params, "name");
        let mime_type = get_optional_str(&req.params, "mimeType");
        let folder_id = get_optional_str(&req.params, "folderId");
        let upload = store_from_path(
            conn,
            blobs,
            folder_id.as_deref(),
            &source,
            name.as_deref(),
            mime_type.as_deref(),
        )?;
        Ok(json!({ "upload": upload }))
    });
    respond(req, result)
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_conn_or_empty(state, req, "uploads", |conn, params| {
        let folder_id = get_optional_str(params, "folderId");
        let uploads = uploads::list_uploads(conn, folder_id.as_deref())?;
        Ok(json!({ "uploads": uploads }))
    })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "uploads.createFolder" => Some(handle_create_folder(state, req)),
        "uploads.put" => Some(handle_put(state, req)),
        "uploads.list" => Some(handle_list(state, req)),
        _ => None,
    }
}
