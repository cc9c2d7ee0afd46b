use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::blob::FileStore;
use crate::session::SessionUser;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Default)]
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub blobs: Option<FileStore>,
    pub session: Option<SessionUser>,
}
