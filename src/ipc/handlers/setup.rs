use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::uploads::DEFAULT_MAX_BYTES;
use serde_json::{json, Map, Value};
use tracing::info;

const DIFFICULTIES: [&str; 3] = ["easy", "medium", "hard"];
const MAX_UPLOAD_LIMIT: i64 = 1024 * 1024 * 1024;

#[derive(Clone, Copy)]
enum SetupSection {
    Resources,
    Uploads,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "resources" => Some(Self::Resources),
            "uploads" => Some(Self::Uploads),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Resources => "setup.resources",
            Self::Uploads => "setup.uploads",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Resources => json!({
            "enforceRequiredLayers": false,
            "defaultLanguage": "en",
            "defaultDifficulty": "medium"
        }),
        SetupSection::Uploads => json!({
            "maxBytes": DEFAULT_MAX_BYTES
        }),
    }
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool().ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.is_empty() {
        return Err(format!("{} must not be empty", key));
    }
    if s.len() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())?;
    for (k, v) in patch {
        match section {
            SetupSection::Resources => match k.as_str() {
                "enforceRequiredLayers" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                "defaultLanguage" => {
                    let lang = parse_string_max(v, k, 16)?.to_ascii_lowercase();
                    obj.insert(k.clone(), Value::String(lang));
                }
                "defaultDifficulty" => {
                    let d = parse_string_max(v, k, 16)?.to_ascii_lowercase();
                    if !DIFFICULTIES.contains(&d.as_str()) {
                        return Err("defaultDifficulty must be one of: easy, medium, hard".into());
                    }
                    obj.insert(k.clone(), Value::String(d));
                }
                _ => return Err(format!("unknown resources field: {}", k)),
            },
            SetupSection::Uploads => match k.as_str() {
                "maxBytes" => {
                    obj.insert(
                        k.clone(),
                        Value::from(parse_i64_range(v, k, 1, MAX_UPLOAD_LIMIT)?),
                    );
                }
                _ => return Err(format!("unknown uploads field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &rusqlite::Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Malformed historical values fall back to defaults field by field.
            for (k, v) in saved_obj {
                let mut one = Map::new();
                one.insert(k.clone(), v.clone());
                let _ = merge_section_patch(section, &mut current, &one);
            }
        }
    }
    Ok(current)
}

/// Resource defaults and the required-layer policy read by resource handlers.
pub struct ResourceSettings {
    pub enforce_required_layers: bool,
    pub default_language: String,
    pub default_difficulty: String,
}

pub fn resource_settings(conn: &rusqlite::Connection) -> anyhow::Result<ResourceSettings> {
    let v = load_section(conn, SetupSection::Resources)?;
    Ok(ResourceSettings {
        enforce_required_layers: v["enforceRequiredLayers"].as_bool().unwrap_or(false),
        default_language: v["defaultLanguage"].as_str().unwrap_or("en").to_string(),
        default_difficulty: v["defaultDifficulty"]
            .as_str()
            .unwrap_or("medium")
            .to_string(),
    })
}

pub fn upload_max_bytes(conn: &rusqlite::Connection) -> anyhow::Result<i64> {
    let v = load_section(conn, SetupSection::Uploads)?;
    Ok(v["maxBytes"].as_i64().unwrap_or(DEFAULT_MAX_BYTES))
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let resources = match load_section(conn, SetupSection::Resources) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let uploads = match load_section(conn, SetupSection::Uploads) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    ok(&req.id, json!({ "resources": resources, "uploads": uploads }))
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    info!(section = section_raw, "settings updated");
    ok(&req.id, json!({ "section": section_raw, "settings": current }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
