use crate::db;
use crate::ipc::helpers::{
    apply_patch, db_err, delete_guarded, get_optional_str, get_patch, get_required_str,
    get_required_text, patch_nullable_text, patch_text, query_err, reject_unknown_fields,
    require_row, with_conn, with_conn_or_empty, HandlerErr, Table,
};
use crate::ipc::types::{AppState, Request};
use crate::learning_path::{self, Layer, UNCATEGORIZED};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

/// Layer names are unique ignoring case, and the grouping bucket name is reserved.
fn check_name_free(conn: &Connection, name: &str, except_id: Option<&str>) -> Result<(), HandlerErr> {
    if name.eq_ignore_ascii_case(UNCATEGORIZED) {
        return Err(HandlerErr::bad_params(format!(
            "\"{}\" is reserved",
            UNCATEGORIZED
        )));
    }
    let clash: Option<String> = conn
        .query_row(
            "SELECT id FROM layers WHERE lower(name) = lower(?) AND id <> COALESCE(?, '')",
            (name, except_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(query_err)?;
    if clash.is_some() {
        return Err(HandlerErr::new(
            "conflict",
            format!("a layer named {} already exists", name),
        ));
    }
    Ok(())
}

fn load_layer(conn: &Connection, id: &str) -> Result<Layer, HandlerErr> {
    conn.query_row(
        "SELECT id, name, description FROM layers WHERE id = ?",
        [id],
        |r| {
            Ok(Layer {
                id: r.get(0)?,
                name: r.get(1)?,
                description: r.get(2)?,
            })
        },
    )
    .optional()
    .map_err(query_err)?
    .ok_or_else(|| HandlerErr::not_found("layer"))
}

fn handle_layers_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_conn_or_empty(state, req, "layers", |conn, _| {
        let layers = learning_path::list_layers(conn)?;
        Ok(json!({ "layers": layers }))
    })
}

fn handle_layers_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_conn(state, req, |conn, params| {
        let name = get_required_text(params, "name")?;
        let description = get_optional_str(params, "description");
        check_name_free(conn, &name, None)?;
        let id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO layers(id, name, description, created_at) VALUES(?, ?, ?, ?)",
            (&id, &name, description.as_deref(), db::now_rfc3339()),
        )
        .map_err(db_err("db_insert_failed", "layers"))?;
        info!(layer_id = %id, name = %name, "layer created");
        Ok(json!({ "layer": load_layer(conn, &id)? }))
    })
}

fn handle_layers_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_conn(state, req, |conn, params| {
        let id = get_required_str(params, "layerId")?;
        let patch = get_patch(params)?;
        reject_unknown_fields(patch, &["name", "description"])?;
        require_row(conn, Table::Layers, &id)?;
        let mut sets = Vec::new();
        if let Some(name) = patch_text(patch, "name")? {
            check_name_free(conn, &name, Some(&id))?;
            sets.push(("name", SqlValue::Text(name)));
        }
        if let Some(description) = patch_nullable_text(patch, "description")? {
            sets.push(("description", description));
        }
        apply_patch(conn, Table::Layers, &id, sets)?;
        Ok(json!({ "layer": load_layer(conn, &id)? }))
    })
}

fn handle_layers_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_conn(state, req, |conn, params| {
        let id = get_required_str(params, "layerId")?;
        delete_guarded(
            conn,
            Table::Layers,
            &id,
            &[("resources", "layer_id"), ("quizzes", "layer_id")],
            &[("subtopic_required_layers", "layer_id")],
        )?;
        Ok(json!({ "ok": true }))
    })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "layers.list" => Some(handle_layers_list(state, req)),
        "layers.create" => Some(handle_layers_create(state, req)),
        "layers.update" => Some(handle_layers_update(state, req)),
        "layers.delete" => Some(handle_layers_delete(state, req)),
        _ => None,
    }
}
