use crate::ipc::helpers::{
    get_optional_str, get_order_items, get_required_str, get_string_list, with_conn, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::learning_path::{self, Direction, OrderedTable, ReorderOutcome};
use serde_json::json;
use tracing::info;

fn handle_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_conn(state, req, |conn, params| {
        let topic_id = get_required_str(params, "topicId")?;
        let subtopic_id = get_optional_str(params, "subtopicId");
        let grouped =
            learning_path::fetch_grouped_resources(conn, &topic_id, subtopic_id.as_deref())?;
        let layers = learning_path::list_layers(conn)?;
        Ok(json!({
            "topicId": topic_id,
            "subtopicId": subtopic_id,
            "groups": grouped.groups,
            "displayOrder": grouped.display_order(&layers),
            "resourceCount": grouped.resource_count(),
        }))
    })
}

fn handle_reorder(state: &mut AppState, req: &Request) -> serde_json::Value {
    let updated_by = state.session.as_ref().map(|u| u.id.clone());
    with_conn(state, req, |conn, params| {
        let topic_id = get_required_str(params, "topicId")?;
        let subtopic_id = get_optional_str(params, "subtopicId");
        let resource_id = get_required_str(params, "resourceId")?;
        let direction_raw = get_required_str(params, "direction")?;
        let Some(direction) = Direction::parse(&direction_raw.to_ascii_lowercase()) else {
            return Err(HandlerErr::bad_params("direction must be up or down"));
        };
        let cached = get_string_list(params, "orderedResourceIds")?;

        let mut grouped =
            learning_path::fetch_grouped_resources(conn, &topic_id, subtopic_id.as_deref())?;
        if let Some(ids) = &cached {
            learning_path::apply_cached_order(&mut grouped, ids)?;
        }

        match learning_path::reorder_within_layer(&mut grouped, &resource_id, direction)? {
            ReorderOutcome::Unchanged => {
                let group = grouped
                    .groups
                    .iter()
                    .find(|g| g.resources.iter().any(|r| r.id == resource_id));
                Ok(json!({ "changed": false, "group": group }))
            }
            ReorderOutcome::Moved {
                layer_name,
                updates,
            } => {
                learning_path::persist_order(
                    conn,
                    OrderedTable::Resources,
                    Some(&topic_id),
                    updated_by.as_deref(),
                    &updates,
                )?;
                info!(
                    resource_id = %resource_id,
                    layer = %layer_name,
                    direction = %direction_raw,
                    "resource moved"
                );
                Ok(json!({
                    "changed": true,
                    "group": grouped.group(&layer_name),
                    "updates": updates,
                }))
            }
        }
    })
}

fn handle_subtopics_reorder(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_conn(state, req, |conn, params| {
        let topic_id = get_required_str(params, "topicId")?;
        let items = get_order_items(params)?;
        learning_path::reorder_subtopics(conn, &topic_id, &items)?;
        Ok(json!({ "ok": true, "count": items.len() }))
    })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "learningPath.get" => Some(handle_get(state, req)),
        "learningPath.reorder" => Some(handle_reorder(state, req)),
        "subtopics.reorder" => Some(handle_subtopics_reorder(state, req)),
        _ => None,
    }
}
