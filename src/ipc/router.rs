use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::err;
use tracing::debug;

type TryHandle = fn(&mut AppState, &Request) -> Option<serde_json::Value>;

const FAMILIES: [TryHandle; 10] = [
    handlers::core::try_handle,
    handlers::auth::try_handle,
    handlers::setup::try_handle,
    handlers::hierarchy::try_handle,
    handlers::layers::try_handle,
    handlers::resources::try_handle,
    handlers::learning_path::try_handle,
    handlers::quizzes::try_handle,
    handlers::uploads::try_handle,
    handlers::backup::try_handle,
];

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    debug!(id = %req.id, method = %req.method, "dispatch");
    for try_handle in FAMILIES {
        if let Some(resp) = try_handle(state, &req) {
            return resp;
        }
    }

    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}
