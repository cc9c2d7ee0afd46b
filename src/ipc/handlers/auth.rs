use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_optional_str, get_required_str, respond, with_conn};
use crate::ipc::types::{AppState, Request};
use crate::session;
use serde_json::json;
use tracing::info;

fn handle_users_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_conn(state, req, |conn, params| {
        let email = get_required_str(params, "email")?;
        let password = get_required_str(params, "password")?;
        let name = get_optional_str(params, "name");
        let user = session::create_user(conn, &email, name.as_deref(), &password)?;
        info!(user_id = %user.id, "user created");
        Ok(json!({ "user": user }))
    })
}

fn handle_auth_login(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let result = get_required_str(&req.params, "email").and_then(|email| {
        let password = get_required_str(&req.params, "password")?;
        Ok(session::login(conn, &email, &password)?)
    });
    match result {
        Ok(user) => {
            info!(user_id = %user.id, "logged in");
            let out = json!({ "user": user });
            state.session = Some(user);
            ok(&req.id, out)
        }
        Err(e) => {
            state.session = None;
            respond(req, Err(e))
        }
    }
}

fn handle_auth_logout(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Some(user) = state.session.take() {
        info!(user_id = %user.id, "logged out");
    }
    ok(&req.id, json!({ "ok": true }))
}

fn handle_auth_me(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(&req.id, json!({ "user": state.session }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "users.create" => Some(handle_users_create(state, req)),
        "auth.login" => Some(handle_auth_login(state, req)),
        "auth.logout" => Some(handle_auth_logout(state, req)),
        "auth.me" => Some(handle_auth_me(state, req)),
        _ => None,
    }
}
