use crate::api::error::{ok, ApiError};
use crate::api::types::{AppState, Request, Response};
use serde_json::json;

use super::shared::method_not_allowed;

fn handle_health(state: &mut AppState) -> Result<Response, ApiError> {
    let users: i64 = state
        .db
        .query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))?;
    Ok(ok(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "database": state.config.db.to_string_lossy(),
        "users": users,
    })))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Result<Response, ApiError>> {
    let resp = match req.segments().as_slice() {
        ["health"] => match req.method.as_str() {
            "GET" => handle_health(state),
            _ => Err(method_not_allowed(req)),
        },
        _ => return None,
    };
    Some(resp)
}
