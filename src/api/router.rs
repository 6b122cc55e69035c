use super::error::ApiError;
use super::handlers;
use super::types::{AppState, Request, Response};

pub fn handle_request(state: &mut AppState, mut req: Request) -> Response {
    req.method.make_ascii_uppercase();
    let resp = match dispatch(state, &req) {
        Ok(resp) => resp,
        Err(e) => {
            if e.status() >= 500 {
                tracing::warn!(method = %req.method, path = %req.path, error = %e, "request failed");
            }
            e.response()
        }
    };
    tracing::debug!(method = %req.method, path = %req.path, status = resp.status, "handled");
    resp
}

fn dispatch(state: &mut AppState, req: &Request) -> Result<Response, ApiError> {
    if let Some(resp) = handlers::core::try_handle(state, req) {
        return resp;
    }
    if let Some(resp) = handlers::auth::try_handle(state, req) {
        return resp;
    }
    if let Some(resp) = handlers::courses::try_handle(state, req) {
        return resp;
    }
    if let Some(resp) = handlers::attention::try_handle(state, req) {
        return resp;
    }
    if let Some(resp) = handlers::pomodoro::try_handle(state, req) {
        return resp;
    }
    if let Some(resp) = handlers::reports::try_handle(state, req) {
        return resp;
    }
    if let Some(resp) = handlers::materials::try_handle(state, req) {
        return resp;
    }

    Err(ApiError::not_found("Not found."))
}
