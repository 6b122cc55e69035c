use chrono::Utc;
use serde_json::json;

use super::pomodoro;
use super::shared::{method_not_allowed, session_exists};
use crate::api::error::{created, ok, ApiError};
use crate::api::guard::authenticate;
use crate::api::params;
use crate::api::types::{AppState, Request, Response};
use crate::db;
use crate::domain::{AttentionLevel, Role};

const RECENT_FEATURES_LIMIT: i64 = 200;
/// One sample never covers more than a day.
const MAX_DURATION_SECONDS: f64 = 86_400.0;

fn handle_record_attention(state: &mut AppState, req: &Request) -> Result<Response, ApiError> {
    let me = authenticate(&state.db, req)?;
    me.require(Role::Student)?;

    let session_id = params::optional_id(&req.body, &["class_session_id", "class_session"])?;
    let score = params::optional_number(&req.body, &["attention_score"])?;
    let (Some(session_id), Some(score)) = (session_id, score) else {
        return Err(ApiError::bad_request(
            "class_session_id and attention_score are required",
        ));
    };
    if !(0.0..=100.0).contains(&score) {
        return Err(ApiError::bad_request("attention_score must be between 0 and 100"));
    }
    let score = score.round() as i64;
    let duration_seconds = match params::optional_number(&req.body, &["duration_seconds"])? {
        Some(d) if (0.0..=MAX_DURATION_SECONDS).contains(&d) => d.round() as i64,
        Some(_) => {
            return Err(ApiError::bad_request(
                "duration_seconds must be between 0 and 86400",
            ))
        }
        None => 0,
    };
    if !session_exists(&state.db, session_id)? {
        return Err(ApiError::not_found("Class session not found."));
    }

    let level = AttentionLevel::from_score(score);
    let now = Utc::now();
    let timestamp = db::format_ts(now);
    state.db.execute(
        "INSERT INTO attention_records(
           student_id, class_session_id, attention_score, attention_level, timestamp, duration_seconds)
         VALUES(?, ?, ?, ?, ?, ?)",
        (me.user_id, session_id, score, level.as_str(), &timestamp, duration_seconds),
    )?;
    let record_id = state.db.last_insert_rowid();

    let timings = state.config.pomodoro_timings();
    pomodoro::observe_attention(&state.db, &timings, me.user_id, session_id, level, now)?;

    Ok(created(json!({
        "id": record_id,
        "student": me.user_id,
        "class_session": session_id,
        "attention_score": score,
        "attention_level": level.as_str(),
        "timestamp": timestamp,
        "duration_seconds": duration_seconds,
    })))
}

fn handle_feature_create(state: &mut AppState, req: &Request) -> Result<Response, ApiError> {
    let me = authenticate(&state.db, req)?;
    me.require(Role::Student)?;

    let session_id = params::optional_id(&req.body, &["class_session_id", "class_session"])?;
    let features = req.body.get("features").filter(|v| !v.is_null());
    let (Some(session_id), Some(features)) = (session_id, features) else {
        return Err(ApiError::bad_request("class_session_id and features are required"));
    };
    if !session_exists(&state.db, session_id)? {
        return Err(ApiError::not_found("Class session not found."));
    }

    let timestamp = db::now_ts();
    state.db.execute(
        "INSERT INTO feature_records(student_id, class_session_id, features, timestamp)
         VALUES(?, ?, ?, ?)",
        (me.user_id, session_id, features.to_string(), &timestamp),
    )?;

    Ok(created(json!({
        "id": state.db.last_insert_rowid(),
        "class_session": session_id,
        "features": features,
        "timestamp": timestamp,
    })))
}

fn handle_feature_list(state: &mut AppState, req: &Request) -> Result<Response, ApiError> {
    let me = authenticate(&state.db, req)?;
    me.require(Role::Student)?;

    let mut stmt = state.db.prepare(
        "SELECT id, class_session_id, features, timestamp
         FROM feature_records
         WHERE student_id = ?
         ORDER BY timestamp DESC, id DESC
         LIMIT ?",
    )?;
    let records = stmt
        .query_map([me.user_id, RECENT_FEATURES_LIMIT], |r| {
            let raw: String = r.get(2)?;
            Ok(json!({
                "id": r.get::<_, i64>(0)?,
                "class_session": r.get::<_, i64>(1)?,
                "features": serde_json::from_str::<serde_json::Value>(&raw)
                    .unwrap_or(serde_json::Value::String(raw.clone())),
                "timestamp": r.get::<_, String>(3)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ok(json!(records)))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Result<Response, ApiError>> {
    let resp = match req.segments().as_slice() {
        ["student", "record-attention"] => match req.method.as_str() {
            "POST" => handle_record_attention(state, req),
            _ => Err(method_not_allowed(req)),
        },
        ["student", "feature-records"] => match req.method.as_str() {
            "GET" => handle_feature_list(state, req),
            "POST" => handle_feature_create(state, req),
            _ => Err(method_not_allowed(req)),
        },
        _ => return None,
    };
    Some(resp)
}
