use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

use super::shared::{method_not_allowed, session_exists};
use crate::api::error::{created, ok, ApiError};
use crate::api::guard::authenticate;
use crate::api::params;
use crate::api::types::{AppState, Request, Response};
use crate::db;
use crate::domain::{AttentionLevel, PomodoroEventType, Role};
use crate::pomodoro::{PomodoroState, PomodoroStatus, PomodoroTimings};

const RECENT_EVENTS_LIMIT: i64 = 50;

fn load_state(conn: &Connection, student_id: i64, session_id: i64) -> Result<PomodoroState, ApiError> {
    let row = conn
        .query_row(
            "SELECT status, cycle, phase_started_at, work_seconds, distraction_started_at,
                    distraction_seconds, distracted_during_pause
             FROM pomodoro_sessions
             WHERE student_id = ? AND class_session_id = ?",
            [student_id, session_id],
            |r| {
                let status: String = r.get(0)?;
                let phase: Option<String> = r.get(2)?;
                let distraction: Option<String> = r.get(4)?;
                Ok(PomodoroState {
                    status: PomodoroStatus::parse(&status).unwrap_or(PomodoroStatus::Idle),
                    cycle: r.get::<_, i64>(1)?.max(0) as u32,
                    phase_started_at: phase.as_deref().and_then(db::parse_ts),
                    work_seconds: r.get(3)?,
                    distraction_started_at: distraction.as_deref().and_then(db::parse_ts),
                    distraction_seconds: r.get(5)?,
                    distracted_during_pause: r.get::<_, i64>(6)? != 0,
                })
            },
        )
        .optional()?;
    Ok(row.unwrap_or_default())
}

fn save_state(conn: &Connection, student_id: i64, session_id: i64, s: &PomodoroState) -> Result<(), ApiError> {
    conn.execute(
        "INSERT INTO pomodoro_sessions(
           student_id, class_session_id, status, cycle, phase_started_at, work_seconds,
           distraction_started_at, distraction_seconds, distracted_during_pause, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, class_session_id) DO UPDATE SET
           status = excluded.status,
           cycle = excluded.cycle,
           phase_started_at = excluded.phase_started_at,
           work_seconds = excluded.work_seconds,
           distraction_started_at = excluded.distraction_started_at,
           distraction_seconds = excluded.distraction_seconds,
           distracted_during_pause = excluded.distracted_during_pause,
           updated_at = excluded.updated_at",
        (
            student_id,
            session_id,
            s.status.as_str(),
            s.cycle as i64,
            s.phase_started_at.map(db::format_ts),
            s.work_seconds,
            s.distraction_started_at.map(db::format_ts),
            s.distraction_seconds,
            s.distracted_during_pause as i64,
            db::now_ts(),
        ),
    )?;
    Ok(())
}

fn status_json(s: &PomodoroState, now: DateTime<Utc>, t: &PomodoroTimings) -> serde_json::Value {
    json!({
        "status": s.status.as_str(),
        "cycle": s.cycle,
        "time_remaining_in_current_phase": s.time_remaining(now, t),
        "is_distracted_during_pause": s.distracted_during_pause,
        "distraction_seconds": s.distraction_seconds,
        "total_work_seconds": s.work_seconds,
        "phase_started_at": s.phase_started_at.map(db::format_ts),
    })
}

/// Feeds an attention sample into the caller's cycle for that session.
/// Students who never started a cycle have no row and nothing to update.
pub(super) fn observe_attention(
    conn: &Connection,
    timings: &PomodoroTimings,
    student_id: i64,
    session_id: i64,
    level: AttentionLevel,
    now: DateTime<Utc>,
) -> Result<(), ApiError> {
    let mut s = load_state(conn, student_id, session_id)?;
    if s.status == PomodoroStatus::Idle {
        return Ok(());
    }
    let before = s.clone();
    s.observe_attention(level, now, timings);
    if s != before {
        save_state(conn, student_id, session_id, &s)?;
    }
    Ok(())
}

fn handle_event_create(state: &mut AppState, req: &Request) -> Result<Response, ApiError> {
    let me = authenticate(&state.db, req)?;
    me.require(Role::Student)?;

    let session_id = params::optional_id(&req.body, &["class_session_id", "class_session"])?;
    let event_raw = params::optional_str(&req.body, &["event_type"]);
    let (Some(session_id), Some(event_raw)) = (session_id, event_raw) else {
        return Err(ApiError::bad_request("class_session_id and event_type are required"));
    };
    let event = PomodoroEventType::parse(&event_raw)
        .ok_or_else(|| ApiError::bad_request(format!("\"{event_raw}\" is not a valid event_type")))?;
    let reason = params::optional_str(&req.body, &["reason"]).unwrap_or_default();
    if !session_exists(&state.db, session_id)? {
        return Err(ApiError::not_found("Class session not found."));
    }

    let timings = state.config.pomodoro_timings();
    let now = Utc::now();
    let timestamp = db::format_ts(now);

    let tx = state.db.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO pomodoro_events(student_id, class_session_id, event_type, reason, timestamp)
         VALUES(?, ?, ?, ?, ?)",
        (me.user_id, session_id, event.as_str(), &reason, &timestamp),
    )?;
    let event_id = tx.last_insert_rowid();
    let mut s = load_state(&tx, me.user_id, session_id)?;
    s.apply_event(event, now, &timings);
    save_state(&tx, me.user_id, session_id, &s)?;
    tx.commit()?;

    Ok(created(json!({
        "id": event_id,
        "class_session": session_id,
        "event_type": event.as_str(),
        "reason": reason,
        "timestamp": timestamp,
        "pomodoro": status_json(&s, now, &timings),
    })))
}

fn handle_event_list(state: &mut AppState, req: &Request) -> Result<Response, ApiError> {
    let me = authenticate(&state.db, req)?;
    me.require(Role::Student)?;

    let mut stmt = state.db.prepare(
        "SELECT id, class_session_id, event_type, reason, timestamp
         FROM pomodoro_events
         WHERE student_id = ?
         ORDER BY timestamp DESC, id DESC
         LIMIT ?",
    )?;
    let events = stmt
        .query_map([me.user_id, RECENT_EVENTS_LIMIT], |r| {
            Ok(json!({
                "id": r.get::<_, i64>(0)?,
                "class_session": r.get::<_, i64>(1)?,
                "event_type": r.get::<_, String>(2)?,
                "reason": r.get::<_, String>(3)?,
                "timestamp": r.get::<_, String>(4)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ok(json!(events)))
}

fn handle_metrics(state: &mut AppState, req: &Request) -> Result<Response, ApiError> {
    let me = authenticate(&state.db, req)?;
    me.require(Role::Student)?;

    let (total_events, auto_pauses): (i64, i64) = state.db.query_row(
        "SELECT COUNT(*), COALESCE(SUM(event_type = 'auto_pause'), 0)
         FROM pomodoro_events WHERE student_id = ?",
        [me.user_id],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )?;
    // Effective time comes from attention sample durations, not from cycle timers.
    // TOTAL() sums as a float and cannot overflow; the cast back saturates.
    let effective_seconds: f64 = state.db.query_row(
        "SELECT TOTAL(duration_seconds) FROM attention_records WHERE student_id = ?",
        [me.user_id],
        |r| r.get(0),
    )?;
    let effective_seconds = effective_seconds.round() as i64;

    Ok(ok(json!({
        "total_events": total_events,
        "auto_pauses": auto_pauses,
        "effective_seconds": effective_seconds,
    })))
}

fn handle_status(state: &mut AppState, req: &Request) -> Result<Response, ApiError> {
    let me = authenticate(&state.db, req)?;
    me.require(Role::Student)?;

    let Some(raw) = req.query_param("class_session_id") else {
        return Err(ApiError::bad_request("class_session_id is required"));
    };
    let session_id = raw
        .parse::<i64>()
        .map_err(|_| ApiError::bad_request("class_session_id must be an integer id"))?;
    if !session_exists(&state.db, session_id)? {
        return Err(ApiError::not_found("Class session not found."));
    }

    let timings = state.config.pomodoro_timings();
    let now = Utc::now();
    let mut s = load_state(&state.db, me.user_id, session_id)?;
    let before = s.clone();
    s.advance(now, &timings);
    if s != before {
        save_state(&state.db, me.user_id, session_id, &s)?;
    }

    let mut body = status_json(&s, now, &timings);
    body["class_session"] = json!(session_id);
    Ok(ok(body))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Result<Response, ApiError>> {
    let resp = match req.segments().as_slice() {
        ["student", "pomodoro-events"] => match req.method.as_str() {
            "GET" => handle_event_list(state, req),
            "POST" => handle_event_create(state, req),
            _ => Err(method_not_allowed(req)),
        },
        ["student", "pomodoro-metrics"] => match req.method.as_str() {
            "GET" => handle_metrics(state, req),
            _ => Err(method_not_allowed(req)),
        },
        ["student", "pomodoro-status"] => match req.method.as_str() {
            "GET" => handle_status(state, req),
            _ => Err(method_not_allowed(req)),
        },
        _ => return None,
    };
    Some(resp)
}
