use chrono::{NaiveDate, NaiveTime, Utc};
use rusqlite::Connection;
use serde_json::json;

use super::shared::{
    course_exists, course_json, enroll, enrollment_json, is_unique_violation, method_not_allowed,
    session_json, teaches_course, user_role,
};
use crate::api::error::{created, ok, ApiError};
use crate::api::guard::authenticate;
use crate::api::params;
use crate::api::types::{AppState, Request, Response};
use crate::db;
use crate::domain::{display_name, Role, SessionStatus};

const DEFAULT_DURATION_MINUTES: i64 = 60;
const INITIAL_SESSION_TITLE: &str = "Initial session";

fn parse_date(raw: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| ApiError::bad_request("date must be YYYY-MM-DD"))
}

fn parse_time(raw: &str) -> Result<NaiveTime, ApiError> {
    let t = raw.trim();
    NaiveTime::parse_from_str(t, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(t, "%H:%M"))
        .map_err(|_| ApiError::bad_request("time must be HH:MM or HH:MM:SS"))
}

/// Checks the target user exists and holds `role`.
fn require_user_with_role(conn: &Connection, user_id: i64, role: Role) -> Result<(), ApiError> {
    match user_role(conn, user_id)? {
        None => Err(ApiError::not_found(format!("{} not found.", role.label()))),
        Some(r) if r.unwrap_or(Role::Student) == role => Ok(()),
        Some(_) => Err(ApiError::bad_request(format!(
            "User {user_id} is not a {}",
            role.as_str()
        ))),
    }
}

fn handle_admin_courses_list(state: &mut AppState, req: &Request) -> Result<Response, ApiError> {
    let me = authenticate(&state.db, req)?;
    me.require(Role::Admin)?;

    let mut stmt = state.db.prepare(
        "SELECT
           c.id, c.name, c.code, c.description, c.created_at,
           (SELECT COUNT(*) FROM class_sessions s WHERE s.course_id = c.id) AS sessions_count,
           (SELECT COUNT(*) FROM student_courses sc WHERE sc.course_id = c.id) AS students_count
         FROM courses c
         ORDER BY c.code",
    )?;
    let courses = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, i64>(0)?,
                "name": r.get::<_, String>(1)?,
                "code": r.get::<_, String>(2)?,
                "description": r.get::<_, String>(3)?,
                "created_at": r.get::<_, String>(4)?,
                "sessions_count": r.get::<_, i64>(5)?,
                "students_count": r.get::<_, i64>(6)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ok(json!(courses)))
}

fn handle_admin_courses_create(state: &mut AppState, req: &Request) -> Result<Response, ApiError> {
    let me = authenticate(&state.db, req)?;
    me.require(Role::Admin)?;

    let name = params::required_str(&req.body, &["name"])?;
    let code = params::required_str(&req.body, &["code"])?;
    let description = params::optional_str(&req.body, &["description"]).unwrap_or_default();

    if let Err(e) = state.db.execute(
        "INSERT INTO courses(name, code, description, created_at) VALUES(?, ?, ?, ?)",
        (&name, &code, &description, db::now_ts()),
    ) {
        if is_unique_violation(&e) {
            return Err(ApiError::bad_request(format!(
                "A course with code {code} already exists"
            )));
        }
        return Err(e.into());
    }
    let course_id = state.db.last_insert_rowid();
    tracing::info!(course_id, code = %code, "created course");
    Ok(created(course_json(&state.db, course_id)?))
}

fn handle_admin_assign_teacher(state: &mut AppState, req: &Request) -> Result<Response, ApiError> {
    let me = authenticate(&state.db, req)?;
    me.require(Role::Admin)?;

    let teacher_id = params::required_id(&req.body, &["teacher_id", "teacherId"])?;
    let course_id = params::required_id(&req.body, &["course_id", "courseId"])?;
    require_user_with_role(&state.db, teacher_id, Role::Teacher)?;
    if !course_exists(&state.db, course_id)? {
        return Err(ApiError::not_found("Course not found."));
    }

    let title = params::optional_str(&req.body, &["title"])
        .unwrap_or_else(|| INITIAL_SESSION_TITLE.to_string());
    let now = Utc::now();
    state.db.execute(
        "INSERT INTO class_sessions(course_id, teacher_id, title, date, time, duration_minutes, status, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            course_id,
            teacher_id,
            &title,
            now.format("%Y-%m-%d").to_string(),
            now.format("%H:%M:%S").to_string(),
            DEFAULT_DURATION_MINUTES,
            SessionStatus::Upcoming.as_str(),
            db::format_ts(now),
        ),
    )?;
    let session_id = state.db.last_insert_rowid();
    tracing::info!(teacher_id, course_id, session_id, "assigned teacher to course");
    Ok(created(session_json(&state.db, session_id)?))
}

fn enrollment_response(conn: &Connection, enrollment_id: i64, was_created: bool) -> Result<Response, ApiError> {
    let mut body = enrollment_json(conn, enrollment_id)?;
    body["created"] = json!(was_created);
    if was_created {
        Ok(created(body))
    } else {
        Ok(ok(body))
    }
}

fn handle_admin_enroll_student(state: &mut AppState, req: &Request) -> Result<Response, ApiError> {
    let me = authenticate(&state.db, req)?;
    me.require(Role::Admin)?;

    let student_id = params::required_id(&req.body, &["student_id", "studentId"])?;
    let course_id = params::required_id(&req.body, &["course_id", "courseId"])?;
    require_user_with_role(&state.db, student_id, Role::Student)?;
    if !course_exists(&state.db, course_id)? {
        return Err(ApiError::not_found("Course not found."));
    }

    let (enrollment_id, was_created) = enroll(&state.db, student_id, course_id)?;
    enrollment_response(&state.db, enrollment_id, was_created)
}

fn handle_teacher_sessions_list(state: &mut AppState, req: &Request) -> Result<Response, ApiError> {
    let me = authenticate(&state.db, req)?;
    me.require(Role::Teacher)?;

    let mut stmt = state.db.prepare(
        "SELECT id FROM class_sessions
         WHERE teacher_id = ?
         ORDER BY date DESC, time DESC, id DESC",
    )?;
    let ids = stmt
        .query_map([me.user_id], |r| r.get::<_, i64>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    let sessions = ids
        .into_iter()
        .map(|id| session_json(&state.db, id))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ok(json!(sessions)))
}

fn handle_teacher_sessions_create(state: &mut AppState, req: &Request) -> Result<Response, ApiError> {
    let me = authenticate(&state.db, req)?;
    me.require(Role::Teacher)?;

    let course_id = params::required_id(&req.body, &["course_id", "courseId", "course"])?;
    let date = parse_date(&params::required_str(&req.body, &["date"])?)?;
    let time = parse_time(&params::required_str(&req.body, &["time"])?)?;
    let title = params::optional_str(&req.body, &["title"]).unwrap_or_default();
    let duration = match params::optional_number(&req.body, &["duration_minutes"])? {
        Some(d) if d >= 1.0 => d.round() as i64,
        Some(_) => return Err(ApiError::bad_request("duration_minutes must be positive")),
        None => DEFAULT_DURATION_MINUTES,
    };
    let status = match params::optional_str(&req.body, &["status"]) {
        Some(raw) => SessionStatus::parse(&raw)
            .ok_or_else(|| ApiError::bad_request(format!("\"{raw}\" is not a valid status")))?,
        None => SessionStatus::Upcoming,
    };
    if !course_exists(&state.db, course_id)? {
        return Err(ApiError::not_found("Course not found."));
    }

    // The owning teacher is always the caller; any teacher_id in the body is ignored.
    state.db.execute(
        "INSERT INTO class_sessions(course_id, teacher_id, title, date, time, duration_minutes, status, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            course_id,
            me.user_id,
            &title,
            date.format("%Y-%m-%d").to_string(),
            time.format("%H:%M:%S").to_string(),
            duration,
            status.as_str(),
            db::now_ts(),
        ),
    )?;
    let session_id = state.db.last_insert_rowid();
    Ok(created(session_json(&state.db, session_id)?))
}

fn handle_teacher_enrollments_list(state: &mut AppState, req: &Request) -> Result<Response, ApiError> {
    let me = authenticate(&state.db, req)?;
    me.require(Role::Teacher)?;

    let ids: Vec<i64> = match req.query_param("course_id") {
        Some(raw) => {
            let course_id = raw
                .parse::<i64>()
                .map_err(|_| ApiError::bad_request("course_id must be an integer id"))?;
            if !course_exists(&state.db, course_id)? {
                return Err(ApiError::not_found("Course not found."));
            }
            if !teaches_course(&state.db, me.user_id, course_id)? {
                return Err(ApiError::forbidden());
            }
            let mut stmt = state.db.prepare(
                "SELECT sc.id FROM student_courses sc
                 JOIN users u ON u.id = sc.student_id
                 WHERE sc.course_id = ?
                 ORDER BY u.username",
            )?;
            let rows = stmt
                .query_map([course_id], |r| r.get::<_, i64>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
        None => {
            let mut stmt = state.db.prepare(
                "SELECT sc.id FROM student_courses sc
                 JOIN users u ON u.id = sc.student_id
                 JOIN courses c ON c.id = sc.course_id
                 WHERE sc.course_id IN (
                   SELECT DISTINCT course_id FROM class_sessions WHERE teacher_id = ?
                 )
                 ORDER BY c.code, u.username",
            )?;
            let rows = stmt
                .query_map([me.user_id], |r| r.get::<_, i64>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
    };

    let enrollments = ids
        .into_iter()
        .map(|id| enrollment_json(&state.db, id))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ok(json!(enrollments)))
}

fn handle_teacher_enroll(state: &mut AppState, req: &Request) -> Result<Response, ApiError> {
    let me = authenticate(&state.db, req)?;
    me.require(Role::Teacher)?;

    let student_id = params::required_id(&req.body, &["student_id", "studentId", "student"])?;
    let course_id = params::required_id(&req.body, &["course_id", "courseId", "course"])?;
    if !course_exists(&state.db, course_id)? {
        return Err(ApiError::not_found("Course not found."));
    }
    if !teaches_course(&state.db, me.user_id, course_id)? {
        return Err(ApiError::forbidden());
    }
    require_user_with_role(&state.db, student_id, Role::Student)?;

    let (enrollment_id, was_created) = enroll(&state.db, student_id, course_id)?;
    enrollment_response(&state.db, enrollment_id, was_created)
}

fn handle_student_courses(state: &mut AppState, req: &Request) -> Result<Response, ApiError> {
    let me = authenticate(&state.db, req)?;
    me.require(Role::Student)?;

    let mut stmt = state.db.prepare(
        "SELECT s.id, s.course_id, c.name, c.code, s.title, s.date, s.time, s.status,
                u.first_name, u.last_name, u.username
         FROM class_sessions s
         JOIN courses c ON c.id = s.course_id
         JOIN users u ON u.id = s.teacher_id
         JOIN student_courses sc ON sc.course_id = s.course_id AND sc.student_id = ?
         WHERE s.status IN ('active', 'upcoming')
         ORDER BY s.date DESC, s.time DESC, s.id DESC",
    )?;
    let courses = stmt
        .query_map([me.user_id], |r| {
            let time: String = r.get(6)?;
            let first: String = r.get(8)?;
            let last: String = r.get(9)?;
            let username: String = r.get(10)?;
            Ok(json!({
                "id": r.get::<_, i64>(0)?,
                "course_id": r.get::<_, i64>(1)?,
                "name": r.get::<_, String>(2)?,
                "course_code": r.get::<_, String>(3)?,
                "title": r.get::<_, String>(4)?,
                "date": r.get::<_, String>(5)?,
                "time": time.get(..5).unwrap_or(time.as_str()),
                "status": r.get::<_, String>(7)?,
                "professor": display_name(&first, &last, &username),
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ok(json!(courses)))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Result<Response, ApiError>> {
    let resp = match req.segments().as_slice() {
        ["admin", "courses"] => match req.method.as_str() {
            "GET" => handle_admin_courses_list(state, req),
            "POST" => handle_admin_courses_create(state, req),
            _ => Err(method_not_allowed(req)),
        },
        ["admin", "assign-teacher"] => match req.method.as_str() {
            "POST" => handle_admin_assign_teacher(state, req),
            _ => Err(method_not_allowed(req)),
        },
        ["admin", "enroll-student"] => match req.method.as_str() {
            "POST" => handle_admin_enroll_student(state, req),
            _ => Err(method_not_allowed(req)),
        },
        ["teacher", "class-sessions"] => match req.method.as_str() {
            "GET" => handle_teacher_sessions_list(state, req),
            "POST" => handle_teacher_sessions_create(state, req),
            _ => Err(method_not_allowed(req)),
        },
        ["teacher", "student-courses"] => match req.method.as_str() {
            "GET" => handle_teacher_enrollments_list(state, req),
            "POST" => handle_teacher_enroll(state, req),
            _ => Err(method_not_allowed(req)),
        },
        ["student", "courses"] => match req.method.as_str() {
            "GET" => handle_student_courses(state, req),
            _ => Err(method_not_allowed(req)),
        },
        _ => return None,
    };
    Some(resp)
}
