use std::collections::{BTreeMap, HashSet};

use chrono::{Timelike, Utc};
use rusqlite::Connection;
use serde_json::json;

use super::shared::method_not_allowed;
use crate::api::error::{ok, ApiError};
use crate::api::guard::authenticate;
use crate::api::types::{AppState, Request, Response};
use crate::db;
use crate::domain::{display_name, rounded_mean, ReportPeriod, Role};

const TIMELINE_POINTS: usize = 50;

#[derive(Debug, Clone)]
struct ReportRow {
    score: i64,
    timestamp: String,
    duration_seconds: i64,
    session_id: i64,
    course_id: i64,
    course_code: String,
}

/// `subject` narrows a report to one course: a numeric value is a course id,
/// anything else matches course codes case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq)]
enum SubjectFilter {
    CourseId(i64),
    CodeContains(String),
}

impl SubjectFilter {
    fn parse(raw: Option<&str>) -> Option<SubjectFilter> {
        let raw = raw?.trim();
        if raw.is_empty() || raw.eq_ignore_ascii_case("all") {
            return None;
        }
        match raw.parse::<i64>() {
            Ok(id) => Some(SubjectFilter::CourseId(id)),
            Err(_) => Some(SubjectFilter::CodeContains(raw.to_lowercase())),
        }
    }

    fn matches(&self, course_id: i64, code: &str) -> bool {
        match self {
            SubjectFilter::CourseId(id) => *id == course_id,
            SubjectFilter::CodeContains(needle) => code.to_lowercase().contains(needle.as_str()),
        }
    }
}

fn scores(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> Result<Vec<i64>, ApiError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, |r| r.get::<_, i64>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn handle_student_report(state: &mut AppState, req: &Request) -> Result<Response, ApiError> {
    let me = authenticate(&state.db, req)?;
    me.require(Role::Student)?;

    let period = ReportPeriod::parse(req.query_param("period"));
    let subject = SubjectFilter::parse(req.query_param("subject"));
    let now = Utc::now();
    let cutoff = db::format_ts(period.cutoff(now));
    let conn = &state.db;

    let mut stmt = conn.prepare(
        "SELECT a.attention_score, a.timestamp, a.duration_seconds, a.class_session_id,
                c.id, c.code
         FROM attention_records a
         JOIN class_sessions s ON s.id = a.class_session_id
         JOIN courses c ON c.id = s.course_id
         WHERE a.student_id = ? AND a.timestamp >= ?
         ORDER BY a.timestamp DESC, a.id DESC",
    )?;
    let rows: Vec<ReportRow> = stmt
        .query_map((me.user_id, &cutoff), |r| {
            Ok(ReportRow {
                score: r.get(0)?,
                timestamp: r.get(1)?,
                duration_seconds: r.get(2)?,
                session_id: r.get(3)?,
                course_id: r.get(4)?,
                course_code: r.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    let rows: Vec<ReportRow> = rows
        .into_iter()
        .filter(|row| {
            subject
                .as_ref()
                .map_or(true, |f| f.matches(row.course_id, &row.course_code))
        })
        .collect();

    let sessions: HashSet<i64> = rows.iter().map(|r| r.session_id).collect();
    let total_seconds = rows
        .iter()
        .fold(0i64, |acc, r| acc.saturating_add(r.duration_seconds));
    let summary = json!({
        "average_attention": rounded_mean(rows.iter().map(|r| r.score)),
        "sessions_count": sessions.len(),
        "total_minutes": total_seconds / 60,
        "records_count": rows.len(),
    });

    // Newest-first rows; keep the latest points and present them oldest first.
    let timeline: Vec<serde_json::Value> = rows
        .iter()
        .take(TIMELINE_POINTS)
        .rev()
        .map(|r| {
            let time = db::parse_ts(&r.timestamp)
                .map(|t| t.format("%H:%M").to_string())
                .unwrap_or_default();
            json!({
                "timestamp": r.timestamp,
                "time": time,
                "attention": r.score,
                "course_code": r.course_code,
            })
        })
        .collect();

    let mut hours: BTreeMap<u32, Vec<i64>> = BTreeMap::new();
    for r in &rows {
        if let Some(t) = db::parse_ts(&r.timestamp) {
            hours.entry(t.hour()).or_default().push(r.score);
        }
    }
    let by_hour: Vec<serde_json::Value> = hours
        .into_iter()
        .map(|(hour, s)| {
            json!({
                "hour": format!("{:02}:00", hour),
                "attention": rounded_mean(s),
            })
        })
        .collect();

    let mut course_stmt = conn.prepare(
        "SELECT c.id, c.code, c.name
         FROM student_courses sc
         JOIN courses c ON c.id = sc.course_id
         WHERE sc.student_id = ?
         ORDER BY c.code",
    )?;
    let courses = course_stmt
        .query_map([me.user_id], |r| {
            Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?, r.get::<_, String>(2)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    let mut comparison = Vec::new();
    for (course_id, code, name) in courses {
        if let Some(f) = &subject {
            if !f.matches(course_id, &code) {
                continue;
            }
        }
        let student_scores = rows
            .iter()
            .filter(|r| r.course_id == course_id)
            .map(|r| r.score);
        let class_scores = scores(
            conn,
            "SELECT a.attention_score
             FROM attention_records a
             JOIN class_sessions s ON s.id = a.class_session_id
             WHERE s.course_id = ? AND a.timestamp >= ?",
            (course_id, &cutoff),
        )?;
        comparison.push(json!({
            "course_id": course_id,
            "course_code": code,
            "course_name": name,
            "student_average": rounded_mean(student_scores),
            "class_average": rounded_mean(class_scores),
        }));
    }

    let (total_events, auto_pauses): (i64, i64) = conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(event_type = 'auto_pause'), 0)
         FROM pomodoro_events
         WHERE student_id = ? AND timestamp >= ?",
        (me.user_id, &cutoff),
        |r| Ok((r.get(0)?, r.get(1)?)),
    )?;

    Ok(ok(json!({
        "period": period.as_str(),
        "subject": req.query_param("subject"),
        "range": { "from": cutoff, "to": db::format_ts(now) },
        "summary": summary,
        "timeline": timeline,
        "by_hour": by_hour,
        "comparison": comparison,
        "pomodoro": {
            "total_events": total_events,
            "auto_pauses": auto_pauses,
        },
    })))
}

fn handle_teacher_overview(state: &mut AppState, req: &Request) -> Result<Response, ApiError> {
    let me = authenticate(&state.db, req)?;
    me.require(Role::Teacher)?;
    let conn = &state.db;

    let (total_sessions, active_sessions): (i64, i64) = conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(status = 'active'), 0)
         FROM class_sessions WHERE teacher_id = ?",
        [me.user_id],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )?;
    let total_students: i64 = conn.query_row(
        "SELECT COUNT(DISTINCT student_id) FROM student_courses
         WHERE course_id IN (SELECT course_id FROM class_sessions WHERE teacher_id = ?)",
        [me.user_id],
        |r| r.get(0),
    )?;
    // Mean over the students' whole history, not only this teacher's sessions.
    let all_scores = scores(
        conn,
        "SELECT attention_score FROM attention_records
         WHERE student_id IN (
           SELECT student_id FROM student_courses
           WHERE course_id IN (SELECT course_id FROM class_sessions WHERE teacher_id = ?)
         )",
        [me.user_id],
    )?;

    Ok(ok(json!({
        "total_students": total_students,
        "total_sessions": total_sessions,
        "active_sessions": active_sessions,
        "average_attention": rounded_mean(all_scores),
    })))
}

fn handle_teacher_students(state: &mut AppState, req: &Request) -> Result<Response, ApiError> {
    let me = authenticate(&state.db, req)?;
    me.require(Role::Teacher)?;
    let conn = &state.db;

    let mut stmt = conn.prepare(
        "SELECT DISTINCT u.id, u.username, u.email, u.first_name, u.last_name, p.user_code
         FROM student_courses sc
         JOIN users u ON u.id = sc.student_id
         LEFT JOIN user_profiles p ON p.user_id = u.id
         WHERE sc.course_id IN (SELECT course_id FROM class_sessions WHERE teacher_id = ?)
         ORDER BY u.last_name, u.first_name, u.username",
    )?;
    let students = stmt
        .query_map([me.user_id], |r| {
            Ok((
                r.get::<_, i64>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
                r.get::<_, Option<String>>(5)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut out = Vec::with_capacity(students.len());
    for (student_id, username, email, first, last, user_code) in students {
        let mut att_stmt = conn.prepare_cached(
            "SELECT a.attention_score, a.class_session_id
             FROM attention_records a
             JOIN class_sessions s ON s.id = a.class_session_id
             WHERE a.student_id = ? AND s.teacher_id = ?",
        )?;
        let samples = att_stmt
            .query_map([student_id, me.user_id], |r| {
                Ok((r.get::<_, i64>(0)?, r.get::<_, i64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        let attended: HashSet<i64> = samples.iter().map(|(_, sid)| *sid).collect();

        let total_sessions: i64 = conn.query_row(
            "SELECT COUNT(*) FROM class_sessions
             WHERE teacher_id = ?
               AND course_id IN (SELECT course_id FROM student_courses WHERE student_id = ?)",
            [me.user_id, student_id],
            |r| r.get(0),
        )?;
        let mut course_stmt = conn.prepare_cached(
            "SELECT DISTINCT c.code
             FROM student_courses sc
             JOIN courses c ON c.id = sc.course_id
             JOIN class_sessions s ON s.course_id = c.id AND s.teacher_id = ?
             WHERE sc.student_id = ?
             ORDER BY c.code",
        )?;
        let courses = course_stmt
            .query_map([me.user_id, student_id], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        out.push(json!({
            "id": student_id,
            "name": display_name(&first, &last, &username),
            "username": username,
            "email": email,
            "userCode": user_code,
            "averageAttention": rounded_mean(samples.iter().map(|(score, _)| *score)),
            "sessionsAttended": attended.len(),
            "totalSessions": total_sessions,
            "courses": courses,
        }));
    }
    Ok(ok(json!(out)))
}

fn handle_admin_users(state: &mut AppState, req: &Request) -> Result<Response, ApiError> {
    let me = authenticate(&state.db, req)?;
    me.require(Role::Admin)?;

    let mut stmt = state.db.prepare(
        "SELECT u.id, u.username, u.email, u.first_name, u.last_name, u.date_joined, u.last_login,
                p.role, p.user_code, p.is_active
         FROM users u
         LEFT JOIN user_profiles p ON p.user_id = u.id
         ORDER BY u.id",
    )?;
    let users = stmt
        .query_map([], |r| {
            let username: String = r.get(1)?;
            let first: String = r.get(3)?;
            let last: String = r.get(4)?;
            let last_login: Option<String> = r.get(6)?;
            let role = r
                .get::<_, Option<String>>(7)?
                .as_deref()
                .and_then(Role::parse)
                .unwrap_or(Role::Student);
            let active = r.get::<_, Option<i64>>(9)?.unwrap_or(1) != 0;
            Ok(json!({
                "id": r.get::<_, i64>(0)?,
                "name": display_name(&first, &last, &username),
                "username": username,
                "email": r.get::<_, String>(2)?,
                "role": role.as_str(),
                "roleLabel": role.label(),
                "userCode": r.get::<_, Option<String>>(8)?,
                "status": if active { "active" } else { "inactive" },
                "dateJoined": r.get::<_, String>(5)?,
                "lastConnection": last_login.unwrap_or_else(|| "Never".to_string()),
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ok(json!(users)))
}

fn handle_admin_active_sessions(state: &mut AppState, req: &Request) -> Result<Response, ApiError> {
    let me = authenticate(&state.db, req)?;
    me.require(Role::Admin)?;
    let conn = &state.db;

    let mut stmt = conn.prepare(
        "SELECT s.id, s.title, s.date, s.time, s.status, s.course_id, c.name, c.code,
                u.first_name, u.last_name, u.username,
                (SELECT COUNT(*) FROM student_courses sc WHERE sc.course_id = s.course_id)
         FROM class_sessions s
         JOIN courses c ON c.id = s.course_id
         JOIN users u ON u.id = s.teacher_id
         WHERE s.status IN ('active', 'upcoming')
         ORDER BY s.date DESC, s.time DESC, s.id DESC",
    )?;
    let sessions = stmt
        .query_map([], |r| {
            let time: String = r.get(3)?;
            let first: String = r.get(8)?;
            let last: String = r.get(9)?;
            let username: String = r.get(10)?;
            Ok((
                r.get::<_, i64>(0)?,
                json!({
                    "title": r.get::<_, String>(1)?,
                    "date": r.get::<_, String>(2)?,
                    "time": time.get(..5).unwrap_or(time.as_str()),
                    "status": r.get::<_, String>(4)?,
                    "courseId": r.get::<_, i64>(5)?,
                    "course": r.get::<_, String>(6)?,
                    "courseCode": r.get::<_, String>(7)?,
                    "teacher": display_name(&first, &last, &username),
                    "studentsCount": r.get::<_, i64>(11)?,
                }),
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut out = Vec::with_capacity(sessions.len());
    for (session_id, mut row) in sessions {
        let session_scores = scores(
            conn,
            "SELECT attention_score FROM attention_records WHERE class_session_id = ?",
            [session_id],
        )?;
        row["id"] = json!(session_id);
        row["averageAttention"] = json!(rounded_mean(session_scores));
        out.push(row);
    }
    Ok(ok(json!(out)))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Result<Response, ApiError>> {
    let resp = match req.segments().as_slice() {
        ["student", "report"] => match req.method.as_str() {
            "GET" => handle_student_report(state, req),
            _ => Err(method_not_allowed(req)),
        },
        ["teacher", "overview"] => match req.method.as_str() {
            "GET" => handle_teacher_overview(state, req),
            _ => Err(method_not_allowed(req)),
        },
        ["teacher", "students"] => match req.method.as_str() {
            "GET" => handle_teacher_students(state, req),
            _ => Err(method_not_allowed(req)),
        },
        ["admin", "users"] => match req.method.as_str() {
            "GET" => handle_admin_users(state, req),
            _ => Err(method_not_allowed(req)),
        },
        ["admin", "active-sessions"] => match req.method.as_str() {
            "GET" => handle_admin_active_sessions(state, req),
            _ => Err(method_not_allowed(req)),
        },
        _ => return None,
    };
    Some(resp)
}
