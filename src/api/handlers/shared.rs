use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

use crate::api::error::ApiError;
use crate::api::types::Request;
use crate::db;
use crate::domain::{display_name, Role};

pub fn method_not_allowed(req: &Request) -> ApiError {
    ApiError::MethodNotAllowed(req.method.clone())
}

/// True only for UNIQUE index violations; CHECK, NOT NULL and foreign key
/// failures are real errors.
pub fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _) if f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

/// UNIQUE violation on `table.column`, as named in SQLite's error message.
pub fn is_unique_violation_on(e: &rusqlite::Error, column: &str) -> bool {
    match e {
        rusqlite::Error::SqliteFailure(_, Some(msg)) => {
            is_unique_violation(e) && msg.contains(column)
        }
        _ => false,
    }
}

pub fn course_exists(conn: &Connection, course_id: i64) -> Result<bool, ApiError> {
    Ok(conn
        .query_row("SELECT 1 FROM courses WHERE id = ?", [course_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?
        .is_some())
}

pub fn session_exists(conn: &Connection, session_id: i64) -> Result<bool, ApiError> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM class_sessions WHERE id = ?",
            [session_id],
            |r| r.get::<_, i64>(0),
        )
        .optional()?
        .is_some())
}

/// `None` when the user does not exist; `Some(None)` when it has no profile.
pub fn user_role(conn: &Connection, user_id: i64) -> Result<Option<Option<Role>>, ApiError> {
    let row: Option<Option<String>> = conn
        .query_row(
            "SELECT p.role FROM users u
             LEFT JOIN user_profiles p ON p.user_id = u.id
             WHERE u.id = ?",
            [user_id],
            |r| r.get(0),
        )
        .optional()?;
    Ok(row.map(|role| role.as_deref().and_then(Role::parse)))
}

pub fn teaches_course(conn: &Connection, teacher_id: i64, course_id: i64) -> Result<bool, ApiError> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM class_sessions WHERE teacher_id = ? AND course_id = ? LIMIT 1",
            [teacher_id, course_id],
            |r| r.get::<_, i64>(0),
        )
        .optional()?
        .is_some())
}

pub fn is_enrolled(conn: &Connection, student_id: i64, course_id: i64) -> Result<bool, ApiError> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM student_courses WHERE student_id = ? AND course_id = ?",
            [student_id, course_id],
            |r| r.get::<_, i64>(0),
        )
        .optional()?
        .is_some())
}

/// Single conditional insert; concurrent callers cannot create duplicates.
/// Returns the enrollment id and whether this call created it.
pub fn enroll(conn: &Connection, student_id: i64, course_id: i64) -> Result<(i64, bool), ApiError> {
    let inserted = conn.execute(
        "INSERT INTO student_courses(student_id, course_id, enrolled_at)
         VALUES(?, ?, ?)
         ON CONFLICT(student_id, course_id) DO NOTHING",
        (student_id, course_id, db::now_ts()),
    )?;
    let id: i64 = conn.query_row(
        "SELECT id FROM student_courses WHERE student_id = ? AND course_id = ?",
        [student_id, course_id],
        |r| r.get(0),
    )?;
    Ok((id, inserted == 1))
}

pub fn course_json(conn: &Connection, course_id: i64) -> Result<serde_json::Value, ApiError> {
    conn.query_row(
        "SELECT id, name, code, description, created_at FROM courses WHERE id = ?",
        [course_id],
        |r| {
            Ok(json!({
                "id": r.get::<_, i64>(0)?,
                "name": r.get::<_, String>(1)?,
                "code": r.get::<_, String>(2)?,
                "description": r.get::<_, String>(3)?,
                "created_at": r.get::<_, String>(4)?,
            }))
        },
    )
    .optional()?
    .ok_or_else(|| ApiError::not_found("Course not found."))
}

pub fn user_json(conn: &Connection, user_id: i64) -> Result<serde_json::Value, ApiError> {
    conn.query_row(
        "SELECT u.id, u.username, u.email, u.first_name, u.last_name, p.role, p.user_code
         FROM users u
         LEFT JOIN user_profiles p ON p.user_id = u.id
         WHERE u.id = ?",
        [user_id],
        |r| {
            let username: String = r.get(1)?;
            let first: String = r.get(3)?;
            let last: String = r.get(4)?;
            let role: Option<String> = r.get(5)?;
            Ok(json!({
                "id": r.get::<_, i64>(0)?,
                "name": display_name(&first, &last, &username),
                "username": username,
                "email": r.get::<_, String>(2)?,
                "first_name": first,
                "last_name": last,
                "role": role.unwrap_or_else(|| Role::Student.as_str().to_string()),
                "user_code": r.get::<_, Option<String>>(6)?,
            }))
        },
    )
    .optional()?
    .ok_or_else(|| ApiError::not_found("User not found."))
}

pub fn session_json(conn: &Connection, session_id: i64) -> Result<serde_json::Value, ApiError> {
    let row = conn
        .query_row(
            "SELECT id, course_id, teacher_id, title, date, time, duration_minutes, status, created_at
             FROM class_sessions WHERE id = ?",
            [session_id],
            |r| {
                Ok((
                    r.get::<_, i64>(0)?,
                    r.get::<_, i64>(1)?,
                    r.get::<_, i64>(2)?,
                    json!({
                        "title": r.get::<_, String>(3)?,
                        "date": r.get::<_, String>(4)?,
                        "time": r.get::<_, String>(5)?,
                        "duration_minutes": r.get::<_, i64>(6)?,
                        "status": r.get::<_, String>(7)?,
                        "created_at": r.get::<_, String>(8)?,
                    }),
                ))
            },
        )
        .optional()?;
    let Some((id, course_id, teacher_id, mut out)) = row else {
        return Err(ApiError::not_found("Class session not found."));
    };
    out["id"] = json!(id);
    out["course"] = course_json(conn, course_id)?;
    out["teacher"] = user_json(conn, teacher_id)?;
    Ok(out)
}

pub fn enrollment_json(conn: &Connection, enrollment_id: i64) -> Result<serde_json::Value, ApiError> {
    let (student_id, course_id, enrolled_at): (i64, i64, String) = conn
        .query_row(
            "SELECT student_id, course_id, enrolled_at FROM student_courses WHERE id = ?",
            [enrollment_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()?
        .ok_or_else(|| ApiError::not_found("Enrollment not found."))?;
    Ok(json!({
        "id": enrollment_id,
        "student": user_json(conn, student_id)?,
        "course": course_json(conn, course_id)?,
        "enrolled_at": enrolled_at,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_unique_indexes_count_as_unique_violations() {
        let conn = Connection::open_in_memory().expect("open");
        conn.execute(
            "CREATE TABLE people(email TEXT UNIQUE, age INTEGER CHECK(age > 0))",
            [],
        )
        .expect("create");
        conn.execute("INSERT INTO people(email, age) VALUES('a@x', 1)", [])
            .expect("insert");

        let dup = conn
            .execute("INSERT INTO people(email, age) VALUES('a@x', 2)", [])
            .expect_err("duplicate email");
        assert!(is_unique_violation(&dup));
        assert!(is_unique_violation_on(&dup, "people.email"));
        assert!(!is_unique_violation_on(&dup, "people.age"));

        let check = conn
            .execute("INSERT INTO people(email, age) VALUES('b@x', 0)", [])
            .expect_err("check failure");
        assert!(!is_unique_violation(&check));
    }
}
