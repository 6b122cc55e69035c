use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

use super::shared::{course_exists, is_enrolled, method_not_allowed, teaches_course};
use crate::api::error::{created, no_content, ok, ApiError};
use crate::api::guard::{authenticate, Identity};
use crate::api::params;
use crate::api::types::{AppState, Request, Response};
use crate::config::Config;
use crate::db;
use crate::domain::{FileType, Role};

const STORAGE_DIR: &str = "course_materials";

const MATERIAL_COLUMNS: &str =
    "m.id, m.course_id, m.title, m.description, m.file, m.file_type, m.is_active, m.uploaded_by, m.created_at";

fn material_from_row(r: &rusqlite::Row<'_>, config: &Config) -> rusqlite::Result<serde_json::Value> {
    let file: String = r.get(4)?;
    Ok(json!({
        "id": r.get::<_, i64>(0)?,
        "course": r.get::<_, i64>(1)?,
        "title": r.get::<_, String>(2)?,
        "description": r.get::<_, String>(3)?,
        "file": config.media_url_for(&file),
        "material_type": r.get::<_, String>(5)?,
        "is_active": r.get::<_, i64>(6)? != 0,
        "uploaded_by": r.get::<_, Option<i64>>(7)?,
        "created_at": r.get::<_, String>(8)?,
    }))
}

fn material_json(conn: &Connection, config: &Config, material_id: i64) -> Result<serde_json::Value, ApiError> {
    conn.query_row(
        &format!("SELECT {MATERIAL_COLUMNS} FROM course_materials m WHERE m.id = ?"),
        [material_id],
        |r| material_from_row(r, config),
    )
    .optional()?
    .ok_or_else(|| ApiError::not_found("Course material not found."))
}

fn list_materials(
    conn: &Connection,
    config: &Config,
    filter: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<serde_json::Value>, ApiError> {
    let sql = format!(
        "SELECT {MATERIAL_COLUMNS} FROM course_materials m {filter}
         ORDER BY m.created_at DESC, m.id DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params, |r| material_from_row(r, config))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Stored reference for an uploaded file name: `course_materials/<base name>`.
fn storage_path(file_name: &str) -> Result<String, ApiError> {
    let base = file_name
        .rsplit(['/', '\\'])
        .next()
        .map(str::trim)
        .filter(|b| !b.is_empty() && *b != "." && *b != "..")
        .ok_or_else(|| ApiError::bad_request("file_name is not a valid file name"))?;
    Ok(format!("{STORAGE_DIR}/{base}"))
}

fn can_access_course(conn: &Connection, me: &Identity, course_id: i64) -> Result<bool, ApiError> {
    match me.role {
        Some(Role::Admin) => Ok(true),
        _ => Ok(is_enrolled(conn, me.user_id, course_id)? || teaches_course(conn, me.user_id, course_id)?),
    }
}

fn handle_list(state: &mut AppState, req: &Request) -> Result<Response, ApiError> {
    let me = authenticate(&state.db, req)?;
    let materials = match me.role {
        Some(Role::Admin) => list_materials(&state.db, &state.config, "", [])?,
        _ => list_materials(
            &state.db,
            &state.config,
            "WHERE m.course_id IN (SELECT course_id FROM student_courses WHERE student_id = ?1)
                OR m.course_id IN (SELECT course_id FROM class_sessions WHERE teacher_id = ?1)",
            [me.user_id],
        )?,
    };
    Ok(ok(json!(materials)))
}

fn handle_create(state: &mut AppState, req: &Request) -> Result<Response, ApiError> {
    let me = authenticate(&state.db, req)?;
    me.require(Role::Teacher)?;

    let course_id = params::required_id(&req.body, &["course_id", "course"])?;
    let title = params::required_str(&req.body, &["title"])?;
    let file_name = params::required_str(&req.body, &["file_name", "file"])?;
    let description = params::optional_str(&req.body, &["description"]).unwrap_or_default();
    if !course_exists(&state.db, course_id)? {
        return Err(ApiError::not_found("Course not found."));
    }

    let file = storage_path(&file_name)?;
    let file_type = FileType::from_filename(&file_name);
    state.db.execute(
        "INSERT INTO course_materials(course_id, title, description, file, file_type, uploaded_by, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (course_id, &title, &description, &file, file_type.as_str(), me.user_id, db::now_ts()),
    )?;
    let material_id = state.db.last_insert_rowid();
    tracing::info!(material_id, course_id, file_type = file_type.as_str(), "course material added");

    Ok(created(material_json(&state.db, &state.config, material_id)?))
}

fn handle_get(state: &mut AppState, req: &Request, material_id: i64) -> Result<Response, ApiError> {
    authenticate(&state.db, req)?;
    Ok(ok(material_json(&state.db, &state.config, material_id)?))
}

fn handle_update(state: &mut AppState, req: &Request, material_id: i64) -> Result<Response, ApiError> {
    let me = authenticate(&state.db, req)?;
    me.require(Role::Teacher)?;
    // Existence first so an unknown id is 404 even for an empty patch.
    material_json(&state.db, &state.config, material_id)?;

    let body = &req.body;
    let tx = state.db.unchecked_transaction()?;
    if let Some(title) = params::optional_str(body, &["title"]) {
        tx.execute(
            "UPDATE course_materials SET title = ? WHERE id = ?",
            (&title, material_id),
        )?;
    }
    if body.get("description").is_some() {
        let description = params::optional_str(body, &["description"]).unwrap_or_default();
        tx.execute(
            "UPDATE course_materials SET description = ? WHERE id = ?",
            (&description, material_id),
        )?;
    }
    if let Some(active) = params::optional_bool(body, &["is_active"])? {
        tx.execute(
            "UPDATE course_materials SET is_active = ? WHERE id = ?",
            (active as i64, material_id),
        )?;
    }
    if let Some(file_name) = params::optional_str(body, &["file_name", "file"]) {
        let file = storage_path(&file_name)?;
        tx.execute(
            "UPDATE course_materials SET file = ?, file_type = ? WHERE id = ?",
            (&file, FileType::from_filename(&file_name).as_str(), material_id),
        )?;
    }
    if let Some(course_id) = params::optional_id(body, &["course_id", "course"])? {
        if !course_exists(&tx, course_id)? {
            return Err(ApiError::not_found("Course not found."));
        }
        tx.execute(
            "UPDATE course_materials SET course_id = ? WHERE id = ?",
            (course_id, material_id),
        )?;
    }
    tx.commit()?;

    Ok(ok(material_json(&state.db, &state.config, material_id)?))
}

fn handle_delete(state: &mut AppState, req: &Request, material_id: i64) -> Result<Response, ApiError> {
    let me = authenticate(&state.db, req)?;
    me.require(Role::Teacher)?;
    let removed = state
        .db
        .execute("DELETE FROM course_materials WHERE id = ?", [material_id])?;
    if removed == 0 {
        return Err(ApiError::not_found("Course material not found."));
    }
    tracing::info!(material_id, "course material deleted");
    Ok(no_content())
}

fn handle_by_course(state: &mut AppState, req: &Request, course_id: i64) -> Result<Response, ApiError> {
    let me = authenticate(&state.db, req)?;
    if !course_exists(&state.db, course_id)? {
        return Err(ApiError::not_found("Course not found."));
    }
    if !can_access_course(&state.db, &me, course_id)? {
        return Err(ApiError::Forbidden(
            "You are not enrolled in or teaching this course.".to_string(),
        ));
    }
    let materials = list_materials(
        &state.db,
        &state.config,
        "WHERE m.course_id = ?",
        [course_id],
    )?;
    Ok(ok(json!(materials)))
}

fn path_id(raw: &str) -> Result<i64, ApiError> {
    raw.parse::<i64>()
        .map_err(|_| ApiError::not_found("Not found."))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Result<Response, ApiError>> {
    let resp = match req.segments().as_slice() {
        ["course-materials"] => match req.method.as_str() {
            "GET" => handle_list(state, req),
            "POST" => handle_create(state, req),
            _ => Err(method_not_allowed(req)),
        },
        ["course-materials", "by-course", raw] => match req.method.as_str() {
            "GET" => path_id(raw).and_then(|id| handle_by_course(state, req, id)),
            _ => Err(method_not_allowed(req)),
        },
        ["course-materials", raw] => path_id(raw).and_then(|id| match req.method.as_str() {
            "GET" => handle_get(state, req, id),
            "PUT" | "PATCH" => handle_update(state, req, id),
            "DELETE" => handle_delete(state, req, id),
            _ => Err(method_not_allowed(req)),
        }),
        _ => return None,
    };
    Some(resp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_path_keeps_only_the_base_name() {
        assert_eq!(storage_path("notes.pdf").ok().as_deref(), Some("course_materials/notes.pdf"));
        assert_eq!(
            storage_path("C:\\Users\\t\\Lecture 1.MP4").ok().as_deref(),
            Some("course_materials/Lecture 1.MP4")
        );
        assert!(storage_path("uploads/..").is_err());
        assert!(storage_path("dir/").is_err());
    }
}
