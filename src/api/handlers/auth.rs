use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

use super::shared::{is_unique_violation, is_unique_violation_on, method_not_allowed};
use crate::api::error::{created, ok, ApiError};
use crate::api::guard::authenticate;
use crate::api::params;
use crate::api::types::{AppState, Request, Response};
use crate::auth::{hash_password, new_token_key, verify_password};
use crate::db;
use crate::domain::Role;

struct Credentials {
    email: String,
    password: String,
}

fn read_credentials(body: &serde_json::Value) -> Result<Credentials, ApiError> {
    let email = params::optional_str(body, &["email"]);
    // Passwords are taken verbatim; surrounding whitespace is significant.
    let password = body
        .get("password")
        .and_then(|v| v.as_str())
        .filter(|p| !p.is_empty())
        .map(|p| p.to_string());
    match (email, password) {
        (Some(email), Some(password)) => Ok(Credentials { email, password }),
        _ => Err(ApiError::bad_request("Email and password required")),
    }
}

struct LoginCandidate {
    id: i64,
    username: String,
    email: String,
    password_hash: String,
}

fn find_candidate(conn: &Connection, sql: &str, value: &str) -> Result<Option<LoginCandidate>, ApiError> {
    Ok(conn
        .query_row(sql, [value], |r| {
            Ok(LoginCandidate {
                id: r.get(0)?,
                username: r.get(1)?,
                email: r.get(2)?,
                password_hash: r.get(3)?,
            })
        })
        .optional()?)
}

fn profile_role(conn: &Connection, user_id: i64) -> Result<Role, ApiError> {
    let role: Option<String> = conn
        .query_row(
            "SELECT role FROM user_profiles WHERE user_id = ?",
            [user_id],
            |r| r.get(0),
        )
        .optional()?;
    Ok(role.as_deref().and_then(Role::parse).unwrap_or(Role::Student))
}

/// Returns the user's token, creating it on first use.
fn get_or_create_token(conn: &Connection, user_id: i64) -> Result<String, ApiError> {
    conn.execute(
        "INSERT INTO auth_tokens(key, user_id, created_at)
         VALUES(?, ?, ?)
         ON CONFLICT(user_id) DO NOTHING",
        (new_token_key(), user_id, db::now_ts()),
    )?;
    Ok(conn.query_row(
        "SELECT key FROM auth_tokens WHERE user_id = ?",
        [user_id],
        |r| r.get(0),
    )?)
}

fn handle_login(state: &mut AppState, req: &Request) -> Result<Response, ApiError> {
    let creds = read_credentials(&req.body)?;
    let conn = &state.db;

    // The login field is tried as a username first, then as an email address.
    let mut candidates: Vec<LoginCandidate> = Vec::new();
    for sql in [
        "SELECT id, username, email, password_hash FROM users WHERE username = ?",
        "SELECT id, username, email, password_hash FROM users WHERE email = ? ORDER BY id LIMIT 1",
    ] {
        if let Some(c) = find_candidate(conn, sql, &creds.email)? {
            if !candidates.iter().any(|seen| seen.id == c.id) {
                candidates.push(c);
            }
        }
    }
    let Some(user) = candidates
        .into_iter()
        .find(|c| verify_password(&creds.password, &c.password_hash))
    else {
        tracing::info!(login = %creds.email, "rejected login");
        return Err(ApiError::Unauthorized("Invalid credentials".to_string()));
    };

    conn.execute(
        "UPDATE users SET last_login = ? WHERE id = ?",
        (db::now_ts(), user.id),
    )?;
    let token = get_or_create_token(conn, user.id)?;
    let role = profile_role(conn, user.id)?;

    Ok(ok(json!({
        "token": token,
        "user": {
            "id": user.id,
            "username": user.username,
            "email": user.email,
            "role": role.as_str(),
        }
    })))
}

fn unique_username(conn: &Connection, base: &str) -> Result<String, ApiError> {
    let base = if base.is_empty() { "user" } else { base };
    let mut candidate = base.to_string();
    let mut n = 1;
    loop {
        let taken = conn
            .query_row(
                "SELECT 1 FROM users WHERE username = ?",
                [&candidate],
                |r| r.get::<_, i64>(0),
            )
            .optional()?
            .is_some();
        if !taken {
            return Ok(candidate);
        }
        n += 1;
        candidate = format!("{base}{n}");
    }
}

fn handle_register(state: &mut AppState, req: &Request) -> Result<Response, ApiError> {
    let creds = read_credentials(&req.body)?;
    let full_name = params::optional_str(&req.body, &["full_name", "fullName"]).unwrap_or_default();
    let user_code = params::optional_str(&req.body, &["user_id", "userId"]);
    let role = user_code
        .as_deref()
        .map(Role::from_user_code)
        .unwrap_or(Role::Student);

    let conn = &state.db;
    let email_taken = conn
        .query_row("SELECT 1 FROM users WHERE email = ?", [&creds.email], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?
        .is_some();
    if email_taken {
        return Err(ApiError::bad_request("User with this email already exists"));
    }

    let password_hash = hash_password(&creds.password)?;
    let (first_name, last_name) = match full_name.split_once(char::is_whitespace) {
        Some((first, last)) => (first.to_string(), last.trim().to_string()),
        None => (full_name.clone(), String::new()),
    };
    let now = db::now_ts();

    // User, profile and token are written together or not at all.
    let tx = conn.unchecked_transaction()?;
    let local_part = creds.email.split('@').next().unwrap_or_default().trim();
    let username = unique_username(&tx, local_part)?;
    if let Err(e) = tx.execute(
        "INSERT INTO users(username, email, first_name, last_name, password_hash, date_joined)
         VALUES(?, ?, ?, ?, ?, ?)",
        (&username, &creds.email, &first_name, &last_name, &password_hash, &now),
    ) {
        if is_unique_violation_on(&e, "users.email") {
            return Err(ApiError::bad_request("User with this email already exists"));
        }
        if is_unique_violation_on(&e, "users.username") {
            return Err(ApiError::bad_request(format!(
                "Username {username} was taken concurrently, please retry"
            )));
        }
        return Err(e.into());
    }
    let user_id = tx.last_insert_rowid();

    let code = user_code.unwrap_or_else(|| format!("{}{:03}", role.code_prefix(), user_id));
    if let Err(e) = tx.execute(
        "INSERT INTO user_profiles(user_id, role, user_code, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?)",
        (user_id, role.as_str(), &code, &now, &now),
    ) {
        if is_unique_violation(&e) {
            return Err(ApiError::bad_request(format!("User id {code} is already in use")));
        }
        return Err(e.into());
    }
    let token = get_or_create_token(&tx, user_id)?;
    tx.commit()?;

    tracing::info!(user_id, role = role.as_str(), "registered user");
    Ok(created(json!({
        "token": token,
        "user": {
            "id": user_id,
            "username": username,
            "email": creds.email,
            "role": role.as_str(),
        }
    })))
}

fn handle_me(state: &mut AppState, req: &Request) -> Result<Response, ApiError> {
    let me = authenticate(&state.db, req)?;
    let profile = state
        .db
        .query_row(
            "SELECT user_code, phone, bio, avatar_url, is_active
             FROM user_profiles WHERE user_id = ?",
            [me.user_id],
            |r| {
                Ok(json!({
                    "user_code": r.get::<_, String>(0)?,
                    "phone": r.get::<_, String>(1)?,
                    "bio": r.get::<_, String>(2)?,
                    "avatar_url": r.get::<_, String>(3)?,
                    "is_active": r.get::<_, i64>(4)? != 0,
                }))
            },
        )
        .optional()?;

    let mut out = json!({
        "id": me.user_id,
        "username": me.username,
        "email": me.email,
        "first_name": me.first_name,
        "last_name": me.last_name,
        "role": me.effective_role().as_str(),
        "user_code": serde_json::Value::Null,
        "phone": "",
        "bio": "",
        "avatar_url": "",
        "is_active": true,
    });
    if let (Some(obj), Some(serde_json::Value::Object(p))) = (out.as_object_mut(), profile) {
        obj.extend(p);
    }
    Ok(ok(out))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Result<Response, ApiError>> {
    let resp = match req.segments().as_slice() {
        ["auth", "login"] => match req.method.as_str() {
            "POST" => handle_login(state, req),
            _ => Err(method_not_allowed(req)),
        },
        ["auth", "register"] => match req.method.as_str() {
            "POST" => handle_register(state, req),
            _ => Err(method_not_allowed(req)),
        },
        ["auth", "me"] => match req.method.as_str() {
            "GET" => handle_me(state, req),
            _ => Err(method_not_allowed(req)),
        },
        _ => return None,
    };
    Some(resp)
}
