#![allow(dead_code)]

use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use tempfile::TempDir;

/// A running `attentiond --stdio` over a fresh database in a temp dir.
pub struct Sidecar {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    dir: TempDir,
    next_id: u64,
}

pub fn spawn_sidecar() -> Sidecar {
    let dir = tempfile::tempdir().expect("create temp dir");
    let exe = env!("CARGO_BIN_EXE_attentiond");
    let mut child = Command::new(exe)
        .arg("--db")
        .arg(dir.path().join("attentiond.sqlite3"))
        .arg("--stdio")
        .env("RUST_LOG", "warn")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn attentiond");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    Sidecar {
        child,
        stdin,
        reader: BufReader::new(stdout),
        dir,
        next_id: 0,
    }
}

impl Sidecar {
    pub fn db_path(&self) -> PathBuf {
        self.dir.path().join("attentiond.sqlite3")
    }

    /// Direct handle on the sidecar's database for fixtures and row counts.
    pub fn open_db(&self) -> rusqlite::Connection {
        let conn = rusqlite::Connection::open(self.db_path()).expect("open db");
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .expect("busy timeout");
        conn
    }

    pub fn send_line(&mut self, line: &str) -> Value {
        writeln!(self.stdin, "{}", line).expect("write request");
        self.stdin.flush().expect("flush request");
        let mut out = String::new();
        self.reader.read_line(&mut out).expect("read response line");
        assert!(!out.trim().is_empty(), "empty response for {}", line);
        serde_json::from_str(out.trim()).expect("parse response json")
    }

    pub fn request(
        &mut self,
        method: &str,
        path: &str,
        token: Option<&str>,
        query: Value,
        body: Value,
    ) -> (u16, Value) {
        self.next_id += 1;
        let id = self.next_id.to_string();
        let payload = json!({
            "id": id,
            "method": method,
            "path": path,
            "query": query,
            "token": token,
            "body": body,
        });
        let reply = self.send_line(&payload.to_string());
        assert_eq!(reply.get("id").and_then(|v| v.as_str()), Some(id.as_str()));
        let status = reply
            .get("status")
            .and_then(|v| v.as_u64())
            .expect("status") as u16;
        (status, reply.get("body").cloned().unwrap_or(Value::Null))
    }

    pub fn get(&mut self, path: &str, token: Option<&str>) -> (u16, Value) {
        self.request("GET", path, token, json!({}), Value::Null)
    }

    pub fn get_query(&mut self, path: &str, token: Option<&str>, query: Value) -> (u16, Value) {
        self.request("GET", path, token, query, Value::Null)
    }

    pub fn post(&mut self, path: &str, token: Option<&str>, body: Value) -> (u16, Value) {
        self.request("POST", path, token, json!({}), body)
    }

    /// Registers a user and returns `(user id, token)`. `user_code` decides the
    /// role by prefix (DOC teacher, ADM admin, anything else student).
    pub fn register(&mut self, email: &str, user_code: Option<&str>) -> (i64, String) {
        let mut body = json!({
            "email": email,
            "password": "s3cret-pass",
            "full_name": "Test User",
        });
        if let Some(code) = user_code {
            body["user_id"] = json!(code);
        }
        let (status, resp) = self.post("/auth/register/", None, body);
        assert_eq!(status, 201, "register {}: {}", email, resp);
        let id = resp["user"]["id"].as_i64().expect("user id");
        let token = resp["token"].as_str().expect("token").to_string();
        (id, token)
    }

    pub fn create_course(&mut self, admin: &str, code: &str) -> i64 {
        let (status, resp) = self.post(
            "/admin/courses/",
            Some(admin),
            json!({ "name": format!("Course {}", code), "code": code }),
        );
        assert_eq!(status, 201, "create course: {}", resp);
        resp["id"].as_i64().expect("course id")
    }

    /// Assigns the teacher and returns the id of the session that creates.
    pub fn assign_teacher(&mut self, admin: &str, teacher_id: i64, course_id: i64) -> i64 {
        let (status, resp) = self.post(
            "/admin/assign-teacher/",
            Some(admin),
            json!({ "teacher_id": teacher_id, "course_id": course_id }),
        );
        assert_eq!(status, 201, "assign teacher: {}", resp);
        resp["id"].as_i64().expect("session id")
    }

    pub fn enroll(&mut self, admin: &str, student_id: i64, course_id: i64) -> u16 {
        let (status, resp) = self.post(
            "/admin/enroll-student/",
            Some(admin),
            json!({ "student_id": student_id, "course_id": course_id }),
        );
        assert!(status == 200 || status == 201, "enroll: {}", resp);
        status
    }

    pub fn record_attention(&mut self, student: &str, session_id: i64, score: f64) -> Value {
        let (status, resp) = self.post(
            "/student/record-attention/",
            Some(student),
            json!({ "class_session_id": session_id, "attention_score": score, "duration_seconds": 60 }),
        );
        assert_eq!(status, 201, "record attention: {}", resp);
        resp
    }
}

impl Drop for Sidecar {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Admin, teacher and student with one course taught by the teacher and the
/// student enrolled in it.
pub struct Classroom {
    pub admin: String,
    pub teacher_id: i64,
    pub teacher: String,
    pub student_id: i64,
    pub student: String,
    pub course_id: i64,
    pub session_id: i64,
}

pub fn classroom(sidecar: &mut Sidecar) -> Classroom {
    let (_, admin) = sidecar.register("admin@school.test", Some("ADM001"));
    let (teacher_id, teacher) = sidecar.register("teacher@school.test", Some("DOC001"));
    let (student_id, student) = sidecar.register("student@school.test", None);
    let course_id = sidecar.create_course(&admin, "MAT101");
    let session_id = sidecar.assign_teacher(&admin, teacher_id, course_id);
    sidecar.enroll(&admin, student_id, course_id);
    Classroom {
        admin,
        teacher_id,
        teacher,
        student_id,
        student,
        course_id,
        session_id,
    }
}
