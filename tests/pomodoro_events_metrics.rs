mod test_support;

use chrono::{Duration, SecondsFormat, Utc};
use serde_json::json;
use test_support::{classroom, spawn_sidecar};

#[test]
fn events_drive_the_cycle_and_metrics() {
    let mut sc = spawn_sidecar();
    let room = classroom(&mut sc);
    let status_query = json!({ "class_session_id": room.session_id.to_string() });

    let (status, idle) = sc.get_query("/student/pomodoro-status/", Some(&room.student), status_query.clone());
    assert_eq!(status, 200, "{idle}");
    assert_eq!(idle["status"], "idle");
    assert_eq!(idle["cycle"], 0);

    let (status, started) = sc.post(
        "/student/pomodoro-events/",
        Some(&room.student),
        json!({ "class_session_id": room.session_id, "event_type": "start" }),
    );
    assert_eq!(status, 201, "{started}");
    assert_eq!(started["pomodoro"]["status"], "working");
    assert_eq!(started["pomodoro"]["cycle"], 1);
    let remaining = started["pomodoro"]["time_remaining_in_current_phase"]
        .as_i64()
        .expect("remaining");
    assert!(remaining > 24 * 60 && remaining <= 25 * 60, "{remaining}");

    sc.record_attention(&room.student, room.session_id, 85.0);
    sc.record_attention(&room.student, room.session_id, 20.0);

    let (status, paused) = sc.post(
        "/student/pomodoro-events/",
        Some(&room.student),
        json!({ "class_session_id": room.session_id, "event_type": "auto_pause", "reason": "looked away" }),
    );
    assert_eq!(status, 201);
    assert_eq!(paused["reason"], "looked away");
    assert_eq!(paused["pomodoro"]["status"], "paused");

    let (status, current) = sc.get_query("/student/pomodoro-status/", Some(&room.student), status_query);
    assert_eq!(status, 200);
    assert_eq!(current["status"], "paused");
    assert_eq!(current["class_session"], room.session_id);

    let (status, ended) = sc.post(
        "/student/pomodoro-events/",
        Some(&room.student),
        json!({ "class_session_id": room.session_id, "event_type": "end" }),
    );
    assert_eq!(status, 201);
    assert_eq!(ended["pomodoro"]["status"], "idle");

    let (status, events) = sc.get("/student/pomodoro-events/", Some(&room.student));
    assert_eq!(status, 200);
    let events = events.as_array().expect("events");
    assert_eq!(events.len(), 3);
    assert_eq!(events[0]["event_type"], "end");
    assert_eq!(events[2]["event_type"], "start");

    let (status, metrics) = sc.get("/student/pomodoro-metrics/", Some(&room.student));
    assert_eq!(status, 200, "{metrics}");
    assert_eq!(metrics["total_events"], 3);
    assert_eq!(metrics["auto_pauses"], 1);
    assert_eq!(metrics["effective_seconds"], 120);
}

#[test]
fn invalid_pomodoro_requests() {
    let mut sc = spawn_sidecar();
    let room = classroom(&mut sc);

    let (status, resp) = sc.post(
        "/student/pomodoro-events/",
        Some(&room.student),
        json!({ "class_session_id": room.session_id, "event_type": "nap" }),
    );
    assert_eq!(status, 400, "{resp}");
    let (status, _) = sc.post(
        "/student/pomodoro-events/",
        Some(&room.student),
        json!({ "class_session_id": 777, "event_type": "start" }),
    );
    assert_eq!(status, 404);
    let (status, _) = sc.get("/student/pomodoro-status/", Some(&room.student));
    assert_eq!(status, 400);
    let (status, _) = sc.get("/student/pomodoro-metrics/", Some(&room.admin));
    assert_eq!(status, 403);

    let (status, metrics) = sc.get("/student/pomodoro-metrics/", Some(&room.student));
    assert_eq!(status, 200);
    assert_eq!(metrics["total_events"], 0);
    assert_eq!(metrics["effective_seconds"], 0);
}

#[test]
fn sustained_low_attention_during_a_break_marks_it_distracted() {
    let mut sc = spawn_sidecar();
    let room = classroom(&mut sc);

    for event in ["start", "manual_pause"] {
        let (status, resp) = sc.post(
            "/student/pomodoro-events/",
            Some(&room.student),
            json!({ "class_session_id": room.session_id, "event_type": event }),
        );
        assert_eq!(status, 201, "{resp}");
    }

    sc.record_attention(&room.student, room.session_id, 20.0);
    let conn = sc.open_db();
    let started: Option<String> = conn
        .query_row(
            "SELECT distraction_started_at FROM pomodoro_sessions
             WHERE student_id = ? AND class_session_id = ?",
            [room.student_id, room.session_id],
            |r| r.get(0),
        )
        .expect("pomodoro row");
    assert!(started.is_some(), "low sample during a break starts a distraction run");

    let earlier = (Utc::now() - Duration::seconds(31)).to_rfc3339_opts(SecondsFormat::Micros, true);
    conn.execute(
        "UPDATE pomodoro_sessions SET distraction_started_at = ?
         WHERE student_id = ? AND class_session_id = ?",
        (earlier, room.student_id, room.session_id),
    )
    .expect("backdate distraction");

    sc.record_attention(&room.student, room.session_id, 15.0);

    let (status, current) = sc.get_query(
        "/student/pomodoro-status/",
        Some(&room.student),
        json!({ "class_session_id": room.session_id.to_string() }),
    );
    assert_eq!(status, 200, "{current}");
    assert_eq!(current["status"], "break_distracted");
    assert_eq!(current["is_distracted_during_pause"], true);
    assert!(current["distraction_seconds"].as_i64().expect("seconds") >= 31);
    assert_eq!(current["cycle"], 1);
}

#[test]
fn attentive_samples_reset_the_distraction_run() {
    let mut sc = spawn_sidecar();
    let room = classroom(&mut sc);

    for event in ["start", "auto_pause"] {
        sc.post(
            "/student/pomodoro-events/",
            Some(&room.student),
            json!({ "class_session_id": room.session_id, "event_type": event }),
        );
    }
    sc.record_attention(&room.student, room.session_id, 20.0);
    sc.record_attention(&room.student, room.session_id, 85.0);

    let started: Option<String> = sc
        .open_db()
        .query_row(
            "SELECT distraction_started_at FROM pomodoro_sessions
             WHERE student_id = ? AND class_session_id = ?",
            [room.student_id, room.session_id],
            |r| r.get(0),
        )
        .expect("pomodoro row");
    assert_eq!(started, None);

    let (_, current) = sc.get_query(
        "/student/pomodoro-status/",
        Some(&room.student),
        json!({ "class_session_id": room.session_id.to_string() }),
    );
    assert_eq!(current["status"], "paused");
    assert_eq!(current["is_distracted_during_pause"], false);
}
