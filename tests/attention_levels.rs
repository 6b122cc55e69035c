mod test_support;

use serde_json::json;
use test_support::{classroom, spawn_sidecar};

#[test]
fn scores_map_to_levels_at_the_boundaries() {
    let mut sc = spawn_sidecar();
    let room = classroom(&mut sc);

    for (score, stored, level) in [
        (100.0, 100, "high"),
        (80.0, 80, "high"),
        (79.6, 80, "high"),
        (79.0, 79, "medium"),
        (50.0, 50, "medium"),
        (49.0, 49, "low"),
        (0.0, 0, "low"),
    ] {
        let resp = sc.record_attention(&room.student, room.session_id, score);
        assert_eq!(resp["attention_score"], stored, "score {score}");
        assert_eq!(resp["attention_level"], level, "score {score}");
        assert_eq!(resp["class_session"], room.session_id);
    }
}

#[test]
fn invalid_attention_samples_are_rejected() {
    let mut sc = spawn_sidecar();
    let room = classroom(&mut sc);

    for body in [
        json!({ "class_session_id": room.session_id, "attention_score": 101 }),
        json!({ "class_session_id": room.session_id, "attention_score": -1 }),
        json!({ "class_session_id": room.session_id, "attention_score": "high" }),
        json!({ "class_session_id": room.session_id }),
        json!({ "attention_score": 70 }),
    ] {
        let (status, resp) = sc.post("/student/record-attention/", Some(&room.student), body.clone());
        assert_eq!(status, 400, "{body}: {resp}");
    }

    let (status, _) = sc.post(
        "/student/record-attention/",
        Some(&room.student),
        json!({ "class_session_id": 4242, "attention_score": 70 }),
    );
    assert_eq!(status, 404);

    let (status, _) = sc.post(
        "/student/record-attention/",
        Some(&room.teacher),
        json!({ "class_session_id": room.session_id, "attention_score": 70 }),
    );
    assert_eq!(status, 403);

    let stored: i64 = sc
        .open_db()
        .query_row("SELECT COUNT(*) FROM attention_records", [], |r| r.get(0))
        .expect("count records");
    assert_eq!(stored, 0);
}

#[test]
fn feature_records_round_trip_as_json() {
    let mut sc = spawn_sidecar();
    let room = classroom(&mut sc);

    let (status, resp) = sc.post(
        "/student/feature-records/",
        Some(&room.student),
        json!({ "class_session_id": room.session_id, "features": { "ear": 0.31, "yaw": [1, 2, 3] } }),
    );
    assert_eq!(status, 201, "{resp}");
    let (status, _) = sc.post(
        "/student/feature-records/",
        Some(&room.student),
        json!({ "class_session_id": room.session_id, "features": [0.5, 0.25] }),
    );
    assert_eq!(status, 201);

    let (status, resp) = sc.post(
        "/student/feature-records/",
        Some(&room.student),
        json!({ "class_session_id": room.session_id }),
    );
    assert_eq!(status, 400, "{resp}");

    let (status, list) = sc.get("/student/feature-records/", Some(&room.student));
    assert_eq!(status, 200);
    let list = list.as_array().expect("feature list");
    assert_eq!(list.len(), 2);
    assert_eq!(list[0]["features"], json!([0.5, 0.25]));
    assert_eq!(list[1]["features"]["yaw"], json!([1, 2, 3]));
}

#[test]
fn oversized_durations_are_rejected_and_totals_saturate() {
    let mut sc = spawn_sidecar();
    let room = classroom(&mut sc);

    for duration in [json!(1e300), json!(86_401), json!(-5)] {
        let (status, resp) = sc.post(
            "/student/record-attention/",
            Some(&room.student),
            json!({ "class_session_id": room.session_id, "attention_score": 70, "duration_seconds": duration }),
        );
        assert_eq!(status, 400, "{duration}: {resp}");
    }
    let (status, resp) = sc.post(
        "/student/record-attention/",
        Some(&room.student),
        json!({ "class_session_id": room.session_id, "attention_score": 70, "duration_seconds": 86_400 }),
    );
    assert_eq!(status, 201, "{resp}");
    assert_eq!(resp["duration_seconds"], 86_400);

    // Rows written before the ceiling existed must not break the aggregates.
    let conn = sc.open_db();
    for _ in 0..2 {
        conn.execute(
            "INSERT INTO attention_records(
               student_id, class_session_id, attention_score, attention_level, timestamp, duration_seconds)
             VALUES(?, ?, 70, 'medium', ?, ?)",
            (
                room.student_id,
                room.session_id,
                chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true),
                i64::MAX,
            ),
        )
        .expect("insert huge duration");
    }

    let (status, metrics) = sc.get("/student/pomodoro-metrics/", Some(&room.student));
    assert_eq!(status, 200, "{metrics}");
    assert_eq!(metrics["effective_seconds"], i64::MAX);

    let (status, report) = sc.get("/student/report/", Some(&room.student));
    assert_eq!(status, 200, "{report}");
    assert_eq!(report["summary"]["records_count"], 3);
    assert_eq!(report["summary"]["total_minutes"], i64::MAX / 60);
}
