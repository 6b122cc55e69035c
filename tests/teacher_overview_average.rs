mod test_support;

use test_support::{classroom, spawn_sidecar};

#[test]
fn overview_averages_student_history_with_rounding() {
    let mut sc = spawn_sidecar();
    let room = classroom(&mut sc);

    for score in [90.0, 40.0, 60.0] {
        sc.record_attention(&room.student, room.session_id, score);
    }

    let (status, overview) = sc.get("/teacher/overview/", Some(&room.teacher));
    assert_eq!(status, 200, "{overview}");
    assert_eq!(overview["total_students"], 1);
    assert_eq!(overview["total_sessions"], 1);
    assert_eq!(overview["active_sessions"], 0);
    assert_eq!(overview["average_attention"], 63);

    let (status, roster) = sc.get("/teacher/students/", Some(&room.teacher));
    assert_eq!(status, 200, "{roster}");
    let roster = roster.as_array().expect("roster");
    assert_eq!(roster.len(), 1);
    assert_eq!(roster[0]["id"], room.student_id);
    assert_eq!(roster[0]["averageAttention"], 63);
    assert_eq!(roster[0]["sessionsAttended"], 1);
    assert_eq!(roster[0]["totalSessions"], 1);
    assert_eq!(roster[0]["courses"][0], "MAT101");
    assert_eq!(roster[0]["name"], "Test User");

    let (status, _) = sc.get("/teacher/overview/", Some(&room.student));
    assert_eq!(status, 403);
}

#[test]
fn teacher_without_courses_sees_zeroes() {
    let mut sc = spawn_sidecar();
    let (_, teacher) = sc.register("lonely@school.test", Some("DOC050"));

    let (status, overview) = sc.get("/teacher/overview/", Some(&teacher));
    assert_eq!(status, 200);
    assert_eq!(overview["total_students"], 0);
    assert_eq!(overview["total_sessions"], 0);
    assert_eq!(overview["average_attention"], 0);

    let (status, roster) = sc.get("/teacher/students/", Some(&teacher));
    assert_eq!(status, 200);
    assert_eq!(roster.as_array().map(|r| r.len()), Some(0));
}
