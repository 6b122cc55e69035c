mod test_support;

use serde_json::json;
use test_support::spawn_sidecar;

#[test]
fn enrolling_twice_keeps_one_row() {
    let mut sc = spawn_sidecar();
    let (_, admin) = sc.register("admin@school.test", Some("ADM001"));
    let (student_id, _) = sc.register("student@school.test", None);
    let course_id = sc.create_course(&admin, "HIS200");

    let body = json!({ "student_id": student_id, "course_id": course_id });
    let (status, first) = sc.post("/admin/enroll-student/", Some(&admin), body.clone());
    assert_eq!(status, 201, "{first}");
    assert_eq!(first["created"], true);
    assert_eq!(first["student"]["id"], student_id);
    assert_eq!(first["course"]["code"], "HIS200");

    let (status, second) = sc.post("/admin/enroll-student/", Some(&admin), body);
    assert_eq!(status, 200, "{second}");
    assert_eq!(second["created"], false);
    assert_eq!(second["id"], first["id"]);

    let rows: i64 = sc
        .open_db()
        .query_row(
            "SELECT COUNT(*) FROM student_courses WHERE student_id = ? AND course_id = ?",
            [student_id, course_id],
            |r| r.get(0),
        )
        .expect("count enrollments");
    assert_eq!(rows, 1);
}

#[test]
fn enrollment_targets_are_validated() {
    let mut sc = spawn_sidecar();
    let (_, admin) = sc.register("admin@school.test", Some("ADM001"));
    let (teacher_id, teacher) = sc.register("teacher@school.test", Some("DOC001"));
    let (student_id, _) = sc.register("student@school.test", None);
    let course_id = sc.create_course(&admin, "HIS200");

    let (status, _) = sc.post(
        "/admin/enroll-student/",
        Some(&admin),
        json!({ "student_id": teacher_id, "course_id": course_id }),
    );
    assert_eq!(status, 400);

    let (status, _) = sc.post(
        "/admin/enroll-student/",
        Some(&admin),
        json!({ "student_id": student_id, "course_id": 9999 }),
    );
    assert_eq!(status, 404);

    let (status, _) = sc.post(
        "/admin/enroll-student/",
        Some(&admin),
        json!({ "student_id": 9999, "course_id": course_id }),
    );
    assert_eq!(status, 404);

    // Teachers may only enroll into courses they teach.
    let teacher_body = json!({ "student_id": student_id, "course_id": course_id });
    let (status, _) = sc.post("/teacher/student-courses/", Some(&teacher), teacher_body.clone());
    assert_eq!(status, 403);

    sc.assign_teacher(&admin, teacher_id, course_id);
    let (status, resp) = sc.post("/teacher/student-courses/", Some(&teacher), teacher_body.clone());
    assert_eq!(status, 201, "{resp}");
    let (status, _) = sc.post("/teacher/student-courses/", Some(&teacher), teacher_body);
    assert_eq!(status, 200);

    let (status, list) = sc.get_query(
        "/teacher/student-courses/",
        Some(&teacher),
        json!({ "course_id": course_id.to_string() }),
    );
    assert_eq!(status, 200, "{list}");
    assert_eq!(list.as_array().map(|l| l.len()), Some(1));
}

#[test]
fn teacher_sessions_belong_to_the_caller() {
    let mut sc = spawn_sidecar();
    let (_, admin) = sc.register("admin@school.test", Some("ADM001"));
    let (teacher_id, teacher) = sc.register("teacher@school.test", Some("DOC001"));
    let (other_id, _) = sc.register("other@school.test", Some("DOC002"));
    let (student_id, student) = sc.register("student@school.test", None);
    let course_id = sc.create_course(&admin, "BIO110");

    let (status, session) = sc.post(
        "/teacher/class-sessions/",
        Some(&teacher),
        json!({
            "course_id": course_id,
            "teacher_id": other_id,
            "title": "Cells",
            "date": "2025-03-10",
            "time": "09:30",
            "status": "active",
        }),
    );
    assert_eq!(status, 201, "{session}");
    assert_eq!(session["teacher"]["id"], teacher_id);
    assert_eq!(session["time"], "09:30:00");
    assert_eq!(session["duration_minutes"], 60);

    let (status, _) = sc.post(
        "/teacher/class-sessions/",
        Some(&teacher),
        json!({ "course_id": course_id, "date": "10/03/2025", "time": "09:30" }),
    );
    assert_eq!(status, 400);

    sc.enroll(&admin, student_id, course_id);
    let (status, courses) = sc.get("/student/courses/", Some(&student));
    assert_eq!(status, 200, "{courses}");
    assert_eq!(courses[0]["course_code"], "BIO110");
    assert_eq!(courses[0]["time"], "09:30");
    assert_eq!(courses[0]["professor"], "Test User");

    let (status, listed) = sc.get("/teacher/class-sessions/", Some(&teacher));
    assert_eq!(status, 200);
    assert_eq!(listed.as_array().map(|l| l.len()), Some(1));
}
