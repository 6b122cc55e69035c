mod test_support;

use serde_json::{json, Value};
use test_support::spawn_sidecar;

#[test]
fn router_handles_unknown_paths_and_methods() {
    let mut sc = spawn_sidecar();

    let (status, health) = sc.get("/health/", None);
    assert_eq!(status, 200, "{health}");
    assert_eq!(health["status"], "ok");
    assert_eq!(health["users"], 0);

    let (status, resp) = sc.get("/nowhere/", None);
    assert_eq!(status, 404);
    assert_eq!(resp["detail"], "Not found.");

    let (status, resp) = sc.get("/auth/login/", None);
    assert_eq!(status, 405);
    assert_eq!(resp["detail"], "Method \"GET\" not allowed.");

    let (status, _) = sc.request("DELETE", "/student/report/", None, json!({}), Value::Null);
    assert_eq!(status, 405);

    let (_, token) = sc.register("slash@school.test", None);
    for path in ["/auth/me", "/auth/me/", "auth/me"] {
        let (status, _) = sc.get(path, Some(&token));
        assert_eq!(status, 200, "{path}");
    }
    let (status, _) = sc.request("get", "/auth/me/", Some(&token), json!({}), Value::Null);
    assert_eq!(status, 200);
}

#[test]
fn malformed_lines_get_a_bad_request_reply() {
    let mut sc = spawn_sidecar();

    let reply = sc.send_line("{not json");
    assert_eq!(reply["status"], 400);
    assert_eq!(reply["id"], Value::Null);

    let reply = sc.send_line(r#"{"id":"7","path":"/health/"}"#);
    assert_eq!(reply["status"], 400);
    assert_eq!(reply["id"], "7");

    // The transport keeps serving after a bad line.
    let (status, _) = sc.get("/health/", None);
    assert_eq!(status, 200);
}
