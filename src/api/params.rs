//! Body field readers. Web clients send ids both as numbers and as numeric
//! strings, so id readers accept either.

use serde_json::Value;

use super::error::ApiError;

fn first_present<'a>(body: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| body.get(*k))
        .find(|v| !v.is_null())
}

pub fn optional_str(body: &Value, keys: &[&str]) -> Option<String> {
    first_present(body, keys)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn required_str(body: &Value, keys: &[&str]) -> Result<String, ApiError> {
    optional_str(body, keys).ok_or_else(|| missing(keys))
}

pub fn parse_id(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// `Ok(None)` when absent; `BadRequest` when present but not an id.
pub fn optional_id(body: &Value, keys: &[&str]) -> Result<Option<i64>, ApiError> {
    match first_present(body, keys) {
        None => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(v) => parse_id(v)
            .map(Some)
            .ok_or_else(|| ApiError::bad_request(format!("{} must be an integer id", keys[0]))),
    }
}

pub fn required_id(body: &Value, keys: &[&str]) -> Result<i64, ApiError> {
    optional_id(body, keys)?.ok_or_else(|| missing(keys))
}

pub fn optional_number(body: &Value, keys: &[&str]) -> Result<Option<f64>, ApiError> {
    match first_present(body, keys) {
        None => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| ApiError::bad_request(format!("{} must be a number", keys[0]))),
        Some(_) => Err(ApiError::bad_request(format!("{} must be a number", keys[0]))),
    }
}

pub fn optional_bool(body: &Value, keys: &[&str]) -> Result<Option<bool>, ApiError> {
    match first_present(body, keys) {
        None => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(Some(true)),
            "false" | "0" => Ok(Some(false)),
            _ => Err(ApiError::bad_request(format!("{} must be a boolean", keys[0]))),
        },
        Some(_) => Err(ApiError::bad_request(format!("{} must be a boolean", keys[0]))),
    }
}

fn missing(keys: &[&str]) -> ApiError {
    ApiError::bad_request(format!("{} is required", keys[0]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ids_accept_numbers_and_numeric_strings() {
        let body = json!({ "class_session_id": "12", "course": 4, "bad": "x" });
        assert_eq!(required_id(&body, &["class_session_id"]).ok(), Some(12));
        assert_eq!(required_id(&body, &["course_id", "course"]).ok(), Some(4));
        assert!(matches!(
            required_id(&body, &["bad"]),
            Err(ApiError::BadRequest(_))
        ));
        assert!(matches!(
            required_id(&body, &["missing"]),
            Err(ApiError::BadRequest(_))
        ));
    }

    #[test]
    fn blank_strings_count_as_missing() {
        let body = json!({ "email": "  ", "title": " Notes " });
        assert_eq!(optional_str(&body, &["email"]), None);
        assert_eq!(required_str(&body, &["title"]).ok(), Some("Notes".to_string()));
    }

    #[test]
    fn numbers_and_bools() {
        let body = json!({ "score": "72.5", "flag": "false", "n": 3 });
        assert_eq!(optional_number(&body, &["score"]).ok().flatten(), Some(72.5));
        assert_eq!(optional_number(&body, &["n"]).ok().flatten(), Some(3.0));
        assert_eq!(optional_bool(&body, &["flag"]).ok().flatten(), Some(false));
        assert!(optional_bool(&body, &["n"]).is_err());
    }
}
