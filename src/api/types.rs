use std::collections::HashMap;

use rusqlite::Connection;
use serde::Deserialize;

use crate::config::Config;

/// Transport-neutral request. The HTTP server builds one per call; the stdio
/// transport reads one per line.
#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    #[serde(default)]
    pub id: String,
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub query: HashMap<String, String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub body: serde_json::Value,
}

impl Request {
    /// Path split on `/` with empty segments dropped, so trailing slashes and
    /// an `/api` prefix supplied by the HTTP layer are already stripped.
    pub fn segments(&self) -> Vec<&str> {
        self.path
            .split('/')
            .filter(|s| !s.is_empty())
            .collect()
    }

    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query
            .get(key)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub body: serde_json::Value,
}

pub struct AppState {
    pub db: Connection,
    pub config: Config,
}
