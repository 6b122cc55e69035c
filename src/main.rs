mod api;
mod auth;
mod config;
mod db;
mod domain;
mod http;
mod pomodoro;

use std::io::{self, BufRead, Write};

use anyhow::Context;
use clap::Parser;
use serde_json::json;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let config = config::Config::parse();

    // stdout belongs to the stdio transport, so logs always go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let conn = db::open_db(&config.db)
        .with_context(|| format!("failed to open database {}", config.db.display()))?;
    tracing::info!(db = %config.db.display(), stdio = config.stdio, "database ready");
    let state = api::AppState { db: conn, config };

    if state.config.stdio {
        run_stdio(state)
    } else {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("failed to start async runtime")?;
        runtime.block_on(http::serve(state))
    }
}

/// One JSON request per input line, one `{id, status, body}` reply per output line.
fn run_stdio(mut state: api::AppState) -> anyhow::Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = line.context("failed to read request line")?;
        if line.trim().is_empty() {
            continue;
        }

        let reply = match serde_json::from_str::<api::Request>(&line) {
            Ok(req) => {
                let id = req.id.clone();
                let resp = api::handle_request(&mut state, req);
                json!({ "id": id, "status": resp.status, "body": resp.body })
            }
            Err(e) => {
                // Echo the id back when the line was JSON but not a valid request.
                let id = serde_json::from_str::<serde_json::Value>(&line)
                    .ok()
                    .and_then(|v| v.get("id").cloned())
                    .unwrap_or(serde_json::Value::Null);
                json!({ "id": id, "status": 400, "body": { "detail": format!("bad request: {e}") } })
            }
        };

        writeln!(stdout, "{reply}").context("failed to write reply")?;
        stdout.flush().context("failed to flush reply")?;
    }
    Ok(())
}
