use crate::pomodoro::PomodoroTimings;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "attentiond", version, about = "Classroom attention tracking backend")]
pub struct Config {
    /// SQLite database file.
    #[arg(long, env = "ATTENTIOND_DB", default_value = "attentiond.sqlite3")]
    pub db: PathBuf,

    /// Address the HTTP server listens on.
    #[arg(long, env = "ATTENTIOND_BIND", default_value = "127.0.0.1:8000")]
    pub bind: SocketAddr,

    /// Public prefix under which uploaded course materials are served.
    #[arg(long, env = "ATTENTIOND_MEDIA_URL", default_value = "/media/")]
    pub media_url: String,

    #[arg(long, env = "ATTENTIOND_WORK_MINUTES", default_value_t = 25)]
    pub work_minutes: i64,

    #[arg(long, env = "ATTENTIOND_SHORT_BREAK_MINUTES", default_value_t = 5)]
    pub short_break_minutes: i64,

    #[arg(long, env = "ATTENTIOND_LONG_BREAK_MINUTES", default_value_t = 15)]
    pub long_break_minutes: i64,

    /// Serve newline-delimited JSON requests on stdin/stdout instead of HTTP.
    #[arg(long)]
    pub stdio: bool,
}

impl Config {
    pub fn pomodoro_timings(&self) -> PomodoroTimings {
        PomodoroTimings {
            work: chrono::Duration::minutes(self.work_minutes.max(1)),
            short_break: chrono::Duration::minutes(self.short_break_minutes.max(1)),
            long_break: chrono::Duration::minutes(self.long_break_minutes.max(1)),
            ..PomodoroTimings::default()
        }
    }

    pub fn media_url_for(&self, file: &str) -> String {
        if self.media_url.ends_with('/') {
            format!("{}{}", self.media_url, file)
        } else {
            format!("{}/{}", self.media_url, file)
        }
    }
}
