use chrono::{DateTime, Duration, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Student,
    Teacher,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Teacher => "teacher",
            Role::Admin => "admin",
        }
    }

    pub fn parse(raw: &str) -> Option<Role> {
        match raw {
            "student" => Some(Role::Student),
            "teacher" => Some(Role::Teacher),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }

    /// Institutional ids carry the role in their prefix: `DOC…` for teachers,
    /// `ADM…` for administrators. Anything else registers as a student.
    pub fn from_user_code(code: &str) -> Role {
        let upper = code.trim().to_ascii_uppercase();
        if upper.starts_with("DOC") {
            Role::Teacher
        } else if upper.starts_with("ADM") {
            Role::Admin
        } else {
            Role::Student
        }
    }

    pub fn code_prefix(self) -> &'static str {
        match self {
            Role::Student => "EST",
            Role::Teacher => "DOC",
            Role::Admin => "ADM",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Role::Student => "Student",
            Role::Teacher => "Teacher",
            Role::Admin => "Administrator",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttentionLevel {
    High,
    Medium,
    Low,
}

pub const HIGH_ATTENTION_MIN: i64 = 80;
pub const MEDIUM_ATTENTION_MIN: i64 = 50;

impl AttentionLevel {
    pub fn from_score(score: i64) -> AttentionLevel {
        if score >= HIGH_ATTENTION_MIN {
            AttentionLevel::High
        } else if score >= MEDIUM_ATTENTION_MIN {
            AttentionLevel::Medium
        } else {
            AttentionLevel::Low
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AttentionLevel::High => "high",
            AttentionLevel::Medium => "medium",
            AttentionLevel::Low => "low",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Active,
    Upcoming,
    Completed,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Upcoming => "upcoming",
            SessionStatus::Completed => "completed",
        }
    }

    pub fn parse(raw: &str) -> Option<SessionStatus> {
        match raw.trim() {
            "active" => Some(SessionStatus::Active),
            "upcoming" => Some(SessionStatus::Upcoming),
            "completed" => Some(SessionStatus::Completed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Pdf,
    Video,
    Other,
}

const VIDEO_EXTENSIONS: [&str; 4] = ["mp4", "mov", "avi", "wmv"];

impl FileType {
    pub fn from_filename(name: &str) -> FileType {
        let ext = std::path::Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("pdf") => FileType::Pdf,
            Some(e) if VIDEO_EXTENSIONS.contains(&e) => FileType::Video,
            _ => FileType::Other,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FileType::Pdf => "pdf",
            FileType::Video => "video",
            FileType::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PomodoroEventType {
    Start,
    ManualPause,
    AutoPause,
    End,
}

impl PomodoroEventType {
    pub fn parse(raw: &str) -> Option<PomodoroEventType> {
        match raw.trim() {
            "start" => Some(PomodoroEventType::Start),
            "manual_pause" => Some(PomodoroEventType::ManualPause),
            "auto_pause" => Some(PomodoroEventType::AutoPause),
            "end" => Some(PomodoroEventType::End),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PomodoroEventType::Start => "start",
            PomodoroEventType::ManualPause => "manual_pause",
            PomodoroEventType::AutoPause => "auto_pause",
            PomodoroEventType::End => "end",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportPeriod {
    Week,
    Month,
    Semester,
}

impl ReportPeriod {
    /// Unknown or missing periods fall back to a month.
    pub fn parse(raw: Option<&str>) -> ReportPeriod {
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("week") => ReportPeriod::Week,
            Some("semester") => ReportPeriod::Semester,
            _ => ReportPeriod::Month,
        }
    }

    pub fn days(self) -> i64 {
        match self {
            ReportPeriod::Week => 7,
            ReportPeriod::Month => 30,
            ReportPeriod::Semester => 120,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReportPeriod::Week => "week",
            ReportPeriod::Month => "month",
            ReportPeriod::Semester => "semester",
        }
    }

    /// Records are in the window iff `timestamp >= cutoff`.
    pub fn cutoff(self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::days(self.days())
    }
}

/// Integer mean with half-to-even rounding; empty input averages to 0.
pub fn rounded_mean<I>(values: I) -> i64
where
    I: IntoIterator<Item = i64>,
{
    let mut sum: i64 = 0;
    let mut count: i64 = 0;
    for v in values {
        sum += v;
        count += 1;
    }
    if count == 0 {
        return 0;
    }
    (sum as f64 / count as f64).round_ties_even() as i64
}

/// Display name used by listings: "first last", or the username when both are blank.
pub fn display_name(first: &str, last: &str, username: &str) -> String {
    let full = format!("{} {}", first.trim(), last.trim());
    let full = full.trim();
    if full.is_empty() {
        username.to_string()
    } else {
        full.to_string()
    }
}
