use crate::domain::{AttentionLevel, PomodoroEventType};
use chrono::{DateTime, Duration, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PomodoroStatus {
    Idle,
    Working,
    Paused,
    BreakDistracted,
}

impl PomodoroStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PomodoroStatus::Idle => "idle",
            PomodoroStatus::Working => "working",
            PomodoroStatus::Paused => "paused",
            PomodoroStatus::BreakDistracted => "break_distracted",
        }
    }

    pub fn parse(raw: &str) -> Option<PomodoroStatus> {
        match raw {
            "idle" => Some(PomodoroStatus::Idle),
            "working" => Some(PomodoroStatus::Working),
            "paused" => Some(PomodoroStatus::Paused),
            "break_distracted" => Some(PomodoroStatus::BreakDistracted),
            _ => None,
        }
    }

    fn is_break(self) -> bool {
        matches!(self, PomodoroStatus::Paused | PomodoroStatus::BreakDistracted)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PomodoroTimings {
    pub work: Duration,
    pub short_break: Duration,
    pub long_break: Duration,
    pub long_break_every: u32,
    pub distraction_tolerance: Duration,
}

impl Default for PomodoroTimings {
    fn default() -> Self {
        PomodoroTimings {
            work: Duration::minutes(25),
            short_break: Duration::minutes(5),
            long_break: Duration::minutes(15),
            long_break_every: 4,
            distraction_tolerance: Duration::seconds(30),
        }
    }
}

/// Per (student, class session) work/break cycle.
///
/// Driven by logged Pomodoro events and by incoming attention samples. A break
/// turns into `BreakDistracted` once low attention persists for the tolerance
/// window, and the break timer starts over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PomodoroState {
    pub status: PomodoroStatus,
    pub cycle: u32,
    pub phase_started_at: Option<DateTime<Utc>>,
    pub work_seconds: i64,
    pub distraction_started_at: Option<DateTime<Utc>>,
    pub distraction_seconds: i64,
    pub distracted_during_pause: bool,
}

impl Default for PomodoroState {
    fn default() -> Self {
        PomodoroState {
            status: PomodoroStatus::Idle,
            cycle: 0,
            phase_started_at: None,
            work_seconds: 0,
            distraction_started_at: None,
            distraction_seconds: 0,
            distracted_during_pause: false,
        }
    }
}

impl PomodoroState {
    pub fn apply_event(&mut self, event: PomodoroEventType, now: DateTime<Utc>, t: &PomodoroTimings) {
        self.advance(now, t);
        match event {
            PomodoroEventType::Start => {
                if self.status == PomodoroStatus::Working {
                    return;
                }
                self.cycle += 1;
                self.status = PomodoroStatus::Working;
                self.phase_started_at = Some(now);
                self.distraction_started_at = None;
                self.distracted_during_pause = false;
            }
            PomodoroEventType::ManualPause | PomodoroEventType::AutoPause => {
                if self.status != PomodoroStatus::Working {
                    return;
                }
                self.bank_work(now, t);
                self.status = PomodoroStatus::Paused;
                self.phase_started_at = Some(now);
                self.distraction_started_at = None;
            }
            PomodoroEventType::End => {
                if self.status == PomodoroStatus::Working {
                    self.bank_work(now, t);
                }
                self.status = PomodoroStatus::Idle;
                self.phase_started_at = None;
                self.distraction_started_at = None;
                self.distracted_during_pause = false;
            }
        }
    }

    pub fn observe_attention(&mut self, level: AttentionLevel, now: DateTime<Utc>, t: &PomodoroTimings) {
        self.advance(now, t);
        if !self.status.is_break() {
            self.distraction_started_at = None;
            return;
        }
        if level != AttentionLevel::Low {
            self.distraction_started_at = None;
            return;
        }
        let started = *self.distraction_started_at.get_or_insert(now);
        let run = now - started;
        if run >= t.distraction_tolerance {
            self.distraction_seconds += run.num_seconds();
            self.status = PomodoroStatus::BreakDistracted;
            self.distracted_during_pause = true;
            self.phase_started_at = Some(now);
            self.distraction_started_at = None;
        }
    }

    /// Closes a work phase that ran past its length.
    pub fn advance(&mut self, now: DateTime<Utc>, t: &PomodoroTimings) {
        if self.status != PomodoroStatus::Working {
            return;
        }
        let Some(started) = self.phase_started_at else {
            return;
        };
        if now - started >= t.work {
            self.work_seconds += t.work.num_seconds();
            self.status = PomodoroStatus::Paused;
            self.phase_started_at = Some(started + t.work);
        }
    }

    pub fn break_length(&self, t: &PomodoroTimings) -> Duration {
        if self.cycle > 0 && t.long_break_every > 0 && self.cycle % t.long_break_every == 0 {
            t.long_break
        } else {
            t.short_break
        }
    }

    pub fn time_remaining(&self, now: DateTime<Utc>, t: &PomodoroTimings) -> i64 {
        let Some(started) = self.phase_started_at else {
            return 0;
        };
        let length = match self.status {
            PomodoroStatus::Idle => return 0,
            PomodoroStatus::Working => t.work,
            PomodoroStatus::Paused | PomodoroStatus::BreakDistracted => self.break_length(t),
        };
        (length - (now - started)).num_seconds().max(0)
    }

    fn bank_work(&mut self, now: DateTime<Utc>, t: &PomodoroTimings) {
        if let Some(started) = self.phase_started_at {
            let elapsed = (now - started).clamp(Duration::zero(), t.work);
            self.work_seconds += elapsed.num_seconds();
        }
    }
}
