use crate::error::{AttendanceError, Result};
use crate::utils::time::session_minutes;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// One check-in/check-out pair. Owned by its `AttendanceRecord`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub check_in: DateTime<Utc>,
    pub check_out: Option<DateTime<Utc>>,
    /// Whole minutes, 0 while open.
    pub duration: i64,
}

impl Session {
    pub fn open(check_in: DateTime<Utc>) -> Self {
        Self {
            check_in,
            check_out: None,
            duration: 0,
        }
    }

    pub fn is_open(&self) -> bool {
        self.check_out.is_none()
    }

    fn close(&mut self, at: DateTime<Utc>) {
        let at = at.max(self.check_in);
        self.check_out = Some(at);
        self.duration = session_minutes(self.check_in, at);
    }
}

/// Attendance of one user in one guild on one reference-timezone day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub user_id: String,
    pub guild_id: String,
    pub date: NaiveDate,
    /// Chronological check-in order; at most one entry is open.
    pub sessions: Vec<Session>,
}

impl AttendanceRecord {
    pub fn new(user_id: &str, guild_id: &str, date: NaiveDate) -> Self {
        Self {
            user_id: user_id.to_string(),
            guild_id: guild_id.to_string(),
            date,
            sessions: Vec::new(),
        }
    }

    pub fn open_session(&self) -> Option<&Session> {
        self.sessions.iter().find(|session| session.is_open())
    }

    pub fn has_open_session(&self) -> bool {
        self.open_session().is_some()
    }

    /// Appends a new open session unless one is already open.
    pub fn start_session(&mut self, now: DateTime<Utc>) -> Result<&Session> {
        if let Some(open) = self.open_session() {
            return Err(AttendanceError::AlreadyCheckedIn {
                since: open.check_in,
            });
        }

        self.sessions.push(Session::open(now));
        Ok(&self.sessions[self.sessions.len() - 1])
    }

    /// Closes the latest session. Fails when there is none or it is already closed.
    pub fn close_latest_session(&mut self, now: DateTime<Utc>) -> Result<&Session> {
        match self.sessions.last_mut() {
            Some(latest) if latest.is_open() => {
                latest.close(now);
                Ok(&*latest)
            }
            _ => Err(AttendanceError::NoOpenSession),
        }
    }

    /// Closes every open session at `now` and returns how many were closed.
    pub fn close_all_open(&mut self, now: DateTime<Utc>) -> usize {
        let mut closed = 0;
        for session in self.sessions.iter_mut().filter(|session| session.is_open()) {
            session.close(now);
            closed += 1;
        }
        closed
    }

    pub fn closed_sessions(&self) -> impl Iterator<Item = &Session> {
        self.sessions.iter().filter(|session| !session.is_open())
    }

    pub fn total_minutes(&self) -> i64 {
        self.closed_sessions().map(|session| session.duration).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveStatus {
    Approved,
    Pending,
    Rejected,
}

impl LeaveStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeaveStatus::Approved => "approved",
            LeaveStatus::Pending => "pending",
            LeaveStatus::Rejected => "rejected",
        }
    }
}

impl TryFrom<String> for LeaveStatus {
    type Error = AttendanceError;

    fn try_from(s: String) -> Result<Self> {
        match s.as_str() {
            "approved" => Ok(LeaveStatus::Approved),
            "pending" => Ok(LeaveStatus::Pending),
            "rejected" => Ok(LeaveStatus::Rejected),
            _ => Err(AttendanceError::NotFound(format!("leave status {}", s))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaveRecord {
    pub user_id: String,
    pub guild_id: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub status: LeaveStatus,
}

impl LeaveRecord {
    pub fn covers(&self, date: NaiveDate) -> bool {
        self.status == LeaveStatus::Approved && self.start_date <= date && date <= self.end_date
    }
}

/// Per-guild ids resolved once by `/setup`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuildSettings {
    pub guild_id: String,
    pub present_role_id: String,
    pub log_channel_id: String,
    /// Members holding this role are expected to attend every day.
    pub required_role_id: Option<String>,
}
