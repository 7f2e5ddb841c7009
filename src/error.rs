use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors raised by the attendance core.
///
/// Every variant is recoverable: callers surface `user_message()` to the member and
/// log the `Display` form, which may carry internal detail.
#[derive(Debug, Error)]
pub enum AttendanceError {
    #[error("user already has an open session since {since}")]
    AlreadyCheckedIn { since: DateTime<Utc> },

    #[error("no open session to close")]
    NoOpenSession,

    #[error("another attendance operation is in progress for this user")]
    OperationInProgress,

    #[error("persistence failure: {0}")]
    Persistence(#[from] sqlx::Error),

    #[error("stored session data is malformed: {0}")]
    CorruptRecord(#[from] serde_json::Error),

    #[error("external service unavailable: {0}")]
    ExternalServiceUnavailable(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl AttendanceError {
    /// Short localized text that is safe to show to end users.
    pub fn user_message(&self) -> &'static str {
        match self {
            AttendanceError::AlreadyCheckedIn { .. } => "既に出勤中です。先に退勤を記録してください。",
            AttendanceError::NoOpenSession => "出勤中のセッションがありません。",
            AttendanceError::OperationInProgress => "前のリクエストを処理中です。しばらくお待ちください。",
            AttendanceError::Persistence(_) | AttendanceError::CorruptRecord(_) => {
                "記録の保存に失敗しました。時間をおいて再度お試しください。"
            }
            AttendanceError::ExternalServiceUnavailable(_) => {
                "Discord との通信に失敗しました。時間をおいて再度お試しください。"
            }
            AttendanceError::NotFound(_) => "対象が見つかりませんでした。",
        }
    }

    /// Validation outcomes of the state machine, as opposed to infrastructure failures.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            AttendanceError::AlreadyCheckedIn { .. }
                | AttendanceError::NoOpenSession
                | AttendanceError::OperationInProgress
        )
    }
}

/// Failures reported by the role/membership and notification collaborators.
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl From<ServiceError> for AttendanceError {
    fn from(error: ServiceError) -> Self {
        match error {
            ServiceError::Unavailable(message) => AttendanceError::ExternalServiceUnavailable(message),
            ServiceError::NotFound(message) => AttendanceError::NotFound(message),
        }
    }
}

pub type Result<T> = std::result::Result<T, AttendanceError>;
