use crate::database::models::{AttendanceRecord, GuildSettings, LeaveRecord, LeaveStatus, Session};
use crate::error::Result;
use chrono::NaiveDate;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

const RECORD_COLUMNS: &str = "user_id, guild_id, date, sessions";

fn record_from_row(row: &SqliteRow) -> Result<AttendanceRecord> {
    let sessions_json: String = row.try_get("sessions")?;
    let sessions: Vec<Session> = serde_json::from_str(&sessions_json)?;

    Ok(AttendanceRecord {
        user_id: row.try_get("user_id")?,
        guild_id: row.try_get("guild_id")?,
        date: row.try_get("date")?,
        sessions,
    })
}

fn records_from_rows(rows: &[SqliteRow]) -> Result<Vec<AttendanceRecord>> {
    rows.iter().map(record_from_row).collect()
}

// Attendance record queries
pub async fn find_record(
    pool: &SqlitePool,
    user_id: &str,
    guild_id: &str,
    date: NaiveDate,
) -> Result<Option<AttendanceRecord>> {
    let row = sqlx::query(&format!(
        "SELECT {RECORD_COLUMNS} FROM attendance_records
         WHERE user_id = ? AND guild_id = ? AND date = ?"
    ))
    .bind(user_id)
    .bind(guild_id)
    .bind(date)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(record_from_row).transpose()
}

/// Inserts or replaces the record keyed by (user, guild, date).
pub async fn save_record(pool: &SqlitePool, record: &AttendanceRecord) -> Result<()> {
    let sessions_json = serde_json::to_string(&record.sessions)?;

    sqlx::query(
        "INSERT INTO attendance_records (user_id, guild_id, date, sessions, has_open_session)
         VALUES (?, ?, ?, ?, ?)
         ON CONFLICT (user_id, guild_id, date) DO UPDATE SET
             sessions = excluded.sessions,
             has_open_session = excluded.has_open_session,
             updated_at = CURRENT_TIMESTAMP",
    )
    .bind(&record.user_id)
    .bind(&record.guild_id)
    .bind(record.date)
    .bind(sessions_json)
    .bind(record.has_open_session())
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn find_records_for_day(
    pool: &SqlitePool,
    guild_id: &str,
    date: NaiveDate,
) -> Result<Vec<AttendanceRecord>> {
    let rows = sqlx::query(&format!(
        "SELECT {RECORD_COLUMNS} FROM attendance_records
         WHERE guild_id = ? AND date = ?
         ORDER BY user_id ASC"
    ))
    .bind(guild_id)
    .bind(date)
    .fetch_all(pool)
    .await?;

    records_from_rows(&rows)
}

pub async fn find_open_records(pool: &SqlitePool, guild_id: &str) -> Result<Vec<AttendanceRecord>> {
    let rows = sqlx::query(&format!(
        "SELECT {RECORD_COLUMNS} FROM attendance_records
         WHERE guild_id = ? AND has_open_session = TRUE
         ORDER BY date ASC, user_id ASC"
    ))
    .bind(guild_id)
    .fetch_all(pool)
    .await?;

    records_from_rows(&rows)
}

/// Records of one user with `start_date <= date <= end_date`, newest first.
pub async fn find_user_records_in_range(
    pool: &SqlitePool,
    user_id: &str,
    guild_id: &str,
    start_date: NaiveDate,
    end_date: NaiveDate,
) -> Result<Vec<AttendanceRecord>> {
    let rows = sqlx::query(&format!(
        "SELECT {RECORD_COLUMNS} FROM attendance_records
         WHERE user_id = ? AND guild_id = ? AND date >= ? AND date <= ?
         ORDER BY date DESC"
    ))
    .bind(user_id)
    .bind(guild_id)
    .bind(start_date)
    .bind(end_date)
    .fetch_all(pool)
    .await?;

    records_from_rows(&rows)
}

/// Removes everything stored for a guild. Returns the number of attendance records deleted.
pub async fn purge_guild_data(pool: &SqlitePool, guild_id: &str) -> Result<u64> {
    let mut tx = pool.begin().await?;

    let deleted = sqlx::query("DELETE FROM attendance_records WHERE guild_id = ?")
        .bind(guild_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    for table in ["leave_records", "points", "guild_settings"] {
        sqlx::query(&format!("DELETE FROM {table} WHERE guild_id = ?"))
            .bind(guild_id)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(deleted)
}

// Leave record queries
pub async fn create_leave_record(pool: &SqlitePool, leave: &LeaveRecord) -> Result<()> {
    sqlx::query(
        "INSERT INTO leave_records (user_id, guild_id, start_date, end_date, status)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&leave.user_id)
    .bind(&leave.guild_id)
    .bind(leave.start_date)
    .bind(leave.end_date)
    .bind(leave.status.as_str())
    .execute(pool)
    .await?;

    Ok(())
}

/// Approved leaves of a guild that overlap `[start_date, end_date]`.
pub async fn find_approved_leaves(
    pool: &SqlitePool,
    guild_id: &str,
    start_date: NaiveDate,
    end_date: NaiveDate,
) -> Result<Vec<LeaveRecord>> {
    let rows = sqlx::query(
        "SELECT user_id, guild_id, start_date, end_date, status FROM leave_records
         WHERE guild_id = ? AND status = ? AND start_date <= ? AND end_date >= ?
         ORDER BY start_date ASC",
    )
    .bind(guild_id)
    .bind(LeaveStatus::Approved.as_str())
    .bind(end_date)
    .bind(start_date)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            Ok(LeaveRecord {
                user_id: row.try_get("user_id")?,
                guild_id: row.try_get("guild_id")?,
                start_date: row.try_get("start_date")?,
                end_date: row.try_get("end_date")?,
                status: LeaveStatus::try_from(row.try_get::<String, _>("status")?)?,
            })
        })
        .collect()
}

// Points queries
pub async fn add_points(pool: &SqlitePool, user_id: &str, guild_id: &str, amount: i64) -> Result<i64> {
    let total: i64 = sqlx::query_scalar(
        "INSERT INTO points (user_id, guild_id, total) VALUES (?, ?, ?)
         ON CONFLICT (user_id, guild_id) DO UPDATE SET
             total = total + excluded.total,
             updated_at = CURRENT_TIMESTAMP
         RETURNING total",
    )
    .bind(user_id)
    .bind(guild_id)
    .bind(amount)
    .fetch_one(pool)
    .await?;

    Ok(total)
}

// Guild settings queries
pub async fn upsert_guild_settings(pool: &SqlitePool, settings: &GuildSettings) -> Result<()> {
    sqlx::query(
        "INSERT INTO guild_settings (guild_id, present_role_id, log_channel_id, required_role_id)
         VALUES (?, ?, ?, ?)
         ON CONFLICT (guild_id) DO UPDATE SET
             present_role_id = excluded.present_role_id,
             log_channel_id = excluded.log_channel_id,
             required_role_id = excluded.required_role_id,
             updated_at = CURRENT_TIMESTAMP",
    )
    .bind(&settings.guild_id)
    .bind(&settings.present_role_id)
    .bind(&settings.log_channel_id)
    .bind(&settings.required_role_id)
    .execute(pool)
    .await?;

    Ok(())
}

fn settings_from_row(row: &SqliteRow) -> Result<GuildSettings> {
    Ok(GuildSettings {
        guild_id: row.try_get("guild_id")?,
        present_role_id: row.try_get("present_role_id")?,
        log_channel_id: row.try_get("log_channel_id")?,
        required_role_id: row.try_get("required_role_id")?,
    })
}

pub async fn get_guild_settings(pool: &SqlitePool, guild_id: &str) -> Result<Option<GuildSettings>> {
    let row = sqlx::query(
        "SELECT guild_id, present_role_id, log_channel_id, required_role_id
         FROM guild_settings WHERE guild_id = ?",
    )
    .bind(guild_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(settings_from_row).transpose()
}

pub async fn list_guild_settings(pool: &SqlitePool) -> Result<Vec<GuildSettings>> {
    let rows = sqlx::query(
        "SELECT guild_id, present_role_id, log_channel_id, required_role_id
         FROM guild_settings ORDER BY guild_id ASC",
    )
    .fetch_all(pool)
    .await?;

    rows.iter().map(settings_from_row).collect()
}
