use crate::attendance::guard::UserLocks;
use crate::attendance::ports::{Notice, Notifier, RoleService};
use crate::attendance::stats::ActivityStats;
use crate::database::models::{AttendanceRecord, GuildSettings, Session};
use crate::database::queries;
use crate::error::{AttendanceError, Result};
use crate::utils::format::{COLOR_ERROR, COLOR_SUCCESS, format_session_duration};
use crate::utils::time::{format_time, local_date};
use chrono::{DateTime, FixedOffset, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckInOutcome {
    pub check_in: DateTime<Utc>,
    /// 1-based position of the new session within the day.
    pub session_number: usize,
    pub points_awarded: i64,
    /// `None` when the points ledger could not be updated.
    pub total_points: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutOutcome {
    pub session: Session,
    /// Human-readable length; never stored.
    pub display_duration: String,
}

/// The check-in/check-out state machine.
///
/// Both transitions hold the per-user lock for their whole duration, so a
/// check-in and a check-out for the same user never interleave.
pub struct AttendanceService {
    pool: SqlitePool,
    locks: UserLocks,
    roles: Arc<dyn RoleService>,
    notifier: Arc<dyn Notifier>,
    stats: Arc<ActivityStats>,
    offset: FixedOffset,
    check_in_points: i64,
}

impl AttendanceService {
    pub fn new(
        pool: SqlitePool,
        locks: UserLocks,
        roles: Arc<dyn RoleService>,
        notifier: Arc<dyn Notifier>,
        stats: Arc<ActivityStats>,
        offset: FixedOffset,
        check_in_points: i64,
    ) -> Self {
        Self {
            pool,
            locks,
            roles,
            notifier,
            stats,
            offset,
            check_in_points,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn roles(&self) -> &Arc<dyn RoleService> {
        &self.roles
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    pub fn stats(&self) -> &ActivityStats {
        &self.stats
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub fn locks(&self) -> &UserLocks {
        &self.locks
    }

    pub async fn check_in(
        &self,
        settings: &GuildSettings,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<CheckInOutcome> {
        let result = self.try_check_in(settings, user_id, now).await;
        match &result {
            Ok(_) => self.stats.record_check_in(),
            Err(e) if e.is_validation() => {}
            Err(e) => {
                self.stats.record_failure();
                tracing::error!("Check-in failed for user {} in guild {}: {}", user_id, settings.guild_id, e);
            }
        }
        result
    }

    async fn try_check_in(
        &self,
        settings: &GuildSettings,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<CheckInOutcome> {
        let _lock = self
            .locks
            .try_acquire(user_id)
            .ok_or(AttendanceError::OperationInProgress)?;

        let date = local_date(now, self.offset);
        let mut record = queries::find_record(&self.pool, user_id, &settings.guild_id, date)
            .await?
            .unwrap_or_else(|| AttendanceRecord::new(user_id, &settings.guild_id, date));

        record.start_session(now)?;
        queries::save_record(&self.pool, &record).await?;
        let session_number = record.sessions.len();

        tracing::info!(
            "User {} checked in to guild {} (session #{})",
            user_id,
            settings.guild_id,
            session_number
        );

        // Side effects never undo a persisted check-in.
        if let Err(e) = self
            .roles
            .add_role(&settings.guild_id, user_id, &settings.present_role_id)
            .await
        {
            tracing::warn!("Failed to add present role to {}: {}", user_id, e);
        }

        let notice = Notice::new(
            "✅ 出勤記録",
            format!("<@{}> が出勤しました", user_id),
            COLOR_SUCCESS,
            now,
        )
        .field("出勤時刻", format_time(now, self.offset), false);
        if let Err(e) = self.notifier.send(&settings.log_channel_id, notice).await {
            tracing::warn!("Failed to send check-in notice for {}: {}", user_id, e);
        }

        let total_points =
            match queries::add_points(&self.pool, user_id, &settings.guild_id, self.check_in_points).await {
                Ok(total) => Some(total),
                Err(e) => {
                    tracing::warn!("Failed to award check-in points to {}: {}", user_id, e);
                    None
                }
            };

        Ok(CheckInOutcome {
            check_in: now,
            session_number,
            points_awarded: if total_points.is_some() { self.check_in_points } else { 0 },
            total_points,
        })
    }

    pub async fn check_out(
        &self,
        settings: &GuildSettings,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<CheckOutOutcome> {
        let result = self.try_check_out(settings, user_id, now).await;
        match &result {
            Ok(_) => self.stats.record_check_out(),
            Err(e) if e.is_validation() => {}
            Err(e) => {
                self.stats.record_failure();
                tracing::error!("Check-out failed for user {} in guild {}: {}", user_id, settings.guild_id, e);
            }
        }
        result
    }

    async fn try_check_out(
        &self,
        settings: &GuildSettings,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<CheckOutOutcome> {
        let _lock = self
            .locks
            .try_acquire(user_id)
            .ok_or(AttendanceError::OperationInProgress)?;

        let date = local_date(now, self.offset);
        let mut record = queries::find_record(&self.pool, user_id, &settings.guild_id, date)
            .await?
            .ok_or(AttendanceError::NoOpenSession)?;

        let session = record.close_latest_session(now)?.clone();
        queries::save_record(&self.pool, &record).await?;

        tracing::info!(
            "User {} checked out of guild {} after {} minutes",
            user_id,
            settings.guild_id,
            session.duration
        );

        let check_out = session.check_out.unwrap_or(now);
        let display_duration = format_session_duration(session.check_in, check_out);

        if let Err(e) = self
            .roles
            .remove_role(&settings.guild_id, user_id, &settings.present_role_id)
            .await
        {
            tracing::warn!("Failed to remove present role from {}: {}", user_id, e);
        }

        let notice = Notice::new(
            "⏹️ 退勤記録",
            format!("<@{}> が退勤しました", user_id),
            COLOR_ERROR,
            now,
        )
        .field("出勤時刻", format_time(session.check_in, self.offset), true)
        .field("退勤時刻", format_time(check_out, self.offset), true)
        .field("勤務時間", display_duration.clone(), true);
        if let Err(e) = self.notifier.send(&settings.log_channel_id, notice).await {
            tracing::warn!("Failed to send check-out notice for {}: {}", user_id, e);
        }

        Ok(CheckOutOutcome {
            session,
            display_duration,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::attendance::ports::{MockNotifier, MockRoleService};
    use crate::database::test_pool;
    use crate::utils::time::reference_offset;
    use chrono::TimeZone;

    pub(crate) fn settings() -> GuildSettings {
        GuildSettings {
            guild_id: "g1".into(),
            present_role_id: "present".into(),
            log_channel_id: "log".into(),
            required_role_id: None,
        }
    }

    pub(crate) fn jst_at(d: u32, h: u32, m: u32) -> DateTime<Utc> {
        reference_offset(9)
            .unwrap()
            .with_ymd_and_hms(2024, 5, d, h, m, 0)
            .unwrap()
            .to_utc()
    }

    pub(crate) fn quiet_roles() -> MockRoleService {
        let mut roles = MockRoleService::new();
        roles.expect_add_role().returning(|_, _, _| Ok(()));
        roles.expect_remove_role().returning(|_, _, _| Ok(()));
        roles.expect_members_with_role().returning(|_, _| Ok(Vec::new()));
        roles.expect_fetch_member().returning(|_, _| Ok(None));
        roles
    }

    pub(crate) fn quiet_notifier() -> MockNotifier {
        let mut notifier = MockNotifier::new();
        notifier.expect_send().returning(|_, _| Ok(()));
        notifier
    }

    pub(crate) fn service_with(pool: SqlitePool, roles: MockRoleService, notifier: MockNotifier) -> AttendanceService {
        AttendanceService::new(
            pool,
            UserLocks::new(),
            Arc::new(roles),
            Arc::new(notifier),
            Arc::new(ActivityStats::default()),
            reference_offset(9).unwrap(),
            10,
        )
    }

    async fn service() -> AttendanceService {
        service_with(test_pool().await, quiet_roles(), quiet_notifier())
    }

    async fn stored(service: &AttendanceService, d: u32) -> Option<AttendanceRecord> {
        let date = local_date(jst_at(d, 12, 0), service.offset());
        queries::find_record(service.pool(), "u1", "g1", date).await.unwrap()
    }

    #[tokio::test]
    async fn check_in_then_check_out_round_trip() {
        let service = service().await;

        let outcome = service.check_in(&settings(), "u1", jst_at(1, 9, 0)).await.unwrap();
        assert_eq!(outcome.session_number, 1);
        assert_eq!(outcome.total_points, Some(10));

        let out = service.check_out(&settings(), "u1", jst_at(1, 17, 30)).await.unwrap();
        assert_eq!(out.session.duration, 510);
        assert_eq!(out.display_duration, "8時間30分");

        let record = stored(&service, 1).await.unwrap();
        assert_eq!(record.sessions.len(), 1);
        assert_eq!(record.sessions[0].check_out, Some(jst_at(1, 17, 30)));

        let second = service.check_in(&settings(), "u1", jst_at(1, 18, 0)).await.unwrap();
        assert_eq!(second.session_number, 2);
        assert_eq!(second.total_points, Some(20));
        let record = stored(&service, 1).await.unwrap();
        assert_eq!(record.sessions.len(), 2);
        assert_eq!(record.sessions.iter().filter(|s| s.is_open()).count(), 1);
        assert_eq!(service.stats().snapshot().check_ins, 2);
    }

    #[tokio::test]
    async fn duration_is_rounded_not_truncated() {
        let service = service().await;
        service.check_in(&settings(), "u1", jst_at(1, 9, 0)).await.unwrap();
        let out = service
            .check_out(&settings(), "u1", jst_at(1, 9, 0) + chrono::Duration::seconds(150))
            .await
            .unwrap();
        assert_eq!(out.session.duration, 3);
    }

    #[tokio::test]
    async fn check_in_twice_fails_and_leaves_record_unmodified() {
        let service = service().await;
        service.check_in(&settings(), "u1", jst_at(1, 9, 0)).await.unwrap();
        let before = stored(&service, 1).await;

        let err = service.check_in(&settings(), "u1", jst_at(1, 9, 5)).await.unwrap_err();
        assert!(matches!(err, AttendanceError::AlreadyCheckedIn { since } if since == jst_at(1, 9, 0)));
        assert_eq!(stored(&service, 1).await, before);
        assert!(!service.locks().is_held("u1"));
    }

    #[tokio::test]
    async fn check_out_without_open_session_fails() {
        let service = service().await;
        let err = service.check_out(&settings(), "u1", jst_at(1, 9, 0)).await.unwrap_err();
        assert!(matches!(err, AttendanceError::NoOpenSession));
        assert!(stored(&service, 1).await.is_none());

        service.check_in(&settings(), "u1", jst_at(1, 9, 0)).await.unwrap();
        service.check_out(&settings(), "u1", jst_at(1, 10, 0)).await.unwrap();
        let before = stored(&service, 1).await;
        let err = service.check_out(&settings(), "u1", jst_at(1, 11, 0)).await.unwrap_err();
        assert!(matches!(err, AttendanceError::NoOpenSession));
        assert_eq!(stored(&service, 1).await, before);
    }

    #[tokio::test]
    async fn check_in_is_rejected_while_lock_is_held() {
        let service = service().await;
        let _held = service.locks().try_acquire("u1").unwrap();

        let err = service.check_in(&settings(), "u1", jst_at(1, 9, 0)).await.unwrap_err();
        assert!(matches!(err, AttendanceError::OperationInProgress));
        let err = service.check_out(&settings(), "u1", jst_at(1, 9, 0)).await.unwrap_err();
        assert!(matches!(err, AttendanceError::OperationInProgress));
        assert!(stored(&service, 1).await.is_none());
    }

    #[tokio::test]
    async fn concurrent_check_ins_open_exactly_one_session() {
        let service = service().await;
        let settings = settings();

        let (a, b) = tokio::join!(
            service.check_in(&settings, "u1", jst_at(1, 9, 0)),
            service.check_in(&settings, "u1", jst_at(1, 9, 0)),
        );

        let successes = [&a, &b].iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1);
        let failure = if a.is_err() { a.unwrap_err() } else { b.unwrap_err() };
        assert!(matches!(
            failure,
            AttendanceError::AlreadyCheckedIn { .. } | AttendanceError::OperationInProgress
        ));

        let record = stored(&service, 1).await.unwrap();
        assert_eq!(record.sessions.len(), 1);
    }

    #[tokio::test]
    async fn persistence_failure_releases_lock() {
        let pool = test_pool().await;
        let service = service_with(pool.clone(), quiet_roles(), quiet_notifier());
        pool.close().await;

        let err = service.check_in(&settings(), "u1", jst_at(1, 9, 0)).await.unwrap_err();
        assert!(matches!(err, AttendanceError::Persistence(_)));
        assert!(!service.locks().is_held("u1"));
        assert_eq!(service.stats().snapshot().failures, 1);
    }

    #[tokio::test]
    async fn side_effect_failures_do_not_abort_check_in() {
        let mut roles = MockRoleService::new();
        roles
            .expect_add_role()
            .times(1)
            .returning(|_, _, _| Err(crate::error::ServiceError::Unavailable("gateway".into())));
        let mut notifier = MockNotifier::new();
        notifier
            .expect_send()
            .times(1)
            .returning(|_, _| Err(crate::error::ServiceError::Unavailable("gateway".into())));

        let service = service_with(test_pool().await, roles, notifier);
        let outcome = service.check_in(&settings(), "u1", jst_at(1, 9, 0)).await;
        assert!(outcome.is_ok());
        assert!(stored(&service, 1).await.unwrap().has_open_session());
    }

    #[tokio::test]
    async fn check_in_applies_role_and_log_notice() {
        let mut roles = MockRoleService::new();
        roles
            .expect_add_role()
            .withf(|guild: &str, user: &str, role: &str| guild == "g1" && user == "u1" && role == "present")
            .times(1)
            .returning(|_, _, _| Ok(()));
        let mut notifier = MockNotifier::new();
        notifier
            .expect_send()
            .withf(|channel: &str, notice: &Notice| channel == "log" && notice.fields[0].value == "09:00")
            .times(1)
            .returning(|_, _| Ok(()));

        let service = service_with(test_pool().await, roles, notifier);
        service.check_in(&settings(), "u1", jst_at(1, 9, 0)).await.unwrap();
    }

    #[tokio::test]
    async fn check_out_removes_role() {
        let mut roles = MockRoleService::new();
        roles.expect_add_role().returning(|_, _, _| Ok(()));
        roles
            .expect_remove_role()
            .withf(|guild: &str, user: &str, role: &str| guild == "g1" && user == "u1" && role == "present")
            .times(1)
            .returning(|_, _, _| Ok(()));

        let service = service_with(test_pool().await, roles, quiet_notifier());
        service.check_in(&settings(), "u1", jst_at(1, 9, 0)).await.unwrap();
        service.check_out(&settings(), "u1", jst_at(1, 10, 0)).await.unwrap();
    }
}
