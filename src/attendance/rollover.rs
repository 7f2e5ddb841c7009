//! End-of-day jobs: forced checkout of open sessions and the daily report.

use crate::attendance::ports::Notice;
use crate::attendance::report::{DaySummary, PAGE_LIMIT, paginate, render_day_totals, render_user_lines, summarize_day};
use crate::attendance::service::AttendanceService;
use crate::database::models::{GuildSettings, Session};
use crate::database::queries;
use crate::error::{AttendanceError, Result};
use crate::utils::format::{COLOR_EMPTY, COLOR_REPORT, COLOR_WARNING, format_duration_minutes};
use crate::utils::time::{format_time, local_date, next_day_start};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use std::time::Duration;

const LOCK_WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForcedCheckout {
    pub user_id: String,
    pub session: Session,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForceCheckoutSummary {
    pub closed: Vec<ForcedCheckout>,
    /// Members the cleanup pass removed the present role from.
    pub roles_cleared: usize,
    /// Records or members that could not be processed.
    pub failures: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DailyReport {
    Empty {
        date: NaiveDate,
    },
    Ready {
        summary: DaySummary,
        totals: String,
        pages: Vec<String>,
    },
}

impl AttendanceService {
    /// Closes every open session of the guild, then strips the present role from
    /// everyone still holding it.
    ///
    /// Today's sessions close at `now`. Sessions left open from an earlier day close at
    /// the midnight that ended their day.
    ///
    /// A failing record or member is logged and counted; the rest are still processed.
    pub async fn force_checkout_all(&self, settings: &GuildSettings, now: DateTime<Utc>) -> Result<ForceCheckoutSummary> {
        let open_records = queries::find_open_records(self.pool(), &settings.guild_id).await?;
        let mut summary = ForceCheckoutSummary::default();

        for record in open_records {
            let close_at = now.min(next_day_start(record.date, self.offset()));
            match self.force_checkout_user(settings, &record.user_id, record.date, close_at).await {
                Ok(sessions) => {
                    for session in sessions {
                        summary.closed.push(ForcedCheckout {
                            user_id: record.user_id.clone(),
                            session,
                        });
                    }
                }
                Err(e) => {
                    summary.failures += 1;
                    tracing::error!("Forced checkout failed for user {} in guild {}: {}", record.user_id, settings.guild_id, e);
                }
            }
        }

        // Role cleanup against role/record drift; removing an absent role is a no-op.
        match self
            .roles()
            .members_with_role(&settings.guild_id, &settings.present_role_id)
            .await
        {
            Ok(members) => {
                for member in members {
                    match self
                        .roles()
                        .remove_role(&settings.guild_id, &member.user_id, &settings.present_role_id)
                        .await
                    {
                        Ok(()) => summary.roles_cleared += 1,
                        Err(e) => {
                            summary.failures += 1;
                            tracing::warn!("Failed to clear present role from {}: {}", member.user_id, e);
                        }
                    }
                }
            }
            Err(e) => {
                summary.failures += 1;
                tracing::warn!("Could not list present role holders in guild {}: {}", settings.guild_id, e);
            }
        }

        self.stats().record_force_checkouts(summary.closed.len() as u64);

        if !summary.closed.is_empty() {
            let lines: Vec<String> = summary
                .closed
                .iter()
                .map(|forced| format!("<@{}> ({})", forced.user_id, format_duration_minutes(forced.session.duration)))
                .collect();
            let notice = Notice::new(
                "🌙 自動退勤処理",
                format!("{}人のセッションを自動終了しました", summary.closed.len()),
                COLOR_WARNING,
                now,
            )
            .field("対象者", truncate_block(&lines.join("\n")), false);
            if let Err(e) = self.notifier().send(&settings.log_channel_id, notice).await {
                tracing::warn!("Failed to send forced checkout summary: {}", e);
            }
        }

        tracing::info!(
            "Forced checkout in guild {}: {} closed, {} roles cleared, {} failures",
            settings.guild_id,
            summary.closed.len(),
            summary.roles_cleared,
            summary.failures
        );

        Ok(summary)
    }

    async fn force_checkout_user(
        &self,
        settings: &GuildSettings,
        user_id: &str,
        date: NaiveDate,
        close_at: DateTime<Utc>,
    ) -> Result<Vec<Session>> {
        let _lock = self
            .locks()
            .acquire_within(user_id, LOCK_WAIT)
            .await
            .ok_or(AttendanceError::OperationInProgress)?;

        // Reload under the lock; the member may have checked out meanwhile.
        let Some(mut record) = queries::find_record(self.pool(), user_id, &settings.guild_id, date).await? else {
            return Ok(Vec::new());
        };

        let open_indices: Vec<usize> = record
            .sessions
            .iter()
            .enumerate()
            .filter(|(_, session)| session.is_open())
            .map(|(index, _)| index)
            .collect();
        if record.close_all_open(close_at) == 0 {
            return Ok(Vec::new());
        }
        queries::save_record(self.pool(), &record).await?;

        let closed: Vec<Session> = open_indices
            .into_iter()
            .map(|index| record.sessions[index].clone())
            .collect();

        if let Err(e) = self
            .roles()
            .remove_role(&settings.guild_id, user_id, &settings.present_role_id)
            .await
        {
            tracing::warn!("Failed to remove present role from {}: {}", user_id, e);
        }

        for session in &closed {
            let notice = Notice::new(
                "🌙 自動退勤",
                format!("<@{}> のセッションを自動終了しました", user_id),
                COLOR_WARNING,
                close_at,
            )
            .field("出勤時刻", format_time(session.check_in, self.offset()), true)
            .field("退勤時刻", format_time(close_at, self.offset()), true)
            .field("勤務時間", format_duration_minutes(session.duration), true);
            if let Err(e) = self.notifier().send(&settings.log_channel_id, notice).await {
                tracing::warn!("Failed to send forced checkout notice for {}: {}", user_id, e);
            }
        }

        Ok(closed)
    }

    /// Builds the report for `date` from stored data only. Safe to run repeatedly.
    pub async fn generate_daily_report(&self, settings: &GuildSettings, date: NaiveDate) -> Result<DailyReport> {
        let records = queries::find_records_for_day(self.pool(), &settings.guild_id, date).await?;
        let Some(summary) = summarize_day(date, &records) else {
            return Ok(DailyReport::Empty { date });
        };

        let names = self.display_names(settings, summary.users.iter().map(|user| user.user_id.as_str())).await;
        let totals = render_day_totals(&summary, self.offset());
        let pages = paginate(&render_user_lines(&summary, &names, self.offset()), PAGE_LIMIT);

        Ok(DailyReport::Ready { summary, totals, pages })
    }

    /// Looks up display names; members that left or could not be fetched are omitted.
    pub(crate) async fn display_names<'a>(
        &self,
        settings: &GuildSettings,
        user_ids: impl Iterator<Item = &'a str>,
    ) -> HashMap<String, String> {
        let mut names = HashMap::new();
        for user_id in user_ids {
            match self.roles().fetch_member(&settings.guild_id, user_id).await {
                Ok(Some(member)) => {
                    names.insert(member.user_id, member.display_name);
                }
                Ok(None) => {}
                Err(e) => tracing::warn!("Failed to fetch member {}: {}", user_id, e),
            }
        }
        names
    }

    /// Sends a generated report to the guild's log channel.
    pub async fn publish_daily_report(&self, settings: &GuildSettings, report: &DailyReport, now: DateTime<Utc>) -> Result<()> {
        for notice in daily_report_notices(report, now) {
            self.notifier().send(&settings.log_channel_id, notice).await?;
        }
        Ok(())
    }
}

/// Renders a report as log-channel notices: a summary followed by one notice per page.
pub fn daily_report_notices(report: &DailyReport, now: DateTime<Utc>) -> Vec<Notice> {
    match report {
        DailyReport::Empty { date } => vec![Notice::new(
            format!("📊 日次勤務レポート - {}", date),
            "本日の勤務記録はありません",
            COLOR_EMPTY,
            now,
        )],
        DailyReport::Ready { summary, totals, pages } => {
            let mut notices = vec![Notice::new(
                format!("📊 日次勤務レポート - {}", summary.date),
                totals.clone(),
                COLOR_REPORT,
                now,
            )];
            let page_count = pages.len();
            notices.extend(pages.iter().enumerate().map(|(index, page)| {
                Notice::continuation(page.clone(), COLOR_REPORT, now).field(
                    "ページ",
                    format!("{}/{}", index + 1, page_count),
                    true,
                )
            }));
            notices
        }
    }
}

fn truncate_block(text: &str) -> String {
    paginate(text, PAGE_LIMIT).into_iter().next().unwrap_or_default()
}
