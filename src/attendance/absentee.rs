use crate::attendance::ports::{MemberInfo, Notice};
use crate::attendance::report::{PAGE_LIMIT, paginate};
use crate::attendance::service::AttendanceService;
use crate::database::models::{GuildSettings, LeaveRecord};
use crate::database::queries;
use crate::error::Result;
use crate::utils::format::{COLOR_ERROR, COLOR_SUCCESS};
use crate::utils::time::days_before;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashSet;

/// Lookback bound for consecutive-absence streaks, in days.
pub const STREAK_CAP: u32 = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Absentee {
    pub user_id: String,
    pub display_name: String,
    /// Days absent in a row, counting `date` itself.
    pub consecutive_days: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbsenteeReport {
    pub date: NaiveDate,
    pub required: usize,
    pub present: usize,
    pub on_leave: usize,
    /// Longest streak first.
    pub absentees: Vec<Absentee>,
    /// Whole percent of members expected to attend who did.
    pub attendance_rate: u32,
}

/// Counts consecutive absent days ending at `date`.
///
/// `date` itself counts as absent; the walk stops at the first earlier day with
/// attendance or approved leave, or after `cap` days.
pub fn consecutive_absence(date: NaiveDate, attended: &HashSet<NaiveDate>, leaves: &[LeaveRecord], cap: u32) -> u32 {
    let mut streak = 1;
    for back in 1..u64::from(cap) {
        let day = days_before(date, back);
        if attended.contains(&day) || leaves.iter().any(|leave| leave.covers(day)) {
            break;
        }
        streak += 1;
    }
    streak.min(cap.max(1))
}

pub fn attendance_rate(present: usize, required: usize, on_leave: usize) -> u32 {
    let expected = required.saturating_sub(on_leave);
    if expected == 0 {
        return 100;
    }
    ((present * 100 + expected / 2) / expected) as u32
}

#[derive(Debug, Default)]
struct Classification<'a> {
    present: usize,
    on_leave: usize,
    absent: Vec<&'a MemberInfo>,
}

fn classify<'a>(
    date: NaiveDate,
    members: &'a [MemberInfo],
    attended: &HashSet<String>,
    leaves: &[LeaveRecord],
) -> Classification<'a> {
    let mut classification = Classification::default();
    for member in members.iter().filter(|member| !member.is_bot) {
        if attended.contains(&member.user_id) {
            classification.present += 1;
        } else if leaves
            .iter()
            .any(|leave| leave.user_id == member.user_id && leave.covers(date))
        {
            classification.on_leave += 1;
        } else {
            classification.absent.push(member);
        }
    }
    classification
}

impl AttendanceService {
    /// `None` when the guild has no required role configured.
    pub async fn absentee_report(&self, settings: &GuildSettings, date: NaiveDate) -> Result<Option<AbsenteeReport>> {
        let Some(required_role) = settings.required_role_id.as_deref() else {
            return Ok(None);
        };

        let members = self.roles().members_with_role(&settings.guild_id, required_role).await?;
        let attended: HashSet<String> = queries::find_records_for_day(self.pool(), &settings.guild_id, date)
            .await?
            .into_iter()
            .map(|record| record.user_id)
            .collect();
        let lookback_start = days_before(date, u64::from(STREAK_CAP));
        let leaves = queries::find_approved_leaves(self.pool(), &settings.guild_id, lookback_start, date).await?;

        let classification = classify(date, &members, &attended, &leaves);

        let mut absentees = Vec::with_capacity(classification.absent.len());
        for member in &classification.absent {
            let history: HashSet<NaiveDate> =
                queries::find_user_records_in_range(self.pool(), &member.user_id, &settings.guild_id, lookback_start, date)
                    .await?
                    .into_iter()
                    .map(|record| record.date)
                    .collect();
            let own_leaves: Vec<LeaveRecord> = leaves
                .iter()
                .filter(|leave| leave.user_id == member.user_id)
                .cloned()
                .collect();
            absentees.push(Absentee {
                user_id: member.user_id.clone(),
                display_name: member.display_name.clone(),
                consecutive_days: consecutive_absence(date, &history, &own_leaves, STREAK_CAP),
            });
        }
        absentees.sort_by(|a, b| {
            b.consecutive_days
                .cmp(&a.consecutive_days)
                .then_with(|| a.display_name.cmp(&b.display_name))
        });

        let required = classification.present + classification.on_leave + absentees.len();
        Ok(Some(AbsenteeReport {
            date,
            required,
            present: classification.present,
            on_leave: classification.on_leave,
            attendance_rate: attendance_rate(classification.present, required, classification.on_leave),
            absentees,
        }))
    }

    pub async fn publish_absentee_report(
        &self,
        settings: &GuildSettings,
        report: &AbsenteeReport,
        now: DateTime<Utc>,
    ) -> Result<()> {
        for notice in absentee_notices(report, now) {
            self.notifier().send(&settings.log_channel_id, notice).await?;
        }
        Ok(())
    }
}

/// Renders the report as a summary notice followed by one notice per page of absentees.
pub fn absentee_notices(report: &AbsenteeReport, now: DateTime<Utc>) -> Vec<Notice> {
    let title = format!("📋 欠席者レポート - {}", report.date);
    let (description, color) = if report.absentees.is_empty() {
        ("全員出勤しました 🎉".to_string(), COLOR_SUCCESS)
    } else {
        (format!("{}人が欠席しています", report.absentees.len()), COLOR_ERROR)
    };

    let summary = Notice::new(title, description, color, now)
        .field("対象者", format!("{}人", report.required), true)
        .field("出勤", format!("{}人", report.present), true)
        .field("休暇", format!("{}人", report.on_leave), true)
        .field("欠席", format!("{}人", report.absentees.len()), true)
        .field("出勤率", format!("{}%", report.attendance_rate), true);

    let lines: Vec<String> = report
        .absentees
        .iter()
        .map(|absentee| format!("{} - {}日連続", absentee.display_name, absentee.consecutive_days))
        .collect();
    let pages = paginate(&lines.join("\n"), PAGE_LIMIT);
    let page_count = pages.len();

    let mut notices = vec![summary];
    notices.extend(pages.into_iter().enumerate().map(|(index, page)| {
        Notice::continuation(page, COLOR_ERROR, now).field("ページ", format!("{}/{}", index + 1, page_count), true)
    }));
    notices
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attendance::ports::MockRoleService;
    use crate::attendance::service::tests::{jst_at, quiet_notifier, service_with, settings};
    use crate::database::models::{AttendanceRecord, LeaveStatus};
    use crate::database::test_pool;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
    }

    fn leave(user_id: &str, start: u32, end: u32, status: LeaveStatus) -> LeaveRecord {
        LeaveRecord {
            user_id: user_id.into(),
            guild_id: "g1".into(),
            start_date: day(start),
            end_date: day(end),
            status,
        }
    }

    fn member(user_id: &str, is_bot: bool) -> MemberInfo {
        MemberInfo {
            user_id: user_id.into(),
            display_name: format!("name-{}", user_id),
            is_bot,
        }
    }

    #[test]
    fn streak_stops_at_last_attendance() {
        let attended: HashSet<NaiveDate> = [day(7)].into_iter().collect();
        assert_eq!(consecutive_absence(day(10), &attended, &[], STREAK_CAP), 3);
    }

    #[test]
    fn streak_stops_at_approved_leave_only() {
        let approved = [leave("u", 8, 8, LeaveStatus::Approved)];
        assert_eq!(consecutive_absence(day(10), &HashSet::new(), &approved, STREAK_CAP), 2);

        let pending = [leave("u", 8, 8, LeaveStatus::Pending)];
        assert_eq!(consecutive_absence(day(10), &HashSet::new(), &pending, 5), 5);
    }

    #[test]
    fn streak_is_capped() {
        assert_eq!(consecutive_absence(day(31), &HashSet::new(), &[], STREAK_CAP), 30);
    }

    #[test]
    fn rate_excludes_members_on_leave() {
        assert_eq!(attendance_rate(3, 5, 1), 75);
        assert_eq!(attendance_rate(0, 2, 2), 100);
        assert_eq!(attendance_rate(1, 3, 0), 33);
    }

    #[tokio::test]
    async fn report_skips_guilds_without_required_role() {
        let service = service_with(test_pool().await, MockRoleService::new(), quiet_notifier());
        assert_eq!(service.absentee_report(&settings(), day(10)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn report_classifies_present_leave_absent_and_bots() {
        let mut roles = MockRoleService::new();
        roles
            .expect_members_with_role()
            .withf(|_: &str, role: &str| role == "required")
            .returning(|_, _| {
                Ok(vec![
                    member("present", false),
                    member("leave", false),
                    member("absent", false),
                    member("bot", true),
                ])
            });

        let service = service_with(test_pool().await, roles, quiet_notifier());
        let mut settings = settings();
        settings.required_role_id = Some("required".into());

        let date = day(10);
        let mut record = AttendanceRecord::new("present", "g1", date);
        record.start_session(jst_at(10, 9, 0)).unwrap();
        queries::save_record(service.pool(), &record).await.unwrap();

        let mut earlier = AttendanceRecord::new("absent", "g1", day(6));
        earlier.start_session(jst_at(6, 9, 0)).unwrap();
        earlier.close_latest_session(jst_at(6, 10, 0)).unwrap();
        queries::save_record(service.pool(), &earlier).await.unwrap();

        queries::create_leave_record(service.pool(), &leave("leave", 9, 11, LeaveStatus::Approved))
            .await
            .unwrap();

        let report = service.absentee_report(&settings, date).await.unwrap().unwrap();
        assert_eq!(report.required, 3);
        assert_eq!(report.present, 1);
        assert_eq!(report.on_leave, 1);
        assert_eq!(report.attendance_rate, 50);
        assert_eq!(
            report.absentees,
            vec![Absentee {
                user_id: "absent".into(),
                display_name: "name-absent".into(),
                consecutive_days: 4,
            }]
        );

        let notices = absentee_notices(&report, jst_at(10, 23, 59));
        assert_eq!(notices.len(), 2);
        assert_eq!(notices[0].color, COLOR_ERROR);
        assert!(notices[1].description.contains("name-absent - 4日連続"));
    }

    fn absentee(index: usize) -> Absentee {
        Absentee {
            user_id: index.to_string(),
            display_name: format!("member-name-{:03}", index),
            consecutive_days: 3,
        }
    }

    #[test]
    fn large_absentee_lists_are_split_into_bounded_blocks() {
        let report = AbsenteeReport {
            date: day(10),
            required: 300,
            present: 0,
            on_leave: 0,
            absentees: (0..300).map(absentee).collect(),
            attendance_rate: 0,
        };

        let notices = absentee_notices(&report, jst_at(10, 23, 59));
        assert!(notices.len() > 2);
        assert!(notices.iter().all(|notice| notice.description.chars().count() <= PAGE_LIMIT));

        let listed: usize = notices[1..]
            .iter()
            .map(|notice| notice.description.lines().count())
            .sum();
        assert_eq!(listed, 300);
        assert!(notices[1..].iter().all(|notice| notice.title.is_none()));
    }

    #[test]
    fn full_attendance_sends_summary_only() {
        let report = AbsenteeReport {
            date: day(10),
            required: 2,
            present: 2,
            on_leave: 0,
            absentees: Vec::new(),
            attendance_rate: 100,
        };

        let notices = absentee_notices(&report, jst_at(10, 23, 59));
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].color, COLOR_SUCCESS);
    }
}
