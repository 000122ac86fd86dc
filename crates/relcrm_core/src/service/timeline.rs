//! Activity statistics and reminder agenda for one user.

use crate::model::activity::ActivityType;
use crate::model::now_epoch_ms;
use crate::model::reminder::ReminderView;
use crate::repo::activity_repo::ActivityRepository;
use crate::repo::reminder_repo::ReminderRepository;
use crate::repo::RepoResult;
use serde::Serialize;
use std::collections::BTreeMap;

const STATS_DEFAULT_DAYS: u32 = 30;
const STATS_MAX_DAYS: u32 = 365;
const AGENDA_DEFAULT_DAYS: u32 = 7;
const AGENDA_LIMIT: u32 = 200;
const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Clamps a stats window to `1..=365` days, defaulting to 30.
pub fn normalize_stats_days(days: Option<u32>) -> u32 {
    days.unwrap_or(STATS_DEFAULT_DAYS).clamp(1, STATS_MAX_DAYS)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityStats {
    pub days: u32,
    pub since: i64,
    pub total: u64,
    /// Every activity type, zero-filled.
    pub counts: BTreeMap<ActivityType, u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderAgenda {
    pub overdue: Vec<ReminderView>,
    pub upcoming: Vec<ReminderView>,
}

pub struct TimelineService<R> {
    repo: R,
}

impl<R: ActivityRepository + ReminderRepository> TimelineService<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    pub fn activity_stats(&self, days: Option<u32>) -> RepoResult<ActivityStats> {
        let days = normalize_stats_days(days);
        let since = now_epoch_ms() - i64::from(days) * DAY_MS;
        let found = self.repo.count_activities_by_type(since)?;

        let counts: BTreeMap<ActivityType, u64> = ActivityType::ALL
            .into_iter()
            .map(|kind| (kind, found.get(&kind).copied().unwrap_or(0)))
            .collect();
        Ok(ActivityStats {
            days,
            since,
            total: counts.values().sum(),
            counts,
        })
    }

    /// Open reminders that are overdue or due within `days` (default 7).
    pub fn reminder_agenda(&self, days: Option<u32>) -> RepoResult<ReminderAgenda> {
        let days = days.unwrap_or(AGENDA_DEFAULT_DAYS).clamp(1, STATS_MAX_DAYS);
        let until = now_epoch_ms() + i64::from(days) * DAY_MS;
        let (overdue, upcoming) = self
            .repo
            .list_open_reminders(until, AGENDA_LIMIT)?
            .into_iter()
            .partition(|view| view.overdue);
        Ok(ReminderAgenda { overdue, upcoming })
    }
}
