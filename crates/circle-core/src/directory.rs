//! Circle directory - filtering, sorting and per-user listings

use crate::snapshot::CircleSnapshot;
use circle_types::{
    Address, CircleState, PERIOD_BIWEEKLY, PERIOD_MONTHLY, PERIOD_QUARTERLY, PERIOD_WEEKLY,
    SECONDS_PER_DAY,
};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    /// Highest identifier first
    #[default]
    Newest,
    Oldest,
    ContributionAsc,
    ContributionDesc,
    MembersDesc,
}

/// Directory query
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircleFilter {
    /// `None` means every state
    pub status: Option<CircleState>,
    /// Case-insensitive match on name or description
    pub search: String,
    pub token: Option<Address>,
    pub sort: SortOrder,
}

impl CircleFilter {
    pub fn matches(&self, circle: &CircleSnapshot) -> bool {
        if let Some(status) = self.status {
            if circle.state != status {
                return false;
            }
        }
        if let Some(token) = self.token {
            if circle.token != token {
                return false;
            }
        }
        let needle = self.search.trim().to_lowercase();
        needle.is_empty()
            || circle.name.to_lowercase().contains(&needle)
            || circle.description.to_lowercase().contains(&needle)
    }

    pub fn apply<'a, I>(&self, circles: I) -> Vec<CircleSnapshot>
    where
        I: IntoIterator<Item = &'a CircleSnapshot>,
    {
        let mut out: Vec<CircleSnapshot> = circles
            .into_iter()
            .filter(|c| self.matches(c))
            .cloned()
            .collect();
        match self.sort {
            SortOrder::Newest => out.sort_by(|a, b| b.id.cmp(&a.id)),
            SortOrder::Oldest => out.sort_by_key(|c| c.id),
            SortOrder::ContributionAsc => out.sort_by_key(|c| (c.contribution_amount, c.id)),
            SortOrder::ContributionDesc => out.sort_by(|a, b| {
                b.contribution_amount
                    .cmp(&a.contribution_amount)
                    .then(a.id.cmp(&b.id))
            }),
            SortOrder::MembersDesc => out.sort_by(|a, b| {
                b.member_count()
                    .cmp(&a.member_count())
                    .then(a.id.cmp(&b.id))
            }),
        }
        out
    }
}

/// Circles `caller` created or belongs to, newest first
pub fn user_circles<'a, I>(circles: I, caller: &Address) -> Vec<CircleSnapshot>
where
    I: IntoIterator<Item = &'a CircleSnapshot>,
{
    let mut out: Vec<CircleSnapshot> = circles
        .into_iter()
        .filter(|c| c.creator == *caller || c.is_member(caller))
        .cloned()
        .collect();
    out.sort_by(|a, b| b.id.cmp(&a.id));
    out
}

/// Counts by lifecycle state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryStats {
    pub total: usize,
    pub open: usize,
    pub active: usize,
    pub completed: usize,
    pub cancelled: usize,
}

impl DirectoryStats {
    pub fn collect<'a, I>(circles: I) -> Self
    where
        I: IntoIterator<Item = &'a CircleSnapshot>,
    {
        circles.into_iter().fold(Self::default(), |mut stats, c| {
            stats.total += 1;
            match c.state {
                CircleState::Open => stats.open += 1,
                CircleState::Active => stats.active += 1,
                CircleState::Completed => stats.completed += 1,
                CircleState::Cancelled => stats.cancelled += 1,
            }
            stats
        })
    }
}

pub fn describe_period(seconds: u64) -> String {
    match seconds {
        PERIOD_WEEKLY => "Weekly".to_string(),
        PERIOD_BIWEEKLY => "Bi-weekly".to_string(),
        PERIOD_MONTHLY => "Monthly".to_string(),
        PERIOD_QUARTERLY => "Quarterly".to_string(),
        s if s >= SECONDS_PER_DAY => format!("{} days", s / SECONDS_PER_DAY),
        s => format!("{} hours", s / 3_600),
    }
}
