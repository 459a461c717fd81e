use crate::types::{DateField, IssueRecord, RepoDetails};
use chrono::{DateTime, Datelike, IsoWeek, Month, Months, NaiveDate, Utc, Weekday};
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use std::collections::BTreeMap;

/// Period label → count, kept in chronological period order.
///
/// Serializes as a JSON object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BucketedSeries {
    entries: Vec<(String, usize)>,
}

impl BucketedSeries {
    fn from_counts<K: Ord>(counts: BTreeMap<K, usize>, label: impl Fn(&K) -> String) -> Self {
        Self {
            entries: counts
                .iter()
                .map(|(key, count)| (label(key), *count))
                .collect(),
        }
    }

    pub fn get(&self, label: &str) -> Option<usize> {
        self.entries
            .iter()
            .find(|(key, _)| key == label)
            .map(|(_, count)| *count)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.entries
            .iter()
            .map(|(key, count)| (key.as_str(), *count))
    }

    /// Sum of all bucket counts.
    pub fn total(&self) -> usize {
        self.entries.iter().map(|(_, count)| count).sum()
    }
}

impl Serialize for BucketedSeries {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, count) in &self.entries {
            map.serialize_entry(key, count)?;
        }
        map.end()
    }
}

/// Monthly and weekly counts of one timestamp field over a set of issues.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IssueAggregate {
    pub monthly: BucketedSeries,
    pub weekly: BucketedSeries,
    /// Number of issues that carry the field; equals the sum of the monthly buckets.
    pub total: usize,
}

/// Per-repository summary returned by the multi-repository endpoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RepoSummary {
    pub monthly_created_issues: BucketedSeries,
    pub monthly_closed_issues: BucketedSeries,
    pub total_created_issues: usize,
    pub weekly_created_issues: BucketedSeries,
    pub total_closed_issues: usize,
    pub weekly_closed_issues: BucketedSeries,
    pub total_stars: u64,
    pub total_forks: u64,
}

impl RepoSummary {
    /// Aggregates open issues by creation time and closed issues by close time.
    pub fn build(open: &[IssueRecord], closed: &[IssueRecord], details: RepoDetails) -> Self {
        let created = aggregate(open, DateField::CreatedAt);
        let closed = aggregate(closed, DateField::ClosedAt);

        Self {
            monthly_created_issues: created.monthly,
            monthly_closed_issues: closed.monthly,
            total_created_issues: created.total,
            weekly_created_issues: created.weekly,
            total_closed_issues: closed.total,
            weekly_closed_issues: closed.weekly,
            total_stars: details.stargazers_count,
            total_forks: details.forks_count,
        }
    }
}

/// Most frequent weekday and month names for created and closed issues.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ActivityModes {
    pub max_created_day: Option<String>,
    pub max_created_month: Option<String>,
    pub max_closed_day: Option<String>,
    pub max_closed_month: Option<String>,
}

impl ActivityModes {
    pub fn build(created: &[IssueRecord], closed: &[IssueRecord]) -> Self {
        Self {
            max_created_day: weekday_mode(created, DateField::CreatedAt),
            max_created_month: month_mode(created, DateField::CreatedAt),
            max_closed_day: weekday_mode(closed, DateField::ClosedAt),
            max_closed_month: month_mode(closed, DateField::ClosedAt),
        }
    }
}

fn timestamps(issues: &[IssueRecord], field: DateField) -> impl Iterator<Item = DateTime<Utc>> + '_ {
    issues.iter().filter_map(move |issue| field.value_of(issue))
}

fn month_start(ts: DateTime<Utc>) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(ts.year(), ts.month(), 1)
}

fn month_counts(issues: &[IssueRecord], field: DateField) -> BTreeMap<NaiveDate, usize> {
    let mut counts = BTreeMap::new();
    for month in timestamps(issues, field).filter_map(month_start) {
        *counts.entry(month).or_insert(0) += 1;
    }
    counts
}

/// Counts issues per calendar month and per ISO week of `field`.
///
/// Only periods with at least one issue appear. Issues without the field are ignored.
pub fn aggregate(issues: &[IssueRecord], field: DateField) -> IssueAggregate {
    if issues.is_empty() {
        return IssueAggregate::default();
    }

    let mut weekly: BTreeMap<IsoWeek, usize> = BTreeMap::new();
    let mut total = 0;
    for ts in timestamps(issues, field) {
        *weekly.entry(ts.iso_week()).or_insert(0) += 1;
        total += 1;
    }

    IssueAggregate {
        monthly: BucketedSeries::from_counts(month_counts(issues, field), |month| {
            month.format("%B %Y").to_string()
        }),
        weekly: BucketedSeries::from_counts(weekly, |week| {
            format!("{}-W{:02}", week.year(), week.week())
        }),
        total,
    }
}

/// Per-month counts of `field` across every month between the earliest and latest observed
/// month, inclusive. Months without issues report 0. Labels are `YYYY-MM`, ascending.
pub fn monthly_series_filled(issues: &[IssueRecord], field: DateField) -> Vec<(String, usize)> {
    let counts = month_counts(issues, field);
    let (Some(&first), Some(&last)) = (counts.keys().next(), counts.keys().next_back()) else {
        return Vec::new();
    };

    let mut series = Vec::new();
    let mut month = first;
    while month <= last {
        series.push((
            month.format("%Y-%m").to_string(),
            counts.get(&month).copied().unwrap_or(0),
        ));
        match month.checked_add_months(Months::new(1)) {
            Some(next) => month = next,
            None => break,
        }
    }
    series
}

fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

fn month_name(ts: DateTime<Utc>) -> Option<&'static str> {
    u8::try_from(ts.month())
        .ok()
        .and_then(|m| Month::try_from(m).ok())
        .map(|m| m.name())
}

/// The most frequent value; ties go to the alphabetically first one.
fn mode<'a>(values: impl Iterator<Item = &'a str>) -> Option<String> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for value in values {
        *counts.entry(value).or_insert(0) += 1;
    }

    let mut best: Option<(&str, usize)> = None;
    for (value, count) in counts {
        if best.map_or(true, |(_, best_count)| count > best_count) {
            best = Some((value, count));
        }
    }
    best.map(|(value, _)| value.to_string())
}

/// Most frequent English weekday name of `field`, or `None` when no issue carries it.
pub fn weekday_mode(issues: &[IssueRecord], field: DateField) -> Option<String> {
    mode(timestamps(issues, field).map(|ts| weekday_name(ts.weekday())))
}

/// Most frequent English month name of `field`, or `None` when no issue carries it.
pub fn month_mode(issues: &[IssueRecord], field: DateField) -> Option<String> {
    mode(timestamps(issues, field).filter_map(month_name))
}
