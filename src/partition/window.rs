//! Date window planning for one year

use crate::config::PlannerConfig;
use chrono::{Datelike, Days, NaiveDate};
use std::fmt;

/// An inclusive date range inside a single year
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    /// The window spanning Jan 1 to Dec 31 of `year`
    ///
    /// Returns None for years chrono cannot represent.
    pub fn whole_year(year: i32) -> Option<Self> {
        Some(Self {
            start: NaiveDate::from_ymd_opt(year, 1, 1)?,
            end: NaiveDate::from_ymd_opt(year, 12, 31)?,
        })
    }

    /// Number of days covered, both ends included
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    pub fn year(&self) -> i32 {
        self.start.year()
    }

    /// Start date in the portal's `YYYY-MM-DD` form
    pub fn start_param(&self) -> String {
        self.start.format("%Y-%m-%d").to_string()
    }

    /// End date in the portal's `YYYY-MM-DD` form
    pub fn end_param(&self) -> String {
        self.end.format("%Y-%m-%d").to_string()
    }
}

impl fmt::Display for DateWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start_param(), self.end_param())
    }
}

/// Window length chosen for a year's record density
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowLength {
    /// Consecutive windows of this many days
    Days(u64),
    /// One window covering the whole year
    WholeYear,
}

/// Cuts a year into windows expected to hold about `window_budget` results each
///
/// The court is assumed to sit on `365 - non_sitting_days` days a year, so the
/// expected density is `estimated_count / sitting_days` records per day and a
/// window lasts `floor(window_budget / density)` days.
#[derive(Debug, Clone, Copy)]
pub struct WindowPlanner {
    non_sitting_days: u32,
    window_budget: u32,
}

impl Default for WindowPlanner {
    fn default() -> Self {
        Self::new(96, 200)
    }
}

impl WindowPlanner {
    pub fn new(non_sitting_days: u32, window_budget: u32) -> Self {
        Self {
            non_sitting_days,
            window_budget,
        }
    }

    pub fn from_config(config: &PlannerConfig) -> Self {
        Self::new(config.non_sitting_days, config.window_budget)
    }

    pub fn non_sitting_days(&self) -> u32 {
        self.non_sitting_days
    }

    pub fn window_budget(&self) -> u32 {
        self.window_budget
    }

    /// Computes the window length for an estimated yearly count
    ///
    /// Very dense years clamp to 1-day windows; sparse years (including a
    /// zero estimate) collapse to a single whole-year window.
    pub fn window_length(&self, estimated_count: u64) -> WindowLength {
        let sitting_days = f64::from(365u32.saturating_sub(self.non_sitting_days).max(1));
        let per_day = estimated_count as f64 / sitting_days;

        if per_day <= 0.0 {
            return WindowLength::WholeYear;
        }

        let length = (f64::from(self.window_budget) / per_day).floor();

        if length <= 0.0 {
            WindowLength::Days(1)
        } else if length > 365.0 {
            WindowLength::WholeYear
        } else {
            WindowLength::Days(length as u64)
        }
    }

    /// Plans the windows for `year`
    ///
    /// Windows are ordered, contiguous and non-overlapping, and together cover
    /// exactly Jan 1 through Dec 31. The final window is truncated at year end.
    /// The plan is a pure function of its inputs, so recomputing it on resume
    /// yields the same window indices.
    pub fn plan(&self, year: i32, estimated_count: u64) -> Vec<DateWindow> {
        let Some(span) = DateWindow::whole_year(year) else {
            tracing::warn!("Year {} is out of range, no windows planned", year);
            return Vec::new();
        };

        let days = match self.window_length(estimated_count) {
            WindowLength::WholeYear => return vec![span],
            WindowLength::Days(days) => days,
        };

        let mut windows = Vec::new();
        let mut start = span.start;

        loop {
            let end = start
                .checked_add_days(Days::new(days - 1))
                .map_or(span.end, |end| end.min(span.end));

            windows.push(DateWindow { start, end });

            if end >= span.end {
                break;
            }

            match end.succ_opt() {
                Some(next) => start = next,
                None => break,
            }
        }

        windows
    }
}
