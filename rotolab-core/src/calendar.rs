//! Trading calendar — the engine's only notion of time.
//!
//! Epochs advance over an explicit, ordered list of trading dates supplied at
//! construction. Nothing in the engine reads the wall clock; "today" is
//! always a calendar position, which is what makes historical replay and live
//! operation take the same code path.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingCalendar {
    dates: Vec<NaiveDate>,
}

impl TradingCalendar {
    /// Build from any collection of dates; input is sorted and deduplicated.
    pub fn new(mut dates: Vec<NaiveDate>) -> Self {
        dates.sort_unstable();
        dates.dedup();
        Self { dates }
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn first(&self) -> Option<NaiveDate> {
        self.dates.first().copied()
    }

    pub fn last(&self) -> Option<NaiveDate> {
        self.dates.last().copied()
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.dates.binary_search(&date).is_ok()
    }

    /// All sessions in ascending order.
    pub fn sessions(&self) -> &[NaiveDate] {
        &self.dates
    }

    /// First session strictly after `date`, if any. Used for next-open
    /// execution timing.
    pub fn next_session(&self, date: NaiveDate) -> Option<NaiveDate> {
        let idx = match self.dates.binary_search(&date) {
            Ok(i) => i + 1,
            Err(i) => i,
        };
        self.dates.get(idx).copied()
    }

    /// Last session strictly before `date`, if any.
    pub fn prev_session(&self, date: NaiveDate) -> Option<NaiveDate> {
        let idx = match self.dates.binary_search(&date) {
            Ok(i) | Err(i) => i,
        };
        if idx == 0 {
            None
        } else {
            self.dates.get(idx - 1).copied()
        }
    }

    /// True when `date` is this month's final session: it is in the calendar
    /// and the following session (if any) falls in a different month. The
    /// calendar's last date always closes its month, since no later session
    /// of that month can exist.
    pub fn is_month_end(&self, date: NaiveDate) -> bool {
        if !self.contains(date) {
            return false;
        }
        match self.next_session(date) {
            Some(next) => next.month() != date.month() || next.year() != date.year(),
            None => true,
        }
    }

    /// All month-end sessions in ascending order.
    pub fn month_ends(&self) -> Vec<NaiveDate> {
        self.dates
            .iter()
            .copied()
            .filter(|&d| self.is_month_end(d))
            .collect()
    }
}
