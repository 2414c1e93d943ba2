//! Transaction history filters.
//!
//! A [`HistoryFilter`] is what the caller sends; it is resolved against the
//! current date into a [`HistoryQuery`] with every default filled in.

use std::str::FromStr;

use chrono::{Days, NaiveDate};
use thiserror::Error;

use crate::LedgerConfig;
use crate::model::{ModelError, TransactionRecord, TransactionType};
use crate::page::Pagination;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HistoryError {
    #[error("start date {start} is after end date {end}")]
    InvalidDateRange { start: NaiveDate, end: NaiveDate },
}

/// Restrict history to one transaction type, or return all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TypeFilter {
    #[default]
    All,
    Only(TransactionType),
}

impl TypeFilter {
    pub fn matches(&self, kind: TransactionType) -> bool {
        match self {
            TypeFilter::All => true,
            TypeFilter::Only(wanted) => *wanted == kind,
        }
    }
}

impl FromStr for TypeFilter {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("all") {
            return Ok(TypeFilter::All);
        }
        s.parse().map(TypeFilter::Only)
    }
}

/// Caller-facing history request; every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryFilter {
    pub kind: TypeFilter,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

/// Fully resolved history request. Date bounds are inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryQuery {
    pub kind: TypeFilter,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub pagination: Pagination,
}

impl HistoryFilter {
    pub fn resolve(
        &self,
        today: NaiveDate,
        config: &LedgerConfig,
    ) -> Result<HistoryQuery, HistoryError> {
        let window = Days::new(config.history_window_days);
        let (start_date, end_date) = match (self.start_date, self.end_date) {
            (Some(start), Some(end)) => (start, end),
            (Some(start), None) => (start, today),
            (None, Some(end)) => (end.checked_sub_days(window).unwrap_or(NaiveDate::MIN), end),
            (None, None) => (
                today.checked_sub_days(window).unwrap_or(NaiveDate::MIN),
                today,
            ),
        };

        if start_date > end_date {
            return Err(HistoryError::InvalidDateRange {
                start: start_date,
                end: end_date,
            });
        }

        Ok(HistoryQuery {
            kind: self.kind,
            start_date,
            end_date,
            pagination: Pagination::resolve(self.page, self.per_page, config),
        })
    }
}

impl HistoryQuery {
    pub fn matches(&self, record: &TransactionRecord) -> bool {
        let day = record.created_at.date_naive();
        self.kind.matches(record.kind) && self.start_date <= day && day <= self.end_date
    }
}
