//! Offset pagination shared by history and account listings.

use serde::Serialize;

use crate::LedgerConfig;

/// A resolved page request (1-based page number).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: u32,
    pub per_page: u32,
}

impl Pagination {
    /// Fill defaults and clamp to the configured bounds; page 0 means page 1.
    pub fn resolve(page: Option<u32>, per_page: Option<u32>, config: &LedgerConfig) -> Self {
        let max = config.max_page_size.max(1);
        Self {
            page: page.unwrap_or(1).max(1),
            per_page: per_page.unwrap_or(config.default_page_size).clamp(1, max),
        }
    }

    /// Cut one page out of an already ordered result set.
    pub fn paginate<T>(&self, items: Vec<T>) -> Page<T> {
        let total = items.len();
        let per_page = (self.per_page as usize).max(1);
        let offset = (self.page as usize).saturating_sub(1).saturating_mul(per_page);
        let last_page = total.div_ceil(per_page).max(1);

        Page {
            items: items.into_iter().skip(offset).take(per_page).collect(),
            total,
            per_page: self.per_page,
            current_page: self.page,
            last_page: u32::try_from(last_page).unwrap_or(u32::MAX),
        }
    }
}

/// One page of results plus the metadata needed to fetch the others.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub per_page: u32,
    pub current_page: u32,
    pub last_page: u32,
}
