use serde::{Deserialize, Serialize};

pub const DEFAULT_LIMIT: i64 = 10;
pub const MAX_LIMIT: i64 = 100;

/// Raw paging parameters as they arrive in a query string (1-indexed page).
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PageRequest {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

/// A page window resolved against a known total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub page: i64,
    pub limit: i64,
    pub offset: i64,
}

impl PageRequest {
    /// Clamps page to at least 1 and limit to `1..=MAX_LIMIT`; a window past the end falls
    /// back to page 1.
    pub fn resolve(&self, total: i64) -> PageWindow {
        let limit = self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        let mut page = self.page.unwrap_or(1).max(1);
        let mut offset = (page - 1).saturating_mul(limit);
        if offset >= total {
            page = 1;
            offset = 0;
        }
        PageWindow {
            page,
            limit,
            offset,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Paginated<T> {
    pub limit: i64,
    pub page: i64,
    pub total: i64,
    pub total_pages: i64,
    pub items: Vec<T>,
}

impl<T> Paginated<T> {
    pub fn new(window: PageWindow, total: i64, items: Vec<T>) -> Self {
        Self {
            limit: window.limit,
            page: window.page,
            total,
            total_pages: total_pages(total, window.limit),
            items,
        }
    }
}

fn total_pages(total: i64, limit: i64) -> i64 {
    if total <= 0 {
        0
    } else {
        let limit = limit.max(1);
        total / limit + i64::from(total % limit != 0)
    }
}
