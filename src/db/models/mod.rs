use serde::{Deserialize, Serialize};

pub mod analysis;
pub mod session;
pub mod stats;

pub const MAX_PAGE_LIMIT: i64 = 100;

#[inline]
const fn default_page() -> i64 {
    1
}

#[inline]
const fn default_limit() -> i64 {
    10
}

/// 1-based page request as accepted from query strings.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Pagination {
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

impl Pagination {
    pub fn new(page: i64, limit: i64) -> Self {
        Self { page, limit }.clamped()
    }

    pub fn clamped(self) -> Self {
        Self {
            page: self.page.max(1),
            limit: self.limit.clamp(1, MAX_PAGE_LIMIT),
        }
    }

    /// Saturates instead of overflowing for absurd page numbers; such pages are simply empty.
    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.limit)
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: default_page(),
            limit: default_limit(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub has_more: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub pagination: PageInfo,
}

impl<T> PaginatedResponse<T> {
    pub fn new(items: Vec<T>, total: i64, page: Pagination) -> Self {
        let has_more = page.offset().saturating_add(page.limit) < total;
        Self {
            items,
            pagination: PageInfo {
                page: page.page,
                limit: page.limit,
                total,
                has_more,
            },
        }
    }
}
