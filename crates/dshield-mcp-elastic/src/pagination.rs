//! Page-number pagination math and the deep-page guard.

use serde::{Deserialize, Serialize};

use crate::error::EsError;

/// Offset past which page-number pagination is refused and callers must
/// switch to cursors. Matches the backend's default `from + size` window.
pub const DEEP_PAGE_LIMIT: usize = 10_000;

/// How the caller addresses a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageSelector {
    /// 1-based page number.
    Number(usize),
    /// Opaque cursor from a previous response.
    Cursor(String),
}

impl Default for PageSelector {
    fn default() -> Self {
        Self::Number(1)
    }
}

/// Page-number bookkeeping included in page-mode responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    /// 1-based page number.
    pub page_number: usize,
    /// Total pages for the current hit count.
    pub total_pages: usize,
    /// Whether a previous page exists.
    pub has_previous: bool,
    /// Whether a next page exists.
    pub has_next: bool,
    /// 0-based index of the first event on this page.
    pub start_index: usize,
    /// 0-based index one past the last event on this page.
    pub end_index: usize,
}

impl PageInfo {
    /// Derive page bookkeeping from the total hit count.
    pub fn compute(page_number: usize, page_size: usize, total_hits: u64, returned: usize) -> Self {
        let total = usize::try_from(total_hits).unwrap_or(usize::MAX);
        let total_pages = if total == 0 {
            0
        } else {
            total.div_ceil(page_size.max(1))
        };
        let start_index = (page_number.saturating_sub(1)) * page_size;
        Self {
            page_number,
            total_pages,
            has_previous: page_number > 1,
            has_next: page_number < total_pages,
            start_index,
            end_index: start_index + returned,
        }
    }
}

/// Reject page-number requests whose window reaches past
/// [`DEEP_PAGE_LIMIT`].
pub fn check_deep_page(page_number: usize, page_size: usize) -> Result<(), EsError> {
    if page_number.saturating_mul(page_size) > DEEP_PAGE_LIMIT {
        return Err(EsError::DeepPagination {
            page: page_number,
            page_size,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_page_info_middle_page() {
        let info = PageInfo::compute(2, 100, 250, 100);
        assert_eq!(info.total_pages, 3);
        assert!(info.has_previous);
        assert!(info.has_next);
        assert_eq!(info.start_index, 100);
        assert_eq!(info.end_index, 200);
    }

    #[test]
    fn test_page_info_last_partial_page() {
        let info = PageInfo::compute(3, 100, 250, 50);
        assert_eq!(info.total_pages, 3);
        assert!(info.has_previous);
        assert!(!info.has_next);
        assert_eq!(info.end_index, 250);
    }

    #[test]
    fn test_page_info_empty_result() {
        let info = PageInfo::compute(1, 100, 0, 0);
        assert_eq!(info.total_pages, 0);
        assert!(!info.has_previous);
        assert!(!info.has_next);
    }

    #[test]
    fn test_deep_page_guard() {
        assert!(check_deep_page(100, 100).is_ok());
        assert!(matches!(
            check_deep_page(101, 100),
            Err(EsError::DeepPagination { .. })
        ));
        assert!(matches!(
            check_deep_page(11, 1000),
            Err(EsError::DeepPagination { .. })
        ));
    }
}
