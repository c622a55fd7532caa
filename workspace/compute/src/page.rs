/// A 1-based page of a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: u64,
    pub limit: u64,
}

impl Page {
    pub const DEFAULT_LIMIT: u64 = 50;

    /// Page 0 is treated as page 1, a zero limit as the default limit.
    pub fn new(page: u64, limit: u64) -> Self {
        Self {
            page: page.max(1),
            limit: if limit == 0 { Self::DEFAULT_LIMIT } else { limit },
        }
    }

    /// Zero-based index for `Paginator::fetch_page`.
    pub fn index(&self) -> u64 {
        self.page.max(1) - 1
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(1, Self::DEFAULT_LIMIT)
    }
}

/// Rows of one page plus the number of rows across all pages.
#[derive(Debug, Clone)]
pub struct Paged<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: Page,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_normalization() {
        assert_eq!(Page::new(0, 0), Page { page: 1, limit: 50 });
        assert_eq!(Page::new(3, 10).index(), 2);
        assert_eq!(Page::default().index(), 0);
    }
}
