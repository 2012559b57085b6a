use serde::{Deserialize, Serialize};

/// One page of a feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// 1-based number of this page, after clamping.
    pub number: u64,
    pub num_pages: u64,
    pub total_items: u64,
    pub per_page: u64,
}

impl<T> Page<T> {
    pub fn has_next(&self) -> bool {
        self.number < self.num_pages
    }

    pub fn has_previous(&self) -> bool {
        self.number > 1
    }

    pub fn empty(per_page: u64) -> Self {
        Page {
            items: Vec::new(),
            number: 1,
            num_pages: 1,
            total_items: 0,
            per_page,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            number: self.number,
            num_pages: self.num_pages,
            total_items: self.total_items,
            per_page: self.per_page,
        }
    }
}

/// Number of pages for `total` items. An empty listing still has one page.
pub fn num_pages(total: u64, per_page: u64) -> u64 {
    let per_page = per_page.max(1);
    total.div_ceil(per_page).max(1)
}

/// Resolve a requested page number against the listing size.
///
/// No page means the first one. Anything past the end, and `0`, lands on the
/// last page, so a request never comes back empty while records exist.
pub fn resolve_page(requested: Option<u64>, total: u64, per_page: u64) -> u64 {
    let last = num_pages(total, per_page);
    match requested {
        None => 1,
        Some(0) => last,
        Some(n) => n.min(last),
    }
}
