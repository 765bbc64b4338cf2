//! Fixed-size pagination over pattern listings.

use crate::error::{Result, WardenError};

/// Patterns shown per listing page.
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// One page of a non-empty listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// 1-based page number.
    pub page: usize,
    pub page_count: usize,
    pub total: usize,
}

impl<T> Page<T> {
    pub fn has_previous(&self) -> bool {
        self.page > 1
    }

    pub fn has_next(&self) -> bool {
        self.page < self.page_count
    }
}

/// A listing is either explicitly empty or one page of results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Listing<T> {
    Empty,
    Page(Page<T>),
}

impl<T> Listing<T> {
    pub fn page_count(&self) -> usize {
        match self {
            Self::Empty => 0,
            Self::Page(page) => page.page_count,
        }
    }
}

/// Number of pages needed for `total` items. An exact multiple of
/// `page_size` does not get a trailing empty page.
pub fn page_count(total: usize, page_size: usize) -> usize {
    if page_size == 0 {
        return 0;
    }
    total.div_ceil(page_size)
}

/// Slice `items` into the requested 1-based page.
///
/// An empty slice yields [`Listing::Empty`] for page 1. Any page outside
/// `1..=page_count` is an error rather than a clamp.
pub fn paginate<T: Clone>(items: &[T], page: usize, page_size: usize) -> Result<Listing<T>> {
    if page_size == 0 {
        return Err(WardenError::InvalidRequest(
            "page size must be positive".to_string(),
        ));
    }

    let page_count = page_count(items.len(), page_size);
    if items.is_empty() && page == 1 {
        return Ok(Listing::Empty);
    }
    if page == 0 || page > page_count {
        return Err(WardenError::InvalidPage { page, page_count });
    }

    let start = (page - 1) * page_size;
    let end = (start + page_size).min(items.len());
    Ok(Listing::Page(Page {
        items: items[start..end].to_vec(),
        page,
        page_count,
        total: items.len(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered(count: usize) -> Vec<String> {
        (0..count).map(|i| format!("pattern-{:03}", i)).collect()
    }

    #[test]
    fn page_count_boundaries() {
        assert_eq!(page_count(0, 50), 0);
        assert_eq!(page_count(1, 50), 1);
        assert_eq!(page_count(50, 50), 1);
        assert_eq!(page_count(100, 50), 2);
        assert_eq!(page_count(101, 50), 3);
    }

    #[test]
    fn empty_listing_is_explicit() {
        let listing = paginate::<String>(&[], 1, 50).unwrap();
        assert_eq!(listing, Listing::Empty);
        assert_eq!(listing.page_count(), 0);
    }

    #[test]
    fn last_page_holds_remainder() {
        let items = numbered(101);
        let Listing::Page(page) = paginate(&items, 3, 50).unwrap() else {
            panic!("expected a page");
        };
        assert_eq!(page.items, vec!["pattern-100".to_string()]);
        assert!(page.has_previous());
        assert!(!page.has_next());
    }

    #[test]
    fn exact_multiple_has_no_trailing_page() {
        let items = numbered(100);
        let Listing::Page(page) = paginate(&items, 2, 50).unwrap() else {
            panic!("expected a page");
        };
        assert_eq!(page.items.len(), 50);
        assert_eq!(page.page_count, 2);

        assert!(matches!(
            paginate(&items, 3, 50),
            Err(WardenError::InvalidPage {
                page: 3,
                page_count: 2
            })
        ));
    }

    #[test]
    fn page_zero_is_rejected() {
        assert!(matches!(
            paginate(&numbered(3), 0, 50),
            Err(WardenError::InvalidPage { page: 0, .. })
        ));
        assert!(paginate::<String>(&[], 2, 50).is_err());
    }

    #[test]
    fn zero_page_size_is_rejected() {
        assert!(matches!(
            paginate(&numbered(3), 1, 0),
            Err(WardenError::InvalidRequest(_))
        ));
    }
}
