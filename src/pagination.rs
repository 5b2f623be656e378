//! # Continuation-Token Pagination
//!
//! Bookkeeping for one paginated list view. The server pages with opaque
//! continuation tokens rather than offsets, so the pager remembers the token
//! each page produced and hands back the one the requested page needs.
//!
//! Tokens are never decoded. `tokens_by_page[i]` is the token returned by page
//! `i + 1`, which is the token required to fetch page `i + 2`.

use tracing::trace;

use crate::models::list::ListResponse;

/// Per-view pagination state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pager {
    page_size: usize,
    current_page: usize,
    tokens_by_page: Vec<String>,
    estimated_item_count: u64,
}

impl Pager {
    /// Create a pager positioned on page 1 with no known tokens.
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            current_page: 1,
            tokens_by_page: Vec::new(),
            estimated_item_count: 0,
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// 1-based index of the page currently requested.
    pub fn current_page(&self) -> usize {
        self.current_page
    }

    pub fn tokens_by_page(&self) -> &[String] {
        &self.tokens_by_page
    }

    /// Running estimate of the collection size.
    pub fn estimated_item_count(&self) -> u64 {
        self.estimated_item_count
    }

    /// Highest page reachable through known, non-empty tokens.
    pub fn last_reachable_page(&self) -> usize {
        1 + self
            .tokens_by_page
            .iter()
            .take_while(|token| !token.is_empty())
            .count()
    }

    /// Whether `page` can be requested without skipping an unknown token.
    pub fn can_request_page(&self, page: usize) -> bool {
        page >= 1 && page <= self.last_reachable_page()
    }

    /// Whether the current page reported a continuation token.
    pub fn has_next_page(&self) -> bool {
        self.tokens_by_page
            .get(self.current_page - 1)
            .is_some_and(|token| !token.is_empty())
    }

    /// Move to `page`.
    ///
    /// Callers must not go past [`Pager::last_reachable_page`]; the list view
    /// checks with [`Pager::can_request_page`] before calling.
    pub fn request_page(&mut self, page: usize) {
        debug_assert!(
            self.can_request_page(page),
            "page {page} requested with only {} known tokens",
            self.tokens_by_page.len()
        );
        self.current_page = page.max(1);
    }

    /// Forget everything learned about the collection and return to page 1.
    ///
    /// Tokens belong to the collection that produced them; a different query
    /// starts over.
    pub fn reset(&mut self) {
        self.current_page = 1;
        self.tokens_by_page.clear();
        self.estimated_item_count = 0;
    }

    /// Token to send for the current page.
    ///
    /// Page 1 never needs a token and yields `Some("")`. Deeper pages use the
    /// token produced by the previous page, or `None` when it is not known.
    pub fn token_for_current_page(&self) -> Option<&str> {
        if self.current_page <= 1 {
            return Some("");
        }
        self.tokens_by_page
            .get(self.current_page - 2)
            .map(String::as_str)
    }

    /// Absorb a successful response for the current page.
    pub fn on_page_fetched<T>(&mut self, response: &ListResponse<T>) {
        let prior_items = ((self.current_page - 1) * self.page_size) as u64;
        self.estimated_item_count = prior_items
            + response.items.len() as u64
            + response.metadata.remaining_item_count.unwrap_or(0);

        let next_token = response.next_token().to_string();
        if self.current_page == 1 {
            // A first page reflects a new collection state; deeper tokens may be stale.
            self.tokens_by_page = vec![next_token];
        } else if self.tokens_by_page.len() < self.current_page {
            self.tokens_by_page.push(next_token);
        } else {
            self.tokens_by_page[self.current_page - 1] = next_token;
        }

        trace!(
            page = self.current_page,
            known_tokens = self.tokens_by_page.len(),
            estimated_item_count = self.estimated_item_count,
            "Page bookkeeping updated"
        );
    }
}

impl Default for Pager {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_PAGE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(items: usize, token: Option<&str>, remaining: Option<u64>) -> ListResponse<u32> {
        let mut response = ListResponse::new((0..items as u32).collect());
        response.metadata.continue_token = token.map(str::to_string);
        response.metadata.remaining_item_count = remaining;
        response
    }

    #[test]
    fn first_page_needs_empty_token() {
        let pager = Pager::new(15);
        assert_eq!(pager.token_for_current_page(), Some(""));
        assert_eq!(pager.last_reachable_page(), 1);
        assert!(!pager.can_request_page(2));
    }

    #[test]
    fn walk_two_pages_of_fifteen() {
        let mut pager = Pager::new(15);

        pager.on_page_fetched(&page(15, Some("tok1"), Some(5)));
        assert_eq!(pager.estimated_item_count(), 20);
        assert!(pager.can_request_page(2));
        assert!(pager.has_next_page());

        pager.request_page(2);
        assert_eq!(pager.token_for_current_page(), Some("tok1"));

        pager.on_page_fetched(&page(5, None, None));
        assert_eq!(pager.estimated_item_count(), 20);
        assert!(!pager.has_next_page());
        assert_eq!(pager.tokens_by_page(), ["tok1".to_string(), String::new()]);
        assert_eq!(pager.last_reachable_page(), 2);
        assert!(!pager.can_request_page(3));
    }

    #[test]
    fn page_one_always_resets_tokens() {
        let mut pager = Pager::new(10);
        pager.on_page_fetched(&page(10, Some("a"), Some(30)));
        pager.request_page(2);
        pager.on_page_fetched(&page(10, Some("b"), Some(20)));
        pager.request_page(3);
        pager.on_page_fetched(&page(10, Some("c"), Some(10)));
        assert_eq!(pager.tokens_by_page().len(), 3);

        pager.request_page(1);
        for token in ["x", "", "y"] {
            pager.on_page_fetched(&page(10, Some(token), None));
            assert_eq!(pager.tokens_by_page(), [token.to_string()]);
        }
    }

    #[test]
    fn revisit_overwrites_only_current_slot() {
        let mut pager = Pager::new(10);
        pager.on_page_fetched(&page(10, Some("a"), None));
        pager.request_page(2);
        pager.on_page_fetched(&page(10, Some("b"), None));
        pager.request_page(3);
        pager.on_page_fetched(&page(10, Some("c"), None));

        pager.request_page(2);
        pager.on_page_fetched(&page(10, Some("b2"), None));

        assert_eq!(
            pager.tokens_by_page(),
            ["a".to_string(), "b2".to_string(), "c".to_string()]
        );
    }

    #[test]
    fn estimate_is_recomputed_not_accumulated() {
        let mut pager = Pager::new(15);
        pager.on_page_fetched(&page(15, Some("tok"), Some(100)));
        assert_eq!(pager.estimated_item_count(), 115);

        pager.on_page_fetched(&page(7, None, Some(3)));
        assert_eq!(pager.estimated_item_count(), 10);
    }

    #[test]
    fn empty_page_stops_growth() {
        let mut pager = Pager::new(15);
        pager.on_page_fetched(&page(15, Some("tok"), None));
        pager.request_page(2);
        pager.on_page_fetched(&page(0, None, None));

        assert_eq!(pager.estimated_item_count(), 15);
        assert!(!pager.has_next_page());
    }

    #[test]
    fn reset_forgets_tokens_and_estimate() {
        let mut pager = Pager::new(15);
        pager.on_page_fetched(&page(15, Some("tok1"), Some(5)));
        pager.request_page(2);

        pager.reset();
        assert_eq!(pager.current_page(), 1);
        assert!(pager.tokens_by_page().is_empty());
        assert_eq!(pager.estimated_item_count(), 0);
        assert_eq!(pager.last_reachable_page(), 1);
        assert!(!pager.can_request_page(2));
        assert!(!pager.has_next_page());
    }

    #[test]
    fn unknown_token_is_none() {
        let pager = Pager {
            page_size: 10,
            current_page: 4,
            tokens_by_page: vec!["a".into()],
            estimated_item_count: 0,
        };
        assert_eq!(pager.token_for_current_page(), None);
    }
}
