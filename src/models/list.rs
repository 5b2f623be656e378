//! List envelope returned by every collection endpoint.

use serde::{Deserialize, Serialize};

/// One page of a resource collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
    #[serde(default)]
    pub metadata: ListMeta,
}

/// Paging metadata attached to a list page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListMeta {
    /// Opaque token for the page after this one.
    #[serde(
        rename = "continue",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub continue_token: Option<String>,
    /// Server hint of how many items follow this page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_item_count: Option<u64>,
}

impl<T> ListResponse<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items,
            metadata: ListMeta::default(),
        }
    }

    pub fn with_continue<S: Into<String>>(mut self, token: S) -> Self {
        self.metadata.continue_token = Some(token.into());
        self
    }

    pub fn with_remaining(mut self, remaining: u64) -> Self {
        self.metadata.remaining_item_count = Some(remaining);
        self
    }

    /// Token for the next page, with absence folded into the empty string.
    pub fn next_token(&self) -> &str {
        self.metadata.continue_token.as_deref().unwrap_or_default()
    }
}
