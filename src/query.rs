//! # Request Descriptors
//!
//! Builds the canonical "what to fetch" string for a list request from the
//! user-controlled filters and the pager's token. Building is pure; the
//! debouncing of its output lives in [`crate::debounce`].

use std::fmt;

use url::form_urlencoded;

/// Canonical, comparable identity of a list request.
///
/// Two descriptors that serialize identically are the same request. The empty
/// descriptor means there is nothing to fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestDescriptor(String);

impl RequestDescriptor {
    /// Descriptor that resolves to no request at all.
    pub fn empty() -> Self {
        Self(String::new())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Resource path without the query string.
    pub fn path(&self) -> &str {
        self.0.split_once('?').map_or(self.0.as_str(), |(path, _)| path)
    }

    /// Continuation token carried by this descriptor, or `""` for none.
    pub fn continue_token(&self) -> String {
        self.query_param("continue").unwrap_or_default()
    }

    /// Decoded value of the first query parameter named `key`.
    pub fn query_param(&self, key: &str) -> Option<String> {
        let (_, query) = self.0.split_once('?')?;
        form_urlencoded::parse(query.as_bytes())
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.into_owned())
    }
}

impl fmt::Display for RequestDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestDescriptor {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for RequestDescriptor {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// One predicate of a `fieldSelector`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldSelector {
    /// `key=value` for one value, `key in (a,b)` for several.
    In { key: String, values: Vec<String> },
    /// `key contains text`.
    Contains { key: String, text: String },
    /// `key` must be set.
    Exists { key: String },
    /// `!key`, the field must be unset or false.
    NotExists { key: String },
}

impl FieldSelector {
    pub fn equals<K: Into<String>, V: Into<String>>(key: K, value: V) -> Self {
        FieldSelector::In {
            key: key.into(),
            values: vec![value.into()],
        }
    }

    pub fn one_of<K, I, V>(key: K, values: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        FieldSelector::In {
            key: key.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains<K: Into<String>, T: Into<String>>(key: K, text: T) -> Self {
        FieldSelector::Contains {
            key: key.into(),
            text: text.into(),
        }
    }

    pub fn exists<K: Into<String>>(key: K) -> Self {
        FieldSelector::Exists { key: key.into() }
    }

    pub fn not_exists<K: Into<String>>(key: K) -> Self {
        FieldSelector::NotExists { key: key.into() }
    }

    /// Rendered predicate, or `None` when it would match nothing meaningful.
    fn render(&self) -> Option<String> {
        match self {
            FieldSelector::In { values, .. } if values.is_empty() => None,
            FieldSelector::In { key, values } if values.len() == 1 => {
                Some(format!("{key}={}", values[0]))
            }
            FieldSelector::In { key, values } => Some(format!("{key} in ({})", values.join(","))),
            FieldSelector::Contains { text, .. } if text.is_empty() => None,
            FieldSelector::Contains { key, text } => Some(format!("{key} contains {text}")),
            FieldSelector::Exists { key } => Some(key.clone()),
            FieldSelector::NotExists { key } => Some(format!("!{key}")),
        }
    }
}

/// One `key=value` pair of a `labelSelector`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Label {
    pub key: String,
    pub value: Option<String>,
}

impl Label {
    pub fn new<K: Into<String>, V: Into<String>>(key: K, value: V) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
        }
    }

    /// Parse `key=value` (or a bare `key`).
    pub fn parse(raw: &str) -> Option<Self> {
        let (key, value) = match raw.split_once('=') {
            Some((key, value)) => (key.trim(), Some(value.trim().to_string())),
            None => (raw.trim(), None),
        };
        if key.is_empty() {
            return None;
        }
        Some(Self {
            key: key.to_string(),
            value,
        })
    }
}

/// Sort direction understood by the list API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    fn as_str(self) -> &'static str {
        match self {
            SortOrder::Asc => "Asc",
            SortOrder::Desc => "Desc",
        }
    }
}

/// User-controlled filter and sort state for one list view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListQuery {
    resource: String,
    field_selectors: Vec<FieldSelector>,
    labels: Vec<Label>,
    sort: Option<(String, SortOrder)>,
    flags: Vec<(String, String)>,
    paginated: bool,
}

impl ListQuery {
    /// Query over the collection at `resource` (e.g. `fleets`).
    pub fn new<S: Into<String>>(resource: S) -> Self {
        Self {
            resource: resource.into(),
            ..Default::default()
        }
    }

    /// Query that fetches nothing.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn is_paginated(&self) -> bool {
        self.paginated
    }

    pub fn field(mut self, selector: FieldSelector) -> Self {
        self.field_selectors.push(selector);
        self
    }

    pub fn label(mut self, label: Label) -> Self {
        self.labels.push(label);
        self
    }

    pub fn labels<I: IntoIterator<Item = Label>>(mut self, labels: I) -> Self {
        self.labels.extend(labels);
        self
    }

    pub fn sort_by<S: Into<String>>(mut self, field: S, order: SortOrder) -> Self {
        self.sort = Some((field.into(), order));
        self
    }

    /// Extra `key=value` query parameter such as `summaryOnly=true`.
    pub fn flag<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.flags.push((key.into(), value.into()));
        self
    }

    /// Mark the collection as continuation-paged.
    pub fn paginated(mut self) -> Self {
        self.paginated = true;
        self
    }

    fn field_selector(&self) -> Option<String> {
        let rendered: Vec<String> = self
            .field_selectors
            .iter()
            .filter_map(FieldSelector::render)
            .collect();
        if rendered.is_empty() {
            None
        } else {
            Some(rendered.join(","))
        }
    }

    fn label_selector(&self) -> Option<String> {
        if self.labels.is_empty() {
            return None;
        }
        Some(
            self.labels
                .iter()
                .map(|label| format!("{}={}", label.key, label.value.as_deref().unwrap_or("")))
                .collect::<Vec<_>>()
                .join(","),
        )
    }
}

/// Build the descriptor for `query` on the page identified by `token`.
///
/// `token` is the pager's answer for the current page: `Some("")` for page 1,
/// the previous page's token for deeper pages. `limit` is only sent for
/// paginated queries whose token is known, and `continue` only when the token
/// is non-empty.
pub fn build_descriptor(
    query: &ListQuery,
    token: Option<&str>,
    page_size: usize,
) -> RequestDescriptor {
    if query.resource.is_empty() {
        return RequestDescriptor::empty();
    }

    let mut params = form_urlencoded::Serializer::new(String::new());
    let mut has_params = false;
    let mut append = |key: &str, value: &str| {
        params.append_pair(key, value);
        has_params = true;
    };

    if let Some(selector) = query.field_selector() {
        append("fieldSelector", &selector);
    }
    if let Some(selector) = query.label_selector() {
        append("labelSelector", &selector);
    }
    if let Some((field, order)) = &query.sort {
        append("sortBy", field);
        append("sortOrder", order.as_str());
    }
    for (key, value) in &query.flags {
        append(key, value);
    }
    if query.paginated
        && let Some(token) = token
    {
        append("limit", &page_size.to_string());
        if !token.is_empty() {
            append("continue", token);
        }
    }

    if has_params {
        RequestDescriptor(format!("{}?{}", query.resource, params.finish()))
    } else {
        RequestDescriptor(query.resource.clone())
    }
}
