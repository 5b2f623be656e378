//! # Resource Endpoints
//!
//! Query builders for the collections the console lists. Each returns a
//! [`ListQuery`]; the pager adds `limit`/`continue` for paginated ones.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::config::PollConfig;
use crate::query::{FieldSelector, Label, ListQuery};

/// Kinds of objects that own events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Device,
    Fleet,
    Repository,
    EnrollmentRequest,
    ResourceSync,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown resource kind '{0}'")]
pub struct UnknownResourceKind(String);

impl ResourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Device => "Device",
            ResourceKind::Fleet => "Fleet",
            ResourceKind::Repository => "Repository",
            ResourceKind::EnrollmentRequest => "EnrollmentRequest",
            ResourceKind::ResourceSync => "ResourceSync",
        }
    }

    /// Collection path of this kind under the API root.
    pub fn collection(self) -> &'static str {
        match self {
            ResourceKind::Device => "devices",
            ResourceKind::Fleet => "fleets",
            ResourceKind::Repository => "repositories",
            ResourceKind::EnrollmentRequest => "enrollmentrequests",
            ResourceKind::ResourceSync => "resourcesyncs",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = UnknownResourceKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "device" | "devices" => Ok(ResourceKind::Device),
            "fleet" | "fleets" => Ok(ResourceKind::Fleet),
            "repository" | "repositories" => Ok(ResourceKind::Repository),
            "enrollmentrequest" | "enrollmentrequests" => Ok(ResourceKind::EnrollmentRequest),
            "resourcesync" | "resourcesyncs" => Ok(ResourceKind::ResourceSync),
            _ => Err(UnknownResourceKind(s.to_string())),
        }
    }
}

/// `fleets`, optionally filtered by name and annotated with device counts.
pub fn fleets_query(name: Option<&str>, add_devices_count: bool) -> ListQuery {
    let mut query = ListQuery::new("fleets");
    if let Some(name) = name.filter(|name| !name.is_empty()) {
        query = query.field(FieldSelector::contains("metadata.name", name));
    }
    if add_devices_count {
        query = query.flag("addDevicesCount", "true");
    }
    query
}

/// Filters of the device table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceFilters {
    pub application_statuses: Vec<String>,
    pub device_statuses: Vec<String>,
    pub update_statuses: Vec<String>,
    pub name_or_alias: Option<String>,
    /// Fleet names; rendered as `Fleet/<name>` owners.
    pub owner_fleets: Vec<String>,
    pub labels: Vec<Label>,
    /// Ask for the status summary instead of items.
    pub summary_only: bool,
}

pub fn devices_query(filters: &DeviceFilters) -> ListQuery {
    let mut query = ListQuery::new("devices")
        .field(FieldSelector::one_of(
            "status.applicationsSummary.status",
            filters.application_statuses.iter().cloned(),
        ))
        .field(FieldSelector::one_of(
            "status.summary.status",
            filters.device_statuses.iter().cloned(),
        ))
        .field(FieldSelector::one_of(
            "status.updated.status",
            filters.update_statuses.iter().cloned(),
        ));

    if let Some(text) = filters.name_or_alias.as_deref() {
        query = query.field(FieldSelector::contains("metadata.nameoralias", text));
    }
    query = query
        .field(FieldSelector::one_of(
            "metadata.owner",
            filters.owner_fleets.iter().map(|fleet| format!("Fleet/{fleet}")),
        ))
        .labels(filters.labels.iter().cloned());

    if filters.summary_only {
        query = query.flag("summaryOnly", "true");
    }
    query
}

/// Enrollment requests still waiting for approval.
pub fn pending_enrollment_requests_query() -> ListQuery {
    ListQuery::new("enrollmentrequests")
        .field(FieldSelector::not_exists("status.approval.approved"))
        .paginated()
}

pub fn repositories_query(name: Option<&str>) -> ListQuery {
    let mut query = ListQuery::new("repositories");
    if let Some(name) = name.filter(|name| !name.is_empty()) {
        query = query.field(FieldSelector::contains("metadata.name", name));
    }
    query.paginated()
}

/// Severity of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Normal,
    Warning,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Normal => "Normal",
            EventType::Warning => "Warning",
        }
    }
}

/// Which events to list. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventCriteria {
    pub kind: Option<ResourceKind>,
    pub name: Option<String>,
    pub event_type: Option<EventType>,
}

/// Latest `limit` events matching `criteria`.
pub fn events_query(criteria: &EventCriteria, limit: usize) -> ListQuery {
    let mut query = ListQuery::new("events");
    if let Some(kind) = criteria.kind {
        query = query.field(FieldSelector::equals("involvedObject.kind", kind.as_str()));
    }
    if let Some(name) = criteria.name.as_deref().filter(|name| !name.is_empty()) {
        query = query.field(FieldSelector::equals("involvedObject.name", name));
    }
    if let Some(event_type) = criteria.event_type {
        query = query.field(FieldSelector::equals("type", event_type.as_str()));
    }
    query.flag("limit", limit.to_string())
}

/// Refresh period for the events of objects of `kind`.
///
/// Device events change the most, repository events the least.
pub fn events_poll_interval(kind: Option<ResourceKind>, config: &PollConfig) -> Duration {
    let millis = match kind {
        Some(ResourceKind::Device) => config.device_events_interval_ms,
        Some(ResourceKind::Fleet) => config.fleet_events_interval_ms,
        _ => config.default_events_interval_ms,
    };
    Duration::from_millis(millis)
}
