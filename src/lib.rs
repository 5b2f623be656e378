//! # fleetsync
//!
//! Client-side list synchronization for a fleet management API: continuation
//! token paging, debounced query descriptors, and session-guarded polling.

pub mod config;
pub mod debounce;
pub mod error;
pub mod list_view;
pub mod models;
pub mod pagination;
pub mod poller;
pub mod query;
pub mod resources;
pub mod telemetry;
pub mod transport;
