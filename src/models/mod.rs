//! # Data Models
//!
//! Wire types shared by every collection endpoint.

pub mod list;

pub use list::{ListMeta, ListResponse};
