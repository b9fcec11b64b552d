//! Dashboard adapter: the only component that talks to the external row
//! store.
//!
//! The rest of the system sees the [`DashboardClient`] trait; production
//! uses [`HttpDashboard`] over the row store's REST surface, tests and the
//! `status` command use [`InMemoryDashboard`]. All outgoing cell values are
//! sanitized and redacted before they leave the process, and `status`
//! updates carry optimistic concurrency via an expected-status check.

mod client;
mod http;
mod memory;
mod row;

pub use client::{DashboardClient, DashboardError, ListFilter, NewRow, RowPatch};
pub use http::HttpDashboard;
pub use memory::InMemoryDashboard;
pub use row::{DashRow, RowStatus, ROW_COLUMNS};
