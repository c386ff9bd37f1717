//! Sales-order ETL pipeline for the Tiny ERP.
//!
//! Webhooks and storage events feed raw order payloads into an archive;
//! the reconcile core turns each order's three payload shapes into two
//! fact rows (order and line item) loaded into a Postgres warehouse.

pub mod config;
pub mod erp;
pub mod ingest;
pub mod payload;
pub mod queue;
pub mod reconcile;
pub mod store;
pub mod sweep;
pub mod tracing;
pub mod warehouse;
pub mod webhook;

pub mod util {
    pub mod env;
}
