//! itsm-sync - ITSM/CMDB extraction and load service
//!
//! Pulls paginated record sets from a remote ITSM REST API (and linked SQL
//! tables), flattens their reference fields, and loads them into a local
//! relational store with full-replace or upsert semantics. An HTTP trigger
//! surface runs batches of load tasks concurrently and records execution
//! telemetry.

// Module declarations
pub mod api;
pub mod application;
pub mod domain;
pub mod infrastructure;
