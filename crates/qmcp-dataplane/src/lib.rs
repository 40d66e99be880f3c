// SPDX-License-Identifier: MIT OR Apache-2.0
//! qmcp-dataplane
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! S3 and Athena helpers: request-scoped client construction, paginated
//! listing, range and versioned reads, batch writes, presigning, and the
//! Athena query lifecycle with workgroup discovery and catalog routing.

/// Exponential backoff schedule for polling loops.
pub mod backoff;
/// Athena query lifecycle.
pub mod athena;
/// Request-scoped S3 clients and bucket operations.
pub mod s3;
/// Tabulator database discovery from the catalog's public config.
pub mod tabulator;

pub use athena::{AthenaClientFactory, AthenaQuerySpec, AthenaRunner, QueryOutput, pick_workgroup};
pub use backoff::Backoff;
pub use s3::{BucketOps, PutItem, PutItemResult, S3ClientFactory};
pub use tabulator::tabulator_database;
