//! Astrid Test - Shared test utilities for the Astrid datastore.
//!
//! This crate provides fixtures and harness helpers that can be used by
//! integration tests as a dev-dependency.
//!
//! # Usage
//!
//! Add to your crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! astrid-test.workspace = true
//! ```
//!
//! Then use in your tests:
//!
//! ```rust,ignore
//! use astrid_datastore::prelude::*;
//! use astrid_test::{populate, sample_entries, setup_test_logging_default};
//!
//! #[tokio::test]
//! async fn test_prefix_query() {
//!     setup_test_logging_default();
//!     let store = Datastore::in_memory();
//!     populate(&store, &sample_entries()).await;
//!
//!     let results = store.query(Query::new().with_prefix("/a/")).await.unwrap();
//!     assert_eq!(results.rest().unwrap().len(), 5);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod fixtures;
pub mod harness;

pub use fixtures::*;
pub use harness::*;
