//! Test utilities for Archivist.
//!
//! Only available when the `testing` feature is enabled or during tests:
//!
//! ```toml
//! [dev-dependencies]
//! common = { path = "../common", features = ["testing"] }
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use common::testing::TestConfigBuilder;
//!
//! let config = TestConfigBuilder::new()
//!     .with_auth_token("secret")
//!     .without_lease()
//!     .build();
//! ```

mod config_builder;

pub use config_builder::TestConfigBuilder;
