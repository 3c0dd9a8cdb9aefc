//! Shared utilities for barcodepack integration tests.
//!
//! - `TestHarness` gives each test its own output directory and database
//! - `ConfigBuilder` builds configurations without boilerplate

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::*;
