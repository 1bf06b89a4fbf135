//! Integration tests for driver deployment against a real cluster
//!
//! Tests are organized by the story they tell:
//!
//! - `driver_lifecycle`: a renamed driver instance is deployed, serves its
//!   StorageClass, and is removed without leaving anything behind
//!
//! - `leak_sweep`: objects of a run that never cleaned up are found by run
//!   label and removed
//!
//! # Running These Tests
//!
//! ```bash
//! cargo test --test kind -- --ignored --nocapture
//! ```

mod driver_lifecycle;
mod helpers;
mod leak_sweep;
