//! csi-e2e - isolated, per-run deployment of CSI drivers for storage
//! conformance suites
//!
//! Every test run deploys its own renamed copy of a CSI driver: cluster-scoped
//! objects get a per-run suffix, namespaced objects land in a per-run
//! namespace, and the driver's name, socket paths and provisioner are
//! rewritten so concurrent runs never collide. The run's StorageClass points
//! at that private instance, and teardown removes exactly what was created.
//!
//! # Modules
//!
//! - [`manifest`] - Driver manifests: capabilities, patch options, file lists
//! - [`patch`] - Typed workload objects and the driver-renaming patcher
//! - [`materialize`] - Loading, substituting, creating and tearing down objects
//! - [`node`] - Target node resolution
//! - [`driver`] - Driver lifecycle controllers and factories
//! - [`pattern`] - Test patterns and suites
//! - [`registry`] - Driver registration and test matrix expansion
//! - [`scope`] - Running a test body between create and cleanup
//! - [`context`] - Per-run identity
//! - [`cli`] - Command-line interface

#![deny(missing_docs)]

pub mod cli;
pub mod context;
pub mod driver;
pub mod manifest;
pub mod materialize;
pub mod node;
pub mod patch;
pub mod pattern;
pub mod registry;
pub mod scope;

#[cfg(test)]
mod testing;

pub use csi_e2e_common::{Error, Result};
