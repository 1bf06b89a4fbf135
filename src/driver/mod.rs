//! Driver lifecycle controllers
//!
//! A [`TestDriver`] owns one driver's per-run deployment: it answers pure
//! questions about the driver (capabilities, skipped patterns) and brackets
//! every test case with [`TestDriver::create_driver`] and
//! [`TestDriver::cleanup_driver`].
//!
//! Lifecycle of one instance:
//!
//! ```text
//! Configured --create_driver--> Deployed --cleanup_driver--> TornDown
//!      |                                                       ^
//!      +-------------------cleanup_driver (no-op)--------------+
//! ```
//!
//! `TornDown` is terminal; a new test run instantiates a new driver.

mod manifest;

pub use manifest::{ManifestDriver, ManifestDriverFactory};

use async_trait::async_trait;
use k8s_openapi::api::storage::v1::StorageClass;

use crate::context::TestRunContext;
use crate::manifest::DriverInfo;
use crate::pattern::TestPattern;
use crate::{Error, Result};

/// Observable lifecycle state of a driver instance
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    /// Loaded, nothing deployed yet
    Configured,
    /// Objects exist in the cluster
    Deployed,
    /// Cleanup ran; terminal
    TornDown,
}

/// A storage driver under test
#[async_trait]
pub trait TestDriver: Send + Sync {
    /// Identity and capabilities; no side effects
    fn driver_info(&self) -> &DriverInfo;

    /// Reason to skip a pattern this driver cannot support, if any
    fn should_skip(&self, _pattern: &TestPattern) -> Option<String> {
        None
    }

    /// Dynamic provisioning support, when the driver has it
    fn as_dynamic_pv(&self) -> Option<&dyn DynamicPvTestDriver> {
        None
    }

    /// Current lifecycle state
    fn state(&self) -> LifecycleState;

    /// Deploy the driver for one test run
    ///
    /// Valid only from [`LifecycleState::Configured`]. A failure ends the
    /// test case; nothing the failed attempt created is left behind.
    async fn create_driver(&mut self, ctx: &TestRunContext) -> Result<()>;

    /// Remove everything `create_driver` deployed
    ///
    /// Safe to call in any state and any number of times. Returns the
    /// teardown failures, which are never fatal.
    async fn cleanup_driver(&mut self) -> Vec<Error>;
}

/// Drivers whose volumes are provisioned through a StorageClass
pub trait DynamicPvTestDriver: Send + Sync {
    /// StorageClass routing claims to this run's driver instance
    ///
    /// Built from the driver's storage class template; not created in the
    /// cluster.
    fn dynamic_provision_storage_class(
        &self,
        ctx: &TestRunContext,
        fs_type: &str,
    ) -> Result<StorageClass>;

    /// Size requested by dynamically provisioned claims
    fn claim_size(&self) -> &str;
}

/// Produces fresh driver instances for a registered driver
pub trait DriverFactory: Send + Sync {
    /// Driver identity; unique within a registry
    fn name(&self) -> &str;

    /// New driver instance in [`LifecycleState::Configured`]
    ///
    /// No side effects; may be called to answer capability questions.
    fn instantiate(&self) -> Box<dyn TestDriver>;
}
