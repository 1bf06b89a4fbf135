//! Suite registry: drivers × test suites
//!
//! Drivers are registered by name; the registry never runs anything. It
//! expands every registered driver against every suite's (tuned) patterns
//! and marks the pairs the driver cannot support.

use std::collections::BTreeMap;
use std::fmt;

use tracing::debug;

use crate::driver::{DriverFactory, TestDriver};
use crate::pattern::{TestPattern, TestSuite, VolumeType};
use crate::{Error, Result};

/// Pattern filter applied to every suite before expansion
pub type PatternTuner = fn(Vec<TestPattern>) -> Vec<TestPattern>;

/// Registered drivers, keyed by driver name
#[derive(Default)]
pub struct DriverRegistry {
    factories: BTreeMap<String, Box<dyn DriverFactory>>,
}

/// One {driver, suite, pattern} combination
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TestCase {
    /// Registered driver name
    pub driver: String,
    /// Suite context name, including feature tags
    pub driver_context: String,
    /// Suite name
    pub suite: String,
    /// Pattern the suite runs with
    pub pattern: TestPattern,
    /// Why the case is skipped, if it is
    pub skip: Option<String>,
}

impl TestCase {
    /// Full test name as reported by the suite
    pub fn name(&self) -> String {
        format!("{} {} {}", self.driver_context, self.pattern, self.suite)
    }

    /// True when the case would actually run
    pub fn runs(&self) -> bool {
        self.skip.is_none()
    }
}

impl fmt::Display for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.skip {
            Some(reason) => write!(f, "{} [skipped: {}]", self.name(), reason),
            None => write!(f, "{}", self.name()),
        }
    }
}

impl DriverRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a driver factory
    ///
    /// Fails with [`Error::Registration`] if a driver of the same name is
    /// already registered.
    pub fn register(&mut self, factory: Box<dyn DriverFactory>) -> Result<()> {
        let name = factory.name().to_string();
        if name.is_empty() {
            return Err(Error::registration(name, "driver name is empty"));
        }
        if self.factories.contains_key(&name) {
            return Err(Error::registration(name, "driver already registered"));
        }
        debug!(driver = %name, "registered driver");
        self.factories.insert(name, factory);
        Ok(())
    }

    /// Registered driver names, in order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Factory registered under `name`
    pub fn get(&self, name: &str) -> Option<&dyn DriverFactory> {
        self.factories.get(name).map(|f| &**f)
    }

    /// Fresh driver instance for `name`
    pub fn instantiate(&self, name: &str) -> Option<Box<dyn TestDriver>> {
        self.get(name).map(|f| f.instantiate())
    }

    /// Expand every driver against every suite
    ///
    /// Each suite's patterns pass through `tune` first. Unsupported pairs
    /// are kept with a skip reason so the matrix stays complete.
    pub fn cases(&self, suites: &[TestSuite], tune: PatternTuner) -> Vec<TestCase> {
        let mut cases = Vec::new();
        for (name, factory) in &self.factories {
            let sample = factory.instantiate();
            let driver_context = sample.driver_info().name_with_feature_tags();
            for suite in suites {
                for pattern in tune(suite.patterns.clone()) {
                    let skip = unsupported_reason(sample.as_ref(), &pattern)
                        .or_else(|| sample.should_skip(&pattern));
                    cases.push(TestCase {
                        driver: name.clone(),
                        driver_context: driver_context.clone(),
                        suite: suite.name.clone(),
                        pattern,
                        skip,
                    });
                }
            }
        }
        cases
    }
}

/// Reason a driver cannot run a pattern at all, independent of its own opinion
pub fn unsupported_reason(driver: &dyn TestDriver, pattern: &TestPattern) -> Option<String> {
    let name = &driver.driver_info().name;
    match pattern.vol_type {
        VolumeType::DynamicPv if driver.as_dynamic_pv().is_none() => Some(format!(
            "driver {} does not support dynamic provisioning",
            name
        )),
        VolumeType::DynamicPv => None,
        VolumeType::InlineVolume => Some(format!("driver {} does not support inline volumes", name)),
        VolumeType::PreprovisionedPv => Some(format!(
            "driver {} does not support pre-provisioned volumes",
            name
        )),
    }
}
