//! Common plumbing for csi-e2e: errors, YAML parsing, retries, kube helpers
//! and log initialization.

#![deny(missing_docs)]

pub mod error;
pub mod kube_utils;
pub mod retry;
pub mod telemetry;
pub mod yaml;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Field manager / user agent used for every object the harness writes
pub const FIELD_MANAGER: &str = "csi-e2e";

/// Label key carrying the uniqueness token of the run that created an object
pub const RUN_LABEL_KEY: &str = "csi-e2e.io/run";

/// Label key carrying the driver name an object was deployed for
pub const DRIVER_LABEL_KEY: &str = "csi-e2e.io/driver";

/// Build the label selector matching every object created by one run
pub fn run_label_selector(token: &str) -> String {
    format!("{}={}", RUN_LABEL_KEY, token)
}
