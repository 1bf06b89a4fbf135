//! Error types for csi-e2e
//!
//! Errors are structured with fields so a failure can be reproduced outside
//! the suite: every variant names the driver, manifest path or object it
//! concerns alongside the underlying cause.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for harness operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// A manifest source could not be opened or read
    #[error("cannot read manifest {path}{}: {message}", driver_suffix(.driver))]
    ManifestRead {
        /// Path of the manifest source
        path: String,
        /// Driver the manifest was read for, once known
        driver: Option<String>,
        /// Underlying I/O failure
        message: String,
    },

    /// A manifest source could not be decoded into the expected shape
    #[error("cannot parse manifest {path}{}: {message}", driver_suffix(.driver))]
    ManifestParse {
        /// Path of the manifest source
        path: String,
        /// Driver the manifest was parsed for, once known
        driver: Option<String>,
        /// Decoder failure
        message: String,
    },

    /// A manifest decoded fine but describes the wrong objects
    #[error("unexpected manifest content in {path} for driver {driver}: {message}")]
    ManifestShape {
        /// Driver the manifest belongs to
        driver: String,
        /// Path of the offending manifest
        path: String,
        /// What was wrong with it
        message: String,
    },

    /// Driver objects could not be materialized in the cluster
    #[error("deploying driver {driver}: {message}")]
    Deployment {
        /// Driver being deployed
        driver: String,
        /// Description of what failed
        message: String,
    },

    /// An object created for a driver could not be removed
    #[error("tearing down {object} for driver {driver}: {message}")]
    Teardown {
        /// Driver whose deployment is being removed
        driver: String,
        /// Identity of the object that failed to delete (kind/namespace/name)
        object: String,
        /// Description of what failed
        message: String,
    },

    /// A lifecycle operation was called from a state that does not allow it
    #[error("invalid lifecycle transition for driver {driver}: {message}")]
    Lifecycle {
        /// Driver whose lifecycle was misused
        driver: String,
        /// Description of the rejected transition
        message: String,
    },

    /// A driver could not be added to the suite registry
    #[error("cannot register driver {driver}: {message}")]
    Registration {
        /// Driver being registered
        driver: String,
        /// Why registration was refused
        message: String,
    },

    /// No node could be chosen to pin a driver instance to
    #[error("node resolution failed{}: {message}", driver_suffix(.driver))]
    NodeResolution {
        /// Driver a node was being resolved for, once known
        driver: Option<String>,
        /// Description of what failed
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "render", "scope", "client")
        context: String,
    },
}

fn driver_suffix(driver: &Option<String>) -> String {
    driver
        .as_deref()
        .map(|d| format!(" for driver {}", d))
        .unwrap_or_default()
}

impl Error {
    /// Create a manifest read error for the given source path
    pub fn manifest_read(path: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::ManifestRead {
            path: path.into(),
            driver: None,
            message: msg.into(),
        }
    }

    /// Create a manifest parse error for the given source path
    pub fn manifest_parse(path: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::ManifestParse {
            path: path.into(),
            driver: None,
            message: msg.into(),
        }
    }

    /// Create a manifest shape error with driver and path context
    pub fn manifest_shape(
        driver: impl Into<String>,
        path: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::ManifestShape {
            driver: driver.into(),
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Create a deployment error for a driver
    pub fn deployment(driver: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Deployment {
            driver: driver.into(),
            message: msg.into(),
        }
    }

    /// Create a teardown error for one object of a driver deployment
    pub fn teardown(
        driver: impl Into<String>,
        object: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Teardown {
            driver: driver.into(),
            object: object.into(),
            message: msg.into(),
        }
    }

    /// Create a lifecycle error for a driver
    pub fn lifecycle(driver: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Lifecycle {
            driver: driver.into(),
            message: msg.into(),
        }
    }

    /// Create a registration error for a driver
    pub fn registration(driver: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Registration {
            driver: driver.into(),
            message: msg.into(),
        }
    }

    /// Create a node resolution error
    pub fn node_resolution(msg: impl Into<String>) -> Self {
        Self::NodeResolution {
            driver: None,
            message: msg.into(),
        }
    }

    /// Create an internal error with the given message
    ///
    /// For simple internal errors without specific context.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Attach a driver name to errors raised before the driver was known
    ///
    /// Variants that already name a driver are returned unchanged.
    pub fn for_driver(mut self, name: impl Into<String>) -> Self {
        if let Error::ManifestRead { driver, .. }
        | Error::ManifestParse { driver, .. }
        | Error::NodeResolution { driver, .. } = &mut self
        {
            driver.get_or_insert_with(|| name.into());
        }
        self
    }

    /// Check if this error ends the enclosing test case
    ///
    /// Only teardown failures are non-fatal: they are logged and collected so
    /// cleanup of sibling objects can continue.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::Teardown { .. })
    }

    /// Check if retrying the failed operation could succeed
    ///
    /// Configuration problems (manifests, lifecycle misuse) never heal on
    /// their own. Kubernetes errors are retried unless the API server
    /// rejected the request outright with a 4xx.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code)
            ),
            Error::ManifestRead { .. }
            | Error::ManifestParse { .. }
            | Error::ManifestShape { .. }
            | Error::Lifecycle { .. }
            | Error::Registration { .. } => false,
            Error::Deployment { .. } => false,
            Error::Teardown { .. } => true,
            Error::NodeResolution { .. } => true,
            Error::Internal { .. } => true,
        }
    }

    /// Get the driver name if this error is associated with a specific driver
    pub fn driver(&self) -> Option<&str> {
        match self {
            Error::ManifestShape { driver, .. }
            | Error::Deployment { driver, .. }
            | Error::Teardown { driver, .. }
            | Error::Lifecycle { driver, .. }
            | Error::Registration { driver, .. } => Some(driver),
            Error::ManifestRead { driver, .. }
            | Error::ManifestParse { driver, .. }
            | Error::NodeResolution { driver, .. } => driver.as_deref(),
            _ => None,
        }
    }

    /// Get the manifest path if this error concerns a manifest source
    pub fn manifest_path(&self) -> Option<&str> {
        match self {
            Error::ManifestRead { path, .. }
            | Error::ManifestParse { path, .. }
            | Error::ManifestShape { path, .. } => Some(path),
            _ => None,
        }
    }

    /// Check if this is a Kubernetes "not found" response
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube { source: kube::Error::Api(ae) } if ae.code == 404)
    }
}
