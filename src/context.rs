//! Identity of one test invocation

use std::collections::BTreeMap;

use csi_e2e_common::RUN_LABEL_KEY;

/// Environment variable pinning the uniqueness token, for reproducing a CI run
pub const RUN_ID_ENV: &str = "CSI_E2E_RUN_ID";

/// Namespace prefix used when none is configured
pub const DEFAULT_PREFIX: &str = "csi";

/// Ambient identity of one test run
///
/// The uniqueness token doubles as the run namespace name, so every
/// cluster-scoped name derived from it is traceable back to the namespace
/// that owns the run. Borrowed by drivers, never owned by them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TestRunContext {
    unique_name: String,
    namespace: String,
}

impl TestRunContext {
    /// Fresh context with a random token: `<prefix>-<8 hex chars>`
    pub fn new(prefix: &str) -> Self {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let name = format!("{}-{}", prefix, &id[..8]);
        Self::with_names(name.clone(), name)
    }

    /// Context from `CSI_E2E_RUN_ID` when set, otherwise a fresh one
    pub fn from_env(prefix: &str) -> Self {
        match std::env::var(RUN_ID_ENV) {
            Ok(id) if !id.trim().is_empty() => {
                let id = id.trim().to_string();
                Self::with_names(id.clone(), id)
            }
            _ => Self::new(prefix),
        }
    }

    /// Context with explicit token and namespace
    pub fn with_names(unique_name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            unique_name: unique_name.into(),
            namespace: namespace.into(),
        }
    }

    /// Uniqueness token of this run
    pub fn unique_name(&self) -> &str {
        &self.unique_name
    }

    /// Namespace namespaced driver objects are created in
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Labels stamped on the run namespace
    pub fn namespace_labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([(RUN_LABEL_KEY.to_string(), self.unique_name.clone())])
    }
}
