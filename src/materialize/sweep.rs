//! Leak sweep for aborted runs
//!
//! A run killed before its cleanup leaves labelled objects behind. The sweep
//! finds them by run label and deletes them, dependents before the RBAC
//! objects they run as.

use kube::discovery::ApiResource;
use tracing::{info, warn};

use csi_e2e_common::kube_utils::build_api_resource;
use csi_e2e_common::run_label_selector;

use super::store::{ObjectIdentity, ObjectStore};
use crate::{Error, Result};

/// Kinds searched by the sweep, in deletion order
pub const SWEPT_KINDS: &[(&str, &str)] = &[
    ("storage.k8s.io/v1", "StorageClass"),
    ("apps/v1", "Deployment"),
    ("apps/v1", "StatefulSet"),
    ("apps/v1", "DaemonSet"),
    ("apps/v1", "ReplicaSet"),
    ("v1", "Service"),
    ("v1", "ConfigMap"),
    ("v1", "Secret"),
    ("storage.k8s.io/v1", "CSIDriver"),
    ("rbac.authorization.k8s.io/v1", "RoleBinding"),
    ("rbac.authorization.k8s.io/v1", "Role"),
    ("rbac.authorization.k8s.io/v1", "ClusterRoleBinding"),
    ("rbac.authorization.k8s.io/v1", "ClusterRole"),
    ("v1", "ServiceAccount"),
];

/// Outcome of a sweep
#[derive(Debug, Default)]
pub struct SweepReport {
    /// Objects that were deleted
    pub deleted: Vec<ObjectIdentity>,
    /// Failures, one per kind that could not be listed or object that could
    /// not be deleted
    pub errors: Vec<Error>,
}

impl SweepReport {
    /// True when nothing failed
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

fn swept_resources() -> impl Iterator<Item = ApiResource> {
    SWEPT_KINDS
        .iter()
        .map(|(api_version, kind)| build_api_resource(api_version, kind))
}

/// Delete every object labelled with a run token
///
/// Teardown errors in the report carry the run token where a driver name
/// would normally be, since leaked objects are found by run, not by driver.
pub async fn sweep_run(store: &dyn ObjectStore, token: &str) -> Result<SweepReport> {
    if token.is_empty() {
        return Err(Error::internal_with_context(
            "sweep",
            "refusing to sweep with an empty run token",
        ));
    }

    let selector = run_label_selector(token);
    let mut report = SweepReport::default();

    for resource in swept_resources() {
        let found = match store.list_labeled(&resource, &selector).await {
            Ok(found) => found,
            Err(e) => {
                warn!(run = %token, kind = %resource.kind, error = %e, "cannot list for sweep");
                report
                    .errors
                    .push(Error::teardown(token, resource.kind.clone(), e.to_string()));
                continue;
            }
        };

        for identity in found {
            match store.delete(&identity).await {
                Ok(_) => report.deleted.push(identity),
                Err(e) => {
                    warn!(run = %token, object = %identity, error = %e, "sweep delete failed");
                    report
                        .errors
                        .push(Error::teardown(token, identity.to_string(), e.to_string()));
                }
            }
        }
    }

    info!(
        run = %token,
        deleted = report.deleted.len(),
        failed = report.errors.len(),
        "sweep finished"
    );
    Ok(report)
}
