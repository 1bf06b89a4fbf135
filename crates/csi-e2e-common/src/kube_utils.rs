//! Shared Kubernetes utilities using kube-rs
//!
//! Client construction, manifest-driven `ApiResource` building, node
//! schedulability checks and run-namespace management.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use k8s_openapi::api::core::v1::{Namespace, Node};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::ApiResource;
use kube::{Client, Config};
use tracing::{debug, info};

use crate::retry::{retry_with_backoff, retry_with_backoff_if, RetryConfig};
use crate::Error;

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// The "Ready" condition type for nodes
pub const CONDITION_READY: &str = "Ready";
/// The "NetworkUnavailable" condition type for nodes
pub const CONDITION_NETWORK_UNAVAILABLE: &str = "NetworkUnavailable";
/// The "True" status value for conditions
pub const STATUS_TRUE: &str = "True";

/// Create a kube client from an optional kubeconfig path with default timeouts
///
/// Client construction is retried a few times since a freshly started
/// cluster (kind, port-forward) may not accept connections yet.
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client, Error> {
    let path = kubeconfig.map(Path::to_path_buf);
    retry_with_backoff(&RetryConfig::default(), "create_client", || {
        let path = path.clone();
        async move {
            create_client_with_timeout(
                path.as_deref(),
                DEFAULT_CONNECT_TIMEOUT,
                DEFAULT_READ_TIMEOUT,
            )
            .await
        }
    })
    .await
}

/// Create a kube client from an optional kubeconfig path with custom timeouts
pub async fn create_client_with_timeout(
    kubeconfig: Option<&Path>,
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<Client, Error> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::internal_with_context(
                    "create_client",
                    format!("failed to read kubeconfig {}: {}", path.display(), e),
                )
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| {
                    Error::internal_with_context(
                        "create_client",
                        format!("failed to load kubeconfig: {}", e),
                    )
                })?
        }
        None => Config::infer().await.map_err(|e| {
            Error::internal_with_context("create_client", format!("failed to infer config: {}", e))
        })?,
    };
    config.connect_timeout = Some(connect_timeout);
    config.read_timeout = Some(read_timeout);
    Client::try_from(config).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to create client: {}", e))
    })
}

/// Parse apiVersion into (group, version)
///
/// # Examples
/// ```
/// use csi_e2e_common::kube_utils::parse_api_version;
///
/// let (group, version) = parse_api_version("storage.k8s.io/v1");
/// assert_eq!(group, "storage.k8s.io");
/// assert_eq!(version, "v1");
///
/// let (group, version) = parse_api_version("v1");
/// assert_eq!(group, "");
/// assert_eq!(version, "v1");
/// ```
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Build an ApiResource from a manifest's apiVersion and kind.
///
/// The version is used exactly as written in the manifest.
pub fn build_api_resource(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = parse_api_version(api_version);
    ApiResource {
        group,
        version,
        kind: kind.to_string(),
        api_version: api_version.to_string(),
        plural: pluralize_kind(kind),
    }
}

/// Known irregular plurals for kinds that show up in driver manifests
const KIND_PLURALS: &[(&str, &str)] = &[
    ("storageclass", "storageclasses"),
    ("csidriver", "csidrivers"),
    ("csinode", "csinodes"),
    ("podsecuritypolicy", "podsecuritypolicies"),
    ("networkpolicy", "networkpolicies"),
    ("priorityclass", "priorityclasses"),
    ("volumesnapshotclass", "volumesnapshotclasses"),
    ("endpoints", "endpoints"),
];

/// Pluralize a Kubernetes resource kind
///
/// Uses a lookup table for known kinds, falling back to simple English rules.
pub fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();

    if let Some((_, plural)) = KIND_PLURALS.iter().find(|(singular, _)| *singular == lower) {
        return (*plural).to_string();
    }

    if lower.ends_with('s') || lower.ends_with("ch") || lower.ends_with("sh") {
        format!("{}es", lower)
    } else if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey") {
        format!("{}ies", &lower[..lower.len() - 1])
    } else {
        format!("{}s", lower)
    }
}

/// Cluster-scoped kinds that may appear in driver manifests.
///
/// Anything not listed here is treated as namespaced.
const CLUSTER_SCOPED_KINDS: &[&str] = &[
    "ClusterRole",
    "ClusterRoleBinding",
    "CSIDriver",
    "CSINode",
    "CustomResourceDefinition",
    "Namespace",
    "Node",
    "PersistentVolume",
    "PodSecurityPolicy",
    "PriorityClass",
    "StorageClass",
    "VolumeSnapshotClass",
];

/// Check whether a kind is cluster-scoped
pub fn is_cluster_scoped_kind(kind: &str) -> bool {
    CLUSTER_SCOPED_KINDS.contains(&kind)
}

/// Check whether a node can receive a pinned driver instance
///
/// A node qualifies when it is not cordoned, reports `Ready=True`, has no
/// `NetworkUnavailable=True` condition and carries no `NoSchedule` or
/// `NoExecute` taints.
pub fn is_node_schedulable(node: &Node) -> bool {
    let spec = node.spec.as_ref();
    if spec.and_then(|s| s.unschedulable).unwrap_or(false) {
        return false;
    }

    let tainted = spec
        .and_then(|s| s.taints.as_ref())
        .map(|taints| {
            taints
                .iter()
                .any(|t| t.effect == "NoSchedule" || t.effect == "NoExecute")
        })
        .unwrap_or(false);
    if tainted {
        return false;
    }

    let conditions = node
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_deref())
        .unwrap_or_default();
    let condition_true = |ty: &str| {
        conditions
            .iter()
            .any(|c| c.type_ == ty && c.status == STATUS_TRUE)
    };

    condition_true(CONDITION_READY) && !condition_true(CONDITION_NETWORK_UNAVAILABLE)
}

/// Create a namespace for a test run, tolerating one that already exists
pub async fn ensure_namespace(
    client: &Client,
    name: &str,
    labels: BTreeMap<String, String>,
) -> Result<(), Error> {
    let api: Api<Namespace> = Api::all(client.clone());
    let ns = Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        ..Default::default()
    };

    retry_with_backoff_if(
        &RetryConfig::default(),
        "ensure_namespace",
        Error::is_retryable,
        || async {
            match api.create(&PostParams::default(), &ns).await {
                Ok(_) => {
                    info!(namespace = %name, "created run namespace");
                    Ok(())
                }
                Err(kube::Error::Api(ae)) if ae.code == 409 => {
                    debug!(namespace = %name, "run namespace already exists");
                    Ok(())
                }
                Err(e) => Err(Error::from(e)),
            }
        },
    )
    .await
}

/// Delete a run namespace, treating an already-deleted namespace as success
pub async fn delete_namespace(client: &Client, name: &str) -> Result<(), Error> {
    let api: Api<Namespace> = Api::all(client.clone());
    match api.delete(name, &DeleteParams::background()).await {
        Ok(_) => {
            info!(namespace = %name, "deleted run namespace");
            Ok(())
        }
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
        Err(e) => Err(Error::from(e)),
    }
}
