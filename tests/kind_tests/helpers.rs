//! Shared setup for cluster-backed tests

use std::path::PathBuf;
use std::sync::Arc;

use kube::Client;

use csi_e2e::context::TestRunContext;
use csi_e2e::driver::ManifestDriverFactory;
use csi_e2e::materialize::{KubeObjectStore, Materializer};
use csi_e2e::node::{KubeNodeInventory, NodeResolver};
use csi_e2e_common::kube_utils::{create_client, ensure_namespace};
use csi_e2e_common::telemetry::init_test_logging;

/// Manifest root: `CSI_E2E_MANIFEST_ROOT` or the bundled manifests
pub fn manifest_root() -> PathBuf {
    std::env::var_os("CSI_E2E_MANIFEST_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/manifests")))
}

/// Client for the test cluster, with logging set up
pub async fn test_client() -> Client {
    init_test_logging();
    let kubeconfig = std::env::var_os("CSI_E2E_KUBECONFIG").map(PathBuf::from);
    create_client(kubeconfig.as_deref())
        .await
        .expect("failed to create kube client")
}

/// Fresh run context with its namespace created
pub async fn run_context(client: &Client) -> TestRunContext {
    let ctx = TestRunContext::new("csi-it");
    ensure_namespace(client, ctx.namespace(), ctx.namespace_labels())
        .await
        .expect("failed to create run namespace");
    ctx
}

/// Factory for the bundled hostpath driver against the live cluster
pub fn hostpath_factory(client: &Client) -> ManifestDriverFactory {
    let root = manifest_root();
    let store = Arc::new(KubeObjectStore::new(client.clone()));
    let materializer = Arc::new(Materializer::new(store, root.clone()));
    let resolver = NodeResolver::random(Arc::new(KubeNodeInventory::new(client.clone())));
    ManifestDriverFactory::from_manifest(
        root.join("csi-hostpath/driver_manifest.json"),
        materializer,
        resolver,
    )
    .expect("failed to load hostpath driver manifest")
}
