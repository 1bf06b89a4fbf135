//! Stories about recovering from runs that never cleaned up

use k8s_openapi::api::rbac::v1::ClusterRoleBinding;
use kube::api::{Api, ListParams};

use csi_e2e::driver::DriverFactory;
use csi_e2e::materialize::{sweep_run, KubeObjectStore};
use csi_e2e_common::kube_utils::delete_namespace;
use csi_e2e_common::run_label_selector;

use super::helpers::{hostpath_factory, run_context, test_client};

/// Story: a run killed after deployment is cleaned up by its token
///
/// The driver is deployed and then dropped without cleanup, as if the test
/// process had died. Sweeping the run token removes every labelled object.
#[tokio::test]
#[ignore = "requires a cluster - run with: cargo test --test kind -- --ignored"]
async fn story_sweep_removes_an_abandoned_deployment() {
    let client = test_client().await;
    let ctx = run_context(&client).await;
    let factory = hostpath_factory(&client);

    let mut driver = factory.instantiate();
    driver.create_driver(&ctx).await.expect("deploy failed");
    drop(driver);

    let store = KubeObjectStore::new(client.clone());
    let report = sweep_run(&store, ctx.unique_name())
        .await
        .expect("sweep failed");
    let _ = delete_namespace(&client, ctx.namespace()).await;

    assert!(report.is_clean(), "{:?}", report.errors);
    assert_eq!(report.deleted.len(), 5);

    let bindings: Api<ClusterRoleBinding> = Api::all(client);
    let leftover = bindings
        .list(&ListParams::default().labels(&run_label_selector(ctx.unique_name())))
        .await
        .expect("failed to list cluster role bindings");
    assert!(leftover.items.is_empty());
}
