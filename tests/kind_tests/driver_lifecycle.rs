//! Stories about deploying and removing a renamed driver instance

use std::time::Duration;

use futures::FutureExt;
use k8s_openapi::api::apps::v1::{DaemonSet, StatefulSet};
use k8s_openapi::api::rbac::v1::ClusterRole;
use kube::api::{Api, ListParams};
use kube::Client;

use csi_e2e::context::TestRunContext;
use csi_e2e::driver::{DriverFactory, LifecycleState, TestDriver};
use csi_e2e::scope::run_scoped;
use csi_e2e::Result;
use csi_e2e_common::kube_utils::delete_namespace;
use csi_e2e_common::run_label_selector;

use super::helpers::{hostpath_factory, run_context, test_client};

/// Story: a test run gets its own driver instance and leaves nothing behind
///
/// Expected behavior:
/// - The driver's workloads run in the run namespace, pinned to one node
/// - The StorageClass provisioner is the renamed driver
/// - After the scope ends no labelled cluster-scoped object remains
#[tokio::test]
#[ignore = "requires a cluster - run with: cargo test --test kind -- --ignored"]
async fn story_run_deploys_private_driver_and_removes_it() {
    let client = test_client().await;
    let ctx = run_context(&client).await;
    let factory = hostpath_factory(&client);
    let mut driver = factory.instantiate();

    let body_client = client.clone();
    let outcome = run_scoped(driver.as_mut(), &ctx, Duration::from_secs(120), move |d, ctx| {
        inspect_deployment(d, ctx, body_client).boxed()
    })
    .await;

    let _ = delete_namespace(&client, ctx.namespace()).await;

    assert!(outcome.teardown_errors.is_empty(), "{:?}", outcome.teardown_errors);
    let (provisioner, node) = outcome.result.expect("scoped run failed");
    assert_eq!(provisioner, format!("csi-hostpath-{}", ctx.unique_name()));
    assert!(node.is_some(), "plugin should be pinned to a node");
    assert_eq!(driver.state(), LifecycleState::TornDown);

    let roles: Api<ClusterRole> = Api::all(client);
    let leftover = roles
        .list(&ListParams::default().labels(&run_label_selector(ctx.unique_name())))
        .await
        .expect("failed to list cluster roles");
    assert!(leftover.items.is_empty());
}

/// Provisioner of the run's StorageClass and the node the plugin is pinned to
async fn inspect_deployment(
    driver: &dyn TestDriver,
    ctx: &TestRunContext,
    client: Client,
) -> Result<(String, Option<String>)> {
    let sc = driver
        .as_dynamic_pv()
        .expect("hostpath supports dynamic provisioning")
        .dynamic_provision_storage_class(ctx, "")?;

    let daemonsets: Api<DaemonSet> = Api::namespaced(client.clone(), ctx.namespace());
    let plugin = daemonsets.get("csi-hostpathplugin").await?;
    let node = plugin
        .spec
        .and_then(|s| s.template.spec)
        .and_then(|s| s.node_name);

    let statefulsets: Api<StatefulSet> = Api::namespaced(client, ctx.namespace());
    statefulsets.get("csi-hostpath-provisioner").await?;

    Ok((sc.provisioner, node))
}

/// Story: two concurrent runs of the same driver do not collide
#[tokio::test]
#[ignore = "requires a cluster - run with: cargo test --test kind -- --ignored"]
async fn story_concurrent_runs_of_one_driver_coexist() {
    let client = test_client().await;
    let factory = hostpath_factory(&client);
    let first_ctx = run_context(&client).await;
    let second_ctx = run_context(&client).await;

    let mut first = factory.instantiate();
    let mut second = factory.instantiate();
    first.create_driver(&first_ctx).await.expect("first deploy failed");
    let second_result = second.create_driver(&second_ctx).await;

    let first_errors = first.cleanup_driver().await;
    let second_errors = second.cleanup_driver().await;
    let _ = delete_namespace(&client, first_ctx.namespace()).await;
    let _ = delete_namespace(&client, second_ctx.namespace()).await;

    second_result.expect("second deploy collided with the first");
    assert!(first_errors.is_empty(), "{:?}", first_errors);
    assert!(second_errors.is_empty(), "{:?}", second_errors);
}
