//! Deploy command - one full driver lifecycle against a live cluster
//!
//! Usage: csi-e2e deploy --driver-manifest hostpath/driver_manifest.json
//!
//! Creates the run namespace, deploys a renamed driver instance pinned to a
//! random schedulable node, creates the run's StorageClass, optionally holds
//! for manual inspection, then removes everything again.

use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use futures::FutureExt;
use k8s_openapi::api::storage::v1::StorageClass;
use kube::api::{Api, DeleteParams, PostParams};
use kube::Client;
use tracing::{info, warn};

use csi_e2e_common::kube_utils::{create_client, delete_namespace, ensure_namespace};
use csi_e2e_common::{FIELD_MANAGER, RUN_LABEL_KEY};

use super::GlobalArgs;
use crate::context::TestRunContext;
use crate::driver::{DriverFactory, TestDriver};
use crate::materialize::KubeObjectStore;
use crate::node::{KubeNodeInventory, NodeResolver};
use crate::scope::{run_scoped, ScopeOutcome};
use crate::{Error, Result};

/// Deploy a driver instance and exercise its StorageClass
#[derive(Args, Debug)]
pub struct DeployArgs {
    /// Driver manifest, relative to the manifest root
    #[arg(long, default_value = "driver_manifest.json")]
    pub driver_manifest: PathBuf,

    /// Filesystem type requested from the StorageClass
    #[arg(long, default_value = "")]
    pub fs_type: String,

    /// Seconds to keep the deployment up before tearing it down
    #[arg(long, default_value_t = 0)]
    pub hold_secs: u64,

    /// Upper bound in seconds for the work done while deployed
    #[arg(long, default_value_t = 300)]
    pub timeout_secs: u64,

    /// Leave the run namespace in place after teardown
    #[arg(long)]
    pub keep_namespace: bool,
}

/// Run the deploy command
pub async fn run(global: &GlobalArgs, args: DeployArgs) -> Result<()> {
    let client = create_client(global.kubeconfig.as_deref()).await?;
    let ctx = global.run_context(None);

    let store = Arc::new(KubeObjectStore::new(client.clone()));
    let resolver = NodeResolver::random(Arc::new(KubeNodeInventory::new(client.clone())));
    let factory = global.factory(&args.driver_manifest, store, resolver)?;

    info!(driver = %factory.name(), run = %ctx.unique_name(), "starting run");
    ensure_namespace(&client, ctx.namespace(), ctx.namespace_labels()).await?;

    let mut driver = factory.instantiate();
    let sc_name = storage_class_name(driver.as_ref(), &ctx, &args.fs_type)?;
    let body_client = client.clone();
    let fs_type = args.fs_type.clone();
    let hold = Duration::from_secs(args.hold_secs);
    let scoped = AssertUnwindSafe(run_scoped(
        driver.as_mut(),
        &ctx,
        Duration::from_secs(args.timeout_secs),
        move |driver, ctx| exercise_storage_class(driver, ctx, body_client, fs_type, hold).boxed(),
    ))
    .catch_unwind()
    .await;

    // The body may have been cut off by the timeout or a panic after the
    // StorageClass was created, so it is removed here on every path.
    let sc_removed = match remove_storage_class(&client, &sc_name).await {
        Ok(()) => true,
        Err(e) => {
            warn!(storage_class = %sc_name, error = %e, "failed to delete storage class");
            false
        }
    };

    if args.keep_namespace {
        info!(namespace = %ctx.namespace(), "keeping run namespace");
    } else if let Err(e) = delete_namespace(&client, ctx.namespace()).await {
        warn!(namespace = %ctx.namespace(), error = %e, "failed to delete run namespace");
    }

    let outcome = match scoped {
        Ok(outcome) => outcome,
        Err(payload) => {
            println!(
                "run panicked; run `csi-e2e sweep --run-id {}` to remove leftovers",
                ctx.unique_name()
            );
            std::panic::resume_unwind(payload)
        }
    };

    for e in &outcome.teardown_errors {
        println!("teardown error: {}", e);
    }
    let hint = sweep_hint(&ctx, &outcome, sc_removed);
    if let Some(hint) = &hint {
        println!("leftovers may remain; run `{}`", hint);
    }
    let provisioner = outcome.result?;
    println!(
        "run {} deployed and removed driver {} ({:.1}s)",
        ctx.unique_name(),
        provisioner,
        outcome.duration.as_secs_f64()
    );
    match hint {
        Some(hint) => Err(Error::internal_with_context(
            "deploy",
            format!("cleanup left objects behind; run `{}`", hint),
        )),
        None => Ok(()),
    }
}

/// Finalized name of the StorageClass this run creates
fn storage_class_name(
    driver: &dyn TestDriver,
    ctx: &TestRunContext,
    fs_type: &str,
) -> Result<String> {
    let name = &driver.driver_info().name;
    let dynamic = driver.as_dynamic_pv().ok_or_else(|| {
        Error::internal_with_context(
            "deploy",
            format!("driver {} does not support dynamic provisioning", name),
        )
    })?;
    let storage_class = dynamic.dynamic_provision_storage_class(ctx, fs_type)?;
    storage_class.metadata.name.ok_or_else(|| {
        Error::internal_with_context(
            "deploy",
            format!("storage class template of driver {} has no name", name),
        )
    })
}

async fn remove_storage_class(client: &Client, name: &str) -> Result<()> {
    let api: Api<StorageClass> = Api::all(client.clone());
    match api.delete(name, &DeleteParams::background()).await {
        Ok(_) => {
            info!(storage_class = %name, "deleted storage class");
            Ok(())
        }
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
        Err(e) => Err(Error::from(e)),
    }
}

/// Sweep command to suggest when a run may have left objects behind
fn sweep_hint<T>(
    ctx: &TestRunContext,
    outcome: &ScopeOutcome<T>,
    storage_class_removed: bool,
) -> Option<String> {
    if outcome.is_clean() && storage_class_removed {
        return None;
    }
    Some(format!("csi-e2e sweep --run-id {}", ctx.unique_name()))
}

async fn exercise_storage_class(
    driver: &dyn TestDriver,
    ctx: &TestRunContext,
    client: Client,
    fs_type: String,
    hold: Duration,
) -> Result<String> {
    let name = &driver.driver_info().name;
    let dynamic = driver.as_dynamic_pv().ok_or_else(|| {
        Error::internal_with_context(
            "deploy",
            format!("driver {} does not support dynamic provisioning", name),
        )
    })?;

    let mut storage_class = dynamic.dynamic_provision_storage_class(ctx, &fs_type)?;
    storage_class
        .metadata
        .labels
        .get_or_insert_with(Default::default)
        .insert(RUN_LABEL_KEY.to_string(), ctx.unique_name().to_string());

    let api: Api<StorageClass> = Api::all(client);
    let params = PostParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..Default::default()
    };
    let created = api.create(&params, &storage_class).await?;
    let sc_name = created.metadata.name.unwrap_or_default();
    info!(
        storage_class = %sc_name,
        provisioner = %created.provisioner,
        claim_size = %dynamic.claim_size(),
        "created storage class"
    );

    if !hold.is_zero() {
        info!(seconds = hold.as_secs(), "holding deployment");
        tokio::time::sleep(hold).await;
    }
    Ok(created.provisioner)
}
