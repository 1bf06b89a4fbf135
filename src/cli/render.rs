//! Render command - print one run's objects without touching a cluster
//!
//! Usage: csi-e2e render --driver-manifest hostpath/driver_manifest.json --node kind-worker
//!
//! The driver is deployed into an in-memory store exactly as `deploy` would
//! deploy it, then every created object and the run's StorageClass are
//! printed as one multi-document YAML stream.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use kube::api::DynamicObject;
use serde::Serialize;
use tracing::info;

use super::GlobalArgs;
use crate::driver::DriverFactory;
use crate::materialize::MemoryStore;
use crate::node::{NodeResolver, StaticNodeInventory};
use crate::{Error, Result};

/// Render the objects of one driver deployment
#[derive(Args, Debug)]
pub struct RenderArgs {
    /// Driver manifest, relative to the manifest root
    #[arg(long, default_value = "driver_manifest.json")]
    pub driver_manifest: PathBuf,

    /// Node the driver instance is pinned to
    #[arg(long)]
    pub node: String,

    /// Run token; generated when unset
    #[arg(long, env = "CSI_E2E_RUN_ID")]
    pub run_id: Option<String>,

    /// Filesystem type requested from the StorageClass
    #[arg(long, default_value = "")]
    pub fs_type: String,
}

/// Run the render command
pub async fn run(global: &GlobalArgs, args: RenderArgs) -> Result<()> {
    let rendered = render(global, &args).await?;
    print!("{}", rendered);
    Ok(())
}

/// Deploy into memory and serialize the result
pub async fn render(global: &GlobalArgs, args: &RenderArgs) -> Result<String> {
    let store = Arc::new(MemoryStore::new());
    let resolver = NodeResolver::random(Arc::new(StaticNodeInventory::new([args.node.clone()])));
    let factory = global.factory(&args.driver_manifest, store.clone(), resolver)?;
    let ctx = global.run_context(args.run_id.as_deref());

    let mut driver = factory.instantiate();
    driver.create_driver(&ctx).await?;
    let storage_class = match driver.as_dynamic_pv() {
        Some(dpv) => Some(dpv.dynamic_provision_storage_class(&ctx, &args.fs_type)?),
        None => None,
    };

    let objects: Vec<DynamicObject> = store.objects().into_iter().map(|(_, o)| o).collect();
    info!(
        driver = %factory.name(),
        run = %ctx.unique_name(),
        objects = objects.len(),
        "rendered driver deployment"
    );

    let mut out = String::new();
    for object in &objects {
        push_document(&mut out, object)?;
    }
    if let Some(sc) = &storage_class {
        push_document(&mut out, sc)?;
    }
    Ok(out)
}

fn push_document<T: Serialize>(out: &mut String, value: &T) -> Result<()> {
    let yaml = serde_yaml::to_string(value)
        .map_err(|e| Error::internal_with_context("render", e.to_string()))?;
    out.push_str("---\n");
    out.push_str(&yaml);
    Ok(())
}
