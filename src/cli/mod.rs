//! Command-line interface
//!
//! Every subcommand works on driver manifests below one manifest root.
//! `render` and `cases` never contact a cluster; `deploy` and `sweep` do.

pub mod cases;
pub mod deploy;
pub mod render;
pub mod sweep;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};

use csi_e2e_common::telemetry::LogFormat;

use crate::context::{TestRunContext, DEFAULT_PREFIX};
use crate::driver::ManifestDriverFactory;
use crate::materialize::{Materializer, ObjectStore};
use crate::node::NodeResolver;
use crate::Result;

/// csi-e2e - deploy renamed CSI driver instances for storage conformance runs
#[derive(Parser, Debug)]
#[command(name = "csi-e2e")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Options shared by every subcommand
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by every subcommand
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Path to kubeconfig; in-cluster or default config when unset
    #[arg(long, global = true, env = "CSI_E2E_KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Directory relative manifest references are resolved against
    #[arg(long, global = true, env = "CSI_E2E_MANIFEST_ROOT", default_value = ".")]
    pub manifest_root: PathBuf,

    /// Prefix of generated run tokens
    #[arg(long, global = true, env = "CSI_E2E_PREFIX", default_value = DEFAULT_PREFIX)]
    pub prefix: String,

    /// Log output format: text or json
    #[arg(long, global = true, env = "CSI_E2E_LOG_FORMAT", default_value = "text")]
    pub log_format: LogFormat,
}

/// Subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the objects one run would create, without a cluster
    Render(render::RenderArgs),
    /// Deploy a driver instance, exercise its storage class, tear it down
    Deploy(deploy::DeployArgs),
    /// Delete everything a crashed run left behind
    Sweep(sweep::SweepArgs),
    /// List the test matrix for one or more drivers
    Cases(cases::CasesArgs),
}

impl Cli {
    /// Run the selected subcommand
    pub async fn run(self) -> Result<()> {
        match self.command {
            Commands::Render(args) => render::run(&self.global, args).await,
            Commands::Deploy(args) => deploy::run(&self.global, args).await,
            Commands::Sweep(args) => sweep::run(&self.global, args).await,
            Commands::Cases(args) => cases::run(&self.global, args),
        }
    }
}

impl GlobalArgs {
    /// Resolve a path given on the command line against the manifest root
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.manifest_root.join(path)
        }
    }

    /// Run context from an explicit token, `CSI_E2E_RUN_ID`, or a fresh one
    pub fn run_context(&self, run_id: Option<&str>) -> TestRunContext {
        match run_id {
            Some(id) => TestRunContext::with_names(id, id),
            None => TestRunContext::from_env(&self.prefix),
        }
    }

    /// Driver factory for a driver manifest, creating objects in `store`
    pub fn factory(
        &self,
        driver_manifest: &Path,
        store: Arc<dyn ObjectStore>,
        resolver: NodeResolver,
    ) -> Result<ManifestDriverFactory> {
        let materializer = Arc::new(Materializer::new(store, self.manifest_root.clone()));
        let path = self.resolve(driver_manifest);
        let factory = ManifestDriverFactory::from_manifest(path, materializer, resolver)?;
        Ok(factory.with_prefix(self.prefix.clone()))
    }
}
