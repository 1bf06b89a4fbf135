//! Cases command - print the driver × suite × pattern matrix
//!
//! Usage: csi-e2e cases --driver-manifest hostpath/driver_manifest.json --suite volumes

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;

use super::GlobalArgs;
use crate::materialize::MemoryStore;
use crate::node::{NodeResolver, StaticNodeInventory};
use crate::pattern::{csi_tune_patterns, TestPattern, TestSuite};
use crate::registry::{DriverRegistry, PatternTuner, TestCase};
use crate::{Error, Result};

/// List the test cases of the given drivers
#[derive(Args, Debug)]
pub struct CasesArgs {
    /// Driver manifests to register, relative to the manifest root
    #[arg(long = "driver-manifest", required = true)]
    pub driver_manifests: Vec<PathBuf>,

    /// Suites to expand; the CSI defaults when none are given
    #[arg(long = "suite")]
    pub suites: Vec<String>,

    /// Keep patterns CSI drivers are normally not run with
    #[arg(long)]
    pub all_patterns: bool,

    /// Only print cases that would run
    #[arg(long)]
    pub runnable_only: bool,
}

/// Run the cases command
pub fn run(global: &GlobalArgs, args: CasesArgs) -> Result<()> {
    let cases = list_cases(global, &args)?;
    let runnable = cases.iter().filter(|c| c.runs()).count();
    for case in cases.iter().filter(|c| c.runs() || !args.runnable_only) {
        println!("{}", case);
    }
    println!("{} cases, {} runnable", cases.len(), runnable);
    Ok(())
}

fn keep_all(patterns: Vec<TestPattern>) -> Vec<TestPattern> {
    patterns
}

/// Register every driver and expand the selected suites
///
/// Nothing is deployed, so no cluster is needed.
pub fn list_cases(global: &GlobalArgs, args: &CasesArgs) -> Result<Vec<TestCase>> {
    let suites = if args.suites.is_empty() {
        TestSuite::csi_defaults()
    } else {
        args.suites
            .iter()
            .map(|name| {
                TestSuite::by_name(name).ok_or_else(|| {
                    Error::internal_with_context("cases", format!("unknown suite {:?}", name))
                })
            })
            .collect::<Result<Vec<_>>>()?
    };

    let store = Arc::new(MemoryStore::new());
    let resolver = NodeResolver::random(Arc::new(StaticNodeInventory::default()));
    let mut registry = DriverRegistry::new();
    for manifest in &args.driver_manifests {
        registry.register(Box::new(global.factory(
            manifest,
            store.clone(),
            resolver.clone(),
        )?))?;
    }

    let tune: PatternTuner = if args.all_patterns {
        keep_all
    } else {
        csi_tune_patterns
    };
    Ok(registry.cases(&suites, tune))
}
