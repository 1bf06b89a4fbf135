//! Sweep command - remove what a crashed run left behind
//!
//! Usage: csi-e2e sweep --run-id csi-7f3a91c2

use clap::Args;
use tracing::warn;

use csi_e2e_common::kube_utils::{create_client, delete_namespace};

use super::GlobalArgs;
use crate::materialize::{sweep_run, KubeObjectStore, SweepReport};
use crate::{Error, Result};

/// Delete every object labelled with a run token, then its namespace
#[derive(Args, Debug)]
pub struct SweepArgs {
    /// Run token to sweep; also the run namespace name
    #[arg(long, env = "CSI_E2E_RUN_ID")]
    pub run_id: String,

    /// Leave the run namespace in place
    #[arg(long)]
    pub keep_namespace: bool,
}

/// Run the sweep command
pub async fn run(global: &GlobalArgs, args: SweepArgs) -> Result<()> {
    let client = create_client(global.kubeconfig.as_deref()).await?;
    let store = KubeObjectStore::new(client.clone());

    let mut report = sweep_run(&store, &args.run_id).await?;
    if !args.keep_namespace {
        if let Err(e) = delete_namespace(&client, &args.run_id).await {
            warn!(namespace = %args.run_id, error = %e, "failed to delete run namespace");
            report.errors.push(Error::teardown(
                &args.run_id,
                format!("Namespace/{}", args.run_id),
                e.to_string(),
            ));
        }
    }

    print!("{}", summary(&args.run_id, &report));
    if report.is_clean() {
        Ok(())
    } else {
        Err(Error::internal_with_context(
            "sweep",
            format!("{} objects could not be removed", report.errors.len()),
        ))
    }
}

/// Human-readable sweep report
pub fn summary(run_id: &str, report: &SweepReport) -> String {
    let mut out = format!(
        "run {}: deleted {} objects, {} errors\n",
        run_id,
        report.deleted.len(),
        report.errors.len()
    );
    for identity in &report.deleted {
        out.push_str(&format!("  deleted {}\n", identity));
    }
    for e in &report.errors {
        out.push_str(&format!("  error   {}\n", e));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::materialize::ObjectIdentity;
    use csi_e2e_common::kube_utils::build_api_resource;

    #[test]
    fn summary_lists_deletions_and_errors() {
        let report = SweepReport {
            deleted: vec![ObjectIdentity::cluster(
                build_api_resource("storage.k8s.io/v1", "StorageClass"),
                "csi-hostpath-sc-csi-1",
            )],
            errors: vec![Error::teardown("csi-1", "ClusterRole/x-csi-1", "forbidden")],
        };

        let out = summary("csi-1", &report);
        assert!(out.starts_with("run csi-1: deleted 1 objects, 1 errors"));
        assert!(out.contains("deleted StorageClass/csi-hostpath-sc-csi-1"));
        assert!(out.contains("ClusterRole/x-csi-1"));
    }
}
