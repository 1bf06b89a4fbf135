//! csi-e2e - deploy renamed CSI driver instances for storage conformance runs

use clap::Parser;

use csi_e2e::cli::Cli;
use csi_e2e::{Error, Result};
use csi_e2e_common::telemetry::init_logging;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.global.log_format)
        .map_err(|e| Error::internal_with_context("telemetry", e.to_string()))?;

    cli.run().await
}
