//! Driver manifest loading
//!
//! A driver manifest is a small JSON (or YAML) document naming everything a
//! driver deployment needs:
//!
//! ```json
//! {
//!   "DriverInfo":   { "Name": "csi-hostpath", "IsPersistent": true, ... },
//!   "PatchOptions": { "OldDriverName": "csi-hostpath", "NewDriverName": "csi-hostpath-", ... },
//!   "Manifests":    ["manifests/hostpath/csi-hostpathplugin.yaml", ...],
//!   "ScManifest":   "manifests/hostpath/usage/csi-storageclass.yaml",
//!   "ClaimSize":    "1Mi"
//! }
//! ```
//!
//! Loading only decodes structure. Whether the referenced files exist, or
//! whether the storage class template really holds one object, is checked by
//! the consumer once it has a cluster to deploy into.

mod descriptor;
mod patch_spec;

pub use descriptor::{DriverInfo, TestConfig};
pub use patch_spec::{PatchSpec, ResolvedPatchSpec, UNIQUE_NAME_PLACEHOLDER};

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::{Error, Result};

/// Claim size used when a manifest does not set one
pub const DEFAULT_CLAIM_SIZE: &str = "1Mi";

/// Everything needed to deploy one driver, as loaded from its manifest
#[derive(Clone, Debug, PartialEq)]
pub struct ManifestBundle {
    /// Where this bundle was loaded from
    pub source: PathBuf,
    /// Driver identity and capabilities
    pub driver_info: DriverInfo,
    /// Rename/pin template
    pub patch_spec: PatchSpec,
    /// Workload manifests, deployed in this order
    pub manifests: Vec<String>,
    /// Storage class template
    pub storage_class_manifest: String,
    /// Size requested by dynamically provisioned claims
    pub claim_size: String,
}

/// On-disk shape of a driver manifest
#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ManifestDocument {
    driver_info: DriverInfo,
    #[serde(default)]
    patch_options: PatchSpec,
    #[serde(default)]
    manifests: Vec<String>,
    #[serde(default)]
    sc_manifest: String,
    #[serde(default = "default_claim_size")]
    claim_size: String,
}

fn default_claim_size() -> String {
    DEFAULT_CLAIM_SIZE.to_string()
}

/// Load a driver manifest from disk
///
/// Fails with [`Error::ManifestRead`] when the file cannot be read and with
/// [`Error::ManifestParse`] when its content does not decode into a driver
/// manifest. Neither is retried.
pub fn load_manifest(path: impl AsRef<Path>) -> Result<ManifestBundle> {
    let path = path.as_ref();
    let shown = path.display().to_string();

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::manifest_read(&shown, e.to_string()))?;

    let bundle = parse_manifest(&content, &shown)?;
    debug!(
        path = %shown,
        driver = %bundle.driver_info.name,
        manifests = bundle.manifests.len(),
        "loaded driver manifest"
    );

    Ok(ManifestBundle {
        source: path.to_path_buf(),
        ..bundle
    })
}

/// Decode driver manifest content; `origin` names the source in errors
///
/// JSON is tried when the content starts with `{`, YAML otherwise.
pub fn parse_manifest(content: &str, origin: &str) -> Result<ManifestBundle> {
    let document: ManifestDocument = if content.trim_start().starts_with('{') {
        serde_json::from_str(content).map_err(|e| Error::manifest_parse(origin, e.to_string()))?
    } else {
        let value = csi_e2e_common::yaml::parse_yaml(content)
            .map_err(|e| Error::manifest_parse(origin, e.to_string()))?;
        serde_json::from_value(value).map_err(|e| Error::manifest_parse(origin, e.to_string()))?
    };

    Ok(ManifestBundle {
        source: PathBuf::from(origin),
        driver_info: document.driver_info.with_defaults(),
        patch_spec: document.patch_options.normalized(),
        manifests: document.manifests,
        storage_class_manifest: document.sc_manifest,
        claim_size: document.claim_size,
    })
}
