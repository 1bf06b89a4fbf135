//! Rename and pinning parameters for a driver deployment

use serde::{Deserialize, Serialize};

/// Trailing character of a new driver name that asks for the run's unique name
///
/// `csi-hostpath-` becomes `csi-hostpath-<unique name>` once a test run exists.
pub const UNIQUE_NAME_PLACEHOLDER: char = '-';

/// Rename/pin parameters as written in a driver manifest
///
/// The new driver name may still be a template waiting for the run's unique
/// name; see [`PatchSpec::finalize`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct PatchSpec {
    /// Driver name used throughout the stock manifests
    pub old_driver_name: String,
    /// Driver name for this deployment, possibly ending in the placeholder
    pub new_driver_name: String,
    /// Container running the driver itself (the one owning the socket path)
    pub driver_container_name: String,
    /// Container that receives the `--provisioner` override
    pub provisioner_container_name: String,
    /// Node to pin pods to; resolved at deploy time when unset
    pub node_name: Option<String>,
}

impl PatchSpec {
    /// Drop an empty node name so "unset" has a single representation
    pub(crate) fn normalized(mut self) -> Self {
        if self.node_name.as_deref().is_some_and(str::is_empty) {
            self.node_name = None;
        }
        self
    }

    /// Check whether the new driver name still awaits the unique name suffix
    pub fn needs_unique_suffix(&self) -> bool {
        self.new_driver_name.ends_with(UNIQUE_NAME_PLACEHOLDER)
    }

    /// Complete the new driver name with the run's unique name
    ///
    /// Called once per test run. The result is the only form the isolation
    /// patcher accepts.
    ///
    /// ```
    /// use csi_e2e::manifest::PatchSpec;
    ///
    /// let spec = PatchSpec {
    ///     old_driver_name: "csi-hostpath".to_string(),
    ///     new_driver_name: "csi-hostpath-".to_string(),
    ///     ..Default::default()
    /// };
    /// assert_eq!(spec.finalize("csi-42").new_driver_name, "csi-hostpath-csi-42");
    /// ```
    pub fn finalize(&self, unique_name: &str) -> ResolvedPatchSpec {
        let new_driver_name = if self.needs_unique_suffix() {
            format!("{}{}", self.new_driver_name, unique_name)
        } else {
            self.new_driver_name.clone()
        };
        ResolvedPatchSpec {
            old_driver_name: self.old_driver_name.clone(),
            new_driver_name,
            driver_container_name: self.driver_container_name.clone(),
            provisioner_container_name: self.provisioner_container_name.clone(),
            node_name: self.node_name.clone(),
        }
    }
}

/// Patch parameters with the driver name finalized for one test run
///
/// Immutable once built except for the node name, which the lifecycle
/// controller sets exactly once when it resolves a target node.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResolvedPatchSpec {
    /// Driver name used throughout the stock manifests
    pub old_driver_name: String,
    /// Final, run-unique driver name
    pub new_driver_name: String,
    /// Container running the driver itself
    pub driver_container_name: String,
    /// Container that receives the `--provisioner` override
    pub provisioner_container_name: String,
    /// Node to pin pods to
    pub node_name: Option<String>,
}

impl ResolvedPatchSpec {
    /// Renaming is active iff both names are set and differ
    pub fn renames(&self) -> bool {
        !self.old_driver_name.is_empty()
            && !self.new_driver_name.is_empty()
            && self.old_driver_name != self.new_driver_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hostpath(new: &str) -> PatchSpec {
        PatchSpec {
            old_driver_name: "csi-hostpath".to_string(),
            new_driver_name: new.to_string(),
            driver_container_name: "hostpath".to_string(),
            provisioner_container_name: "csi-provisioner".to_string(),
            node_name: None,
        }
    }

    #[test]
    fn placeholder_suffix_receives_unique_name() {
        let resolved = hostpath("csi-hostpath-").finalize("csi-8812");
        assert_eq!(resolved.new_driver_name, "csi-hostpath-csi-8812");
        assert!(resolved.renames());
    }

    #[test]
    fn fixed_new_name_is_left_alone() {
        let resolved = hostpath("csi-hostpath-ci").finalize("csi-8812");
        assert_eq!(resolved.new_driver_name, "csi-hostpath-ci");
    }

    #[test]
    fn renaming_requires_two_different_names() {
        assert!(!hostpath("csi-hostpath").finalize("x").renames());
        assert!(!hostpath("").finalize("x").renames());

        let mut spec = hostpath("csi-hostpath-");
        spec.old_driver_name.clear();
        assert!(!spec.finalize("x").renames());
    }

    #[test]
    fn finalize_carries_node_and_containers() {
        let mut spec = hostpath("csi-hostpath-");
        spec.node_name = Some("node-3".to_string());
        let resolved = spec.finalize("t");
        assert_eq!(resolved.node_name.as_deref(), Some("node-3"));
        assert_eq!(resolved.provisioner_container_name, "csi-provisioner");
        assert_eq!(resolved.driver_container_name, "hostpath");
    }

    #[test]
    fn empty_node_name_normalizes_to_unset() {
        let mut spec = hostpath("csi-hostpath-");
        spec.node_name = Some(String::new());
        assert_eq!(spec.normalized().node_name, None);
    }

    #[test]
    fn decodes_original_field_names() {
        let spec: PatchSpec = serde_json::from_str(
            r#"{
                "OldDriverName": "csi-hostpath",
                "NewDriverName": "csi-hostpath-",
                "DriverContainerName": "hostpath",
                "ProvisionerContainerName": "csi-provisioner"
            }"#,
        )
        .unwrap();
        assert_eq!(spec, hostpath("csi-hostpath-"));
    }
}
