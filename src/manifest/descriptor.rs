//! Identity and capability facts about a driver under test

use std::collections::BTreeSet;

use serde::{Deserialize, Deserializer, Serialize};

/// Identity and capabilities of a storage driver under test
///
/// Decoded from the `DriverInfo` section of a driver manifest. Immutable once
/// loaded, except for [`TestConfig`], which the lifecycle controller fills in
/// when it pins a driver instance to a node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DriverInfo {
    /// Name of the driver
    pub name: String,
    /// Feature tag appended to suite names (e.g. "CSIHostPath")
    #[serde(default, deserialize_with = "nullable")]
    pub feature_tag: String,
    /// Maximum file size the driver can store, in bytes
    #[serde(default, deserialize_with = "nullable")]
    pub max_file_size: i64,
    /// Supported filesystem types; the empty string is the default filesystem
    #[serde(default, deserialize_with = "nullable")]
    pub supported_fs_type: BTreeSet<String>,
    /// Mount options the driver supports
    #[serde(default, deserialize_with = "nullable")]
    pub supported_mount_option: BTreeSet<String>,
    /// Mount options the driver requires on every mount
    #[serde(default, deserialize_with = "nullable")]
    pub required_mount_option: BTreeSet<String>,
    /// Volumes outlive the pods that use them
    #[serde(default, deserialize_with = "nullable")]
    pub is_persistent: bool,
    /// Volume ownership follows the pod's fsGroup
    #[serde(default, deserialize_with = "nullable")]
    pub is_fs_group_supported: bool,
    /// Raw block volumes are supported
    #[serde(default, deserialize_with = "nullable")]
    pub is_block_supported: bool,
    /// Per-run test configuration, never read from the manifest
    #[serde(skip)]
    pub config: TestConfig,
}

impl DriverInfo {
    /// Default filesystem marker in `supported_fs_type`
    pub const DEFAULT_FS_TYPE: &'static str = "";

    /// Fill in defaults for fields a manifest may leave empty
    ///
    /// A driver that lists no filesystem types supports the default one.
    pub fn with_defaults(mut self) -> Self {
        if self.supported_fs_type.is_empty() {
            self.supported_fs_type
                .insert(Self::DEFAULT_FS_TYPE.to_string());
        }
        self
    }

    /// Check whether a filesystem type may be requested from this driver
    pub fn supports_fs_type(&self, fs_type: &str) -> bool {
        self.supported_fs_type.contains(fs_type)
    }

    /// Name used for the suite context, including the feature tag if any
    ///
    /// ```
    /// use csi_e2e::manifest::DriverInfo;
    ///
    /// let mut info = DriverInfo::named("csi-hostpath");
    /// assert_eq!(info.name_with_feature_tags(), "[Driver: csi-hostpath]");
    /// info.feature_tag = "CSIHostPath".to_string();
    /// assert_eq!(
    ///     info.name_with_feature_tags(),
    ///     "[Driver: csi-hostpath] [Feature:CSIHostPath]"
    /// );
    /// ```
    pub fn name_with_feature_tags(&self) -> String {
        if self.feature_tag.is_empty() {
            format!("[Driver: {}]", self.name)
        } else {
            format!("[Driver: {}] [Feature:{}]", self.name, self.feature_tag)
        }
    }

    /// A descriptor with only a name, every capability off
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            feature_tag: String::new(),
            max_file_size: 0,
            supported_fs_type: BTreeSet::new(),
            supported_mount_option: BTreeSet::new(),
            required_mount_option: BTreeSet::new(),
            is_persistent: false,
            is_fs_group_supported: false,
            is_block_supported: false,
            config: TestConfig::default(),
        }
    }
}

/// Test configuration attached to a driver for one test run
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TestConfig {
    /// Prefix for per-run names (namespace, suite labels)
    pub prefix: String,
    /// Node the driver instance and its client pods are pinned to
    pub client_node_name: Option<String>,
}

/// Treat an explicit JSON `null` like a missing field
fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_pascal_case_fields() {
        let info: DriverInfo = serde_json::from_str(
            r#"{
                "Name": "csi-hostpath",
                "MaxFileSize": 1048576,
                "SupportedFsType": ["", "ext4"],
                "IsPersistent": true,
                "IsFsGroupSupported": false,
                "IsBlockSupported": true
            }"#,
        )
        .unwrap();
        assert_eq!(info.name, "csi-hostpath");
        assert_eq!(info.max_file_size, 1048576);
        assert!(info.supports_fs_type("ext4"));
        assert!(info.is_persistent);
        assert!(info.is_block_supported);
        assert_eq!(info.config, TestConfig::default());
    }

    #[test]
    fn null_lists_decode_as_empty() {
        let info: DriverInfo = serde_json::from_str(
            r#"{"Name": "csi-hostpath", "SupportedMountOption": null, "RequiredMountOption": null}"#,
        )
        .unwrap();
        assert!(info.supported_mount_option.is_empty());
        assert!(info.required_mount_option.is_empty());
    }

    #[test]
    fn empty_fs_type_list_defaults_to_default_filesystem() {
        let info = DriverInfo::named("csi-hostpath").with_defaults();
        assert!(info.supports_fs_type(""));
        assert!(!info.supports_fs_type("xfs"));
    }

    #[test]
    fn explicit_fs_types_are_kept() {
        let mut info = DriverInfo::named("csi-hostpath");
        info.supported_fs_type.insert("ext4".to_string());
        let info = info.with_defaults();
        assert!(info.supports_fs_type("ext4"));
        assert!(!info.supports_fs_type(""));
    }

    #[test]
    fn missing_name_is_rejected() {
        let result: Result<DriverInfo, _> = serde_json::from_str(r#"{"MaxFileSize": 1}"#);
        assert!(result.is_err());
    }
}
