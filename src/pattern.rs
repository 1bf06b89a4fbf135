//! Test patterns and the suites that generate them
//!
//! A pattern fixes how a volume is obtained (inline, pre-provisioned PV or
//! dynamically provisioned), which filesystem it carries and whether it is
//! mounted as a filesystem or handed over as a raw block device.

use std::fmt;

/// How a test volume is obtained
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VolumeType {
    /// Volume source embedded directly in the pod spec
    InlineVolume,
    /// PersistentVolume created by the test before the claim
    PreprovisionedPv,
    /// PersistentVolume provisioned through a StorageClass
    DynamicPv,
}

impl VolumeType {
    /// Human-readable label used in pattern names
    pub fn label(self) -> &'static str {
        match self {
            VolumeType::InlineVolume => "Inline-volume",
            VolumeType::PreprovisionedPv => "Pre-provisioned PV",
            VolumeType::DynamicPv => "Dynamic PV",
        }
    }
}

/// How the volume is presented to the pod
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum VolumeMode {
    /// Mounted filesystem
    #[default]
    Filesystem,
    /// Raw block device
    Block,
}

/// One way of exercising a driver
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TestPattern {
    /// Display name, e.g. "Dynamic PV (default fs)"
    pub name: String,
    /// Extra tag like "[Feature:BlockVolume]", empty when none
    pub feature_tag: String,
    /// How the volume is obtained
    pub vol_type: VolumeType,
    /// Filesystem type, empty for the driver default
    pub fs_type: String,
    /// How the volume is presented
    pub vol_mode: VolumeMode,
}

impl TestPattern {
    /// Default filesystem, mounted
    pub fn default_fs(vol_type: VolumeType) -> Self {
        Self {
            name: format!("{} (default fs)", vol_type.label()),
            feature_tag: String::new(),
            vol_type,
            fs_type: String::new(),
            vol_mode: VolumeMode::Filesystem,
        }
    }

    /// Explicit filesystem type, mounted
    pub fn with_fs(vol_type: VolumeType, fs_type: &str) -> Self {
        Self {
            name: format!("{} ({})", vol_type.label(), fs_type),
            fs_type: fs_type.to_string(),
            ..Self::default_fs(vol_type)
        }
    }

    /// Volume mode pattern for the volume-mode suite
    pub fn with_mode(vol_type: VolumeType, vol_mode: VolumeMode) -> Self {
        let (mode, feature_tag) = match vol_mode {
            VolumeMode::Filesystem => ("filesystem", ""),
            VolumeMode::Block => ("block", "[Feature:BlockVolume]"),
        };
        Self {
            name: format!("{} ({} volmode)", vol_type.label(), mode),
            feature_tag: feature_tag.to_string(),
            vol_mode,
            ..Self::default_fs(vol_type)
        }
    }
}

impl fmt::Display for TestPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[Testpattern: {}]{}", self.name, self.feature_tag)
    }
}

/// A named group of tests run once per pattern it generates
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TestSuite {
    /// Suite name, e.g. "volumeIO"
    pub name: String,
    /// Patterns the suite runs with
    pub patterns: Vec<TestPattern>,
}

impl TestSuite {
    fn new(name: &str, patterns: Vec<TestPattern>) -> Self {
        Self {
            name: name.to_string(),
            patterns,
        }
    }

    /// Read/write I/O against a mounted volume
    pub fn volume_io() -> Self {
        Self::new(
            "volumeIO",
            vec![
                TestPattern::default_fs(VolumeType::InlineVolume),
                TestPattern::default_fs(VolumeType::PreprovisionedPv),
                TestPattern::default_fs(VolumeType::DynamicPv),
            ],
        )
    }

    /// Data written by one pod is readable by the next
    pub fn volumes() -> Self {
        let mut patterns = Vec::new();
        for vol_type in [
            VolumeType::InlineVolume,
            VolumeType::PreprovisionedPv,
            VolumeType::DynamicPv,
        ] {
            patterns.push(TestPattern::default_fs(vol_type));
            for fs_type in ["ext3", "ext4", "xfs"] {
                patterns.push(TestPattern::with_fs(vol_type, fs_type));
            }
        }
        Self::new("volumes", patterns)
    }

    /// Filesystem and block volume modes
    pub fn volume_mode() -> Self {
        let mut patterns = Vec::new();
        for vol_mode in [VolumeMode::Filesystem, VolumeMode::Block] {
            for vol_type in [VolumeType::PreprovisionedPv, VolumeType::DynamicPv] {
                patterns.push(TestPattern::with_mode(vol_type, vol_mode));
            }
        }
        Self::new("volumeMode", patterns)
    }

    /// Subpath mounts into a volume
    pub fn subpath() -> Self {
        Self::new(
            "subPath",
            vec![
                TestPattern::default_fs(VolumeType::InlineVolume),
                TestPattern::default_fs(VolumeType::PreprovisionedPv),
                TestPattern::default_fs(VolumeType::DynamicPv),
            ],
        )
    }

    /// Dynamic provisioning through a StorageClass
    pub fn provisioning() -> Self {
        Self::new(
            "provisioning",
            vec![TestPattern::default_fs(VolumeType::DynamicPv)],
        )
    }

    /// Every built-in suite
    pub fn all() -> Vec<Self> {
        vec![
            Self::volumes(),
            Self::volume_io(),
            Self::volume_mode(),
            Self::subpath(),
            Self::provisioning(),
        ]
    }

    /// Suites run against CSI drivers unless asked otherwise
    pub fn csi_defaults() -> Vec<Self> {
        vec![Self::volume_io()]
    }

    /// Look up a built-in suite by name
    pub fn by_name(name: &str) -> Option<Self> {
        Self::all().into_iter().find(|s| s.name == name)
    }
}

/// Drop the patterns CSI drivers are not tested with
///
/// Inline volumes and pre-provisioned PVs need driver-specific volume
/// sources; a CSI driver is only exercised through dynamic provisioning.
pub fn csi_tune_patterns(patterns: Vec<TestPattern>) -> Vec<TestPattern> {
    patterns
        .into_iter()
        .filter(|p| {
            !matches!(
                p.vol_type,
                VolumeType::InlineVolume | VolumeType::PreprovisionedPv
            )
        })
        .collect()
}
