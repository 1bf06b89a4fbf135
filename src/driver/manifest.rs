//! Driver deployed from a list of manifest files
//!
//! With driver renaming every test run deploys and removes its own driver
//! instance, so tests against the same driver can run in parallel.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::storage::v1::StorageClass;
use tracing::{debug, info, warn};

use crate::context::{TestRunContext, DEFAULT_PREFIX};
use crate::manifest::{load_manifest, DriverInfo, ManifestBundle, ResolvedPatchSpec};
use crate::materialize::{ManifestMaterializer, TeardownHandle};
use crate::node::NodeResolver;
use crate::patch::{patch_csi_deployment, WorkloadObject};
use crate::pattern::{TestPattern, VolumeMode};
use crate::{Error, Result};

use super::{DriverFactory, DynamicPvTestDriver, LifecycleState, TestDriver};

/// StorageClass parameter selecting the filesystem of provisioned volumes
pub const FS_TYPE_PARAMETER: &str = "csi.storage.k8s.io/fstype";

enum DriverState {
    Configured,
    Deployed {
        patch: ResolvedPatchSpec,
        handle: TeardownHandle,
    },
    TornDown,
}

/// Driver lifecycle controller for one manifest-described driver
pub struct ManifestDriver {
    info: DriverInfo,
    bundle: ManifestBundle,
    materializer: Arc<dyn ManifestMaterializer>,
    resolver: NodeResolver,
    state: DriverState,
}

impl ManifestDriver {
    /// Configured driver for a loaded bundle
    pub fn new(
        bundle: ManifestBundle,
        materializer: Arc<dyn ManifestMaterializer>,
        resolver: NodeResolver,
    ) -> Self {
        let mut info = bundle.driver_info.clone();
        if info.config.prefix.is_empty() {
            info.config.prefix = DEFAULT_PREFIX.to_string();
        }
        Self {
            info,
            bundle,
            materializer,
            resolver,
            state: DriverState::Configured,
        }
    }

    /// Manifest bundle this driver deploys
    pub fn bundle(&self) -> &ManifestBundle {
        &self.bundle
    }

    /// Patch parameters in effect for this run
    ///
    /// Once deployed, the parameters the objects were created with, node
    /// included. Before that, the name is finalized for `ctx` but no node is
    /// pinned unless the manifest names one.
    pub fn resolved_patch(&self, ctx: &TestRunContext) -> ResolvedPatchSpec {
        match &self.state {
            DriverState::Deployed { patch, .. } => patch.clone(),
            _ => self.bundle.patch_spec.finalize(ctx.unique_name()),
        }
    }

    /// Objects created by the current deployment
    pub fn deployed_objects(&self) -> Vec<String> {
        match &self.state {
            DriverState::Deployed { handle, .. } => {
                handle.objects().iter().map(ToString::to_string).collect()
            }
            _ => Vec::new(),
        }
    }
}

#[async_trait]
impl TestDriver for ManifestDriver {
    fn driver_info(&self) -> &DriverInfo {
        &self.info
    }

    fn should_skip(&self, pattern: &TestPattern) -> Option<String> {
        if pattern.vol_mode == VolumeMode::Block && !self.info.is_block_supported {
            return Some(format!(
                "driver {} does not support block volumes",
                self.info.name
            ));
        }
        if !self.info.supports_fs_type(&pattern.fs_type) {
            return Some(format!(
                "driver {} does not support fs type {:?}",
                self.info.name, pattern.fs_type
            ));
        }
        None
    }

    fn as_dynamic_pv(&self) -> Option<&dyn DynamicPvTestDriver> {
        Some(self)
    }

    fn state(&self) -> LifecycleState {
        match self.state {
            DriverState::Configured => LifecycleState::Configured,
            DriverState::Deployed { .. } => LifecycleState::Deployed,
            DriverState::TornDown => LifecycleState::TornDown,
        }
    }

    async fn create_driver(&mut self, ctx: &TestRunContext) -> Result<()> {
        let name = self.info.name.clone();
        match self.state {
            DriverState::Configured => {}
            DriverState::Deployed { .. } => {
                return Err(Error::lifecycle(name, "driver is already deployed"))
            }
            DriverState::TornDown => {
                return Err(Error::lifecycle(
                    name,
                    "driver was torn down; instantiate a new one for the next run",
                ))
            }
        }

        info!(driver = %name, namespace = %ctx.namespace(), "deploying driver");

        let mut patch = self.bundle.patch_spec.finalize(ctx.unique_name());
        let node = match patch.node_name.clone() {
            Some(node) => node,
            None => self
                .resolver
                .resolve()
                .await
                .map_err(|e| e.for_driver(&name))?,
        };
        self.info.config.client_node_name = Some(node.clone());
        patch.node_name = Some(node);

        let apply = |object: &mut WorkloadObject| -> Result<()> {
            patch_csi_deployment(&patch, object);
            Ok(())
        };
        let handle = self
            .materializer
            .create_from_manifests(ctx, &name, &self.bundle.manifests, &apply)
            .await
            .map_err(|e| e.for_driver(&name))?;

        info!(
            driver = %name,
            instance = %patch.new_driver_name,
            node = ?patch.node_name,
            objects = handle.objects().len(),
            "driver deployed"
        );
        self.state = DriverState::Deployed { patch, handle };
        Ok(())
    }

    async fn cleanup_driver(&mut self) -> Vec<Error> {
        match std::mem::replace(&mut self.state, DriverState::TornDown) {
            DriverState::Deployed { handle, .. } => {
                info!(driver = %self.info.name, "uninstalling driver");
                let errors = handle.teardown().await;
                if !errors.is_empty() {
                    warn!(
                        driver = %self.info.name,
                        failed = errors.len(),
                        "driver cleanup left objects behind"
                    );
                }
                errors
            }
            DriverState::Configured => {
                debug!(driver = %self.info.name, "nothing deployed, cleanup is a no-op");
                Vec::new()
            }
            DriverState::TornDown => Vec::new(),
        }
    }
}

impl DynamicPvTestDriver for ManifestDriver {
    fn dynamic_provision_storage_class(
        &self,
        ctx: &TestRunContext,
        fs_type: &str,
    ) -> Result<StorageClass> {
        let path = &self.bundle.storage_class_manifest;
        let mut items = self
            .materializer
            .load_from_manifests(std::slice::from_ref(path))
            .map_err(|e| e.for_driver(&self.info.name))?;
        if items.len() != 1 {
            return Err(Error::manifest_shape(
                &self.info.name,
                path,
                format!("expected exactly one object, found {}", items.len()),
            ));
        }

        self.materializer.patch_items(ctx, &mut items);
        let mut item = items.remove(0);
        patch_csi_deployment(&self.resolved_patch(ctx), &mut item);

        let kind = item.kind().to_string();
        let WorkloadObject::StorageClass(sc) = item else {
            return Err(Error::manifest_shape(
                &self.info.name,
                path,
                format!("expected a StorageClass, found {}", kind),
            ));
        };
        let mut sc = *sc;
        if !fs_type.is_empty() {
            sc.parameters
                .get_or_insert_with(Default::default)
                .insert(FS_TYPE_PARAMETER.to_string(), fs_type.to_string());
        }
        Ok(sc)
    }

    fn claim_size(&self) -> &str {
        &self.bundle.claim_size
    }
}

/// Registers a manifest-described driver and instantiates it per test run
pub struct ManifestDriverFactory {
    bundle: ManifestBundle,
    materializer: Arc<dyn ManifestMaterializer>,
    resolver: NodeResolver,
}

impl ManifestDriverFactory {
    /// Factory for an already loaded bundle
    pub fn new(
        bundle: ManifestBundle,
        materializer: Arc<dyn ManifestMaterializer>,
        resolver: NodeResolver,
    ) -> Self {
        Self {
            bundle,
            materializer,
            resolver,
        }
    }

    /// Load a driver manifest and build a factory for it
    pub fn from_manifest(
        path: impl AsRef<Path>,
        materializer: Arc<dyn ManifestMaterializer>,
        resolver: NodeResolver,
    ) -> Result<Self> {
        Ok(Self::new(load_manifest(path)?, materializer, resolver))
    }

    /// Prefix recorded in the test configuration of every instance
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.bundle.driver_info.config.prefix = prefix.into();
        self
    }

    /// Loaded manifest bundle
    pub fn bundle(&self) -> &ManifestBundle {
        &self.bundle
    }
}

impl DriverFactory for ManifestDriverFactory {
    fn name(&self) -> &str {
        &self.bundle.driver_info.name
    }

    fn instantiate(&self) -> Box<dyn TestDriver> {
        Box::new(ManifestDriver::new(
            self.bundle.clone(),
            Arc::clone(&self.materializer),
            self.resolver.clone(),
        ))
    }
}
