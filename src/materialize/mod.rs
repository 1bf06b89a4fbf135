//! Cluster materialization of driver manifests
//!
//! Turns workload-spec files into live cluster objects: load, apply the
//! run-scoped substitutions, hand every object to the caller's patch
//! callback, label it with the run token, then create it. The result is a
//! [`TeardownHandle`] that deletes exactly what was created, newest first.

mod memory;
mod store;
mod substitute;
mod sweep;

pub use memory::MemoryStore;
pub use store::{KubeObjectStore, ObjectIdentity, ObjectStore};
pub use substitute::substitute;
pub use sweep::{sweep_run, SweepReport, SWEPT_KINDS};

#[cfg(test)]
pub use store::MockObjectStore;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use csi_e2e_common::{DRIVER_LABEL_KEY, RUN_LABEL_KEY};

use crate::context::TestRunContext;
use crate::patch::WorkloadObject;
use crate::{Error, Result};

/// Per-object callback applied after substitution and before creation
pub type PatchFn<'a> = dyn Fn(&mut WorkloadObject) -> Result<()> + Send + Sync + 'a;

/// Loads manifest files and creates their objects in the cluster
#[async_trait]
pub trait ManifestMaterializer: Send + Sync {
    /// Load every object from the given files, in file then document order
    fn load_from_manifests(&self, files: &[String]) -> Result<Vec<WorkloadObject>>;

    /// Apply the run-scoped substitutions to loaded objects
    fn patch_items(&self, ctx: &TestRunContext, objects: &mut [WorkloadObject]) {
        for object in objects {
            substitute(ctx, object);
        }
    }

    /// Load, substitute and patch without touching the cluster
    fn prepare(
        &self,
        ctx: &TestRunContext,
        driver: &str,
        files: &[String],
        patch: &PatchFn<'_>,
    ) -> Result<Vec<WorkloadObject>> {
        let mut objects = self.load_from_manifests(files)?;
        self.patch_items(ctx, &mut objects);
        for object in &mut objects {
            patch(object).map_err(|e| {
                Error::deployment(driver, format!("patching {}: {}", object.describe(), e))
            })?;
        }
        Ok(objects)
    }

    /// Create every object from the given files
    ///
    /// Nothing is created unless every file loads and every object patches.
    /// If a creation fails part way, the objects created so far are deleted
    /// again before the error is returned.
    async fn create_from_manifests(
        &self,
        ctx: &TestRunContext,
        driver: &str,
        files: &[String],
        patch: &PatchFn<'_>,
    ) -> Result<TeardownHandle>;
}

/// [`ManifestMaterializer`] reading files below a manifest root
pub struct Materializer {
    store: Arc<dyn ObjectStore>,
    root: PathBuf,
}

impl Materializer {
    /// Create a materializer resolving relative references against `root`
    pub fn new(store: Arc<dyn ObjectStore>, root: impl Into<PathBuf>) -> Self {
        Self {
            store,
            root: root.into(),
        }
    }

    /// Resolve a manifest reference; absolute references are used as-is
    pub fn resolve(&self, file: &str) -> PathBuf {
        let path = Path::new(file);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Object store this materializer creates objects in
    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    fn load_file(&self, file: &str) -> Result<Vec<WorkloadObject>> {
        let path = self.resolve(file);
        let shown = path.display().to_string();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| Error::manifest_read(&shown, e.to_string()))?;
        let documents = csi_e2e_common::yaml::parse_yaml_documents(&content)
            .map_err(|e| Error::manifest_parse(&shown, e.to_string()))?;

        documents
            .into_iter()
            .map(|doc| {
                WorkloadObject::from_value(doc)
                    .map_err(|e| Error::manifest_parse(&shown, e.to_string()))
            })
            .collect()
    }
}

#[async_trait]
impl ManifestMaterializer for Materializer {
    fn load_from_manifests(&self, files: &[String]) -> Result<Vec<WorkloadObject>> {
        let mut objects = Vec::new();
        for file in files {
            let loaded = self.load_file(file)?;
            debug!(file = %file, objects = loaded.len(), "loaded manifest file");
            objects.extend(loaded);
        }
        Ok(objects)
    }

    async fn create_from_manifests(
        &self,
        ctx: &TestRunContext,
        driver: &str,
        files: &[String],
        patch: &PatchFn<'_>,
    ) -> Result<TeardownHandle> {
        let objects = self.prepare(ctx, driver, files, patch)?;

        let mut handle = TeardownHandle::new(driver, Arc::clone(&self.store));
        for mut object in objects {
            label(&mut object, ctx, driver);
            let identity = identity_of(&object, ctx);

            let created = match object.to_dynamic() {
                Ok(dynamic) => self.store.create(&identity, &dynamic).await,
                Err(e) => Err(Error::internal_with_context("materialize", e.to_string())),
            };

            if let Err(e) = created {
                warn!(
                    driver = %driver,
                    object = %identity,
                    created = handle.objects().len(),
                    error = %e,
                    "object creation failed, rolling back"
                );
                let mut message = format!("creating {}: {}", identity, e);
                let leaked = handle.rollback().await;
                if !leaked.is_empty() {
                    message.push_str(&format!(
                        "; rollback left behind {} (sweep run {})",
                        leaked.join(", "),
                        ctx.unique_name()
                    ));
                }
                return Err(Error::deployment(driver, message));
            }
            handle.push(identity);
        }

        info!(driver = %driver, objects = handle.objects().len(), "created driver objects");
        Ok(handle)
    }
}

fn label(object: &mut WorkloadObject, ctx: &TestRunContext, driver: &str) {
    let labels = object
        .metadata_mut()
        .labels
        .get_or_insert_with(Default::default);
    labels.insert(RUN_LABEL_KEY.to_string(), ctx.unique_name().to_string());
    labels.insert(DRIVER_LABEL_KEY.to_string(), driver.to_string());
}

fn identity_of(object: &WorkloadObject, ctx: &TestRunContext) -> ObjectIdentity {
    let resource = object.api_resource();
    let name = object.name().to_string();
    if object.is_namespaced() {
        let namespace = object
            .metadata()
            .namespace
            .clone()
            .unwrap_or_else(|| ctx.namespace().to_string());
        ObjectIdentity::namespaced(resource, namespace, name)
    } else {
        ObjectIdentity::cluster(resource, name)
    }
}

/// Deletes the objects one deployment created
///
/// Consumed by [`TeardownHandle::teardown`], so it can run at most once.
pub struct TeardownHandle {
    driver: String,
    objects: Vec<ObjectIdentity>,
    store: Arc<dyn ObjectStore>,
}

impl TeardownHandle {
    /// Empty handle for a driver
    pub fn new(driver: impl Into<String>, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            driver: driver.into(),
            objects: Vec::new(),
            store,
        }
    }

    /// Driver the objects were created for
    pub fn driver(&self) -> &str {
        &self.driver
    }

    /// Created objects, in creation order
    pub fn objects(&self) -> &[ObjectIdentity] {
        &self.objects
    }

    /// Record an object the handle is responsible for
    pub fn push(&mut self, identity: ObjectIdentity) {
        self.objects.push(identity);
    }

    /// Delete every recorded object in reverse creation order
    ///
    /// Best effort: a failed delete is logged and collected, and the
    /// remaining objects are still deleted. Objects already gone count as
    /// deleted.
    pub async fn teardown(self) -> Vec<Error> {
        let mut errors = Vec::new();
        for identity in self.objects.iter().rev() {
            match self.store.delete(identity).await {
                Ok(true) => debug!(driver = %self.driver, object = %identity, "deleted"),
                Ok(false) => debug!(driver = %self.driver, object = %identity, "already gone"),
                Err(e) => {
                    warn!(driver = %self.driver, object = %identity, error = %e, "teardown failed");
                    errors.push(Error::teardown(&self.driver, identity.to_string(), e.to_string()));
                }
            }
        }
        errors
    }
}

impl TeardownHandle {
    /// Tear down after a failed deployment, returning the identities of
    /// objects that could not be deleted
    async fn rollback(self) -> Vec<String> {
        let driver = self.driver.clone();
        let mut leaked = Vec::new();
        for err in self.teardown().await {
            warn!(driver = %driver, error = %err, "rollback left an object behind");
            if let Error::Teardown { object, .. } = err {
                leaked.push(object);
            }
        }
        leaked
    }
}

impl fmt::Debug for TeardownHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TeardownHandle")
            .field("driver", &self.driver)
            .field("objects", &self.objects)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::api_error;
    use std::io::Write;

    const RBAC: &str = r#"
apiVersion: v1
kind: ServiceAccount
metadata:
  name: csi-provisioner
---
apiVersion: rbac.authorization.k8s.io/v1
kind: ClusterRole
metadata:
  name: external-provisioner-runner
rules: []
---
apiVersion: rbac.authorization.k8s.io/v1
kind: ClusterRoleBinding
metadata:
  name: csi-provisioner-role
subjects:
  - kind: ServiceAccount
    name: csi-provisioner
    namespace: default
roleRef:
  kind: ClusterRole
  name: external-provisioner-runner
  apiGroup: rbac.authorization.k8s.io
"#;

    const PLUGIN: &str = r#"
kind: DaemonSet
apiVersion: apps/v1
metadata:
  name: csi-hostpathplugin
spec:
  selector:
    matchLabels:
      app: csi-hostpathplugin
  template:
    metadata:
      labels:
        app: csi-hostpathplugin
    spec:
      serviceAccountName: csi-provisioner
      containers:
        - name: hostpath
          image: quay.io/k8scsi/hostpathplugin:v1.0.1
          args:
            - "--v=5"
            - "--endpoint=$(CSI_ENDPOINT)"
      volumes:
        - name: socket-dir
          hostPath:
            path: /var/lib/kubelet/plugins/csi-hostpath
            type: DirectoryOrCreate
"#;

    struct Fixture {
        dir: tempfile::TempDir,
        store: Arc<MemoryStore>,
        materializer: Materializer,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        for (name, content) in [("rbac.yaml", RBAC), ("plugin.yaml", PLUGIN)] {
            let mut file = std::fs::File::create(dir.path().join(name)).unwrap();
            file.write_all(content.as_bytes()).unwrap();
        }
        let store = Arc::new(MemoryStore::default());
        let materializer = Materializer::new(store.clone(), dir.path());
        Fixture {
            dir,
            store,
            materializer,
        }
    }

    fn files() -> Vec<String> {
        vec!["rbac.yaml".to_string(), "plugin.yaml".to_string()]
    }

    fn ctx() -> TestRunContext {
        TestRunContext::with_names("csi-1234", "csi-1234")
    }

    fn no_patch(_: &mut WorkloadObject) -> Result<()> {
        Ok(())
    }

    // ==========================================================================
    // Story: driver objects land in the cluster under the run's identity
    // ==========================================================================

    #[tokio::test]
    async fn story_objects_are_created_labelled_and_torn_down() {
        let f = fixture();
        let handle = f
            .materializer
            .create_from_manifests(&ctx(), "csi-hostpath", &files(), &no_patch)
            .await
            .unwrap();

        let created: Vec<String> = handle.objects().iter().map(ToString::to_string).collect();
        assert_eq!(
            created,
            vec![
                "ServiceAccount/csi-1234/csi-provisioner",
                "ClusterRole/external-provisioner-runner-csi-1234",
                "ClusterRoleBinding/csi-provisioner-role-csi-1234",
                "DaemonSet/csi-1234/csi-hostpathplugin",
            ]
        );
        assert_eq!(f.store.labelled("csi-1234"), 4);

        let plugin = f.store.get("DaemonSet/csi-1234/csi-hostpathplugin").unwrap();
        let labels = plugin.metadata.labels.unwrap();
        assert_eq!(labels[DRIVER_LABEL_KEY], "csi-hostpath");

        assert!(handle.teardown().await.is_empty());
        assert_eq!(f.store.len(), 0);
        assert_eq!(
            f.store.deletions(),
            vec![
                "DaemonSet/csi-1234/csi-hostpathplugin",
                "ClusterRoleBinding/csi-provisioner-role-csi-1234",
                "ClusterRole/external-provisioner-runner-csi-1234",
                "ServiceAccount/csi-1234/csi-provisioner",
            ]
        );
    }

    #[tokio::test]
    async fn story_patch_callback_sees_every_substituted_object() {
        let f = fixture();
        let seen = std::sync::Mutex::new(Vec::new());
        let record = |object: &mut WorkloadObject| -> Result<()> {
            seen.lock().unwrap().push(object.describe());
            if let Some(pod) = object.pod_spec_mut() {
                pod.node_name = Some("node-3".to_string());
            }
            Ok(())
        };

        f.materializer
            .create_from_manifests(&ctx(), "csi-hostpath", &files(), &record)
            .await
            .unwrap();

        assert_eq!(seen.lock().unwrap().len(), 4);
        let plugin = f.store.get("DaemonSet/csi-1234/csi-hostpathplugin").unwrap();
        assert_eq!(plugin.data["spec"]["template"]["spec"]["nodeName"], "node-3");
    }

    #[tokio::test]
    async fn story_failed_creation_rolls_back_what_was_created() {
        let f = fixture();
        f.store
            .fail_create("ClusterRoleBinding/csi-provisioner-role-csi-1234", api_error(403));

        let err = f
            .materializer
            .create_from_manifests(&ctx(), "csi-hostpath", &files(), &no_patch)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Deployment { .. }));
        assert_eq!(err.driver(), Some("csi-hostpath"));
        assert!(err.to_string().contains("ClusterRoleBinding"));
        assert_eq!(f.store.len(), 0);
    }

    #[tokio::test]
    async fn story_failed_rollback_names_the_leaked_objects() {
        let f = fixture();
        f.store
            .fail_create("DaemonSet/csi-1234/csi-hostpathplugin", api_error(422));
        f.store
            .fail_delete("ClusterRole/external-provisioner-runner-csi-1234", api_error(500));

        let err = f
            .materializer
            .create_from_manifests(&ctx(), "csi-hostpath", &files(), &no_patch)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Deployment { .. }));
        let message = err.to_string();
        assert!(message.contains("creating DaemonSet/csi-1234/csi-hostpathplugin"));
        assert!(message.contains("rollback left behind ClusterRole/external-provisioner-runner-csi-1234"));
        assert!(message.contains("sweep run csi-1234"));
        assert_eq!(
            f.store.identities(),
            vec!["ClusterRole/external-provisioner-runner-csi-1234".to_string()]
        );
    }

    #[tokio::test]
    async fn failing_patch_creates_nothing() {
        let f = fixture();
        let reject = |object: &mut WorkloadObject| -> Result<()> {
            if object.kind() == "DaemonSet" {
                return Err(Error::internal("no node"));
            }
            Ok(())
        };
        let err = f
            .materializer
            .create_from_manifests(&ctx(), "csi-hostpath", &files(), &reject)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Deployment { .. }));
        assert_eq!(f.store.len(), 0);
        assert!(f.store.deletions().is_empty());
    }

    #[tokio::test]
    async fn missing_file_is_a_read_error_and_creates_nothing() {
        let f = fixture();
        let files = vec!["rbac.yaml".to_string(), "missing.yaml".to_string()];
        let err = f
            .materializer
            .create_from_manifests(&ctx(), "csi-hostpath", &files, &no_patch)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ManifestRead { .. }));
        assert_eq!(f.store.len(), 0);
    }

    #[test]
    fn malformed_yaml_is_a_parse_error() {
        let f = fixture();
        std::fs::write(f.dir.path().join("bad.yaml"), "kind: [unclosed").unwrap();
        let err = f
            .materializer
            .load_from_manifests(&["bad.yaml".to_string()])
            .unwrap_err();
        assert!(matches!(err, Error::ManifestParse { .. }));
    }

    #[test]
    fn absolute_references_ignore_the_root() {
        let f = fixture();
        let absolute = f.dir.path().join("plugin.yaml");
        assert_eq!(f.materializer.resolve(absolute.to_str().unwrap()), absolute);
        assert_eq!(
            f.materializer.resolve("rbac.yaml"),
            f.dir.path().join("rbac.yaml")
        );
    }

    #[tokio::test]
    async fn teardown_collects_failures_and_keeps_going() {
        let mut store = MockObjectStore::new();
        store.expect_delete().times(2).returning(|identity| {
            if identity.name == "broken" {
                Err(api_error(500))
            } else {
                Ok(false)
            }
        });

        let resource = csi_e2e_common::kube_utils::build_api_resource("v1", "ConfigMap");
        let mut handle = TeardownHandle::new("csi-hostpath", Arc::new(store));
        handle.push(ObjectIdentity::namespaced(resource.clone(), "ns", "fine"));
        handle.push(ObjectIdentity::namespaced(resource, "ns", "broken"));

        let errors = handle.teardown().await;
        assert_eq!(errors.len(), 1);
        assert!(!errors[0].is_fatal());
        assert!(errors[0].to_string().contains("ConfigMap/ns/broken"));
    }
}
