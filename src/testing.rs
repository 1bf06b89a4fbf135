//! Fixtures shared by unit tests

use crate::Error;

/// Build a Kubernetes API error with the given status code
pub(crate) fn api_error(code: u16) -> Error {
    Error::from(kube::Error::Api(kube::core::ErrorResponse {
        status: "Failure".to_string(),
        message: "injected".to_string(),
        reason: "Test".to_string(),
        code,
    }))
}

/// Stock hostpath driver manifests, as shipped before any renaming
pub(crate) mod hostpath {
    use std::path::Path;
    use std::sync::Arc;

    use crate::manifest::{parse_manifest, ManifestBundle};
    use crate::materialize::{Materializer, MemoryStore};

    pub(crate) const RBAC: &str = r#"
apiVersion: v1
kind: ServiceAccount
metadata:
  name: csi-provisioner
---
apiVersion: rbac.authorization.k8s.io/v1
kind: ClusterRole
metadata:
  name: external-provisioner-runner
rules:
  - apiGroups: [""]
    resources: ["persistentvolumes"]
    verbs: ["get", "list", "watch", "create", "delete"]
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

    pub(crate) const PROVISIONER: &str = r#"
kind: StatefulSet
apiVersion: apps/v1
metadata:
  name: csi-hostpath-provisioner
spec:
  serviceName: csi-hostpath-provisioner
  replicas: 1
  selector:
    matchLabels:
      app: csi-hostpath-provisioner
  template:
    metadata:
      labels:
        app: csi-hostpath-provisioner
    spec:
      serviceAccountName: csi-provisioner
      containers:
        - name: csi-provisioner
          image: quay.io/k8scsi/csi-provisioner:v0.4.1
          args:
            - "--provisioner=csi-hostpath"
            - "--csi-address=$(ADDRESS)"
            - "--connection-timeout=15s"
          volumeMounts:
            - mountPath: /csi
              name: socket-dir
      volumes:
        - hostPath:
            path: /var/lib/kubelet/plugins/csi-hostpath
            type: DirectoryOrCreate
          name: socket-dir
"#;

    pub(crate) const PLUGIN: &str = r#"
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
      hostNetwork: true
      containers:
        - name: driver-registrar
          image: quay.io/k8scsi/driver-registrar:v0.4.1
          args:
            - --v=5
            - --csi-address=/csi/csi.sock
            - --kubelet-registration-path=/var/lib/kubelet/plugins/csi-hostpath/csi.sock
        - name: hostpath
          image: quay.io/k8scsi/hostpathplugin:v0.4.1
          args:
            - "--v=5"
            - "--endpoint=$(CSI_ENDPOINT)"
            - "--nodeid=$(KUBE_NODE_NAME)"
      volumes:
        - hostPath:
            path: /var/lib/kubelet/plugins/csi-hostpath
            type: DirectoryOrCreate
          name: socket-dir
        - hostPath:
            path: /var/lib/kubelet/pods
            type: DirectoryOrCreate
          name: mountpoint-dir
"#;

    pub(crate) const STORAGE_CLASS: &str = r#"
apiVersion: storage.k8s.io/v1
kind: StorageClass
metadata:
  name: csi-hostpath-sc
provisioner: csi-hostpath
reclaimPolicy: Delete
volumeBindingMode: Immediate
"#;

    pub(crate) const DRIVER_MANIFEST: &str = r#"{
        "DriverInfo": {
            "Name": "csi-hostpath",
            "FeatureTag": "CSIHostPath",
            "MaxFileSize": 0,
            "IsPersistent": true,
            "IsFsGroupSupported": false,
            "IsBlockSupported": false
        },
        "PatchOptions": {
            "OldDriverName": "csi-hostpath",
            "NewDriverName": "csi-hostpath-",
            "DriverContainerName": "hostpath",
            "ProvisionerContainerName": "csi-provisioner"
        },
        "Manifests": ["rbac.yaml", "csi-hostpath-provisioner.yaml", "csi-hostpathplugin.yaml"],
        "ScManifest": "usage/csi-storageclass.yaml",
        "ClaimSize": "1Mi"
    }"#;

    /// Manifest tree on disk plus an in-memory cluster to deploy it into
    pub(crate) struct Fixture {
        pub(crate) dir: tempfile::TempDir,
        pub(crate) store: Arc<MemoryStore>,
        pub(crate) materializer: Arc<Materializer>,
        pub(crate) bundle: ManifestBundle,
    }

    pub(crate) fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "rbac.yaml", RBAC);
        write(dir.path(), "csi-hostpath-provisioner.yaml", PROVISIONER);
        write(dir.path(), "csi-hostpathplugin.yaml", PLUGIN);
        write(dir.path(), "usage/csi-storageclass.yaml", STORAGE_CLASS);
        write(dir.path(), "driver_manifest.json", DRIVER_MANIFEST);

        let store = Arc::new(MemoryStore::default());
        let materializer = Arc::new(Materializer::new(store.clone(), dir.path()));
        let bundle = parse_manifest(DRIVER_MANIFEST, "driver_manifest.json").unwrap();
        Fixture {
            dir,
            store,
            materializer,
            bundle,
        }
    }

    pub(crate) fn write(root: &Path, name: &str, content: &str) {
        let path = root.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }
}
