//! Workload objects decoded from driver manifests

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::core::v1::PodSpec;
use k8s_openapi::api::storage::v1::{CSIDriver, StorageClass};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::Resource;
use kube::api::DynamicObject;
use kube::discovery::ApiResource;
use serde_json::Value;

use csi_e2e_common::kube_utils::{build_api_resource, is_cluster_scoped_kind};

/// One object from a driver manifest
///
/// The kinds the isolation patcher rewrites are decoded into their typed
/// form; everything else (RBAC, services, CRDs) is kept
/// as a [`DynamicObject`] and passes through the patcher untouched.
#[derive(Clone, Debug)]
pub enum WorkloadObject {
    /// apps/v1 ReplicaSet
    ReplicaSet(Box<ReplicaSet>),
    /// apps/v1 DaemonSet
    DaemonSet(Box<DaemonSet>),
    /// apps/v1 StatefulSet
    StatefulSet(Box<StatefulSet>),
    /// apps/v1 Deployment
    Deployment(Box<Deployment>),
    /// storage.k8s.io/v1 StorageClass
    StorageClass(Box<StorageClass>),
    /// storage.k8s.io/v1 CSIDriver
    CsiDriver(Box<CSIDriver>),
    /// Any other kind
    Other(Box<DynamicObject>),
}

impl WorkloadObject {
    /// Decode a manifest document into the matching variant
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        let api_version = value
            .get("apiVersion")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let kind = value
            .get("kind")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let (api_version, kind) = (api_version.as_str(), kind.as_str());

        let object = if is_kind::<ReplicaSet>(api_version, kind) {
            Self::ReplicaSet(Box::new(serde_json::from_value(value)?))
        } else if is_kind::<DaemonSet>(api_version, kind) {
            Self::DaemonSet(Box::new(serde_json::from_value(value)?))
        } else if is_kind::<StatefulSet>(api_version, kind) {
            Self::StatefulSet(Box::new(serde_json::from_value(value)?))
        } else if is_kind::<Deployment>(api_version, kind) {
            Self::Deployment(Box::new(serde_json::from_value(value)?))
        } else if is_kind::<StorageClass>(api_version, kind) {
            Self::StorageClass(Box::new(serde_json::from_value(value)?))
        } else if is_kind::<CSIDriver>(api_version, kind) {
            Self::CsiDriver(Box::new(serde_json::from_value(value)?))
        } else {
            Self::Other(Box::new(serde_json::from_value(value)?))
        };
        Ok(object)
    }

    /// Encode back into a manifest document
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        match self {
            Self::ReplicaSet(o) => serde_json::to_value(o),
            Self::DaemonSet(o) => serde_json::to_value(o),
            Self::StatefulSet(o) => serde_json::to_value(o),
            Self::Deployment(o) => serde_json::to_value(o),
            Self::StorageClass(o) => serde_json::to_value(o),
            Self::CsiDriver(o) => serde_json::to_value(o),
            Self::Other(o) => serde_json::to_value(o),
        }
    }

    /// Convert into an untyped object for the dynamic API
    pub fn to_dynamic(&self) -> Result<DynamicObject, serde_json::Error> {
        match self {
            Self::Other(o) => Ok((**o).clone()),
            _ => serde_json::from_value(self.to_value()?),
        }
    }

    /// Object kind as written in the manifest
    pub fn kind(&self) -> &str {
        match self {
            Self::ReplicaSet(_) => ReplicaSet::KIND,
            Self::DaemonSet(_) => DaemonSet::KIND,
            Self::StatefulSet(_) => StatefulSet::KIND,
            Self::Deployment(_) => Deployment::KIND,
            Self::StorageClass(_) => StorageClass::KIND,
            Self::CsiDriver(_) => CSIDriver::KIND,
            Self::Other(o) => o.types.as_ref().map(|t| t.kind.as_str()).unwrap_or_default(),
        }
    }

    /// API resource used to address this object
    pub fn api_resource(&self) -> ApiResource {
        match self {
            Self::ReplicaSet(_) => ApiResource::erase::<ReplicaSet>(&()),
            Self::DaemonSet(_) => ApiResource::erase::<DaemonSet>(&()),
            Self::StatefulSet(_) => ApiResource::erase::<StatefulSet>(&()),
            Self::Deployment(_) => ApiResource::erase::<Deployment>(&()),
            Self::StorageClass(_) => ApiResource::erase::<StorageClass>(&()),
            Self::CsiDriver(_) => ApiResource::erase::<CSIDriver>(&()),
            Self::Other(o) => {
                let (api_version, kind) = o
                    .types
                    .as_ref()
                    .map(|t| (t.api_version.as_str(), t.kind.as_str()))
                    .unwrap_or_default();
                build_api_resource(api_version, kind)
            }
        }
    }

    /// Whether the object lives in a namespace
    pub fn is_namespaced(&self) -> bool {
        !is_cluster_scoped_kind(self.kind())
    }

    /// Object metadata
    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            Self::ReplicaSet(o) => &o.metadata,
            Self::DaemonSet(o) => &o.metadata,
            Self::StatefulSet(o) => &o.metadata,
            Self::Deployment(o) => &o.metadata,
            Self::StorageClass(o) => &o.metadata,
            Self::CsiDriver(o) => &o.metadata,
            Self::Other(o) => &o.metadata,
        }
    }

    /// Mutable object metadata
    pub fn metadata_mut(&mut self) -> &mut ObjectMeta {
        match self {
            Self::ReplicaSet(o) => &mut o.metadata,
            Self::DaemonSet(o) => &mut o.metadata,
            Self::StatefulSet(o) => &mut o.metadata,
            Self::Deployment(o) => &mut o.metadata,
            Self::StorageClass(o) => &mut o.metadata,
            Self::CsiDriver(o) => &mut o.metadata,
            Self::Other(o) => &mut o.metadata,
        }
    }

    /// Object name, empty when the manifest leaves it out
    pub fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }

    /// Pod template spec of pod-bearing kinds
    pub fn pod_spec_mut(&mut self) -> Option<&mut PodSpec> {
        match self {
            Self::ReplicaSet(o) => o.spec.as_mut()?.template.as_mut()?.spec.as_mut(),
            Self::DaemonSet(o) => o.spec.as_mut()?.template.spec.as_mut(),
            Self::StatefulSet(o) => o.spec.as_mut()?.template.spec.as_mut(),
            Self::Deployment(o) => o.spec.as_mut()?.template.spec.as_mut(),
            Self::StorageClass(_) | Self::CsiDriver(_) | Self::Other(_) => None,
        }
    }

    /// Human-readable identity for logs and errors: `Kind/name`
    pub fn describe(&self) -> String {
        format!("{}/{}", self.kind(), self.name())
    }
}

fn is_kind<K: Resource>(api_version: &str, kind: &str) -> bool {
    api_version == K::API_VERSION && kind == K::KIND
}
