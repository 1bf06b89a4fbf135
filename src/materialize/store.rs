//! Cluster object store used by the materializer
//!
//! The only place the harness mutates the cluster. Everything above it works
//! on [`ObjectIdentity`] values so tests can swap in an in-memory store.

use std::fmt;

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, PostParams};
use kube::discovery::ApiResource;
use kube::Client;
#[cfg(test)]
use mockall::automock;
use tracing::debug;

use csi_e2e_common::retry::{retry_with_backoff_if, RetryConfig};
use csi_e2e_common::FIELD_MANAGER;

use crate::{Error, Result};

/// Address of one object in the cluster
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectIdentity {
    /// API resource the object belongs to
    pub resource: ApiResource,
    /// Object name
    pub name: String,
    /// Namespace, `None` for cluster-scoped objects
    pub namespace: Option<String>,
}

impl ObjectIdentity {
    /// Identity of a cluster-scoped object
    pub fn cluster(resource: ApiResource, name: impl Into<String>) -> Self {
        Self {
            resource,
            name: name.into(),
            namespace: None,
        }
    }

    /// Identity of a namespaced object
    pub fn namespaced(
        resource: ApiResource,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            resource,
            name: name.into(),
            namespace: Some(namespace.into()),
        }
    }
}

impl fmt::Display for ObjectIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}/{}", self.resource.kind, ns, self.name),
            None => write!(f, "{}/{}", self.resource.kind, self.name),
        }
    }
}

/// Create, delete and list objects by identity
///
/// Abstracted so driver lifecycles can be exercised without a cluster.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Create an object; an existing object with the same identity is an error
    async fn create(&self, identity: &ObjectIdentity, object: &DynamicObject) -> Result<()>;

    /// Delete an object
    ///
    /// Returns `false` when the object was already gone.
    async fn delete(&self, identity: &ObjectIdentity) -> Result<bool>;

    /// List objects of one resource, across all namespaces, matching a label selector
    async fn list_labeled(
        &self,
        resource: &ApiResource,
        selector: &str,
    ) -> Result<Vec<ObjectIdentity>>;
}

/// [`ObjectStore`] backed by the Kubernetes API
pub struct KubeObjectStore {
    client: Client,
}

impl KubeObjectStore {
    /// Create a store using the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, identity: &ObjectIdentity) -> Api<DynamicObject> {
        match &identity.namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &identity.resource),
            None => Api::all_with(self.client.clone(), &identity.resource),
        }
    }
}

#[async_trait]
impl ObjectStore for KubeObjectStore {
    async fn create(&self, identity: &ObjectIdentity, object: &DynamicObject) -> Result<()> {
        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        self.api(identity).create(&params, object).await?;
        debug!(object = %identity, "created object");
        Ok(())
    }

    async fn delete(&self, identity: &ObjectIdentity) -> Result<bool> {
        let api = self.api(identity);
        retry_with_backoff_if(
            &RetryConfig::with_max_attempts(3),
            "delete_object",
            Error::is_retryable,
            || async {
                match api.delete(&identity.name, &DeleteParams::background()).await {
                    Ok(_) => {
                        debug!(object = %identity, "deleted object");
                        Ok(true)
                    }
                    Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(false),
                    Err(e) => Err(Error::from(e)),
                }
            },
        )
        .await
    }

    async fn list_labeled(
        &self,
        resource: &ApiResource,
        selector: &str,
    ) -> Result<Vec<ObjectIdentity>> {
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), resource);
        let params = ListParams::default().labels(selector);
        let list = retry_with_backoff_if(
            &RetryConfig::default(),
            "list_labeled",
            Error::is_retryable,
            || async { api.list(&params).await.map_err(Error::from) },
        )
        .await?;

        Ok(list
            .items
            .into_iter()
            .filter_map(|item| {
                let name = item.metadata.name?;
                Some(ObjectIdentity {
                    resource: resource.clone(),
                    name,
                    namespace: item.metadata.namespace,
                })
            })
            .collect())
    }
}
