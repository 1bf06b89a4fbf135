//! In-memory object store
//!
//! Backs offline rendering and the unit tests. Objects live in creation
//! order; nothing is validated beyond identity uniqueness.

use std::sync::{Mutex, MutexGuard, PoisonError};

#[cfg(test)]
use std::collections::HashMap;

use async_trait::async_trait;
use kube::api::DynamicObject;
use kube::discovery::ApiResource;

use super::{ObjectIdentity, ObjectStore};
use crate::{Error, Result};

/// Object store keeping objects in memory, keyed by identity
///
/// Creation of an existing identity fails with 409, deletion of a missing
/// one reports `false`.
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<Vec<(ObjectIdentity, DynamicObject)>>,
    deletions: Mutex<Vec<String>>,
    #[cfg(test)]
    create_failures: Mutex<HashMap<String, Error>>,
    #[cfg(test)]
    delete_failures: Mutex<HashMap<String, Error>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn conflict(identity: &ObjectIdentity) -> Error {
    Error::from(kube::Error::Api(kube::core::ErrorResponse {
        status: "Failure".to_string(),
        message: format!("{} already exists", identity),
        reason: "AlreadyExists".to_string(),
        code: 409,
    }))
}

impl MemoryStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects
    pub fn len(&self) -> usize {
        lock(&self.objects).len()
    }

    /// True when nothing is stored
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stored object with the given display identity
    pub fn get(&self, identity: &str) -> Option<DynamicObject> {
        lock(&self.objects)
            .iter()
            .find(|(id, _)| id.to_string() == identity)
            .map(|(_, object)| object.clone())
    }

    /// Every stored object, in creation order
    pub fn objects(&self) -> Vec<(ObjectIdentity, DynamicObject)> {
        lock(&self.objects).clone()
    }

    /// Identities of every stored object, in creation order
    pub fn identities(&self) -> Vec<String> {
        lock(&self.objects)
            .iter()
            .map(|(id, _)| id.to_string())
            .collect()
    }

    /// Number of stored objects carrying a run token
    pub fn labelled(&self, token: &str) -> usize {
        let selector = csi_e2e_common::run_label_selector(token);
        lock(&self.objects)
            .iter()
            .filter(|(_, object)| matches_selector(object, &selector))
            .count()
    }

    /// Deleted identities, in deletion order
    pub fn deletions(&self) -> Vec<String> {
        lock(&self.deletions).clone()
    }

    /// Fail the next creation of `identity` with `error`
    #[cfg(test)]
    pub(crate) fn fail_create(&self, identity: &str, error: Error) {
        lock(&self.create_failures).insert(identity.to_string(), error);
    }

    /// Fail the next deletion of `identity` with `error`
    #[cfg(test)]
    pub(crate) fn fail_delete(&self, identity: &str, error: Error) {
        lock(&self.delete_failures).insert(identity.to_string(), error);
    }
}

fn matches_selector(object: &DynamicObject, selector: &str) -> bool {
    let Some((key, value)) = selector.split_once('=') else {
        return false;
    };
    object
        .metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(key))
        .is_some_and(|v| v == value)
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn create(&self, identity: &ObjectIdentity, object: &DynamicObject) -> Result<()> {
        #[cfg(test)]
        if let Some(error) = lock(&self.create_failures).remove(&identity.to_string()) {
            return Err(error);
        }
        let mut objects = lock(&self.objects);
        if objects.iter().any(|(id, _)| id == identity) {
            return Err(conflict(identity));
        }
        objects.push((identity.clone(), object.clone()));
        Ok(())
    }

    async fn delete(&self, identity: &ObjectIdentity) -> Result<bool> {
        let key = identity.to_string();
        #[cfg(test)]
        if let Some(error) = lock(&self.delete_failures).remove(&key) {
            return Err(error);
        }
        let mut objects = lock(&self.objects);
        let before = objects.len();
        objects.retain(|(id, _)| id != identity);
        let removed = objects.len() != before;
        if removed {
            lock(&self.deletions).push(key);
        }
        Ok(removed)
    }

    async fn list_labeled(
        &self,
        resource: &ApiResource,
        selector: &str,
    ) -> Result<Vec<ObjectIdentity>> {
        Ok(lock(&self.objects)
            .iter()
            .filter(|(id, object)| &id.resource == resource && matches_selector(object, selector))
            .map(|(id, _)| id.clone())
            .collect())
    }
}
