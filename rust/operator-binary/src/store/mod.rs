//! Read and status-write access to the resources that the reconcilers operate on
//!
//! Reconcilers never keep state between invocations, every decision is derived from what [`Store::get`]
//! returns. Status writes are optimistic: they only succeed if the object has not been modified since it
//! was read, otherwise they fail with [`Error::Conflict`] and the reconciliation is retried from scratch.

pub mod k8s;
#[cfg(test)]
pub mod memory;

use std::fmt::Debug;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use snafu::Snafu;
use stackable_operator::kube::{
    api::DynamicObject, core::NamespaceResourceScope, runtime::reflector::ObjectRef, Resource,
};

pub use k8s::KubeStore;

/// Namespaced resources that can be stored.
pub trait StoredResource:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + DeserializeOwned
    + Serialize
    + Send
    + Sync
    + 'static
{
}

impl<K> StoredResource for K where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + DeserializeOwned
        + Serialize
        + Send
        + Sync
        + 'static
{
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("failed to get {object}"))]
    Get {
        source: stackable_operator::kube::Error,
        object: ObjectRef<DynamicObject>,
    },

    #[snafu(display("{object} has no name, namespace or resourceVersion"))]
    IncompleteObjectMeta { object: ObjectRef<DynamicObject> },

    #[snafu(display("failed to serialize status of {object}"))]
    SerializeStatus {
        source: serde_json::Error,
        object: ObjectRef<DynamicObject>,
    },

    #[snafu(display("{object} was modified concurrently"))]
    Conflict { object: ObjectRef<DynamicObject> },

    #[snafu(display("failed to update status of {object}"))]
    UpdateStatus {
        source: stackable_operator::kube::Error,
        object: ObjectRef<DynamicObject>,
    },
}

impl Error {
    /// Whether retrying the same operation later may succeed.
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::Get { .. } | Error::Conflict { .. } | Error::UpdateStatus { .. } => true,
            Error::IncompleteObjectMeta { .. } | Error::SerializeStatus { .. } => false,
        }
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Fetches the current state of an object, or [`None`] if it does not exist.
    async fn get<K: StoredResource>(&self, name: &str, namespace: &str) -> Result<Option<K>, Error>;

    /// Replaces the status of `obj`, failing with [`Error::Conflict`] if it has been modified since it was read.
    ///
    /// Only the status is written, any other changes to `obj` are ignored.
    async fn update_status<K: StoredResource>(&self, obj: &K) -> Result<K, Error>;
}
