//! [`Store`] backed by the Kubernetes API server

use async_trait::async_trait;
use serde_json::json;
use snafu::{OptionExt as _, ResultExt as _};
use stackable_operator::kube::{
    self,
    api::{Api, Patch, PatchParams},
    runtime::reflector::ObjectRef,
};

use super::{
    ConflictSnafu, Error, GetSnafu, IncompleteObjectMetaSnafu, SerializeStatusSnafu, Store,
    StoredResource, UpdateStatusSnafu,
};
use crate::utils::Unloggable;

#[derive(Clone, Debug)]
pub struct KubeStore {
    // Not secret per se, but Client isn't Debug
    client: Unloggable<kube::Client>,
}

impl KubeStore {
    pub fn new(client: kube::Client) -> Self {
        Self {
            client: Unloggable(client),
        }
    }

    fn api<K: StoredResource>(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.0.clone(), namespace)
    }
}

#[async_trait]
impl Store for KubeStore {
    async fn get<K: StoredResource>(&self, name: &str, namespace: &str) -> Result<Option<K>, Error> {
        self.api::<K>(namespace)
            .get_opt(name)
            .await
            .with_context(|_| GetSnafu {
                object: ObjectRef::<K>::new(name).within(namespace).erase(),
            })
    }

    async fn update_status<K: StoredResource>(&self, obj: &K) -> Result<K, Error> {
        let object = || ObjectRef::from_obj(obj).erase();
        let meta = obj.meta();
        let (name, namespace, resource_version) = meta
            .name
            .as_deref()
            .zip(meta.namespace.as_deref())
            .zip(meta.resource_version.as_deref())
            .map(|((name, namespace), resource_version)| (name, namespace, resource_version))
            .with_context(|| IncompleteObjectMetaSnafu { object: object() })?;
        let mut serialized = serde_json::to_value(obj)
            .with_context(|_| SerializeStatusSnafu { object: object() })?;
        // Carrying the resourceVersion makes the API server reject the patch if the object has been
        // modified since we read it
        let patch = json!({
            "metadata": { "resourceVersion": resource_version },
            "status": serialized["status"].take(),
        });
        match self
            .api::<K>(namespace)
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(updated) => Ok(updated),
            Err(kube::Error::Api(err)) if err.code == 409 => ConflictSnafu { object: object() }.fail(),
            Err(err) => Err(err).with_context(|_| UpdateStatusSnafu { object: object() }),
        }
    }
}
