//! In-memory [`Store`] that counts status writes, used for testing reconcilers

use std::{
    collections::BTreeMap,
    sync::{Mutex, MutexGuard},
};

use async_trait::async_trait;
use stackable_operator::kube::{runtime::reflector::ObjectRef, Resource};

use super::{ConflictSnafu, Error, IncompleteObjectMetaSnafu, Store, StoredResource};

type Key = (String, String, String);

#[derive(Default)]
struct State {
    objects: BTreeMap<Key, serde_json::Value>,
    status_writes: BTreeMap<Key, usize>,
    last_resource_version: u64,
}

impl State {
    fn next_resource_version(&mut self) -> String {
        self.last_resource_version += 1;
        self.last_resource_version.to_string()
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

fn key<K: StoredResource>(name: &str, namespace: &str) -> Key {
    (
        K::kind(&()).into_owned(),
        namespace.to_string(),
        name.to_string(),
    )
}

impl MemoryStore {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("memory store lock poisoned")
    }

    /// Creates or replaces `obj`, including its status, as an external actor would.
    pub fn insert<K: StoredResource>(&self, mut obj: K) {
        let mut state = self.state();
        let meta = obj.meta_mut();
        let key = key::<K>(
            meta.name.as_deref().expect("object has no name"),
            meta.namespace.as_deref().expect("object has no namespace"),
        );
        meta.resource_version = Some(state.next_resource_version());
        let value = serde_json::to_value(&obj).expect("failed to serialize object");
        state.objects.insert(key, value);
    }

    /// Reads an object synchronously, for making assertions.
    pub fn read<K: StoredResource>(&self, name: &str, namespace: &str) -> Option<K> {
        self.state()
            .objects
            .get(&key::<K>(name, namespace))
            .map(|value| serde_json::from_value(value.clone()).expect("failed to deserialize object"))
    }

    pub fn status_writes<K: StoredResource>(&self, name: &str, namespace: &str) -> usize {
        self.state()
            .status_writes
            .get(&key::<K>(name, namespace))
            .copied()
            .unwrap_or_default()
    }

    pub fn total_status_writes(&self) -> usize {
        self.state().status_writes.values().sum()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get<K: StoredResource>(&self, name: &str, namespace: &str) -> Result<Option<K>, Error> {
        // Let concurrent callers interleave between reads and writes, as they would against the API server
        tokio::task::yield_now().await;
        Ok(self.read(name, namespace))
    }

    async fn update_status<K: StoredResource>(&self, obj: &K) -> Result<K, Error> {
        let object = || ObjectRef::from_obj(obj).erase();
        let meta = obj.meta();
        let (Some(name), Some(namespace), Some(resource_version)) = (
            meta.name.as_deref(),
            meta.namespace.as_deref(),
            meta.resource_version.clone(),
        ) else {
            return IncompleteObjectMetaSnafu { object: object() }.fail();
        };
        let key = key::<K>(name, namespace);
        let mut state = self.state();
        let next_resource_version = state.next_resource_version();
        let Some(stored) = state.objects.get_mut(&key) else {
            return ConflictSnafu { object: object() }.fail();
        };
        if stored["metadata"]["resourceVersion"] != resource_version.as_str() {
            return ConflictSnafu { object: object() }.fail();
        }
        let mut serialized = serde_json::to_value(obj).expect("failed to serialize object");
        stored["status"] = serialized["status"].take();
        stored["metadata"]["resourceVersion"] = next_resource_version.into();
        let updated = serde_json::from_value(stored.clone()).expect("failed to deserialize object");
        *state.status_writes.entry(key).or_default() += 1;
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use stackable_operator::k8s_openapi::{
        apimachinery::pkg::apis::meta::v1::Time, chrono::Utc,
    };

    use crate::{
        crd::{ConditionStatus, CustomIssuer},
        store::{Error, Store},
    };

    use super::MemoryStore;

    fn issuer() -> CustomIssuer {
        serde_yaml::from_str(
            "
            apiVersion: cert-manager.k8s.sakamo.dev/v1
            kind: CustomIssuer
            metadata:
              name: issuer
              namespace: default
            spec:
              user: user
              password: password
            ",
        )
        .unwrap()
    }

    #[tokio::test]
    async fn stale_status_writes_conflict() {
        let store = MemoryStore::default();
        store.insert(issuer());

        let mut first = store.get::<CustomIssuer>("issuer", "default").await.unwrap().unwrap();
        let mut second = first.clone();
        first.status.get_or_insert_with(Default::default).ready = None;
        store.update_status(&first).await.unwrap();

        second
            .status
            .get_or_insert_with(Default::default)
            .set_ready(ConditionStatus::True, "Verified", String::new(), Time(Utc::now()));
        assert!(matches!(
            store.update_status(&second).await,
            Err(Error::Conflict { .. })
        ));
        assert_eq!(store.status_writes::<CustomIssuer>("issuer", "default"), 1);
    }

    #[tokio::test]
    async fn only_status_is_written() {
        let store = MemoryStore::default();
        store.insert(issuer());

        let mut issuer = store.get::<CustomIssuer>("issuer", "default").await.unwrap().unwrap();
        issuer.spec.user = "someone-else".to_string();
        issuer
            .status
            .get_or_insert_with(Default::default)
            .set_ready(ConditionStatus::False, "Rejected", String::new(), Time(Utc::now()));
        let updated = store.update_status(&issuer).await.unwrap();

        assert_eq!(updated.spec.user, "user");
        assert!(!updated.is_ready());
        assert_ne!(
            updated.metadata.resource_version,
            issuer.metadata.resource_version
        );
        assert_eq!(
            store.read::<CustomIssuer>("issuer", "default"),
            Some(updated)
        );
        assert!(store.get::<CustomIssuer>("other", "default").await.unwrap().is_none());
    }
}
