//! carbonfeed kubehub: config-document store backed by Kubernetes ConfigMaps.
//!
//! Document metadata maps to ConfigMap `data`, payload maps to `binaryData`, and the
//! document version is the object's `resourceVersion`.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use carbonfeed_core::ConfigDocument;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::{
    api::{Api, Patch, PatchParams, PostParams},
    Client,
};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("connecting to cluster: {0}")]
    Client(#[source] kube::Error),
    #[error("reading {key}: {source}")]
    Get {
        key: String,
        #[source]
        source: kube::Error,
    },
    #[error("creating {key}: {source}")]
    Create {
        key: String,
        #[source]
        source: kube::Error,
    },
    #[error("updating {key}: {source}")]
    Update {
        key: String,
        #[source]
        source: kube::Error,
    },
    #[error("{key} changed since it was read (expected version {expected:?}); refusing to overwrite")]
    Conflict { key: String, expected: Option<String> },
    #[error("{key} not found")]
    Missing { key: String },
    #[error("encoding payload for {key}: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Capability the publisher needs from a document store.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn get_document(&self, namespace: &str, name: &str) -> Result<Option<ConfigDocument>, StoreError>;
    /// Create `doc`; the returned copy carries the store-issued version.
    async fn create_document(&self, doc: &ConfigDocument) -> Result<ConfigDocument, StoreError>;
    /// Persist `doc` in one write. Fails with `Conflict` when `doc.version` is stale.
    async fn update_document(&self, doc: &ConfigDocument) -> Result<ConfigDocument, StoreError>;
}

fn is_conflict(e: &kube::Error) -> bool {
    matches!(e, kube::Error::Api(resp) if resp.code == 409)
}

fn config_map_to_document(cm: ConfigMap, namespace: &str) -> ConfigDocument {
    ConfigDocument {
        namespace: cm.metadata.namespace.unwrap_or_else(|| namespace.to_string()),
        name: cm.metadata.name.unwrap_or_default(),
        metadata: cm.data.unwrap_or_default(),
        payload: cm
            .binary_data
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| (k, v.0))
            .collect(),
        version: cm.metadata.resource_version,
    }
}

fn document_to_config_map(doc: &ConfigDocument) -> ConfigMap {
    let data = (!doc.metadata.is_empty()).then(|| doc.metadata.clone());
    let binary_data = (!doc.payload.is_empty()).then(|| {
        doc.payload
            .iter()
            .map(|(k, v)| (k.clone(), ByteString(v.clone())))
            .collect::<BTreeMap<_, _>>()
    });
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(doc.name.clone()),
            namespace: Some(doc.namespace.clone()),
            resource_version: doc.version.clone(),
            ..Default::default()
        },
        data,
        binary_data,
        ..Default::default()
    }
}

/// ConfigMap-backed store using the ambient kubeconfig or in-cluster credentials.
pub struct KubeConfigStore {
    client: Client,
}

impl KubeConfigStore {
    pub async fn connect() -> Result<Self, StoreError> {
        let client = Client::try_default().await.map_err(StoreError::Client)?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self { Self { client } }

    fn api(&self, namespace: &str) -> Api<ConfigMap> { Api::namespaced(self.client.clone(), namespace) }
}

#[async_trait]
impl ConfigStore for KubeConfigStore {
    async fn get_document(&self, namespace: &str, name: &str) -> Result<Option<ConfigDocument>, StoreError> {
        let key = format!("{}/{}", namespace, name);
        let found = self
            .api(namespace)
            .get_opt(name)
            .await
            .map_err(|source| StoreError::Get { key: key.clone(), source })?;
        debug!(key = %key, found = found.is_some(), "configmap lookup");
        Ok(found.map(|cm| config_map_to_document(cm, namespace)))
    }

    async fn create_document(&self, doc: &ConfigDocument) -> Result<ConfigDocument, StoreError> {
        let mut cm = document_to_config_map(doc);
        cm.metadata.resource_version = None;
        let created = self
            .api(&doc.namespace)
            .create(&PostParams::default(), &cm)
            .await
            .map_err(|source| StoreError::Create { key: doc.key(), source })?;
        info!(key = %doc.key(), "configmap created");
        Ok(config_map_to_document(created, &doc.namespace))
    }

    async fn update_document(&self, doc: &ConfigDocument) -> Result<ConfigDocument, StoreError> {
        let patch = update_patch(doc);
        let updated = self
            .api(&doc.namespace)
            .patch(&doc.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|source| {
                if is_conflict(&source) {
                    StoreError::Conflict { key: doc.key(), expected: doc.version.clone() }
                } else {
                    StoreError::Update { key: doc.key(), source }
                }
            })?;
        Ok(config_map_to_document(updated, &doc.namespace))
    }
}

/// JSON merge patch body for an update of `doc`.
///
/// Carries `resourceVersion`, so the API server answers 409 when the object moved on
/// since it was read. Keys are only ever added or replaced, which leaves the object's
/// maps equal to `doc`'s.
fn update_patch(doc: &ConfigDocument) -> serde_json::Value {
    let cm = document_to_config_map(doc);
    let mut patch = serde_json::json!({ "metadata": { "resourceVersion": cm.metadata.resource_version } });
    // null would delete the field in a merge patch; omit empty maps instead.
    if let Some(data) = cm.data {
        patch["data"] = serde_json::json!(data);
    }
    if let Some(binary_data) = cm.binary_data {
        patch["binaryData"] = serde_json::json!(binary_data);
    }
    patch
}

/// Process-local store with the same versioning rules as the API server.
#[derive(Default)]
pub struct MemoryConfigStore {
    docs: Mutex<BTreeMap<(String, String), ConfigDocument>>,
    next_version: Mutex<u64>,
}

impl MemoryConfigStore {
    pub fn new() -> Self { Self::default() }

    /// Current stored copy, if any.
    pub fn snapshot(&self, namespace: &str, name: &str) -> Option<ConfigDocument> {
        let docs = self.docs.lock().unwrap_or_else(|e| e.into_inner());
        docs.get(&(namespace.to_string(), name.to_string())).cloned()
    }

    /// Store `doc` as-is under a fresh version, bypassing version checks.
    pub fn seed(&self, mut doc: ConfigDocument) -> ConfigDocument {
        doc.version = Some(self.bump());
        let mut docs = self.docs.lock().unwrap_or_else(|e| e.into_inner());
        docs.insert((doc.namespace.clone(), doc.name.clone()), doc.clone());
        doc
    }

    fn bump(&self) -> String {
        let mut v = self.next_version.lock().unwrap_or_else(|e| e.into_inner());
        *v += 1;
        v.to_string()
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn get_document(&self, namespace: &str, name: &str) -> Result<Option<ConfigDocument>, StoreError> {
        Ok(self.snapshot(namespace, name))
    }

    async fn create_document(&self, doc: &ConfigDocument) -> Result<ConfigDocument, StoreError> {
        let version = self.bump();
        let mut docs = self.docs.lock().unwrap_or_else(|e| e.into_inner());
        let id = (doc.namespace.clone(), doc.name.clone());
        if docs.contains_key(&id) {
            return Err(StoreError::Conflict { key: doc.key(), expected: None });
        }
        let mut stored = doc.clone();
        stored.version = Some(version);
        docs.insert(id, stored.clone());
        Ok(stored)
    }

    async fn update_document(&self, doc: &ConfigDocument) -> Result<ConfigDocument, StoreError> {
        let version = self.bump();
        let mut docs = self.docs.lock().unwrap_or_else(|e| e.into_inner());
        let id = (doc.namespace.clone(), doc.name.clone());
        let current = docs.get(&id).ok_or_else(|| StoreError::Missing { key: doc.key() })?;
        if doc.version.is_some() && doc.version != current.version {
            return Err(StoreError::Conflict { key: doc.key(), expected: doc.version.clone() });
        }
        let mut stored = doc.clone();
        stored.version = Some(version);
        docs.insert(id, stored.clone());
        Ok(stored)
    }
}
