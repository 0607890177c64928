//! MemoryStore - JSON document collections held in memory.

use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

use dh_core::{DeviceRecord, EngineError, Pipeline, Row};

use super::eval::run_pipeline;
use crate::engine::{AggregationEngine, EngineFuture, GroupDomain};

/// A stored document.
pub type Document = Row;

/// Collection holding group documents for descendant traversal.
pub const GROUPS_COLLECTION: &str = "groups";

/// Key under `children` listing nested groups.
const CHILD_GROUPS_KEY: &str = "groups";

/// In-memory document store keyed by collection name.
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Vec<Document>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `<collection>.json` file in `dir`.
    ///
    /// Each file must hold a JSON array of objects.
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let store = Self::new();

        let entries =
            std::fs::read_dir(dir).with_context(|| format!("Failed to read data dir: {:?}", dir))?;
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(collection) = path.file_stem().and_then(|s| s.to_str()) else {
                warn!("Skipping collection file with non UTF-8 name: {:?}", path);
                continue;
            };

            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read collection: {:?}", path))?;
            let value: Value = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse collection: {:?}", path))?;
            let count = store
                .insert_value(collection, value)
                .with_context(|| format!("Invalid collection file: {:?}", path))?;
            debug!("Loaded {} documents into '{}'", count, collection);
        }

        info!(
            "Loaded {} collections from {:?}",
            store.read().len(),
            dir
        );
        Ok(store)
    }

    /// Insert a document or an array of documents. Returns how many were
    /// inserted.
    pub fn insert_value(&self, collection: &str, value: Value) -> Result<usize> {
        let docs = match value {
            Value::Object(doc) => vec![doc],
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::Object(doc) => Ok(doc),
                    other => bail!("expected a document, found {}", other),
                })
                .collect::<Result<Vec<_>>>()?,
            other => bail!("expected a document or an array, found {}", other),
        };
        let count = docs.len();
        self.insert_many(collection, docs);
        Ok(count)
    }

    pub fn insert_many(&self, collection: &str, docs: impl IntoIterator<Item = Document>) {
        self.write()
            .entry(collection.to_string())
            .or_default()
            .extend(docs);
    }

    pub fn count(&self, collection: &str) -> usize {
        self.read().get(collection).map_or(0, Vec::len)
    }

    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn snapshot(&self, collection: &str) -> Vec<Document> {
        self.read().get(collection).cloned().unwrap_or_default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Vec<Document>>> {
        self.collections.read().unwrap_or_else(|poisoned| {
            warn!("Recovering from poisoned store lock");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Vec<Document>>> {
        self.collections.write().unwrap_or_else(|poisoned| {
            warn!("Recovering from poisoned store lock");
            poisoned.into_inner()
        })
    }

    /// Ids of `resource` documents reachable from `group_ids`, in discovery
    /// order and without duplicates.
    fn descendant_ids(
        &self,
        resource: &str,
        group_ids: &[String],
    ) -> Result<Vec<String>, EngineError> {
        let collections = self.read();
        let groups: HashMap<&str, &Document> = collections
            .get(GROUPS_COLLECTION)
            .map(|docs| {
                docs.iter()
                    .filter_map(|doc| Some((doc.get("_id")?.as_str()?, doc)))
                    .collect()
            })
            .unwrap_or_default();

        let mut visited: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        for id in group_ids {
            if !groups.contains_key(id.as_str()) {
                return Err(EngineError::new(format!("group '{}' not found", id)));
            }
            if visited.insert(id.as_str()) {
                queue.push_back(id.as_str());
            }
        }

        let mut seen_devices: HashSet<String> = HashSet::new();
        let mut devices = Vec::new();
        while let Some(group_id) = queue.pop_front() {
            let Some(children) = groups.get(group_id).and_then(|g| g.get("children")) else {
                continue;
            };

            for child in child_ids(children, CHILD_GROUPS_KEY) {
                if groups.contains_key(child) && visited.insert(child) {
                    queue.push_back(child);
                }
            }
            for device in child_ids(children, resource) {
                if seen_devices.insert(device.to_string()) {
                    devices.push(device.to_string());
                }
            }
        }

        Ok(devices)
    }
}

fn child_ids<'a>(children: &'a Value, key: &str) -> impl Iterator<Item = &'a str> {
    children
        .get(key)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
}

impl AggregationEngine for MemoryStore {
    fn aggregate<'a>(
        &'a self,
        resource: &'a str,
        pipeline: &'a Pipeline,
    ) -> EngineFuture<'a, Vec<Row>> {
        Box::pin(async move {
            let docs = self.snapshot(resource);
            debug!(
                resource,
                documents = docs.len(),
                stages = pipeline.len(),
                "running pipeline"
            );
            run_pipeline(pipeline.stages(), docs).map_err(|e| {
                EngineError::new(format!("aggregation on '{}' failed: {}", resource, e))
            })
        })
    }
}

impl GroupDomain for MemoryStore {
    fn descendant_devices<'a>(
        &'a self,
        resource: &'a str,
        group_ids: &'a [String],
    ) -> EngineFuture<'a, Vec<DeviceRecord>> {
        Box::pin(async move {
            let ids = self.descendant_ids(resource, group_ids)?;
            let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();

            let mut devices = Vec::with_capacity(ids.len());
            for doc in self.snapshot(resource) {
                let matches = doc
                    .get("_id")
                    .and_then(Value::as_str)
                    .is_some_and(|id| wanted.contains(id));
                if !matches {
                    continue;
                }
                let device: DeviceRecord = serde_json::from_value(Value::Object(doc))
                    .map_err(|e| EngineError::new(format!("invalid device document: {}", e)))?;
                devices.push(device);
            }
            Ok(devices)
        })
    }
}
