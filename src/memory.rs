//! In-memory adapter
//!
//! Datasets are vectors of tuples behind a lock, created on first use. A
//! gateway can be seeded through its `datasets` option:
//!
//! ```toml
//! [gateways.default]
//! adapter = "memory"
//! datasets = { users = [{ id = 1, name = "Jane" }] }
//! ```
//!
//! Seeded datasets also drive schema inference: the first tuple's value types
//! become the attribute types.

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::error::{Error, Result};
use crate::gateway::{matches, Adapter, Dataset, Gateway};
use crate::schema::Schema;
use crate::settings::ConfigNode;
use crate::Tuple;

pub const ADAPTER_ID: &str = "memory";

#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryAdapter;

impl Adapter for MemoryAdapter {
    fn id(&self) -> &str {
        ADAPTER_ID
    }

    fn setup(&self, gateway: &str, _args: &[Value], options: &ConfigNode) -> Result<Box<dyn Gateway>> {
        let gw = MemoryGateway::new(gateway);
        for (name, rows) in options.child("datasets").iter() {
            let rows = match rows {
                Value::Array(rows) => rows,
                other => {
                    return Err(Error::Adapter {
                        adapter: ADAPTER_ID.to_string(),
                        message: format!("seed for {} must be a list, got {}", name, other),
                    })
                }
            };
            let dataset = gw.memory_dataset(name);
            for row in rows {
                let tuple = row.as_object().cloned().ok_or_else(|| Error::Adapter {
                    adapter: ADAPTER_ID.to_string(),
                    message: format!("seed rows for {} must be objects", name),
                })?;
                dataset.insert(tuple)?;
            }
        }
        Ok(Box::new(gw))
    }
}

/// Gateway over process-local datasets
#[derive(Debug)]
pub struct MemoryGateway {
    id: String,
    config: ConfigNode,
    datasets: RwLock<BTreeMap<String, Arc<MemoryDataset>>>,
    logger: Option<tracing::Span>,
}

impl MemoryGateway {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            config: ConfigNode::new(),
            datasets: RwLock::new(BTreeMap::new()),
            logger: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn has_logger(&self) -> bool {
        self.logger.is_some()
    }

    pub fn dataset_names(&self) -> Vec<String> {
        self.datasets.read().keys().cloned().collect()
    }

    fn memory_dataset(&self, name: &str) -> Arc<MemoryDataset> {
        self.datasets
            .write()
            .entry(name.to_string())
            .or_insert_with(|| {
                if let Some(span) = &self.logger {
                    span.in_scope(|| debug!(dataset = name, "dataset created"));
                }
                Arc::new(MemoryDataset::new(name))
            })
            .clone()
    }
}

impl Gateway for MemoryGateway {
    fn adapter(&self) -> &str {
        ADAPTER_ID
    }

    fn configure(&mut self, config: ConfigNode) {
        self.config = config;
    }

    fn config(&self) -> &ConfigNode {
        &self.config
    }

    fn use_logger(&mut self, span: tracing::Span) {
        self.logger = Some(span);
    }

    fn dataset(&self, name: &str) -> Result<Arc<dyn Dataset>> {
        Ok(self.memory_dataset(name))
    }

    fn infer_schema(&self, name: &str) -> Option<Schema> {
        let datasets = self.datasets.read();
        let first = datasets.get(name)?.to_vec().into_iter().next()?;
        Some(Schema::infer(name, &first))
    }
}

/// Lock-guarded tuple vector
#[derive(Debug, Default)]
pub struct MemoryDataset {
    name: String,
    tuples: RwLock<Vec<Tuple>>,
}

impl MemoryDataset {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tuples: RwLock::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.tuples.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Dataset for MemoryDataset {
    fn name(&self) -> &str {
        &self.name
    }

    fn to_vec(&self) -> Vec<Tuple> {
        self.tuples.read().clone()
    }

    fn insert(&self, tuple: Tuple) -> Result<Tuple> {
        self.tuples.write().push(tuple.clone());
        Ok(tuple)
    }

    fn update(&self, restriction: &Tuple, changes: &Tuple) -> Result<Vec<Tuple>> {
        let mut tuples = self.tuples.write();
        let mut updated = Vec::new();
        for tuple in tuples.iter_mut().filter(|t| matches(t, restriction)) {
            for (key, value) in changes {
                tuple.insert(key.clone(), value.clone());
            }
            updated.push(tuple.clone());
        }
        Ok(updated)
    }

    fn delete(&self, restriction: &Tuple) -> Result<Vec<Tuple>> {
        let mut tuples = self.tuples.write();
        let (removed, kept): (Vec<Tuple>, Vec<Tuple>) =
            tuples.drain(..).partition(|t| matches(t, restriction));
        *tuples = kept;
        Ok(removed)
    }
}
