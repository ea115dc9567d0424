//! Adapter and gateway contracts
//!
//! Concrete data sources live behind three traits: an [`Adapter`] is a factory
//! registered under an id, a [`Gateway`] is one configured connection, and a
//! [`Dataset`] is one addressable collection inside it. The crate ships the
//! `memory` adapter ([`crate::memory`]).

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::component::{Component, ComponentKind};
use crate::error::{ConfigError, Error, Result};
use crate::memory::MemoryAdapter;
use crate::schema::Schema;
use crate::settings::ConfigNode;
use crate::Tuple;

/// Settings consumed by the gateway component itself, never forwarded
const RESERVED: [&str; 10] = [
    "id",
    "adapter",
    "type",
    "namespace",
    "opts",
    "args",
    "logger",
    "plugins",
    "shared_plugins",
    "depends_on",
];

/// Factory for gateways of one kind of data source
pub trait Adapter: Send + Sync {
    fn id(&self) -> &str;

    fn setup(&self, gateway: &str, args: &[Value], options: &ConfigNode) -> Result<Box<dyn Gateway>>;
}

/// A configured connection to a data source
pub trait Gateway: Send + Sync + fmt::Debug {
    fn adapter(&self) -> &str;

    fn configure(&mut self, config: ConfigNode);

    fn config(&self) -> &ConfigNode;

    fn use_logger(&mut self, _span: tracing::Span) {}

    fn dataset(&self, name: &str) -> Result<Arc<dyn Dataset>>;

    /// Schema for a dataset, when the source can describe it
    fn infer_schema(&self, _name: &str) -> Option<Schema> {
        None
    }
}

/// One addressable collection of tuples
pub trait Dataset: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn to_vec(&self) -> Vec<Tuple>;

    fn insert(&self, tuple: Tuple) -> Result<Tuple>;

    /// Apply `changes` to tuples matching `restriction`; returns the updated tuples
    fn update(&self, restriction: &Tuple, changes: &Tuple) -> Result<Vec<Tuple>>;

    /// Remove tuples matching `restriction`; returns the removed tuples
    fn delete(&self, restriction: &Tuple) -> Result<Vec<Tuple>>;
}

/// Whether `tuple` has every key/value pair of `restriction`
pub fn matches(tuple: &Tuple, restriction: &Tuple) -> bool {
    restriction.iter().all(|(k, v)| tuple.get(k) == Some(v))
}

// =============================================================================
// Adapter table
// =============================================================================

/// Adapter factories by id
#[derive(Clone)]
pub struct Adapters {
    factories: BTreeMap<String, Arc<dyn Adapter>>,
}

impl Adapters {
    /// Table with the `memory` adapter registered
    pub fn new() -> Self {
        let mut adapters = Self {
            factories: BTreeMap::new(),
        };
        adapters.register(MemoryAdapter);
        adapters
    }

    pub fn register<A: Adapter + 'static>(&mut self, adapter: A) -> &mut Self {
        self.factories.insert(adapter.id().to_string(), Arc::new(adapter));
        self
    }

    pub fn get(&self, id: &str) -> Result<Arc<dyn Adapter>> {
        self.factories
            .get(id)
            .cloned()
            .ok_or_else(|| Error::UnknownAdapter(id.to_string()))
    }

    pub fn ids(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

impl Default for Adapters {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Adapters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.factories.keys()).finish()
    }
}

// =============================================================================
// Classes
// =============================================================================

/// Prepared gateway settings
#[derive(Debug, Clone)]
pub struct GatewayClass {
    pub id: String,
    pub adapter: String,
    pub args: Vec<Value>,
    /// Forwarded settings: everything but the reserved keys, with `opts` merged in
    pub options: ConfigNode,
    pub logger: bool,
}

impl GatewayClass {
    pub fn from_component(component: &Component) -> Result<Self> {
        let config = component.config();
        let label = component.label();
        let adapter = config
            .get_str("adapter")
            .or_else(|| config.get_str("type"))
            .ok_or_else(|| ConfigError::inference("adapter", ComponentKind::Gateway, &label))?
            .to_string();

        let args = match config.get("args") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items.clone(),
            Some(other) => vec![other.clone()],
        };

        let mut options = config.without(&RESERVED);
        for (key, value) in config.child("opts").iter() {
            options.set(key, value.clone());
        }

        Ok(Self {
            id: config.get_str("id").unwrap_or(&label).to_string(),
            adapter,
            args,
            options,
            logger: config.get_bool("logger").unwrap_or(false),
        })
    }
}

/// Prepared dataset settings
#[derive(Debug, Clone)]
pub struct DatasetClass {
    pub id: String,
    pub gateway: String,
}

impl DatasetClass {
    pub fn from_component(component: &Component) -> Result<Self> {
        let config = component.config();
        let label = component.label();
        let field = |name: &str| {
            config
                .get_str(name)
                .map(str::to_string)
                .ok_or_else(|| ConfigError::inference(name, ComponentKind::Dataset, &label))
        };
        Ok(Self {
            id: field("id")?,
            gateway: field("gateway")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ProviderId;
    use serde_json::json;

    fn gateway(config: Value) -> Component {
        Component::new(
            ComponentKind::Gateway,
            ConfigNode::try_from(config).unwrap(),
            ProviderId::new("app"),
        )
        .unwrap()
    }

    #[test]
    fn test_gateway_options_strip_reserved_and_merge_opts() {
        let class = GatewayClass::from_component(&gateway(json!({
            "id": "default",
            "type": "memory",
            "namespace": "app",
            "args": ["memory://"],
            "opts": {"pool": 5},
            "pool": 1,
            "timeout": 30
        })))
        .unwrap();

        assert_eq!(class.adapter, "memory");
        assert_eq!(class.args, vec![json!("memory://")]);
        assert_eq!(class.options.get_u64("pool"), Some(5));
        assert_eq!(class.options.get_u64("timeout"), Some(30));
        assert!(!class.options.contains_key("namespace"));
        assert!(!class.options.contains_key("opts"));
    }

    #[test]
    fn test_gateway_without_adapter_fails_inference() {
        let err = GatewayClass::from_component(&gateway(json!({"id": "default"}))).unwrap_err();
        assert!(matches!(err, Error::Config(ref e) if e.setting == "adapter"));
    }

    #[test]
    fn test_adapter_table() {
        let adapters = Adapters::new();
        assert_eq!(adapters.ids(), vec!["memory"]);
        assert!(matches!(adapters.get("sql"), Err(Error::UnknownAdapter(_))));
    }

    #[test]
    fn test_restriction_matching() {
        let tuple = json!({"id": 1, "name": "Jane"}).as_object().unwrap().clone();
        let hit = json!({"id": 1}).as_object().unwrap().clone();
        let miss = json!({"id": 2}).as_object().unwrap().clone();
        assert!(matches(&tuple, &hit));
        assert!(!matches(&tuple, &miss));
        assert!(matches(&tuple, &Tuple::new()));
    }
}
