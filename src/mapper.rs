//! Mappers
//!
//! A mapper is an ordered list of tuple transforms bound to a relation. Most
//! transforms are declarative and can live in configuration files; custom ones
//! wrap a closure.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::component::{Component, ComponentKind};
use crate::error::{ConfigError, Error, Result};
use crate::Tuple;

type TransformFn = dyn Fn(Tuple) -> Result<Tuple> + Send + Sync;

/// Closure transform
#[derive(Clone)]
pub struct CustomTransform(Arc<TransformFn>);

impl CustomTransform {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Tuple) -> Result<Tuple> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }
}

impl fmt::Debug for CustomTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CustomTransform(..)")
    }
}

/// One tuple rewrite step
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Transform {
    /// Rename keys (`from -> to`); absent keys are ignored
    RenameKeys { mapping: BTreeMap<String, String> },
    RejectKeys { keys: Vec<String> },
    AcceptKeys { keys: Vec<String> },
    /// Set keys, overwriting existing values
    AddKeys { values: Tuple },
    /// Move `keys` into a nested object under `key`
    Wrap { key: String, keys: Vec<String> },
    #[serde(skip)]
    Custom(CustomTransform),
}

impl Transform {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(Tuple) -> Result<Tuple> + Send + Sync + 'static,
    {
        Transform::Custom(CustomTransform::new(f))
    }

    pub fn apply(&self, mut tuple: Tuple) -> Result<Tuple> {
        match self {
            Transform::RenameKeys { mapping } => {
                for (from, to) in mapping {
                    if let Some(value) = tuple.remove(from) {
                        tuple.insert(to.clone(), value);
                    }
                }
                Ok(tuple)
            }
            Transform::RejectKeys { keys } => {
                tuple.retain(|k, _| !keys.contains(k));
                Ok(tuple)
            }
            Transform::AcceptKeys { keys } => {
                tuple.retain(|k, _| keys.contains(k));
                Ok(tuple)
            }
            Transform::AddKeys { values } => {
                for (key, value) in values {
                    tuple.insert(key.clone(), value.clone());
                }
                Ok(tuple)
            }
            Transform::Wrap { key, keys } => {
                let mut nested = Tuple::new();
                for k in keys {
                    if let Some(value) = tuple.remove(k) {
                        nested.insert(k.clone(), value);
                    }
                }
                tuple.insert(key.clone(), Value::Object(nested));
                Ok(tuple)
            }
            Transform::Custom(f) => (f.0)(tuple),
        }
    }
}

/// Parse a `transforms` setting
pub fn parse_transforms(value: Option<&Value>, label: &str) -> Result<Vec<Transform>> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|e| Error::MapperMisconfigured(label.to_string(), e.to_string())),
    }
}

// =============================================================================
// Classes and mappers
// =============================================================================

/// Prepared mapper settings
#[derive(Debug, Clone)]
pub struct MapperClass {
    pub id: String,
    pub relation: String,
    pub transforms: Vec<Transform>,
    pub extensions: Vec<String>,
}

impl MapperClass {
    pub fn from_component(component: &Component) -> Result<Self> {
        let config = component.config();
        let label = component.label();
        let required = |name: &str| {
            config
                .get_str(name)
                .map(str::to_string)
                .ok_or_else(|| ConfigError::inference(name, ComponentKind::Mapper, &label))
        };
        Ok(Self {
            id: required("id")?,
            relation: required("relation")?,
            transforms: parse_transforms(config.get("transforms"), &label)?,
            extensions: Vec::new(),
        })
    }
}

/// Built mapper
#[derive(Debug, Clone)]
pub struct Mapper {
    id: String,
    relation: String,
    transforms: Arc<[Transform]>,
}

impl Mapper {
    pub fn new(class: MapperClass) -> Self {
        Self {
            id: class.id,
            relation: class.relation,
            transforms: class.transforms.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn relation(&self) -> &str {
        &self.relation
    }

    pub fn key(&self) -> String {
        format!("{}.{}", self.relation, self.id)
    }

    pub fn transforms(&self) -> &[Transform] {
        &self.transforms
    }

    pub fn call(&self, tuple: Tuple) -> Result<Tuple> {
        self.transforms.iter().try_fold(tuple, |t, step| step.apply(t))
    }

    pub fn call_many(&self, tuples: Vec<Tuple>) -> Result<Vec<Tuple>> {
        tuples.into_iter().map(|t| self.call(t)).collect()
    }

    /// Map an object, or each object of an array
    pub fn call_value(&self, value: Value) -> Result<Value> {
        match value {
            Value::Object(tuple) => Ok(Value::Object(self.call(tuple)?)),
            Value::Array(items) => items
                .into_iter()
                .map(|item| self.call_value(item))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            other => Err(Error::MapperMisconfigured(
                self.key(),
                format!("cannot map a non-tuple value: {}", other),
            )),
        }
    }
}
