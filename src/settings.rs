//! Configuration tree nodes
//!
//! A [`ConfigNode`] is an ordered mapping from setting name to JSON value. Nodes
//! support two merge operations:
//!
//! - [`ConfigNode::join`] builds a new node from two nodes with explicit
//!   precedence (left wins or right wins)
//! - [`ConfigNode::inherit`] copies unset keys down from a parent node, mutating
//!   only the receiver
//!
//! Components store their own copy of a node, so mutating the node a component
//! was declared from never changes what gets built.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Which side wins when two nodes define the same key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinDirection {
    /// Keys from the receiver win
    Left,
    /// Keys from the argument win
    Right,
}

/// Ordered key/value configuration node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigNode {
    values: BTreeMap<String, Value>,
}

impl ConfigNode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// String value; `null` counts as unset
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.values.get(key).and_then(Value::as_bool)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.values.get(key).and_then(Value::as_u64)
    }

    /// A list of strings, accepting a single string as a one-element list
    pub fn get_strings(&self, key: &str) -> Vec<String> {
        match self.values.get(key) {
            Some(Value::String(s)) => vec![s.clone()],
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Nested node stored under `key`; empty when absent or not an object
    pub fn child(&self, key: &str) -> ConfigNode {
        match self.values.get(key) {
            Some(Value::Object(map)) => ConfigNode::from(map.clone()),
            _ => ConfigNode::new(),
        }
    }

    pub fn set_child(&mut self, key: impl Into<String>, node: ConfigNode) -> &mut Self {
        self.values.insert(key.into(), node.to_value());
        self
    }

    /// Merge two nodes into a new one. Neither input is modified.
    pub fn join(&self, other: &ConfigNode, direction: JoinDirection) -> ConfigNode {
        let (base, winner) = match direction {
            JoinDirection::Left => (other, self),
            JoinDirection::Right => (self, other),
        };
        let mut values = base.values.clone();
        for (key, value) in &winner.values {
            values.insert(key.clone(), value.clone());
        }
        ConfigNode { values }
    }

    /// Copy every key the receiver does not set from `parent`.
    ///
    /// Keys the receiver already sets are kept, whatever order the parents
    /// are inherited in.
    pub fn inherit(&mut self, parent: &ConfigNode) -> &mut Self {
        for (key, value) in &parent.values {
            self.values
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        self
    }

    /// Copy without the listed keys
    pub fn without(&self, keys: &[&str]) -> ConfigNode {
        let values = self
            .values
            .iter()
            .filter(|(k, _)| !keys.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        ConfigNode { values }
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.values.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }
}

impl From<Map<String, Value>> for ConfigNode {
    fn from(map: Map<String, Value>) -> Self {
        Self {
            values: map.into_iter().collect(),
        }
    }
}

impl TryFrom<Value> for ConfigNode {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(ConfigNode::from(map)),
            Value::Null => Ok(ConfigNode::new()),
            other => Err(Error::Json(serde::de::Error::custom(format!(
                "expected an object for a config node, got {}",
                other
            )))),
        }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for ConfigNode {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}
