//! Relation schemas
//!
//! A schema is a named, ordered attribute set with primary key metadata. It does
//! no coercion; `validate` only checks that a tuple's keys are known and that
//! each value has the declared type.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::component::ComponentKind;
use crate::error::{ConfigError, Result};
use crate::settings::ConfigNode;
use crate::Tuple;

/// Attribute value type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeType {
    #[serde(alias = "int")]
    Integer,
    #[serde(alias = "str")]
    String,
    #[serde(alias = "boolean")]
    Bool,
    Float,
    Any,
}

impl AttributeType {
    /// Whether `value` conforms; `null` always does
    pub fn accepts(self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) | (AttributeType::Any, _) => true,
            (AttributeType::Integer, Value::Number(n)) => n.is_i64() || n.is_u64(),
            (AttributeType::Float, Value::Number(_)) => true,
            (AttributeType::String, Value::String(_)) => true,
            (AttributeType::Bool, Value::Bool(_)) => true,
            _ => false,
        }
    }

    /// Best type for an example value
    pub fn of(value: &Value) -> AttributeType {
        match value {
            Value::Number(n) if n.is_i64() || n.is_u64() => AttributeType::Integer,
            Value::Number(_) => AttributeType::Float,
            Value::String(_) => AttributeType::String,
            Value::Bool(_) => AttributeType::Bool,
            _ => AttributeType::Any,
        }
    }
}

impl FromStr for AttributeType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        serde_json::from_value(Value::String(s.to_string()))
            .map_err(|_| format!("unknown attribute type: {}", s))
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AttributeType::Integer => "integer",
            AttributeType::String => "string",
            AttributeType::Bool => "bool",
            AttributeType::Float => "float",
            AttributeType::Any => "any",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: AttributeType,
    #[serde(default)]
    pub primary_key: bool,
    /// Relation this attribute refers to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreign_key: Option<String>,
}

impl Attribute {
    pub fn new(name: impl Into<String>, ty: AttributeType) -> Self {
        Self {
            name: name.into(),
            ty,
            primary_key: false,
            foreign_key: None,
        }
    }
}

/// Typed attribute set of a relation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub name: String,
    pub attributes: Vec<Attribute>,
    #[serde(default)]
    pub primary_key: Vec<String>,
    #[serde(skip)]
    finalized: bool,
}

impl Schema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            primary_key: Vec::new(),
            finalized: false,
        }
    }

    /// Builder-style attribute declaration
    pub fn attribute(mut self, name: impl Into<String>, ty: AttributeType) -> Self {
        self.add_attribute(Attribute::new(name, ty));
        self
    }

    /// Add or redefine an attribute, keeping its position
    pub fn add_attribute(&mut self, attribute: Attribute) -> &mut Self {
        match self.attributes.iter_mut().find(|a| a.name == attribute.name) {
            Some(existing) => *existing = attribute,
            None => self.attributes.push(attribute),
        }
        self
    }

    pub fn primary_key(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if let Some(attr) = self.attributes.iter_mut().find(|a| a.name == name) {
            attr.primary_key = true;
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn attribute_names(&self) -> Vec<&str> {
        self.attributes.iter().map(|a| a.name.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Derive the primary key from attribute flags. Idempotent.
    pub fn finalize(&mut self) -> &mut Self {
        if !self.finalized {
            for attr in &self.attributes {
                if attr.primary_key && !self.primary_key.contains(&attr.name) {
                    self.primary_key.push(attr.name.clone());
                }
            }
            self.finalized = true;
        }
        self
    }

    /// Check a tuple against the attribute set. Empty schemas accept anything.
    pub fn validate(&self, tuple: &Tuple) -> std::result::Result<(), String> {
        if self.is_empty() {
            return Ok(());
        }
        for (key, value) in tuple {
            match self.get(key) {
                None => return Err(format!("unknown attribute {:?}", key)),
                Some(attr) if !attr.ty.accepts(value) => {
                    return Err(format!("{:?} must be {}, got {}", key, attr.ty, value));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Infer a schema from a sample tuple
    pub fn infer(name: impl Into<String>, sample: &Tuple) -> Self {
        let mut schema = Schema::new(name);
        for (key, value) in sample {
            schema.add_attribute(Attribute::new(key.clone(), AttributeType::of(value)));
        }
        schema
    }

    /// Parse a schema component's settings.
    ///
    /// `attributes` is either an object (`{name: type}`) or a list of attribute
    /// objects; `primary_key` is a name or a list of names.
    pub fn from_config(config: &ConfigNode, label: &str) -> Result<Self> {
        let name = config.get_str("id").unwrap_or(label).to_string();
        let invalid = |detail: String| ConfigError::invalid("attributes", ComponentKind::Schema, label, detail);

        let mut schema = Schema::new(name);
        match config.get("attributes") {
            None | Some(Value::Null) => {}
            Some(Value::Object(map)) => {
                for (attr, ty) in map {
                    let ty = ty
                        .as_str()
                        .ok_or_else(|| invalid(format!("type of {} must be a string", attr)))?
                        .parse::<AttributeType>()
                        .map_err(invalid)?;
                    schema.add_attribute(Attribute::new(attr.clone(), ty));
                }
            }
            Some(list @ Value::Array(_)) => {
                let attributes: Vec<Attribute> =
                    serde_json::from_value(list.clone()).map_err(|e| invalid(e.to_string()))?;
                for attr in attributes {
                    schema.add_attribute(attr);
                }
            }
            Some(other) => return Err(invalid(format!("expected object or list, got {}", other)).into()),
        }

        for key in config.get_strings("primary_key") {
            if schema.get(&key).is_none() {
                return Err(ConfigError::invalid(
                    "primary_key",
                    ComponentKind::Schema,
                    label,
                    format!("{} is not an attribute", key),
                )
                .into());
            }
            schema = schema.primary_key(key);
        }
        Ok(schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tuple(value: Value) -> Tuple {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_validate() {
        let schema = Schema::new("users")
            .attribute("id", AttributeType::Integer)
            .attribute("name", AttributeType::String);

        assert!(schema.validate(&tuple(json!({"id": 1, "name": "Jane"}))).is_ok());
        assert!(schema.validate(&tuple(json!({"id": 1, "name": null}))).is_ok());
        assert!(schema.validate(&tuple(json!({"id": "1"}))).is_err());
        assert!(schema.validate(&tuple(json!({"email": "x"}))).is_err());
    }

    #[test]
    fn test_empty_schema_accepts_anything() {
        assert!(Schema::new("free").validate(&tuple(json!({"a": [1, 2]}))).is_ok());
    }

    #[test]
    fn test_finalize_is_idempotent() {
        let mut schema = Schema::new("users")
            .attribute("id", AttributeType::Integer)
            .primary_key("id");
        schema.finalize();
        let once = schema.clone();
        schema.finalize();
        assert_eq!(schema, once);
        assert_eq!(schema.primary_key, vec!["id"]);
    }

    #[test]
    fn test_from_config() {
        let config = ConfigNode::try_from(json!({
            "id": "users",
            "attributes": {"id": "int", "name": "string"},
            "primary_key": "id"
        }))
        .unwrap();
        let schema = Schema::from_config(&config, "users").unwrap();
        assert_eq!(schema.get("id").unwrap().ty, AttributeType::Integer);
        assert!(schema.get("id").unwrap().primary_key);

        let bad = ConfigNode::try_from(json!({"id": "users", "attributes": {"id": "uuid"}})).unwrap();
        assert!(Schema::from_config(&bad, "users").is_err());
    }

    #[test]
    fn test_from_config_list_keeps_order() {
        let config = ConfigNode::try_from(json!({
            "attributes": [
                {"name": "name", "type": "string"},
                {"name": "id", "type": "integer", "primary_key": true}
            ]
        }))
        .unwrap();
        let schema = Schema::from_config(&config, "people").unwrap();
        assert_eq!(schema.name, "people");
        assert_eq!(schema.attribute_names(), vec!["name", "id"]);
    }

    #[test]
    fn test_infer_from_sample() {
        let schema = Schema::infer("users", &tuple(json!({"id": 1, "score": 1.5, "ok": true})));
        assert_eq!(schema.get("score").unwrap().ty, AttributeType::Float);
        assert_eq!(schema.get("ok").unwrap().ty, AttributeType::Bool);
    }
}
