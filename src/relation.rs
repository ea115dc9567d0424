//! Relations and associations
//!
//! A [`RelationClass`] is the prepared, still mutable description of a relation
//! that listeners and plugins extend during finalize. Building it yields a
//! [`Relation`]: an immutable view over a dataset with a finalized schema,
//! named views and associations.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::component::{Component, ComponentKind};
use crate::error::{ConfigError, Error, Result};
use crate::gateway::{matches, Dataset};
use crate::schema::Schema;
use crate::settings::ConfigNode;
use crate::Tuple;

/// How a relation's schema is obtained
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaSource {
    /// A schema component, by key
    Component(String),
    /// Ask the gateway
    Infer,
    /// No attributes; every tuple is accepted
    Empty,
}

// =============================================================================
// RelationClass
// =============================================================================

#[derive(Debug, Clone)]
pub struct RelationClass {
    pub id: String,
    pub gateway: String,
    pub dataset: String,
    pub adapter: String,
    pub schema_source: SchemaSource,
    /// Resolved during build, before `relations.schema.set`
    pub schema: Option<Schema>,
    /// View name to restriction
    pub views: BTreeMap<String, Tuple>,
    /// Names of behaviors added by plugins and listeners
    pub extensions: Vec<String>,
    /// Settings with no dedicated field
    pub settings: ConfigNode,
}

impl RelationClass {
    pub fn from_component(component: &Component) -> Result<Self> {
        let config = component.config();
        let label = component.label();
        let id = config.get_str("id").unwrap_or(&label).to_string();
        let required = |name: &str| {
            config
                .get_str(name)
                .map(str::to_string)
                .ok_or_else(|| ConfigError::inference(name, ComponentKind::Relation, &label))
        };

        let schema_source = match config.get("schema") {
            None | Some(Value::Null) => SchemaSource::Empty,
            Some(Value::String(key)) => SchemaSource::Component(key.clone()),
            Some(Value::Bool(true)) => SchemaSource::Infer,
            Some(Value::Bool(false)) => SchemaSource::Empty,
            Some(other) => {
                return Err(ConfigError::invalid(
                    "schema",
                    ComponentKind::Relation,
                    &label,
                    format!("expected a schema key or a boolean, got {}", other),
                )
                .into())
            }
        };

        let mut views = BTreeMap::new();
        for (name, restriction) in config.child("views").iter() {
            let restriction = restriction.as_object().cloned().ok_or_else(|| {
                ConfigError::invalid("views", ComponentKind::Relation, &label, format!("view {} must be an object", name))
            })?;
            views.insert(name.to_string(), restriction);
        }

        Ok(Self {
            gateway: required("gateway")?,
            dataset: config.get_str("dataset").unwrap_or(&id).to_string(),
            adapter: required("adapter")?,
            id,
            schema_source,
            schema: None,
            views,
            extensions: Vec::new(),
            settings: config.without(&["id", "gateway", "dataset", "adapter", "schema", "views"]),
        })
    }

    /// Key of the dataset component backing this relation
    pub fn dataset_key(&self) -> String {
        format!("{}.{}", self.gateway, self.dataset)
    }

    pub fn extend(&mut self, extension: impl Into<String>) -> &mut Self {
        let extension = extension.into();
        if !self.extensions.contains(&extension) {
            self.extensions.push(extension);
        }
        self
    }
}

// =============================================================================
// Relation
// =============================================================================

/// Built relation
#[derive(Debug, Clone)]
pub struct Relation {
    name: String,
    gateway: String,
    adapter: String,
    dataset: Arc<dyn Dataset>,
    schema: Arc<Schema>,
    views: Arc<BTreeMap<String, Tuple>>,
    associations: Arc<[Association]>,
    extensions: Arc<[String]>,
    restriction: Tuple,
}

impl Relation {
    pub fn new(class: RelationClass, dataset: Arc<dyn Dataset>, schema: Schema, associations: Vec<Association>) -> Self {
        Self {
            name: class.id,
            gateway: class.gateway,
            adapter: class.adapter,
            dataset,
            schema: Arc::new(schema),
            views: Arc::new(class.views),
            associations: associations.into(),
            extensions: class.extensions.into(),
            restriction: Tuple::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn gateway(&self) -> &str {
        &self.gateway
    }

    pub fn adapter(&self) -> &str {
        &self.adapter
    }

    pub fn dataset(&self) -> &Arc<dyn Dataset> {
        &self.dataset
    }

    /// The finalized schema; the same value on every call
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn view_names(&self) -> Vec<String> {
        self.views.keys().cloned().collect()
    }

    pub fn associations(&self) -> &[Association] {
        &self.associations
    }

    pub fn association(&self, name: &str) -> Option<&Association> {
        self.associations.iter().find(|a| a.name == name)
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    pub fn has_extension(&self, name: &str) -> bool {
        self.extensions.iter().any(|e| e == name)
    }

    pub fn restriction(&self) -> &Tuple {
        &self.restriction
    }

    /// Same relation narrowed to tuples matching `conditions` as well
    pub fn restrict(&self, conditions: &Tuple) -> Relation {
        let mut next = self.clone();
        for (key, value) in conditions {
            next.restriction.insert(key.clone(), value.clone());
        }
        next
    }

    /// Relation narrowed by a named view
    pub fn view(&self, name: &str) -> Result<Relation> {
        let conditions = self.views.get(name).ok_or_else(|| {
            Error::missing(ComponentKind::Relation, format!("{}.{}", self.name, name), None)
        })?;
        Ok(self.restrict(conditions))
    }

    /// Tuples matching the current restriction
    pub fn to_vec(&self) -> Vec<Tuple> {
        self.dataset
            .to_vec()
            .into_iter()
            .filter(|t| matches(t, &self.restriction))
            .collect()
    }

    pub fn count(&self) -> usize {
        self.to_vec().len()
    }

    /// Validate against the schema, then insert
    pub fn insert(&self, tuple: Tuple) -> Result<Tuple> {
        self.schema.validate(&tuple).map_err(|reason| Error::InvalidInput {
            command: self.name.clone(),
            reason,
        })?;
        self.dataset.insert(tuple)
    }

    pub fn update(&self, changes: &Tuple) -> Result<Vec<Tuple>> {
        self.dataset.update(&self.restriction, changes)
    }

    pub fn delete(&self) -> Result<Vec<Tuple>> {
        self.dataset.delete(&self.restriction)
    }
}

// =============================================================================
// Associations
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssociationKind {
    HasMany,
    HasOne,
    BelongsTo,
}

/// Link from one relation to another
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Association {
    /// Name on the source relation (`as`, else the target)
    pub name: String,
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub kind: AssociationKind,
    /// View of the target to apply when reading
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view: Option<String>,
}

impl Association {
    pub fn from_component(component: &Component) -> Result<Self> {
        let config = component.config();
        let label = component.label();
        let required = |name: &str| {
            config
                .get_str(name)
                .map(str::to_string)
                .ok_or_else(|| ConfigError::inference(name, ComponentKind::Association, &label))
        };
        let source = required("source")?;
        let target = required("target")?;
        let kind = match config.get("type") {
            None => AssociationKind::HasMany,
            Some(value) => serde_json::from_value(value.clone()).map_err(|e| {
                ConfigError::invalid("type", ComponentKind::Association, &label, e.to_string())
            })?,
        };
        Ok(Self {
            name: config.get_str("as").unwrap_or(&target).to_string(),
            source,
            target,
            kind,
            view: config.get_str("view").map(str::to_string),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ProviderId;
    use crate::memory::MemoryDataset;
    use crate::schema::AttributeType;
    use serde_json::json;

    fn tuple(value: Value) -> Tuple {
        value.as_object().unwrap().clone()
    }

    fn component(kind: ComponentKind, config: Value) -> Component {
        Component::new(kind, ConfigNode::try_from(config).unwrap(), ProviderId::new("app")).unwrap()
    }

    fn users() -> Relation {
        let class = RelationClass::from_component(&component(
            ComponentKind::Relation,
            json!({
                "id": "users",
                "gateway": "default",
                "adapter": "memory",
                "views": {"admins": {"role": "admin"}}
            }),
        ))
        .unwrap();
        let schema = Schema::new("users")
            .attribute("id", AttributeType::Integer)
            .attribute("role", AttributeType::String);
        Relation::new(class, Arc::new(MemoryDataset::new("users")), schema, Vec::new())
    }

    #[test]
    fn test_class_defaults_dataset_to_id() {
        let class = RelationClass::from_component(&component(
            ComponentKind::Relation,
            json!({"id": "users", "gateway": "default", "adapter": "memory", "schema": "people"}),
        ))
        .unwrap();
        assert_eq!(class.dataset_key(), "default.users");
        assert_eq!(class.schema_source, SchemaSource::Component("people".into()));
    }

    #[test]
    fn test_class_requires_adapter() {
        let err = RelationClass::from_component(&component(
            ComponentKind::Relation,
            json!({"id": "users", "gateway": "default"}),
        ))
        .unwrap_err();
        assert!(matches!(err, Error::Config(ref e) if e.setting == "adapter"));
    }

    #[test]
    fn test_views_and_restrictions() {
        let users = users();
        users.insert(tuple(json!({"id": 1, "role": "admin"}))).unwrap();
        users.insert(tuple(json!({"id": 2, "role": "user"}))).unwrap();

        assert_eq!(users.count(), 2);
        assert_eq!(users.view("admins").unwrap().to_vec(), vec![tuple(json!({"id": 1, "role": "admin"}))]);
        assert_eq!(users.restrict(&tuple(json!({"id": 2}))).count(), 1);
        assert!(matches!(users.view("nope"), Err(Error::RelationMissing(_))));
    }

    #[test]
    fn test_insert_validates_schema() {
        let users = users();
        let err = users.insert(tuple(json!({"id": "one"}))).unwrap_err();
        assert!(matches!(err, Error::InvalidInput { .. }));
        assert_eq!(users.count(), 0);
    }

    #[test]
    fn test_schema_accessor_is_stable() {
        let users = users();
        assert_eq!(users.schema(), users.schema());
    }

    #[test]
    fn test_association_from_component() {
        let assoc = Association::from_component(&component(
            ComponentKind::Association,
            json!({"source": "users", "target": "tasks", "type": "has_many", "view": "open"}),
        ))
        .unwrap();
        assert_eq!(assoc.name, "tasks");
        assert_eq!(assoc.kind, AssociationKind::HasMany);
        assert_eq!(assoc.view.as_deref(), Some("open"));
    }
}
