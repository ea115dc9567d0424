//! File configuration for a setup
//!
//! Supports loading configuration from:
//! - Config file (relmap.toml, .relmap.toml, config/relmap.toml)
//! - The user config directory (relmap.toml)
//! - An explicit path
//! - Environment variables (RELMAP__*)
//!
//! ## Example config file (relmap.toml):
//! ```toml
//! [setup]
//! name = "app"
//!
//! [defaults.component]
//! logger = true
//!
//! [gateways.default]
//! adapter = "memory"
//!
//! [relations.users]
//! schema = { id = "integer", name = "string" }
//! views = { admins = { role = "admin" } }
//!
//! [relations.users.commands.create]
//! result = "one"
//!
//! [relations.users.mappers.public]
//! inherit = "base"
//!
//! [mapper_templates.base]
//! transforms = [{ op = "reject_keys", keys = ["password"] }]
//!
//! [[plugins]]
//! kind = "commands"
//! name = "timestamps"
//! ```

use config_crate::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::component::ComponentKind;
use crate::error::{Error, Result};
use crate::plugin::DEFAULT_ADAPTER;
use crate::relation::AssociationKind;
use crate::settings::{ConfigNode, JoinDirection};
use crate::setup::Setup;

/// Everything a setup can be declared from
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SetupConfig {
    #[serde(default)]
    pub setup: SetupSection,

    /// `component` for every kind, otherwise keyed by kind name
    #[serde(default)]
    pub defaults: BTreeMap<String, ConfigNode>,

    #[serde(default)]
    pub gateways: BTreeMap<String, ConfigNode>,

    #[serde(default)]
    pub schemas: BTreeMap<String, ConfigNode>,

    #[serde(default)]
    pub relations: BTreeMap<String, RelationConfig>,

    /// Abstract mappers that relation mappers can `inherit`
    #[serde(default)]
    pub mapper_templates: BTreeMap<String, ConfigNode>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plugins: Vec<PluginConfig>,
}

/// Setup identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupSection {
    #[serde(default = "default_name")]
    pub name: String,
}

/// A relation with the components hanging off it
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelationConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub associations: Vec<AssociationConfig>,

    #[serde(default)]
    pub commands: BTreeMap<String, ConfigNode>,

    #[serde(default)]
    pub mappers: BTreeMap<String, ConfigNode>,

    /// Relation settings (gateway, dataset, schema, views, plugins...)
    #[serde(flatten)]
    pub settings: ConfigNode,
}

/// Association from the enclosing relation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssociationConfig {
    #[serde(rename = "type")]
    pub kind: AssociationKind,

    pub target: String,

    /// `as`, `view`
    #[serde(flatten)]
    pub options: ConfigNode,
}

/// Setup-wide plugin enabling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginConfig {
    pub name: String,

    /// Kind name, singular or plural
    pub kind: String,

    #[serde(default = "default_adapter")]
    pub adapter: String,

    #[serde(flatten)]
    pub options: ConfigNode,
}

fn default_name() -> String {
    "app".to_string()
}

fn default_adapter() -> String {
    DEFAULT_ADAPTER.to_string()
}

impl Default for SetupSection {
    fn default() -> Self {
        Self { name: default_name() }
    }
}

impl SetupConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration, with `config_path` layered over the default locations
    pub fn load_from(config_path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder();

        let config_locations = ["relmap.toml", ".relmap.toml", "config/relmap.toml"];

        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        if let Some(config_dir) = directories::ProjectDirs::from("dev", "familiar", "relmap") {
            let xdg_config = config_dir.config_dir().join("relmap.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // RELMAP__GATEWAYS__DEFAULT__ADAPTER=memory
        builder = builder.add_source(
            Environment::with_prefix("RELMAP")
                .separator("__")
                .try_parsing(true),
        );

        Ok(builder.build()?.try_deserialize()?)
    }

    /// Parse a TOML document
    pub fn from_toml(content: &str) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from_str(content, FileFormat::Toml))
            .build()?;
        Ok(config.try_deserialize()?)
    }

    /// Save configuration to a file
    pub fn save(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Starter configuration: one memory gateway and a `users` relation
    pub fn sample() -> Self {
        let mut config = Self::default();
        config.gateways.insert(
            "default".to_string(),
            ConfigNode::new().with("adapter", "memory"),
        );
        let mut users = RelationConfig {
            settings: ConfigNode::new().with(
                "schema",
                serde_json::json!({"id": "integer", "name": "string"}),
            ),
            ..RelationConfig::default()
        };
        users
            .commands
            .insert("create".to_string(), ConfigNode::new().with("result", "one"));
        config.relations.insert("users".to_string(), users);
        config
    }

    /// Declare everything in this configuration on `setup`.
    ///
    /// Defaults are applied first, so every declaration sees them. Within a
    /// section, components are declared in key order.
    pub fn apply(&self, setup: &mut Setup) -> Result<()> {
        for (name, node) in &self.defaults {
            let tree = setup.config_mut();
            if name == "component" {
                tree.component = tree.component.join(node, JoinDirection::Right);
                continue;
            }
            let kind: ComponentKind = name.parse().map_err(|_: String| Error::UnknownKind {
                section: "defaults".to_string(),
                name: name.clone(),
            })?;
            let slot = tree.kind_mut(kind);
            *slot = slot.join(node, JoinDirection::Right);
        }

        for (id, node) in &self.gateways {
            setup.gateway(id, node.clone())?;
        }
        for (id, node) in &self.schemas {
            setup.schema(id, node.clone())?;
        }
        for (name, node) in &self.mapper_templates {
            setup.abstract_mapper(name, node.clone())?;
        }
        for (id, relation) in &self.relations {
            setup.relation(id, relation.settings.clone())?;
            for association in &relation.associations {
                setup.association(id, association.kind, &association.target, association.options.clone())?;
            }
            for (command, node) in &relation.commands {
                setup.command(id, command, node.clone())?;
            }
            for (mapper, node) in &relation.mappers {
                setup.mapper(id, mapper, node.clone())?;
            }
        }

        for plugin in &self.plugins {
            let kind: ComponentKind = plugin.kind.parse().map_err(|_: String| Error::UnknownKind {
                section: format!("plugins.{}", plugin.name),
                name: plugin.kind.clone(),
            })?;
            setup.plugin(&plugin.adapter, kind, &plugin.name, plugin.options.clone())?;
        }
        Ok(())
    }
}

impl Setup {
    /// Setup named after `[setup] name`, with every configured component declared
    pub fn from_config(config: &SetupConfig) -> Result<Setup> {
        let mut setup = Setup::new(&config.setup.name);
        config.apply(&mut setup)?;
        Ok(setup)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::Notifications;
    use crate::plugin::Plugins;

    const SAMPLE: &str = r#"
[setup]
name = "blog"

[defaults.command]
result = "many"

[gateways.default]
adapter = "memory"

[relations.users]
schema = { id = "integer", name = "string" }

[[relations.users.associations]]
type = "has_many"
target = "posts"

[relations.users.commands.create]
result = "one"

[relations.users.commands.delete]
type = "delete"

[relations.posts]
dataset = "posts"
"#;

    #[test]
    fn test_default_config() {
        let config = SetupConfig::default();
        assert_eq!(config.setup.name, "app");
        assert!(config.relations.is_empty());
    }

    #[test]
    fn test_parse_sections() {
        let config = SetupConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.setup.name, "blog");
        let users = &config.relations["users"];
        assert_eq!(users.associations.len(), 1);
        assert_eq!(users.associations[0].kind, AssociationKind::HasMany);
        assert!(users.settings.contains_key("schema"));
        assert!(!users.settings.contains_key("commands"));
        assert_eq!(users.commands.len(), 2);
    }

    #[test]
    fn test_apply_declares_components() {
        let config = SetupConfig::from_toml(SAMPLE).unwrap();
        let mut setup = Setup::new(&config.setup.name)
            .with_notifications(Notifications::new())
            .with_plugins(Plugins::new());
        config.apply(&mut setup).unwrap();

        let components = setup.components();
        assert!(components.contains_key(ComponentKind::Gateway, "default"));
        assert!(components.contains_key(ComponentKind::Relation, "posts"));
        assert!(components.contains_key(ComponentKind::Association, "users.posts"));
        let delete = components.get(ComponentKind::Command, "users.delete").unwrap();
        assert_eq!(delete.config().get_str("result"), Some("many"));
        let create = components.get(ComponentKind::Command, "users.create").unwrap();
        assert_eq!(create.config().get_str("result"), Some("one"));
    }

    #[test]
    fn test_unknown_default_kind() {
        let mut config = SetupConfig::default();
        config.defaults.insert("widgets".to_string(), ConfigNode::new());
        let mut setup = Setup::new("app").with_plugins(Plugins::new());
        let err = config.apply(&mut setup).unwrap_err();
        assert!(matches!(err, Error::UnknownKind { ref section, ref name }
            if section == "defaults" && name == "widgets"));
    }

    #[test]
    fn test_unknown_plugin_kind() {
        let mut config = SetupConfig::default();
        config.plugins.push(PluginConfig {
            name: "audit".to_string(),
            kind: "widget".to_string(),
            adapter: "default".to_string(),
            options: ConfigNode::new(),
        });
        let mut setup = Setup::new("app").with_plugins(Plugins::new());
        let err = config.apply(&mut setup).unwrap_err();
        assert!(matches!(err, Error::UnknownKind { ref section, .. } if section == "plugins.audit"));
    }

    #[test]
    fn test_serialize_sample() {
        let toml_str = toml::to_string_pretty(&SetupConfig::sample()).unwrap();
        assert!(toml_str.contains("[setup]"));
        assert!(toml_str.contains("[gateways.default]"));
        assert!(toml_str.contains("[relations.users"));
    }
}
