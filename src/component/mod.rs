//! Component declarations
//!
//! A [`Component`] is the unbuilt description of one gateway, dataset, schema,
//! relation, association, command or mapper. It carries a config snapshot, the
//! provider (the [`Setup`](crate::Setup) that declared it) and a deferred
//! [`Builder`]. Concrete components have a key derived from their config and
//! are unique within their kind. Abstract components are templates: no key,
//! never resolved, never checked for duplicates.

pub mod registry;

pub use registry::ComponentRegistry;

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, LazyLock};

use crate::error::{ConfigError, Error, Result};
use crate::runtime::Element;
use crate::settings::{ConfigNode, JoinDirection};
use crate::setup::{BuildContext, Class};

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern"));

/// Whether `s` is a valid component identifier
pub fn is_identifier(s: &str) -> bool {
    IDENTIFIER.is_match(s)
}

// =============================================================================
// Kinds and providers
// =============================================================================

/// Component kinds, in build rank order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    Gateway,
    Dataset,
    Schema,
    Association,
    Relation,
    Command,
    Mapper,
}

impl ComponentKind {
    pub const ALL: [ComponentKind; 7] = [
        ComponentKind::Gateway,
        ComponentKind::Dataset,
        ComponentKind::Schema,
        ComponentKind::Association,
        ComponentKind::Relation,
        ComponentKind::Command,
        ComponentKind::Mapper,
    ];

    /// Tie-break rank used by the build plan
    pub fn rank(self) -> usize {
        self as usize
    }

    /// Plural registry name (`relations`)
    pub fn as_str(self) -> &'static str {
        match self {
            ComponentKind::Gateway => "gateways",
            ComponentKind::Dataset => "datasets",
            ComponentKind::Schema => "schemas",
            ComponentKind::Association => "associations",
            ComponentKind::Relation => "relations",
            ComponentKind::Command => "commands",
            ComponentKind::Mapper => "mappers",
        }
    }

    /// Singular setting namespace (`relation`)
    pub fn singular(self) -> &'static str {
        match self {
            ComponentKind::Gateway => "gateway",
            ComponentKind::Dataset => "dataset",
            ComponentKind::Schema => "schema",
            ComponentKind::Association => "association",
            ComponentKind::Relation => "relation",
            ComponentKind::Command => "command",
            ComponentKind::Mapper => "mapper",
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComponentKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        ComponentKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s || k.singular() == s)
            .ok_or_else(|| format!("unknown component kind: {}", s))
    }
}

/// Identity of the setup that declared a component
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProviderId(Arc<str>);

impl ProviderId {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Builders and declarations
// =============================================================================

type BuildFn = dyn Fn(&mut Class, &mut BuildContext<'_>) -> Result<Element> + Send + Sync;

/// Deferred constructor run at finalize time, after the middleware chain
#[derive(Clone)]
pub struct Builder(Arc<BuildFn>);

impl Builder {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&mut Class, &mut BuildContext<'_>) -> Result<Element> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// The stock constructor; dispatches on the prepared class
    pub fn standard() -> Self {
        Self::new(crate::setup::builders::build_default)
    }

    pub fn call(&self, class: &mut Class, cx: &mut BuildContext<'_>) -> Result<Element> {
        (self.0)(class, cx)
    }
}

impl fmt::Debug for Builder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Builder(..)")
    }
}

/// Concrete components are addressable by key; abstract ones are templates
#[derive(Debug, Clone)]
pub enum Declaration {
    Concrete { key: String, builder: Builder },
    Abstract { builder: Builder },
}

impl Declaration {
    pub fn builder(&self) -> &Builder {
        match self {
            Declaration::Concrete { builder, .. } | Declaration::Abstract { builder } => builder,
        }
    }
}

// =============================================================================
// Component
// =============================================================================

/// A typed, unbuilt declaration
#[derive(Debug, Clone)]
pub struct Component {
    kind: ComponentKind,
    declaration: Declaration,
    config: ConfigNode,
    provider: ProviderId,
    inferred: bool,
    local_components: Vec<Component>,
}

impl Component {
    /// Concrete component with the standard builder; the key is derived from `config`
    pub fn new(kind: ComponentKind, config: ConfigNode, provider: ProviderId) -> Result<Self> {
        Self::with_builder(kind, config, provider, Builder::standard())
    }

    pub fn with_builder(
        kind: ComponentKind,
        config: ConfigNode,
        provider: ProviderId,
        builder: Builder,
    ) -> Result<Self> {
        let key = derive_key(kind, &config, &provider)?;
        Ok(Self {
            kind,
            declaration: Declaration::Concrete { key, builder },
            config,
            provider,
            inferred: false,
            local_components: Vec::new(),
        })
    }

    /// Abstract template component
    pub fn template(kind: ComponentKind, config: ConfigNode, provider: ProviderId) -> Self {
        Self {
            kind,
            declaration: Declaration::Abstract {
                builder: Builder::standard(),
            },
            config,
            provider,
            inferred: false,
            local_components: Vec::new(),
        }
    }

    pub fn kind(&self) -> ComponentKind {
        self.kind
    }

    pub fn key(&self) -> Option<&str> {
        match &self.declaration {
            Declaration::Concrete { key, .. } => Some(key),
            Declaration::Abstract { .. } => None,
        }
    }

    pub fn is_abstract(&self) -> bool {
        matches!(self.declaration, Declaration::Abstract { .. })
    }

    pub fn declaration(&self) -> &Declaration {
        &self.declaration
    }

    pub fn builder(&self) -> &Builder {
        self.declaration.builder()
    }

    pub fn config(&self) -> &ConfigNode {
        &self.config
    }

    pub fn provider(&self) -> &ProviderId {
        &self.provider
    }

    /// Adapter this component belongs to, once known
    pub fn adapter(&self) -> Option<&str> {
        self.config.get_str("adapter")
    }

    /// Whether this component was produced implicitly by another one
    pub fn is_inferred(&self) -> bool {
        self.inferred
    }

    pub fn local_components(&self) -> &[Component] {
        &self.local_components
    }

    /// Key for concrete components, provider otherwise; used in messages
    pub fn label(&self) -> String {
        match self.key() {
            Some(key) => key.to_string(),
            None => format!("{} template", self.provider),
        }
    }

    /// New component with `overrides` right-joined into the config.
    ///
    /// The key is re-derived, so overriding `id` renames the component.
    pub fn with(&self, overrides: &ConfigNode) -> Result<Component> {
        let mut next = self.clone();
        next.config = self.config.join(overrides, JoinDirection::Right);
        if let Declaration::Concrete { builder, .. } = &self.declaration {
            next.declaration = Declaration::Concrete {
                key: derive_key(self.kind, &next.config, &self.provider)?,
                builder: builder.clone(),
            };
        }
        Ok(next)
    }

    /// Copy owned by another provider
    pub fn reparent(&self, provider: ProviderId) -> Component {
        let mut next = self.clone();
        next.provider = provider.clone();
        next.local_components = self
            .local_components
            .iter()
            .map(|c| c.reparent(provider.clone()))
            .collect();
        next
    }

    /// Attach a dependent component that registers alongside this one
    pub fn with_local(mut self, component: Component) -> Component {
        self.local_components.push(component);
        self
    }

    /// Mark as implicitly produced. Registries skip inferred components whose
    /// key is already taken instead of failing.
    pub fn inferred(mut self) -> Component {
        self.inferred = true;
        self
    }

    pub(crate) fn take_local_components(&mut self) -> Vec<Component> {
        std::mem::take(&mut self.local_components)
    }
}

// =============================================================================
// Key derivation
// =============================================================================

fn identifier(
    config: &ConfigNode,
    setting: &str,
    kind: ComponentKind,
    provider: &ProviderId,
) -> Result<String> {
    match config.get(setting) {
        None | Some(serde_json::Value::Null) => {
            Err(ConfigError::inference(setting, kind, provider.as_str()).into())
        }
        Some(serde_json::Value::String(s)) if is_identifier(s) => Ok(s.clone()),
        Some(other) => Err(Error::Config(ConfigError::invalid(
            setting,
            kind,
            provider.as_str(),
            format!("{} is not an identifier", other),
        ))),
    }
}

/// Key of a concrete component of `kind` declared with `config`.
///
/// gateway/schema/relation: `id`; dataset: `gateway.id`; command and mapper:
/// `relation.id`; association: `source.as`, falling back to `source.target`.
pub fn derive_key(kind: ComponentKind, config: &ConfigNode, provider: &ProviderId) -> Result<String> {
    match kind {
        ComponentKind::Gateway | ComponentKind::Schema | ComponentKind::Relation => {
            identifier(config, "id", kind, provider)
        }
        ComponentKind::Dataset => {
            let gateway = identifier(config, "gateway", kind, provider)?;
            let id = identifier(config, "id", kind, provider)?;
            Ok(format!("{}.{}", gateway, id))
        }
        ComponentKind::Command | ComponentKind::Mapper => {
            let relation = identifier(config, "relation", kind, provider)?;
            let id = identifier(config, "id", kind, provider)?;
            Ok(format!("{}.{}", relation, id))
        }
        ComponentKind::Association => {
            let source = identifier(config, "source", kind, provider)?;
            let name = if config.get_str("as").is_some() {
                identifier(config, "as", kind, provider)?
            } else {
                identifier(config, "target", kind, provider)?
            };
            Ok(format!("{}.{}", source, name))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn provider() -> ProviderId {
        ProviderId::new("app")
    }

    fn config(value: serde_json::Value) -> ConfigNode {
        ConfigNode::try_from(value).unwrap()
    }

    #[test]
    fn test_kind_parsing_and_rank() {
        assert_eq!("relations".parse::<ComponentKind>().unwrap(), ComponentKind::Relation);
        assert_eq!("mapper".parse::<ComponentKind>().unwrap(), ComponentKind::Mapper);
        assert!("widgets".parse::<ComponentKind>().is_err());
        assert!(ComponentKind::Gateway.rank() < ComponentKind::Relation.rank());
        assert!(ComponentKind::Relation.rank() < ComponentKind::Command.rank());
    }

    #[test]
    fn test_key_derivation() {
        let c = Component::new(ComponentKind::Relation, config(json!({"id": "users"})), provider()).unwrap();
        assert_eq!(c.key(), Some("users"));

        let c = Component::new(
            ComponentKind::Command,
            config(json!({"id": "create", "relation": "users"})),
            provider(),
        )
        .unwrap();
        assert_eq!(c.key(), Some("users.create"));

        let c = Component::new(
            ComponentKind::Dataset,
            config(json!({"id": "users", "gateway": "default"})),
            provider(),
        )
        .unwrap();
        assert_eq!(c.key(), Some("default.users"));

        let c = Component::new(
            ComponentKind::Association,
            config(json!({"source": "users", "target": "tasks", "as": "todos"})),
            provider(),
        )
        .unwrap();
        assert_eq!(c.key(), Some("users.todos"));
    }

    #[test]
    fn test_missing_id_is_inference_error() {
        let err = Component::new(ComponentKind::Relation, ConfigNode::new(), provider()).unwrap_err();
        match err {
            Error::Config(e) => {
                assert_eq!(e.setting, "id");
                assert_eq!(e.reason, crate::error::ConfigErrorReason::Inference);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_non_identifier_is_invalid() {
        let err = Component::new(ComponentKind::Gateway, config(json!({"id": "9lives"})), provider())
            .unwrap_err();
        assert!(matches!(err, Error::Config(ref e) if e.reason == crate::error::ConfigErrorReason::Invalid));
    }

    #[test]
    fn test_with_rederives_key_and_keeps_receiver() {
        let c = Component::new(ComponentKind::Relation, config(json!({"id": "users"})), provider()).unwrap();
        let renamed = c.with(&config(json!({"id": "accounts", "adapter": "memory"}))).unwrap();
        assert_eq!(renamed.key(), Some("accounts"));
        assert_eq!(renamed.adapter(), Some("memory"));
        assert_eq!(c.key(), Some("users"));
        assert_eq!(c.adapter(), None);
    }

    #[test]
    fn test_template_has_no_key() {
        let t = Component::template(ComponentKind::Mapper, config(json!({"name": "base"})), provider());
        assert!(t.is_abstract());
        assert_eq!(t.key(), None);
    }

    #[test]
    fn test_reparent_propagates_to_locals() {
        let schema = Component::new(ComponentKind::Schema, config(json!({"id": "users"})), provider()).unwrap();
        let rel = Component::new(ComponentKind::Relation, config(json!({"id": "users"})), provider())
            .unwrap()
            .with_local(schema);
        let moved = rel.reparent(ProviderId::new("other"));
        assert_eq!(moved.provider().as_str(), "other");
        assert_eq!(moved.local_components()[0].provider().as_str(), "other");
    }
}
