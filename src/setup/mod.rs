//! Setup and finalization
//!
//! A [`Setup`] collects declarations, turns them into components and registers
//! them. [`Setup::finalize`] then runs the one-time pipeline:
//!
//! 1. Infer implicit settings (relation adapters from their gateway, command
//!    and mapper adapters and gateways from their relation)
//! 2. Resolve enabled plugins against the plugin registry
//! 3. Attach a listener snapshot filtered by the enabled plugins, before any
//!    component is built
//! 4. Plan the build order ([`BuildPlan`])
//! 5. Build every component through the middleware chain, firing lifecycle
//!    events
//! 6. Freeze the built elements into a [`RuntimeRegistry`]
//!
//! Any error aborts finalize; no partial registry is returned and the setup
//! cannot be finalized again.

pub mod builders;
pub mod middleware;

pub use middleware::{BuildMiddleware, Next};

use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info};

use crate::command::CommandClass;
use crate::component::{Builder, Component, ComponentKind, ComponentRegistry, ProviderId};
use crate::error::{ConfigError, Error, Result};
use crate::gateway::{Adapters, DatasetClass, Gateway, GatewayClass};
use crate::graph::BuildPlan;
use crate::mapper::{CustomTransform, MapperClass, Transform};
use crate::notifications::{AttachedListeners, Notifications, Payload};
use crate::plugin::{EnabledPlugin, PluginRegistry, PluginScope, PluginTarget, Plugins, DEFAULT_ADAPTER};
use crate::relation::{Association, AssociationKind, Relation, RelationClass};
use crate::runtime::{suggest, Element, Elements, RuntimeRegistry};
use crate::schema::Schema;
use crate::settings::{ConfigNode, JoinDirection};
use crate::Tuple;

/// Gateway used when a relation does not name one
pub const DEFAULT_GATEWAY: &str = "default";

/// Plugins a declaration picked up from the setup-wide `component` defaults
pub const SHARED_PLUGINS: &str = "shared_plugins";

// =============================================================================
// Config tree
// =============================================================================

/// Setup-wide defaults.
///
/// A declaration's config is its options joined over the kind defaults
/// (options win), then inheriting whatever `component` sets. A `plugins`
/// list inherited from `component` lands under [`SHARED_PLUGINS`] instead.
#[derive(Debug, Clone)]
pub struct ConfigTree {
    /// Defaults for every kind
    pub component: ConfigNode,
    kinds: BTreeMap<ComponentKind, ConfigNode>,
}

impl ConfigTree {
    pub fn new() -> Self {
        let mut kinds = BTreeMap::new();
        kinds.insert(
            ComponentKind::Relation,
            ConfigNode::new().with("gateway", DEFAULT_GATEWAY),
        );
        Self {
            component: ConfigNode::new(),
            kinds,
        }
    }

    pub fn kind(&self, kind: ComponentKind) -> ConfigNode {
        self.kinds.get(&kind).cloned().unwrap_or_default()
    }

    pub fn kind_mut(&mut self, kind: ComponentKind) -> &mut ConfigNode {
        self.kinds.entry(kind).or_default()
    }

    /// Config for a new declaration of `kind`
    pub fn resolve(&self, kind: ComponentKind, options: &ConfigNode) -> ConfigNode {
        let mut config = self.kind(kind).join(options, JoinDirection::Right);
        if !config.contains_key("plugins") {
            if let Some(plugins) = self.component.get("plugins") {
                config.set(SHARED_PLUGINS, plugins.clone());
            }
        }
        config.inherit(&self.component.without(&["plugins"]));
        config
    }
}

impl Default for ConfigTree {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Classes
// =============================================================================

/// A component's settings, parsed and ready for plugins and middleware
#[derive(Debug, Clone)]
pub enum Class {
    Gateway(GatewayClass),
    Dataset(DatasetClass),
    Schema(Schema),
    Association(Association),
    Relation(RelationClass),
    Command(CommandClass),
    Mapper(MapperClass),
}

impl Class {
    pub fn prepare(component: &Component) -> Result<Class> {
        Ok(match component.kind() {
            ComponentKind::Gateway => Class::Gateway(GatewayClass::from_component(component)?),
            ComponentKind::Dataset => Class::Dataset(DatasetClass::from_component(component)?),
            ComponentKind::Schema => {
                Class::Schema(Schema::from_config(component.config(), &component.label())?)
            }
            ComponentKind::Association => Class::Association(Association::from_component(component)?),
            ComponentKind::Relation => Class::Relation(RelationClass::from_component(component)?),
            ComponentKind::Command => Class::Command(CommandClass::from_component(component)?),
            ComponentKind::Mapper => Class::Mapper(MapperClass::from_component(component)?),
        })
    }

    pub fn kind(&self) -> ComponentKind {
        match self {
            Class::Gateway(_) => ComponentKind::Gateway,
            Class::Dataset(_) => ComponentKind::Dataset,
            Class::Schema(_) => ComponentKind::Schema,
            Class::Association(_) => ComponentKind::Association,
            Class::Relation(_) => ComponentKind::Relation,
            Class::Command(_) => ComponentKind::Command,
            Class::Mapper(_) => ComponentKind::Mapper,
        }
    }

    pub fn plugin_target(&mut self) -> Option<PluginTarget<'_>> {
        match self {
            Class::Gateway(c) => Some(PluginTarget::Gateway(c)),
            Class::Schema(c) => Some(PluginTarget::Schema(c)),
            Class::Relation(c) => Some(PluginTarget::Relation(c)),
            Class::Command(c) => Some(PluginTarget::Command(c)),
            Class::Mapper(c) => Some(PluginTarget::Mapper(c)),
            Class::Dataset(_) | Class::Association(_) => None,
        }
    }
}

// =============================================================================
// Build context
// =============================================================================

/// State shared by every component build of one finalize run
pub struct BuildContext<'a> {
    provider: &'a ProviderId,
    components: &'a ComponentRegistry,
    listeners: &'a AttachedListeners,
    plugins: &'a [EnabledPlugin],
    adapters: &'a Adapters,
    middleware: &'a [Arc<dyn BuildMiddleware>],
    elements: Elements,
}

impl<'a> BuildContext<'a> {
    pub(crate) fn new(
        provider: &'a ProviderId,
        components: &'a ComponentRegistry,
        listeners: &'a AttachedListeners,
        plugins: &'a [EnabledPlugin],
        adapters: &'a Adapters,
        middleware: &'a [Arc<dyn BuildMiddleware>],
    ) -> Self {
        Self {
            provider,
            components,
            listeners,
            plugins,
            adapters,
            middleware,
            elements: Elements::new(),
        }
    }

    pub fn provider(&self) -> &ProviderId {
        self.provider
    }

    pub fn components(&self) -> &'a ComponentRegistry {
        self.components
    }

    pub fn adapters(&self) -> &'a Adapters {
        self.adapters
    }

    pub fn listeners(&self) -> &'a AttachedListeners {
        self.listeners
    }

    /// Elements built so far
    pub fn elements(&self) -> &Elements {
        &self.elements
    }

    pub fn trigger(&self, payload: &mut Payload<'_>) -> Result<()> {
        self.listeners.trigger(payload)
    }

    /// The element under `key`, building it first if needed
    pub fn resolve(&mut self, kind: ComponentKind, key: &str) -> Result<Element> {
        if let Some(element) = self.elements.get(kind, key) {
            return Ok(element);
        }
        let components = self.components;
        components.call(kind, key, self, |key| {
            let keys = components.keys(Some(kind));
            Err(Error::missing(kind, key, suggest(key, keys.iter().map(String::as_str))))
        })
    }

    pub fn gateway(&mut self, key: &str) -> Result<Arc<dyn Gateway>> {
        match self.resolve(ComponentKind::Gateway, key)? {
            Element::Gateway(gateway) => Ok(gateway),
            other => Err(unexpected(key, other)),
        }
    }

    pub fn dataset(&mut self, key: &str) -> Result<Arc<dyn crate::gateway::Dataset>> {
        match self.resolve(ComponentKind::Dataset, key)? {
            Element::Dataset(dataset) => Ok(dataset),
            other => Err(unexpected(key, other)),
        }
    }

    pub fn schema(&mut self, key: &str) -> Result<Arc<Schema>> {
        match self.resolve(ComponentKind::Schema, key)? {
            Element::Schema(schema) => Ok(schema),
            other => Err(unexpected(key, other)),
        }
    }

    pub fn relation(&mut self, key: &str) -> Result<Arc<Relation>> {
        match self.resolve(ComponentKind::Relation, key)? {
            Element::Relation(relation) => Ok(relation),
            other => Err(unexpected(key, other)),
        }
    }

    /// Apply every enabled plugin that matches `component`
    fn apply_plugins(&self, component: &Component, class: &mut Class) -> Result<()> {
        let adapter = match class {
            Class::Gateway(g) => g.adapter.clone(),
            Class::Relation(r) => r.adapter.clone(),
            _ => component.adapter().unwrap_or(DEFAULT_ADAPTER).to_string(),
        };
        let key = component.key().unwrap_or_default();
        for plugin in self.plugins {
            if !plugin.applies_to(component.kind(), key, &adapter) {
                continue;
            }
            if let Some(target) = class.plugin_target() {
                plugin.apply(target)?;
            }
        }
        Ok(())
    }

    pub(crate) fn into_elements(self) -> Elements {
        self.elements
    }
}

fn unexpected(key: &str, element: Element) -> Error {
    Error::Adapter {
        adapter: "core".to_string(),
        message: format!("{} resolved to a {} element", key, element.kind().singular()),
    }
}

/// Prepare, extend and build one component, storing the result
pub(crate) fn build_component(component: &Component, cx: &mut BuildContext<'_>) -> Result<Element> {
    let key = component
        .key()
        .ok_or_else(|| Error::KeyNotFound(component.label()))?;
    let mut class = Class::prepare(component)?;
    cx.apply_plugins(component, &mut class)?;

    let middleware = cx.middleware;
    let element = Next::new(middleware, component.builder()).run(component, &mut class, cx)?;
    cx.elements.insert(key, element.clone());
    Ok(element)
}

// =============================================================================
// Setup
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Unfinalized,
    Finalized,
}

#[derive(Debug, Clone)]
struct PluginRequest {
    adapter: String,
    kind: ComponentKind,
    name: String,
    options: ConfigNode,
}

/// Declaration front-end and finalize pipeline
pub struct Setup {
    provider: ProviderId,
    config: ConfigTree,
    components: ComponentRegistry,
    plugin_requests: Vec<PluginRequest>,
    notifications: Notifications,
    plugins: Plugins,
    adapters: Adapters,
    middleware: Vec<Arc<dyn BuildMiddleware>>,
    state: State,
}

impl Setup {
    /// Setup on the process-wide notification bus and plugin registry
    pub fn new(name: impl AsRef<str>) -> Self {
        let provider = ProviderId::new(name);
        Self {
            components: ComponentRegistry::new(provider.clone()),
            provider,
            config: ConfigTree::new(),
            plugin_requests: Vec::new(),
            notifications: Notifications::global(),
            plugins: Plugins::global(),
            adapters: Adapters::new(),
            middleware: middleware::core(),
            state: State::Unfinalized,
        }
    }

    pub fn with_notifications(mut self, notifications: Notifications) -> Self {
        self.notifications = notifications;
        self
    }

    pub fn with_plugins(mut self, plugins: Plugins) -> Self {
        self.plugins = plugins;
        self
    }

    pub fn with_adapters(mut self, adapters: Adapters) -> Self {
        self.adapters = adapters;
        self
    }

    /// Append a middleware; it runs inside the core ones, closest to the builder
    pub fn use_middleware<M: BuildMiddleware + 'static>(&mut self, middleware: M) -> &mut Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    pub fn provider(&self) -> &ProviderId {
        &self.provider
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_finalized(&self) -> bool {
        self.state == State::Finalized
    }

    pub fn config(&self) -> &ConfigTree {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut ConfigTree {
        &mut self.config
    }

    pub fn components(&self) -> &ComponentRegistry {
        &self.components
    }

    pub fn notifications(&self) -> &Notifications {
        &self.notifications
    }

    pub fn plugins(&self) -> &Plugins {
        &self.plugins
    }

    pub fn adapters_mut(&mut self) -> &mut Adapters {
        &mut self.adapters
    }

    fn ensure_unfinalized(&self) -> Result<()> {
        match self.state {
            State::Unfinalized => Ok(()),
            State::Finalized => Err(Error::EnvAlreadyFinalized(self.provider.clone())),
        }
    }

    fn declare(&mut self, component: Component) -> Result<&mut Self> {
        self.ensure_unfinalized()?;
        self.components.add(component)?;
        Ok(self)
    }

    // -------------------------------------------------------------------------
    // Declarations
    // -------------------------------------------------------------------------

    /// Gateway built by its adapter (`adapter`, or `type`) at finalize
    pub fn gateway(&mut self, id: &str, options: ConfigNode) -> Result<&mut Self> {
        let mut config = self.config.resolve(ComponentKind::Gateway, &options);
        config.set("id", id);
        let component = Component::new(ComponentKind::Gateway, config, self.provider.clone())?;
        self.declare(component)
    }

    /// Gateway wrapping an existing instance; building it returns the same instance
    pub fn gateway_instance(&mut self, id: &str, gateway: Arc<dyn Gateway>) -> Result<&mut Self> {
        let config = ConfigNode::new()
            .with("id", id)
            .with("adapter", gateway.adapter());
        let builder = Builder::new(move |_, _| Ok(Element::Gateway(gateway.clone())));
        let component = Component::with_builder(ComponentKind::Gateway, config, self.provider.clone(), builder)?;
        self.declare(component)
    }

    pub fn dataset(&mut self, gateway: &str, id: &str, options: ConfigNode) -> Result<&mut Self> {
        let mut config = self.config.resolve(ComponentKind::Dataset, &options);
        config.set("id", id).set("gateway", gateway);
        let component = Component::new(ComponentKind::Dataset, config, self.provider.clone())?;
        self.declare(component)
    }

    /// Schema with `attributes` (`{name: type}` or a list) and `primary_key`
    pub fn schema(&mut self, id: &str, options: ConfigNode) -> Result<&mut Self> {
        let mut config = self.config.resolve(ComponentKind::Schema, &options);
        config.set("id", id);
        let component = Component::new(ComponentKind::Schema, config, self.provider.clone())?;
        self.declare(component)
    }

    /// Relation over `dataset` (default: the id) of `gateway` (default: `default`).
    ///
    /// `schema` may name a schema component, be `true` to infer it from the
    /// gateway, or be an inline schema: either `{attributes, primary_key}` or a
    /// bare `{name: type}` map. Inline schemas register as schema `id`. The
    /// dataset registers implicitly unless already declared.
    pub fn relation(&mut self, id: &str, options: ConfigNode) -> Result<&mut Self> {
        let mut config = self.config.resolve(ComponentKind::Relation, &options);
        config.set("id", id);
        let gateway = config.get_str("gateway").unwrap_or(DEFAULT_GATEWAY).to_string();
        let dataset = config.get_str("dataset").unwrap_or(id).to_string();
        config.set("gateway", gateway.as_str());

        let inline_schema = match config.get("schema") {
            Some(Value::Object(map)) => {
                let node = ConfigNode::from(map.clone());
                let mut schema = if node.contains_key("attributes") {
                    node
                } else {
                    ConfigNode::new().with("attributes", node.to_value())
                };
                schema.set("id", id);
                Some(schema)
            }
            _ => None,
        };
        if inline_schema.is_some() {
            config.set("schema", id);
        }

        let provider = self.provider.clone();
        let dataset = Component::new(
            ComponentKind::Dataset,
            ConfigNode::new().with("id", dataset).with("gateway", gateway),
            provider.clone(),
        )?
        .inferred();
        let mut component = Component::new(ComponentKind::Relation, config, provider.clone())?.with_local(dataset);
        if let Some(schema) = inline_schema {
            component = component.with_local(Component::new(ComponentKind::Schema, schema, provider)?);
        }
        self.declare(component)
    }

    /// Association from `source` to `target`; `as` renames it, `view` narrows it
    pub fn association(
        &mut self,
        source: &str,
        kind: AssociationKind,
        target: &str,
        options: ConfigNode,
    ) -> Result<&mut Self> {
        let mut config = self.config.resolve(ComponentKind::Association, &options);
        config
            .set("source", source)
            .set("target", target)
            .set("type", serde_json::to_value(kind)?);
        let component = Component::new(ComponentKind::Association, config, self.provider.clone())?;
        self.declare(component)
    }

    /// Command `id` on `relation`; `type` defaults to the id
    pub fn command(&mut self, relation: &str, id: &str, options: ConfigNode) -> Result<&mut Self> {
        let mut config = self.config.resolve(ComponentKind::Command, &options);
        config.set("id", id).set("relation", relation);
        let component = Component::new(ComponentKind::Command, config, self.provider.clone())?;
        self.declare(component)
    }

    /// Several commands on one relation, each with default options
    pub fn commands(&mut self, relation: &str, ids: &[&str]) -> Result<&mut Self> {
        for id in ids {
            self.command(relation, id, ConfigNode::new())?;
        }
        Ok(self)
    }

    /// Mapper `id` on `relation`.
    ///
    /// `inherit` names a mapper template, or another mapper of the same
    /// relation. The parent's transforms run first and its other settings are
    /// inherited unless set here.
    pub fn mapper(&mut self, relation: &str, id: &str, options: ConfigNode) -> Result<&mut Self> {
        let mut config = self.config.resolve(ComponentKind::Mapper, &options);
        config.set("id", id).set("relation", relation);
        if let Some(parent) = config.get_str("inherit").map(str::to_string) {
            config = self.inherit_mapper(relation, &parent, config)?;
        }
        let component = Component::new(ComponentKind::Mapper, config, self.provider.clone())?;
        self.declare(component)
    }

    /// Mapper running a closure over each tuple
    pub fn mapper_fn<F>(&mut self, relation: &str, id: &str, f: F) -> Result<&mut Self>
    where
        F: Fn(Tuple) -> Result<Tuple> + Send + Sync + 'static,
    {
        let mut config = self.config.resolve(ComponentKind::Mapper, &ConfigNode::new());
        config.set("id", id).set("relation", relation);
        let transform = CustomTransform::new(f);
        let builder = Builder::new(move |class, cx| {
            if let Class::Mapper(mapper) = class {
                mapper.transforms.push(Transform::Custom(transform.clone()));
            }
            builders::build_default(class, cx)
        });
        let component = Component::with_builder(ComponentKind::Mapper, config, self.provider.clone(), builder)?;
        self.declare(component)
    }

    /// Mapper template other mappers can `inherit`
    pub fn abstract_mapper(&mut self, name: &str, options: ConfigNode) -> Result<&mut Self> {
        let mut config = self.config.resolve(ComponentKind::Mapper, &options);
        config.set("name", name);
        let component = Component::template(ComponentKind::Mapper, config, self.provider.clone());
        self.declare(component)
    }

    fn inherit_mapper(&self, relation: &str, parent: &str, mut config: ConfigNode) -> Result<ConfigNode> {
        let parent_component = self
            .components
            .template(ComponentKind::Mapper, parent)
            .or_else(|| {
                self.components
                    .get(ComponentKind::Mapper, &format!("{}.{}", relation, parent))
            })
            .ok_or_else(|| {
                let keys = self.components.keys(Some(ComponentKind::Mapper));
                Error::missing(
                    ComponentKind::Mapper,
                    parent,
                    suggest(parent, keys.iter().map(String::as_str)),
                )
            })?;
        let parent_config = parent_component.config();

        let mut transforms = match parent_config.get("transforms") {
            Some(Value::Array(items)) => items.clone(),
            _ => Vec::new(),
        };
        if let Some(Value::Array(own)) = config.get("transforms") {
            transforms.extend(own.iter().cloned());
        }
        config.set("transforms", Value::Array(transforms));
        config.inherit(&parent_config.without(&["id", "name", "relation", "inherit", "transforms"]));
        Ok(config)
    }

    /// Enable plugin `name` for every component of `kind` on `adapter`
    /// (`default` covers every adapter)
    pub fn plugin(&mut self, adapter: &str, kind: ComponentKind, name: &str, options: ConfigNode) -> Result<&mut Self> {
        self.ensure_unfinalized()?;
        self.plugin_requests.push(PluginRequest {
            adapter: adapter.to_string(),
            kind,
            name: name.to_string(),
            options,
        });
        Ok(self)
    }

    /// Register a component declared elsewhere; it is re-parented to this setup
    pub fn register(&mut self, component: Component) -> Result<&mut Self> {
        self.ensure_unfinalized()?;
        self.components.update([component], &ConfigNode::new())?;
        Ok(self)
    }

    /// Register a component, replacing any with the same key
    pub fn replace(&mut self, component: Component) -> Result<&mut Self> {
        self.ensure_unfinalized()?;
        self.components.replace(component.reparent(self.provider.clone()))?;
        Ok(self)
    }

    // -------------------------------------------------------------------------
    // Finalize
    // -------------------------------------------------------------------------

    /// Build everything. A setup finalizes once, successful or not.
    pub fn finalize(&mut self) -> Result<RuntimeRegistry> {
        self.ensure_unfinalized()?;
        self.state = State::Finalized;
        info!(setup = %self.provider, components = self.components.len(), "finalizing");

        let components = self.resolve_components()?;
        let enabled = self.enabled_plugins(&components)?;
        let enabled_modules: HashSet<String> = enabled
            .iter()
            .map(|p| p.descriptor.module.clone())
            .collect();
        let listeners = self.notifications.attach(&self.plugins.modules(), &enabled_modules);
        debug!(listeners = listeners.len(), plugins = enabled.len(), "listeners attached");

        let plan = BuildPlan::new(&components)?;
        let order: Vec<(ComponentKind, String)> = plan.order().map(|n| (n.kind, n.key.clone())).collect();
        let last_relation = order.iter().rposition(|(kind, _)| *kind == ComponentKind::Relation);

        let mut cx = BuildContext::new(
            &self.provider,
            &components,
            &listeners,
            &enabled,
            &self.adapters,
            &self.middleware,
        );
        for (step, (kind, key)) in order.iter().enumerate() {
            if !cx.elements().contains(*kind, key) {
                components.build(*kind, key, &mut cx)?;
            }
            if Some(step) == last_relation {
                cx.trigger(&mut Payload::RelationRegistryCreated {
                    registry: cx.elements(),
                })?;
            }
        }
        if last_relation.is_none() {
            cx.trigger(&mut Payload::RelationRegistryCreated {
                registry: cx.elements(),
            })?;
        }

        let runtime = RuntimeRegistry::new(cx.into_elements(), order);
        info!(
            setup = %self.provider,
            relations = runtime.relations().len(),
            commands = runtime.commands().len(),
            mappers = runtime.mappers().len(),
            fingerprint = %runtime.fingerprint(),
            "finalized"
        );
        Ok(runtime)
    }

    /// Build plan for the current declarations, without building anything
    pub fn plan(&self) -> Result<BuildPlan> {
        BuildPlan::new(&self.resolve_components()?)
    }

    /// Copy of the registry with implicit adapter and gateway settings filled in
    pub fn resolve_components(&self) -> Result<ComponentRegistry> {
        let source = &self.components;
        source.map_configs(|component| {
            if component.is_abstract() {
                return Ok(None);
            }
            match component.kind() {
                ComponentKind::Relation if component.adapter().is_none() => {
                    let adapter = relation_adapter(source, component)?;
                    Ok(Some(ConfigNode::new().with("adapter", adapter)))
                }
                ComponentKind::Command | ComponentKind::Mapper => {
                    let Some(relation) = component
                        .config()
                        .get_str("relation")
                        .and_then(|key| source.get(ComponentKind::Relation, key))
                    else {
                        // reported by the build plan
                        return Ok(None);
                    };
                    let mut overrides = ConfigNode::new();
                    if component.adapter().is_none() {
                        overrides.set("adapter", relation_adapter(source, relation)?);
                    }
                    if component.config().get_str("gateway").is_none() {
                        if let Some(gateway) = relation.config().get_str("gateway") {
                            overrides.set("gateway", gateway);
                        }
                    }
                    Ok((!overrides.is_empty()).then_some(overrides))
                }
                _ => Ok(None),
            }
        })
    }

    /// Setup-level plugin requests, then per-component `plugins` settings
    fn enabled_plugins(&self, components: &ComponentRegistry) -> Result<Vec<EnabledPlugin>> {
        let registry = self.plugins.snapshot();
        let mut enabled = Vec::new();

        for request in &self.plugin_requests {
            let descriptor = registry.fetch(request.kind, &request.adapter, &request.name)?;
            enabled.push(EnabledPlugin::new(
                descriptor,
                PluginScope::Adapter(request.adapter.clone()),
                &request.options,
            ));
        }

        for component in components.iter() {
            let Some(key) = component.key() else { continue };
            let adapter = component.adapter().unwrap_or(DEFAULT_ADAPTER);
            for entry in plugin_entries(component)? {
                match registry.fetch(component.kind(), adapter, &entry.name) {
                    Ok(descriptor) => enabled.push(EnabledPlugin::new(
                        descriptor,
                        PluginScope::Component(key.to_string()),
                        &entry.options,
                    )),
                    // shared default meant for another kind
                    Err(_) if entry.shared && !registered_for(&registry, component.kind(), &entry.name) => {}
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(enabled)
    }
}

impl std::fmt::Debug for Setup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Setup")
            .field("provider", &self.provider)
            .field("state", &self.state)
            .field("components", &self.components.len())
            .finish()
    }
}

/// Adapter of a relation: its own, else its gateway's
fn relation_adapter(registry: &ComponentRegistry, relation: &Component) -> Result<String> {
    if let Some(adapter) = relation.adapter() {
        return Ok(adapter.to_string());
    }
    let label = relation.label();
    let gateway_key = relation
        .config()
        .get_str("gateway")
        .ok_or_else(|| ConfigError::inference("gateway", ComponentKind::Relation, &label))?;
    let gateway = registry
        .get(ComponentKind::Gateway, gateway_key)
        .ok_or_else(|| {
            let keys = registry.keys(Some(ComponentKind::Gateway));
            Error::missing(
                ComponentKind::Gateway,
                gateway_key,
                suggest(gateway_key, keys.iter().map(String::as_str)),
            )
        })?;
    gateway
        .config()
        .get_str("adapter")
        .or_else(|| gateway.config().get_str("type"))
        .map(str::to_string)
        .ok_or_else(|| ConfigError::inference("adapter", ComponentKind::Relation, &label).into())
}

/// One entry of a component's plugin list
#[derive(Debug, Clone)]
struct PluginEntry {
    name: String,
    options: ConfigNode,
    /// Inherited from the setup-wide defaults
    shared: bool,
}

/// `plugins = ["name", {name = "other", option = 1}]`, then the shared ones
fn plugin_entries(component: &Component) -> Result<Vec<PluginEntry>> {
    let invalid = |detail: String| {
        Error::from(ConfigError::invalid(
            "plugins",
            component.kind(),
            component.label(),
            detail,
        ))
    };
    let mut entries = Vec::new();
    for (setting, shared) in [("plugins", false), (SHARED_PLUGINS, true)] {
        let items = match component.config().get(setting) {
            None | Some(Value::Null) => continue,
            Some(Value::Array(items)) => items.clone(),
            Some(single) => vec![single.clone()],
        };
        for item in items {
            let (name, options) = match item {
                Value::String(name) => (name, ConfigNode::new()),
                Value::Object(map) => {
                    let mut options = ConfigNode::from(map);
                    match options.remove("name") {
                        Some(Value::String(name)) => (name, options),
                        _ => return Err(invalid("plugin entries need a name".to_string())),
                    }
                }
                other => return Err(invalid(format!("unexpected plugin entry {}", other))),
            };
            entries.push(PluginEntry { name, options, shared });
        }
    }
    Ok(entries)
}

/// Whether `name` is registered for `kind` under any adapter
fn registered_for(registry: &PluginRegistry, kind: ComponentKind, name: &str) -> bool {
    registry.descriptors().any(|d| d.kind == kind && d.name == name)
}
