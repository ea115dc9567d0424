//! Plugin registry
//!
//! Plugins are named behaviors registered per (component kind, adapter). A setup
//! enables them by name; at finalize each enabled plugin is resolved against the
//! registry, falling back to registrations for the `default` adapter, and then
//! applied to every matching component class before it is built.
//!
//! A plugin also names the module its listeners are subscribed from. Listeners
//! of plugin modules only fire for setups that enabled the plugin.

use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::{Arc, LazyLock};

use tracing::debug;

use crate::command::CommandClass;
use crate::component::ComponentKind;
use crate::error::{ConfigError, Error, Result};
use crate::gateway::GatewayClass;
use crate::mapper::MapperClass;
use crate::relation::RelationClass;
use crate::schema::Schema;
use crate::settings::ConfigNode;

/// Adapter id that matches every adapter
pub const DEFAULT_ADAPTER: &str = "default";

static GLOBAL: LazyLock<Plugins> = LazyLock::new(Plugins::new);

/// Class a plugin is applied to
pub enum PluginTarget<'a> {
    Gateway(&'a mut GatewayClass),
    Schema(&'a mut Schema),
    Relation(&'a mut RelationClass),
    Command(&'a mut CommandClass),
    Mapper(&'a mut MapperClass),
}

impl PluginTarget<'_> {
    pub fn kind(&self) -> ComponentKind {
        match self {
            PluginTarget::Gateway(_) => ComponentKind::Gateway,
            PluginTarget::Schema(_) => ComponentKind::Schema,
            PluginTarget::Relation(_) => ComponentKind::Relation,
            PluginTarget::Command(_) => ComponentKind::Command,
            PluginTarget::Mapper(_) => ComponentKind::Mapper,
        }
    }
}

/// Behavior a plugin splices into a component class
pub trait Plugin: Send + Sync {
    fn apply(&self, target: PluginTarget<'_>, options: &ConfigNode) -> Result<()>;
}

impl<F> Plugin for F
where
    F: Fn(PluginTarget<'_>, &ConfigNode) -> Result<()> + Send + Sync,
{
    fn apply(&self, target: PluginTarget<'_>, options: &ConfigNode) -> Result<()> {
        self(target, options)
    }
}

/// A registered plugin
#[derive(Clone)]
pub struct PluginDescriptor {
    pub name: String,
    pub kind: ComponentKind,
    pub adapter: String,
    /// Source module of the plugin's listeners
    pub module: String,
    pub behavior: Arc<dyn Plugin>,
    /// Options every enabling inherits
    pub defaults: ConfigNode,
}

impl PluginDescriptor {
    /// Descriptor for the `default` adapter, with the module named after the plugin
    pub fn new<P: Plugin + 'static>(name: impl Into<String>, kind: ComponentKind, behavior: P) -> Self {
        let name = name.into();
        Self {
            module: format!("plugins::{}", name),
            name,
            kind,
            adapter: DEFAULT_ADAPTER.to_string(),
            behavior: Arc::new(behavior),
            defaults: ConfigNode::new(),
        }
    }

    /// Descriptor whose behavior is a closure
    pub fn from_fn<F>(name: impl Into<String>, kind: ComponentKind, f: F) -> Self
    where
        F: Fn(PluginTarget<'_>, &ConfigNode) -> Result<()> + Send + Sync + 'static,
    {
        Self::new(name, kind, f)
    }

    pub fn adapter(mut self, adapter: impl Into<String>) -> Self {
        self.adapter = adapter.into();
        self
    }

    pub fn module(mut self, module: impl Into<String>) -> Self {
        self.module = module.into();
        self
    }

    pub fn defaults(mut self, defaults: ConfigNode) -> Self {
        self.defaults = defaults;
        self
    }
}

impl fmt::Debug for PluginDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("adapter", &self.adapter)
            .field("module", &self.module)
            .finish()
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Plugins by (kind, adapter), then name
#[derive(Debug, Default, Clone)]
pub struct PluginRegistry {
    entries: BTreeMap<(ComponentKind, String), BTreeMap<String, Arc<PluginDescriptor>>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a descriptor; the first registration of a (kind, adapter, name)
    /// triple wins and later ones fail
    pub fn register(&mut self, descriptor: PluginDescriptor) -> Result<()> {
        if matches!(descriptor.kind, ComponentKind::Dataset | ComponentKind::Association) {
            return Err(ConfigError::invalid(
                "plugins",
                descriptor.kind,
                &descriptor.name,
                "plugins apply to gateways, schemas, relations, commands and mappers",
            )
            .into());
        }
        let slot = self
            .entries
            .entry((descriptor.kind, descriptor.adapter.clone()))
            .or_default();
        if slot.contains_key(&descriptor.name) {
            return Err(Error::PluginAlreadyRegistered {
                name: descriptor.name,
                kind: descriptor.kind,
                adapter: descriptor.adapter,
            });
        }
        debug!(plugin = %descriptor.name, kind = %descriptor.kind, adapter = %descriptor.adapter, "plugin registered");
        slot.insert(descriptor.name.clone(), Arc::new(descriptor));
        Ok(())
    }

    /// Adapter-specific registration, else the `default` adapter's
    pub fn fetch(&self, kind: ComponentKind, adapter: &str, name: &str) -> Result<Arc<PluginDescriptor>> {
        let lookup = |adapter: &str| {
            self.entries
                .get(&(kind, adapter.to_string()))
                .and_then(|plugins| plugins.get(name))
                .cloned()
        };
        lookup(adapter)
            .or_else(|| lookup(DEFAULT_ADAPTER))
            .ok_or_else(|| Error::UnknownPlugin {
                name: name.to_string(),
                kind,
                adapter: adapter.to_string(),
            })
    }

    pub fn contains(&self, kind: ComponentKind, adapter: &str, name: &str) -> bool {
        self.fetch(kind, adapter, name).is_ok()
    }

    /// Modules of every registered plugin
    pub fn modules(&self) -> HashSet<String> {
        self.descriptors().map(|d| d.module.clone()).collect()
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &Arc<PluginDescriptor>> {
        self.entries.values().flat_map(|plugins| plugins.values())
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Shared, lock-guarded plugin registry. Clones share the same table.
#[derive(Debug, Clone, Default)]
pub struct Plugins {
    inner: Arc<RwLock<PluginRegistry>>,
}

impl Plugins {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry
    pub fn global() -> Plugins {
        GLOBAL.clone()
    }

    pub fn register(&self, descriptor: PluginDescriptor) -> Result<()> {
        self.inner.write().register(descriptor)
    }

    pub fn fetch(&self, kind: ComponentKind, adapter: &str, name: &str) -> Result<Arc<PluginDescriptor>> {
        self.inner.read().fetch(kind, adapter, name)
    }

    pub fn modules(&self) -> HashSet<String> {
        self.inner.read().modules()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Copy of the current table
    pub fn snapshot(&self) -> PluginRegistry {
        self.inner.read().clone()
    }
}

// =============================================================================
// Enabled plugins
// =============================================================================

/// Which components an enabled plugin applies to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginScope {
    /// Every component of the plugin's kind on this adapter
    /// (on every adapter when it is `default`)
    Adapter(String),
    /// One component, by key
    Component(String),
}

/// A plugin resolved for one setup
#[derive(Debug, Clone)]
pub struct EnabledPlugin {
    pub descriptor: Arc<PluginDescriptor>,
    pub scope: PluginScope,
    /// Enabling options over the descriptor defaults
    pub options: ConfigNode,
}

impl EnabledPlugin {
    pub fn new(descriptor: Arc<PluginDescriptor>, scope: PluginScope, options: &ConfigNode) -> Self {
        let mut options = options.clone();
        options.inherit(&descriptor.defaults);
        Self {
            descriptor,
            scope,
            options,
        }
    }

    /// Whether this plugin applies to a component of `kind` and `key` on `adapter`
    pub fn applies_to(&self, kind: ComponentKind, key: &str, adapter: &str) -> bool {
        if self.descriptor.kind != kind {
            return false;
        }
        match &self.scope {
            PluginScope::Adapter(scope) => scope == DEFAULT_ADAPTER || scope == adapter,
            PluginScope::Component(scope) => scope == key,
        }
    }

    pub fn apply(&self, target: PluginTarget<'_>) -> Result<()> {
        debug!(plugin = %self.descriptor.name, kind = %target.kind(), "applying plugin");
        self.descriptor.behavior.apply(target, &self.options)
    }
}
