//! Lifecycle notifications
//!
//! A process-wide table of named events and listeners. Every listener records
//! the module that subscribed it (its *source*). Registration is global and
//! append-only; isolation happens when a setup attaches: it takes an immutable
//! snapshot that drops listeners from plugin modules it did not enable.
//!
//! ## Event catalog
//!
//! | event | payload |
//! |---|---|
//! | `relations.class.ready` | relation class, adapter |
//! | `relations.schema.set` | schema, adapter, gateway, relation class, registry |
//! | `relations.object.registered` | registry, relation |
//! | `relations.registry.created` | registry |
//! | `relations.schema.allocated` | schema, relation name |
//! | `relations.dataset.allocated` | dataset, gateway |
//! | `commands.class.before_build` | command class, gateway, dataset, relation, adapter |

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};

use tracing::trace;

use crate::command::CommandClass;
use crate::error::{Error, Result};
use crate::gateway::{Dataset, Gateway};
use crate::relation::{Relation, RelationClass};
use crate::runtime::Elements;
use crate::schema::Schema;

pub const RELATION_CLASS_READY: &str = "relations.class.ready";
pub const RELATION_SCHEMA_SET: &str = "relations.schema.set";
pub const RELATION_OBJECT_REGISTERED: &str = "relations.object.registered";
pub const RELATION_REGISTRY_CREATED: &str = "relations.registry.created";
pub const RELATION_SCHEMA_ALLOCATED: &str = "relations.schema.allocated";
pub const RELATION_DATASET_ALLOCATED: &str = "relations.dataset.allocated";
pub const COMMAND_BEFORE_BUILD: &str = "commands.class.before_build";

/// Events every bus knows about
pub const CATALOG: [&str; 7] = [
    RELATION_CLASS_READY,
    RELATION_SCHEMA_SET,
    RELATION_OBJECT_REGISTERED,
    RELATION_REGISTRY_CREATED,
    RELATION_SCHEMA_ALLOCATED,
    RELATION_DATASET_ALLOCATED,
    COMMAND_BEFORE_BUILD,
];

/// Source module of the listeners the crate installs itself
pub const CORE_SOURCE: &str = "relmap::core";

static GLOBAL: LazyLock<Notifications> = LazyLock::new(Notifications::new);

// =============================================================================
// Payloads
// =============================================================================

/// Event payload; one variant per catalog event plus free-form custom events
pub enum Payload<'a> {
    RelationClassReady {
        relation: &'a mut RelationClass,
        adapter: &'a str,
    },
    RelationSchemaSet {
        schema: &'a mut Schema,
        adapter: &'a str,
        gateway: &'a str,
        relation: &'a RelationClass,
        registry: &'a Elements,
    },
    RelationObjectRegistered {
        registry: &'a Elements,
        relation: &'a Relation,
    },
    RelationRegistryCreated {
        registry: &'a Elements,
    },
    RelationSchemaAllocated {
        schema: &'a Schema,
        relation: &'a str,
    },
    RelationDatasetAllocated {
        dataset: &'a dyn Dataset,
        gateway: &'a str,
    },
    CommandBeforeBuild {
        command: &'a mut CommandClass,
        gateway: &'a dyn Gateway,
        dataset: &'a dyn Dataset,
        relation: &'a Relation,
        adapter: &'a str,
    },
    Custom {
        event: &'a str,
        data: &'a Value,
    },
}

impl Payload<'_> {
    /// Event name this payload is delivered under
    pub fn event(&self) -> &str {
        match self {
            Payload::RelationClassReady { .. } => RELATION_CLASS_READY,
            Payload::RelationSchemaSet { .. } => RELATION_SCHEMA_SET,
            Payload::RelationObjectRegistered { .. } => RELATION_OBJECT_REGISTERED,
            Payload::RelationRegistryCreated { .. } => RELATION_REGISTRY_CREATED,
            Payload::RelationSchemaAllocated { .. } => RELATION_SCHEMA_ALLOCATED,
            Payload::RelationDatasetAllocated { .. } => RELATION_DATASET_ALLOCATED,
            Payload::CommandBeforeBuild { .. } => COMMAND_BEFORE_BUILD,
            Payload::Custom { event, .. } => *event,
        }
    }
}

// =============================================================================
// Listeners
// =============================================================================

/// Listener callback
pub type Handler = Arc<dyn Fn(&mut Payload<'_>) -> Result<()> + Send + Sync>;

/// Identity of one subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

#[derive(Clone)]
pub struct Listener {
    pub id: ListenerId,
    pub event: String,
    /// Module that subscribed the listener
    pub source: String,
    handler: Handler,
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("id", &self.id)
            .field("event", &self.event)
            .field("source", &self.source)
            .finish()
    }
}

struct Inner {
    events: RwLock<BTreeSet<String>>,
    listeners: RwLock<Vec<Listener>>,
    next_id: AtomicU64,
}

/// Shared event bus. Clones share the same tables.
#[derive(Clone)]
pub struct Notifications {
    inner: Arc<Inner>,
}

impl Notifications {
    /// Bus with the event catalog and the core listeners registered
    pub fn new() -> Self {
        let bus = Self::empty();
        for event in CATALOG {
            bus.register_event(event);
        }
        crate::command::subscribe_core_listeners(&bus);
        bus
    }

    /// Bus with no events and no listeners
    pub fn empty() -> Self {
        Self {
            inner: Arc::new(Inner {
                events: RwLock::new(BTreeSet::new()),
                listeners: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// The process-wide bus
    pub fn global() -> Notifications {
        GLOBAL.clone()
    }

    /// Declare an event; returns false if it was already known
    pub fn register_event(&self, event: impl Into<String>) -> bool {
        self.inner.events.write().insert(event.into())
    }

    pub fn is_registered(&self, event: &str) -> bool {
        self.inner.events.read().contains(event)
    }

    /// Append a listener for `event`, tagged with its source module
    pub fn subscribe<F>(&self, event: &str, source: &str, handler: F) -> Result<ListenerId>
    where
        F: Fn(&mut Payload<'_>) -> Result<()> + Send + Sync + 'static,
    {
        if !self.is_registered(event) {
            return Err(Error::UnknownEvent(event.to_string()));
        }
        let id = ListenerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner.listeners.write().push(Listener {
            id,
            event: event.to_string(),
            source: source.to_string(),
            handler: Arc::new(handler),
        });
        trace!(event, source, "listener subscribed");
        Ok(id)
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.read().len()
    }

    /// Snapshot the listeners active for one setup.
    ///
    /// Listeners from `plugin_modules` are kept only when their module is in
    /// `enabled_modules`; every other listener is kept. Registration order is
    /// preserved and each listener appears once.
    pub fn attach(
        &self,
        plugin_modules: &HashSet<String>,
        enabled_modules: &HashSet<String>,
    ) -> AttachedListeners {
        let mut seen = HashSet::new();
        let listeners: Vec<Listener> = self
            .inner
            .listeners
            .read()
            .iter()
            .filter(|l| !plugin_modules.contains(&l.source) || enabled_modules.contains(&l.source))
            .filter(|l| seen.insert(l.id))
            .cloned()
            .collect();

        AttachedListeners {
            events: Arc::new(self.inner.events.read().clone()),
            listeners: listeners.into(),
        }
    }
}

impl Default for Notifications {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Notifications {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifications")
            .field("events", &self.inner.events.read().len())
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// Immutable listener snapshot owned by one finalize run
#[derive(Clone, Debug)]
pub struct AttachedListeners {
    events: Arc<BTreeSet<String>>,
    listeners: Arc<[Listener]>,
}

impl AttachedListeners {
    /// Deliver `payload` to every attached listener of its event, in order.
    ///
    /// The first handler error stops delivery and is returned.
    pub fn trigger(&self, payload: &mut Payload<'_>) -> Result<()> {
        let event = payload.event().to_string();
        if !self.events.contains(&event) {
            return Err(Error::UnknownEvent(event));
        }
        for listener in self.listeners.iter().filter(|l| l.event == event) {
            trace!(event = %event, source = %listener.source, "delivering");
            (listener.handler)(payload)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Sources of the attached listeners, in delivery order
    pub fn sources(&self) -> Vec<&str> {
        self.listeners.iter().map(|l| l.source.as_str()).collect()
    }
}
