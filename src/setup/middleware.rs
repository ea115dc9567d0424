//! Build middleware
//!
//! Every component build passes through an ordered chain of middleware before
//! reaching its builder. Each link may inspect or adjust the prepared class,
//! fire events, call the rest of the chain through [`Next`], and look at the
//! element that comes back. The core chain is [`Tracing`] then [`Lifecycle`].

use std::sync::Arc;

use tracing::{debug, debug_span};

use crate::component::{Builder, Component, ComponentKind};
use crate::error::Result;
use crate::notifications::Payload;
use crate::relation::SchemaSource;
use crate::runtime::Element;
use crate::schema::Schema;

use super::{BuildContext, Class};

/// One link of the build chain
pub trait BuildMiddleware: Send + Sync {
    fn call(
        &self,
        component: &Component,
        class: &mut Class,
        cx: &mut BuildContext<'_>,
        next: Next<'_>,
    ) -> Result<Element>;
}

/// The remainder of the chain, ending at the component's builder
pub struct Next<'m> {
    chain: &'m [Arc<dyn BuildMiddleware>],
    builder: &'m Builder,
}

impl<'m> Next<'m> {
    pub fn new(chain: &'m [Arc<dyn BuildMiddleware>], builder: &'m Builder) -> Self {
        Self { chain, builder }
    }

    pub fn run(self, component: &Component, class: &mut Class, cx: &mut BuildContext<'_>) -> Result<Element> {
        match self.chain.split_first() {
            Some((head, rest)) => head.call(
                component,
                class,
                cx,
                Next {
                    chain: rest,
                    builder: self.builder,
                },
            ),
            None => self.builder.call(class, cx),
        }
    }
}

/// Middleware every setup starts with
pub fn core() -> Vec<Arc<dyn BuildMiddleware>> {
    vec![Arc::new(Tracing), Arc::new(Lifecycle)]
}

// =============================================================================
// Tracing
// =============================================================================

/// Wraps each build in a span
#[derive(Debug, Clone, Copy, Default)]
pub struct Tracing;

impl BuildMiddleware for Tracing {
    fn call(
        &self,
        component: &Component,
        class: &mut Class,
        cx: &mut BuildContext<'_>,
        next: Next<'_>,
    ) -> Result<Element> {
        let span = debug_span!(
            "build",
            kind = component.kind().singular(),
            key = component.key().unwrap_or_default(),
            provider = %component.provider()
        );
        let _enter = span.enter();
        debug!("building");
        let element = next.run(component, class, cx)?;
        debug!("built");
        Ok(element)
    }
}

// =============================================================================
// Lifecycle
// =============================================================================

/// Fires the relation, dataset and command lifecycle events and resolves
/// relation schemas
#[derive(Debug, Clone, Copy, Default)]
pub struct Lifecycle;

impl Lifecycle {
    fn prepare_relation(class: &mut Class, cx: &mut BuildContext<'_>) -> Result<()> {
        let Class::Relation(rel) = class else {
            return Ok(());
        };
        let adapter = rel.adapter.clone();
        cx.trigger(&mut Payload::RelationClassReady {
            relation: &mut *rel,
            adapter: &adapter,
        })?;

        let mut schema = match rel.schema.take() {
            Some(schema) => schema,
            None => match rel.schema_source.clone() {
                SchemaSource::Component(key) => Schema::clone(&*cx.schema(&key)?),
                SchemaSource::Infer => {
                    let gateway = cx.gateway(&rel.gateway)?;
                    match gateway.infer_schema(&rel.dataset) {
                        Some(schema) => {
                            cx.trigger(&mut Payload::RelationSchemaAllocated {
                                schema: &schema,
                                relation: &rel.id,
                            })?;
                            schema
                        }
                        None => Schema::new(rel.id.clone()),
                    }
                }
                SchemaSource::Empty => Schema::new(rel.id.clone()),
            },
        };

        cx.trigger(&mut Payload::RelationSchemaSet {
            schema: &mut schema,
            adapter: &adapter,
            gateway: &rel.gateway,
            relation: &*rel,
            registry: cx.elements(),
        })?;
        schema.finalize();
        rel.schema = Some(schema);
        Ok(())
    }

    fn prepare_command(class: &mut Class, cx: &mut BuildContext<'_>) -> Result<()> {
        let Class::Command(command) = class else {
            return Ok(());
        };
        let relation = cx.relation(&command.relation)?;
        let gateway = cx.gateway(relation.gateway())?;
        cx.trigger(&mut Payload::CommandBeforeBuild {
            command: &mut *command,
            gateway: gateway.as_ref(),
            dataset: relation.dataset().as_ref(),
            relation: &relation,
            adapter: relation.adapter(),
        })
    }
}

impl BuildMiddleware for Lifecycle {
    fn call(
        &self,
        component: &Component,
        class: &mut Class,
        cx: &mut BuildContext<'_>,
        next: Next<'_>,
    ) -> Result<Element> {
        match component.kind() {
            ComponentKind::Relation => {
                Self::prepare_relation(class, cx)?;
                let element = next.run(component, class, cx)?;
                if let Element::Relation(relation) = &element {
                    cx.trigger(&mut Payload::RelationObjectRegistered {
                        registry: cx.elements(),
                        relation,
                    })?;
                }
                Ok(element)
            }
            ComponentKind::Command => {
                Self::prepare_command(class, cx)?;
                next.run(component, class, cx)
            }
            ComponentKind::Dataset => {
                let gateway = match &*class {
                    Class::Dataset(dataset) => dataset.gateway.clone(),
                    _ => String::new(),
                };
                let element = next.run(component, class, cx)?;
                if let Element::Dataset(dataset) = &element {
                    cx.trigger(&mut Payload::RelationDatasetAllocated {
                        dataset: dataset.as_ref(),
                        gateway: &gateway,
                    })?;
                }
                Ok(element)
            }
            _ => next.run(component, class, cx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{ComponentRegistry, ProviderId};
    use crate::gateway::Adapters;
    use crate::notifications::{AttachedListeners, Notifications};
    use crate::settings::ConfigNode;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::HashSet;

    struct Recorder(Arc<Mutex<Vec<String>>>);

    impl BuildMiddleware for Recorder {
        fn call(
            &self,
            component: &Component,
            class: &mut Class,
            cx: &mut BuildContext<'_>,
            next: Next<'_>,
        ) -> Result<Element> {
            self.0.lock().push(component.label());
            next.run(component, class, cx)
        }
    }

    fn listeners() -> AttachedListeners {
        Notifications::new().attach(&HashSet::new(), &HashSet::new())
    }

    #[test]
    fn test_chain_reaches_builder_through_every_link() {
        let provider = ProviderId::new("app");
        let mut registry = ComponentRegistry::new(provider.clone());
        registry
            .add(
                Component::new(
                    ComponentKind::Gateway,
                    ConfigNode::try_from(json!({"id": "default", "adapter": "memory"})).unwrap(),
                    provider.clone(),
                )
                .unwrap(),
            )
            .unwrap();

        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = core();
        chain.push(Arc::new(Recorder(log.clone())));
        let listeners = listeners();
        let adapters = Adapters::new();
        let mut cx = BuildContext::new(&provider, &registry, &listeners, &[], &adapters, &chain);

        let element = registry.build(ComponentKind::Gateway, "default", &mut cx).unwrap();
        assert_eq!(element.kind(), ComponentKind::Gateway);
        assert_eq!(*log.lock(), vec!["default".to_string()]);
        assert!(cx.elements().contains(ComponentKind::Gateway, "default"));
    }
}
