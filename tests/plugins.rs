//! Plugin Tests
//!
//! Plugin resolution at finalize, class extension and listener isolation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};

use relmap::mapper::Transform;
use relmap::notifications::{self, Notifications};
use relmap::{ComponentKind, ConfigNode, Error, PluginDescriptor, PluginTarget, Plugins, Setup};

fn node(value: Value) -> ConfigNode {
    ConfigNode::try_from(value).unwrap()
}

fn setup(name: &str, bus: &Notifications, plugins: &Plugins) -> Setup {
    let mut setup = Setup::new(name)
        .with_notifications(bus.clone())
        .with_plugins(plugins.clone());
    setup
        .gateway("default", node(json!({"adapter": "memory"})))
        .unwrap()
        .relation("users", ConfigNode::new())
        .unwrap()
        .command("users", "create", ConfigNode::new())
        .unwrap();
    setup
}

/// Relation plugin tagging relations, with a listener counting class builds
fn audit_plugin(plugins: &Plugins, bus: &Notifications) -> Arc<AtomicUsize> {
    plugins
        .register(PluginDescriptor::from_fn(
            "audit",
            ComponentKind::Relation,
            |target, options| {
                if let PluginTarget::Relation(relation) = target {
                    let tag = options.get_str("tag").unwrap_or("audited").to_string();
                    relation.extend(tag);
                }
                Ok(())
            },
        ))
        .unwrap();

    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    bus.subscribe(notifications::RELATION_CLASS_READY, "plugins::audit", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })
    .unwrap();
    seen
}

#[test]
fn test_listeners_fire_only_for_enabling_setups() {
    let bus = Notifications::new();
    let plugins = Plugins::new();
    let seen = audit_plugin(&plugins, &bus);
    let core = Arc::new(AtomicUsize::new(0));
    let counter = core.clone();
    bus.subscribe(notifications::RELATION_CLASS_READY, "app::relations", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })
    .unwrap();

    let mut enabled = setup("enabled", &bus, &plugins);
    enabled
        .plugin("default", ComponentKind::Relation, "audit", ConfigNode::new())
        .unwrap();
    let runtime = enabled.finalize().unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 1);
    assert_eq!(core.load(Ordering::SeqCst), 1);
    assert!(runtime.relations().fetch("users").unwrap().has_extension("audited"));

    let runtime = setup("plain", &bus, &plugins).finalize().unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 1);
    assert_eq!(core.load(Ordering::SeqCst), 2);
    assert!(!runtime.relations().fetch("users").unwrap().has_extension("audited"));
}

#[test]
fn test_component_level_plugin_with_options() {
    let bus = Notifications::new();
    let plugins = Plugins::new();
    audit_plugin(&plugins, &bus);

    let mut setup = setup("app", &bus, &plugins);
    setup
        .relation(
            "posts",
            node(json!({"plugins": [{"name": "audit", "tag": "tracked"}]})),
        )
        .unwrap();
    let runtime = setup.finalize().unwrap();

    assert!(runtime.relations().fetch("posts").unwrap().has_extension("tracked"));
    assert!(runtime.relations().fetch("users").unwrap().extensions().is_empty());
}

#[test]
fn test_plugin_defaults_and_adapter_scope() {
    let bus = Notifications::new();
    let plugins = Plugins::new();
    plugins
        .register(
            PluginDescriptor::from_fn("stamp", ComponentKind::Command, |target, options| {
                if let PluginTarget::Command(command) = target {
                    let key = options.get_str("key").unwrap_or("stamped").to_string();
                    let mut values = relmap::Tuple::new();
                    values.insert(key, json!(true));
                    command.after.push(Transform::AddKeys { values });
                }
                Ok(())
            })
            .adapter("memory")
            .defaults(ConfigNode::new().with("key", "created")),
        )
        .unwrap();

    let mut setup = setup("app", &bus, &plugins);
    setup
        .plugin("memory", ComponentKind::Command, "stamp", ConfigNode::new())
        .unwrap();
    let runtime = setup.finalize().unwrap();

    let output = runtime
        .command("users", "create")
        .unwrap()
        .call(json!({"id": 1}))
        .unwrap();
    assert_eq!(output.into_value(), json!({"id": 1, "created": true}));
}

#[test]
fn test_unknown_plugin_fails_finalize() {
    let bus = Notifications::new();
    let plugins = Plugins::new();
    let mut setup = setup("app", &bus, &plugins);
    setup
        .plugin("default", ComponentKind::Relation, "missing", ConfigNode::new())
        .unwrap();

    match setup.finalize() {
        Err(Error::UnknownPlugin { name, kind, .. }) => {
            assert_eq!(name, "missing");
            assert_eq!(kind, ComponentKind::Relation);
        }
        other => panic!("expected UnknownPlugin, got {:?}", other.map(|r| r.fingerprint())),
    }
}

#[test]
fn test_component_plugins_inherited_from_defaults() {
    let bus = Notifications::new();
    let plugins = Plugins::new();
    audit_plugin(&plugins, &bus);

    let mut setup = Setup::new("app")
        .with_notifications(bus.clone())
        .with_plugins(plugins.clone());
    setup.config_mut().component.set("plugins", json!(["audit"]));
    setup
        .gateway("default", node(json!({"adapter": "memory"})))
        .unwrap()
        .relation("users", ConfigNode::new())
        .unwrap()
        .command("users", "create", ConfigNode::new())
        .unwrap();

    // the gateway and command also carry `audit`, but it only exists for relations
    let runtime = setup.finalize().unwrap();
    assert!(runtime.relations().fetch("users").unwrap().has_extension("audited"));
}

#[test]
fn test_component_plugin_for_other_adapter_fails() {
    let bus = Notifications::new();
    let plugins = Plugins::new();
    plugins
        .register(
            PluginDescriptor::from_fn("pg_only", ComponentKind::Relation, |_, _| Ok(())).adapter("sql"),
        )
        .unwrap();

    let mut setup = setup("app", &bus, &plugins);
    setup
        .relation("posts", node(json!({"plugins": ["pg_only"]})))
        .unwrap();

    match setup.finalize() {
        Err(Error::UnknownPlugin { name, kind, .. }) => {
            assert_eq!(name, "pg_only");
            assert_eq!(kind, ComponentKind::Relation);
        }
        other => panic!("expected UnknownPlugin, got {:?}", other.map(|r| r.fingerprint())),
    }
}

#[test]
fn test_shared_plugin_for_other_adapter_fails() {
    let bus = Notifications::new();
    let plugins = Plugins::new();
    plugins
        .register(
            PluginDescriptor::from_fn("pg_only", ComponentKind::Relation, |_, _| Ok(())).adapter("sql"),
        )
        .unwrap();

    let mut setup = Setup::new("app")
        .with_notifications(bus.clone())
        .with_plugins(plugins.clone());
    setup.config_mut().component.set("plugins", json!(["pg_only"]));
    setup
        .gateway("default", node(json!({"adapter": "memory"})))
        .unwrap()
        .relation("users", ConfigNode::new())
        .unwrap();

    assert!(matches!(setup.finalize(), Err(Error::UnknownPlugin { .. })));
}

#[test]
fn test_duplicate_registration_is_rejected() {
    let plugins = Plugins::new();
    let descriptor = || PluginDescriptor::from_fn("audit", ComponentKind::Relation, |_, _| Ok(()));
    plugins.register(descriptor()).unwrap();
    assert!(matches!(
        plugins.register(descriptor()),
        Err(Error::PluginAlreadyRegistered { .. })
    ));
    assert_eq!(plugins.len(), 1);
}
