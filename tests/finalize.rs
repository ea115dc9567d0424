//! Finalize Pipeline Tests
//!
//! End-to-end declarations through finalize, against the memory adapter.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Value};

use relmap::command::CommandOutput;
use relmap::notifications::{self, Notifications};
use relmap::runtime::Resolved;
use relmap::{
    AssociationKind, Component, ComponentKind, ConfigNode, Error, Plugins, ProviderId, Setup,
};

fn node(value: Value) -> ConfigNode {
    ConfigNode::try_from(value).unwrap()
}

fn tuple(value: Value) -> relmap::Tuple {
    value.as_object().cloned().unwrap()
}

fn isolated(name: &str, bus: &Notifications) -> Setup {
    Setup::new(name)
        .with_notifications(bus.clone())
        .with_plugins(Plugins::new())
}

/// default memory gateway, `users` with an inline schema, `users.create`
fn users_setup(name: &str, bus: &Notifications) -> Setup {
    let mut setup = isolated(name, bus);
    setup
        .gateway("default", node(json!({"adapter": "memory"})))
        .unwrap()
        .relation(
            "users",
            node(json!({"schema": {"id": "integer", "name": "string"}})),
        )
        .unwrap()
        .command("users", "create", node(json!({"result": "one"})))
        .unwrap();
    setup
}

fn record_events(bus: &Notifications) -> Arc<Mutex<Vec<String>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    for event in notifications::CATALOG {
        let log = log.clone();
        bus.subscribe(event, "app::events", move |payload| {
            log.lock().push(payload.event().to_string());
            Ok(())
        })
        .unwrap();
    }
    log
}

// =============================================================================
// Registration
// =============================================================================

#[test]
fn test_duplicate_relation_is_rejected() {
    let bus = Notifications::new();
    let mut setup = users_setup("app", &bus);
    let err = setup.relation("users", ConfigNode::new()).unwrap_err();

    let duplicate = err.as_duplicate().expect("duplicate error");
    assert!(matches!(err, Error::RelationAlreadyDefined(_)));
    assert_eq!(duplicate.key, "users");
}

#[test]
fn test_component_from_another_setup_collides() {
    let bus = Notifications::new();
    let mut app = users_setup("app", &bus);
    let mut pack = isolated("pack", &bus);
    pack.relation("users", ConfigNode::new()).unwrap();

    let users = pack
        .components()
        .get(ComponentKind::Relation, "users")
        .cloned()
        .unwrap();
    assert!(matches!(app.register(users), Err(Error::RelationAlreadyDefined(_))));
}

#[test]
fn test_replace_wins() {
    let bus = Notifications::new();
    let mut setup = users_setup("app", &bus);

    let provider = ProviderId::new("override");
    let people = Component::new(
        ComponentKind::Dataset,
        node(json!({"id": "people", "gateway": "default"})),
        provider.clone(),
    )
    .unwrap()
    .inferred();
    let users = Component::new(
        ComponentKind::Relation,
        node(json!({"id": "users", "gateway": "default", "dataset": "people"})),
        provider,
    )
    .unwrap()
    .with_local(people);
    setup.replace(users).unwrap();

    let runtime = setup.finalize().unwrap();
    let users = runtime.relations().fetch("users").unwrap();
    assert_eq!(users.dataset().name(), "people");
    assert!(users.schema().is_empty());
}

#[test]
fn test_replace_swaps_inline_schema() {
    let bus = Notifications::new();
    let mut setup = users_setup("app", &bus);

    let provider = ProviderId::new("app");
    let schema = Component::new(
        ComponentKind::Schema,
        node(json!({"id": "users", "attributes": {"email": "string"}})),
        provider.clone(),
    )
    .unwrap();
    let users = Component::new(
        ComponentKind::Relation,
        node(json!({"id": "users", "gateway": "default", "schema": "users"})),
        provider,
    )
    .unwrap()
    .with_local(schema);
    setup.replace(users).unwrap();

    let runtime = setup.finalize().unwrap();
    let users = runtime.relations().fetch("users").unwrap();
    assert_eq!(users.schema().attribute_names(), vec!["email"]);
}

#[test]
fn test_failed_declaration_is_not_registered() {
    let bus = Notifications::new();
    let mut setup = isolated("app", &bus);
    setup.schema("users", node(json!({"attributes": {"id": "integer"}}))).unwrap();

    let err = setup
        .relation("users", node(json!({"schema": {"name": "string"}})))
        .unwrap_err();
    assert!(matches!(err, Error::SchemaAlreadyDefined(_)));
    assert!(!setup.components().contains_key(ComponentKind::Relation, "users"));
    assert!(!setup.components().contains_key(ComponentKind::Dataset, "default.users"));
}

// =============================================================================
// Determinism
// =============================================================================

#[test]
fn test_build_order_and_fingerprint_are_stable() {
    let run = || {
        let bus = Notifications::new();
        let events = record_events(&bus);
        let mut setup = users_setup("app", &bus);
        setup
            .relation("tasks", ConfigNode::new())
            .unwrap()
            .mapper("tasks", "plain", ConfigNode::new())
            .unwrap();
        let runtime = setup.finalize().unwrap();
        let events = events.lock().clone();
        (runtime.build_order().to_vec(), runtime.fingerprint(), events)
    };

    let (order, fingerprint, events) = run();
    let (order2, fingerprint2, events2) = run();
    assert_eq!(order, order2);
    assert_eq!(fingerprint, fingerprint2);
    assert_eq!(events, events2);

    let kinds: Vec<ComponentKind> = order.iter().map(|(k, _)| *k).collect();
    let mut sorted = kinds.clone();
    sorted.sort();
    assert_eq!(kinds, sorted);
    assert_eq!(order[0], (ComponentKind::Gateway, "default".to_string()));
    assert_eq!(fingerprint.len(), 64);
}

#[test]
fn test_lifecycle_event_order() {
    let bus = Notifications::new();
    let events = record_events(&bus);
    users_setup("app", &bus).finalize().unwrap();

    assert_eq!(
        *events.lock(),
        vec![
            notifications::RELATION_DATASET_ALLOCATED,
            notifications::RELATION_CLASS_READY,
            notifications::RELATION_SCHEMA_SET,
            notifications::RELATION_OBJECT_REGISTERED,
            notifications::RELATION_REGISTRY_CREATED,
            notifications::COMMAND_BEFORE_BUILD,
        ]
    );
}

#[test]
fn test_listener_error_aborts_finalize() {
    let bus = Notifications::new();
    bus.subscribe(notifications::RELATION_SCHEMA_SET, "app::strict", |_| {
        Err(Error::Adapter {
            adapter: "memory".to_string(),
            message: "schema rejected".to_string(),
        })
    })
    .unwrap();

    let mut setup = users_setup("app", &bus);
    assert!(matches!(setup.finalize(), Err(Error::Adapter { .. })));
    assert!(matches!(setup.finalize(), Err(Error::EnvAlreadyFinalized(_))));
}

// =============================================================================
// Schemas and relations
// =============================================================================

#[test]
fn test_schema_is_finalized_once_and_stable() {
    let bus = Notifications::new();
    let runtime = users_setup("app", &bus).finalize().unwrap();
    let users = runtime.relations().fetch("users").unwrap();

    let first = users.schema().clone();
    let second = users.schema().clone();
    assert!(first.is_finalized());
    assert_eq!(first, second);
    assert_eq!(first.attribute_names(), vec!["id", "name"]);
    assert_eq!(**runtime.schemas().fetch("users").unwrap(), first);
}

#[test]
fn test_schema_inferred_from_gateway() {
    let bus = Notifications::new();
    let events = record_events(&bus);
    let mut setup = isolated("app", &bus);
    setup
        .gateway(
            "default",
            node(json!({"adapter": "memory", "datasets": {"users": [{"id": 1, "name": "Jane"}]}})),
        )
        .unwrap()
        .relation("users", node(json!({"schema": true})))
        .unwrap();

    let runtime = setup.finalize().unwrap();
    let users = runtime.relations().fetch("users").unwrap();
    assert_eq!(users.schema().attribute_names(), vec!["id", "name"]);
    assert_eq!(users.count(), 1);
    assert!(events
        .lock()
        .iter()
        .any(|e| e == notifications::RELATION_SCHEMA_ALLOCATED));
}

#[test]
fn test_missing_relation_key_carries_suggestion() {
    let bus = Notifications::new();
    let runtime = users_setup("app", &bus).finalize().unwrap();

    let err = runtime.relations().fetch("usrs").unwrap_err();
    assert!(matches!(err, Error::RelationMissing(_)));
    let missing = err.as_missing().unwrap();
    assert_eq!(missing.key, "usrs");
    assert_eq!(missing.suggestion.as_deref(), Some("users"));
}

#[test]
fn test_command_on_undeclared_relation() {
    let bus = Notifications::new();
    let mut setup = users_setup("app", &bus);
    setup.command("posts", "create", ConfigNode::new()).unwrap();
    let err = setup.finalize().unwrap_err();
    assert!(matches!(err, Error::RelationMissing(ref m) if m.key == "posts"));
}

#[test]
fn test_associations_attach_to_source() {
    let bus = Notifications::new();
    let mut setup = users_setup("app", &bus);
    setup
        .relation("posts", ConfigNode::new())
        .unwrap()
        .association("users", AssociationKind::HasMany, "posts", ConfigNode::new())
        .unwrap()
        .association(
            "posts",
            AssociationKind::BelongsTo,
            "users",
            node(json!({"as": "author"})),
        )
        .unwrap();

    let runtime = setup.finalize().unwrap();
    let users = runtime.relations().fetch("users").unwrap();
    assert_eq!(users.association("posts").unwrap().kind, AssociationKind::HasMany);
    let posts = runtime.relations().fetch("posts").unwrap();
    assert_eq!(posts.association("author").unwrap().target, "users");
    assert!(runtime.associations().contains("posts.author"));
}

#[test]
fn test_association_to_unknown_relation() {
    let bus = Notifications::new();
    let mut setup = users_setup("app", &bus);
    setup
        .association("users", AssociationKind::HasMany, "comments", ConfigNode::new())
        .unwrap();
    assert!(matches!(setup.finalize(), Err(Error::RelationMissing(_))));
}

#[test]
fn test_dependency_cycle() {
    let bus = Notifications::new();
    let mut setup = users_setup("app", &bus);
    setup
        .relation("a", node(json!({"depends_on": ["relation:b"]})))
        .unwrap()
        .relation("b", node(json!({"depends_on": ["relation:a"]})))
        .unwrap();

    match setup.finalize() {
        Err(Error::DependencyCycle(labels)) => {
            assert!(labels.contains(&"relation:a".to_string()));
            assert!(labels.contains(&"relation:b".to_string()));
        }
        other => panic!("expected a cycle, got {:?}", other.map(|r| r.fingerprint())),
    }
}

// =============================================================================
// Configuration inheritance
// =============================================================================

#[test]
fn test_kind_and_component_defaults() {
    let bus = Notifications::new();
    let mut setup = isolated("app", &bus);
    setup
        .config_mut()
        .kind_mut(ComponentKind::Relation)
        .set("gateway", "store");
    setup
        .config_mut()
        .kind_mut(ComponentKind::Command)
        .set("result", "many");

    setup
        .gateway("store", node(json!({"adapter": "memory"})))
        .unwrap()
        .relation("users", ConfigNode::new())
        .unwrap()
        .command("users", "create", ConfigNode::new())
        .unwrap()
        .command("users", "delete", node(json!({"result": "one"})))
        .unwrap();

    let runtime = setup.finalize().unwrap();
    let users = runtime.relations().fetch("users").unwrap();
    assert_eq!(users.gateway(), "store");
    assert_eq!(users.adapter(), "memory");
    assert!(runtime.datasets().contains("store.users"));

    let create = runtime.command("users", "create").unwrap();
    let output = create.call(json!({"id": 1})).unwrap();
    assert_eq!(output.many().map(<[_]>::len), Some(1));
    let delete = runtime.command("users", "delete").unwrap();
    assert!(matches!(delete.call(Value::Null).unwrap(), CommandOutput::One(_)));
}

// =============================================================================
// Commands and mappers
// =============================================================================

#[test]
fn test_users_create_end_to_end() {
    let bus = Notifications::new();
    let runtime = users_setup("app", &bus).finalize().unwrap();

    let create = runtime.command("users", "create").unwrap();
    let output = create.call(json!({"id": 1, "name": "Jane"})).unwrap();
    assert_eq!(output.one(), Some(&tuple(json!({"id": 1, "name": "Jane"}))));
    assert_eq!(runtime.relations().fetch("users").unwrap().count(), 1);

    assert!(matches!(
        create.call(json!({"id": "one"})),
        Err(Error::InvalidInput { .. })
    ));
    assert!(matches!(
        create.call(json!([{"id": 2}, {"id": 3}])),
        Err(Error::TupleCountMismatch { actual: 2, .. })
    ));
    assert_eq!(runtime.relations().fetch("users").unwrap().count(), 1);
}

#[test]
fn test_map_with_pipes_in_given_order() {
    let bus = Notifications::new();
    let mut setup = isolated("app", &bus);
    setup
        .gateway("default", node(json!({"adapter": "memory"})))
        .unwrap()
        .relation("items", ConfigNode::new())
        .unwrap()
        .command("items", "create", ConfigNode::new())
        .unwrap()
        .mapper(
            "items",
            "m1",
            node(json!({"transforms": [{"op": "add_keys", "values": {"b": 2}}]})),
        )
        .unwrap()
        .mapper(
            "items",
            "m2",
            node(json!({"transforms": [{"op": "rename_keys", "mapping": {"a": "x"}}]})),
        )
        .unwrap();
    let runtime = setup.finalize().unwrap();

    let mapped = runtime.map_with(["m1", "m2"]);
    let output = mapped.build_command("items.create").unwrap().call(json!({"a": 1})).unwrap();
    assert_eq!(output, json!({"x": 1, "b": 2}));

    match mapped.build(ComponentKind::Command, "items.create").unwrap() {
        Resolved::Pipeline(pipeline) => assert_eq!(pipeline.mappers().len(), 2),
        Resolved::Element(_) => panic!("expected a pipeline"),
    }
    assert!(matches!(
        runtime.build(ComponentKind::Command, "items.create").unwrap(),
        Resolved::Element(_)
    ));

    let read = runtime.map_relation("items", ["m2"]).unwrap();
    assert_eq!(read, vec![tuple(json!({"x": 1}))]);
}

#[test]
fn test_mapper_fn_runs_closure() {
    let bus = Notifications::new();
    let mut setup = users_setup("app", &bus);
    setup
        .mapper_fn("users", "shout", |mut tuple| {
            if let Some(Value::String(name)) = tuple.get_mut("name") {
                *name = name.to_uppercase();
            }
            Ok(tuple)
        })
        .unwrap();
    let runtime = setup.finalize().unwrap();

    runtime
        .command("users", "create")
        .unwrap()
        .call(json!({"id": 1, "name": "jane"}))
        .unwrap();
    let read = runtime.map_relation("users", ["shout"]).unwrap();
    assert_eq!(read[0]["name"], json!("JANE"));
}

#[test]
fn test_restrictable_commands_gain_views() {
    let bus = Notifications::new();
    let mut setup = isolated("app", &bus);
    setup
        .gateway("default", node(json!({"adapter": "memory"})))
        .unwrap()
        .relation("users", node(json!({"views": {"admins": {"role": "admin"}}})))
        .unwrap()
        .command("users", "create", node(json!({"result": "many"})))
        .unwrap()
        .command("users", "update", ConfigNode::new())
        .unwrap();
    let runtime = setup.finalize().unwrap();

    let create = runtime.command("users", "create").unwrap();
    let update = runtime.command("users", "update").unwrap();
    assert!(!create.is_restrictable());
    assert_eq!(update.views().collect::<Vec<_>>(), vec!["admins"]);
    assert!(update.extensions().iter().any(|e| e == "restrictable"));

    create
        .call(json!([
            {"name": "a", "role": "admin"},
            {"name": "b", "role": "user"}
        ]))
        .unwrap();
    let updated = update
        .view("admins")
        .unwrap()
        .call(json!({"active": true}))
        .unwrap();
    assert_eq!(
        updated.one(),
        Some(&tuple(json!({"name": "a", "role": "admin", "active": true})))
    );
    assert!(matches!(create.view("admins"), Err(Error::InvalidInput { .. })));
}

#[test]
fn test_shared_gateway_instance() {
    let bus = Notifications::new();
    let gateway = Arc::new(relmap::MemoryGateway::new("shared"));
    let mut setup = isolated("app", &bus);
    setup
        .gateway_instance("default", gateway.clone())
        .unwrap()
        .relation("users", ConfigNode::new())
        .unwrap();

    let runtime = setup.finalize().unwrap();
    runtime.relations().fetch("users").unwrap().insert(tuple(json!({"id": 1}))).unwrap();
    assert_eq!(gateway.dataset_names(), vec!["users".to_string()]);
}
