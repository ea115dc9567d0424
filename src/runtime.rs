//! Runtime registry
//!
//! The finalized, read-only object graph. Every built element is stored in a
//! typed [`Registry`] per kind, keyed and ordered by build order. Lookups are
//! explicit: `fetch` returns the element or the kind's `*Missing` error, with a
//! fuzzy "did you mean" suggestion when a registered key is close.
//!
//! `map_with` returns a view that pipes command results through mappers, in the
//! order the mapper ids were given.

use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::command::Command;
use crate::component::ComponentKind;
use crate::error::{Error, Result};
use crate::gateway::{Dataset, Gateway};
use crate::mapper::Mapper;
use crate::relation::{Association, Relation};
use crate::schema::Schema;
use crate::Tuple;

/// Closest candidate to `key`, if any matches at all
pub fn suggest<'a, I>(key: &str, candidates: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let matcher = SkimMatcherV2::default();
    let mut best: Option<(i64, &str)> = None;
    for candidate in candidates {
        let score = matcher
            .fuzzy_match(candidate, key)
            .or_else(|| matcher.fuzzy_match(key, candidate));
        if let Some(score) = score {
            if best.map_or(true, |(s, _)| score > s) {
                best = Some((score, candidate));
            }
        }
    }
    best.map(|(_, c)| c.to_string())
}

// =============================================================================
// Registry<T>
// =============================================================================

/// Elements of one kind, in insertion order
#[derive(Clone)]
pub struct Registry<T> {
    kind: ComponentKind,
    keys: Vec<String>,
    entries: HashMap<String, T>,
}

impl<T> Registry<T> {
    pub fn new(kind: ComponentKind) -> Self {
        Self {
            kind,
            keys: Vec::new(),
            entries: HashMap::new(),
        }
    }

    pub fn kind(&self) -> ComponentKind {
        self.kind
    }

    pub(crate) fn insert(&mut self, key: impl Into<String>, value: T) {
        let key = key.into();
        if self.entries.insert(key.clone(), value).is_none() {
            self.keys.push(key);
        }
    }

    pub fn get(&self, key: &str) -> Option<&T> {
        self.entries.get(key)
    }

    /// The element under `key`, or the kind's missing-element error
    pub fn fetch(&self, key: &str) -> Result<&T> {
        self.entries.get(key).ok_or_else(|| {
            Error::missing(self.kind, key, suggest(key, self.keys.iter().map(String::as_str)))
        })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.keys
            .iter()
            .filter_map(|k| self.entries.get(k).map(|v| (k.as_str(), v)))
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl<T> fmt::Debug for Registry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("kind", &self.kind)
            .field("keys", &self.keys)
            .finish()
    }
}

// =============================================================================
// Elements
// =============================================================================

/// One built object
#[derive(Debug, Clone)]
pub enum Element {
    Gateway(Arc<dyn Gateway>),
    Dataset(Arc<dyn Dataset>),
    Schema(Arc<Schema>),
    Association(Arc<Association>),
    Relation(Arc<Relation>),
    Command(Arc<Command>),
    Mapper(Arc<Mapper>),
}

impl Element {
    pub fn kind(&self) -> ComponentKind {
        match self {
            Element::Gateway(_) => ComponentKind::Gateway,
            Element::Dataset(_) => ComponentKind::Dataset,
            Element::Schema(_) => ComponentKind::Schema,
            Element::Association(_) => ComponentKind::Association,
            Element::Relation(_) => ComponentKind::Relation,
            Element::Command(_) => ComponentKind::Command,
            Element::Mapper(_) => ComponentKind::Mapper,
        }
    }
}

/// Built elements of every kind. Filled during finalize, frozen afterwards.
#[derive(Debug, Clone)]
pub struct Elements {
    pub gateways: Registry<Arc<dyn Gateway>>,
    pub datasets: Registry<Arc<dyn Dataset>>,
    pub schemas: Registry<Arc<Schema>>,
    pub associations: Registry<Arc<Association>>,
    pub relations: Registry<Arc<Relation>>,
    pub commands: Registry<Arc<Command>>,
    pub mappers: Registry<Arc<Mapper>>,
}

impl Elements {
    pub fn new() -> Self {
        Self {
            gateways: Registry::new(ComponentKind::Gateway),
            datasets: Registry::new(ComponentKind::Dataset),
            schemas: Registry::new(ComponentKind::Schema),
            associations: Registry::new(ComponentKind::Association),
            relations: Registry::new(ComponentKind::Relation),
            commands: Registry::new(ComponentKind::Command),
            mappers: Registry::new(ComponentKind::Mapper),
        }
    }

    pub(crate) fn insert(&mut self, key: &str, element: Element) {
        match element {
            Element::Gateway(e) => self.gateways.insert(key, e),
            Element::Dataset(e) => self.datasets.insert(key, e),
            Element::Schema(e) => self.schemas.insert(key, e),
            Element::Association(e) => self.associations.insert(key, e),
            Element::Relation(e) => self.relations.insert(key, e),
            Element::Command(e) => self.commands.insert(key, e),
            Element::Mapper(e) => self.mappers.insert(key, e),
        }
    }

    pub fn contains(&self, kind: ComponentKind, key: &str) -> bool {
        self.get(kind, key).is_some()
    }

    pub fn get(&self, kind: ComponentKind, key: &str) -> Option<Element> {
        match kind {
            ComponentKind::Gateway => self.gateways.get(key).cloned().map(Element::Gateway),
            ComponentKind::Dataset => self.datasets.get(key).cloned().map(Element::Dataset),
            ComponentKind::Schema => self.schemas.get(key).cloned().map(Element::Schema),
            ComponentKind::Association => self.associations.get(key).cloned().map(Element::Association),
            ComponentKind::Relation => self.relations.get(key).cloned().map(Element::Relation),
            ComponentKind::Command => self.commands.get(key).cloned().map(Element::Command),
            ComponentKind::Mapper => self.mappers.get(key).cloned().map(Element::Mapper),
        }
    }

    pub fn fetch(&self, kind: ComponentKind, key: &str) -> Result<Element> {
        match kind {
            ComponentKind::Gateway => self.gateways.fetch(key).cloned().map(Element::Gateway),
            ComponentKind::Dataset => self.datasets.fetch(key).cloned().map(Element::Dataset),
            ComponentKind::Schema => self.schemas.fetch(key).cloned().map(Element::Schema),
            ComponentKind::Association => self.associations.fetch(key).cloned().map(Element::Association),
            ComponentKind::Relation => self.relations.fetch(key).cloned().map(Element::Relation),
            ComponentKind::Command => self.commands.fetch(key).cloned().map(Element::Command),
            ComponentKind::Mapper => self.mappers.fetch(key).cloned().map(Element::Mapper),
        }
    }

    pub fn keys(&self, kind: ComponentKind) -> &[String] {
        match kind {
            ComponentKind::Gateway => self.gateways.keys(),
            ComponentKind::Dataset => self.datasets.keys(),
            ComponentKind::Schema => self.schemas.keys(),
            ComponentKind::Association => self.associations.keys(),
            ComponentKind::Relation => self.relations.keys(),
            ComponentKind::Command => self.commands.keys(),
            ComponentKind::Mapper => self.mappers.keys(),
        }
    }
}

impl Default for Elements {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// RuntimeRegistry
// =============================================================================

/// A command piped through mappers
#[derive(Debug, Clone)]
pub struct CommandPipeline {
    command: Arc<Command>,
    mappers: Vec<Arc<Mapper>>,
}

impl CommandPipeline {
    pub fn command(&self) -> &Command {
        &self.command
    }

    pub fn mappers(&self) -> &[Arc<Mapper>] {
        &self.mappers
    }

    /// `mN(...m1(command(input)))`
    pub fn call(&self, input: Value) -> Result<Value> {
        let output = self.command.call(input)?.into_value();
        self.mappers.iter().try_fold(output, |value, m| m.call_value(value))
    }
}

/// Result of [`RuntimeRegistry::build`]
#[derive(Debug, Clone)]
pub enum Resolved {
    Element(Element),
    Pipeline(CommandPipeline),
}

/// Immutable finalized registry. Clones share the same elements.
#[derive(Debug, Clone)]
pub struct RuntimeRegistry {
    elements: Arc<Elements>,
    build_order: Arc<[(ComponentKind, String)]>,
    map_with: Vec<String>,
}

impl RuntimeRegistry {
    pub(crate) fn new(elements: Elements, build_order: Vec<(ComponentKind, String)>) -> Self {
        Self {
            elements: Arc::new(elements),
            build_order: build_order.into(),
            map_with: Vec::new(),
        }
    }

    pub fn gateways(&self) -> &Registry<Arc<dyn Gateway>> {
        &self.elements.gateways
    }

    pub fn datasets(&self) -> &Registry<Arc<dyn Dataset>> {
        &self.elements.datasets
    }

    pub fn schemas(&self) -> &Registry<Arc<Schema>> {
        &self.elements.schemas
    }

    pub fn associations(&self) -> &Registry<Arc<Association>> {
        &self.elements.associations
    }

    pub fn relations(&self) -> &Registry<Arc<Relation>> {
        &self.elements.relations
    }

    pub fn commands(&self) -> &Registry<Arc<Command>> {
        &self.elements.commands
    }

    pub fn mappers(&self) -> &Registry<Arc<Mapper>> {
        &self.elements.mappers
    }

    pub fn elements(&self) -> &Elements {
        &self.elements
    }

    /// Typed lookup of any element
    pub fn element(&self, kind: ComponentKind, key: &str) -> Result<Element> {
        self.elements.fetch(kind, key)
    }

    pub fn has(&self, kind: ComponentKind, key: &str) -> bool {
        self.elements.contains(kind, key)
    }

    /// Command `id` of `relation`
    pub fn command(&self, relation: &str, id: &str) -> Result<Arc<Command>> {
        self.commands().fetch(&format!("{}.{}", relation, id)).cloned()
    }

    /// Mapper `id` of `relation`
    pub fn mapper(&self, relation: &str, id: &str) -> Result<Arc<Mapper>> {
        self.mappers().fetch(&format!("{}.{}", relation, id)).cloned()
    }

    /// View whose command builds pipe results through `ids`.
    ///
    /// Ids without a dot are taken relative to the command's relation.
    pub fn map_with<I, S>(&self, ids: I) -> RuntimeRegistry
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut view = self.clone();
        view.map_with = ids.into_iter().map(Into::into).collect();
        view
    }

    pub fn mapped_with(&self) -> &[String] {
        &self.map_with
    }

    /// Resolve `key` in `kind`; commands resolve to a pipeline when this view
    /// has mappers
    pub fn build(&self, kind: ComponentKind, key: &str) -> Result<Resolved> {
        self.build_or_else(kind, key, |_| Err(Error::KeyNotFound(key.to_string())))
    }

    /// Like [`build`](Self::build), running `fallback` for unknown keys
    pub fn build_or_else<F>(&self, kind: ComponentKind, key: &str, fallback: F) -> Result<Resolved>
    where
        F: FnOnce(&str) -> Result<Resolved>,
    {
        if !self.has(kind, key) {
            return fallback(key);
        }
        if kind == ComponentKind::Command && !self.map_with.is_empty() {
            return self.build_command(key).map(Resolved::Pipeline);
        }
        self.element(kind, key).map(Resolved::Element)
    }

    /// The command under `key` piped through this view's mappers
    pub fn build_command(&self, key: &str) -> Result<CommandPipeline> {
        let command = self.commands().fetch(key)?.clone();
        let relation = command.relation().name().to_string();
        let mappers = self
            .map_with
            .iter()
            .map(|id| {
                let key = if id.contains('.') {
                    id.clone()
                } else {
                    format!("{}.{}", relation, id)
                };
                self.mappers().fetch(&key).cloned()
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(CommandPipeline { command, mappers })
    }

    /// Read a relation through the given mappers, in order
    pub fn map_relation<I, S>(&self, relation: &str, ids: I) -> Result<Vec<Tuple>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut tuples = self.relations().fetch(relation)?.to_vec();
        for id in ids {
            tuples = self.mapper(relation, id.as_ref())?.call_many(tuples)?;
        }
        Ok(tuples)
    }

    /// Every built element, in build order
    pub fn build_order(&self) -> &[(ComponentKind, String)] {
        &self.build_order
    }

    /// SHA-256 over the build order; equal declarations give equal fingerprints
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for (kind, key) in self.build_order.iter() {
            hasher.update(kind.as_str().as_bytes());
            hasher.update(b":");
            hasher.update(key.as_bytes());
            hasher.update(b"\n");
        }
        format!("{:x}", hasher.finalize())
    }
}
