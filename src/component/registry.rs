//! Component registry
//!
//! Components grouped by kind, in declaration order. Concrete keys are unique
//! within a kind; registering a second component under a taken key fails with
//! the kind's `*AlreadyDefined` error, which names both providers.

use std::collections::{BTreeMap, HashSet};

use tracing::{debug, warn};

use super::{Component, ComponentKind, ProviderId};
use crate::error::{Duplicate, Error, Result};
use crate::runtime::Element;
use crate::settings::ConfigNode;
use crate::setup::BuildContext;

/// Indexed collection of components owned by one provider
#[derive(Debug, Clone)]
pub struct ComponentRegistry {
    provider: ProviderId,
    components: BTreeMap<ComponentKind, Vec<Component>>,
}

impl ComponentRegistry {
    pub fn new(provider: ProviderId) -> Self {
        Self {
            provider,
            components: BTreeMap::new(),
        }
    }

    pub fn provider(&self) -> &ProviderId {
        &self.provider
    }

    /// Register a component, then its local components.
    ///
    /// Inferred components whose key is already taken are skipped. Every key
    /// is checked before anything is registered, so a failed add leaves the
    /// registry untouched.
    pub fn add(&mut self, component: Component) -> Result<()> {
        self.check(&component, component.provider(), &mut HashSet::new())?;
        self.insert(component);
        Ok(())
    }

    /// Register a component, removing any existing one with the same key
    /// first. Its local components replace theirs the same way.
    pub fn replace(&mut self, component: Component) -> Result<()> {
        let mut next = self.clone();
        next.evict(&component);
        next.add(component)?;
        *self = next;
        Ok(())
    }

    fn check<'c>(
        &self,
        component: &'c Component,
        provider: &ProviderId,
        claimed: &mut HashSet<(ComponentKind, &'c str)>,
    ) -> Result<()> {
        if let Some(key) = component.key() {
            let existing = self
                .get(component.kind(), key)
                .map(|c| c.provider().clone())
                .or_else(|| {
                    claimed
                        .contains(&(component.kind(), key))
                        .then(|| provider.clone())
                });
            match existing {
                Some(_) if component.is_inferred() => return Ok(()),
                Some(existing) => {
                    return Err(Error::already_defined(
                        component.kind(),
                        Duplicate {
                            key: key.to_string(),
                            provider: provider.clone(),
                            existing,
                        },
                    ))
                }
                None => {
                    claimed.insert((component.kind(), key));
                }
            }
        }
        component
            .local_components()
            .iter()
            .try_for_each(|local| self.check(local, &self.provider, claimed))
    }

    fn insert(&mut self, mut component: Component) {
        if let Some(key) = component.key() {
            if component.is_inferred() && self.contains_key(component.kind(), key) {
                debug!(kind = %component.kind(), key, "skipping inferred component, key taken");
                return;
            }
        }

        let locals = component.take_local_components();
        debug!(kind = %component.kind(), key = component.key().unwrap_or("-"), "component added");
        self.components
            .entry(component.kind())
            .or_default()
            .push(component);

        for local in locals {
            self.insert(local.reparent(self.provider.clone()));
        }
    }

    /// Drop whatever `component` and its non-inferred locals would collide with
    fn evict(&mut self, component: &Component) {
        if let Some(key) = component.key() {
            if let Some(old) = self.delete(component.kind(), key) {
                warn!(
                    kind = %component.kind(),
                    key,
                    previous = %old.provider(),
                    "replacing component"
                );
            }
        }
        for local in component.local_components() {
            if !local.is_inferred() {
                self.evict(local);
            }
        }
    }

    /// Remove and return the component registered under `key`
    pub fn delete(&mut self, kind: ComponentKind, key: &str) -> Option<Component> {
        let list = self.components.get_mut(&kind)?;
        let index = list.iter().position(|c| c.key() == Some(key))?;
        Some(list.remove(index))
    }

    /// Merge components from elsewhere, re-parented to this registry's
    /// provider, with `overrides` right-joined into each config
    pub fn update<I>(&mut self, components: I, overrides: &ConfigNode) -> Result<()>
    where
        I: IntoIterator<Item = Component>,
    {
        for component in components {
            let mut component = component.reparent(self.provider.clone());
            if !overrides.is_empty() {
                component = component.with(overrides)?;
            }
            self.add(component)?;
        }
        Ok(())
    }

    /// Merge every component of another registry
    pub fn merge(&mut self, other: &ComponentRegistry, overrides: &ConfigNode) -> Result<()> {
        self.update(other.iter().cloned(), overrides)
    }

    /// Build the component under `key`, or run `fallback` when there is none
    pub fn call<F>(
        &self,
        kind: ComponentKind,
        key: &str,
        cx: &mut BuildContext<'_>,
        fallback: F,
    ) -> Result<Element>
    where
        F: FnOnce(&str) -> Result<Element>,
    {
        match self.get(kind, key) {
            Some(component) => crate::setup::build_component(component, cx),
            None => fallback(key),
        }
    }

    /// Build the component under `key`; `KeyNotFound` when absent
    pub fn build(&self, kind: ComponentKind, key: &str, cx: &mut BuildContext<'_>) -> Result<Element> {
        self.call(kind, key, cx, |key| Err(Error::KeyNotFound(key.to_string())))
    }

    /// Concrete keys, in kind then declaration order
    pub fn keys(&self, kind: Option<ComponentKind>) -> Vec<String> {
        self.iter()
            .filter(|c| kind.map_or(true, |k| c.kind() == k))
            .filter_map(|c| c.key().map(str::to_string))
            .collect()
    }

    pub fn contains_key(&self, kind: ComponentKind, key: &str) -> bool {
        self.get(kind, key).is_some()
    }

    /// Concrete component under `key`; templates are never returned
    pub fn get(&self, kind: ComponentKind, key: &str) -> Option<&Component> {
        self.of_kind(kind).iter().find(|c| c.key() == Some(key))
    }

    /// Template of `kind` whose `name` setting matches
    pub fn template(&self, kind: ComponentKind, name: &str) -> Option<&Component> {
        self.of_kind(kind)
            .iter()
            .find(|c| c.is_abstract() && c.config().get_str("name") == Some(name))
    }

    /// All components of one kind, templates included, in declaration order
    pub fn of_kind(&self, kind: ComponentKind) -> &[Component] {
        self.components.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Position of a concrete component within its kind
    pub fn index_of(&self, kind: ComponentKind, key: &str) -> Option<usize> {
        self.of_kind(kind).iter().position(|c| c.key() == Some(key))
    }

    /// Every component, in kind then declaration order
    pub fn iter(&self) -> impl Iterator<Item = &Component> {
        self.components.values().flat_map(|list| list.iter())
    }

    pub fn len(&self) -> usize {
        self.components.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rewrite components in place, keeping declaration order.
    ///
    /// `f` returns the overrides to right-join into a component, if any.
    pub fn map_configs<F>(&self, mut f: F) -> Result<ComponentRegistry>
    where
        F: FnMut(&Component) -> Result<Option<ConfigNode>>,
    {
        let mut components = BTreeMap::new();
        for (kind, list) in &self.components {
            let mut mapped = Vec::with_capacity(list.len());
            for component in list {
                mapped.push(match f(component)? {
                    Some(overrides) => component.with(&overrides)?,
                    None => component.clone(),
                });
            }
            components.insert(*kind, mapped);
        }
        Ok(ComponentRegistry {
            provider: self.provider.clone(),
            components,
        })
    }
}
