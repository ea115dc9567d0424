//! Commands
//!
//! Create, update and delete operations bound to a relation. Input tuples are
//! validated against the relation schema and the result is checked against the
//! declared arity (`one` or `many`).
//!
//! Restrictable commands can be narrowed by one of their relation's views. The
//! core `commands.class.before_build` listener copies the view names onto the
//! command class before it is built.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::component::{Component, ComponentKind};
use crate::error::{ConfigError, Error, Result};
use crate::mapper::{parse_transforms, Transform};
use crate::notifications::{Notifications, Payload, COMMAND_BEFORE_BUILD, CORE_SOURCE};
use crate::relation::Relation;
use crate::Tuple;

/// Extension name recorded on restrictable command classes
pub const RESTRICTABLE: &str = "restrictable";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandType {
    Create,
    Update,
    Delete,
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CommandType::Create => "create",
            CommandType::Update => "update",
            CommandType::Delete => "delete",
        };
        f.write_str(s)
    }
}

/// Result arity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Arity {
    #[default]
    One,
    Many,
}

/// Command result
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CommandOutput {
    One(Tuple),
    Many(Vec<Tuple>),
}

impl CommandOutput {
    pub fn into_value(self) -> Value {
        match self {
            CommandOutput::One(tuple) => Value::Object(tuple),
            CommandOutput::Many(tuples) => Value::Array(tuples.into_iter().map(Value::Object).collect()),
        }
    }

    pub fn one(&self) -> Option<&Tuple> {
        match self {
            CommandOutput::One(tuple) => Some(tuple),
            CommandOutput::Many(_) => None,
        }
    }

    pub fn many(&self) -> Option<&[Tuple]> {
        match self {
            CommandOutput::Many(tuples) => Some(tuples),
            CommandOutput::One(_) => None,
        }
    }
}

// =============================================================================
// CommandClass
// =============================================================================

/// Prepared command settings
#[derive(Debug, Clone)]
pub struct CommandClass {
    pub id: String,
    pub relation: String,
    pub kind: CommandType,
    pub result: Arity,
    pub restrictable: bool,
    /// Views this command may be restricted by
    pub views: BTreeSet<String>,
    /// Applied to each input tuple before validation
    pub before: Vec<Transform>,
    /// Applied to each result tuple
    pub after: Vec<Transform>,
    pub extensions: Vec<String>,
}

impl CommandClass {
    /// `type` defaults to the id when the id names a command type; update and
    /// delete commands are restrictable unless told otherwise.
    pub fn from_component(component: &Component) -> Result<Self> {
        let config = component.config();
        let label = component.label();
        let required = |name: &str| {
            config
                .get_str(name)
                .map(str::to_string)
                .ok_or_else(|| ConfigError::inference(name, ComponentKind::Command, &label))
        };
        let id = required("id")?;

        let kind_value = config
            .get("type")
            .cloned()
            .unwrap_or_else(|| Value::String(id.clone()));
        let kind: CommandType = serde_json::from_value(kind_value).map_err(|_| match config.get("type") {
            Some(given) => ConfigError::invalid("type", ComponentKind::Command, &label, format!("unknown command type {}", given)),
            None => ConfigError::inference("type", ComponentKind::Command, &label),
        })?;

        let result = match config.get("result") {
            None => Arity::default(),
            Some(value) => serde_json::from_value(value.clone()).map_err(|e| {
                ConfigError::invalid("result", ComponentKind::Command, &label, e.to_string())
            })?,
        };

        Ok(Self {
            relation: required("relation")?,
            restrictable: config.get_bool("restrictable").unwrap_or(kind != CommandType::Create),
            kind,
            result,
            views: BTreeSet::new(),
            before: parse_transforms(config.get("before"), &label)?,
            after: parse_transforms(config.get("after"), &label)?,
            extensions: Vec::new(),
            id,
        })
    }

    pub fn key(&self) -> String {
        format!("{}.{}", self.relation, self.id)
    }

    pub fn extend(&mut self, extension: impl Into<String>) -> &mut Self {
        let extension = extension.into();
        if !self.extensions.contains(&extension) {
            self.extensions.push(extension);
        }
        self
    }
}

/// Install the listeners every bus starts with
pub(crate) fn subscribe_core_listeners(bus: &Notifications) {
    let subscribed = bus.subscribe(COMMAND_BEFORE_BUILD, CORE_SOURCE, |payload| {
        if let Payload::CommandBeforeBuild { command, relation, .. } = payload {
            if command.restrictable {
                command.views.extend(relation.view_names());
                command.extend(RESTRICTABLE);
            }
        }
        Ok(())
    });
    if let Err(e) = subscribed {
        tracing::error!(error = %e, "failed to install core listeners");
    }
}

// =============================================================================
// Command
// =============================================================================

/// Built command
#[derive(Debug, Clone)]
pub struct Command {
    id: String,
    kind: CommandType,
    result: Arity,
    restrictable: bool,
    views: Arc<BTreeSet<String>>,
    before: Arc<[Transform]>,
    after: Arc<[Transform]>,
    extensions: Arc<[String]>,
    relation: Relation,
}

impl Command {
    pub fn new(class: CommandClass, relation: Relation) -> Self {
        Self {
            id: class.id,
            kind: class.kind,
            result: class.result,
            restrictable: class.restrictable,
            views: Arc::new(class.views),
            before: class.before.into(),
            after: class.after.into(),
            extensions: class.extensions.into(),
            relation,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn key(&self) -> String {
        format!("{}.{}", self.relation.name(), self.id)
    }

    pub fn kind(&self) -> CommandType {
        self.kind
    }

    pub fn result(&self) -> Arity {
        self.result
    }

    pub fn relation(&self) -> &Relation {
        &self.relation
    }

    pub fn is_restrictable(&self) -> bool {
        self.restrictable
    }

    pub fn views(&self) -> impl Iterator<Item = &str> {
        self.views.iter().map(String::as_str)
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    /// Command over the relation narrowed by `conditions`
    pub fn restrict(&self, conditions: &Tuple) -> Command {
        let mut next = self.clone();
        next.relation = self.relation.restrict(conditions);
        next
    }

    /// Command over one of the relation's views
    pub fn view(&self, name: &str) -> Result<Command> {
        if !self.restrictable || !self.views.contains(name) {
            return Err(Error::InvalidInput {
                command: self.key(),
                reason: format!("cannot be restricted by view {:?}", name),
            });
        }
        let mut next = self.clone();
        next.relation = self.relation.view(name)?;
        Ok(next)
    }

    /// Run the command.
    ///
    /// create: `input` is a tuple or a list of tuples to insert.
    /// update: `input` is the changes tuple. delete: `input` is ignored.
    pub fn call(&self, input: Value) -> Result<CommandOutput> {
        debug!(command = %self.key(), kind = %self.kind, "command called");
        let tuples = match self.kind {
            CommandType::Create => {
                let tuples = self
                    .input_tuples(input)?
                    .into_iter()
                    .map(|tuple| self.prepare(tuple))
                    .collect::<Result<Vec<_>>>()?;
                if self.result == Arity::One && tuples.len() != 1 {
                    return Err(Error::TupleCountMismatch {
                        command: self.key(),
                        expected: "one",
                        actual: tuples.len(),
                    });
                }
                tuples
                    .into_iter()
                    .map(|tuple| self.relation.insert(tuple))
                    .collect::<Result<Vec<_>>>()?
            }
            CommandType::Update => {
                let mut changes = self.input_tuples(input)?;
                if changes.len() != 1 {
                    return Err(self.invalid("update expects a single changes tuple"));
                }
                let changes = self.prepare(changes.remove(0))?;
                self.relation.update(&changes)?
            }
            CommandType::Delete => self.relation.delete()?,
        };

        let tuples = tuples
            .into_iter()
            .map(|t| self.after.iter().try_fold(t, |t, step| step.apply(t)))
            .collect::<Result<Vec<_>>>()?;

        match self.result {
            Arity::Many => Ok(CommandOutput::Many(tuples)),
            Arity::One if tuples.len() == 1 => {
                Ok(CommandOutput::One(tuples.into_iter().next().unwrap_or_default()))
            }
            Arity::One => Err(Error::TupleCountMismatch {
                command: self.key(),
                expected: "one",
                actual: tuples.len(),
            }),
        }
    }

    fn input_tuples(&self, input: Value) -> Result<Vec<Tuple>> {
        match input {
            Value::Object(tuple) => Ok(vec![tuple]),
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::Object(tuple) => Ok(tuple),
                    other => Err(self.invalid(&format!("expected a tuple, got {}", other))),
                })
                .collect(),
            other => Err(self.invalid(&format!("expected a tuple or list of tuples, got {}", other))),
        }
    }

    fn prepare(&self, tuple: Tuple) -> Result<Tuple> {
        let tuple = self.before.iter().try_fold(tuple, |t, step| step.apply(t))?;
        self.relation
            .schema()
            .validate(&tuple)
            .map_err(|reason| self.invalid(&reason))?;
        Ok(tuple)
    }

    fn invalid(&self, reason: &str) -> Error {
        Error::InvalidInput {
            command: self.key(),
            reason: reason.to_string(),
        }
    }
}
