//! Error types for the component registry

use std::fmt;

use thiserror::Error;

use crate::component::{ComponentKind, ProviderId};

/// Result type for registry operations
pub type Result<T> = std::result::Result<T, Error>;

/// Why a setting could not be resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigErrorReason {
    /// The setting was not given and could not be inferred
    Inference,
    /// The setting was given but is not valid
    Invalid,
}

/// A required setting could not be inferred or is invalid for its component
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    /// Setting name (e.g. `adapter`)
    pub setting: String,
    /// Kind of the owning component
    pub kind: ComponentKind,
    /// Owning component (key, or provider when no key is known yet)
    pub component: String,
    pub reason: ConfigErrorReason,
    /// Extra detail for invalid settings
    pub detail: Option<String>,
}

impl ConfigError {
    pub fn inference(setting: impl Into<String>, kind: ComponentKind, component: impl Into<String>) -> Self {
        Self {
            setting: setting.into(),
            kind,
            component: component.into(),
            reason: ConfigErrorReason::Inference,
            detail: None,
        }
    }

    pub fn invalid(
        setting: impl Into<String>,
        kind: ComponentKind,
        component: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            setting: setting.into(),
            kind,
            component: component.into(),
            reason: ConfigErrorReason::Invalid,
            detail: Some(detail.into()),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let key = format!("{}.{}", self.kind.singular(), self.setting);
        match self.reason {
            ConfigErrorReason::Inference => {
                write!(f, "Failed to infer +{}+ setting for {}", key, self.component)
            }
            ConfigErrorReason::Invalid => {
                write!(f, "{} {} setting is not valid", self.component, key)?;
                if let Some(detail) = &self.detail {
                    write!(f, ": {}", detail)?;
                }
                Ok(())
            }
        }
    }
}

/// Two components claimed the same key within one kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Duplicate {
    pub key: String,
    /// Provider of the rejected component
    pub provider: ProviderId,
    /// Provider of the component already registered
    pub existing: ProviderId,
}

impl fmt::Display for Duplicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: +{}+ is already defined by {}",
            self.provider, self.key, self.existing
        )
    }
}

/// A key was looked up in a registry that does not contain it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Missing {
    pub key: String,
    /// Registry that was searched
    pub registry: ComponentKind,
    /// Closest registered key, if any scored
    pub suggestion: Option<String>,
}

impl fmt::Display for Missing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} doesn't exist in {} registry", self.key, self.registry)?;
        if let Some(suggestion) = &self.suggestion {
            write!(f, " (did you mean {:?}?)", suggestion)?;
        }
        Ok(())
    }
}

/// Registry errors
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("gateway already defined: {0}")]
    GatewayAlreadyDefined(Duplicate),

    #[error("dataset already defined: {0}")]
    DatasetAlreadyDefined(Duplicate),

    #[error("schema already defined: {0}")]
    SchemaAlreadyDefined(Duplicate),

    #[error("relation already defined: {0}")]
    RelationAlreadyDefined(Duplicate),

    #[error("association already defined: {0}")]
    AssociationAlreadyDefined(Duplicate),

    #[error("command already defined: {0}")]
    CommandAlreadyDefined(Duplicate),

    #[error("mapper already defined: {0}")]
    MapperAlreadyDefined(Duplicate),

    #[error("{0}")]
    GatewayMissing(Missing),

    #[error("{0}")]
    DatasetMissing(Missing),

    #[error("{0}")]
    SchemaMissing(Missing),

    #[error("{0}")]
    RelationMissing(Missing),

    #[error("{0}")]
    AssociationMissing(Missing),

    #[error("{0}")]
    CommandNotFound(Missing),

    #[error("{0}")]
    MapperMissing(Missing),

    #[error("+{0}+ not found")]
    KeyNotFound(String),

    #[error("unknown plugin {name:?} for {kind} (adapter {adapter:?})")]
    UnknownPlugin {
        name: String,
        kind: ComponentKind,
        adapter: String,
    },

    #[error("plugin {name:?} is already registered for {kind} (adapter {adapter:?})")]
    PluginAlreadyRegistered {
        name: String,
        kind: ComponentKind,
        adapter: String,
    },

    #[error("setup {0} was already finalized")]
    EnvAlreadyFinalized(ProviderId),

    #[error("event {0:?} is not registered")]
    UnknownEvent(String),

    #[error("no adapter registered as {0:?}")]
    UnknownAdapter(String),

    #[error("unknown component kind {name:?} in {section}")]
    UnknownKind { section: String, name: String },

    #[error("dependency cycle between components: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    #[error("invalid input for command {command}: {reason}")]
    InvalidInput { command: String, reason: String },

    #[error("command {command} expected {expected} tuple, got {actual}")]
    TupleCountMismatch {
        command: String,
        expected: &'static str,
        actual: usize,
    },

    #[error("mapper {0} is misconfigured: {1}")]
    MapperMisconfigured(String, String),

    #[error("adapter {adapter} error: {message}")]
    Adapter { adapter: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Settings(#[from] config_crate::ConfigError),
}

impl Error {
    /// Kind-specific duplicate-definition error
    pub fn already_defined(kind: ComponentKind, duplicate: Duplicate) -> Self {
        match kind {
            ComponentKind::Gateway => Error::GatewayAlreadyDefined(duplicate),
            ComponentKind::Dataset => Error::DatasetAlreadyDefined(duplicate),
            ComponentKind::Schema => Error::SchemaAlreadyDefined(duplicate),
            ComponentKind::Relation => Error::RelationAlreadyDefined(duplicate),
            ComponentKind::Association => Error::AssociationAlreadyDefined(duplicate),
            ComponentKind::Command => Error::CommandAlreadyDefined(duplicate),
            ComponentKind::Mapper => Error::MapperAlreadyDefined(duplicate),
        }
    }

    /// Kind-specific missing-element error
    pub fn missing(kind: ComponentKind, key: impl Into<String>, suggestion: Option<String>) -> Self {
        let missing = Missing {
            key: key.into(),
            registry: kind,
            suggestion,
        };
        match kind {
            ComponentKind::Gateway => Error::GatewayMissing(missing),
            ComponentKind::Dataset => Error::DatasetMissing(missing),
            ComponentKind::Schema => Error::SchemaMissing(missing),
            ComponentKind::Relation => Error::RelationMissing(missing),
            ComponentKind::Association => Error::AssociationMissing(missing),
            ComponentKind::Command => Error::CommandNotFound(missing),
            ComponentKind::Mapper => Error::MapperMissing(missing),
        }
    }

    /// The missing-element payload, for any of the `*Missing` variants
    pub fn as_missing(&self) -> Option<&Missing> {
        match self {
            Error::GatewayMissing(m)
            | Error::DatasetMissing(m)
            | Error::SchemaMissing(m)
            | Error::RelationMissing(m)
            | Error::AssociationMissing(m)
            | Error::CommandNotFound(m)
            | Error::MapperMissing(m) => Some(m),
            _ => None,
        }
    }

    /// The duplicate-definition payload, for any of the `*AlreadyDefined` variants
    pub fn as_duplicate(&self) -> Option<&Duplicate> {
        match self {
            Error::GatewayAlreadyDefined(d)
            | Error::DatasetAlreadyDefined(d)
            | Error::SchemaAlreadyDefined(d)
            | Error::RelationAlreadyDefined(d)
            | Error::AssociationAlreadyDefined(d)
            | Error::CommandAlreadyDefined(d)
            | Error::MapperAlreadyDefined(d) => Some(d),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_messages() {
        let err = ConfigError::inference("adapter", ComponentKind::Relation, "app");
        assert_eq!(err.to_string(), "Failed to infer +relation.adapter+ setting for app");

        let err = ConfigError::invalid("id", ComponentKind::Command, "users.create", "not an identifier");
        assert_eq!(
            err.to_string(),
            "users.create command.id setting is not valid: not an identifier"
        );
    }

    #[test]
    fn test_kind_specific_variants() {
        let dup = Duplicate {
            key: "users".into(),
            provider: ProviderId::new("b"),
            existing: ProviderId::new("a"),
        };
        let err = Error::already_defined(ComponentKind::Relation, dup);
        assert!(matches!(err, Error::RelationAlreadyDefined(_)));
        assert_eq!(err.as_duplicate().unwrap().existing, ProviderId::new("a"));

        let err = Error::missing(ComponentKind::Command, "users.nope", None);
        assert!(matches!(err, Error::CommandNotFound(_)));
        assert_eq!(err.as_missing().unwrap().key, "users.nope");
    }

    #[test]
    fn test_missing_message_with_suggestion() {
        let err = Error::missing(ComponentKind::Relation, "userz", Some("users".into()));
        assert_eq!(
            err.to_string(),
            "\"userz\" doesn't exist in relations registry (did you mean \"users\"?)"
        );
    }
}
