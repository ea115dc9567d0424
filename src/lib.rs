//! relmap
//!
//! Component registry and finalization pipeline for relation/command/mapper
//! data-mapping toolkits.
//!
//! ## Features
//!
//! - **Declarative Setup**: Gateways, datasets, schemas, relations, associations,
//!   commands and mappers are declared as components with layered configuration
//! - **Deterministic Finalize**: A petgraph build plan orders every build; the
//!   resulting registry carries a SHA256 fingerprint of that order
//! - **Lifecycle Events**: Builds fire catalog events to listeners attached at
//!   finalize time, filtered by the plugins the setup enabled
//! - **Plugins**: Named behaviors registered per kind and adapter, applied to
//!   component classes before they are built
//! - **Immutable Runtime**: Built elements are frozen into typed registries
//!
//! ## Architecture
//!
//! ```text
//! Setup ──declare──▶ ComponentRegistry ──finalize──▶ BuildPlan
//!                                                       │
//!            Notifications ◀──events── middleware ◀─────┘
//!                                          │
//!                                          ▼
//!                                   RuntimeRegistry
//!                 gateways · datasets · schemas · associations
//!                      relations · commands · mappers
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use relmap::{ConfigNode, Setup};
//! use serde_json::json;
//!
//! # fn main() -> relmap::Result<()> {
//! let mut setup = Setup::new("app");
//! setup
//!     .gateway("default", ConfigNode::new().with("adapter", "memory"))?
//!     .relation("users", ConfigNode::new().with("schema", json!({"id": "integer", "name": "string"})))?
//!     .command("users", "create", ConfigNode::new())?;
//!
//! let runtime = setup.finalize()?;
//! let create = runtime.command("users", "create")?;
//! create.call(json!({"id": 1, "name": "Jane"}))?;
//! # Ok(())
//! # }
//! ```

pub mod command;
pub mod component;
pub mod config;
pub mod error;
pub mod gateway;
pub mod graph;
pub mod mapper;
pub mod memory;
pub mod notifications;
pub mod plugin;
pub mod relation;
pub mod runtime;
pub mod schema;
pub mod settings;
pub mod setup;

/// A row of data: attribute name to value
pub type Tuple = serde_json::Map<String, serde_json::Value>;

pub use command::{Command, CommandOutput, CommandType};
pub use component::{Component, ComponentKind, ComponentRegistry, ProviderId};
pub use config::SetupConfig;
pub use error::{ConfigError, Error, Result};
pub use gateway::{Adapter, Adapters, Dataset, Gateway};
pub use graph::BuildPlan;
pub use mapper::{Mapper, Transform};
pub use memory::{MemoryAdapter, MemoryGateway};
pub use notifications::{Notifications, Payload};
pub use plugin::{Plugin, PluginDescriptor, PluginTarget, Plugins};
pub use relation::{Association, AssociationKind, Relation};
pub use runtime::{Element, RuntimeRegistry};
pub use schema::{AttributeType, Schema};
pub use settings::ConfigNode;
pub use setup::Setup;
