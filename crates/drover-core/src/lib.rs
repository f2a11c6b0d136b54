//! drover-core: shared types for the offer pool and constraint engine.
//!
//! # Contents
//!
//! - **`attribute`**: the scalar/ranges/set/text value union and its wire form
//! - **`offer`**: resource offers, resource totals, attribute lookup helpers
//! - **`types`**: applications, versions, taskgroups, agents
//! - **`constraint`**: AND-of-OR placement constraint specs
//! - **`collaborator`**: `Store` and `SchedulerClient` interfaces
//! - **`config`**: `drover.toml` parsing

pub mod attribute;
pub mod collaborator;
pub mod config;
pub mod constraint;
pub mod error;
pub mod offer;
pub mod types;

pub use attribute::{Attribute, AttributeValue, ValueRange, ValueType, WireAttribute};
pub use collaborator::{ApplicationLock, BoxFuture, SchedulerClient, Store};
pub use config::{DroverConfig, PluginConfig, PoolConfig};
pub use constraint::{Constraint, ConstraintData, ConstraintDataItem, Operator};
pub use error::{AttributeError, ClientError, ClientResult, StoreError, StoreResult};
pub use offer::{OfferResources, Resource, ResourceOffer};
pub use types::*;
