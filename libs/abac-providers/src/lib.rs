//! Attribute resolution: the schema registry, the namespaced providers
//! that answer for one corner of the world, and the per-request resolver
//! that orchestrates them into the four bags the evaluator consumes.

pub mod config;
pub mod error;
pub mod provider;
pub mod resolver;
pub mod schema;

pub use config::{ConfigError, ResolverConfig};
pub use error::{ProviderError, ResolverError, SchemaError};
pub use provider::{
    BasicEntityProvider, BasicEntityRecord, BasicEntityRepository, EntityRef, EnvironmentAttributeProvider,
    EnvironmentClock, EnvironmentProvider, MaintenanceStatus, NamedEntityProvider, NamedEntityRecord,
    NamedEntityRepository, NeverMaintenance, ParentLocationResolver, Provider, PropertyProvider, PropertyRecord,
    PropertyRepository, ResolutionContext, StreamProvider, SystemClock,
};
pub use resolver::{RequestScope, ResolveRequest, Resolver, ResolverFault, DEFAULT_CACHE_CAPACITY};
pub use schema::{AttributeType, NamespaceSchema, SchemaRegistry};
