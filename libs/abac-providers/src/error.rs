use thiserror::Error;

/// Faults a single attribute provider may raise. These are isolated by the
/// resolver - they never abort the surrounding `resolve` call - but
/// individual providers still need a typed way to say "I tried and failed"
/// distinct from "this isn't mine" (`Ok(None)`).
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("invalid entity reference: {0}")]
    InvalidEntityRef(String),

    #[error("invalid property id: {0}")]
    InvalidPropertyId(String),

    #[error("failed to fetch property '{property_id}': {reason}")]
    PropertyFetchFailed { property_id: String, reason: String },

    #[error("provider '{namespace}' failed to resolve '{entity_ref}': {reason}")]
    ResolutionFailed {
        namespace: String,
        entity_ref: String,
        reason: String,
    },
}

/// Faults raised by the resolver itself, as opposed to an individual
/// provider - registration conflicts and the re-entrance guard.
#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("namespace '{0}' is already registered by a different provider")]
    NamespaceConflict(String),

    #[error("re-entrant call to Resolver::resolve detected on this request context")]
    ReentranceDetected,
}

/// Faults raised by [`crate::schema::SchemaRegistry::register`].
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("namespace must not be empty")]
    EmptyNamespace,

    #[error("namespace '{0}' is already registered")]
    AlreadyRegistered(String),

    #[error("schema for namespace '{0}' declares zero attributes")]
    EmptySchema(String),
}
