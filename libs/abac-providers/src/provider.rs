//! The provider contract: a namespaced object mapping entity references to
//! attribute maps, plus the handful of concrete providers this core ships
//! with. Every numeric attribute a provider returns is a 64-bit float so
//! the evaluator's comparison rules stay homogeneous.

use std::sync::Arc;
use std::time::Duration;

use abac_dsl::{AttributeBag, AttributeValue};
use async_trait::async_trait;
use chrono::{DateTime, Timelike, Utc};
use tokio_util::sync::CancellationToken;

use crate::error::ProviderError;
use crate::schema::{AttributeType, NamespaceSchema};

/// A textual entity handle of the form `type:id`, plus the two special
/// forms `system` (no id) and `stream:<name>` where `<name>` may itself
/// embed colons. Parsing splits on the first colon only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRef {
    pub type_name: String,
    pub id: String,
}

impl EntityRef {
    pub fn parse(raw: &str) -> Result<Self, ProviderError> {
        if raw.is_empty() {
            return Err(ProviderError::InvalidEntityRef(raw.to_string()));
        }
        if raw == "system" {
            return Ok(EntityRef {
                type_name: "system".to_string(),
                id: String::new(),
            });
        }
        match raw.split_once(':') {
            Some((type_name, id)) if !type_name.is_empty() => Ok(EntityRef {
                type_name: type_name.to_string(),
                id: id.to_string(),
            }),
            _ => Err(ProviderError::InvalidEntityRef(raw.to_string())),
        }
    }
}

/// Threaded through every provider call: cancellation observed at the
/// provider boundary, per §5 of the distilled design.
#[derive(Clone)]
pub struct ResolutionContext {
    pub cancellation: CancellationToken,
}

impl ResolutionContext {
    pub fn new(cancellation: CancellationToken) -> Self {
        Self { cancellation }
    }
}

/// A provider answering for subjects and/or resources in one namespace.
/// Returning `Ok(None)` means "not mine"; returning `Err` means "this was
/// mine and resolution failed" - the resolver treats the two very
/// differently (the first is silent, the second is logged and counted).
#[async_trait]
pub trait Provider: Send + Sync {
    fn namespace(&self) -> &str;
    async fn resolve_subject(
        &self,
        entity: &EntityRef,
        ctx: &ResolutionContext,
    ) -> Result<Option<AttributeBag>, ProviderError>;
    async fn resolve_resource(
        &self,
        entity: &EntityRef,
        ctx: &ResolutionContext,
    ) -> Result<Option<AttributeBag>, ProviderError>;
    fn schema(&self) -> NamespaceSchema;
}

/// The environment shape: no entity reference, just process/world globals.
#[async_trait]
pub trait EnvironmentProvider: Send + Sync {
    fn namespace(&self) -> &str;
    async fn resolve(&self, ctx: &ResolutionContext) -> Result<AttributeBag, ProviderError>;
    fn schema(&self) -> NamespaceSchema;
}

fn basic_entity_schema() -> NamespaceSchema {
    NamespaceSchema::new([
        ("id".to_string(), AttributeType::String),
        ("type".to_string(), AttributeType::String),
        ("has_owner".to_string(), AttributeType::Boolean),
        ("linked_account".to_string(), AttributeType::Boolean),
        ("created_at".to_string(), AttributeType::String),
        ("updated_at".to_string(), AttributeType::String),
    ])
}

/// The shared shape Character and Location providers resolve to: an id,
/// owner-presence, type, a linkage boolean, and timestamps.
#[derive(Debug, Clone)]
pub struct BasicEntityRecord {
    pub id: String,
    pub owner_id: Option<String>,
    pub type_name: String,
    pub linked_account: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn basic_entity_bag(record: &BasicEntityRecord) -> AttributeBag {
    let mut bag = AttributeBag::new();
    bag.insert("id".into(), AttributeValue::String(record.id.clone()));
    bag.insert("type".into(), AttributeValue::String(record.type_name.clone()));
    bag.insert("has_owner".into(), AttributeValue::Bool(record.owner_id.is_some()));
    bag.insert(
        "linked_account".into(),
        AttributeValue::Bool(record.linked_account),
    );
    bag.insert(
        "created_at".into(),
        AttributeValue::String(record.created_at.to_rfc3339()),
    );
    bag.insert(
        "updated_at".into(),
        AttributeValue::String(record.updated_at.to_rfc3339()),
    );
    bag
}

/// Minimal entity contract the Character and Location providers require -
/// the domain model and its storage are an external collaborator.
#[async_trait]
pub trait BasicEntityRepository: Send + Sync {
    async fn find(&self, id: &str) -> Result<Option<BasicEntityRecord>, ProviderError>;
}

/// Backs both `CharacterProvider` and `LocationProvider` - the distilled
/// design describes them with one shared shape, so one generic struct
/// parameterized by namespace and entity-type-name backs both.
pub struct BasicEntityProvider {
    namespace: &'static str,
    entity_type: &'static str,
    repository: Arc<dyn BasicEntityRepository>,
}

impl BasicEntityProvider {
    pub fn character(repository: Arc<dyn BasicEntityRepository>) -> Self {
        Self {
            namespace: "character",
            entity_type: "character",
            repository,
        }
    }

    pub fn location(repository: Arc<dyn BasicEntityRepository>) -> Self {
        Self {
            namespace: "location",
            entity_type: "location",
            repository,
        }
    }

    async fn resolve(
        &self,
        entity: &EntityRef,
        ctx: &ResolutionContext,
    ) -> Result<Option<AttributeBag>, ProviderError> {
        if entity.type_name != self.entity_type {
            return Ok(None);
        }
        if ctx.cancellation.is_cancelled() {
            return Err(ProviderError::ResolutionFailed {
                namespace: self.namespace.to_string(),
                entity_ref: format!("{}:{}", entity.type_name, entity.id),
                reason: "cancelled".to_string(),
            });
        }
        Ok(self.repository.find(&entity.id).await?.map(|record| basic_entity_bag(&record)))
    }
}

#[async_trait]
impl Provider for BasicEntityProvider {
    fn namespace(&self) -> &str {
        self.namespace
    }

    async fn resolve_subject(
        &self,
        entity: &EntityRef,
        ctx: &ResolutionContext,
    ) -> Result<Option<AttributeBag>, ProviderError> {
        self.resolve(entity, ctx).await
    }

    async fn resolve_resource(
        &self,
        entity: &EntityRef,
        ctx: &ResolutionContext,
    ) -> Result<Option<AttributeBag>, ProviderError> {
        self.resolve(entity, ctx).await
    }

    fn schema(&self) -> NamespaceSchema {
        basic_entity_schema()
    }
}

/// A property's parent, as stored: either a location directly, or a
/// character/object whose containing location must be derived.
#[derive(Debug, Clone)]
pub struct PropertyRecord {
    pub id: String,
    pub type_name: String,
    pub parent: EntityRef,
}

#[async_trait]
pub trait PropertyRepository: Send + Sync {
    async fn find(&self, id: &str) -> Result<Option<PropertyRecord>, ProviderError>;
}

/// Resolves the location that ultimately contains a character or object -
/// an external collaborator, invoked under a hard 100ms sub-deadline so a
/// slow dependency degrades one attribute instead of the whole resolution.
#[async_trait]
pub trait ParentLocationResolver: Send + Sync {
    async fn resolve_parent_location(&self, entity: &EntityRef) -> Result<Option<String>, ProviderError>;
}

/// Default sub-deadline for [`PropertyProvider::new`], matching
/// `ResolverConfig::default().parent_location_timeout_ms`.
const PARENT_LOCATION_TIMEOUT: Duration = Duration::from_millis(100);

pub struct PropertyProvider {
    repository: Arc<dyn PropertyRepository>,
    parent_location_resolver: Arc<dyn ParentLocationResolver>,
    parent_location_timeout: Duration,
}

impl PropertyProvider {
    pub fn new(
        repository: Arc<dyn PropertyRepository>,
        parent_location_resolver: Arc<dyn ParentLocationResolver>,
    ) -> Self {
        Self::with_timeout(repository, parent_location_resolver, PARENT_LOCATION_TIMEOUT)
    }

    /// Same as [`Self::new`] but with an explicit sub-deadline - a caller
    /// wiring this provider up from a `ResolverConfig` should pass
    /// `Duration::from_millis(config.parent_location_timeout_ms)` here.
    pub fn with_timeout(
        repository: Arc<dyn PropertyRepository>,
        parent_location_resolver: Arc<dyn ParentLocationResolver>,
        parent_location_timeout: Duration,
    ) -> Self {
        Self {
            repository,
            parent_location_resolver,
            parent_location_timeout,
        }
    }

    async fn resolve_parent_location(&self, record: &PropertyRecord) -> (String, bool) {
        if record.parent.type_name == "location" {
            return (record.parent.id.clone(), true);
        }

        match tokio::time::timeout(
            self.parent_location_timeout,
            self.parent_location_resolver.resolve_parent_location(&record.parent),
        )
        .await
        {
            Ok(Ok(Some(location_id))) => (location_id, true),
            Ok(Ok(None)) => {
                tracing::debug!(property_id = %record.id, "parent location resolver returned nothing");
                (String::new(), false)
            }
            Ok(Err(err)) => {
                tracing::warn!(property_id = %record.id, error = %err, "parent location resolution failed");
                (String::new(), false)
            }
            Err(_) => {
                tracing::warn!(property_id = %record.id, "parent location resolution timed out");
                (String::new(), false)
            }
        }
    }
}

#[async_trait]
impl Provider for PropertyProvider {
    fn namespace(&self) -> &str {
        "property"
    }

    async fn resolve_subject(
        &self,
        _entity: &EntityRef,
        _ctx: &ResolutionContext,
    ) -> Result<Option<AttributeBag>, ProviderError> {
        Ok(None)
    }

    async fn resolve_resource(
        &self,
        entity: &EntityRef,
        _ctx: &ResolutionContext,
    ) -> Result<Option<AttributeBag>, ProviderError> {
        if entity.type_name != "property" {
            return Ok(None);
        }
        if ulid::Ulid::from_string(&entity.id).is_err() {
            return Err(ProviderError::InvalidPropertyId(entity.id.clone()));
        }
        let record = match self.repository.find(&entity.id).await.map_err(|err| {
            ProviderError::PropertyFetchFailed {
                property_id: entity.id.clone(),
                reason: err.to_string(),
            }
        })? {
            Some(record) => record,
            None => return Ok(None),
        };

        let (parent_location, has_parent_location) = self.resolve_parent_location(&record).await;

        let mut bag = AttributeBag::new();
        bag.insert("id".into(), AttributeValue::String(record.id.clone()));
        bag.insert("type".into(), AttributeValue::String(record.type_name.clone()));
        bag.insert("parent_location".into(), AttributeValue::String(parent_location));
        bag.insert("has_parent_location".into(), AttributeValue::Bool(has_parent_location));
        Ok(Some(bag))
    }

    fn schema(&self) -> NamespaceSchema {
        NamespaceSchema::new([
            ("id".to_string(), AttributeType::String),
            ("type".to_string(), AttributeType::String),
            ("parent_location".to_string(), AttributeType::String),
            ("has_parent_location".to_string(), AttributeType::Boolean),
        ])
    }
}

/// A named entity the Command/Scene/Exit providers resolve to.
#[derive(Debug, Clone)]
pub struct NamedEntityRecord {
    pub id: String,
    pub name: String,
    pub type_name: String,
}

#[async_trait]
pub trait NamedEntityRepository: Send + Sync {
    async fn find(&self, id: &str) -> Result<Option<NamedEntityRecord>, ProviderError>;
}

/// Backs the Command, Scene and Exit providers - each surfaces only
/// `type` and a derived `name`/`id`, so one generic struct covers all
/// three, parameterized by namespace and entity-type-name.
pub struct NamedEntityProvider {
    namespace: &'static str,
    entity_type: &'static str,
    repository: Arc<dyn NamedEntityRepository>,
}

impl NamedEntityProvider {
    pub fn command(repository: Arc<dyn NamedEntityRepository>) -> Self {
        Self {
            namespace: "command",
            entity_type: "command",
            repository,
        }
    }

    pub fn scene(repository: Arc<dyn NamedEntityRepository>) -> Self {
        Self {
            namespace: "scene",
            entity_type: "scene",
            repository,
        }
    }

    pub fn exit(repository: Arc<dyn NamedEntityRepository>) -> Self {
        Self {
            namespace: "exit",
            entity_type: "exit",
            repository,
        }
    }

    async fn resolve(
        &self,
        entity: &EntityRef,
        _ctx: &ResolutionContext,
    ) -> Result<Option<AttributeBag>, ProviderError> {
        if entity.type_name != self.entity_type {
            return Ok(None);
        }
        let record = match self.repository.find(&entity.id).await? {
            Some(record) => record,
            None => return Ok(None),
        };
        let mut bag = AttributeBag::new();
        bag.insert("id".into(), AttributeValue::String(record.id.clone()));
        bag.insert("name".into(), AttributeValue::String(record.name.clone()));
        bag.insert("type".into(), AttributeValue::String(record.type_name.clone()));
        Ok(Some(bag))
    }
}

#[async_trait]
impl Provider for NamedEntityProvider {
    fn namespace(&self) -> &str {
        self.namespace
    }

    async fn resolve_subject(
        &self,
        entity: &EntityRef,
        ctx: &ResolutionContext,
    ) -> Result<Option<AttributeBag>, ProviderError> {
        self.resolve(entity, ctx).await
    }

    async fn resolve_resource(
        &self,
        entity: &EntityRef,
        ctx: &ResolutionContext,
    ) -> Result<Option<AttributeBag>, ProviderError> {
        self.resolve(entity, ctx).await
    }

    fn schema(&self) -> NamespaceSchema {
        NamespaceSchema::new([
            ("id".to_string(), AttributeType::String),
            ("name".to_string(), AttributeType::String),
            ("type".to_string(), AttributeType::String),
        ])
    }
}

/// Resolves `stream:<kind>:<rest>` references by decoding the tail of the
/// entity id - no repository needed, the reference carries everything.
pub struct StreamProvider;

#[async_trait]
impl Provider for StreamProvider {
    fn namespace(&self) -> &str {
        "stream"
    }

    async fn resolve_subject(
        &self,
        entity: &EntityRef,
        ctx: &ResolutionContext,
    ) -> Result<Option<AttributeBag>, ProviderError> {
        self.resolve(entity, ctx)
    }

    async fn resolve_resource(
        &self,
        entity: &EntityRef,
        ctx: &ResolutionContext,
    ) -> Result<Option<AttributeBag>, ProviderError> {
        self.resolve(entity, ctx)
    }

    fn schema(&self) -> NamespaceSchema {
        NamespaceSchema::new([
            ("id".to_string(), AttributeType::String),
            ("type".to_string(), AttributeType::String),
            ("location".to_string(), AttributeType::String),
        ])
    }
}

impl StreamProvider {
    fn resolve(
        &self,
        entity: &EntityRef,
        _ctx: &ResolutionContext,
    ) -> Result<Option<AttributeBag>, ProviderError> {
        if entity.type_name != "stream" {
            return Ok(None);
        }
        let mut bag = AttributeBag::new();
        bag.insert("id".into(), AttributeValue::String(entity.id.clone()));
        match entity.id.split_once(':') {
            Some((kind, rest)) => {
                bag.insert("type".into(), AttributeValue::String(kind.to_string()));
                bag.insert("location".into(), AttributeValue::String(rest.to_string()));
            }
            None => {
                bag.insert("type".into(), AttributeValue::String(entity.id.clone()));
            }
        }
        Ok(Some(bag))
    }
}

/// Supplies the wall-clock reading the Environment provider surfaces - an
/// indirection purely so tests can inject a fixed instant.
pub trait EnvironmentClock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl EnvironmentClock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

pub trait MaintenanceStatus: Send + Sync {
    fn is_maintenance(&self) -> bool;
}

pub struct NeverMaintenance;

impl MaintenanceStatus for NeverMaintenance {
    fn is_maintenance(&self) -> bool {
        false
    }
}

pub struct EnvironmentAttributeProvider {
    clock: Arc<dyn EnvironmentClock>,
    maintenance: Arc<dyn MaintenanceStatus>,
}

impl EnvironmentAttributeProvider {
    pub fn new(clock: Arc<dyn EnvironmentClock>, maintenance: Arc<dyn MaintenanceStatus>) -> Self {
        Self { clock, maintenance }
    }
}

#[async_trait]
impl EnvironmentProvider for EnvironmentAttributeProvider {
    fn namespace(&self) -> &str {
        "environment"
    }

    async fn resolve(&self, _ctx: &ResolutionContext) -> Result<AttributeBag, ProviderError> {
        let now = self.clock.now();
        let mut bag = AttributeBag::new();
        bag.insert("time".into(), AttributeValue::String(now.to_rfc3339()));
        bag.insert("hour".into(), AttributeValue::Float(now.hour() as f64));
        bag.insert("minute".into(), AttributeValue::Float(now.minute() as f64));
        bag.insert(
            "day_of_week".into(),
            AttributeValue::String(now.format("%A").to_string().to_lowercase()),
        );
        bag.insert(
            "maintenance".into(),
            AttributeValue::Bool(self.maintenance.is_maintenance()),
        );
        Ok(bag)
    }

    fn schema(&self) -> NamespaceSchema {
        NamespaceSchema::new([
            ("time".to_string(), AttributeType::String),
            ("hour".to_string(), AttributeType::Float),
            ("minute".to_string(), AttributeType::Float),
            ("day_of_week".to_string(), AttributeType::String),
            ("maintenance".to_string(), AttributeType::Boolean),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_ref_splits_on_first_colon_only() {
        let entity = EntityRef::parse("stream:location:01AA").unwrap();
        assert_eq!(entity.type_name, "stream");
        assert_eq!(entity.id, "location:01AA");
    }

    #[test]
    fn entity_ref_accepts_bare_system() {
        let entity = EntityRef::parse("system").unwrap();
        assert_eq!(entity.type_name, "system");
        assert_eq!(entity.id, "");
    }

    #[test]
    fn entity_ref_rejects_empty_input() {
        assert!(EntityRef::parse("").is_err());
    }

    #[tokio::test]
    async fn stream_provider_decodes_tail() {
        let provider = StreamProvider;
        let ctx = ResolutionContext::new(CancellationToken::new());
        let entity = EntityRef::parse("stream:location:01AA").unwrap();
        let bag = provider
            .resolve_resource(&entity, &ctx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(bag.get("type").unwrap().as_str(), Some("location"));
        assert_eq!(bag.get("location").unwrap().as_str(), Some("01AA"));
    }

    #[tokio::test]
    async fn property_provider_falls_back_when_parent_location_resolver_times_out() {
        struct SlowResolver;
        #[async_trait]
        impl ParentLocationResolver for SlowResolver {
            async fn resolve_parent_location(&self, _entity: &EntityRef) -> Result<Option<String>, ProviderError> {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok(Some("location:never".to_string()))
            }
        }
        struct OneProperty;
        #[async_trait]
        impl PropertyRepository for OneProperty {
            async fn find(&self, id: &str) -> Result<Option<PropertyRecord>, ProviderError> {
                Ok(Some(PropertyRecord {
                    id: id.to_string(),
                    type_name: "lamp".to_string(),
                    parent: EntityRef::parse("character:01AA").unwrap(),
                }))
            }
        }

        let provider = PropertyProvider::new(Arc::new(OneProperty), Arc::new(SlowResolver));
        let ctx = ResolutionContext::new(CancellationToken::new());
        let entity = EntityRef::parse("property:01ARZ3NDEKTSV4RRFFQ69G5FAV").unwrap();
        let bag = provider
            .resolve_resource(&entity, &ctx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(bag.get("parent_location").unwrap().as_str(), Some(""));
        assert_eq!(bag.get("has_parent_location").unwrap().as_bool(), Some(false));
    }

    #[tokio::test]
    async fn property_provider_honors_a_configured_parent_location_timeout() {
        struct SlowResolver;
        #[async_trait]
        impl ParentLocationResolver for SlowResolver {
            async fn resolve_parent_location(&self, _entity: &EntityRef) -> Result<Option<String>, ProviderError> {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(Some("location:never".to_string()))
            }
        }
        struct OneProperty;
        #[async_trait]
        impl PropertyRepository for OneProperty {
            async fn find(&self, id: &str) -> Result<Option<PropertyRecord>, ProviderError> {
                Ok(Some(PropertyRecord {
                    id: id.to_string(),
                    type_name: "lamp".to_string(),
                    parent: EntityRef::parse("character:01AA").unwrap(),
                }))
            }
        }

        // A sub-deadline shorter than the resolver's own delay still trips,
        // even though it's well under the 100ms default.
        let provider = PropertyProvider::with_timeout(
            Arc::new(OneProperty),
            Arc::new(SlowResolver),
            Duration::from_millis(5),
        );
        let ctx = ResolutionContext::new(CancellationToken::new());
        let entity = EntityRef::parse("property:01ARZ3NDEKTSV4RRFFQ69G5FAV").unwrap();
        let bag = provider
            .resolve_resource(&entity, &ctx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(bag.get("parent_location").unwrap().as_str(), Some(""));
        assert_eq!(bag.get("has_parent_location").unwrap().as_bool(), Some(false));
    }

    #[tokio::test]
    async fn property_provider_rejects_a_malformed_property_id() {
        struct UnreachableRepository;
        #[async_trait]
        impl PropertyRepository for UnreachableRepository {
            async fn find(&self, _id: &str) -> Result<Option<PropertyRecord>, ProviderError> {
                panic!("repository should never be consulted for a malformed id");
            }
        }
        struct UnreachableResolver;
        #[async_trait]
        impl ParentLocationResolver for UnreachableResolver {
            async fn resolve_parent_location(&self, _entity: &EntityRef) -> Result<Option<String>, ProviderError> {
                panic!("resolver should never be consulted for a malformed id");
            }
        }

        let provider = PropertyProvider::new(Arc::new(UnreachableRepository), Arc::new(UnreachableResolver));
        let ctx = ResolutionContext::new(CancellationToken::new());
        let entity = EntityRef::parse("property:lamp-1").unwrap();
        let err = provider.resolve_resource(&entity, &ctx).await.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidPropertyId(id) if id == "lamp-1"));
    }
}
