//! Per-request orchestration: registers providers, resolves one request's
//! four attribute bags against them, and isolates each provider's faults
//! so one bad dependency never sinks the whole resolution.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use abac_dsl::{AttributeBag, AttributeBags};
use dashmap::DashMap;
use lru::LruCache;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

use crate::config::ResolverConfig;
use crate::error::ResolverError;
use crate::provider::{EntityRef, EnvironmentProvider, Provider, ResolutionContext};
use crate::schema::SchemaRegistry;

pub const DEFAULT_CACHE_CAPACITY: usize = 100;

/// The raw request a caller hands the resolver: subject/resource/action
/// entity references exactly as they appear on the wire.
#[derive(Debug, Clone)]
pub struct ResolveRequest {
    pub subject: String,
    pub resource: String,
    pub action: String,
}

/// Records a provider (or the resolver itself) failing to contribute to
/// a resolution. Resolution always completes; faults are informational.
#[derive(Debug, Clone)]
pub struct ResolverFault {
    pub namespace: String,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Subject,
    Resource,
}

impl Role {
    fn as_str(self) -> &'static str {
        match self {
            Role::Subject => "subject",
            Role::Resource => "resource",
        }
    }
}

/// Per-request state threaded through every provider call: the
/// in-resolution marker guarding against re-entrance, and an LRU of
/// already-resolved entity fragments so two conditions referencing the
/// same entity don't pay for it twice.
pub struct RequestScope {
    cache: AsyncMutex<LruCache<String, AttributeBag>>,
    in_resolution: AtomicBool,
    pub cancellation: CancellationToken,
}

struct ReentranceGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for ReentranceGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

impl RequestScope {
    pub fn new(capacity: usize) -> Self {
        Self::with_cancellation(capacity, CancellationToken::new())
    }

    pub fn with_cancellation(capacity: usize, cancellation: CancellationToken) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).unwrap());
        Self {
            cache: AsyncMutex::new(LruCache::new(capacity)),
            in_resolution: AtomicBool::new(false),
            cancellation,
        }
    }

    pub fn is_in_resolution(&self) -> bool {
        self.in_resolution.load(Ordering::SeqCst)
    }

    fn enter(&self) -> Result<ReentranceGuard<'_>, ResolverError> {
        if self.in_resolution.swap(true, Ordering::SeqCst) {
            return Err(ResolverError::ReentranceDetected);
        }
        Ok(ReentranceGuard {
            flag: &self.in_resolution,
        })
    }

    async fn cache_get(&self, key: &str) -> Option<AttributeBag> {
        self.cache.lock().await.get(key).cloned()
    }

    async fn cache_put(&self, key: String, value: AttributeBag) {
        self.cache.lock().await.put(key, value);
    }
}

impl Default for RequestScope {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

/// Holds the registered providers and runs requests against them.
/// Providers are invoked in registration order; on a namespaced key
/// collision between two providers, the later registration wins.
pub struct Resolver {
    schema_registry: Arc<SchemaRegistry>,
    providers: RwLock<Vec<Arc<dyn Provider>>>,
    environment_providers: RwLock<Vec<Arc<dyn EnvironmentProvider>>>,
    rejected_attributes: DashMap<(String, String), u64>,
    config: ResolverConfig,
}

fn fault(namespace: impl Into<String>, reason: impl Into<String>) -> ResolverFault {
    ResolverFault {
        namespace: namespace.into(),
        reason: reason.into(),
    }
}

impl Resolver {
    pub fn new(schema_registry: Arc<SchemaRegistry>) -> Self {
        Self::with_config(schema_registry, ResolverConfig::default())
    }

    pub fn with_config(schema_registry: Arc<SchemaRegistry>, config: ResolverConfig) -> Self {
        Self {
            schema_registry,
            providers: RwLock::new(Vec::new()),
            environment_providers: RwLock::new(Vec::new()),
            rejected_attributes: DashMap::new(),
            config,
        }
    }

    pub fn register_provider(&self, provider: Arc<dyn Provider>) -> Result<(), ResolverError> {
        let namespace = provider.namespace().to_string();
        let mut providers = self.providers.write().expect("provider registry poisoned");
        if let Some(existing) = providers.iter().find(|p| p.namespace() == namespace) {
            return if Arc::ptr_eq(existing, &provider) {
                Ok(())
            } else {
                Err(ResolverError::NamespaceConflict(namespace))
            };
        }
        match self.schema_registry.register(&namespace, provider.schema()) {
            Ok(()) => {}
            Err(err) => {
                tracing::warn!(namespace = %namespace, error = %err, "provider schema registration failed");
                return Err(ResolverError::NamespaceConflict(namespace));
            }
        }
        providers.push(provider);
        Ok(())
    }

    pub fn register_environment_provider(
        &self,
        provider: Arc<dyn EnvironmentProvider>,
    ) -> Result<(), ResolverError> {
        let namespace = provider.namespace().to_string();
        let mut providers = self
            .environment_providers
            .write()
            .expect("environment provider registry poisoned");
        if let Some(existing) = providers.iter().find(|p| p.namespace() == namespace) {
            return if Arc::ptr_eq(existing, &provider) {
                Ok(())
            } else {
                Err(ResolverError::NamespaceConflict(namespace))
            };
        }
        match self.schema_registry.register(&namespace, provider.schema()) {
            Ok(()) => {}
            Err(err) => {
                tracing::warn!(namespace = %namespace, error = %err, "environment provider schema registration failed");
                return Err(ResolverError::NamespaceConflict(namespace));
            }
        }
        providers.push(provider);
        Ok(())
    }

    /// Resolves `request` against a brand-new per-request scope, sized from
    /// this resolver's configured cache capacity.
    pub async fn resolve(&self, request: &ResolveRequest) -> (AttributeBags, Vec<ResolverFault>) {
        let scope = RequestScope::new(self.config.request_cache_capacity);
        self.resolve_with_scope(request, &scope).await
    }

    /// Resolves `request` against an explicit scope, so a caller that
    /// already holds one (and wants to detect re-entrant resolution
    /// against it) can reuse it.
    pub async fn resolve_with_scope(
        &self,
        request: &ResolveRequest,
        scope: &RequestScope,
    ) -> (AttributeBags, Vec<ResolverFault>) {
        let _guard = match scope.enter() {
            Ok(guard) => guard,
            Err(err) => return (AttributeBags::default(), vec![fault("resolver", err.to_string())]),
        };

        let mut bags = AttributeBags::default();
        let mut faults = Vec::new();

        bags.action
            .insert("name".into(), abac_dsl::AttributeValue::String(request.action.clone()));

        let subject_ref = EntityRef::parse(&request.subject);
        let resource_ref = EntityRef::parse(&request.resource);

        let providers = self.providers.read().expect("provider registry poisoned").clone();

        if let Ok(entity) = &subject_ref {
            for provider in &providers {
                if scope.cancellation.is_cancelled() {
                    faults.push(fault(provider.namespace(), "cancelled"));
                    continue;
                }
                self.resolve_one(provider, entity, Role::Subject, scope, &mut bags.subject, &mut faults)
                    .await;
            }
        } else if let Err(err) = &subject_ref {
            faults.push(fault("resolver", format!("invalid subject reference: {err}")));
        }

        if let Ok(entity) = &resource_ref {
            for provider in &providers {
                if scope.cancellation.is_cancelled() {
                    faults.push(fault(provider.namespace(), "cancelled"));
                    continue;
                }
                self.resolve_one(provider, entity, Role::Resource, scope, &mut bags.resource, &mut faults)
                    .await;
            }
        } else if let Err(err) = &resource_ref {
            faults.push(fault("resolver", format!("invalid resource reference: {err}")));
        }

        let environment_providers = self
            .environment_providers
            .read()
            .expect("environment provider registry poisoned")
            .clone();
        for provider in &environment_providers {
            if scope.cancellation.is_cancelled() {
                faults.push(fault(provider.namespace(), "cancelled"));
                continue;
            }
            let namespace = provider.namespace().to_string();
            let provider = Arc::clone(provider);
            let ctx = ResolutionContext::new(scope.cancellation.clone());
            let task = tokio::spawn(async move { provider.resolve(&ctx).await });
            match tokio::time::timeout(self.provider_timeout(), task).await {
                Ok(Ok(Ok(attributes))) => self.merge(&namespace, &attributes, &mut bags.environment),
                Ok(Ok(Err(err))) => {
                    tracing::warn!(namespace = %namespace, error = %err, "environment provider failed");
                    faults.push(fault(namespace, err.to_string()));
                }
                Ok(Err(join_err)) => {
                    tracing::warn!(namespace = %namespace, panicked = join_err.is_panic(), "environment provider task did not complete");
                    faults.push(fault(namespace, "provider task panicked or was cancelled"));
                }
                Err(_) => {
                    tracing::warn!(namespace = %namespace, "environment provider timed out");
                    faults.push(fault(namespace, "provider timed out"));
                }
            }
        }

        (bags, faults)
    }

    async fn resolve_one(
        &self,
        provider: &Arc<dyn Provider>,
        entity: &EntityRef,
        role: Role,
        scope: &RequestScope,
        target: &mut AttributeBag,
        faults: &mut Vec<ResolverFault>,
    ) {
        let namespace = provider.namespace().to_string();
        let cache_key = format!("{}:{}:{}", role.as_str(), namespace, entity.id);

        if let Some(cached) = scope.cache_get(&cache_key).await {
            self.merge(&namespace, &cached, target);
            return;
        }

        let provider = Arc::clone(provider);
        let entity = entity.clone();
        let ctx = ResolutionContext::new(scope.cancellation.clone());
        let task = tokio::spawn(async move {
            match role {
                Role::Subject => provider.resolve_subject(&entity, &ctx).await,
                Role::Resource => provider.resolve_resource(&entity, &ctx).await,
            }
        });

        match tokio::time::timeout(self.provider_timeout(), task).await {
            Ok(Ok(Ok(Some(attributes)))) => {
                scope.cache_put(cache_key, attributes.clone()).await;
                self.merge(&namespace, &attributes, target);
            }
            Ok(Ok(Ok(None))) => {}
            Ok(Ok(Err(err))) => {
                tracing::warn!(namespace = %namespace, error = %err, "provider resolution failed");
                faults.push(fault(namespace, err.to_string()));
            }
            Ok(Err(join_err)) => {
                tracing::warn!(namespace = %namespace, panicked = join_err.is_panic(), "provider task did not complete");
                faults.push(fault(namespace, "provider task panicked or was cancelled"));
            }
            Err(_) => {
                tracing::warn!(namespace = %namespace, "provider timed out");
                faults.push(fault(namespace, "provider timed out"));
            }
        }
    }

    fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.config.provider_timeout_ms)
    }

    fn merge(&self, namespace: &str, attributes: &AttributeBag, target: &mut AttributeBag) {
        for (key, value) in attributes {
            if self.schema_registry.is_registered(namespace, key) {
                target.insert(format!("{namespace}.{key}"), value.clone());
            } else {
                *self
                    .rejected_attributes
                    .entry((namespace.to_string(), key.to_string()))
                    .or_insert(0) += 1;
                tracing::warn!(namespace, key, "rejected attribute not declared in provider schema");
            }
        }
    }

    /// Snapshot of the `rejected_provider_attributes_total{namespace,key}`
    /// counter, for callers wiring this into a metrics exporter.
    pub fn rejected_attribute_counts(&self) -> Vec<((String, String), u64)> {
        self.rejected_attributes
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{BasicEntityProvider, BasicEntityRecord, BasicEntityRepository};
    use crate::schema::SchemaRegistry;
    use async_trait::async_trait;
    use chrono::Utc;

    struct OneCharacter;

    #[async_trait]
    impl BasicEntityRepository for OneCharacter {
        async fn find(&self, id: &str) -> Result<Option<BasicEntityRecord>, crate::error::ProviderError> {
            Ok(Some(BasicEntityRecord {
                id: id.to_string(),
                owner_id: Some("acct-1".to_string()),
                type_name: "character".to_string(),
                linked_account: true,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            }))
        }
    }

    fn resolver_with_character_provider() -> Resolver {
        let resolver = Resolver::new(Arc::new(SchemaRegistry::new()));
        resolver
            .register_provider(Arc::new(BasicEntityProvider::character(Arc::new(OneCharacter))))
            .unwrap();
        resolver
    }

    #[tokio::test]
    async fn resolves_subject_attributes_with_namespace_prefix() {
        let resolver = resolver_with_character_provider();
        let request = ResolveRequest {
            subject: "character:01AA".to_string(),
            resource: "location:01BB".to_string(),
            action: "look".to_string(),
        };
        let (bags, faults) = resolver.resolve(&request).await;
        assert!(faults.is_empty());
        assert_eq!(
            bags.subject.get("character.id").unwrap().as_str(),
            Some("01AA")
        );
        assert_eq!(bags.action.get("name").unwrap().as_str(), Some("look"));
    }

    #[tokio::test]
    async fn reentrant_resolution_on_the_same_scope_is_rejected() {
        let resolver = resolver_with_character_provider();
        let scope = RequestScope::default();
        let _guard = scope.enter().unwrap();

        let request = ResolveRequest {
            subject: "character:01AA".to_string(),
            resource: "character:01BB".to_string(),
            action: "look".to_string(),
        };
        let (bags, faults) = resolver.resolve_with_scope(&request, &scope).await;
        assert!(bags.subject.is_empty());
        assert_eq!(faults.len(), 1);
        assert!(faults[0].reason.contains("re-entrant"));
    }

    #[tokio::test]
    async fn duplicate_namespace_from_a_different_provider_is_rejected() {
        let resolver = resolver_with_character_provider();
        let err = resolver
            .register_provider(Arc::new(BasicEntityProvider::character(Arc::new(OneCharacter))))
            .unwrap_err();
        assert!(matches!(err, ResolverError::NamespaceConflict(_)));
    }

    struct SlowCharacter;

    #[async_trait]
    impl BasicEntityRepository for SlowCharacter {
        async fn find(&self, id: &str) -> Result<Option<BasicEntityRecord>, crate::error::ProviderError> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(Some(BasicEntityRecord {
                id: id.to_string(),
                owner_id: None,
                type_name: "character".to_string(),
                linked_account: false,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            }))
        }
    }

    #[tokio::test]
    async fn provider_exceeding_configured_timeout_is_treated_as_a_fault() {
        let mut config = ResolverConfig::default();
        config.provider_timeout_ms = 20;
        let resolver = Resolver::with_config(Arc::new(SchemaRegistry::new()), config);
        resolver
            .register_provider(Arc::new(BasicEntityProvider::character(Arc::new(SlowCharacter))))
            .unwrap();

        let request = ResolveRequest {
            subject: "character:01AA".to_string(),
            resource: "location:01BB".to_string(),
            action: "look".to_string(),
        };
        let (bags, faults) = resolver.resolve(&request).await;
        assert!(bags.subject.is_empty());
        assert_eq!(faults.len(), 1);
        assert!(faults[0].reason.contains("timed out"));
    }
}
