//! Cross-module resolver behavior: provider isolation, schema filtering,
//! and namespace-prefixed merging from more than one provider at once.

use std::sync::Arc;

use abac_providers::{
    AttributeType, BasicEntityProvider, BasicEntityRecord, BasicEntityRepository, EntityRef,
    EnvironmentProvider, NamespaceSchema, Provider, ProviderError, ResolutionContext, ResolveRequest,
    Resolver, SchemaRegistry,
};
use async_trait::async_trait;
use chrono::Utc;

struct OneCharacter;

#[async_trait]
impl BasicEntityRepository for OneCharacter {
    async fn find(&self, id: &str) -> Result<Option<BasicEntityRecord>, ProviderError> {
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

/// A provider that always fails resolving resources, used to prove a
/// faulty provider never blocks the others' contributions.
struct AlwaysFailsProvider;

#[async_trait]
impl Provider for AlwaysFailsProvider {
    fn namespace(&self) -> &str {
        "flaky"
    }

    async fn resolve_subject(
        &self,
        _entity: &EntityRef,
        _ctx: &ResolutionContext,
    ) -> Result<Option<abac_dsl::AttributeBag>, ProviderError> {
        Err(ProviderError::ResolutionFailed {
            namespace: "flaky".to_string(),
            entity_ref: "character:01AA".to_string(),
            reason: "backing store unreachable".to_string(),
        })
    }

    async fn resolve_resource(
        &self,
        _entity: &EntityRef,
        _ctx: &ResolutionContext,
    ) -> Result<Option<abac_dsl::AttributeBag>, ProviderError> {
        Ok(None)
    }

    fn schema(&self) -> NamespaceSchema {
        NamespaceSchema::new([("status".to_string(), AttributeType::String)])
    }
}

/// A provider that declares a narrow schema but tries to leak an
/// undeclared key, to exercise schema-filtered merge.
struct LeakyProvider;

#[async_trait]
impl Provider for LeakyProvider {
    fn namespace(&self) -> &str {
        "leaky"
    }

    async fn resolve_subject(
        &self,
        _entity: &EntityRef,
        _ctx: &ResolutionContext,
    ) -> Result<Option<abac_dsl::AttributeBag>, ProviderError> {
        let mut bag = abac_dsl::AttributeBag::new();
        bag.insert(
            "declared".to_string(),
            abac_dsl::AttributeValue::String("ok".to_string()),
        );
        bag.insert(
            "undeclared".to_string(),
            abac_dsl::AttributeValue::String("should be dropped".to_string()),
        );
        Ok(Some(bag))
    }

    async fn resolve_resource(
        &self,
        _entity: &EntityRef,
        _ctx: &ResolutionContext,
    ) -> Result<Option<abac_dsl::AttributeBag>, ProviderError> {
        Ok(None)
    }

    fn schema(&self) -> NamespaceSchema {
        NamespaceSchema::new([("declared".to_string(), AttributeType::String)])
    }
}

#[tokio::test]
async fn one_providers_fault_never_blocks_another_providers_contribution() {
    let resolver = Resolver::new(Arc::new(SchemaRegistry::new()));
    resolver
        .register_provider(Arc::new(BasicEntityProvider::character(Arc::new(OneCharacter))))
        .unwrap();
    resolver.register_provider(Arc::new(AlwaysFailsProvider)).unwrap();

    let request = ResolveRequest {
        subject: "character:01AA".to_string(),
        resource: "location:01BB".to_string(),
        action: "look".to_string(),
    };
    let (bags, faults) = resolver.resolve(&request).await;

    assert_eq!(bags.subject.get("character.id").unwrap().as_str(), Some("01AA"));
    assert_eq!(faults.len(), 1);
    assert_eq!(faults[0].namespace, "flaky");
}

#[tokio::test]
async fn attribute_not_declared_in_the_providers_schema_is_dropped() {
    let resolver = Resolver::new(Arc::new(SchemaRegistry::new()));
    resolver.register_provider(Arc::new(LeakyProvider)).unwrap();

    let request = ResolveRequest {
        subject: "leaky:01AA".to_string(),
        resource: "location:01BB".to_string(),
        action: "look".to_string(),
    };
    let (bags, faults) = resolver.resolve(&request).await;

    assert!(faults.is_empty());
    assert_eq!(bags.subject.get("leaky.declared").unwrap().as_str(), Some("ok"));
    assert!(bags.subject.get("leaky.undeclared").is_none());

    let counts = resolver.rejected_attribute_counts();
    assert!(counts
        .iter()
        .any(|((namespace, key), count)| namespace == "leaky" && key == "undeclared" && *count == 1));
}

struct FixedEnvironment;

#[async_trait]
impl EnvironmentProvider for FixedEnvironment {
    fn namespace(&self) -> &str {
        "environment"
    }

    async fn resolve(&self, _ctx: &ResolutionContext) -> Result<abac_dsl::AttributeBag, ProviderError> {
        let mut bag = abac_dsl::AttributeBag::new();
        bag.insert(
            "maintenance".to_string(),
            abac_dsl::AttributeValue::Bool(true),
        );
        Ok(bag)
    }

    fn schema(&self) -> NamespaceSchema {
        NamespaceSchema::new([("maintenance".to_string(), AttributeType::Boolean)])
    }
}

#[tokio::test]
async fn environment_provider_contributes_into_the_environment_bag() {
    let resolver = Resolver::new(Arc::new(SchemaRegistry::new()));
    resolver
        .register_environment_provider(Arc::new(FixedEnvironment))
        .unwrap();

    let request = ResolveRequest {
        subject: "system".to_string(),
        resource: "system".to_string(),
        action: "tick".to_string(),
    };
    let (bags, faults) = resolver.resolve(&request).await;

    assert!(faults.is_empty());
    assert_eq!(
        bags.environment.get("environment.maintenance").unwrap().as_bool(),
        Some(true)
    );
}
