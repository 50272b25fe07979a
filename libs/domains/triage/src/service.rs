use std::sync::Arc;

use core_tenancy::TenantScope;
use tracing::{instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::cache::RuleCache;
use crate::error::{TriageError, TriageResult};
use crate::invalidation::InvalidationPublisher;
use crate::models::{CreateRule, RuleDefinition, UpdateRule};
use crate::repository::TriageRuleRepository;
use crate::rules::parse_document;

/// Write side of the triage rules.
///
/// Every accepted write drops the tenant's cached rule set here and
/// broadcasts it to the other processes.
#[derive(Clone)]
pub struct TriageRuleService {
    repository: Arc<dyn TriageRuleRepository>,
    cache: Option<Arc<RuleCache>>,
    publisher: Option<Arc<dyn InvalidationPublisher>>,
}

impl TriageRuleService {
    pub fn new(repository: Arc<dyn TriageRuleRepository>) -> Self {
        Self {
            repository,
            cache: None,
            publisher: None,
        }
    }

    /// Invalidate this process's cache on writes
    pub fn with_cache(mut self, cache: Arc<RuleCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Broadcast invalidations to other processes
    pub fn with_publisher(mut self, publisher: Arc<dyn InvalidationPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub async fn list(&self, scope: TenantScope) -> TriageResult<Vec<RuleDefinition>> {
        self.repository.list(scope).await
    }

    pub async fn get(&self, scope: TenantScope, id: Uuid) -> TriageResult<RuleDefinition> {
        self.repository
            .find(scope, id)
            .await?
            .ok_or(TriageError::RuleNotFound(id))
    }

    #[instrument(skip(self, input), fields(rule = %input.name))]
    pub async fn create(&self, scope: TenantScope, input: CreateRule) -> TriageResult<RuleDefinition> {
        let tenant_id = scope.require_tenant_id()?;
        input
            .validate()
            .map_err(|e| TriageError::Validation(e.to_string()))?;
        parse_document(&input.definition)?;

        let rule = self.repository.create(tenant_id, input).await?;
        tracing::info!(rule_id = %rule.id, tenant_id = %tenant_id, "Triage rule created");
        self.invalidate(tenant_id).await;
        Ok(rule)
    }

    #[instrument(skip(self, input))]
    pub async fn update(
        &self,
        scope: TenantScope,
        id: Uuid,
        input: UpdateRule,
    ) -> TriageResult<RuleDefinition> {
        input
            .validate()
            .map_err(|e| TriageError::Validation(e.to_string()))?;
        if let Some(definition) = &input.definition {
            parse_document(definition)?;
        }

        let existing = self.get(scope, id).await?;
        let rule = self.repository.update(id, input).await?;
        tracing::info!(rule_id = %id, tenant_id = %existing.tenant_id, "Triage rule updated");
        self.invalidate(existing.tenant_id).await;
        Ok(rule)
    }

    /// Rules are never deleted, only switched off
    pub async fn deactivate(&self, scope: TenantScope, id: Uuid) -> TriageResult<RuleDefinition> {
        self.update(
            scope,
            id,
            UpdateRule {
                active: Some(false),
                ..Default::default()
            },
        )
        .await
    }

    async fn invalidate(&self, tenant_id: Uuid) {
        if let Some(cache) = &self.cache {
            cache.invalidate(tenant_id).await;
        }
        if let Some(publisher) = &self.publisher {
            // Remote caches still expire on their TTL
            if let Err(e) = publisher.publish(tenant_id).await {
                warn!(tenant_id = %tenant_id, error = %e, "Failed to broadcast rule invalidation");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invalidation::MockInvalidationPublisher;
    use crate::repository::MockTriageRuleRepository;
    use crate::rules::RuleParseError;
    use chrono::Utc;
    use core_tenancy::TenancyError;
    use mockall::predicate::eq;
    use serde_json::{Value, json};

    fn stored(tenant_id: Uuid, definition: Value) -> RuleDefinition {
        RuleDefinition {
            id: Uuid::new_v4(),
            tenant_id,
            name: "max age".to_string(),
            description: None,
            definition,
            active: true,
            priority: 10,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn create_input(definition: Value) -> CreateRule {
        CreateRule {
            name: "max age".to_string(),
            description: Some("Upper age bound".to_string()),
            definition,
            priority: 10,
        }
    }

    #[tokio::test]
    async fn test_create_persists_and_broadcasts() {
        let tenant = Uuid::new_v4();
        let mut repo = MockTriageRuleRepository::new();
        repo.expect_create()
            .withf(move |t, input| *t == tenant && input.priority == 10)
            .times(1)
            .returning(|t, input| Ok(stored(t, input.definition)));
        let mut publisher = MockInvalidationPublisher::new();
        publisher.expect_publish().with(eq(tenant)).times(1).returning(|_| Ok(()));

        let service = TriageRuleService::new(Arc::new(repo)).with_publisher(Arc::new(publisher));
        let rule = service
            .create(
                TenantScope::tenant(tenant),
                create_input(json!({"tipo": "idade_maxima", "valor": 75})),
            )
            .await
            .unwrap();
        assert_eq!(rule.tenant_id, tenant);
    }

    #[tokio::test]
    async fn test_create_rejects_unparseable_definition() {
        let mut repo = MockTriageRuleRepository::new();
        repo.expect_create().never();

        let service = TriageRuleService::new(Arc::new(repo));
        let err = service
            .create(
                TenantScope::tenant(Uuid::new_v4()),
                create_input(json!({"tipo": "signo", "valor": "leao"})),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TriageError::RuleParse(RuleParseError::UnknownType(_))));
    }

    #[tokio::test]
    async fn test_create_requires_tenant() {
        let service = TriageRuleService::new(Arc::new(MockTriageRuleRepository::new()));
        let err = service
            .create(
                TenantScope::unscoped(),
                create_input(json!({"tipo": "idade_maxima", "valor": 75})),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TriageError::Tenancy(TenancyError::TenantRequired)));
    }

    #[tokio::test]
    async fn test_deactivate_out_of_scope_is_not_found() {
        let mut repo = MockTriageRuleRepository::new();
        repo.expect_find().returning(|_, _| Ok(None));
        repo.expect_update().never();

        let service = TriageRuleService::new(Arc::new(repo));
        let id = Uuid::new_v4();
        let err = service
            .deactivate(TenantScope::tenant(Uuid::new_v4()), id)
            .await
            .unwrap_err();
        assert!(matches!(err, TriageError::RuleNotFound(e) if e == id));
    }

    #[tokio::test]
    async fn test_deactivate_invalidates_local_cache() {
        let tenant = Uuid::new_v4();
        let existing = stored(tenant, json!({"tipo": "idade_maxima", "valor": 70}));
        let rule_id = existing.id;

        let mut repo = MockTriageRuleRepository::new();
        let found = existing.clone();
        repo.expect_find().returning(move |_, _| Ok(Some(found.clone())));
        repo.expect_update()
            .withf(move |id, input| *id == rule_id && input.active == Some(false))
            .returning(move |_, _| {
                let mut rule = existing.clone();
                rule.active = false;
                Ok(rule)
            });

        let mut cache_store = MockTriageRuleRepository::new();
        cache_store
            .expect_list_active()
            .times(2)
            .returning(|_| Ok(vec![]));
        let cache = Arc::new(RuleCache::new(
            Arc::new(cache_store),
            std::time::Duration::from_secs(300),
            6,
        ));
        cache.rules_for(tenant).await;

        let mut publisher = MockInvalidationPublisher::new();
        publisher
            .expect_publish()
            .returning(|_| Err(TriageError::Validation("redis down".into())));

        let service = TriageRuleService::new(Arc::new(repo))
            .with_cache(Arc::clone(&cache))
            .with_publisher(Arc::new(publisher));
        let rule = service
            .deactivate(TenantScope::tenant(tenant), rule_id)
            .await
            .unwrap();
        assert!(!rule.active);

        // Reloads from the store after invalidation
        cache.rules_for(tenant).await;
    }

    #[tokio::test]
    async fn test_update_validates_new_definition() {
        let mut repo = MockTriageRuleRepository::new();
        repo.expect_update().never();

        let service = TriageRuleService::new(Arc::new(repo));
        let err = service
            .update(
                TenantScope::unscoped(),
                Uuid::new_v4(),
                UpdateRule {
                    definition: Some(json!({"tipo": "janela_horas", "valor": 0})),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TriageError::RuleParse(_)));
    }
}
