//! Per-tenant cache of compiled rule sets.
//!
//! Read-through with a TTL. Writers invalidate the tenant entry locally and
//! broadcast the tenant id so other processes drop theirs too (see
//! [`crate::invalidation`]).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::repository::TriageRuleRepository;
use crate::rules::{TriageRule, compile_rules, default_rules};

struct CachedRules {
    rules: Arc<[TriageRule]>,
    loaded_at: Instant,
}

impl CachedRules {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.loaded_at.elapsed() < ttl
    }
}

pub struct RuleCache {
    store: Arc<dyn TriageRuleRepository>,
    ttl: Duration,
    fallback_window_hours: u32,
    entries: RwLock<HashMap<Uuid, CachedRules>>,
}

impl RuleCache {
    pub fn new(store: Arc<dyn TriageRuleRepository>, ttl: Duration, fallback_window_hours: u32) -> Self {
        Self {
            store,
            ttl,
            fallback_window_hours,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Compiled active rules of a tenant, highest priority first.
    ///
    /// When the store cannot be read the default rule set is returned and
    /// nothing is cached, so the next call tries the store again.
    pub async fn rules_for(&self, tenant_id: Uuid) -> Arc<[TriageRule]> {
        if let Some(rules) = self.fresh(tenant_id).await {
            return rules;
        }

        let mut entries = self.entries.write().await;
        // Another task may have loaded it while we waited for the lock
        if let Some(cached) = entries.get(&tenant_id)
            && cached.is_fresh(self.ttl)
        {
            return Arc::clone(&cached.rules);
        }

        match self.store.list_active(tenant_id).await {
            Ok(definitions) => {
                let rules: Arc<[TriageRule]> = compile_rules(&definitions).into();
                tracing::debug!(tenant_id = %tenant_id, rules = rules.len(), "Loaded triage rules");
                entries.insert(
                    tenant_id,
                    CachedRules {
                        rules: Arc::clone(&rules),
                        loaded_at: Instant::now(),
                    },
                );
                rules
            }
            Err(e) => {
                tracing::warn!(
                    tenant_id = %tenant_id,
                    error = %e,
                    "Rule store unavailable, using default rule set"
                );
                default_rules(self.fallback_window_hours).into()
            }
        }
    }

    async fn fresh(&self, tenant_id: Uuid) -> Option<Arc<[TriageRule]>> {
        let entries = self.entries.read().await;
        entries
            .get(&tenant_id)
            .filter(|cached| cached.is_fresh(self.ttl))
            .map(|cached| Arc::clone(&cached.rules))
    }

    pub async fn invalidate(&self, tenant_id: Uuid) {
        if self.entries.write().await.remove(&tenant_id).is_some() {
            tracing::info!(tenant_id = %tenant_id, "Triage rule cache invalidated");
        }
    }

    pub async fn invalidate_all(&self) {
        self.entries.write().await.clear();
        tracing::info!("Triage rule cache cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TriageError;
    use crate::models::RuleDefinition;
    use crate::repository::MockTriageRuleRepository;
    use crate::rules::RuleKind;
    use chrono::Utc;
    use serde_json::json;

    fn stored(tenant_id: Uuid, max_age: u32) -> RuleDefinition {
        RuleDefinition {
            id: Uuid::new_v4(),
            tenant_id,
            name: "max age".to_string(),
            description: None,
            definition: json!({"tipo": "idade_maxima", "valor": max_age}),
            active: true,
            priority: 10,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_rules_loaded_once_within_ttl() {
        let tenant = Uuid::new_v4();
        let mut store = MockTriageRuleRepository::new();
        store
            .expect_list_active()
            .times(1)
            .returning(move |t| Ok(vec![stored(t, 70)]));

        let cache = RuleCache::new(Arc::new(store), Duration::from_secs(300), 6);
        let first = cache.rules_for(tenant).await;
        let second = cache.rules_for(tenant).await;

        assert_eq!(first[0].kind, RuleKind::MaxAge(70));
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_invalidate_forces_reload() {
        let tenant = Uuid::new_v4();
        let mut store = MockTriageRuleRepository::new();
        let mut seq = mockall::Sequence::new();
        store
            .expect_list_active()
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |t| Ok(vec![stored(t, 70)]));
        store
            .expect_list_active()
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |t| Ok(vec![stored(t, 75)]));

        let cache = RuleCache::new(Arc::new(store), Duration::from_secs(300), 6);
        assert_eq!(cache.rules_for(tenant).await[0].kind, RuleKind::MaxAge(70));

        cache.invalidate(tenant).await;
        assert_eq!(cache.rules_for(tenant).await[0].kind, RuleKind::MaxAge(75));
    }

    #[tokio::test]
    async fn test_expired_entries_reload() {
        let tenant = Uuid::new_v4();
        let mut store = MockTriageRuleRepository::new();
        store
            .expect_list_active()
            .times(2)
            .returning(move |t| Ok(vec![stored(t, 70)]));

        let cache = RuleCache::new(Arc::new(store), Duration::ZERO, 6);
        cache.rules_for(tenant).await;
        cache.rules_for(tenant).await;
    }

    #[tokio::test]
    async fn test_store_failure_falls_back_to_defaults_uncached() {
        let tenant = Uuid::new_v4();
        let mut store = MockTriageRuleRepository::new();
        store
            .expect_list_active()
            .times(2)
            .returning(|_| Err(TriageError::Database(sea_orm::DbErr::Custom("down".into()))));

        let cache = RuleCache::new(Arc::new(store), Duration::from_secs(300), 6);
        let rules = cache.rules_for(tenant).await;
        assert_eq!(rules.len(), 3);
        assert!(rules.iter().any(|r| r.kind == RuleKind::WindowHours(6)));

        cache.rules_for(tenant).await;
    }

    #[tokio::test]
    async fn test_tenants_are_cached_separately() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut store = MockTriageRuleRepository::new();
        store
            .expect_list_active()
            .times(2)
            .returning(move |t| Ok(vec![stored(t, if t == a { 60 } else { 90 })]));

        let cache = RuleCache::new(Arc::new(store), Duration::from_secs(300), 6);
        assert_eq!(cache.rules_for(a).await[0].kind, RuleKind::MaxAge(60));
        assert_eq!(cache.rules_for(b).await[0].kind, RuleKind::MaxAge(90));

        cache.invalidate_all().await;
    }
}
