//! Display-name resolution
//!
//! Three-tier fallback: in-memory cache, then storage, then an optional
//! external resolver registered at startup. The sync [`NameService::resolve`]
//! never blocks; callers that can wait use the async variants, which also
//! write resolved names back through the lower tiers.

use crate::error::Result;
use crate::storage::StorageHandle;
use crate::types::AccountId;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// External id-to-name lookup capability.
///
/// Implementations are registered once at startup; absence of a resolver
/// just shortens the fallback chain.
#[async_trait]
pub trait NameResolver: Send + Sync {
    /// Resolve a display name for the account, if the upstream knows one
    async fn lookup_name(&self, id: AccountId) -> Result<Option<String>>;

    /// Resolve an account id from a display name
    async fn lookup_id(&self, name: &str) -> Result<Option<AccountId>>;
}

/// Cached display-name service
pub struct NameService {
    cache: DashMap<AccountId, String>,
    storage: StorageHandle,
    external: RwLock<Option<Arc<dyn NameResolver>>>,
}

impl NameService {
    /// Create a service with an empty cache and no external tier
    pub fn new(storage: StorageHandle) -> Self {
        Self {
            cache: DashMap::new(),
            storage,
            external: RwLock::new(None),
        }
    }

    /// Register the external resolver tier
    pub fn register_resolver(&self, resolver: Arc<dyn NameResolver>) {
        *self.external.write() = Some(resolver);
    }

    /// Bulk-load stored names into the cache
    pub async fn warmup(&self) -> Result<usize> {
        let names: HashMap<AccountId, String> = self.storage.all_names().await?;
        let count = names.len();
        for (id, name) in names {
            self.cache.insert(id, name);
        }
        tracing::info!(names = count, "Name cache warmed");
        Ok(count)
    }

    /// Record a live actor's current name in cache and storage
    pub async fn on_actor_join(&self, id: AccountId, name: &str) -> Result<()> {
        let stale = self
            .cache
            .insert(id, name.to_string())
            .map_or(true, |old| old != name);
        if stale {
            self.storage.set_name(id, name).await?;
        }
        Ok(())
    }

    /// Cached name or a truncated id preview. Never blocks.
    pub fn resolve(&self, id: AccountId) -> String {
        self.cache
            .get(&id)
            .map(|name| name.clone())
            .unwrap_or_else(|| id.preview())
    }

    /// Cached name only
    pub fn cached_name(&self, id: AccountId) -> Option<String> {
        self.cache.get(&id).map(|name| name.clone())
    }

    /// Resolve through the full chain, caching whatever tier answers
    pub async fn resolve_name(&self, id: AccountId) -> Result<String> {
        if let Some(name) = self.cached_name(id) {
            return Ok(name);
        }

        if let Some(name) = self.storage.name_of(id).await? {
            self.cache.insert(id, name.clone());
            return Ok(name);
        }

        let resolver = self.external.read().clone();
        if let Some(resolver) = resolver {
            if let Some(name) = resolver.lookup_name(id).await? {
                self.cache.insert(id, name.clone());
                self.storage.set_name(id, &name).await?;
                return Ok(name);
            }
        }

        Ok(id.preview())
    }

    /// Reverse lookup through the full chain
    pub async fn resolve_id(&self, name: &str) -> Result<Option<AccountId>> {
        let cached = self
            .cache
            .iter()
            .find(|entry| entry.value().eq_ignore_ascii_case(name))
            .map(|entry| *entry.key());
        if cached.is_some() {
            return Ok(cached);
        }

        if let Some(id) = self.storage.id_by_name(name).await? {
            return Ok(Some(id));
        }

        let resolver = self.external.read().clone();
        if let Some(resolver) = resolver {
            if let Some(id) = resolver.lookup_id(name).await? {
                self.cache.insert(id, name.to_string());
                self.storage.set_name(id, name).await?;
                return Ok(Some(id));
            }
        }

        Ok(None)
    }
}
