//! Process-wide topology cache.
//!
//! Serving records are read on every resolution, so the router keeps one
//! read-mostly cache in front of the topology backend. Entries expire
//! after a TTL; a backend failure on refresh falls back to the stale
//! entry rather than failing the request. Staleness is expected: the
//! retry loop above absorbs it.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use meridian_core::TabletType;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::server::{EndPoint, SrvKeyspace, SrvTopoServer, TopoError, TopoResult};

/// Default time-to-live for cached serving records.
pub const TOPO_CACHE_TTL_DEFAULT: Duration = Duration::from_secs(5);

/// Configuration for [`CachedTopoServer`].
#[derive(Debug, Clone, Copy)]
pub struct TopoCacheConfig {
    /// Time-to-live for cached serving records.
    pub ttl: Duration,
}

impl Default for TopoCacheConfig {
    fn default() -> Self {
        Self {
            ttl: TOPO_CACHE_TTL_DEFAULT,
        }
    }
}

struct CacheEntry {
    srv: SrvKeyspace,
    fetched_at: Instant,
}

/// TTL cache in front of a [`SrvTopoServer`].
///
/// `get_srv_keyspace` is served from the cache while fresh; endpoint
/// lookups pass through, since endpoints churn with individual tablets.
pub struct CachedTopoServer<T> {
    inner: T,
    config: TopoCacheConfig,
    entries: RwLock<HashMap<(String, String), CacheEntry>>,
}

impl<T: SrvTopoServer> CachedTopoServer<T> {
    /// Wraps a topology server with the given cache configuration.
    pub fn new(inner: T, config: TopoCacheConfig) -> Self {
        Self {
            inner,
            config,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Wraps a topology server with the default TTL.
    pub fn with_defaults(inner: T) -> Self {
        Self::new(inner, TopoCacheConfig::default())
    }

    /// Returns the wrapped server.
    pub fn inner(&self) -> &T {
        &self.inner
    }

    /// Drops the cached record for a keyspace, forcing a refetch.
    pub async fn invalidate(&self, cell: &str, keyspace: &str) {
        self.entries
            .write()
            .await
            .remove(&(cell.to_string(), keyspace.to_string()));
    }

    /// Drops every expired entry.
    pub async fn evict_expired(&self) {
        let ttl = self.config.ttl;
        self.entries
            .write()
            .await
            .retain(|_, entry| entry.fetched_at.elapsed() <= ttl);
    }

    /// Number of cached records.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// True if nothing is cached.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl<T: SrvTopoServer> SrvTopoServer for CachedTopoServer<T> {
    async fn get_srv_keyspace(
        &self,
        ctx: &CancellationToken,
        cell: &str,
        keyspace: &str,
    ) -> TopoResult<SrvKeyspace> {
        let key = (cell.to_string(), keyspace.to_string());

        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(&key) {
                if entry.fetched_at.elapsed() <= self.config.ttl {
                    return Ok(entry.srv.clone());
                }
            }
        }

        match self.inner.get_srv_keyspace(ctx, cell, keyspace).await {
            Ok(srv) => {
                self.entries.write().await.insert(
                    key,
                    CacheEntry {
                        srv: srv.clone(),
                        fetched_at: Instant::now(),
                    },
                );
                Ok(srv)
            }
            Err(err @ TopoError::Cancelled) => Err(err),
            Err(err) => {
                // Refresh failed: a stale record beats no record.
                let entries = self.entries.read().await;
                if let Some(entry) = entries.get(&key) {
                    warn!(cell, keyspace, %err, "topology refresh failed, serving stale record");
                    return Ok(entry.srv.clone());
                }
                Err(err)
            }
        }
    }

    async fn get_end_points(
        &self,
        ctx: &CancellationToken,
        cell: &str,
        keyspace: &str,
        shard: &str,
        tablet_type: TabletType,
    ) -> TopoResult<Vec<EndPoint>> {
        self.inner
            .get_end_points(ctx, cell, keyspace, shard, tablet_type)
            .await
    }
}
