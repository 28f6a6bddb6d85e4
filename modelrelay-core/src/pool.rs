//! Per-provider connection pool.
//!
//! Bounded set of reusable transports with age and idle lifecycle
//! rules: connections older than `max_connection_age` are never
//! reused, idle connections are evicted by a periodic cleanup task,
//! and release returns a healthy connection to the pool only while
//! capacity allows. A warmup primitive pre-creates connections so the
//! first requests after startup skip the connect latency.

use crate::config::PoolConfig;
use crate::error::ProviderError;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

/// Creates and health-checks transports for one provider.
#[async_trait::async_trait]
pub trait Connector: Send + Sync + 'static {
    type Conn: Send + 'static;

    async fn connect(&self) -> Result<Self::Conn, ProviderError>;

    /// Last-known health of a pooled connection.
    fn is_healthy(&self, _conn: &Self::Conn) -> bool {
        true
    }
}

/// A pooled connection with its lifecycle stamps.
pub struct Pooled<C> {
    pub conn: C,
    created_at: Instant,
    last_used_at: Instant,
}

impl<C> Pooled<C> {
    fn new(conn: C) -> Self {
        let now = Instant::now();
        Self {
            conn,
            created_at: now,
            last_used_at: now,
        }
    }

    pub fn age(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }

    pub fn idle(&self) -> std::time::Duration {
        self.last_used_at.elapsed()
    }
}

/// Bounded reusable-connection pool for one provider.
pub struct ConnectionPool<C: Connector> {
    connector: C,
    idle: Mutex<VecDeque<Pooled<C::Conn>>>,
    config: PoolConfig,
    total_created: AtomicU64,
}

impl<C: Connector> ConnectionPool<C> {
    pub fn new(connector: C, config: PoolConfig) -> Self {
        Self {
            connector,
            idle: Mutex::new(VecDeque::new()),
            config,
            total_created: AtomicU64::new(0),
        }
    }

    /// Connections created over the pool's lifetime.
    pub fn total_created(&self) -> u64 {
        self.total_created.load(Ordering::Relaxed)
    }

    pub async fn idle_count(&self) -> usize {
        self.idle.lock().await.len()
    }

    /// Take a healthy pooled connection, or dial a new one.
    pub async fn acquire(&self) -> Result<Pooled<C::Conn>, ProviderError> {
        {
            let mut idle = self.idle.lock().await;
            while let Some(mut pooled) = idle.pop_front() {
                // Aged-out connections are dropped rather than reused.
                if pooled.age() > self.config.max_connection_age() {
                    continue;
                }
                if !self.connector.is_healthy(&pooled.conn) {
                    continue;
                }
                pooled.last_used_at = Instant::now();
                return Ok(pooled);
            }
        }

        let connect = self.connector.connect();
        let conn = match tokio::time::timeout(self.config.connection_timeout(), connect).await {
            Ok(result) => result?,
            Err(_) => return Err(ProviderError::Timeout),
        };
        self.total_created.fetch_add(1, Ordering::Relaxed);
        Ok(Pooled::new(conn))
    }

    /// Return a connection to the pool; unhealthy, aged, or surplus
    /// connections are disposed instead.
    pub async fn release(&self, mut pooled: Pooled<C::Conn>) {
        if pooled.age() > self.config.max_connection_age()
            || !self.connector.is_healthy(&pooled.conn)
        {
            return;
        }
        pooled.last_used_at = Instant::now();

        let mut idle = self.idle.lock().await;
        if idle.len() < self.config.max_connections_per_provider {
            idle.push_back(pooled);
        }
    }

    /// Pre-create `count` connections, bounded by pool capacity.
    pub async fn warmup(&self, count: usize) -> Result<usize, ProviderError> {
        let target = count.min(self.config.max_connections_per_provider);
        let mut created = 0;
        for _ in 0..target {
            let conn = self.connector.connect().await?;
            self.total_created.fetch_add(1, Ordering::Relaxed);
            let mut idle = self.idle.lock().await;
            if idle.len() >= self.config.max_connections_per_provider {
                break;
            }
            idle.push_back(Pooled::new(conn));
            created += 1;
        }
        Ok(created)
    }

    /// Drop idle connections past the idle bound or the age bound.
    pub async fn cleanup(&self) -> usize {
        let max_idle = self.config.max_idle();
        let max_age = self.config.max_connection_age();
        let mut idle = self.idle.lock().await;
        let before = idle.len();
        idle.retain(|pooled| pooled.idle() <= max_idle && pooled.age() <= max_age);
        before - idle.len()
    }
}

/// Spawn the periodic cleanup task for a shared pool.
pub fn start_cleanup_task<C: Connector>(
    pool: Arc<ConnectionPool<C>>,
    interval: std::time::Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            timer.tick().await;
            let evicted = pool.cleanup().await;
            if evicted > 0 {
                tracing::debug!(evicted, "evicted idle pool connections");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    struct CountingConnector {
        healthy: AtomicBool,
    }

    impl CountingConnector {
        fn new() -> Self {
            Self {
                healthy: AtomicBool::new(true),
            }
        }
    }

    #[async_trait::async_trait]
    impl Connector for CountingConnector {
        type Conn = u64;

        async fn connect(&self) -> Result<Self::Conn, ProviderError> {
            Ok(7)
        }

        fn is_healthy(&self, _conn: &Self::Conn) -> bool {
            self.healthy.load(Ordering::Relaxed)
        }
    }

    fn config() -> PoolConfig {
        PoolConfig {
            max_connections_per_provider: 4,
            max_connection_age_seconds: 300,
            max_idle_seconds: 60,
            connection_timeout_seconds: 5,
        }
    }

    #[tokio::test]
    async fn sequential_cycles_reuse_one_connection() {
        let pool = ConnectionPool::new(CountingConnector::new(), config());
        for _ in 0..10 {
            let conn = pool.acquire().await.unwrap();
            pool.release(conn).await;
        }
        assert_eq!(pool.total_created(), 1);
    }

    #[tokio::test]
    async fn unhealthy_connections_are_not_reused() {
        let pool = ConnectionPool::new(CountingConnector::new(), config());
        let conn = pool.acquire().await.unwrap();
        pool.release(conn).await;
        assert_eq!(pool.idle_count().await, 1);

        // Mark everything unhealthy; the pooled connection is skipped
        // and a fresh one dialed... which is immediately unhealthy too,
        // so release disposes it.
        pool.connector.healthy.store(false, Ordering::Relaxed);
        let conn = pool.acquire().await.unwrap();
        assert_eq!(pool.total_created(), 2);
        pool.release(conn).await;
        assert_eq!(pool.idle_count().await, 0);
    }

    #[tokio::test]
    async fn aged_connections_are_not_reused() {
        let mut fast_age = config();
        fast_age.max_connection_age_seconds = 0;
        let pool = ConnectionPool::new(CountingConnector::new(), fast_age);

        let conn = pool.acquire().await.unwrap();
        pool.release(conn).await;
        // Age bound of zero: the pooled connection is already stale.
        let _conn = pool.acquire().await.unwrap();
        assert_eq!(pool.total_created(), 2);
    }

    #[tokio::test]
    async fn warmup_pre_creates_up_to_capacity() {
        let pool = ConnectionPool::new(CountingConnector::new(), config());
        let created = pool.warmup(10).await.unwrap();
        assert_eq!(created, 4);
        assert_eq!(pool.idle_count().await, 4);
        assert_eq!(pool.total_created(), 4);

        // Warm connections serve acquires without new dials.
        let conn = pool.acquire().await.unwrap();
        assert_eq!(pool.total_created(), 4);
        pool.release(conn).await;
    }

    #[tokio::test]
    async fn cleanup_evicts_idle_connections() {
        let mut fast_idle = config();
        fast_idle.max_idle_seconds = 0;
        let pool = ConnectionPool::new(CountingConnector::new(), fast_idle);
        pool.warmup(2).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(pool.cleanup().await, 2);
        assert_eq!(pool.idle_count().await, 0);
    }

    #[tokio::test]
    async fn release_respects_capacity() {
        let mut tiny = config();
        tiny.max_connections_per_provider = 1;
        let pool = ConnectionPool::new(CountingConnector::new(), tiny);

        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        assert_eq!(pool.total_created(), 2);

        pool.release(a).await;
        pool.release(b).await;
        assert_eq!(pool.idle_count().await, 1);
    }
}
