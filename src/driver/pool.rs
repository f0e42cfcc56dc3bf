//! Connection pool with lease tracking.
//!
//! Every acquisition is a lease recorded with its call site and backtrace
//! until the connection comes back. When `acquire` times out, the error
//! lists every outstanding lease so the holder can be found.

use std::backtrace::Backtrace;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::Location;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, warn};

use super::{Connection, Driver};
use crate::error::{CqnError, CqnResult};
use crate::transpiler::Dialect;

#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    pub max_connections: usize,
    pub min_connections: usize,
    pub idle_timeout: Duration,
    pub acquire_timeout: Duration,
    pub max_lifetime: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolConfig {
    /// Create a new pool configuration with sensible defaults.
    pub fn new() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            idle_timeout: Duration::from_secs(600), // 10 minutes
            acquire_timeout: Duration::from_secs(30),
            max_lifetime: None,
        }
    }

    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set minimum idle connections opened up front.
    pub fn min_connections(mut self, min: usize) -> Self {
        self.min_connections = min;
        self
    }

    /// Set idle timeout (connections idle longer than this are closed).
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set acquire timeout (max wait time when getting a connection).
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Set maximum lifetime of a connection before recycling.
    pub fn max_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_lifetime = Some(lifetime);
        self
    }
}

/// Pool statistics for monitoring.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PoolStats {
    pub active: usize,
    pub idle: usize,
    /// Maximum connections configured
    pub max_size: usize,
    pub total_created: usize,
    pub leases: usize,
}

/// One outstanding acquisition.
#[derive(Debug, Clone)]
pub struct Lease {
    pub id: u64,
    pub site: &'static Location<'static>,
    pub acquired_at: Instant,
    pub backtrace: String,
    /// Where the current transaction on this lease was begun.
    pub begin_site: Option<&'static Location<'static>>,
}

impl fmt::Display for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "lease #{} acquired at {} ({:?} ago)",
            self.id,
            self.site,
            self.acquired_at.elapsed()
        )?;
        if let Some(begin) = self.begin_site {
            write!(f, ", transaction begun at {}", begin)?;
        }
        if !self.backtrace.is_empty() {
            write!(f, "\n{}", self.backtrace)?;
        }
        Ok(())
    }
}

/// An idle connection with timestamps for recycling.
struct IdleConn {
    conn: Box<dyn Connection>,
    created_at: Instant,
    last_used: Instant,
}

/// A leased connection. Returned to the pool by [`PooledConnection::release`]
/// or, failing that, when dropped.
pub struct PooledConnection {
    conn: Option<Box<dyn Connection>>,
    created_at: Instant,
    lease: u64,
    pool: Arc<PoolInner>,
}

impl PooledConnection {
    pub fn lease_id(&self) -> u64 {
        self.lease
    }

    /// Record where a transaction on this connection was begun.
    pub fn mark_begin(&self, site: &'static Location<'static>) {
        self.pool.with_leases(|leases| {
            if let Some(lease) = leases.get_mut(&self.lease) {
                lease.begin_site = Some(site);
            }
        });
    }

    /// Give the connection back. With `discard`, it is closed instead of
    /// reused (e.g. after an error left it in an unknown state).
    pub async fn release(mut self, discard: bool) {
        self.pool.end_lease(self.lease);
        if let Some(conn) = self.conn.take() {
            if discard {
                self.pool.discard(conn).await;
            } else {
                self.pool.return_connection(conn, self.created_at).await;
            }
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        self.pool.end_lease(self.lease);
        let pool = self.pool.clone();
        let created_at = self.created_at;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    pool.return_connection(conn, created_at).await;
                });
            }
            Err(_) => {
                drop(conn);
                pool.forget_connection();
            }
        }
    }
}

impl std::ops::Deref for PooledConnection {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        self.conn
            .as_deref()
            .expect("Connection should always be present")
    }
}

impl std::ops::DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn
            .as_deref_mut()
            .expect("Connection should always be present")
    }
}

/// Inner pool state (shared across clones).
struct PoolInner {
    driver: Arc<dyn Driver>,
    config: PoolConfig,
    connections: Mutex<Vec<IdleConn>>,
    semaphore: Semaphore,
    closed: AtomicBool,
    active_count: AtomicUsize,
    total_created: AtomicUsize,
    next_lease: AtomicU64,
    leases: std::sync::Mutex<HashMap<u64, Lease>>,
}

impl PoolInner {
    fn with_leases<T>(&self, f: impl FnOnce(&mut HashMap<u64, Lease>) -> T) -> T {
        let mut leases = self.leases.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut leases)
    }

    fn end_lease(&self, id: u64) {
        self.with_leases(|leases| leases.remove(&id));
    }

    fn held(&self) -> Vec<String> {
        self.with_leases(|leases| {
            let mut held: Vec<&Lease> = leases.values().collect();
            held.sort_by_key(|l| l.id);
            held.iter().map(|l| l.to_string()).collect()
        })
    }

    async fn return_connection(&self, conn: Box<dyn Connection>, created_at: Instant) {
        self.active_count.fetch_sub(1, Ordering::Relaxed);

        if self.closed.load(Ordering::Relaxed) {
            return;
        }

        let mut connections = self.connections.lock().await;
        if connections.len() < self.config.max_connections {
            connections.push(IdleConn {
                conn,
                created_at,
                last_used: Instant::now(),
            });
        }
        drop(connections);

        self.semaphore.add_permits(1);
    }

    async fn discard(&self, conn: Box<dyn Connection>) {
        warn!("discarding pooled connection");
        if let Err(e) = conn.close().await {
            debug!("closing discarded connection failed: {}", e);
        }
        self.forget_connection();
    }

    /// A leased connection is gone for good; free its slot.
    fn forget_connection(&self) {
        self.active_count.fetch_sub(1, Ordering::Relaxed);
        if !self.closed.load(Ordering::Relaxed) {
            self.semaphore.add_permits(1);
        }
    }

    /// Get a healthy connection from the pool, or None if pool is empty.
    async fn get_healthy_connection(&self) -> Option<IdleConn> {
        let mut connections = self.connections.lock().await;

        while let Some(pooled) = connections.pop() {
            if pooled.last_used.elapsed() > self.config.idle_timeout {
                debug!("closing idle connection");
                continue;
            }

            if let Some(max_life) = self.config.max_lifetime
                && pooled.created_at.elapsed() > max_life
            {
                debug!("recycling connection past its lifetime");
                continue;
            }

            return Some(pooled);
        }

        None
    }
}

/// # Example
/// ```ignore
/// let driver = Arc::new(AnyDriver::new("sqlite::memory:")?);
/// let pool = Pool::connect(driver, PoolConfig::new().max_connections(4)).await?;
/// let mut conn = pool.acquire().await?;
/// conn.batch("SELECT 1").await?;
/// conn.release(false).await;
/// ```
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl Pool {
    /// Create a pool without opening any connection yet.
    pub fn new(driver: Arc<dyn Driver>, config: PoolConfig) -> Self {
        Self::with_connections(driver, config, Vec::new())
    }

    /// Create a pool and open `min_connections` up front.
    pub async fn connect(driver: Arc<dyn Driver>, config: PoolConfig) -> CqnResult<Self> {
        let mut initial = Vec::with_capacity(config.min_connections);
        for _ in 0..config.min_connections.min(config.max_connections) {
            let conn = driver.connect().await?;
            initial.push(IdleConn {
                conn,
                created_at: Instant::now(),
                last_used: Instant::now(),
            });
        }
        info!(
            "pool for {} ready with {} of at most {} connections",
            driver.dialect(),
            initial.len(),
            config.max_connections
        );
        Ok(Self::with_connections(driver, config, initial))
    }

    fn with_connections(
        driver: Arc<dyn Driver>,
        config: PoolConfig,
        initial: Vec<IdleConn>,
    ) -> Self {
        let initial_count = initial.len();
        let inner = Arc::new(PoolInner {
            driver,
            semaphore: Semaphore::new(config.max_connections),
            config,
            connections: Mutex::new(initial),
            closed: AtomicBool::new(false),
            active_count: AtomicUsize::new(0),
            total_created: AtomicUsize::new(initial_count),
            next_lease: AtomicU64::new(1),
            leases: std::sync::Mutex::new(HashMap::new()),
        });
        Self { inner }
    }

    pub fn dialect(&self) -> Dialect {
        self.inner.driver.dialect()
    }

    /// Acquire a connection, recording the caller as the lease site.
    #[track_caller]
    pub fn acquire(&self) -> impl Future<Output = CqnResult<PooledConnection>> + Send + '_ {
        let site = Location::caller();
        self.acquire_at(site)
    }

    /// Acquire on behalf of `site`.
    pub async fn acquire_at(
        &self,
        site: &'static Location<'static>,
    ) -> CqnResult<PooledConnection> {
        if self.inner.closed.load(Ordering::Relaxed) {
            return Err(CqnError::PoolClosed);
        }

        // Wait for available slot with timeout
        let waited = self.inner.config.acquire_timeout;
        let permit = match tokio::time::timeout(waited, self.inner.semaphore.acquire()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(CqnError::PoolClosed),
            Err(_) => {
                let held = self.inner.held();
                warn!("acquire at {} timed out after {:?} with {} leases held", site, waited, held.len());
                return Err(CqnError::PoolTimeout { waited, held });
            }
        };
        permit.forget();

        let (conn, created_at) = match self.inner.get_healthy_connection().await {
            Some(idle) => (idle.conn, idle.created_at),
            None => match self.inner.driver.connect().await {
                Ok(conn) => {
                    self.inner.total_created.fetch_add(1, Ordering::Relaxed);
                    (conn, Instant::now())
                }
                Err(e) => {
                    self.inner.semaphore.add_permits(1);
                    return Err(e);
                }
            },
        };

        self.inner.active_count.fetch_add(1, Ordering::Relaxed);
        let id = self.inner.next_lease.fetch_add(1, Ordering::Relaxed);
        let lease = Lease {
            id,
            site,
            acquired_at: Instant::now(),
            backtrace: match Backtrace::capture() {
                bt if bt.status() == std::backtrace::BacktraceStatus::Captured => bt.to_string(),
                _ => String::new(),
            },
            begin_site: None,
        };
        self.inner.with_leases(|leases| leases.insert(id, lease));
        debug!("lease #{} acquired at {}", id, site);

        Ok(PooledConnection {
            conn: Some(conn),
            created_at,
            lease: id,
            pool: self.inner.clone(),
        })
    }

    /// Outstanding leases, oldest first.
    pub fn leases(&self) -> Vec<Lease> {
        self.inner.with_leases(|leases| {
            let mut all: Vec<Lease> = leases.values().cloned().collect();
            all.sort_by_key(|l| l.id);
            all
        })
    }

    /// Get the number of connections currently in use.
    pub fn active_count(&self) -> usize {
        self.inner.active_count.load(Ordering::Relaxed)
    }

    /// Get comprehensive pool statistics.
    pub async fn stats(&self) -> PoolStats {
        let idle = self.inner.connections.lock().await.len();
        PoolStats {
            active: self.active_count(),
            idle,
            max_size: self.inner.config.max_connections,
            total_created: self.inner.total_created.load(Ordering::Relaxed),
            leases: self.inner.with_leases(|leases| leases.len()),
        }
    }

    /// Check if the pool is closed.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Relaxed)
    }

    /// Close the pool: pending and future acquires fail, idle connections
    /// are closed, leased ones are closed when they come back.
    pub async fn close(&self) {
        self.inner.closed.store(true, Ordering::Relaxed);
        self.inner.semaphore.close();

        let idle: Vec<IdleConn> = self.inner.connections.lock().await.drain(..).collect();
        for pooled in idle {
            if let Err(e) = pooled.conn.close().await {
                debug!("closing idle connection failed: {}", e);
            }
        }
        info!("pool closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::recording::RecordingDriver;

    fn pool(config: PoolConfig) -> (Pool, RecordingDriver) {
        let driver = RecordingDriver::new(Dialect::SQLite);
        (Pool::new(Arc::new(driver.clone()), config), driver)
    }

    #[test]
    fn test_pool_config() {
        let config = PoolConfig::new()
            .max_connections(20)
            .min_connections(5)
            .acquire_timeout(Duration::from_millis(250))
            .max_lifetime(Duration::from_secs(60));

        assert_eq!(config.max_connections, 20);
        assert_eq!(config.min_connections, 5);
        assert_eq!(config.acquire_timeout, Duration::from_millis(250));
        assert_eq!(config.max_lifetime, Some(Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn test_released_connections_are_reused() {
        let (pool, driver) = pool(PoolConfig::new().max_connections(2));
        let conn = pool.acquire().await.unwrap();
        assert_eq!(pool.leases().len(), 1);
        conn.release(false).await;
        assert!(pool.leases().is_empty());

        let conn = pool.acquire().await.unwrap();
        conn.release(false).await;
        assert_eq!(driver.connects(), 1);

        let stats = pool.stats().await;
        assert_eq!(stats.idle, 1);
        assert_eq!(stats.active, 0);
        assert_eq!(stats.total_created, 1);
    }

    #[tokio::test]
    async fn test_discarded_connections_are_replaced() {
        let (pool, driver) = pool(PoolConfig::new().max_connections(1));
        let conn = pool.acquire().await.unwrap();
        conn.release(true).await;
        let conn = pool.acquire().await.unwrap();
        conn.release(false).await;
        assert_eq!(driver.connects(), 2);
    }

    #[tokio::test]
    async fn test_timeout_lists_held_leases() {
        let (pool, _) = pool(
            PoolConfig::new()
                .max_connections(1)
                .acquire_timeout(Duration::from_millis(20)),
        );
        let held = pool.acquire().await.unwrap();
        held.mark_begin(Location::caller());

        let err = match pool.acquire().await {
            Err(e) => e,
            Ok(_) => panic!("second acquire should time out"),
        };
        let CqnError::PoolTimeout { held: leases, .. } = &err else {
            panic!("expected a pool timeout, got {}", err);
        };
        assert_eq!(leases.len(), 1);
        assert!(leases[0].contains("src/driver/pool.rs"), "{}", leases[0]);
        assert!(leases[0].contains("transaction begun at"), "{}", leases[0]);

        held.release(false).await;
        pool.acquire().await.unwrap().release(false).await;
    }

    #[tokio::test]
    async fn test_dropped_connection_returns_to_pool() {
        let (pool, _) = pool(
            PoolConfig::new()
                .max_connections(1)
                .acquire_timeout(Duration::from_secs(1)),
        );
        let conn = pool.acquire().await.unwrap();
        drop(conn);
        assert!(pool.leases().is_empty());

        let conn = pool.acquire().await.unwrap();
        conn.release(false).await;
        assert_eq!(pool.active_count(), 0);
    }

    #[tokio::test]
    async fn test_closed_pool_rejects_acquire() {
        let (pool, _) = pool(PoolConfig::new());
        pool.close().await;
        assert!(pool.is_closed());
        assert!(matches!(pool.acquire().await, Err(CqnError::PoolClosed)));
    }

    #[tokio::test]
    async fn test_connect_warms_up_min_connections() {
        let driver = RecordingDriver::new(Dialect::SQLite);
        let pool = Pool::connect(
            Arc::new(driver.clone()),
            PoolConfig::new().min_connections(2).max_connections(4),
        )
        .await
        .unwrap();
        assert_eq!(driver.connects(), 2);
        assert_eq!(pool.stats().await.idle, 2);
    }
}
