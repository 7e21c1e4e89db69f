//! Generic provider
//!
//! [`Provider`] owns the lifecycle state machine, statistics and logging
//! shared by every backend. A [`Driver`] supplies what differs: turning a
//! built connection string into a sqlx pool, the version and storage-size
//! queries, and whether backups are supported.

use crate::backup::BackupProvider;
use crate::config::DatabaseConfig;
use crate::database::connection::{DatabaseBackend, DatabasePool};
use crate::database::pool::PoolSettings;
use crate::database::provider::{ConnectionState, DatabaseProvider};
use crate::database::schema::Model;
use crate::database::stats::{DatabaseStats, HealthStatus, StatsTracker};
use crate::database::transaction::{Transaction, TransactionInner};
use crate::error::{DatabaseError, Result};
use crate::logging::{log_error, log_info, log_warn, Logger};
use crate::security::{build_dsn, sanitize};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;

/// Bound on the ping performed while connecting
pub const CONNECT_PING_TIMEOUT: Duration = Duration::from_secs(5);
/// Bound on `ping`
pub const PING_TIMEOUT: Duration = Duration::from_secs(5);
/// Bound on `health_check`
pub const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);
/// Bound on the storage-size query in `stats`
const SIZE_QUERY_TIMEOUT: Duration = Duration::from_secs(2);

const UNKNOWN_VERSION: &str = "unknown";

/// Backend-specific half of a provider
#[async_trait]
pub trait Driver: Send + Sync + 'static {
    /// Backend this driver speaks to
    fn backend(&self) -> DatabaseBackend;

    /// Open a pool for an already built and validated connection string
    async fn open(
        &self,
        dsn: &str,
        settings: PoolSettings,
        logger: &Logger,
    ) -> Result<DatabasePool>;

    /// Query returning the backend version as text
    fn version_query(&self) -> &'static str;

    /// Query returning the dataset's storage size in bytes
    fn size_query(&self) -> &'static str;

    /// Backup capability of a provider using this driver
    fn backup_capability(provider: &Provider<Self>) -> Option<&dyn BackupProvider>
    where
        Self: Sized,
    {
        let _ = provider;
        None
    }
}

#[derive(Default)]
struct ConnState {
    pool: Option<DatabasePool>,
    settings: Option<PoolSettings>,
    config: Option<DatabaseConfig>,
}

/// Database provider for one backend
pub struct Provider<D: Driver> {
    driver: D,
    state: tokio::sync::RwLock<ConnState>,
    phase: Mutex<ConnectionState>,
    version: RwLock<String>,
    stats: Arc<StatsTracker>,
    logger: RwLock<Logger>,
}

impl<D: Driver> Provider<D> {
    /// Disconnected provider around a driver
    pub fn with_driver(driver: D, logger: Logger) -> Self {
        Self {
            driver,
            state: tokio::sync::RwLock::new(ConnState::default()),
            phase: Mutex::new(ConnectionState::Disconnected),
            version: RwLock::new(UNKNOWN_VERSION.to_string()),
            stats: Arc::new(StatsTracker::default()),
            logger: RwLock::new(logger),
        }
    }

    /// Backend of this provider
    pub fn backend(&self) -> DatabaseBackend {
        self.driver.backend()
    }

    pub(crate) fn logger(&self) -> Logger {
        self.logger.read().clone()
    }

    pub(crate) fn tracker(&self) -> &Arc<StatsTracker> {
        &self.stats
    }

    /// Pool of a connected provider
    pub(crate) async fn pool(&self) -> Result<DatabasePool> {
        self.state
            .read()
            .await
            .pool
            .clone()
            .ok_or(DatabaseError::NotConnected)
    }

    /// Configuration of the last successful connect
    pub(crate) async fn last_config(&self) -> Option<DatabaseConfig> {
        self.state.read().await.config.clone()
    }

    fn set_phase(&self, phase: ConnectionState) {
        *self.phase.lock() = phase;
    }

    async fn open(&self, config: &DatabaseConfig, logger: &Logger) -> Result<(DatabasePool, PoolSettings)> {
        let backend = config.validate()?;
        if backend != self.backend() {
            return Err(DatabaseError::config(format!(
                "configuration is for {} but this provider is {}",
                backend,
                self.backend()
            )));
        }

        let dsn = build_dsn(backend, &config.dsn, &config.options, config.strict_dsn)?;
        let settings = PoolSettings::resolve(backend, &config.pool);
        let pool = self.driver.open(&dsn, settings, logger).await?;

        let ping = timeout(CONNECT_PING_TIMEOUT, pool.ping()).await;
        let failure = match ping {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(DatabaseError::connection("initial ping failed", e)),
            Err(_) => Some(DatabaseError::Connection(format!(
                "initial ping timed out after {:?}",
                CONNECT_PING_TIMEOUT
            ))),
        };
        if let Some(err) = failure {
            pool.close().await;
            return Err(err);
        }

        match pool.fetch_string(self.driver.version_query()).await {
            Ok(version) => *self.version.write() = version,
            Err(e) => log_warn!(logger, error = %sanitize(&e.to_string()), "could not detect server version"),
        }

        Ok((pool, settings))
    }

    async fn timed_execute(&self, pool: &DatabasePool, operation: &str, sql: &str) -> std::result::Result<u64, sqlx::Error> {
        let start = Instant::now();
        let result = pool.execute(sql).await;
        self.stats
            .observe(&self.logger(), operation, start.elapsed(), result.is_ok());
        result
    }
}

#[async_trait]
impl<D: Driver> DatabaseProvider for Provider<D> {
    async fn connect(&self, config: &DatabaseConfig) -> Result<()> {
        let mut state = self.state.write().await;
        if state.pool.is_some() {
            return Err(DatabaseError::AlreadyConnected);
        }
        self.set_phase(ConnectionState::Connecting);

        let logger = self.logger().with_level(config.log_level);
        *self.logger.write() = logger.clone();
        self.stats.set_slow_threshold(config.slow_threshold());

        match self.open(config, &logger).await {
            Ok((pool, settings)) => {
                log_info!(
                    logger,
                    target = %sanitize(&config.dsn),
                    version = %self.version(),
                    max_open = settings.max_open,
                    "connected"
                );
                state.pool = Some(pool);
                state.settings = Some(settings);
                state.config = Some(config.clone());
                self.set_phase(ConnectionState::Connected);
                Ok(())
            }
            Err(err) => {
                state.pool = None;
                state.settings = None;
                self.set_phase(ConnectionState::Disconnected);
                log_error!(logger, error = %err, "connect failed");
                Err(err)
            }
        }
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(pool) = state.pool.take() {
            pool.close().await;
            state.settings = None;
            log_info!(self.logger(), "disconnected");
        }
        self.set_phase(ConnectionState::Disconnected);
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let pool = self.pool().await?;
        match timeout(PING_TIMEOUT, pool.ping()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(DatabaseError::connection("ping failed", e)),
            Err(_) => Err(DatabaseError::Connection(format!(
                "ping timed out after {:?}",
                PING_TIMEOUT
            ))),
        }
    }

    async fn reconnect(&self) -> Result<()> {
        let config = self.last_config().await.ok_or_else(|| {
            DatabaseError::config("no previous configuration to reconnect with")
        })?;
        self.close().await?;
        self.connect(&config).await
    }

    async fn migrate(&self, models: &[&dyn Model]) -> Result<()> {
        let pool = self.pool().await?;
        let backend = self.backend();
        let logger = self.logger();

        for model in models {
            let table = model.definition();
            let sql = table.create_statement(backend)?;
            self.timed_execute(&pool, "migrate", &sql)
                .await
                .map_err(|e| DatabaseError::operation(format!("migration of {} failed", table.name), e))?;
            log_info!(logger, table = %table.name, "migrated table");
        }
        Ok(())
    }

    async fn drop_tables(&self, models: &[&dyn Model]) -> Result<()> {
        let pool = self.pool().await?;
        let backend = self.backend();
        let logger = self.logger();

        for model in models {
            let table = model.definition();
            let sql = table.drop_statement(backend)?;
            self.timed_execute(&pool, "drop table", &sql)
                .await
                .map_err(|e| DatabaseError::operation(format!("dropping {} failed", table.name), e))?;
            log_info!(logger, table = %table.name, "dropped table");
        }
        Ok(())
    }

    async fn begin_transaction(&self) -> Result<Transaction> {
        let pool = self.pool().await?;
        let start = Instant::now();
        let inner = match &pool {
            DatabasePool::Sqlite(p) => p.begin().await.map(TransactionInner::Sqlite),
            DatabasePool::Postgres(p) => p.begin().await.map(TransactionInner::Postgres),
            DatabasePool::MySql(p) => p.begin().await.map(TransactionInner::MySql),
        };
        let logger = self.logger();
        self.stats
            .observe(&logger, "begin transaction", start.elapsed(), inner.is_ok());

        let inner = inner.map_err(|e| DatabaseError::operation("failed to begin transaction", e))?;
        Ok(Transaction::new(inner, Arc::clone(&self.stats), logger))
    }

    async fn execute(&self, sql: &str) -> Result<u64> {
        let pool = self.pool().await?;
        self.timed_execute(&pool, "execute", sql)
            .await
            .map_err(|e| DatabaseError::operation("statement failed", e))
    }

    async fn handle(&self) -> Result<DatabasePool> {
        self.pool().await
    }

    async fn stats(&self) -> DatabaseStats {
        let mut stats = DatabaseStats {
            provider: self.name().to_string(),
            version: self.version(),
            ..DatabaseStats::default()
        };
        self.stats.snapshot_into(&mut stats);
        stats
            .metadata
            .insert("state".to_string(), self.connection_state().to_string());

        // A lifecycle call holding the write lock means there is nothing
        // stable to sample.
        let sampled = self
            .state
            .try_read()
            .ok()
            .and_then(|state| state.pool.clone().map(|pool| (pool, state.settings)));

        if let Some((pool, settings)) = sampled {
            let open = pool.size();
            let idle = u32::try_from(pool.num_idle()).unwrap_or(u32::MAX).min(open);
            stats.open_connections = open;
            stats.idle = idle;
            stats.in_use = open - idle;
            if let Some(settings) = settings {
                stats
                    .metadata
                    .insert("max_open".to_string(), settings.max_open.to_string());
            }

            if let Ok(Ok(size)) =
                timeout(SIZE_QUERY_TIMEOUT, pool.fetch_i64(self.driver.size_query())).await
            {
                stats.total_size = Some(size.max(0) as u64);
            }
        }
        stats
    }

    async fn health_check(&self) -> HealthStatus {
        let start = Instant::now();
        let outcome = timeout(HEALTH_CHECK_TIMEOUT, async {
            let pool = self.pool().await?;
            pool.ping()
                .await
                .map_err(|e| DatabaseError::connection("health check failed", e))?;
            Ok::<_, DatabaseError>(pool)
        })
        .await;
        let elapsed = start.elapsed();

        let mut status = match outcome {
            Ok(Ok(pool)) => {
                let mut status = HealthStatus::healthy(elapsed);
                status
                    .details
                    .insert("open_connections".to_string(), pool.size().to_string());
                status
            }
            Ok(Err(err)) => HealthStatus::unhealthy(err.to_string(), elapsed),
            Err(_) => HealthStatus::unhealthy(
                format!("health check timed out after {:?}", HEALTH_CHECK_TIMEOUT),
                elapsed,
            ),
        };
        status
            .details
            .insert("provider".to_string(), self.name().to_string());
        status.details.insert("version".to_string(), self.version());
        status
            .details
            .insert("state".to_string(), self.connection_state().to_string());
        status
    }

    fn name(&self) -> &str {
        self.backend().name()
    }

    fn version(&self) -> String {
        self.version.read().clone()
    }

    fn set_logger(&self, logger: Logger) {
        *self.logger.write() = logger;
    }

    fn connection_state(&self) -> ConnectionState {
        *self.phase.lock()
    }

    fn as_backup(&self) -> Option<&dyn BackupProvider> {
        D::backup_capability(self)
    }
}
