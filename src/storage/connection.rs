//! Storage connection lifecycle
//!
//! [`StorageManager`] owns the single backend handle of the process: lazy
//! initialisation behind one in-flight guard, a periodic liveness check, and
//! a bounded reconnect loop that runs at most once at a time.

use crate::config::StorageConfig;
use crate::error::{HubError, Result};
use crate::storage::backend::{Connector, VectorBackend};
use crate::storage::memory::{MemoryBackend, MemoryConnector};
use crate::storage::postgres::PostgresConnector;
use crate::storage::retry::{RetryExecutor, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Health snapshot exposed to operators
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionHealth {
    pub connected: bool,
    pub healthy: bool,
    pub last_error: Option<String>,
    pub reconnecting: bool,
}

/// Exclusive write access to the backend.
///
/// Holding a session blocks initialisation, reconnects and other writers, so
/// dimension reconciliation cannot interleave with a write of another width.
pub struct WriteSession<'a> {
    _guard: MutexGuard<'a, ()>,
    backend: Arc<dyn VectorBackend>,
}

impl WriteSession<'_> {
    pub fn backend(&self) -> &Arc<dyn VectorBackend> {
        &self.backend
    }
}

/// Pick the connector for a storage configuration
pub fn connector_for(config: &StorageConfig) -> Arc<dyn Connector> {
    match &config.database_url {
        Some(_) => Arc::new(PostgresConnector::new(config.clone())),
        None => {
            info!("No DATABASE_URL configured, using in-memory vector store");
            Arc::new(MemoryConnector::new(Arc::new(MemoryBackend::default())))
        }
    }
}

/// Owner of the backing store connection
pub struct StorageManager {
    connector: Arc<dyn Connector>,
    config: StorageConfig,
    retry: RetryExecutor,
    backend: RwLock<Option<Arc<dyn VectorBackend>>>,
    /// Single in-flight guard for init, reconnect and writes
    init_lock: Mutex<()>,
    health: RwLock<ConnectionHealth>,
    reconnecting: AtomicBool,
    closed: AtomicBool,
    reconnect_episodes: AtomicU64,
    health_task: Mutex<Option<JoinHandle<()>>>,
    reconnect_task: Mutex<Option<JoinHandle<()>>>,
}

impl StorageManager {
    /// Create a manager; nothing connects until [`initialize`](Self::initialize)
    pub fn new(connector: Arc<dyn Connector>, config: StorageConfig) -> Arc<Self> {
        let retry = RetryExecutor::new(config.retry_policy());
        Arc::new(Self {
            connector,
            config,
            retry,
            backend: RwLock::new(None),
            init_lock: Mutex::new(()),
            health: RwLock::new(ConnectionHealth::default()),
            reconnecting: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            reconnect_episodes: AtomicU64::new(0),
            health_task: Mutex::new(None),
            reconnect_task: Mutex::new(None),
        })
    }

    /// Manager for the configured store
    pub fn from_config(config: &StorageConfig) -> Arc<Self> {
        Self::new(connector_for(config), config.clone())
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        self.retry.policy()
    }

    pub fn retry_executor(&self) -> &RetryExecutor {
        &self.retry
    }

    async fn current(&self) -> Option<Arc<dyn VectorBackend>> {
        self.backend.read().await.clone()
    }

    /// Health snapshot
    pub async fn health(&self) -> ConnectionHealth {
        let mut snapshot = self.health.read().await.clone();
        snapshot.reconnecting = self.reconnecting.load(Ordering::SeqCst);
        snapshot
    }

    /// Number of reconnect loops launched so far
    pub fn reconnect_episodes(&self) -> u64 {
        self.reconnect_episodes.load(Ordering::SeqCst)
    }

    async fn update_health<F: FnOnce(&mut ConnectionHealth)>(&self, f: F) {
        let mut health = self.health.write().await;
        f(&mut health);
    }

    /// Connect if not already connected.
    ///
    /// Idempotent; concurrent callers wait on the same guard and share the
    /// connection established by whichever caller got there first.
    pub async fn initialize(self: &Arc<Self>) -> Result<Arc<dyn VectorBackend>> {
        if let Some(backend) = self.current().await {
            return Ok(backend);
        }
        let _guard = self.init_lock.lock().await;
        self.initialize_locked().await
    }

    async fn initialize_locked(self: &Arc<Self>) -> Result<Arc<dyn VectorBackend>> {
        if let Some(backend) = self.current().await {
            return Ok(backend);
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(HubError::connection("Storage manager has been closed"));
        }

        info!("Initializing vector store connection");
        let connector = Arc::clone(&self.connector);
        let result = self
            .retry
            .execute("storage_initialize", || {
                let connector = Arc::clone(&connector);
                async move { connector.connect().await }
            })
            .await;

        match result {
            Ok(backend) => {
                *self.backend.write().await = Some(Arc::clone(&backend));
                self.update_health(|h| {
                    h.connected = true;
                    h.healthy = true;
                    h.last_error = None;
                })
                .await;
                info!(backend = backend.name(), "Vector store connection established");
                self.start_health_check().await;
                Ok(backend)
            }
            Err(e) => {
                error!(error = %e, "Vector store initialization failed");
                let message = e.to_string();
                self.update_health(|h| {
                    h.connected = false;
                    h.healthy = false;
                    h.last_error = Some(message);
                })
                .await;
                Err(e)
            }
        }
    }

    /// Acquire exclusive write access, initialising first if needed
    pub async fn write_session(self: &Arc<Self>) -> Result<WriteSession<'_>> {
        let guard = self.init_lock.lock().await;
        let backend = self.initialize_locked().await?;
        Ok(WriteSession {
            _guard: guard,
            backend,
        })
    }

    /// Run a backend operation under the process retry policy
    pub async fn run<T, F, Fut>(self: &Arc<Self>, operation_name: &str, f: F) -> Result<T>
    where
        F: Fn(Arc<dyn VectorBackend>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let f = &f;
        let this = Arc::clone(self);
        self.retry
            .execute(operation_name, move || {
                let this = Arc::clone(&this);
                async move {
                    let backend = this.initialize().await?;
                    f(backend).await
                }
            })
            .await
    }

    async fn start_health_check(self: &Arc<Self>) {
        if !self.config.health_check_enabled {
            debug!("Storage health checks disabled");
            return;
        }
        let mut slot = self.health_task.lock().await;
        if slot.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        let weak: Weak<Self> = Arc::downgrade(self);
        let period = self.config.health_check_interval();
        *slot = Some(tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(manager) = weak.upgrade() else {
                    break;
                };
                if manager.closed.load(Ordering::SeqCst) {
                    break;
                }
                manager.check_health().await;
            }
        }));
        info!(interval_ms = period.as_millis() as u64, "Started storage health checks");
    }

    /// Ping the backend once; a failure marks the store unhealthy and starts a reconnect
    pub async fn check_health(self: &Arc<Self>) -> bool {
        let result = match self.current().await {
            Some(backend) => backend.ping().await,
            None => Err(HubError::connection("Vector store is not connected")),
        };

        match result {
            Ok(()) => {
                self.update_health(|h| {
                    h.connected = true;
                    h.healthy = true;
                })
                .await;
                debug!("Storage health check passed");
                true
            }
            Err(e) => {
                warn!(error = %e, "Storage health check failed");
                let message = e.to_string();
                self.update_health(|h| {
                    h.healthy = false;
                    h.last_error = Some(message);
                })
                .await;
                self.trigger_reconnect().await;
                false
            }
        }
    }

    async fn trigger_reconnect(self: &Arc<Self>) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        if self
            .reconnecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Reconnect already in progress");
            return;
        }
        self.reconnect_episodes.fetch_add(1, Ordering::SeqCst);

        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            if let Some(manager) = weak.upgrade() {
                manager.reconnect_loop().await;
            }
        });
        *self.reconnect_task.lock().await = Some(handle);
    }

    async fn reconnect_loop(self: Arc<Self>) {
        let attempts = self.config.max_reconnect_attempts;
        let backoff = self.config.retry_policy();
        let mut restored = false;

        for attempt in 1..=attempts {
            if attempt > 1 {
                let delay = backoff.base_delay(attempt - 1);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "Waiting before reconnect");
                sleep(delay).await;
            }
            if self.closed.load(Ordering::SeqCst) {
                break;
            }

            let _guard = self.init_lock.lock().await;
            // Another caller may have reconnected since the last attempt
            if let Some(current) = self.current().await {
                if current.ping().await.is_ok() {
                    self.update_health(|h| {
                        h.connected = true;
                        h.healthy = true;
                        h.last_error = None;
                    })
                    .await;
                    info!(attempt, "Vector store connection is healthy again");
                    restored = true;
                    break;
                }
            }
            if let Some(stale) = self.backend.write().await.take() {
                stale.close().await;
            }
            self.update_health(|h| h.connected = false).await;

            match self.connector.connect().await {
                Ok(backend) => {
                    *self.backend.write().await = Some(backend);
                    self.update_health(|h| {
                        h.connected = true;
                        h.healthy = true;
                        h.last_error = None;
                    })
                    .await;
                    info!(attempt, "Vector store connection restored");
                    restored = true;
                    break;
                }
                Err(e) => {
                    warn!(attempt, max_attempts = attempts, error = %e, "Reconnect attempt failed");
                    let message = e.to_string();
                    self.update_health(|h| h.last_error = Some(message)).await;
                }
            }
        }

        if !restored && !self.closed.load(Ordering::SeqCst) {
            error!(attempts, "Giving up on reconnect until the next failed health check");
        }
        self.reconnecting.store(false, Ordering::SeqCst);
    }

    /// Stop background tasks and release the connection.
    ///
    /// Safe while a reconnect is running: the loop is aborted and any
    /// connection it restored is released here.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(handle) = self.health_task.lock().await.take() {
            handle.abort();
        }
        if let Some(handle) = self.reconnect_task.lock().await.take() {
            handle.abort();
        }

        let _guard = self.init_lock.lock().await;
        if let Some(backend) = self.backend.write().await.take() {
            backend.close().await;
        }
        self.reconnecting.store(false, Ordering::SeqCst);
        self.update_health(|h| {
            h.connected = false;
            h.healthy = false;
        })
        .await;
        info!("Vector store connection closed");
    }
}
