//! Session routing and pooling.
//!
//! One pool per backend kind; leases are exclusive and returned on
//! every exit path by RAII drop. With the default pool size of 1 the
//! lease is the per-session mutual exclusion; larger pools raise real
//! concurrency per backend.

use crate::session::{BackendConfig, McpSession, ToolSession};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use stratum_kernel::error::{PlanError, PlanResult};
use stratum_kernel::plan::ServerKind;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

/// Fixed-size pool of sessions for one backend kind.
pub struct SessionPool {
    free: Arc<Mutex<Vec<Arc<dyn ToolSession>>>>,
    permits: Arc<Semaphore>,
    all: Vec<Arc<dyn ToolSession>>,
}

impl SessionPool {
    pub fn new(sessions: Vec<Arc<dyn ToolSession>>) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(sessions.len())),
            free: Arc::new(Mutex::new(sessions.clone())),
            all: sessions,
        }
    }

    pub fn capacity(&self) -> usize {
        self.all.len()
    }

    /// Wait for a free session and lease it exclusively.
    pub async fn acquire(&self) -> PlanResult<SessionLease> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PlanError::Session("session pool closed".to_string()))?;
        let session = self
            .free
            .lock()
            .pop()
            .ok_or_else(|| PlanError::Session("session pool exhausted".to_string()))?;
        Ok(SessionLease {
            session,
            free: Arc::clone(&self.free),
            _permit: permit,
        })
    }

    async fn shutdown(&self) -> PlanResult<()> {
        let mut first_error = None;
        for session in &self.all {
            if let Err(error) = session.shutdown().await {
                first_error.get_or_insert(error);
            }
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// Exclusive use of one pooled session, returned to the pool on drop.
pub struct SessionLease {
    session: Arc<dyn ToolSession>,
    free: Arc<Mutex<Vec<Arc<dyn ToolSession>>>>,
    _permit: OwnedSemaphorePermit,
}

impl std::fmt::Debug for SessionLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLease").finish_non_exhaustive()
    }
}

impl SessionLease {
    pub fn session(&self) -> &dyn ToolSession {
        self.session.as_ref()
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        self.free.lock().push(Arc::clone(&self.session));
    }
}

/// Routes steps to the session pool of their backend kind.
pub struct SessionRouter {
    pools: HashMap<ServerKind, SessionPool>,
}

impl SessionRouter {
    pub fn new(pools: HashMap<ServerKind, SessionPool>) -> Self {
        Self { pools }
    }

    /// Spawn and initialize `pool_size` MCP sessions per backend.
    pub async fn connect(configs: &[BackendConfig], pool_size: usize) -> PlanResult<Self> {
        let mut pools: HashMap<ServerKind, SessionPool> = HashMap::new();
        for config in configs {
            let mut sessions: Vec<Arc<dyn ToolSession>> = Vec::new();
            for _ in 0..pool_size.max(1) {
                match McpSession::connect(config).await {
                    Ok(session) => sessions.push(Arc::new(session)),
                    Err(error) => {
                        // tear down whatever was already connected
                        for session in &sessions {
                            let _ = session.shutdown().await;
                        }
                        for pool in pools.values() {
                            let _ = pool.shutdown().await;
                        }
                        return Err(error);
                    }
                }
            }
            debug!(server = %config.server, pool_size = sessions.len(), "backend pool ready");
            pools.insert(config.server, SessionPool::new(sessions));
        }
        Ok(Self { pools })
    }

    /// Wrap pre-built sessions, one per backend kind.
    pub fn from_sessions(sessions: HashMap<ServerKind, Arc<dyn ToolSession>>) -> Self {
        let pools = sessions
            .into_iter()
            .map(|(server, session)| (server, SessionPool::new(vec![session])))
            .collect();
        Self { pools }
    }

    /// Lease a session for `server`, waiting if the pool is busy.
    pub async fn acquire(&self, server: ServerKind) -> PlanResult<SessionLease> {
        let pool = self
            .pools
            .get(&server)
            .ok_or_else(|| PlanError::Session(format!("no sessions for server '{server}'")))?;
        pool.acquire().await
    }

    /// Close every pooled session. Idempotent; runs after the plan ends
    /// even on fail-fast.
    pub async fn shutdown(&self) -> PlanResult<()> {
        let mut first_error = None;
        for pool in self.pools.values() {
            if let Err(error) = pool.shutdown().await {
                first_error.get_or_insert(error);
            }
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}
