//! Application state shared across all request handlers.

use crate::config::runtime::RuntimeConfig;
use outdial_ami::AmiSupervisor;
use outdial_core::calls::{CallStateStore, PendingCorrelations};
use outdial_core::pbx::PbxCommands;
use sqlx::PgPool;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Application state that is shared across all request handlers.
///
/// This is cloneable and cheap to pass around (everything is behind Arc).
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub db: PgPool,
    /// The concurrent call status store.
    pub store: Arc<CallStateStore>,
    /// Pre-origination correlation cache.
    pub pending: Arc<PendingCorrelations>,
    /// The control-channel supervisor.
    pub supervisor: Arc<AmiSupervisor>,
    /// Out-of-band PBX command runner.
    pub pbx: Arc<dyn PbxCommands>,
    /// Runtime configuration (can be reloaded via SIGHUP).
    pub config: Arc<RwLock<RuntimeConfig>>,
}

impl AppState {
    pub fn new(
        db: PgPool,
        store: Arc<CallStateStore>,
        pending: Arc<PendingCorrelations>,
        supervisor: Arc<AmiSupervisor>,
        pbx: Arc<dyn PbxCommands>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            db,
            store,
            pending,
            supervisor,
            pbx,
            config: Arc::new(RwLock::new(config)),
        }
    }

    /// Get a read lock on the configuration.
    pub async fn config(&self) -> tokio::sync::RwLockReadGuard<'_, RuntimeConfig> {
        self.config.read().await
    }

    /// Update the configuration (used during SIGHUP reload).
    pub async fn update_config(&self, new_config: RuntimeConfig) {
        let mut config = self.config.write().await;
        *config = new_config;
    }
}
