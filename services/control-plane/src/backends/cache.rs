//! Per-project cache of constructed backends.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use stratus_id::ProjectId;
use stratus_resources::BackendType;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::{Backend, BackendRegistry};
use crate::db::DbError;
use crate::store::BackendConfigStore;

/// Backends available to a project.
#[async_trait]
pub trait ProjectBackends: Send + Sync {
    async fn get_project_backends(
        &self,
        project_id: &ProjectId,
    ) -> Result<Vec<Arc<dyn Backend>>, DbError>;

    async fn get_project_backend(
        &self,
        project_id: &ProjectId,
        backend_type: BackendType,
    ) -> Result<Option<Arc<dyn Backend>>, DbError> {
        Ok(self
            .get_project_backends(project_id)
            .await?
            .into_iter()
            .find(|b| b.backend_type() == backend_type))
    }
}

/// Builds backends from stored configuration on first use and keeps them
/// until [`clear_backend_cache`](Self::clear_backend_cache) is called for the
/// project (for example after its backend configuration changed).
pub struct BackendCache {
    registry: BackendRegistry,
    configs: Arc<dyn BackendConfigStore>,
    cache: RwLock<HashMap<ProjectId, Vec<Arc<dyn Backend>>>>,
}

impl BackendCache {
    pub fn new(registry: BackendRegistry, configs: Arc<dyn BackendConfigStore>) -> Self {
        Self {
            registry,
            configs,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Drops the cached backends of `project_id`.
    pub async fn clear_backend_cache(&self, project_id: &ProjectId) {
        if self.cache.write().await.remove(project_id).is_some() {
            debug!(project_id = %project_id, "Cleared backend cache");
        }
    }

    async fn build_project_backends(
        &self,
        project_id: &ProjectId,
    ) -> Result<Vec<Arc<dyn Backend>>, DbError> {
        let configs = self.configs.list_backend_configs(project_id).await?;
        let mut backends = Vec::with_capacity(configs.len());
        for config in &configs {
            match self.registry.build(config) {
                Ok(backend) => backends.push(backend),
                Err(e) => {
                    warn!(
                        project_id = %project_id,
                        backend = %config.backend_type,
                        error = %e,
                        "Skipping backend that failed to initialize"
                    );
                }
            }
        }
        Ok(backends)
    }
}

#[async_trait]
impl ProjectBackends for BackendCache {
    async fn get_project_backends(
        &self,
        project_id: &ProjectId,
    ) -> Result<Vec<Arc<dyn Backend>>, DbError> {
        if let Some(backends) = self.cache.read().await.get(project_id) {
            return Ok(backends.clone());
        }

        let backends = self.build_project_backends(project_id).await?;
        let mut cache = self.cache.write().await;
        let entry = cache.entry(*project_id).or_insert(backends);
        Ok(entry.clone())
    }
}
