//! Static map from backend type to the code that builds it.

use std::collections::HashMap;
use std::sync::Arc;

use stratus_resources::BackendType;

use super::{Backend, ComputeError, ComputeResult};
use crate::models::BackendConfig;

/// Builds a [`Backend`] from its stored configuration.
pub trait BackendFactory: Send + Sync {
    fn create(&self, config: &BackendConfig) -> ComputeResult<Arc<dyn Backend>>;
}

/// Hands out one pre-built backend regardless of configuration.
pub struct StaticBackendFactory(pub Arc<dyn Backend>);

impl BackendFactory for StaticBackendFactory {
    fn create(&self, _config: &BackendConfig) -> ComputeResult<Arc<dyn Backend>> {
        Ok(self.0.clone())
    }
}

/// Known backend implementations, keyed by provider.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    factories: HashMap<BackendType, Arc<dyn BackendFactory>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, backend_type: BackendType, factory: Arc<dyn BackendFactory>) {
        self.factories.insert(backend_type, factory);
    }

    pub fn with(mut self, backend_type: BackendType, factory: Arc<dyn BackendFactory>) -> Self {
        self.register(backend_type, factory);
        self
    }

    pub fn is_registered(&self, backend_type: BackendType) -> bool {
        self.factories.contains_key(&backend_type)
    }

    pub fn build(&self, config: &BackendConfig) -> ComputeResult<Arc<dyn Backend>> {
        let factory = self
            .factories
            .get(&config.backend_type)
            .ok_or(ComputeError::NotSupported("backend type not registered"))?;
        factory.create(config)
    }
}
