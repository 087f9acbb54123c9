//! Shared, read-only state handed to every worker

use crate::audio::{DenoiseResolver, Engine};
use crate::config::{StorageConfig, Timeouts, WorkerConfig};
use crate::models::{DenoiseMethod, ProcessingParameters, ProcessingRequest};
use crate::sinks::{ArtifactSink, JobStore, MetricsSink};
use blinky_common::events::EventBus;
use std::sync::Arc;

/// Object naming for uploads
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageSettings {
    pub key_prefix: String,
    pub content_type: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        let config = StorageConfig::default();
        Self::from(&config)
    }
}

impl From<&StorageConfig> for StorageSettings {
    fn from(config: &StorageConfig) -> Self {
        Self {
            key_prefix: config.key_prefix.clone(),
            content_type: config.content_type.clone(),
        }
    }
}

/// Everything a worker needs to process jobs
pub struct WorkerContext {
    pub engine: Engine,
    pub denoiser: DenoiseResolver,
    pub store: Arc<dyn JobStore>,
    pub artifacts: Arc<dyn ArtifactSink>,
    pub metrics: Arc<dyn MetricsSink>,
    pub events: EventBus,
    pub parameters: ProcessingParameters,
    pub timeouts: Timeouts,
    pub storage: StorageSettings,
}

impl WorkerContext {
    /// Build a context from the resolved configuration
    pub fn from_config(
        config: &WorkerConfig,
        engine: Engine,
        store: Arc<dyn JobStore>,
        artifacts: Arc<dyn ArtifactSink>,
        metrics: Arc<dyn MetricsSink>,
        events: EventBus,
    ) -> Self {
        Self {
            denoiser: DenoiseResolver::new(engine.clone(), config.denoise.clone(), config.timeouts),
            engine,
            store,
            artifacts,
            metrics,
            events,
            parameters: config.processing.clone(),
            timeouts: config.timeouts,
            storage: StorageSettings::from(&config.storage),
        }
    }

    /// Immutable request for one job
    pub fn request_for(&self, method: DenoiseMethod) -> ProcessingRequest {
        ProcessingRequest::new(&self.parameters, method)
    }
}
