use crate::config::CoreConfig;
use crate::errors::Result;
use crate::retention::DeletePolicy;
use deltafi_domain::{ContentStorage, DeltaFileRepository, InMemoryContentStorage, InMemoryDeltaFileRepository};
use deltafi_queue::{ActionQueueClient, InMemoryKeyedQueue};
use flow::{FlowDefinition, FlowDefinitionSource, FlowGraphCache, InMemoryFlowSource};
use std::sync::Arc;

/// Handles compartidos por servicios y loops. Se construye una vez al
/// arrancar y se pasa explícitamente (envuelto en `Arc`) a cada loop.
pub struct CoreContext {
  pub config: CoreConfig,
  /// Almacén de DeltaFiles; única fuente de verdad.
  pub repo: Arc<dyn DeltaFileRepository>,
  pub queue: ActionQueueClient,
  /// Snapshot vigente del grafo de flujos.
  pub flows: Arc<FlowGraphCache>,
  /// Fuente desde la que se refresca `flows`.
  pub flow_source: Arc<dyn FlowDefinitionSource>,
  pub content: Arc<dyn ContentStorage>,
  pub delete_policies: Vec<DeletePolicy>,
}

impl CoreContext {
  /// Valida la configuración y las políticas, y carga el grafo inicial
  /// desde `flow_source`.
  pub fn new(config: CoreConfig,
             repo: Arc<dyn DeltaFileRepository>,
             queue: ActionQueueClient,
             flow_source: Arc<dyn FlowDefinitionSource>,
             content: Arc<dyn ContentStorage>,
             delete_policies: Vec<DeletePolicy>)
             -> Result<Self> {
    config.validate()?;
    for policy in &delete_policies {
      policy.validate()?;
    }
    let flows = FlowGraphCache::load(flow_source.as_ref())?;
    let snapshot = flows.snapshot();
    log::info!("grafo de flujos cargado: {} flujos (versión {})", snapshot.len(), snapshot.version());
    Ok(Self { config,
              repo,
              queue,
              flows: Arc::new(flows),
              flow_source,
              content,
              delete_policies })
  }

  /// Contexto completamente en memoria, para pruebas y ejecución local.
  pub fn in_memory(config: CoreConfig, definitions: Vec<FlowDefinition>) -> Result<Self> {
    Self::new(config,
              Arc::new(InMemoryDeltaFileRepository::new()),
              ActionQueueClient::new(Arc::new(InMemoryKeyedQueue::new())),
              Arc::new(InMemoryFlowSource::new(definitions)),
              Arc::new(InMemoryContentStorage::new()),
              Vec::new())
  }
}
