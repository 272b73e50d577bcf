// Archivo: service.rs
// Propósito: implementar `FlowGraphCache`, el punto de acceso compartido al
// snapshot vigente del grafo. Los lectores toman un `Arc<FlowGraph>` y
// trabajan sobre él sin bloquear; el refresco sustituye el `Arc` completo.
use crate::engine::FlowGraph;
use crate::errors::{FlowError, Result};
use crate::repository::FlowDefinitionSource;
use std::sync::{Arc, RwLock};

/// Resultado de un refresco del cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// La huella no cambió; el snapshot vigente se conserva.
    Unchanged,
    /// Se instaló un snapshot nuevo. `retired_action_classes` lista las
    /// clases de acción que ya no usa ningún flujo en ejecución.
    Swapped {
        version: String,
        retired_action_classes: Vec<String>,
    },
}

/// Cache del grafo con intercambio atómico del snapshot.
pub struct FlowGraphCache {
    current: RwLock<Arc<FlowGraph>>,
}

impl Default for FlowGraphCache {
    fn default() -> Self {
        Self::new(FlowGraph::default())
    }
}

impl FlowGraphCache {
    pub fn new(graph: FlowGraph) -> Self {
        Self { current: RwLock::new(Arc::new(graph)) }
    }

    /// Construye el cache cargando la fuente una vez.
    pub fn load(source: &dyn FlowDefinitionSource) -> Result<Self> {
        Ok(Self::new(FlowGraph::build(source.load_definitions()?)?))
    }

    /// Snapshot vigente. El `Arc` devuelto permanece válido aunque haya un
    /// refresco concurrente.
    pub fn snapshot(&self) -> Arc<FlowGraph> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Instala un grafo ya construido y devuelve el anterior.
    pub fn replace(&self, graph: FlowGraph) -> Result<Arc<FlowGraph>> {
        let mut guard = self.current
                            .write()
                            .map_err(|e| FlowError::Storage(format!("lock poisoned: {:?}", e)))?;
        Ok(std::mem::replace(&mut *guard, Arc::new(graph)))
    }

    /// Recarga las definiciones y sustituye el snapshot si su huella cambió.
    /// Si la fuente falla o las definiciones son inválidas, el snapshot
    /// vigente se mantiene y se devuelve el error.
    pub fn refresh(&self, source: &dyn FlowDefinitionSource) -> Result<RefreshOutcome> {
        let graph = FlowGraph::build(source.load_definitions()?)?;
        if graph.version() == self.snapshot().version() {
            return Ok(RefreshOutcome::Unchanged);
        }
        let version = graph.version().to_string();
        let retired = {
            let previous = self.snapshot();
            graph.retired_action_classes(&previous)
        };
        self.replace(graph)?;
        Ok(RefreshOutcome::Swapped { version,
                                     retired_action_classes: retired })
    }
}
