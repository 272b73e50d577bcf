// Archivo: repository.rs
// Propósito: definir el contrato `FlowDefinitionSource` (la configuración
// de flujos vista por el orquestador) y una fuente basada en un archivo
// JSON.
use crate::domain::FlowDefinition;
use crate::errors::{FlowError, Result};
use std::path::{Path, PathBuf};

/// Fuente de definiciones de flujo de sólo lectura.
///
/// Se consulta periódicamente; cada llamada devuelve la lista completa
/// vigente. El grafo se reconstruye a partir de ella, nunca se parchea.
pub trait FlowDefinitionSource: Send + Sync {
    fn load_definitions(&self) -> Result<Vec<FlowDefinition>>;
}

/// Fuente que lee un arreglo JSON de `FlowDefinition` desde disco en cada
/// refresco. Permite editar el archivo sin reiniciar el proceso.
#[derive(Debug, Clone)]
pub struct JsonFileFlowSource {
    path: PathBuf,
}

impl JsonFileFlowSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self { path: path.as_ref().to_path_buf() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FlowDefinitionSource for JsonFileFlowSource {
    fn load_definitions(&self) -> Result<Vec<FlowDefinition>> {
        let raw = std::fs::read_to_string(&self.path).map_err(|e| {
                                                          FlowError::Storage(format!("no se pudo leer {}: {}",
                                                                                     self.path.display(),
                                                                                     e))
                                                      })?;
        serde_json::from_str(&raw).map_err(|e| FlowError::Invalid(format!("{}: {}", self.path.display(), e)))
    }
}
