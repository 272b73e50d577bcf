// Archivo: errors.rs
// Propósito: definir los errores del grafo de flujos y el alias Result<T>
// usado por las APIs del crate.
use thiserror::Error;
/// Errores del grafo de flujos.
///
/// - `UnknownFlow`: el flujo no existe en el snapshot activo.
/// - `UnknownAction`: el flujo existe pero no contiene la acción.
/// - `Invalid`: definición inconsistente.
/// - `Storage`: error al leer la fuente de definiciones.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FlowError {
  /// Flujo ausente del snapshot activo.
  #[error("Flujo desconocido: {0}")]
  UnknownFlow(String),
  /// Acción ausente dentro de un flujo conocido.
  #[error("Acción desconocida '{action}' en el flujo '{flow}'")]
  UnknownAction { flow: String, action: String },
  /// Definición inválida (nombres vacíos, acciones duplicadas, etc.).
  #[error("Definición inválida: {0}")]
  Invalid(String),
  /// Error genérico de almacenamiento (archivo, servicio de configuración).
  #[error("Error de almacenamiento: {0}")]
  Storage(String),
}
/// Alias de resultado usado por las APIs del crate.
pub type Result<T> = std::result::Result<T, FlowError>;
