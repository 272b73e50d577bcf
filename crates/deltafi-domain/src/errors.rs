// errors.rs
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DomainError {
  #[error("Error de validación: {0}")]
  ValidationError(String),
  /// El evento no corresponde a la acción activa del flujo (duplicado,
  /// tardío o dirigido a un DeltaFile que ya avanzó).
  #[error("Acción inesperada '{action}' en el flujo '{flow}' del DeltaFile {did}")]
  UnexpectedAction { did: Uuid, flow: String, action: String },
  #[error("Error externo: {0}")]
  ExternalError(String),
  #[error("Error de serialización: {0}")]
  SerializationError(String),
}

impl From<serde_json::Error> for DomainError {
  fn from(e: serde_json::Error) -> Self {
    Self::SerializationError(e.to_string())
  }
}
