// Archivo: errors.rs
// Propósito: errores del cliente de colas. `Connection` separa "backend
// inalcanzable" de "cola vacía" (que no es error: `take` devuelve `None`).
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// El backend no responde o rechazó la operación.
    #[error("Error de conexión con la cola: {0}")]
    Connection(String),
    /// El payload no pudo (de)serializarse.
    #[error("Error de serialización en la cola: {0}")]
    Serialization(String),
}

impl QueueError {
    pub fn is_connection(&self) -> bool {
        matches!(self, QueueError::Connection(_))
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(e: serde_json::Error) -> Self {
        QueueError::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, QueueError>;
