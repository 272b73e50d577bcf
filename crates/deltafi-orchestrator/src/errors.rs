use deltafi_domain::DomainError;
use deltafi_queue::QueueError;
use flow::FlowError;
use thiserror::Error;
use uuid::Uuid;

// Errores del núcleo de orquestación.
//
// Cada variante corresponde a una reacción distinta del scheduler: los
// "no encontrado" se descartan con warn, los obsoletos con debug, los
// conflictos agotados se devuelven a la cola de resultados y los de backend
// esperan al siguiente tick.
#[derive(Error, Debug)]
pub enum CoreError {
  #[error("DeltaFile desconocido: {0}")]
  UnknownDeltaFile(Uuid),

  /// Evento duplicado, tardío o dirigido a una acción que ya no está activa.
  #[error("Acción inesperada '{action}' en el flujo '{flow}' del DeltaFile {did}")]
  UnexpectedAction { did: Uuid, flow: String, action: String },

  #[error("Flujo desconocido: {0}")]
  UnknownFlow(String),

  #[error("Acción desconocida '{action}' en el flujo '{flow}'")]
  UnknownAction { flow: String, action: String },

  #[error("El flujo '{0}' no está en ejecución")]
  FlowNotRunning(String),

  /// Se agotaron los reintentos optimistas sobre el mismo DeltaFile.
  #[error("Modificación concurrente de {did} tras {attempts} intentos")]
  ConcurrentModification { did: Uuid, attempts: u32 },

  #[error("Evento inválido: {0}")]
  InvalidEvent(String),

  #[error("El contenido del DeltaFile {0} fue eliminado")]
  ContentDeleted(Uuid),

  #[error("El DeltaFile {0} no tiene acciones en error")]
  NoErrors(Uuid),

  #[error("El DeltaFile {0} no puede cancelarse en su etapa actual")]
  NotCancellable(Uuid),

  #[error("Error de validación: {0}")]
  Validation(String),

  #[error("Error de cola: {0}")]
  Queue(#[from] QueueError),

  /// Almacén de DeltaFiles o de contenido inalcanzable.
  #[error("Error de almacenamiento: {0}")]
  Storage(String),

  /// Documento almacenado que no se puede deserializar. Releerlo da el
  /// mismo resultado, así que no se reintenta.
  #[error("Documento ilegible: {0}")]
  CorruptDocument(String),

  #[error("Configuración inválida: {0}")]
  Config(String),

  #[error("Error de serializacion: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl CoreError {
  /// Evento obsoleto o duplicado; se descarta sin ruido.
  pub fn is_stale(&self) -> bool {
    matches!(self, CoreError::UnexpectedAction { .. })
  }

  pub fn is_not_found(&self) -> bool {
    matches!(self,
             CoreError::UnknownDeltaFile(_) | CoreError::UnknownFlow(_) | CoreError::UnknownAction { .. })
  }

  /// Fallo de infraestructura: el trabajo no se perdió y puede repetirse.
  pub fn is_retryable(&self) -> bool {
    match self {
      CoreError::ConcurrentModification { .. } | CoreError::Storage(_) => true,
      CoreError::Queue(e) => e.is_connection(),
      _ => false,
    }
  }
}

impl From<DomainError> for CoreError {
  fn from(e: DomainError) -> Self {
    match e {
      DomainError::UnexpectedAction { did, flow, action } => CoreError::UnexpectedAction { did, flow, action },
      DomainError::ValidationError(msg) => CoreError::Validation(msg),
      DomainError::ExternalError(msg) => CoreError::Storage(msg),
      DomainError::SerializationError(msg) => CoreError::CorruptDocument(msg),
    }
  }
}

impl From<FlowError> for CoreError {
  fn from(e: FlowError) -> Self {
    match e {
      FlowError::UnknownFlow(name) => CoreError::UnknownFlow(name),
      FlowError::UnknownAction { flow, action } => CoreError::UnknownAction { flow, action },
      FlowError::Invalid(msg) => CoreError::Config(msg),
      FlowError::Storage(msg) => CoreError::Storage(msg),
    }
  }
}

pub type Result<T> = std::result::Result<T, CoreError>;
