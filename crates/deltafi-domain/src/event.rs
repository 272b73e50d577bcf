// event.rs
use crate::content::Content;
use crate::DomainError;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Resultado reportado por un worker para una acción despachada.
///
/// La cabecera identifica la acción exacta (DeltaFile, flujo, acción,
/// intento); `kind` lleva sólo la carga propia de cada tipo de resultado.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionEvent {
  pub did: Uuid,
  pub flow_name: String,
  pub flow_id: Uuid,
  pub action_name: String,
  pub attempt: u32,
  pub start: Option<DateTime<Utc>>,
  pub stop: Option<DateTime<Utc>>,
  #[serde(flatten)]
  pub kind: ActionEventKind,
}

/// Tipos de resultado, discriminados por el campo `type` en JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionEventKind {
  /// El worker reclamó la acción y empezó a ejecutarla.
  Started,
  Transform(TransformEvent),
  Split(SplitEvent),
  Egress {
    #[serde(default)]
    annotations: IndexMap<String, String>,
  },
  Error(ErrorEvent),
  Filter(FilterEvent),
  /// La acción eliminó el contenido del DeltaFile como parte del flujo.
  Delete,
}

impl ActionEventKind {
  pub fn name(&self) -> &'static str {
    match self {
      ActionEventKind::Started => "started",
      ActionEventKind::Transform(_) => "transform",
      ActionEventKind::Split(_) => "split",
      ActionEventKind::Egress { .. } => "egress",
      ActionEventKind::Error(_) => "error",
      ActionEventKind::Filter(_) => "filter",
      ActionEventKind::Delete => "delete",
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformEvent {
  #[serde(default)]
  pub content: Vec<Content>,
  #[serde(default)]
  pub metadata: IndexMap<String, String>,
  #[serde(default)]
  pub delete_metadata_keys: Vec<String>,
  #[serde(default)]
  pub annotations: IndexMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitChild {
  pub name: String,
  #[serde(default)]
  pub content: Vec<Content>,
  #[serde(default)]
  pub metadata: IndexMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SplitEvent {
  pub children: Vec<SplitChild>,
  #[serde(default)]
  pub annotations: IndexMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorEvent {
  pub cause: String,
  #[serde(default)]
  pub context: String,
  #[serde(default)]
  pub annotations: IndexMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterEvent {
  pub message: String,
  #[serde(default)]
  pub context: String,
  #[serde(default)]
  pub annotations: IndexMap<String, String>,
}

impl ActionEvent {
  pub fn new(did: Uuid, flow_name: &str, flow_id: Uuid, action_name: &str, attempt: u32, kind: ActionEventKind) -> Self {
    Self { did,
           flow_name: flow_name.to_string(),
           flow_id,
           action_name: action_name.to_string(),
           attempt,
           start: None,
           stop: None,
           kind }
  }

  /// Validación de cabecera y carga. Los eventos inválidos se descartan sin
  /// tocar el DeltaFile.
  pub fn validate(&self) -> Result<(), DomainError> {
    if self.did.is_nil() {
      return Err(DomainError::ValidationError("evento sin did".into()));
    }
    if self.flow_name.trim().is_empty() || self.action_name.trim().is_empty() {
      return Err(DomainError::ValidationError(format!("evento para {} sin flujo o acción", self.did)));
    }
    if self.attempt == 0 {
      return Err(DomainError::ValidationError(format!("evento para {} con intento 0", self.did)));
    }
    match &self.kind {
      ActionEventKind::Split(split) if split.children.is_empty() => {
        Err(DomainError::ValidationError(format!("split sin hijos para {}", self.did)))
      }
      ActionEventKind::Error(err) if err.cause.trim().is_empty() => {
        Err(DomainError::ValidationError(format!("error sin causa para {}", self.did)))
      }
      _ => Ok(()),
    }
  }

  /// Anotaciones que el evento agrega al DeltaFile.
  pub fn annotations(&self) -> Option<&IndexMap<String, String>> {
    match &self.kind {
      ActionEventKind::Transform(t) => Some(&t.annotations),
      ActionEventKind::Split(s) => Some(&s.annotations),
      ActionEventKind::Egress { annotations } => Some(annotations),
      ActionEventKind::Error(e) => Some(&e.annotations),
      ActionEventKind::Filter(f) => Some(&f.annotations),
      ActionEventKind::Started | ActionEventKind::Delete => None,
    }
  }
}
