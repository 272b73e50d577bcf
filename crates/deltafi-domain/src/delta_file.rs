// delta_file.rs
use crate::action::{Action, ActionState};
use crate::content::Content;
use crate::delta_file_flow::{DeltaFileFlow, DeltaFileFlowState, FlowInput};
use crate::DomainError;
use chrono::{DateTime, Utc};
use flow::ActionType;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeltaFileStage {
  Ingress,
  InFlight,
  Complete,
  Error,
  Filtered,
  Cancelled,
}

impl DeltaFileStage {
  /// Etapas en las que nunca se vuelve a despachar trabajo sin una acción
  /// explícita del operador.
  pub fn is_terminal(self) -> bool {
    matches!(self,
             DeltaFileStage::Complete | DeltaFileStage::Error | DeltaFileStage::Filtered | DeltaFileStage::Cancelled)
  }

  pub fn as_str(self) -> &'static str {
    match self {
      DeltaFileStage::Ingress => "INGRESS",
      DeltaFileStage::InFlight => "IN_FLIGHT",
      DeltaFileStage::Complete => "COMPLETE",
      DeltaFileStage::Error => "ERROR",
      DeltaFileStage::Filtered => "FILTERED",
      DeltaFileStage::Cancelled => "CANCELLED",
    }
  }
}

impl std::str::FromStr for DeltaFileStage {
  type Err = DomainError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "INGRESS" => Ok(DeltaFileStage::Ingress),
      "IN_FLIGHT" => Ok(DeltaFileStage::InFlight),
      "COMPLETE" => Ok(DeltaFileStage::Complete),
      "ERROR" => Ok(DeltaFileStage::Error),
      "FILTERED" => Ok(DeltaFileStage::Filtered),
      "CANCELLED" => Ok(DeltaFileStage::Cancelled),
      other => Err(DomainError::ValidationError(format!("etapa desconocida: {}", other))),
    }
  }
}

/// Origen del DeltaFile. Inmutable tras el ingreso.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceInfo {
  pub filename: String,
  pub flow: String,
  #[serde(default)]
  pub metadata: IndexMap<String, String>,
}

/// Unidad de datos rastreada a través del pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaFile {
  pub did: Uuid,
  pub name: String,
  pub data_source: String,
  pub source_info: SourceInfo,
  #[serde(default)]
  pub parent_dids: Vec<Uuid>,
  #[serde(default)]
  pub child_dids: Vec<Uuid>,
  pub flows: Vec<DeltaFileFlow>,
  pub stage: DeltaFileStage,
  #[serde(default)]
  pub annotations: IndexMap<String, String>,
  pub requeue_count: u32,
  pub ingress_bytes: u64,
  pub total_bytes: u64,
  pub created: DateTime<Utc>,
  pub modified: DateTime<Utc>,
  /// Momento en que el DeltaFile alcanzó una etapa terminal.
  pub terminal_at: Option<DateTime<Utc>>,
  pub content_deleted: Option<DateTime<Utc>>,
  pub content_deleted_reason: Option<String>,
  /// El contenido ya fue eliminado del almacenamiento (no sólo marcado).
  #[serde(default)]
  pub content_purged: bool,
  #[serde(default)]
  pub egressed: bool,
  #[serde(default)]
  pub filtered: bool,
  /// Un operador revisó el error; el DeltaFile sigue en ERROR pero deja de
  /// contar como pendiente.
  #[serde(default)]
  pub error_acknowledged: Option<DateTime<Utc>>,
  #[serde(default)]
  pub error_acknowledged_reason: Option<String>,
  /// Token de concurrencia optimista; lo gestiona el repositorio.
  #[serde(default)]
  pub version: i64,
}

impl DeltaFile {
  /// Crea un DeltaFile recién ingresado con su flujo de entrada vacío. El
  /// llamador encola la primera acción.
  pub fn ingress(did: Uuid,
                 name: impl Into<String>,
                 data_source: impl Into<String>,
                 metadata: IndexMap<String, String>,
                 content: Vec<Content>,
                 now: DateTime<Utc>)
                 -> Self {
    let name = name.into();
    let data_source = data_source.into();
    let ingress_bytes = content.iter().map(Content::size).sum();
    let input = FlowInput { content, metadata: metadata.clone() };
    let flow = DeltaFileFlow::new(data_source.clone(), 0, input, 0, now);
    Self { did,
           name: name.clone(),
           data_source: data_source.clone(),
           source_info: SourceInfo { filename: name, flow: data_source, metadata },
           parent_dids: Vec::new(),
           child_dids: Vec::new(),
           flows: vec![flow],
           stage: DeltaFileStage::Ingress,
           annotations: IndexMap::new(),
           requeue_count: 0,
           ingress_bytes,
           total_bytes: ingress_bytes,
           created: now,
           modified: now,
           terminal_at: None,
           content_deleted: None,
           content_deleted_reason: None,
           content_purged: false,
           egressed: false,
           filtered: false,
           error_acknowledged: None,
           error_acknowledged_reason: None,
           version: 0 }
  }

  /// Did del hijo `index` producido por la acción `action_id` del flujo
  /// `flow_id`. Es estable: reaplicar el mismo split da los mismos dids.
  pub fn split_child_did(parent: Uuid, flow_id: Uuid, action_id: Uuid, index: usize) -> Uuid {
    let name = format!("{}/{}/{}", flow_id, action_id, index);
    Uuid::new_v5(&parent, name.as_bytes())
  }

  /// Hijo de un split: hereda `source_info` y el historial del flujo hasta
  /// la acción que dividió (en estado INHERITED), de modo que continúa en la
  /// acción siguiente.
  pub fn split_child(parent: &DeltaFile,
                     did: Uuid,
                     flow_index: usize,
                     name: &str,
                     content: Vec<Content>,
                     metadata: IndexMap<String, String>,
                     now: DateTime<Utc>)
                     -> Result<DeltaFile, DomainError> {
    let parent_flow = parent.flows
                            .get(flow_index)
                            .ok_or_else(|| DomainError::ValidationError(format!("flujo {} inexistente", flow_index)))?;
    let mut input_metadata = parent_flow.metadata();
    input_metadata.extend(metadata);
    let ingress_bytes = content.iter().map(Content::size).sum();
    let mut flow = DeltaFileFlow::new(parent_flow.name.clone(),
                                      0,
                                      FlowInput { content, metadata: input_metadata },
                                      parent_flow.depth,
                                      now);
    flow.test_mode = parent_flow.test_mode;
    flow.test_mode_reason = parent_flow.test_mode_reason.clone();
    flow.actions = parent_flow.actions
                              .iter()
                              .filter(|a| a.state != ActionState::Retried)
                              .map(|a| {
                                let mut inherited = a.clone();
                                inherited.id = Uuid::new_v4();
                                inherited.state = ActionState::Inherited;
                                inherited.content = Vec::new();
                                inherited.metadata = IndexMap::new();
                                inherited.delete_metadata_keys = Vec::new();
                                inherited.modified = now;
                                inherited
                              })
                              .collect();
    Ok(DeltaFile { did,
                   name: name.to_string(),
                   data_source: parent.data_source.clone(),
                   source_info: parent.source_info.clone(),
                   parent_dids: vec![parent.did],
                   child_dids: Vec::new(),
                   flows: vec![flow],
                   stage: DeltaFileStage::InFlight,
                   annotations: parent.annotations.clone(),
                   requeue_count: 0,
                   ingress_bytes,
                   total_bytes: ingress_bytes,
                   created: now,
                   modified: now,
                   terminal_at: None,
                   content_deleted: None,
                   content_deleted_reason: None,
                   content_purged: false,
                   egressed: false,
                   filtered: false,
                   error_acknowledged: None,
                   error_acknowledged_reason: None,
                   version: 0 })
  }

  pub fn is_terminal(&self) -> bool {
    self.stage.is_terminal()
  }

  /// Índice del flujo al que se dirige un evento. Falla con
  /// `UnexpectedAction` si el flujo no existe o ya terminó.
  pub fn pending_flow_index(&self, flow_name: &str, flow_id: Uuid, action_name: &str) -> Result<usize, DomainError> {
    self.flows
        .iter()
        .position(|f| f.id == flow_id && f.name == flow_name && !f.is_terminal())
        .ok_or_else(|| DomainError::UnexpectedAction { did: self.did,
                                                        flow: flow_name.to_string(),
                                                        action: action_name.to_string() })
  }

  /// Acción activa direccionada por (flujo, id de flujo, acción, intento).
  pub fn pending_action_mut(&mut self,
                            flow_name: &str,
                            flow_id: Uuid,
                            action_name: &str,
                            attempt: u32)
                            -> Result<&mut Action, DomainError> {
    let idx = self.pending_flow_index(flow_name, flow_id, action_name)?;
    let did = self.did;
    self.flows[idx].pending_action_mut(did, action_name, attempt)
  }

  /// `modified` más antiguo entre las acciones QUEUED o IN_FLIGHT de los
  /// flujos en curso. Es lo que mira el requeue.
  pub fn oldest_active_modified(&self) -> Option<DateTime<Utc>> {
    self.flows
        .iter()
        .filter(|f| !f.is_terminal())
        .flat_map(|f| f.actions.iter())
        .filter(|a| matches!(a.state, ActionState::Queued | ActionState::InFlight))
        .map(|a| a.modified)
        .min()
  }

  /// Pares (índice de flujo, acción) activos.
  pub fn active_actions(&self) -> Vec<(usize, &Action)> {
    self.flows
        .iter()
        .enumerate()
        .filter(|(_, f)| !f.is_terminal())
        .filter_map(|(i, f)| f.active_action().map(|a| (i, a)))
        .collect()
  }

  pub fn add_annotations(&mut self, annotations: &IndexMap<String, String>) {
    for (k, v) in annotations {
      self.annotations.insert(k.clone(), v.clone());
    }
  }

  /// Agrega un flujo nuevo (segmento siguiente del pipeline) y devuelve su
  /// índice.
  pub fn add_flow(&mut self, name: &str, input: FlowInput, depth: u32, now: DateTime<Utc>) -> usize {
    let number = self.flows.len() as u32;
    self.flows.push(DeltaFileFlow::new(name, number, input, depth, now));
    self.flows.len() - 1
  }

  /// Recalcula la etapa a partir del estado de los flujos.
  ///
  /// - IN_FLIGHT si algún flujo sigue en curso.
  /// - ERROR si algún flujo quedó en error.
  /// - CANCELLED si el DeltaFile fue cancelado o algún flujo lo está.
  /// - FILTERED si algún flujo fue filtrado.
  /// - COMPLETE en otro caso.
  pub fn update_state(&mut self, now: DateTime<Utc>) {
    self.modified = now;
    let states: Vec<DeltaFileFlowState> = self.flows.iter().map(|f| f.state).collect();
    let stage = if states.is_empty() {
      DeltaFileStage::Ingress
    } else if states.contains(&DeltaFileFlowState::InFlight) {
      DeltaFileStage::InFlight
    } else if states.contains(&DeltaFileFlowState::Error) {
      DeltaFileStage::Error
    } else if self.stage == DeltaFileStage::Cancelled || states.contains(&DeltaFileFlowState::Cancelled) {
      DeltaFileStage::Cancelled
    } else if states.contains(&DeltaFileFlowState::Filtered) {
      DeltaFileStage::Filtered
    } else {
      DeltaFileStage::Complete
    };
    self.stage = stage;
    self.filtered = states.contains(&DeltaFileFlowState::Filtered);
    if stage != DeltaFileStage::Error {
      self.error_acknowledged = None;
      self.error_acknowledged_reason = None;
    }
    if stage.is_terminal() {
      if self.terminal_at.is_none() {
        self.terminal_at = Some(now);
      }
    } else {
      self.terminal_at = None;
    }
  }

  /// Cancela los flujos en curso. Devuelve `false` si el DeltaFile ya era
  /// terminal.
  pub fn cancel(&mut self, now: DateTime<Utc>) -> bool {
    if !self.can_be_cancelled() {
      return false;
    }
    for flow in &mut self.flows {
      flow.cancel(now);
    }
    self.stage = DeltaFileStage::Cancelled;
    self.update_state(now);
    true
  }

  pub fn can_be_cancelled(&self) -> bool {
    !self.stage.is_terminal()
  }

  /// Marca como RETRIED la última acción en error de cada flujo y devuelve,
  /// por flujo reanudado, la acción que debe volver a encolarse.
  pub fn resume_errors(&mut self, now: DateTime<Utc>) -> Vec<(usize, String, ActionType, String)> {
    let mut resumed = Vec::new();
    for (idx, flow) in self.flows.iter_mut().enumerate() {
      if let Some((name, action_type, class)) = flow.resume(now) {
        resumed.push((idx, name, action_type, class));
      }
    }
    if !resumed.is_empty() {
      self.update_state(now);
    }
    resumed
  }

  pub fn has_errors(&self) -> bool {
    self.flows.iter().any(|f| f.state == DeltaFileFlowState::Error)
  }

  /// Reconoce el error. Sólo aplica en ERROR; reconocer de nuevo reemplaza
  /// el motivo.
  pub fn acknowledge_errors(&mut self, reason: &str, now: DateTime<Utc>) -> bool {
    if self.stage != DeltaFileStage::Error {
      return false;
    }
    self.error_acknowledged = Some(now);
    self.error_acknowledged_reason = Some(reason.to_string());
    self.modified = now;
    true
  }

  pub fn has_unacknowledged_errors(&self) -> bool {
    self.stage == DeltaFileStage::Error && self.error_acknowledged.is_none()
  }

  /// Marca el contenido como eliminado. Re-marcar es un no-op: devuelve
  /// `false` si ya estaba marcado.
  pub fn mark_content_deleted(&mut self, reason: &str, now: DateTime<Utc>) -> bool {
    if self.content_deleted.is_some() {
      return false;
    }
    self.content_deleted = Some(now);
    self.content_deleted_reason = Some(reason.to_string());
    self.modified = now;
    true
  }

  /// Bytes referenciados por el DeltaFile contando cada segmento una vez.
  pub fn recalculate_bytes(&mut self) {
    let mut seen = HashSet::new();
    let mut total = 0u64;
    for flow in &self.flows {
      let contents = flow.input.content.iter().chain(flow.actions.iter().flat_map(|a| a.content.iter()));
      for content in contents {
        for seg in &content.segments {
          if seen.insert((seg.did, seg.uuid, seg.offset, seg.size)) {
            total += seg.size;
          }
        }
      }
    }
    self.total_bytes = total;
  }
}
