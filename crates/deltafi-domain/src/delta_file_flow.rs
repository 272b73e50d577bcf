// delta_file_flow.rs
use crate::action::{Action, ActionState};
use crate::content::Content;
use crate::DomainError;
use chrono::{DateTime, Utc};
use flow::ActionType;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeltaFileFlowState {
  InFlight,
  Complete,
  Error,
  Filtered,
  Cancelled,
}

impl DeltaFileFlowState {
  pub fn is_terminal(self) -> bool {
    !matches!(self, DeltaFileFlowState::InFlight)
  }
}

/// Entrada de un segmento de pipeline: contenido y metadata con los que
/// arranca el flujo.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowInput {
  #[serde(default)]
  pub content: Vec<Content>,
  #[serde(default)]
  pub metadata: IndexMap<String, String>,
}

/// Recorrido de un DeltaFile por un flujo concreto.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaFileFlow {
  pub id: Uuid,
  pub name: String,
  pub number: u32,
  pub state: DeltaFileFlowState,
  pub created: DateTime<Utc>,
  pub modified: DateTime<Utc>,
  pub input: FlowInput,
  #[serde(default)]
  pub actions: Vec<Action>,
  /// Distancia (en flujos) desde el flujo de ingreso.
  pub depth: u32,
  #[serde(default)]
  pub test_mode: bool,
  pub test_mode_reason: Option<String>,
}

impl DeltaFileFlow {
  pub fn new(name: impl Into<String>, number: u32, input: FlowInput, depth: u32, now: DateTime<Utc>) -> Self {
    Self { id: Uuid::new_v4(),
           name: name.into(),
           number,
           state: DeltaFileFlowState::InFlight,
           created: now,
           modified: now,
           input,
           actions: Vec::new(),
           depth,
           test_mode: false,
           test_mode_reason: None }
  }

  pub fn is_terminal(&self) -> bool {
    self.state.is_terminal()
  }

  pub fn last_action(&self) -> Option<&Action> {
    self.actions.last()
  }

  pub fn last_action_mut(&mut self) -> Option<&mut Action> {
    self.actions.last_mut()
  }

  /// La acción activa del flujo, si existe. Por invariante hay a lo sumo una.
  pub fn active_action(&self) -> Option<&Action> {
    self.actions.iter().rev().find(|a| a.is_active())
  }

  /// Metadata acumulada: la de entrada más la de cada acción, en orden, con
  /// las claves borradas por `delete_metadata_keys` eliminadas.
  pub fn metadata(&self) -> IndexMap<String, String> {
    let mut metadata = self.input.metadata.clone();
    for action in &self.actions {
      for (k, v) in &action.metadata {
        metadata.insert(k.clone(), v.clone());
      }
      for key in &action.delete_metadata_keys {
        metadata.shift_remove(key);
      }
    }
    metadata
  }

  /// Contenido de la última acción completada o, si no hay, el de entrada.
  pub fn last_content(&self) -> Vec<Content> {
    self.actions
        .iter()
        .rev()
        .find(|a| a.state == ActionState::Complete)
        .map(|a| a.content.clone())
        .unwrap_or_else(|| self.input.content.clone())
  }

  /// Nombre de la última acción que no fue reintentada; es el punto desde
  /// el que el grafo calcula la siguiente.
  pub fn last_settled_action_name(&self) -> Option<&str> {
    self.actions
        .iter()
        .rev()
        .find(|a| a.state != ActionState::Retried)
        .map(|a| a.name.as_str())
  }

  fn last_attempt(&self, name: &str) -> u32 {
    self.actions
        .iter()
        .rev()
        .find(|a| a.name == name)
        .map(|a| a.attempt)
        .unwrap_or(0)
  }

  /// Agrega una acción nueva en estado QUEUED (o COLD_QUEUED) con intento
  /// `1 + último intento` para ese nombre.
  pub fn queue_action(&mut self,
                      name: &str,
                      action_type: ActionType,
                      action_class: &str,
                      cold: bool,
                      now: DateTime<Utc>)
                      -> &mut Action {
    let state = if cold { ActionState::ColdQueued } else { ActionState::Queued };
    self.add_action(name, action_type, action_class, state, now)
  }

  pub fn add_action(&mut self,
                    name: &str,
                    action_type: ActionType,
                    action_class: &str,
                    state: ActionState,
                    now: DateTime<Utc>)
                    -> &mut Action {
    let attempt = self.last_attempt(name) + 1;
    let number = self.actions.len() as u32;
    self.actions.push(Action::new(name, number, action_type, action_class, state, attempt, now));
    self.modified = now;
    self.update_state(now);
    let idx = self.actions.len() - 1;
    &mut self.actions[idx]
  }

  /// Acción a la que va dirigido un evento. Falla con `UnexpectedAction` si
  /// no existe, ya terminó o el intento no coincide (evento duplicado o
  /// tardío).
  pub fn pending_action_mut(&mut self, did: Uuid, action_name: &str, attempt: u32) -> Result<&mut Action, DomainError> {
    let flow_name = self.name.clone();
    let unexpected = || DomainError::UnexpectedAction { did, flow: flow_name.clone(), action: action_name.to_string() };
    match self.actions.iter_mut().rev().find(|a| a.name == action_name) {
      Some(action) if action.is_active() && action.attempt == attempt => Ok(action),
      _ => Err(unexpected()),
    }
  }

  /// Recalcula el estado del flujo a partir de su última acción.
  pub fn update_state(&mut self, now: DateTime<Utc>) {
    self.modified = now;
    self.state = match self.actions.last().map(|a| a.state) {
      Some(ActionState::Error) => DeltaFileFlowState::Error,
      Some(ActionState::Cancelled) => DeltaFileFlowState::Cancelled,
      Some(ActionState::Filtered) => DeltaFileFlowState::Filtered,
      Some(ActionState::Complete) | Some(ActionState::Split) | Some(ActionState::Inherited) => DeltaFileFlowState::Complete,
      _ => DeltaFileFlowState::InFlight,
    };
  }

  /// Cancela el flujo si sigue en curso o en error.
  pub fn cancel(&mut self, now: DateTime<Utc>) {
    if !matches!(self.state, DeltaFileFlowState::InFlight | DeltaFileFlowState::Error) {
      return;
    }
    for action in &mut self.actions {
      action.cancel(now);
    }
    self.state = DeltaFileFlowState::Cancelled;
    self.modified = now;
  }

  /// Marca la última acción en ERROR como RETRIED. Devuelve la acción
  /// reintentada (nombre, tipo, clase) para que el llamador la vuelva a
  /// encolar, o `None` si el flujo no estaba en error.
  pub fn resume(&mut self, now: DateTime<Utc>) -> Option<(String, ActionType, String)> {
    let last = self.actions.last_mut()?;
    if last.state != ActionState::Error {
      return None;
    }
    last.retry(now);
    let retried = (last.name.clone(), last.action_type, last.action_class.clone());
    self.update_state(now);
    Some(retried)
  }

  pub fn has_action_in_state(&self, state: ActionState) -> bool {
    self.actions.iter().any(|a| a.state == state)
  }
}
