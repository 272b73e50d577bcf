// action.rs
use crate::content::Content;
use chrono::{DateTime, Utc};
use flow::ActionType;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Longitud máxima de `error_cause`, `error_context` y sus equivalentes de
/// filtrado.
pub const MAX_CAUSE_SIZE: usize = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionState {
  Queued,
  ColdQueued,
  InFlight,
  Complete,
  Error,
  Retried,
  Filtered,
  Cancelled,
  /// El padre de un split: la acción terminó produciendo hijos.
  Split,
  /// Acción copiada a un hijo de split desde el historial del padre.
  Inherited,
}

impl ActionState {
  /// Estados en los que la acción cuenta como "activa" dentro de su flujo.
  pub fn is_active(self) -> bool {
    matches!(self, ActionState::Queued | ActionState::ColdQueued | ActionState::InFlight)
  }

  pub fn is_terminal(self) -> bool {
    !self.is_active()
  }
}

/// Un paso de procesamiento dentro de un flujo de un DeltaFile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
  pub id: Uuid,
  pub name: String,
  pub number: u32,
  #[serde(rename = "type")]
  pub action_type: ActionType,
  pub state: ActionState,
  /// Clase (cola) a la que se despachó.
  pub action_class: String,
  pub attempt: u32,
  pub created: DateTime<Utc>,
  pub queued: Option<DateTime<Utc>>,
  pub start: Option<DateTime<Utc>>,
  pub stop: Option<DateTime<Utc>>,
  pub modified: DateTime<Utc>,
  pub error_cause: Option<String>,
  pub error_context: Option<String>,
  pub filtered_cause: Option<String>,
  pub filtered_context: Option<String>,
  #[serde(default)]
  pub content: Vec<Content>,
  #[serde(default)]
  pub metadata: IndexMap<String, String>,
  #[serde(default)]
  pub delete_metadata_keys: Vec<String>,
}

impl Action {
  pub fn new(name: impl Into<String>,
             number: u32,
             action_type: ActionType,
             action_class: impl Into<String>,
             state: ActionState,
             attempt: u32,
             now: DateTime<Utc>)
             -> Self {
    let queued = if state.is_active() { Some(now) } else { None };
    Self { id: Uuid::new_v4(),
           name: name.into(),
           number,
           action_type,
           state,
           action_class: action_class.into(),
           attempt,
           created: now,
           queued,
           start: None,
           stop: None,
           modified: now,
           error_cause: None,
           error_context: None,
           filtered_cause: None,
           filtered_context: None,
           content: Vec::new(),
           metadata: IndexMap::new(),
           delete_metadata_keys: Vec::new() }
  }

  pub fn is_active(&self) -> bool {
    self.state.is_active()
  }

  pub fn is_terminal(&self) -> bool {
    self.state.is_terminal()
  }

  fn change_state(&mut self, state: ActionState, start: Option<DateTime<Utc>>, stop: Option<DateTime<Utc>>, now: DateTime<Utc>) {
    self.state = state;
    if start.is_some() {
      self.start = start;
    }
    self.stop = stop.or(Some(now));
    self.modified = now;
  }

  /// El worker reclamó la acción.
  pub fn start(&mut self, start: Option<DateTime<Utc>>, now: DateTime<Utc>) {
    self.state = ActionState::InFlight;
    self.start = start.or(Some(now));
    self.modified = now;
  }

  pub fn complete(&mut self,
                  start: Option<DateTime<Utc>>,
                  stop: Option<DateTime<Utc>>,
                  content: Vec<Content>,
                  metadata: IndexMap<String, String>,
                  delete_metadata_keys: Vec<String>,
                  now: DateTime<Utc>) {
    self.change_state(ActionState::Complete, start, stop, now);
    self.content = content;
    self.metadata = metadata;
    self.delete_metadata_keys = delete_metadata_keys;
  }

  pub fn split(&mut self, start: Option<DateTime<Utc>>, stop: Option<DateTime<Utc>>, now: DateTime<Utc>) {
    self.change_state(ActionState::Split, start, stop, now);
  }

  pub fn error(&mut self,
               start: Option<DateTime<Utc>>,
               stop: Option<DateTime<Utc>>,
               cause: &str,
               context: &str,
               now: DateTime<Utc>) {
    self.error_cause = Some(truncate(cause));
    self.error_context = Some(truncate(context));
    self.change_state(ActionState::Error, start, stop, now);
  }

  pub fn filter(&mut self,
                start: Option<DateTime<Utc>>,
                stop: Option<DateTime<Utc>>,
                cause: &str,
                context: &str,
                now: DateTime<Utc>) {
    self.filtered_cause = Some(truncate(cause));
    self.filtered_context = Some(truncate(context));
    self.change_state(ActionState::Filtered, start, stop, now);
  }

  pub fn retry(&mut self, now: DateTime<Utc>) {
    self.state = ActionState::Retried;
    self.modified = now;
  }

  /// Cancela la acción si sigue activa o quedó en error. Las acciones ya
  /// terminadas con éxito no cambian.
  pub fn cancel(&mut self, now: DateTime<Utc>) {
    if self.is_terminal() && self.state != ActionState::Error {
      return;
    }
    self.state = ActionState::Cancelled;
    self.modified = now;
  }
}

/// Trunca a `MAX_CAUSE_SIZE` caracteres respetando límites UTF-8.
pub fn truncate(s: &str) -> String {
  match s.char_indices().nth(MAX_CAUSE_SIZE) {
    Some((idx, _)) => s[..idx].to_string(),
    None => s.to_string(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn error_cause_is_truncated() {
    let now = Utc::now();
    let mut a = Action::new("t", 0, ActionType::Transform, "org.T", ActionState::Queued, 1, now);
    let long = "x".repeat(MAX_CAUSE_SIZE + 10);
    a.error(None, None, &long, "ctx", now);
    assert_eq!(a.error_cause.as_deref().map(str::len), Some(MAX_CAUSE_SIZE));
    assert_eq!(a.state, ActionState::Error);
  }

  #[test]
  fn cancel_leaves_completed_actions_alone() {
    let now = Utc::now();
    let mut a = Action::new("t", 0, ActionType::Transform, "org.T", ActionState::Queued, 1, now);
    a.complete(None, None, vec![], IndexMap::new(), vec![], now);
    a.cancel(now);
    assert_eq!(a.state, ActionState::Complete);
  }
}
