// action_input.rs
use crate::content::Content;
use chrono::{DateTime, Utc};
use flow::ActionType;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identidad de la acción despachada. El worker la devuelve tal cual en la
/// cabecera del `ActionEvent`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionContext {
  pub did: Uuid,
  pub delta_file_name: String,
  pub data_source: String,
  pub flow_name: String,
  pub flow_id: Uuid,
  pub action_name: String,
  pub action_id: Uuid,
  pub action_type: ActionType,
  pub attempt: u32,
  pub system_name: String,
}

/// Solicitud de trabajo publicada en la cola de la clase de acción.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionInput {
  /// Clase de acción, es decir el nombre de la cola destino.
  pub queue_name: String,
  pub action_context: ActionContext,
  #[serde(default)]
  pub content: Vec<Content>,
  #[serde(default)]
  pub metadata: IndexMap<String, String>,
  #[serde(default)]
  pub action_parameters: serde_json::Value,
  pub action_created: DateTime<Utc>,
  /// Si es verdadero, el despacho se registró como COLD_QUEUED y no debe
  /// publicarse todavía.
  #[serde(default)]
  pub cold_queued: bool,
}

impl ActionInput {
  /// Clave de unicidad dentro de una cola: dos entradas con la misma clave
  /// representan el mismo despacho.
  pub fn unique_key(&self) -> String {
    let ctx = &self.action_context;
    format!("{}:{}:{}:{}", ctx.did, ctx.flow_id, ctx.action_name, ctx.attempt)
  }
}
