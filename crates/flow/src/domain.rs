// Archivo: domain.rs
// Propósito: tipos de definición de flujos (`FlowDefinition`, `ActionSpec`)
// que la configuración entrega al orquestador. Son datos de sólo lectura:
// el grafo se reconstruye completo a partir de ellos.
use crate::errors::{FlowError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Clase de acción dentro de un flujo.
///
/// Sólo se modelan las clases que afectan las transiciones de estado. Las
/// variantes de transform/load/enrich del sistema original colapsan en
/// `Transform`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    Ingress,
    Transform,
    Egress,
    Unknown,
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ActionType::Ingress => "INGRESS",
            ActionType::Transform => "TRANSFORM",
            ActionType::Egress => "EGRESS",
            ActionType::Unknown => "UNKNOWN",
        };
        write!(f, "{}", s)
    }
}

/// Paso configurado de un flujo.
///
/// `action_class` es el nombre de la cola a la que se despacha el trabajo;
/// varias acciones (de distintos flujos) pueden compartir la misma clase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionSpec {
    pub name: String,
    pub action_class: String,
    #[serde(rename = "type")]
    pub action_type: ActionType,
    /// Configuración estática que viaja en cada despacho.
    #[serde(default)]
    pub parameters: serde_json::Value,
}

impl ActionSpec {
    pub fn new(name: impl Into<String>, action_class: impl Into<String>, action_type: ActionType) -> Self {
        Self { name: name.into(),
               action_class: action_class.into(),
               action_type,
               parameters: serde_json::Value::Null }
    }

    pub fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
        self.parameters = parameters;
        self
    }
}

/// Definición de un flujo: secuencia ordenada de acciones más banderas de
/// operación.
///
/// - `running`: si es `false`, el flujo no recibe nuevos despachos.
/// - `test_mode`: las acciones de egress no se despachan; se completan de
///   forma sintética.
/// - `publish_to`: flujos que se encadenan cuando este termina (ingress ->
///   enrich -> egress).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub actions: Vec<ActionSpec>,
    #[serde(default = "default_running")]
    pub running: bool,
    #[serde(default)]
    pub test_mode: bool,
    #[serde(default)]
    pub publish_to: Vec<String>,
}

fn default_running() -> bool {
    true
}

impl FlowDefinition {
    pub fn new(name: impl Into<String>, actions: Vec<ActionSpec>) -> Self {
        Self { name: name.into(),
               description: None,
               actions,
               running: true,
               test_mode: false,
               publish_to: Vec::new() }
    }

    pub fn with_running(mut self, running: bool) -> Self {
        self.running = running;
        self
    }

    pub fn with_test_mode(mut self, test_mode: bool) -> Self {
        self.test_mode = test_mode;
        self
    }

    pub fn publishing_to(mut self, flows: Vec<String>) -> Self {
        self.publish_to = flows;
        self
    }

    /// Posición de una acción dentro del flujo.
    pub fn position_of(&self, action_name: &str) -> Option<usize> {
        self.actions.iter().position(|a| a.name == action_name)
    }

    pub fn action(&self, action_name: &str) -> Option<&ActionSpec> {
        self.actions.iter().find(|a| a.name == action_name)
    }

    /// Valida invariantes locales de la definición: nombre no vacío, al
    /// menos una acción y nombres de acción únicos.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(FlowError::Invalid("el nombre del flujo no puede estar vacío".into()));
        }
        if self.actions.is_empty() {
            return Err(FlowError::Invalid(format!("el flujo '{}' no define acciones", self.name)));
        }
        let mut seen = HashSet::new();
        for action in &self.actions {
            if action.name.trim().is_empty() || action.action_class.trim().is_empty() {
                return Err(FlowError::Invalid(format!("el flujo '{}' contiene una acción sin nombre o sin clase",
                                                      self.name)));
            }
            if !seen.insert(action.name.as_str()) {
                return Err(FlowError::Invalid(format!("acción duplicada '{}' en el flujo '{}'", action.name, self.name)));
            }
        }
        Ok(())
    }
}
