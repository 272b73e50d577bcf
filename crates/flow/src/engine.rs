// Archivo: engine.rs
// Propósito: implementar `FlowGraph`, el snapshot inmutable que responde
// "¿qué acción sigue?" para un flujo y una acción actual.
//
// El grafo nunca se muta: un refresco construye uno nuevo y lo intercambia
// completo (ver `service.rs`).
use crate::domain::{ActionSpec, FlowDefinition};
use crate::errors::{FlowError, Result};
use std::collections::{BTreeSet, HashMap};

/// Snapshot inmutable del conjunto de flujos.
///
/// `version` es una huella blake3 de las definiciones (ordenadas por
/// nombre); dos grafos construidos con las mismas definiciones tienen la
/// misma versión.
#[derive(Debug, Clone)]
pub struct FlowGraph {
    flows: HashMap<String, FlowDefinition>,
    version: String,
}

impl Default for FlowGraph {
    fn default() -> Self {
        Self { flows: HashMap::new(),
               version: fingerprint(&[]) }
    }
}

impl FlowGraph {
    /// Construye y valida un grafo. Falla con `Invalid` si alguna definición
    /// es inconsistente o si hay nombres de flujo repetidos.
    pub fn build(definitions: Vec<FlowDefinition>) -> Result<Self> {
        let mut flows = HashMap::with_capacity(definitions.len());
        for def in definitions {
            def.validate()?;
            let name = def.name.clone();
            if flows.insert(name.clone(), def).is_some() {
                return Err(FlowError::Invalid(format!("flujo duplicado '{}'", name)));
            }
        }
        let mut sorted: Vec<&FlowDefinition> = flows.values().collect();
        sorted.sort_by(|a, b| a.name.cmp(&b.name));
        let version = fingerprint(&sorted);
        Ok(Self { flows, version })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    pub fn flow(&self, name: &str) -> Result<&FlowDefinition> {
        self.flows.get(name).ok_or_else(|| FlowError::UnknownFlow(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.flows.contains_key(name)
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.flows.get(name).map(|f| f.running).unwrap_or(false)
    }

    pub fn flows(&self) -> impl Iterator<Item = &FlowDefinition> {
        self.flows.values()
    }

    /// Siguientes acciones tras `current_action` en `flow_name`.
    ///
    /// - `None` como acción actual devuelve la primera acción del flujo.
    /// - Lista vacía: el flujo terminó.
    /// - `UnknownFlow` si el flujo no está en este snapshot; `UnknownAction`
    ///   si la acción actual no pertenece al flujo.
    pub fn next_actions(&self, flow_name: &str, current_action: Option<&str>) -> Result<Vec<ActionSpec>> {
        let flow = self.flow(flow_name)?;
        let next_index = match current_action {
            None => 0,
            Some(name) => {
                let pos = flow.position_of(name).ok_or_else(|| FlowError::UnknownAction { flow: flow_name.to_string(),
                                                                                          action: name.to_string() })?;
                pos + 1
            }
        };
        Ok(flow.actions.get(next_index).cloned().into_iter().collect())
    }

    /// Especificación de una acción concreta de un flujo.
    pub fn action_spec(&self, flow_name: &str, action_name: &str) -> Result<&ActionSpec> {
        self.flow(flow_name)?
            .action(action_name)
            .ok_or_else(|| FlowError::UnknownAction { flow: flow_name.to_string(),
                                                      action: action_name.to_string() })
    }

    /// Flujos en ejecución a los que `flow_name` publica al terminar. Los
    /// destinos ausentes o detenidos se omiten.
    pub fn downstream_flows(&self, flow_name: &str) -> Result<Vec<&FlowDefinition>> {
        let flow = self.flow(flow_name)?;
        Ok(flow.publish_to
               .iter()
               .filter_map(|name| self.flows.get(name))
               .filter(|f| f.running)
               .collect())
    }

    /// Clases de acción usadas por flujos en ejecución.
    pub fn running_action_classes(&self) -> BTreeSet<String> {
        self.flows
            .values()
            .filter(|f| f.running)
            .flat_map(|f| f.actions.iter().map(|a| a.action_class.clone()))
            .collect()
    }

    /// Clases de acción que `previous` usaba y que este grafo ya no usa en
    /// ningún flujo en ejecución. Sus colas pueden purgarse.
    pub fn retired_action_classes(&self, previous: &FlowGraph) -> Vec<String> {
        let current = self.running_action_classes();
        previous.running_action_classes()
                .into_iter()
                .filter(|c| !current.contains(c))
                .collect()
    }
}

fn fingerprint(sorted: &[&FlowDefinition]) -> String {
    let mut hasher = blake3::Hasher::new();
    for def in sorted {
        // serde_json sobre structs propios no falla; un error deja la huella sin ese flujo
        if let Ok(bytes) = serde_json::to_vec(def) {
            hasher.update(&bytes);
        }
        hasher.update(b"\n");
    }
    hasher.finalize().to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ActionType;

    fn flow(name: &str) -> FlowDefinition {
        FlowDefinition::new(name, vec![ActionSpec::new("Transform", "org.deltafi.Transform", ActionType::Transform)])
    }

    #[test]
    fn same_definitions_same_version() {
        let a = FlowGraph::build(vec![flow("a"), flow("b")]).expect("graph a");
        let b = FlowGraph::build(vec![flow("b"), flow("a")]).expect("graph b");
        assert_eq!(a.version(), b.version());
        let c = FlowGraph::build(vec![flow("a")]).expect("graph c");
        assert_ne!(a.version(), c.version());
    }

    #[test]
    fn duplicate_flow_names_rejected() {
        let err = FlowGraph::build(vec![flow("a"), flow("a")]).unwrap_err();
        assert!(matches!(err, FlowError::Invalid(_)));
    }
}
