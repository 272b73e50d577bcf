// Archivo: state_machine.rs
// Propósito: transiciones de un DeltaFile ante eventos de acción, reintentos,
// requeue y calentamiento del cold queue.
//
// `StateMachine` no persiste ni publica nada: muta el DeltaFile recibido y
// devuelve los despachos que el llamador debe publicar tras guardar. Así la
// misma transición puede repetirse sobre una copia fresca cuando el guardado
// optimista choca con otro escritor.
use crate::errors::{CoreError, Result};
use chrono::{DateTime, Utc};
use deltafi_domain::{Action, ActionContext, ActionEvent, ActionEventKind, ActionInput, ActionState, DeltaFile,
                     FlowInput, SplitEvent};
use flow::{ActionSpec, ActionType, FlowGraph};
use indexmap::IndexMap;

/// Acción sintética registrada cuando el flujo desapareció o está detenido.
pub const MISSING_FLOW_ACTION: &str = "MISSING_FLOW";
/// Anotación que deja una acción de egreso omitida en modo prueba.
pub const TEST_MODE_ANNOTATION: &str = "testModeReason";
/// Límite de encadenamiento de flujos vía `publish_to`.
pub const MAX_FLOW_DEPTH: u32 = 32;

/// Efecto de una transición que debe ejecutarse después de guardar.
#[derive(Debug, Default)]
pub struct Transition {
    /// Solicitudes de trabajo a publicar.
    pub dispatches: Vec<ActionInput>,
    /// Hijos creados por un split; se insertan antes de despachar.
    pub children: Vec<DeltaFile>,
}

fn never_cold(_: &str) -> bool {
    false
}

/// Máquina de estados sobre un snapshot del grafo.
pub struct StateMachine<'a> {
    graph: &'a FlowGraph,
    system_name: &'a str,
    is_cold: &'a dyn Fn(&str) -> bool,
}

impl<'a> StateMachine<'a> {
    pub fn new(graph: &'a FlowGraph, system_name: &'a str) -> Self {
        Self { graph,
               system_name,
               is_cold: &never_cold }
    }

    /// Decide por clase de acción si las acciones nuevas quedan COLD_QUEUED.
    pub fn with_cold_queue(mut self, is_cold: &'a dyn Fn(&str) -> bool) -> Self {
        self.is_cold = is_cold;
        self
    }

    /// Encola la primera acción del flujo de ingreso.
    pub fn begin(&self, delta_file: &mut DeltaFile, now: DateTime<Utc>) -> Vec<ActionInput> {
        self.advance(delta_file, 0, now)
    }

    /// Aplica un resultado de acción. Falla con `UnexpectedAction` si el
    /// evento no corresponde a la acción activa (duplicado o tardío), sin
    /// modificar el DeltaFile.
    pub fn apply_event(&self, delta_file: &mut DeltaFile, event: &ActionEvent, now: DateTime<Utc>) -> Result<Transition> {
        let flow_idx = delta_file.pending_flow_index(&event.flow_name, event.flow_id, &event.action_name)?;
        let mut transition = Transition::default();
        match &event.kind {
            ActionEventKind::Started => {
                let did = delta_file.did;
                let action = pending_action(delta_file, flow_idx, event)?;
                if action.state == ActionState::InFlight {
                    return Err(unexpected(did, event));
                }
                action.start(event.start, now);
                delta_file.flows[flow_idx].modified = now;
                delta_file.modified = now;
                return Ok(transition);
            }
            ActionEventKind::Transform(result) => {
                pending_action(delta_file, flow_idx, event)?.complete(event.start,
                                                                     event.stop,
                                                                     result.content.clone(),
                                                                     result.metadata.clone(),
                                                                     result.delete_metadata_keys.clone(),
                                                                     now);
                delta_file.add_annotations(&result.annotations);
                transition.dispatches = self.advance(delta_file, flow_idx, now);
            }
            ActionEventKind::Egress { annotations } => {
                pending_action(delta_file, flow_idx, event)?.complete(event.start,
                                                                     event.stop,
                                                                     Vec::new(),
                                                                     IndexMap::new(),
                                                                     Vec::new(),
                                                                     now);
                delta_file.egressed = true;
                delta_file.add_annotations(annotations);
                transition.dispatches = self.advance(delta_file, flow_idx, now);
            }
            ActionEventKind::Delete => {
                pending_action(delta_file, flow_idx, event)?.complete(event.start,
                                                                     event.stop,
                                                                     Vec::new(),
                                                                     IndexMap::new(),
                                                                     Vec::new(),
                                                                     now);
                delta_file.mark_content_deleted(&event.action_name, now);
                transition.dispatches = self.advance(delta_file, flow_idx, now);
            }
            ActionEventKind::Split(split) => {
                transition = self.split(delta_file, flow_idx, event, split, now)?;
            }
            ActionEventKind::Filter(filter) => {
                pending_action(delta_file, flow_idx, event)?.filter(event.start,
                                                                   event.stop,
                                                                   &filter.message,
                                                                   &filter.context,
                                                                   now);
                delta_file.add_annotations(&filter.annotations);
                settle(delta_file, flow_idx, now);
            }
            ActionEventKind::Error(error) => {
                pending_action(delta_file, flow_idx, event)?.error(event.start,
                                                                  event.stop,
                                                                  &error.cause,
                                                                  &error.context,
                                                                  now);
                delta_file.add_annotations(&error.annotations);
                delta_file.flows[flow_idx].update_state(now);
                // sin contenido no hay nada que reintentar: se cancela antes
                // de que el DeltaFile quede en ERROR
                if delta_file.content_deleted.is_none() || !delta_file.cancel(now) {
                    delta_file.update_state(now);
                }
            }
        }
        delta_file.recalculate_bytes();
        Ok(transition)
    }

    fn split(&self,
             delta_file: &mut DeltaFile,
             flow_idx: usize,
             event: &ActionEvent,
             split: &SplitEvent,
             now: DateTime<Utc>)
             -> Result<Transition> {
        let action = pending_action(delta_file, flow_idx, event)?;
        action.split(event.start, event.stop, now);
        let action_id = action.id;
        delta_file.flows[flow_idx].update_state(now);
        delta_file.add_annotations(&split.annotations);
        let flow_id = delta_file.flows[flow_idx].id;
        let mut transition = Transition::default();
        for (index, spec) in split.children.iter().enumerate() {
            let did = DeltaFile::split_child_did(delta_file.did, flow_id, action_id, index);
            let mut child = DeltaFile::split_child(delta_file,
                                                   did,
                                                   flow_idx,
                                                   &spec.name,
                                                   spec.content.clone(),
                                                   spec.metadata.clone(),
                                                   now)?;
            transition.dispatches.extend(self.advance(&mut child, 0, now));
            child.recalculate_bytes();
            delta_file.child_dids.push(child.did);
            transition.children.push(child);
        }
        delta_file.update_state(now);
        Ok(transition)
    }

    /// Avanza el flujo `flow_idx` desde su última acción asentada: encola
    /// la siguiente, o cierra el flujo y publica a los flujos siguientes.
    pub fn advance(&self, delta_file: &mut DeltaFile, flow_idx: usize, now: DateTime<Utc>) -> Vec<ActionInput> {
        let mut dispatches = Vec::new();
        loop {
            let flow_name = delta_file.flows[flow_idx].name.clone();
            let current = delta_file.flows[flow_idx].last_settled_action_name().map(str::to_string);
            let next = match self.graph.next_actions(&flow_name, current.as_deref()) {
                Ok(next) => next,
                Err(e) => {
                    self.fail_flow(delta_file, flow_idx, &e.to_string(), now);
                    return dispatches;
                }
            };
            if next.is_empty() {
                self.complete_flow(delta_file, flow_idx, now, &mut dispatches);
                break;
            }
            if !self.graph.is_running(&flow_name) {
                self.fail_flow(delta_file, flow_idx, &format!("el flujo '{}' no está en ejecución", flow_name), now);
                return dispatches;
            }
            let test_mode = self.graph.flow(&flow_name).map(|f| f.test_mode).unwrap_or(false);
            let mut skipped = false;
            for spec in next {
                if test_mode && spec.action_type == ActionType::Egress {
                    skip_egress(delta_file, flow_idx, &spec, now);
                    skipped = true;
                } else {
                    dispatches.push(self.queue(delta_file, flow_idx, &spec, now));
                }
            }
            if !skipped {
                break;
            }
        }
        delta_file.update_state(now);
        dispatches
    }

    fn queue(&self, delta_file: &mut DeltaFile, flow_idx: usize, spec: &ActionSpec, now: DateTime<Utc>) -> ActionInput {
        let cold = (self.is_cold)(&spec.action_class);
        let action = delta_file.flows[flow_idx].queue_action(&spec.name, spec.action_type, &spec.action_class, cold, now)
                                               .clone();
        if cold {
            log::info!("acción {} de {} en cold queue ({})", spec.name, delta_file.did, spec.action_class);
        }
        self.action_input(delta_file, flow_idx, &action, spec.parameters.clone())
    }

    fn complete_flow(&self, delta_file: &mut DeltaFile, flow_idx: usize, now: DateTime<Utc>, dispatches: &mut Vec<ActionInput>) {
        delta_file.flows[flow_idx].update_state(now);
        let flow_name = delta_file.flows[flow_idx].name.clone();
        let downstream: Vec<String> = match self.graph.downstream_flows(&flow_name) {
            Ok(flows) => flows.iter().map(|f| f.name.clone()).collect(),
            Err(_) => Vec::new(),
        };
        if downstream.is_empty() {
            return;
        }
        let depth = delta_file.flows[flow_idx].depth + 1;
        if depth > MAX_FLOW_DEPTH {
            log::warn!("{}: profundidad máxima de flujos alcanzada en '{}'", delta_file.did, flow_name);
            return;
        }
        let input = FlowInput { content: delta_file.flows[flow_idx].last_content(),
                                metadata: delta_file.flows[flow_idx].metadata() };
        for name in downstream {
            let idx = delta_file.add_flow(&name, input.clone(), depth, now);
            dispatches.extend(self.advance(delta_file, idx, now));
        }
    }

    /// Deja el flujo en ERROR con una acción sintética; el DeltaFile queda
    /// visible en ERROR hasta un retry.
    fn fail_flow(&self, delta_file: &mut DeltaFile, flow_idx: usize, cause: &str, now: DateTime<Utc>) {
        log::warn!("{}: no se puede avanzar el flujo '{}': {}", delta_file.did, delta_file.flows[flow_idx].name, cause);
        let flow = &mut delta_file.flows[flow_idx];
        flow.add_action(MISSING_FLOW_ACTION, ActionType::Unknown, "", ActionState::Error, now)
            .error(None, Some(now), cause, "", now);
        flow.update_state(now);
        delta_file.update_state(now);
    }

    /// Reintento manual: las acciones en ERROR pasan a RETRIED y cada flujo
    /// reanudado vuelve a encolar desde su última acción asentada.
    pub fn retry(&self, delta_file: &mut DeltaFile, now: DateTime<Utc>) -> Result<Vec<ActionInput>> {
        if delta_file.content_deleted.is_some() {
            return Err(CoreError::ContentDeleted(delta_file.did));
        }
        let resumed = delta_file.resume_errors(now);
        if resumed.is_empty() {
            return Err(CoreError::NoErrors(delta_file.did));
        }
        let mut dispatches = Vec::new();
        for (idx, name, _, _) in resumed {
            log::info!("reintentando '{}' en el flujo '{}' de {}", name, delta_file.flows[idx].name, delta_file.did);
            dispatches.extend(self.advance(delta_file, idx, now));
        }
        delta_file.update_state(now);
        Ok(dispatches)
    }

    /// Reenvía las acciones QUEUED/IN_FLIGHT sin cambios desde antes de
    /// `threshold`, con la misma acción e intento. Actualiza `modified` para
    /// que cada acción se reenvíe como mucho una vez por intervalo.
    pub fn requeue(&self, delta_file: &mut DeltaFile, threshold: DateTime<Utc>, now: DateTime<Utc>) -> Vec<ActionInput> {
        let targets: Vec<(usize, usize)> =
            delta_file.flows
                      .iter()
                      .enumerate()
                      .filter(|(_, f)| !f.is_terminal())
                      .filter_map(|(fi, f)| {
                          f.actions
                           .iter()
                           .rposition(|a| matches!(a.state, ActionState::Queued | ActionState::InFlight) && a.modified < threshold)
                           .map(|ai| (fi, ai))
                      })
                      .collect();
        let mut inputs = Vec::new();
        for (fi, ai) in targets {
            let action = &mut delta_file.flows[fi].actions[ai];
            action.modified = now;
            action.queued = Some(now);
            let action = action.clone();
            delta_file.requeue_count += 1;
            let parameters = self.parameters(&delta_file.flows[fi].name, &action.name);
            inputs.push(self.action_input(delta_file, fi, &action, parameters));
        }
        if !inputs.is_empty() {
            delta_file.modified = now;
        }
        inputs
    }

    /// Solicitudes de las acciones QUEUED de los flujos en curso, tal como
    /// están guardadas. No modifica el DeltaFile.
    pub fn queued_inputs(&self, delta_file: &DeltaFile) -> Vec<ActionInput> {
        let mut inputs = Vec::new();
        for (fi, flow) in delta_file.flows.iter().enumerate().filter(|(_, f)| !f.is_terminal()) {
            for action in flow.actions.iter().filter(|a| a.state == ActionState::Queued) {
                let parameters = self.parameters(&flow.name, &action.name);
                inputs.push(self.action_input(delta_file, fi, action, parameters));
            }
        }
        inputs
    }

    /// Pasa a QUEUED las acciones COLD_QUEUED cuya cola ya bajó del umbral.
    pub fn warm(&self, delta_file: &mut DeltaFile, now: DateTime<Utc>) -> Vec<ActionInput> {
        let is_cold = self.is_cold;
        let targets: Vec<(usize, usize)> =
            delta_file.flows
                      .iter()
                      .enumerate()
                      .filter(|(_, f)| !f.is_terminal())
                      .flat_map(move |(fi, f)| {
                          f.actions
                           .iter()
                           .enumerate()
                           .filter(move |(_, a)| a.state == ActionState::ColdQueued && !is_cold(&a.action_class))
                           .map(move |(ai, _)| (fi, ai))
                      })
                      .collect();
        let mut inputs = Vec::new();
        for (fi, ai) in targets {
            let action = &mut delta_file.flows[fi].actions[ai];
            action.state = ActionState::Queued;
            action.modified = now;
            action.queued = Some(now);
            let action = action.clone();
            let parameters = self.parameters(&delta_file.flows[fi].name, &action.name);
            inputs.push(self.action_input(delta_file, fi, &action, parameters));
        }
        if !inputs.is_empty() {
            delta_file.modified = now;
        }
        inputs
    }

    fn parameters(&self, flow_name: &str, action_name: &str) -> serde_json::Value {
        self.graph
            .action_spec(flow_name, action_name)
            .map(|spec| spec.parameters.clone())
            .unwrap_or(serde_json::Value::Null)
    }

    fn action_input(&self, delta_file: &DeltaFile, flow_idx: usize, action: &Action, parameters: serde_json::Value) -> ActionInput {
        let flow = &delta_file.flows[flow_idx];
        ActionInput { queue_name: action.action_class.clone(),
                      action_context: ActionContext { did: delta_file.did,
                                                      delta_file_name: delta_file.name.clone(),
                                                      data_source: delta_file.data_source.clone(),
                                                      flow_name: flow.name.clone(),
                                                      flow_id: flow.id,
                                                      action_name: action.name.clone(),
                                                      action_id: action.id,
                                                      action_type: action.action_type,
                                                      attempt: action.attempt,
                                                      system_name: self.system_name.to_string() },
                      content: flow.last_content(),
                      metadata: flow.metadata(),
                      action_parameters: parameters,
                      action_created: action.created,
                      cold_queued: action.state == ActionState::ColdQueued }
    }
}

fn pending_action<'d>(delta_file: &'d mut DeltaFile, flow_idx: usize, event: &ActionEvent) -> Result<&'d mut Action> {
    let did = delta_file.did;
    Ok(delta_file.flows[flow_idx].pending_action_mut(did, &event.action_name, event.attempt)?)
}

fn unexpected(did: uuid::Uuid, event: &ActionEvent) -> CoreError {
    CoreError::UnexpectedAction { did,
                                  flow: event.flow_name.clone(),
                                  action: event.action_name.clone() }
}

fn settle(delta_file: &mut DeltaFile, flow_idx: usize, now: DateTime<Utc>) {
    delta_file.flows[flow_idx].update_state(now);
    delta_file.update_state(now);
}

fn skip_egress(delta_file: &mut DeltaFile, flow_idx: usize, spec: &ActionSpec, now: DateTime<Utc>) {
    let reason = format!("egreso '{}' omitido: el flujo está en modo prueba", spec.name);
    let flow = &mut delta_file.flows[flow_idx];
    flow.test_mode = true;
    flow.test_mode_reason = Some(reason.clone());
    flow.add_action(&spec.name, spec.action_type, &spec.action_class, ActionState::Complete, now)
        .stop = Some(now);
    delta_file.annotations.insert(TEST_MODE_ANNOTATION.to_string(), reason);
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow::FlowDefinition;
    use uuid::Uuid;

    fn graph() -> FlowGraph {
        let first = FlowDefinition::new("in", vec![ActionSpec::new("load", "org.Load", ActionType::Transform)])
            .publishing_to(vec!["out".into()]);
        let second = FlowDefinition::new("out", vec![ActionSpec::new("send", "org.Send", ActionType::Egress)]);
        FlowGraph::build(vec![first, second]).expect("graph")
    }

    fn ingress(graph: &FlowGraph) -> (DeltaFile, Vec<ActionInput>) {
        let now = Utc::now();
        let mut df = DeltaFile::ingress(Uuid::new_v4(), "a.txt", "in", IndexMap::new(), vec![], now);
        let dispatches = StateMachine::new(graph, "test").begin(&mut df, now);
        (df, dispatches)
    }

    #[test]
    fn completed_flow_publishes_to_downstream_flow() {
        let graph = graph();
        let (mut df, dispatches) = ingress(&graph);
        let load = &dispatches[0].action_context;
        let event = ActionEvent::new(df.did,
                                     &load.flow_name,
                                     load.flow_id,
                                     &load.action_name,
                                     load.attempt,
                                     ActionEventKind::Transform(Default::default()));
        let transition = StateMachine::new(&graph, "test").apply_event(&mut df, &event, Utc::now())
                                                          .expect("apply");
        assert_eq!(df.flows.len(), 2);
        assert_eq!(df.flows[1].depth, 1);
        assert_eq!(transition.dispatches.len(), 1);
        assert_eq!(transition.dispatches[0].queue_name, "org.Send");
        assert_eq!(transition.dispatches[0].action_context.flow_name, "out");
    }

    #[test]
    fn cold_actions_are_recorded_but_flagged() {
        let graph = graph();
        let always = |_: &str| true;
        let now = Utc::now();
        let mut df = DeltaFile::ingress(Uuid::new_v4(), "a.txt", "in", IndexMap::new(), vec![], now);
        let dispatches = StateMachine::new(&graph, "test").with_cold_queue(&always).begin(&mut df, now);
        assert!(dispatches[0].cold_queued);
        assert_eq!(df.flows[0].actions[0].state, ActionState::ColdQueued);
        let warmed = StateMachine::new(&graph, "test").warm(&mut df, now);
        assert_eq!(warmed.len(), 1);
        assert!(!warmed[0].cold_queued);
        assert_eq!(df.flows[0].actions[0].state, ActionState::Queued);
    }

    #[test]
    fn reapplied_split_yields_the_same_children() {
        let splitter = FlowDefinition::new("in",
                                           vec![ActionSpec::new("split", "org.Split", ActionType::Transform),
                                                ActionSpec::new("load", "org.Load", ActionType::Transform)]);
        let graph = FlowGraph::build(vec![splitter]).expect("graph");
        let (df, dispatches) = ingress(&graph);
        let split = &dispatches[0].action_context;
        let children = ["a", "b"].iter()
                                 .map(|name| deltafi_domain::SplitChild { name: name.to_string(),
                                                                          content: vec![],
                                                                          metadata: IndexMap::new() })
                                 .collect();
        let event = ActionEvent::new(df.did,
                                     &split.flow_name,
                                     split.flow_id,
                                     &split.action_name,
                                     split.attempt,
                                     ActionEventKind::Split(SplitEvent { children,
                                                                         annotations: IndexMap::new() }));
        let machine = StateMachine::new(&graph, "test");
        let (mut first, mut second) = (df.clone(), df);
        let a = machine.apply_event(&mut first, &event, Utc::now()).expect("split");
        let b = machine.apply_event(&mut second, &event, Utc::now()).expect("split again");
        assert_eq!(first.child_dids, second.child_dids);
        let dids: Vec<Uuid> = a.children.iter().map(|c| c.did).collect();
        assert_eq!(dids, b.children.iter().map(|c| c.did).collect::<Vec<_>>());
        assert_eq!(dids, first.child_dids);
        assert_eq!(machine.queued_inputs(&a.children[0]).len(), 1);
    }

    #[test]
    fn unknown_flow_on_ingress_leaves_an_error_action() {
        let graph = graph();
        let now = Utc::now();
        let mut df = DeltaFile::ingress(Uuid::new_v4(), "a.txt", "gone", IndexMap::new(), vec![], now);
        let dispatches = StateMachine::new(&graph, "test").begin(&mut df, now);
        assert!(dispatches.is_empty());
        let action = df.flows[0].last_action().expect("action");
        assert_eq!(action.name, MISSING_FLOW_ACTION);
        assert_eq!(action.state, ActionState::Error);
        assert!(action.error_cause.as_deref().unwrap_or_default().contains("gone"));
        assert_eq!(df.stage, deltafi_domain::DeltaFileStage::Error);
    }
}
