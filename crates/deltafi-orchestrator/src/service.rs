// Archivo: service.rs
// Propósito: operaciones del núcleo sobre DeltaFiles (ingreso, aplicación de
// eventos, retry, cancelación, requeue y cold queue).
//
// Cada operación sigue el mismo patrón: transición pura con `StateMachine`
// dentro de `with_optimistic_retry`, y publicación de despachos sólo
// después de que el guardado tuvo éxito.
use crate::context::CoreContext;
use crate::errors::{CoreError, Result};
use crate::retry::{with_optimistic_retry, Mutation};
use crate::state_machine::StateMachine;
use chrono::{DateTime, Utc};
use deltafi_domain::{store_content, ActionEvent, ActionInput, ActionState, Content, DeltaFile, DeltaFileCriteria,
                     DeltaFileStage};
use deltafi_queue::RESULT_QUEUE;
use flow::RefreshOutcome;
use indexmap::IndexMap;
use rayon::prelude::*;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// Datos de ingreso de un DeltaFile cuyo contenido ya está almacenado.
#[derive(Debug, Clone, Default)]
pub struct IngressRequest {
  /// `None` genera un did nuevo.
  pub did: Option<Uuid>,
  /// Flujo de ingreso (`data_source`).
  pub flow: String,
  pub name: String,
  pub metadata: IndexMap<String, String>,
  pub content: Vec<Content>,
}

/// Resultado por did de `retry_errors`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryResult {
  pub did: Uuid,
  pub success: bool,
  pub error: Option<String>,
}

/// Resultado por did de `cancel`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResult {
  pub did: Uuid,
  pub success: bool,
  pub error: Option<String>,
}

/// Resultado por did de `acknowledge`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcknowledgeResult {
  pub did: Uuid,
  pub success: bool,
  pub error: Option<String>,
}

/// Conteo de un lote de eventos por desenlace.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EventBatchReport {
  pub applied: usize,
  /// Duplicados o tardíos.
  pub stale: usize,
  pub not_found: usize,
  pub invalid: usize,
  /// Devueltos a `dgs` para un tick posterior.
  pub requeued: usize,
  pub failed: usize,
}

impl EventBatchReport {
  fn merge(mut self, other: Self) -> Self {
    self.applied += other.applied;
    self.stale += other.stale;
    self.not_found += other.not_found;
    self.invalid += other.invalid;
    self.requeued += other.requeued;
    self.failed += other.failed;
    self
  }

  pub fn total(&self) -> usize {
    self.applied + self.stale + self.not_found + self.invalid + self.requeued + self.failed
  }
}

pub struct DeltaFilesService {
  ctx: Arc<CoreContext>,
}

impl DeltaFilesService {
  pub fn new(ctx: Arc<CoreContext>) -> Self {
    Self { ctx }
  }

  pub fn context(&self) -> &CoreContext {
    &self.ctx
  }

  fn is_cold(&self, action_class: &str) -> bool {
    let threshold = self.ctx.config.cold_queue_threshold;
    if threshold == 0 {
      return false;
    }
    match self.ctx.queue.size(action_class) {
      Ok(size) => size >= threshold,
      Err(e) => {
        log::warn!("no se pudo medir la cola {}: {}", action_class, e);
        false
      }
    }
  }

  fn max_retries(&self) -> u32 {
    self.ctx.config.max_optimistic_retries
  }

  /// Publica despachos. Un fallo de la cola no deshace la transición ya
  /// guardada: el requeue volverá a publicar esas acciones.
  fn dispatch(&self, inputs: &[ActionInput], check_unique: bool) -> usize {
    if inputs.is_empty() {
      return 0;
    }
    match self.ctx.queue.put_actions(inputs, check_unique) {
      Ok(published) => published,
      Err(e) => {
        log::error!("no se pudieron publicar {} acciones: {}; el requeue las recuperará", inputs.len(), e);
        0
      }
    }
  }

  /// Crea un DeltaFile en el flujo indicado y despacha su primera acción.
  pub fn ingress(&self, request: IngressRequest) -> Result<DeltaFile> {
    let graph = self.ctx.flows.snapshot();
    if !graph.flow(&request.flow)?.running {
      return Err(CoreError::FlowNotRunning(request.flow));
    }
    let now = Utc::now();
    let did = request.did.unwrap_or_else(Uuid::new_v4);
    let mut delta_file = DeltaFile::ingress(did, request.name, request.flow, request.metadata, request.content, now);
    let is_cold = |class: &str| self.is_cold(class);
    let machine = StateMachine::new(&graph, &self.ctx.config.system_name).with_cold_queue(&is_cold);
    let dispatches = machine.begin(&mut delta_file, now);
    delta_file.version = self.ctx.repo.insert(&delta_file)?;
    self.dispatch(&dispatches, false);
    log::info!("DeltaFile {} ingresado en '{}' ({} bytes)", did, delta_file.data_source, delta_file.ingress_bytes);
    Ok(delta_file)
  }

  /// Guarda `bytes` en el almacenamiento de contenido y hace el ingreso.
  pub fn ingress_bytes(&self,
                       flow: &str,
                       name: &str,
                       media_type: &str,
                       bytes: Vec<u8>,
                       metadata: IndexMap<String, String>)
                       -> Result<DeltaFile> {
    let did = Uuid::new_v4();
    let content = store_content(self.ctx.content.as_ref(), did, name, media_type, bytes)?;
    self.ingress(IngressRequest { did: Some(did),
                                  flow: flow.to_string(),
                                  name: name.to_string(),
                                  metadata,
                                  content: vec![content] })
  }

  /// Aplica un resultado de acción con concurrencia optimista. Los hijos de
  /// un split se insertan antes de guardar al padre; si alguno falla el
  /// padre no cambia y el error es reintentable.
  pub fn apply_event(&self, event: &ActionEvent) -> Result<DeltaFile> {
    event.validate().map_err(|e| CoreError::InvalidEvent(e.to_string()))?;
    let graph = self.ctx.flows.snapshot();
    let is_cold = |class: &str| self.is_cold(class);
    let machine = StateMachine::new(&graph, &self.ctx.config.system_name).with_cold_queue(&is_cold);
    let (delta_file, transition) =
      with_optimistic_retry(self.ctx.repo.as_ref(), &event.did, self.max_retries(), |df| {
        let mut transition = machine.apply_event(df, event, Utc::now())?;
        if !transition.children.is_empty() {
          // un split sólo despacha a sus hijos
          transition.dispatches = self.insert_children(&machine, &mut transition.children)?;
        }
        Ok(Mutation::Save(transition))
      })?;
    self.dispatch(&transition.dispatches, false);
    log::debug!("evento {} aplicado a {} (etapa {})", event.kind.name(), delta_file.did, delta_file.stage.as_str());
    Ok(delta_file)
  }

  /// Inserta los hijos de un split. Un hijo que ya existe (de un intento
  /// anterior del mismo evento) se conserva como está guardado y sus
  /// solicitudes se arman a partir de esa copia.
  fn insert_children(&self, machine: &StateMachine<'_>, children: &mut [DeltaFile]) -> Result<Vec<ActionInput>> {
    let mut dispatches = Vec::new();
    for child in children.iter_mut() {
      if let Some(stored) = self.ctx.repo.find(&child.did)? {
        log::info!("hijo {} ya creado por un intento anterior", stored.did);
        *child = stored;
      } else {
        match self.ctx.repo.insert(child) {
          Ok(version) => child.version = version,
          Err(e) => match self.ctx.repo.find(&child.did) {
            Ok(Some(stored)) => *child = stored,
            _ => {
              log::error!("no se pudo crear el hijo {}: {}", child.did, e);
              return Err(CoreError::Storage(format!("hijo {} sin crear: {}", child.did, e)));
            }
          },
        }
      }
      dispatches.extend(machine.queued_inputs(child));
    }
    Ok(dispatches)
  }

  /// Aplica un lote: agrupa por did, procesa los grupos en paralelo y cada
  /// grupo en orden de llegada.
  pub fn handle_events(&self, events: Vec<ActionEvent>) -> EventBatchReport {
    let mut groups: IndexMap<Uuid, Vec<ActionEvent>> = IndexMap::new();
    for event in events {
      groups.entry(event.did).or_default().push(event);
    }
    let groups: Vec<Vec<ActionEvent>> = groups.into_values().collect();
    groups.into_par_iter()
          .map(|group| self.apply_group(group))
          .reduce(EventBatchReport::default, EventBatchReport::merge)
  }

  fn apply_group(&self, group: Vec<ActionEvent>) -> EventBatchReport {
    let mut report = EventBatchReport::default();
    let mut pending = group.into_iter();
    while let Some(event) = pending.next() {
      match self.apply_event(&event) {
        Ok(_) => report.applied += 1,
        Err(e) if e.is_stale() => {
          log::debug!("evento obsoleto descartado: {}", e);
          report.stale += 1;
        }
        Err(e) if e.is_not_found() => {
          log::warn!("evento {} descartado: {}", event.kind.name(), e);
          report.not_found += 1;
        }
        Err(CoreError::InvalidEvent(msg)) => {
          log::warn!("evento inválido descartado: {}", msg);
          report.invalid += 1;
        }
        Err(CoreError::CorruptDocument(msg)) => {
          log::error!("evento {} de {} descartado, documento ilegible: {}", event.kind.name(), event.did, msg);
          report.failed += 1;
        }
        Err(e) if e.is_retryable() => {
          log::error!("evento de {} no aplicado: {}; se devuelve a {}", event.did, e, RESULT_QUEUE);
          // el resto del grupo vuelve detrás para no adelantarse a este evento
          for event in std::iter::once(event).chain(pending.by_ref()) {
            self.push_back(&event, &mut report);
          }
          break;
        }
        Err(e) => {
          log::error!("evento {} de {} descartado: {}", event.kind.name(), event.did, e);
          report.failed += 1;
        }
      }
    }
    report
  }

  fn push_back(&self, event: &ActionEvent, report: &mut EventBatchReport) {
    match self.ctx.queue.put_result(event) {
      Ok(()) => report.requeued += 1,
      Err(e) => {
        log::error!("no se pudo devolver el evento de {} a {}: {}; lo recuperará el requeue", event.did, RESULT_QUEUE, e);
        report.failed += 1;
      }
    }
  }

  /// Drena sin bloquear los eventos disponibles y los aplica.
  pub fn process_pending_events(&self) -> Result<EventBatchReport> {
    let events = self.ctx.queue.drain_results(self.ctx.config.event_batch_size)?;
    if events.is_empty() {
      return Ok(EventBatchReport::default());
    }
    Ok(self.handle_events(events))
  }

  /// Reintenta manualmente las acciones en error. Los fallos se reportan
  /// por did, no se propagan.
  pub fn retry_errors(&self, dids: &[Uuid]) -> Vec<RetryResult> {
    let graph = self.ctx.flows.snapshot();
    let is_cold = |class: &str| self.is_cold(class);
    let machine = StateMachine::new(&graph, &self.ctx.config.system_name).with_cold_queue(&is_cold);
    dids.iter()
        .map(|did| {
          let outcome = with_optimistic_retry(self.ctx.repo.as_ref(), did, self.max_retries(), |df| {
            Ok(Mutation::Save(machine.retry(df, Utc::now())?))
          });
          match outcome {
            Ok((_, dispatches)) => {
              self.dispatch(&dispatches, false);
              RetryResult { did: *did,
                            success: true,
                            error: None }
            }
            Err(e) => {
              log::warn!("retry de {} rechazado: {}", did, e);
              RetryResult { did: *did,
                            success: false,
                            error: Some(e.to_string()) }
            }
          }
        })
        .collect()
  }

  /// Cancela DeltaFiles no terminales. Los eventos que lleguen después
  /// quedan obsoletos.
  pub fn cancel(&self, dids: &[Uuid]) -> Vec<CancelResult> {
    dids.iter()
        .map(|did| {
          let outcome = with_optimistic_retry(self.ctx.repo.as_ref(), did, self.max_retries(), |df| {
            if df.cancel(Utc::now()) {
              Ok(Mutation::Save(()))
            } else {
              Err(CoreError::NotCancellable(df.did))
            }
          });
          match outcome {
            Ok(_) => {
              log::info!("DeltaFile {} cancelado", did);
              CancelResult { did: *did,
                             success: true,
                             error: None }
            }
            Err(e) => CancelResult { did: *did,
                                     success: false,
                                     error: Some(e.to_string()) },
          }
        })
        .collect()
  }

  /// Reconoce los errores de DeltaFiles en ERROR con el motivo dado.
  pub fn acknowledge(&self, dids: &[Uuid], reason: &str) -> Vec<AcknowledgeResult> {
    dids.iter()
        .map(|did| {
          let outcome = with_optimistic_retry(self.ctx.repo.as_ref(), did, self.max_retries(), |df| {
            if df.acknowledge_errors(reason, Utc::now()) {
              Ok(Mutation::Save(()))
            } else {
              Err(CoreError::NoErrors(df.did))
            }
          });
          match outcome {
            Ok(_) => {
              log::info!("error de {} reconocido: {}", did, reason);
              AcknowledgeResult { did: *did,
                                  success: true,
                                  error: None }
            }
            Err(e) => AcknowledgeResult { did: *did,
                                          success: false,
                                          error: Some(e.to_string()) },
          }
        })
        .collect()
  }

  /// Reenvía acciones QUEUED/IN_FLIGHT sin novedades desde hace más del
  /// umbral de requeue. Devuelve cuántas se publicaron.
  pub fn requeue(&self, now: DateTime<Utc>) -> Result<usize> {
    let age = chrono::Duration::from_std(self.ctx.config.requeue_threshold).map_err(|e| CoreError::Config(e.to_string()))?;
    let threshold = now - age;
    let criteria = DeltaFileCriteria { stages: vec![DeltaFileStage::InFlight],
                                       active_modified_before: Some(threshold),
                                       limit: Some(self.ctx.config.event_batch_size),
                                       ..Default::default() };
    let graph = self.ctx.flows.snapshot();
    let machine = StateMachine::new(&graph, &self.ctx.config.system_name);
    let mut published = 0;
    for candidate in self.ctx.repo.query(&criteria)? {
      let outcome = with_optimistic_retry(self.ctx.repo.as_ref(), &candidate.did, self.max_retries(), |df| {
        let inputs = machine.requeue(df, threshold, now);
        Ok(if inputs.is_empty() { Mutation::Skip(inputs) } else { Mutation::Save(inputs) })
      });
      match outcome {
        Ok((df, inputs)) if !inputs.is_empty() => {
          log::info!("requeue de {} acciones de {} (requeue #{})", inputs.len(), df.did, df.requeue_count);
          published += self.dispatch(&inputs, true);
        }
        Ok(_) => {}
        Err(e) => log::warn!("requeue de {} fallido: {}", candidate.did, e),
      }
    }
    Ok(published)
  }

  /// Publica las acciones COLD_QUEUED cuya cola bajó del umbral.
  pub fn warm_cold_queued(&self, now: DateTime<Utc>) -> Result<usize> {
    if self.ctx.config.cold_queue_threshold == 0 {
      return Ok(0);
    }
    let criteria = DeltaFileCriteria { stages: vec![DeltaFileStage::InFlight],
                                       limit: Some(self.ctx.config.event_batch_size),
                                       ..Default::default() };
    let graph = self.ctx.flows.snapshot();
    let is_cold = |class: &str| self.is_cold(class);
    let machine = StateMachine::new(&graph, &self.ctx.config.system_name).with_cold_queue(&is_cold);
    let mut published = 0;
    let candidates = self.ctx.repo.query(&criteria)?;
    for candidate in candidates.iter().filter(|df| df.flows.iter().any(|f| f.has_action_in_state(ActionState::ColdQueued))) {
      let outcome = with_optimistic_retry(self.ctx.repo.as_ref(), &candidate.did, self.max_retries(), |df| {
        let inputs = machine.warm(df, now);
        Ok(if inputs.is_empty() { Mutation::Skip(inputs) } else { Mutation::Save(inputs) })
      });
      match outcome {
        Ok((_, inputs)) => published += self.dispatch(&inputs, false),
        Err(e) => log::warn!("no se pudo sacar {} del cold queue: {}", candidate.did, e),
      }
    }
    Ok(published)
  }

  /// Refresca el grafo y purga las colas de clases de acción retiradas.
  pub fn refresh_flows(&self) -> Result<RefreshOutcome> {
    let outcome = self.ctx.flows.refresh(self.ctx.flow_source.as_ref())?;
    if let RefreshOutcome::Swapped { version, retired_action_classes } = &outcome {
      log::info!("grafo de flujos actualizado a la versión {}", version);
      if !retired_action_classes.is_empty() {
        self.ctx.queue.drop(retired_action_classes)?;
        log::info!("colas retiradas: {}", retired_action_classes.join(", "));
      }
    }
    Ok(outcome)
  }
}
