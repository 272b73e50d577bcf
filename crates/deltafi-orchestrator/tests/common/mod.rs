// Utilidades compartidas por los tests de integración: contexto en memoria
// y un "worker" mínimo que toma solicitudes y arma resultados.
#![allow(dead_code)]

use deltafi_domain::{ActionEvent, ActionEventKind, ActionInput, DeltaFile, DeltaFileRepository, InMemoryContentStorage,
                     InMemoryDeltaFileRepository};
use deltafi_orchestrator::{CoreConfig, CoreContext, DeletePolicy, DeltaFilesService};
use deltafi_queue::{ActionQueueClient, InMemoryKeyedQueue};
use flow::{ActionSpec, ActionType, FlowDefinition, InMemoryFlowSource};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub const TRANSFORM_QUEUE: &str = "org.deltafi.SimpleTransform";
pub const EGRESS_QUEUE: &str = "org.deltafi.SimpleEgress";

/// Flujo "simple": Transform y luego Egress.
pub fn simple_flow() -> FlowDefinition {
    FlowDefinition::new("simple",
                        vec![ActionSpec::new("SimpleTransform", TRANSFORM_QUEUE, ActionType::Transform),
                             ActionSpec::new("SimpleEgress", EGRESS_QUEUE, ActionType::Egress)])
}

pub struct Harness {
    pub ctx: Arc<CoreContext>,
    pub service: DeltaFilesService,
    pub source: Arc<InMemoryFlowSource>,
}

pub fn harness(flows: Vec<FlowDefinition>) -> Harness {
    harness_with(CoreConfig::default(), flows, Vec::new())
}

pub fn harness_with(config: CoreConfig, flows: Vec<FlowDefinition>, policies: Vec<DeletePolicy>) -> Harness {
    harness_on(config, flows, policies, Arc::new(InMemoryDeltaFileRepository::new()))
}

pub fn harness_on(config: CoreConfig,
                  flows: Vec<FlowDefinition>,
                  policies: Vec<DeletePolicy>,
                  repo: Arc<dyn DeltaFileRepository>)
                  -> Harness {
    let source = Arc::new(InMemoryFlowSource::new(flows));
    let ctx = CoreContext::new(config,
                               repo,
                               ActionQueueClient::new(Arc::new(InMemoryKeyedQueue::new())),
                               source.clone(),
                               Arc::new(InMemoryContentStorage::new()),
                               policies).expect("context");
    let ctx = Arc::new(ctx);
    Harness { service: DeltaFilesService::new(Arc::clone(&ctx)),
              ctx,
              source }
}

impl Harness {
    /// Toma sin bloquear la siguiente solicitud de `queue`; falla si no hay.
    pub fn take(&self, queue: &str) -> ActionInput {
        self.ctx
            .queue
            .take::<ActionInput>(queue, Duration::ZERO)
            .expect("queue take")
            .unwrap_or_else(|| panic!("no dispatch in {}", queue))
    }

    pub fn queue_size(&self, queue: &str) -> usize {
        self.ctx.queue.size(queue).expect("queue size")
    }

    pub fn stored(&self, did: &Uuid) -> DeltaFile {
        self.ctx.repo.find(did).expect("find").expect("stored delta file")
    }
}

/// Resultado dirigido a la acción que originó `input`.
pub fn event_for(input: &ActionInput, kind: ActionEventKind) -> ActionEvent {
    let ctx = &input.action_context;
    ActionEvent::new(ctx.did, &ctx.flow_name, ctx.flow_id, &ctx.action_name, ctx.attempt, kind)
}
