//! Núcleo de orquestación de DeltaFi.
//!
//! Reúne la máquina de estados de DeltaFiles, el servicio que la aplica con
//! concurrencia optimista, los loops periódicos (eventos, requeue, borrado,
//! refresco de flujos) y el runner de retención.
//!
//! Ejemplo mínimo en memoria:
//!
//! ```
//! use deltafi_orchestrator::{CoreConfig, CoreContext, DeltaFilesService, IngressRequest};
//! use flow::{ActionSpec, ActionType, FlowDefinition};
//! use std::sync::Arc;
//!
//! let simple = FlowDefinition::new("simple", vec![ActionSpec::new("t", "org.T", ActionType::Transform)]);
//! let ctx = CoreContext::in_memory(CoreConfig::default(), vec![simple]).unwrap();
//! let service = DeltaFilesService::new(Arc::new(ctx));
//! let df = service.ingress(IngressRequest { flow: "simple".into(), name: "a.txt".into(), ..Default::default() })
//!                 .unwrap();
//! assert_eq!(df.stage.as_str(), "IN_FLIGHT");
//! ```
pub mod config;
pub mod context;
pub mod errors;
pub mod retention;
pub mod retry;
pub mod scheduler;
pub mod service;
pub mod state_machine;

pub use config::CoreConfig;
pub use context::CoreContext;
pub use errors::{CoreError, Result};
pub use retention::{configured_policies, load_policies, DeletePolicy, DeleteReport, DeleteRunner, TTL_SYSTEM_POLICY};
pub use retry::{with_optimistic_retry, Mutation};
pub use scheduler::{spawn, SchedulerHandle};
pub use service::{AcknowledgeResult, CancelResult, DeltaFilesService, EventBatchReport, IngressRequest, RetryResult};
pub use state_machine::{StateMachine, Transition, MISSING_FLOW_ACTION, TEST_MODE_ANNOTATION};
