//! Crate `flow`: grafo de flujos del orquestador.
//!
//! Este crate define las definiciones de flujo (`FlowDefinition`,
//! `ActionSpec`), el snapshot inmutable `FlowGraph` que responde a
//! `next_actions(flujo, acción_actual)`, el cache `FlowGraphCache` que
//! intercambia snapshots de forma atómica y el contrato
//! `FlowDefinitionSource` con fuentes en memoria y en archivo JSON.
//!
//! Diseño resumido:
//! - Snapshot inmutable: un refresco construye un grafo nuevo y lo instala
//!   completo; los lectores nunca observan un grafo a medio actualizar.
//! - Versionado: cada grafo lleva una huella blake3 de sus definiciones y el
//!   refresco sólo intercambia cuando la huella cambia.
//! - Banderas `running`/`test_mode` consultadas antes de despachar.
//!
//! Ejemplo rápido:
//! ```rust
//! use flow::{ActionSpec, ActionType, FlowDefinition, FlowGraph};
//! let graph = FlowGraph::build(vec![FlowDefinition::new("simple",
//!     vec![ActionSpec::new("Transform", "org.deltafi.Transform", ActionType::Transform),
//!          ActionSpec::new("Egress", "org.deltafi.Egress", ActionType::Egress)])]).unwrap();
//! let next = graph.next_actions("simple", Some("Transform")).unwrap();
//! assert_eq!(next[0].name, "Egress");
//! ```
pub mod domain;
pub mod engine;
pub mod errors;
pub mod repository;
pub mod service;
pub mod stubs;

pub use domain::*;
pub use engine::*;
pub use errors::*;
pub use repository::*;
pub use service::*;
pub use stubs::*;
