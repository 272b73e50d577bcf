mod action;
mod action_input;
mod content;
mod content_storage;
mod delta_file;
mod delta_file_flow;
mod domain_repository;
mod errors;
mod event;

pub use action::{truncate, Action, ActionState, MAX_CAUSE_SIZE};
pub use action_input::{ActionContext, ActionInput};
pub use content::{Content, ObjectReference, Segment, STORAGE_BUCKET};
pub use content_storage::{delete_all_content, load_content, store_content, ContentStorage, InMemoryContentStorage};
pub use delta_file::{DeltaFile, DeltaFileStage, SourceInfo};
pub use delta_file_flow::{DeltaFileFlow, DeltaFileFlowState, FlowInput};
pub use domain_repository::{DeltaFileCriteria, DeltaFileRepository, InMemoryDeltaFileRepository, PersistResult};
pub use errors::DomainError;
pub use event::{ActionEvent, ActionEventKind, ErrorEvent, FilterEvent, SplitChild, SplitEvent, TransformEvent};
// Re-export para que los consumidores no dependan de `flow` sólo por el tipo
pub use flow::ActionType;
