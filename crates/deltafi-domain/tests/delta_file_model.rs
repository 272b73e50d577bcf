use chrono::{Duration, Utc};
use deltafi_domain::{ActionState, ActionType, Content, DeltaFile, DeltaFileFlowState, DeltaFileStage, DomainError,
                     Segment};
use indexmap::IndexMap;
use uuid::Uuid;

fn ingress(did: Uuid) -> DeltaFile {
  let content = Content::new("in.txt", "text/plain", vec![Segment::new(Uuid::new_v4(), 0, 42, did)]);
  let mut meta = IndexMap::new();
  meta.insert("source".to_string(), "test".to_string());
  DeltaFile::ingress(did, "in.txt", "simple", meta, vec![content], Utc::now())
}

#[test]
fn queued_action_makes_delta_file_in_flight() {
  let did = Uuid::new_v4();
  let mut df = ingress(did);
  assert_eq!(df.stage, DeltaFileStage::Ingress);
  assert_eq!(df.ingress_bytes, 42);

  let now = Utc::now();
  let action = df.flows[0].queue_action("Transform", ActionType::Transform, "org.deltafi.Transform", false, now);
  assert_eq!(action.state, ActionState::Queued);
  assert_eq!(action.attempt, 1);
  df.update_state(now);
  assert_eq!(df.stage, DeltaFileStage::InFlight);
  assert_eq!(df.active_actions().len(), 1);
}

#[test]
fn stale_attempt_is_unexpected() {
  let did = Uuid::new_v4();
  let mut df = ingress(did);
  let now = Utc::now();
  df.flows[0].queue_action("Transform", ActionType::Transform, "org.deltafi.Transform", false, now);
  let flow_id = df.flows[0].id;

  assert!(df.pending_action_mut("simple", flow_id, "Transform", 1).is_ok());
  match df.pending_action_mut("simple", flow_id, "Transform", 2) {
    Err(DomainError::UnexpectedAction { did: d, action, .. }) => {
      assert_eq!(d, did);
      assert_eq!(action, "Transform");
    }
    other => panic!("expected UnexpectedAction, got {:?}", other),
  }
  assert!(df.pending_action_mut("simple", Uuid::new_v4(), "Transform", 1).is_err());
}

#[test]
fn error_then_resume_increments_attempt() {
  let did = Uuid::new_v4();
  let mut df = ingress(did);
  let now = Utc::now();
  df.flows[0].queue_action("Transform", ActionType::Transform, "org.deltafi.Transform", false, now);
  let flow_id = df.flows[0].id;
  df.pending_action_mut("simple", flow_id, "Transform", 1)
    .expect("pending")
    .error(None, None, "bad format", "", now);
  df.flows[0].update_state(now);
  df.update_state(now);
  assert_eq!(df.stage, DeltaFileStage::Error);
  assert!(df.terminal_at.is_some());

  let resumed = df.resume_errors(now);
  assert_eq!(resumed.len(), 1);
  assert_eq!(resumed[0].1, "Transform");
  assert_eq!(df.flows[0].actions[0].state, ActionState::Retried);
  assert_eq!(df.stage, DeltaFileStage::InFlight);
  assert!(df.terminal_at.is_none());

  let retry = df.flows[0].queue_action("Transform", ActionType::Transform, "org.deltafi.Transform", false, now);
  assert_eq!(retry.attempt, 2);
}

#[test]
fn cumulative_metadata_honors_deletes() {
  let did = Uuid::new_v4();
  let mut df = ingress(did);
  let now = Utc::now();
  let flow = &mut df.flows[0];
  let action = flow.queue_action("Transform", ActionType::Transform, "org.deltafi.Transform", false, now);
  let mut produced = IndexMap::new();
  produced.insert("k".to_string(), "v".to_string());
  action.complete(None, None, vec![], produced, vec!["source".to_string()], now);

  let meta = flow.metadata();
  assert_eq!(meta.get("k").map(String::as_str), Some("v"));
  assert!(!meta.contains_key("source"));
  // la última acción completa no produjo contenido
  assert!(flow.last_content().is_empty());
}

#[test]
fn cancel_only_applies_to_active_delta_files() {
  let did = Uuid::new_v4();
  let mut df = ingress(did);
  let now = Utc::now();
  df.flows[0].queue_action("Transform", ActionType::Transform, "org.deltafi.Transform", false, now);
  df.update_state(now);

  assert!(df.cancel(now));
  assert_eq!(df.stage, DeltaFileStage::Cancelled);
  assert_eq!(df.flows[0].state, DeltaFileFlowState::Cancelled);
  assert_eq!(df.flows[0].actions[0].state, ActionState::Cancelled);
  assert!(!df.cancel(now + Duration::seconds(1)), "second cancel is refused");
}

#[test]
fn split_child_continues_after_split_action() {
  let did = Uuid::new_v4();
  let mut parent = ingress(did);
  let now = Utc::now();
  parent.flows[0].queue_action("Split", ActionType::Transform, "org.deltafi.Split", false, now).split(None, None, now);
  parent.flows[0].update_state(now);

  let content = vec![Content::new("part-1", "text/plain", vec![Segment::new(Uuid::new_v4(), 0, 5, did)])];
  let split_id = parent.flows[0].actions[0].id;
  let child_did = DeltaFile::split_child_did(did, parent.flows[0].id, split_id, 0);
  let child = DeltaFile::split_child(&parent, child_did, 0, "part-1", content, IndexMap::new(), now).expect("child");
  assert_eq!(child.did, child_did);
  assert_ne!(child.did, parent.did);
  assert_eq!(child.parent_dids, vec![did]);
  assert_eq!(child.source_info, parent.source_info);
  assert_eq!(child.flows[0].last_settled_action_name(), Some("Split"));
  assert_eq!(child.flows[0].actions[0].state, ActionState::Inherited);
  assert_eq!(child.flows[0].state, DeltaFileFlowState::InFlight);
  assert_eq!(child.flows[0].last_content()[0].name, "part-1");
  assert_eq!(child.flows[0].metadata().get("source").map(String::as_str), Some("test"));
}

#[test]
fn content_deleted_mark_is_idempotent() {
  let mut df = ingress(Uuid::new_v4());
  let now = Utc::now();
  assert!(df.mark_content_deleted("policy", now));
  assert!(!df.mark_content_deleted("other", now + Duration::seconds(5)));
  assert_eq!(df.content_deleted_reason.as_deref(), Some("policy"));
  assert_eq!(df.content_deleted, Some(now));
}

#[test]
fn split_child_dids_are_stable_per_index() {
  let parent = Uuid::new_v4();
  let (flow_id, action_id) = (Uuid::new_v4(), Uuid::new_v4());
  let first = DeltaFile::split_child_did(parent, flow_id, action_id, 0);
  assert_eq!(first, DeltaFile::split_child_did(parent, flow_id, action_id, 0));
  assert_ne!(first, DeltaFile::split_child_did(parent, flow_id, action_id, 1));
  assert_ne!(first, DeltaFile::split_child_did(parent, flow_id, Uuid::new_v4(), 0));
  assert_ne!(first, DeltaFile::split_child_did(Uuid::new_v4(), flow_id, action_id, 0));
}

fn errored(did: Uuid, now: chrono::DateTime<Utc>) -> DeltaFile {
  let mut df = ingress(did);
  df.flows[0].queue_action("Transform", ActionType::Transform, "org.deltafi.Transform", false, now);
  let flow_id = df.flows[0].id;
  df.pending_action_mut("simple", flow_id, "Transform", 1)
    .expect("pending")
    .error(None, None, "bad format", "", now);
  df.flows[0].update_state(now);
  df.update_state(now);
  df
}

#[test]
fn errored_delta_file_is_not_cancellable() {
  let now = Utc::now();
  let mut df = errored(Uuid::new_v4(), now);
  assert_eq!(df.stage, DeltaFileStage::Error);
  assert!(!df.can_be_cancelled());
  assert!(!df.cancel(now));
  assert_eq!(df.stage, DeltaFileStage::Error);
  assert_eq!(df.flows[0].actions[0].state, ActionState::Error);
}

#[test]
fn acknowledged_error_stays_in_error_until_resumed() {
  let now = Utc::now();
  let mut df = errored(Uuid::new_v4(), now);
  assert!(df.has_unacknowledged_errors());
  assert!(df.acknowledge_errors("known bad input", now));
  assert_eq!(df.stage, DeltaFileStage::Error);
  assert!(!df.has_unacknowledged_errors());
  assert_eq!(df.error_acknowledged_reason.as_deref(), Some("known bad input"));

  df.resume_errors(now + Duration::seconds(1));
  assert_eq!(df.stage, DeltaFileStage::InFlight);
  assert!(df.error_acknowledged.is_none());
  assert!(df.error_acknowledged_reason.is_none());
  assert!(!df.acknowledge_errors("too late", now), "only errored delta files can be acknowledged");
}

#[test]
fn oldest_active_modified_ignores_settled_actions() {
  let now = Utc::now();
  let mut df = ingress(Uuid::new_v4());
  assert!(df.oldest_active_modified().is_none());
  let old = now - Duration::minutes(10);
  df.flows[0].queue_action("Transform", ActionType::Transform, "org.deltafi.Transform", false, old);
  let second = df.add_flow("other", Default::default(), 1, now);
  df.flows[second].queue_action("Egress", ActionType::Egress, "org.deltafi.Egress", false, now);
  assert_eq!(df.oldest_active_modified(), Some(old));

  let flow_id = df.flows[0].id;
  df.pending_action_mut("simple", flow_id, "Transform", 1)
    .expect("pending")
    .complete(None, None, vec![], IndexMap::new(), vec![], now);
  df.flows[0].update_state(now);
  assert_eq!(df.oldest_active_modified(), Some(now));
}
