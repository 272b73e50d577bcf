use chrono::{Duration, Utc};
use deltafi_domain::{ActionState, ActionType, DeltaFile, DeltaFileCriteria, DeltaFileRepository, DeltaFileStage,
                     DomainError, PersistResult};
use deltafi_persistence::DieselDeltaFileRepository;
use indexmap::IndexMap;
use uuid::Uuid;

fn temp_repo() -> (DieselDeltaFileRepository, std::path::PathBuf) {
  // Base SQLite en archivo temporal para aislar cada test.
  let tmp_path = std::env::temp_dir().join(format!("deltafi_test_{}.db", Uuid::new_v4()));
  let db_url = tmp_path.to_str().expect("utf8 path").to_string();
  let repo = DieselDeltaFileRepository::new(&db_url).expect("failed to create repo");
  (repo, tmp_path)
}

fn cleanup(path: std::path::PathBuf) {
  for suffix in ["", "-wal", "-shm"] {
    let _ = std::fs::remove_file(format!("{}{}", path.display(), suffix));
  }
}

fn sample(source: &str) -> DeltaFile {
  let mut df = DeltaFile::ingress(Uuid::new_v4(), "in.txt", source, IndexMap::new(), vec![], Utc::now());
  let now = Utc::now();
  df.flows[0].queue_action("Transform", ActionType::Transform, "org.deltafi.Transform", false, now);
  df.update_state(now);
  df
}

#[test]
fn diesel_delta_file_roundtrip_and_optimistic_save() {
  if cfg!(feature = "pg") {
    eprintln!("skipping sqlite-only persistence test because 'pg' feature is enabled");
    return;
  }
  let (repo, path) = temp_repo();
  let mut df = sample("simple");
  repo.insert(&df).expect("insert");
  match repo.insert(&df) {
    Err(DomainError::ValidationError(_)) => {}
    other => panic!("expected validation error on duplicate insert, got {:?}", other),
  }

  let loaded = repo.find(&df.did).expect("find").expect("exists");
  assert_eq!(loaded.version, 0);
  assert_eq!(loaded.flows[0].actions[0].state, ActionState::Queued);
  assert_eq!(loaded.stage, DeltaFileStage::InFlight);

  df.annotations.insert("k".into(), "v".into());
  match repo.save(&df, 0).expect("save") {
    PersistResult::Ok { new_version } => assert_eq!(new_version, 1),
    PersistResult::Conflict => panic!("unexpected conflict"),
  }
  match repo.save(&df, 0).expect("stale save") {
    PersistResult::Conflict => {}
    PersistResult::Ok { .. } => panic!("stale save must conflict"),
  }
  let reloaded = repo.find(&df.did).expect("find").expect("exists");
  assert_eq!(reloaded.version, 1);
  assert_eq!(reloaded.annotations.get("k").map(String::as_str), Some("v"));

  let missing = sample("simple");
  assert!(repo.save(&missing, 0).is_err(), "saving an unknown did is an error");
  cleanup(path);
}

#[test]
fn diesel_query_by_criteria() {
  if cfg!(feature = "pg") {
    eprintln!("skipping sqlite-only persistence test because 'pg' feature is enabled");
    return;
  }
  let (repo, path) = temp_repo();
  let now = Utc::now();

  let mut complete = sample("a");
  complete.stage = DeltaFileStage::Complete;
  complete.terminal_at = Some(now - Duration::days(2));
  complete.modified = now - Duration::days(2);
  complete.created = now - Duration::days(3);
  complete.total_bytes = 500;
  let mut deleted = sample("a");
  deleted.stage = DeltaFileStage::Complete;
  deleted.terminal_at = Some(now - Duration::days(2));
  deleted.content_deleted = Some(now);
  let in_flight = sample("b");
  for df in [&complete, &deleted, &in_flight] {
    repo.insert(df).expect("insert");
  }

  let terminal = repo.query(&DeltaFileCriteria { stages: vec![DeltaFileStage::Complete, DeltaFileStage::Error],
                                                 terminal_before: Some(now - Duration::days(1)),
                                                 content_deleted: Some(false),
                                                 ..Default::default() })
                     .expect("query");
  assert_eq!(terminal.iter().map(|d| d.did).collect::<Vec<_>>(), vec![complete.did]);

  let by_flow = repo.query(&DeltaFileCriteria { data_source: Some("b".into()), ..Default::default() })
                    .expect("query");
  assert_eq!(by_flow.len(), 1);
  assert_eq!(by_flow[0].did, in_flight.did);

  let big = repo.query(&DeltaFileCriteria { min_bytes: Some(100),
                                            created_before: Some(now - Duration::days(1)),
                                            ..Default::default() })
                .expect("query");
  assert_eq!(big.len(), 1);

  let limited = repo.query(&DeltaFileCriteria { limit: Some(2), ..Default::default() }).expect("query");
  assert_eq!(limited.len(), 2);
  assert_eq!(limited[0].did, complete.did, "oldest modified first");

  assert!(repo.delete(&complete.did).expect("delete"));
  assert!(!repo.delete(&complete.did).expect("delete again"));
  assert_eq!(repo.count().expect("count"), 2);
  cleanup(path);
}

#[test]
fn diesel_active_action_column_follows_saves() {
  if cfg!(feature = "pg") {
    eprintln!("skipping sqlite-only persistence test because 'pg' feature is enabled");
    return;
  }
  let (repo, path) = temp_repo();
  let now = Utc::now();
  let mut df = DeltaFile::ingress(Uuid::new_v4(), "in.txt", "a", IndexMap::new(), vec![], now);
  df.flows[0].queue_action("Transform", ActionType::Transform, "org.deltafi.Transform", false, now - Duration::minutes(10));
  df.update_state(now);
  repo.insert(&df).expect("insert");

  let stuck = DeltaFileCriteria { stages: vec![DeltaFileStage::InFlight],
                                  active_modified_before: Some(now - Duration::minutes(5)),
                                  ..Default::default() };
  assert_eq!(repo.query(&stuck).expect("query").len(), 1);

  // el requeue refresca la acción y deja de ser candidata
  df.flows[0].actions[0].modified = now;
  match repo.save(&df, 0).expect("save") {
    PersistResult::Ok { .. } => {}
    PersistResult::Conflict => panic!("unexpected conflict"),
  }
  assert!(repo.query(&stuck).expect("query").is_empty());

  df.flows[0].actions[0].error(None, None, "boom", "", now);
  df.flows[0].update_state(now);
  df.update_state(now);
  assert!(df.acknowledge_errors("triaged", now));
  match repo.save(&df, 1).expect("save") {
    PersistResult::Ok { .. } => {}
    PersistResult::Conflict => panic!("unexpected conflict"),
  }
  let acked = repo.query(&DeltaFileCriteria { error_acknowledged: Some(true), ..Default::default() })
                  .expect("query");
  assert_eq!(acked.len(), 1);
  assert_eq!(acked[0].error_acknowledged_reason.as_deref(), Some("triaged"));
  cleanup(path);
}
