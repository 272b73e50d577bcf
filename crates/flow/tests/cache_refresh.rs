use flow::{ActionSpec, ActionType, FlowDefinitionSource, FlowGraphCache, InMemoryFlowSource, JsonFileFlowSource,
           RefreshOutcome};
use std::sync::Arc;

fn simple(name: &str, class: &str) -> flow::FlowDefinition {
    flow::FlowDefinition::new(name, vec![ActionSpec::new("Transform", class, ActionType::Transform)])
}

#[test]
fn refresh_swaps_snapshot_only_on_change() {
    let source = InMemoryFlowSource::new(vec![simple("one", "org.deltafi.One")]);
    let cache = FlowGraphCache::load(&source).expect("load");
    let before = cache.snapshot();

    assert_eq!(cache.refresh(&source).expect("refresh"), RefreshOutcome::Unchanged);
    assert!(Arc::ptr_eq(&before, &cache.snapshot()));

    source.upsert(simple("two", "org.deltafi.Two")).expect("upsert");
    match cache.refresh(&source).expect("refresh") {
        RefreshOutcome::Swapped { retired_action_classes, .. } => assert!(retired_action_classes.is_empty()),
        other => panic!("expected swap, got {:?}", other),
    }
    // el snapshot viejo sigue siendo legible por quien lo tomó
    assert_eq!(before.len(), 1);
    assert_eq!(cache.snapshot().len(), 2);
}

#[test]
fn stopping_a_flow_retires_its_action_class() {
    let source = InMemoryFlowSource::new(vec![simple("one", "org.deltafi.One"), simple("two", "org.deltafi.Shared"),
                                              simple("three", "org.deltafi.Shared")]);
    let cache = FlowGraphCache::load(&source).expect("load");

    source.set_running("one", false).expect("stop one");
    source.set_running("two", false).expect("stop two");
    match cache.refresh(&source).expect("refresh") {
        RefreshOutcome::Swapped { retired_action_classes, .. } => {
            // Shared sigue en uso por "three"
            assert_eq!(retired_action_classes, vec!["org.deltafi.One".to_string()]);
        }
        other => panic!("expected swap, got {:?}", other),
    }
    assert!(!cache.snapshot().is_running("one"));
}

#[test]
fn invalid_refresh_keeps_previous_snapshot() {
    let source = InMemoryFlowSource::new(vec![simple("one", "org.deltafi.One")]);
    let cache = FlowGraphCache::load(&source).expect("load");
    let version = cache.snapshot().version().to_string();

    source.upsert(flow::FlowDefinition::new("broken", vec![])).expect("upsert");
    assert!(cache.refresh(&source).is_err());
    assert_eq!(cache.snapshot().version(), version);
}

#[test]
fn json_file_source_reads_definitions() {
    let path = std::env::temp_dir().join(format!("flows_{}.json", std::process::id()));
    let defs = vec![simple("file-flow", "org.deltafi.File")];
    std::fs::write(&path, serde_json::to_string(&defs).expect("serialize")).expect("write");

    let source = JsonFileFlowSource::new(&path);
    let loaded = source.load_definitions().expect("load");
    assert_eq!(loaded, defs);

    std::fs::remove_file(&path).ok();
    assert!(source.load_definitions().is_err());
}
