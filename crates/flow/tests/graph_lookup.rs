use flow::{ActionSpec, ActionType, FlowDefinition, FlowError, FlowGraph};

fn three_step() -> FlowDefinition {
    FlowDefinition::new("abc",
                        vec![ActionSpec::new("A", "org.deltafi.A", ActionType::Transform),
                             ActionSpec::new("B", "org.deltafi.B", ActionType::Transform),
                             ActionSpec::new("C", "org.deltafi.C", ActionType::Egress)])
}

#[test]
fn three_step_flow_walks_in_order() {
    let graph = FlowGraph::build(vec![three_step()]).expect("build");

    let first = graph.next_actions("abc", None).expect("first");
    assert_eq!(first.iter().map(|a| a.name.as_str()).collect::<Vec<_>>(), vec!["A"]);

    let after_a = graph.next_actions("abc", Some("A")).expect("after A");
    assert_eq!(after_a.len(), 1);
    assert_eq!(after_a[0].name, "B");

    let after_b = graph.next_actions("abc", Some("B")).expect("after B");
    assert_eq!(after_b[0].name, "C");
    assert_eq!(after_b[0].action_type, ActionType::Egress);

    let after_c = graph.next_actions("abc", Some("C")).expect("after C");
    assert!(after_c.is_empty(), "flow should be complete after C");
}

#[test]
fn unknown_flow_and_action_are_distinct_errors() {
    let graph = FlowGraph::build(vec![three_step()]).expect("build");
    match graph.next_actions("missing", Some("A")) {
        Err(FlowError::UnknownFlow(name)) => assert_eq!(name, "missing"),
        other => panic!("expected UnknownFlow, got {:?}", other),
    }
    match graph.next_actions("abc", Some("Z")) {
        Err(FlowError::UnknownAction { flow, action }) => {
            assert_eq!(flow, "abc");
            assert_eq!(action, "Z");
        }
        other => panic!("expected UnknownAction, got {:?}", other),
    }
}

#[test]
fn invalid_definitions_are_rejected() {
    let empty = FlowDefinition::new("empty", vec![]);
    assert!(matches!(FlowGraph::build(vec![empty]), Err(FlowError::Invalid(_))));

    let dup = FlowDefinition::new("dup",
                                  vec![ActionSpec::new("A", "x", ActionType::Transform),
                                       ActionSpec::new("A", "y", ActionType::Transform)]);
    assert!(matches!(FlowGraph::build(vec![dup]), Err(FlowError::Invalid(_))));
}

#[test]
fn downstream_flows_skip_stopped_and_missing() {
    let ingress = FlowDefinition::new("ingress", vec![ActionSpec::new("Load", "org.deltafi.Load", ActionType::Transform)])
        .publishing_to(vec!["enrich".into(), "stopped".into(), "ghost".into()]);
    let enrich = FlowDefinition::new("enrich", vec![ActionSpec::new("Enrich", "org.deltafi.Enrich", ActionType::Transform)]);
    let stopped = FlowDefinition::new("stopped", vec![ActionSpec::new("X", "org.deltafi.X", ActionType::Transform)])
        .with_running(false);
    let graph = FlowGraph::build(vec![ingress, enrich, stopped]).expect("build");

    let downstream = graph.downstream_flows("ingress").expect("downstream");
    assert_eq!(downstream.len(), 1);
    assert_eq!(downstream[0].name, "enrich");
    assert!(!graph.is_running("stopped"));
    assert!(!graph.is_running("ghost"));
}

#[test]
fn definitions_deserialize_from_json() {
    let raw = r#"[{"name":"simple","testMode":true,
                   "actions":[{"name":"Transform","actionClass":"org.deltafi.Transform","type":"TRANSFORM"},
                              {"name":"Egress","actionClass":"org.deltafi.Egress","type":"EGRESS",
                               "parameters":{"url":"http://sink"}}]}]"#;
    let defs: Vec<FlowDefinition> = serde_json::from_str(raw).expect("json");
    assert!(defs[0].running, "running defaults to true");
    assert!(defs[0].test_mode);
    let graph = FlowGraph::build(defs).expect("build");
    let egress = graph.action_spec("simple", "Egress").expect("egress spec");
    assert_eq!(egress.parameters["url"], "http://sink");
}
