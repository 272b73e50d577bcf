use chrono::Utc;
use deltafi_domain::{ActionContext, ActionEvent, ActionEventKind, ActionInput, ActionType};
use deltafi_queue::{ActionQueueClient, InMemoryKeyedQueue, KeyedBlockingQueue, QueueError, RESULT_QUEUE};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use uuid::Uuid;

fn input(queue: &str, action: &str) -> ActionInput {
    ActionInput { queue_name: queue.to_string(),
                  action_context: ActionContext { did: Uuid::new_v4(),
                                                  delta_file_name: "in.txt".into(),
                                                  data_source: "simple".into(),
                                                  flow_name: "simple".into(),
                                                  flow_id: Uuid::new_v4(),
                                                  action_name: action.to_string(),
                                                  action_id: Uuid::new_v4(),
                                                  action_type: ActionType::Transform,
                                                  attempt: 1,
                                                  system_name: "test".into() },
                  content: vec![],
                  metadata: indexmap::IndexMap::new(),
                  action_parameters: serde_json::Value::Null,
                  action_created: Utc::now(),
                  cold_queued: false }
}

#[test]
fn take_on_empty_queue_returns_none_after_timeout() {
    let client = ActionQueueClient::new(Arc::new(InMemoryKeyedQueue::new()));
    let started = Instant::now();
    let got: Option<ActionInput> = client.take("org.deltafi.Transform", Duration::from_millis(50)).expect("take");
    assert!(got.is_none());
    assert!(started.elapsed() >= Duration::from_millis(50));
}

#[test]
fn take_blocks_until_producer_puts() {
    let backend = Arc::new(InMemoryKeyedQueue::new());
    let client = ActionQueueClient::new(backend.clone());
    let producer = client.clone();
    let sent = input("org.deltafi.Transform", "Transform");
    let expected = sent.clone();
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        producer.put("org.deltafi.Transform", &sent).expect("put");
    });
    let got: Option<ActionInput> = client.take("org.deltafi.Transform", Duration::from_secs(2)).expect("take");
    handle.join().expect("join");
    assert_eq!(got, Some(expected));
}

#[test]
fn put_actions_skips_cold_and_duplicates() {
    let backend = Arc::new(InMemoryKeyedQueue::new());
    let client = ActionQueueClient::new(backend.clone());
    let warm = input("org.deltafi.Transform", "Transform");
    let mut cold = input("org.deltafi.Transform", "Transform");
    cold.cold_queued = true;

    assert_eq!(client.put_actions(&[warm.clone(), cold], false).expect("put"), 1);
    // requeue del mismo despacho: ya está en la cola
    assert_eq!(client.put_actions(&[warm.clone()], true).expect("requeue"), 0);
    assert_eq!(client.size("org.deltafi.Transform").expect("size"), 1);

    let mut retry = warm.clone();
    retry.action_context.action_id = Uuid::new_v4();
    retry.action_context.attempt = 2;
    assert_eq!(client.put_actions(&[retry], true).expect("retry"), 1);
}

#[test]
fn oldest_action_is_taken_first() {
    let client = ActionQueueClient::new(Arc::new(InMemoryKeyedQueue::new()));
    let mut newer = input("q", "B");
    newer.action_created = Utc::now();
    let mut older = input("q", "A");
    older.action_created = newer.action_created - chrono::Duration::seconds(10);
    client.put_actions(&[newer, older], false).expect("put");
    let first: ActionInput = client.take("q", Duration::ZERO).expect("take").expect("item");
    assert_eq!(first.action_context.action_name, "A");
}

#[test]
fn drain_results_skips_garbage_and_respects_max() {
    let backend = Arc::new(InMemoryKeyedQueue::new());
    let client = ActionQueueClient::new(backend.clone());
    backend.put(RESULT_QUEUE, 0, "not json").expect("raw put");
    for i in 0..3 {
        let ev = ActionEvent::new(Uuid::new_v4(), "simple", Uuid::new_v4(), &format!("A{}", i), 1, ActionEventKind::Delete);
        client.put_result(&ev).expect("put result");
    }
    let first = client.drain_results(2).expect("drain");
    assert_eq!(first.len(), 2, "garbage is consumed and skipped");
    assert_eq!(first[0].action_name, "A0");
    let rest = client.drain_results(10).expect("drain");
    assert_eq!(rest.len(), 1);
    assert!(client.drain_results(10).expect("drain empty").is_empty());
}

#[test]
fn claim_reports_started_event() {
    let client = ActionQueueClient::new(Arc::new(InMemoryKeyedQueue::new()));
    let sent = input("org.deltafi.Egress", "Egress");
    client.put_actions(&[sent.clone()], false).expect("put");

    let claimed = client.claim("org.deltafi.Egress", Duration::ZERO).expect("claim").expect("item");
    assert_eq!(claimed.action_context.action_id, sent.action_context.action_id);
    let started = client.take_result(Duration::ZERO).expect("take result").expect("started");
    assert_eq!(started.kind, ActionEventKind::Started);
    assert_eq!(started.action_name, "Egress");
    assert!(started.start.is_some());
}

#[test]
fn drop_purges_named_queues() {
    let client = ActionQueueClient::new(Arc::new(InMemoryKeyedQueue::new()));
    client.put_actions(&[input("a", "A"), input("b", "B")], false).expect("put");
    client.drop(&["a".to_string()]).expect("drop");
    assert_eq!(client.size("a").expect("size a"), 0);
    assert_eq!(client.size("b").expect("size b"), 1);
}

#[test]
fn deserialization_failure_is_not_a_connection_error() {
    let backend = Arc::new(InMemoryKeyedQueue::new());
    backend.put("q", 0, "{").expect("put");
    let client = ActionQueueClient::new(backend);
    match client.take::<ActionInput>("q", Duration::ZERO) {
        Err(e @ QueueError::Serialization(_)) => assert!(!e.is_connection()),
        other => panic!("expected serialization error, got {:?}", other),
    }
}
